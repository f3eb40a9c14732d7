use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    Alignment, Applied, CellId, DiagramEditor, EditResult, EditorError, ExecuteOptions,
    GraphModel, PatternKind, Point, Snapshot, Command, ELEMENT_KIND_DEFAULT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gesture", rename_all = "kebab-case")]
pub enum Gesture {
    PointerDown {
        target: Option<CellId>,
        at: Point,
    },
    PointerMove {
        at: Point,
    },
    PointerUp {
        at: Point,
    },
    Click {
        target: Option<CellId>,
        #[serde(default)]
        additive: bool,
    },
    ContextMenu {
        target: Option<CellId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "with", rename_all = "kebab-case")]
pub enum EditAction {
    AddElement,
    Delete,
    Disconnect,
    Connect,
    Expand(PatternKind),
    Align(Alignment),
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Ignored,
    Selection(Vec<CellId>),
    Moved(Applied),
    /// Drag finished; carries the committed snapshot when the drag changed anything.
    DragEnded(Option<Snapshot>),
    Actions(Vec<EditAction>),
}

#[derive(Debug, Clone)]
struct Drag {
    group: String,
    origin: Point,
    starts: Vec<(CellId, Point)>,
    moved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GestureHandler {
    selection: Vec<CellId>,
    drag: Option<Drag>,
}

impl GestureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &[CellId] {
        &self.selection
    }

    pub fn select(&mut self, cells: Vec<CellId>) {
        self.selection = cells;
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn handle<G: GraphModel>(
        &mut self,
        editor: &mut DiagramEditor<G>,
        gesture: Gesture,
    ) -> EditResult<GestureOutcome> {
        match gesture {
            Gesture::PointerDown { target, at } => Ok(self.pointer_down(editor, target, at)),
            Gesture::PointerMove { at } => self.pointer_move(editor, at),
            Gesture::PointerUp { .. } => Ok(self.pointer_up(editor)),
            Gesture::Click { target, additive } => Ok(self.click(editor, target, additive)),
            Gesture::ContextMenu { target } => Ok(GestureOutcome::Actions(
                self.actions(editor, target.as_ref()),
            )),
        }
    }

    fn pointer_down<G: GraphModel>(
        &mut self,
        editor: &DiagramEditor<G>,
        target: Option<CellId>,
        at: Point,
    ) -> GestureOutcome {
        let Some(target) = target.filter(|id| is_element(editor, id)) else {
            self.drag = None;
            return GestureOutcome::Ignored;
        };
        if !self.selection.contains(&target) {
            self.selection = vec![target];
        }
        let starts: Vec<(CellId, Point)> = self
            .selection
            .iter()
            .filter_map(|id| editor.graph().position(id).map(|p| (id.clone(), p)))
            .collect();
        let group = format!("drag-{}", Uuid::new_v4());
        debug!(%group, elements = starts.len(), "drag started");
        self.drag = Some(Drag {
            group,
            origin: at,
            starts,
            moved: false,
        });
        GestureOutcome::Selection(self.selection.clone())
    }

    fn pointer_move<G: GraphModel>(
        &mut self,
        editor: &mut DiagramEditor<G>,
        at: Point,
    ) -> EditResult<GestureOutcome> {
        let Some(drag) = self.drag.as_mut() else {
            return Ok(GestureOutcome::Ignored);
        };
        let (dx, dy) = (at.x - drag.origin.x, at.y - drag.origin.y);
        let moves: Vec<(CellId, Point)> = drag
            .starts
            .iter()
            .map(|(id, start)| (id.clone(), start.offset(dx, dy)))
            .collect();
        let applied = editor.execute_with(
            Command::move_to(moves),
            ExecuteOptions::grouped(drag.group.clone()),
        )?;
        drag.moved = true;
        Ok(GestureOutcome::Moved(applied))
    }

    fn pointer_up<G: GraphModel>(&mut self, editor: &mut DiagramEditor<G>) -> GestureOutcome {
        match self.drag.take() {
            Some(drag) if drag.moved => {
                debug!(group = %drag.group, "drag ended");
                GestureOutcome::DragEnded(editor.commit())
            }
            Some(_) => GestureOutcome::DragEnded(None),
            None => GestureOutcome::Ignored,
        }
    }

    fn click<G: GraphModel>(
        &mut self,
        editor: &DiagramEditor<G>,
        target: Option<CellId>,
        additive: bool,
    ) -> GestureOutcome {
        match target.filter(|id| editor.graph().contains(id)) {
            None => self.selection.clear(),
            Some(id) if additive => {
                if let Some(index) = self.selection.iter().position(|s| s == &id) {
                    self.selection.remove(index);
                } else {
                    self.selection.push(id);
                }
            }
            Some(id) => self.selection = vec![id],
        }
        GestureOutcome::Selection(self.selection.clone())
    }

    pub fn actions<G: GraphModel>(
        &self,
        editor: &DiagramEditor<G>,
        target: Option<&CellId>,
    ) -> Vec<EditAction> {
        let Some(target) = target.filter(|id| editor.graph().contains(id)) else {
            let mut actions = vec![EditAction::AddElement];
            if editor.can_undo() {
                actions.push(EditAction::Undo);
            }
            if editor.can_redo() {
                actions.push(EditAction::Redo);
            }
            return actions;
        };

        if !is_element(editor, target) {
            let mut actions = vec![EditAction::Disconnect];
            actions.extend(
                PatternKind::ALL
                    .into_iter()
                    .filter(|kind| *kind != PatternKind::Single)
                    .map(EditAction::Expand),
            );
            actions.push(EditAction::Delete);
            return actions;
        }

        let mut actions = vec![EditAction::Delete];
        let selected: Vec<&CellId> = self
            .selection
            .iter()
            .filter(|id| is_element(editor, id))
            .collect();
        if selected.contains(&target) {
            if let [first, second] = selected.as_slice() {
                if editor.check_connection(first, second).valid {
                    actions.push(EditAction::Connect);
                }
            }
            if selected.len() >= 2 {
                actions.extend(
                    [
                        Alignment::Left,
                        Alignment::Center,
                        Alignment::Right,
                        Alignment::Top,
                        Alignment::Middle,
                        Alignment::Bottom,
                    ]
                    .map(EditAction::Align),
                );
            }
        }
        actions
    }

    pub fn perform<G: GraphModel>(
        &mut self,
        editor: &mut DiagramEditor<G>,
        action: EditAction,
        target: Option<&CellId>,
        at: Point,
    ) -> EditResult<GestureOutcome> {
        let required = || target.cloned().ok_or(EditorError::EmptySelection);
        match action {
            EditAction::AddElement => {
                let id = editor.add_element(ELEMENT_KIND_DEFAULT, at)?;
                self.selection = vec![id];
                Ok(GestureOutcome::Selection(self.selection.clone()))
            }
            EditAction::Delete => {
                let target = required()?;
                let mut doomed = if self.selection.contains(&target) {
                    self.selection.clone()
                } else {
                    vec![target]
                };
                doomed.retain(|id| editor.graph().contains(id));
                let applied = editor.delete(&doomed)?;
                self.selection.clear();
                Ok(GestureOutcome::Moved(applied))
            }
            EditAction::Disconnect => {
                let applied = editor.disconnect(&required()?)?;
                Ok(GestureOutcome::Moved(applied))
            }
            EditAction::Connect => match self.selection.as_slice() {
                [first, second] => {
                    let (first, second) = (first.clone(), second.clone());
                    editor.connect(&first, &second)?;
                    Ok(GestureOutcome::Selection(self.selection.clone()))
                }
                _ => Err(EditorError::EmptySelection),
            },
            EditAction::Expand(pattern) => {
                let links = editor.expand_link(&required()?, pattern)?;
                Ok(GestureOutcome::Selection(links))
            }
            EditAction::Align(alignment) => {
                let applied = editor.align(&self.selection.clone(), alignment)?;
                Ok(GestureOutcome::Moved(applied))
            }
            EditAction::Undo => {
                editor.undo()?;
                Ok(GestureOutcome::Ignored)
            }
            EditAction::Redo => {
                editor.redo()?;
                Ok(GestureOutcome::Ignored)
            }
        }
    }
}

fn is_element<G: GraphModel>(editor: &DiagramEditor<G>, id: &CellId) -> bool {
    editor.graph().get(id).is_some_and(|cell| !cell.is_link())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_with_pair() -> (DiagramEditor, CellId, CellId) {
        let mut editor = DiagramEditor::new();
        let a = editor.add_element("rectangle", Point::new(0.0, 0.0)).unwrap();
        let b = editor.add_element("rectangle", Point::new(400.0, 0.0)).unwrap();
        (editor, a, b)
    }

    #[test]
    fn drag_coalesces_into_one_history_step() {
        let (mut editor, a, _) = editor_with_pair();
        let mut handler = GestureHandler::new();
        handler
            .handle(&mut editor, Gesture::PointerDown { target: Some(a.clone()), at: Point::new(10.0, 10.0) })
            .unwrap();
        for step in 1..=4 {
            let at = Point::new(10.0 + step as f32 * 30.0, 10.0);
            handler.handle(&mut editor, Gesture::PointerMove { at }).unwrap();
        }
        let ended = handler
            .handle(&mut editor, Gesture::PointerUp { at: Point::new(130.0, 10.0) })
            .unwrap();
        assert!(matches!(ended, GestureOutcome::DragEnded(Some(_))));
        assert!(!handler.is_dragging());
        assert_eq!(editor.history().len(), 3);
        assert_eq!(editor.graph().position(&a), Some(Point::new(120.0, 0.0)));

        editor.undo().unwrap();
        assert_eq!(editor.graph().position(&a), Some(Point::new(0.0, 0.0)));
    }

    #[test]
    fn blank_click_clears_selection_and_additive_click_toggles() {
        let (mut editor, a, b) = editor_with_pair();
        let mut handler = GestureHandler::new();
        handler.handle(&mut editor, Gesture::Click { target: Some(a.clone()), additive: false }).unwrap();
        handler.handle(&mut editor, Gesture::Click { target: Some(b.clone()), additive: true }).unwrap();
        assert_eq!(handler.selection(), &[a.clone(), b.clone()]);
        handler.handle(&mut editor, Gesture::Click { target: Some(a.clone()), additive: true }).unwrap();
        assert_eq!(handler.selection(), &[b]);
        handler.handle(&mut editor, Gesture::Click { target: None, additive: false }).unwrap();
        assert!(handler.selection().is_empty());
    }

    #[test]
    fn context_menu_depends_on_target() {
        let (mut editor, a, b) = editor_with_pair();
        let mut handler = GestureHandler::new();
        handler.select(vec![a.clone(), b.clone()]);

        let actions = handler.actions(&editor, Some(&a));
        assert!(actions.contains(&EditAction::Connect));
        assert!(actions.contains(&EditAction::Align(Alignment::Left)));

        let blank = handler.actions(&editor, None);
        assert_eq!(blank, vec![EditAction::AddElement, EditAction::Undo]);

        handler.perform(&mut editor, EditAction::Connect, Some(&a), Point::new(0.0, 0.0)).unwrap();
        let link = editor.graph().links()[0].clone();
        let on_link = handler.actions(&editor, Some(&link));
        assert_eq!(on_link[0], EditAction::Disconnect);
        assert!(on_link.contains(&EditAction::Expand(PatternKind::Grid)));
        assert!(!handler.actions(&editor, Some(&a)).contains(&EditAction::Connect));
    }

    #[test]
    fn delete_action_removes_whole_selection() {
        let (mut editor, a, b) = editor_with_pair();
        let mut handler = GestureHandler::new();
        handler.select(vec![a.clone(), b]);
        handler.perform(&mut editor, EditAction::Delete, Some(&a), Point::new(0.0, 0.0)).unwrap();
        assert_eq!(editor.graph().element_count(), 0);
        assert!(handler.selection().is_empty());
    }
}
