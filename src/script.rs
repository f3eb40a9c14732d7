use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::{
    Align, Alignment, CellId, Command, Connect, DiagramEditor, EditResult, ExecuteOptions,
    GraphModel, PatternKind, Point, PortId, Size, ELEMENT_HEIGHT, ELEMENT_KIND_DEFAULT,
    ELEMENT_WIDTH,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ScriptOp {
    AddElement {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        kind: Option<String>,
        x: f32,
        y: f32,
        #[serde(default)]
        width: Option<f32>,
        #[serde(default)]
        height: Option<f32>,
    },
    Delete {
        targets: Vec<String>,
    },
    Move {
        target: String,
        x: f32,
        y: f32,
        #[serde(default)]
        group: Option<String>,
    },
    Connect {
        #[serde(default)]
        name: Option<String>,
        source: String,
        target: String,
        #[serde(default)]
        source_port: Option<String>,
        #[serde(default)]
        target_port: Option<String>,
        #[serde(default)]
        pattern: Option<PatternKind>,
    },
    Disconnect {
        link: String,
    },
    Align {
        targets: Vec<String>,
        alignment: Alignment,
        #[serde(default)]
        reference: Option<String>,
    },
    Expand {
        link: String,
        pattern: PatternKind,
    },
    Undo,
    Redo,
    BeginBatch {
        description: String,
    },
    EndBatch,
    CancelBatch,
    Commit,
}

impl ScriptOp {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptOp::AddElement { .. } => "add-element",
            ScriptOp::Delete { .. } => "delete",
            ScriptOp::Move { .. } => "move",
            ScriptOp::Connect { .. } => "connect",
            ScriptOp::Disconnect { .. } => "disconnect",
            ScriptOp::Align { .. } => "align",
            ScriptOp::Expand { .. } => "expand",
            ScriptOp::Undo => "undo",
            ScriptOp::Redo => "redo",
            ScriptOp::BeginBatch { .. } => "begin-batch",
            ScriptOp::EndBatch => "end-batch",
            ScriptOp::CancelBatch => "cancel-batch",
            ScriptOp::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditScript {
    #[serde(default)]
    pub description: Option<String>,
    pub ops: Vec<ScriptOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub ok: bool,
    pub message: String,
    pub created: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReplayReport {
    pub steps: Vec<StepReport>,
    pub names: HashMap<String, CellId>,
}

impl ReplayReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|step| !step.ok).count()
    }

    pub fn succeeded(&self) -> bool {
        self.failures() == 0
    }
}

impl EditScript {
    pub fn new(ops: Vec<ScriptOp>) -> Self {
        Self {
            description: None,
            ops,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse edit script")
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("in '{}'", path.display()))
    }

    /// Runs every op in order. Failing ops are reported and, unless `stop_on_error` is
    /// set, skipped.
    pub fn replay<G: GraphModel>(
        &self,
        editor: &mut DiagramEditor<G>,
        stop_on_error: bool,
    ) -> ReplayReport {
        let mut report = ReplayReport::default();
        for (index, op) in self.ops.iter().enumerate() {
            let step = match apply(editor, op, &mut report.names) {
                Ok((message, created)) => StepReport {
                    index,
                    op: op.name(),
                    ok: true,
                    message,
                    created,
                },
                Err(err) => {
                    warn!(index, op = op.name(), error = %err, "script step failed");
                    StepReport {
                        index,
                        op: op.name(),
                        ok: false,
                        message: err.to_string(),
                        created: Vec::new(),
                    }
                }
            };
            debug!(index, op = step.op, ok = step.ok, "script step");
            let failed = !step.ok;
            report.steps.push(step);
            if failed && stop_on_error {
                break;
            }
        }
        report
    }
}

// Unknown names fall through as literal cell ids.
fn resolve(names: &HashMap<String, CellId>, reference: &str) -> CellId {
    names
        .get(reference)
        .cloned()
        .unwrap_or_else(|| CellId::from(reference))
}

fn remember(names: &mut HashMap<String, CellId>, name: &Option<String>, created: &[CellId]) {
    if let (Some(name), Some(first)) = (name, created.first()) {
        names.insert(name.clone(), first.clone());
    }
}

fn apply<G: GraphModel>(
    editor: &mut DiagramEditor<G>,
    op: &ScriptOp,
    names: &mut HashMap<String, CellId>,
) -> EditResult<(String, Vec<CellId>)> {
    match op {
        ScriptOp::AddElement {
            name,
            kind,
            x,
            y,
            width,
            height,
        } => {
            let size = Size::new(width.unwrap_or(ELEMENT_WIDTH), height.unwrap_or(ELEMENT_HEIGHT));
            let kind = kind.as_deref().unwrap_or(ELEMENT_KIND_DEFAULT);
            let id = editor.add_element_sized(kind, Point::new(*x, *y), size)?;
            let created = vec![id.clone()];
            remember(names, name, &created);
            Ok((format!("added {id}"), created))
        }
        ScriptOp::Delete { targets } => {
            let ids: Vec<CellId> = targets.iter().map(|t| resolve(names, t)).collect();
            let applied = editor.delete(&ids)?;
            Ok((applied.description, Vec::new()))
        }
        ScriptOp::Move { target, x, y, group } => {
            let command = Command::move_to(vec![(resolve(names, target), Point::new(*x, *y))]);
            let options = match group {
                Some(group) => ExecuteOptions::grouped(group.clone()),
                None => ExecuteOptions::default(),
            };
            let applied = editor.execute_with(command, options)?;
            let message = if applied.merged {
                format!("{} (merged)", applied.description)
            } else {
                applied.description
            };
            Ok((message, Vec::new()))
        }
        ScriptOp::Connect {
            name,
            source,
            target,
            source_port,
            target_port,
            pattern,
        } => {
            let connect = Connect::new(resolve(names, source), resolve(names, target))
                .ports(
                    source_port.as_deref().map(PortId::from),
                    target_port.as_deref().map(PortId::from),
                )
                .pattern(pattern.unwrap_or_default());
            let created = editor.connect_with(connect)?;
            remember(names, name, &created);
            Ok((format!("created {} link(s)", created.len()), created))
        }
        ScriptOp::Disconnect { link } => {
            let applied = editor.disconnect(&resolve(names, link))?;
            Ok((applied.description, Vec::new()))
        }
        ScriptOp::Align {
            targets,
            alignment,
            reference,
        } => {
            let ids: Vec<CellId> = targets.iter().map(|t| resolve(names, t)).collect();
            let mut align = Align::new(ids, *alignment);
            if let Some(reference) = reference {
                align = align.reference(resolve(names, reference));
            }
            let applied = editor.execute(align.into())?;
            Ok((applied.description, Vec::new()))
        }
        ScriptOp::Expand { link, pattern } => {
            let created = editor.expand_link(&resolve(names, link), *pattern)?;
            Ok((format!("expanded into {} link(s)", created.len()), created))
        }
        ScriptOp::Undo => Ok((
            editor
                .undo()?
                .map_or_else(|| "nothing to undo".to_string(), |d| format!("undid {d}")),
            Vec::new(),
        )),
        ScriptOp::Redo => Ok((
            editor
                .redo()?
                .map_or_else(|| "nothing to redo".to_string(), |d| format!("redid {d}")),
            Vec::new(),
        )),
        ScriptOp::BeginBatch { description } => {
            editor.begin_batch(description.clone());
            Ok((format!("batch '{description}' opened"), Vec::new()))
        }
        ScriptOp::EndBatch => {
            let recorded = editor.end_batch()?;
            let message = if recorded {
                "batch recorded"
            } else {
                "empty batch dropped"
            };
            Ok((message.to_string(), Vec::new()))
        }
        ScriptOp::CancelBatch => {
            let undone = editor.cancel_batch()?;
            Ok((format!("batch cancelled, {undone} command(s) undone"), Vec::new()))
        }
        ScriptOp::Commit => {
            let message = match editor.commit() {
                Some(snapshot) => format!("committed {} cells", snapshot.cells.len()),
                None => "no changes to commit".to_string(),
            };
            Ok((message, Vec::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_ops() {
        let script = EditScript::from_json(
            r#"{
                "ops": [
                    {"op": "add-element", "name": "a", "x": 0, "y": 0},
                    {"op": "connect", "source": "a", "target": "b", "pattern": "fan"},
                    {"op": "undo"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(script.ops.len(), 3);
        assert!(matches!(
            script.ops[1],
            ScriptOp::Connect {
                pattern: Some(PatternKind::Fan),
                ..
            }
        ));
    }

    #[test]
    fn unknown_op_is_a_parse_error() {
        assert!(EditScript::from_json(r#"{"ops": [{"op": "explode"}]}"#).is_err());
    }

    #[test]
    fn replay_resolves_names_and_reports_failures() {
        let script = EditScript::new(vec![
            ScriptOp::AddElement {
                name: Some("a".into()),
                kind: None,
                x: 0.0,
                y: 0.0,
                width: None,
                height: None,
            },
            ScriptOp::AddElement {
                name: Some("b".into()),
                kind: None,
                x: 400.0,
                y: 0.0,
                width: None,
                height: None,
            },
            ScriptOp::Connect {
                name: Some("ab".into()),
                source: "a".into(),
                target: "a".into(),
                source_port: None,
                target_port: None,
                pattern: None,
            },
            ScriptOp::Connect {
                name: Some("ab".into()),
                source: "a".into(),
                target: "b".into(),
                source_port: None,
                target_port: None,
                pattern: Some(PatternKind::Parallel),
            },
        ]);
        let mut editor = DiagramEditor::new();
        let report = script.replay(&mut editor, false);
        assert_eq!(report.failures(), 1);
        assert!(report.steps[2].message.contains("self-connection"));
        assert_eq!(report.steps[3].created.len(), 2);
        assert!(report.names.contains_key("ab"));
        assert_eq!(editor.graph().link_count(), 2);
    }

    #[test]
    fn stop_on_error_halts_replay() {
        let script = EditScript::new(vec![
            ScriptOp::Disconnect {
                link: "missing".into(),
            },
            ScriptOp::Commit,
        ]);
        let mut editor = DiagramEditor::new();
        let report = script.replay(&mut editor, true);
        assert_eq!(report.steps.len(), 1);
        assert!(!report.succeeded());
    }
}
