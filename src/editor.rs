use tracing::info;

use crate::{
    Align, Alignment, Applied, BBox, CellId, Command, CommandLog, Connect, ConnectionAttempt,
    ConnectionSynthesizer, Disconnect, EditContext, EditResult, EditorConfig, EditorError,
    ExecuteOptions, GraphModel, LinkSpec, MemoryGraph, PatternKind, Point, PortAllocator, PortId,
    PortRef, Side, Size, Snapshot, Subject, ValidationEngine, ValidationReport, ELEMENT_KIND_DEFAULT,
    command::pick_port, union_bbox,
};

pub struct DiagramEditor<G: GraphModel = MemoryGraph> {
    graph: G,
    ports: PortAllocator,
    rules: ValidationEngine,
    synth: ConnectionSynthesizer,
    config: EditorConfig,
    log: CommandLog,
}

impl DiagramEditor<MemoryGraph> {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        Self::with_parts(
            MemoryGraph::new(),
            PortAllocator::new(config.ports_per_side),
            ValidationEngine::with_default_rules(),
            ConnectionSynthesizer::default(),
            config,
        )
    }

    pub fn from_snapshot(snapshot: &Snapshot, config: EditorConfig) -> EditResult<Self> {
        let mut editor = Self::with_config(config);
        editor.load_snapshot(snapshot)?;
        Ok(editor)
    }
}

impl Default for DiagramEditor<MemoryGraph> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GraphModel> DiagramEditor<G> {
    pub fn with_parts(
        graph: G,
        ports: PortAllocator,
        rules: ValidationEngine,
        synth: ConnectionSynthesizer,
        config: EditorConfig,
    ) -> Self {
        let log = CommandLog::from_config(&config);
        Self {
            graph,
            ports,
            rules,
            synth,
            config,
            log,
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn rules(&self) -> &ValidationEngine {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut ValidationEngine {
        &mut self.rules
    }

    pub fn synth(&self) -> &ConnectionSynthesizer {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut ConnectionSynthesizer {
        &mut self.synth
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &CommandLog {
        &self.log
    }

    fn split(&mut self) -> (EditContext<'_>, &mut CommandLog) {
        (
            EditContext {
                graph: &mut self.graph,
                ports: &mut self.ports,
                rules: &self.rules,
                synth: &self.synth,
                config: &self.config,
            },
            &mut self.log,
        )
    }

    pub fn execute(&mut self, command: Command) -> EditResult<Applied> {
        self.execute_with(command, ExecuteOptions::default())
    }

    pub fn execute_with(&mut self, command: Command, options: ExecuteOptions) -> EditResult<Applied> {
        let (mut ctx, log) = self.split();
        log.execute(command, options, &mut ctx)
    }

    pub fn undo(&mut self) -> EditResult<Option<String>> {
        let (mut ctx, log) = self.split();
        log.undo(&mut ctx)
    }

    pub fn redo(&mut self) -> EditResult<Option<String>> {
        let (mut ctx, log) = self.split();
        log.redo(&mut ctx)
    }

    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    pub fn begin_batch(&mut self, description: impl Into<String>) {
        self.log.begin_batch(description);
    }

    pub fn end_batch(&mut self) -> EditResult<bool> {
        self.log.end_batch()
    }

    pub fn cancel_batch(&mut self) -> EditResult<usize> {
        let (mut ctx, log) = self.split();
        log.cancel_batch(&mut ctx)
    }

    pub fn add_element(&mut self, kind: &str, position: Point) -> EditResult<CellId> {
        self.add_element_sized(kind, position, Size::default())
    }

    pub fn add_element_sized(&mut self, kind: &str, position: Point, size: Size) -> EditResult<CellId> {
        let kind = if kind.is_empty() {
            ELEMENT_KIND_DEFAULT
        } else {
            kind
        };
        let applied = self.execute(Command::add_element(kind, position, size))?;
        applied
            .created
            .into_iter()
            .next()
            .ok_or_else(|| EditorError::structural("element was not created"))
    }

    /// Deletes elements and links; links attached to deleted elements go with them.
    pub fn delete(&mut self, targets: &[CellId]) -> EditResult<Applied> {
        if targets.is_empty() {
            return Err(EditorError::EmptySelection);
        }
        self.execute(Command::delete(targets.to_vec()))
    }

    pub fn move_elements(&mut self, moves: Vec<(CellId, Point)>) -> EditResult<Applied> {
        if moves.is_empty() {
            return Err(EditorError::EmptySelection);
        }
        self.execute(Command::move_to(moves))
    }

    pub fn move_by(&mut self, elements: &[CellId], dx: f32, dy: f32) -> EditResult<Applied> {
        let moves = elements
            .iter()
            .map(|id| {
                self.graph
                    .position(id)
                    .map(|position| (id.clone(), position.offset(dx, dy)))
                    .ok_or_else(|| EditorError::missing_cell(id))
            })
            .collect::<EditResult<Vec<_>>>()?;
        self.move_elements(moves)
    }

    pub fn connect(&mut self, source: &CellId, target: &CellId) -> EditResult<Vec<CellId>> {
        self.connect_with(Connect::new(source.clone(), target.clone()))
    }

    pub fn connect_pattern(
        &mut self,
        source: &CellId,
        target: &CellId,
        pattern: PatternKind,
    ) -> EditResult<Vec<CellId>> {
        self.connect_with(Connect::new(source.clone(), target.clone()).pattern(pattern))
    }

    pub fn connect_ports(
        &mut self,
        source: &CellId,
        source_port: &PortId,
        target: &CellId,
        target_port: &PortId,
    ) -> EditResult<Vec<CellId>> {
        self.connect_with(
            Connect::new(source.clone(), target.clone())
                .ports(Some(source_port.clone()), Some(target_port.clone())),
        )
    }

    pub fn connect_with(&mut self, connect: Connect) -> EditResult<Vec<CellId>> {
        Ok(self.execute(connect.into())?.created)
    }

    pub fn disconnect(&mut self, link: &CellId) -> EditResult<Applied> {
        self.execute(Disconnect::new(link.clone()).into())
    }

    pub fn align(&mut self, elements: &[CellId], alignment: Alignment) -> EditResult<Applied> {
        self.execute(Align::new(elements.to_vec(), alignment).into())
    }

    pub fn align_to(
        &mut self,
        elements: &[CellId],
        alignment: Alignment,
        reference: &CellId,
    ) -> EditResult<Applied> {
        self.execute(
            Align::new(elements.to_vec(), alignment)
                .reference(reference.clone())
                .into(),
        )
    }

    /// Replaces a single link with the links of `pattern`, keeping its ports for the first
    /// lane. One history step.
    pub fn expand_link(&mut self, link: &CellId, pattern: PatternKind) -> EditResult<Vec<CellId>> {
        let record = self
            .graph
            .get(link)
            .filter(|record| record.is_link())
            .cloned()
            .ok_or_else(|| EditorError::missing_cell(link))?;
        let (Some(source), Some(target)) = (record.source, record.target) else {
            return Err(EditorError::structural(format!("link '{link}' lacks endpoints")));
        };

        let connect = Connect::new(source.id, target.id)
            .ports(source.port, target.port)
            .pattern(pattern);
        let batch = Command::batch(
            format!("Expand {link} to {pattern}"),
            vec![Disconnect::new(link.clone()).into(), connect.into()],
        );
        Ok(self.execute(batch)?.created)
    }

    pub fn check_connection(&self, source: &CellId, target: &CellId) -> ValidationReport {
        let source_port = pick_port(&self.graph, &self.ports, source, target);
        let target_port = pick_port(&self.graph, &self.ports, target, source);
        self.rules.check(
            &self.graph,
            &self.ports,
            &self.config,
            Subject::Connection(ConnectionAttempt {
                source: source.clone(),
                source_port,
                target: target.clone(),
                target_port,
            }),
        )
    }

    pub fn plan_connection(
        &self,
        source: &CellId,
        target: &CellId,
        pattern: PatternKind,
    ) -> EditResult<Vec<LinkSpec>> {
        self.synth.plan_between(&self.ports, source, target, pattern)
    }

    pub fn add_port(&mut self, shape: &CellId, side: Side) -> Option<PortId> {
        let port = self.ports.add_port(shape, side);
        if port.is_some() {
            self.log.mark_dirty();
        }
        port
    }

    pub fn remove_port(&mut self, shape: &CellId, port: &PortId) -> bool {
        let removed = self.ports.remove_port(&mut self.graph, shape, port);
        if removed {
            self.log.mark_dirty();
        }
        removed
    }

    pub fn set_magnet(&mut self, shape: &CellId, port: &PortId, enabled: bool) -> bool {
        self.ports.set_magnet(shape, port, enabled)
    }

    pub fn free_ports(&self, shape: &CellId) -> Vec<PortRef> {
        self.ports.free_ports(shape)
    }

    pub fn selection_bounds(&self, selection: &[CellId]) -> Option<BBox> {
        let boxes: Vec<BBox> = selection
            .iter()
            .filter_map(|id| self.graph.bbox(id))
            .collect();
        union_bbox(&boxes)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.graph.to_snapshot()
    }

    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> EditResult<()> {
        snapshot.check()?;
        self.graph.load_snapshot(snapshot)?;
        let claimed = self.ports.rebuild(&self.graph);
        self.log.clear();
        info!(
            elements = snapshot.element_count(),
            links = snapshot.link_count(),
            claimed,
            "snapshot loaded"
        );
        Ok(())
    }

    pub fn commit(&mut self) -> Option<Snapshot> {
        self.log.commit(&self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellRecord, Endpoint};

    fn two_shapes(editor: &mut DiagramEditor) -> (CellId, CellId) {
        let a = editor.add_element("rectangle", Point::new(0.0, 0.0)).unwrap();
        let b = editor.add_element("rectangle", Point::new(400.0, 0.0)).unwrap();
        (a, b)
    }

    #[test]
    fn expand_link_is_one_undo_step() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        let link = editor.connect(&a, &b).unwrap().remove(0);

        let links = editor.expand_link(&link, PatternKind::Grid).unwrap();
        assert_eq!(links.len(), 4);
        assert!(editor.free_ports(&a).is_empty());

        editor.undo().unwrap();
        assert_eq!(editor.graph().link_count(), 1);
        assert_eq!(editor.ports().occupied_ports(&a).len(), 1);
    }

    #[test]
    fn check_connection_previews_without_mutating() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        assert!(editor.check_connection(&a, &b).valid);
        assert!(!editor.check_connection(&a, &a).valid);
        assert_eq!(editor.graph().link_count(), 0);
        assert_eq!(editor.history().len(), 2);
    }

    #[test]
    fn empty_kind_falls_back_to_rectangle() {
        let mut editor = DiagramEditor::new();
        let id = editor.add_element("", Point::new(0.0, 0.0)).unwrap();
        assert_eq!(editor.graph().get(&id).unwrap().kind, "rectangle");
    }

    #[test]
    fn selection_bounds_cover_every_shape() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        let bounds = editor.selection_bounds(&[a, b]).unwrap();
        assert_eq!(bounds.x, 0.0);
        assert_eq!(bounds.right(), 540.0);
        assert!(editor.selection_bounds(&[]).is_none());
    }

    #[test]
    fn load_snapshot_rebuilds_ports_and_resets_history() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        editor.connect(&a, &b).unwrap();
        let snapshot = editor.snapshot();

        let mut fresh = DiagramEditor::new();
        fresh.load_snapshot(&snapshot).unwrap();
        assert_eq!(fresh.ports().claims().len(), 2);
        assert!(!fresh.can_undo());
        assert_eq!(fresh.free_ports(&a).len(), 3);
    }

    #[test]
    fn load_snapshot_rejects_links_sharing_a_port() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        editor.connect(&a, &b).unwrap();
        let mut snapshot = editor.snapshot();
        snapshot.cells.push(CellRecord::link(
            CellId::from("l2"),
            Endpoint::at_port(a.clone(), PortId::from("right-1")),
            Endpoint::at_port(b.clone(), PortId::from("top-0")),
            None,
        ));

        let mut fresh = DiagramEditor::new();
        let err = fresh.load_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, EditorError::Structural(_)));
        assert_eq!(fresh.graph().element_count(), 0);
        assert!(fresh.ports().claims().is_empty());
    }

    #[test]
    fn disabled_magnet_steers_auto_selection() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        assert!(editor.set_magnet(&a, &PortId::from("right-1"), false));
        editor.connect(&a, &b).unwrap();
        assert_eq!(editor.ports().occupied_ports(&a)[0].port, PortId::from("top-0"));
    }

    #[test]
    fn removing_an_occupied_port_drops_its_link() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        editor.connect(&a, &b).unwrap();
        editor.commit();

        let extra = editor.add_port(&a, Side::Right).unwrap();
        assert_eq!(editor.ports().ports(&a).len(), 5);
        assert!(editor.remove_port(&a, &PortId::from("right-1")));
        assert_eq!(editor.graph().link_count(), 0);
        assert!(editor.ports().occupied_ports(&b).is_empty());
        assert!(editor.ports().is_available(&a, &extra));
        assert!(editor.commit().is_some());
    }

    #[test]
    fn move_by_shifts_every_element() {
        let mut editor = DiagramEditor::new();
        let (a, b) = two_shapes(&mut editor);
        editor.move_by(&[a.clone(), b.clone()], 20.0, 40.0).unwrap();
        assert_eq!(editor.graph().position(&a), Some(Point::new(20.0, 40.0)));
        assert_eq!(editor.graph().position(&b), Some(Point::new(420.0, 40.0)));
    }
}
