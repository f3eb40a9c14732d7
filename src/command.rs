use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    BBox, CellId, CellRecord, ConnectionSynthesizer, ConnectionAttempt, CreationAttempt,
    EditResult, EditorConfig, EditorError, Endpoint, GraphCheck, GraphModel, MoveAttempt,
    PatternKind, Point, PortAllocator, PortId, PortLayout, Side, Size, Snapshot, Subject,
    ValidationEngine, ValidationReport, union_bbox,
};

/// Collaborators a command works against, injected per call.
pub struct EditContext<'a> {
    pub graph: &'a mut dyn GraphModel,
    pub ports: &'a mut PortAllocator,
    pub rules: &'a ValidationEngine,
    pub synth: &'a ConnectionSynthesizer,
    pub config: &'a EditorConfig,
}

impl EditContext<'_> {
    pub fn check(&self, subject: Subject) -> ValidationReport {
        self.rules.check(&*self.graph, &*self.ports, self.config, subject)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.graph.to_snapshot()
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    id: Uuid,
    description: String,
    executed: bool,
    created_at: DateTime<Utc>,
    touched_at: DateTime<Utc>,
    group: Option<String>,
    metadata: BTreeMap<String, serde_json::Value>,
    before: Option<Snapshot>,
    after: Option<Snapshot>,
    kind: CommandKind,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
    AddElement(AddElement),
    DeleteElements(DeleteElements),
    Move(MoveElements),
    Connect(Connect),
    Disconnect(Disconnect),
    Align(Align),
    Batch(Vec<Command>),
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::AddElement(_) => "add-element",
            CommandKind::DeleteElements(_) => "delete",
            CommandKind::Move(_) => "move",
            CommandKind::Connect(_) => "connect",
            CommandKind::Disconnect(_) => "disconnect",
            CommandKind::Align(_) => "align",
            CommandKind::Batch(_) => "batch",
        }
    }

    fn default_description(&self) -> String {
        match self {
            CommandKind::AddElement(add) => format!("Add {}", add.kind),
            CommandKind::DeleteElements(delete) => match delete.targets.as_slice() {
                [single] => format!("Delete {single}"),
                targets => format!("Delete {} cells", targets.len()),
            },
            CommandKind::Move(moves) => match moves.targets.as_slice() {
                [single] => format!("Move {}", single.element),
                targets => format!("Move {} elements", targets.len()),
            },
            CommandKind::Connect(connect) => {
                if connect.pattern == PatternKind::Single {
                    format!("Connect {} to {}", connect.source, connect.target)
                } else {
                    format!(
                        "Connect {} to {} ({})",
                        connect.source, connect.target, connect.pattern
                    )
                }
            }
            CommandKind::Disconnect(disconnect) => format!("Disconnect {}", disconnect.link),
            CommandKind::Align(align) => format!(
                "Align {} elements {}",
                align.elements.len(),
                align.alignment.as_str()
            ),
            CommandKind::Batch(commands) => format!("Batch of {} commands", commands.len()),
        }
    }
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: kind.default_description(),
            executed: false,
            created_at: now,
            touched_at: now,
            group: None,
            metadata: BTreeMap::new(),
            before: None,
            after: None,
            kind,
        }
    }

    pub fn add_element(kind: impl Into<String>, position: Point, size: Size) -> Self {
        AddElement::new(kind, position, size).into()
    }

    pub fn delete(targets: Vec<CellId>) -> Self {
        DeleteElements::new(targets).into()
    }

    pub fn move_to(moves: Vec<(CellId, Point)>) -> Self {
        MoveElements::new(moves).into()
    }

    pub fn connect(source: CellId, target: CellId) -> Self {
        Connect::new(source, target).into()
    }

    pub fn disconnect(link: CellId) -> Self {
        Disconnect::new(link).into()
    }

    pub fn align(elements: Vec<CellId>, alignment: Alignment) -> Self {
        Align::new(elements, alignment).into()
    }

    pub fn batch(description: impl Into<String>, commands: Vec<Command>) -> Self {
        Command::new(CommandKind::Batch(commands)).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.touched_at = at;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub(crate) fn set_group(&mut self, group: Option<String>) {
        self.group = group;
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn before(&self) -> Option<&Snapshot> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&Snapshot> {
        self.after.as_ref()
    }

    pub(crate) fn set_snapshots(&mut self, before: Option<Snapshot>, after: Option<Snapshot>) {
        self.before = before;
        self.after = after;
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn children(&self) -> &[Command] {
        match &self.kind {
            CommandKind::Batch(commands) => commands,
            _ => &[],
        }
    }

    pub fn created_cells(&self) -> Vec<CellId> {
        match &self.kind {
            CommandKind::AddElement(add) => add.element().cloned().into_iter().collect(),
            CommandKind::Connect(connect) => connect.links().into_iter().cloned().collect(),
            CommandKind::Batch(commands) => {
                commands.iter().flat_map(Command::created_cells).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        match &self.kind {
            CommandKind::AddElement(add) => add.validate(ctx),
            CommandKind::DeleteElements(delete) => delete.validate(ctx),
            CommandKind::Move(moves) => moves.validate(ctx),
            CommandKind::Connect(connect) => connect.validate(ctx),
            CommandKind::Disconnect(disconnect) => disconnect.validate(ctx),
            CommandKind::Align(align) => align.validate(ctx),
            CommandKind::Batch(_) => ValidationReport::ok(),
        }
    }

    pub fn execute(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        self.forward(ctx, true)
    }

    pub fn redo(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        self.forward(ctx, false)
    }

    pub fn undo(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        if !self.executed {
            return Err(EditorError::NotExecuted(self.description.clone()));
        }
        match &mut self.kind {
            CommandKind::AddElement(add) => add.backward(ctx)?,
            CommandKind::DeleteElements(delete) => delete.backward(ctx)?,
            CommandKind::Move(moves) => moves.backward(ctx)?,
            CommandKind::Connect(connect) => connect.backward(ctx)?,
            CommandKind::Disconnect(disconnect) => disconnect.backward(ctx)?,
            CommandKind::Align(align) => align.backward(ctx)?,
            CommandKind::Batch(commands) => undo_batch(commands, ctx)?,
        }
        self.executed = false;
        debug!(command = %self.description, "undone");
        Ok(())
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>, first_run: bool) -> EditResult<()> {
        if self.executed {
            return Err(EditorError::AlreadyExecuted(self.description.clone()));
        }
        match &mut self.kind {
            CommandKind::AddElement(add) => add.forward(ctx)?,
            CommandKind::DeleteElements(delete) => delete.forward(ctx)?,
            CommandKind::Move(moves) => moves.forward(ctx)?,
            CommandKind::Connect(connect) => connect.forward(ctx)?,
            CommandKind::Disconnect(disconnect) => disconnect.forward(ctx)?,
            CommandKind::Align(align) => align.forward(ctx)?,
            CommandKind::Batch(commands) => run_batch(commands, ctx, first_run)?,
        }
        self.executed = true;
        debug!(command = %self.description, kind = self.kind.name(), "applied");
        Ok(())
    }

    pub fn try_merge(&mut self, next: &Command, window_ms: i64) -> bool {
        if !self.executed || !next.executed {
            return false;
        }
        let elapsed = (next.touched_at - self.touched_at).num_milliseconds();
        if elapsed < 0 || elapsed > window_ms {
            return false;
        }
        self.absorb(next)
    }

    pub(crate) fn absorb(&mut self, next: &Command) -> bool {
        let (CommandKind::Move(current), CommandKind::Move(incoming)) = (&mut self.kind, &next.kind)
        else {
            return false;
        };
        if !current.overlaps(incoming) {
            return false;
        }
        current.absorb(incoming);
        self.touched_at = next.touched_at;
        if next.after.is_some() {
            self.after = next.after.clone();
        }
        self.description = self.kind.default_description();
        true
    }

    pub(crate) fn push_child(&mut self, command: Command) -> Result<(), Command> {
        match &mut self.kind {
            CommandKind::Batch(commands) => {
                if command.after.is_some() {
                    self.after = command.after.clone();
                }
                commands.push(command);
                Ok(())
            }
            _ => Err(command),
        }
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }
}

fn run_batch(
    commands: &mut [Command],
    ctx: &mut EditContext<'_>,
    first_run: bool,
) -> EditResult<()> {
    for index in 0..commands.len() {
        if commands[index].executed {
            continue;
        }
        let result = if first_run {
            let report = commands[index].validate(ctx);
            report
                .into_result()
                .and_then(|_| commands[index].execute(ctx))
        } else {
            commands[index].redo(ctx)
        };

        if let Err(err) = result {
            warn!(
                failed = %commands[index].description,
                position = index,
                error = %err,
                "batch step failed, rolling back"
            );
            for done in commands[..index].iter_mut().rev() {
                if done.executed {
                    if let Err(rollback_err) = done.undo(ctx) {
                        warn!(command = %done.description, error = %rollback_err, "rollback step failed");
                    }
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

fn undo_batch(commands: &mut [Command], ctx: &mut EditContext<'_>) -> EditResult<()> {
    for command in commands.iter_mut().rev() {
        if !command.executed {
            continue;
        }
        if let Err(err) = command.undo(ctx) {
            warn!(command = %command.description, error = %err, "batch undo stopped");
            return Err(err);
        }
    }
    Ok(())
}

fn require_element(graph: &dyn GraphModel, id: &CellId) -> EditResult<()> {
    match graph.get(id) {
        Some(cell) if !cell.is_link() => Ok(()),
        Some(_) => Err(EditorError::structural(format!("'{id}' is a link, not an element"))),
        None => Err(EditorError::missing_cell(id)),
    }
}

fn require_link(graph: &dyn GraphModel, id: &CellId) -> EditResult<()> {
    match graph.get(id) {
        Some(cell) if cell.is_link() => Ok(()),
        Some(_) => Err(EditorError::structural(format!("'{id}' is an element, not a link"))),
        None => Err(EditorError::missing_cell(id)),
    }
}

/// Restores a link record and claims its ports; on a failed claim the link is removed
/// again. Returns the record as stored (its id may have changed).
fn restore_link(ctx: &mut EditContext<'_>, record: &CellRecord) -> EditResult<CellRecord> {
    let mut restored = record.clone();
    restored.id = ctx.graph.restore_cell(record)?;
    if !ctx.ports.occupy_for_record(&restored) {
        ctx.graph.remove_cell(&restored.id);
        let shape = restored
            .source
            .as_ref()
            .map(|end| end.id.clone())
            .unwrap_or_else(|| restored.id.clone());
        return Err(EditorError::allocation(
            &shape,
            format!("ports for '{}' are already taken", record.id),
        ));
    }
    Ok(restored)
}

fn remove_element(ctx: &mut EditContext<'_>, element: &CellId) -> Vec<CellRecord> {
    let mut removed = Vec::new();
    for link in ctx.graph.connected_links(element) {
        if let Some(record) = ctx.ports.release_link(ctx.graph, &link) {
            removed.push(record);
        }
    }
    ctx.ports.unregister_shape(element);
    removed.extend(ctx.graph.remove_cell(element));
    removed
}

#[derive(Debug, Clone)]
pub struct AddElement {
    pub kind: String,
    pub position: Point,
    pub size: Size,
    pub attrs: Option<serde_json::Value>,
    created: Option<CellRecord>,
    layout: Option<PortLayout>,
}

impl AddElement {
    pub fn new(kind: impl Into<String>, position: Point, size: Size) -> Self {
        Self {
            kind: kind.into(),
            position,
            size,
            attrs: None,
            created: None,
            layout: None,
        }
    }

    pub fn attrs(mut self, attrs: serde_json::Value) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn element(&self) -> Option<&CellId> {
        self.created.as_ref().map(|record| &record.id)
    }

    fn resolved_position(&self, config: &EditorConfig) -> Point {
        match &self.created {
            Some(record) => record.position.unwrap_or(self.position),
            None => config.grid.snap(self.position),
        }
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        let mut report = ctx.check(Subject::Creation(CreationAttempt {
            kind: self.kind.clone(),
            position: self.resolved_position(ctx.config),
            size: self.size,
        }));
        report.merge(ctx.check(Subject::Graph(GraphCheck {
            added_elements: 1,
            added_links: 0,
        })));
        report
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        match self.created.clone() {
            None => {
                let position = ctx.config.grid.snap(self.position);
                let id = ctx
                    .graph
                    .create_element(&self.kind, position, self.size, self.attrs.clone());
                ctx.ports.register_shape(&id);
                self.created = ctx.graph.get(&id).cloned();
            }
            Some(record) => {
                let id = ctx.graph.restore_cell(&record)?;
                if id != record.id {
                    ctx.graph.remove_cell(&id);
                    return Err(EditorError::structural(format!(
                        "cannot recreate '{}', the id is taken",
                        record.id
                    )));
                }
                match &self.layout {
                    Some(layout) => ctx.ports.import_layout(&id, layout),
                    None => {
                        ctx.ports.register_shape(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        let Some(record) = &self.created else {
            return Err(EditorError::structural("element was never created"));
        };
        let id = record.id.clone();
        require_element(ctx.graph, &id)?;
        self.created = ctx.graph.get(&id).cloned();
        self.layout = ctx.ports.export_layout(&id);
        remove_element(ctx, &id);
        Ok(())
    }
}

impl From<AddElement> for Command {
    fn from(value: AddElement) -> Self {
        Command::new(CommandKind::AddElement(value))
    }
}

#[derive(Debug, Clone)]
pub struct DeleteElements {
    pub targets: Vec<CellId>,
    removed_elements: Vec<(CellRecord, Option<PortLayout>)>,
    removed_links: Vec<CellRecord>,
}

impl DeleteElements {
    pub fn new(targets: Vec<CellId>) -> Self {
        Self {
            targets,
            removed_elements: Vec::new(),
            removed_links: Vec::new(),
        }
    }

    pub fn removed_links(&self) -> &[CellRecord] {
        &self.removed_links
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        if self.targets.is_empty() {
            return ValidationReport::fail("targets-exist", "nothing to delete");
        }
        let mut report = ValidationReport::ok();
        for target in &self.targets {
            if !ctx.graph.contains(target) {
                report.merge(ValidationReport::fail(
                    "targets-exist",
                    format!("'{target}' does not exist"),
                ));
            }
        }
        report
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for target in &self.targets {
            if !ctx.graph.contains(target) {
                return Err(EditorError::missing_cell(target));
            }
        }

        let element_targets: Vec<CellId> = self
            .targets
            .iter()
            .filter(|id| ctx.graph.get(id).is_some_and(|cell| !cell.is_link()))
            .cloned()
            .collect();

        let mut doomed_links: HashSet<CellId> = self
            .targets
            .iter()
            .filter(|id| ctx.graph.get(id).is_some_and(CellRecord::is_link))
            .cloned()
            .collect();
        for element in &element_targets {
            doomed_links.extend(ctx.graph.connected_links(element));
        }

        // graph order keeps restores deterministic
        let links: Vec<CellId> = ctx
            .graph
            .links()
            .into_iter()
            .filter(|id| doomed_links.contains(id))
            .collect();

        self.removed_links.clear();
        self.removed_elements.clear();
        for link in &links {
            if let Some(record) = ctx.ports.release_link(ctx.graph, link) {
                self.removed_links.push(record);
            }
        }
        for element in &element_targets {
            let Some(record) = ctx.graph.get(element).cloned() else {
                continue;
            };
            let layout = ctx.ports.export_layout(element);
            remove_element(ctx, element);
            self.removed_elements.push((record, layout));
        }
        debug!(
            elements = self.removed_elements.len(),
            links = self.removed_links.len(),
            "deleted cells"
        );
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        let restoring: HashSet<&CellId> = self
            .removed_elements
            .iter()
            .map(|(record, _)| &record.id)
            .collect();
        for link in &self.removed_links {
            for end in [link.source.as_ref(), link.target.as_ref()].into_iter().flatten() {
                if restoring.contains(&end.id) {
                    continue;
                }
                if !ctx.graph.contains(&end.id) {
                    return Err(EditorError::structural(format!(
                        "cannot restore '{}', endpoint '{}' is gone",
                        link.id, end.id
                    )));
                }
                let Some(port) = &end.port else {
                    continue;
                };
                match ctx.ports.occupant(&end.id, port) {
                    None if ctx.ports.port(&end.id, port).is_some() => {}
                    None => {
                        return Err(EditorError::allocation(
                            &end.id,
                            format!("port '{port}' needed by '{}' no longer exists", link.id),
                        ));
                    }
                    Some(holder) => {
                        return Err(EditorError::allocation(
                            &end.id,
                            format!("port '{port}' needed by '{}' is held by '{holder}'", link.id),
                        ));
                    }
                }
            }
        }

        let mut remap: HashMap<CellId, CellId> = HashMap::new();
        let mut elements: Vec<CellId> = Vec::new();
        let mut links: Vec<CellId> = Vec::new();
        let result = self.restore_all(ctx, &mut remap, &mut elements, &mut links);
        if let Err(err) = result {
            for link in links.iter().rev() {
                ctx.ports.release_link(ctx.graph, link);
            }
            for element in elements.iter().rev() {
                remove_element(ctx, element);
            }
            return Err(err);
        }

        for target in self.targets.iter_mut() {
            if let Some(replacement) = remap.get(target) {
                *target = replacement.clone();
            }
        }
        Ok(())
    }

    fn restore_all(
        &self,
        ctx: &mut EditContext<'_>,
        remap: &mut HashMap<CellId, CellId>,
        elements: &mut Vec<CellId>,
        links: &mut Vec<CellId>,
    ) -> EditResult<()> {
        for (record, layout) in &self.removed_elements {
            let id = ctx.graph.restore_cell(record)?;
            match layout {
                Some(layout) => ctx.ports.import_layout(&id, layout),
                None => {
                    ctx.ports.register_shape(&id);
                }
            }
            if id != record.id {
                remap.insert(record.id.clone(), id.clone());
            }
            elements.push(id);
        }

        for link in &self.removed_links {
            let mut record = link.clone();
            record.remap_endpoints(remap);
            let restored = restore_link(ctx, &record)?;
            if restored.id != link.id {
                remap.insert(link.id.clone(), restored.id.clone());
            }
            links.push(restored.id);
        }
        Ok(())
    }
}

impl From<DeleteElements> for Command {
    fn from(value: DeleteElements) -> Self {
        Command::new(CommandKind::DeleteElements(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveTarget {
    pub element: CellId,
    pub from: Option<Point>,
    pub to: Point,
}

#[derive(Debug, Clone)]
pub struct MoveElements {
    pub targets: Vec<MoveTarget>,
    resolved: bool,
}

impl MoveElements {
    pub fn new(moves: Vec<(CellId, Point)>) -> Self {
        Self {
            targets: moves
                .into_iter()
                .map(|(element, to)| MoveTarget {
                    element,
                    from: None,
                    to,
                })
                .collect(),
            resolved: false,
        }
    }

    fn destination(&self, target: &MoveTarget, config: &EditorConfig) -> Point {
        if self.resolved {
            target.to
        } else {
            config.grid.snap(target.to)
        }
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        if self.targets.is_empty() {
            return ValidationReport::fail("element-exists", "nothing to move");
        }
        let moving: Vec<CellId> = self.targets.iter().map(|t| t.element.clone()).collect();
        let mut report = ValidationReport::ok();
        for target in &self.targets {
            report.merge(ctx.check(Subject::Move(MoveAttempt {
                element: target.element.clone(),
                position: self.destination(target, ctx.config),
                moving: moving.clone(),
            })));
        }
        report
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for target in &self.targets {
            require_element(ctx.graph, &target.element)?;
        }
        let snap = !self.resolved;
        for target in self.targets.iter_mut() {
            if target.from.is_none() {
                target.from = ctx.graph.position(&target.element);
            }
            if snap {
                target.to = ctx.config.grid.snap(target.to);
            }
            ctx.graph.set_position(&target.element, target.to);
        }
        self.resolved = true;
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for target in &self.targets {
            require_element(ctx.graph, &target.element)?;
        }
        for target in self.targets.iter().rev() {
            if let Some(from) = target.from {
                ctx.graph.set_position(&target.element, from);
            }
        }
        Ok(())
    }

    fn overlaps(&self, other: &MoveElements) -> bool {
        other
            .targets
            .iter()
            .any(|incoming| self.targets.iter().any(|t| t.element == incoming.element))
    }

    fn absorb(&mut self, other: &MoveElements) {
        for incoming in &other.targets {
            match self
                .targets
                .iter_mut()
                .find(|existing| existing.element == incoming.element)
            {
                Some(existing) => existing.to = incoming.to,
                None => self.targets.push(incoming.clone()),
            }
        }
    }
}

impl From<MoveElements> for Command {
    fn from(value: MoveElements) -> Self {
        Command::new(CommandKind::Move(value))
    }
}

#[derive(Debug, Clone)]
pub struct Connect {
    pub source: CellId,
    pub target: CellId,
    pub source_port: Option<PortId>,
    pub target_port: Option<PortId>,
    pub pattern: PatternKind,
    pub attrs: Option<serde_json::Value>,
    created: Vec<CellRecord>,
}

impl Connect {
    pub fn new(source: CellId, target: CellId) -> Self {
        Self {
            source,
            target,
            source_port: None,
            target_port: None,
            pattern: PatternKind::Single,
            attrs: None,
            created: Vec::new(),
        }
    }

    pub fn ports(mut self, source_port: Option<PortId>, target_port: Option<PortId>) -> Self {
        self.source_port = source_port;
        self.target_port = target_port;
        self
    }

    pub fn pattern(mut self, pattern: PatternKind) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn attrs(mut self, attrs: serde_json::Value) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn links(&self) -> Vec<&CellId> {
        self.created.iter().map(|record| &record.id).collect()
    }

    fn resolve_ports(&self, graph: &dyn GraphModel, ports: &PortAllocator) -> (Option<PortId>, Option<PortId>) {
        let source_port = self
            .source_port
            .clone()
            .or_else(|| pick_port(graph, ports, &self.source, &self.target));
        let target_port = self
            .target_port
            .clone()
            .or_else(|| pick_port(graph, ports, &self.target, &self.source));
        (source_port, target_port)
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        let (source_port, target_port) = self.resolve_ports(&*ctx.graph, &*ctx.ports);
        let mut report = ctx.check(Subject::Connection(ConnectionAttempt {
            source: self.source.clone(),
            source_port,
            target: self.target.clone(),
            target_port,
        }));
        report.merge(ctx.check(Subject::Graph(GraphCheck {
            added_elements: 0,
            added_links: self.pattern.max_connections(),
        })));
        report
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        if self.created.is_empty() {
            self.connect_fresh(ctx)
        } else {
            self.restore(ctx)
        }
    }

    fn connect_fresh(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        require_element(ctx.graph, &self.source)?;
        require_element(ctx.graph, &self.target)?;
        if self.source == self.target {
            return Err(EditorError::Validation(crate::ValidationFailure::single(
                "no-self-connection",
                "self-connection",
            )));
        }

        let (source_port, target_port) = self.resolve_ports(&*ctx.graph, &*ctx.ports);
        let Some(source_port) = source_port else {
            return Err(EditorError::allocation(&self.source, "no free port"));
        };
        let Some(target_port) = target_port else {
            return Err(EditorError::allocation(&self.target, "no free port"));
        };

        let link = ctx.graph.create_link(
            Endpoint::at_port(self.source.clone(), source_port.clone()),
            Endpoint::at_port(self.target.clone(), target_port.clone()),
            self.attrs.clone(),
        )?;
        if !ctx.ports.occupy(&self.source, &source_port, &link) {
            ctx.graph.remove_cell(&link);
            return Err(EditorError::allocation(
                &self.source,
                format!("port '{source_port}' is not available"),
            ));
        }
        if !ctx.ports.occupy(&self.target, &target_port, &link) {
            ctx.ports.free(&self.source, &source_port);
            ctx.graph.remove_cell(&link);
            return Err(EditorError::allocation(
                &self.target,
                format!("port '{target_port}' is not available"),
            ));
        }
        self.source_port = Some(source_port);
        self.target_port = Some(target_port);

        let links = if self.pattern == PatternKind::Single {
            vec![link]
        } else {
            let outcome = match ctx.synth.replace_single_with_multiple(
                ctx.graph,
                ctx.ports,
                &link,
                self.pattern,
            ) {
                Ok(outcome) => outcome,
                Err(err) => {
                    ctx.ports.release_link(ctx.graph, &link);
                    return Err(err);
                }
            };
            if outcome.created.is_empty() {
                return Err(EditorError::allocation(
                    &self.source,
                    format!("no '{}' lane could be allocated", self.pattern),
                ));
            }
            outcome.created
        };

        self.created = links
            .iter()
            .filter_map(|id| ctx.graph.get(id).cloned())
            .collect();
        Ok(())
    }

    fn restore(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        require_element(ctx.graph, &self.source)?;
        require_element(ctx.graph, &self.target)?;
        let mut restored: Vec<CellRecord> = Vec::with_capacity(self.created.len());
        for record in &self.created {
            match restore_link(ctx, record) {
                Ok(link) => restored.push(link),
                Err(err) => {
                    for link in restored.iter().rev() {
                        ctx.ports.release_link(ctx.graph, &link.id);
                    }
                    return Err(err);
                }
            }
        }
        self.created = restored;
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for record in &self.created {
            require_link(ctx.graph, &record.id)?;
        }
        for record in self.created.iter().rev() {
            ctx.ports.release_link(ctx.graph, &record.id);
        }
        Ok(())
    }
}

impl From<Connect> for Command {
    fn from(value: Connect) -> Self {
        Command::new(CommandKind::Connect(value))
    }
}

pub fn pick_port(
    graph: &dyn GraphModel,
    ports: &PortAllocator,
    shape: &CellId,
    other: &CellId,
) -> Option<PortId> {
    if let (Some(from), Some(to)) = (graph.bbox(shape), graph.bbox(other)) {
        let side = Side::facing(from.center(), to.center());
        if let Some(port) = ports.free_ports_on_side(shape, side).into_iter().next() {
            return Some(port.port);
        }
    }
    ports
        .free_ports(shape)
        .into_iter()
        .next()
        .map(|port| port.port)
}

#[derive(Debug, Clone)]
pub struct Disconnect {
    pub link: CellId,
    removed: Option<CellRecord>,
}

impl Disconnect {
    pub fn new(link: CellId) -> Self {
        Self {
            link,
            removed: None,
        }
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        match require_link(&*ctx.graph, &self.link) {
            Ok(()) => ValidationReport::ok(),
            Err(err) => ValidationReport::fail("link-exists", err.to_string()),
        }
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        require_link(ctx.graph, &self.link)?;
        self.removed = ctx.ports.release_link(ctx.graph, &self.link);
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        let Some(record) = &self.removed else {
            return Err(EditorError::structural(format!(
                "no record of '{}' to restore",
                self.link
            )));
        };
        for end in [record.source.as_ref(), record.target.as_ref()].into_iter().flatten() {
            require_element(ctx.graph, &end.id)?;
        }
        let restored = restore_link(ctx, record)?;
        self.link = restored.id;
        Ok(())
    }
}

impl From<Disconnect> for Command {
    fn from(value: Disconnect) -> Self {
        Command::new(CommandKind::Disconnect(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Top,
    Middle,
    Bottom,
}

impl Alignment {
    pub fn as_str(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Top => "top",
            Alignment::Middle => "middle",
            Alignment::Bottom => "bottom",
        }
    }

    /// Top-left position that puts `bbox` on the reference line of `reference`. The
    /// reference coordinate is snapped once so every aligned box shares it.
    fn place(self, bbox: &BBox, reference: &BBox, snap: impl Fn(f32) -> f32) -> Point {
        match self {
            Alignment::Left => Point::new(snap(reference.x), bbox.y),
            Alignment::Center => Point::new(snap(reference.center().x) - bbox.width / 2.0, bbox.y),
            Alignment::Right => Point::new(snap(reference.right()) - bbox.width, bbox.y),
            Alignment::Top => Point::new(bbox.x, snap(reference.y)),
            Alignment::Middle => Point::new(bbox.x, snap(reference.center().y) - bbox.height / 2.0),
            Alignment::Bottom => Point::new(bbox.x, snap(reference.bottom()) - bbox.height),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Align {
    pub elements: Vec<CellId>,
    pub alignment: Alignment,
    pub reference: Option<CellId>,
    previous: Vec<(CellId, Point)>,
    resolved: Vec<(CellId, Point)>,
}

impl Align {
    pub fn new(elements: Vec<CellId>, alignment: Alignment) -> Self {
        Self {
            elements,
            alignment,
            reference: None,
            previous: Vec::new(),
            resolved: Vec::new(),
        }
    }

    pub fn reference(mut self, reference: CellId) -> Self {
        self.reference = Some(reference);
        self
    }

    fn validate(&self, ctx: &EditContext<'_>) -> ValidationReport {
        let mut report = ValidationReport::ok();
        for id in self.elements.iter().chain(self.reference.iter()) {
            if let Err(err) = require_element(&*ctx.graph, id) {
                report.merge(ValidationReport::fail("element-exists", err.to_string()));
            }
        }
        let others = self
            .elements
            .iter()
            .filter(|id| Some(*id) != self.reference.as_ref())
            .count();
        let enough = if self.reference.is_some() {
            others >= 1
        } else {
            others >= 2
        };
        if !enough {
            report.merge(ValidationReport::fail(
                "alignment-selection",
                "select at least two elements or one element and a reference",
            ));
        }
        report
    }

    fn forward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for id in self.elements.iter().chain(self.reference.iter()) {
            require_element(ctx.graph, id)?;
        }

        if self.resolved.is_empty() {
            let reference = match &self.reference {
                Some(reference) => ctx.graph.bbox(reference),
                None => {
                    let boxes: Vec<BBox> = self
                        .elements
                        .iter()
                        .filter_map(|id| ctx.graph.bbox(id))
                        .collect();
                    union_bbox(&boxes)
                }
            }
            .ok_or(EditorError::EmptySelection)?;

            let grid = ctx.config.grid;
            self.previous.clear();
            for id in &self.elements {
                if Some(id) == self.reference.as_ref() {
                    continue;
                }
                let Some(bbox) = ctx.graph.bbox(id) else {
                    continue;
                };
                let target = self
                    .alignment
                    .place(&bbox, &reference, |value| grid.snap_value(value));
                self.previous.push((id.clone(), bbox.origin()));
                self.resolved.push((id.clone(), target));
            }
        }

        for (id, position) in &self.resolved {
            ctx.graph.set_position(id, *position);
        }
        Ok(())
    }

    fn backward(&mut self, ctx: &mut EditContext<'_>) -> EditResult<()> {
        for (id, _) in &self.previous {
            require_element(ctx.graph, id)?;
        }
        for (id, position) in self.previous.iter().rev() {
            ctx.graph.set_position(id, *position);
        }
        Ok(())
    }
}

impl From<Align> for Command {
    fn from(value: Align) -> Self {
        Command::new(CommandKind::Align(value))
    }
}
