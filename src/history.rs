use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    CellId, Command, EditContext, EditResult, EditorConfig, EditorError, GraphModel, Snapshot,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub skip_history: bool,
    pub group_with: Option<String>,
}

impl ExecuteOptions {
    pub fn grouped(group: impl Into<String>) -> Self {
        Self {
            skip_history: false,
            group_with: Some(group.into()),
        }
    }

    pub fn untracked() -> Self {
        Self {
            skip_history: true,
            group_with: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub command: Uuid,
    pub description: String,
    pub created: Vec<CellId>,
    pub merged: bool,
}

#[derive(Debug, Clone)]
struct OpenBatch {
    description: String,
    commands: Vec<Command>,
}

/// Linear undo/redo history with a cursor.
///
/// Entries before the cursor are applied, entries after it form the redo future and are
/// dropped as soon as a new command is recorded.
#[derive(Debug, Clone)]
pub struct CommandLog {
    entries: Vec<Command>,
    cursor: usize,
    capacity: usize,
    merge_window_ms: i64,
    capture_snapshots: bool,
    batches: Vec<OpenBatch>,
    dirty: bool,
    committed: Option<Snapshot>,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

impl CommandLog {
    pub fn new(capacity: usize, merge_window_ms: i64) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            capacity,
            merge_window_ms,
            capture_snapshots: true,
            batches: Vec::new(),
            dirty: false,
            committed: None,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        let mut log = Self::new(config.history_capacity, config.merge_window_ms);
        log.capture_snapshots = config.capture_snapshots;
        log
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn execute(
        &mut self,
        mut command: Command,
        options: ExecuteOptions,
        ctx: &mut EditContext<'_>,
    ) -> EditResult<Applied> {
        let report = command.validate(ctx);
        for warning in &report.warnings {
            debug!(command = command.description(), %warning, "validation warning");
        }
        report.into_result()?;

        let before = self.capture_snapshots.then(|| ctx.snapshot());
        command.execute(ctx)?;
        let after = self.capture_snapshots.then(|| ctx.snapshot());
        command.set_snapshots(before, after);
        self.dirty = true;

        let mut applied = Applied {
            command: command.id(),
            description: command.description().to_string(),
            created: command.created_cells(),
            merged: false,
        };
        if options.skip_history {
            debug!(command = command.description(), "executed outside history");
            return Ok(applied);
        }
        if let Some(group) = options.group_with {
            command.set_group(Some(group));
        }

        if let Some(open) = self.batches.last_mut() {
            open.commands.push(command);
            return Ok(applied);
        }

        self.truncate_future();
        applied.merged = self.fold_into_tail(&mut command);
        if !applied.merged {
            self.push(command);
        }
        Ok(applied)
    }

    /// Tries to absorb `command` into the tail entry. On success the tail carries the
    /// combined effect and `command` must not be recorded.
    fn fold_into_tail(&mut self, command: &mut Command) -> bool {
        let Some(tail) = self.entries.last_mut() else {
            return false;
        };

        match command.group().map(str::to_string) {
            Some(group) if tail.group() == Some(group.as_str()) => {
                if tail.absorb(command) {
                    return true;
                }
                let incoming = std::mem::replace(command, Command::batch("", Vec::new()));
                let incoming = match tail.push_child(incoming) {
                    Ok(()) => return true,
                    Err(incoming) => incoming,
                };
                let Some(previous) = self.entries.pop() else {
                    *command = incoming;
                    return false;
                };
                let before = previous.before().cloned();
                let after = incoming.after().cloned();
                let mut batch =
                    Command::batch(previous.description().to_string(), vec![previous, incoming])
                        .with_group(group);
                batch.set_snapshots(before, after);
                batch.mark_executed();
                self.entries.push(batch);
                true
            }
            Some(_) => false,
            None if tail.group().is_none() => tail.try_merge(command, self.merge_window_ms),
            None => false,
        }
    }

    fn truncate_future(&mut self) {
        if self.cursor < self.entries.len() {
            let dropped = self.entries.len() - self.cursor;
            self.entries.truncate(self.cursor);
            debug!(dropped, "discarded redo history");
        }
    }

    fn push(&mut self, command: Command) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push(command);
        while self.entries.len() > self.capacity {
            let evicted = self.entries.remove(0);
            debug!(command = evicted.description(), "evicted from history");
        }
        self.cursor = self.entries.len();
    }

    pub fn undo(&mut self, ctx: &mut EditContext<'_>) -> EditResult<Option<String>> {
        if self.is_batch_open() {
            return Err(EditorError::BatchOpen);
        }
        if self.cursor == 0 {
            return Ok(None);
        }
        let command = &mut self.entries[self.cursor - 1];
        if let Err(err) = command.undo(ctx) {
            warn!(command = command.description(), error = %err, "undo failed");
            return Err(err);
        }
        let description = command.description().to_string();
        self.cursor -= 1;
        self.dirty = true;
        Ok(Some(description))
    }

    pub fn redo(&mut self, ctx: &mut EditContext<'_>) -> EditResult<Option<String>> {
        if self.is_batch_open() {
            return Err(EditorError::BatchOpen);
        }
        if self.cursor == self.entries.len() {
            return Ok(None);
        }
        let command = &mut self.entries[self.cursor];
        if let Err(err) = command.redo(ctx) {
            warn!(command = command.description(), error = %err, "redo failed");
            return Err(err);
        }
        let description = command.description().to_string();
        self.cursor += 1;
        self.dirty = true;
        Ok(Some(description))
    }

    pub fn begin_batch(&mut self, description: impl Into<String>) {
        let description = description.into();
        debug!(%description, depth = self.batches.len() + 1, "batch opened");
        self.batches.push(OpenBatch {
            description,
            commands: Vec::new(),
        });
    }

    pub fn end_batch(&mut self) -> EditResult<bool> {
        let open = self.batches.pop().ok_or(EditorError::NoOpenBatch)?;
        if open.commands.is_empty() {
            debug!(description = %open.description, "empty batch dropped");
            return Ok(false);
        }

        let before = open.commands.first().and_then(|c| c.before().cloned());
        let after = open.commands.last().and_then(|c| c.after().cloned());
        let mut batch = Command::batch(open.description, open.commands);
        batch.set_snapshots(before, after);
        batch.mark_executed();

        match self.batches.last_mut() {
            Some(parent) => parent.commands.push(batch),
            None => {
                self.truncate_future();
                self.push(batch);
            }
        }
        Ok(true)
    }

    pub fn cancel_batch(&mut self, ctx: &mut EditContext<'_>) -> EditResult<usize> {
        let mut open = self.batches.pop().ok_or(EditorError::NoOpenBatch)?;
        let mut undone = 0;
        let mut first_error = None;
        for command in open.commands.iter_mut().rev() {
            match command.undo(ctx) {
                Ok(()) => undone += 1,
                Err(err) => {
                    warn!(command = command.description(), error = %err, "cancel could not undo");
                    first_error.get_or_insert(err);
                }
            }
        }
        self.dirty = true;
        debug!(description = %open.description, undone, "batch cancelled");
        match first_error {
            Some(err) => Err(err),
            None => Ok(undone),
        }
    }

    pub fn is_batch_open(&self) -> bool {
        !self.batches.is_empty()
    }

    pub fn batch_depth(&self) -> usize {
        self.batches.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.is_batch_open() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.is_batch_open() && self.cursor < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.cursor
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .map(Command::description)
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.cursor).map(Command::description)
    }

    pub fn entries(&self) -> &[Command] {
        &self.entries
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.entries.iter().map(Command::description).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.batches.clear();
        self.cursor = 0;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn commit(&mut self, graph: &dyn GraphModel) -> Option<Snapshot> {
        if !self.dirty {
            return None;
        }
        let snapshot = graph.to_snapshot();
        self.dirty = false;
        self.committed = Some(snapshot.clone());
        debug!(cells = snapshot.cells.len(), "committed");
        Some(snapshot)
    }

    pub fn last_committed(&self) -> Option<&Snapshot> {
        self.committed.as_ref()
    }
}
