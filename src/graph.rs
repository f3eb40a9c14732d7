use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::{BBox, CellId, CellRecord, EditResult, EditorError, Endpoint, Point, Size, Snapshot};

/// The diagram store the engine edits. Shapes and links live here; the engine only
/// annotates them by id.
///
/// Removing an element also removes every link attached to it. Implementations report
/// everything they removed so callers can release port claims.
pub trait GraphModel {
    fn create_element(
        &mut self,
        kind: &str,
        position: Point,
        size: Size,
        attrs: Option<serde_json::Value>,
    ) -> CellId;

    fn create_link(
        &mut self,
        source: Endpoint,
        target: Endpoint,
        attrs: Option<serde_json::Value>,
    ) -> EditResult<CellId>;

    /// Re-inserts a serialized cell. The recorded id is kept when it is free, otherwise a
    /// fresh id is assigned; the id actually used is returned.
    fn restore_cell(&mut self, record: &CellRecord) -> EditResult<CellId>;

    fn remove_cell(&mut self, id: &CellId) -> Vec<CellRecord>;

    fn get(&self, id: &CellId) -> Option<&CellRecord>;

    fn contains(&self, id: &CellId) -> bool {
        self.get(id).is_some()
    }

    fn position(&self, id: &CellId) -> Option<Point> {
        self.get(id).and_then(|cell| cell.position)
    }

    fn set_position(&mut self, id: &CellId, position: Point) -> bool;

    fn bbox(&self, id: &CellId) -> Option<BBox> {
        self.get(id).and_then(CellRecord::bbox)
    }

    fn connected_links(&self, id: &CellId) -> Vec<CellId>;

    fn elements(&self) -> Vec<CellId>;

    fn links(&self) -> Vec<CellId>;

    fn element_count(&self) -> usize {
        self.elements().len()
    }

    fn link_count(&self) -> usize {
        self.links().len()
    }

    fn to_snapshot(&self) -> Snapshot;

    fn load_snapshot(&mut self, snapshot: &Snapshot) -> EditResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    cells: HashMap<CellId, CellRecord>,
    order: Vec<CellId>,
    next_id: u64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> EditResult<Self> {
        let mut graph = Self::new();
        graph.load_snapshot(snapshot)?;
        Ok(graph)
    }

    fn allocate_id(&mut self, prefix: &str) -> CellId {
        loop {
            self.next_id += 1;
            let candidate = CellId::new(format!("{prefix}-{}", self.next_id));
            if !self.cells.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn insert(&mut self, record: CellRecord) {
        match self.cells.entry(record.id.clone()) {
            Entry::Vacant(entry) => {
                self.order.push(record.id.clone());
                entry.insert(record);
            }
            Entry::Occupied(mut entry) => {
                entry.insert(record);
            }
        }
    }

    fn check_endpoint(&self, end: &Endpoint) -> EditResult<()> {
        match self.cells.get(&end.id) {
            Some(cell) if !cell.is_link() => Ok(()),
            Some(_) => Err(EditorError::structural(format!(
                "link endpoint '{}' is itself a link",
                end.id
            ))),
            None => Err(EditorError::missing_cell(&end.id)),
        }
    }

    fn remove_single(&mut self, id: &CellId) -> Option<CellRecord> {
        let removed = self.cells.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }
}

impl GraphModel for MemoryGraph {
    fn create_element(
        &mut self,
        kind: &str,
        position: Point,
        size: Size,
        attrs: Option<serde_json::Value>,
    ) -> CellId {
        let id = self.allocate_id("el");
        self.insert(CellRecord::element(id.clone(), kind, position, size, attrs));
        id
    }

    fn create_link(
        &mut self,
        source: Endpoint,
        target: Endpoint,
        attrs: Option<serde_json::Value>,
    ) -> EditResult<CellId> {
        self.check_endpoint(&source)?;
        self.check_endpoint(&target)?;
        let id = self.allocate_id("link");
        self.insert(CellRecord::link(id.clone(), source, target, attrs));
        Ok(id)
    }

    fn restore_cell(&mut self, record: &CellRecord) -> EditResult<CellId> {
        if record.is_link() {
            if let Some(source) = &record.source {
                self.check_endpoint(source)?;
            }
            if let Some(target) = &record.target {
                self.check_endpoint(target)?;
            }
        }

        let mut restored = record.clone();
        if self.cells.contains_key(&record.id) {
            let prefix = if record.is_link() { "link" } else { "el" };
            restored.id = self.allocate_id(prefix);
        }
        let id = restored.id.clone();
        self.insert(restored);
        Ok(id)
    }

    fn remove_cell(&mut self, id: &CellId) -> Vec<CellRecord> {
        let Some(cell) = self.cells.get(id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        if !cell.is_link() {
            for link_id in self.connected_links(id) {
                if let Some(link) = self.remove_single(&link_id) {
                    removed.push(link);
                }
            }
        }
        if let Some(cell) = self.remove_single(id) {
            removed.push(cell);
        }
        removed
    }

    fn get(&self, id: &CellId) -> Option<&CellRecord> {
        self.cells.get(id)
    }

    fn set_position(&mut self, id: &CellId, position: Point) -> bool {
        match self.cells.get_mut(id) {
            Some(cell) if !cell.is_link() => {
                cell.position = Some(position);
                true
            }
            _ => false,
        }
    }

    fn connected_links(&self, id: &CellId) -> Vec<CellId> {
        self.order
            .iter()
            .filter_map(|cell_id| self.cells.get(cell_id))
            .filter(|cell| cell.is_link() && cell.touches(id))
            .map(|cell| cell.id.clone())
            .collect()
    }

    fn elements(&self) -> Vec<CellId> {
        self.order
            .iter()
            .filter(|id| self.cells.get(*id).is_some_and(|cell| !cell.is_link()))
            .cloned()
            .collect()
    }

    fn links(&self) -> Vec<CellId> {
        self.order
            .iter()
            .filter(|id| self.cells.get(*id).is_some_and(CellRecord::is_link))
            .cloned()
            .collect()
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.order
                .iter()
                .filter_map(|id| self.cells.get(id))
                .cloned()
                .collect(),
        )
    }

    fn load_snapshot(&mut self, snapshot: &Snapshot) -> EditResult<()> {
        snapshot.check()?;
        self.cells.clear();
        self.order.clear();
        for record in &snapshot.cells {
            self.insert(record.clone());
        }
        Ok(())
    }
}
