use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::{BBox, CellId, EditResult, EditorError, PortId, Point, Size};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: CellId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortId>,
}

impl Endpoint {
    pub fn new(id: CellId, port: Option<PortId>) -> Self {
        Self { id, port }
    }

    pub fn at_port(id: CellId, port: PortId) -> Self {
        Self {
            id,
            port: Some(port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: CellId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Endpoint>,
}

impl CellRecord {
    pub fn element(
        id: CellId,
        kind: impl Into<String>,
        position: Point,
        size: Size,
        attrs: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            kind: kind.into(),
            position: Some(position),
            size: Some(size),
            attrs,
            source: None,
            target: None,
        }
    }

    pub fn link(
        id: CellId,
        source: Endpoint,
        target: Endpoint,
        attrs: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            kind: crate::LINK_KIND.to_string(),
            position: None,
            size: None,
            attrs,
            source: Some(source),
            target: Some(target),
        }
    }

    pub fn is_link(&self) -> bool {
        self.source.is_some() && self.target.is_some()
    }

    pub fn bbox(&self) -> Option<BBox> {
        match (self.position, self.size) {
            (Some(position), Some(size)) => Some(BBox::new(position, size)),
            _ => None,
        }
    }

    pub fn touches(&self, shape: &CellId) -> bool {
        self.source.as_ref().is_some_and(|end| &end.id == shape)
            || self.target.as_ref().is_some_and(|end| &end.id == shape)
    }

    /// Rewrites endpoint shape ids through `remap`; ids missing from the map are kept.
    pub fn remap_endpoints(&mut self, remap: &HashMap<CellId, CellId>) {
        for end in [self.source.as_mut(), self.target.as_mut()].into_iter().flatten() {
            if let Some(replacement) = remap.get(&end.id) {
                end.id = replacement.clone();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub cells: Vec<CellRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortClaim {
    pub shape: CellId,
    pub port: PortId,
    pub link: CellId,
}

impl Snapshot {
    pub fn new(cells: Vec<CellRecord>) -> Self {
        Self { cells }
    }

    pub fn elements(&self) -> impl Iterator<Item = &CellRecord> {
        self.cells.iter().filter(|cell| !cell.is_link())
    }

    pub fn links(&self) -> impl Iterator<Item = &CellRecord> {
        self.cells.iter().filter(|cell| cell.is_link())
    }

    pub fn element_count(&self) -> usize {
        self.elements().count()
    }

    pub fn link_count(&self) -> usize {
        self.links().count()
    }

    pub fn get(&self, id: &CellId) -> Option<&CellRecord> {
        self.cells.iter().find(|cell| &cell.id == id)
    }

    pub fn port_claims(&self) -> Vec<PortClaim> {
        let mut claims = Vec::new();
        for link in self.links() {
            for end in [link.source.as_ref(), link.target.as_ref()].into_iter().flatten() {
                if let Some(port) = &end.port {
                    claims.push(PortClaim {
                        shape: end.id.clone(),
                        port: port.clone(),
                        link: link.id.clone(),
                    });
                }
            }
        }
        claims
    }

    /// Unique ids, links between known elements, no self-loops, one link per port.
    pub fn check(&self) -> EditResult<()> {
        let mut seen = HashSet::new();
        for cell in &self.cells {
            if !seen.insert(&cell.id) {
                return Err(EditorError::structural(format!(
                    "duplicate cell id '{}' in snapshot",
                    cell.id
                )));
            }
        }

        let element_ids: HashSet<&CellId> = self.elements().map(|cell| &cell.id).collect();
        for link in self.links() {
            let (Some(source), Some(target)) = (&link.source, &link.target) else {
                continue;
            };
            for end in [source, target] {
                if !element_ids.contains(&end.id) {
                    return Err(EditorError::structural(format!(
                        "link '{}' references unknown element '{}'",
                        link.id, end.id
                    )));
                }
            }
            if source.id == target.id {
                return Err(EditorError::structural(format!(
                    "link '{}' connects '{}' to itself",
                    link.id, source.id
                )));
            }
        }

        let mut holders: HashMap<(&CellId, &PortId), &CellId> = HashMap::new();
        let claims = self.port_claims();
        for claim in &claims {
            if let Some(holder) = holders.insert((&claim.shape, &claim.port), &claim.link) {
                return Err(EditorError::structural(format!(
                    "links '{}' and '{}' both claim port '{}/{}'",
                    holder, claim.link, claim.shape, claim.port
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> EditResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EditResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse snapshot '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::new(vec![
            CellRecord::element(
                CellId::from("a"),
                "rectangle",
                Point::new(0.0, 0.0),
                Size::default(),
                None,
            ),
            CellRecord::element(
                CellId::from("b"),
                "rectangle",
                Point::new(300.0, 0.0),
                Size::default(),
                None,
            ),
            CellRecord::link(
                CellId::from("l"),
                Endpoint::at_port(CellId::from("a"), PortId::from("right-0")),
                Endpoint::at_port(CellId::from("b"), PortId::from("left-0")),
                None,
            ),
        ])
    }

    #[test]
    fn json_uses_type_and_endpoint_fields() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"type\": \"link\""));
        assert!(json.contains("\"port\": \"right-0\""));
        assert!(!json.contains("\"kind\""));
    }

    #[test]
    fn port_claims_follow_links() {
        let claims = sample().port_claims();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].shape.as_str(), "a");
        assert_eq!(claims[1].port.as_str(), "left-0");
        assert!(claims.iter().all(|claim| claim.link.as_str() == "l"));
    }

    #[test]
    fn check_rejects_dangling_links() {
        let mut snapshot = sample();
        snapshot.cells.remove(1);
        let err = snapshot.check().unwrap_err();
        assert!(err.to_string().contains("unknown element 'b'"));
    }

    #[test]
    fn check_rejects_shared_ports() {
        let mut snapshot = sample();
        snapshot.cells.push(CellRecord::link(
            CellId::from("l2"),
            Endpoint::at_port(CellId::from("a"), PortId::from("right-0")),
            Endpoint::at_port(CellId::from("b"), PortId::from("top-1")),
            None,
        ));
        let err = snapshot.check().unwrap_err();
        assert!(err.to_string().contains("both claim port 'a/right-0'"));
    }

    #[test]
    fn remap_rewrites_only_known_ids() {
        let mut link = sample().cells[2].clone();
        let remap = HashMap::from([(CellId::from("a"), CellId::from("a2"))]);
        link.remap_endpoints(&remap);
        assert_eq!(link.source.unwrap().id.as_str(), "a2");
        assert_eq!(link.target.unwrap().id.as_str(), "b");
    }
}
