use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::{BBox, CellId, CellRecord, GraphModel, Point, PortId, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub side: Side,
    pub index: usize,
    /// Percent along the side, measured from its top/left end.
    pub offset: f32,
    pub occupied_by: Option<CellId>,
    pub magnet: bool,
}

impl Port {
    fn new(id: PortId, side: Side) -> Self {
        Self {
            id,
            side,
            index: 0,
            offset: 50.0,
            occupied_by: None,
            magnet: true,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied_by.is_some()
    }

    pub fn is_available(&self) -> bool {
        !self.is_occupied() && self.magnet
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub side: Side,
    pub index: usize,
    pub shape: CellId,
    pub port: PortId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortLayout {
    pub sides: BTreeMap<Side, Vec<Port>>,
    pub next_serial: usize,
}

#[derive(Debug, Clone, Default)]
struct ShapePorts {
    sides: BTreeMap<Side, Vec<Port>>,
    next_serial: usize,
}

impl ShapePorts {
    fn with_ports(per_side: usize) -> Self {
        let mut ports = ShapePorts::default();
        for side in Side::ALL {
            ports.sides.insert(side, Vec::new());
            for _ in 0..per_side {
                ports.push(side);
            }
        }
        ports
    }

    fn push(&mut self, side: Side) -> PortId {
        let id = PortId::new(format!("{}-{}", side.as_str(), self.next_serial));
        self.next_serial += 1;
        self.sides
            .entry(side)
            .or_default()
            .push(Port::new(id.clone(), side));
        self.redistribute(side);
        id
    }

    fn redistribute(&mut self, side: Side) {
        let Some(ports) = self.sides.get_mut(&side) else {
            return;
        };
        let count = ports.len();
        for (index, port) in ports.iter_mut().enumerate() {
            port.index = index;
            port.offset = 100.0 * (index as f32 + 1.0) / (count as f32 + 1.0);
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Port> {
        self.sides.values().flat_map(|ports| ports.iter())
    }

    fn find(&self, port: &PortId) -> Option<&Port> {
        self.iter().find(|candidate| &candidate.id == port)
    }

    fn find_mut(&mut self, port: &PortId) -> Option<&mut Port> {
        self.sides
            .values_mut()
            .flat_map(|ports| ports.iter_mut())
            .find(|candidate| &candidate.id == port)
    }
}

#[derive(Debug, Clone)]
pub struct PortAllocator {
    shapes: HashMap<CellId, ShapePorts>,
    ports_per_side: usize,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(crate::PORTS_PER_SIDE)
    }
}

impl PortAllocator {
    pub fn new(ports_per_side: usize) -> Self {
        Self {
            shapes: HashMap::new(),
            ports_per_side,
        }
    }

    pub fn ports_per_side(&self) -> usize {
        self.ports_per_side
    }

    pub fn is_registered(&self, shape: &CellId) -> bool {
        self.shapes.contains_key(shape)
    }

    pub fn register_shape(&mut self, shape: &CellId) -> bool {
        if self.shapes.contains_key(shape) {
            return false;
        }
        self.shapes
            .insert(shape.clone(), ShapePorts::with_ports(self.ports_per_side));
        debug!(shape = %shape, per_side = self.ports_per_side, "registered shape ports");
        true
    }

    pub fn unregister_shape(&mut self, shape: &CellId) -> Vec<CellId> {
        let Some(ports) = self.shapes.remove(shape) else {
            return Vec::new();
        };
        let mut links: Vec<CellId> = ports
            .iter()
            .filter_map(|port| port.occupied_by.clone())
            .collect();
        links.dedup();
        links
    }

    pub fn add_port(&mut self, shape: &CellId, side: Side) -> Option<PortId> {
        let ports = self.shapes.get_mut(shape)?;
        let id = ports.push(side);
        debug!(shape = %shape, port = %id, side = %side, "added port");
        Some(id)
    }

    /// Deletes a port. An occupying link is removed from the graph first and its other
    /// endpoint released.
    pub fn remove_port(
        &mut self,
        graph: &mut dyn GraphModel,
        shape: &CellId,
        port: &PortId,
    ) -> bool {
        let Some(occupant) = self
            .shapes
            .get(shape)
            .and_then(|ports| ports.find(port))
            .map(|found| found.occupied_by.clone())
        else {
            return false;
        };

        if let Some(link) = occupant {
            debug!(shape = %shape, port = %port, link = %link, "removing occupied port, dropping link");
            self.release_link(graph, &link);
        }

        let Some(ports) = self.shapes.get_mut(shape) else {
            return false;
        };
        let mut removed_side = None;
        for (side, list) in ports.sides.iter_mut() {
            if let Some(position) = list.iter().position(|candidate| &candidate.id == port) {
                list.remove(position);
                removed_side = Some(*side);
                break;
            }
        }
        match removed_side {
            Some(side) => {
                ports.redistribute(side);
                true
            }
            None => false,
        }
    }

    pub fn occupy(&mut self, shape: &CellId, port: &PortId, link: &CellId) -> bool {
        let Some(target) = self
            .shapes
            .get_mut(shape)
            .and_then(|ports| ports.find_mut(port))
        else {
            return false;
        };
        if target.is_occupied() {
            return false;
        }
        target.occupied_by = Some(link.clone());
        true
    }

    pub fn free(&mut self, shape: &CellId, port: &PortId) -> bool {
        match self
            .shapes
            .get_mut(shape)
            .and_then(|ports| ports.find_mut(port))
        {
            Some(target) if target.is_occupied() => {
                target.occupied_by = None;
                true
            }
            _ => false,
        }
    }

    pub fn free_link(&mut self, link: &CellId) -> usize {
        let mut released = 0;
        for ports in self.shapes.values_mut() {
            for port in ports.sides.values_mut().flat_map(|list| list.iter_mut()) {
                if port.occupied_by.as_ref() == Some(link) {
                    port.occupied_by = None;
                    released += 1;
                }
            }
        }
        released
    }

    pub fn release_link(&mut self, graph: &mut dyn GraphModel, link: &CellId) -> Option<CellRecord> {
        self.free_link(link);
        let removed = graph.remove_cell(link);
        if removed.is_empty() {
            warn!(link = %link, "released link was already gone from the graph");
        }
        removed.into_iter().find(|record| &record.id == link)
    }

    pub fn occupy_for_record(&mut self, record: &CellRecord) -> bool {
        let mut claimed: Vec<(CellId, PortId)> = Vec::new();
        for end in [record.source.as_ref(), record.target.as_ref()].into_iter().flatten() {
            let Some(port) = &end.port else {
                continue;
            };
            if self.occupy(&end.id, port, &record.id) {
                claimed.push((end.id.clone(), port.clone()));
            } else {
                for (shape, port) in claimed {
                    self.free(&shape, &port);
                }
                return false;
            }
        }
        true
    }

    pub fn set_magnet(&mut self, shape: &CellId, port: &PortId, enabled: bool) -> bool {
        match self
            .shapes
            .get_mut(shape)
            .and_then(|ports| ports.find_mut(port))
        {
            Some(target) => {
                target.magnet = enabled;
                true
            }
            None => false,
        }
    }

    pub fn port(&self, shape: &CellId, port: &PortId) -> Option<&Port> {
        self.shapes.get(shape).and_then(|ports| ports.find(port))
    }

    pub fn occupant(&self, shape: &CellId, port: &PortId) -> Option<&CellId> {
        self.port(shape, port)
            .and_then(|found| found.occupied_by.as_ref())
    }

    pub fn is_available(&self, shape: &CellId, port: &PortId) -> bool {
        self.port(shape, port).is_some_and(Port::is_available)
    }

    pub fn ports(&self, shape: &CellId) -> Vec<&Port> {
        self.shapes
            .get(shape)
            .map(|ports| ports.iter().collect())
            .unwrap_or_default()
    }

    pub fn free_ports(&self, shape: &CellId) -> Vec<PortRef> {
        self.collect_refs(shape, |port| port.is_available())
    }

    pub fn free_ports_on_side(&self, shape: &CellId, side: Side) -> Vec<PortRef> {
        self.collect_refs(shape, |port| port.side == side && port.is_available())
    }

    pub fn occupied_ports(&self, shape: &CellId) -> Vec<PortRef> {
        self.collect_refs(shape, Port::is_occupied)
    }

    fn collect_refs(&self, shape: &CellId, keep: impl Fn(&Port) -> bool) -> Vec<PortRef> {
        let mut refs: Vec<PortRef> = self
            .ports(shape)
            .into_iter()
            .filter(|port| keep(*port))
            .map(|port| PortRef {
                side: port.side,
                index: port.index,
                shape: shape.clone(),
                port: port.id.clone(),
            })
            .collect();
        refs.sort();
        refs
    }

    pub fn port_ref(&self, shape: &CellId, port: &PortId) -> Option<PortRef> {
        self.port(shape, port).map(|found| PortRef {
            side: found.side,
            index: found.index,
            shape: shape.clone(),
            port: found.id.clone(),
        })
    }

    pub fn anchor(&self, shape: &CellId, port: &PortId, bbox: &BBox) -> Option<Point> {
        let found = self.port(shape, port)?;
        let ratio = found.offset / 100.0;
        let point = match found.side {
            Side::Top => Point::new(bbox.x + bbox.width * ratio, bbox.y),
            Side::Bottom => Point::new(bbox.x + bbox.width * ratio, bbox.bottom()),
            Side::Left => Point::new(bbox.x, bbox.y + bbox.height * ratio),
            Side::Right => Point::new(bbox.right(), bbox.y + bbox.height * ratio),
        };
        Some(point)
    }

    pub fn export_layout(&self, shape: &CellId) -> Option<PortLayout> {
        self.shapes.get(shape).map(|ports| PortLayout {
            sides: ports.sides.clone(),
            next_serial: ports.next_serial,
        })
    }

    pub fn import_layout(&mut self, shape: &CellId, layout: &PortLayout) {
        let mut sides = layout.sides.clone();
        for port in sides.values_mut().flat_map(|list| list.iter_mut()) {
            port.occupied_by = None;
        }
        self.shapes.insert(
            shape.clone(),
            ShapePorts {
                sides,
                next_serial: layout.next_serial,
            },
        );
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    /// Re-derives the registry from a graph: every element gets default ports (plus any
    /// extra port its links name) and every link re-claims its endpoint ports.
    pub fn rebuild(&mut self, graph: &dyn GraphModel) -> usize {
        self.clear();
        for element in graph.elements() {
            self.register_shape(&element);
        }

        let mut claimed = 0;
        for link_id in graph.links() {
            let Some(link) = graph.get(&link_id) else {
                continue;
            };
            for end in [link.source.as_ref(), link.target.as_ref()].into_iter().flatten() {
                let Some(port) = &end.port else {
                    continue;
                };
                self.ensure_port(&end.id, port);
                if self.occupy(&end.id, port, &link.id) {
                    claimed += 1;
                } else {
                    warn!(link = %link.id, shape = %end.id, port = %port, "port already claimed while rebuilding");
                }
            }
        }
        claimed
    }

    fn ensure_port(&mut self, shape: &CellId, port: &PortId) {
        let Some(ports) = self.shapes.get_mut(shape) else {
            return;
        };
        if ports.find(port).is_some() {
            return;
        }
        let (side, serial) = parse_port_name(port.as_str());
        let side = side.unwrap_or(Side::Top);
        ports
            .sides
            .entry(side)
            .or_default()
            .push(Port::new(port.clone(), side));
        if let Some(serial) = serial {
            ports.next_serial = ports.next_serial.max(serial + 1);
        }
        ports.redistribute(side);
    }

    pub fn claims(&self) -> Vec<(CellId, PortId, CellId)> {
        let mut shapes: Vec<&CellId> = self.shapes.keys().collect();
        shapes.sort();
        let mut claims = Vec::new();
        for shape in shapes {
            for port in self.ports(shape) {
                if let Some(link) = &port.occupied_by {
                    claims.push((shape.clone(), port.id.clone(), link.clone()));
                }
            }
        }
        claims
    }
}

fn parse_port_name(name: &str) -> (Option<Side>, Option<usize>) {
    match name.rsplit_once('-') {
        Some((side, serial)) => (Side::parse(side), serial.parse().ok()),
        None => (Side::parse(name), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, MemoryGraph, Size};

    fn shape(id: &str) -> CellId {
        CellId::from(id)
    }

    #[test]
    fn registration_is_idempotent() {
        let mut ports = PortAllocator::new(1);
        assert!(ports.register_shape(&shape("a")));
        let first = ports.add_port(&shape("a"), Side::Top).unwrap();
        assert!(!ports.register_shape(&shape("a")));
        assert!(ports.port(&shape("a"), &first).is_some());
        assert_eq!(ports.ports(&shape("a")).len(), 5);
    }

    #[test]
    fn adding_ports_redistributes_the_side() {
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&shape("a"));
        ports.add_port(&shape("a"), Side::Left).unwrap();
        ports.add_port(&shape("a"), Side::Left).unwrap();

        let offsets: Vec<f32> = ports
            .ports(&shape("a"))
            .into_iter()
            .filter(|port| port.side == Side::Left)
            .map(|port| port.offset)
            .collect();
        assert_eq!(offsets, vec![25.0, 50.0, 75.0]);
    }

    #[test]
    fn unknown_shape_gets_no_port() {
        let mut ports = PortAllocator::new(1);
        assert!(ports.add_port(&shape("nope"), Side::Top).is_none());
    }

    #[test]
    fn occupancy_is_exclusive_and_free_is_idempotent() {
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&shape("a"));
        let port = PortId::from("top-0");

        assert!(ports.occupy(&shape("a"), &port, &CellId::from("l1")));
        assert!(!ports.occupy(&shape("a"), &port, &CellId::from("l2")));
        assert_eq!(ports.occupant(&shape("a"), &port).unwrap().as_str(), "l1");
        assert!(ports.free(&shape("a"), &port));
        assert!(!ports.free(&shape("a"), &port));
    }

    #[test]
    fn free_ports_are_ordered_side_then_index() {
        let mut ports = PortAllocator::new(2);
        ports.register_shape(&shape("a"));
        let order: Vec<String> = ports
            .free_ports(&shape("a"))
            .into_iter()
            .map(|port| format!("{}:{}", port.side, port.index))
            .collect();
        assert_eq!(
            order,
            vec!["top:0", "top:1", "right:0", "right:1", "bottom:0", "bottom:1", "left:0", "left:1"]
        );
    }

    #[test]
    fn disabled_magnet_hides_port() {
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&shape("a"));
        let port = PortId::from("right-1");
        assert!(ports.set_magnet(&shape("a"), &port, false));
        assert!(!ports.is_available(&shape("a"), &port));
        assert_eq!(ports.free_ports(&shape("a")).len(), 3);
    }

    #[test]
    fn removing_occupied_port_drops_the_link() {
        let mut graph = MemoryGraph::new();
        let a = graph.create_element("rectangle", Point::new(0.0, 0.0), Size::default(), None);
        let b = graph.create_element("rectangle", Point::new(300.0, 0.0), Size::default(), None);
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&a);
        ports.register_shape(&b);

        let right = PortId::from("right-1");
        let left = PortId::from("left-3");
        let link = graph
            .create_link(
                Endpoint::at_port(a.clone(), right.clone()),
                Endpoint::at_port(b.clone(), left.clone()),
                None,
            )
            .unwrap();
        assert!(ports.occupy(&a, &right, &link));
        assert!(ports.occupy(&b, &left, &link));

        assert!(ports.remove_port(&mut graph, &a, &right));
        assert!(!graph.contains(&link));
        assert!(ports.is_available(&b, &left));
        assert!(ports.port(&a, &right).is_none());
    }

    #[test]
    fn rebuild_replays_link_claims() {
        let mut graph = MemoryGraph::new();
        let a = graph.create_element("rectangle", Point::new(0.0, 0.0), Size::default(), None);
        let b = graph.create_element("rectangle", Point::new(300.0, 0.0), Size::default(), None);
        graph
            .create_link(
                Endpoint::at_port(a.clone(), PortId::from("right-7")),
                Endpoint::at_port(b.clone(), PortId::from("left-3")),
                None,
            )
            .unwrap();

        let mut ports = PortAllocator::new(1);
        assert_eq!(ports.rebuild(&graph), 2);
        assert_eq!(ports.ports(&a).len(), 5);
        assert_eq!(ports.free_ports(&b).len(), 3);
        assert_eq!(ports.add_port(&a, Side::Right).unwrap().as_str(), "right-8");
    }

    #[test]
    fn anchor_sits_on_the_side() {
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&shape("a"));
        let bbox = BBox::new(Point::new(0.0, 0.0), Size::new(100.0, 40.0));
        let anchor = ports
            .anchor(&shape("a"), &PortId::from("right-1"), &bbox)
            .unwrap();
        assert_eq!(anchor, Point::new(100.0, 20.0));
    }
}
