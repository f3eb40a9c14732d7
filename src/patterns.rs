use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::{
    Endpoint, FAN_PADDING, GRID_TIGHT_PADDING, GRID_WIDE_PADDING, LINK_DASH_PATTERN,
    LINK_STROKE_WIDTH, LINK_STROKE_WIDTH_HEAVY, LINK_STROKE_WIDTH_LIGHT, PARALLEL_PADDING,
    PortRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Single,
    Parallel,
    Fan,
    Grid,
}

impl Default for PatternKind {
    fn default() -> Self {
        PatternKind::Single
    }
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        PatternKind::Single,
        PatternKind::Parallel,
        PatternKind::Fan,
        PatternKind::Grid,
    ];

    pub fn from_mode(mode: u8) -> Option<PatternKind> {
        match mode {
            1 => Some(PatternKind::Single),
            2 => Some(PatternKind::Parallel),
            3 => Some(PatternKind::Fan),
            4 => Some(PatternKind::Grid),
            _ => None,
        }
    }

    pub fn mode(self) -> u8 {
        match self {
            PatternKind::Single => 1,
            PatternKind::Parallel => 2,
            PatternKind::Fan => 3,
            PatternKind::Grid => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatternKind::Single => "single",
            PatternKind::Parallel => "parallel",
            PatternKind::Fan => "fan",
            PatternKind::Grid => "grid",
        }
    }

    pub fn parse(value: &str) -> Option<PatternKind> {
        let trimmed = value.trim();
        if let Ok(mode) = trimmed.parse::<u8>() {
            return PatternKind::from_mode(mode);
        }
        PatternKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
    }

    pub fn max_connections(self) -> usize {
        self.mode() as usize
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Router {
    Normal,
    Manhattan,
    Orthogonal,
}

impl Router {
    pub fn as_str(self) -> &'static str {
        match self {
            Router::Normal => "normal",
            Router::Manhattan => "manhattan",
            Router::Orthogonal => "orthogonal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub router: Router,
    pub padding: f32,
}

impl Routing {
    pub fn direct() -> Self {
        Self {
            router: Router::Normal,
            padding: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStyle {
    pub stroke_width: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash: Option<String>,
}

impl Default for LinkStyle {
    fn default() -> Self {
        Self {
            stroke_width: LINK_STROKE_WIDTH,
            dash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    pub source: PortRef,
    pub target: PortRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub pattern: PatternKind,
    pub lane: usize,
    pub source: Endpoint,
    pub target: Endpoint,
    pub routing: Routing,
    pub style: LinkStyle,
}

impl LinkSpec {
    pub fn attrs(&self) -> serde_json::Value {
        let mut attrs = json!({
            "pattern": self.pattern.name(),
            "lane": self.lane,
            "router": self.routing.router.as_str(),
            "padding": self.routing.padding,
            "strokeWidth": self.style.stroke_width,
        });
        if let Some(dash) = &self.style.dash {
            attrs["strokeDasharray"] = json!(dash);
        }
        attrs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternOptions {
    pub padding_scale: f32,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self { padding_scale: 1.0 }
    }
}

pub trait ConnectionPattern {
    fn kind(&self) -> PatternKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn max_connections(&self) -> usize {
        self.kind().max_connections()
    }

    fn routing(&self, lane: usize) -> Routing;

    fn style(&self, lane: usize) -> LinkStyle;

    /// Pure: lane `i` uses `pairs[i]`; pairs beyond the pattern's capacity are ignored.
    fn generate(&self, pairs: &[PortPair], options: &PatternOptions) -> Vec<LinkSpec> {
        pairs
            .iter()
            .take(self.max_connections())
            .enumerate()
            .map(|(lane, pair)| {
                let mut routing = self.routing(lane);
                routing.padding *= options.padding_scale;
                LinkSpec {
                    pattern: self.kind(),
                    lane,
                    source: Endpoint::at_port(pair.source.shape.clone(), pair.source.port.clone()),
                    target: Endpoint::at_port(pair.target.shape.clone(), pair.target.port.clone()),
                    routing,
                    style: self.style(lane),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePattern;

impl ConnectionPattern for SinglePattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Single
    }

    fn routing(&self, _lane: usize) -> Routing {
        Routing::direct()
    }

    fn style(&self, _lane: usize) -> LinkStyle {
        LinkStyle::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelPattern;

impl ConnectionPattern for ParallelPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Parallel
    }

    fn routing(&self, lane: usize) -> Routing {
        let sign = if lane % 2 == 0 { 1.0 } else { -1.0 };
        Routing {
            router: Router::Normal,
            padding: sign * PARALLEL_PADDING,
        }
    }

    fn style(&self, _lane: usize) -> LinkStyle {
        LinkStyle::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FanPattern;

impl ConnectionPattern for FanPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Fan
    }

    fn routing(&self, lane: usize) -> Routing {
        match lane {
            0 => Routing::direct(),
            1 => Routing {
                router: Router::Normal,
                padding: FAN_PADDING,
            },
            _ => Routing {
                router: Router::Normal,
                padding: -FAN_PADDING,
            },
        }
    }

    fn style(&self, lane: usize) -> LinkStyle {
        LinkStyle {
            stroke_width: if lane == 0 {
                LINK_STROKE_WIDTH_HEAVY
            } else {
                LINK_STROKE_WIDTH
            },
            dash: None,
        }
    }
}

/// Lanes 0-1 are manhattan-routed close in; lanes 2-3 go orthogonal further out, thinner
/// and dashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridPattern;

impl ConnectionPattern for GridPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Grid
    }

    fn routing(&self, lane: usize) -> Routing {
        let sign = if lane % 2 == 0 { 1.0 } else { -1.0 };
        if lane < 2 {
            Routing {
                router: Router::Manhattan,
                padding: sign * GRID_TIGHT_PADDING,
            }
        } else {
            Routing {
                router: Router::Orthogonal,
                padding: sign * GRID_WIDE_PADDING,
            }
        }
    }

    fn style(&self, lane: usize) -> LinkStyle {
        if lane < 2 {
            LinkStyle::default()
        } else {
            LinkStyle {
                stroke_width: LINK_STROKE_WIDTH_LIGHT,
                dash: Some(LINK_DASH_PATTERN.to_string()),
            }
        }
    }
}

pub fn builtin_pattern(kind: PatternKind) -> Box<dyn ConnectionPattern> {
    match kind {
        PatternKind::Single => Box::new(SinglePattern),
        PatternKind::Parallel => Box::new(ParallelPattern),
        PatternKind::Fan => Box::new(FanPattern),
        PatternKind::Grid => Box::new(GridPattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellId, PortId, Side};

    fn pair(index: usize) -> PortPair {
        PortPair {
            source: PortRef {
                side: Side::Right,
                index,
                shape: CellId::from("a"),
                port: PortId::new(format!("right-{index}")),
            },
            target: PortRef {
                side: Side::Left,
                index,
                shape: CellId::from("b"),
                port: PortId::new(format!("left-{index}")),
            },
        }
    }

    #[test]
    fn modes_map_to_names() {
        assert_eq!(PatternKind::from_mode(3), Some(PatternKind::Fan));
        assert_eq!(PatternKind::from_mode(0), None);
        assert_eq!(PatternKind::parse("grid"), Some(PatternKind::Grid));
        assert_eq!(PatternKind::parse("2"), Some(PatternKind::Parallel));
    }

    #[test]
    fn parallel_pads_symmetrically() {
        let specs = ParallelPattern.generate(&[pair(0), pair(1)], &PatternOptions::default());
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].routing.padding, -specs[1].routing.padding);
    }

    #[test]
    fn fan_centre_lane_is_heaviest() {
        let specs = FanPattern.generate(&[pair(0), pair(1), pair(2)], &PatternOptions::default());
        assert_eq!(specs[0].routing.padding, 0.0);
        assert!(specs[0].style.stroke_width > specs[1].style.stroke_width);
        assert!(specs[0].style.stroke_width > specs[2].style.stroke_width);
    }

    #[test]
    fn grid_splits_routers_and_styles() {
        let pairs: Vec<PortPair> = (0..4).map(pair).collect();
        let specs = GridPattern.generate(&pairs, &PatternOptions::default());
        let routers: Vec<Router> = specs.iter().map(|spec| spec.routing.router).collect();
        assert_eq!(
            routers,
            vec![Router::Manhattan, Router::Manhattan, Router::Orthogonal, Router::Orthogonal]
        );
        assert!(specs[2].style.dash.is_some());
        assert!(specs[0].routing.padding.abs() < specs[2].routing.padding.abs());
    }

    #[test]
    fn extra_pairs_are_ignored_and_options_scale_padding() {
        let pairs: Vec<PortPair> = (0..4).map(pair).collect();
        let specs = ParallelPattern.generate(&pairs, &PatternOptions { padding_scale: 2.0 });
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].routing.padding, PARALLEL_PADDING * 2.0);
    }

    #[test]
    fn attrs_carry_routing_and_dash() {
        let pairs: Vec<PortPair> = (0..4).map(pair).collect();
        let specs = GridPattern.generate(&pairs, &PatternOptions::default());
        let attrs = specs[3].attrs();
        assert_eq!(attrs["router"], "orthogonal");
        assert_eq!(attrs["strokeDasharray"], LINK_DASH_PATTERN);
    }
}
