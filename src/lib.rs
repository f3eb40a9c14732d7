use serde::{Deserialize, Serialize};
use std::fmt;

pub mod command;
pub mod config;
pub mod editor;
pub mod error;
pub mod gesture;
pub mod graph;
pub mod history;
pub mod patterns;
pub mod ports;
pub mod script;
pub mod snapshot;
pub mod synth;
pub mod validation;

pub use command::*;
pub use config::*;
pub use editor::*;
pub use error::*;
pub use gesture::*;
pub use graph::*;
pub use history::*;
pub use patterns::*;
pub use ports::*;
pub use script::*;
pub use snapshot::*;
pub use synth::*;
pub use validation::*;

pub const ELEMENT_WIDTH: f32 = 140.0;
pub const ELEMENT_HEIGHT: f32 = 60.0;
pub const MIN_ELEMENT_SIZE: f32 = 20.0;
pub const MAX_ELEMENT_SIZE: f32 = 2000.0;
pub const CANVAS_WIDTH: f32 = 4000.0;
pub const CANVAS_HEIGHT: f32 = 4000.0;
pub const GRID_SIZE: f32 = 10.0;
pub const PORTS_PER_SIDE: usize = 1;
pub const MAX_ELEMENTS: usize = 1000;
pub const MAX_LINKS: usize = 5000;
pub const HISTORY_CAPACITY: usize = 100;
pub const MERGE_WINDOW_MS: i64 = 500;
pub const LINK_STROKE_WIDTH: f32 = 2.0;
pub const LINK_STROKE_WIDTH_HEAVY: f32 = 3.0;
pub const LINK_STROKE_WIDTH_LIGHT: f32 = 1.5;
pub const LINK_DASH_PATTERN: &str = "6 4";
pub const PARALLEL_PADDING: f32 = 20.0;
pub const FAN_PADDING: f32 = 30.0;
pub const GRID_TIGHT_PADDING: f32 = 10.0;
pub const GRID_WIDE_PADDING: f32 = 25.0;
pub const ELEMENT_KIND_DEFAULT: &str = "rectangle";
pub const LINK_KIND: &str = "link";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(CellId);
string_id!(PortId);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: ELEMENT_WIDTH,
            height: ELEMENT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(position: Point, size: Size) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn union(&self, other: &BBox) -> BBox {
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        BBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// Strict intersection: boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &BBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

pub fn union_bbox<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
    boxes
        .into_iter()
        .fold(None, |acc: Option<BBox>, bbox| match acc {
            Some(current) => Some(current.union(bbox)),
            None => Some(*bbox),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Top, Side::Right, Side::Bottom, Side::Left];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Top => "top",
            Side::Right => "right",
            Side::Bottom => "bottom",
            Side::Left => "left",
        }
    }

    pub fn facing(from: Point, to: Point) -> Side {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx.abs() >= dy.abs() {
            if dx >= 0.0 { Side::Right } else { Side::Left }
        } else if dy >= 0.0 {
            Side::Bottom
        } else {
            Side::Top
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Some(Side::Top),
            "right" => Some(Side::Right),
            "bottom" => Some(Side::Bottom),
            "left" => Some(Side::Left),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn snap_value(value: f32, grid: f32) -> f32 {
    if grid <= 0.0 {
        return value;
    }
    (value / grid).round() * grid
}

pub fn snap_point(point: Point, grid: f32) -> Point {
    Point {
        x: snap_value(point.x, grid),
        y: snap_value(point.y, grid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapping_rounds_to_nearest_grid_line() {
        assert_eq!(snap_point(Point::new(14.0, 16.0), 10.0), Point::new(10.0, 20.0));
        assert_eq!(snap_value(7.3, 0.0), 7.3);
    }

    #[test]
    fn facing_side_follows_dominant_axis() {
        let origin = Point::new(0.0, 0.0);
        assert_eq!(Side::facing(origin, Point::new(100.0, 10.0)), Side::Right);
        assert_eq!(Side::facing(origin, Point::new(-100.0, 10.0)), Side::Left);
        assert_eq!(Side::facing(origin, Point::new(5.0, -80.0)), Side::Top);
        assert_eq!(Side::facing(origin, Point::new(5.0, 80.0)), Side::Bottom);
    }

    #[test]
    fn touching_boxes_do_not_intersect() {
        let a = BBox::new(Point::new(0.0, 0.0), Size::new(10.0, 10.0));
        let b = BBox::new(Point::new(10.0, 0.0), Size::new(10.0, 10.0));
        assert!(!a.intersects(&b));
        let union = a.union(&b);
        assert_eq!(union.width, 20.0);
        assert!(union.contains(&a));
    }
}
