use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    CANVAS_HEIGHT, CANVAS_WIDTH, GRID_SIZE, HISTORY_CAPACITY, MAX_ELEMENT_SIZE, MAX_ELEMENTS,
    MAX_LINKS, MERGE_WINDOW_MS, MIN_ELEMENT_SIZE, PORTS_PER_SIDE, BBox, Point, Size,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub enabled: bool,
    pub size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: GRID_SIZE,
        }
    }
}

impl GridConfig {
    pub fn snap(&self, point: Point) -> Point {
        if self.enabled {
            crate::snap_point(point, self.size)
        } else {
            point
        }
    }

    pub fn snap_value(&self, value: f32) -> f32 {
        if self.enabled {
            crate::snap_value(value, self.size)
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
        }
    }
}

impl CanvasConfig {
    pub fn bounds(&self) -> BBox {
        BBox::new(Point::new(0.0, 0.0), Size::new(self.width, self.height))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub grid: GridConfig,
    pub canvas: CanvasConfig,
    pub min_size: Size,
    pub max_size: Size,
    pub allow_overlap: bool,
    pub max_elements: usize,
    pub max_links: usize,
    pub ports_per_side: usize,
    pub history_capacity: usize,
    pub merge_window_ms: i64,
    pub capture_snapshots: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            canvas: CanvasConfig::default(),
            min_size: Size::new(MIN_ELEMENT_SIZE, MIN_ELEMENT_SIZE),
            max_size: Size::new(MAX_ELEMENT_SIZE, MAX_ELEMENT_SIZE),
            allow_overlap: true,
            max_elements: MAX_ELEMENTS,
            max_links: MAX_LINKS,
            ports_per_side: PORTS_PER_SIDE,
            history_capacity: HISTORY_CAPACITY,
            merge_window_ms: MERGE_WINDOW_MS,
            capture_snapshots: true,
        }
    }
}

impl EditorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).context("failed to parse editor configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("invalid configuration in '{}'", path.display()))
    }

    /// Defaults overlaid with `OXLINK_*` environment variables. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|raw| raw.trim().parse().ok())
        }

        if let Some(enabled) = parsed::<bool>(&lookup, "OXLINK_GRID_ENABLED") {
            self.grid.enabled = enabled;
        }
        if let Some(size) = parsed::<f32>(&lookup, "OXLINK_GRID_SIZE") {
            self.grid.size = size;
        }
        if let Some(width) = parsed::<f32>(&lookup, "OXLINK_CANVAS_WIDTH") {
            self.canvas.width = width;
        }
        if let Some(height) = parsed::<f32>(&lookup, "OXLINK_CANVAS_HEIGHT") {
            self.canvas.height = height;
        }
        if let Some(allow) = parsed::<bool>(&lookup, "OXLINK_ALLOW_OVERLAP") {
            self.allow_overlap = allow;
        }
        if let Some(max) = parsed::<usize>(&lookup, "OXLINK_MAX_ELEMENTS") {
            self.max_elements = max;
        }
        if let Some(max) = parsed::<usize>(&lookup, "OXLINK_MAX_LINKS") {
            self.max_links = max;
        }
        if let Some(count) = parsed::<usize>(&lookup, "OXLINK_PORTS_PER_SIDE") {
            self.ports_per_side = count;
        }
        if let Some(capacity) = parsed::<usize>(&lookup, "OXLINK_HISTORY_CAPACITY") {
            self.history_capacity = capacity;
        }
        if let Some(window) = parsed::<i64>(&lookup, "OXLINK_MERGE_WINDOW_MS") {
            self.merge_window_ms = window;
        }
        if let Some(capture) = parsed::<bool>(&lookup, "OXLINK_CAPTURE_SNAPSHOTS") {
            self.capture_snapshots = capture;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EditorConfig::from_json_str(r#"{"grid": {"size": 25}, "allow_overlap": false}"#)
            .unwrap();
        assert_eq!(config.grid.size, 25.0);
        assert!(config.grid.enabled);
        assert!(!config.allow_overlap);
        assert_eq!(config.history_capacity, HISTORY_CAPACITY);
    }

    #[test]
    fn env_overrides_apply_and_skip_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OXLINK_GRID_SIZE", "20"),
            ("OXLINK_PORTS_PER_SIDE", "3"),
            ("OXLINK_MAX_LINKS", "not-a-number"),
        ]);
        let config = EditorConfig::default()
            .with_env_overrides(|key| vars.get(key).map(|value| value.to_string()));
        assert_eq!(config.grid.size, 20.0);
        assert_eq!(config.ports_per_side, 3);
        assert_eq!(config.max_links, MAX_LINKS);
    }

    #[test]
    fn disabled_grid_leaves_points_untouched() {
        let grid = GridConfig {
            enabled: false,
            size: 10.0,
        };
        assert_eq!(grid.snap(Point::new(3.0, 7.0)), Point::new(3.0, 7.0));
    }
}
