//! Render descriptions handed to external visualization surfaces.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Tick;
use crate::geometry::{Bounds, Position};

/// Shape vocabulary understood by the canvas consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Shape {
    #[serde(rename = "circle")]
    Circle,
    #[serde(rename = "arrowHead")]
    ArrowHead,
}

/// How one agent or feature should be drawn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portrayal {
    pub shape: Shape,
    pub filled: bool,
    pub layer: u32,
    pub color: Cow<'static, str>,
    /// Radius for circles, scale for arrow heads.
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// World-space position; replaced by normalized coordinates inside a [`Frame`].
    pub x: f64,
    pub y: f64,
}

impl Portrayal {
    /// Filled circle of radius `size` centred on `at`.
    #[must_use]
    pub fn circle(at: Position, color: impl Into<Cow<'static, str>>, size: f64) -> Self {
        Self {
            shape: Shape::Circle,
            filled: true,
            layer: 1,
            color: color.into(),
            size,
            heading: None,
            x: at.x,
            y: at.y,
        }
    }

    /// Arrow head pointing along `heading`.
    #[must_use]
    pub fn arrow(at: Position, color: impl Into<Cow<'static, str>>, heading: f64) -> Self {
        Self {
            shape: Shape::ArrowHead,
            filled: true,
            layer: 1,
            color: color.into(),
            size: 1.0,
            heading: Some(heading),
            x: at.x,
            y: at.y,
        }
    }

    #[must_use]
    pub fn hollow(mut self) -> Self {
        self.filled = false;
        self
    }

    #[must_use]
    pub fn on_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// Anything that can describe itself to the renderer.
pub trait Portray {
    fn portrayal(&self) -> Portrayal;
}

/// All portrayals of one tick, grouped by layer, with coordinates in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Frame {
    pub tick: Tick,
    pub layers: BTreeMap<u32, Vec<Portrayal>>,
}

impl Frame {
    /// Normalize world-space portrayals against `bounds` and bucket them by layer.
    #[must_use]
    pub fn build(tick: Tick, bounds: &Bounds, portrayals: Vec<Portrayal>) -> Self {
        let mut layers: BTreeMap<u32, Vec<Portrayal>> = BTreeMap::new();
        for mut portrayal in portrayals {
            let (x, y) = bounds.normalize(Position::new(portrayal.x, portrayal.y));
            portrayal.x = x;
            portrayal.y = y;
            layers.entry(portrayal.layer).or_default().push(portrayal);
        }
        Self { tick, layers }
    }

    /// Total number of portrayals across layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.values().all(Vec::is_empty)
    }
}

/// Hex color fading from red to white as `progress` goes from 0 to 1.
#[must_use]
pub fn fading_red(progress: f64) -> String {
    let channel = (255.0 * progress.clamp(0.0, 1.0)) as u8;
    format!("#ff{channel:02x}{channel:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_normalizes_and_groups() {
        let bounds = Bounds::new(200.0, 100.0);
        let frame = Frame::build(
            Tick(3),
            &bounds,
            vec![
                Portrayal::circle(Position::new(100.0, 50.0), "blue", 3.0),
                Portrayal::arrow(Position::new(0.0, 100.0), "red", 1.0).on_layer(3),
            ],
        );
        assert_eq!(frame.len(), 2);
        let fish = &frame.layers[&1][0];
        assert!((fish.x - 0.5).abs() < 1e-12);
        assert!((fish.y - 0.5).abs() < 1e-12);
        let robot = &frame.layers[&3][0];
        assert_eq!(robot.shape, Shape::ArrowHead);
        assert!((robot.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn portrayal_serializes_canvas_vocabulary() {
        let json = serde_json::to_value(
            Portrayal::circle(Position::new(1.0, 2.0), "black", 5.0).hollow(),
        )
        .expect("json");
        assert_eq!(json["shape"], "circle");
        assert_eq!(json["filled"], false);
        assert!(json.get("heading").is_none());
    }

    #[test]
    fn fading_red_spans_palette() {
        assert_eq!(fading_red(0.0), "#ff0000");
        assert_eq!(fading_red(1.0), "#ffffff");
    }
}
