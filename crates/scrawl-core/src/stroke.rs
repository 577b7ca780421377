//! Stroke events.
//!
//! A single pen-down gesture is sent as one `start`, any number of `draw`
//! events and one `end`. Each event carries the position of the pen and the
//! style it is drawn with, so a history of events can be replayed onto an
//! empty canvas without any other context.

use kurbo::Point;
use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::ProtocolError;

/// Color used by the eraser. Erasing is drawing in the canvas background color.
pub const ERASE_COLOR: &str = "#ffffff";

/// Phase of a gesture a stroke event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeAction {
    /// Pen went down.
    Start,
    /// Pen moved while down.
    Draw,
    /// Pen was lifted.
    End,
}

/// A single sub-event of a drawing gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeEvent {
    pub action: StrokeAction,
    pub x: f64,
    pub y: f64,
    pub color: String,
    /// Browsers send the width slider's value as a string once it has been
    /// touched, so both numbers and numeric strings are accepted.
    #[serde(deserialize_with = "deserialize_line_width")]
    pub line_width: f64,
}

impl StrokeEvent {
    /// Create a stroke event at `point`.
    pub fn new(action: StrokeAction, point: Point, color: impl Into<String>, line_width: f64) -> Self {
        Self {
            action,
            x: point.x,
            y: point.y,
            color: color.into(),
            line_width,
        }
    }

    /// Position of the pen.
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Whether this event was drawn with the eraser.
    pub fn is_erase(&self) -> bool {
        self.color.eq_ignore_ascii_case(ERASE_COLOR)
    }

    /// Check that the event can be rendered.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ProtocolError::InvalidStroke("coordinates must be finite"));
        }
        if !self.line_width.is_finite() || self.line_width <= 0.0 {
            return Err(ProtocolError::InvalidStroke("line width must be a positive number"));
        }
        if self.color.trim().is_empty() {
            return Err(ProtocolError::InvalidStroke("color must not be empty"));
        }
        Ok(())
    }
}

fn deserialize_line_width<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Width {
        Number(f64),
        Text(String),
    }

    match Width::deserialize(deserializer)? {
        Width::Number(width) => Ok(width),
        Width::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid line width {text:?}: {e}"))),
    }
}
