//! Drawing tool state.

use serde::{Deserialize, Serialize};

use crate::stroke::ERASE_COLOR;

/// Default pen color.
pub const DEFAULT_COLOR: &str = "#000000";

/// Default line width.
pub const DEFAULT_LINE_WIDTH: f64 = 5.0;

/// Which tool the pointer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ToolMode {
    #[default]
    Pen,
    Eraser,
}

/// Current tool, color and width of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolState {
    mode: ToolMode,
    /// Pen color. Kept while erasing so switching back restores it.
    color: String,
    line_width: f64,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            mode: ToolMode::Pen,
            color: DEFAULT_COLOR.to_string(),
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

impl ToolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub fn select_pen(&mut self) {
        self.mode = ToolMode::Pen;
    }

    pub fn select_eraser(&mut self) {
        self.mode = ToolMode::Eraser;
    }

    /// The user-selected pen color.
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
    }

    pub fn line_width(&self) -> f64 {
        self.line_width
    }

    /// Set the line width. Non-positive or non-finite widths are ignored.
    pub fn set_line_width(&mut self, width: f64) {
        if width.is_finite() && width > 0.0 {
            self.line_width = width;
        } else {
            log::warn!("Ignoring invalid line width {}", width);
        }
    }

    /// Color strokes are actually drawn with.
    pub fn stroke_color(&self) -> &str {
        match self.mode {
            ToolMode::Pen => &self.color,
            ToolMode::Eraser => ERASE_COLOR,
        }
    }
}
