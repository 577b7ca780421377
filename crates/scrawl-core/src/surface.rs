//! Rendering surface abstraction.
//!
//! Pixel output is owned by the host (an HTML canvas, a vello scene, an
//! image buffer). The sync adapter only needs the path primitives of a 2D
//! canvas context, expressed by [`StrokeSurface`].

use kurbo::Point;

use crate::stroke::{StrokeAction, StrokeEvent};

/// Path and stroke primitives of a 2D drawing surface.
pub trait StrokeSurface {
    /// Set the color and width used by the next [`stroke`](Self::stroke).
    fn set_stroke_style(&mut self, color: &str, width: f64);
    /// Discard the current path and start an empty one.
    fn begin_path(&mut self);
    /// Start a new sub-path at `point`.
    fn move_to(&mut self, point: Point);
    /// Add a straight segment from the current point to `point`.
    fn line_to(&mut self, point: Point);
    /// Paint the current path with the current stroke style.
    fn stroke(&mut self);
    /// Wipe every pixel.
    fn clear(&mut self);
}

/// Replays stroke events onto a [`StrokeSurface`].
///
/// Keeps track of whether a path is open so gestures that arrive without
/// their `start` still render as a best-effort partial stroke.
#[derive(Debug, Default)]
pub struct StrokeRenderer {
    pen: Option<Point>,
}

impl StrokeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a path is currently open.
    pub fn is_pen_down(&self) -> bool {
        self.pen.is_some()
    }

    /// Render a single event.
    pub fn render<S: StrokeSurface + ?Sized>(&mut self, surface: &mut S, event: &StrokeEvent) {
        let point = event.point();
        surface.set_stroke_style(&event.color, event.line_width);

        match event.action {
            StrokeAction::Start => {
                surface.begin_path();
                surface.move_to(point);
                self.pen = Some(point);
            }
            StrokeAction::Draw => {
                if self.pen.is_some() {
                    surface.line_to(point);
                    surface.stroke();
                } else {
                    log::debug!("draw without start at ({}, {}), opening path", point.x, point.y);
                    surface.begin_path();
                    surface.move_to(point);
                }
                self.pen = Some(point);
            }
            StrokeAction::End => {
                if self.pen.is_some() {
                    surface.stroke();
                }
                surface.begin_path();
                self.pen = None;
            }
        }
    }

    /// Wipe the surface and forget any open path.
    pub fn clear<S: StrokeSurface + ?Sized>(&mut self, surface: &mut S) {
        surface.clear();
        self.pen = None;
    }
}
