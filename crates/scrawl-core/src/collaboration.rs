//! Client side of the shared drawing board.
//!
//! [`SyncAdapter`] sits between pointer input, the relay connection and the
//! host's drawing surface. Pointer input is only ever turned into outgoing
//! messages; the canvas is painted exclusively from messages received from
//! the relay, our own echoes included. Every client therefore paints strokes
//! in the single order the relay accepted them, at the cost of one round trip
//! before a stroke shows up.

use kurbo::Point;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::stroke::{StrokeAction, StrokeEvent};
use crate::surface::{StrokeRenderer, StrokeSurface};
use crate::sync::{SyncEvent, SyncTransport};
use crate::tools::ToolState;

/// Bridges local input and remote strokes for one client.
#[derive(Debug, Default)]
pub struct SyncAdapter {
    /// Current tool, color and width.
    tool: ToolState,
    /// Whether the pointer is down.
    painting: bool,
    /// Path state of the canvas fed by remote events.
    renderer: StrokeRenderer,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
}

impl SyncAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(tool: ToolState) -> Self {
        Self {
            tool,
            ..Self::default()
        }
    }

    pub fn tool(&self) -> &ToolState {
        &self.tool
    }

    pub fn tool_mut(&mut self) -> &mut ToolState {
        &mut self.tool
    }

    /// Whether a local gesture is in progress.
    pub fn is_painting(&self) -> bool {
        self.painting
    }

    // --- Local input ---

    /// Pointer pressed: start a gesture.
    pub fn pointer_down(&mut self, point: Point) {
        self.painting = true;
        self.emit(StrokeAction::Start, point);
    }

    /// Pointer moved. Ignored unless a gesture is in progress.
    pub fn pointer_move(&mut self, point: Point) {
        if self.painting {
            self.emit(StrokeAction::Draw, point);
        }
    }

    /// Pointer released. Ignored unless a gesture is in progress.
    pub fn pointer_up(&mut self, point: Point) {
        if self.painting {
            self.painting = false;
            self.emit(StrokeAction::End, point);
        }
    }

    /// Ask the relay to wipe the board. The local canvas is wiped when the
    /// `clear` comes back.
    pub fn request_clear(&mut self) {
        self.queue(&ClientMessage::Clear);
    }

    fn emit(&mut self, action: StrokeAction, point: Point) {
        let event = StrokeEvent::new(action, point, self.tool.stroke_color(), self.tool.line_width());
        self.queue(&ClientMessage::Draw(event));
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match msg.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::error!("Failed to encode outgoing message: {}", e),
        }
    }

    /// Take all pending outgoing messages.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Send every pending message. Messages that cannot be sent are dropped,
    /// since the relay could not have ordered them anyway.
    /// Returns how many were sent.
    pub fn flush<T: SyncTransport + ?Sized>(&mut self, transport: &T) -> usize {
        let mut sent = 0;
        for msg in self.take_outgoing() {
            match transport.send(&msg) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("Dropping outgoing message: {}", e),
            }
        }
        sent
    }

    // --- Remote input ---

    /// Apply a message from the relay to the surface.
    pub fn handle_message<S: StrokeSurface + ?Sized>(&mut self, msg: &ServerMessage, surface: &mut S) {
        match msg {
            ServerMessage::Init { history } => self.replay(history, surface),
            ServerMessage::Draw(event) => self.renderer.render(surface, event),
            ServerMessage::Clear => self.renderer.clear(surface),
        }
    }

    /// Wipe the surface and paint `history` in order, exactly as if every
    /// event had arrived live.
    pub fn replay<S: StrokeSurface + ?Sized>(&mut self, history: &[StrokeEvent], surface: &mut S) {
        log::info!("Replaying {} stroke events", history.len());
        self.renderer.clear(surface);
        for event in history {
            match event.validate() {
                Ok(()) => self.renderer.render(surface, event),
                Err(e) => log::warn!("Skipping history entry: {}", e),
            }
        }
    }

    /// React to a transport event.
    pub fn handle_event<S: StrokeSurface + ?Sized>(&mut self, event: &SyncEvent, surface: &mut S) {
        match event {
            // The relay pushes `init` on its own.
            SyncEvent::Connected => log::info!("Connected to relay"),
            SyncEvent::Message(msg) => self.handle_message(msg, surface),
            SyncEvent::Disconnected => {
                log::info!("Disconnected from relay, keeping canvas as is");
                self.painting = false;
            }
            SyncEvent::Error { message } => log::error!("Relay connection error: {}", message),
        }
    }

    /// One frame of work: apply everything received, then send everything
    /// queued.
    pub fn pump<T, S>(&mut self, transport: &mut T, surface: &mut S)
    where
        T: SyncTransport + ?Sized,
        S: StrokeSurface + ?Sized,
    {
        for event in transport.poll_events() {
            self.handle_event(&event, surface);
        }
        self.flush(&*transport);
    }
}
