//! Scrawl Core Library
//!
//! Stroke events, the relay wire protocol and the client-side sync adapter
//! for the Scrawl shared drawing board.

pub mod collaboration;
pub mod protocol;
pub mod stroke;
pub mod surface;
pub mod sync;
pub mod tools;

pub use kurbo;

pub use collaboration::SyncAdapter;
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use stroke::{ERASE_COLOR, StrokeAction, StrokeEvent};
pub use surface::{StrokeRenderer, StrokeSurface};
pub use sync::{ConnectionState, PlatformWebSocket, SyncError, SyncEvent, SyncTransport, ws_url_for_origin};
pub use tools::{ToolMode, ToolState};
