//! Wire protocol between drawing clients and the relay.
//!
//! Messages are JSON text tagged by `type`:
//! ```json
//! { "type": "init", "history": [ ... ] }
//! { "type": "draw", "action": "start", "x": 10, "y": 10, "color": "#000000", "lineWidth": 5 }
//! { "type": "clear" }
//! ```
//! `init` only ever travels from the relay to a freshly connected client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stroke::StrokeEvent;

/// Errors raised while decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid stroke event: {0}")]
    InvalidStroke(&'static str),
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

/// Messages sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A stroke sub-event to append and broadcast.
    Draw(StrokeEvent),
    /// Wipe the shared history and every canvas.
    Clear,
}

impl ClientMessage {
    /// Parse and validate a client frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(text)?;
        if let ClientMessage::Draw(event) = &msg {
            event.validate()?;
        }
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent by the relay to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full ordered history, sent once as the first message of a connection.
    Init { history: Vec<StrokeEvent> },
    /// A stroke sub-event accepted by the relay (possibly our own echo).
    Draw(StrokeEvent),
    /// The history was wiped.
    Clear,
}

impl ServerMessage {
    /// Parse a relay frame. Live `draw` events are validated; history entries
    /// are checked one by one when they are replayed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(text)?;
        if let ServerMessage::Draw(event) = &msg {
            event.validate()?;
        }
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode a binary frame carrying JSON text.
pub fn text_from_binary(bytes: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::StrokeAction;
    use kurbo::Point;

    #[test]
    fn test_client_draw_parse() {
        let json = r##"{"type":"draw","action":"start","x":10,"y":10,"color":"#000","lineWidth":5}"##;
        match ClientMessage::parse(json).unwrap() {
            ClientMessage::Draw(event) => {
                assert_eq!(event.action, StrokeAction::Start);
                assert_eq!(event.point(), Point::new(10.0, 10.0));
                assert_eq!(event.line_width, 5.0);
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_client_clear_parse() {
        assert_eq!(ClientMessage::parse(r#"{"type":"clear"}"#).unwrap(), ClientMessage::Clear);
    }

    #[test]
    fn test_client_cannot_send_init() {
        assert!(ClientMessage::parse(r#"{"type":"init","history":[]}"#).is_err());
    }

    #[test]
    fn test_client_rejects_garbage() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"type":"wave"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"action":"draw"}"#).is_err());
        assert!(ClientMessage::parse(r##"{"type":"draw","action":"draw","x":1,"y":1,"color":"#000","lineWidth":-1}"##).is_err());
    }

    #[test]
    fn test_client_draw_serialize() {
        let msg = ClientMessage::Draw(StrokeEvent::new(StrokeAction::End, Point::new(1.0, 2.0), "#abcdef", 3.0));
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "draw");
        assert_eq!(json["action"], "end");
        assert_eq!(json["lineWidth"], 3.0);
    }

    #[test]
    fn test_server_init_parse() {
        let json = r##"{"type":"init","history":[{"action":"start","x":1,"y":1,"color":"#000","lineWidth":2}]}"##;
        match ServerMessage::parse(json).unwrap() {
            ServerMessage::Init { history } => {
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].action, StrokeAction::Start);
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_server_init_serialize_empty() {
        let json = ServerMessage::Init { history: Vec::new() }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"init","history":[]}"#);
    }

    #[test]
    fn test_text_from_binary() {
        assert_eq!(text_from_binary(br#"{"type":"clear"}"#).unwrap(), r#"{"type":"clear"}"#);
        assert!(matches!(text_from_binary(&[0xff, 0xfe]), Err(ProtocolError::NotUtf8)));
    }
}
