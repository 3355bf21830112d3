//! The wire format between the browser client and this service.
//!
//! The client sends binary frames (raw audio) and occasional text frames.
//! The server sends binary frames (synthesized audio) and small JSON
//! control frames described by [`ServerMessage`].

use bytes::Bytes;
use serde_json::{Value, json};

/// Close code used when the handshake carries no token.
pub const CLOSE_MISSING_TOKEN: u16 = 4001;
/// Close code used when the handshake token fails verification.
pub const CLOSE_INVALID_TOKEN: u16 = 4002;

/// A frame received from the client, already classified by payload type.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// One chunk of microphone audio to stream upstream.
    AudioChunk(Bytes),
    /// A typed message, answered outside the realtime stream.
    TextMessage(String),
}

/// A JSON control frame sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The student started talking over the tutor; stop playback now.
    Interrupt,
    /// A completed non-realtime turn.
    Turn { transcript: String, agent: String },
    /// A fault the client should surface.
    Error { error: String },
}

impl ServerMessage {
    pub fn payload(&self) -> Value {
        match self {
            ServerMessage::Interrupt => json!({ "type": "interrupt" }),
            ServerMessage::Turn { transcript, agent } => json!({
                "transcript": transcript,
                "agent": agent,
            }),
            ServerMessage::Error { error } => json!({ "error": error }),
        }
    }
}
