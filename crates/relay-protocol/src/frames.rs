//! Frame types for the Relay protocol.
//!
//! Frames are tagged by a `"type"` field. JSON field names are camelCase to
//! match what browser clients send and expect.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The frame could not be decoded or is not valid from a client.
    pub const BAD_FRAME: u16 = 4000;
    /// The session is unknown or expired; the client must reconnect.
    pub const SESSION_NOT_FOUND: u16 = 4001;
    /// The message was rejected (e.g. empty content).
    pub const INVALID_MESSAGE: u16 = 4002;
    /// The session is bound to another delivery mode.
    pub const DELIVERY_MODE_CONFLICT: u16 = 4009;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Broadcast,
    Direct,
    Ping,
    Welcome,
    Message,
    Pong,
    Error,
}

impl FrameType {
    /// The `"type"` tag on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Broadcast => "broadcast",
            FrameType::Direct => "direct",
            FrameType::Ping => "ping",
            FrameType::Welcome => "welcome",
            FrameType::Message => "message",
            FrameType::Pong => "pong",
            FrameType::Error => "error",
        }
    }

    /// Whether clients are allowed to send this frame.
    #[must_use]
    pub fn is_client_frame(self) -> bool {
        matches!(
            self,
            FrameType::Broadcast | FrameType::Direct | FrameType::Ping
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relayed message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message identifier.
    pub id: String,
    /// Sender session id.
    pub from: String,
    /// Recipient session id; absent for broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Text content.
    pub content: String,
    /// When the relay accepted the message, in ms since the Unix epoch.
    pub timestamp: u64,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Send a message to every other session.
    Broadcast {
        /// Text content.
        content: String,
    },

    /// Send a message to a single session.
    Direct {
        /// Recipient session id.
        to: String,
        /// Text content.
        content: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional client timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Sent once when a push channel opens.
    Welcome {
        /// The session id assigned to this connection.
        #[serde(rename = "clientId")]
        client_id: String,
        /// Server time.
        timestamp: u64,
    },

    /// A relayed message.
    Message(Envelope),

    /// Keepalive response.
    Pong {
        /// Server time.
        timestamp: u64,
    },

    /// Error response.
    Error {
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Broadcast { .. } => FrameType::Broadcast,
            Frame::Direct { .. } => FrameType::Direct,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Welcome { .. } => FrameType::Welcome,
            Frame::Message(_) => FrameType::Message,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Broadcast frame.
    #[must_use]
    pub fn broadcast(content: impl Into<String>) -> Self {
        Frame::Broadcast {
            content: content.into(),
        }
    }

    /// Create a new Direct frame.
    #[must_use]
    pub fn direct(to: impl Into<String>, content: impl Into<String>) -> Self {
        Frame::Direct {
            to: to.into(),
            content: content.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Welcome frame.
    #[must_use]
    pub fn welcome(client_id: impl Into<String>, timestamp: u64) -> Self {
        Frame::Welcome {
            client_id: client_id.into(),
            timestamp,
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: u64) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}
