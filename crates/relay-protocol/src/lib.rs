//! # relay-protocol
//!
//! Wire protocol for the Relay message relay.
//!
//! Clients and the server exchange [`Frame`]s. Browser clients speak JSON text
//! frames; other clients may use length-prefixed MessagePack binary frames.
//!
//! ## Frame Types
//!
//! - `Broadcast` / `Direct` - Client sends a message to everyone or one session
//! - `Ping` / `Pong` - Keepalive
//! - `Welcome` - Server assigns the session id on connect
//! - `Message` - Server delivers a relayed message
//! - `Error` - Server rejects a request
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Frame};
//!
//! let frame = Frame::broadcast("Hello, world!");
//!
//! let text = codec::encode_text(&frame).unwrap();
//! assert_eq!(text, r#"{"type":"broadcast","content":"Hello, world!"}"#);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{error_codes, Envelope, Frame, FrameType};
