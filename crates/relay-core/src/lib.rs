//! # relay-core
//!
//! Session and delivery core for the Relay message relay.
//!
//! This crate owns everything with real invariants and no I/O:
//!
//! - **ClientRegistry** - Active sessions, their activity time and poll cursor
//! - **MessageStore** - Bounded, append-only message log
//! - **Router** - Resolves the recipients of a message
//! - **DeliveryEngine** - Push fan-out and pull (poll) diffs over the above
//! - **ExpirySweeper** - Periodic eviction of old messages and idle sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────┐     ┌──────────────┐
//! │  Transport  │────▶│ DeliveryEngine │────▶│ MessageStore │
//! └─────────────┘     └────────────────┘     └──────────────┘
//!                        │          │
//!                        ▼          ▼
//!                 ┌──────────┐  ┌────────────────┐
//!                 │  Router  │─▶│ ClientRegistry │
//!                 └──────────┘  └────────────────┘
//!                                      ▲
//!                               ┌──────────────┐
//!                               │ExpirySweeper │
//!                               └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use relay_core::{DeliveryEngine, RelayConfig};
//!
//! let relay = DeliveryEngine::new(RelayConfig::default());
//! let alice = relay.register();
//! let bob = relay.register();
//!
//! relay.send(&alice, None, "hi").unwrap();
//!
//! let inbox = relay.poll(&bob).unwrap();
//! assert_eq!(inbox.len(), 1);
//! assert_eq!(inbox[0].content, "hi");
//! assert!(relay.poll(&bob).unwrap().is_empty());
//! ```

pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod id;
pub mod message;
pub mod registry;
pub mod router;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{ConfigError, RelayConfig};
pub use delivery::{DeliveryEngine, RelayStats, SendReceipt, SweepReport};
pub use error::RelayError;
pub use id::{IdGenerator, MessageId, RandomIds, SequentialIds, SessionId};
pub use message::{Message, OutboundMessage};
pub use registry::{ClientRegistry, Session};
pub use router::Router;
pub use store::MessageStore;
pub use sweeper::ExpirySweeper;
