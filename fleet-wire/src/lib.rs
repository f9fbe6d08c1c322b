//! Wire-level types shared by the fleet router and every agent client.
//!
//! This crate has no opinion about process topology or coordination policy — it only
//! defines the envelope that agents exchange (`envelope`), channel membership (`channel`),
//! the fixed set of control frames that ride over a TCP connection to the router
//! (`frame`), and the length-prefixed JSON codec used to read and write them (`codec`).
//!
//! # Example
//!
//! ```
//! use fleet_wire::{Envelope, EventType};
//!
//! let mut envelope = Envelope::new(EventType::Message)
//!     .with_source("alice")
//!     .with_destination("bob")
//!     .with_content("hello");
//! envelope.ensure_stamped();
//! assert!(envelope.message_id.is_some());
//! ```

pub mod channel;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod ids;

pub use channel::Channel;
pub use envelope::{Action, Envelope, EventType, Observation};
pub use error::{WireError, WireResult};
pub use frame::{Frame, MsgType};
pub use ids::{AgentId, MessageId};
