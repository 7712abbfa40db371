//! Protocol stanzas and IQ request tracking.
//!
//! Builders turn commands into [`Node`](crate::binary::Node)s; parsers turn
//! inbound nodes into cache entities and events.

mod message;
mod request;
mod stanza;

pub use message::*;
pub use request::*;
pub use stanza::*;
