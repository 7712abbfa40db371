//! Addressing and event types shared across the crate.

mod events;
mod jid;

pub use events::*;
pub use jid::*;
