//! Session persistence.
//!
//! The connection layer only sees the [`SessionStore`] trait; the file and
//! in-memory stores are the two implementations shipped here.

mod credentials;
mod file;
mod memory;
mod traits;

pub use credentials::*;
pub use file::*;
pub use memory::*;
pub use traits::*;
