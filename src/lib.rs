//! wa-web-core: client-side core of the WhatsApp Web protocol
//!
//! ## Modules
//!
//! - `binary` - Tag-prefixed binary encoding with the shared token dictionary
//! - `crypto` - Key agreement, session keys, AEAD, signatures
//! - `auth` - QR and phone pairing-code authenticators
//! - `connection` - Connection lifecycle, keep-alive and reconnect
//! - `cache` - In-memory chats, messages and contacts
//! - `store` - Session persistence
//! - `event_bus` - Typed event fan-out
//! - `webhook` - Forwarding events to an HTTP endpoint
//!
//! ```no_run
//! use wa_web_core::{ClientConfig, ConnectionManager, Event};
//!
//! # async fn run() -> wa_web_core::Result<()> {
//! let manager = ConnectionManager::from_config(ClientConfig::default());
//! manager.events().subscribe("qr", |event| {
//!     if let Event::Qr(qr) = event {
//!         println!("scan: {qr}");
//!     }
//! });
//! manager.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod binary;
pub mod cache;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod event_bus;
pub mod media;
pub mod protocol;
pub mod socket;
pub mod store;
pub mod timer;
pub mod types;
pub mod webhook;

pub use auth::normalize_phone_number;
pub use binary::{decode, decode_node, encode, encode_node, Node, Value};
pub use cache::{Chat, Contact, DeliveryStatus, EntityCache, Message, MessageContent, MessageKind};
pub use config::{AuthMethod, ClientConfig};
pub use connection::{ConnectionManager, ConnectionState, MediaUpload, SessionInfo, TextOptions};
pub use error::{Error, Result};
pub use event_bus::{EventBus, SubscriptionId};
pub use media::{MediaRef, MediaUploader};
pub use protocol::ChatAction;
pub use store::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore, UserProfile};
pub use types::{Event, Jid};
pub use webhook::{WebhookConfig, WebhookForwarder};
