//! Domain events published on the [`EventBus`](crate::EventBus).

use serde::Serialize;
use serde_json::json;

use crate::cache::{Chat, Message, ParticipantAction, PresenceUpdate};
use crate::connection::ConnectionState;
use crate::store::UserProfile;
use crate::types::Jid;

/// Connection state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionUpdate {
    pub from: ConnectionState,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Group membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipants {
    pub group_id: Jid,
    pub action: ParticipantAction,
    pub participants: Vec<Jid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Jid>,
}

/// All events a client can publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// New QR string to display
    Qr(String),
    QrExpired,
    /// Caller should regenerate the QR
    QrRefreshNeeded,
    PairingCode { code: String },
    PairingCodeExpired,
    AuthSuccess { user: UserProfile },
    AuthFailure { error: String },
    ConnectionUpdate(ConnectionUpdate),
    /// Reconnect attempts exhausted
    ConnectionFailed,
    MessageNew(Message),
    MessageSent(Message),
    MessageUpdate(Message),
    MessageDelete { message_id: String, chat_id: Jid },
    MessageReaction { message_id: String, emoji: String, from: Jid },
    ChatUpdate(Chat),
    GroupCreated(Chat),
    GroupParticipantsAdd(GroupParticipants),
    GroupParticipantsRemove(GroupParticipants),
    /// Admin rights changed
    GroupParticipantsUpdate(GroupParticipants),
    PresenceUpdate(PresenceUpdate),
    Disconnected,
}

impl Event {
    /// Every name returned by [`Event::name`].
    pub const NAMES: &'static [&'static str] = &[
        "qr",
        "qr_expired",
        "qr_refresh_needed",
        "pairing_code",
        "pairing_code_expired",
        "auth.success",
        "auth.failure",
        "connection.update",
        "connection.failed",
        "message.new",
        "message.sent",
        "message.update",
        "message.delete",
        "message.reaction",
        "chat.update",
        "group.created",
        "group.participants.add",
        "group.participants.remove",
        "group.participants.update",
        "presence.update",
        "disconnected",
    ];

    /// Dotted event name used for subscriptions and webhook filters.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Qr(_) => "qr",
            Event::QrExpired => "qr_expired",
            Event::QrRefreshNeeded => "qr_refresh_needed",
            Event::PairingCode { .. } => "pairing_code",
            Event::PairingCodeExpired => "pairing_code_expired",
            Event::AuthSuccess { .. } => "auth.success",
            Event::AuthFailure { .. } => "auth.failure",
            Event::ConnectionUpdate(_) => "connection.update",
            Event::ConnectionFailed => "connection.failed",
            Event::MessageNew(_) => "message.new",
            Event::MessageSent(_) => "message.sent",
            Event::MessageUpdate(_) => "message.update",
            Event::MessageDelete { .. } => "message.delete",
            Event::MessageReaction { .. } => "message.reaction",
            Event::ChatUpdate(_) => "chat.update",
            Event::GroupCreated(_) => "group.created",
            Event::GroupParticipantsAdd(_) => "group.participants.add",
            Event::GroupParticipantsRemove(_) => "group.participants.remove",
            Event::GroupParticipantsUpdate(_) => "group.participants.update",
            Event::PresenceUpdate(_) => "presence.update",
            Event::Disconnected => "disconnected",
        }
    }

    /// JSON payload of the event.
    pub fn data(&self) -> serde_json::Value {
        match self {
            Event::Qr(qr) => json!(qr),
            Event::QrExpired
            | Event::QrRefreshNeeded
            | Event::PairingCodeExpired
            | Event::ConnectionFailed
            | Event::Disconnected => serde_json::Value::Null,
            Event::PairingCode { code } => json!({ "code": code }),
            Event::AuthSuccess { user } => json!({ "user": user }),
            Event::AuthFailure { error } => json!({ "error": error }),
            Event::ConnectionUpdate(update) => json!(update),
            Event::MessageNew(m) | Event::MessageSent(m) | Event::MessageUpdate(m) => json!(m),
            Event::MessageDelete { message_id, chat_id } => {
                json!({ "messageId": message_id, "chatId": chat_id })
            }
            Event::MessageReaction { message_id, emoji, from } => {
                json!({ "messageId": message_id, "emoji": emoji, "from": from })
            }
            Event::ChatUpdate(chat) | Event::GroupCreated(chat) => json!(chat),
            Event::GroupParticipantsAdd(g)
            | Event::GroupParticipantsRemove(g)
            | Event::GroupParticipantsUpdate(g) => json!(g),
            Event::PresenceUpdate(p) => json!(p),
        }
    }
}
