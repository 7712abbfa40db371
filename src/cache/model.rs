//! Entities held by the cache.

use serde::{Deserialize, Serialize};

use crate::media::MediaRef;
use crate::types::Jid;

/// Kind of chat, derived from the JID server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Dm,
    Group,
    Broadcast,
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Jid,
    pub name: Option<String>,
    pub kind: ChatKind,
    /// Unix seconds of the newest activity.
    pub last_activity: i64,
    pub unread_count: u32,
    /// Id of the newest message.
    pub last_message: Option<String>,
    pub participants: Option<Vec<Jid>>,
    pub admins: Option<Vec<Jid>>,
    pub description: Option<String>,
    pub archived: bool,
    pub pinned: bool,
    pub muted: bool,
}

impl Chat {
    /// Minimal chat created on first reference.
    pub fn placeholder(id: Jid) -> Self {
        Self {
            kind: id.chat_kind(),
            id,
            name: None,
            last_activity: 0,
            unread_count: 0,
            last_message: None,
            participants: None,
            admins: None,
            description: None,
            archived: false,
            pinned: false,
            muted: false,
        }
    }
}

/// Partial chat state. `None` fields are left untouched when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdate {
    pub id: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Jid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admins: Option<Vec<Jid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

impl ChatUpdate {
    pub fn new(id: Jid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Structural kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Reaction,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
            MessageKind::Location => "location",
            MessageKind::Contact => "contact",
            MessageKind::Reaction => "reaction",
            MessageKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "document" => MessageKind::Document,
            "sticker" => MessageKind::Sticker,
            "location" => MessageKind::Location,
            "contact" => MessageKind::Contact,
            "reaction" => MessageKind::Reaction,
            _ => MessageKind::Unknown,
        }
    }

    /// Kinds whose payload is an uploaded blob.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageKind::Image
                | MessageKind::Video
                | MessageKind::Audio
                | MessageKind::Document
                | MessageKind::Sticker
        )
    }
}

/// Structural content of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    Text {
        body: String,
    },
    #[serde(rename_all = "camelCase")]
    Media {
        media: MediaRef,
        mime_type: String,
        caption: Option<String>,
        file_name: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Contact {
        display_name: String,
        vcard: String,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        target_id: String,
        emoji: String,
    },
    Empty,
}

/// Delivery progress of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Played,
    Error,
}

impl DeliveryStatus {
    fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            DeliveryStatus::Played => 4,
            DeliveryStatus::Error => 5,
        }
    }

    /// Status after applying `next`: progress never moves backwards.
    pub fn advance(self, next: DeliveryStatus) -> DeliveryStatus {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }

    /// Status named by a receipt `type` attribute. A receipt without a type is a delivery.
    pub fn from_receipt(kind: Option<&str>) -> Option<DeliveryStatus> {
        match kind {
            None | Some("delivery") => Some(DeliveryStatus::Delivered),
            Some("read") | Some("read-self") => Some(DeliveryStatus::Read),
            Some("played") | Some("played-self") => Some(DeliveryStatus::Played),
            Some("sender") | Some("server") => Some(DeliveryStatus::Sent),
            Some("error") => Some(DeliveryStatus::Error),
            _ => None,
        }
    }
}

/// One sender's reaction to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub from: Jid,
    pub emoji: String,
    pub timestamp: i64,
}

/// A message, sent or received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from_me: bool,
    /// Unix seconds.
    pub timestamp: i64,
    pub chat_id: Jid,
    pub sender_id: Jid,
    pub kind: MessageKind,
    pub content: MessageContent,
    #[serde(default)]
    pub quoted_message: Option<String>,
    #[serde(default)]
    pub mentions: Vec<Jid>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    /// Text body or media caption.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { body } => Some(body),
            MessageContent::Media { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }
}

/// A known contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Jid,
    pub name: Option<String>,
    pub phone: String,
    pub is_online: bool,
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub blocked: bool,
}

impl Contact {
    /// Minimal contact for a JID; the phone is the JID user part.
    pub fn placeholder(id: Jid) -> Self {
        Self {
            phone: id.user.clone(),
            id,
            name: None,
            is_online: false,
            last_seen: None,
            status: None,
            blocked: false,
        }
    }
}

/// Presence change for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Jid,
    pub is_online: bool,
    pub last_seen: Option<i64>,
}

/// Group membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantAction::Add => "add",
            ParticipantAction::Remove => "remove",
            ParticipantAction::Promote => "promote",
            ParticipantAction::Demote => "demote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(ParticipantAction::Add),
            "remove" | "leave" => Some(ParticipantAction::Remove),
            "promote" => Some(ParticipantAction::Promote),
            "demote" => Some(ParticipantAction::Demote),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_regresses() {
        let s = DeliveryStatus::Pending.advance(DeliveryStatus::Read);
        assert_eq!(s, DeliveryStatus::Read);
        assert_eq!(s.advance(DeliveryStatus::Delivered), DeliveryStatus::Read);
        assert_eq!(s.advance(DeliveryStatus::Played), DeliveryStatus::Played);
    }

    #[test]
    fn test_receipt_types() {
        assert_eq!(DeliveryStatus::from_receipt(None), Some(DeliveryStatus::Delivered));
        assert_eq!(DeliveryStatus::from_receipt(Some("read")), Some(DeliveryStatus::Read));
        assert_eq!(DeliveryStatus::from_receipt(Some("retry")), None);
    }

    #[test]
    fn test_placeholder_chat_kind() {
        let chat = Chat::placeholder("120363-99@g.us".parse().unwrap());
        assert_eq!(chat.kind, ChatKind::Group);
        assert_eq!(chat.unread_count, 0);
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message {
            id: "ABC".into(),
            from_me: false,
            timestamp: 10,
            chat_id: "1555@s.whatsapp.net".parse().unwrap(),
            sender_id: "1555@s.whatsapp.net".parse().unwrap(),
            kind: MessageKind::Text,
            content: MessageContent::Text { body: "hi".into() },
            quoted_message: None,
            mentions: vec![],
            reactions: vec![],
            delivery_status: DeliveryStatus::Delivered,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["chatId"], "1555@s.whatsapp.net");
        assert_eq!(json["content"]["type"], "text");
        assert_eq!(json["deliveryStatus"], "delivered");
        assert_eq!(msg.text(), Some("hi"));
    }
}
