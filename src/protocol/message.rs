//! Message stanzas.
//!
//! Builds outbound `message` and `receipt` nodes and parses inbound ones into
//! cache entities.

use chrono::Utc;
use rand::Rng;

use crate::binary::Node;
use crate::cache::{DeliveryStatus, Message, MessageContent, MessageKind};
use crate::media::MediaRef;
use crate::types::Jid;

/// Generate a unique message ID.
pub fn generate_message_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    format!("3EB0{}", hex::encode_upper(bytes))
}

fn text_child(tag: &str, text: &str) -> Node {
    Node::new(tag).bytes(text.as_bytes().to_vec())
}

/// Build the stanza carrying `message` to its chat.
pub fn build_message(message: &Message) -> Node {
    let mut node = Node::new("message")
        .attr("id", message.id.as_str())
        .attr("to", message.chat_id.to_string())
        .attr("t", message.timestamp.to_string());

    match &message.content {
        MessageContent::Text { body } => {
            node.set_attr("type", "text");
            node.add_child(text_child("body", body));
        }
        MessageContent::Media {
            media,
            mime_type,
            caption,
            file_name,
        } => {
            node.set_attr("type", "media");
            node.set_attr("mediatype", message.kind.as_str());
            let mut media_node = Node::new("media")
                .attr("url", media.url.as_str())
                .attr("directPath", media.direct_path.as_str())
                .attr("mediaKey", media.media_key.as_str())
                .attr("sha256", media.sha256.as_str())
                .attr("length", media.length.to_string())
                .attr("mimetype", mime_type.as_str());
            if let Some(name) = file_name {
                media_node.set_attr("filename", name.as_str());
            }
            node.add_child(media_node);
            if let Some(caption) = caption {
                node.add_child(text_child("caption", caption));
            }
        }
        MessageContent::Location {
            latitude,
            longitude,
            name,
        } => {
            node.set_attr("type", "location");
            let mut location = Node::new("location")
                .attr("lat", latitude.to_string())
                .attr("lng", longitude.to_string());
            if let Some(name) = name {
                location.set_attr("name", name.as_str());
            }
            node.add_child(location);
        }
        MessageContent::Contact { display_name, vcard } => {
            node.set_attr("type", "contact");
            node.add_child(Node::new("contact").attr("name", display_name.as_str()).bytes(vcard.as_bytes().to_vec()));
        }
        MessageContent::Reaction { target_id, emoji } => {
            node.set_attr("type", "reaction");
            node.add_child(Node::new("reaction").attr("id", target_id.as_str()).attr("emoji", emoji.as_str()));
        }
        MessageContent::Empty => node.set_attr("type", "text"),
    }

    if let Some(quoted) = &message.quoted_message {
        node.add_child(Node::new("quote").attr("id", quoted.as_str()));
    }
    for jid in &message.mentions {
        node.add_child(Node::new("mention").attr("jid", jid.to_string()));
    }
    node
}

/// Build a reaction to `target_id`. An empty emoji removes the reaction.
pub fn build_reaction(id: &str, chat: &Jid, target_id: &str, emoji: &str) -> Node {
    Node::new("message")
        .attr("id", id)
        .attr("to", chat.to_string())
        .attr("type", "reaction")
        .attr("t", Utc::now().timestamp().to_string())
        .child(Node::new("reaction").attr("id", target_id).attr("emoji", emoji))
}

/// Build a revoke ("delete for everyone") of `target_id`.
pub fn build_revoke(id: &str, chat: &Jid, target_id: &str) -> Node {
    Node::new("message")
        .attr("id", id)
        .attr("to", chat.to_string())
        .attr("type", "protocol")
        .child(Node::new("revoke").attr("id", target_id))
}

/// Build a receipt node.
pub fn build_receipt(to: &Jid, message_ids: &[String], receipt_type: &str) -> Node {
    let mut node = Node::new("receipt")
        .attr("to", to.to_string())
        .attr("type", receipt_type);
    for id in message_ids {
        node.add_child(Node::new("item").attr("id", id.as_str()));
    }
    node
}

/// Build a read receipt node.
pub fn build_read_receipt(to: &Jid, message_ids: &[String]) -> Node {
    build_receipt(to, message_ids, "read")
}

/// An inbound `message` stanza.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageStanza {
    Message(Message),
    Reaction {
        chat: Jid,
        from: Jid,
        target_id: String,
        emoji: String,
        timestamp: i64,
    },
    Revoke {
        chat: Jid,
        from: Jid,
        target_id: String,
    },
}

fn child_text(node: &Node, tag: &str) -> Option<String> {
    node.get_child_by_tag(tag)
        .and_then(Node::get_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

/// Parse a message node. `own` is the logged-in user, used to tell own
/// messages echoed from the phone apart from inbound ones.
pub fn parse_message(node: &Node, own: Option<&Jid>) -> Option<MessageStanza> {
    if node.tag != "message" {
        return None;
    }

    let id = node.get_attr("id")?.to_string();
    let chat: Jid = node.get_attr("from")?.parse().ok()?;
    let sender = if chat.is_group() || chat.is_broadcast_list() {
        node.get_attr("participant")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| chat.clone())
    } else {
        chat.clone()
    };
    let timestamp = node.get_attr_int("t").unwrap_or_else(|| Utc::now().timestamp());
    let from_me = node.get_attr("fromMe") == Some("true")
        || own.is_some_and(|own| own.user == sender.user && own.server == sender.server);

    if let Some(reaction) = node.get_child_by_tag("reaction") {
        return Some(MessageStanza::Reaction {
            chat,
            from: sender,
            target_id: reaction.get_attr("id")?.to_string(),
            emoji: reaction.get_attr("emoji").unwrap_or_default().to_string(),
            timestamp,
        });
    }
    if let Some(revoke) = node.get_child_by_tag("revoke") {
        return Some(MessageStanza::Revoke {
            chat,
            from: sender,
            target_id: revoke.get_attr("id")?.to_string(),
        });
    }

    let (kind, content) = parse_content(node);
    Some(MessageStanza::Message(Message {
        id,
        from_me,
        timestamp,
        chat_id: chat,
        sender_id: sender,
        kind,
        content,
        quoted_message: node
            .get_child_by_tag("quote")
            .and_then(|q| q.get_attr("id"))
            .map(String::from),
        mentions: node
            .get_children_by_tag("mention")
            .filter_map(|m| m.get_attr("jid")?.parse().ok())
            .collect(),
        reactions: Vec::new(),
        delivery_status: if from_me {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Delivered
        },
    }))
}

fn parse_content(node: &Node) -> (MessageKind, MessageContent) {
    if let Some(media) = node.get_child_by_tag("media") {
        let kind = node
            .get_attr("mediatype")
            .or(media.get_attr("type"))
            .map(MessageKind::parse)
            .unwrap_or(MessageKind::Unknown);
        let attr = |key: &str| media.get_attr(key).unwrap_or_default().to_string();
        let content = MessageContent::Media {
            media: MediaRef {
                url: attr("url"),
                direct_path: attr("directPath"),
                media_key: attr("mediaKey"),
                sha256: attr("sha256"),
                length: media.get_attr_int("length").and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
            },
            mime_type: media
                .get_attr("mimetype")
                .unwrap_or("application/octet-stream")
                .to_string(),
            caption: child_text(node, "caption").or_else(|| child_text(media, "caption")),
            file_name: media.get_attr("filename").map(String::from),
        };
        return (kind, content);
    }
    if let Some(location) = node.get_child_by_tag("location") {
        let coord = |key: &str| location.get_attr(key).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        return (
            MessageKind::Location,
            MessageContent::Location {
                latitude: coord("lat"),
                longitude: coord("lng"),
                name: location.get_attr("name").map(String::from),
            },
        );
    }
    if let Some(contact) = node.get_child_by_tag("contact") {
        return (
            MessageKind::Contact,
            MessageContent::Contact {
                display_name: contact.get_attr("name").unwrap_or_default().to_string(),
                vcard: contact.get_text().unwrap_or_default().to_string(),
            },
        );
    }
    match child_text(node, "body") {
        Some(body) => (MessageKind::Text, MessageContent::Text { body }),
        None => (MessageKind::Unknown, MessageContent::Empty),
    }
}

/// Delivery receipt for one or more messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub chat: Jid,
    pub sender: Option<Jid>,
    pub message_ids: Vec<String>,
    pub status: DeliveryStatus,
}

/// Parse a receipt node. Receipts of unknown type yield `None`.
pub fn parse_receipt(node: &Node) -> Option<Receipt> {
    if node.tag != "receipt" {
        return None;
    }
    let chat: Jid = node.get_attr("from")?.parse().ok()?;
    let status = DeliveryStatus::from_receipt(node.get_attr("type"))?;
    let mut message_ids: Vec<String> = node.get_attr("id").map(String::from).into_iter().collect();
    message_ids.extend(
        node.get_children_by_tag("item")
            .filter_map(|n| n.get_attr("id").map(String::from)),
    );
    Some(Receipt {
        chat,
        sender: node.get_attr("participant").and_then(|s| s.parse().ok()),
        message_ids,
        status,
    })
}
