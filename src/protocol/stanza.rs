//! Session, chat, group and account stanzas.
//!
//! The node vocabulary here covers what this client needs. It is not a
//! complete grammar of the server protocol.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::request::{build_iq_get, build_iq_set};
use crate::auth::PairingRequest;
use crate::binary::Node;
use crate::cache::{ChatUpdate, Contact, ParticipantAction, PresenceUpdate};
use crate::crypto::AuthPayload;
use crate::error::EncryptionError;
use crate::types::{servers, Jid};

/// Ask the server for a QR login, announcing our identity.
pub fn build_qr_login(reference: &str, client_id: &[u8], public_key: &[u8; 32]) -> Node {
    Node::new("login")
        .attr("method", "qr")
        .attr("ref", reference)
        .attr("clientId", BASE64.encode(client_id))
        .attr("publicKey", BASE64.encode(public_key))
}

/// Ask the server to link by pairing code.
pub fn build_pair_code_login(request: &PairingRequest) -> Node {
    Node::new("login")
        .attr("method", "pair-code")
        .attr("phone", request.phone_number.as_str())
        .attr("clientId", BASE64.encode(&request.client_id))
        .attr("publicKey", BASE64.encode(request.public_key))
}

/// Resume a stored session.
pub fn build_resume_login(payload: &AuthPayload, wid: Option<&str>) -> Node {
    let mut node = Node::new("login")
        .attr("method", "resume")
        .attr("clientId", BASE64.encode(&payload.client_id))
        .attr("publicKey", BASE64.encode(payload.public_key))
        .attr("clientToken", BASE64.encode(&payload.client_token))
        .attr("serverToken", BASE64.encode(&payload.server_token));
    if let Some(wid) = wid {
        node.set_attr("wid", wid);
    }
    node
}

/// Contents of the server's `success` stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginSuccess {
    pub server_public_key: Option<[u8; 32]>,
    /// HMAC of the server public key under the derived mac key.
    pub hmac: Option<Vec<u8>>,
    pub client_token: Option<Vec<u8>>,
    pub server_token: Option<Vec<u8>>,
    pub wid: Option<String>,
    pub name: Option<String>,
}

fn b64_attr(node: &Node, key: &str) -> Result<Option<Vec<u8>>, EncryptionError> {
    node.get_attr(key)
        .map(|v| BASE64.decode(v).map_err(|_| EncryptionError::InvalidKey))
        .transpose()
}

/// Parse a `success` stanza. Malformed key material is an [`EncryptionError`].
pub fn parse_success(node: &Node) -> Result<LoginSuccess, EncryptionError> {
    let server_public_key = match b64_attr(node, "pubKey")? {
        Some(bytes) => Some(<[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| EncryptionError::InvalidKey)?),
        None => None,
    };
    Ok(LoginSuccess {
        server_public_key,
        hmac: b64_attr(node, "hmac")?,
        client_token: b64_attr(node, "clientToken")?,
        server_token: b64_attr(node, "serverToken")?,
        wid: node.get_attr("wid").map(String::from),
        name: node.get_attr("name").map(String::from),
    })
}

/// Reason carried by a `failure` stanza.
pub fn parse_failure(node: &Node) -> String {
    node.get_attr("reason")
        .or(node.get_attr("code"))
        .unwrap_or("unknown")
        .to_string()
}

/// Liveness ping.
pub fn build_ping(id: &str) -> Node {
    build_iq_get(id, "w:p", Some(servers::DEFAULT_USER)).child(Node::new("ping"))
}

/// Request the initial chat and contact lists.
pub fn build_snapshot_query(id: &str) -> Node {
    build_iq_get(id, "w:sync", None).children(vec![Node::new("chats"), Node::new("contacts")])
}

/// Unlink this session.
pub fn build_logout(id: &str, wid: Option<&str>) -> Node {
    let mut logout = Node::new("remove-companion-device").attr("reason", "user_initiated");
    if let Some(wid) = wid {
        logout.set_attr("jid", wid);
    }
    build_iq_set(id, "md", Some(servers::DEFAULT_USER)).child(logout)
}

/// Build a presence node.
pub fn build_presence(available: bool, name: Option<&str>) -> Node {
    let mut node = Node::new("presence").attr("type", if available { "available" } else { "unavailable" });
    if let Some(name) = name {
        node.set_attr("name", name);
    }
    node
}

/// Build a typing indicator node.
pub fn build_chat_state(to: &Jid, composing: bool) -> Node {
    Node::new("chatstate")
        .attr("to", to.to_string())
        .child(Node::new(if composing { "composing" } else { "paused" }))
}

/// Per-chat setting changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Archive,
    Unarchive,
    Pin,
    Unpin,
    /// Mute until the given unix time, or forever.
    Mute { until: Option<i64> },
    Unmute,
    Clear,
}

impl ChatAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatAction::Archive => "archive",
            ChatAction::Unarchive => "unarchive",
            ChatAction::Pin => "pin",
            ChatAction::Unpin => "unpin",
            ChatAction::Mute { .. } => "mute",
            ChatAction::Unmute => "unmute",
            ChatAction::Clear => "clear",
        }
    }

    /// Cache change this action produces.
    pub fn to_update(&self, chat: &Jid) -> ChatUpdate {
        let mut update = ChatUpdate::new(chat.clone());
        match self {
            ChatAction::Archive => update.archived = Some(true),
            ChatAction::Unarchive => update.archived = Some(false),
            ChatAction::Pin => update.pinned = Some(true),
            ChatAction::Unpin => update.pinned = Some(false),
            ChatAction::Mute { .. } => update.muted = Some(true),
            ChatAction::Unmute => update.muted = Some(false),
            ChatAction::Clear => {}
        }
        update
    }
}

pub fn build_chat_action(id: &str, chat: &Jid, action: ChatAction) -> Node {
    let mut node = Node::new("chat").attr("jid", chat.to_string()).attr("type", action.as_str());
    if let ChatAction::Mute { until: Some(until) } = action {
        node.set_attr("expiration", until.to_string());
    }
    build_iq_set(id, "w:chat", None).child(node)
}

fn participant_nodes(participants: &[Jid]) -> Vec<Node> {
    participants
        .iter()
        .map(|p| Node::new("participant").attr("jid", p.to_string()))
        .collect()
}

pub fn build_group_create(id: &str, subject: &str, participants: &[Jid]) -> Node {
    let create = Node::new("create")
        .attr("subject", subject)
        .children(participant_nodes(participants));
    build_iq_set(id, "w:g2", Some(servers::GROUP)).child(create)
}

pub fn build_group_subject(id: &str, group: &Jid, subject: &str) -> Node {
    build_iq_set(id, "w:g2", Some(group.to_string().as_str())).child(Node::new("subject").bytes(subject.as_bytes().to_vec()))
}

pub fn build_group_description(id: &str, group: &Jid, description: &str) -> Node {
    let body = Node::new("body").bytes(description.as_bytes().to_vec());
    build_iq_set(id, "w:g2", Some(group.to_string().as_str())).child(Node::new("description").child(body))
}

pub fn build_group_participants(id: &str, group: &Jid, action: ParticipantAction, participants: &[Jid]) -> Node {
    let change = Node::new(action.as_str()).children(participant_nodes(participants));
    build_iq_set(id, "w:g2", Some(group.to_string().as_str())).child(change)
}

pub fn build_block(id: &str, jid: &Jid, block: bool) -> Node {
    let item = Node::new("item")
        .attr("action", if block { "block" } else { "unblock" })
        .attr("jid", jid.to_string());
    build_iq_set(id, "blocklist", Some(servers::DEFAULT_USER)).child(item)
}

pub fn build_profile_name(id: &str, name: &str) -> Node {
    build_iq_set(id, "profile", Some(servers::DEFAULT_USER)).child(Node::new("name").bytes(name.as_bytes().to_vec()))
}

pub fn build_profile_status(id: &str, status: &str) -> Node {
    build_iq_set(id, "status", Some(servers::DEFAULT_USER)).child(Node::new("status").bytes(status.as_bytes().to_vec()))
}

fn bool_attr(node: &Node, key: &str) -> Option<bool> {
    node.get_attr(key).map(|v| v == "true" || v == "1")
}

fn jid_attr(node: &Node, key: &str) -> Option<Jid> {
    node.get_attr(key).and_then(|v| v.parse().ok())
}

/// Parse a `presence` stanza.
pub fn parse_presence(node: &Node) -> Option<PresenceUpdate> {
    if node.tag != "presence" {
        return None;
    }
    Some(PresenceUpdate {
        user_id: jid_attr(node, "from")?,
        is_online: node.get_attr("type") != Some("unavailable"),
        last_seen: node.get_attr_int("last"),
    })
}

/// Inbound chat change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Update(ChatUpdate),
    Clear(Jid),
}

/// Parse one `chat` node, as pushed by the server or listed in a snapshot.
pub fn parse_chat(node: &Node) -> Option<ChatEvent> {
    if node.tag != "chat" {
        return None;
    }
    let id = jid_attr(node, "jid")?;
    if matches!(node.get_attr("type"), Some("clear") | Some("delete")) {
        return Some(ChatEvent::Clear(id));
    }
    let mut update = ChatUpdate::new(id);
    update.name = node.get_attr("name").map(String::from);
    update.last_activity = node.get_attr_int("t");
    update.unread_count = node.get_attr("count").and_then(|v| v.parse().ok());
    update.archived = bool_attr(node, "archive");
    update.pinned = bool_attr(node, "pin");
    update.muted = bool_attr(node, "mute");
    update.description = node.get_attr("description").map(String::from);
    Some(ChatEvent::Update(update))
}

fn parse_contact(node: &Node) -> Option<Contact> {
    let id = jid_attr(node, "jid")?;
    let mut contact = Contact::placeholder(id);
    contact.name = node.get_attr("name").or(node.get_attr("notify")).map(String::from);
    contact.status = node.get_attr("status").map(String::from);
    if let Some(phone) = node.get_attr("phone") {
        contact.phone = phone.to_string();
    }
    contact.blocked = bool_attr(node, "blocked").unwrap_or(false);
    Some(contact)
}

/// Parse the result of a snapshot query.
pub fn parse_snapshot(node: &Node) -> (Vec<ChatUpdate>, Vec<Contact>) {
    let chats = node
        .get_child_by_tag("chats")
        .map(|c| {
            c.get_children()
                .iter()
                .filter_map(|n| match parse_chat(n)? {
                    ChatEvent::Update(update) => Some(update),
                    ChatEvent::Clear(_) => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let contacts = node
        .get_child_by_tag("contacts")
        .map(|c| c.get_children_by_tag("contact").filter_map(parse_contact).collect())
        .unwrap_or_default();
    (chats, contacts)
}

/// Group change carried by a `w:gp2` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    Created(ChatUpdate),
    Updated(ChatUpdate),
    Participants {
        group: Jid,
        action: ParticipantAction,
        participants: Vec<Jid>,
        actor: Option<Jid>,
    },
}

fn participants_of(node: &Node) -> Vec<Jid> {
    node.get_children_by_tag("participant")
        .filter_map(|p| jid_attr(p, "jid"))
        .collect()
}

fn admins_of(node: &Node) -> Vec<Jid> {
    node.get_children_by_tag("participant")
        .filter(|p| matches!(p.get_attr("type"), Some("admin") | Some("superadmin")))
        .filter_map(|p| jid_attr(p, "jid"))
        .collect()
}

/// The group described by a `group` or `create` node.
pub fn parse_group_info(group: &Jid, node: &Node) -> ChatUpdate {
    let mut update = ChatUpdate::new(group.clone());
    update.name = node.get_attr("subject").map(String::from);
    update.last_activity = node.get_attr_int("creation");
    update.participants = Some(participants_of(node));
    update.admins = Some(admins_of(node));
    update
}

/// Parse a group notification. Other notifications yield no events.
pub fn parse_group_notification(node: &Node) -> Vec<GroupEvent> {
    if node.tag != "notification" || node.get_attr("type") != Some("w:gp2") {
        return Vec::new();
    }
    let Some(group) = jid_attr(node, "from") else {
        return Vec::new();
    };
    let actor = jid_attr(node, "participant");

    node.get_children()
        .iter()
        .filter_map(|child| match child.tag.as_str() {
            "create" => Some(GroupEvent::Created(parse_group_info(&group, child))),
            "subject" => {
                let mut update = ChatUpdate::new(group.clone());
                update.name = child
                    .get_attr("subject")
                    .map(String::from)
                    .or_else(|| child.get_text().map(String::from));
                Some(GroupEvent::Updated(update))
            }
            "description" => {
                let mut update = ChatUpdate::new(group.clone());
                update.description = Some(
                    child
                        .get_child_by_tag("body")
                        .and_then(Node::get_text)
                        .unwrap_or_default()
                        .to_string(),
                );
                Some(GroupEvent::Updated(update))
            }
            tag => ParticipantAction::parse(tag).map(|action| GroupEvent::Participants {
                group: group.clone(),
                action,
                participants: participants_of(child),
                actor: actor.clone(),
            }),
        })
        .collect()
}

/// Id of the group in a create result.
pub fn parse_group_created(node: &Node) -> Option<(Jid, ChatUpdate)> {
    let group = node.get_child_by_tag("group")?;
    let id = group.get_attr("id")?;
    let jid = if id.contains('@') {
        id.parse().ok()?
    } else {
        Jid::new(id, servers::GROUP)
    };
    let info = parse_group_info(&jid, group);
    Some((jid, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hmac, KeyPair};

    #[test]
    fn test_login_nodes() {
        let node = build_qr_login("REF", b"client", &[7u8; 32]);
        assert_eq!(node.get_attr("method"), Some("qr"));
        assert_eq!(node.get_attr("clientId"), Some(BASE64.encode(b"client").as_str()));

        let request = PairingRequest {
            client_id: b"client".to_vec(),
            public_key: [1u8; 32],
            phone_number: "12345678900".into(),
        };
        let node = build_pair_code_login(&request);
        assert_eq!(node.get_attr("method"), Some("pair-code"));
        assert_eq!(node.get_attr("phone"), Some("12345678900"));
    }

    #[test]
    fn test_parse_success() {
        let server = KeyPair::generate();
        let tag = hmac(&server.public, &[9u8; 32]).unwrap();
        let node = Node::new("success")
            .attr("pubKey", BASE64.encode(server.public))
            .attr("hmac", BASE64.encode(tag))
            .attr("clientToken", BASE64.encode(b"ct"))
            .attr("wid", "15550001111@s.whatsapp.net")
            .attr("name", "Me");
        let success = parse_success(&node).unwrap();
        assert_eq!(success.server_public_key, Some(server.public));
        assert_eq!(success.hmac.as_deref(), Some(&tag[..]));
        assert_eq!(success.client_token.as_deref(), Some(&b"ct"[..]));
        assert_eq!(success.server_token, None);
        assert_eq!(success.name.as_deref(), Some("Me"));

        let short = Node::new("success").attr("pubKey", BASE64.encode([1u8; 5]));
        assert_eq!(parse_success(&short), Err(EncryptionError::InvalidKey));
        let garbage = Node::new("success").attr("hmac", "***");
        assert_eq!(parse_success(&garbage), Err(EncryptionError::InvalidKey));
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(parse_failure(&Node::new("failure").attr("reason", "401")), "401");
        assert_eq!(parse_failure(&Node::new("failure")), "unknown");
    }

    #[test]
    fn test_parse_presence() {
        let online = Node::new("presence").attr("from", "1555@s.whatsapp.net");
        assert!(parse_presence(&online).unwrap().is_online);
        let offline = Node::new("presence")
            .attr("from", "1555@s.whatsapp.net")
            .attr("type", "unavailable")
            .attr("last", "1700000000");
        let update = parse_presence(&offline).unwrap();
        assert!(!update.is_online);
        assert_eq!(update.last_seen, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_chat_only_sets_present_fields() {
        let node = Node::new("chat").attr("jid", "1555@s.whatsapp.net").attr("archive", "true");
        let Some(ChatEvent::Update(update)) = parse_chat(&node) else {
            panic!("expected an update");
        };
        assert_eq!(update.archived, Some(true));
        assert_eq!(update.name, None);
        assert_eq!(update.pinned, None);

        let clear = Node::new("chat").attr("jid", "1555@s.whatsapp.net").attr("type", "clear");
        assert!(matches!(parse_chat(&clear), Some(ChatEvent::Clear(_))));
    }

    #[test]
    fn test_chat_action_nodes() {
        let chat = Jid::new("1555", servers::DEFAULT_USER);
        let node = build_chat_action("1", &chat, ChatAction::Mute { until: Some(99) });
        let inner = node.get_child_by_tag("chat").unwrap();
        assert_eq!(inner.get_attr("type"), Some("mute"));
        assert_eq!(inner.get_attr("expiration"), Some("99"));
        assert_eq!(ChatAction::Pin.to_update(&chat).pinned, Some(true));
        assert_eq!(ChatAction::Clear.to_update(&chat), ChatUpdate::new(chat));
    }

    #[test]
    fn test_parse_group_notification() {
        let node = Node::new("notification")
            .attr("type", "w:gp2")
            .attr("from", "123-456@g.us")
            .attr("participant", "1555@s.whatsapp.net")
            .child(Node::new("add").child(Node::new("participant").attr("jid", "1666@s.whatsapp.net")))
            .child(Node::new("subject").attr("subject", "Team"));
        let events = parse_group_notification(&node);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            GroupEvent::Participants { action: ParticipantAction::Add, participants, actor: Some(_), .. }
                if participants == &vec![Jid::new("1666", servers::DEFAULT_USER)]
        ));
        assert!(matches!(&events[1], GroupEvent::Updated(u) if u.name.as_deref() == Some("Team")));
        assert!(parse_group_notification(&Node::new("notification").attr("type", "other")).is_empty());
    }

    #[test]
    fn test_parse_snapshot_and_group_created() {
        let snapshot = Node::new("iq")
            .attr("type", "result")
            .child(Node::new("chats").child(Node::new("chat").attr("jid", "1555@s.whatsapp.net").attr("name", "Ann")))
            .child(Node::new("contacts").child(Node::new("contact").attr("jid", "1555@s.whatsapp.net").attr("name", "Ann")));
        let (chats, contacts) = parse_snapshot(&snapshot);
        assert_eq!(chats.len(), 1);
        assert_eq!(contacts[0].name.as_deref(), Some("Ann"));
        assert_eq!(contacts[0].phone, "1555");

        let created = Node::new("iq").child(
            Node::new("group")
                .attr("id", "123-456")
                .attr("subject", "Team")
                .child(Node::new("participant").attr("jid", "1555@s.whatsapp.net").attr("type", "superadmin")),
        );
        let (jid, info) = parse_group_created(&created).unwrap();
        assert_eq!(jid.to_string(), "123-456@g.us");
        assert_eq!(info.admins.as_ref().map(Vec::len), Some(1));
    }
}
