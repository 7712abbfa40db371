//! Inbound stanza dispatch.
//!
//! Each frame is decrypted, decoded and routed by tag. Handlers run with the
//! connection lock held and only record what should be published.

use log::{debug, info, warn};

use super::{ConnInner, ConnectionManager, Effects};
use crate::auth::ActiveAuth;
use crate::binary::{decode_node, Node};
use crate::cache::{DeliveryStatus, ParticipantAction};
use crate::crypto;
use crate::error::{AuthError, EncryptionError};
use crate::protocol::{self, ChatEvent, GroupEvent, LoginSuccess, MessageStanza};
use crate::store::{Credentials, SessionRecord, UserProfile};
use crate::types::{Event, GroupParticipants};

use super::ConnectionState::*;

/// The event announcing a membership change.
pub(super) fn participants_event(change: GroupParticipants) -> Event {
    match change.action {
        ParticipantAction::Add => Event::GroupParticipantsAdd(change),
        ParticipantAction::Remove => Event::GroupParticipantsRemove(change),
        ParticipantAction::Promote | ParticipantAction::Demote => Event::GroupParticipantsUpdate(change),
    }
}

/// Fill in session keys and tokens from the server's `success`.
///
/// With a server key the keys come from the shared secret, and the server's
/// HMAC over its key must verify under the derived mac key. Without one the
/// keys already held are kept.
fn establish_session(credentials: &mut Credentials, success: &LoginSuccess) -> Result<(), EncryptionError> {
    if let Some(server_key) = success.server_public_key {
        let secret = crypto::derive_shared_secret(&credentials.private_key, &server_key);
        let (enc_key, mac_key) = crypto::derive_session_keys(&secret, None)?;
        if let Some(tag) = &success.hmac {
            if !crypto::verify_hmac(&server_key, &mac_key, tag) {
                return Err(EncryptionError::AuthenticationFailed);
            }
        }
        credentials.enc_key = Some(enc_key);
        credentials.mac_key = Some(mac_key);
    }
    if let Some(token) = &success.client_token {
        credentials.client_token = Some(token.clone());
    }
    if let Some(token) = &success.server_token {
        credentials.server_token = Some(token.clone());
    }
    if let Some(wid) = &success.wid {
        credentials.wid = Some(wid.clone());
    }
    crypto::derive_auth_payload(credentials);
    Ok(())
}

impl ConnectionManager {
    pub(super) fn handle_frame(&self, id: u64, frame: Vec<u8>) {
        let mut fx = Effects::default();
        {
            let mut inner = self.lock();
            if !inner.is_current(id) {
                return;
            }
            let plain = if inner.encrypted {
                match inner.session_key().and_then(|key| crypto::decrypt(&frame, &key)) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!("dropping frame: {e}");
                        return;
                    }
                }
            } else {
                frame
            };
            let node = match decode_node(&plain) {
                Ok(node) => node,
                Err(e) => {
                    warn!("dropping malformed frame ({} bytes): {e}", plain.len());
                    return;
                }
            };
            self.dispatch(&mut inner, node, &mut fx);
        }
        self.apply(fx);
    }

    fn dispatch(&self, inner: &mut ConnInner, node: Node, fx: &mut Effects) {
        match node.tag.as_str() {
            "success" => self.on_success(inner, &node, fx),
            "failure" => {
                if matches!(inner.state, Authenticating | Authenticated) {
                    fx.fail_login = Some(AuthError::Rejected(protocol::parse_failure(&node)).to_string());
                } else {
                    debug!("ignoring failure while {}", inner.state);
                }
            }
            "pair-code" => match &inner.auth {
                Some(ActiveAuth::Pairing(pairing)) => fx.confirm_pairing = Some(pairing.clone()),
                _ => debug!("pair-code without a pairing request"),
            },
            "message" => on_message(inner, &node, fx),
            "receipt" => on_receipt(inner, &node, fx),
            "ack" => on_ack(inner, &node, fx),
            "presence" => {
                if let Some(presence) = protocol::parse_presence(&node) {
                    inner.cache.apply_presence_event(&presence);
                    fx.events.push(Event::PresenceUpdate(presence));
                }
            }
            "chat" => match protocol::parse_chat(&node) {
                Some(ChatEvent::Update(update)) => {
                    let chat = inner.cache.apply_chat_event(&update).clone();
                    fx.events.push(Event::ChatUpdate(chat));
                }
                Some(ChatEvent::Clear(id)) => {
                    inner.cache.clear_chat(&id);
                }
                None => debug!("unparseable chat stanza"),
            },
            "notification" => on_notification(inner, &node, fx),
            "iq" => self.on_iq(inner, node),
            other => debug!("unhandled stanza <{other}>"),
        }
    }

    fn on_success(&self, inner: &mut ConnInner, node: &Node, fx: &mut Effects) {
        if inner.state != Authenticating {
            debug!("ignoring success while {}", inner.state);
            return;
        }
        let success = match protocol::parse_success(node) {
            Ok(success) => success,
            Err(e) => {
                fx.fail_login = Some(AuthError::Handshake(e).to_string());
                return;
            }
        };
        let previous = inner.profile.take().unwrap_or_default();
        let Some(credentials) = inner.credentials.as_mut() else {
            fx.fail_login = Some(AuthError::NotAuthenticating.to_string());
            return;
        };
        if let Err(e) = establish_session(credentials, &success) {
            fx.fail_login = Some(AuthError::Handshake(e).to_string());
            return;
        }
        let profile = UserProfile {
            id: credentials.wid.clone().unwrap_or(previous.id),
            name: success.name.or(previous.name),
            status: previous.status,
        };
        fx.save = Some(SessionRecord::new(credentials, Some(profile.clone())));

        if let Some(auth) = inner.auth.take() {
            auth.as_authenticator().consume_success();
        }
        inner.resuming = false;
        inner.profile = Some(profile.clone());
        inner.transition(Authenticated, None, None, fx);
        info!("authenticated as {}", profile.id);
        fx.events.push(Event::AuthSuccess { user: profile });

        inner.encrypted = true;
        inner.transition(Ready, None, None, fx);
        inner.backoff = Default::default();
        self.arm_keepalive(inner);
        if let Err(e) = inner.flush_queue() {
            warn!("failed to flush queued frames: {e}");
        }
        fx.fetch_snapshot = true;
    }

    fn on_iq(&self, inner: &ConnInner, node: Node) {
        let Some(id) = node.get_attr("id").map(String::from) else {
            debug!("iq without id");
            return;
        };
        let kind = node.get_attr("type").map(String::from);
        match kind.as_deref() {
            Some("result") | Some("error") => {
                if !self.shared.requests.complete(&id, node) {
                    debug!("response {id} matches no pending request");
                }
            }
            Some("get") if node.get_attr("xmlns") == Some("urn:xmpp:ping") => {
                inner.send_direct(&protocol::build_iq_result(&id, node.get_attr("from")));
            }
            other => debug!("unhandled iq {id} of type {other:?}"),
        }
    }
}

fn on_message(inner: &mut ConnInner, node: &Node, fx: &mut Effects) {
    let own = inner.own_jid();
    let Some(stanza) = protocol::parse_message(node, own.as_ref()) else {
        debug!("unparseable message stanza");
        return;
    };
    match stanza {
        MessageStanza::Message(message) => {
            if !message.from_me {
                let ids = [message.id.clone()];
                inner.send_direct(&protocol::build_receipt(&message.chat_id, &ids, "delivery"));
            }
            let is_new = inner.cache.apply_message_event(&message);
            let stored = inner.cache.message(&message.id).cloned().unwrap_or(message);
            fx.events.push(if is_new {
                Event::MessageNew(stored)
            } else {
                Event::MessageUpdate(stored)
            });
        }
        MessageStanza::Reaction {
            from,
            target_id,
            emoji,
            timestamp,
            ..
        } => {
            if !inner.cache.apply_reaction(&target_id, &from, &emoji, timestamp) {
                debug!("reaction to unknown message {target_id}");
            }
            fx.events.push(Event::MessageReaction {
                message_id: target_id,
                emoji,
                from,
            });
        }
        MessageStanza::Revoke { chat, target_id, .. } => {
            inner.cache.remove_message(&target_id);
            fx.events.push(Event::MessageDelete {
                message_id: target_id,
                chat_id: chat,
            });
        }
    }
}

fn on_receipt(inner: &mut ConnInner, node: &Node, fx: &mut Effects) {
    let Some(receipt) = protocol::parse_receipt(node) else {
        debug!("unparseable receipt");
        return;
    };
    for id in &receipt.message_ids {
        if let Some(message) = inner.cache.apply_status_update(id, receipt.status) {
            fx.events.push(Event::MessageUpdate(message.clone()));
        }
    }
}

/// Server acknowledgement of an outbound message.
fn on_ack(inner: &mut ConnInner, node: &Node, fx: &mut Effects) {
    if node.get_attr("class") != Some("message") {
        return;
    }
    if let Some(id) = node.get_attr("id") {
        if let Some(message) = inner.cache.apply_status_update(id, DeliveryStatus::Sent) {
            fx.events.push(Event::MessageUpdate(message.clone()));
        }
    }
}

fn on_notification(inner: &mut ConnInner, node: &Node, fx: &mut Effects) {
    for event in protocol::parse_group_notification(node) {
        match event {
            GroupEvent::Created(info) => {
                let chat = inner.cache.apply_chat_event(&info).clone();
                fx.events.push(Event::GroupCreated(chat));
            }
            GroupEvent::Updated(update) => {
                let chat = inner.cache.apply_chat_event(&update).clone();
                fx.events.push(Event::ChatUpdate(chat));
            }
            GroupEvent::Participants {
                group,
                action,
                participants,
                actor,
            } => {
                inner.cache.apply_group_participants(&group, action, &participants);
                fx.events.push(participants_event(GroupParticipants {
                    group_id: group,
                    action,
                    participants,
                    actor,
                }));
            }
        }
    }
}
