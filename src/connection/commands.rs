//! Outbound commands.
//!
//! Messages are fire-and-forget through the queue; settings that the server
//! has to confirm go through [`ConnectionManager::query`] and only touch the
//! cache once the result arrives.

use chrono::Utc;
use log::{debug, error, info};

use super::inbound::participants_event;
use super::ConnectionManager;
use crate::binary::encode_node;
use crate::cache::{Chat, ChatUpdate, DeliveryStatus, Message, MessageContent, MessageKind, ParticipantAction};
use crate::error::{Error, Result, ValidationError};
use crate::protocol::{self, ChatAction};
use crate::store::{SessionRecord, UserProfile};
use crate::types::{Event, GroupParticipants, Jid};

/// Extras for a text message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOptions {
    /// Id of the message being replied to.
    pub quoted: Option<String>,
    pub mentions: Vec<Jid>,
}

/// A blob to upload and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub kind: MessageKind,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub caption: Option<String>,
    pub file_name: Option<String>,
}

fn check_recipient(to: &Jid) -> Result<()> {
    if to.is_empty() || to.user.is_empty() {
        return Err(ValidationError::InvalidJid(to.to_string()).into());
    }
    Ok(())
}

fn check_group(group: &Jid) -> Result<()> {
    if !group.is_group() {
        return Err(ValidationError::InvalidJid(group.to_string()).into());
    }
    Ok(())
}

impl ConnectionManager {
    fn own_jid_or_default(&self) -> Jid {
        self.lock().own_jid().unwrap_or_default()
    }

    fn outgoing(&self, to: &Jid, kind: MessageKind, content: MessageContent) -> Message {
        Message {
            id: protocol::generate_message_id(),
            from_me: true,
            timestamp: Utc::now().timestamp(),
            chat_id: to.to_non_ad(),
            sender_id: self.own_jid_or_default(),
            kind,
            content,
            quoted_message: None,
            mentions: Vec::new(),
            reactions: Vec::new(),
            delivery_status: DeliveryStatus::Pending,
        }
    }

    /// Record the message in the cache, queue it and publish `message.sent`.
    fn dispatch_message(&self, message: Message) -> Result<Message> {
        let frame = encode_node(&protocol::build_message(&message))?;
        {
            let mut inner = self.lock();
            inner.cache.apply_message_event(&message);
            inner.send_or_queue(frame)?;
        }
        debug!("queued message {} to {}", message.id, message.chat_id);
        self.shared.bus.publish(&Event::MessageSent(message.clone()));
        Ok(message)
    }

    pub fn send_text(&self, to: &Jid, text: &str) -> Result<Message> {
        self.send_text_with(to, text, TextOptions::default())
    }

    /// Send a text message, optionally quoting another message or mentioning users.
    pub fn send_text_with(&self, to: &Jid, text: &str, options: TextOptions) -> Result<Message> {
        check_recipient(to)?;
        if text.is_empty() {
            return Err(ValidationError::Empty("text").into());
        }
        let mut message = self.outgoing(
            to,
            MessageKind::Text,
            MessageContent::Text {
                body: text.to_string(),
            },
        );
        message.quoted_message = options.quoted;
        message.mentions = options.mentions;
        self.dispatch_message(message)
    }

    /// Upload a blob through the configured uploader and send a reference to it.
    pub async fn send_media(&self, to: &Jid, upload: MediaUpload) -> Result<Message> {
        check_recipient(to)?;
        if !upload.kind.is_media() {
            return Err(ValidationError::NotMedia(upload.kind.as_str()).into());
        }
        if upload.data.is_empty() {
            return Err(ValidationError::Empty("media data").into());
        }
        let uploader = self
            .lock()
            .uploader
            .clone()
            .ok_or(ValidationError::NoMediaUploader)?;

        let size = upload.data.len();
        let media = uploader
            .upload(upload.data, upload.mime_type.clone())
            .await
            .map_err(Error::MediaUpload)?;
        info!("uploaded {size} bytes of {}", upload.mime_type);

        let message = self.outgoing(
            to,
            upload.kind,
            MessageContent::Media {
                media,
                mime_type: upload.mime_type,
                caption: upload.caption,
                file_name: upload.file_name,
            },
        );
        self.dispatch_message(message)
    }

    /// React to a message. An empty emoji removes the reaction.
    pub fn react(&self, chat: &Jid, message_id: &str, emoji: &str) -> Result<()> {
        check_recipient(chat)?;
        let own = self.own_jid_or_default();
        let node = protocol::build_reaction(&protocol::generate_message_id(), chat, message_id, emoji);
        let frame = encode_node(&node)?;
        {
            let mut inner = self.lock();
            inner.cache.apply_reaction(message_id, &own, emoji, Utc::now().timestamp());
            inner.send_or_queue(frame)?;
        }
        self.shared.bus.publish(&Event::MessageReaction {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
            from: own,
        });
        Ok(())
    }

    /// Delete a message locally, and for every participant when `for_everyone`.
    pub fn delete_message(&self, chat: &Jid, message_id: &str, for_everyone: bool) -> Result<()> {
        let frame = if for_everyone {
            let node = protocol::build_revoke(&protocol::generate_message_id(), chat, message_id);
            Some(encode_node(&node)?)
        } else {
            None
        };
        {
            let mut inner = self.lock();
            if let Some(frame) = frame {
                inner.send_or_queue(frame)?;
            }
            inner.cache.remove_message(message_id);
        }
        self.shared.bus.publish(&Event::MessageDelete {
            message_id: message_id.to_string(),
            chat_id: chat.clone(),
        });
        Ok(())
    }

    /// Mark every unread message in the chat as read. Returns the ids receipted.
    pub fn mark_read(&self, chat: &Jid) -> Result<Vec<String>> {
        let (ids, updated) = {
            let mut inner = self.lock();
            let ids = inner.cache.mark_read(chat);
            if !ids.is_empty() {
                let frame = encode_node(&protocol::build_read_receipt(chat, &ids))?;
                inner.send_or_queue(frame)?;
            }
            (ids, inner.cache.chat(chat).cloned())
        };
        if let Some(chat) = updated {
            self.shared.bus.publish(&Event::ChatUpdate(chat));
        }
        Ok(ids)
    }

    pub fn set_presence(&self, available: bool) -> Result<()> {
        let name = self.lock().profile.as_ref().and_then(|p| p.name.clone());
        self.send_node(&protocol::build_presence(available, name.as_deref()))
    }

    pub fn send_typing(&self, chat: &Jid, composing: bool) -> Result<()> {
        check_recipient(chat)?;
        self.send_node(&protocol::build_chat_state(chat, composing))
    }

    /// Apply a chat setting once the server confirms it.
    ///
    /// Returns the updated chat, or `None` when the chat was cleared.
    pub async fn update_chat(&self, chat: &Jid, action: ChatAction) -> Result<Option<Chat>> {
        check_recipient(chat)?;
        let id = self.shared.requests.next_id();
        self.query(protocol::build_chat_action(&id, chat, action)).await?;

        let updated = {
            let mut inner = self.lock();
            if action == ChatAction::Clear {
                inner.cache.clear_chat(chat);
                None
            } else {
                Some(inner.cache.apply_chat_event(&action.to_update(chat)).clone())
            }
        };
        if let Some(chat) = &updated {
            self.shared.bus.publish(&Event::ChatUpdate(chat.clone()));
        }
        Ok(updated)
    }

    pub async fn archive_chat(&self, chat: &Jid, archived: bool) -> Result<Option<Chat>> {
        let action = if archived { ChatAction::Archive } else { ChatAction::Unarchive };
        self.update_chat(chat, action).await
    }

    pub async fn pin_chat(&self, chat: &Jid, pinned: bool) -> Result<Option<Chat>> {
        let action = if pinned { ChatAction::Pin } else { ChatAction::Unpin };
        self.update_chat(chat, action).await
    }

    /// Mute until the given unix time, or forever when `until` is `None`.
    pub async fn mute_chat(&self, chat: &Jid, until: Option<i64>) -> Result<Option<Chat>> {
        self.update_chat(chat, ChatAction::Mute { until }).await
    }

    pub async fn unmute_chat(&self, chat: &Jid) -> Result<Option<Chat>> {
        self.update_chat(chat, ChatAction::Unmute).await
    }

    pub async fn clear_chat(&self, chat: &Jid) -> Result<()> {
        self.update_chat(chat, ChatAction::Clear).await.map(|_| ())
    }

    /// Create a group. The creator is its first admin.
    pub async fn create_group(&self, subject: &str, participants: &[Jid]) -> Result<Chat> {
        if subject.trim().is_empty() {
            return Err(ValidationError::Empty("group subject").into());
        }
        if participants.is_empty() {
            return Err(ValidationError::Empty("participants").into());
        }
        for participant in participants {
            check_recipient(participant)?;
        }

        let id = self.shared.requests.next_id();
        let response = self
            .query(protocol::build_group_create(&id, subject, participants))
            .await?;
        let (group, mut info) = protocol::parse_group_created(&response).ok_or_else(|| Error::RequestFailed {
            id: id.clone(),
            reason: "response carries no group".into(),
        })?;

        let own = self.lock().own_jid();
        if info.name.is_none() {
            info.name = Some(subject.to_string());
        }
        if info.participants.as_ref().map_or(true, Vec::is_empty) {
            let mut members: Vec<Jid> = own.iter().cloned().collect();
            members.extend(participants.iter().map(Jid::to_non_ad));
            info.participants = Some(members);
        }
        if info.admins.as_ref().map_or(true, Vec::is_empty) {
            info.admins = Some(own.into_iter().collect());
        }
        if info.last_activity.is_none() {
            info.last_activity = Some(Utc::now().timestamp());
        }

        let chat = self.lock().cache.apply_chat_event(&info).clone();
        info!("created group {group}");
        self.shared.bus.publish(&Event::GroupCreated(chat.clone()));
        Ok(chat)
    }

    pub async fn set_group_subject(&self, group: &Jid, subject: &str) -> Result<Chat> {
        check_group(group)?;
        if subject.trim().is_empty() {
            return Err(ValidationError::Empty("group subject").into());
        }
        let id = self.shared.requests.next_id();
        self.query(protocol::build_group_subject(&id, group, subject)).await?;

        let mut update = ChatUpdate::new(group.clone());
        update.name = Some(subject.to_string());
        self.publish_chat_update(&update)
    }

    pub async fn set_group_description(&self, group: &Jid, description: &str) -> Result<Chat> {
        check_group(group)?;
        let id = self.shared.requests.next_id();
        self.query(protocol::build_group_description(&id, group, description))
            .await?;

        let mut update = ChatUpdate::new(group.clone());
        update.description = Some(description.to_string());
        self.publish_chat_update(&update)
    }

    fn publish_chat_update(&self, update: &ChatUpdate) -> Result<Chat> {
        let chat = self.lock().cache.apply_chat_event(update).clone();
        self.shared.bus.publish(&Event::ChatUpdate(chat.clone()));
        Ok(chat)
    }

    /// Add, remove, promote or demote group members.
    pub async fn update_participants(
        &self,
        group: &Jid,
        action: ParticipantAction,
        participants: &[Jid],
    ) -> Result<Chat> {
        check_group(group)?;
        if participants.is_empty() {
            return Err(ValidationError::Empty("participants").into());
        }
        let id = self.shared.requests.next_id();
        self.query(protocol::build_group_participants(&id, group, action, participants))
            .await?;

        let (chat, actor) = {
            let mut inner = self.lock();
            let actor = inner.own_jid();
            let chat = inner
                .cache
                .apply_group_participants(group, action, participants)
                .clone();
            (chat, actor)
        };
        self.shared.bus.publish(&participants_event(GroupParticipants {
            group_id: group.clone(),
            action,
            participants: participants.to_vec(),
            actor,
        }));
        Ok(chat)
    }

    pub async fn block_contact(&self, jid: &Jid) -> Result<()> {
        self.set_blocked(jid, true).await
    }

    pub async fn unblock_contact(&self, jid: &Jid) -> Result<()> {
        self.set_blocked(jid, false).await
    }

    async fn set_blocked(&self, jid: &Jid, blocked: bool) -> Result<()> {
        check_recipient(jid)?;
        let id = self.shared.requests.next_id();
        self.query(protocol::build_block(&id, jid, blocked)).await?;
        self.lock().cache.set_blocked(&jid.to_non_ad(), blocked);
        info!("{} {jid}", if blocked { "blocked" } else { "unblocked" });
        Ok(())
    }

    pub async fn update_profile_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ValidationError::Empty("profile name").into());
        }
        let id = self.shared.requests.next_id();
        self.query(protocol::build_profile_name(&id, name)).await?;
        self.update_profile(|profile| profile.name = Some(name.to_string()));
        Ok(())
    }

    pub async fn update_profile_status(&self, status: &str) -> Result<()> {
        let id = self.shared.requests.next_id();
        self.query(protocol::build_profile_status(&id, status)).await?;
        self.update_profile(|profile| profile.status = Some(status.to_string()));
        Ok(())
    }

    /// Change the cached profile and persist it with the session.
    fn update_profile(&self, change: impl FnOnce(&mut UserProfile)) {
        let record = {
            let mut inner = self.lock();
            let profile = inner.profile.get_or_insert_with(Default::default);
            change(profile);
            let profile = profile.clone();
            inner
                .credentials
                .as_ref()
                .map(|credentials| SessionRecord::new(credentials, Some(profile)))
        };
        if let Some(record) = record {
            if let Err(e) = self.shared.store.save(&self.shared.config.session_id, &record) {
                error!("failed to persist profile: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ClientConfig;
    use crate::socket::MemoryConnector;
    use crate::store::MemorySessionStore;
    use crate::types::servers;
    use std::sync::Arc;

    fn manager() -> ConnectionManager {
        let (connector, _listener) = MemoryConnector::new();
        ConnectionManager::new(
            ClientConfig::default(),
            Arc::new(connector),
            Arc::new(MemorySessionStore::new()),
        )
    }

    fn jid(user: &str) -> Jid {
        Jid::new(user, servers::DEFAULT_USER)
    }

    #[test]
    fn test_send_text_queues_while_closed() {
        let manager = manager();
        let message = manager.send_text(&jid("15552223333"), "hello").unwrap();
        assert_eq!(message.delivery_status, DeliveryStatus::Pending);
        assert!(message.from_me);
        assert_eq!(message.text(), Some("hello"));
        assert_eq!(manager.session_info().queued_frames, 1);
        assert_eq!(manager.messages(&jid("15552223333")).len(), 1);
    }

    #[test]
    fn test_send_text_validates_input() {
        let manager = manager();
        assert!(matches!(
            manager.send_text(&jid("15552223333"), ""),
            Err(Error::Validation(ValidationError::Empty("text")))
        ));
        assert!(matches!(
            manager.send_text(&Jid::default(), "hi"),
            Err(Error::Validation(ValidationError::InvalidJid(_)))
        ));
        assert_eq!(manager.session_info().queued_frames, 0);
    }

    #[test]
    fn test_text_options() {
        let manager = manager();
        let options = TextOptions {
            quoted: Some("3EB0AA".into()),
            mentions: vec![jid("15554445555")],
        };
        let message = manager
            .send_text_with(&jid("15552223333"), "see above", options)
            .unwrap();
        assert_eq!(message.quoted_message.as_deref(), Some("3EB0AA"));
        assert_eq!(message.mentions, vec![jid("15554445555")]);
    }

    #[tokio::test]
    async fn test_send_media_requires_uploader() {
        let manager = manager();
        let upload = MediaUpload {
            kind: MessageKind::Image,
            data: vec![1, 2, 3],
            mime_type: "image/png".into(),
            caption: None,
            file_name: None,
        };
        assert!(matches!(
            manager.send_media(&jid("15552223333"), upload.clone()).await,
            Err(Error::Validation(ValidationError::NoMediaUploader))
        ));

        let text = MediaUpload {
            kind: MessageKind::Text,
            ..upload
        };
        assert!(matches!(
            manager.send_media(&jid("15552223333"), text).await,
            Err(Error::Validation(ValidationError::NotMedia("text")))
        ));
    }

    #[test]
    fn test_delete_for_me_only_touches_cache() {
        let manager = manager();
        let to = jid("15552223333");
        let message = manager.send_text(&to, "oops").unwrap();
        manager.delete_message(&to, &message.id, false).unwrap();
        assert!(manager.message(&message.id).is_none());
        assert_eq!(manager.session_info().queued_frames, 1);

        let other = manager.send_text(&to, "again").unwrap();
        manager.delete_message(&to, &other.id, true).unwrap();
        assert_eq!(manager.session_info().queued_frames, 3);
    }

    #[tokio::test]
    async fn test_group_commands_validate_before_sending() {
        let manager = manager();
        assert!(matches!(
            manager.create_group("  ", &[jid("1555")]).await,
            Err(Error::Validation(ValidationError::Empty("group subject")))
        ));
        assert!(matches!(
            manager.create_group("Team", &[]).await,
            Err(Error::Validation(ValidationError::Empty("participants")))
        ));
        assert!(matches!(
            manager.set_group_subject(&jid("1555"), "Team").await,
            Err(Error::Validation(ValidationError::InvalidJid(_)))
        ));
        assert_eq!(manager.session_info().queued_frames, 0);
    }
}
