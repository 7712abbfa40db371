//! In-memory entity cache.
//!
//! Holds chats, messages and contacts keyed by id, kept consistent by
//! applying decoded protocol events. Every `apply_*` call is idempotent:
//! applying the same event twice leaves the same state as applying it once.

mod model;

use std::collections::HashMap;

pub use model::*;

use crate::types::Jid;

/// Chats, messages and contacts seen on the connection.
#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    chats: HashMap<Jid, Chat>,
    messages: HashMap<String, Message>,
    contacts: HashMap<Jid, Contact>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn chat_entry(&mut self, id: &Jid) -> &mut Chat {
        self.chats
            .entry(id.clone())
            .or_insert_with(|| Chat::placeholder(id.clone()))
    }

    /// Upsert a message. Returns true when the id was not known before.
    ///
    /// The owning chat is created if needed. Unread count only grows for
    /// inbound messages seen for the first time.
    pub fn apply_message_event(&mut self, message: &Message) -> bool {
        let is_new = !self.messages.contains_key(&message.id);
        let mut stored = message.clone();
        if let Some(existing) = self.messages.get(&message.id) {
            stored.delivery_status = existing.delivery_status.advance(message.delivery_status);
            if stored.reactions.is_empty() {
                stored.reactions = existing.reactions.clone();
            }
        }

        let newest = self
            .chats
            .get(&message.chat_id)
            .and_then(|c| c.last_message.as_ref())
            .and_then(|id| self.messages.get(id))
            .map(|m| m.timestamp);

        let chat = self.chat_entry(&message.chat_id);
        chat.last_activity = chat.last_activity.max(message.timestamp);
        if newest.map_or(true, |ts| message.timestamp >= ts) {
            chat.last_message = Some(message.id.clone());
        }
        if is_new && !message.from_me {
            chat.unread_count += 1;
        }

        self.messages.insert(message.id.clone(), stored);
        is_new
    }

    /// Merge the fields present in `update` into the chat.
    pub fn apply_chat_event(&mut self, update: &ChatUpdate) -> &Chat {
        let chat = self.chat_entry(&update.id);
        if let Some(name) = &update.name {
            chat.name = Some(name.clone());
        }
        if let Some(ts) = update.last_activity {
            chat.last_activity = chat.last_activity.max(ts);
        }
        if let Some(unread) = update.unread_count {
            chat.unread_count = unread;
        }
        if let Some(participants) = &update.participants {
            chat.participants = Some(participants.clone());
        }
        if let Some(admins) = &update.admins {
            chat.admins = Some(admins.clone());
        }
        if let Some(description) = &update.description {
            chat.description = Some(description.clone());
        }
        if let Some(archived) = update.archived {
            chat.archived = archived;
        }
        if let Some(pinned) = update.pinned {
            chat.pinned = pinned;
        }
        if let Some(muted) = update.muted {
            chat.muted = muted;
        }
        chat
    }

    /// Upsert the contact's online state.
    pub fn apply_presence_event(&mut self, presence: &PresenceUpdate) -> &Contact {
        let contact = self
            .contacts
            .entry(presence.user_id.clone())
            .or_insert_with(|| Contact::placeholder(presence.user_id.clone()));
        contact.is_online = presence.is_online;
        if presence.last_seen.is_some() {
            contact.last_seen = presence.last_seen;
        }
        contact
    }

    /// Advance a message's delivery status. Returns the updated message.
    pub fn apply_status_update(&mut self, id: &str, status: DeliveryStatus) -> Option<&Message> {
        let message = self.messages.get_mut(id)?;
        message.delivery_status = message.delivery_status.advance(status);
        Some(message)
    }

    /// Set or clear one sender's reaction. An empty emoji removes it.
    ///
    /// Returns false when the message is unknown.
    pub fn apply_reaction(&mut self, message_id: &str, from: &Jid, emoji: &str, timestamp: i64) -> bool {
        let Some(message) = self.messages.get_mut(message_id) else {
            return false;
        };
        message.reactions.retain(|r| &r.from != from);
        if !emoji.is_empty() {
            message.reactions.push(Reaction {
                from: from.clone(),
                emoji: emoji.to_string(),
                timestamp,
            });
        }
        true
    }

    /// Remove a message. The chat's newest-message pointer is recomputed.
    pub fn remove_message(&mut self, id: &str) -> Option<Message> {
        let removed = self.messages.remove(id)?;
        let newest = self
            .messages
            .values()
            .filter(|m| m.chat_id == removed.chat_id)
            .max_by_key(|m| m.timestamp)
            .map(|m| m.id.clone());
        if let Some(chat) = self.chats.get_mut(&removed.chat_id) {
            if chat.last_message.as_deref() == Some(id) {
                chat.last_message = newest;
            }
        }
        Some(removed)
    }

    /// Delete a chat and all of its messages.
    pub fn clear_chat(&mut self, chat_id: &Jid) -> Option<Chat> {
        self.messages.retain(|_, m| &m.chat_id != chat_id);
        self.chats.remove(chat_id)
    }

    /// Zero the unread count and mark inbound messages read.
    pub fn mark_read(&mut self, chat_id: &Jid) -> Vec<String> {
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.unread_count = 0;
        }
        let mut ids: Vec<String> = self
            .messages
            .values_mut()
            .filter(|m| &m.chat_id == chat_id && !m.from_me)
            .filter(|m| !matches!(m.delivery_status, DeliveryStatus::Read | DeliveryStatus::Played))
            .map(|m| {
                m.delivery_status = m.delivery_status.advance(DeliveryStatus::Read);
                m.id.clone()
            })
            .collect();
        ids.sort();
        ids
    }

    /// Merge profile fields of a contact.
    pub fn apply_contact(&mut self, contact: &Contact) -> &Contact {
        let entry = self
            .contacts
            .entry(contact.id.clone())
            .or_insert_with(|| Contact::placeholder(contact.id.clone()));
        if contact.name.is_some() {
            entry.name = contact.name.clone();
        }
        if !contact.phone.is_empty() {
            entry.phone = contact.phone.clone();
        }
        if contact.status.is_some() {
            entry.status = contact.status.clone();
        }
        if contact.last_seen.is_some() {
            entry.last_seen = contact.last_seen;
        }
        entry.blocked = contact.blocked;
        entry
    }

    /// Record a block-list change.
    pub fn set_blocked(&mut self, id: &Jid, blocked: bool) {
        self.contacts
            .entry(id.clone())
            .or_insert_with(|| Contact::placeholder(id.clone()))
            .blocked = blocked;
    }

    /// Apply a membership change to a group chat.
    pub fn apply_group_participants(
        &mut self,
        group: &Jid,
        action: ParticipantAction,
        participants: &[Jid],
    ) -> &Chat {
        let chat = self.chat_entry(group);
        let members = chat.participants.get_or_insert_with(Vec::new);
        let admins = chat.admins.get_or_insert_with(Vec::new);
        match action {
            ParticipantAction::Add => {
                for p in participants {
                    if !members.contains(p) {
                        members.push(p.clone());
                    }
                }
            }
            ParticipantAction::Remove => {
                members.retain(|m| !participants.contains(m));
                admins.retain(|a| !participants.contains(a));
            }
            ParticipantAction::Promote => {
                for p in participants {
                    if !members.contains(p) {
                        members.push(p.clone());
                    }
                    if !admins.contains(p) {
                        admins.push(p.clone());
                    }
                }
            }
            ParticipantAction::Demote => admins.retain(|a| !participants.contains(a)),
        }
        chat
    }

    /// Load the initial snapshot of chats and contacts.
    pub fn apply_snapshot(&mut self, chats: &[ChatUpdate], contacts: &[Contact]) {
        for chat in chats {
            self.apply_chat_event(chat);
        }
        for contact in contacts {
            self.apply_contact(contact);
        }
    }

    pub fn chat(&self, id: &Jid) -> Option<&Chat> {
        self.chats.get(id)
    }

    /// All chats, pinned first, then most recent activity first.
    pub fn chats(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self.chats.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.last_activity.cmp(&a.last_activity))
                .then(a.id.cmp(&b.id))
        });
        chats
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Messages of one chat, oldest first.
    pub fn messages_for(&self, chat_id: &Jid) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .values()
            .filter(|m| &m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        messages
    }

    pub fn contact(&self, id: &Jid) -> Option<&Contact> {
        self.contacts.get(id)
    }

    pub fn contacts(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));
        contacts
    }
}
