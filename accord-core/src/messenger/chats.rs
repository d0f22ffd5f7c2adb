//! Chat messages, edits and deletes.

use accord_protocol::chat::Chat;
use accord_protocol::clock::ClockSource;
use accord_protocol::error::require_clock;
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::message::Message;
use accord_protocol::protocol::{ChatMessage, DeleteMessage, EditMessage};

use super::Messenger;
use crate::dispatch::Recipient;
use crate::error::{MessengerError, Result};
use crate::identity::Identity;
use crate::response::MessengerResponse;
use crate::store::update_with;

impl Messenger {
    // -----------------------------------------------------------------------
    // Local operations
    // -----------------------------------------------------------------------

    pub fn send_chat_message(&self, chat_id: &ChatID, text: &str) -> Result<MessengerResponse> {
        let chat = self.require_chat(chat_id)?;
        let me = self.identity();
        let recipient = if chat.is_group() {
            let group = self
                .groups
                .load(chat_id)
                .ok_or_else(|| MessengerError::ChatNotFound(chat_id.clone()))?;
            if !group.is_member(&me) {
                return Err(MessengerError::MessageNotAllowed(me));
            }
            Recipient::Group {
                chat_id: chat_id.clone(),
                members: group.members().into_iter().filter(|m| *m != me).collect(),
            }
        } else {
            let peer = peer_of(chat_id)?;
            if self.contacts.load(&peer).map_or(false, |c| c.blocked) {
                return Err(MessengerError::MessageNotAllowed(peer));
            }
            Recipient::Peer(peer)
        };

        let (clock, timestamp) = self.clock.next(chat_id);
        let outgoing = ChatMessage::new(chat_id.clone(), clock, timestamp, text.to_string());
        let message = Message::from_chat_message(&outgoing, me);
        self.messages.store(message.id.clone(), message.clone());

        self.send(recipient, &outgoing);

        let mut response = MessengerResponse::new();
        response.add_message(message);
        if let Some(chat) = self.chats.load(chat_id) {
            response.add_chat(chat);
        }
        Ok(response)
    }

    /// Edit one of our own messages.
    pub fn edit_message(&self, message_id: &str, text: &str) -> Result<MessengerResponse> {
        let message = self.require_message(message_id)?;
        let recipient = self.recipient_for(&message.chat_id)?;
        let (clock, _) = self.clock.next(&message.chat_id);
        let edit = EditMessage {
            message_id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            clock,
            text: text.to_string(),
        };
        let me = self.identity();
        let edited = self.update_message(message_id, |m| m.apply_edit(&me, &edit))?;
        self.send(recipient, &edit);

        let mut response = MessengerResponse::new();
        response.add_message(edited);
        Ok(response)
    }

    /// Delete a message for everyone. Group admins may delete any message.
    pub fn delete_message(&self, message_id: &str) -> Result<MessengerResponse> {
        let message = self.require_message(message_id)?;
        let recipient = self.recipient_for(&message.chat_id)?;
        let me = self.identity();
        let privileged = self.can_delete_others(&message.chat_id, &me);
        let (clock, _) = self.clock.next(&message.chat_id);
        let delete = DeleteMessage {
            message_id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            clock,
        };
        let deleted = self.update_message(message_id, |m| m.apply_delete(&me, &delete, privileged))?;
        self.send(recipient, &delete);

        let mut response = MessengerResponse::new();
        response.add_message(deleted);
        Ok(response)
    }

    pub fn mark_chat_read(&self, chat_id: &ChatID) -> Result<MessengerResponse> {
        let chat = self.require_chat(chat_id)?;
        let mut response = MessengerResponse::new();
        if let Some(chat) =
            self.update_chat(chat_id, |c| c.mark_read_at(chat.last_clock_value))
        {
            response.add_chat(chat);
        }
        Ok(response)
    }

    /// Delete the chat locally. Messages at or below the deletion clock are
    /// dropped if they arrive later.
    pub fn delete_chat(&self, chat_id: &ChatID) -> Result<MessengerResponse> {
        self.require_chat(chat_id)?;
        let (clock, _) = self.clock.next(chat_id);
        let mut response = MessengerResponse::new();
        if let Some(chat) = self.update_chat(chat_id, |c| c.deactivate(clock)) {
            log::info!("Chat {:?} deleted at clock {}", chat_id, clock);
            response.add_chat(chat);
        }
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Inbound handlers
    // -----------------------------------------------------------------------

    pub(crate) fn handle_chat_message(
        &self,
        sender: &IdentityKey,
        msg: &ChatMessage,
    ) -> Result<MessengerResponse> {
        require_clock(msg.clock)?;
        self.check_sender_allowed(sender)?;

        let chat_id = self.local_chat_id(sender, &msg.chat_id);
        self.check_chat_membership(sender, &chat_id)?;

        let mut response = MessengerResponse::new();
        let accepted = update_with(self.chats.as_ref(), &chat_id, |current| {
            let mut chat = current
                .cloned()
                .unwrap_or_else(|| Chat::one_to_one(&peer_of(&chat_id).unwrap_or(*sender)));
            if chat.receive_message(msg.clock) {
                (Some(chat.clone()), Some(chat))
            } else {
                (None, None)
            }
        });
        let Some(chat) = accepted else {
            return Ok(response);
        };

        let incoming = ChatMessage {
            chat_id,
            ..msg.clone()
        };
        let message = update_with(self.messages.as_ref(), &incoming.id, |current| {
            if let Some(existing) = current {
                log::debug!("Message {} already stored", existing.id);
                return (None, existing.clone());
            }
            let mut message = Message::from_chat_message(&incoming, *sender);
            if self.pending().replay_into(&mut message) {
                log::debug!("Applied parked changes to message {}", message.id);
            }
            (Some(message.clone()), message)
        });

        response.add_chat(chat);
        response.add_message(message);
        Ok(response)
    }

    pub(crate) fn handle_edit_message(
        &self,
        sender: &IdentityKey,
        msg: &EditMessage,
    ) -> Result<MessengerResponse> {
        require_clock(msg.clock)?;
        self.check_sender_allowed(sender)?;
        let edit = EditMessage {
            chat_id: self.local_chat_id(sender, &msg.chat_id),
            ..msg.clone()
        };

        let result = update_with(self.messages.as_ref(), &edit.message_id, |current| {
            let Some(message) = current else {
                log::debug!("Parking edit for unknown message {}", edit.message_id);
                self.pending().park_edit(*sender, edit.clone());
                return (None, Ok(None));
            };
            let mut message = message.clone();
            match message.apply_edit(sender, &edit) {
                Ok(true) => (Some(message.clone()), Ok(Some(message))),
                Ok(false) => (None, Ok(None)),
                Err(e) => (None, Err(e)),
            }
        })?;

        let mut response = MessengerResponse::new();
        if let Some(message) = result {
            response.add_message(message);
        }
        Ok(response)
    }

    pub(crate) fn handle_delete_message(
        &self,
        sender: &IdentityKey,
        msg: &DeleteMessage,
    ) -> Result<MessengerResponse> {
        require_clock(msg.clock)?;
        self.check_sender_allowed(sender)?;
        let delete = DeleteMessage {
            chat_id: self.local_chat_id(sender, &msg.chat_id),
            ..msg.clone()
        };
        let privileged = self.can_delete_others(&delete.chat_id, sender);

        let result = update_with(self.messages.as_ref(), &delete.message_id, |current| {
            let Some(message) = current else {
                log::debug!("Parking delete for unknown message {}", delete.message_id);
                self.pending().park_delete(*sender, delete.clone(), privileged);
                return (None, Ok(None));
            };
            let mut message = message.clone();
            match message.apply_delete(sender, &delete, privileged) {
                Ok(true) => (Some(message.clone()), Ok(Some(message))),
                Ok(false) => (None, Ok(None)),
                Err(e) => (None, Err(e)),
            }
        })?;

        let mut response = MessengerResponse::new();
        if let Some(message) = result {
            response.add_message(message);
        }
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// A one-to-one message names the chat from the sender's side, i.e. by
    /// our key; store it under the sender's key instead.
    fn local_chat_id(&self, sender: &IdentityKey, chat_id: &ChatID) -> ChatID {
        if chat_id == &ChatID::one_to_one(&self.identity()) {
            ChatID::one_to_one(sender)
        } else {
            chat_id.clone()
        }
    }

    fn check_sender_allowed(&self, sender: &IdentityKey) -> Result<()> {
        if Identity::resolve(&self.identity(), sender, self.contacts.as_ref()).is_blocked() {
            return Err(MessengerError::MessageNotAllowed(*sender));
        }
        Ok(())
    }

    /// Group messages need a current member as sender; one-to-one chats are
    /// created on demand, for the peer or for our own devices.
    fn check_chat_membership(&self, sender: &IdentityKey, chat_id: &ChatID) -> Result<()> {
        if chat_id == &ChatID::one_to_one(sender)
            || (sender == &self.identity() && peer_of(chat_id).is_ok())
        {
            return Ok(());
        }
        match self.groups.load(chat_id) {
            Some(group) if group.is_member(sender) => Ok(()),
            Some(_) => Err(MessengerError::MessageNotAllowed(*sender)),
            None => Err(MessengerError::ChatNotFound(chat_id.clone())),
        }
    }

    fn can_delete_others(&self, chat_id: &ChatID, by: &IdentityKey) -> bool {
        self.chats.load(chat_id).map_or(false, |c| c.is_group())
            && self.groups.load(chat_id).map_or(false, |g| g.is_admin(by))
    }

    fn recipient_for(&self, chat_id: &ChatID) -> Result<Recipient> {
        let me = self.identity();
        match self.groups.load(chat_id) {
            Some(group) => Ok(Recipient::Group {
                chat_id: chat_id.clone(),
                members: group.members().into_iter().filter(|m| *m != me).collect(),
            }),
            None => Ok(Recipient::Peer(peer_of(chat_id)?)),
        }
    }

    fn require_chat(&self, chat_id: &ChatID) -> Result<Chat> {
        self.chats
            .load(chat_id)
            .ok_or_else(|| MessengerError::ChatNotFound(chat_id.clone()))
    }

    fn require_message(&self, message_id: &str) -> Result<Message> {
        self.messages
            .load(&message_id.to_string())
            .ok_or_else(|| MessengerError::MessageNotFound(message_id.to_string()))
    }

    fn update_message(
        &self,
        message_id: &str,
        change: impl FnOnce(&mut Message) -> std::result::Result<bool, accord_protocol::MessageError>,
    ) -> Result<Message> {
        let id = message_id.to_string();
        update_with(self.messages.as_ref(), &id, |current| {
            let Some(message) = current else {
                return (None, Err(MessengerError::MessageNotFound(id.clone())));
            };
            let mut message = message.clone();
            match change(&mut message) {
                Ok(true) => (Some(message.clone()), Ok(message)),
                Ok(false) => (None, Ok(message)),
                Err(e) => (None, Err(e.into())),
            }
        })
    }
}

/// The peer of a one-to-one chat.
fn peer_of(chat_id: &ChatID) -> Result<IdentityKey> {
    IdentityKey::from_hex(chat_id.as_str())
        .map_err(|_| MessengerError::ChatNotFound(chat_id.clone()))
}
