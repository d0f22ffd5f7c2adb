use accord_protocol::chat::Chat;
use accord_protocol::contact::Contact;
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::message::Message;

/// Something the host should surface to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ContactRequestReceived(IdentityKey),
    ContactRequestAccepted(IdentityKey),
    ContactRemoved(IdentityKey),
    /// We were added to a group chat.
    GroupInvitation { chat_id: ChatID, from: IdentityKey },
}

/// State deltas produced by one operation, for the host to persist and
/// render. Entities are deduplicated by id, last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessengerResponse {
    pub contacts: Vec<Contact>,
    pub chats: Vec<Chat>,
    pub messages: Vec<Message>,
    pub notifications: Vec<Notification>,
}

impl MessengerResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contact(&mut self, contact: Contact) {
        match self.contacts.iter_mut().find(|c| c.id == contact.id) {
            Some(existing) => *existing = contact,
            None => self.contacts.push(contact),
        }
    }

    pub fn add_chat(&mut self, chat: Chat) {
        match self.chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => self.chats.push(chat),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    pub fn add_notification(&mut self, notification: Notification) {
        if !self.notifications.contains(&notification) {
            self.notifications.push(notification);
        }
    }

    pub fn merge(&mut self, other: MessengerResponse) {
        other.contacts.into_iter().for_each(|c| self.add_contact(c));
        other.chats.into_iter().for_each(|c| self.add_chat(c));
        other.messages.into_iter().for_each(|m| self.add_message(m));
        other
            .notifications
            .into_iter()
            .for_each(|n| self.add_notification(n));
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
            && self.chats.is_empty()
            && self.messages.is_empty()
            && self.notifications.is_empty()
    }

    pub fn contact(&self, id: &IdentityKey) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.id == id)
    }

    pub fn chat(&self, id: &ChatID) -> Option<&Chat> {
        self.chats.iter().find(|c| &c.id == id)
    }
}
