/// Chat records and their clock-gated metadata.
///
/// Deletion, read markers and the last-message clock only ever move forward;
/// every mutation goes through [`apply_if_newer`].
use serde::{Deserialize, Serialize};

use crate::clock::{next_clock_and_timestamp, TimeSource};
use crate::gate::apply_if_newer;
use crate::ids::{ChatID, IdentityKey};

#[cfg(feature = "groups")]
use crate::group::{Group, MembershipUpdateEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    OneToOne,
    PrivateGroupChat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub id: IdentityKey,
    pub admin: bool,
    pub joined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatID,
    pub chat_type: ChatType,
    pub active: bool,
    pub name: String,
    pub color: String,
    pub image: Vec<u8>,
    pub members: Vec<ChatMember>,
    #[cfg(feature = "groups")]
    pub membership_updates: Vec<MembershipUpdateEvent>,
    /// Clock of the latest message seen or sent in this chat.
    pub last_clock_value: u64,
    /// Messages at or below this clock were deleted with the chat.
    pub deleted_at_clock_value: u64,
    pub read_messages_at_clock_value: u64,
    pub unviewed_messages_count: u32,
}

impl Chat {
    pub fn one_to_one(peer: &IdentityKey) -> Self {
        Chat {
            id: ChatID::one_to_one(peer),
            chat_type: ChatType::OneToOne,
            active: true,
            name: peer.alias(),
            color: String::new(),
            image: Vec::new(),
            members: Vec::new(),
            #[cfg(feature = "groups")]
            membership_updates: Vec::new(),
            last_clock_value: 0,
            deleted_at_clock_value: 0,
            read_messages_at_clock_value: 0,
            unviewed_messages_count: 0,
        }
    }

    #[cfg(feature = "groups")]
    pub fn from_group(group: &Group) -> Self {
        let mut chat = Chat {
            id: group.chat_id().clone(),
            chat_type: ChatType::PrivateGroupChat,
            active: true,
            name: String::new(),
            color: String::new(),
            image: Vec::new(),
            members: Vec::new(),
            membership_updates: Vec::new(),
            last_clock_value: 0,
            deleted_at_clock_value: 0,
            read_messages_at_clock_value: 0,
            unviewed_messages_count: 0,
        };
        chat.apply_group(group);
        chat
    }

    /// Copy the derived group state into this chat.
    #[cfg(feature = "groups")]
    pub fn apply_group(&mut self, group: &Group) {
        self.name = group.name().to_string();
        self.color = group.color().to_string();
        self.image = group.image().to_vec();
        self.members = group
            .members()
            .into_iter()
            .map(|id| ChatMember {
                id,
                admin: group.is_admin(&id),
                joined: group.has_joined(&id),
            })
            .collect();
        self.membership_updates = group.events();
        self.last_clock_value = self.last_clock_value.max(group.last_clock_value());
    }

    pub fn is_group(&self) -> bool {
        self.chat_type == ChatType::PrivateGroupChat
    }

    pub fn is_member(&self, id: &IdentityKey) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }

    pub fn is_admin(&self, id: &IdentityKey) -> bool {
        self.members.iter().any(|m| &m.id == id && m.admin)
    }

    // -----------------------------------------------------------------------
    // Clock-gated metadata
    // -----------------------------------------------------------------------

    /// A message at `clock` belongs to this chat's current lifetime.
    pub fn accepts_message(&self, clock: u64) -> bool {
        clock > self.deleted_at_clock_value
    }

    pub fn is_read(&self, clock: u64) -> bool {
        clock <= self.read_messages_at_clock_value
    }

    pub fn update_from_message(&mut self, clock: u64) -> bool {
        let last = &mut self.last_clock_value;
        apply_if_newer(*last, clock, || *last = clock)
    }

    /// Record an incoming message. Reactivates a deleted chat when the message
    /// is newer than the deletion; returns false when it predates it.
    pub fn receive_message(&mut self, clock: u64) -> bool {
        if !self.accepts_message(clock) {
            log::debug!(
                "Dropping message at clock {} for deleted chat {:?} (deleted at {})",
                clock,
                self.id,
                self.deleted_at_clock_value
            );
            return false;
        }
        self.active = true;
        self.update_from_message(clock);
        if !self.is_read(clock) {
            self.unviewed_messages_count = self.unviewed_messages_count.saturating_add(1);
        }
        true
    }

    /// Delete the chat's history up to `clock`.
    pub fn deactivate(&mut self, clock: u64) -> bool {
        let applied = apply_if_newer(self.deleted_at_clock_value, clock, || {
            self.deleted_at_clock_value = clock;
        });
        if applied {
            self.active = false;
            self.unviewed_messages_count = 0;
            self.last_clock_value = self.last_clock_value.max(clock);
        }
        applied
    }

    pub fn mark_read_at(&mut self, clock: u64) -> bool {
        let applied = apply_if_newer(self.read_messages_at_clock_value, clock, || {
            self.read_messages_at_clock_value = clock;
        });
        if applied {
            self.unviewed_messages_count = 0;
        }
        applied
    }

    /// Next outgoing clock and timestamp; the clock is stored as
    /// `last_clock_value` before returning.
    pub fn next_clock_and_timestamp(&mut self, time: &dyn TimeSource) -> (u64, u64) {
        let (clock, timestamp) = next_clock_and_timestamp(self.last_clock_value, time);
        self.last_clock_value = clock;
        (clock, timestamp)
    }
}
