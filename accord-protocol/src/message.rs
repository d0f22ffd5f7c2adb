/// Stored chat messages with clock-gated edits and permanent deletes.
///
/// Edits apply only when their clock is strictly newer than the last applied
/// edit. A delete is a tombstone: once set, later edits are ignored. Edits
/// and deletes that arrive before the message they target are parked in
/// [`PendingChanges`] and replayed when the message shows up.
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::apply_if_newer;
use crate::ids::{ChatID, IdentityKey};
use crate::protocol::{ChatMessage, DeleteMessage, EditMessage};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Only the original author can edit this message")]
    NotMessageAuthor,

    #[error("{0:?} may not delete this message")]
    InvalidDeletePermission(IdentityKey),

    #[error("Change targets chat {got}, message is in {expected}")]
    WrongChat { expected: ChatID, got: ChatID },
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: ChatID,
    pub from: IdentityKey,
    pub clock: u64,
    pub timestamp: u64,
    pub text: String,
    /// Clock of the last applied edit; zero if never edited.
    pub edited_at: u64,
    pub deleted: bool,
    pub deleted_by: Option<IdentityKey>,
}

impl Message {
    pub fn from_chat_message(msg: &ChatMessage, from: IdentityKey) -> Self {
        Message {
            id: msg.id.clone(),
            chat_id: msg.chat_id.clone(),
            from,
            clock: msg.clock,
            timestamp: msg.timestamp,
            text: msg.text.clone(),
            edited_at: 0,
            deleted: false,
            deleted_by: None,
        }
    }

    /// Apply an edit from `from`. Returns whether the text changed.
    pub fn apply_edit(
        &mut self,
        from: &IdentityKey,
        edit: &EditMessage,
    ) -> Result<bool, MessageError> {
        self.check_chat(&edit.chat_id)?;
        if from != &self.from {
            return Err(MessageError::NotMessageAuthor);
        }
        if self.deleted {
            log::debug!("Ignoring edit of deleted message {}", self.id);
            return Ok(false);
        }
        let text = &mut self.text;
        let applied = apply_if_newer(self.edited_at, edit.clock, || *text = edit.text.clone());
        if applied {
            self.edited_at = edit.clock;
        }
        Ok(applied)
    }

    /// Tombstone the message. `privileged` marks a deleter allowed to remove
    /// other people's messages (a group admin).
    pub fn apply_delete(
        &mut self,
        by: &IdentityKey,
        delete: &DeleteMessage,
        privileged: bool,
    ) -> Result<bool, MessageError> {
        self.check_chat(&delete.chat_id)?;
        if by != &self.from && !privileged {
            return Err(MessageError::InvalidDeletePermission(*by));
        }
        if self.deleted {
            return Ok(false);
        }
        self.deleted = true;
        self.deleted_by = Some(*by);
        self.text.clear();
        Ok(true)
    }

    fn check_chat(&self, chat_id: &ChatID) -> Result<(), MessageError> {
        if chat_id != &self.chat_id {
            return Err(MessageError::WrongChat {
                expected: self.chat_id.clone(),
                got: chat_id.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pending changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub from: IdentityKey,
    pub edit: EditMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub by: IdentityKey,
    pub delete: DeleteMessage,
    pub privileged: bool,
}

/// Message ids with parked changes; the least recently parked id is
/// evicted beyond this.
pub const MAX_PENDING_MESSAGES: usize = 1_000;

/// Parked edits, and separately parked deletes, kept per message id. The
/// oldest is dropped beyond this.
pub const MAX_PENDING_CHANGES_PER_MESSAGE: usize = 32;

#[derive(Debug, Clone, Default)]
struct Parked {
    edits: Vec<PendingEdit>,
    deletes: Vec<PendingDelete>,
}

impl Parked {
    fn len(&self) -> usize {
        self.edits.len() + self.deletes.len()
    }
}

/// Edits and deletes waiting for their target message, bounded by an LRU
/// over message ids.
#[derive(Debug)]
pub struct PendingChanges {
    parked: LruCache<String, Parked>,
}

impl Default for PendingChanges {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_MESSAGES)
    }

    pub fn with_capacity(messages: usize) -> Self {
        let capacity = NonZeroUsize::new(messages).unwrap_or(NonZeroUsize::MIN);
        PendingChanges {
            parked: LruCache::new(capacity),
        }
    }

    pub fn park_edit(&mut self, from: IdentityKey, edit: EditMessage) {
        let id = edit.message_id.clone();
        let edits = &mut self.entry(id).edits;
        push_bounded(edits, PendingEdit { from, edit });
    }

    /// Every parked delete is kept; the first one that passes its permission
    /// check on arrival wins.
    pub fn park_delete(&mut self, by: IdentityKey, delete: DeleteMessage, privileged: bool) {
        let id = delete.message_id.clone();
        let deletes = &mut self.entry(id).deletes;
        push_bounded(
            deletes,
            PendingDelete {
                by,
                delete,
                privileged,
            },
        );
    }

    fn entry(&mut self, id: String) -> &mut Parked {
        if !self.parked.contains(&id) {
            if let Some((evicted, dropped)) = self.parked.push(id.clone(), Parked::default()) {
                log::warn!(
                    "Pending changes full, dropping {} parked for {}",
                    dropped.len(),
                    evicted
                );
            }
        }
        self.parked.get_or_insert_mut(id, Parked::default)
    }

    /// Number of parked changes across all messages.
    pub fn len(&self) -> usize {
        self.parked.iter().map(|(_, p)| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// Number of message ids with parked changes.
    pub fn message_count(&self) -> usize {
        self.parked.len()
    }

    /// Apply and drop everything parked for `message`. Changes that fail
    /// their permission check are dropped with a warning.
    pub fn replay_into(&mut self, message: &mut Message) -> bool {
        let Some(parked) = self.parked.pop(&message.id) else {
            return false;
        };
        let mut changed = false;
        for pending in parked.edits {
            match message.apply_edit(&pending.from, &pending.edit) {
                Ok(applied) => changed |= applied,
                Err(e) => log::warn!("Dropping parked edit for {}: {}", message.id, e),
            }
        }
        for pending in parked.deletes {
            match message.apply_delete(&pending.by, &pending.delete, pending.privileged) {
                Ok(applied) => changed |= applied,
                Err(e) => log::warn!("Dropping parked delete for {}: {}", message.id, e),
            }
        }
        changed
    }
}

fn push_bounded<T>(items: &mut Vec<T>, item: T) {
    if items.len() >= MAX_PENDING_CHANGES_PER_MESSAGE {
        items.remove(0);
    }
    items.push(item);
}
