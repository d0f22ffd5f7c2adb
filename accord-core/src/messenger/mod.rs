//! The messenger: stores, handlers and user operations.
//!
//! Every handler follows the same shape: load the entity, run a pure
//! transition from `accord_protocol`, write the result back as one atomic
//! store update, then dispatch at most a few outbound messages. Dispatch
//! happens after the write and its failure never undoes it.
//!
//! # Module structure
//! - `contacts`: contact request user operations and handlers
//! - `chats`: chat messages, edits and deletes
//! - `groups`: group chat operations and membership updates

mod chats;
mod contacts;
mod groups;

use std::sync::{Arc, Mutex, PoisonError};

use accord_protocol::chat::Chat;
use accord_protocol::clock::{ClockSource, TimeSource};
use accord_protocol::contact::Contact;
use accord_protocol::crypto::{EventSigner, SignatureVerifier};
use accord_protocol::group::Group;
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::message::{Message, PendingChanges};
use accord_protocol::protocol::WirePayload;

use crate::config::MessengerConfig;
use crate::dedup::ReplayCache;
use crate::dispatch::{Dispatch, MessageId, RawMessage, Recipient};
use crate::store::{update_with, MemoryStore, Store};

/// The keyed stores the messenger works on.
pub struct Stores {
    pub contacts: Arc<dyn Store<IdentityKey, Contact>>,
    pub chats: Arc<dyn Store<ChatID, Chat>>,
    pub groups: Arc<dyn Store<ChatID, Group>>,
    pub messages: Arc<dyn Store<String, Message>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Stores {
            contacts: Arc::new(MemoryStore::new()),
            chats: Arc::new(MemoryStore::new()),
            groups: Arc::new(MemoryStore::new()),
            messages: Arc::new(MemoryStore::new()),
        }
    }
}

pub struct Messenger {
    signer: Arc<dyn EventSigner>,
    verifier: Arc<dyn SignatureVerifier>,
    dispatch: Arc<dyn Dispatch>,
    clock: ChatClock,
    config: MessengerConfig,
    contacts: Arc<dyn Store<IdentityKey, Contact>>,
    chats: Arc<dyn Store<ChatID, Chat>>,
    groups: Arc<dyn Store<ChatID, Group>>,
    messages: Arc<dyn Store<String, Message>>,
    pending: Mutex<PendingChanges>,
    replay_cache: ReplayCache,
}

impl Messenger {
    pub fn new(
        signer: Arc<dyn EventSigner>,
        verifier: Arc<dyn SignatureVerifier>,
        dispatch: Arc<dyn Dispatch>,
        time: Arc<dyn TimeSource>,
        config: MessengerConfig,
    ) -> Self {
        Self::with_stores(signer, verifier, dispatch, time, config, Stores::in_memory())
    }

    pub fn with_stores(
        signer: Arc<dyn EventSigner>,
        verifier: Arc<dyn SignatureVerifier>,
        dispatch: Arc<dyn Dispatch>,
        time: Arc<dyn TimeSource>,
        config: MessengerConfig,
        stores: Stores,
    ) -> Self {
        log::info!("Messenger started for {}", signer.identity().short());
        Messenger {
            signer,
            verifier,
            dispatch,
            clock: ChatClock {
                chats: Arc::clone(&stores.chats),
                time,
            },
            replay_cache: ReplayCache::new(config.replay_cache_capacity),
            config,
            contacts: stores.contacts,
            chats: stores.chats,
            groups: stores.groups,
            messages: stores.messages,
            pending: Mutex::new(PendingChanges::new()),
        }
    }

    pub fn identity(&self) -> IdentityKey {
        self.signer.identity()
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn contact(&self, id: &IdentityKey) -> Option<Contact> {
        self.contacts.load(id)
    }

    pub fn chat(&self, id: &ChatID) -> Option<Chat> {
        self.chats.load(id)
    }

    pub fn group(&self, id: &ChatID) -> Option<Group> {
        self.groups.load(id)
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.messages.load(&id.to_string())
    }

    /// All stored contacts, in no particular order.
    pub fn contacts(&self) -> Vec<Contact> {
        let mut out = Vec::new();
        self.contacts.range(&mut |_, c| {
            out.push(c.clone());
            true
        });
        out
    }

    pub fn clock_source(&self) -> &dyn ClockSource {
        &self.clock
    }

    pub(crate) fn replay_cache(&self) -> &ReplayCache {
        &self.replay_cache
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Next clock for `chat_id`, creating the one-to-one chat for `peer` if
    /// needed.
    fn next_clock_for_peer(&self, peer: &IdentityKey) -> (u64, u64) {
        let chat_id = self.ensure_one_to_one(peer);
        self.clock.next(&chat_id)
    }

    /// Create the one-to-one chat with `peer` if missing. New chats start
    /// inactive.
    fn ensure_one_to_one(&self, peer: &IdentityKey) -> ChatID {
        let chat_id = ChatID::one_to_one(peer);
        update_with(self.chats.as_ref(), &chat_id, |current| match current {
            Some(_) => (None, ()),
            None => {
                let mut chat = Chat::one_to_one(peer);
                chat.active = false;
                (Some(chat), ())
            }
        });
        chat_id
    }

    /// Mutate a stored chat in place. Returns the chat if `f` reported a
    /// change; missing chats are left alone.
    fn update_chat(&self, id: &ChatID, f: impl FnOnce(&mut Chat) -> bool) -> Option<Chat> {
        update_with(self.chats.as_ref(), id, |current| {
            let Some(chat) = current else {
                return (None, None);
            };
            let mut chat = chat.clone();
            if f(&mut chat) {
                (Some(chat.clone()), Some(chat))
            } else {
                (None, None)
            }
        })
    }

    /// Encode and send; failures are logged and swallowed.
    fn send<P: WirePayload>(&self, recipient: Recipient, payload: &P) -> Option<MessageId> {
        let raw = match RawMessage::new(recipient, payload, self.config.resend_automatically) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Failed to encode {}: {}", P::MESSAGE_TYPE.as_str(), e);
                return None;
            }
        };
        match self.dispatch.send(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Dispatch of {} failed: {:#}", P::MESSAGE_TYPE.as_str(), e);
                None
            }
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingChanges> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// ChatClock
// ---------------------------------------------------------------------------

/// [`ClockSource`] backed by the chat store: the next clock is computed and
/// stored in one atomic update, so concurrent callers for a chat never get
/// the same value.
struct ChatClock {
    chats: Arc<dyn Store<ChatID, Chat>>,
    time: Arc<dyn TimeSource>,
}

impl ClockSource for ChatClock {
    fn next(&self, chat_id: &ChatID) -> (u64, u64) {
        let time = self.time.as_ref();
        update_with(self.chats.as_ref(), chat_id, |current| match current {
            Some(chat) => {
                let mut chat = chat.clone();
                let next = chat.next_clock_and_timestamp(time);
                (Some(chat), next)
            }
            None => {
                log::warn!("Clock requested for unknown chat {:?}", chat_id);
                (None, accord_protocol::clock::next_clock_and_timestamp(0, time))
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use accord_protocol::clock::ManualTimeSource;
    use accord_protocol::crypto::{Ed25519Signer, Ed25519Verifier};

    use crate::dispatch::RecordingDispatch;

    /// One messenger with its signer, outbox and clock.
    pub struct Node {
        pub messenger: Messenger,
        pub outbox: Arc<RecordingDispatch>,
        pub time: Arc<ManualTimeSource>,
    }

    impl Node {
        pub fn new(start_ms: u64) -> Self {
            let outbox = Arc::new(RecordingDispatch::new());
            let time = Arc::new(ManualTimeSource::new(start_ms));
            let messenger = Messenger::new(
                Arc::new(Ed25519Signer::generate()),
                Arc::new(Ed25519Verifier),
                outbox.clone(),
                time.clone(),
                MessengerConfig::default(),
            );
            Node {
                messenger,
                outbox,
                time,
            }
        }

        pub fn id(&self) -> IdentityKey {
            self.messenger.identity()
        }

        /// Deliver everything in this node's outbox addressed to `to`.
        pub fn deliver_to(&self, to: &Node) -> Vec<crate::response::MessengerResponse> {
            let me = self.id();
            let target = to.id();
            self.outbox
                .take()
                .into_iter()
                .filter(|raw| match &raw.recipient {
                    Recipient::Peer(p) => *p == target,
                    Recipient::Group { members, .. } => members.contains(&target),
                    Recipient::PairedDevices => false,
                })
                .map(|raw| to.messenger.handle_raw(&me, &raw.payload).unwrap())
                .collect()
        }
    }

    /// Two peers that completed a contact request exchange.
    pub fn mutual_pair() -> (Node, Node) {
        let a = Node::new(1_000);
        let b = Node::new(2_000);
        a.messenger.send_contact_request(&b.id(), "hi").unwrap();
        a.deliver_to(&b);
        b.messenger.accept_contact_request(&a.id()).unwrap();
        b.deliver_to(&a);
        a.outbox.take();
        b.outbox.take();
        (a, b)
    }
}
