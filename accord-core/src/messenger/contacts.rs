//! Contact requests: local operations and inbound handlers.

use accord_protocol::chat::Chat;
use accord_protocol::contact::{Contact, ProcessingResponse};
use accord_protocol::error::require_clock;
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::message::Message;
use accord_protocol::protocol::{
    AcceptContactRequest, ChatMessage, ContactRequestMessage, ContactUpdate,
    RetractContactRequest, SyncContactRequestState,
};
use accord_protocol::ValidationError;

use super::Messenger;
use crate::dispatch::Recipient;
use crate::error::{MessengerError, Result};
use crate::identity::Identity;
use crate::response::{MessengerResponse, Notification};
use crate::store::update_with;

/// Outcome of a contact update after both the reconciliation and the
/// profile step ran under one store update.
struct ContactUpdateOutcome {
    contact: Contact,
    changed: bool,
    send_back: bool,
    new_request: bool,
}

impl Messenger {
    // -----------------------------------------------------------------------
    // Local operations
    // -----------------------------------------------------------------------

    /// Send a contact request carrying `text` to `peer`.
    pub fn send_contact_request(&self, peer: &IdentityKey, text: &str) -> Result<MessengerResponse> {
        self.check_not_self(peer)?;
        let (clock, timestamp) = self.next_clock_for_peer(peer);
        let (contact, _) = self.transition_contact(peer, |c| c.contact_request_sent(clock));

        let request = ContactRequestMessage {
            id: uuid::Uuid::new_v4().to_string(),
            clock,
            timestamp,
            text: text.to_string(),
        };
        let message = self.store_request_message(&self.identity(), peer, &request);

        log::info!("Contact request sent to {}", peer.short());
        self.send(Recipient::Peer(*peer), &request);
        self.sync_contact_state(&contact);

        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        response.add_message(message);
        if let Some(chat) = self.chats.load(&ChatID::one_to_one(peer)) {
            response.add_chat(chat);
        }
        Ok(response)
    }

    /// Add `peer` without a request message: the request travels in a
    /// contact update.
    pub fn add_contact(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        self.check_not_self(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let (contact, _) = self.transition_contact(peer, |c| c.contact_request_sent(clock));

        log::info!("Contact {} added", peer.short());
        self.send_contact_update(peer)?;
        self.sync_contact_state(&contact);

        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        Ok(response)
    }

    /// Accept the pending request from `peer`. Works even if this device
    /// never saw the request.
    pub fn accept_contact_request(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        self.check_not_self(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let (contact, _) = self.transition_contact(peer, |c| c.accept_contact_request(clock));

        let id = self
            .latest_message_from(peer)
            .map(|m| m.id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        log::info!("Contact request from {} accepted", peer.short());
        self.send(Recipient::Peer(*peer), &AcceptContactRequest { id, clock });
        self.sync_contact_state(&contact);

        let mut response = MessengerResponse::new();
        if contact.mutual() {
            if let Some(chat) = self.activate_chat(peer, clock) {
                response.add_chat(chat);
            }
        }
        response.add_contact(contact);
        Ok(response)
    }

    /// Withdraw our request (or end the relationship). Both tracks reset.
    pub fn retract_contact_request(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        let contact = self.require_contact(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let (contact, r) = self.transition_contact(&contact.id, |c| c.retract_contact_request(clock));

        let mut response = MessengerResponse::new();
        if r.processed {
            log::info!("Contact request to {} retracted", peer.short());
            self.send(Recipient::Peer(*peer), &RetractContactRequest { clock });
            self.sync_contact_state(&contact);
            if let Some(chat) = self.set_chat_active(peer, false) {
                response.add_chat(chat);
            }
        }
        response.add_contact(contact);
        Ok(response)
    }

    /// Decline an inbound request. Only our own devices are told.
    pub fn dismiss_contact_request(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        let contact = self.require_contact(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let (contact, r) = self.transition_contact(&contact.id, |c| c.dismiss_contact_request(clock));
        if r.processed {
            self.sync_contact_state(&contact);
        }
        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        Ok(response)
    }

    pub fn block_contact(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        self.check_not_self(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        // `blocked` sticks even when the clock is stale, so always write.
        let contact = update_with(self.contacts.as_ref(), peer, |current| {
            let existing = current.cloned().unwrap_or_else(|| Contact::new(*peer));
            let (next, _) = existing.block(clock);
            (Some(next.clone()), next)
        });
        let chat = self.update_chat(&ChatID::one_to_one(peer), |chat| chat.deactivate(clock));

        log::info!("Contact {} blocked", peer.short());
        self.sync_contact_state(&contact);

        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        if let Some(chat) = chat {
            response.add_chat(chat);
        }
        Ok(response)
    }

    pub fn unblock_contact(&self, peer: &IdentityKey) -> Result<MessengerResponse> {
        let contact = self.require_contact(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let (contact, _) = self.transition_contact(&contact.id, |c| c.unblock(clock));

        log::info!("Contact {} unblocked", peer.short());
        self.sync_contact_state(&contact);

        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        Ok(response)
    }

    pub fn set_nickname(&self, peer: &IdentityKey, nickname: &str) -> Result<MessengerResponse> {
        self.require_contact(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let contact = update_with(self.contacts.as_ref(), peer, |current| {
            let existing = current.cloned().unwrap_or_else(|| Contact::new(*peer));
            let (next, applied) = existing.set_nickname(clock, nickname);
            if applied {
                (Some(next.clone()), next)
            } else {
                (None, existing)
            }
        });
        let mut response = MessengerResponse::new();
        response.add_contact(contact);
        Ok(response)
    }

    /// Announce our profile and contact request state to `peer`.
    pub fn send_contact_update(&self, peer: &IdentityKey) -> Result<()> {
        let contact = self.require_contact(peer)?;
        let (clock, _) = self.next_clock_for_peer(peer);
        let update = ContactUpdate {
            clock,
            display_name: self.config.display_name.clone(),
            ens_name: self.config.ens_name.clone(),
            profile_image: String::new(),
            contact_request_clock: if contact.added() {
                contact.contact_request_local_clock
            } else {
                0
            },
            contact_request_propagated_state: Some(contact.propagated_state()),
            public_key: self.identity(),
        };
        self.send(Recipient::Peer(*peer), &update);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound handlers
    // -----------------------------------------------------------------------

    pub(crate) fn handle_contact_request(
        &self,
        sender: &IdentityKey,
        msg: &ContactRequestMessage,
    ) -> Result<MessengerResponse> {
        let mut response = MessengerResponse::new();
        let Some(peer) = self.peer_sender(sender)? else {
            return Ok(response);
        };
        require_clock(msg.clock)?;

        let (contact, r) = self.transition_contact(&peer.id, |c| c.contact_request_received(msg.clock));
        if r.new_request_received {
            log::info!("Contact request received from {}", sender.short());
            response.add_notification(Notification::ContactRequestReceived(*sender));
        }

        let message = self.store_request_message(sender, sender, msg);
        if let Some(chat) = self.update_chat(&ChatID::one_to_one(sender), |chat| {
            chat.receive_message(msg.clock)
        }) {
            response.add_chat(chat);
        }
        response.add_message(message);
        response.add_contact(contact);
        Ok(response)
    }

    pub(crate) fn handle_contact_update(
        &self,
        sender: &IdentityKey,
        msg: &ContactUpdate,
    ) -> Result<MessengerResponse> {
        let mut response = MessengerResponse::new();
        let Some(peer) = self.peer_sender(sender)? else {
            return Ok(response);
        };
        msg.validate(sender)?;

        let outcome = update_with(self.contacts.as_ref(), &peer.id, |current| {
            let mut contact = current.cloned().unwrap_or_else(|| Contact::new(*sender));
            let mut r = ProcessingResponse::default();
            let mut changed = false;

            if let Some(state) = &msg.contact_request_propagated_state {
                let (next, reconciled) = contact.contact_request_propagated_state_received(state);
                contact = next;
                r = reconciled;
                changed |= reconciled.processed;
            }

            if contact.last_updated < msg.clock {
                let (next, _) = contact.apply_profile_update(msg.clock, &msg.display_name, &msg.ens_name);
                contact = next;
                changed = true;
                if msg.contact_request_clock != 0 {
                    let (next, received) = contact.contact_request_received(msg.contact_request_clock);
                    contact = next;
                    r.new_request_received |= received.new_request_received;
                }
            } else {
                log::debug!(
                    "Stale contact update from {} (clock {} <= {})",
                    sender.short(),
                    msg.clock,
                    contact.last_updated
                );
            }

            let outcome = ContactUpdateOutcome {
                contact: contact.clone(),
                changed,
                send_back: r.send_back_state,
                new_request: r.new_request_received,
            };
            (changed.then_some(contact), outcome)
        });

        if outcome.send_back && self.config.send_back_state_enabled {
            log::debug!("Peer {} is behind on our state, sending it back", sender.short());
            self.send_contact_update(sender)?;
        }
        if outcome.new_request {
            response.add_notification(Notification::ContactRequestReceived(*sender));
        }

        if outcome.contact.mutual() {
            if let Some(chat) = self.activate_chat(sender, msg.clock) {
                response.add_chat(chat);
            }
        }
        if outcome.changed {
            response.add_contact(outcome.contact);
        }
        Ok(response)
    }

    pub(crate) fn handle_accept_contact_request(
        &self,
        sender: &IdentityKey,
        msg: &AcceptContactRequest,
    ) -> Result<MessengerResponse> {
        let mut response = MessengerResponse::new();
        let Some(peer) = self.peer_sender(sender)? else {
            return Ok(response);
        };
        require_clock(msg.clock)?;

        if peer.contact_request_remote_clock > msg.clock {
            log::debug!("Outdated accept from {} ignored", sender.short());
            return Ok(response);
        }

        let (contact, r) = self.transition_contact(sender, |c| c.contact_request_accepted(msg.clock));
        if !r.processed {
            return Ok(response);
        }
        if contact.mutual() {
            log::info!("Contact request accepted by {}", sender.short());
            response.add_notification(Notification::ContactRequestAccepted(*sender));
            if let Some(chat) = self.activate_chat(sender, msg.clock) {
                response.add_chat(chat);
            }
        }
        response.add_contact(contact);
        Ok(response)
    }

    pub(crate) fn handle_retract_contact_request(
        &self,
        sender: &IdentityKey,
        msg: &RetractContactRequest,
    ) -> Result<MessengerResponse> {
        let mut response = MessengerResponse::new();
        if self.peer_sender(sender)?.is_none() {
            return Ok(response);
        }
        require_clock(msg.clock)?;

        let (contact, r) =
            self.transition_contact(sender, |c| c.contact_request_retracted(msg.clock, false));
        if !r.processed {
            return Ok(response);
        }

        log::info!("Contact {} retracted their request", sender.short());
        if let Some(chat) = self.update_chat(&ChatID::one_to_one(sender), |chat| {
            chat.update_from_message(msg.clock);
            chat.active = false;
            true
        }) {
            response.add_chat(chat);
        }
        response.add_notification(Notification::ContactRemoved(*sender));
        response.add_contact(contact);
        Ok(response)
    }

    /// Contact state pushed by one of our own devices.
    pub(crate) fn handle_sync_contact_request_state(
        &self,
        sender: &IdentityKey,
        msg: &SyncContactRequestState,
    ) -> Result<MessengerResponse> {
        if sender != &self.identity() {
            return Err(ValidationError::NotPermitted(format!(
                "contact state sync from {}",
                sender.short()
            ))
            .into());
        }
        let (local_state, remote_state) = msg.states()?;

        let (contact, r) = self.transition_contact(&msg.contact_id, |c| {
            c.process_sync_contact_request_state(
                remote_state,
                msg.remote_clock,
                local_state,
                msg.local_clock,
            )
        });

        let mut response = MessengerResponse::new();
        if r.processed {
            response.add_contact(contact);
        }
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Run a contact transition atomically; the contact is written only when
    /// the transition processed something.
    pub(super) fn transition_contact(
        &self,
        id: &IdentityKey,
        step: impl FnOnce(&Contact) -> (Contact, ProcessingResponse),
    ) -> (Contact, ProcessingResponse) {
        update_with(self.contacts.as_ref(), id, |current| {
            let existing = current.cloned().unwrap_or_else(|| Contact::new(*id));
            let (next, r) = step(&existing);
            if r.processed {
                (Some(next.clone()), (next, r))
            } else {
                log::debug!("Contact {} transition was stale", id.short());
                (None, (existing, r))
            }
        })
    }

    /// Resolve the sender of an inbound contact message. `None` means it came
    /// from one of our own devices and is ignored; blocked peers are rejected.
    fn peer_sender(&self, sender: &IdentityKey) -> Result<Option<Contact>> {
        match Identity::resolve(&self.identity(), sender, self.contacts.as_ref()) {
            Identity::SelfContact => {
                log::debug!("Ignoring contact message from self");
                Ok(None)
            }
            identity if identity.is_blocked() => Err(MessengerError::MessageNotAllowed(*sender)),
            Identity::Peer(contact) => Ok(Some(contact)),
        }
    }

    fn check_not_self(&self, peer: &IdentityKey) -> Result<()> {
        if peer == &self.identity() {
            return Err(ValidationError::NotPermitted("contact request to self".into()).into());
        }
        Ok(())
    }

    pub(super) fn require_contact(&self, peer: &IdentityKey) -> Result<Contact> {
        self.contacts
            .load(peer)
            .ok_or(MessengerError::ContactNotFound(*peer))
    }

    fn sync_contact_state(&self, contact: &Contact) {
        let sync = SyncContactRequestState {
            contact_id: contact.id,
            local_state: contact.contact_request_local_state.as_u64(),
            local_clock: contact.contact_request_local_clock,
            remote_state: contact.contact_request_remote_state.as_u64(),
            remote_clock: contact.contact_request_remote_clock,
        };
        self.send(Recipient::PairedDevices, &sync);
    }

    /// Raise the one-to-one chat's clock and reactivate it unless it was
    /// deleted after `clock`.
    fn activate_chat(&self, peer: &IdentityKey, clock: u64) -> Option<Chat> {
        self.ensure_one_to_one(peer);
        self.update_chat(&ChatID::one_to_one(peer), |chat| {
            let raised = chat.update_from_message(clock);
            let reactivate = !chat.active && chat.deleted_at_clock_value < clock;
            if reactivate {
                chat.active = true;
            }
            raised || reactivate
        })
    }

    fn set_chat_active(&self, peer: &IdentityKey, active: bool) -> Option<Chat> {
        self.update_chat(&ChatID::one_to_one(peer), |chat| {
            let changed = chat.active != active;
            chat.active = active;
            changed
        })
    }

    /// Persist a request message in the one-to-one chat with `peer`.
    fn store_request_message(
        &self,
        from: &IdentityKey,
        peer: &IdentityKey,
        request: &ContactRequestMessage,
    ) -> Message {
        let chat_id = self.ensure_one_to_one(peer);
        let chat_message = ChatMessage {
            id: request.id.clone(),
            chat_id,
            clock: request.clock,
            timestamp: request.timestamp,
            text: request.text.clone(),
        };
        let message = Message::from_chat_message(&chat_message, *from);
        self.messages.store(message.id.clone(), message.clone());
        message
    }

    fn latest_message_from(&self, peer: &IdentityKey) -> Option<Message> {
        let chat_id = ChatID::one_to_one(peer);
        let mut latest: Option<Message> = None;
        self.messages.range(&mut |_, m| {
            if &m.from == peer
                && m.chat_id == chat_id
                && latest.as_ref().map_or(true, |l| m.clock > l.clock)
            {
                latest = Some(m.clone());
            }
            true
        });
        latest
    }
}
