//! Private group chats backed by the signed membership log.

use accord_protocol::chat::Chat;
use accord_protocol::clock::{next_clock_and_timestamp, ClockSource};
use accord_protocol::crypto::EventSigner;
use accord_protocol::group::{Group, GroupError, MembershipUpdateEvent};
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::protocol::MembershipUpdateMessage;

use super::Messenger;
use crate::dispatch::Recipient;
use crate::error::{MessengerError, Result};
use crate::identity::Identity;
use crate::response::{MessengerResponse, Notification};
use crate::store::update_with;

impl Messenger {
    // -----------------------------------------------------------------------
    // Local operations
    // -----------------------------------------------------------------------

    /// Create a group chat with `members`, all of whom must be mutual
    /// contacts.
    pub fn create_group_chat(
        &self,
        name: &str,
        color: &str,
        members: &[IdentityKey],
    ) -> Result<MessengerResponse> {
        let me = self.identity();
        let invited: Vec<IdentityKey> = members.iter().filter(|m| **m != me).copied().collect();
        self.check_mutual_contacts(&invited)?;

        let (clock, _) = next_clock_and_timestamp(0, self.clock.time.as_ref());
        let (mut group, _) = Group::create(name, color, clock, self.signer.as_ref())?;
        if !invited.is_empty() {
            group = group.add_members(invited, clock + 1, self.signer.as_ref())?.0;
        }
        let chat_id = group.chat_id().clone();

        self.groups.store(chat_id.clone(), group.clone());
        let chat = Chat::from_group(&group);
        self.chats.store(chat_id.clone(), chat.clone());

        log::info!(
            "Group {:?} created with {} members",
            chat_id,
            group.members().len()
        );
        self.send_group_events(&group, &group.members());

        let mut response = MessengerResponse::new();
        response.add_chat(chat);
        Ok(response)
    }

    pub fn add_members_to_group(
        &self,
        chat_id: &ChatID,
        members: &[IdentityKey],
    ) -> Result<MessengerResponse> {
        self.check_mutual_contacts(members)?;
        let members = members.to_vec();
        self.author_group_event(chat_id, false, |group, clock, signer| {
            group.add_members(members, clock, signer)
        })
    }

    /// Kick a non-admin member. Admins only.
    pub fn remove_member_from_group(
        &self,
        chat_id: &ChatID,
        member: &IdentityKey,
    ) -> Result<MessengerResponse> {
        let member = *member;
        self.author_group_event(chat_id, true, |group, clock, signer| {
            group.remove_member(member, clock, signer)
        })
    }

    pub fn add_group_admins(
        &self,
        chat_id: &ChatID,
        admins: &[IdentityKey],
    ) -> Result<MessengerResponse> {
        let admins = admins.to_vec();
        self.author_group_event(chat_id, true, |group, clock, signer| {
            group.add_admins(admins, clock, signer)
        })
    }

    /// Give up our own admin rights.
    pub fn resign_group_admin(&self, chat_id: &ChatID) -> Result<MessengerResponse> {
        self.author_group_event(chat_id, true, |group, clock, signer| {
            group.remove_admin(clock, signer)
        })
    }

    /// Confirm an invitation.
    pub fn join_group(&self, chat_id: &ChatID) -> Result<MessengerResponse> {
        self.author_group_event(chat_id, false, |group, clock, signer| {
            group.join(clock, signer)
        })
    }

    pub fn leave_group(&self, chat_id: &ChatID) -> Result<MessengerResponse> {
        let mut response = self.author_group_event(chat_id, false, |group, clock, signer| {
            group.leave(clock, signer)
        })?;
        if let Some(chat) = self.update_chat(chat_id, |chat| {
            let was_active = chat.active;
            chat.active = false;
            was_active
        }) {
            response.add_chat(chat);
        }
        Ok(response)
    }

    pub fn rename_group(&self, chat_id: &ChatID, name: &str) -> Result<MessengerResponse> {
        self.author_group_event(chat_id, false, |group, clock, signer| {
            group.rename(name, clock, signer)
        })
    }

    pub fn recolor_group(&self, chat_id: &ChatID, color: &str) -> Result<MessengerResponse> {
        self.author_group_event(chat_id, false, |group, clock, signer| {
            group.recolor(color, clock, signer)
        })
    }

    /// Set the group image (JPEG bytes).
    pub fn set_group_image(&self, chat_id: &ChatID, image: Vec<u8>) -> Result<MessengerResponse> {
        self.author_group_event(chat_id, false, |group, clock, signer| {
            group.reimage(image, clock, signer)
        })
    }

    // -----------------------------------------------------------------------
    // Inbound handler
    // -----------------------------------------------------------------------

    pub(crate) fn handle_membership_update(
        &self,
        sender: &IdentityKey,
        msg: &MembershipUpdateMessage,
    ) -> Result<MessengerResponse> {
        msg.validate()?;
        let me = self.identity();
        let identity = Identity::resolve(&me, sender, self.contacts.as_ref());
        if identity.is_blocked() {
            return Err(MessengerError::MessageNotAllowed(*sender));
        }

        let verifier = self.verifier.as_ref();
        let (group, was_member, is_new) =
            update_with(self.groups.as_ref(), &msg.chat_id, |current| {
                let merged = match current {
                    None => Group::from_events(msg.chat_id.clone(), &msg.events, &me, verifier)
                        .map(|group| (group, false)),
                    Some(existing) => existing
                        .merge(&msg.events, verifier)
                        .map(|(group, _)| (group, existing.is_member(&me))),
                };
                match merged {
                    Ok((group, was_member)) => (
                        Some(group.clone()),
                        Ok((group, was_member, current.is_none())),
                    ),
                    Err(e) => (None, Err(e)),
                }
            })?;

        // Invitations from strangers land inactive until the user accepts.
        let sender_trusted = identity.is_self()
            || identity.contact().map_or(false, |c| c.added())
            || group
                .creator()
                .map_or(false, |creator| self.is_mutual_contact(creator));
        let is_member = group.is_member(&me);
        let was_user_added = !was_member && is_member;

        let chat = update_with(self.chats.as_ref(), &msg.chat_id, |current| {
            let mut chat = match current {
                Some(chat) => {
                    let mut chat = chat.clone();
                    chat.apply_group(&group);
                    chat
                }
                None => {
                    let mut chat = Chat::from_group(&group);
                    chat.active = false;
                    chat
                }
            };
            if !is_member {
                chat.active = false;
            } else if sender_trusted {
                chat.active = true;
            }
            (Some(chat.clone()), chat)
        });

        if is_new {
            log::info!(
                "Group {:?} received from {} ({} events)",
                msg.chat_id,
                sender.short(),
                group.event_count()
            );
        }

        let mut response = MessengerResponse::new();
        if was_user_added && sender_trusted && sender != &me {
            response.add_notification(Notification::GroupInvitation {
                chat_id: msg.chat_id.clone(),
                from: *sender,
            });
        }
        response.add_chat(chat);
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Sign one event against the stored group, write the result back and
    /// send the log to everyone who was or now is a member.
    fn author_group_event(
        &self,
        chat_id: &ChatID,
        admin_only: bool,
        step: impl FnOnce(
            &Group,
            u64,
            &dyn EventSigner,
        ) -> std::result::Result<(Group, MembershipUpdateEvent), GroupError>,
    ) -> Result<MessengerResponse> {
        let me = self.identity();
        let group = self
            .groups
            .load(chat_id)
            .ok_or_else(|| MessengerError::ChatNotFound(chat_id.clone()))?;
        if admin_only && !group.is_admin(&me) {
            return Err(MessengerError::NotControlNode(chat_id.clone()));
        }

        let (clock, _) = self.clock.next(chat_id);
        let signer = self.signer.as_ref();
        let (before, after) = update_with(self.groups.as_ref(), chat_id, |current| {
            let Some(current) = current else {
                return (None, Err(MessengerError::ChatNotFound(chat_id.clone())));
            };
            match step(current, clock, signer) {
                Ok((next, event)) => {
                    log::debug!("Authored {} in {:?}", event.event_type.as_str(), chat_id);
                    (Some(next.clone()), Ok((current.members(), next)))
                }
                Err(e) => (None, Err(MessengerError::from(e))),
            }
        })?;

        let chat = self.update_chat(chat_id, |chat| {
            chat.apply_group(&after);
            true
        });

        let mut recipients = before;
        recipients.extend(after.members());
        self.send_group_events(&after, &recipients);

        let mut response = MessengerResponse::new();
        if let Some(chat) = chat {
            response.add_chat(chat);
        }
        Ok(response)
    }

    /// Send the group's log to `members` other than ourselves.
    fn send_group_events(&self, group: &Group, members: &[IdentityKey]) {
        let me = self.identity();
        let mut members: Vec<IdentityKey> = members.iter().filter(|m| **m != me).copied().collect();
        members.sort();
        members.dedup();
        if members.is_empty() {
            return;
        }
        let update = MembershipUpdateMessage::new(group.chat_id().clone(), group.events_for_sync());
        self.send(
            Recipient::Group {
                chat_id: group.chat_id().clone(),
                members,
            },
            &update,
        );
    }

    fn is_mutual_contact(&self, id: &IdentityKey) -> bool {
        self.contacts.load(id).map_or(false, |c| c.mutual())
    }

    /// Only mutual contacts can be added to a group.
    fn check_mutual_contacts(&self, members: &[IdentityKey]) -> Result<()> {
        match members.iter().find(|m| !self.is_mutual_contact(m)) {
            Some(outsider) => Err(MessengerError::GroupChatAddedContacts(*outsider)),
            None => Ok(()),
        }
    }
}
