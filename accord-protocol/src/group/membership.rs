/// Membership state: per-member add/remove clocks plus the admin set.
///
/// Events are replayed in `(clock, type rank, event id)` order. Each member
/// keeps the latest clock that added them and the latest clock that removed
/// them; a member is present iff the add clock is strictly greater. Because
/// removals replay after adds at the same clock, a removal wins a tie.
///
/// Every `apply_*` function enforces the permission gate for its event type
/// against the state as of that event's position in the replay.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::group::event::{EventType, MembershipUpdateEvent};
use crate::group::limits::MAX_MEMBERS_PER_EVENT;
use crate::ids::IdentityKey;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Group already created")]
    GroupAlreadyCreated,

    #[error("Chat id is not owned by the creator")]
    ChatIdMismatch,

    #[error("{0:?} is not a member")]
    NotMember(IdentityKey),

    #[error("{0:?} is not an admin")]
    NotAdmin(IdentityKey),

    #[error("Event names no members")]
    EmptyMembers,

    #[error("Event names too many members ({0})")]
    TooManyMembers(usize),

    #[error("{0:?} requires exactly one target")]
    SingleTargetRequired(EventType),

    #[error("{0:?} may not remove {1:?}")]
    RemoveNotAllowed(IdentityKey, IdentityKey),

    #[error("Admins must already be members")]
    AdminNotMember(IdentityKey),

    #[error("Only an admin may step down, and only for themselves")]
    AdminRemoveNotSelf,
}

// ---------------------------------------------------------------------------
// MemberEntry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberEntry {
    /// Latest clock of a `Created` / `MembersAdded` naming this member.
    pub added_clock: u64,
    /// Latest clock of a `MembersRemoved` naming this member.
    pub removed_clock: u64,
    pub admin: bool,
    /// True once the member published `MemberJoined`.
    pub joined: bool,
}

impl MemberEntry {
    pub fn is_present(&self) -> bool {
        self.added_clock > self.removed_clock
    }
}

// ---------------------------------------------------------------------------
// MembershipState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipState {
    entries: BTreeMap<IdentityKey, MemberEntry>,
    creator: Option<IdentityKey>,
}

impl MembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn creator(&self) -> Option<&IdentityKey> {
        self.creator.as_ref()
    }

    /// Read-only access to every member ever touched, present or not.
    pub fn entries(&self) -> &BTreeMap<IdentityKey, MemberEntry> {
        &self.entries
    }

    pub fn is_member(&self, id: &IdentityKey) -> bool {
        self.entries.get(id).map(|e| e.is_present()).unwrap_or(false)
    }

    pub fn is_admin(&self, id: &IdentityKey) -> bool {
        self.entries
            .get(id)
            .map(|e| e.is_present() && e.admin)
            .unwrap_or(false)
    }

    pub fn has_joined(&self, id: &IdentityKey) -> bool {
        self.entries
            .get(id)
            .map(|e| e.is_present() && e.joined)
            .unwrap_or(false)
    }

    /// Present members in key order.
    pub fn members(&self) -> Vec<IdentityKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_present())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Present admins in key order.
    pub fn admins(&self) -> Vec<IdentityKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_present() && e.admin)
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.creator.is_none() && !self.entries.values().any(|e| e.is_present())
    }

    /// Members and admins may edit name, color and image.
    pub fn can_edit_metadata(&self, id: &IdentityKey) -> Result<(), MembershipError> {
        if self.is_member(id) {
            Ok(())
        } else {
            Err(MembershipError::NotMember(*id))
        }
    }

    // -----------------------------------------------------------------------
    // Apply functions: called from the group replay
    // -----------------------------------------------------------------------

    /// The founding event: the signer becomes member and admin.
    pub fn apply_created(&mut self, event: &MembershipUpdateEvent) -> Result<(), MembershipError> {
        if !self.is_empty() {
            return Err(MembershipError::GroupAlreadyCreated);
        }
        if !event.chat_id.is_owned_by(&event.from) {
            return Err(MembershipError::ChatIdMismatch);
        }
        self.creator = Some(event.from);
        let entry = self.entries.entry(event.from).or_default();
        entry.added_clock = entry.added_clock.max(event.clock_value);
        entry.admin = true;
        Ok(())
    }

    pub fn apply_members_added(
        &mut self,
        event: &MembershipUpdateEvent,
    ) -> Result<(), MembershipError> {
        check_member_list(&event.members)?;
        if !self.is_member(&event.from) {
            return Err(MembershipError::NotMember(event.from));
        }
        for member in &event.members {
            let entry = self.entries.entry(*member).or_default();
            entry.added_clock = entry.added_clock.max(event.clock_value);
        }
        Ok(())
    }

    pub fn apply_member_joined(
        &mut self,
        event: &MembershipUpdateEvent,
    ) -> Result<(), MembershipError> {
        match self.entries.get_mut(&event.from) {
            Some(entry) if entry.is_present() => {
                entry.joined = true;
                Ok(())
            }
            _ => Err(MembershipError::NotMember(event.from)),
        }
    }

    /// Leave (signer removes themselves) or kick (admin removes a non-admin).
    pub fn apply_member_removed(
        &mut self,
        event: &MembershipUpdateEvent,
    ) -> Result<(), MembershipError> {
        let target = *event
            .single_target()
            .ok_or(MembershipError::SingleTargetRequired(EventType::MembersRemoved))?;

        let leaving = target == event.from;
        let kicking = self.is_admin(&event.from) && !self.is_admin(&target);
        if !leaving && !kicking {
            return Err(MembershipError::RemoveNotAllowed(event.from, target));
        }

        let entry = self.entries.entry(target).or_default();
        entry.removed_clock = entry.removed_clock.max(event.clock_value);
        if !entry.is_present() {
            entry.admin = false;
            entry.joined = false;
        }
        Ok(())
    }

    pub fn apply_admins_added(
        &mut self,
        event: &MembershipUpdateEvent,
    ) -> Result<(), MembershipError> {
        check_member_list(&event.members)?;
        if !self.is_admin(&event.from) {
            return Err(MembershipError::NotAdmin(event.from));
        }
        if let Some(outsider) = event.members.iter().find(|m| !self.is_member(m)) {
            return Err(MembershipError::AdminNotMember(*outsider));
        }
        for admin in &event.members {
            if let Some(entry) = self.entries.get_mut(admin) {
                entry.admin = true;
            }
        }
        Ok(())
    }

    /// An admin stepping down. Nobody can demote another admin.
    pub fn apply_admin_removed(
        &mut self,
        event: &MembershipUpdateEvent,
    ) -> Result<(), MembershipError> {
        let target = *event
            .single_target()
            .ok_or(MembershipError::SingleTargetRequired(EventType::AdminsRemoved))?;
        if !self.is_admin(&event.from) {
            return Err(MembershipError::NotAdmin(event.from));
        }
        if target != event.from {
            return Err(MembershipError::AdminRemoveNotSelf);
        }
        if let Some(entry) = self.entries.get_mut(&target) {
            entry.admin = false;
        }
        Ok(())
    }
}

fn check_member_list(members: &[IdentityKey]) -> Result<(), MembershipError> {
    if members.is_empty() {
        return Err(MembershipError::EmptyMembers);
    }
    if members.len() > MAX_MEMBERS_PER_EVENT {
        return Err(MembershipError::TooManyMembers(members.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{Ed25519Signer, EventSigner};
    use crate::group::event::EventBody;
    use crate::ids::ChatID;

    struct Fixture {
        creator: Ed25519Signer,
        alice: Ed25519Signer,
        bob: Ed25519Signer,
        chat_id: ChatID,
        state: MembershipState,
    }

    fn event(f: &Fixture, signer: &Ed25519Signer, body: EventBody) -> MembershipUpdateEvent {
        MembershipUpdateEvent::create_signed(&f.chat_id, body, signer).unwrap()
    }

    /// Helper: created at 1, alice and bob added at 2.
    fn setup() -> Fixture {
        let creator = Ed25519Signer::generate();
        let chat_id = ChatID::new_group(&creator.identity());
        let mut f = Fixture {
            alice: Ed25519Signer::generate(),
            bob: Ed25519Signer::generate(),
            creator,
            chat_id,
            state: MembershipState::new(),
        };
        let created = event(&f, &f.creator, EventBody::created("g", "#fff", 1));
        f.state.apply_created(&created).unwrap();
        let added = event(
            &f,
            &f.creator,
            EventBody::members_added(vec![f.alice.identity(), f.bob.identity()], 2),
        );
        f.state.apply_members_added(&added).unwrap();
        f
    }

    #[test]
    fn test_created_makes_creator_admin() {
        let f = setup();
        let creator = f.creator.identity();
        assert_eq!(f.state.creator(), Some(&creator));
        assert!(f.state.is_admin(&creator));
        assert!(f.state.is_member(&f.alice.identity()));
        assert!(!f.state.is_admin(&f.alice.identity()));
        assert_eq!(f.state.members().len(), 3);
    }

    #[test]
    fn test_second_create_rejected() {
        let mut f = setup();
        let again = event(&f, &f.creator, EventBody::created("g2", "#000", 3));
        assert_eq!(
            f.state.apply_created(&again),
            Err(MembershipError::GroupAlreadyCreated)
        );
    }

    #[test]
    fn test_create_with_foreign_chat_id_rejected() {
        let creator = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let chat_id = ChatID::new_group(&other.identity());
        let created =
            MembershipUpdateEvent::create_signed(&chat_id, EventBody::created("g", "", 1), &creator)
                .unwrap();
        let mut state = MembershipState::new();
        assert_eq!(state.apply_created(&created), Err(MembershipError::ChatIdMismatch));
    }

    #[test]
    fn test_non_member_cannot_add() {
        let mut f = setup();
        let outsider = Ed25519Signer::generate();
        let add = event(
            &f,
            &outsider,
            EventBody::members_added(vec![IdentityKey([5; 32])], 3),
        );
        assert_eq!(
            f.state.apply_members_added(&add),
            Err(MembershipError::NotMember(outsider.identity()))
        );
    }

    #[test]
    fn test_member_can_add() {
        let mut f = setup();
        let carol = IdentityKey([6; 32]);
        let add = event(&f, &f.alice, EventBody::members_added(vec![carol], 3));
        f.state.apply_members_added(&add).unwrap();
        assert!(f.state.is_member(&carol));
    }

    #[test]
    fn test_empty_add_rejected() {
        let mut f = setup();
        let add = event(&f, &f.creator, EventBody::members_added(vec![], 3));
        assert_eq!(f.state.apply_members_added(&add), Err(MembershipError::EmptyMembers));
    }

    #[test]
    fn test_leave_and_kick_rules() {
        let mut f = setup();
        let alice = f.alice.identity();
        let bob = f.bob.identity();

        // A plain member cannot kick another member.
        let kick = event(&f, &f.alice, EventBody::member_removed(bob, 3));
        assert_eq!(
            f.state.apply_member_removed(&kick),
            Err(MembershipError::RemoveNotAllowed(alice, bob))
        );

        // But can leave.
        let leave = event(&f, &f.alice, EventBody::member_removed(alice, 3));
        f.state.apply_member_removed(&leave).unwrap();
        assert!(!f.state.is_member(&alice));

        // Admin kicks a non-admin.
        let kick = event(&f, &f.creator, EventBody::member_removed(bob, 4));
        f.state.apply_member_removed(&kick).unwrap();
        assert!(!f.state.is_member(&bob));
    }

    #[test]
    fn test_admin_cannot_kick_admin() {
        let mut f = setup();
        let alice = f.alice.identity();
        let promote = event(&f, &f.creator, EventBody::admins_added(vec![alice], 3));
        f.state.apply_admins_added(&promote).unwrap();

        let kick = event(&f, &f.alice, EventBody::member_removed(f.creator.identity(), 4));
        assert!(f.state.apply_member_removed(&kick).is_err());
    }

    #[test]
    fn test_removal_wins_at_equal_clock() {
        let mut f = setup();
        let carol = IdentityKey([7; 32]);
        let add = event(&f, &f.creator, EventBody::members_added(vec![carol], 5));
        let remove = event(&f, &f.creator, EventBody::member_removed(carol, 5));
        f.state.apply_members_added(&add).unwrap();
        f.state.apply_member_removed(&remove).unwrap();
        assert!(!f.state.is_member(&carol));

        // A later add brings the member back.
        let readd = event(&f, &f.creator, EventBody::members_added(vec![carol], 6));
        f.state.apply_members_added(&readd).unwrap();
        assert!(f.state.is_member(&carol));
    }

    #[test]
    fn test_removed_admin_loses_admin() {
        let mut f = setup();
        let alice = f.alice.identity();
        let promote = event(&f, &f.creator, EventBody::admins_added(vec![alice], 3));
        f.state.apply_admins_added(&promote).unwrap();
        let leave = event(&f, &f.alice, EventBody::member_removed(alice, 4));
        f.state.apply_member_removed(&leave).unwrap();

        let readd = event(&f, &f.creator, EventBody::members_added(vec![alice], 5));
        f.state.apply_members_added(&readd).unwrap();
        assert!(f.state.is_member(&alice));
        assert!(!f.state.is_admin(&alice));
    }

    #[test]
    fn test_admins_must_be_members() {
        let mut f = setup();
        let outsider = IdentityKey([8; 32]);
        let promote = event(&f, &f.creator, EventBody::admins_added(vec![outsider], 3));
        assert_eq!(
            f.state.apply_admins_added(&promote),
            Err(MembershipError::AdminNotMember(outsider))
        );
    }

    #[test]
    fn test_member_cannot_promote() {
        let mut f = setup();
        let promote = event(&f, &f.alice, EventBody::admins_added(vec![f.bob.identity()], 3));
        assert_eq!(
            f.state.apply_admins_added(&promote),
            Err(MembershipError::NotAdmin(f.alice.identity()))
        );
    }

    #[test]
    fn test_admin_removed_only_self() {
        let mut f = setup();
        let alice = f.alice.identity();
        let promote = event(&f, &f.creator, EventBody::admins_added(vec![alice], 3));
        f.state.apply_admins_added(&promote).unwrap();

        let demote_other = event(&f, &f.creator, EventBody::admin_removed(alice, 4));
        assert_eq!(
            f.state.apply_admin_removed(&demote_other),
            Err(MembershipError::AdminRemoveNotSelf)
        );

        let step_down = event(&f, &f.alice, EventBody::admin_removed(alice, 4));
        f.state.apply_admin_removed(&step_down).unwrap();
        assert!(!f.state.is_admin(&alice));
        assert!(f.state.is_member(&alice));
    }

    #[test]
    fn test_joined_requires_membership() {
        let mut f = setup();
        let joined = event(&f, &f.alice, EventBody::member_joined(3));
        f.state.apply_member_joined(&joined).unwrap();
        assert!(f.state.has_joined(&f.alice.identity()));

        let outsider = Ed25519Signer::generate();
        let joined = event(&f, &outsider, EventBody::member_joined(3));
        assert!(f.state.apply_member_joined(&joined).is_err());
    }
}
