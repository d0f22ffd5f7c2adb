/// Group membership log: the single entry point for building and merging
/// signed membership events.
///
/// `Group` holds the full event set for one chat plus the state derived from
/// it: membership, admins, metadata. Merging is a set union by event id
/// followed by a fresh replay, so `merge(a, b)` and `merge(b, a)` derive the
/// same group and merging the same events again changes nothing.
///
/// **Determinism guarantee:** events replay in `(clock, type rank, event id)`
/// order, so any delivery order of the same event set produces the same
/// `state_hash`.
///
/// Permission gates run during replay. A merge whose *new* events fail their
/// gate is rejected as a whole and the previous group is kept. Events that
/// were accepted earlier but fail after a reordering are skipped: they stay
/// in the local log so a later reordering can revive them, but they are
/// never handed out by [`Group::events`] or [`Group::events_for_sync`], so a
/// peer that rejected them never receives them again.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::crypto::signing::{EventSigner, SignatureVerifier};
use crate::group::event::{EventBody, EventError, EventId, EventType, MembershipUpdateEvent};
use crate::group::limits::{check_log_limits, LogLimitStatus, HARD_CAP_EVENTS_PER_GROUP};
use crate::group::membership::{MembershipError, MembershipState};
use crate::group::metadata::{MetadataError, MetadataState};
use crate::ids::{ChatID, IdentityKey};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Event belongs to chat {0}")]
    WrongChat(ChatID),

    #[error("Group log has no valid Created event")]
    NotCreated,

    #[error("{0:?} was never a member of this group")]
    NeverMember(IdentityKey),

    #[error("Hard event limit reached")]
    LogLimitReached,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Group {
    chat_id: ChatID,
    events: BTreeMap<EventId, MembershipUpdateEvent>,
    membership: MembershipState,
    metadata: MetadataState,
    /// Accepted events that the current replay skips.
    skipped: BTreeSet<EventId>,
}

struct Derived {
    membership: MembershipState,
    metadata: MetadataState,
    rejected: BTreeMap<EventId, GroupError>,
}

impl Group {
    /// Start a new group owned by `signer`.
    pub fn create(
        name: &str,
        color: &str,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        let chat_id = ChatID::new_group(&signer.identity());
        let created = MembershipUpdateEvent::create_signed(
            &chat_id,
            EventBody::created(name, color, clock),
            signer,
        )?;
        let group = Group::empty(chat_id).merge_verified(vec![created.clone()])?.0;
        Ok((group, created))
    }

    /// Build a group from a received event set. Every event must verify and
    /// pass its permission gate, and `me` must have been a member at some
    /// point.
    pub fn from_events(
        chat_id: ChatID,
        events: &[MembershipUpdateEvent],
        me: &IdentityKey,
        verifier: &dyn SignatureVerifier,
    ) -> Result<Self, GroupError> {
        let (group, _) = Group::empty(chat_id).merge(events, verifier)?;
        if group.creator().is_none() {
            return Err(GroupError::NotCreated);
        }
        if !group.was_ever_member(me) {
            return Err(GroupError::NeverMember(*me));
        }
        Ok(group)
    }

    fn empty(chat_id: ChatID) -> Self {
        Group {
            chat_id,
            events: BTreeMap::new(),
            membership: MembershipState::new(),
            metadata: MetadataState::new(),
            skipped: BTreeSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Verify and merge `incoming` into a copy of this group.
    ///
    /// Returns the merged group and the ids of events that were new.
    pub fn merge(
        &self,
        incoming: &[MembershipUpdateEvent],
        verifier: &dyn SignatureVerifier,
    ) -> Result<(Self, Vec<EventId>), GroupError> {
        let mut fresh = Vec::new();
        for event in incoming {
            if event.chat_id != self.chat_id {
                return Err(GroupError::WrongChat(event.chat_id.clone()));
            }
            if self.events.contains_key(&event.id()) {
                continue;
            }
            event.verify(verifier)?;
            fresh.push(event.clone());
        }
        self.merge_verified(fresh)
    }

    fn merge_verified(
        &self,
        fresh: Vec<MembershipUpdateEvent>,
    ) -> Result<(Self, Vec<EventId>), GroupError> {
        let mut events = self.events.clone();
        let mut new_ids = Vec::new();
        for event in fresh {
            let id = event.id();
            if events.insert(id, event).is_none() {
                new_ids.push(id);
            }
        }
        if new_ids.is_empty() {
            return Ok((self.clone(), new_ids));
        }

        if events.len() > HARD_CAP_EVENTS_PER_GROUP {
            log::warn!(
                "Group {:?} at hard cap ({} events), rejecting merge",
                self.chat_id,
                HARD_CAP_EVENTS_PER_GROUP
            );
            return Err(GroupError::LogLimitReached);
        }

        let derived = derive(&events);
        if let Some(err) = new_ids.iter().find_map(|id| derived.rejected.get(id)) {
            log::warn!("Rejecting membership update for {:?}: {}", self.chat_id, err);
            return Err(err.clone());
        }

        let group = Group {
            chat_id: self.chat_id.clone(),
            events,
            membership: derived.membership,
            metadata: derived.metadata,
            skipped: derived.rejected.into_keys().collect(),
        };
        Ok((group, new_ids))
    }

    // -----------------------------------------------------------------------
    // Local mutations: each signs one event and merges it
    // -----------------------------------------------------------------------

    fn author(
        &self,
        body: EventBody,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        let event = MembershipUpdateEvent::create_signed(&self.chat_id, body, signer)?;
        let (group, _) = self.merge_verified(vec![event.clone()])?;
        Ok((group, event))
    }

    pub fn add_members(
        &self,
        members: Vec<IdentityKey>,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::members_added(members, clock), signer)
    }

    pub fn remove_member(
        &self,
        member: IdentityKey,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::member_removed(member, clock), signer)
    }

    pub fn leave(
        &self,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::member_removed(signer.identity(), clock), signer)
    }

    pub fn join(
        &self,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::member_joined(clock), signer)
    }

    pub fn add_admins(
        &self,
        admins: Vec<IdentityKey>,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::admins_added(admins, clock), signer)
    }

    /// Step down as admin.
    pub fn remove_admin(
        &self,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::admin_removed(signer.identity(), clock), signer)
    }

    pub fn rename(
        &self,
        name: &str,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::name_changed(name, clock), signer)
    }

    pub fn recolor(
        &self,
        color: &str,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::color_changed(color, clock), signer)
    }

    pub fn reimage(
        &self,
        image: Vec<u8>,
        clock: u64,
        signer: &dyn EventSigner,
    ) -> Result<(Self, MembershipUpdateEvent), GroupError> {
        self.author(EventBody::image_changed(image, clock), signer)
    }

    // -----------------------------------------------------------------------
    // Derived view
    // -----------------------------------------------------------------------

    pub fn chat_id(&self) -> &ChatID {
        &self.chat_id
    }

    pub fn creator(&self) -> Option<&IdentityKey> {
        self.membership.creator()
    }

    pub fn members(&self) -> Vec<IdentityKey> {
        self.membership.members()
    }

    pub fn admins(&self) -> Vec<IdentityKey> {
        self.membership.admins()
    }

    pub fn is_member(&self, id: &IdentityKey) -> bool {
        self.membership.is_member(id)
    }

    pub fn is_admin(&self, id: &IdentityKey) -> bool {
        self.membership.is_admin(id)
    }

    pub fn has_joined(&self, id: &IdentityKey) -> bool {
        self.membership.has_joined(id)
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn color(&self) -> &str {
        self.metadata.color()
    }

    pub fn image(&self) -> &[u8] {
        self.metadata.image()
    }

    pub fn metadata(&self) -> &MetadataState {
        &self.metadata
    }

    pub fn membership(&self) -> &MembershipState {
        &self.membership
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Ids of logged events that the current replay does not apply.
    pub fn skipped(&self) -> &BTreeSet<EventId> {
        &self.skipped
    }

    /// Highest clock in the log.
    pub fn last_clock_value(&self) -> u64 {
        self.events.values().map(|e| e.clock_value).max().unwrap_or(0)
    }

    /// Creator, or named in any `MembersAdded` event.
    pub fn was_ever_member(&self, id: &IdentityKey) -> bool {
        if self.creator() == Some(id) {
            return true;
        }
        self.applied()
            .any(|e| e.event_type == EventType::MembersAdded && e.members.contains(id))
    }

    fn applied(&self) -> impl Iterator<Item = &MembershipUpdateEvent> + '_ {
        sorted(&self.events)
            .into_iter()
            .filter(|e| !self.skipped.contains(&e.id()))
    }

    /// Applied events in replay order. Skipped events stay local.
    pub fn events(&self) -> Vec<MembershipUpdateEvent> {
        self.applied().cloned().collect()
    }

    /// The events to send to a peer: the full log, or the abridged set once
    /// the log needs compaction.
    pub fn events_for_sync(&self) -> Vec<MembershipUpdateEvent> {
        match check_log_limits(self.events.len()) {
            LogLimitStatus::Ok => self.events(),
            _ => self.abridged_events(),
        }
    }

    /// Minimal event set that still derives the current members: the created
    /// event, the latest name/color/image change, admin events, the latest
    /// add of each current member, and removals for anyone those adds bring
    /// back who has since been removed.
    pub fn abridged_events(&self) -> Vec<MembershipUpdateEvent> {
        let mut kept: Vec<&MembershipUpdateEvent> = Vec::new();
        let mut name_found = false;
        let mut color_found = false;
        let mut image_found = false;
        let mut removals: BTreeMap<IdentityKey, &MembershipUpdateEvent> = BTreeMap::new();
        let mut added: BTreeSet<IdentityKey> = BTreeSet::new();
        let mut extra: BTreeSet<IdentityKey> = BTreeSet::new();
        let mut admins: BTreeSet<IdentityKey> = BTreeSet::new();

        let applied: Vec<&MembershipUpdateEvent> = self.applied().collect();
        for event in applied.into_iter().rev() {
            match event.event_type {
                EventType::Created => kept.push(event),
                EventType::NameChanged if !name_found => {
                    name_found = true;
                    kept.push(event);
                }
                EventType::ColorChanged if !color_found => {
                    color_found = true;
                    kept.push(event);
                }
                EventType::ImageChanged if !image_found => {
                    image_found = true;
                    kept.push(event);
                }
                EventType::NameChanged | EventType::ColorChanged | EventType::ImageChanged => {}
                EventType::MembersAdded => {
                    let mut keep = false;
                    for m in &event.members {
                        if admins.contains(m) || (self.is_member(m) && !added.contains(m)) {
                            added.insert(*m);
                            keep = true;
                        }
                    }
                    if keep {
                        for m in &event.members {
                            if !self.is_member(m) && !admins.contains(m) {
                                extra.insert(*m);
                            }
                        }
                        kept.push(event);
                    }
                }
                EventType::AdminsAdded => {
                    admins.extend(event.members.iter().copied());
                    kept.push(event);
                }
                EventType::AdminsRemoved => kept.push(event),
                EventType::MembersRemoved => {
                    if let Some(target) = event.single_target() {
                        // Reverse replay order: the first removal seen is the latest.
                        removals.entry(*target).or_insert(event);
                    }
                }
                EventType::MemberJoined => {
                    if self.is_member(&event.from) {
                        kept.push(event);
                    }
                }
            }
        }

        for m in &extra {
            if let Some(removal) = removals.get(m) {
                kept.push(removal);
            }
        }

        kept.sort_by_key(|e| e.replay_key());
        kept.dedup_by_key(|e| e.id());
        kept.into_iter().cloned().collect()
    }

    /// Deterministic hash of the derived state for convergence checks.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.chat_id.as_bytes());

        // --- Membership ---
        hasher.update(b"M");
        for (id, entry) in self.membership.entries() {
            if !entry.is_present() {
                continue;
            }
            hasher.update(id.as_bytes());
            hasher.update(&[entry.admin as u8, entry.joined as u8]);
        }

        // --- Metadata ---
        hasher.update(b"D");
        for value in [self.name().as_bytes(), self.color().as_bytes(), self.image()] {
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }

        *hasher.finalize().as_bytes()
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

fn sorted(events: &BTreeMap<EventId, MembershipUpdateEvent>) -> Vec<&MembershipUpdateEvent> {
    let mut ordered: Vec<(u64, u8, EventId, &MembershipUpdateEvent)> = events
        .iter()
        .map(|(id, e)| (e.clock_value, e.event_type.replay_rank(), *id, e))
        .collect();
    ordered.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    ordered.into_iter().map(|(_, _, _, e)| e).collect()
}

fn derive(events: &BTreeMap<EventId, MembershipUpdateEvent>) -> Derived {
    let mut derived = Derived {
        membership: MembershipState::new(),
        metadata: MetadataState::new(),
        rejected: BTreeMap::new(),
    };
    for event in sorted(events) {
        let id = event.id();
        if let Err(e) = apply_event(&mut derived.membership, &mut derived.metadata, event, id) {
            log::debug!(
                "Skipping {} at clock {} from {:?}: {}",
                event.event_type.as_str(),
                event.clock_value,
                event.from,
                e
            );
            derived.rejected.insert(id, e);
        }
    }
    derived
}

fn apply_event(
    membership: &mut MembershipState,
    metadata: &mut MetadataState,
    event: &MembershipUpdateEvent,
    id: EventId,
) -> Result<(), GroupError> {
    match event.event_type {
        EventType::Created => {
            membership.apply_created(event)?;
            metadata.apply_created(event, id);
        }
        EventType::NameChanged => {
            membership.can_edit_metadata(&event.from)?;
            metadata.apply_name_changed(event, id)?;
        }
        EventType::ColorChanged => {
            membership.can_edit_metadata(&event.from)?;
            metadata.apply_color_changed(event, id)?;
        }
        EventType::ImageChanged => {
            membership.can_edit_metadata(&event.from)?;
            metadata.apply_image_changed(event, id)?;
        }
        EventType::MembersAdded => membership.apply_members_added(event)?,
        EventType::MemberJoined => membership.apply_member_joined(event)?,
        EventType::MembersRemoved => membership.apply_member_removed(event)?,
        EventType::AdminsAdded => membership.apply_admins_added(event)?,
        EventType::AdminsRemoved => membership.apply_admin_removed(event)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{Ed25519Signer, Ed25519Verifier};

    const V: Ed25519Verifier = Ed25519Verifier;

    /// Helper: A creates at clock 1 and adds B at clock 2.
    fn setup() -> (Group, Ed25519Signer, Ed25519Signer) {
        let a = Ed25519Signer::generate();
        let b = Ed25519Signer::generate();
        let (group, _) = Group::create("Trip", "#00ff00", 1, &a).unwrap();
        let (group, _) = group.add_members(vec![b.identity()], 2, &a).unwrap();
        (group, a, b)
    }

    #[test]
    fn test_create_derives_creator_and_metadata() {
        let a = Ed25519Signer::generate();
        let (group, created) = Group::create("Trip", "#00ff00", 1, &a).unwrap();
        assert_eq!(group.creator(), Some(&a.identity()));
        assert_eq!(group.members(), vec![a.identity()]);
        assert_eq!(group.admins(), vec![a.identity()]);
        assert_eq!(group.name(), "Trip");
        assert_eq!(group.color(), "#00ff00");
        assert_eq!(created.event_type, EventType::Created);
        assert!(group.chat_id().is_owned_by(&a.identity()));
    }

    #[test]
    fn test_from_events_requires_prior_membership() {
        let (group, _, b) = setup();
        let outsider = Ed25519Signer::generate();

        let rebuilt =
            Group::from_events(group.chat_id().clone(), &group.events(), &b.identity(), &V)
                .unwrap();
        assert_eq!(rebuilt.state_hash(), group.state_hash());

        let err = Group::from_events(
            group.chat_id().clone(),
            &group.events(),
            &outsider.identity(),
            &V,
        )
        .unwrap_err();
        assert_eq!(err, GroupError::NeverMember(outsider.identity()));
    }

    #[test]
    fn test_from_events_without_created_fails() {
        let (group, _, b) = setup();
        let without_created: Vec<_> = group
            .events()
            .into_iter()
            .filter(|e| e.event_type != EventType::Created)
            .collect();
        let err = Group::from_events(group.chat_id().clone(), &without_created, &b.identity(), &V)
            .unwrap_err();
        assert!(matches!(err, GroupError::Membership(MembershipError::NotMember(_))));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let (group, a, b) = setup();
        let c = Ed25519Signer::generate();
        let (g1, e1) = group.add_members(vec![c.identity()], 3, &a).unwrap();
        let (_, e2) = group.rename("Hike", 3, &b).unwrap();
        let (_, e3) = g1.remove_member(c.identity(), 4, &a).unwrap();

        let forward = group.merge(&[e1.clone(), e2.clone(), e3.clone()], &V).unwrap().0;
        let backward = group.merge(&[e3, e2, e1], &V).unwrap().0;

        assert_eq!(forward.state_hash(), backward.state_hash());
        assert!(!forward.is_member(&c.identity()));
        assert_eq!(forward.name(), "Hike");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (group, _, _) = setup();
        let events = group.events();
        let (merged, new_ids) = group.merge(&events, &V).unwrap();
        assert!(new_ids.is_empty());
        assert_eq!(merged.state_hash(), group.state_hash());
        assert_eq!(merged.event_count(), group.event_count());
    }

    #[test]
    fn test_concurrent_add_and_remove_at_equal_clock_removal_wins() {
        // A creates at 1, adds C and makes C admin at 1, then at clock 2 A adds
        // B while C concurrently removes B.
        let a = Ed25519Signer::generate();
        let b = Ed25519Signer::generate();
        let c = Ed25519Signer::generate();
        let (group, _) = Group::create("g", "", 1, &a).unwrap();
        let (group, _) = group.add_members(vec![c.identity()], 1, &a).unwrap();
        let (group, _) = group.add_admins(vec![c.identity()], 1, &a).unwrap();

        let (_, add_b) = group.add_members(vec![b.identity()], 2, &a).unwrap();
        let remove_b = MembershipUpdateEvent::create_signed(
            group.chat_id(),
            EventBody::member_removed(b.identity(), 2),
            &c,
        )
        .unwrap();

        let x = group.merge(&[add_b.clone(), remove_b.clone()], &V).unwrap().0;
        let y = group.merge(&[remove_b], &V).unwrap().0.merge(&[add_b], &V).unwrap().0;
        assert!(!x.is_member(&b.identity()));
        assert!(!y.is_member(&b.identity()));
        assert_eq!(x.state_hash(), y.state_hash());
    }

    #[test]
    fn test_merge_rejects_unauthorized_event() {
        let (group, _, _) = setup();
        let outsider = Ed25519Signer::generate();
        let rename = MembershipUpdateEvent::create_signed(
            group.chat_id(),
            EventBody::name_changed("pwned", 9),
            &outsider,
        )
        .unwrap();

        let err = group.merge(&[rename], &V).unwrap_err();
        assert_eq!(
            err,
            GroupError::Membership(MembershipError::NotMember(outsider.identity()))
        );
        assert_eq!(group.name(), "Trip");
    }

    #[test]
    fn test_merge_rejects_bad_signature() {
        let (group, a, _) = setup();
        let (_, mut rename) = group.rename("New", 3, &a).unwrap();
        rename.signature[0] ^= 0xFF;
        assert!(matches!(
            group.merge(&[rename], &V),
            Err(GroupError::Event(EventError::InvalidSignature))
        ));
    }

    #[test]
    fn test_merge_rejects_wrong_chat() {
        let (group, a, _) = setup();
        let (other, _) = Group::create("other", "", 1, &a).unwrap();
        let (_, foreign) = other.rename("x", 2, &a).unwrap();
        assert!(matches!(
            group.merge(&[foreign], &V),
            Err(GroupError::WrongChat(_))
        ));
    }

    #[test]
    fn test_local_mutation_is_gated() {
        let (group, _, b) = setup();
        // B is a member but not an admin.
        let err = group.add_admins(vec![b.identity()], 3, &b).unwrap_err();
        assert_eq!(err, GroupError::Membership(MembershipError::NotAdmin(b.identity())));
    }

    #[test]
    fn test_join_and_leave() {
        let (group, _, b) = setup();
        let (group, _) = group.join(3, &b).unwrap();
        assert!(group.has_joined(&b.identity()));
        let (group, _) = group.leave(4, &b).unwrap();
        assert!(!group.is_member(&b.identity()));
        assert!(group.was_ever_member(&b.identity()));
    }

    #[test]
    fn test_admin_step_down() {
        let (group, a, b) = setup();
        let (group, _) = group.add_admins(vec![b.identity()], 3, &a).unwrap();
        assert!(group.is_admin(&b.identity()));
        let (group, _) = group.remove_admin(4, &b).unwrap();
        assert!(!group.is_admin(&b.identity()));
        assert!(group.is_member(&b.identity()));
    }

    #[test]
    fn test_last_clock_value() {
        let (group, a, _) = setup();
        assert_eq!(group.last_clock_value(), 2);
        let (group, _) = group.recolor("#123456", 40, &a).unwrap();
        assert_eq!(group.last_clock_value(), 40);
    }

    #[test]
    fn test_reimage() {
        let (group, a, _) = setup();
        let (group, _) = group.reimage(vec![0xFF, 0xD8, 0xFF, 0x00], 3, &a).unwrap();
        assert_eq!(group.image(), &[0xFF, 0xD8, 0xFF, 0x00]);
        assert!(group
            .metadata()
            .image_data_uri()
            .unwrap()
            .starts_with("data:image/jpeg"));
    }

    #[test]
    fn test_abridged_events_rebuild_same_membership() {
        let (group, a, b) = setup();
        let c = Ed25519Signer::generate();
        let d = Ed25519Signer::generate();
        let (group, _) = group.rename("one", 3, &a).unwrap();
        let (group, _) = group.rename("two", 4, &a).unwrap();
        let (group, _) = group.add_members(vec![c.identity(), d.identity()], 5, &a).unwrap();
        let (group, _) = group.leave(6, &d).unwrap();
        let (group, _) = group.join(7, &c).unwrap();

        let abridged = group.abridged_events();
        assert!(abridged.len() < group.event_count());
        assert_eq!(
            abridged
                .iter()
                .filter(|e| e.event_type == EventType::NameChanged)
                .count(),
            1
        );

        let rebuilt =
            Group::from_events(group.chat_id().clone(), &abridged, &b.identity(), &V).unwrap();
        assert_eq!(rebuilt.members(), group.members());
        assert_eq!(rebuilt.admins(), group.admins());
        assert_eq!(rebuilt.name(), "two");
        assert!(!rebuilt.is_member(&d.identity()));
    }

    #[test]
    fn test_events_for_sync_is_full_log_when_small() {
        let (group, _, _) = setup();
        assert_eq!(group.events_for_sync().len(), group.event_count());
    }

    #[test]
    fn test_reordered_history_skips_instead_of_failing() {
        // B (admin) adds D at clock 10. A later learns that B had left at
        // clock 5; B's add no longer passes its gate and is skipped.
        let (group, a, b) = setup();
        let d = Ed25519Signer::generate();
        let (group, _) = group.add_admins(vec![b.identity()], 3, &a).unwrap();
        let (with_d, _) = group.add_members(vec![d.identity()], 10, &b).unwrap();
        let (_, leave) = group.leave(5, &b).unwrap();

        let (merged, _) = with_d.merge(&[leave], &V).unwrap();
        assert!(!merged.is_member(&d.identity()));
        assert_eq!(merged.skipped().len(), 1);
        assert_eq!(merged.event_count(), merged.events().len() + 1);
        assert!(merged
            .events_for_sync()
            .iter()
            .all(|e| !merged.skipped().contains(&e.id())));
    }

    #[test]
    fn test_replicas_converge_when_gated_event_arrives_in_either_order() {
        // B (admin) adds D at clock 10 and leaves at clock 5. One replica
        // sees the add first and later skips it, the other sees the leave
        // first and rejects the add.
        let (group, a, b) = setup();
        let d = Ed25519Signer::generate();
        let e = Ed25519Signer::generate();
        let (group, _) = group.add_admins(vec![b.identity()], 3, &a).unwrap();
        let (_, add_d) = group.add_members(vec![d.identity()], 10, &b).unwrap();
        let (_, leave) = group.leave(5, &b).unwrap();

        let first = group.merge(&[add_d.clone()], &V).unwrap().0;
        let first = first.merge(&[leave.clone()], &V).unwrap().0;
        let second = group.merge(&[leave], &V).unwrap().0;
        assert_eq!(
            second.merge(&[add_d.clone()], &V).unwrap_err(),
            GroupError::Membership(MembershipError::NotMember(b.identity()))
        );
        assert!(first.skipped().contains(&add_d.id()));
        assert_eq!(first.state_hash(), second.state_hash());

        // A keeps going on the first replica and syncs its full log.
        let (first, _) = first.rename("Hike", 11, &a).unwrap();
        let (first, _) = first.add_members(vec![e.identity()], 12, &a).unwrap();
        let (second, _) = second.merge(&first.events_for_sync(), &V).unwrap();
        assert_eq!(second.name(), "Hike");
        assert_eq!(first.state_hash(), second.state_hash());

        let joined =
            Group::from_events(first.chat_id().clone(), &first.events_for_sync(), &e.identity(), &V)
                .unwrap();
        assert_eq!(joined.state_hash(), first.state_hash());
        assert!(!joined.is_member(&d.identity()));
    }
}
