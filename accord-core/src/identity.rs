use accord_protocol::contact::Contact;
use accord_protocol::ids::IdentityKey;

use crate::store::Store;

/// Who sent an inbound message: one of our own paired devices, or a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    SelfContact,
    Peer(Contact),
}

impl Identity {
    /// Resolve `sender` against our key and the contact store. Unknown peers
    /// get a fresh contact that is not yet stored.
    pub fn resolve(
        me: &IdentityKey,
        sender: &IdentityKey,
        contacts: &dyn Store<IdentityKey, Contact>,
    ) -> Self {
        if sender == me {
            return Identity::SelfContact;
        }
        Identity::Peer(contacts.load(sender).unwrap_or_else(|| Contact::new(*sender)))
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Identity::SelfContact)
    }

    pub fn contact(&self) -> Option<&Contact> {
        match self {
            Identity::SelfContact => None,
            Identity::Peer(contact) => Some(contact),
        }
    }

    /// Inbound traffic from blocked peers is dropped.
    pub fn is_blocked(&self) -> bool {
        self.contact().map(|c| c.blocked).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use hex_literal::hex;

    #[test]
    fn test_resolve() {
        let me = IdentityKey::from_bytes(hex!(
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        ));
        let peer = IdentityKey::from_bytes(hex!(
            "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c"
        ));
        let contacts: MemoryStore<IdentityKey, Contact> = MemoryStore::new();

        assert!(Identity::resolve(&me, &me, &contacts).is_self());

        let unknown = Identity::resolve(&me, &peer, &contacts);
        assert_eq!(unknown.contact().map(|c| c.id), Some(peer));
        assert!(!unknown.is_blocked());

        let (blocked, _) = Contact::new(peer).block(3);
        contacts.store(peer, blocked);
        assert!(Identity::resolve(&me, &peer, &contacts).is_blocked());
    }
}
