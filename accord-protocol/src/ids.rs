/// Core identity types shared by contacts, chats and groups.
///
/// - `IdentityKey`: 32-byte Ed25519 public key, the stable peer identifier
/// - `ChatID`: string chat identifier (peer hex for one-to-one chats,
///   `<uuid>-<creator hex>` for private group chats)

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// IdentityKey
// ---------------------------------------------------------------------------

/// Stable identity of a peer: its Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey(pub [u8; 32]);

impl IdentityKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        IdentityKey(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encode for display/storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(IdentityKey(key))
    }

    /// Shortened form used as the fallback display name: first 3 and last 6
    /// hex characters.
    pub fn alias(&self) -> String {
        let hex = self.to_hex();
        format!("{}...{}", &hex[..3], &hex[hex.len() - 6..])
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.short())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// ChatID
// ---------------------------------------------------------------------------

/// Chat identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatID(pub String);

impl ChatID {
    /// One-to-one chats are keyed by the peer's identity.
    pub fn one_to_one(peer: &IdentityKey) -> Self {
        ChatID(peer.to_hex())
    }

    /// A fresh private group chat id owned by `creator`.
    pub fn new_group(creator: &IdentityKey) -> Self {
        ChatID(format!("{}-{}", uuid::Uuid::new_v4(), creator.to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// True when this id has the `<prefix>-<creator hex>` shape for `creator`.
    ///
    /// The id must be strictly longer than the creator's hex so that a bare
    /// key can never pose as a group id.
    pub fn is_owned_by(&self, creator: &IdentityKey) -> bool {
        let suffix = creator.to_hex();
        self.0.len() > suffix.len() + 1
            && self.0.ends_with(&suffix)
            && self.0.as_bytes()[self.0.len() - suffix.len() - 1] == b'-'
    }
}

impl From<&str> for ChatID {
    fn from(s: &str) -> Self {
        ChatID(s.to_string())
    }
}

impl fmt::Debug for ChatID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0.chars().take(12).collect();
        write!(f, "ChatID({}..)", head)
    }
}

impl fmt::Display for ChatID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: [u8; 32] = hex!("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a");

    #[test]
    fn test_identity_hex_roundtrip() {
        let id = IdentityKey::from_bytes(KEY);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(IdentityKey::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_identity_from_hex_wrong_length() {
        assert!(IdentityKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_alias_shape() {
        let id = IdentityKey::from_bytes(KEY);
        assert_eq!(id.alias(), "d75...07511a");
    }

    #[test]
    fn test_identity_ordering_is_bytewise() {
        let a = IdentityKey([1u8; 32]);
        let b = IdentityKey([2u8; 32]);
        assert!(a < b);
    }

    #[test]
    fn test_group_chat_id_ownership() {
        let creator = IdentityKey::from_bytes(KEY);
        let other = IdentityKey([7u8; 32]);
        let chat_id = ChatID::new_group(&creator);
        assert!(chat_id.is_owned_by(&creator));
        assert!(!chat_id.is_owned_by(&other));
    }

    #[test]
    fn test_bare_key_is_not_a_group_id() {
        let creator = IdentityKey::from_bytes(KEY);
        assert!(!ChatID::one_to_one(&creator).is_owned_by(&creator));
        assert!(!ChatID(format!("-{}", creator.to_hex())).is_owned_by(&creator));
    }
}
