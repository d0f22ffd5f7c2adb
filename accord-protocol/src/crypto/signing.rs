use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::ids::IdentityKey;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Signing failed")]
    SigningFailed,
    #[error("Verification failed")]
    VerificationFailed,
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Invalid signature")]
    InvalidSignature,
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, private_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);

    let secret_key = signing_key.to_bytes();
    let public_key = signing_key.verifying_key().to_bytes();

    (public_key, secret_key)
}

/// Sign data with Ed25519 private key
///
/// # Returns
/// 64-byte signature
pub fn sign_data(data: &[u8], private_key: &[u8]) -> Result<[u8; 64]> {
    if private_key.len() != 32 {
        return Err(SigningError::InvalidKeyLength);
    }

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    key_bytes.copy_from_slice(private_key);
    let signing_key = SigningKey::from_bytes(&key_bytes);

    Ok(signing_key.sign(data).to_bytes())
}

/// Verify Ed25519 signature
///
/// Returns `Ok(false)` for a well-formed but wrong signature, and `Err` when
/// the key or signature bytes are malformed.
pub fn verify_signature(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    if public_key.len() != 32 {
        return Err(SigningError::InvalidKeyLength);
    }

    if signature.len() != 64 {
        return Err(SigningError::InvalidSignature);
    }

    let mut pub_bytes = [0u8; 32];
    pub_bytes.copy_from_slice(public_key);
    let verifying_key =
        VerifyingKey::from_bytes(&pub_bytes).map_err(|_| SigningError::InvalidKeyLength)?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(&sig_bytes);

    match verifying_key.verify(data, &sig) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Derive public key from private key
pub fn derive_public_key(private_key: &[u8]) -> Result<[u8; 32]> {
    if private_key.len() != 32 {
        return Err(SigningError::InvalidKeyLength);
    }

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    key_bytes.copy_from_slice(private_key);
    let signing_key = SigningKey::from_bytes(&key_bytes);

    Ok(signing_key.verifying_key().to_bytes())
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Signing capability handed to components that author signed events.
pub trait EventSigner: Send + Sync {
    /// Identity the signatures verify against.
    fn identity(&self) -> IdentityKey;

    fn sign(&self, data: &[u8]) -> Result<[u8; 64]>;
}

/// Verification capability handed to components that accept signed events.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, data: &[u8], signature: &[u8; 64], signer: &IdentityKey) -> Result<bool>;
}

/// Ed25519 signer holding the secret key in zeroize-on-drop memory.
pub struct Ed25519Signer {
    secret: Zeroizing<[u8; 32]>,
    identity: IdentityKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        let (public, secret) = generate_keypair();
        Ed25519Signer {
            secret: Zeroizing::new(secret),
            identity: IdentityKey(public),
        }
    }

    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let public = derive_public_key(secret)?;
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(secret);
        Ok(Ed25519Signer {
            secret: key,
            identity: IdentityKey(public),
        })
    }
}

impl EventSigner for Ed25519Signer {
    fn identity(&self) -> IdentityKey {
        self.identity
    }

    fn sign(&self, data: &[u8]) -> Result<[u8; 64]> {
        sign_data(data, &self.secret[..])
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Stateless Ed25519 verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, data: &[u8], signature: &[u8; 64], signer: &IdentityKey) -> Result<bool> {
        verify_signature(data, signature, signer.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let (public, private) = generate_keypair();
        assert_eq!(public.len(), 32);
        assert_eq!(private.len(), 32);
    }

    #[test]
    fn test_sign_verify() {
        let (public, private) = generate_keypair();
        let data = b"Test message for signing";

        let signature = sign_data(data, &private).unwrap();
        assert!(verify_signature(data, &signature, &public).unwrap());
    }

    #[test]
    fn test_verify_invalid_signature() {
        let (public, _) = generate_keypair();
        let fake_signature = [0u8; 64];

        assert!(!verify_signature(b"Test message", &fake_signature, &public).unwrap());
    }

    #[test]
    fn test_bad_key_length_is_error() {
        assert!(sign_data(b"x", &[0u8; 31]).is_err());
        assert!(verify_signature(b"x", &[0u8; 64], &[0u8; 16]).is_err());
        assert!(verify_signature(b"x", &[0u8; 10], &[0u8; 32]).is_err());
    }

    #[test]
    fn test_derive_public_key() {
        let (expected_public, private) = generate_keypair();
        assert_eq!(derive_public_key(&private).unwrap(), expected_public);
    }

    #[test]
    fn test_signer_verifier_capabilities() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"membership").unwrap();

        let verifier = Ed25519Verifier;
        assert!(verifier.verify(b"membership", &sig, &signer.identity()).unwrap());
        assert!(!verifier.verify(b"tampered", &sig, &signer.identity()).unwrap());
    }

    #[test]
    fn test_signer_from_secret_matches_identity() {
        let (public, private) = generate_keypair();
        let signer = Ed25519Signer::from_secret(&private).unwrap();
        assert_eq!(signer.identity(), IdentityKey(public));
    }
}
