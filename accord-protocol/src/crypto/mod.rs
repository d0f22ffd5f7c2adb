pub mod signing;

pub use signing::{
    derive_public_key, generate_keypair, sign_data, verify_signature, Ed25519Signer,
    Ed25519Verifier, EventSigner, SignatureVerifier, SigningError,
};
