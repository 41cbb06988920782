#![forbid(unsafe_code)]

//! Peer identity: an opaque identifier bound to a long-term keypair whose
//! algorithm is independent of the Noise static key. Generation and
//! marshalling of these keys is an external concern; this module defines the
//! two capabilities the handshake driver actually needs — signing and
//! verification — plus an Ed25519-backed default so the crate is usable and
//! testable without a separate identity library.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{Error, Result};

/// Opaque peer identifier, derived from the identity public key's byte
/// serialization.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_public_key_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PeerId({})", hex_encode(&self.0))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A local long-term identity capable of signing the Noise static key binding.
pub trait LocalIdentity: Send + Sync {
    fn peer_id(&self) -> PeerId;
    fn public_key_bytes(&self) -> Vec<u8>;
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Decodes a peer's declared `identity_key` bytes (from the handshake
/// payload) into something that can verify its own signature and report its
/// `PeerId`. Kept separate from `LocalIdentity` because it never needs a
/// private key.
pub trait IdentityVerifier: Send + Sync {
    fn peer_id(&self) -> PeerId;
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Parses raw `identity_key` bytes into a verifier. An external collaborator
/// in general (peers may carry Ed25519, secp256k1, or other key types); this
/// crate ships the Ed25519 codec used by its own tests and examples.
pub trait IdentityKeyCodec: Send + Sync {
    fn decode(&self, identity_key_bytes: &[u8]) -> Result<Box<dyn IdentityVerifier>>;
}

pub struct Ed25519Identity {
    signing_key: SigningKey,
}

impl Ed25519Identity {
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_bytes(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }
}

impl LocalIdentity for Ed25519Identity {
    fn peer_id(&self) -> PeerId {
        PeerId::from_public_key_bytes(self.signing_key.verifying_key().as_bytes())
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.signing_key.verifying_key().as_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

struct Ed25519Verifier {
    verifying_key: VerifyingKey,
}

impl IdentityVerifier for Ed25519Verifier {
    fn peer_id(&self) -> PeerId {
        PeerId::from_public_key_bytes(self.verifying_key.as_bytes())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        self.verifying_key.verify(message, &signature).is_ok()
    }
}

#[derive(Default)]
pub struct Ed25519Codec;

impl IdentityKeyCodec for Ed25519Codec {
    fn decode(&self, identity_key_bytes: &[u8]) -> Result<Box<dyn IdentityVerifier>> {
        let key_bytes: [u8; 32] = identity_key_bytes
            .try_into()
            .map_err(|_| Error::malformed("identity key is not 32 bytes"))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| Error::malformed("identity key is not a valid Ed25519 point"))?;
        Ok(Box::new(Ed25519Verifier { verifying_key }))
    }
}
