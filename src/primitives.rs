#![forbid(unsafe_code)]

//! Deterministic wrappers over the fixed cipher suite: X25519, SHA-256,
//! HKDF-SHA256 and ChaCha20-Poly1305. Pure functions, no I/O.

use chacha20poly1305::aead::{Aead, NewAead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A Curve25519 keypair. Either caller-provided (long-term static) or
/// generated fresh per handshake (ephemeral).
#[derive(Clone, ZeroizeOnDrop)]
pub struct DhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    private: [u8; 32],
}

impl DhKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            private: secret.to_bytes(),
        }
    }

    /// Build a keypair from an existing private scalar, deriving the public
    /// half via the curve's base-point scalar multiplication. `x25519-dalek`
    /// clamps the scalar per the X25519 convention, so any 32 bytes produce
    /// a well-formed (if not necessarily caller-intended) keypair.
    pub fn from_private_bytes(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            private: secret.to_bytes(),
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    pub fn dh(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let remote = PublicKey::from(*remote_public);
        secret.diffie_hellman(&remote).to_bytes()
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_concat(a: &[u8], b: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// `HKDF(chaining_key, input_key_material, n)`: HMAC-SHA256-extract then
/// expand with sequential counter bytes, producing `n` 32-byte outputs.
/// With an empty `info`, HKDF-Expand's `T(i) = HMAC(PRK, T(i-1) || info || i)`
/// construction coincides exactly with the Noise framework's own HKDF
/// definition, so a single `expand` call over `n * 32` bytes suffices.
fn hkdf(chaining_key: &[u8; 32], input_key_material: &[u8], outputs: &mut [[u8; 32]]) {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), input_key_material);
    let mut buf = vec![0u8; outputs.len() * 32];
    hk.expand(&[], &mut buf)
        .expect("hkdf expand length is bounded by 255 * hash_len");
    for (i, out) in outputs.iter_mut().enumerate() {
        out.copy_from_slice(&buf[i * 32..(i + 1) * 32]);
    }
    buf.zeroize();
}

pub fn hkdf2(chaining_key: &[u8; 32], input_key_material: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut out = [[0u8; 32]; 2];
    hkdf(chaining_key, input_key_material, &mut out);
    (out[0], out[1])
}

pub fn hkdf3(
    chaining_key: &[u8; 32],
    input_key_material: &[u8],
) -> ([u8; 32], [u8; 32], [u8; 32]) {
    let mut out = [[0u8; 32]; 3];
    hkdf(chaining_key, input_key_material, &mut out);
    (out[0], out[1], out[2])
}

/// 12-byte AEAD nonce as `[0;4] || little-endian uint64 nonce`.
pub fn encode_nonce(counter: u64) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[4..].copy_from_slice(&counter.to_le_bytes());
    n
}

pub fn aead_seal(key: &[u8; 32], counter: u64, ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = encode_nonce(counter);
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: ad })
        .expect("chacha20poly1305 seal over bounded input cannot fail")
}

pub fn aead_open(key: &[u8; 32], counter: u64, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = encode_nonce(counter);
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .map_err(|_| Error::Decrypt)
}
