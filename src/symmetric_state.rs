#![forbid(unsafe_code)]

use zeroize::Zeroize;

use crate::cipher_state::CipherState;
use crate::error::Result;
use crate::primitives::{hkdf2, hkdf3, sha256, sha256_concat};

pub const PROTOCOL_XX: &str = "Noise_XX_25519_ChaChaPoly_SHA256";
pub const PROTOCOL_IK: &str = "Noise_IK_25519_ChaChaPoly_SHA256";
pub const PROTOCOL_XXFALLBACK: &str = "Noise_XXfallback_25519_ChaChaPoly_SHA256";

/// The byte string mixed into the handshake hash immediately after
/// initialization, binding the Noise transcript to this wire protocol.
pub const PROLOGUE: &[u8] = b"/noise";

/// Chaining key `ck`, running handshake hash `h`, and an optional
/// `CipherState`, with writes confined to `mix_key`, `mix_key_and_hash`,
/// `split`, and `encrypt_and_hash`/`decrypt_and_hash`.
pub struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: CipherState,
}

impl SymmetricState {
    pub fn initialize(protocol_name: &str) -> Self {
        let h = sha256(protocol_name.as_bytes());
        let mut state = Self {
            ck: h,
            h,
            cipher: CipherState::empty(),
        };
        state.mix_hash(PROLOGUE);
        state
    }

    pub fn handshake_hash(&self) -> [u8; 32] {
        self.h
    }

    pub fn has_key(&self) -> bool {
        self.cipher.has_key()
    }

    pub fn mix_hash(&mut self, data: &[u8]) {
        self.h = sha256_concat(&self.h, data);
    }

    pub fn mix_key(&mut self, input_key_material: &[u8]) {
        let (new_ck, temp_k) = hkdf2(&self.ck, input_key_material);
        self.ck = new_ck;
        self.cipher.initialize_key(temp_k);
    }

    pub fn mix_key_and_hash(&mut self, input_key_material: &[u8]) {
        let (new_ck, temp_h, temp_k) = hkdf3(&self.ck, input_key_material);
        self.ck = new_ck;
        self.mix_hash(&temp_h);
        self.cipher.initialize_key(temp_k);
    }

    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ct = self.cipher.encrypt_with_ad(&self.h, plaintext)?;
        self.mix_hash(&ct);
        Ok(ct)
    }

    /// Mixes the ciphertext, not the plaintext, into `h` — matching the
    /// sender's own `encrypt_and_hash` so both sides converge on the same
    /// transcript hash.
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let pt = self.cipher.decrypt_with_ad(&self.h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(pt)
    }

    pub fn split(&self) -> (CipherState, CipherState) {
        let (k1, k2) = hkdf2(&self.ck, &[]);
        (CipherState::new(k1), CipherState::new(k2))
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        self.h.zeroize();
    }
}
