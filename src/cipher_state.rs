#![forbid(unsafe_code)]

use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::primitives::{aead_open, aead_seal};

/// An AEAD key plus a monotonic 64-bit nonce counter. Empty until the first
/// `MixKey`; until then `encrypt_with_ad`/`decrypt_with_ad` pass data through
/// unchanged, matching the Noise framework's definition of an uninitialized
/// CipherState.
#[derive(Clone)]
pub struct CipherState {
    key: Option<[u8; 32]>,
    nonce: u64,
}

impl CipherState {
    pub fn empty() -> Self {
        Self {
            key: None,
            nonce: 0,
        }
    }

    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Some(key),
            nonce: 0,
        }
    }

    pub fn initialize_key(&mut self, key: [u8; 32]) {
        self.key = Some(key);
        self.nonce = 0;
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Nonces must stay below `2^64 - 1`; `u64::MAX` is reserved and never used
    /// for an ordinary seal/open, only as the fixed nonce passed to `rekey`.
    fn check_nonce(&self) -> Result<()> {
        if self.nonce == u64::MAX {
            return Err(Error::NonceExhaustion);
        }
        Ok(())
    }

    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.key {
            None => Ok(plaintext.to_vec()),
            Some(key) => {
                self.check_nonce()?;
                let ct = aead_seal(&key, self.nonce, ad, plaintext);
                self.nonce += 1;
                Ok(ct)
            }
        }
    }

    /// A decryption failure is fatal and does not advance the nonce.
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.key {
            None => Ok(ciphertext.to_vec()),
            Some(key) => {
                self.check_nonce()?;
                let pt = aead_open(&key, self.nonce, ad, ciphertext)?;
                self.nonce += 1;
                Ok(pt)
            }
        }
    }

    /// `key = ENCRYPT(key, maxnonce, zerolen, zeros)`, keeping the first 32
    /// bytes of the sealed output as the new key; the nonce counter is left
    /// untouched.
    pub fn rekey(&mut self) {
        if let Some(key) = self.key {
            let sealed = aead_seal(&key, u64::MAX, &[], &[0u8; 32]);
            let mut new_key = [0u8; 32];
            new_key.copy_from_slice(&sealed[..32]);
            self.key = Some(new_key);
        }
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.key {
            key.zeroize();
        }
    }
}

impl core::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CipherState")
            .field("has_key", &self.key.is_some())
            .field("nonce", &self.nonce)
            .finish()
    }
}
