#![forbid(unsafe_code)]

//! Process-local cache of peer static keys, used to attempt IK before
//! falling back to XX. Populated whenever a handshake completes (by either
//! pattern) and consulted by the driver before it decides which pattern to
//! start with.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::identity::PeerId;

/// Injectable so callers can back this with persistent storage; the default
/// is an in-process, mutex-guarded map good for the lifetime of one process.
pub trait StaticKeyCache: Send + Sync {
    fn get(&self, peer: &PeerId) -> Option<[u8; 32]>;
    fn put(&self, peer: PeerId, static_public_key: [u8; 32]);
    fn remove(&self, peer: &PeerId);
}

#[derive(Default)]
pub struct InMemoryStaticKeyCache {
    entries: Mutex<HashMap<PeerId, [u8; 32]>>,
}

impl InMemoryStaticKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StaticKeyCache for InMemoryStaticKeyCache {
    fn get(&self, peer: &PeerId) -> Option<[u8; 32]> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(peer)
            .copied()
    }

    fn put(&self, peer: PeerId, static_public_key: [u8; 32]) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(peer, static_public_key);
    }

    fn remove(&self, peer: &PeerId) {
        self.entries.lock().expect("cache mutex poisoned").remove(peer);
    }
}
