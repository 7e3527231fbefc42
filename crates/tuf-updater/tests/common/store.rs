// In-memory metadata store that counts writes.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tuf_updater::{MetadataStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    roles: Mutex<BTreeMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Number of `persist_role` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, role: &str) -> Option<Vec<u8>> {
        self.roles.lock().unwrap().get(role).cloned()
    }

    pub fn roles(&self) -> Vec<String> {
        self.roles.lock().unwrap().keys().cloned().collect()
    }
}

impl MetadataStore for MemoryStore {
    fn load_role(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(role))
    }

    fn persist_role(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.roles
            .lock()
            .unwrap()
            .insert(role.to_string(), bytes.to_vec());
        Ok(())
    }
}
