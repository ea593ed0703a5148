use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-local table of mutexes keyed by name.
///
/// Entries are created on first use and kept for the life of the registry.
#[derive(Debug, Default)]
pub struct NamedLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamedLockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_owned()).or_default())
        };

        entry.lock_owned().await
    }
}
