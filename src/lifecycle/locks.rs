//! Per-extract serialization.
//!
//! Every mutating operation on an extract holds that extract's mutex for its
//! whole duration, so two creates, updates or deletes of the same id never
//! interleave.  Different ids proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Guard returned by [`ExtractLocks::lock`]; the extract is released on drop.
pub type ExtractGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct ExtractLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExtractLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to extract `id`.
    pub async fn lock(&self, id: &str) -> ExtractGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Entries nobody holds or waits on only have the map's reference.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };

        match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(%id, "waiting for extract lock");
                lock.lock_owned().await
            }
        }
    }

    /// Number of ids with a live lock entry.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
