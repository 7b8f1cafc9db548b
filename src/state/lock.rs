use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StateError, StateResult};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Per-key exclusive sections for read-modify-write operations.
///
/// Entries are created on demand and removed once the last holder or waiter
/// is gone, so the table only grows with the number of keys in use.
#[derive(Debug, Default, Clone)]
pub struct KeyLocks {
    table: Arc<LockTable>,
}

/// Held for the duration of an exclusive section.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
    key: String,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that currently have a holder or waiter.
    pub fn active(&self) -> usize {
        self.table.len()
    }

    pub async fn acquire(&self, key: &str, timeout: Duration) -> StateResult<KeyGuard> {
        let mutex = self
            .table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(KeyGuard {
                guard: Some(guard),
                table: self.table.clone(),
                key: key.to_string(),
            }),
            Err(_) => {
                tracing::warn!(key, timeout_ms = timeout.as_millis() as u64, "Lock acquisition timed out");
                release_idle(&self.table, key);
                Err(StateError::LockTimeout {
                    key: key.to_string(),
                    timeout,
                })
            }
        }
    }
}

fn release_idle(table: &LockTable, key: &str) {
    // The table's own reference is the only one left.
    table.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        release_idle(&self.table, &self.key);
    }
}
