use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Above this many entries, idle locks are dropped on the next acquire.
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per key (the sender's phone number), so two deliveries for
/// the same user never interleave their read-modify-write steps.
#[derive(Default)]
pub struct ConversationLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if map.len() > PRUNE_THRESHOLD {
                // Only the map holds an idle lock.
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_string())
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
