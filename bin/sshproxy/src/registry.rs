//! The global session list from spec §4.6, reimagined per the REDESIGN
//! FLAGS note on the original's `TAILQ`: an indexed container whose removal
//! is safe even though it happens from inside the same task that's
//! iterating conceptually "over" it (each session is its own Tokio task, so
//! there is no shared iteration to invalidate, but the registry still gives
//! external observers — metrics, a future admin endpoint — a consistent
//! view of what's connected).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its id.
    pub fn insert(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().unwrap().insert(id);
        id
    }

    /// Unlinks a session. Safe to call more than once for the same id: the
    /// second call is a no-op, which is exactly the idempotence spec §8's
    /// "teardown idempotence" property requires of `session_close`.
    pub fn remove(&self, id: u64) {
        self.live.lock().unwrap().remove(&id);
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}
