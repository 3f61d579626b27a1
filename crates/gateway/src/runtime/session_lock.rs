//! Per-session turn serialization.
//!
//! The router acquires a session's permit before spawning a turn, so
//! turns on the same (bot, session) persist in dispatch order. Turns on
//! different sessions run in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maps each session key to a `Semaphore(1)`. Holding the permit means
/// owning the session for one turn; it releases on drop.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to a session. Returns the permit to hold
    /// for the duration of the turn.
    pub async fn acquire(&self, session_key: &str) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned().await.map_err(|_| SessionBusy)
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop entries whose permit is free (no turn running or queued).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

/// The session's semaphore was closed out from under a waiter. Only
/// possible during shutdown.
#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy — a turn is already in progress")
    }
}

impl std::error::Error for SessionBusy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();
        let p1 = map.acquire("s1").await.unwrap();
        drop(p1);
        let p2 = map.acquire("s1").await.unwrap();
        drop(p2);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let map = SessionLockMap::new();
        let _p1 = map.acquire("s1").await.unwrap();
        let _p2 = map.acquire("s2").await.unwrap();
        assert_eq!(map.session_count(), 2);
    }

    #[tokio::test]
    async fn same_session_waits_for_release() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await.unwrap();
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await.unwrap();
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);

        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_removes_idle_entries() {
        let map = SessionLockMap::new();
        {
            let _p = map.acquire("s1").await.unwrap();
            map.prune_idle();
            assert_eq!(map.session_count(), 1, "held lock survives prune");
        }
        map.prune_idle();
        assert_eq!(map.session_count(), 0);
    }
}
