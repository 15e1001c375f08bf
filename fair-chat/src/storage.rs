use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::debug;

use crate::{
    config::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TIMEOUT},
    error::Result,
    session::SessionState,
};

/// Trait for storing and retrieving chat sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: SessionState) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<SessionState>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

struct StoredSession {
    session: SessionState,
    last_used: Instant,
    /// Monotonic use counter; orders eviction when instants tie.
    sequence: u64,
}

/// In-memory implementation of SessionStorage.
///
/// Sessions idle for longer than `idle_timeout` are dropped, and once more than
/// `max_sessions` are held the least recently used one is evicted on save.
#[derive(Clone)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, StoredSession>>,
    counter: Arc<AtomicU64>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TIMEOUT)
    }
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            counter: Arc::new(AtomicU64::new(0)),
            max_sessions: max_sessions.max(1),
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn next_sequence(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn evict(&self, now: Instant, keep: &str) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, stored| now.duration_since(stored.last_used) <= self.idle_timeout);

        while self.sessions.len() > self.max_sessions {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.sequence)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "Evicted chat sessions");
        }
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: SessionState) -> Result<()> {
        let now = Instant::now();
        let id = session.id.clone();
        let stored = StoredSession {
            session,
            last_used: now,
            sequence: self.next_sequence(),
        };
        self.sessions.insert(id.clone(), stored);
        self.evict(now, &id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionState>> {
        let now = Instant::now();
        if let Some(mut entry) = self.sessions.get_mut(id) {
            if now.duration_since(entry.last_used) <= self.idle_timeout {
                entry.last_used = now;
                entry.sequence = self.next_sequence();
                return Ok(Some(entry.session.clone()));
            }
        }

        self.sessions
            .remove_if(id, |_, stored| now.duration_since(stored.last_used) > self.idle_timeout);
        Ok(None)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;

    fn session(id: &str) -> SessionState {
        SessionState::new(id, "11")
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let storage = InMemorySessionStorage::new();

        let mut session = SessionState::new("session1", "11");
        session.append(ChatMessage::user("hi"));
        storage.save(session).await.unwrap();

        let retrieved = storage.get("session1").await.unwrap().unwrap();
        assert_eq!(retrieved.messages().len(), 2);
        assert_eq!(retrieved.insurer_id, "11");

        storage.delete("session1").await.unwrap();
        assert!(storage.get("session1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_least_recently_used_session_is_evicted() {
        let storage = InMemorySessionStorage::with_limits(3, Duration::from_secs(3600));
        for id in ["s1", "s2", "s3"] {
            storage.save(session(id)).await.unwrap();
        }

        // Reading s1 makes s2 the oldest.
        assert!(storage.get("s1").await.unwrap().is_some());
        storage.save(session("s4")).await.unwrap();

        assert_eq!(storage.len(), 3);
        assert!(storage.get("s2").await.unwrap().is_none());
        for id in ["s1", "s3", "s4"] {
            assert!(storage.get(id).await.unwrap().is_some(), "{id} should be kept");
        }
    }

    #[tokio::test]
    async fn test_capacity_holds_under_many_sessions() {
        let storage = InMemorySessionStorage::with_limits(10, Duration::from_secs(3600));
        for i in 0..500 {
            storage.save(session(&format!("anon-{i}"))).await.unwrap();
        }

        assert_eq!(storage.len(), 10);
        assert!(storage.get("anon-0").await.unwrap().is_none());
        assert!(storage.get("anon-499").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let storage = InMemorySessionStorage::with_limits(100, Duration::from_millis(20));
        storage.save(session("stale")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(storage.get("stale").await.unwrap().is_none());
        assert!(storage.is_empty());

        storage.save(session("fresh")).await.unwrap();
        assert!(storage.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept_on_save() {
        let storage = InMemorySessionStorage::with_limits(100, Duration::from_millis(20));
        storage.save(session("a")).await.unwrap();
        storage.save(session("b")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        storage.save(session("c")).await.unwrap();

        assert_eq!(storage.len(), 1);
    }
}
