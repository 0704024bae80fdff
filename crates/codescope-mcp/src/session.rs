//! Streaming transport session registry.
//!
//! Tracks `session_id → {handle, created_at, last_activity}`. New sessions
//! are rejected once the cap is reached; a periodic sweeper closes sessions
//! idle beyond the TTL. Closing a session is bounded by a 2 s timeout so a
//! wedged transport cannot stall the sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ServeError};

/// Maximum simultaneously active sessions.
pub const MAX_SESSIONS: usize = 100;

/// Idle TTL before a session is swept.
pub const SESSION_TTL_MS: u64 = 30 * 60 * 1000;

/// Sweep interval.
pub const CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Per-session close budget.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Closable transport handle behind a session id.
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync {
    async fn close(&self);
}

/// A handle with nothing to tear down (the wire layer owns the socket).
pub struct NullHandle;

#[async_trait::async_trait]
impl SessionHandle for NullHandle {
    async fn close(&self) {}
}

struct SessionEntry {
    handle: Arc<dyn SessionHandle>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

/// Session registry with TTL and capacity enforcement.
pub struct SessionManager {
    sessions: Arc<DashMap<String, SessionEntry>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(MAX_SESSIONS, Duration::from_millis(SESSION_TTL_MS))
    }

    pub fn with_limits(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_sessions,
            ttl,
        }
    }

    /// Register a new session. Rejected once the cap is reached.
    pub fn register(&self, session_id: &str, handle: Arc<dyn SessionHandle>) -> Result<()> {
        if self.sessions.len() >= self.max_sessions {
            warn!("rejecting session {session_id}: limit {} reached", self.max_sessions);
            return Err(ServeError::TooManySessions(self.max_sessions));
        }
        let now = Instant::now();
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                handle,
                created_at: now,
                last_activity: Mutex::new(now),
            },
        );
        debug!("session {session_id} registered ({} active)", self.sessions.len());
        Ok(())
    }

    /// Record activity on a session.
    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            *entry.last_activity.lock() = Instant::now();
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove and close one session.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let (_, entry) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ServeError::SessionNotFound(session_id.to_string()))?;
        close_bounded(session_id, entry.handle).await;
        debug!("session {session_id} closed");
        Ok(())
    }

    /// Sweep sessions idle beyond the TTL. Idempotent.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now.duration_since(*entry.last_activity.lock()) > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired.len();
        for session_id in expired {
            if let Some((_, entry)) = self.sessions.remove(&session_id) {
                let idle_for = now.duration_since(*entry.last_activity.lock());
                info!(
                    "sweeping idle session {session_id} (idle {}s, lived {}s)",
                    idle_for.as_secs(),
                    now.duration_since(entry.created_at).as_secs()
                );
                close_bounded(&session_id, entry.handle).await;
            }
        }
        count
    }

    /// Spawn the periodic sweeper. The handle aborts the loop when dropped
    /// by the caller.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let swept = manager.sweep().await;
                if swept > 0 {
                    debug!("session sweeper closed {swept} sessions");
                }
            }
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_bounded(session_id: &str, handle: Arc<dyn SessionHandle>) {
    if tokio::time::timeout(CLOSE_TIMEOUT, handle.close())
        .await
        .is_err()
    {
        warn!("session {session_id} close timed out after {CLOSE_TIMEOUT:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TrackingHandle {
        closed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl SessionHandle for TrackingHandle {
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct HangingHandle;

    #[async_trait::async_trait]
    impl SessionHandle for HangingHandle {
        async fn close(&self) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let manager = SessionManager::with_limits(2, Duration::from_secs(60));
        manager.register("a", Arc::new(NullHandle)).unwrap();
        manager.register("b", Arc::new(NullHandle)).unwrap();
        assert!(matches!(
            manager.register("c", Arc::new(NullHandle)),
            Err(ServeError::TooManySessions(2))
        ));
        manager.remove("a").await.unwrap();
        assert!(manager.register("c", Arc::new(NullHandle)).is_ok());
    }

    #[tokio::test]
    async fn sweep_closes_idle_sessions() {
        let manager = SessionManager::with_limits(10, Duration::from_millis(10));
        let closed = Arc::new(AtomicBool::new(false));
        manager
            .register(
                "idle",
                Arc::new(TrackingHandle {
                    closed: Arc::clone(&closed),
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let swept = manager.sweep().await;
        assert_eq!(swept, 1);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn touch_keeps_session_alive() {
        let manager = SessionManager::with_limits(10, Duration::from_millis(50));
        manager.register("busy", Arc::new(NullHandle)).unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.touch("busy");
        }
        assert_eq!(manager.sweep().await, 0);
        assert!(manager.contains("busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_bounded() {
        let manager = SessionManager::with_limits(10, Duration::from_secs(60));
        manager.register("hang", Arc::new(HangingHandle)).unwrap();
        // The hanging close is abandoned at the 2s budget; virtual time makes
        // this instant.
        manager.remove("hang").await.unwrap();
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let manager = SessionManager::with_limits(10, Duration::from_millis(1));
        manager.register("s", Arc::new(NullHandle)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.sweep().await, 1);
        assert_eq!(manager.sweep().await, 0);
    }
}
