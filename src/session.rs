//! In-memory session state for double-submit prevention.
//!
//! Only the token bookkeeping of a session lives here: the session-wide
//! token set, the lock handles used to serialize submits, and the window
//! token subsets. Uses DashMap for concurrent access across request tasks.

use crate::config::SyncStrategy;
use crate::error::{DoubleSubmitError, Result};
use crate::token::TokenSet;
use crate::window::WindowTokenManager;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Lock serializing the submits of one session.
pub type SessionLock = Arc<AsyncMutex<()>>;

/// Token state of one session.
#[derive(Debug)]
pub struct SessionTokens {
    id: String,
    tokens: TokenSet,
    instance_lock: SessionLock,
    sync_handle: OnceLock<SessionLock>,
    windows: DashMap<String, Arc<WindowTokenManager>>,
    window_clock: AtomicU64,
    last_accessed_at: RwLock<DateTime<Utc>>,
}

impl SessionTokens {
    /// Create empty state for a session
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tokens: TokenSet::new(),
            instance_lock: Arc::new(AsyncMutex::new(())),
            sync_handle: OnceLock::new(),
            windows: DashMap::new(),
            window_clock: AtomicU64::new(0),
            last_accessed_at: RwLock::new(now),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session-wide token set
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    /// The session's own lock.
    ///
    /// Application code that must not interleave with a submit of the same
    /// session can hold it. Submits only take it under
    /// [`SyncStrategy::SessionInstance`].
    pub fn instance_lock(&self) -> SessionLock {
        Arc::clone(&self.instance_lock)
    }

    /// Lock to hold while checking and processing a submit.
    ///
    /// [`SyncStrategy::SessionInstance`] returns [`instance_lock`](Self::instance_lock).
    /// [`SyncStrategy::DedicatedHandle`] returns a handle private to submits,
    /// created on first use; concurrent first uses all get the same handle.
    pub fn sync_lock(&self, strategy: SyncStrategy) -> SessionLock {
        match strategy {
            SyncStrategy::SessionInstance => Arc::clone(&self.instance_lock),
            SyncStrategy::DedicatedHandle => Arc::clone(
                self.sync_handle
                    .get_or_init(|| Arc::new(AsyncMutex::new(()))),
            ),
        }
    }

    /// Token manager of a window, created on first use.
    ///
    /// At most `max_windows` windows are kept; creating one more evicts the
    /// least recently used window and drops its tokens from the session.
    pub fn window(&self, window_id: &str, max_windows: usize) -> Arc<WindowTokenManager> {
        let tick = self.window_clock.fetch_add(1, Ordering::Relaxed);

        if let Some(window) = self.windows.get(window_id) {
            window.touch(tick);
            return Arc::clone(window.value());
        }

        let window = Arc::clone(
            self.windows
                .entry(window_id.to_string())
                .or_insert_with(|| Arc::new(WindowTokenManager::new(window_id)))
                .value(),
        );
        window.touch(tick);

        self.evict_windows(window_id, max_windows.max(1));
        window
    }

    fn evict_windows(&self, keep: &str, max_windows: usize) {
        while self.windows.len() > max_windows {
            let oldest = self
                .windows
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_used())
                .map(|entry| entry.key().clone());

            let Some(oldest) = oldest else {
                break;
            };

            if let Some(removed) = self.remove_window(&oldest) {
                debug!(
                    session_id = %self.id,
                    window_id = %oldest,
                    removed,
                    "Evicted least recently used window"
                );
            }
        }
    }

    fn remove_window(&self, window_id: &str) -> Option<usize> {
        let (_, window) = self.windows.remove(window_id)?;
        Some(window.cleanup(&self.tokens))
    }

    /// Token manager of a window, if the window is known
    pub fn existing_window(&self, window_id: &str) -> Option<Arc<WindowTokenManager>> {
        self.windows.get(window_id).map(|w| Arc::clone(w.value()))
    }

    /// Destroy a window, dropping its tokens from the session.
    ///
    /// Returns how many of its tokens were still valid.
    pub fn destroy_window(&self, window_id: &str) -> Result<usize> {
        let removed = self
            .remove_window(window_id)
            .ok_or_else(|| DoubleSubmitError::WindowNotFound(window_id.to_string()))?;

        debug!(session_id = %self.id, window_id = %window_id, removed, "Destroyed window");
        Ok(removed)
    }

    /// Number of known windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Record an access
    pub fn touch(&self) {
        *self.last_accessed_at.write() = Utc::now();
    }

    /// Last access timestamp
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        *self.last_accessed_at.read()
    }
}

/// Registry of session token state, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionTokens>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionTokens>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Create a session with a fresh id
    pub fn create(&self) -> Arc<SessionTokens> {
        let session = Arc::new(SessionTokens::new(generate_session_id()));
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        debug!(session_id = %session.id(), "Created session");
        session
    }

    /// Resolve the session of a request.
    ///
    /// An unknown or missing id yields a new session only when `create` is
    /// set; the client-supplied id is never adopted. The flag in the result
    /// tells whether the session was created.
    pub fn resolve(
        &self,
        session_id: Option<&str>,
        create: bool,
    ) -> Option<(Arc<SessionTokens>, bool)> {
        if let Some(session) = session_id.and_then(|id| self.get(id)) {
            session.touch();
            return Some((session, false));
        }

        create.then(|| (self.create(), true))
    }

    /// Drop a session with all its tokens and windows
    pub fn invalidate(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "Invalidated session");
        }
        removed
    }

    /// Destroy one window of a session
    pub fn destroy_window(&self, session_id: &str, window_id: &str) -> Result<usize> {
        self.get(session_id)
            .ok_or_else(|| DoubleSubmitError::SessionNotFound(session_id.to_string()))?
            .destroy_window(window_id)
    }

    /// Number of tracked sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions not accessed within `max_idle`. Returns how many were
    /// dropped.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(max_idle) else {
            return 0;
        };

        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_accessed_at() >= cutoff);
        let purged = before.saturating_sub(self.sessions.len());

        if purged > 0 {
            info!(purged, remaining = self.sessions.len(), "Purged idle sessions");
        }
        purged
    }
}

/// Generate a new unique session ID.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
