//! Per-window token tracking.
//!
//! A session can host several browser windows. Each window remembers which
//! of the session's tokens were issued to it, so that cleaning up one window
//! leaves the forms of the other windows submittable.

use crate::token::{RequestToken, TokenSet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Window id used when a request doesn't name its window.
pub const DEFAULT_WINDOW_ID: &str = "default";

/// Tokens issued to one browser window.
#[derive(Debug)]
pub struct WindowTokenManager {
    window_id: String,
    tokens: Mutex<HashSet<RequestToken>>,
    last_used: AtomicU64,
}

impl WindowTokenManager {
    /// Create a manager for a window
    pub fn new(window_id: impl Into<String>) -> Self {
        Self {
            window_id: window_id.into(),
            tokens: Mutex::new(HashSet::new()),
            last_used: AtomicU64::new(0),
        }
    }

    /// Id of the window
    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Reconcile with the session-wide set.
    ///
    /// Forgets tokens the session no longer knows (consumed or dropped by
    /// another window) and registers the token issued for the current
    /// request.
    pub fn sync_active_tokens(&self, session_tokens: &TokenSet, current: Option<&RequestToken>) {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();

        tokens.retain(|token| session_tokens.contains(token.as_str()));

        if let Some(current) = current {
            tokens.insert(current.clone());
        }

        trace!(
            window_id = %self.window_id,
            dropped = before.saturating_sub(tokens.len()),
            active = tokens.len(),
            "Synced window tokens"
        );
    }

    /// Drop this window's tokens from the session-wide set.
    ///
    /// Returns how many tokens were still valid in the session.
    pub fn cleanup(&self, session_tokens: &TokenSet) -> usize {
        let mut tokens = self.tokens.lock();
        let removed = session_tokens.remove_all(tokens.iter());
        tokens.clear();

        trace!(window_id = %self.window_id, removed, "Cleaned up window tokens");
        removed
    }

    /// Copy of the window's tokens
    pub fn tokens(&self) -> HashSet<RequestToken> {
        self.tokens.lock().clone()
    }

    /// Number of tokens tracked for this window
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Whether the window tracks no token
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(session: &TokenSet, window: &WindowTokenManager) -> RequestToken {
        let token = RequestToken::generate();
        session.insert(token.clone());
        window.sync_active_tokens(session, Some(&token));
        token
    }

    #[test]
    fn test_sync_registers_current_token() {
        let session = TokenSet::new();
        let window = WindowTokenManager::new("w1");

        let token = issue(&session, &window);
        assert!(window.tokens().contains(&token));
        assert_eq!(window.window_id(), "w1");
    }

    #[test]
    fn test_sync_drops_tokens_invalidated_elsewhere() {
        let session = TokenSet::new();
        let window = WindowTokenManager::new("w1");

        let first = issue(&session, &window);
        let second = issue(&session, &window);
        assert_eq!(window.len(), 2);

        session.remove(first.as_str());
        window.sync_active_tokens(&session, None);

        assert_eq!(window.len(), 1);
        assert!(window.tokens().contains(&second));
    }

    #[test]
    fn test_cleanup_only_touches_own_tokens() {
        let session = TokenSet::new();
        let left = WindowTokenManager::new("left");
        let right = WindowTokenManager::new("right");

        issue(&session, &left);
        issue(&session, &left);
        let kept = issue(&session, &right);

        assert_eq!(left.cleanup(&session), 2);
        assert!(left.is_empty());
        assert_eq!(session.len(), 1);
        assert!(session.contains(kept.as_str()));
        assert_eq!(right.len(), 1);
    }

    #[test]
    fn test_cleanup_skips_already_consumed() {
        let session = TokenSet::new();
        let window = WindowTokenManager::new(DEFAULT_WINDOW_ID);

        let token = issue(&session, &window);
        session.remove(token.as_str());

        assert_eq!(window.cleanup(&session), 0);
        assert!(window.is_empty());
    }
}
