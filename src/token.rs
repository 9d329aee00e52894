use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// One-time request token.
///
/// Grants permission to submit one rendered form once. The value is a v4
/// UUID without separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    /// Generate a new random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Token value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for RequestToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RequestToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of issued, not yet consumed tokens of one session.
///
/// Every operation is atomic on its own; `remove` is the check-and-consume
/// step of a submit.
#[derive(Debug, Default)]
pub struct TokenSet {
    tokens: RwLock<HashSet<RequestToken>>,
}

impl TokenSet {
    /// Create an empty token set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an issued token
    pub fn insert(&self, token: RequestToken) -> bool {
        self.tokens.write().insert(token)
    }

    /// Consume a token. Returns `true` only for the caller that actually
    /// removed it.
    pub fn remove(&self, token: &str) -> bool {
        self.tokens.write().remove(token)
    }

    /// Remove several tokens at once
    pub fn remove_all<'a>(&self, tokens: impl IntoIterator<Item = &'a RequestToken>) -> usize {
        let mut set = self.tokens.write();
        tokens
            .into_iter()
            .filter(|token| set.remove(token.as_str()))
            .count()
    }

    /// Check whether a token is still valid
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.read().contains(token)
    }

    /// Copy of the current content
    pub fn snapshot(&self) -> HashSet<RequestToken> {
        self.tokens.read().clone()
    }

    /// Replace the content with `token` only if it still equals `expected`.
    ///
    /// Returns `true` if the reset happened.
    pub fn reset_if_unchanged(
        &self,
        expected: &HashSet<RequestToken>,
        token: Option<RequestToken>,
    ) -> bool {
        let mut set = self.tokens.write();
        if *set != *expected {
            return false;
        }
        set.clear();
        if let Some(token) = token {
            set.insert(token);
        }
        true
    }

    /// Number of valid tokens
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Whether no token is valid
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}
