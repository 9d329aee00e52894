//! Double-submit prevention configuration.
//!
//! Three flags control the runtime behaviour: whether a session is created
//! for requests that don't carry one, which lock serializes submits of a
//! session, and whether a POST without any token is accepted. Each flag is
//! looked up in the middleware's init parameters first and then through a
//! [`PropertyResolver`] over ordered [`ConfigSource`]s.

use crate::error::{DoubleSubmitError, Result};
use std::collections::HashMap;
use std::env;
use tracing::debug;

/// Key of the "force session creation" flag.
pub const FORCE_SESSION_CREATION_KEY: &str = "armature.double_submit.force_session_creation";

/// Key of the "synchronize via session instance" flag.
pub const SYNC_VIA_SESSION_INSTANCE_KEY: &str =
    "armature.double_submit.synchronization_via_session_instance";

/// Key of the "request without token is valid" flag.
pub const REQUEST_WITHOUT_TOKEN_VALID_KEY: &str =
    "armature.double_submit.request_without_token_valid";

/// Default request parameter carrying the token.
pub const DEFAULT_TOKEN_KEY: &str = "requestToken";

/// Default session cookie name.
pub const DEFAULT_SESSION_COOKIE: &str = "ARMATURE_SESSION";

/// Default number of windows tracked per session.
pub const DEFAULT_MAX_WINDOWS: usize = 64;

/// Which lock serializes the submits of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// Lock the session instance itself.
    SessionInstance,
    /// Lock a lazily created per-session handle.
    #[default]
    DedicatedHandle,
}

impl SyncStrategy {
    /// Map the "synchronize via session instance" flag to a strategy.
    pub fn from_flag(via_session_instance: bool) -> Self {
        if via_session_instance {
            SyncStrategy::SessionInstance
        } else {
            SyncStrategy::DedicatedHandle
        }
    }
}

/// A source of configuration properties.
///
/// When several sources define the same key, the one with the highest
/// ordinal wins.
pub trait ConfigSource: Send + Sync {
    /// Priority of this source.
    fn ordinal(&self) -> i32;

    /// Look up a property; `None` if this source doesn't define it.
    fn property(&self, key: &str) -> Option<String>;

    /// Human readable name, used in logs.
    fn name(&self) -> &str;
}

/// Config source backed by environment variables.
///
/// `armature.double_submit.force_session_creation` is looked up as
/// `ARMATURE_DOUBLE_SUBMIT_FORCE_SESSION_CREATION`.
pub struct EnvConfigSource {
    prefix: Option<String>,
}

impl EnvConfigSource {
    /// Create a new environment source with an optional variable prefix
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Environment variable name for a property key
    pub fn var_name(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, name),
            None => name,
        }
    }
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ConfigSource for EnvConfigSource {
    fn ordinal(&self) -> i32 {
        100
    }

    fn property(&self, key: &str) -> Option<String> {
        env::var(self.var_name(key)).ok()
    }

    fn name(&self) -> &str {
        "environment"
    }
}

/// Config source backed by an in-memory map.
pub struct MapConfigSource {
    name: String,
    ordinal: i32,
    values: HashMap<String, String>,
}

impl MapConfigSource {
    /// Create a new map source
    pub fn new(name: impl Into<String>, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            values: HashMap::new(),
        }
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn property(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolves properties over a set of config sources ordered by ordinal.
pub struct PropertyResolver {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl PropertyResolver {
    /// Create a resolver without any source
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Add a source; sources stay sorted by descending ordinal
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self.sources.sort_by_key(|s| std::cmp::Reverse(s.ordinal()));
        self
    }

    /// Look up a property in the highest-ordinal source defining it
    pub fn property(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let value = source.property(key)?;
            debug!(key = %key, source = source.name(), "Resolved config property");
            Some(value)
        })
    }

    /// Look up a property, falling back to a default
    pub fn property_or(&self, key: &str, default: &str) -> String {
        self.property(key).unwrap_or_else(|| default.to_string())
    }
}

impl Default for PropertyResolver {
    fn default() -> Self {
        Self::empty().with_source(EnvConfigSource::default())
    }
}

/// Parse a flag the lenient way: only a case-insensitive `true` is true.
pub fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Double-submit prevention configuration
#[derive(Debug, Clone)]
pub struct DoubleSubmitConfig {
    /// Create a session for requests that don't have one
    pub force_session_creation: bool,

    /// Lock used to serialize submits of a session
    pub sync_strategy: SyncStrategy,

    /// Treat a POST without any token as valid
    pub request_without_token_valid: bool,

    /// Request parameter carrying the token
    pub token_key: String,

    /// Cookie carrying the session id
    pub session_cookie_name: String,

    /// Path fragments identifying resource requests (no token issued)
    pub resource_markers: Vec<String>,

    /// Header carrying the window id
    pub window_id_header: String,

    /// Query parameter carrying the window id
    pub window_id_param: String,

    /// Header marking a client-side queued ajax request
    pub ajax_header_name: String,

    /// Expected value of the ajax header
    pub ajax_header_value: String,

    /// Windows tracked per session before the least recently used one is
    /// evicted
    pub max_windows: usize,
}

impl DoubleSubmitConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self {
            force_session_creation: true,
            sync_strategy: SyncStrategy::DedicatedHandle,
            request_without_token_valid: true,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            session_cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            resource_markers: vec![
                "/static/".to_string(),
                "/assets/".to_string(),
                "/favicon.ico".to_string(),
            ],
            window_id_header: "X-Window-Id".to_string(),
            window_id_param: "windowId".to_string(),
            ajax_header_name: "Faces-Request".to_string(),
            ajax_header_value: "partial/ajax".to_string(),
            max_windows: DEFAULT_MAX_WINDOWS,
        }
    }

    /// Load the three flags from init parameters, falling back to the
    /// environment
    pub fn from_init_params(init_params: &HashMap<String, String>) -> Self {
        Self::resolve(init_params, &PropertyResolver::default())
    }

    /// Load the three flags from init parameters, falling back to the given
    /// resolver
    pub fn resolve(init_params: &HashMap<String, String>, resolver: &PropertyResolver) -> Self {
        let lookup = |key: &str, default: &str| {
            init_params
                .get(key)
                .cloned()
                .unwrap_or_else(|| resolver.property_or(key, default))
        };

        let force_session_creation = parse_flag(&lookup(FORCE_SESSION_CREATION_KEY, "true"));
        let via_session_instance = parse_flag(&lookup(SYNC_VIA_SESSION_INSTANCE_KEY, "false"));
        let request_without_token_valid =
            parse_flag(&lookup(REQUEST_WITHOUT_TOKEN_VALID_KEY, "true"));

        debug!(
            force_session_creation,
            via_session_instance, request_without_token_valid, "Loaded double-submit config"
        );

        Self {
            force_session_creation,
            sync_strategy: SyncStrategy::from_flag(via_session_instance),
            request_without_token_valid,
            ..Self::new()
        }
    }

    /// Check that all names are usable
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("token key", &self.token_key),
            ("session cookie name", &self.session_cookie_name),
            ("window id header", &self.window_id_header),
            ("window id parameter", &self.window_id_param),
        ];

        for (what, value) in names {
            if value.trim().is_empty() {
                return Err(DoubleSubmitError::InvalidConfig(format!(
                    "{} must not be empty",
                    what
                )));
            }
        }

        if self.max_windows == 0 {
            return Err(DoubleSubmitError::InvalidConfig(
                "max windows must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Set force session creation
    pub fn with_force_session_creation(mut self, force: bool) -> Self {
        self.force_session_creation = force;
        self
    }

    /// Set the sync strategy
    pub fn with_sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.sync_strategy = strategy;
        self
    }

    /// Set whether requests without a token are valid
    pub fn with_request_without_token_valid(mut self, valid: bool) -> Self {
        self.request_without_token_valid = valid;
        self
    }

    /// Set the token parameter name
    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        self.token_key = key.into();
        self
    }

    /// Set the session cookie name
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_name = name.into();
        self
    }

    /// Set resource path markers
    pub fn with_resource_markers(mut self, markers: Vec<String>) -> Self {
        self.resource_markers = markers;
        self
    }

    /// Set the window id header
    pub fn with_window_id_header(mut self, header: impl Into<String>) -> Self {
        self.window_id_header = header.into();
        self
    }

    /// Set the window id query parameter
    pub fn with_window_id_param(mut self, param: impl Into<String>) -> Self {
        self.window_id_param = param.into();
        self
    }

    /// Set the ajax header name and value
    pub fn with_ajax_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ajax_header_name = name.into();
        self.ajax_header_value = value.into();
        self
    }

    /// Set the number of windows tracked per session
    pub fn with_max_windows(mut self, max_windows: usize) -> Self {
        self.max_windows = max_windows;
        self
    }

    /// Whether submits are serialized on the session instance
    pub fn synchronize_via_session_instance(&self) -> bool {
        self.sync_strategy == SyncStrategy::SessionInstance
    }

    /// Suffixes matched for prefixed token parameters on multi-form pages
    pub fn token_key_suffixes(&self) -> [String; 2] {
        [format!(":{}", self.token_key), format!("_{}", self.token_key)]
    }

    /// Whether a path belongs to a resource request
    pub fn is_resource_path(&self, path: &str) -> bool {
        self.resource_markers
            .iter()
            .any(|marker| path.contains(marker.as_str()))
    }
}

impl Default for DoubleSubmitConfig {
    fn default() -> Self {
        Self::new()
    }
}
