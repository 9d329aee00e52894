//! # Armature Double-Submit Prevention
//!
//! Prevents duplicate form submissions (refresh after POST, double clicks,
//! retries) in Armature applications using one-time request tokens.
//!
//! ## Features
//!
//! - ✅ **One-time Tokens** - A fresh token per rendered page, consumed on submit
//! - ✅ **Per-session Serialization** - Concurrent submits of a session can't
//!   both succeed with the same token
//! - ✅ **Window Awareness** - Cleanup of one browser window leaves the forms
//!   of other windows submittable
//! - ✅ **Multi-form Pages** - Prefixed token fields (`form:requestToken`,
//!   `form_requestToken`) are recognised
//! - ✅ **Configurable** - Init parameters, environment variables, builders
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_double_submit::{DoubleSubmitConfig, DoubleSubmitMiddleware, ViewLifecycleMiddleware};
//!
//! let config = DoubleSubmitConfig::default()
//!     .with_request_without_token_valid(false);
//!
//! // Outer middleware: issues and checks tokens
//! let double_submit = DoubleSubmitMiddleware::new(config)?;
//!
//! // Inner middleware: keeps window token subsets in sync
//! let lifecycle = ViewLifecycleMiddleware::new(&double_submit);
//! # let _ = lifecycle;
//! # Ok::<(), armature_double_submit::DoubleSubmitError>(())
//! ```
//!
//! ## Token Lifecycle
//!
//! ```rust
//! use armature_double_submit::{RequestToken, TokenSet};
//!
//! let tokens = TokenSet::new();
//! let token = RequestToken::generate();
//! tokens.insert(token.clone());
//!
//! // The first submit consumes the token...
//! assert!(tokens.remove(token.as_str()));
//!
//! // ...a re-submit is a duplicate
//! assert!(!tokens.remove(token.as_str()));
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use armature_double_submit::{DoubleSubmitConfig, SyncStrategy, SYNC_VIA_SESSION_INSTANCE_KEY};
//! use std::collections::HashMap;
//!
//! let mut init_params = HashMap::new();
//! init_params.insert(SYNC_VIA_SESSION_INSTANCE_KEY.to_string(), "true".to_string());
//!
//! let config = DoubleSubmitConfig::from_init_params(&init_params);
//! assert_eq!(config.sync_strategy, SyncStrategy::SessionInstance);
//! ```
//!
//! ## Usage with Armature
//!
//! ```ignore
//! use armature::prelude::*;
//! use armature_double_submit::{is_duplicate_submit, RequestTokenHolder};
//!
//! #[post("/orders")]
//! async fn create_order(req: HttpRequest) -> Result<HttpResponse, Error> {
//!     if is_duplicate_submit(&req) {
//!         // Re-render the form, don't place the order twice
//!         return render_order_form(&req);
//!     }
//!
//!     place_order(&req).await?;
//!     render_order_form(&req)
//! }
//!
//! fn render_order_form(req: &HttpRequest) -> Result<HttpResponse, Error> {
//!     let holder = RequestTokenHolder::from_request(req, &DoubleSubmitConfig::default());
//!     let html = format!("<form method=\"post\">{}</form>", holder.hidden_input());
//!     Ok(HttpResponse::ok().with_body(html.into_bytes()))
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod request;
pub mod session;
pub mod token;
pub mod view;
pub mod window;

pub use config::{
    ConfigSource, DoubleSubmitConfig, EnvConfigSource, FORCE_SESSION_CREATION_KEY,
    MapConfigSource, PropertyResolver, REQUEST_WITHOUT_TOKEN_VALID_KEY,
    SYNC_VIA_SESSION_INSTANCE_KEY, SyncStrategy,
};
pub use error::{DoubleSubmitError, Result};
pub use lifecycle::{RenderFn, RestoreOutcome, ViewLifecycleMiddleware, ViewResolver};
pub use middleware::DoubleSubmitMiddleware;
pub use request::{
    RequestTokenHolder, current_request_token, is_detection_enabled, is_duplicate_submit,
};
pub use session::{SessionRegistry, SessionTokens};
pub use token::{RequestToken, TokenSet};
pub use view::{ComponentKind, ViewNode, find_token_component_ids};
pub use window::WindowTokenManager;
