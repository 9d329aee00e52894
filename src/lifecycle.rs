//! View lifecycle integration.
//!
//! Runs inside [`DoubleSubmitMiddleware`](crate::DoubleSubmitMiddleware),
//! right before the handler. After the view is restored it keeps the
//! window's token subset in sync with the session and turns duplicate
//! submits into plain re-renders; before an ajax response is rendered it
//! publishes the fresh token so every token field of the page can be
//! updated.

use crate::config::DoubleSubmitConfig;
use crate::middleware::DoubleSubmitMiddleware;
use crate::request::{
    current_request_token, header, is_detection_enabled, is_duplicate_submit, is_post,
    is_synchronized_ajax, session_id, window_id,
};
use crate::session::SessionRegistry;
use crate::token::RequestToken;
use crate::view::{ViewNode, find_token_component_ids};
use crate::window::DEFAULT_WINDOW_ID;
use armature_core::middleware::Next;
use armature_core::{Error, HttpRequest, HttpResponse, Middleware};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

/// Response header carrying the freshly issued token on ajax responses.
pub const REQUEST_TOKEN_HEADER: &str = "X-Request-Token";

/// Response header listing the client ids of the page's token fields.
pub const REQUEST_TOKEN_TARGETS_HEADER: &str = "X-Request-Token-Targets";

/// Renders a view without running the submitted action.
pub type RenderFn = Arc<
    dyn Fn(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send
        + Sync,
>;

/// Provides the component tree of the view a request renders.
pub trait ViewResolver: Send + Sync {
    fn resolve_view(&self, request: &HttpRequest) -> Option<ViewNode>;
}

impl<F> ViewResolver for F
where
    F: Fn(&HttpRequest) -> Option<ViewNode> + Send + Sync,
{
    fn resolve_view(&self, request: &HttpRequest) -> Option<ViewNode> {
        self(request)
    }
}

/// What to do after the view was restored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Run the handler as usual
    Proceed,
    /// Skip the action and only render the view
    RenderOnly,
}

/// Lifecycle middleware keeping window token subsets in sync.
pub struct ViewLifecycleMiddleware {
    config: Arc<DoubleSubmitConfig>,
    registry: Arc<SessionRegistry>,
    render: Option<RenderFn>,
    views: Option<Arc<dyn ViewResolver>>,
}

impl ViewLifecycleMiddleware {
    /// Create lifecycle middleware sharing state with the given
    /// double-submit middleware
    pub fn new(double_submit: &DoubleSubmitMiddleware) -> Self {
        Self::from_parts(
            Arc::clone(double_submit.config()),
            Arc::clone(double_submit.registry()),
        )
    }

    /// Create lifecycle middleware from a config and a registry
    pub fn from_parts(config: Arc<DoubleSubmitConfig>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            render: None,
            views: None,
        }
    }

    /// Render duplicates with this function instead of the action handler.
    ///
    /// Without it the handler runs and is expected to check
    /// [`is_duplicate_submit`](crate::is_duplicate_submit).
    pub fn with_render(mut self, render: RenderFn) -> Self {
        self.render = Some(render);
        self
    }

    /// Resolve component trees to target token fields on ajax responses
    pub fn with_view_resolver(mut self, views: impl ViewResolver + 'static) -> Self {
        self.views = Some(Arc::new(views));
        self
    }

    /// Sync the window's tokens after the view was restored.
    pub fn after_restore_view(&self, request: &HttpRequest) -> RestoreOutcome {
        if !is_detection_enabled(request) {
            trace!(path = %request.path, "Double-submit detection not active for request");
            return RestoreOutcome::Proceed;
        }

        // Resources don't restore a view.
        if self.config.is_resource_path(&request.path) {
            return RestoreOutcome::Proceed;
        }

        let session = session_id(request).and_then(|id| self.registry.get(&id));
        let window = session.as_ref().map(|session| {
            let id = window_id(request, &self.config);
            session.window(
                id.as_deref().unwrap_or(DEFAULT_WINDOW_ID),
                self.config.max_windows,
            )
        });

        let mut outcome = RestoreOutcome::Proceed;

        if is_duplicate_submit(request) {
            if let (Some(session), Some(window)) = (&session, &window) {
                window.cleanup(session.tokens());
            }
            debug!(path = %request.path, "Rendering view for duplicate submit");
            outcome = RestoreOutcome::RenderOnly;
        }

        // The next render invalidates the window's older tokens anyway.
        if !is_post(request) {
            if let (Some(session), Some(window)) = (&session, &window) {
                window.cleanup(session.tokens());
            }
        }

        if let (Some(session), Some(window)) = (&session, &window) {
            let current = current_request_token(request).map(RequestToken::from);
            window.sync_active_tokens(session.tokens(), current.as_ref());
        }

        outcome
    }

    /// Publish the fresh token on ajax responses.
    pub fn before_render_response(
        &self,
        mut response: HttpResponse,
        token: Option<&str>,
        targets: &[String],
    ) -> HttpResponse {
        if let Some(token) = token {
            response
                .headers
                .insert(REQUEST_TOKEN_HEADER.to_string(), token.to_string());
        }
        if !targets.is_empty() {
            response
                .headers
                .insert(REQUEST_TOKEN_TARGETS_HEADER.to_string(), targets.join(","));
        }
        response
    }

    fn is_ajax(&self, request: &HttpRequest) -> bool {
        is_synchronized_ajax(request, &self.config)
            || header(request, "X-Requested-With")
                .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
    }
}

#[async_trait]
impl Middleware for ViewLifecycleMiddleware {
    async fn handle(&self, request: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let outcome = self.after_restore_view(&request);

        let partial = self.is_ajax(&request) && is_detection_enabled(&request);
        let (token, targets) = if partial {
            let targets = self
                .views
                .as_ref()
                .and_then(|views| views.resolve_view(&request))
                .map(|view| find_token_component_ids(&view, &self.config.token_key))
                .unwrap_or_default();
            (current_request_token(&request), targets)
        } else {
            (None, Vec::new())
        };

        let response = match (outcome, &self.render) {
            (RestoreOutcome::RenderOnly, Some(render)) => render(request).await?,
            _ => next(request).await?,
        };

        if partial {
            Ok(self.before_render_response(response, token.as_deref(), &targets))
        } else {
            Ok(response)
        }
    }
}
