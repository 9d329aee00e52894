use crate::config::DoubleSubmitConfig;
use crate::request::{
    DETECTION_ENABLED_ATTR, DUPLICATE_SUBMIT_ATTR, REQUEST_TOKEN_ATTR, SESSION_ID_ATTR, cookie,
    find_submitted_token, is_post, is_synchronized_ajax, set_attribute, strip_attributes,
};
use crate::session::{SessionRegistry, SessionTokens};
use crate::token::RequestToken;
use armature_core::middleware::Next;
use armature_core::{Error, HttpRequest, HttpResponse, Middleware};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Double-submit prevention middleware.
///
/// Issues a fresh token for every non-resource request and checks the
/// submitted token of every POST against the session's token set. A POST
/// whose token was already consumed (or missing, depending on the
/// configuration) takes the duplicate path instead of re-running the action.
#[derive(Clone)]
pub struct DoubleSubmitMiddleware {
    config: Arc<DoubleSubmitConfig>,
    registry: Arc<SessionRegistry>,
}

impl DoubleSubmitMiddleware {
    /// Create new double-submit middleware with its own session registry
    pub fn new(config: DoubleSubmitConfig) -> crate::Result<Self> {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    /// Create middleware sharing an existing session registry
    pub fn with_registry(
        config: DoubleSubmitConfig,
        registry: Arc<SessionRegistry>,
    ) -> crate::Result<Self> {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            registry,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Arc<DoubleSubmitConfig> {
        &self.config
    }

    /// Session registry in use
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Check if a request gets a new token
    pub fn issues_token_for(&self, request: &HttpRequest) -> bool {
        !self.config.is_resource_path(&request.path)
    }

    /// Check if a request's submitted token is verified
    pub fn needs_check(&self, request: &HttpRequest) -> bool {
        is_post(request)
    }

    fn issue_token(
        &self,
        request: &mut HttpRequest,
        session: Option<&SessionTokens>,
    ) -> Option<RequestToken> {
        let session = session?;
        if !self.issues_token_for(request) {
            return None;
        }

        let token = RequestToken::generate();
        session.tokens().insert(token.clone());
        set_attribute(request, REQUEST_TOKEN_ATTR, token.as_str());

        trace!(session_id = %session.id(), path = %request.path, "Issued request token");
        Some(token)
    }

    fn is_valid_request(&self, session: &SessionTokens, submitted: Option<&str>) -> bool {
        match submitted {
            None => self.config.request_without_token_valid,
            Some(token) => session.tokens().remove(token),
        }
    }

    async fn check_submit(
        &self,
        request: HttpRequest,
        session: Option<Arc<SessionTokens>>,
        issued: Option<RequestToken>,
        next: Next,
    ) -> Result<HttpResponse, Error> {
        if !self.needs_check(&request) {
            return next(request).await;
        }

        let Some(session) = session else {
            trace!(path = %request.path, "No session, skipping double-submit check");
            return next(request).await;
        };

        let submitted = find_submitted_token(&request, &self.config);

        let lock = session.sync_lock(self.config.sync_strategy);
        let _guard = lock.lock().await;

        if self.is_valid_request(&session, submitted.as_deref()) {
            next(request).await
        } else {
            self.handle_duplicate(request, &session, issued, next).await
        }
    }

    async fn handle_duplicate(
        &self,
        mut request: HttpRequest,
        session: &SessionTokens,
        issued: Option<RequestToken>,
        next: Next,
    ) -> Result<HttpResponse, Error> {
        // Queued ajax requests can't be duplicates of each other.
        if is_synchronized_ajax(&request, &self.config) {
            debug!(session_id = %session.id(), "Ignoring rejected ajax submit");
            return Ok(HttpResponse::ok());
        }

        info!(
            session_id = %session.id(),
            path = %request.path,
            "Duplicate submit detected"
        );

        set_attribute(&mut request, DUPLICATE_SUBMIT_ATTR, "true");

        let before = session.tokens().snapshot();
        let result = next(request).await;

        // Nothing window specific was cleaned up: keep only the token of
        // this response, the re-rendered page invalidates the others.
        if session.tokens().reset_if_unchanged(&before, issued) {
            debug!(session_id = %session.id(), "Reset session tokens after duplicate submit");
        }

        result
    }

    fn add_session_cookie(&self, mut response: HttpResponse, session_id: &str) -> HttpResponse {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.config.session_cookie_name, session_id
        );
        response.headers.insert("Set-Cookie".to_string(), cookie);
        response
    }
}

#[async_trait]
impl Middleware for DoubleSubmitMiddleware {
    async fn handle(&self, mut request: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        strip_attributes(&mut request);

        let session_cookie = cookie(&request, &self.config.session_cookie_name);
        let (session, created) = match self
            .registry
            .resolve(session_cookie.as_deref(), self.config.force_session_creation)
        {
            Some((session, created)) => (Some(session), created),
            None => (None, false),
        };

        if let Some(ref session) = session {
            set_attribute(&mut request, SESSION_ID_ATTR, session.id());
        }

        let issued = self.issue_token(&mut request, session.as_deref());
        set_attribute(&mut request, DETECTION_ENABLED_ATTR, "true");

        let response = self
            .check_submit(request, session.clone(), issued, next)
            .await?;

        match session {
            Some(session) if created => Ok(self.add_session_cookie(response, session.id())),
            _ => Ok(response),
        }
    }
}
