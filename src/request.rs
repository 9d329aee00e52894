//! Request-local state and parameter access.
//!
//! Armature requests don't carry typed attributes, so the middleware stores
//! its per-request state in reserved `__ds_` headers. Incoming values for
//! those headers are stripped before the middleware writes its own.

use crate::config::DoubleSubmitConfig;
use armature_core::HttpRequest;

/// Token issued for the current request.
pub const REQUEST_TOKEN_ATTR: &str = "__ds_request_token";

/// Set when double-submit detection ran for the request.
pub const DETECTION_ENABLED_ATTR: &str = "__ds_enabled";

/// Set when the request was detected as a duplicate submit.
pub const DUPLICATE_SUBMIT_ATTR: &str = "__ds_duplicate";

/// Session the request belongs to.
pub const SESSION_ID_ATTR: &str = "__ds_session_id";

const ATTR_PREFIX: &str = "__ds_";

/// Remove any client-supplied attribute headers
pub(crate) fn strip_attributes(request: &mut HttpRequest) {
    request
        .headers
        .retain(|name, _| !name.to_ascii_lowercase().starts_with(ATTR_PREFIX));
}

pub(crate) fn set_attribute(request: &mut HttpRequest, name: &str, value: impl Into<String>) {
    request.headers.insert(name.to_string(), value.into());
}

fn flag(request: &HttpRequest, name: &str) -> bool {
    request.headers.get(name).is_some_and(|v| v == "true")
}

/// Token issued for the current request, to embed in the rendered form
pub fn current_request_token(request: &HttpRequest) -> Option<String> {
    request.headers.get(REQUEST_TOKEN_ATTR).cloned()
}

/// Whether the request was detected as a duplicate submit
pub fn is_duplicate_submit(request: &HttpRequest) -> bool {
    flag(request, DUPLICATE_SUBMIT_ATTR)
}

/// Whether double-submit detection ran for the request
pub fn is_detection_enabled(request: &HttpRequest) -> bool {
    flag(request, DETECTION_ENABLED_ATTR)
}

/// Session id the request was bound to
pub fn session_id(request: &HttpRequest) -> Option<String> {
    request.headers.get(SESSION_ID_ATTR).cloned()
}

/// Case-insensitive header lookup
pub fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .get(name)
        .or_else(|| {
            request
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}

/// Value of a cookie sent with the request
pub fn cookie(request: &HttpRequest, name: &str) -> Option<String> {
    header(request, "Cookie")?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

/// Whether the request is a POST
pub fn is_post(request: &HttpRequest) -> bool {
    request.method.eq_ignore_ascii_case("POST")
}

/// Request parameters from the query string and the body.
///
/// The body is read as a JSON object (top-level string values) or as
/// URL-encoded form data.
pub fn parameters(request: &HttpRequest) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = request
        .query_params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if request.body.is_empty() {
        return params;
    }

    if let Ok(serde_json::Value::Object(map)) =
        serde_json::from_slice::<serde_json::Value>(&request.body)
    {
        params.extend(
            map.into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string()))),
        );
        return params;
    }

    if let Ok(form) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&request.body) {
        params.extend(form);
    }

    params
}

/// Find the submitted token.
///
/// The exact token key wins; otherwise the first parameter whose name ends
/// with `:<key>` or `_<key>` (prefixed fields of multi-form pages).
pub fn find_submitted_token(request: &HttpRequest, config: &DoubleSubmitConfig) -> Option<String> {
    let params = parameters(request);

    if let Some((_, value)) = params.iter().find(|(k, _)| *k == config.token_key) {
        return Some(value.clone());
    }

    let suffixes = config.token_key_suffixes();
    params
        .into_iter()
        .find(|(k, _)| suffixes.iter().any(|suffix| k.ends_with(suffix.as_str())))
        .map(|(_, v)| v)
}

/// Window id of the request, from the configured header or query parameter
pub fn window_id(request: &HttpRequest, config: &DoubleSubmitConfig) -> Option<String> {
    header(request, &config.window_id_header)
        .map(str::to_string)
        .or_else(|| request.query_params.get(&config.window_id_param).cloned())
        .filter(|id| !id.trim().is_empty())
}

/// Whether the request is an ajax request queued by the client
pub fn is_synchronized_ajax(request: &HttpRequest, config: &DoubleSubmitConfig) -> bool {
    header(request, &config.ajax_header_name) == Some(config.ajax_header_value.as_str())
}

/// Gives handlers access to the token of the current request.
#[derive(Debug, Clone)]
pub struct RequestTokenHolder {
    key: String,
    value: Option<String>,
}

impl RequestTokenHolder {
    /// Create a holder for the current request
    pub fn from_request(request: &HttpRequest, config: &DoubleSubmitConfig) -> Self {
        Self {
            key: config.token_key.clone(),
            value: current_request_token(request),
        }
    }

    /// Parameter name the token is submitted under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token issued for the current request
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Hidden form field carrying the token
    pub fn hidden_input(&self) -> String {
        self.render(&self.key)
    }

    /// Hidden form field for one of several forms on a page
    pub fn hidden_input_for_form(&self, form_id: &str) -> String {
        self.render(&format!("{}:{}", form_id, self.key))
    }

    fn render(&self, name: &str) -> String {
        let name = escape_html(name);
        format!(
            r#"<input type="hidden" id="{}" name="{}" value="{}"/>"#,
            name,
            name,
            escape_html(self.value.as_deref().unwrap_or_default())
        )
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
