//! Integration tests for armature-double-submit

use armature_core::{HttpRequest, HttpResponse, Middleware};
use armature_double_submit::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Both middlewares in front of a handler that counts executed actions and
/// echoes the token issued for the request.
struct App {
    double_submit: DoubleSubmitMiddleware,
    lifecycle: Arc<ViewLifecycleMiddleware>,
    actions: Arc<AtomicUsize>,
    duplicates: Arc<AtomicUsize>,
}

impl App {
    fn new(config: DoubleSubmitConfig) -> Self {
        let double_submit = DoubleSubmitMiddleware::new(config).unwrap();
        let lifecycle = Arc::new(ViewLifecycleMiddleware::new(&double_submit));
        Self {
            double_submit,
            lifecycle,
            actions: Arc::new(AtomicUsize::new(0)),
            duplicates: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn send(&self, request: HttpRequest) -> HttpResponse {
        let lifecycle = Arc::clone(&self.lifecycle);
        let actions = Arc::clone(&self.actions);
        let duplicates = Arc::clone(&self.duplicates);

        self.double_submit
            .handle(
                request,
                Box::new(move |req| {
                    Box::pin(async move {
                        lifecycle
                            .handle(
                                req,
                                Box::new(move |req| {
                                    Box::pin(async move {
                                        if is_duplicate_submit(&req) {
                                            duplicates.fetch_add(1, Ordering::SeqCst);
                                        } else if req.method == "POST" {
                                            actions.fetch_add(1, Ordering::SeqCst);
                                            tokio::time::sleep(Duration::from_millis(5)).await;
                                        }
                                        let token = current_request_token(&req).unwrap_or_default();
                                        Ok(HttpResponse::ok().with_body(token.into_bytes()))
                                    })
                                }),
                            )
                            .await
                    })
                }),
            )
            .await
            .unwrap()
    }

    fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }

    fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    fn session(&self, session_id: &str) -> Arc<SessionTokens> {
        self.double_submit.registry().get(session_id).unwrap()
    }
}

fn get(path: &str, session: Option<&str>, window: &str) -> HttpRequest {
    request("GET", path, session, window)
}

fn post(path: &str, session: &str, window: &str, body: &str) -> HttpRequest {
    let mut req = request("POST", path, Some(session), window);
    req.body = body.as_bytes().to_vec();
    req.headers.insert(
        "Content-Type".to_string(),
        "application/x-www-form-urlencoded".to_string(),
    );
    req
}

fn request(method: &str, path: &str, session: Option<&str>, window: &str) -> HttpRequest {
    let mut req = HttpRequest::new(method.to_string(), path.to_string());
    if let Some(session) = session {
        req.headers.insert(
            "Cookie".to_string(),
            format!("ARMATURE_SESSION={}", session),
        );
    }
    req.headers
        .insert("X-Window-Id".to_string(), window.to_string());
    req
}

fn session_from(response: &HttpResponse) -> String {
    let cookie = response.headers.get("Set-Cookie").unwrap();
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap()
}

fn token_from(response: &HttpResponse) -> String {
    String::from_utf8(response.body.clone()).unwrap()
}

/// Open a page in a new session, returning the session id and the form token.
async fn open_page(app: &App, window: &str) -> (String, String) {
    let response = app.send(get("/orders/new", None, window)).await;
    (session_from(&response), token_from(&response))
}

#[tokio::test]
async fn test_submit_once_then_duplicate() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, token) = open_page(&app, "w1").await;
    assert_eq!(token.len(), 32);

    let body = format!("item=42&requestToken={}", token);

    app.send(post("/orders", &session, "w1", &body)).await;
    assert_eq!(app.actions(), 1);

    // Refresh re-posts the same form
    app.send(post("/orders", &session, "w1", &body)).await;
    assert_eq!(app.actions(), 1);
    assert_eq!(app.duplicates(), 1);
}

#[tokio::test]
async fn test_get_never_consumes_token() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, token) = open_page(&app, "w1").await;

    let mut req = get("/orders/new", Some(&session), "w2");
    req.query_params
        .insert("requestToken".to_string(), token.clone());
    app.send(req).await;

    assert!(app.session(&session).tokens().contains(&token));

    app.send(post("/orders", &session, "w1", &format!("requestToken={}", token)))
        .await;
    assert_eq!(app.actions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submits_single_winner() {
    for strategy in [SyncStrategy::DedicatedHandle, SyncStrategy::SessionInstance] {
        let app = Arc::new(App::new(
            DoubleSubmitConfig::default().with_sync_strategy(strategy),
        ));
        let (session, token) = open_page(&app, "w1").await;
        let body = format!("requestToken={}", token);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let app = Arc::clone(&app);
                let req = post("/orders", &session, "w1", &body);
                tokio::spawn(async move { app.send(req).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(app.actions(), 1, "strategy {:?}", strategy);
        assert_eq!(app.duplicates(), 7, "strategy {:?}", strategy);
    }
}

#[tokio::test]
async fn test_window_cleanup_keeps_other_windows() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, left_token) = open_page(&app, "left").await;

    let response = app.send(get("/orders/new", Some(&session), "right")).await;
    let right_token = token_from(&response);

    let removed = app
        .double_submit
        .registry()
        .destroy_window(&session, "left")
        .unwrap();
    assert_eq!(removed, 1);

    let tokens = app.session(&session).tokens().snapshot();
    assert!(!tokens.contains(left_token.as_str()));
    assert!(tokens.contains(right_token.as_str()));

    app.send(post(
        "/orders",
        &session,
        "right",
        &format!("requestToken={}", right_token),
    ))
    .await;
    assert_eq!(app.actions(), 1);
}

#[tokio::test]
async fn test_duplicate_in_one_window_spares_other_window() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, left_token) = open_page(&app, "left").await;

    let response = app.send(get("/orders/new", Some(&session), "right")).await;
    let right_token = token_from(&response);

    let left_body = format!("requestToken={}", left_token);
    app.send(post("/orders", &session, "left", &left_body)).await;
    app.send(post("/orders", &session, "left", &left_body)).await;
    assert_eq!(app.actions(), 1);
    assert_eq!(app.duplicates(), 1);

    app.send(post(
        "/orders",
        &session,
        "right",
        &format!("requestToken={}", right_token),
    ))
    .await;
    assert_eq!(app.actions(), 2);
}

#[tokio::test]
async fn test_duplicate_without_window_cleanup_resets_tokens() {
    // Without the lifecycle middleware nothing window specific is cleaned up.
    let double_submit = DoubleSubmitMiddleware::new(DoubleSubmitConfig::default()).unwrap();
    let session = double_submit.registry().create();
    for _ in 0..3 {
        session.tokens().insert(RequestToken::generate());
    }

    let mut req = post("/orders", session.id(), "w1", "requestToken=stale");
    req.headers.remove("X-Window-Id");
    let response = double_submit
        .handle(
            req,
            Box::new(|req| {
                Box::pin(async move {
                    let token = current_request_token(&req).unwrap_or_default();
                    Ok(HttpResponse::ok().with_body(token.into_bytes()))
                })
            }),
        )
        .await
        .unwrap();

    let issued = token_from(&response);
    assert_eq!(session.tokens().len(), 1);
    assert!(session.tokens().contains(&issued));
}

#[tokio::test]
async fn test_prefixed_token_field() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, token) = open_page(&app, "w1").await;

    let body = format!("orderForm%3ArequestToken={}&qty=1", token);
    app.send(post("/orders", &session, "w1", &body)).await;
    app.send(post("/orders", &session, "w1", &body)).await;

    assert_eq!(app.actions(), 1);
    assert_eq!(app.duplicates(), 1);
}

#[tokio::test]
async fn test_missing_token_policy() {
    let lenient = App::new(DoubleSubmitConfig::default());
    let (session, _) = open_page(&lenient, "w1").await;
    lenient.send(post("/orders", &session, "w1", "qty=1")).await;
    assert_eq!(lenient.actions(), 1);

    let strict = App::new(DoubleSubmitConfig::default().with_request_without_token_valid(false));
    let (session, _) = open_page(&strict, "w1").await;
    strict.send(post("/orders", &session, "w1", "qty=1")).await;
    assert_eq!(strict.actions(), 0);
    assert_eq!(strict.duplicates(), 1);
}

#[tokio::test]
async fn test_resource_requests_issue_no_token() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, _) = open_page(&app, "w1").await;
    let before = app.session(&session).tokens().len();

    let response = app
        .send(get("/static/app.css", Some(&session), "w1"))
        .await;
    assert!(token_from(&response).is_empty());
    assert_eq!(app.session(&session).tokens().len(), before);
}

#[tokio::test]
async fn test_no_session_no_tracking() {
    let app = App::new(DoubleSubmitConfig::default().with_force_session_creation(false));

    let response = app.send(get("/orders/new", None, "w1")).await;
    assert!(token_from(&response).is_empty());
    assert!(!response.headers.contains_key("Set-Cookie"));

    let mut req = request("POST", "/orders", None, "w1");
    req.body = b"requestToken=whatever".to_vec();
    app.send(req).await;
    assert_eq!(app.actions(), 1);
    assert_eq!(app.double_submit.registry().count(), 0);
}

#[tokio::test]
async fn test_get_drops_older_tokens_of_window() {
    let app = App::new(DoubleSubmitConfig::default());
    let (session, first) = open_page(&app, "w1").await;

    let response = app.send(get("/orders/new", Some(&session), "w1")).await;
    let second = token_from(&response);

    let tokens = app.session(&session).tokens().snapshot();
    assert!(!tokens.contains(first.as_str()));
    assert!(tokens.contains(second.as_str()));
}

#[tokio::test]
async fn test_window_state_bounded_per_session() {
    let app = App::new(DoubleSubmitConfig::default().with_max_windows(4));
    let (session, first) = open_page(&app, "w0").await;

    let mut latest = String::new();
    for i in 1..50 {
        let window = format!("w{}", i);
        let response = app.send(get("/orders/new", Some(&session), &window)).await;
        latest = token_from(&response);
    }

    let state = app.session(&session);
    assert_eq!(state.window_count(), 4);
    assert_eq!(state.tokens().len(), 4);
    assert!(!state.tokens().contains(first.as_str()));

    app.send(post(
        "/orders",
        &session,
        "w49",
        &format!("requestToken={}", latest),
    ))
    .await;
    assert_eq!(app.actions(), 1);
}
