use axum::{
    Router,
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header},
    routing::post,
};
use chrono::Duration;
use tollgate::{Action, AuthEventType, ClientInfo, Scope, Tollgate};
use tollgate_axum::{Client, RateLimitState, TollgateError, enforce, rate_limit};
use tower::ServiceExt; // for .oneshot()

fn tollgate() -> Tollgate {
    Tollgate::builder()
        .with_background_sweep(false)
        .build()
        .unwrap()
}

fn app(tollgate: Tollgate) -> Router {
    Router::new()
        .route("/login", post(login_handler))
        .layer(axum::middleware::from_fn_with_state(
            RateLimitState::new(tollgate.clone(), Action::Login),
            rate_limit,
        ))
        .with_state(tollgate)
}

async fn login_handler(State(tollgate): State<Tollgate>, Client(client): Client) -> StatusCode {
    tollgate.record_login_failed(&client, Some("victim@example.com"), "invalid_password");
    StatusCode::UNAUTHORIZED
}

fn login_request(ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "integration-test")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_login_quota_returns_uniform_429() {
    let tollgate = tollgate();
    let app = app(tollgate.clone());

    for _ in 0..5 {
        let response = app.clone().oneshot(login_request("9.9.9.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.clone().oneshot(login_request("9.9.9.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1800");

    let json = json_body(response).await;
    assert_eq!(json["error"], "Too many attempts, retry after 1800 seconds");
    assert_eq!(json["code"], 429);

    // Other clients are unaffected
    let response = app.clone().oneshot(login_request("8.8.8.8")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Detection may append derived events after the blocked attempt
    let blocked = tollgate
        .events_for_ip("9.9.9.9", 10)
        .into_iter()
        .find(|e| e.event_type != AuthEventType::SuspiciousActivity)
        .unwrap();
    assert_eq!(blocked.event_type, AuthEventType::LoginBlockedRateLimit);
    assert_eq!(blocked.user_agent, "integration-test");
}

#[tokio::test]
async fn test_blocked_ip_gets_the_same_response_shape() {
    let tollgate = tollgate();
    tollgate.block("6.6.6.6", "manual", Duration::minutes(30));
    let app = app(tollgate.clone());

    let response = app.oneshot(login_request("6.6.6.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1800");

    let json = json_body(response).await;
    assert_eq!(json["error"], "Too many attempts, retry after 1800 seconds");
    assert_eq!(json["code"], 429);
}

#[tokio::test]
async fn test_forwarded_for_uses_first_hop() {
    let tollgate = tollgate();
    let app = app(tollgate.clone());

    let response = app
        .oneshot(login_request("203.0.113.9, 10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(tollgate.events_for_ip("203.0.113.9", 10).len(), 1);
    assert!(tollgate.events_for_ip("10.0.0.1", 10).is_empty());
}

#[test]
fn test_enforce_user_limit_inside_handler() {
    let tollgate = tollgate();
    let client = ClientInfo::new("1.1.1.1", "ua");

    for _ in 0..5 {
        assert!(enforce(&tollgate, Action::Login, Scope::User, "alice@example.com", &client).is_ok());
    }
    let err = enforce(&tollgate, Action::Login, Scope::User, "alice@example.com", &client)
        .unwrap_err();
    assert!(matches!(
        err,
        TollgateError::TooManyAttempts {
            retry_after_seconds: 1800
        }
    ));

    let events = tollgate.events_for_ip("1.1.1.1", 1);
    assert_eq!(events[0].event_type, AuthEventType::LoginBlockedRateLimit);
    assert_eq!(events[0].email.as_deref(), Some("alice@example.com"));
}
