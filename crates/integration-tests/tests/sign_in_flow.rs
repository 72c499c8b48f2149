//! Sign-in through the identity provider's callback, then checkout, using
//! the same `AppState::new` wiring as the binary.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use basket_core::{Email, IdentityHandle, IdentityProfile};
use basket_integration_tests::{
    StubCheckout, StubResponse, StubSignIn, TestApp, body_text, location, test_config,
};
use basket_storefront::state::AppState;
use serde_json::{Value, json};
use url::Url;

const GOOD_TOKEN: &str = "tok_7Hq2pLx9";

async fn userinfo(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {GOOD_TOKEN}").as_str());

    if authorized {
        (
            StatusCode::OK,
            Json(json!({
                "id": "user_123",
                "full_name": "Jane Doe",
                "email_addresses": ["jane@x.io"],
            })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" })))
    }
}

/// Fake identity and checkout providers on one local server.
async fn spawn_providers(captured: Arc<Mutex<Vec<Value>>>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().route("/v1/me", get(userinfo)).route(
        "/v1/sessions",
        post(move |Json(body): Json<Value>| {
            let captured = captured.clone();
            async move {
                captured.lock().unwrap().push(body);
                Json(json!({ "url": "https://pay.example.net/c/xyz" }))
            }
        }),
    );

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}

async fn production_app(captured: Arc<Mutex<Vec<Value>>>) -> TestApp {
    let base = spawn_providers(captured).await;
    let mut config = test_config(&format!("{base}/v1/sessions"));
    config.identity.userinfo_url = Url::parse(&format!("{base}/v1/me")).unwrap();

    TestApp::from_state(AppState::new(config).unwrap())
}

/// Follow `/auth/sign-in` and return the state it issued.
async fn start_sign_in(app: &mut TestApp) -> String {
    let response = app.get("/auth/sign-in").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let hosted = Url::parse(location(&response)).unwrap();
    assert_eq!(hosted.host_str(), Some("accounts.example.net"));
    let query = |key: &str| {
        hosted
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    };
    assert_eq!(query("redirect_url"), "http://localhost:3000/auth/callback");
    query("state")
}

#[tokio::test]
async fn test_sign_in_then_checkout() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut app = production_app(captured.clone()).await;
    app.add("A", "Product+A", "10.00").await;

    let html = body_text(app.get("/basket").await).await;
    assert!(html.contains("Sign in to CheckOut"));

    let state = start_sign_in(&mut app).await;
    let response = app
        .get(&format!("/auth/callback?token={GOOD_TOKEN}&state={state}"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/basket");

    // Signing in keeps the basket and unlocks the checkout button.
    let html = body_text(app.get("/basket").await).await;
    assert!(html.contains(">Checkout<"));
    assert!(html.contains("Product A"));

    let response = app.post_form("/checkout", "").await;
    assert_eq!(location(&response), "https://pay.example.net/c/xyz");

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let metadata = &captured[0]["metadata"];
    assert_eq!(metadata["clerkUserId"], "user_123");
    assert_eq!(metadata["customerName"], "Jane Doe");
    assert_eq!(metadata["customerEmail"], "jane@x.io");
}

#[tokio::test]
async fn test_rejected_token_stays_anonymous() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut app = production_app(captured.clone()).await;
    app.add("A", "Product+A", "10.00").await;

    let state = start_sign_in(&mut app).await;
    let response = app
        .get(&format!("/auth/callback?token=forged&state={state}"))
        .await;
    assert_eq!(location(&response), "/basket?sign_in=failed");

    let html = body_text(app.get("/basket?sign_in=failed").await).await;
    assert!(html.contains("sign you in. Please try again."));
    assert!(html.contains("Sign in to CheckOut"));

    let response = app.post_form("/checkout", "").await;
    assert_eq!(location(&response), "/auth/sign-in");
    assert!(captured.lock().unwrap().is_empty());
}

fn jane() -> IdentityProfile {
    IdentityProfile::new(IdentityHandle::new("user_123"))
        .with_full_name("Jane Doe")
        .with_email(Email::parse("jane@x.io").unwrap())
}

/// App whose sign-in accepts `GOOD_TOKEN` and whose identity comes from the session.
fn stub_app() -> TestApp {
    let stub = StubCheckout::new(StubResponse::NoUrl);
    TestApp::from_state(AppState::with_collaborators(
        test_config("http://127.0.0.1:9/sessions"),
        stub,
        Arc::new(basket_storefront::services::SessionIdentityProvider),
        Arc::new(StubSignIn {
            token: GOOD_TOKEN.to_string(),
            profile: jane(),
        }),
    ))
}

#[tokio::test]
async fn test_callback_with_wrong_state_is_rejected() {
    let mut app = stub_app();
    start_sign_in(&mut app).await;

    let response = app
        .get(&format!("/auth/callback?token={GOOD_TOKEN}&state=not-the-state"))
        .await;
    assert_eq!(location(&response), "/basket?sign_in=failed");

    let html = body_text(app.get("/basket").await).await;
    assert!(!html.contains(">Checkout<"));
}

#[tokio::test]
async fn test_callback_without_sign_in_is_rejected() {
    let mut app = stub_app();

    let response = app
        .get(&format!("/auth/callback?token={GOOD_TOKEN}&state="))
        .await;
    assert_eq!(location(&response), "/basket?sign_in=failed");
}

#[tokio::test]
async fn test_state_is_single_use() {
    let mut app = stub_app();
    let state = start_sign_in(&mut app).await;
    let callback = format!("/auth/callback?token={GOOD_TOKEN}&state={state}");

    assert_eq!(location(&app.get(&callback).await), "/basket");
    app.post_form("/auth/logout", "").await;

    assert_eq!(location(&app.get(&callback).await), "/basket?sign_in=failed");
}

#[tokio::test]
async fn test_provider_error_is_reported() {
    let mut app = stub_app();
    let state = start_sign_in(&mut app).await;

    let response = app
        .get(&format!("/auth/callback?error=access_denied&state={state}"))
        .await;
    assert_eq!(location(&response), "/basket?sign_in=failed");
}
