//! Integration test harness for the basket storefront.
//!
//! Drives the full router (session layer included) in-process with
//! `tower::ServiceExt::oneshot`, carrying the session cookie between
//! requests the way a browser would.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p basket-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use basket_core::{
    CheckoutError, CheckoutMetadata, CheckoutSessionProvider, GroupedItem, IdentityProfile,
};
use basket_storefront::config::{CheckoutConfig, IdentityConfig, StorefrontConfig};
use basket_storefront::middleware::session::SESSION_COOKIE_NAME;
use basket_storefront::routes;
use basket_storefront::services::{IdentityProvider, SignInError, SignInVerifier};
use basket_storefront::state::AppState;
use secrecy::SecretString;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_sessions::Session;
use url::Url;

/// Configuration pointing the checkout client at `checkout_endpoint`.
pub fn test_config(checkout_endpoint: &str) -> StorefrontConfig {
    StorefrontConfig {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        base_url: Url::parse("http://localhost:3000/").unwrap(),
        checkout: CheckoutConfig {
            endpoint: Url::parse(checkout_endpoint).unwrap(),
            secret_key: SecretString::from("sk_test_9fQ2!zLm#4Rw8TbX$1Nc"),
            timeout: Duration::from_secs(5),
        },
        image_cdn_base_url: None,
        identity: IdentityConfig {
            sign_in_url: Url::parse("https://accounts.example.net/sign-in").unwrap(),
            userinfo_url: Url::parse("http://127.0.0.1:9/v1/me").unwrap(),
            timeout: Duration::from_secs(5),
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// What the stub checkout provider answers with.
#[derive(Debug, Clone)]
pub enum StubResponse {
    Redirect(Url),
    NoUrl,
    Fail,
}

/// Checkout provider that records every call.
#[derive(Debug)]
pub struct StubCheckout {
    response: StubResponse,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Vec<GroupedItem>, CheckoutMetadata)>>,
}

impl StubCheckout {
    pub fn new(response: StubResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Stub that holds every call open until `gate` is notified.
    pub fn gated(response: StubResponse, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            response,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Wait until the stub has been called `count` times.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Items and metadata of every call so far.
    pub fn requests(&self) -> Vec<(Vec<GroupedItem>, CheckoutMetadata)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckoutSessionProvider for StubCheckout {
    async fn create_session(
        &self,
        items: &[GroupedItem],
        metadata: &CheckoutMetadata,
    ) -> Result<Option<Url>, CheckoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((items.to_vec(), metadata.clone()));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.response {
            StubResponse::Redirect(url) => Ok(Some(url.clone())),
            StubResponse::NoUrl => Ok(None),
            StubResponse::Fail => Err(CheckoutError::Provider {
                status: 500,
                message: "boom".to_string(),
            }),
        }
    }
}

/// Identity provider that reports the same user on every session.
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity(pub Option<IdentityProfile>);

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn current(&self, _session: &Session) -> Option<IdentityProfile> {
        self.0.clone()
    }
}

/// Sign-in verifier that accepts one token.
#[derive(Debug, Clone)]
pub struct StubSignIn {
    pub token: String,
    pub profile: IdentityProfile,
}

#[async_trait]
impl SignInVerifier for StubSignIn {
    async fn verify(&self, token: &str) -> Result<IdentityProfile, SignInError> {
        if token == self.token {
            Ok(self.profile.clone())
        } else {
            Err(SignInError::Rejected { status: 401 })
        }
    }
}

/// Sign-in verifier that rejects every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectSignIn;

#[async_trait]
impl SignInVerifier for RejectSignIn {
    async fn verify(&self, _token: &str) -> Result<IdentityProfile, SignInError> {
        Err(SignInError::Rejected { status: 401 })
    }
}

/// In-process client for the storefront router.
pub struct TestApp {
    router: Router,
    cookie: Option<String>,
}

impl TestApp {
    pub fn new(
        config: StorefrontConfig,
        checkout: Arc<dyn CheckoutSessionProvider>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self::from_state(AppState::with_collaborators(
            config,
            checkout,
            identity,
            Arc::new(RejectSignIn),
        ))
    }

    /// App over already-built state, such as the production wiring.
    pub fn from_state(state: AppState) -> Self {
        Self {
            router: routes::app(state),
            cookie: None,
        }
    }

    /// App with a stub checkout and a fixed identity.
    pub fn with_stubs(checkout: Arc<StubCheckout>, identity: Option<IdentityProfile>) -> Self {
        Self::new(
            test_config("http://127.0.0.1:9/sessions"),
            checkout,
            Arc::new(FixedIdentity(identity)),
        )
    }

    pub async fn get(&mut self, path: &str) -> Response<Body> {
        let request = self.request("GET", path).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post_form(&mut self, path: &str, form: &str) -> Response<Body> {
        let request = self
            .request("POST", path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Add one unit of a product through the basket form.
    pub async fn add(&mut self, product_id: &str, name: &str, price: &str) -> Response<Body> {
        let form = format!("product_id={product_id}&name={name}&price={price}&slug={product_id}");
        self.post_form("/basket/add", &form).await
    }

    /// Send a form post on its own task, carrying the current cookie.
    ///
    /// The response does not update this client's cookie.
    pub fn spawn_post_form(&self, path: &str, form: &str) -> JoinHandle<Response<Body>> {
        let request = self
            .request("POST", path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        let router = self.router.clone();
        tokio::spawn(async move { router.oneshot(request).await.unwrap() })
    }

    fn request(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        match &self.cookie {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(&mut self, request: Request<Body>) -> Response<Body> {
        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(cookie) = session_cookie(&response) {
            self.cookie = Some(cookie);
        }
        response
    }
}

/// `name=value` pair of the session cookie, if the response set one.
fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with(&format!("{SESSION_COOKIE_NAME}=")))
        .map(String::from)
}

/// Read a response body as UTF-8.
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `Location` header of a redirect.
pub fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
