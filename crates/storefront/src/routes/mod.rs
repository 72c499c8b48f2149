//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Health check
//!
//! # Basket
//! GET  /basket                 - Basket page
//! POST /basket/add             - Add one unit (redirects to /basket)
//! POST /basket/remove          - Remove one unit (redirects to /basket)
//! GET  /basket/count           - Basket count badge (fragment)
//!
//! # Checkout
//! POST /checkout               - Start hosted checkout and redirect to it
//!
//! # Auth
//! GET  /auth/sign-in           - Redirect to the hosted sign-in page
//! GET  /auth/callback          - Return from sign-in (redirects to /basket)
//! POST /auth/logout            - Sign out
//! ```

pub mod auth;
pub mod basket;

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{create_session_layer, request_id_middleware};
use crate::state::AppState;

/// Create the basket routes router.
pub fn basket_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(basket::show))
        .route("/add", post(basket::add))
        .route("/remove", post(basket::remove))
        .route("/count", get(basket::count))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/basket", basket_routes())
        .route("/checkout", post(basket::checkout))
        .route(auth::SIGN_IN_PATH, get(auth::sign_in))
        .route(auth::CALLBACK_PATH, get(auth::callback))
        .route("/auth/logout", post(auth::logout))
}

/// Build the full application with its middleware stack.
///
/// Sentry layers are added by the binary on top of this.
pub fn app(state: AppState) -> Router {
    let session_layer = create_session_layer(state.config());

    routes()
        .layer(session_layer)
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
async fn health() -> &'static str {
    "ok"
}
