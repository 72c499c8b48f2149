//! Sign-in and sign-out routes.
//!
//! Sign-in runs on the identity provider's hosted page:
//! - Sign-in: stores a one-time state and redirects to the hosted page
//! - Callback: checks the state, verifies the returned token and keeps the
//!   profile in the session
//! - Logout: drops the profile, keeping the basket

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::models::session_keys;
use crate::services::identity::{clear_current_identity, set_current_identity};
use crate::state::AppState;

/// Local entry point of the sign-in flow.
pub const SIGN_IN_PATH: &str = "/auth/sign-in";

/// Where the identity provider sends customers back to.
pub const CALLBACK_PATH: &str = "/auth/callback";

const SIGN_IN_FAILED: &str = "/basket?sign_in=failed";

/// Query parameters of the identity provider's callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Sign-in token to resolve to a profile.
    pub token: Option<String>,
    /// Value issued by [`sign_in`].
    pub state: Option<String>,
    /// Error code if the customer did not finish signing in.
    pub error: Option<String>,
}

/// Start sign-in on the identity provider's hosted page.
///
/// # Route
///
/// `GET /auth/sign-in`
#[instrument(skip(state, session))]
pub async fn sign_in(State(state): State<AppState>, session: Session) -> Response {
    let sign_in_state = Uuid::new_v4().simple().to_string();

    if let Err(e) = session
        .insert(session_keys::SIGN_IN_STATE, &sign_in_state)
        .await
    {
        tracing::error!("Failed to store sign-in state in session: {}", e);
        return Redirect::to(SIGN_IN_FAILED).into_response();
    }

    let config = state.config();
    let mut url = config.identity.sign_in_url.clone();
    url.query_pairs_mut()
        .append_pair("redirect_url", config.page_url(CALLBACK_PATH).as_str())
        .append_pair("state", &sign_in_state);

    Redirect::to(url.as_str()).into_response()
}

/// Finish sign-in.
///
/// Every failure lands back on the basket with a notice; the basket itself
/// is never touched.
///
/// # Route
///
/// `GET /auth/callback`
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        tracing::warn!("Identity provider returned error: {}", error);
        return Redirect::to(SIGN_IN_FAILED).into_response();
    }

    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        tracing::warn!("Sign-in callback missing token");
        return Redirect::to(SIGN_IN_FAILED).into_response();
    };

    let stored_state = session
        .remove::<String>(session_keys::SIGN_IN_STATE)
        .await
        .ok()
        .flatten();

    if stored_state.is_none() || stored_state != query.state {
        tracing::warn!("Sign-in state mismatch");
        return Redirect::to(SIGN_IN_FAILED).into_response();
    }

    let profile = match state.sign_in().verify(&token).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::error!("Failed to verify sign-in token: {}", e);
            return Redirect::to(SIGN_IN_FAILED).into_response();
        }
    };

    if let Err(e) = set_current_identity(&session, &profile).await {
        tracing::error!("Failed to store identity in session: {}", e);
        return Redirect::to(SIGN_IN_FAILED).into_response();
    }

    // New id so a session fixed before sign-in does not become signed in.
    if let Err(e) = session.cycle_id().await {
        tracing::error!("Failed to cycle session id: {}", e);
    }

    set_sentry_user(
        &profile.id,
        profile.primary_email().map(basket_core::Email::as_str),
    );
    tracing::info!(identity = %profile.id, "Customer signed in");

    Redirect::to("/basket").into_response()
}

/// Sign out, keeping the basket.
#[instrument(skip(session))]
pub async fn logout(session: Session) -> Response {
    if let Err(e) = clear_current_identity(&session).await {
        tracing::error!("Failed to clear identity from session: {}", e);
    }

    // New id so the signed-out session cannot be replayed as the old one.
    if let Err(e) = session.cycle_id().await {
        tracing::error!("Failed to cycle session id: {}", e);
    }

    clear_sentry_user();

    Redirect::to("/basket").into_response()
}
