//! Identity extractor.
//!
//! Resolves the signed-in identity for the request through the configured
//! [`IdentityProvider`](crate::services::IdentityProvider). Anonymous visitors
//! are not rejected: the basket page shows them a sign-in prompt instead of
//! the checkout button.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use basket_core::Identity;
use tower_sessions::Session;

use crate::state::AppState;

/// The identity of whoever sent the request.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentIdentity(identity): CurrentIdentity) -> impl IntoResponse {
///     if identity.is_authenticated() { "Checkout" } else { "Sign in to CheckOut" }
/// }
/// ```
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let profile = match parts.extensions.get::<Session>().cloned() {
            Some(session) => state.identity().current(&session).await,
            None => None,
        };

        Ok(Self(Identity::from(profile)))
    }
}
