//! Signed-in identity lookup.
//!
//! Sign-in itself runs on the identity provider's hosted page. The customer
//! comes back to `/auth/callback` with a sign-in token, which a
//! [`SignInVerifier`] resolves to a profile; the profile is then kept in the
//! session, where [`IdentityProvider`] reads it on every request.

use async_trait::async_trait;
use basket_core::IdentityProfile;
use reqwest::StatusCode;
use thiserror::Error;
use tower_sessions::Session;
use tracing::instrument;
use url::Url;

use crate::config::IdentityConfig;
use crate::models::session_keys;

/// Errors from resolving a sign-in token.
#[derive(Debug, Error)]
pub enum SignInError {
    /// The identity provider could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The identity provider did not accept the token.
    #[error("Sign-in token rejected with status {status}")]
    Rejected { status: u16 },

    /// The profile in the response could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Turns the token a customer returns with into their verified profile.
#[async_trait]
pub trait SignInVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityProfile, SignInError>;
}

/// Resolves sign-in tokens against the identity provider's userinfo endpoint.
#[derive(Clone)]
pub struct HttpSignInVerifier {
    client: reqwest::Client,
    userinfo_url: Url,
}

impl HttpSignInVerifier {
    /// Create a new verifier.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &IdentityConfig) -> Result<Self, SignInError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SignInError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            userinfo_url: config.userinfo_url.clone(),
        })
    }
}

#[async_trait]
impl SignInVerifier for HttpSignInVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<IdentityProfile, SignInError> {
        let response = self
            .client
            .get(self.userinfo_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SignInError::Transport(e.to_string()))?;
        let status = response.status();

        if status != StatusCode::OK {
            tracing::warn!(status = %status, "Identity provider rejected sign-in token");
            return Err(SignInError::Rejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<IdentityProfile>()
            .await
            .map_err(|e| SignInError::Parse(e.to_string()))
    }
}

/// Answers "who is signed in on this session?".
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Profile of the signed-in user, or `None` for anonymous visitors.
    async fn current(&self, session: &Session) -> Option<IdentityProfile>;
}

/// Reads the profile the sign-in flow stored in the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionIdentityProvider;

#[async_trait]
impl IdentityProvider for SessionIdentityProvider {
    async fn current(&self, session: &Session) -> Option<IdentityProfile> {
        match session
            .get::<IdentityProfile>(session_keys::CURRENT_IDENTITY)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Failed to read identity from session: {e}");
                None
            }
        }
    }
}

/// Store the signed-in profile in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_identity(
    session: &Session,
    profile: &IdentityProfile,
) -> Result<(), tower_sessions::session::Error> {
    session
        .insert(session_keys::CURRENT_IDENTITY, profile)
        .await
}

/// Remove the signed-in profile from the session (sign out).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_identity(
    session: &Session,
) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<IdentityProfile>(session_keys::CURRENT_IDENTITY)
        .await?;
    Ok(())
}
