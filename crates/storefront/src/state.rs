//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use basket_core::{CheckoutError, CheckoutInitiator, CheckoutSessionProvider};
use moka::future::Cache;
use thiserror::Error;
use tower_sessions::session::Id as SessionId;

use crate::config::StorefrontConfig;
use crate::services::{
    HttpCheckoutProvider, HttpSignInVerifier, IdentityProvider, SessionIdentityProvider,
    SignInError, SignInVerifier,
};

/// How long an idle session keeps its checkout initiator.
const INITIATOR_IDLE_TTL: Duration = Duration::from_secs(600);

/// Upper bound on concurrently tracked sessions.
const MAX_TRACKED_SESSIONS: u64 = 10_000;

/// Errors building the production collaborators.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Checkout client: {0}")]
    Checkout(#[from] CheckoutError),
    #[error("Sign-in client: {0}")]
    SignIn(#[from] SignInError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// configuration and the basket page's collaborators.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    checkout: Arc<dyn CheckoutSessionProvider>,
    identity: Arc<dyn IdentityProvider>,
    sign_in: Arc<dyn SignInVerifier>,
    initiators: Cache<SessionId, Arc<CheckoutInitiator>>,
}

impl AppState {
    /// Create application state with the HTTP checkout provider, the HTTP
    /// sign-in verifier and the session-backed identity provider.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, StateError> {
        let checkout = HttpCheckoutProvider::new(&config)?;
        let sign_in = HttpSignInVerifier::new(&config.identity)?;
        Ok(Self::with_collaborators(
            config,
            Arc::new(checkout),
            Arc::new(SessionIdentityProvider),
            Arc::new(sign_in),
        ))
    }

    /// Create application state with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: StorefrontConfig,
        checkout: Arc<dyn CheckoutSessionProvider>,
        identity: Arc<dyn IdentityProvider>,
        sign_in: Arc<dyn SignInVerifier>,
    ) -> Self {
        let initiators = Cache::builder()
            .max_capacity(MAX_TRACKED_SESSIONS)
            .time_to_idle(INITIATOR_IDLE_TTL)
            .build();

        Self {
            inner: Arc::new(AppStateInner {
                config,
                checkout,
                identity,
                sign_in,
                initiators,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get the checkout session provider.
    #[must_use]
    pub fn checkout(&self) -> &dyn CheckoutSessionProvider {
        self.inner.checkout.as_ref()
    }

    /// Get the identity provider.
    #[must_use]
    pub fn identity(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    /// Get the sign-in token verifier.
    #[must_use]
    pub fn sign_in(&self) -> &dyn SignInVerifier {
        self.inner.sign_in.as_ref()
    }

    /// Checkout initiator for a session, created on first use.
    pub async fn initiator(&self, session_id: SessionId) -> Arc<CheckoutInitiator> {
        self.inner
            .initiators
            .get_with(session_id, async { Arc::new(CheckoutInitiator::new()) })
            .await
    }

    /// Checkout initiator for a session, if one has been created.
    pub async fn existing_initiator(&self, session_id: SessionId) -> Option<Arc<CheckoutInitiator>> {
        self.inner.initiators.get(&session_id).await
    }
}
