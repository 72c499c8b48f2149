//! Checkout attempt state machine.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::instrument;
use url::Url;

use super::{CheckoutError, CheckoutMetadata, CheckoutSessionProvider};
use crate::basket::GroupedItem;
use crate::identity::Identity;

/// Where the current checkout attempt stands.
///
/// ```text
/// Idle --initiate--> Requesting --url--> Redirecting
///                        |
///                        +--error / no url--> (failure recorded) --> Idle
/// ```
///
/// `Redirecting` ends the attempt: the customer has been handed to the hosted
/// checkout. If they come back and check out again, a new attempt starts.
///
/// There is no `Failed` variant. A failed attempt is `Idle` with
/// [`CheckoutInitiator::last_failure`] set. The failure stays recorded
/// until the next attempt begins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckoutState {
    #[default]
    Idle,
    Requesting,
    Redirecting(Url),
}

impl CheckoutState {
    /// Whether a provider call is in flight (checkout button shows "Processing...").
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Requesting)
    }
}

/// Result of one call to [`CheckoutInitiator::initiate`].
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// Not signed in; the caller should show the sign-in prompt.
    SignInRequired,
    /// Nothing in the basket.
    EmptyBasket,
    /// Another attempt is already waiting on the provider.
    AlreadyInProgress,
    /// Send the customer to the hosted checkout.
    Redirect(Url),
    /// The provider failed or returned no URL. The initiator is back to idle.
    Failed(CheckoutError),
}

/// Drives checkout attempts for one customer session.
///
/// Only one provider call may be in flight at a time; a second `initiate`
/// while one is pending returns [`CheckoutOutcome::AlreadyInProgress`]
/// without calling the provider. The basket is never touched here.
#[derive(Debug, Default)]
pub struct CheckoutInitiator {
    state: Mutex<CheckoutState>,
    last_failure: Mutex<Option<String>>,
}

impl CheckoutInitiator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CheckoutState {
        self.lock_state().clone()
    }

    /// Diagnostic message from the most recent failed attempt.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one checkout attempt.
    ///
    /// Builds [`CheckoutMetadata`] from the signed-in profile, asks `provider`
    /// for a session and reports where to send the customer.
    #[instrument(skip_all, fields(lines = items.len()))]
    pub async fn initiate(
        &self,
        items: &[GroupedItem],
        identity: &Identity,
        provider: &dyn CheckoutSessionProvider,
    ) -> CheckoutOutcome {
        let Some(profile) = identity.profile() else {
            return CheckoutOutcome::SignInRequired;
        };
        if items.is_empty() {
            return CheckoutOutcome::EmptyBasket;
        }

        let Some(attempt) = self.begin() else {
            tracing::debug!("checkout already in progress");
            return CheckoutOutcome::AlreadyInProgress;
        };

        let metadata = CheckoutMetadata::for_profile(profile);
        let result = provider.create_session(items, &metadata).await;

        match result {
            Ok(Some(url)) => {
                tracing::info!(
                    order_number = %metadata.order_number,
                    "checkout session created, redirecting"
                );
                attempt.finish(CheckoutState::Redirecting(url.clone()));
                CheckoutOutcome::Redirect(url)
            }
            Ok(None) => {
                let err = CheckoutError::Parse("no session URL returned".to_string());
                self.fail(attempt, &metadata, err)
            }
            Err(err) => self.fail(attempt, &metadata, err),
        }
    }

    fn fail(
        &self,
        attempt: Attempt<'_>,
        metadata: &CheckoutMetadata,
        err: CheckoutError,
    ) -> CheckoutOutcome {
        tracing::error!(
            order_number = %metadata.order_number,
            error = %err,
            "Error creating checkout session"
        );
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        attempt.finish(CheckoutState::Idle);
        CheckoutOutcome::Failed(err)
    }

    /// Move to `Requesting` unless an attempt is already pending.
    fn begin(&self) -> Option<Attempt<'_>> {
        let mut state = self.lock_state();
        if state.is_busy() {
            return None;
        }
        *state = CheckoutState::Requesting;
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Some(Attempt {
            initiator: self,
            finished: false,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CheckoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A pending attempt. Puts the initiator back to `Idle` if dropped before
/// finishing, e.g. when the request driving it is cancelled mid-call.
struct Attempt<'a> {
    initiator: &'a CheckoutInitiator,
    finished: bool,
}

impl Attempt<'_> {
    fn finish(mut self, next: CheckoutState) {
        *self.initiator.lock_state() = next;
        self.finished = true;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.initiator.lock_state() = CheckoutState::Idle;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::Notify;

    use super::*;
    use crate::basket::{Basket, BasketStore, total_price};
    use crate::identity::IdentityProfile;
    use crate::product::Product;
    use crate::types::{Email, IdentityHandle};

    /// Provider stub that records calls and answers with a fixed result.
    struct StubProvider {
        calls: AtomicUsize,
        seen: Mutex<Vec<(Vec<GroupedItem>, CheckoutMetadata)>>,
        answer: fn() -> Result<Option<Url>, CheckoutError>,
        gate: Option<Arc<Notify>>,
    }

    impl StubProvider {
        fn new(answer: fn() -> Result<Option<Url>, CheckoutError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                answer,
                gate: None,
            }
        }

        fn gated(answer: fn() -> Result<Option<Url>, CheckoutError>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(answer)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CheckoutSessionProvider for StubProvider {
        async fn create_session(
            &self,
            items: &[GroupedItem],
            metadata: &CheckoutMetadata,
        ) -> Result<Option<Url>, CheckoutError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((items.to_vec(), metadata.clone()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            (self.answer)()
        }
    }

    fn session_url() -> Result<Option<Url>, CheckoutError> {
        Ok(Some(Url::parse("https://checkout.example.com/c/sess_123").unwrap()))
    }

    fn no_url() -> Result<Option<Url>, CheckoutError> {
        Ok(None)
    }

    fn transport_error() -> Result<Option<Url>, CheckoutError> {
        Err(CheckoutError::Transport("connection reset".to_string()))
    }

    fn jane() -> Identity {
        Identity::Authenticated(
            IdentityProfile::new(IdentityHandle::new("u_1"))
                .with_full_name("Jane Doe")
                .with_email(Email::parse("jane@x.com").unwrap()),
        )
    }

    fn basket_of_two() -> Vec<GroupedItem> {
        let mut basket = Basket::default();
        let product = Product::new("A", Some(Decimal::new(1000, 2))).with_name("Product A");
        basket.add_item(product.clone()).unwrap();
        basket.add_item(product).unwrap();
        basket.grouped_items()
    }

    #[tokio::test]
    async fn test_successful_checkout_redirects() {
        let provider = StubProvider::new(session_url);
        let initiator = CheckoutInitiator::new();
        let items = basket_of_two();

        let outcome = initiator.initiate(&items, &jane(), &provider).await;

        let CheckoutOutcome::Redirect(url) = outcome else {
            panic!("expected redirect, got {outcome:?}");
        };
        assert_eq!(url.as_str(), "https://checkout.example.com/c/sess_123");
        assert_eq!(initiator.state(), CheckoutState::Redirecting(url));
        assert_eq!(provider.calls(), 1);

        let seen = provider.seen.lock().unwrap();
        let (sent_items, metadata) = &seen[0];
        assert_eq!(metadata.customer_name, "Jane Doe");
        assert_eq!(metadata.customer_email, "jane@x.com");
        assert_eq!(metadata.clerk_user_id.as_str(), "u_1");
        assert_eq!(sent_items.len(), 1);
        assert_eq!(sent_items[0].quantity, 2);
        assert_eq!(total_price(sent_items), Decimal::new(2000, 2));
    }

    #[tokio::test]
    async fn test_anonymous_checkout_is_noop() {
        let provider = StubProvider::new(session_url);
        let initiator = CheckoutInitiator::new();

        let outcome = initiator
            .initiate(&basket_of_two(), &Identity::Anonymous, &provider)
            .await;

        assert!(matches!(outcome, CheckoutOutcome::SignInRequired));
        assert_eq!(provider.calls(), 0);
        assert_eq!(initiator.state(), CheckoutState::Idle);
    }

    #[tokio::test]
    async fn test_empty_basket_is_noop() {
        let provider = StubProvider::new(session_url);
        let initiator = CheckoutInitiator::new();

        let outcome = initiator.initiate(&[], &jane(), &provider).await;

        assert!(matches!(outcome, CheckoutOutcome::EmptyBasket));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_profile_fields_use_fallbacks() {
        let provider = StubProvider::new(session_url);
        let initiator = CheckoutInitiator::new();
        let identity = Identity::Authenticated(IdentityProfile::new(IdentityHandle::new("u_7")));

        initiator
            .initiate(&basket_of_two(), &identity, &provider)
            .await;

        let seen = provider.seen.lock().unwrap();
        let (_, metadata) = &seen[0];
        assert_eq!(metadata.customer_name, "Unknown User");
        assert_eq!(metadata.customer_email, "Unknown Email");
        assert_eq!(metadata.clerk_user_id.as_str(), "u_7");
    }

    #[tokio::test]
    async fn test_provider_error_returns_to_idle() {
        let provider = StubProvider::new(transport_error);
        let initiator = CheckoutInitiator::new();

        let outcome = initiator
            .initiate(&basket_of_two(), &jane(), &provider)
            .await;

        assert!(matches!(
            outcome,
            CheckoutOutcome::Failed(CheckoutError::Transport(_))
        ));
        assert_eq!(initiator.state(), CheckoutState::Idle);
        assert!(
            initiator
                .last_failure()
                .unwrap()
                .contains("connection reset")
        );
    }

    #[tokio::test]
    async fn test_empty_url_returns_to_idle() {
        let provider = StubProvider::new(no_url);
        let initiator = CheckoutInitiator::new();

        let outcome = initiator
            .initiate(&basket_of_two(), &jane(), &provider)
            .await;

        assert!(matches!(outcome, CheckoutOutcome::Failed(_)));
        assert_eq!(initiator.state(), CheckoutState::Idle);
        assert!(initiator.last_failure().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_cleared_by_next_attempt() {
        let initiator = CheckoutInitiator::new();
        let items = basket_of_two();

        initiator
            .initiate(&items, &jane(), &StubProvider::new(transport_error))
            .await;
        assert_eq!(initiator.state(), CheckoutState::Idle);
        assert!(initiator.last_failure().is_some());

        let outcome = initiator
            .initiate(&items, &jane(), &StubProvider::new(session_url))
            .await;
        assert!(matches!(outcome, CheckoutOutcome::Redirect(_)));
        assert!(initiator.last_failure().is_none());
    }

    #[tokio::test]
    async fn test_retry_after_failure_uses_new_order_number() {
        let provider = StubProvider::new(transport_error);
        let initiator = CheckoutInitiator::new();
        let items = basket_of_two();

        initiator.initiate(&items, &jane(), &provider).await;
        initiator.initiate(&items, &jane(), &provider).await;

        assert_eq!(provider.calls(), 2);
        let seen = provider.seen.lock().unwrap();
        assert_ne!(seen[0].1.order_number, seen[1].1.order_number);
    }

    #[tokio::test]
    async fn test_second_invocation_while_requesting_is_noop() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(StubProvider::gated(session_url, Arc::clone(&gate)));
        let initiator = Arc::new(CheckoutInitiator::new());
        let items = basket_of_two();

        let first = {
            let provider = Arc::clone(&provider);
            let initiator = Arc::clone(&initiator);
            let items = items.clone();
            tokio::spawn(async move { initiator.initiate(&items, &jane(), &*provider).await })
        };

        // Wait until the first attempt is parked inside the provider.
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(initiator.state().is_busy());

        let second = initiator.initiate(&items, &jane(), &*provider).await;
        assert!(matches!(second, CheckoutOutcome::AlreadyInProgress));
        assert_eq!(provider.calls(), 1);

        gate.notify_one();
        let first = first.await.unwrap();
        assert!(matches!(first, CheckoutOutcome::Redirect(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_attempt_resets_to_idle() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(StubProvider::gated(session_url, gate));
        let initiator = Arc::new(CheckoutInitiator::new());
        let items = basket_of_two();

        let handle = {
            let provider = Arc::clone(&provider);
            let initiator = Arc::clone(&initiator);
            tokio::spawn(async move { initiator.initiate(&items, &jane(), &*provider).await })
        };
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }

        handle.abort();
        let _ = handle.await;

        assert_eq!(initiator.state(), CheckoutState::Idle);
    }

    #[tokio::test]
    async fn test_new_attempt_allowed_after_redirect() {
        let provider = StubProvider::new(session_url);
        let initiator = CheckoutInitiator::new();
        let items = basket_of_two();

        initiator.initiate(&items, &jane(), &provider).await;
        let outcome = initiator.initiate(&items, &jane(), &provider).await;

        assert!(matches!(outcome, CheckoutOutcome::Redirect(_)));
        assert_eq!(provider.calls(), 2);
    }
}
