//! Checkout initiation.
//!
//! Checkout is handed off to an external hosted flow. This module builds the
//! metadata envelope for an attempt, defines the [`CheckoutSessionProvider`]
//! seam the hosted flow sits behind, and drives one attempt at a time through
//! [`CheckoutInitiator`].

mod initiator;

pub use initiator::{CheckoutInitiator, CheckoutOutcome, CheckoutState};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::basket::GroupedItem;
use crate::identity::{IdentityProfile, resolve_field};
use crate::types::{IdentityHandle, OrderNumber, ProductId};

/// Errors that can occur while creating a checkout session.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The provider could not be reached or the connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("Provider error: {status} - {message}")]
    Provider { status: u16, message: String },

    /// The provider's response body could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A line has no unit price, so no amount can be charged for it.
    #[error("Product has no price: {0}")]
    MissingPrice(ProductId),

    /// Nothing to check out.
    #[error("Basket is empty")]
    EmptyBasket,
}

/// Metadata attached to a checkout session.
///
/// Built fresh for each attempt and passed once to the provider. Field names
/// serialize in camelCase, which is what the hosted checkout stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    pub order_number: OrderNumber,
    pub customer_name: String,
    pub customer_email: String,
    pub clerk_user_id: IdentityHandle,
}

impl CheckoutMetadata {
    /// Name used when the profile has none.
    pub const UNKNOWN_NAME: &'static str = "Unknown User";
    /// Email used when the profile has no registered address.
    pub const UNKNOWN_EMAIL: &'static str = "Unknown Email";

    /// Build metadata for `profile` with a newly generated order number.
    #[must_use]
    pub fn for_profile(profile: &IdentityProfile) -> Self {
        Self::with_order_number(profile, OrderNumber::generate())
    }

    /// Build metadata for `profile` with a given order number.
    #[must_use]
    pub fn with_order_number(profile: &IdentityProfile, order_number: OrderNumber) -> Self {
        Self {
            order_number,
            customer_name: resolve_field(profile.full_name.as_deref(), Self::UNKNOWN_NAME),
            customer_email: resolve_field(
                profile.primary_email().map(crate::Email::as_str),
                Self::UNKNOWN_EMAIL,
            ),
            clerk_user_id: profile.id.clone(),
        }
    }
}

/// Creates hosted checkout sessions.
///
/// Returns the URL to send the customer to, or `None` if the provider
/// accepted the request but produced no session URL.
#[async_trait]
pub trait CheckoutSessionProvider: Send + Sync {
    /// Create a session for `items` tagged with `metadata`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or the provider call fails.
    async fn create_session(
        &self,
        items: &[GroupedItem],
        metadata: &CheckoutMetadata,
    ) -> Result<Option<Url>, CheckoutError>;
}

#[async_trait]
impl<P> CheckoutSessionProvider for Arc<P>
where
    P: CheckoutSessionProvider + ?Sized,
{
    async fn create_session(
        &self,
        items: &[GroupedItem],
        metadata: &CheckoutMetadata,
    ) -> Result<Option<Url>, CheckoutError> {
        (**self).create_session(items, metadata).await
    }
}
