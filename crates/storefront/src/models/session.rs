//! Session-related types.
//!
//! The visitor's basket and signed-in identity both live in the session.
//! The basket is stored as [`basket_core::Basket`] and the identity as
//! [`basket_core::IdentityProfile`]; neither is shared across devices.

/// Session keys for basket and identity data.
pub mod keys {
    /// Key for the visitor's basket.
    pub const BASKET: &str = "basket";

    /// Key for the profile written by the identity provider's sign-in flow.
    pub const CURRENT_IDENTITY: &str = "current_identity";

    /// One-time value tying a sign-in callback to the redirect that started it.
    pub const SIGN_IN_STATE: &str = "sign_in_state";
}
