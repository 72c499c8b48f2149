//! Collaborators behind the basket page.
//!
//! # Services
//!
//! - `checkout` - HTTP client for the hosted checkout provider
//! - `identity` - Verifies sign-in tokens and looks up the signed-in identity
//! - `images` - Resolves product image references to URLs

pub mod checkout;
pub mod identity;
pub mod images;

pub use checkout::HttpCheckoutProvider;
pub use identity::{
    HttpSignInVerifier, IdentityProvider, SessionIdentityProvider, SignInError, SignInVerifier,
};
