//! Basket Core - basket aggregation and checkout initiation.
//!
//! This crate holds the domain logic behind the basket page:
//! - grouping raw basket additions into one line per product
//! - item-count and price totals
//! - building the checkout metadata envelope and driving a checkout attempt
//!
//! # Architecture
//!
//! The core crate contains only types, pure functions and collaborator traits.
//! No HTTP, no sessions, no templates. The storefront crate supplies concrete
//! collaborators (session-backed store and identity, HTTP checkout provider).
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices and emails
//! - [`product`] - Product reference carried by basket lines
//! - [`basket`] - Basket store, grouping and totals
//! - [`identity`] - Signed-in identity and field fallbacks
//! - [`checkout`] - Checkout metadata, session provider trait, initiator

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod basket;
pub mod checkout;
pub mod identity;
pub mod product;
pub mod types;

pub use basket::{Basket, BasketError, BasketStore, GroupedItem, LineItem};
pub use checkout::{
    CheckoutError, CheckoutInitiator, CheckoutMetadata, CheckoutOutcome, CheckoutSessionProvider,
    CheckoutState,
};
pub use identity::{Identity, IdentityProfile, resolve_field};
pub use product::{ImageRef, Product};
pub use types::*;
