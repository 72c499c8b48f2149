//! Basket route handlers.
//!
//! The basket lives in the visitor's session. Every handler loads it once,
//! so a request always works from one consistent snapshot.

use std::str::FromStr;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use basket_core::{
    Basket, BasketStore, CheckoutOutcome, GroupedItem, ImageRef, Product, ProductId, basket,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use crate::error::{AppError, Result, add_breadcrumb, set_sentry_user};
use crate::middleware::CurrentIdentity;
use crate::models::session_keys;
use crate::routes::auth::SIGN_IN_PATH;
use crate::services::images::image_url;
use crate::state::AppState;

/// Alt text for product images without a name.
const IMAGE_ALT_FALLBACK: &str = "Product Image";

/// Basket line display data for templates.
#[derive(Clone)]
pub struct BasketItemView {
    pub product_id: String,
    pub name: String,
    pub image_alt: String,
    pub image_url: Option<String>,
    /// Product detail link, when the product has a slug.
    pub href: Option<String>,
    pub quantity: u32,
    pub line_price: String,
    /// Raw fields echoed back by the "+" button so it can add another unit.
    pub form: ProductFormView,
}

/// Hidden form fields describing a product.
#[derive(Clone)]
pub struct ProductFormView {
    pub name: String,
    pub price: String,
    pub image: String,
    pub slug: String,
}

/// Basket display data for templates.
#[derive(Clone)]
pub struct BasketView {
    pub items: Vec<BasketItemView>,
    pub item_count: u64,
    pub total: String,
}

impl BasketView {
    /// Build the page view from the grouped basket.
    #[must_use]
    pub fn new(items: &[GroupedItem], image_cdn_base_url: Option<&url::Url>) -> Self {
        Self {
            items: items
                .iter()
                .map(|item| BasketItemView::new(item, image_cdn_base_url))
                .collect(),
            item_count: basket::total_item_count(items),
            total: basket::total(items).display(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl BasketItemView {
    fn new(item: &GroupedItem, image_cdn_base_url: Option<&url::Url>) -> Self {
        let product = &item.product;
        Self {
            product_id: product.id.to_string(),
            name: product.name.clone().unwrap_or_default(),
            image_alt: product
                .name
                .clone()
                .unwrap_or_else(|| IMAGE_ALT_FALLBACK.to_string()),
            image_url: product
                .image
                .as_ref()
                .and_then(|image| image_url(image, image_cdn_base_url)),
            href: product.slug.as_ref().map(|slug| format!("/product/{slug}")),
            quantity: item.quantity,
            line_price: basket_core::Price::usd(basket::line_total(item)).display(),
            form: ProductFormView {
                name: product.name.clone().unwrap_or_default(),
                price: product.price.map(|p| p.to_string()).unwrap_or_default(),
                image: product
                    .image
                    .as_ref()
                    .map(|i| i.as_str().to_string())
                    .unwrap_or_default(),
                slug: product.slug.clone().unwrap_or_default(),
            },
        }
    }
}

/// Checkout button display data.
#[derive(Clone)]
pub struct CheckoutButtonView {
    pub signed_in: bool,
    pub busy: bool,
    pub sign_in_url: String,
}

/// Outcome of a previous checkout attempt, carried in the query string.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutNotice {
    Failed,
    Pending,
}

impl CheckoutNotice {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Failed => "We couldn't start checkout. Please try again.",
            Self::Pending => "Checkout is already being prepared.",
        }
    }
}

/// Outcome of a sign-in that did not complete, carried in the query string.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignInNotice {
    Failed,
}

impl SignInNotice {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Failed => "We couldn't sign you in. Please try again.",
        }
    }
}

/// Basket page query parameters.
#[derive(Debug, Deserialize)]
pub struct BasketQuery {
    pub checkout: Option<CheckoutNotice>,
    pub sign_in: Option<SignInNotice>,
}

/// Add to basket form data.
#[derive(Debug, Deserialize)]
pub struct AddToBasketForm {
    pub product_id: String,
    pub name: Option<String>,
    pub price: Option<String>,
    pub image: Option<String>,
    pub slug: Option<String>,
}

impl AddToBasketForm {
    /// Validate the form into a product snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for a blank id or a price that is not a
    /// non-negative decimal.
    pub fn into_product(self) -> Result<Product> {
        let id = self.product_id.trim();
        if id.is_empty() {
            return Err(AppError::BadRequest("product_id is required".to_string()));
        }

        let price = match non_blank(self.price) {
            Some(raw) => {
                let price = Decimal::from_str(&raw)
                    .map_err(|e| AppError::BadRequest(format!("invalid price {raw:?}: {e}")))?;
                if price.is_sign_negative() {
                    return Err(AppError::BadRequest(format!("negative price {raw:?}")));
                }
                Some(price)
            }
            None => None,
        };

        Ok(Product {
            id: ProductId::new(id),
            name: non_blank(self.name),
            price,
            image: non_blank(self.image).map(ImageRef::new),
            slug: non_blank(self.slug),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Remove from basket form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromBasketForm {
    pub product_id: String,
}

/// Basket page template.
#[derive(Template, WebTemplate)]
#[template(path = "basket/show.html")]
pub struct BasketShowTemplate {
    pub basket: BasketView,
    pub checkout: CheckoutButtonView,
    pub notice: Option<&'static str>,
}

/// Basket count badge fragment template.
#[derive(Template, WebTemplate)]
#[template(path = "partials/basket_count.html")]
pub struct BasketCountTemplate {
    pub count: u64,
}

// =============================================================================
// Session Helpers
// =============================================================================

/// Load the basket from the session. An unreadable basket is treated as empty.
pub async fn load_basket(session: &Session) -> Basket {
    match session.get::<Basket>(session_keys::BASKET).await {
        Ok(basket) => basket.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Failed to load basket from session: {e}");
            Basket::default()
        }
    }
}

/// Save the basket to the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn save_basket(
    session: &Session,
    basket: &Basket,
) -> std::result::Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::BASKET, basket).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Display the basket page.
#[instrument(skip(state, session, identity))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<BasketQuery>,
) -> impl IntoResponse {
    let grouped = load_basket(&session).await.grouped_items();

    let busy = match session.id() {
        Some(id) => state
            .existing_initiator(id)
            .await
            .is_some_and(|initiator| initiator.state().is_busy()),
        None => false,
    };

    BasketShowTemplate {
        basket: BasketView::new(&grouped, state.config().image_cdn_base_url.as_ref()),
        checkout: CheckoutButtonView {
            signed_in: identity.is_authenticated(),
            busy,
            sign_in_url: SIGN_IN_PATH.to_string(),
        },
        notice: query
            .checkout
            .map(CheckoutNotice::message)
            .or_else(|| query.sign_in.map(SignInNotice::message)),
    }
}

/// Add one unit of a product to the basket.
#[instrument(skip(session, form), fields(product_id = %form.product_id))]
pub async fn add(session: Session, Form(form): Form<AddToBasketForm>) -> Result<Redirect> {
    let product = form.into_product()?;
    add_breadcrumb("basket", "Added to basket", &[("product_id", product.id.as_str())]);

    let mut basket = load_basket(&session).await;
    basket.add_item(product)?;
    save_basket(&session, &basket).await?;

    Ok(Redirect::to("/basket"))
}

/// Remove one unit of a product from the basket.
#[instrument(skip(session, form), fields(product_id = %form.product_id))]
pub async fn remove(session: Session, Form(form): Form<RemoveFromBasketForm>) -> Result<Redirect> {
    let product_id = ProductId::new(form.product_id.trim());
    let mut basket = load_basket(&session).await;

    if basket.remove_item(&product_id) {
        add_breadcrumb("basket", "Removed from basket", &[("product_id", product_id.as_str())]);
        save_basket(&session, &basket).await?;
    }

    Ok(Redirect::to("/basket"))
}

/// Basket count badge.
#[instrument(skip(session))]
pub async fn count(session: Session) -> impl IntoResponse {
    let grouped = load_basket(&session).await.grouped_items();
    BasketCountTemplate {
        count: basket::total_item_count(&grouped),
    }
}

/// Start a hosted checkout and redirect to it.
///
/// Failures are recovered here: the customer lands back on the basket with
/// a retry notice and the basket unchanged.
#[instrument(skip(state, session, identity))]
pub async fn checkout(
    State(state): State<AppState>,
    session: Session,
    CurrentIdentity(identity): CurrentIdentity,
) -> Response {
    let grouped = load_basket(&session).await.grouped_items();

    let Some(session_id) = session.id() else {
        // A session without an id has never stored a basket.
        return Redirect::to("/basket").into_response();
    };

    if let Some(profile) = identity.profile() {
        set_sentry_user(
            &profile.id,
            profile.primary_email().map(basket_core::Email::as_str),
        );
    }

    let initiator = state.initiator(session_id).await;
    match initiator
        .initiate(&grouped, &identity, state.checkout())
        .await
    {
        CheckoutOutcome::Redirect(url) => Redirect::to(url.as_str()).into_response(),
        CheckoutOutcome::SignInRequired => Redirect::to(SIGN_IN_PATH).into_response(),
        CheckoutOutcome::EmptyBasket => Redirect::to("/basket").into_response(),
        CheckoutOutcome::AlreadyInProgress => {
            Redirect::to("/basket?checkout=pending").into_response()
        }
        CheckoutOutcome::Failed(_) => Redirect::to("/basket?checkout=failed").into_response(),
    }
}
