//! Product references carried by basket lines.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Price, ProductId};

/// Reference to a product image held by the content API.
///
/// Either an asset path relative to the image CDN or an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reference is already a full `http(s)` URL.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with("https://") || self.0.starts_with("http://")
    }
}

/// A product as it appears in the basket.
///
/// This is a snapshot of the catalog entry taken when it was added; the
/// basket never goes back to the content API for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: Option<String>,
    /// Unit price. Products without a price are still shown and count as zero.
    pub price: Option<Decimal>,
    pub image: Option<ImageRef>,
    /// URL slug for the product detail page.
    pub slug: Option<String>,
}

impl Product {
    /// Create a product with just an id and a price.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, price: Option<Decimal>) -> Self {
        Self {
            id: id.into(),
            name: None,
            price,
            image: None,
            slug: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    #[must_use]
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Unit price, with a missing price treated as zero.
    #[must_use]
    pub fn unit_price(&self) -> Price {
        Price::usd(self.price.unwrap_or(Decimal::ZERO))
    }
}
