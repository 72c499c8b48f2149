//! Basket store and aggregation.
//!
//! A [`Basket`] is a sequence of additions. [`Basket::add_item`] folds a
//! repeat into the product's existing line, but a basket built with
//! [`Basket::from_lines`] may hold the same product many times. The page never
//! shows raw lines; it reads the grouped view from
//! [`BasketStore::grouped_items`], which folds repeated additions into one
//! [`GroupedItem`] per product, and derives the item count and total from that
//! view.
//!
//! # Example
//!
//! ```rust
//! use basket_core::{Basket, BasketStore, Product, basket};
//! use rust_decimal::Decimal;
//!
//! let tee = Product::new("tee", Some(Decimal::new(1000, 2)));
//! let mut basket = Basket::default();
//! basket.add_item(tee.clone()).unwrap();
//! basket.add_item(tee).unwrap();
//!
//! let grouped = basket.grouped_items();
//! assert_eq!(grouped.len(), 1);
//! assert_eq!(basket::total_item_count(&grouped), 2);
//! assert_eq!(basket.total_price(), Decimal::new(2000, 2));
//! ```

use std::collections::HashMap;
use std::num::NonZeroU32;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::product::Product;
use crate::types::{Price, ProductId};

/// Most distinct products one basket holds.
pub const MAX_DISTINCT_PRODUCTS: usize = 100;

/// Errors from constructing or growing a basket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BasketError {
    /// A line must hold at least one unit.
    #[error("quantity must be at least 1 for product {0}")]
    ZeroQuantity(ProductId),

    /// Adding a new product would exceed [`MAX_DISTINCT_PRODUCTS`].
    #[error("basket already holds {max} different products")]
    Full { max: usize },
}

/// One addition to the basket: a product and a positive quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product: Product,
    pub quantity: NonZeroU32,
}

impl LineItem {
    /// Create a line item.
    ///
    /// # Errors
    ///
    /// Returns [`BasketError::ZeroQuantity`] if `quantity` is zero.
    pub fn new(product: Product, quantity: u32) -> Result<Self, BasketError> {
        let quantity =
            NonZeroU32::new(quantity).ok_or_else(|| BasketError::ZeroQuantity(product.id.clone()))?;
        Ok(Self { product, quantity })
    }

    /// A single unit of `product`.
    #[must_use]
    pub const fn single(product: Product) -> Self {
        Self {
            product,
            quantity: NonZeroU32::MIN,
        }
    }
}

/// One product in the grouped view, with the summed quantity of all its additions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedItem {
    pub product: Product,
    pub quantity: u32,
}

/// Read contract of the basket store.
///
/// Readers take a consistent snapshot with [`grouped_items`](Self::grouped_items).
/// [`version`](Self::version) changes on every mutation, which lets a
/// subscriber tell whether a snapshot it holds is stale.
pub trait BasketStore {
    /// Grouped view of the current basket, in order of first addition.
    fn grouped_items(&self) -> Vec<GroupedItem>;

    /// Unrounded total of the current basket.
    fn total_price(&self) -> Decimal {
        total_price(&self.grouped_items())
    }

    /// Mutation counter.
    fn version(&self) -> u64;
}

/// The raw basket: additions in the order each product was first added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    lines: Vec<LineItem>,
    #[serde(default)]
    version: u64,
}

impl Basket {
    /// Build a basket from an existing sequence of additions.
    #[must_use]
    pub fn from_lines(lines: Vec<LineItem>) -> Self {
        Self { lines, version: 0 }
    }

    /// Raw additions, ungrouped.
    #[must_use]
    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Record one more unit of `product`.
    ///
    /// A product already in the basket gains a unit on its existing line and
    /// keeps the snapshot it was first added with.
    ///
    /// # Errors
    ///
    /// Returns [`BasketError::Full`] if `product` is new and the basket already
    /// holds [`MAX_DISTINCT_PRODUCTS`] products.
    pub fn add_item(&mut self, product: Product) -> Result<(), BasketError> {
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|line| line.product.id == product.id)
        {
            line.quantity = line.quantity.saturating_add(1);
        } else {
            if self.lines.len() >= MAX_DISTINCT_PRODUCTS {
                return Err(BasketError::Full {
                    max: MAX_DISTINCT_PRODUCTS,
                });
            }
            self.lines.push(LineItem::single(product));
        }
        self.bump();
        Ok(())
    }

    /// Take one unit of a product back out.
    ///
    /// Removes from the most recent addition of that product. Returns `false`
    /// if the product isn't in the basket.
    pub fn remove_item(&mut self, product_id: &ProductId) -> bool {
        let Some(pos) = self
            .lines
            .iter()
            .rposition(|line| &line.product.id == product_id)
        else {
            return false;
        };

        let Some(line) = self.lines.get_mut(pos) else {
            return false;
        };
        if let Some(quantity) = NonZeroU32::new(line.quantity.get() - 1) {
            line.quantity = quantity;
        } else {
            self.lines.remove(pos);
        }
        self.bump();
        true
    }

    /// Total units of one product across all its additions.
    #[must_use]
    pub fn item_count(&self, product_id: &ProductId) -> u32 {
        self.lines
            .iter()
            .filter(|line| &line.product.id == product_id)
            .fold(0, |acc, line| acc.saturating_add(line.quantity.get()))
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.bump();
    }

    const fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}

impl BasketStore for Basket {
    fn grouped_items(&self) -> Vec<GroupedItem> {
        group_lines(&self.lines)
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Fold raw additions into one entry per product id.
///
/// Order is the order of each product's first addition, and that first
/// addition's product snapshot is the one kept.
#[must_use]
pub fn group_lines(lines: &[LineItem]) -> Vec<GroupedItem> {
    let mut positions: HashMap<&ProductId, usize> = HashMap::new();
    let mut grouped: Vec<GroupedItem> = Vec::new();

    for line in lines {
        if let Some(entry) = positions
            .get(&line.product.id)
            .and_then(|&pos| grouped.get_mut(pos))
        {
            entry.quantity = entry.quantity.saturating_add(line.quantity.get());
        } else {
            positions.insert(&line.product.id, grouped.len());
            grouped.push(GroupedItem {
                product: line.product.clone(),
                quantity: line.quantity.get(),
            });
        }
    }

    grouped
}

/// Sum of quantities across the grouped view.
#[must_use]
pub fn total_item_count(items: &[GroupedItem]) -> u64 {
    items.iter().map(|item| u64::from(item.quantity)).sum()
}

/// Price of one grouped line: unit price times quantity, missing price as zero.
#[must_use]
pub fn line_total(item: &GroupedItem) -> Decimal {
    item.product.price.unwrap_or(Decimal::ZERO) * Decimal::from(item.quantity)
}

/// Sum of line totals. Not rounded; round with [`Price::display`] at render time.
#[must_use]
pub fn total_price(items: &[GroupedItem]) -> Decimal {
    items.iter().map(line_total).sum()
}

/// [`total_price`] wrapped as a store-currency [`Price`].
#[must_use]
pub fn total(items: &[GroupedItem]) -> Price {
    Price::usd(total_price(items))
}
