// crates/nacre-staking/src/catalog.rs
//
// Cover catalog: the protocol-level product list and cover parameters the
// pools read but do not own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use nacre_core::{NacreError, ProductId, DAY};

use crate::pricing::TARGET_PRICE_DENOMINATOR;
use crate::rewards::{DEFAULT_REWARD_RATIO, REWARDS_DENOMINATOR};

/// Denominator of the global capacity ratio.
pub const GLOBAL_CAPACITY_DENOMINATOR: u32 = 10_000;

/// Denominator of per-product capacity reduction ratios.
pub const CAPACITY_REDUCTION_DENOMINATOR: u32 = 10_000;

/// Default global capacity ratio: stake backs 2x its value in cover.
pub const DEFAULT_GLOBAL_CAPACITY_RATIO: u32 = 20_000;

/// Default grace period after cover expiry during which claims may still
/// be filed, and so during which the backing stake must stay locked.
pub const DEFAULT_GRACE_PERIOD: u64 = 30 * DAY;

/// Catalog entry for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Share of capacity withheld for this product, over 10 000.
    #[serde(default)]
    pub capacity_reduction_ratio: u32,
    /// Price a pool starts quoting at when it first lists the product.
    pub initial_price: u32,
    /// Floor for pool target prices.
    #[serde(default)]
    pub min_price: u32,
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    #[serde(default)]
    pub is_deprecated: bool,
}

fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD
}

/// Ratios for a batch of products, as returned by
/// [`CoverCatalog::price_and_capacity_ratios`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceAndCapacityRatios {
    pub global_capacity_ratio: u32,
    pub capacity_reduction_ratios: Vec<u32>,
    pub initial_prices: Vec<u32>,
    pub min_prices: Vec<u32>,
}

/// The product catalog plus protocol-wide cover parameters.
#[derive(Debug, Clone)]
pub struct CoverCatalog {
    global_capacity_ratio: u32,
    reward_ratio: u32,
    products: BTreeMap<ProductId, CatalogProduct>,
}

impl CoverCatalog {
    /// Create an empty catalog.
    ///
    /// # Errors
    /// `InvalidAmount` if `reward_ratio` is above 10 000 or
    /// `global_capacity_ratio` is zero.
    pub fn new(global_capacity_ratio: u32, reward_ratio: u32) -> Result<Self, NacreError> {
        if global_capacity_ratio == 0 {
            return Err(NacreError::InvalidAmount(
                "global capacity ratio must be positive".to_string(),
            ));
        }
        if reward_ratio > REWARDS_DENOMINATOR {
            return Err(NacreError::InvalidAmount(format!(
                "reward ratio {} exceeds {}",
                reward_ratio, REWARDS_DENOMINATOR
            )));
        }
        Ok(Self {
            global_capacity_ratio,
            reward_ratio,
            products: BTreeMap::new(),
        })
    }

    /// Add or replace a product.
    ///
    /// # Errors
    /// `InvalidAmount` if the capacity reduction reaches 100%, and
    /// `TargetPriceTooHigh` if a price is above 100%.
    pub fn upsert_product(
        &mut self,
        product_id: ProductId,
        product: CatalogProduct,
    ) -> Result<(), NacreError> {
        if product.capacity_reduction_ratio >= CAPACITY_REDUCTION_DENOMINATOR {
            return Err(NacreError::InvalidAmount(format!(
                "capacity reduction ratio {} for product {} leaves no capacity",
                product.capacity_reduction_ratio, product_id
            )));
        }
        for price in [product.initial_price, product.min_price] {
            if price > TARGET_PRICE_DENOMINATOR {
                return Err(NacreError::TargetPriceTooHigh(price));
            }
        }
        self.products.insert(product_id, product);
        Ok(())
    }

    /// Stop new cover sales for a product. Existing allocations are kept.
    pub fn deprecate(&mut self, product_id: ProductId) -> Result<(), NacreError> {
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or(NacreError::ProductDoesntExist(product_id))?;
        product.is_deprecated = true;
        Ok(())
    }

    pub fn product(&self, product_id: ProductId) -> Result<&CatalogProduct, NacreError> {
        self.products
            .get(&product_id)
            .ok_or(NacreError::ProductDoesntExist(product_id))
    }

    pub fn products(&self) -> impl Iterator<Item = (&ProductId, &CatalogProduct)> {
        self.products.iter()
    }

    pub fn global_capacity_ratio(&self) -> u32 {
        self.global_capacity_ratio
    }

    pub fn reward_ratio(&self) -> u32 {
        self.reward_ratio
    }

    /// Capacity ratios and prices for `product_ids`, in request order.
    ///
    /// # Errors
    /// `ProductDoesntExist` for the first unknown id.
    pub fn price_and_capacity_ratios(
        &self,
        product_ids: &[ProductId],
    ) -> Result<PriceAndCapacityRatios, NacreError> {
        let mut ratios = PriceAndCapacityRatios {
            global_capacity_ratio: self.global_capacity_ratio,
            capacity_reduction_ratios: Vec::with_capacity(product_ids.len()),
            initial_prices: Vec::with_capacity(product_ids.len()),
            min_prices: Vec::with_capacity(product_ids.len()),
        };
        for &id in product_ids {
            let product = self.product(id)?;
            ratios
                .capacity_reduction_ratios
                .push(product.capacity_reduction_ratio);
            ratios.initial_prices.push(product.initial_price);
            ratios.min_prices.push(product.min_price);
        }
        Ok(ratios)
    }
}

impl Default for CoverCatalog {
    fn default() -> Self {
        Self {
            global_capacity_ratio: DEFAULT_GLOBAL_CAPACITY_RATIO,
            reward_ratio: DEFAULT_REWARD_RATIO,
            products: BTreeMap::new(),
        }
    }
}
