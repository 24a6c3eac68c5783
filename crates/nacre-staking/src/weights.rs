// crates/nacre-staking/src/weights.rs
//
// Product weights.
//
// Each listed product has a target weight (the manager's intent, out of
// WEIGHT_DENOMINATOR) and an effective weight (what the pool actually
// commits). The effective weight is `max(target, active)`, where the
// active weight is the product's realized utilization of the pool's full
// capacity. A lowered target therefore only takes effect once
// utilization falls below it.
//
// The sum of effective weights across a pool is capped at
// MAX_TOTAL_WEIGHT, so a pool can list up to 20 products at full weight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nacre_core::{NacreError, ProductId, Timestamp};

use crate::capacity::full_capacity_units;
use crate::catalog::CoverCatalog;
use crate::math;
use crate::pool::StakingPool;
use crate::pricing::{PriceBump, TARGET_PRICE_DENOMINATOR};

/// Weight of a product that may use the whole pool.
pub const WEIGHT_DENOMINATOR: u32 = 100;

/// Ceiling on the sum of weights in one pool.
pub const MAX_TOTAL_WEIGHT: u32 = 20 * WEIGHT_DENOMINATOR;

/// A product as listed in one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedProduct {
    pub target_weight: u32,
    pub last_effective_weight: u32,
    pub target_price: u32,
    pub bumped_price: u32,
    pub bumped_price_update_time: Timestamp,
}

impl StakedProduct {
    pub fn price_bump(&self) -> PriceBump {
        PriceBump {
            bumped_price: self.bumped_price,
            updated_at: self.bumped_price_update_time,
        }
    }
}

/// One entry of a `set_products` call. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedProductParam {
    pub product_id: ProductId,
    #[serde(default)]
    pub recalculate_effective_weight: bool,
    #[serde(default)]
    pub target_weight: Option<u32>,
    #[serde(default)]
    pub target_price: Option<u32>,
}

/// Weights of one product after recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductWeight {
    pub product_id: ProductId,
    pub target_weight: u32,
    pub active_weight: u32,
    pub effective_weight: u32,
}

/// Active weight of a product: `ceil(allocated × 100 / capacity)`, capped
/// at WEIGHT_DENOMINATOR. Zero when the pool has no capacity.
pub fn active_weight(allocated_units: u64, capacity_units: u128) -> Result<u32, NacreError> {
    if capacity_units == 0 {
        return Ok(0);
    }
    let weight = math::mul_div_ceil(
        allocated_units as u128,
        WEIGHT_DENOMINATOR as u128,
        capacity_units,
        "active weight",
    )?;
    Ok(weight.min(WEIGHT_DENOMINATOR as u128) as u32)
}

/// Effective weight for a target and an active weight.
pub fn effective_weight(target_weight: u32, active_weight: u32) -> u32 {
    if active_weight > target_weight {
        active_weight
    } else {
        target_weight
    }
}

/// Recompute every product's weights without touching the pool.
///
/// Products whose catalog entry has disappeared are treated as having no
/// capacity. Returned in product-id order.
pub fn recompute_all_weights(
    pool: &StakingPool,
    catalog: &CoverCatalog,
) -> Result<Vec<ProductWeight>, NacreError> {
    pool.products
        .iter()
        .map(|(&product_id, product)| {
            let active = pool.active_weight_of(product_id, catalog)?;
            Ok(ProductWeight {
                product_id,
                target_weight: product.target_weight,
                active_weight: active,
                effective_weight: effective_weight(product.target_weight, active),
            })
        })
        .collect()
}

impl StakingPool {
    /// Current active weight of one product.
    pub fn active_weight_of(
        &self,
        product_id: ProductId,
        catalog: &CoverCatalog,
    ) -> Result<u32, NacreError> {
        let capacity = match catalog.product(product_id) {
            Ok(info) => full_capacity_units(
                self.active_stake,
                catalog.global_capacity_ratio(),
                info.capacity_reduction_ratio,
            )?,
            Err(_) => 0,
        };
        let allocated: u64 = self
            .allocations
            .range((product_id, self.first_active_tranche_id)..=(product_id, u64::MAX))
            .map(|(_, units)| *units)
            .sum();
        active_weight(allocated, capacity)
    }

    /// Add products to the pool or update their target weight and price.
    ///
    /// All entries are validated against a projected product table first;
    /// the pool is only modified if every entry and the resulting totals
    /// are valid.
    ///
    /// The caller must have brought the pool up to date (`touch`).
    ///
    /// # Errors
    /// - `ProductDoesntExist` for a product missing from the catalog.
    /// - `MustSetPriceForNewProducts` if a new product lacks weight or price.
    /// - `MustRecalculateEffectiveWeight` if a weight is set without
    ///   recalculation.
    /// - `TargetWeightTooHigh`, `TargetPriceTooHigh`, `TargetPriceBelowMin`.
    /// - `TotalTargetWeightExceeded` if the target weights sum past the
    ///   ceiling.
    /// - `TotalEffectiveWeightExceeded` if the effective weights sum past
    ///   the ceiling and the change increases that sum.
    pub fn set_products(
        &mut self,
        now: Timestamp,
        catalog: &CoverCatalog,
        params: &[StakedProductParam],
    ) -> Result<(), NacreError> {
        let mut projected: BTreeMap<ProductId, StakedProduct> = self.products.clone();

        for param in params {
            let info = catalog.product(param.product_id)?;

            if !projected.contains_key(&param.product_id) {
                if param.target_weight.is_none() || param.target_price.is_none() {
                    return Err(NacreError::MustSetPriceForNewProducts(param.product_id));
                }
                projected.insert(
                    param.product_id,
                    StakedProduct {
                        target_weight: 0,
                        last_effective_weight: 0,
                        target_price: 0,
                        bumped_price: info.initial_price,
                        bumped_price_update_time: now,
                    },
                );
            }
            let Some(product) = projected.get_mut(&param.product_id) else {
                return Err(NacreError::ProductNotInPool {
                    pool_id: self.id,
                    product_id: param.product_id,
                });
            };

            if let Some(weight) = param.target_weight {
                if !param.recalculate_effective_weight {
                    return Err(NacreError::MustRecalculateEffectiveWeight(param.product_id));
                }
                if weight > WEIGHT_DENOMINATOR {
                    return Err(NacreError::TargetWeightTooHigh(weight));
                }
                product.target_weight = weight;
            }

            if let Some(price) = param.target_price {
                if price > TARGET_PRICE_DENOMINATOR {
                    return Err(NacreError::TargetPriceTooHigh(price));
                }
                if price < info.min_price {
                    return Err(NacreError::TargetPriceBelowMin {
                        price,
                        min: info.min_price,
                    });
                }
                product.target_price = price;
            }
        }

        let total_target: u32 = projected.values().map(|p| p.target_weight).sum();
        if total_target > MAX_TOTAL_WEIGHT {
            return Err(NacreError::TotalTargetWeightExceeded {
                total: total_target,
                max: MAX_TOTAL_WEIGHT,
            });
        }

        for param in params.iter().filter(|p| p.recalculate_effective_weight) {
            let active = self.active_weight_of(param.product_id, catalog)?;
            if let Some(product) = projected.get_mut(&param.product_id) {
                product.last_effective_weight = effective_weight(product.target_weight, active);
            }
        }

        let total_effective: u32 = projected.values().map(|p| p.last_effective_weight).sum();
        if total_effective > MAX_TOTAL_WEIGHT && total_effective > self.total_effective_weight {
            return Err(NacreError::TotalEffectiveWeightExceeded {
                total: total_effective,
                max: MAX_TOTAL_WEIGHT,
            });
        }

        self.products = projected;
        self.total_target_weight = total_target;
        self.total_effective_weight = total_effective;

        info!(
            pool_id = self.id,
            updated = params.len(),
            total_target_weight = total_target,
            total_effective_weight = total_effective,
            "Products updated"
        );
        Ok(())
    }

    /// Recompute and store every product's effective weight.
    ///
    /// Never rejects: if utilization pushes the total past the ceiling the
    /// new weights are stored anyway and a warning is logged.
    pub fn recalculate_effective_weights(
        &mut self,
        catalog: &CoverCatalog,
    ) -> Result<Vec<ProductWeight>, NacreError> {
        let weights = recompute_all_weights(self, catalog)?;

        let mut total: u32 = 0;
        for weight in &weights {
            if let Some(product) = self.products.get_mut(&weight.product_id) {
                product.last_effective_weight = weight.effective_weight;
            }
            total += weight.effective_weight;
        }
        self.total_effective_weight = total;

        if total > MAX_TOTAL_WEIGHT {
            warn!(
                pool_id = self.id,
                total_effective_weight = total,
                max = MAX_TOTAL_WEIGHT,
                "Effective weight exceeds the pool ceiling"
            );
        }
        debug!(pool_id = self.id, products = weights.len(), total, "Effective weights recalculated");
        Ok(weights)
    }

    /// Raise one product's effective weight to its current active weight if
    /// that is higher. Used after an allocation.
    pub(crate) fn refresh_effective_weight(
        &mut self,
        product_id: ProductId,
        catalog: &CoverCatalog,
    ) -> Result<(), NacreError> {
        let active = self.active_weight_of(product_id, catalog)?;
        if let Some(product) = self.products.get_mut(&product_id) {
            let previous = product.last_effective_weight;
            let refreshed = previous.max(active);
            product.last_effective_weight = refreshed;
            self.total_effective_weight = self.total_effective_weight.saturating_sub(previous) + refreshed;
        }
        Ok(())
    }
}
