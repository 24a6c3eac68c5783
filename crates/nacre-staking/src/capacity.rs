// crates/nacre-staking/src/capacity.rs
//
// Capacity allocation.
//
// A tranche's stake backs `stake × global_capacity_ratio × (1 −
// capacity_reduction_ratio)` of cover, measured in allocation units. A
// product may use its effective-weight share of that in every tranche.
// Cover is placed in the earliest tranches that outlive the cover period
// plus the product's grace period, so that stake stays locked for as long
// as claims can arrive.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::info;

use nacre_core::{BucketId, CoverId, NacreError, ProductId, Timestamp, TrancheId, Wei, DAY};

use crate::catalog::{
    CoverCatalog, CAPACITY_REDUCTION_DENOMINATOR, GLOBAL_CAPACITY_DENOMINATOR,
};
use crate::math;
use crate::pool::StakingPool;
use crate::pricing::{calculate_premium, PremiumQuote};
use crate::rewards::REWARDS_DENOMINATOR;
use crate::token::{units_to_wei, NXM_PER_ALLOCATION_UNIT};
use crate::tranche::{tranche_id_at, BUCKET_DURATION};
use crate::weights::WEIGHT_DENOMINATOR;

/// Shortest cover period: 28 days.
pub const MIN_COVER_PERIOD: u64 = 28 * DAY;

/// Longest cover period: 365 days.
pub const MAX_COVER_PERIOD: u64 = 365 * DAY;

/// Capacity held by one cover in this pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverAllocation {
    pub product_id: ProductId,
    /// Allocation units per tranche.
    pub tranche_units: BTreeMap<TrancheId, u64>,
    /// Bucket at whose start the cover expires.
    pub expiry_bucket: BucketId,
    /// Reward rate this cover's premium contributes, in wei per second.
    pub reward_rate: u128,
    pub premium: Wei,
    pub start: Timestamp,
    pub period: u64,
}

impl CoverAllocation {
    pub fn total_units(&self) -> u64 {
        self.tranche_units.values().sum()
    }
}

/// A cover purchase routed to this pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub cover_id: CoverId,
    pub product_id: ProductId,
    /// Cover amount in wei; rounded up to whole allocation units.
    pub amount: Wei,
    /// Cover period in seconds.
    pub period: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationOutcome {
    pub cover_id: CoverId,
    /// Amount actually allocated (the request rounded up to whole units).
    pub allocated_amount: Wei,
    pub premium: Wei,
    /// Rewards streamed to stakers from the premium; custody mints this.
    pub rewards: Wei,
    pub expiry_bucket: BucketId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeallocationOutcome {
    pub cover_id: CoverId,
    pub released_units: u64,
    /// Rewards the cover would still have streamed; custody burns this.
    pub unstreamed_rewards: Wei,
}

/// Capacity of one product over a range of tranches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    pub product_id: ProductId,
    pub effective_weight: u32,
    pub first_tranche_id: TrancheId,
    pub last_tranche_id: TrancheId,
    pub capacity_units: u64,
    pub allocated_units: u64,
    pub available_units: u64,
}

impl CapacitySnapshot {
    pub fn available_amount(&self) -> Wei {
        units_to_wei(self.available_units)
    }
}

/// Allocation units backed by `stake` at full weight.
pub fn full_capacity_units(
    stake: Wei,
    global_capacity_ratio: u32,
    capacity_reduction_ratio: u32,
) -> Result<u128, NacreError> {
    let retained = CAPACITY_REDUCTION_DENOMINATOR.saturating_sub(capacity_reduction_ratio);
    let numerator = global_capacity_ratio as u128 * retained as u128;
    let denominator = GLOBAL_CAPACITY_DENOMINATOR as u128
        * CAPACITY_REDUCTION_DENOMINATOR as u128
        * NXM_PER_ALLOCATION_UNIT;
    math::mul_div(stake, numerator, denominator, "capacity")
}

/// Per-tranche capacity and usage for one product.
struct TrancheCapacity {
    tranche_id: TrancheId,
    capacity: u64,
    used: u64,
}

impl TrancheCapacity {
    fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

impl StakingPool {
    /// Tranches that outlive a cover of `period` seconds bought at `now`
    /// plus its grace period.
    fn usable_tranches(&self, now: Timestamp, period: u64, grace_period: u64) -> RangeInclusive<TrancheId> {
        let first = tranche_id_at(now + period + grace_period).max(self.first_active_tranche_id);
        first..=self.last_depositable_tranche_id()
    }

    fn tranche_capacities(
        &self,
        product_id: ProductId,
        catalog: &CoverCatalog,
        tranches: RangeInclusive<TrancheId>,
        weight: u32,
    ) -> Result<Vec<TrancheCapacity>, NacreError> {
        let info = catalog.product(product_id)?;
        tranches
            .map(|tranche_id| {
                let stake = self.tranches.get(&tranche_id).map(|t| t.stake).unwrap_or(0);
                let full = full_capacity_units(
                    stake,
                    catalog.global_capacity_ratio(),
                    info.capacity_reduction_ratio,
                )?;
                let weighted = full * weight as u128 / WEIGHT_DENOMINATOR as u128;
                Ok(TrancheCapacity {
                    tranche_id,
                    capacity: math::to_u64(weighted, "tranche capacity")?,
                    used: self.allocated_units(product_id, tranche_id),
                })
            })
            .collect()
    }

    /// Capacity a product can still sell for covers of `period` seconds.
    ///
    /// Reads the pool as is; call `touch` first for up-to-date totals.
    ///
    /// # Errors
    /// `ProductNotInPool` if the pool does not list the product.
    pub fn available_capacity(
        &self,
        now: Timestamp,
        catalog: &CoverCatalog,
        product_id: ProductId,
        period: u64,
    ) -> Result<CapacitySnapshot, NacreError> {
        let product = self.products.get(&product_id).ok_or(NacreError::ProductNotInPool {
            pool_id: self.id,
            product_id,
        })?;
        let grace = catalog.product(product_id)?.grace_period;
        let range = self.usable_tranches(now, period, grace);
        let weight = product.last_effective_weight;
        let capacities = self.tranche_capacities(product_id, catalog, range.clone(), weight)?;

        Ok(CapacitySnapshot {
            product_id,
            effective_weight: weight,
            first_tranche_id: *range.start(),
            last_tranche_id: *range.end(),
            capacity_units: capacities.iter().map(|c| c.capacity).sum(),
            allocated_units: capacities.iter().map(|c| c.used).sum(),
            available_units: capacities.iter().map(TrancheCapacity::free).sum(),
        })
    }

    /// Allocate capacity for a cover and price it.
    ///
    /// The amount is rounded up to whole allocation units and placed in the
    /// earliest usable tranches first. A share of the premium is streamed
    /// to stakers until the cover's expiry bucket ends.
    ///
    /// The caller must have brought the pool up to date (`touch`).
    ///
    /// # Errors
    /// - `InvalidAmount` for a zero amount.
    /// - `CoverPeriodOutOfRange` outside 28..=365 days.
    /// - `AllocationAlreadyExists` if the cover id is taken.
    /// - `ProductNotInPool`, `ProductDoesntExist`, `ProductDeprecated`.
    /// - `InsufficientCapacity` if any unit cannot be placed.
    pub fn allocate(
        &mut self,
        now: Timestamp,
        catalog: &CoverCatalog,
        request: &AllocationRequest,
    ) -> Result<AllocationOutcome, NacreError> {
        if request.amount == 0 {
            return Err(NacreError::InvalidAmount(
                "cover amount must be greater than zero".to_string(),
            ));
        }
        if !(MIN_COVER_PERIOD..=MAX_COVER_PERIOD).contains(&request.period) {
            return Err(NacreError::CoverPeriodOutOfRange {
                period: request.period,
                min: MIN_COVER_PERIOD,
                max: MAX_COVER_PERIOD,
            });
        }
        if self.covers.contains_key(&request.cover_id) {
            return Err(NacreError::AllocationAlreadyExists(request.cover_id));
        }
        let product = *self
            .products
            .get(&request.product_id)
            .ok_or(NacreError::ProductNotInPool {
                pool_id: self.id,
                product_id: request.product_id,
            })?;
        let info = catalog.product(request.product_id)?;
        if info.is_deprecated {
            return Err(NacreError::ProductDeprecated(request.product_id));
        }

        let units = math::to_u64(
            request.amount.div_ceil(NXM_PER_ALLOCATION_UNIT),
            "allocation units",
        )?;

        let range = self.usable_tranches(now, request.period, info.grace_period);
        let capacities = self.tranche_capacities(
            request.product_id,
            catalog,
            range,
            product.last_effective_weight,
        )?;

        let mut remaining = units;
        let mut placed: BTreeMap<TrancheId, u64> = BTreeMap::new();
        for tranche in &capacities {
            if remaining == 0 {
                break;
            }
            let take = tranche.free().min(remaining);
            if take > 0 {
                placed.insert(tranche.tranche_id, take);
                remaining -= take;
            }
        }
        if remaining > 0 {
            return Err(NacreError::InsufficientCapacity {
                requested: units,
                available: capacities.iter().map(TrancheCapacity::free).sum(),
            });
        }

        let used: u64 = capacities.iter().map(|c| c.used).sum();
        let capacity: u64 = capacities.iter().map(|c| c.capacity).sum();
        let PremiumQuote {
            premium, new_bump, ..
        } = calculate_premium(
            &product.price_bump(),
            request.period,
            units,
            used,
            capacity,
            product.target_price,
            now,
        )?;

        let expiry_bucket = (now + request.period).div_ceil(BUCKET_DURATION);
        let rewards = math::mul_div(
            premium,
            catalog.reward_ratio() as u128,
            REWARDS_DENOMINATOR as u128,
            "premium rewards",
        )?;
        let stream = self.start_reward_stream(now, rewards, expiry_bucket)?;

        for (&tranche_id, &take) in &placed {
            *self
                .allocations
                .entry((request.product_id, tranche_id))
                .or_insert(0) += take;
        }
        if let Some(staked) = self.products.get_mut(&request.product_id) {
            staked.bumped_price = new_bump.bumped_price;
            staked.bumped_price_update_time = new_bump.updated_at;
        }
        self.covers.insert(
            request.cover_id,
            CoverAllocation {
                product_id: request.product_id,
                tranche_units: placed,
                expiry_bucket,
                reward_rate: stream.rate,
                premium,
                start: now,
                period: request.period,
            },
        );
        self.refresh_effective_weight(request.product_id, catalog)?;

        info!(
            pool_id = self.id,
            cover_id = request.cover_id,
            product_id = request.product_id,
            units,
            premium = %premium,
            "Capacity allocated"
        );

        Ok(AllocationOutcome {
            cover_id: request.cover_id,
            allocated_amount: units_to_wei(units),
            premium,
            rewards: stream.total,
            expiry_bucket,
        })
    }

    /// Release a cover's allocation before it expires and stop its reward
    /// stream. Effective weights are left for the next recalculation.
    ///
    /// # Errors
    /// `AllocationNotFound` if the cover has no allocation here (including
    /// covers that already expired).
    pub fn deallocate(
        &mut self,
        now: Timestamp,
        cover_id: CoverId,
    ) -> Result<DeallocationOutcome, NacreError> {
        let cover = self
            .covers
            .remove(&cover_id)
            .ok_or(NacreError::AllocationNotFound(cover_id))?;

        let released_units = cover.total_units();
        self.release_units(cover.product_id, &cover.tranche_units);
        let unstreamed_rewards =
            self.stop_reward_stream(now, cover.reward_rate, cover.expiry_bucket)?;

        info!(
            pool_id = self.id,
            cover_id,
            released_units,
            unstreamed = %unstreamed_rewards,
            "Capacity deallocated"
        );
        Ok(DeallocationOutcome {
            cover_id,
            released_units,
            unstreamed_rewards,
        })
    }

    /// Subtract a cover's units from the per-tranche totals. Tranches that
    /// already expired have no totals left and are skipped.
    pub(crate) fn release_units(
        &mut self,
        product_id: ProductId,
        tranche_units: &BTreeMap<TrancheId, u64>,
    ) {
        for (&tranche_id, &units) in tranche_units {
            let key = (product_id, tranche_id);
            if let Some(allocated) = self.allocations.get_mut(&key) {
                *allocated = allocated.saturating_sub(units);
                if *allocated == 0 {
                    self.allocations.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogProduct, DEFAULT_GRACE_PERIOD};
    use crate::pool::PoolSettings;
    use crate::tranche::TRANCHE_DURATION;
    use crate::weights::StakedProductParam;
    use nacre_core::{AccountId, ONE_NXM};

    fn catalog() -> CoverCatalog {
        let mut catalog = CoverCatalog::default();
        catalog
            .upsert_product(
                1,
                CatalogProduct {
                    capacity_reduction_ratio: 0,
                    initial_price: 100,
                    min_price: 100,
                    grace_period: DEFAULT_GRACE_PERIOD,
                    is_deprecated: false,
                },
            )
            .unwrap();
        catalog
    }

    fn pool_with_product(weight: u32) -> StakingPool {
        let settings = PoolSettings {
            manager: AccountId::from_label("manager"),
            is_private: false,
            pool_fee: 0,
            max_pool_fee: 10,
            metadata: String::new(),
        };
        let mut pool = StakingPool::new(1, settings, 0).unwrap();
        let param = StakedProductParam {
            product_id: 1,
            recalculate_effective_weight: true,
            target_weight: Some(weight),
            target_price: Some(100),
        };
        pool.set_products(0, &catalog(), &[param]).unwrap();
        pool
    }

    fn request(cover_id: CoverId, nxm: u128) -> AllocationRequest {
        AllocationRequest {
            cover_id,
            product_id: 1,
            amount: nxm * ONE_NXM,
            period: 30 * DAY,
        }
    }

    #[test]
    fn test_full_capacity_units() {
        // 9M NXM at 2x and no reduction: 18M NXM = 1.8e9 units.
        let units = full_capacity_units(9_000_000 * ONE_NXM, 20_000, 0).unwrap();
        assert_eq!(units, 1_800_000_000);
        let reduced = full_capacity_units(9_000_000 * ONE_NXM, 20_000, 2_500).unwrap();
        assert_eq!(reduced, 1_350_000_000);
    }

    #[test]
    fn test_available_capacity_gated_by_weight() {
        let mut pool = pool_with_product(10);
        pool.deposit(1, 1_000 * ONE_NXM, 5).unwrap();
        let snapshot = pool
            .available_capacity(0, &catalog(), 1, MIN_COVER_PERIOD)
            .unwrap();
        // 1000 NXM × 2 × 10% = 200 NXM = 20 000 units.
        assert_eq!(snapshot.capacity_units, 20_000);
        assert_eq!(snapshot.available_units, 20_000);
        assert_eq!(snapshot.available_amount(), 200 * ONE_NXM);
    }

    #[test]
    fn test_short_tranches_are_not_usable() {
        let mut pool = pool_with_product(100);
        // Tranche 0 expires before a 90-day cover plus grace ends.
        pool.deposit(1, 1_000 * ONE_NXM, 0).unwrap();
        let req = AllocationRequest {
            period: 90 * DAY,
            ..request(1, 10)
        };
        let err = pool.allocate(0, &catalog(), &req).unwrap_err();
        assert!(matches!(err, NacreError::InsufficientCapacity { .. }));
    }

    #[test]
    fn test_allocate_fills_earliest_tranche_first() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        pool.deposit(1, 100 * ONE_NXM, 3).unwrap();

        // Each tranche backs 200 NXM; 300 NXM spills into tranche 3.
        let outcome = pool.allocate(0, &catalog(), &request(7, 300)).unwrap();
        assert_eq!(outcome.allocated_amount, 300 * ONE_NXM);
        assert_eq!(pool.allocated_units(1, 2), 20_000);
        assert_eq!(pool.allocated_units(1, 3), 10_000);
        assert!(outcome.premium > 0);
        assert_eq!(outcome.expiry_bucket, 2);

        let cover = pool.cover(7).unwrap();
        assert_eq!(cover.total_units(), 30_000);
    }

    #[test]
    fn test_allocation_rounds_up_to_units() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let req = AllocationRequest {
            amount: ONE_NXM + 1,
            ..request(1, 0)
        };
        let outcome = pool.allocate(0, &catalog(), &req).unwrap();
        assert_eq!(outcome.allocated_amount, ONE_NXM + NXM_PER_ALLOCATION_UNIT);
    }

    #[test]
    fn test_insufficient_capacity_leaves_no_trace() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let err = pool.allocate(0, &catalog(), &request(1, 201)).unwrap_err();
        assert_eq!(
            err,
            NacreError::InsufficientCapacity {
                requested: 20_100,
                available: 20_000
            }
        );
        assert!(pool.cover(1).is_none());
        assert_eq!(pool.allocated_units(1, 2), 0);
    }

    #[test]
    fn test_request_validation() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let cat = catalog();

        let short = AllocationRequest {
            period: MIN_COVER_PERIOD - 1,
            ..request(1, 1)
        };
        assert!(matches!(
            pool.allocate(0, &cat, &short),
            Err(NacreError::CoverPeriodOutOfRange { .. })
        ));

        let unknown = AllocationRequest {
            product_id: 9,
            ..request(1, 1)
        };
        assert_eq!(
            pool.allocate(0, &cat, &unknown),
            Err(NacreError::ProductNotInPool {
                pool_id: 1,
                product_id: 9
            })
        );

        pool.allocate(0, &cat, &request(1, 1)).unwrap();
        assert_eq!(
            pool.allocate(0, &cat, &request(1, 1)),
            Err(NacreError::AllocationAlreadyExists(1))
        );
    }

    #[test]
    fn test_deprecated_product_rejected() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let mut cat = catalog();
        cat.deprecate(1).unwrap();
        assert_eq!(
            pool.allocate(0, &cat, &request(1, 1)),
            Err(NacreError::ProductDeprecated(1))
        );
    }

    #[test]
    fn test_deallocate_is_inverse() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let cat = catalog();
        let before = pool.available_capacity(0, &cat, 1, 30 * DAY).unwrap();

        pool.allocate(0, &cat, &request(5, 50)).unwrap();
        let rate = pool.reward_per_second();
        assert!(rate > 0);

        let out = pool.deallocate(0, 5).unwrap();
        assert_eq!(out.released_units, 5_000);
        assert!(out.unstreamed_rewards > 0);
        assert_eq!(pool.reward_per_second(), 0);

        let after = pool.available_capacity(0, &cat, 1, 30 * DAY).unwrap();
        assert_eq!(before.available_units, after.available_units);
        assert_eq!(pool.deallocate(0, 5), Err(NacreError::AllocationNotFound(5)));
    }

    #[test]
    fn test_cover_released_at_expiry_bucket() {
        let mut pool = pool_with_product(100);
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        let outcome = pool.allocate(0, &catalog(), &request(5, 50)).unwrap();
        assert_eq!(pool.allocated_units(1, 2), 5_000);

        pool.touch(outcome.expiry_bucket * BUCKET_DURATION).unwrap();
        assert!(pool.cover(5).is_none());
        assert_eq!(pool.allocated_units(1, 2), 0);
        assert_eq!(pool.reward_per_second(), 0);
        assert!(pool.first_active_tranche_id() < 2);
        assert!(outcome.expiry_bucket * BUCKET_DURATION < 2 * TRANCHE_DURATION);
    }
}
