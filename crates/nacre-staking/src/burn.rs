// crates/nacre-staking/src/burn.rs
//
// Stake burns after a claim payout.
//
// A burn lowers stake, never shares: every tranche gives up the same
// fraction of its stake, so each share in every active tranche loses value
// uniformly. Per-tranche amounts are rounded down and the dust is left in
// place, so the amount actually burned can be slightly below the request.
//
// A burn can also release part of the paying cover's allocation, since the
// payout reduced what that cover still protects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use nacre_core::{CoverId, NacreError, TrancheId, Wei};

use crate::math;
use crate::pool::StakingPool;
use crate::token::NXM_PER_ALLOCATION_UNIT;

/// A burn requested by the claims collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRequest {
    /// Cover whose claim was paid; its allocation is reduced.
    #[serde(default)]
    pub cover_id: Option<CoverId>,
    /// Stake to burn, in wei.
    pub amount: Wei,
    /// Cover amount to release from the allocation, in wei.
    #[serde(default)]
    pub deallocation_amount: Wei,
}

/// Result of a stake burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnResult {
    /// Amount requested (in wei).
    pub requested: Wei,
    /// Amount actually burned (in wei). Never exceeds `requested` or the
    /// pool's active stake.
    pub burned: Wei,
    /// Allocation units released from the cover.
    pub deallocated_units: u64,
}

impl StakingPool {
    /// Burn stake proportionally from every active tranche.
    ///
    /// The caller must have brought the pool up to date (`touch`).
    ///
    /// # Errors
    /// `AllocationNotFound` if `cover_id` has no allocation in this pool.
    pub fn burn_stake(&mut self, request: &BurnRequest) -> Result<BurnResult, NacreError> {
        if let Some(cover_id) = request.cover_id {
            if !self.covers.contains_key(&cover_id) {
                return Err(NacreError::AllocationNotFound(cover_id));
            }
        }

        let total_stake = self.active_stake;
        let target = request.amount.min(total_stake);
        let mut burned: Wei = 0;

        if target > 0 {
            let first = self.first_active_tranche_id;
            for tranche in self.tranches.range_mut(first..).map(|(_, t)| t) {
                let share = math::mul_div(target, tranche.stake, total_stake, "burn share")?;
                tranche.stake -= share;
                burned += share;
            }
            self.active_stake -= burned;
        }

        let deallocated_units = match request.cover_id {
            Some(cover_id) if request.deallocation_amount > 0 => {
                self.shrink_cover(cover_id, request.deallocation_amount)?
            }
            _ => 0,
        };

        info!(
            pool_id = self.id,
            requested = %request.amount,
            burned = %burned,
            deallocated_units,
            "Stake burned"
        );

        Ok(BurnResult {
            requested: request.amount,
            burned,
            deallocated_units,
        })
    }

    /// Release `amount` worth of a cover's allocation, spread over its
    /// tranches in proportion to what each holds.
    fn shrink_cover(&mut self, cover_id: CoverId, amount: Wei) -> Result<u64, NacreError> {
        let cover = self
            .covers
            .get_mut(&cover_id)
            .ok_or(NacreError::AllocationNotFound(cover_id))?;

        let total = cover.total_units();
        let wanted = math::to_u64(amount.div_ceil(NXM_PER_ALLOCATION_UNIT), "burn units")?;
        let release = wanted.min(total);
        if release == 0 {
            return Ok(0);
        }

        let mut cuts = Vec::with_capacity(cover.tranche_units.len());
        let mut assigned: u64 = 0;
        for (&tranche_id, &units) in &cover.tranche_units {
            let cut = (units as u128 * release as u128 / total as u128) as u64;
            cuts.push((tranche_id, cut));
            assigned += cut;
        }
        // Rounding leftovers come out of the earliest tranches.
        let mut leftover = release - assigned;
        for (tranche_id, cut) in cuts.iter_mut() {
            if leftover == 0 {
                break;
            }
            let held = cover.tranche_units.get(&*tranche_id).copied().unwrap_or(0);
            let room = held.saturating_sub(*cut);
            let extra = room.min(leftover);
            *cut += extra;
            leftover -= extra;
        }

        let product_id = cover.product_id;
        for (tranche_id, cut) in &cuts {
            if let Some(units) = cover.tranche_units.get_mut(tranche_id) {
                *units -= cut;
            }
        }
        cover.tranche_units.retain(|_, units| *units > 0);

        let released: BTreeMap<TrancheId, u64> = cuts.into_iter().collect();
        self.release_units(product_id, &released);
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::AllocationRequest;
    use crate::catalog::{CatalogProduct, CoverCatalog, DEFAULT_GRACE_PERIOD};
    use crate::pool::PoolSettings;
    use crate::weights::StakedProductParam;
    use nacre_core::{AccountId, DAY, ONE_NXM};

    fn pool() -> StakingPool {
        let settings = PoolSettings {
            manager: AccountId::from_label("manager"),
            is_private: false,
            pool_fee: 0,
            max_pool_fee: 10,
            metadata: String::new(),
        };
        StakingPool::new(1, settings, 0).unwrap()
    }

    fn burn(amount: Wei) -> BurnRequest {
        BurnRequest {
            cover_id: None,
            amount,
            deallocation_amount: 0,
        }
    }

    #[test]
    fn test_burn_is_proportional_across_tranches() {
        let mut pool = pool();
        pool.deposit(1, 300 * ONE_NXM, 1).unwrap();
        pool.deposit(2, 100 * ONE_NXM, 2).unwrap();

        let result = pool.burn_stake(&burn(40 * ONE_NXM)).unwrap();
        assert_eq!(result.burned, 40 * ONE_NXM);
        assert_eq!(pool.tranche(1).unwrap().stake, 270 * ONE_NXM);
        assert_eq!(pool.tranche(2).unwrap().stake, 90 * ONE_NXM);
        assert_eq!(pool.active_stake(), 360 * ONE_NXM);
    }

    #[test]
    fn test_burn_keeps_shares() {
        let mut pool = pool();
        pool.deposit(1, 100 * ONE_NXM, 1).unwrap();
        pool.burn_stake(&burn(50 * ONE_NXM)).unwrap();
        let tranche = pool.tranche(1).unwrap();
        assert_eq!(tranche.stake_shares, 100 * ONE_NXM);
        assert_eq!(pool.stake_share_supply(), 100 * ONE_NXM);
    }

    #[test]
    fn test_burn_capped_at_active_stake() {
        let mut pool = pool();
        pool.deposit(1, 10 * ONE_NXM, 1).unwrap();
        let result = pool.burn_stake(&burn(50 * ONE_NXM)).unwrap();
        assert_eq!(result.requested, 50 * ONE_NXM);
        assert_eq!(result.burned, 10 * ONE_NXM);
        assert_eq!(pool.active_stake(), 0);
    }

    #[test]
    fn test_burn_dust_is_left_unburned() {
        let mut pool = pool();
        pool.deposit(1, 1, 1).unwrap();
        pool.deposit(2, 1, 2).unwrap();
        pool.deposit(3, 1, 3).unwrap();
        let result = pool.burn_stake(&burn(2)).unwrap();
        // Each tranche's share is 2/3 of a wei, rounded down to zero.
        assert_eq!(result.burned, 0);
        assert_eq!(pool.active_stake(), 3);
    }

    #[test]
    fn test_burn_with_unknown_cover() {
        let mut pool = pool();
        let request = BurnRequest {
            cover_id: Some(4),
            amount: 1,
            deallocation_amount: 1,
        };
        assert_eq!(
            pool.burn_stake(&request),
            Err(NacreError::AllocationNotFound(4))
        );
    }

    #[test]
    fn test_burn_releases_cover_allocation() {
        let mut catalog = CoverCatalog::default();
        catalog
            .upsert_product(
                1,
                CatalogProduct {
                    capacity_reduction_ratio: 0,
                    initial_price: 100,
                    min_price: 0,
                    grace_period: DEFAULT_GRACE_PERIOD,
                    is_deprecated: false,
                },
            )
            .unwrap();
        let mut pool = pool();
        pool.set_products(
            0,
            &catalog,
            &[StakedProductParam {
                product_id: 1,
                recalculate_effective_weight: true,
                target_weight: Some(100),
                target_price: Some(100),
            }],
        )
        .unwrap();
        pool.deposit(1, 100 * ONE_NXM, 2).unwrap();
        pool.deposit(1, 100 * ONE_NXM, 3).unwrap();
        pool.allocate(
            0,
            &catalog,
            &AllocationRequest {
                cover_id: 9,
                product_id: 1,
                amount: 300 * ONE_NXM,
                period: 30 * DAY,
            },
        )
        .unwrap();

        let request = BurnRequest {
            cover_id: Some(9),
            amount: 20 * ONE_NXM,
            deallocation_amount: 30 * ONE_NXM,
        };
        let result = pool.burn_stake(&request).unwrap();
        assert_eq!(result.burned, 20 * ONE_NXM);
        assert_eq!(result.deallocated_units, 3_000);

        // 20 000 + 10 000 units, cut by a tenth each.
        assert_eq!(pool.allocated_units(1, 2), 18_000);
        assert_eq!(pool.allocated_units(1, 3), 9_000);
        assert_eq!(pool.cover(9).unwrap().total_units(), 27_000);
    }
}
