// crates/nacre-staking/src/registry.rs
//
// The pool registry: the external interface of the staking ledger.
//
// `StakingPools` owns every pool, the cover catalog, and the two external
// collaborators (token custody and the position registry). Each mutating
// call runs as one transaction against a single pool:
//
//   1. snapshot the pool,
//   2. touch it (expirations, then reward accrual),
//   3. validate and apply the ledger change,
//   4. move value through custody,
//
// and restores the snapshot if any step fails. Custody is only called once
// the ledger is fully updated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use nacre_core::{
    AccountId, CoverId, NacreError, PoolId, PositionId, PositionRegistry, ProductId, Timestamp,
    TokenCustody, TrancheId, Wei,
};

use crate::burn::{BurnRequest, BurnResult};
use crate::capacity::{
    AllocationOutcome, AllocationRequest, CapacitySnapshot, DeallocationOutcome, MIN_COVER_PERIOD,
};
use crate::catalog::{CoverCatalog, PriceAndCapacityRatios};
use crate::pool::{PoolSettings, StakingPool};
use crate::tranche::WithdrawOutcome;
use crate::weights::{ProductWeight, StakedProduct, StakedProductParam};

/// A product listed at pool creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInitParams {
    pub product_id: ProductId,
    pub weight: u32,
    pub target_price: u32,
}

/// Arguments of [`StakingPools::create_staking_pool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolParams {
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub initial_pool_fee: u8,
    #[serde(default)]
    pub max_pool_fee: u8,
    #[serde(default)]
    pub products: Vec<ProductInitParams>,
    /// Optional first deposit by the creator.
    #[serde(default)]
    pub deposit_amount: Wei,
    #[serde(default)]
    pub tranche_id: TrancheId,
    #[serde(default)]
    pub metadata: String,
}

/// All staking pools and their collaborators.
pub struct StakingPools<C: TokenCustody, N: PositionRegistry> {
    pools: BTreeMap<PoolId, StakingPool>,
    catalog: CoverCatalog,
    custody: C,
    positions: N,
}

impl<C: TokenCustody, N: PositionRegistry> StakingPools<C, N> {
    pub fn new(catalog: CoverCatalog, custody: C, positions: N) -> Self {
        Self {
            pools: BTreeMap::new(),
            catalog,
            custody,
            positions,
        }
    }

    /// Run `op` against one pool, restoring the pool if it fails.
    fn transact<T>(
        &mut self,
        pool_id: PoolId,
        op: impl FnOnce(&mut StakingPool, &CoverCatalog, &mut C, &mut N) -> Result<T, NacreError>,
    ) -> Result<T, NacreError> {
        let pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or(NacreError::PoolDoesNotExist(pool_id))?;
        let snapshot = pool.clone();
        match op(pool, &self.catalog, &mut self.custody, &mut self.positions) {
            Ok(value) => Ok(value),
            Err(err) => {
                *pool = snapshot;
                Err(err)
            }
        }
    }

    /// Resolve the pool of a position and check that `caller` may act on it.
    fn authorize_position(
        &self,
        caller: &AccountId,
        position_id: PositionId,
    ) -> Result<PoolId, NacreError> {
        let pool_id = self.positions.pool_of(position_id)?;
        if !self.positions.is_approved_or_owner(caller, position_id)? {
            return Err(NacreError::NotTokenOwnerOrApproved(position_id));
        }
        Ok(pool_id)
    }

    /// Create a pool managed by `caller`, list its initial products, and
    /// optionally make a first deposit.
    ///
    /// Pool ids start at 1. If any step fails no pool is created.
    pub fn create_staking_pool(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        params: CreatePoolParams,
    ) -> Result<PoolId, NacreError> {
        let pool_id = self.pools.keys().next_back().map_or(1, |id| id + 1);
        let settings = PoolSettings {
            manager: *caller,
            is_private: params.is_private,
            pool_fee: params.initial_pool_fee,
            max_pool_fee: params.max_pool_fee,
            metadata: params.metadata,
        };
        let mut pool = StakingPool::new(pool_id, settings, now)?;

        let products: Vec<StakedProductParam> = params
            .products
            .iter()
            .map(|p| StakedProductParam {
                product_id: p.product_id,
                recalculate_effective_weight: true,
                target_weight: Some(p.weight),
                target_price: Some(p.target_price),
            })
            .collect();
        pool.set_products(now, &self.catalog, &products)?;
        self.pools.insert(pool_id, pool);

        if params.deposit_amount > 0 {
            let deposit = self.deposit_to(
                now,
                caller,
                pool_id,
                params.deposit_amount,
                params.tranche_id,
                None,
                None,
            );
            if let Err(err) = deposit {
                self.pools.remove(&pool_id);
                return Err(err);
            }
        }

        info!(pool_id, manager = %caller.short(), "Staking pool created");
        Ok(pool_id)
    }

    /// Update a pool's products. Manager only.
    pub fn set_products(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        pool_id: PoolId,
        params: &[StakedProductParam],
    ) -> Result<(), NacreError> {
        self.transact(pool_id, |pool, catalog, _, _| {
            if pool.manager() != caller {
                return Err(NacreError::OnlyManager("set_products"));
            }
            pool.touch(now)?;
            pool.set_products(now, catalog, params)
        })
    }

    /// Recompute every product's effective weight. Callable by anyone.
    pub fn recalculate_effective_weights_for_all_products(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
    ) -> Result<Vec<ProductWeight>, NacreError> {
        self.transact(pool_id, |pool, catalog, _, _| {
            pool.touch(now)?;
            pool.recalculate_effective_weights(catalog)
        })
    }

    /// Deposit `amount` from `caller` into a tranche.
    ///
    /// With `position_id` the deposit is added to an existing position the
    /// caller owns or is approved for; otherwise a new position is minted to
    /// `destination` (default: the caller).
    #[allow(clippy::too_many_arguments)]
    pub fn deposit_to(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        pool_id: PoolId,
        amount: Wei,
        tranche_id: TrancheId,
        position_id: Option<PositionId>,
        destination: Option<AccountId>,
    ) -> Result<PositionId, NacreError> {
        if let Some(id) = position_id {
            if self.authorize_position(caller, id)? != pool_id {
                return Err(NacreError::InvalidStakingPoolForToken {
                    position_id: id,
                    pool_id,
                });
            }
        }

        self.transact(pool_id, |pool, _, custody, positions| {
            pool.touch(now)?;
            if pool.is_private() && pool.manager() != caller {
                return Err(NacreError::PrivatePool(pool_id));
            }

            let (id, minted) = match position_id {
                Some(id) => (id, false),
                None => (positions.mint(pool_id, &destination.unwrap_or(*caller))?, true),
            };

            let result = pool
                .deposit(id, amount, tranche_id)
                .and_then(|_| custody.deposit_staked(caller, amount, pool_id));
            if let Err(err) = result {
                if minted {
                    positions.burn(id)?;
                }
                return Err(err);
            }
            Ok(id)
        })
    }

    /// Move a position's holding to a later tranche, topping it up from the
    /// caller's balance.
    pub fn extend_deposit(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        position_id: PositionId,
        from_tranche_id: TrancheId,
        to_tranche_id: TrancheId,
        top_up: Wei,
    ) -> Result<u128, NacreError> {
        let pool_id = self.authorize_position(caller, position_id)?;
        self.transact(pool_id, |pool, _, custody, _| {
            pool.touch(now)?;
            let shares = pool.extend_deposit(position_id, from_tranche_id, to_tranche_id, top_up)?;
            if top_up > 0 {
                custody.deposit_staked(caller, top_up, pool_id)?;
            }
            Ok(shares)
        })
    }

    /// Withdraw stake from expired tranches and rewards from any tranche,
    /// paid to the position's owner.
    pub fn withdraw(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        position_id: PositionId,
        tranche_ids: &[TrancheId],
    ) -> Result<WithdrawOutcome, NacreError> {
        self.withdraw_with(now, caller, position_id, tranche_ids, true, true)
    }

    /// Withdraw rewards only; stake stays put.
    pub fn claim_rewards(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        position_id: PositionId,
        tranche_ids: &[TrancheId],
    ) -> Result<Wei, NacreError> {
        self.withdraw_with(now, caller, position_id, tranche_ids, false, true)
            .map(|outcome| outcome.rewards)
    }

    fn withdraw_with(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        position_id: PositionId,
        tranche_ids: &[TrancheId],
        withdraw_stake: bool,
        withdraw_rewards: bool,
    ) -> Result<WithdrawOutcome, NacreError> {
        let pool_id = self.authorize_position(caller, position_id)?;
        let owner = self.positions.owner_of(position_id)?;
        self.transact(pool_id, |pool, _, custody, _| {
            pool.touch(now)?;
            let outcome = pool.withdraw(position_id, tranche_ids, withdraw_stake, withdraw_rewards)?;
            if outcome.stake > 0 || outcome.rewards > 0 {
                custody.withdraw_from_pool(&owner, outcome.stake, outcome.rewards, pool_id)?;
            }
            Ok(outcome)
        })
    }

    /// Withdraw the manager's fee rewards. Manager only.
    pub fn withdraw_manager_rewards(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        pool_id: PoolId,
        tranche_ids: &[TrancheId],
    ) -> Result<Wei, NacreError> {
        self.transact(pool_id, |pool, _, custody, _| {
            if pool.manager() != caller {
                return Err(NacreError::OnlyManager("withdraw_manager_rewards"));
            }
            pool.touch(now)?;
            let rewards = pool.withdraw_manager_rewards(tranche_ids)?;
            if rewards > 0 {
                custody.withdraw_from_pool(caller, 0, rewards, pool_id)?;
            }
            Ok(rewards)
        })
    }

    /// Sweep expirations. Callable by anyone.
    pub fn process_expirations(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
        until_tranche_id: Option<TrancheId>,
    ) -> Result<(), NacreError> {
        self.transact(pool_id, |pool, _, _, _| {
            pool.process_expirations(now, until_tranche_id)
        })
    }

    /// Allocate capacity for a cover and mint the premium's reward stream.
    pub fn allocate_capacity(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
        request: &AllocationRequest,
    ) -> Result<AllocationOutcome, NacreError> {
        self.transact(pool_id, |pool, catalog, custody, _| {
            pool.touch(now)?;
            let outcome = pool.allocate(now, catalog, request)?;
            if outcome.rewards > 0 {
                custody.mint_rewards(outcome.rewards, pool_id)?;
            }
            Ok(outcome)
        })
    }

    /// Release a cover's capacity early and burn its unstreamed rewards.
    pub fn deallocate_capacity(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
        cover_id: CoverId,
    ) -> Result<DeallocationOutcome, NacreError> {
        self.transact(pool_id, |pool, _, custody, _| {
            pool.touch(now)?;
            let outcome = pool.deallocate(now, cover_id)?;
            if outcome.unstreamed_rewards > 0 {
                custody.burn_rewards(outcome.unstreamed_rewards, pool_id)?;
            }
            Ok(outcome)
        })
    }

    /// Burn stake after a claim payout.
    pub fn burn_stake(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
        request: &BurnRequest,
    ) -> Result<BurnResult, NacreError> {
        self.transact(pool_id, |pool, _, custody, _| {
            pool.touch(now)?;
            let result = pool.burn_stake(request)?;
            if result.burned > 0 {
                custody.burn_staked(result.burned, pool_id)?;
            }
            Ok(result)
        })
    }

    /// Change the pool fee. Manager only.
    pub fn set_pool_fee(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        pool_id: PoolId,
        new_fee: u8,
    ) -> Result<(), NacreError> {
        self.transact(pool_id, |pool, _, _, _| {
            if pool.manager() != caller {
                return Err(NacreError::OnlyManager("set_pool_fee"));
            }
            pool.touch(now)?;
            pool.set_pool_fee(new_fee)
        })
    }

    /// Open or close a pool. Manager only.
    pub fn set_pool_privacy(
        &mut self,
        caller: &AccountId,
        pool_id: PoolId,
        is_private: bool,
    ) -> Result<(), NacreError> {
        self.transact(pool_id, |pool, _, _, _| {
            if pool.manager() != caller {
                return Err(NacreError::OnlyManager("set_pool_privacy"));
            }
            pool.set_pool_privacy(is_private);
            Ok(())
        })
    }

    /// Capacity a product can sell in a pool for the shortest cover period,
    /// after sweeping expirations.
    pub fn available_capacity(
        &mut self,
        now: Timestamp,
        pool_id: PoolId,
        product_id: ProductId,
    ) -> Result<CapacitySnapshot, NacreError> {
        self.transact(pool_id, |pool, catalog, _, _| {
            pool.touch(now)?;
            pool.available_capacity(now, catalog, product_id, MIN_COVER_PERIOD)
        })
    }

    pub fn get_product(
        &self,
        pool_id: PoolId,
        product_id: ProductId,
    ) -> Result<StakedProduct, NacreError> {
        self.pool(pool_id)?
            .product(product_id)
            .copied()
            .ok_or(NacreError::ProductNotInPool {
                pool_id,
                product_id,
            })
    }

    pub fn get_price_and_capacity_ratios(
        &self,
        product_ids: &[ProductId],
    ) -> Result<PriceAndCapacityRatios, NacreError> {
        self.catalog.price_and_capacity_ratios(product_ids)
    }

    pub fn pool(&self, pool_id: PoolId) -> Result<&StakingPool, NacreError> {
        self.pools
            .get(&pool_id)
            .ok_or(NacreError::PoolDoesNotExist(pool_id))
    }

    pub fn pools(&self) -> impl Iterator<Item = &StakingPool> {
        self.pools.values()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn catalog(&self) -> &CoverCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CoverCatalog {
        &mut self.catalog
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn positions(&self) -> &N {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut N {
        &mut self.positions
    }
}
