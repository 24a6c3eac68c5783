// crates/nacre-staking/src/pool.rs
//
// The staking pool: all ledger state for one pool.
//
// Behaviour is split across modules, each adding an `impl StakingPool`
// block: tranche.rs (deposits, withdrawals, extensions), expiration.rs
// (the time sweep), rewards.rs (accumulator and reward streams),
// weights.rs, capacity.rs and burn.rs. This file holds the state itself,
// pool settings, and read-only views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use nacre_core::{
    AccountId, BucketId, CoverId, NacreError, PoolId, PositionId, ProductId, Timestamp, TrancheId,
    Wei,
};

use crate::capacity::CoverAllocation;
use crate::math;
use crate::tranche::{
    bucket_id_at, tranche_end, tranche_id_at, Deposit, ExpiredTranche, Tranche,
    MAX_ACTIVE_TRANCHES,
};
use crate::weights::StakedProduct;

/// Pool fees are whole percentages.
pub const POOL_FEE_DENOMINATOR: u8 = 100;

/// Highest fee any pool may configure. A 100% fee would leave no reward
/// shares for stakers and make the fee-share ratio undefined.
pub const MAX_POOL_FEE_LIMIT: u8 = 99;

/// Manager-chosen pool settings supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub manager: AccountId,
    pub is_private: bool,
    pub pool_fee: u8,
    pub max_pool_fee: u8,
    /// Off-ledger description reference (an IPFS hash in production).
    #[serde(default)]
    pub metadata: String,
}

/// All ledger state of a single staking pool.
#[derive(Debug, Clone)]
pub struct StakingPool {
    pub(crate) id: PoolId,
    pub(crate) manager: AccountId,
    pub(crate) is_private: bool,
    pub(crate) pool_fee: u8,
    pub(crate) max_pool_fee: u8,
    pub(crate) metadata: String,

    pub(crate) active_stake: Wei,
    pub(crate) stake_share_supply: u128,
    pub(crate) reward_share_supply: u128,

    pub(crate) acc_reward_per_share: u128,
    pub(crate) last_reward_update: Timestamp,
    pub(crate) reward_per_second: u128,

    pub(crate) first_active_tranche_id: TrancheId,
    pub(crate) first_active_bucket_id: BucketId,

    pub(crate) tranches: BTreeMap<TrancheId, Tranche>,
    pub(crate) expired_tranches: BTreeMap<TrancheId, ExpiredTranche>,
    pub(crate) deposits: BTreeMap<(PositionId, TrancheId), Deposit>,
    pub(crate) fee_deposits: BTreeMap<TrancheId, Deposit>,

    pub(crate) products: BTreeMap<ProductId, StakedProduct>,
    pub(crate) total_target_weight: u32,
    pub(crate) total_effective_weight: u32,

    pub(crate) covers: BTreeMap<CoverId, CoverAllocation>,
    pub(crate) allocations: BTreeMap<(ProductId, TrancheId), u64>,
    pub(crate) reward_rate_cuts: BTreeMap<BucketId, u128>,
}

/// Flat summary of a pool, for tables and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub id: PoolId,
    pub manager: String,
    pub is_private: bool,
    pub pool_fee: u8,
    pub max_pool_fee: u8,
    pub active_stake: Wei,
    pub stake_share_supply: u128,
    pub reward_share_supply: u128,
    pub reward_per_second: u128,
    pub first_active_tranche_id: TrancheId,
    pub products: usize,
    pub covers: usize,
    pub total_target_weight: u32,
    pub total_effective_weight: u32,
}

/// One active tranche, for the tranche calendar.
#[derive(Debug, Clone, Serialize)]
pub struct TrancheView {
    pub tranche_id: TrancheId,
    pub expires_at: Timestamp,
    pub stake: Wei,
    pub stake_shares: u128,
    pub reward_shares: u128,
}

impl StakingPool {
    /// Create an empty pool whose clock starts at `now`.
    ///
    /// # Errors
    /// `PoolFeeExceedsMax` if `max_pool_fee` is above the protocol limit or
    /// `pool_fee` is above `max_pool_fee`.
    pub fn new(id: PoolId, settings: PoolSettings, now: Timestamp) -> Result<Self, NacreError> {
        if settings.max_pool_fee > MAX_POOL_FEE_LIMIT {
            return Err(NacreError::PoolFeeExceedsMax {
                fee: settings.max_pool_fee,
                max: MAX_POOL_FEE_LIMIT,
            });
        }
        if settings.pool_fee > settings.max_pool_fee {
            return Err(NacreError::PoolFeeExceedsMax {
                fee: settings.pool_fee,
                max: settings.max_pool_fee,
            });
        }

        Ok(Self {
            id,
            manager: settings.manager,
            is_private: settings.is_private,
            pool_fee: settings.pool_fee,
            max_pool_fee: settings.max_pool_fee,
            metadata: settings.metadata,
            active_stake: 0,
            stake_share_supply: 0,
            reward_share_supply: 0,
            acc_reward_per_share: 0,
            last_reward_update: now,
            reward_per_second: 0,
            first_active_tranche_id: tranche_id_at(now),
            first_active_bucket_id: bucket_id_at(now),
            tranches: BTreeMap::new(),
            expired_tranches: BTreeMap::new(),
            deposits: BTreeMap::new(),
            fee_deposits: BTreeMap::new(),
            products: BTreeMap::new(),
            total_target_weight: 0,
            total_effective_weight: 0,
            covers: BTreeMap::new(),
            allocations: BTreeMap::new(),
            reward_rate_cuts: BTreeMap::new(),
        })
    }

    /// Change the pool fee.
    ///
    /// Fee shares in every active tranche are re-based so that from now on
    /// the manager earns `new_fee` percent of that tranche's rewards. Rewards
    /// accrued so far are settled at the old fee first.
    ///
    /// The caller must have brought the pool up to date (`touch`).
    ///
    /// # Errors
    /// `PoolFeeExceedsMax` if `new_fee` is above the pool's maximum.
    pub fn set_pool_fee(&mut self, new_fee: u8) -> Result<(), NacreError> {
        if new_fee > self.max_pool_fee {
            return Err(NacreError::PoolFeeExceedsMax {
                fee: new_fee,
                max: self.max_pool_fee,
            });
        }

        let acc = self.acc_reward_per_share;
        let active: Vec<TrancheId> = self
            .tranches
            .range(self.first_active_tranche_id..)
            .map(|(id, _)| *id)
            .collect();

        for tranche_id in active {
            let fee_deposit = self.fee_deposits.entry(tranche_id).or_default();
            fee_deposit.settle(acc)?;
            let old_fee_shares = fee_deposit.reward_shares;

            let Some(tranche) = self.tranches.get_mut(&tranche_id) else {
                continue;
            };
            let staker_shares = tranche.reward_shares.saturating_sub(old_fee_shares);
            let new_fee_shares = fee_shares_for(staker_shares, new_fee)?;

            tranche.reward_shares = staker_shares + new_fee_shares;
            fee_deposit.reward_shares = new_fee_shares;
            self.reward_share_supply = self
                .reward_share_supply
                .saturating_sub(old_fee_shares)
                .checked_add(new_fee_shares)
                .ok_or(NacreError::MathOverflow("reward share supply"))?;
        }

        info!(pool_id = self.id, old_fee = self.pool_fee, new_fee, "Pool fee updated");
        self.pool_fee = new_fee;
        Ok(())
    }

    /// Open or close the pool to deposits from accounts other than the manager.
    pub fn set_pool_privacy(&mut self, is_private: bool) {
        self.is_private = is_private;
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn manager(&self) -> &AccountId {
        &self.manager
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn pool_fee(&self) -> u8 {
        self.pool_fee
    }

    pub fn max_pool_fee(&self) -> u8 {
        self.max_pool_fee
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Stake across all active tranches, in wei.
    pub fn active_stake(&self) -> Wei {
        self.active_stake
    }

    pub fn stake_share_supply(&self) -> u128 {
        self.stake_share_supply
    }

    pub fn reward_share_supply(&self) -> u128 {
        self.reward_share_supply
    }

    pub fn acc_reward_per_share(&self) -> u128 {
        self.acc_reward_per_share
    }

    pub fn last_reward_update(&self) -> Timestamp {
        self.last_reward_update
    }

    pub fn reward_per_second(&self) -> u128 {
        self.reward_per_second
    }

    pub fn first_active_tranche_id(&self) -> TrancheId {
        self.first_active_tranche_id
    }

    pub fn first_active_bucket_id(&self) -> BucketId {
        self.first_active_bucket_id
    }

    /// Last tranche id a deposit may currently target.
    pub fn last_depositable_tranche_id(&self) -> TrancheId {
        self.first_active_tranche_id + MAX_ACTIVE_TRANCHES - 1
    }

    pub fn tranche(&self, tranche_id: TrancheId) -> Option<&Tranche> {
        self.tranches.get(&tranche_id)
    }

    pub fn expired_tranche(&self, tranche_id: TrancheId) -> Option<&ExpiredTranche> {
        self.expired_tranches.get(&tranche_id)
    }

    pub fn deposit_of(&self, position_id: PositionId, tranche_id: TrancheId) -> Option<&Deposit> {
        self.deposits.get(&(position_id, tranche_id))
    }

    pub fn fee_deposit(&self, tranche_id: TrancheId) -> Option<&Deposit> {
        self.fee_deposits.get(&tranche_id)
    }

    pub fn product(&self, product_id: ProductId) -> Option<&StakedProduct> {
        self.products.get(&product_id)
    }

    pub fn products(&self) -> impl Iterator<Item = (&ProductId, &StakedProduct)> {
        self.products.iter()
    }

    pub fn total_target_weight(&self) -> u32 {
        self.total_target_weight
    }

    pub fn total_effective_weight(&self) -> u32 {
        self.total_effective_weight
    }

    pub fn cover(&self, cover_id: CoverId) -> Option<&CoverAllocation> {
        self.covers.get(&cover_id)
    }

    /// Allocation units held by `product_id` in `tranche_id`.
    pub fn allocated_units(&self, product_id: ProductId, tranche_id: TrancheId) -> u64 {
        self.allocations
            .get(&(product_id, tranche_id))
            .copied()
            .unwrap_or(0)
    }

    /// Active tranches that hold stake or shares, earliest first.
    pub fn active_tranches(&self) -> Vec<TrancheView> {
        self.tranches
            .range(self.first_active_tranche_id..)
            .map(|(id, t)| TrancheView {
                tranche_id: *id,
                expires_at: tranche_end(*id),
                stake: t.stake,
                stake_shares: t.stake_shares,
                reward_shares: t.reward_shares,
            })
            .collect()
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            id: self.id,
            manager: self.manager.short(),
            is_private: self.is_private,
            pool_fee: self.pool_fee,
            max_pool_fee: self.max_pool_fee,
            active_stake: self.active_stake,
            stake_share_supply: self.stake_share_supply,
            reward_share_supply: self.reward_share_supply,
            reward_per_second: self.reward_per_second,
            first_active_tranche_id: self.first_active_tranche_id,
            products: self.products.len(),
            covers: self.covers.len(),
            total_target_weight: self.total_target_weight,
            total_effective_weight: self.total_effective_weight,
        }
    }
}

/// Fee shares owed to the manager for `staker_shares` new reward shares:
/// `shares × fee / (100 − fee)`, so the manager holds `fee` percent of the
/// tranche's reward shares.
pub(crate) fn fee_shares_for(staker_shares: u128, fee: u8) -> Result<u128, NacreError> {
    if fee == 0 {
        return Ok(0);
    }
    math::mul_div(
        staker_shares,
        fee as u128,
        (POOL_FEE_DENOMINATOR - fee) as u128,
        "fee shares",
    )
}
