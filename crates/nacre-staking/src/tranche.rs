// crates/nacre-staking/src/tranche.rs
//
// Tranche ledger: fixed-duration stake buckets, deposit shares, withdrawals
// and deposit extensions.
//
// Stake is committed to a tranche and locked until that tranche expires.
// Each deposit records stake shares (claim on the tranche's stake) and
// reward shares (claim on streamed rewards). Share price within a tranche
// only ever falls through stake burns; new deposits are priced at the
// current ratio and rounded down, so they never dilute earlier holders.

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::info;

use nacre_core::{BucketId, NacreError, PositionId, Timestamp, TrancheId, Wei, DAY};

use crate::math;
use crate::pool::{fee_shares_for, StakingPool};
use crate::rewards::ACC_PRECISION;

/// Length of a tranche: 91 days.
pub const TRANCHE_DURATION: u64 = 91 * DAY;

/// Number of tranches open for deposits at any time, current one included.
pub const MAX_ACTIVE_TRANCHES: u64 = 8;

/// Length of a cover-expiry bucket: 28 days.
pub const BUCKET_DURATION: u64 = 28 * DAY;

/// Tranche containing timestamp `ts`.
pub fn tranche_id_at(ts: Timestamp) -> TrancheId {
    ts / TRANCHE_DURATION
}

/// First second after tranche `id` (its expiry).
pub fn tranche_end(id: TrancheId) -> Timestamp {
    (id + 1) * TRANCHE_DURATION
}

/// Bucket containing timestamp `ts`.
pub fn bucket_id_at(ts: Timestamp) -> BucketId {
    ts / BUCKET_DURATION
}

/// Stake and share totals of an active tranche.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    pub stake: Wei,
    pub stake_shares: u128,
    pub reward_shares: u128,
}

/// Snapshot of a tranche taken at the moment it expired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredTranche {
    pub acc_reward_per_share_at_expiry: u128,
    pub stake_at_expiry: Wei,
    pub stake_shares_at_expiry: u128,
}

/// A position's holding in one tranche (or the manager's fee holding).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub stake_shares: u128,
    pub reward_shares: u128,
    /// Accumulator value at the last share change or settlement.
    pub reward_debt: u128,
    /// Rewards settled but not yet withdrawn.
    pub pending_rewards: Wei,
}

impl Deposit {
    /// Rewards claimable if the accumulator stands at `acc`.
    pub fn accrued_rewards(&self, acc: u128) -> Result<Wei, NacreError> {
        let fresh = math::mul_div(
            self.reward_shares,
            acc.saturating_sub(self.reward_debt),
            ACC_PRECISION,
            "deposit rewards",
        )?;
        math::add(self.pending_rewards, fresh, "deposit rewards")
    }

    /// Fold accrued rewards into `pending_rewards` and reset the debt.
    pub(crate) fn settle(&mut self, acc: u128) -> Result<(), NacreError> {
        self.pending_rewards = self.accrued_rewards(acc)?;
        self.reward_debt = acc;
        Ok(())
    }

    /// Settle, then take everything pending.
    pub(crate) fn take_rewards(&mut self, acc: u128) -> Result<Wei, NacreError> {
        self.settle(acc)?;
        Ok(mem::take(&mut self.pending_rewards))
    }

    fn is_empty(&self) -> bool {
        self.stake_shares == 0 && self.reward_shares == 0 && self.pending_rewards == 0
    }
}

/// Stake and rewards released by a withdrawal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WithdrawOutcome {
    pub stake: Wei,
    pub rewards: Wei,
}

impl StakingPool {
    /// Deposit `amount` into `tranche_id` on behalf of `position_id`.
    ///
    /// The first deposit into an empty tranche mints shares 1:1; later
    /// deposits mint `amount × stake_shares / stake`, rounded down. Every new
    /// stake share carries one reward share, plus the manager's fee shares.
    ///
    /// The caller must have brought the pool up to date (`touch`).
    ///
    /// # Errors
    /// - `InsufficientDeposit` if `amount` is zero or buys no shares.
    /// - `InvalidTrancheId` if the tranche is expired or beyond the horizon.
    /// - `TrancheDepleted` if the tranche's stake was burned to zero.
    pub fn deposit(
        &mut self,
        position_id: PositionId,
        amount: Wei,
        tranche_id: TrancheId,
    ) -> Result<u128, NacreError> {
        if amount == 0 {
            return Err(NacreError::InsufficientDeposit);
        }
        self.check_depositable(tranche_id)?;

        let new_shares = self.shares_for(tranche_id, amount)?;
        self.add_shares(position_id, tranche_id, amount, new_shares)?;

        info!(
            pool_id = self.id,
            position_id,
            tranche_id,
            amount = %amount,
            shares = %new_shares,
            "Deposit recorded"
        );
        Ok(new_shares)
    }

    /// Withdraw stake and/or rewards from the given tranches.
    ///
    /// Stake can only leave an expired tranche and is valued at the expiry
    /// snapshot: `shares × stake_at_expiry / shares_at_expiry`. Rewards can
    /// be taken from active tranches too. Tranches where the position holds
    /// nothing are skipped.
    ///
    /// # Errors
    /// `TrancheNotYetExpired` if stake is requested from an active tranche.
    pub fn withdraw(
        &mut self,
        position_id: PositionId,
        tranche_ids: &[TrancheId],
        withdraw_stake: bool,
        withdraw_rewards: bool,
    ) -> Result<WithdrawOutcome, NacreError> {
        let mut outcome = WithdrawOutcome::default();

        for &tranche_id in tranche_ids {
            let is_active = tranche_id >= self.first_active_tranche_id;
            if is_active && withdraw_stake {
                return Err(NacreError::TrancheNotYetExpired {
                    tranche_id,
                    expires_at: tranche_end(tranche_id),
                });
            }

            let acc = if is_active {
                self.acc_reward_per_share
            } else {
                self.expired_tranches
                    .get(&tranche_id)
                    .map(|e| e.acc_reward_per_share_at_expiry)
                    .unwrap_or(0)
            };

            let Some(deposit) = self.deposits.get_mut(&(position_id, tranche_id)) else {
                continue;
            };

            if withdraw_rewards {
                let rewards = deposit.take_rewards(acc)?;
                outcome.rewards = math::add(outcome.rewards, rewards, "withdrawn rewards")?;
            }

            if withdraw_stake && deposit.stake_shares > 0 {
                let snapshot = self
                    .expired_tranches
                    .get(&tranche_id)
                    .cloned()
                    .unwrap_or_default();
                let stake = if snapshot.stake_shares_at_expiry == 0 {
                    0
                } else {
                    math::mul_div(
                        deposit.stake_shares,
                        snapshot.stake_at_expiry,
                        snapshot.stake_shares_at_expiry,
                        "withdrawn stake",
                    )?
                };
                // Rewards stop at expiry, so the reward shares go with the stake.
                deposit.settle(acc)?;
                deposit.stake_shares = 0;
                deposit.reward_shares = 0;
                outcome.stake = math::add(outcome.stake, stake, "withdrawn stake")?;
            }

            if deposit.is_empty() {
                self.deposits.remove(&(position_id, tranche_id));
            }
        }

        info!(
            pool_id = self.id,
            position_id,
            stake = %outcome.stake,
            rewards = %outcome.rewards,
            "Withdrawal processed"
        );
        Ok(outcome)
    }

    /// Withdraw the manager's fee rewards from the given tranches.
    pub fn withdraw_manager_rewards(&mut self, tranche_ids: &[TrancheId]) -> Result<Wei, NacreError> {
        let mut total: Wei = 0;
        for &tranche_id in tranche_ids {
            let acc = if tranche_id >= self.first_active_tranche_id {
                self.acc_reward_per_share
            } else {
                self.expired_tranches
                    .get(&tranche_id)
                    .map(|e| e.acc_reward_per_share_at_expiry)
                    .unwrap_or(0)
            };
            if let Some(deposit) = self.fee_deposits.get_mut(&tranche_id) {
                total = math::add(total, deposit.take_rewards(acc)?, "manager rewards")?;
            }
        }
        info!(pool_id = self.id, rewards = %total, "Manager rewards withdrawn");
        Ok(total)
    }

    /// Move a position's holding from one tranche to a later one, optionally
    /// topping it up.
    ///
    /// The source may be active or expired. Its stake value (plus `top_up`)
    /// is re-deposited at the destination's share price; unclaimed rewards
    /// travel with it as pending rewards.
    ///
    /// # Errors
    /// - `InvalidTrancheId` if the destination is not later than the source,
    ///   or not depositable.
    /// - `InsufficientDeposit` if nothing would be deposited.
    /// - `TrancheDepleted` if the destination's stake was burned to zero.
    pub fn extend_deposit(
        &mut self,
        position_id: PositionId,
        from_tranche_id: TrancheId,
        to_tranche_id: TrancheId,
        top_up: Wei,
    ) -> Result<u128, NacreError> {
        if to_tranche_id <= from_tranche_id {
            return Err(NacreError::InvalidTrancheId {
                tranche_id: to_tranche_id,
                first: from_tranche_id + 1,
                last: self.last_depositable_tranche_id(),
            });
        }
        self.check_depositable(to_tranche_id)?;

        let (value, carried_rewards) = self.remove_deposit(position_id, from_tranche_id)?;
        let amount = math::add(value, top_up, "extended amount")?;
        if amount == 0 {
            return Err(NacreError::InsufficientDeposit);
        }

        let new_shares = self.shares_for(to_tranche_id, amount)?;
        self.add_shares(position_id, to_tranche_id, amount, new_shares)?;

        let destination = self
            .deposits
            .entry((position_id, to_tranche_id))
            .or_default();
        destination.pending_rewards =
            math::add(destination.pending_rewards, carried_rewards, "carried rewards")?;

        info!(
            pool_id = self.id,
            position_id,
            from_tranche_id,
            to_tranche_id,
            moved = %value,
            top_up = %top_up,
            "Deposit extended"
        );
        Ok(new_shares)
    }

    fn check_depositable(&self, tranche_id: TrancheId) -> Result<(), NacreError> {
        let first = self.first_active_tranche_id;
        let last = self.last_depositable_tranche_id();
        if tranche_id < first || tranche_id > last {
            return Err(NacreError::InvalidTrancheId {
                tranche_id,
                first,
                last,
            });
        }
        Ok(())
    }

    /// Stake shares bought by `amount` in an active tranche.
    fn shares_for(&self, tranche_id: TrancheId, amount: Wei) -> Result<u128, NacreError> {
        let shares = match self.tranches.get(&tranche_id) {
            None => amount,
            Some(t) if t.stake_shares == 0 => amount,
            Some(t) if t.stake == 0 => return Err(NacreError::TrancheDepleted(tranche_id)),
            Some(t) => math::mul_div(amount, t.stake_shares, t.stake, "deposit shares")?,
        };
        if shares == 0 {
            return Err(NacreError::InsufficientDeposit);
        }
        Ok(shares)
    }

    /// Credit `amount` of stake and `new_shares` to a position, with the
    /// matching reward and fee shares.
    fn add_shares(
        &mut self,
        position_id: PositionId,
        tranche_id: TrancheId,
        amount: Wei,
        new_shares: u128,
    ) -> Result<(), NacreError> {
        let acc = self.acc_reward_per_share;
        let fee_shares = fee_shares_for(new_shares, self.pool_fee)?;
        let reward_shares = math::add(new_shares, fee_shares, "reward shares")?;

        let deposit = self.deposits.entry((position_id, tranche_id)).or_default();
        deposit.settle(acc)?;
        deposit.stake_shares = math::add(deposit.stake_shares, new_shares, "deposit shares")?;
        deposit.reward_shares = math::add(deposit.reward_shares, new_shares, "deposit shares")?;

        if fee_shares > 0 {
            let fee_deposit = self.fee_deposits.entry(tranche_id).or_default();
            fee_deposit.settle(acc)?;
            fee_deposit.reward_shares =
                math::add(fee_deposit.reward_shares, fee_shares, "fee shares")?;
        }

        let tranche = self.tranches.entry(tranche_id).or_default();
        tranche.stake = math::add(tranche.stake, amount, "tranche stake")?;
        tranche.stake_shares = math::add(tranche.stake_shares, new_shares, "tranche shares")?;
        tranche.reward_shares = math::add(tranche.reward_shares, reward_shares, "tranche shares")?;

        self.active_stake = math::add(self.active_stake, amount, "active stake")?;
        self.stake_share_supply = math::add(self.stake_share_supply, new_shares, "share supply")?;
        self.reward_share_supply =
            math::add(self.reward_share_supply, reward_shares, "reward share supply")?;
        Ok(())
    }

    /// Take a position's whole holding out of a tranche, returning its stake
    /// value and its unclaimed rewards.
    fn remove_deposit(
        &mut self,
        position_id: PositionId,
        tranche_id: TrancheId,
    ) -> Result<(Wei, Wei), NacreError> {
        let Some(mut deposit) = self.deposits.remove(&(position_id, tranche_id)) else {
            return Ok((0, 0));
        };

        if tranche_id < self.first_active_tranche_id {
            let snapshot = self
                .expired_tranches
                .get(&tranche_id)
                .cloned()
                .unwrap_or_default();
            let rewards = deposit.take_rewards(snapshot.acc_reward_per_share_at_expiry)?;
            let value = if snapshot.stake_shares_at_expiry == 0 {
                0
            } else {
                math::mul_div(
                    deposit.stake_shares,
                    snapshot.stake_at_expiry,
                    snapshot.stake_shares_at_expiry,
                    "extended stake",
                )?
            };
            return Ok((value, rewards));
        }

        let acc = self.acc_reward_per_share;
        let rewards = deposit.take_rewards(acc)?;

        let fee = self.pool_fee;
        let fee_removed = match self.fee_deposits.get_mut(&tranche_id) {
            Some(fee_deposit) => {
                fee_deposit.settle(acc)?;
                let owed = fee_shares_for(deposit.reward_shares, fee)?;
                let removed = owed.min(fee_deposit.reward_shares);
                fee_deposit.reward_shares -= removed;
                removed
            }
            None => 0,
        };

        let tranche = self.tranches.entry(tranche_id).or_default();
        let value = if tranche.stake_shares == 0 {
            0
        } else {
            math::mul_div(
                deposit.stake_shares,
                tranche.stake,
                tranche.stake_shares,
                "extended stake",
            )?
        };
        tranche.stake = tranche.stake.saturating_sub(value);
        tranche.stake_shares = tranche.stake_shares.saturating_sub(deposit.stake_shares);
        let reward_removed = deposit.reward_shares + fee_removed;
        tranche.reward_shares = tranche.reward_shares.saturating_sub(reward_removed);

        self.active_stake = self.active_stake.saturating_sub(value);
        self.stake_share_supply = self.stake_share_supply.saturating_sub(deposit.stake_shares);
        self.reward_share_supply = self.reward_share_supply.saturating_sub(reward_removed);

        Ok((value, rewards))
    }
}
