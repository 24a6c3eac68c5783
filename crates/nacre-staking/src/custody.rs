// crates/nacre-staking/src/custody.rs
//
// In-memory token custody.
//
// Tracks NXM held by accounts and, per pool, the staked deposits and the
// reward balance the pool pays out of. Deposits come from stakers; rewards
// are minted as premiums start streaming and burned when a stream is cut
// short. Claim payouts burn from deposits.
//
// Every operation either applies in full or returns an error without
// changing any balance.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use nacre_core::{AccountId, NacreError, PoolId, TokenCustody, Wei};

/// NXM held by the custody on behalf of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolBalances {
    /// Staked deposits, in wei.
    pub deposits: Wei,
    /// Minted rewards not yet paid out, in wei.
    pub rewards: Wei,
}

/// The token controller.
#[derive(Debug, Clone, Default)]
pub struct TokenController {
    balances: HashMap<AccountId, Wei>,
    pools: HashMap<PoolId, PoolBalances>,
    total_supply: Wei,
}

impl TokenController {
    /// Create a controller with no balances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `amount` to an account.
    ///
    /// Stands in for the token contract's mint path; scenarios and tests use
    /// it to fund stakers.
    pub fn mint_to(&mut self, account: &AccountId, amount: Wei) -> Result<(), NacreError> {
        let supply = checked_add(self.total_supply, amount)?;
        let balance = checked_add(self.balance_of(account), amount)?;
        self.balances.insert(*account, balance);
        self.total_supply = supply;
        Ok(())
    }

    /// Balance of an account (in wei).
    pub fn balance_of(&self, account: &AccountId) -> Wei {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Balances held for a pool.
    pub fn pool_balances(&self, pool_id: PoolId) -> PoolBalances {
        self.pools.get(&pool_id).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> Wei {
        self.total_supply
    }
}

fn checked_add(a: Wei, b: Wei) -> Result<Wei, NacreError> {
    a.checked_add(b)
        .ok_or(NacreError::MathOverflow("custody balance"))
}

fn checked_sub(available: Wei, needed: Wei) -> Result<Wei, NacreError> {
    available
        .checked_sub(needed)
        .ok_or(NacreError::InsufficientBalance { needed, available })
}

impl TokenCustody for TokenController {
    fn deposit_staked(
        &mut self,
        from: &AccountId,
        amount: Wei,
        pool_id: PoolId,
    ) -> Result<(), NacreError> {
        let balance = checked_sub(self.balance_of(from), amount)?;
        let pool = self.pool_balances(pool_id);
        let deposits = checked_add(pool.deposits, amount)?;

        self.balances.insert(*from, balance);
        self.pools.insert(pool_id, PoolBalances { deposits, ..pool });
        debug!(pool_id, account = %from.short(), amount = %amount, "Staked NXM deposited");
        Ok(())
    }

    fn withdraw_from_pool(
        &mut self,
        to: &AccountId,
        stake: Wei,
        rewards: Wei,
        pool_id: PoolId,
    ) -> Result<(), NacreError> {
        let pool = self.pool_balances(pool_id);
        let deposits = checked_sub(pool.deposits, stake)?;
        let remaining_rewards = checked_sub(pool.rewards, rewards)?;
        let balance = checked_add(self.balance_of(to), checked_add(stake, rewards)?)?;

        self.pools.insert(
            pool_id,
            PoolBalances {
                deposits,
                rewards: remaining_rewards,
            },
        );
        self.balances.insert(*to, balance);
        debug!(pool_id, account = %to.short(), stake = %stake, rewards = %rewards, "Paid out of pool");
        Ok(())
    }

    fn mint_rewards(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError> {
        let pool = self.pool_balances(pool_id);
        let rewards = checked_add(pool.rewards, amount)?;
        let supply = checked_add(self.total_supply, amount)?;

        self.pools.insert(pool_id, PoolBalances { rewards, ..pool });
        self.total_supply = supply;
        Ok(())
    }

    fn burn_rewards(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError> {
        let pool = self.pool_balances(pool_id);
        let rewards = checked_sub(pool.rewards, amount)?;
        let supply = checked_sub(self.total_supply, amount)?;

        self.pools.insert(pool_id, PoolBalances { rewards, ..pool });
        self.total_supply = supply;
        Ok(())
    }

    fn burn_staked(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError> {
        let pool = self.pool_balances(pool_id);
        let deposits = checked_sub(pool.deposits, amount)?;
        let supply = checked_sub(self.total_supply, amount)?;

        self.pools.insert(pool_id, PoolBalances { deposits, ..pool });
        self.total_supply = supply;
        Ok(())
    }
}
