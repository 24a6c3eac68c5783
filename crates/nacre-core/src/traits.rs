// crates/nacre-core/src/traits.rs
//
// Interfaces the ledger consumes from its external collaborators.
//
// The ledger calls these only after its own state has been fully updated
// for the current operation; a failing call makes the caller roll the
// ledger back, so implementations must not partially apply a transfer.

use crate::error::NacreError;
use crate::identity::{AccountId, PoolId, PositionId};
use crate::units::Wei;

/// Custody of the staked token.
///
/// Implemented in-memory by `nacre_staking::custody::TokenController`.
pub trait TokenCustody {
    /// Move `amount` from `from` into the pool's deposit balance.
    fn deposit_staked(&mut self, from: &AccountId, amount: Wei, pool_id: PoolId)
        -> Result<(), NacreError>;

    /// Pay `stake` out of the pool's deposits and `rewards` out of its
    /// reward balance to `to`.
    fn withdraw_from_pool(
        &mut self,
        to: &AccountId,
        stake: Wei,
        rewards: Wei,
        pool_id: PoolId,
    ) -> Result<(), NacreError>;

    /// Mint newly streamed rewards into the pool's reward balance.
    fn mint_rewards(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError>;

    /// Burn rewards that will no longer be streamed.
    fn burn_rewards(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError>;

    /// Burn staked deposits after a claim payout.
    fn burn_staked(&mut self, amount: Wei, pool_id: PoolId) -> Result<(), NacreError>;
}

/// Ownership of staking positions (an NFT-like registry).
///
/// Implemented in-memory by `nacre_staking::nft::StakingNft`.
pub trait PositionRegistry {
    /// Mint a new position for `pool_id` owned by `to`. Ids start at 1.
    fn mint(&mut self, pool_id: PoolId, to: &AccountId) -> Result<PositionId, NacreError>;

    /// Destroy a position. Used to undo a mint when the enclosing operation fails.
    fn burn(&mut self, id: PositionId) -> Result<(), NacreError>;

    /// Current owner of a position.
    fn owner_of(&self, id: PositionId) -> Result<AccountId, NacreError>;

    /// Pool a position was minted for.
    fn pool_of(&self, id: PositionId) -> Result<PoolId, NacreError>;

    /// Whether `spender` owns or is approved for the position.
    fn is_approved_or_owner(&self, spender: &AccountId, id: PositionId) -> Result<bool, NacreError>;
}
