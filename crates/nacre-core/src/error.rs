// crates/nacre-core/src/error.rs

use thiserror::Error;

use crate::identity::{CoverId, PoolId, PositionId, ProductId, TrancheId};
use crate::units::{Timestamp, Wei};

/// Coarse classification of a [`NacreError`].
///
/// Collaborators use the kind to decide how to surface a failure; every
/// kind is rejected synchronously and leaves ledger state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input: zero amounts, out-of-range ids, unauthorized caller.
    InputValidation,
    /// Valid input that conflicts with current state (not yet expired,
    /// capacity exhausted, weight ceiling exceeded).
    StateConflict,
    /// Referenced pool, product, position, or allocation does not exist.
    NotFound,
    /// Checked arithmetic overflowed.
    Arithmetic,
}

/// Protocol-wide error types for the Nacre staking ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NacreError {
    // ------------------------------------------------------------------
    // Input validation
    // ------------------------------------------------------------------
    /// Deposit amount is zero (or rounds to zero shares).
    #[error("Insufficient deposit: amount must be greater than zero")]
    InsufficientDeposit,

    /// Tranche index outside the depositable range.
    #[error("Invalid tranche id {tranche_id}: depositable range is [{first}, {last}]")]
    InvalidTrancheId {
        tranche_id: TrancheId,
        first: TrancheId,
        last: TrancheId,
    },

    /// Caller is not the pool manager.
    #[error("Unauthorized: only the pool manager may call {0}")]
    OnlyManager(&'static str),

    /// Caller neither owns nor is approved for the position.
    #[error("Unauthorized: caller is not the owner of or approved for position {0}")]
    NotTokenOwnerOrApproved(PositionId),

    /// Position belongs to a different pool.
    #[error("Position {position_id} does not belong to pool {pool_id}")]
    InvalidStakingPoolForToken {
        position_id: PositionId,
        pool_id: PoolId,
    },

    /// Non-manager deposit into a private pool.
    #[error("Pool {0} is private: only the manager may deposit")]
    PrivatePool(PoolId),

    /// Product target weight above the per-product denominator.
    #[error("Target weight {0} exceeds the maximum of 100")]
    TargetWeightTooHigh(u32),

    /// Target price above 100%.
    #[error("Target price {0} exceeds the price denominator")]
    TargetPriceTooHigh(u32),

    /// Target price under the product's floor.
    #[error("Target price {price} is below the product minimum of {min}")]
    TargetPriceBelowMin { price: u32, min: u32 },

    /// A product added to a pool must come with weight and price.
    #[error("Product {0} is new to the pool: target weight and target price must both be set")]
    MustSetPriceForNewProducts(ProductId),

    /// Changing a target weight requires recalculating the effective weight.
    #[error("Product {0}: setting a target weight requires recalculating the effective weight")]
    MustRecalculateEffectiveWeight(ProductId),

    /// Pool fee above the pool's own maximum or the protocol limit.
    #[error("Pool fee {fee} exceeds maximum {max}")]
    PoolFeeExceedsMax { fee: u8, max: u8 },

    /// Cover period outside the allowed window.
    #[error("Cover period of {period} seconds is outside [{min}, {max}]")]
    CoverPeriodOutOfRange { period: u64, min: u64, max: u64 },

    /// Zero or otherwise unusable amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The zero account cannot receive a position.
    #[error("Invalid recipient: the zero account cannot hold a position")]
    InvalidRecipient,

    /// Transfer `from` is not the current owner.
    #[error("Transfer source is not the owner of position {0}")]
    WrongFrom(PositionId),

    /// Caller may not approve or transfer the position.
    #[error("Not authorized to manage position {0}")]
    NotAuthorized(PositionId),

    // ------------------------------------------------------------------
    // State conflicts
    // ------------------------------------------------------------------
    /// Stake withdrawal attempted before tranche expiry.
    #[error("Tranche {tranche_id} has not expired yet (expires at {expires_at})")]
    TrancheNotYetExpired {
        tranche_id: TrancheId,
        expires_at: Timestamp,
    },

    /// Requested cover does not fit in the remaining capacity.
    #[error("Insufficient capacity: requested {requested} allocation units, {available} available")]
    InsufficientCapacity { requested: u64, available: u64 },

    /// Sum of target weights would exceed the pool ceiling.
    #[error("Total target weight {total} exceeds the maximum of {max}")]
    TotalTargetWeightExceeded { total: u32, max: u32 },

    /// Sum of effective weights would grow beyond the pool ceiling.
    #[error("Total effective weight {total} exceeds the maximum of {max}")]
    TotalEffectiveWeightExceeded { total: u32, max: u32 },

    /// Tranche stake was burned to zero while shares are still outstanding.
    #[error("Tranche {0} has no stake left backing its shares")]
    TrancheDepleted(TrancheId),

    /// Product is deprecated in the catalog and cannot take new cover.
    #[error("Product {0} is deprecated")]
    ProductDeprecated(ProductId),

    /// Cover id already has an allocation in this pool.
    #[error("Cover {0} already has an allocation in this pool")]
    AllocationAlreadyExists(CoverId),

    /// Custody account or pool balance too small.
    #[error("Insufficient balance: needed {needed} wei but only {available} wei available")]
    InsufficientBalance { needed: Wei, available: Wei },

    // ------------------------------------------------------------------
    // Not found
    // ------------------------------------------------------------------
    #[error("Staking pool {0} does not exist")]
    PoolDoesNotExist(PoolId),

    #[error("Product {0} does not exist in the cover catalog")]
    ProductDoesntExist(ProductId),

    #[error("Product {product_id} is not listed in pool {pool_id}")]
    ProductNotInPool { pool_id: PoolId, product_id: ProductId },

    #[error("Position {0} has not been minted")]
    NotMinted(PositionId),

    #[error("No allocation found for cover {0}")]
    AllocationNotFound(CoverId),

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------
    #[error("Math overflow in {0}")]
    MathOverflow(&'static str),
}

impl NacreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NacreError::InsufficientDeposit
            | NacreError::InvalidTrancheId { .. }
            | NacreError::OnlyManager(_)
            | NacreError::NotTokenOwnerOrApproved(_)
            | NacreError::InvalidStakingPoolForToken { .. }
            | NacreError::PrivatePool(_)
            | NacreError::TargetWeightTooHigh(_)
            | NacreError::TargetPriceTooHigh(_)
            | NacreError::TargetPriceBelowMin { .. }
            | NacreError::MustSetPriceForNewProducts(_)
            | NacreError::MustRecalculateEffectiveWeight(_)
            | NacreError::PoolFeeExceedsMax { .. }
            | NacreError::CoverPeriodOutOfRange { .. }
            | NacreError::InvalidAmount(_)
            | NacreError::InvalidRecipient
            | NacreError::WrongFrom(_)
            | NacreError::NotAuthorized(_) => ErrorKind::InputValidation,

            NacreError::TrancheNotYetExpired { .. }
            | NacreError::InsufficientCapacity { .. }
            | NacreError::TotalTargetWeightExceeded { .. }
            | NacreError::TotalEffectiveWeightExceeded { .. }
            | NacreError::TrancheDepleted(_)
            | NacreError::ProductDeprecated(_)
            | NacreError::AllocationAlreadyExists(_)
            | NacreError::InsufficientBalance { .. } => ErrorKind::StateConflict,

            NacreError::PoolDoesNotExist(_)
            | NacreError::ProductDoesntExist(_)
            | NacreError::ProductNotInPool { .. }
            | NacreError::NotMinted(_)
            | NacreError::AllocationNotFound(_) => ErrorKind::NotFound,

            NacreError::MathOverflow(_) => ErrorKind::Arithmetic,
        }
    }
}
