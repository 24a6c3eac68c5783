// crates/nacre-staking/src/lib.rs
//
// nacre-staking: the staking-pool ledger behind Nacre cover capacity.
//
// Stakers lock NXM into time-boxed tranches of a pool; the pool manager
// spreads the pool's capacity across cover products by weight; cover
// purchases allocate that capacity, pay a premium, and stream part of it
// back to stakers as rewards. All token amounts are in wei of NXM and
// every operation takes `now` explicitly.

pub mod burn;
pub mod capacity;
pub mod catalog;
pub mod custody;
pub mod expiration;
pub mod math;
pub mod nft;
pub mod pool;
pub mod pricing;
pub mod registry;
pub mod rewards;
pub mod token;
pub mod tranche;
pub mod weights;

// Re-export key types for ergonomic access from downstream crates.
pub use burn::{BurnRequest, BurnResult};
pub use capacity::{
    full_capacity_units, AllocationOutcome, AllocationRequest, CapacitySnapshot, CoverAllocation,
    DeallocationOutcome, MAX_COVER_PERIOD, MIN_COVER_PERIOD,
};
pub use catalog::{
    CatalogProduct, CoverCatalog, PriceAndCapacityRatios, DEFAULT_GLOBAL_CAPACITY_RATIO,
    DEFAULT_GRACE_PERIOD,
};
pub use custody::{PoolBalances, TokenController};
pub use nft::{StakingNft, TokenInfo};
pub use pool::{PoolSettings, PoolSummary, StakingPool, TrancheView, MAX_POOL_FEE_LIMIT};
pub use pricing::{calculate_premium, PremiumQuote, PriceBump, TARGET_PRICE_DENOMINATOR};
pub use registry::{CreatePoolParams, ProductInitParams, StakingPools};
pub use rewards::{ACC_PRECISION, DEFAULT_REWARD_RATIO};
pub use token::{units_to_wei, Nxm, NXM_PER_ALLOCATION_UNIT};
pub use tranche::{
    bucket_id_at, tranche_end, tranche_id_at, Deposit, ExpiredTranche, Tranche, WithdrawOutcome,
    BUCKET_DURATION, MAX_ACTIVE_TRANCHES, TRANCHE_DURATION,
};
pub use weights::{
    ProductWeight, StakedProduct, StakedProductParam, MAX_TOTAL_WEIGHT, WEIGHT_DENOMINATOR,
};

/// Ledger with the in-memory token controller and position NFT.
pub type InMemoryPools = StakingPools<TokenController, StakingNft>;
