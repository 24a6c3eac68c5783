// crates/nacre-core/src/lib.rs
//
// nacre-core: Core identifiers, error taxonomy, and collaborator traits for
// the Nacre staking-pool ledger.
//
// This is the leaf crate that every other crate in the workspace depends on.
// It defines the identities (accounts, pools, products, positions, tranches),
// the protocol-wide error type, and the interfaces the ledger consumes from
// its external collaborators (token custody and position ownership).

pub mod error;
pub mod identity;
pub mod traits;
pub mod units;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use nacre_core::{AccountId, NacreError};`

pub use identity::{AccountId, BucketId, CoverId, PoolId, PositionId, ProductId, TrancheId};

pub use error::{ErrorKind, NacreError};

pub use traits::{PositionRegistry, TokenCustody};

pub use units::{Timestamp, Wei, DAY, ONE_NXM, YEAR};
