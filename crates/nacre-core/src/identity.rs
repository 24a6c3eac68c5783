// crates/nacre-core/src/identity.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a staking pool. Pools are numbered from 1.
pub type PoolId = u32;

/// Identifier of a cover product in the catalog.
pub type ProductId = u32;

/// Identifier of a staking position (the non-fungible ownership token).
/// Position ids are numbered from 1; 0 never names a position.
pub type PositionId = u64;

/// Index of a fixed-duration tranche since the unix epoch.
pub type TrancheId = u64;

/// Index of a fixed-duration cover-expiry bucket since the unix epoch.
pub type BucketId = u64;

/// Identifier of a cover, assigned by the cover-purchase collaborator.
pub type CoverId = u64;

/// Identity of an external account (staker, pool manager, cover buyer).
///
/// The ledger never verifies signatures; an `AccountId` is an opaque
/// 32-byte key handed in by the transaction-ordering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// The all-zero account. Never a valid recipient.
    pub const ZERO: AccountId = AccountId([0u8; 32]);

    /// Derive a deterministic account from a human-readable label.
    ///
    /// Used by the CLI scenarios and the test suites so that accounts can be
    /// referred to by name ("manager", "alice") instead of raw keys.
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        AccountId(key)
    }

    /// Whether this is the all-zero account.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Short hex form (first 6 bytes) for log lines and tables.
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
