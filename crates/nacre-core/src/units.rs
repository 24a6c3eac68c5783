// crates/nacre-core/src/units.rs
//
// Monetary and time units shared by every crate.
//
// All token amounts are tracked in wei of NXM (the smallest unit).
// 1 NXM = 10^18 wei. Time is tracked in unix seconds and is always passed
// in explicitly by the caller; the ledger never reads a clock.

/// Type alias for wei — the smallest unit of NXM.
pub type Wei = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Number of wei in one NXM.
pub const ONE_NXM: Wei = 1_000_000_000_000_000_000;

/// Seconds in one day.
pub const DAY: u64 = 24 * 60 * 60;

/// Seconds in one (non-leap) year, used to scale annual prices.
pub const YEAR: u64 = 365 * DAY;
