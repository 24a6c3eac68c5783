// crates/nacre-staking/src/token.rs
//
// NXM amount type and allocation-unit conversions.
//
// Ledger balances are plain `Wei` (u128). Cover capacity is tracked in
// coarser allocation units: 1 unit = 0.01 NXM = 10^16 wei, so a tranche's
// allocation fits comfortably in a u64.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use nacre_core::{NacreError, Wei, ONE_NXM};

/// Allocation units per NXM.
pub const ALLOCATION_UNITS_PER_NXM: u128 = 100;

/// Wei per allocation unit. 1 unit = 10^16 wei.
pub const NXM_PER_ALLOCATION_UNIT: Wei = ONE_NXM / ALLOCATION_UNITS_PER_NXM;

/// Decimal places of NXM.
const NXM_DECIMALS: usize = 18;

/// An NXM token amount.
///
/// Wraps an amount in wei. Used at the edges (CLI, scenarios, log lines)
/// where amounts are read or shown in whole NXM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nxm {
    /// Amount in wei (1 NXM = 10^18 wei).
    pub wei: Wei,
}

impl Nxm {
    /// Create an amount from whole NXM.
    pub fn from_nxm(amount: u64) -> Self {
        Self {
            wei: amount as Wei * ONE_NXM,
        }
    }

    /// Create an amount from wei.
    pub fn from_wei(wei: Wei) -> Self {
        Self { wei }
    }

    /// Returns zero NXM.
    pub fn zero() -> Self {
        Self { wei: 0 }
    }

    /// Parse a decimal NXM string such as `"300000"` or `"12.5"`.
    ///
    /// # Errors
    /// Returns `NacreError::InvalidAmount` for malformed input, more than 18
    /// decimal places, or a value that does not fit in a u128.
    pub fn parse(input: &str) -> Result<Self, NacreError> {
        let trimmed = input.trim().trim_end_matches("NXM").trim();
        let invalid = || NacreError::InvalidAmount(format!("cannot parse '{}' as NXM", input));

        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > NXM_DECIMALS
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole_wei = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| invalid())?
                .checked_mul(ONE_NXM)
                .ok_or_else(invalid)?
        };
        let frac_wei = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = NXM_DECIMALS);
            padded.parse::<u128>().map_err(|_| invalid())?
        };

        whole_wei
            .checked_add(frac_wei)
            .map(Self::from_wei)
            .ok_or_else(invalid)
    }

    /// Number of allocation units needed to cover this amount, rounded up.
    pub fn to_allocation_units(&self) -> u128 {
        self.wei.div_ceil(NXM_PER_ALLOCATION_UNIT)
    }
}

/// Convert allocation units back to wei.
pub fn units_to_wei(units: u64) -> Wei {
    units as Wei * NXM_PER_ALLOCATION_UNIT
}

impl Add for Nxm {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            wei: self.wei.saturating_add(rhs.wei),
        }
    }
}

impl Sub for Nxm {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            wei: self.wei.saturating_sub(rhs.wei),
        }
    }
}

impl fmt::Display for Nxm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.wei / ONE_NXM;
        let frac = self.wei % ONE_NXM;
        if frac == 0 {
            write!(f, "{} NXM", whole)
        } else {
            let frac_str = format!("{:018}", frac);
            let trimmed = frac_str.trim_end_matches('0');
            write!(f, "{}.{} NXM", whole, trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_unit_size() {
        assert_eq!(NXM_PER_ALLOCATION_UNIT, 10u128.pow(16));
        assert_eq!(units_to_wei(100), ONE_NXM);
    }

    #[test]
    fn test_from_nxm() {
        assert_eq!(Nxm::from_nxm(3).wei, 3 * ONE_NXM);
    }

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(Nxm::parse("300000").unwrap(), Nxm::from_nxm(300_000));
        assert_eq!(Nxm::parse("1.5").unwrap().wei, 1_500_000_000_000_000_000);
        assert_eq!(Nxm::parse("0.000000000000000001").unwrap().wei, 1);
        assert_eq!(Nxm::parse("2 NXM").unwrap(), Nxm::from_nxm(2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Nxm::parse("").is_err());
        assert!(Nxm::parse("abc").is_err());
        assert!(Nxm::parse("-1").is_err());
        assert!(Nxm::parse("1.0000000000000000001").is_err());
    }

    #[test]
    fn test_allocation_units_round_up() {
        assert_eq!(Nxm::from_wei(1).to_allocation_units(), 1);
        assert_eq!(Nxm::from_nxm(1).to_allocation_units(), 100);
        assert_eq!(Nxm::from_wei(ONE_NXM + 1).to_allocation_units(), 101);
    }

    #[test]
    fn test_sub_saturating() {
        let c = Nxm::from_nxm(1) - Nxm::from_nxm(2);
        assert_eq!(c.wei, 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Nxm::from_nxm(42).to_string(), "42 NXM");
        assert_eq!(Nxm::from_wei(1_500_000_000_000_000_000).to_string(), "1.5 NXM");
        assert_eq!(Nxm::zero().to_string(), "0 NXM");
    }
}
