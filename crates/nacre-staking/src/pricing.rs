// crates/nacre-staking/src/pricing.rs
//
// Premium calculation.
//
// Prices are annual percentages over TARGET_PRICE_DENOMINATOR (10 000 =
// 100% per year). Each product carries a "bumped" price: every purchase
// raises it in proportion to the share of capacity bought, and it decays
// back toward the manager's target price by PRICE_CHANGE_PER_DAY. Cover
// bought past SURGE_THRESHOLD_RATIO utilization pays an extra surge
// premium that grows linearly with utilization.
//
// Everything here is pure; the caller stores the returned bump state.

use serde::{Deserialize, Serialize};

use nacre_core::{NacreError, Timestamp, Wei, DAY, YEAR};

use crate::math;
use crate::token::NXM_PER_ALLOCATION_UNIT;

/// Price denominator: 10 000 = 100% of the cover amount per year.
pub const TARGET_PRICE_DENOMINATOR: u32 = 10_000;

/// Decay of the bumped price toward the target: 1% per day.
pub const PRICE_CHANGE_PER_DAY: u32 = 100;

/// Price bump for buying the whole capacity: 20%.
pub const PRICE_BUMP_RATIO: u32 = 2_000;

/// Utilization above which surge pricing applies: 90%.
pub const SURGE_THRESHOLD_RATIO: u32 = 9_000;

/// Denominator of the surge threshold.
pub const SURGE_THRESHOLD_DENOMINATOR: u32 = 10_000;

/// Slope of the surge price ramp: at 100% utilization the surge price is
/// 200% × (1 − threshold) = 20% per year above base.
pub const SURGE_PRICE_RATIO: u32 = 20_000;

/// A product's last bumped price and when it was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBump {
    pub bumped_price: u32,
    pub updated_at: Timestamp,
}

/// Premium quote and the bump state to store if the purchase goes ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PremiumQuote {
    pub premium: Wei,
    pub base_price: u32,
    pub new_bump: PriceBump,
}

/// Current base price: the bumped price decayed by whole days elapsed,
/// never below `target_price`.
pub fn base_price(bump: &PriceBump, target_price: u32, now: Timestamp) -> u32 {
    let elapsed_days = now.saturating_sub(bump.updated_at) / DAY;
    let decay = elapsed_days.saturating_mul(PRICE_CHANGE_PER_DAY as u64);
    let decayed = (bump.bumped_price as u64).saturating_sub(decay) as u32;
    decayed.max(target_price)
}

/// Annual surge premium (in wei) for units `used..used + amount`.
///
/// The surge price at `x` units past the threshold is
/// `SURGE_PRICE_RATIO × x / capacity`, so the premium over `[a, b]` is the
/// area under that ramp: `SURGE_PRICE_RATIO × (b² − a²) / (2 × capacity)`.
pub fn surge_premium_per_year(
    amount_units: u64,
    used_units: u64,
    capacity_units: u64,
) -> Result<Wei, NacreError> {
    let threshold = (capacity_units as u128 * SURGE_THRESHOLD_RATIO as u128
        / SURGE_THRESHOLD_DENOMINATOR as u128) as u64;
    let final_units = used_units.saturating_add(amount_units);
    if final_units <= threshold {
        return Ok(0);
    }

    let end = (final_units - threshold) as u128;
    let start = used_units.saturating_sub(threshold) as u128;
    let area = math::mul(
        SURGE_PRICE_RATIO as u128,
        end * end - start * start,
        "surge premium",
    )?;
    let divisor = 2 * capacity_units as u128 * TARGET_PRICE_DENOMINATOR as u128;
    math::mul_div_ceil(area, NXM_PER_ALLOCATION_UNIT, divisor, "surge premium")
}

/// Premium for buying `amount_units` of cover for `period` seconds.
///
/// `used_units` and `capacity_units` describe the product's weighted
/// capacity over the tranches the cover will use, before the purchase.
///
/// # Errors
/// `InsufficientCapacity` when `capacity_units` is zero, `MathOverflow` on
/// arithmetic overflow.
pub fn calculate_premium(
    bump: &PriceBump,
    period: u64,
    amount_units: u64,
    used_units: u64,
    capacity_units: u64,
    target_price: u32,
    now: Timestamp,
) -> Result<PremiumQuote, NacreError> {
    if capacity_units == 0 {
        return Err(NacreError::InsufficientCapacity {
            requested: amount_units,
            available: 0,
        });
    }

    let base = base_price(bump, target_price, now);
    let amount_wei = amount_units as u128 * NXM_PER_ALLOCATION_UNIT;

    let base_per_year = math::mul_div_ceil(
        amount_wei,
        base as u128,
        TARGET_PRICE_DENOMINATOR as u128,
        "base premium",
    )?;
    let surge_per_year = surge_premium_per_year(amount_units, used_units, capacity_units)?;
    let per_year = math::add(base_per_year, surge_per_year, "premium")?;
    let premium = math::mul_div_ceil(per_year, period as u128, YEAR as u128, "premium")?;

    let bump_delta = math::mul_div(
        PRICE_BUMP_RATIO as u128,
        amount_units as u128,
        capacity_units as u128,
        "price bump",
    )?;
    let bumped_price = (base as u128)
        .saturating_add(bump_delta)
        .min(u32::MAX as u128) as u32;

    Ok(PremiumQuote {
        premium,
        base_price: base,
        new_bump: PriceBump {
            bumped_price,
            updated_at: now,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacre_core::ONE_NXM;

    fn bump(price: u32, at: Timestamp) -> PriceBump {
        PriceBump {
            bumped_price: price,
            updated_at: at,
        }
    }

    #[test]
    fn test_base_price_decays_toward_target() {
        let b = bump(500, 0);
        assert_eq!(base_price(&b, 200, 0), 500);
        assert_eq!(base_price(&b, 200, DAY - 1), 500);
        assert_eq!(base_price(&b, 200, DAY), 400);
        assert_eq!(base_price(&b, 200, 10 * DAY), 200);
    }

    #[test]
    fn test_annual_premium_without_surge() {
        // 100 NXM at 2% for a year: 2 NXM.
        let quote = calculate_premium(&bump(200, 0), YEAR, 10_000, 0, 1_000_000, 200, 0).unwrap();
        assert_eq!(quote.premium, 2 * ONE_NXM);
        assert_eq!(quote.base_price, 200);
    }

    #[test]
    fn test_premium_rounds_up() {
        let quote =
            calculate_premium(&bump(200, 0), 30 * DAY, 10_000, 0, 1_000_000, 200, 0).unwrap();
        // 2 NXM × 30 / 365 = 0.16438356164383561643...
        assert_eq!(quote.premium, 164_383_561_643_835_617);
    }

    #[test]
    fn test_bump_proportional_to_capacity_bought() {
        let quote = calculate_premium(&bump(100, 0), YEAR, 250, 0, 1_000, 100, 0).unwrap();
        // 25% of capacity: +20% × 0.25 = +500.
        assert_eq!(quote.new_bump.bumped_price, 600);
        assert_eq!(quote.new_bump.updated_at, 0);
    }

    #[test]
    fn test_bump_for_very_large_cover() {
        // 10^16 units: PRICE_BUMP_RATIO × amount no longer fits in a u64.
        let amount = 10_000_000_000_000_000u64;
        let quote = calculate_premium(&bump(100, 0), YEAR, amount, 0, 4 * amount, 100, 0).unwrap();
        assert_eq!(quote.new_bump.bumped_price, 600);
        assert_eq!(quote.premium, amount as u128 * NXM_PER_ALLOCATION_UNIT / 100);
    }

    #[test]
    fn test_surge_only_past_threshold() {
        assert_eq!(surge_premium_per_year(900, 0, 1_000).unwrap(), 0);
        assert!(surge_premium_per_year(901, 0, 1_000).unwrap() > 0);
    }

    #[test]
    fn test_full_capacity_surge() {
        // 1000 units = 10 NXM, at 1% base: 0.1 NXM/year base.
        // Surge over the top 100 units: 20000 × 100² / (2 × 1000 × 10000) units
        // = 10 units = 0.1 NXM.
        let quote = calculate_premium(&bump(100, 0), YEAR, 1_000, 0, 1_000, 100, 0).unwrap();
        assert_eq!(quote.premium, ONE_NXM / 5);
    }

    #[test]
    fn test_surge_split_purchases_match_single_purchase() {
        let single = surge_premium_per_year(100, 900, 1_000).unwrap();
        let first = surge_premium_per_year(50, 900, 1_000).unwrap();
        let second = surge_premium_per_year(50, 950, 1_000).unwrap();
        assert_eq!(first + second, single);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(calculate_premium(&bump(100, 0), YEAR, 1, 0, 0, 100, 0).is_err());
    }
}
