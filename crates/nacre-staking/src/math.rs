// crates/nacre-staking/src/math.rs
//
// Checked fixed-point helpers.
//
// Share and stake products can exceed u128 (two 10^25-wei stakes multiply
// to 10^50), so `mul_div` falls back to a big-integer intermediate when the
// fast path overflows. The final quotient must still fit in a u128.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use nacre_core::NacreError;

/// `a * b / c`, rounded down.
///
/// # Errors
/// `MathOverflow(context)` when `c` is zero or the quotient exceeds u128.
pub fn mul_div(a: u128, b: u128, c: u128, context: &'static str) -> Result<u128, NacreError> {
    if c == 0 {
        return Err(NacreError::MathOverflow(context));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / c);
    }
    let quotient = BigUint::from(a) * BigUint::from(b) / BigUint::from(c);
    quotient.to_u128().ok_or(NacreError::MathOverflow(context))
}

/// `a * b / c`, rounded up.
///
/// # Errors
/// `MathOverflow(context)` when `c` is zero or the quotient exceeds u128.
pub fn mul_div_ceil(a: u128, b: u128, c: u128, context: &'static str) -> Result<u128, NacreError> {
    if c == 0 {
        return Err(NacreError::MathOverflow(context));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product.div_ceil(c));
    }
    let product = BigUint::from(a) * BigUint::from(b);
    let divisor = BigUint::from(c);
    let mut quotient = &product / &divisor;
    if !(product % &divisor).is_zero() {
        quotient += 1u32;
    }
    quotient.to_u128().ok_or(NacreError::MathOverflow(context))
}

/// Checked addition that names the failing computation.
pub fn add(a: u128, b: u128, context: &'static str) -> Result<u128, NacreError> {
    a.checked_add(b).ok_or(NacreError::MathOverflow(context))
}

/// Checked multiplication that names the failing computation.
pub fn mul(a: u128, b: u128, context: &'static str) -> Result<u128, NacreError> {
    a.checked_mul(b).ok_or(NacreError::MathOverflow(context))
}

/// Narrow to u64 (allocation units, weights).
pub fn to_u64(value: u128, context: &'static str) -> Result<u64, NacreError> {
    u64::try_from(value).map_err(|_| NacreError::MathOverflow(context))
}
