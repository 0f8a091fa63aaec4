use alloy::primitives::U256;
use rust_decimal::Decimal;

/// Largest scale a `Decimal` can carry.
const MAX_DECIMAL_SCALE: u8 = 28;

/// Converts raw on-chain token units into a ledger amount.
///
/// Returns `None` if the value does not fit a `Decimal` at the token's scale.
pub fn token_units_to_decimal(units: U256, decimals: u8) -> Option<Decimal> {
    if decimals > MAX_DECIMAL_SCALE || units > U256::from(u128::MAX) {
        return None;
    }
    let mantissa = i128::try_from(units.to::<u128>()).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(decimals))
        .ok()
        .map(|d| d.normalize())
}

/// Converts a ledger amount into raw token units, truncating precision the token
/// cannot represent. Negative amounts have no unit representation.
pub fn decimal_to_token_units(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() || decimals > MAX_DECIMAL_SCALE {
        return None;
    }
    let truncated = amount.trunc_with_scale(u32::from(decimals));
    let mantissa = u128::try_from(truncated.mantissa()).ok()?;
    let missing_scale = u32::from(decimals) - truncated.scale();
    let factor = U256::from(10u8).pow(U256::from(missing_scale));
    U256::from(mantissa).checked_mul(factor)
}
