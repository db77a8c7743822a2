//! Conversions between raw ERC1155 outcome-token units and decimal shares.
//!
//! Outcome tokens share USDC's 6 decimals: 1 share = 1_000_000 raw units.

use alloy::primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub const SHARE_DECIMALS: u32 = 6;

const RAW_PER_SHARE: u64 = 1_000_000;

/// Truncates to 6 decimals; negative sizes clamp to zero.
pub fn shares_to_raw(shares: Decimal) -> U256 {
    if shares.is_sign_negative() {
        return U256::ZERO;
    }
    (shares * Decimal::from(RAW_PER_SHARE))
        .trunc()
        .to_u128()
        .map(U256::from)
        .unwrap_or(U256::ZERO)
}

/// Values that do not fit a Decimal saturate at `Decimal::MAX`.
pub fn raw_to_shares(raw: U256) -> Decimal {
    u128::try_from(raw)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .and_then(|v| Decimal::try_from_i128_with_scale(v, SHARE_DECIMALS).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

/// Formats a list of raw amounts as shares, e.g. `[10.5, 0]`.
pub fn format_amounts(amounts: &[U256]) -> String {
    let parts: Vec<String> = amounts.iter().map(|a| raw_to_shares(*a).to_string()).collect();
    format!("[{}]", parts.join(", "))
}
