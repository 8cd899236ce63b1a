//! Lossless decimal numeric type backed by rust_decimal.
//!
//! On-chain amounts are integers with an implicit number of fractional digits
//! (decimal-N). They stay integers through the attribution math and are only
//! turned into `Decimal` for reporting.

use ethers_core::types::U256;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for reported balances.
///
/// Serializes to a JSON number (not string).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Interpret `raw` as a decimal-N integer with `decimals` fractional digits.
    ///
    /// Values wider than the 96-bit mantissa lose their least significant
    /// fractional digits rather than failing.
    pub fn from_dec_n(raw: U256, decimals: u8) -> Self {
        let mut value = raw;
        let mut scale = u32::from(decimals);
        let i128_max = U256::from(i128::MAX as u128);
        loop {
            if value <= i128_max {
                if let Ok(d) = RustDecimal::try_from_i128_with_scale(value.as_u128() as i128, scale)
                {
                    return Decimal(d);
                }
            }
            if scale == 0 {
                return Decimal(RustDecimal::MAX);
            }
            value /= U256::from(10u8);
            scale -= 1;
        }
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RustDecimal::from_str(s).map(Decimal)
    }
}
