use ethers_core::types::U256;

/// Convert a signed ABDK 64.64 fixed-point value to a decimal-N integer.
///
/// Computes `raw * 10^decimals >> 64`. Negative values clamp to zero.
pub fn abdk_to_dec_n(raw: i128, decimals: u8) -> U256 {
    if raw <= 0 {
        return U256::zero();
    }
    let scale = U256::exp10(usize::from(decimals));
    match U256::from(raw as u128).checked_mul(scale) {
        Some(scaled) => scaled >> 64,
        None => U256::MAX,
    }
}
