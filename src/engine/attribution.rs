//! Balance attribution between traders and liquidity providers.
//!
//! All amounts are decimal-N integers of the pool token. Conversion to
//! [`Decimal`] happens only when the final balance list is built.

use crate::domain::{Address, Balance, Decimal};
use ethers_core::types::{U256, U512};
use std::collections::BTreeMap;

/// Trader margin per lowercase address.
pub type TraderBalances = BTreeMap<Address, U256>;

/// Sum per-market trader cash into one balance per address.
///
/// The perpetual proxy is never a trader. Returns the map and its total.
pub fn sum_trader_cash<I>(entries: I, perp_proxy: &Address) -> (TraderBalances, U256)
where
    I: IntoIterator<Item = (Address, U256)>,
{
    let mut balances = TraderBalances::new();
    let mut total = U256::zero();
    for (trader, cash) in entries {
        if &trader == perp_proxy {
            continue;
        }
        let entry = balances.entry(trader).or_insert_with(U256::zero);
        *entry = entry.saturating_add(cash);
        total = total.saturating_add(cash);
    }
    (balances, total)
}

/// Move strategy-wallet balances onto their delegates.
///
/// Applies only when both trader and delegate hold a trader entry. Each
/// trader's own balance moves at most once (to the first matching row), and
/// balances received through delegation are never forwarded again. The sum
/// over all entries is unchanged.
pub fn reassign_delegates(balances: &mut TraderBalances, delegates: &[(Address, Address)]) {
    let mut own = balances.clone();
    let mut received = TraderBalances::new();

    for (trader, delegate) in delegates {
        if trader == delegate || !balances.contains_key(trader) || !balances.contains_key(delegate)
        {
            continue;
        }
        let Some(amount) = own.get_mut(trader) else {
            continue;
        };
        let moved = std::mem::take(amount);
        if !moved.is_zero() {
            let entry = received.entry(delegate.clone()).or_insert_with(U256::zero);
            *entry = entry.saturating_add(moved);
        }
    }

    for (addr, value) in balances.iter_mut() {
        let kept = own.get(addr).copied().unwrap_or_default();
        let got = received.get(addr).copied().unwrap_or_default();
        *value = kept.saturating_add(got);
    }
}

/// Pro-rata share of the pool's free custody for each share balance.
///
/// `attributed = floor(share * max(0, custody - trader_total) / total_supply)`;
/// every entry is zero when the supply is zero.
pub fn attribute_lp_balances(
    shares: &[U256],
    total_supply: U256,
    custody: U256,
    trader_total: U256,
) -> Vec<U256> {
    if total_supply.is_zero() {
        return vec![U256::zero(); shares.len()];
    }
    let remainder = custody.saturating_sub(trader_total);
    let denominator = U512::from(total_supply);
    shares
        .iter()
        .map(|share| {
            if share.is_zero() {
                return U256::zero();
            }
            let product: U512 = share.full_mul(remainder);
            U256::try_from(product / denominator).unwrap_or(U256::MAX)
        })
        .collect()
}

/// Merge LP and trader amounts into the reported balance list.
///
/// `lp[i]` belongs to `addresses[i]`. Each trader entry is consumed once.
/// With `exact` every requested address is reported, zero or not; otherwise
/// zeros are omitted and trader-only addresses follow in address order.
pub fn combine_balances(
    addresses: &[Address],
    exact: bool,
    lp: &[U256],
    mut traders: TraderBalances,
    decimals: u8,
) -> Vec<Balance> {
    let mut out = Vec::with_capacity(addresses.len() + traders.len());

    for (i, addr) in addresses.iter().enumerate() {
        let mut amount = lp.get(i).copied().unwrap_or_default();
        if let Some(cash) = traders.remove(addr) {
            amount = amount.saturating_add(cash);
        }
        if amount.is_zero() && !exact {
            continue;
        }
        out.push(Balance::new(addr.clone(), Decimal::from_dec_n(amount, decimals)));
    }

    if exact {
        return out;
    }
    for (addr, amount) in traders {
        if amount.is_zero() {
            continue;
        }
        out.push(Balance::new(addr, Decimal::from_dec_n(amount, decimals)));
    }
    out
}
