//! Reported balance entry.

use crate::domain::{Address, Decimal};
use serde::{Deserialize, Serialize};

/// Effective balance of one address, in pool token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: Address,
    #[serde(rename = "effective_balance")]
    pub effective_balance: Decimal,
}

impl Balance {
    pub fn new(address: Address, effective_balance: Decimal) -> Self {
        Self {
            address,
            effective_balance,
        }
    }
}
