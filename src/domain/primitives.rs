//! Domain primitives: Address, BlockNumber, ChainId.

use ethers_core::types::H160;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Block height on the indexed chain.
pub type BlockNumber = u64;

/// EVM chain identifier.
pub type ChainId = u64;

/// EVM account address, normalized to lowercase `0x` + 40 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl Address {
    /// The zero address (mint source / burn sink of ERC-20 transfers).
    pub fn zero() -> Self {
        Address::from_h160(&H160::zero())
    }

    pub fn from_h160(addr: &H160) -> Self {
        Address(format!("0x{}", hex::encode(addr.as_bytes())))
    }

    pub fn to_h160(&self) -> H160 {
        // Construction guarantees 20 bytes of valid hex.
        let mut bytes = [0u8; 20];
        if hex::decode_to_slice(&self.0[2..], &mut bytes).is_err() {
            return H160::zero();
        }
        H160::from(bytes)
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EIP-55 mixed-case representation.
    pub fn to_checksum(&self) -> String {
        ethers_core::utils::to_checksum(&self.to_h160(), None)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("0x")
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Address(format!("0x{}", hex_part.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::from_str(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl From<H160> for Address {
    fn from(value: H160) -> Self {
        Address::from_h160(&value)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
