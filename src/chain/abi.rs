//! Calldata builders and decoders for the handful of contracts we read:
//! ERC-20 tokens, the perpetual manager proxy and Multicall3.

use super::{ChainError, ChainLog};
use crate::domain::{Address, DelegateRecord, TransferRecord};
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{H160, H256, U256};
use ethers_core::utils::{id, keccak256};

pub const BALANCE_OF: &str = "balanceOf(address)";
pub const TOTAL_SUPPLY: &str = "totalSupply()";
pub const DECIMALS: &str = "decimals()";
pub const GET_AVAILABLE_CASH: &str = "getAvailableCash(uint24,address)";
pub const COUNT_ACTIVE_PERP_ACCOUNTS: &str = "countActivePerpAccounts(uint24)";
pub const GET_ACTIVE_PERP_ACCOUNTS_BY_CHUNKS: &str =
    "getActivePerpAccountsByChunks(uint24,uint256,uint256)";
pub const AGGREGATE3: &str = "aggregate3((address,bool,bytes)[])";

pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";
pub const SET_DELEGATE_EVENT: &str = "SetDelegate(address,address,uint256)";

pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(abi::encode(args));
    data
}

pub fn balance_of(owner: H160) -> Vec<u8> {
    encode_call(BALANCE_OF, &[Token::Address(owner)])
}

pub fn total_supply() -> Vec<u8> {
    encode_call(TOTAL_SUPPLY, &[])
}

pub fn decimals() -> Vec<u8> {
    encode_call(DECIMALS, &[])
}

pub fn get_available_cash(perp_id: u32, trader: H160) -> Vec<u8> {
    encode_call(
        GET_AVAILABLE_CASH,
        &[Token::Uint(U256::from(perp_id)), Token::Address(trader)],
    )
}

pub fn count_active_perp_accounts(perp_id: u32) -> Vec<u8> {
    encode_call(COUNT_ACTIVE_PERP_ACCOUNTS, &[Token::Uint(U256::from(perp_id))])
}

pub fn get_active_perp_accounts_by_chunks(perp_id: u32, from: u64, to: u64) -> Vec<u8> {
    encode_call(
        GET_ACTIVE_PERP_ACCOUNTS_BY_CHUNKS,
        &[
            Token::Uint(U256::from(perp_id)),
            Token::Uint(U256::from(from)),
            Token::Uint(U256::from(to)),
        ],
    )
}

pub fn aggregate3(calls: &[(H160, Vec<u8>)]) -> Vec<u8> {
    let entries = calls
        .iter()
        .map(|(target, data)| {
            Token::Tuple(vec![
                Token::Address(*target),
                Token::Bool(true),
                Token::Bytes(data.clone()),
            ])
        })
        .collect();
    encode_call(AGGREGATE3, &[Token::Array(entries)])
}

/// Split calldata into selector and ABI-decoded arguments.
pub fn decode_call(types: &[ParamType], data: &[u8]) -> Result<([u8; 4], Vec<Token>), ChainError> {
    if data.len() < 4 {
        return Err(ChainError::Decode("calldata shorter than selector".to_string()));
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    let args = abi::decode(types, &data[4..]).map_err(|e| ChainError::Decode(e.to_string()))?;
    Ok((sel, args))
}

pub fn aggregate3_param_types() -> Vec<ParamType> {
    vec![ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Bool,
        ParamType::Bytes,
    ])))]
}

pub fn aggregate3_result_types() -> Vec<ParamType> {
    vec![ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Bool,
        ParamType::Bytes,
    ])))]
}

pub fn decode_uint(data: &[u8]) -> Result<U256, ChainError> {
    if data.len() < 32 {
        return Err(ChainError::Decode(format!(
            "expected 32-byte word, got {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_big_endian(&data[..32]))
}

/// Decode a sign-extended `int128` return word.
pub fn decode_int128(data: &[u8]) -> Result<i128, ChainError> {
    if data.len() < 32 {
        return Err(ChainError::Decode(format!(
            "expected 32-byte word, got {} bytes",
            data.len()
        )));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&data[16..32]);
    Ok(i128::from_be_bytes(low))
}

pub fn decode_u8(data: &[u8]) -> Result<u8, ChainError> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return Err(ChainError::Decode(format!("uint8 out of range: {}", value)));
    }
    Ok(value.low_u32() as u8)
}

pub fn decode_address_array(data: &[u8]) -> Result<Vec<H160>, ChainError> {
    let tokens = abi::decode(&[ParamType::Array(Box::new(ParamType::Address))], data)
        .map_err(|e| ChainError::Decode(e.to_string()))?;
    match tokens.into_iter().next() {
        Some(Token::Array(items)) => items
            .into_iter()
            .map(|t| match t {
                Token::Address(a) => Ok(a),
                other => Err(ChainError::Decode(format!("expected address, got {:?}", other))),
            })
            .collect(),
        other => Err(ChainError::Decode(format!(
            "expected address array, got {:?}",
            other
        ))),
    }
}

pub fn encode_uint(value: U256) -> Vec<u8> {
    abi::encode(&[Token::Uint(value)])
}

/// Encode an `int128` return word (sign-extended to 32 bytes).
pub fn encode_int128(value: i128) -> Vec<u8> {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = vec![fill; 16];
    word.extend_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_address_array(addrs: &[H160]) -> Vec<u8> {
    abi::encode(&[Token::Array(
        addrs.iter().map(|a| Token::Address(*a)).collect(),
    )])
}

pub fn transfer_topic() -> H256 {
    H256::from(keccak256(TRANSFER_EVENT))
}

pub fn set_delegate_topic() -> H256 {
    H256::from(keccak256(SET_DELEGATE_EVENT))
}

/// Left-pad an address into an indexed topic.
pub fn address_topic(addr: H160) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    H256::from(word)
}

fn topic_address(log: &ChainLog, position: usize) -> Result<Address, ChainError> {
    let topic = log.topics.get(position).ok_or_else(|| {
        ChainError::Decode(format!(
            "log at block {} missing topic {}",
            log.block_number, position
        ))
    })?;
    Ok(Address::from_h160(&H160::from_slice(&topic.as_bytes()[12..])))
}

pub fn decode_transfer(log: &ChainLog) -> Result<TransferRecord, ChainError> {
    Ok(TransferRecord {
        from: topic_address(log, 1)?,
        to: topic_address(log, 2)?,
        block_number: log.block_number,
    })
}

pub fn decode_set_delegate(log: &ChainLog) -> Result<DelegateRecord, ChainError> {
    let index = decode_uint(&log.data)?;
    let index = if index > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        index.low_u64() as i64
    };
    Ok(DelegateRecord {
        trader: topic_address(log, 1)?,
        delegate: topic_address(log, 2)?,
        index,
        block_number: log.block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erc20_selectors() {
        assert_eq!(hex::encode(selector(BALANCE_OF)), "70a08231");
        assert_eq!(hex::encode(selector(TOTAL_SUPPLY)), "18160ddd");
        assert_eq!(hex::encode(selector(DECIMALS)), "313ce567");
        assert_eq!(hex::encode(selector(AGGREGATE3)), "82ad56cb");
    }

    #[test]
    fn test_transfer_topic() {
        assert_eq!(
            format!("{:?}", transfer_topic()),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_int128_roundtrip_negative() {
        let word = encode_int128(-42);
        assert_eq!(word.len(), 32);
        assert_eq!(decode_int128(&word).unwrap(), -42);
        assert_eq!(decode_int128(&encode_int128(i128::MAX)).unwrap(), i128::MAX);
    }

    #[test]
    fn test_decode_uint_short_payload() {
        assert!(matches!(decode_uint(&[0u8; 4]), Err(ChainError::Decode(_))));
    }

    #[test]
    fn test_decode_transfer_log() {
        let from = H160::from_low_u64_be(1);
        let to = H160::from_low_u64_be(2);
        let log = ChainLog {
            address: H160::zero(),
            block_number: 99,
            topics: vec![transfer_topic(), address_topic(from), address_topic(to)],
            data: encode_uint(U256::from(5u8)),
        };
        let record = decode_transfer(&log).unwrap();
        assert_eq!(record.from, Address::from_h160(&from));
        assert_eq!(record.to, Address::from_h160(&to));
        assert_eq!(record.block_number, 99);
    }

    #[test]
    fn test_decode_set_delegate_missing_topic() {
        let log = ChainLog {
            address: H160::zero(),
            block_number: 1,
            topics: vec![set_delegate_topic()],
            data: encode_uint(U256::from(2u8)),
        };
        assert!(decode_set_delegate(&log).is_err());
    }

    #[test]
    fn test_decode_call_arguments() {
        let trader = H160::from_low_u64_be(7);
        let data = get_available_cash(100_001, trader);
        let (sel, args) =
            decode_call(&[ParamType::Uint(24), ParamType::Address], &data).unwrap();
        assert_eq!(sel, selector(GET_AVAILABLE_CASH));
        assert_eq!(args[0], Token::Uint(U256::from(100_001u32)));
        assert_eq!(args[1], Token::Address(trader));
    }
}
