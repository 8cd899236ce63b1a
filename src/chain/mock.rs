//! In-memory chain for tests: simulates ERC-20 tokens, the perpetual manager,
//! Multicall3 and a log store, with failure injection.

use super::abi;
use super::multicall::{self, CallOutcome};
use super::{ChainClient, ChainError, ChainLog, LogQuery};
use async_trait::async_trait;
use ethers_core::abi::{ParamType, Token};
use ethers_core::types::{H160, U256};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct Erc20State {
    balances: HashMap<H160, U256>,
    total_supply: U256,
    decimals: u8,
}

#[derive(Debug, Default, Clone)]
struct PerpState {
    active: HashMap<u32, Vec<H160>>,
    cash: HashMap<(u32, H160), i128>,
}

/// Fail `get_logs` on `address` for any window covering `block` that spans
/// more than `max_span` blocks.
#[derive(Debug, Clone, Copy)]
struct LogFailure {
    address: H160,
    block: u64,
    max_span: u64,
}

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    unreachable: bool,
    contracts: HashSet<H160>,
    tokens: HashMap<H160, Erc20State>,
    perp_proxy: Option<H160>,
    perp: PerpState,
    multicall: Option<H160>,
    logs: Vec<ChainLog>,
    log_failure: Option<LogFailure>,
    failing_calls: usize,
    call_counts: HashMap<[u8; 4], usize>,
    log_queries: Vec<LogQuery>,
}

/// Mock chain returning predefined contract state.
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        let multicall = H160::from_str(multicall::DEFAULT_MULTICALL_ADDRESS)
            .unwrap_or_else(|_| H160::zero());
        {
            let mut state = chain.lock();
            state.multicall = Some(multicall);
            state.contracts.insert(multicall);
        }
        chain
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// An endpoint that refuses every request.
    pub fn unreachable() -> Self {
        let chain = Self::new();
        chain.lock().unreachable = true;
        chain
    }

    pub fn with_head(self, head: u64) -> Self {
        self.set_head(head);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    pub fn with_token(self, token: H160, decimals: u8, total_supply: U256) -> Self {
        {
            let mut state = self.lock();
            state.contracts.insert(token);
            let entry = state.tokens.entry(token).or_default();
            entry.decimals = decimals;
            entry.total_supply = total_supply;
        }
        self
    }

    pub fn with_token_balance(self, token: H160, holder: H160, amount: U256) -> Self {
        self.lock()
            .tokens
            .entry(token)
            .or_default()
            .balances
            .insert(holder, amount);
        self
    }

    pub fn with_perp_proxy(self, proxy: H160) -> Self {
        {
            let mut state = self.lock();
            state.contracts.insert(proxy);
            state.perp_proxy = Some(proxy);
        }
        self
    }

    /// Register an active trader with raw ABDK 64.64 available cash.
    pub fn with_trader(self, perp_id: u32, trader: H160, cash_abdk: i128) -> Self {
        {
            let mut state = self.lock();
            let active = state.perp.active.entry(perp_id).or_default();
            if !active.contains(&trader) {
                active.push(trader);
            }
            state.perp.cash.insert((perp_id, trader), cash_abdk);
        }
        self
    }

    pub fn with_transfer(self, token: H160, from: H160, to: H160, block: u64) -> Self {
        self.push_log(ChainLog {
            address: token,
            block_number: block,
            topics: vec![
                abi::transfer_topic(),
                abi::address_topic(from),
                abi::address_topic(to),
            ],
            data: abi::encode_uint(U256::one()),
        });
        self
    }

    pub fn with_set_delegate(
        self,
        proxy: H160,
        trader: H160,
        delegate: H160,
        index: u64,
        block: u64,
    ) -> Self {
        self.push_log(ChainLog {
            address: proxy,
            block_number: block,
            topics: vec![
                abi::set_delegate_topic(),
                abi::address_topic(trader),
                abi::address_topic(delegate),
            ],
            data: abi::encode_uint(U256::from(index)),
        });
        self
    }

    pub fn push_log(&self, log: ChainLog) {
        self.lock().logs.push(log);
    }

    /// Make log windows on `address` covering `block` and wider than
    /// `max_span` fail.
    pub fn with_log_failure(self, address: H160, block: u64, max_span: u64) -> Self {
        self.lock().log_failure = Some(LogFailure {
            address,
            block,
            max_span,
        });
        self
    }

    /// Fail the next `n` top-level `call`s with a network error.
    pub fn fail_next_calls(&self, n: usize) {
        self.lock().failing_calls = n;
    }

    /// Number of executed calls (including calls inside multicall batches)
    /// for a function signature such as `"balanceOf(address)"`.
    pub fn call_count(&self, signature: &str) -> usize {
        self.lock()
            .call_counts
            .get(&abi::selector(signature))
            .copied()
            .unwrap_or(0)
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.lock().log_queries.clone()
    }

    fn dispatch(state: &mut MockState, target: H160, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        if !state.contracts.contains(&target) {
            return Err(ChainError::NoCode);
        }
        if data.len() < 4 {
            return Err(ChainError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
            });
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&data[..4]);
        *state.call_counts.entry(sel).or_default() += 1;

        if let Some(token) = state.tokens.get(&target) {
            if sel == abi::selector(abi::BALANCE_OF) {
                let (_, args) = abi::decode_call(&[ParamType::Address], data)?;
                let holder = expect_address(&args[0])?;
                let bal = token.balances.get(&holder).copied().unwrap_or_default();
                return Ok(abi::encode_uint(bal));
            }
            if sel == abi::selector(abi::TOTAL_SUPPLY) {
                return Ok(abi::encode_uint(token.total_supply));
            }
            if sel == abi::selector(abi::DECIMALS) {
                return Ok(abi::encode_uint(U256::from(token.decimals)));
            }
        }

        if state.perp_proxy == Some(target) {
            if sel == abi::selector(abi::GET_AVAILABLE_CASH) {
                let (_, args) =
                    abi::decode_call(&[ParamType::Uint(24), ParamType::Address], data)?;
                let perp_id = expect_uint(&args[0])?.low_u32();
                let trader = expect_address(&args[1])?;
                let cash = state
                    .perp
                    .cash
                    .get(&(perp_id, trader))
                    .copied()
                    .unwrap_or_default();
                return Ok(abi::encode_int128(cash));
            }
            if sel == abi::selector(abi::COUNT_ACTIVE_PERP_ACCOUNTS) {
                let (_, args) = abi::decode_call(&[ParamType::Uint(24)], data)?;
                let perp_id = expect_uint(&args[0])?.low_u32();
                let n = state.perp.active.get(&perp_id).map_or(0, Vec::len);
                return Ok(abi::encode_uint(U256::from(n)));
            }
            if sel == abi::selector(abi::GET_ACTIVE_PERP_ACCOUNTS_BY_CHUNKS) {
                let (_, args) = abi::decode_call(
                    &[ParamType::Uint(24), ParamType::Uint(256), ParamType::Uint(256)],
                    data,
                )?;
                let perp_id = expect_uint(&args[0])?.low_u32();
                let from = expect_uint(&args[1])?.low_u64() as usize;
                let to = expect_uint(&args[2])?.low_u64() as usize;
                let active = state.perp.active.get(&perp_id).cloned().unwrap_or_default();
                let to = to.min(active.len());
                let slice = if from < to { &active[from..to] } else { &[][..] };
                return Ok(abi::encode_address_array(slice));
            }
        }

        Err(ChainError::Rpc {
            code: 3,
            message: "execution reverted".to_string(),
        })
    }
}

fn expect_address(token: &Token) -> Result<H160, ChainError> {
    match token {
        Token::Address(a) => Ok(*a),
        other => Err(ChainError::Decode(format!("expected address, got {:?}", other))),
    }
}

fn expect_uint(token: &Token) -> Result<U256, ChainError> {
    match token {
        Token::Uint(u) => Ok(*u),
        other => Err(ChainError::Decode(format!("expected uint, got {:?}", other))),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let state = self.lock();
        if state.unreachable {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(state.head)
    }

    async fn call(
        &self,
        to: H160,
        data: Vec<u8>,
        _block: Option<u64>,
    ) -> Result<Vec<u8>, ChainError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            return Err(ChainError::Network("injected failure".to_string()));
        }
        if state.multicall == Some(to) {
            let requests = multicall::decode_request(&data)?;
            let outcomes: Vec<CallOutcome> = requests
                .into_iter()
                .map(|(target, cd)| match Self::dispatch(&mut state, target, &cd) {
                    Ok(out) => CallOutcome::Success(out),
                    Err(_) => CallOutcome::Reverted(Vec::new()),
                })
                .collect();
            return Ok(multicall::encode_results(&outcomes));
        }
        Self::dispatch(&mut state, to, &data)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ChainError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        state.log_queries.push(query.clone());
        let upper = query.to_block.unwrap_or(state.head);
        if let Some(failure) = state.log_failure {
            let span = upper.saturating_sub(query.from_block) + 1;
            let covers = query.address == failure.address
                && query.from_block <= failure.block
                && failure.block <= upper;
            if covers && span > failure.max_span {
                return Err(ChainError::Rpc {
                    code: -32005,
                    message: "query returned more than 10000 results".to_string(),
                });
            }
        }
        // "latest" also sees blocks produced after the head was read.
        let upper = query.to_block.unwrap_or(u64::MAX);
        let mut logs: Vec<ChainLog> = state
            .logs
            .iter()
            .filter(|log| {
                log.address == query.address
                    && log.topics.first() == Some(&query.topic0)
                    && log.block_number >= query.from_block
                    && log.block_number <= upper
            })
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.block_number);
        Ok(logs)
    }
}
