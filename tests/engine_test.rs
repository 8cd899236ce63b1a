use ethers_core::types::{H160, U256};
use shareledger::chain::{ChainClient, MockChain};
use shareledger::datasource::LedgerHolderSource;
use shareledger::db::init_db;
use shareledger::domain::{
    Address, DelegateRecord, EventStream, IndexedEvent, TransferRecord,
};
use shareledger::endpoint::EndpointPool;
use shareledger::engine::{BalanceEngine, ChainReader, EngineError, PoolContracts};
use shareledger::{Decimal, Repository};
use std::sync::Arc;
use tempfile::TempDir;

const CHAIN: u64 = 42161;
const PERP_ID: u32 = 100_001;
const INDEXED_TO: u64 = 100;
const MULTICALL: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

struct TestEngine {
    engine: BalanceEngine,
    chain: Arc<MockChain>,
    _temp: TempDir,
}

fn h(n: u64) -> H160 {
    H160::from_low_u64_be(n)
}

fn a(n: u64) -> Address {
    Address::from_h160(&h(n))
}

fn pool_token() -> H160 {
    h(0xa0)
}

fn share_token() -> H160 {
    h(0xa1)
}

fn perp_proxy() -> H160 {
    h(0xa2)
}

fn e18(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

fn abdk(n: i128) -> i128 {
    n << 64
}

/// Two LPs holding 60 and 40 of 100 shares, 1000 pool tokens in custody and
/// two traders with 100 and 50 available cash.
fn pool_chain(share_supply: u64) -> MockChain {
    MockChain::new()
        .with_head(120)
        .with_token(pool_token(), 18, e18(5000))
        .with_token(share_token(), 18, U256::from(share_supply))
        .with_token_balance(share_token(), h(1), U256::from(60))
        .with_token_balance(share_token(), h(2), U256::from(40))
        .with_token_balance(pool_token(), perp_proxy(), e18(1000))
        .with_perp_proxy(perp_proxy())
        .with_trader(PERP_ID, h(10), abdk(100))
        .with_trader(PERP_ID, h(11), abdk(50))
}

async fn setup(chain: MockChain, delegates: Vec<DelegateRecord>) -> TestEngine {
    setup_with_multicall(chain, delegates, MULTICALL.parse().unwrap()).await
}

async fn setup_with_multicall(
    chain: MockChain,
    delegates: Vec<DelegateRecord>,
    multicall: Address,
) -> TestEngine {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let share = Address::from_h160(&share_token());
    let transfers: Vec<IndexedEvent> = [(1, 10), (2, 20), (1, 30)]
        .into_iter()
        .map(|(to, block)| {
            IndexedEvent::Transfer(TransferRecord {
                from: Address::zero(),
                to: a(to),
                block_number: block,
            })
        })
        .collect();
    repo.insert_events(EventStream::Transfer, CHAIN, &share, &transfers, INDEXED_TO)
        .await
        .unwrap();
    let delegates: Vec<IndexedEvent> = delegates.into_iter().map(IndexedEvent::Delegate).collect();
    repo.insert_events(EventStream::Delegate, CHAIN, &share, &delegates, INDEXED_TO)
        .await
        .unwrap();

    let chain = Arc::new(chain);
    let endpoints = Arc::new(
        EndpointPool::from_clients(vec![chain.clone() as Arc<dyn ChainClient>], 1000, 1000)
            .unwrap(),
    );
    let reader = ChainReader::new(endpoints, &multicall);
    let contracts = PoolContracts {
        chain_id: CHAIN,
        perp_proxy: Address::from_h160(&perp_proxy()),
        pool_token: Address::from_h160(&pool_token()),
        share_token: share,
        perpetual_ids: vec![PERP_ID],
        pool_token_decimals: 18,
    };
    let holders = Arc::new(LedgerHolderSource::new(repo.clone(), CHAIN));
    let engine = BalanceEngine::new(repo, holders, reader, contracts);

    TestEngine {
        engine,
        chain,
        _temp: temp_dir,
    }
}

fn strategy_delegate(trader: u64, delegate: u64, block: u64) -> DelegateRecord {
    DelegateRecord {
        trader: a(trader),
        delegate: a(delegate),
        index: 2,
        block_number: block,
    }
}

fn rendered(balances: &[shareledger::Balance]) -> Vec<(Address, String)> {
    balances
        .iter()
        .map(|b| (b.address.clone(), b.effective_balance.to_canonical_string()))
        .collect()
}

#[tokio::test]
async fn test_universe_mode_splits_free_custody_pro_rata() {
    let t = setup(pool_chain(100), vec![]).await;

    let balances = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    // free custody 1000 - 150 = 850 split 60/40
    assert_eq!(
        rendered(&balances),
        vec![
            (a(1), "510".to_string()),
            (a(2), "340".to_string()),
            (a(10), "100".to_string()),
            (a(11), "50".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_delegate_reassignment_moves_trader_balance() {
    let t = setup(pool_chain(100), vec![strategy_delegate(10, 11, 50)]).await;

    let balances = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    let got = rendered(&balances);
    assert!(got.contains(&(a(11), "150".to_string())));
    assert!(!got.iter().any(|(addr, _)| *addr == a(10)));
}

#[tokio::test]
async fn test_delegation_after_queried_block_is_ignored() {
    let t = setup(pool_chain(100), vec![strategy_delegate(10, 11, 90)]).await;

    let balances = t.engine.compute_balances(80, &[]).await.unwrap();
    let got = rendered(&balances);
    assert!(got.contains(&(a(10), "100".to_string())));
    assert!(got.contains(&(a(11), "50".to_string())));
}

#[tokio::test]
async fn test_exact_mode_reports_requested_addresses_in_order() {
    let t = setup(pool_chain(100), vec![]).await;

    let balances = t
        .engine
        .compute_balances(INDEXED_TO, &[a(2), a(10), a(99), a(2)])
        .await
        .unwrap();
    assert_eq!(
        rendered(&balances),
        vec![
            (a(2), "340".to_string()),
            (a(10), "100".to_string()),
            (a(99), "0".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_zero_supply_skips_share_balance_queries() {
    let t = setup(pool_chain(0), vec![]).await;

    let balances = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    assert_eq!(t.chain.call_count("balanceOf(address)"), 0);
    assert_eq!(
        rendered(&balances),
        vec![(a(10), "100".to_string()), (a(11), "50".to_string())]
    );
}

#[tokio::test]
async fn test_block_beyond_watermark_fails() {
    let t = setup(pool_chain(100), vec![]).await;

    let err = t
        .engine
        .compute_balances(INDEXED_TO + 1, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::BlockNotAvailable {
            requested: 101,
            available: 100
        }
    ));
    assert_eq!(t.chain.call_count("totalSupply()"), 0);
}

#[tokio::test]
async fn test_repeated_queries_are_identical() {
    let t = setup(pool_chain(100), vec![strategy_delegate(10, 11, 50)]).await;

    let first = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    let second = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_transient_call_failure_is_retried() {
    let t = setup(pool_chain(100), vec![]).await;
    t.chain.fail_next_calls(1);

    let balances = t.engine.compute_balances(INDEXED_TO, &[a(1)]).await.unwrap();
    assert_eq!(rendered(&balances), vec![(a(1), "510".to_string())]);
}

#[tokio::test]
async fn test_missing_perp_proxy_means_no_traders() {
    let chain = MockChain::new()
        .with_head(120)
        .with_token(pool_token(), 18, e18(5000))
        .with_token(share_token(), 18, U256::from(100))
        .with_token_balance(share_token(), h(1), U256::from(100));
    let t = setup(chain, vec![]).await;

    let balances = t.engine.compute_balances(INDEXED_TO, &[]).await.unwrap();
    // custody read against a token with no balance for the proxy is zero
    assert!(balances.is_empty());
}

#[tokio::test]
async fn test_holder_contract_balances_reports_custody() {
    let t = setup(pool_chain(100), vec![]).await;

    let custody = t.engine.holder_contract_balances(None).await.unwrap();
    assert_eq!(custody.len(), 1);
    assert_eq!(custody[0].to_canonical_string(), "1000");
}

#[tokio::test]
async fn test_missing_multicall_fails_instead_of_zeroing() {
    let t = setup_with_multicall(pool_chain(100), vec![], a(0x77)).await;

    let result = t
        .engine
        .compute_balances(INDEXED_TO, &[a(1), a(2), a(10)])
        .await;
    assert!(matches!(result, Err(EngineError::Chain(_))));
    assert!(t.engine.holder_contract_balances(None).await.is_err());
}

#[tokio::test]
async fn test_batches_past_multicall_limit_keep_holder_order() {
    const HOLDERS: u64 = 1201;
    let holder = |i: u64| h(0x10_000 + i);
    let supply: u64 = (1..=HOLDERS).sum();

    // no perpetual proxy code, so the whole custody is free for LPs and each
    // holder's attributed amount equals its share balance
    let mut chain = MockChain::new()
        .with_head(120)
        .with_token(pool_token(), 18, e18(5000))
        .with_token(share_token(), 18, U256::from(supply))
        .with_token_balance(pool_token(), perp_proxy(), U256::from(supply));
    for i in 0..HOLDERS {
        chain = chain.with_token_balance(share_token(), holder(i), U256::from(i + 1));
    }
    let t = setup(chain, vec![]).await;

    let requested: Vec<Address> = (0..HOLDERS).map(|i| Address::from_h160(&holder(i))).collect();
    let balances = t
        .engine
        .compute_balances(INDEXED_TO, &requested)
        .await
        .unwrap();

    assert_eq!(balances.len(), HOLDERS as usize);
    for (i, balance) in balances.iter().enumerate() {
        assert_eq!(balance.address, requested[i]);
        assert_eq!(
            balance.effective_balance,
            Decimal::from_dec_n(U256::from(i as u64 + 1), 18)
        );
    }
    // three aggregated batches plus the direct custody read
    assert_eq!(t.chain.call_count("balanceOf(address)"), HOLDERS as usize + 1);
}
