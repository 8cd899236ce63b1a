use anyhow::Context;
use shareledger::chain::ChainClient;
use shareledger::config::{check_pool_token_decimals, Config, HolderSourceKind, PoolConfig};
use shareledger::datasource::{FlipsideHolderSource, HolderSource, LedgerHolderSource};
use shareledger::endpoint::{EndpointPool, RetryPolicy};
use shareledger::engine::{BalanceEngine, ChainReader, PoolContracts};
use shareledger::orchestration::{spawn_indexer, EventIndexer, IndexerConfig};
use shareledger::{api, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let pool_config = PoolConfig::load(&config.config_path).context("pool configuration error")?;

    let db = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database {}", config.database_path))?;
    let repo = Arc::new(Repository::new(db));

    let query_pool = Arc::new(EndpointPool::from_urls(
        &pool_config.rpc_urls,
        pool_config.rpc_bucket_capacity,
        pool_config.rpc_refill_per_sec,
    )?);
    let filter_pool = Arc::new(EndpointPool::from_urls(
        &pool_config.rpc_urls_filter,
        pool_config.rpc_bucket_capacity,
        pool_config.rpc_refill_per_sec,
    )?);

    let reader = ChainReader::new(query_pool.clone(), &pool_config.multicall());
    let decimals = match pool_config.pool_token_decimals {
        Some(d) => d,
        None => check_pool_token_decimals(
            reader
                .decimals(&pool_config.pool_token)
                .await
                .context("failed to read pool token decimals")?,
        )?,
    };
    let head = query_pool
        .with_retry("block_number", RetryPolicy::SINGLE_READ, |endpoint| async move {
            endpoint.client().block_number().await
        })
        .await
        .context("RPC endpoints unreachable")?;
    tracing::info!(
        chain_id = pool_config.chain_id,
        head,
        decimals,
        endpoints = query_pool.len(),
        "connected to chain"
    );

    let holders: Arc<dyn HolderSource> = match config.holder_source {
        HolderSourceKind::Ledger => {
            Arc::new(LedgerHolderSource::new(repo.clone(), pool_config.chain_id))
        }
        HolderSourceKind::Flipside => {
            let api_key = config.flipside_api_key.clone().unwrap_or_default();
            let mut source = FlipsideHolderSource::new(
                api_key,
                pool_config.share_token.clone(),
                pool_config.genesis_block,
            );
            if let Some(table) = &pool_config.flipside_transfers_table {
                source = source.with_table(table.clone());
            }
            Arc::new(source)
        }
    };

    let indexer = Arc::new(EventIndexer::new(
        repo.clone(),
        filter_pool,
        pool_config.chain_id,
        pool_config.genesis_block,
        pool_config.perp_proxy.clone(),
        pool_config.share_token.clone(),
        IndexerConfig {
            interval: Duration::from_secs(config.index_interval_secs),
            ..IndexerConfig::default()
        },
    ));
    let _indexer_task = spawn_indexer(indexer);

    let contracts = PoolContracts::from_config(&pool_config, decimals);
    let engine = Arc::new(BalanceEngine::new(repo, holders, reader, contracts));
    let app = api::create_router(api::AppState::new(engine));

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind_addr, config.port))?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
