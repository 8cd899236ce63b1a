//! Ledger database bootstrap: connection pool and embedded schema.
//!
//! The indexer writes while the API reads, so connections run in WAL mode
//! with a busy timeout instead of failing on lock contention.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Tables the repository relies on.
pub const LEDGER_TABLES: [&str; 3] = ["delegates", "sh_tkn_transfer", "stream_watermarks"];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the ledger at `db_path` and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;

    info!(path = db_path, "ledger database ready");
    Ok(pool)
}

/// Apply the embedded schema in one transaction. Every statement is
/// `IF NOT EXISTS`, so reapplying is a no-op.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let statements = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    debug!(tables = ?LEDGER_TABLES, "ledger schema applied");
    Ok(())
}
