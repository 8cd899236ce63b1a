//! Ledger store: indexed event rows, per-stream watermarks and derived queries.

use crate::domain::{Address, BlockNumber, ChainId, EventStream, IndexedEvent, DELEGATE_INDEX_STRATEGY};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;

/// Repository for the append-only event ledger.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

fn table_for(stream: EventStream) -> &'static str {
    match stream {
        EventStream::Delegate => "delegates",
        EventStream::Transfer => "sh_tkn_transfer",
    }
}

fn parse_address(raw: &str) -> Result<Address, sqlx::Error> {
    Address::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    async fn watermark(
        &self,
        stream: EventStream,
        chain_id: ChainId,
    ) -> Result<Option<BlockNumber>, sqlx::Error> {
        let query = format!(
            "SELECT MAX(to_block) FROM {} WHERE chain_id = ?",
            table_for(stream)
        );
        let from_rows: Option<i64> = sqlx::query_scalar(&query)
            .bind(chain_id as i64)
            .fetch_one(&self.pool)
            .await?;

        let recorded: Option<i64> = sqlx::query_scalar(
            "SELECT to_block FROM stream_watermarks WHERE stream = ? AND chain_id = ?",
        )
        .bind(stream.as_str())
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(from_rows.max(recorded).map(|b| b.max(0) as BlockNumber))
    }

    /// Highest block through which `stream` is fully indexed, 0 if never indexed.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_watermark(
        &self,
        stream: EventStream,
        chain_id: ChainId,
    ) -> Result<BlockNumber, sqlx::Error> {
        Ok(self.watermark(stream, chain_id).await?.unwrap_or(0))
    }

    /// Freshest block for which both streams are indexed.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_block(&self, chain_id: ChainId) -> Result<BlockNumber, sqlx::Error> {
        let delegate = self.latest_watermark(EventStream::Delegate, chain_id).await?;
        let transfer = self.latest_watermark(EventStream::Transfer, chain_id).await?;
        Ok(delegate.min(transfer))
    }

    /// First block the next scan of `stream` must cover.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn next_start_block(
        &self,
        stream: EventStream,
        chain_id: ChainId,
        genesis: BlockNumber,
    ) -> Result<BlockNumber, sqlx::Error> {
        Ok(match self.watermark(stream, chain_id).await? {
            Some(to_block) => genesis.max(to_block + 1),
            None => genesis,
        })
    }

    /// Append `events` and advance the watermark of `stream` to `to_block` in
    /// one transaction. Returns the number of rows written.
    ///
    /// # Errors
    /// Returns an error if any insert fails; nothing is written in that case.
    pub async fn insert_events(
        &self,
        stream: EventStream,
        chain_id: ChainId,
        share_token: &Address,
        events: &[IndexedEvent],
        to_block: BlockNumber,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for event in events {
            match event {
                IndexedEvent::Delegate(d) => {
                    sqlx::query(
                        r#"
                        INSERT INTO delegates (addr, delegate, block, "index", to_block, chain_id)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(d.trader.as_str())
                    .bind(d.delegate.as_str())
                    .bind(d.block_number as i64)
                    .bind(d.index)
                    .bind(to_block as i64)
                    .bind(chain_id as i64)
                    .execute(&mut *tx)
                    .await?;
                }
                IndexedEvent::Transfer(t) => {
                    sqlx::query(
                        r#"
                        INSERT INTO sh_tkn_transfer ("from", "to", block, to_block, sh_tkn, chain_id)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(t.from.as_str())
                    .bind(t.to.as_str())
                    .bind(t.block_number as i64)
                    .bind(to_block as i64)
                    .bind(share_token.as_str())
                    .bind(chain_id as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO stream_watermarks (stream, chain_id, to_block, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(stream, chain_id) DO UPDATE SET
                to_block = MAX(stream_watermarks.to_block, excluded.to_block),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stream.as_str())
        .bind(chain_id as i64)
        .bind(to_block as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(events.len())
    }

    /// Every address that ever received the share token up to `block`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn distinct_receivers_up_to(
        &self,
        block: BlockNumber,
        chain_id: ChainId,
    ) -> Result<Vec<Address>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT DISTINCT "to" AS receiver FROM sh_tkn_transfer
               WHERE block <= ? AND chain_id = ?
               ORDER BY receiver"#,
        )
        .bind(block as i64)
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| parse_address(r.get::<String, _>("receiver").as_str()))
            .collect()
    }

    /// Distinct strategy delegations `(trader, delegate)` recorded up to
    /// `block`, most recently assigned first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn active_delegates_up_to(
        &self,
        block: BlockNumber,
        chain_id: ChainId,
    ) -> Result<Vec<(Address, Address)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT addr, delegate, MAX(block) AS last_block FROM delegates
               WHERE block <= ? AND chain_id = ? AND "index" = ?
               GROUP BY addr, delegate
               ORDER BY last_block DESC, addr, delegate"#,
        )
        .bind(block as i64)
        .bind(chain_id as i64)
        .bind(DELEGATE_INDEX_STRATEGY)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let trader = parse_address(r.get::<String, _>("addr").as_str())?;
                let delegate = parse_address(r.get::<String, _>("delegate").as_str())?;
                Ok((trader, delegate))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{DelegateRecord, TransferRecord};
    use tempfile::TempDir;

    const CHAIN: ChainId = 42161;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn addr(n: u8) -> Address {
        Address::from_str(&format!("0x{:040x}", n)).unwrap()
    }

    fn transfer(to: u8, block: BlockNumber) -> IndexedEvent {
        IndexedEvent::Transfer(TransferRecord {
            from: Address::zero(),
            to: addr(to),
            block_number: block,
        })
    }

    fn delegate(trader: u8, delegate: u8, index: i64, block: BlockNumber) -> IndexedEvent {
        IndexedEvent::Delegate(DelegateRecord {
            trader: addr(trader),
            delegate: addr(delegate),
            index,
            block_number: block,
        })
    }

    #[tokio::test]
    async fn test_empty_ledger_watermarks() {
        let (repo, _temp) = setup_test_db().await;
        assert_eq!(
            repo.latest_watermark(EventStream::Transfer, CHAIN).await.unwrap(),
            0
        );
        assert_eq!(repo.latest_block(CHAIN).await.unwrap(), 0);
        assert_eq!(
            repo.next_start_block(EventStream::Delegate, CHAIN, 500)
                .await
                .unwrap(),
            500
        );
    }

    #[tokio::test]
    async fn test_insert_advances_watermark_without_rows() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        repo.insert_events(EventStream::Delegate, CHAIN, &token, &[], 900)
            .await
            .unwrap();
        assert_eq!(
            repo.latest_watermark(EventStream::Delegate, CHAIN).await.unwrap(),
            900
        );
        assert_eq!(
            repo.next_start_block(EventStream::Delegate, CHAIN, 100)
                .await
                .unwrap(),
            901
        );
        // transfer stream untouched, so the common block stays at 0
        assert_eq!(repo.latest_block(CHAIN).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_latest_block_is_min_of_streams() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        repo.insert_events(EventStream::Transfer, CHAIN, &token, &[transfer(1, 10)], 200)
            .await
            .unwrap();
        repo.insert_events(EventStream::Delegate, CHAIN, &token, &[], 150)
            .await
            .unwrap();
        assert_eq!(repo.latest_block(CHAIN).await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_watermark_never_decreases() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        repo.insert_events(EventStream::Transfer, CHAIN, &token, &[], 300)
            .await
            .unwrap();
        repo.insert_events(EventStream::Transfer, CHAIN, &token, &[], 250)
            .await
            .unwrap();
        assert_eq!(
            repo.latest_watermark(EventStream::Transfer, CHAIN).await.unwrap(),
            300
        );
    }

    #[tokio::test]
    async fn test_distinct_receivers_up_to_block() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        let events = vec![transfer(2, 10), transfer(1, 20), transfer(2, 30), transfer(3, 40)];
        repo.insert_events(EventStream::Transfer, CHAIN, &token, &events, 50)
            .await
            .unwrap();

        let receivers = repo.distinct_receivers_up_to(30, CHAIN).await.unwrap();
        assert_eq!(receivers, vec![addr(1), addr(2)]);

        let other_chain = repo.distinct_receivers_up_to(50, 1).await.unwrap();
        assert!(other_chain.is_empty());
    }

    #[tokio::test]
    async fn test_active_delegates_filter_strategy_index() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        let events = vec![
            delegate(1, 9, DELEGATE_INDEX_STRATEGY, 10),
            delegate(2, 9, 1, 10),
            delegate(1, 9, DELEGATE_INDEX_STRATEGY, 11),
            delegate(3, 8, DELEGATE_INDEX_STRATEGY, 99),
        ];
        repo.insert_events(EventStream::Delegate, CHAIN, &token, &events, 100)
            .await
            .unwrap();

        let active = repo.active_delegates_up_to(50, CHAIN).await.unwrap();
        assert_eq!(active, vec![(addr(1), addr(9))]);
    }

    #[tokio::test]
    async fn test_active_delegates_most_recent_first() {
        let (repo, _temp) = setup_test_db().await;
        let token = addr(0xaa);
        let events = vec![
            delegate(1, 7, DELEGATE_INDEX_STRATEGY, 10),
            delegate(1, 8, DELEGATE_INDEX_STRATEGY, 20),
            delegate(4, 6, DELEGATE_INDEX_STRATEGY, 15),
        ];
        repo.insert_events(EventStream::Delegate, CHAIN, &token, &events, 30)
            .await
            .unwrap();

        let active = repo.active_delegates_up_to(30, CHAIN).await.unwrap();
        assert_eq!(
            active,
            vec![(addr(1), addr(8)), (addr(4), addr(6)), (addr(1), addr(7))]
        );
    }
}
