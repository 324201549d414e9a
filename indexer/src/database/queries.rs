//! Database query functions
//!
//! Read-only lookups used by the sync engine. Heights are stored as SQLite
//! integers, so they cross this boundary as `i64`.

use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::*;

pub(crate) fn sql_height(height: u64) -> i64 {
    i64::try_from(height).unwrap_or(i64::MAX)
}

pub struct BlockQueries;

impl BlockQueries {
    pub async fn have_genesis(pool: &SqlitePool) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocks WHERE height = 0")
            .fetch_one(pool)
            .await?;

        Ok(count > 0)
    }

    pub async fn get_by_height(pool: &SqlitePool, height: u64) -> Result<Option<StoredBlock>> {
        let block = sqlx::query_as::<_, StoredBlock>(
            r#"
            SELECT hash, prev_hash, height, difficulty, size, timestamp, tx_count
            FROM blocks
            WHERE height = ?
            "#,
        )
        .bind(sql_height(height))
        .fetch_optional(pool)
        .await?;

        Ok(block)
    }

    pub async fn get_by_hash(pool: &SqlitePool, hash: &str) -> Result<Option<StoredBlock>> {
        let block = sqlx::query_as::<_, StoredBlock>(
            r#"
            SELECT hash, prev_hash, height, difficulty, size, timestamp, tx_count
            FROM blocks
            WHERE hash = ?
            "#,
        )
        .bind(hash)
        .fetch_optional(pool)
        .await?;

        Ok(block)
    }

    pub async fn hash_at_height(pool: &SqlitePool, height: u64) -> Result<Option<BlockRef>> {
        let block = sqlx::query_as::<_, BlockRef>("SELECT height, hash FROM blocks WHERE height = ?")
            .bind(sql_height(height))
            .fetch_optional(pool)
            .await?;

        Ok(block)
    }

    /// Most recent blocks, highest first.
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<BlockRef>> {
        let blocks = sqlx::query_as::<_, BlockRef>(
            "SELECT height, hash FROM blocks ORDER BY height DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(blocks)
    }

    pub async fn tip(pool: &SqlitePool) -> Result<Option<BlockRef>> {
        Ok(Self::list_recent(pool, 1).await?.into_iter().next())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocks")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }
}

pub struct GapQueries;

impl GapQueries {
    /// Every run of heights absent below the highest stored block, lowest first.
    ///
    /// A mirror that lacks genesis reports a leading range starting at 0. An
    /// empty table reports nothing; bootstrapping genesis is not a gap.
    pub async fn missing_ranges(pool: &SqlitePool) -> Result<Vec<MissingRange>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT lower_bound, upper_bound FROM (
                SELECT 0 AS lower_bound, lowest - 1 AS upper_bound
                FROM (SELECT MIN(height) AS lowest FROM blocks)
                WHERE lowest > 0
                UNION ALL
                SELECT height + 1 AS lower_bound, next_height - 1 AS upper_bound
                FROM (
                    SELECT height, LEAD(height) OVER (ORDER BY height) AS next_height
                    FROM blocks
                )
                WHERE next_height > height + 1
            )
            ORDER BY lower_bound
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(lower, upper)| MissingRange::new(lower.max(0) as u64, upper.max(0) as u64))
            .collect())
    }
}

pub struct TransactionQueries;

impl TransactionQueries {
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }

    pub async fn hashes_for_block(pool: &SqlitePool, block_hash: &str) -> Result<Vec<String>> {
        let hashes = sqlx::query_scalar::<_, String>(
            "SELECT hash FROM transactions WHERE block_hash = ? ORDER BY hash",
        )
        .bind(block_hash)
        .fetch_all(pool)
        .await?;

        Ok(hashes)
    }

    pub async fn unlock_time(pool: &SqlitePool, hash: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT unlock_time FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;

        Ok(value)
    }

    pub async fn payment_id(pool: &SqlitePool, hash: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT payment_id FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;

        Ok(value)
    }

    /// Inputs and outputs whose transaction row no longer exists.
    pub async fn orphaned_children(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM transaction_inputs i
                    WHERE NOT EXISTS (SELECT 1 FROM transactions t WHERE t.hash = i.tx_hash))
              + (SELECT COUNT(*) FROM transaction_outputs o
                    WHERE NOT EXISTS (SELECT 1 FROM transactions t WHERE t.hash = o.tx_hash))
              + (SELECT COUNT(*) FROM transactions t
                    WHERE NOT EXISTS (SELECT 1 FROM blocks b WHERE b.hash = t.block_hash))
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

pub struct PoolQueries;

impl PoolQueries {
    pub async fn hashes(pool: &SqlitePool) -> Result<Vec<String>> {
        let hashes = sqlx::query_scalar::<_, String>("SELECT hash FROM transaction_pool ORDER BY hash")
            .fetch_all(pool)
            .await?;

        Ok(hashes)
    }
}

pub struct InfoQueries;

impl InfoQueries {
    pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<serde_json::Value>> {
        let payload = sqlx::query_scalar::<_, String>("SELECT payload FROM information WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(Into::into))
            .transpose()
    }
}
