//! Atomic write path for the mirror
//!
//! Every mutation is expressed as an ordered list of [`Statement`]s and applied
//! inside a single database transaction. Either every statement lands or none
//! does; readers never observe a half-written block.

use rpc_core::{BlockDetails, PoolTransaction, TransactionDetails};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::database::queries::sql_height;
use crate::database::{schema, Database};
use crate::error::{IndexerError, Result};
use crate::models::SaveReport;

/// Payment id the node reports for transactions that carry none.
pub const EMPTY_PAYMENT_ID: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const BLOCK_UPSERT: &str = r#"
    INSERT INTO blocks (
        hash, prev_hash, height, base_reward, reward, difficulty,
        major_version, minor_version, nonce, size, timestamp, tx_count
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (hash) DO UPDATE SET
        prev_hash = excluded.prev_hash,
        height = excluded.height,
        base_reward = excluded.base_reward,
        reward = excluded.reward,
        difficulty = excluded.difficulty,
        major_version = excluded.major_version,
        minor_version = excluded.minor_version,
        nonce = excluded.nonce,
        size = excluded.size,
        timestamp = excluded.timestamp,
        tx_count = excluded.tx_count
"#;

const TRANSACTION_UPSERT: &str = r#"
    INSERT INTO transactions (
        hash, block_hash, mixin, timestamp, payment_id, unlock_time,
        public_key, fee, size, nonce, extra
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (hash) DO UPDATE SET
        block_hash = excluded.block_hash,
        mixin = excluded.mixin,
        timestamp = excluded.timestamp,
        payment_id = excluded.payment_id,
        unlock_time = excluded.unlock_time,
        public_key = excluded.public_key,
        fee = excluded.fee,
        size = excluded.size,
        nonce = excluded.nonce,
        extra = excluded.extra
"#;

const INPUT_UPSERT: &str = r#"
    INSERT INTO transaction_inputs (tx_hash, input_index, key_image, amount, input_type)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (tx_hash, input_index) DO UPDATE SET
        key_image = excluded.key_image,
        amount = excluded.amount,
        input_type = excluded.input_type
"#;

const OUTPUT_UPSERT: &str = r#"
    INSERT INTO transaction_outputs (tx_hash, output_index, global_index, amount, key, output_type)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT (tx_hash, output_index) DO UPDATE SET
        global_index = excluded.global_index,
        amount = excluded.amount,
        key = excluded.key,
        output_type = excluded.output_type
"#;

const POOL_UPSERT: &str = r#"
    INSERT INTO transaction_pool (hash, fee, amount, size) VALUES (?, ?, ?, ?)
    ON CONFLICT (hash) DO UPDATE SET
        fee = excluded.fee,
        amount = excluded.amount,
        size = excluded.size
"#;

const INFO_UPSERT: &str = r#"
    INSERT INTO information (key, payload, updated_at) VALUES (?, ?, ?)
    ON CONFLICT (key) DO UPDATE SET
        payload = excluded.payload,
        updated_at = excluded.updated_at
"#;

const DELETE_INPUTS: &str = "DELETE FROM transaction_inputs WHERE tx_hash = ?";
const DELETE_OUTPUTS: &str = "DELETE FROM transaction_outputs WHERE tx_hash = ?";
const DELETE_TRANSACTION: &str = "DELETE FROM transactions WHERE hash = ?";
const DELETE_BLOCK: &str = "DELETE FROM blocks WHERE hash = ?";

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

/// SQLite would turn a value past `i64::MAX` into a lossy REAL in an INTEGER
/// column, so writers check [`fits_integer_column`] before binding. The text
/// fallback only serves TEXT columns.
impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Text(value.to_string()),
        }
    }
}

impl From<u8> for SqlValue {
    fn from(value: u8) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<usize> for SqlValue {
    fn from(value: usize) -> Self {
        SqlValue::from(value as u64)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// One SQL statement with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: &'static str,
    pub args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: &'static str, args: Vec<SqlValue>) -> Self {
        Self { sql, args }
    }

    fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        self.args.iter().fold(sqlx::query(self.sql), |query, arg| match arg {
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        })
    }

    fn is_delete(&self) -> bool {
        self.sql.trim_start().starts_with("DELETE")
    }
}

/// The node serializes the unsigned unlock time as a signed 64-bit integer,
/// so values above `i64::MAX` arrive negative. Adding 2^64 recovers them.
pub fn normalize_unlock_time(raw: i64) -> u64 {
    raw as u64
}

pub fn normalize_payment_id(payment_id: &str) -> String {
    if payment_id == EMPTY_PAYMENT_ID {
        String::new()
    } else {
        payment_id.to_string()
    }
}

/// Largest unsigned value an INTEGER column holds exactly.
pub const INTEGER_COLUMN_MAX: u64 = i64::MAX as u64;

pub fn fits_integer_column(value: u64) -> bool {
    value <= INTEGER_COLUMN_MAX
}

fn first_oversized<'a>(fields: &[(&'a str, u64)]) -> Option<(&'a str, u64)> {
    fields.iter().copied().find(|(_, value)| !fits_integer_column(*value))
}

/// Reject blocks whose fields show the node sent something malformed, or
/// that the INTEGER columns could not store exactly.
pub fn validate_block(block: &BlockDetails) -> Result<()> {
    let invalid = |reason: &str| IndexerError::InvalidBlock {
        height: block.index,
        reason: reason.to_string(),
    };

    if block.hash.is_empty() {
        return Err(invalid("missing hash"));
    }
    if block.difficulty == 0 {
        return Err(invalid("difficulty is zero"));
    }
    if block.block_size == 0 {
        return Err(invalid("size is zero"));
    }
    if block.timestamp == 0 && block.index != 0 {
        return Err(invalid("timestamp is zero"));
    }

    let block_fields = [
        ("height", block.index),
        ("base reward", block.base_reward),
        ("reward", block.reward),
        ("difficulty", block.difficulty),
        ("nonce", block.nonce),
        ("size", block.block_size),
        ("timestamp", block.timestamp),
    ];
    if let Some((name, value)) = first_oversized(&block_fields) {
        return Err(invalid(&format!("{} {} exceeds the integer column range", name, value)));
    }

    for transaction in &block.transactions {
        if transaction.inputs.iter().any(|i| i.type_code().is_none()) {
            return Err(invalid(&format!("transaction {} has an unknown input type", transaction.hash)));
        }
        if transaction.outputs.iter().any(|o| o.type_code().is_none()) {
            return Err(invalid(&format!("transaction {} has an unknown output type", transaction.hash)));
        }

        let mut fields = vec![
            ("mixin", transaction.mixin),
            ("timestamp", transaction.timestamp),
            ("fee", transaction.fee),
            ("size", transaction.size),
        ];
        fields.extend(transaction.inputs.iter().map(|i| ("input amount", i.amount())));
        for output in &transaction.outputs {
            fields.push(("output amount", output.output.amount));
            fields.push(("global index", output.global_index));
        }
        if let Some((name, value)) = first_oversized(&fields) {
            return Err(invalid(&format!(
                "transaction {} {} {} exceeds the integer column range",
                transaction.hash, name, value
            )));
        }
    }

    Ok(())
}

/// Inserts for a block and everything it owns, parents before children.
pub fn block_statements(block: &BlockDetails) -> Vec<Statement> {
    let mut statements = vec![Statement::new(
        BLOCK_UPSERT,
        vec![
            block.hash.as_str().into(),
            block.prev_block_hash.as_str().into(),
            block.index.into(),
            block.base_reward.into(),
            block.reward.into(),
            block.difficulty.into(),
            block.major_version.into(),
            block.minor_version.into(),
            block.nonce.into(),
            block.block_size.into(),
            block.timestamp.into(),
            block.transactions.len().into(),
        ],
    )];

    for transaction in &block.transactions {
        statements.extend(transaction_statements(transaction));
    }

    statements
}

fn transaction_statements(transaction: &TransactionDetails) -> Vec<Statement> {
    let unlock_time = normalize_unlock_time(transaction.unlock_time);
    if transaction.unlock_time < 0 {
        warn!(
            tx = %transaction.hash,
            raw = transaction.unlock_time,
            adjusted = unlock_time,
            "Transaction has wrapped unlock time, adjusted"
        );
    }

    let mut statements = vec![Statement::new(
        TRANSACTION_UPSERT,
        vec![
            transaction.hash.as_str().into(),
            transaction.block_hash.as_str().into(),
            transaction.mixin.into(),
            transaction.timestamp.into(),
            normalize_payment_id(&transaction.payment_id).into(),
            unlock_time.to_string().into(),
            transaction.extra.public_key.as_str().into(),
            transaction.fee.into(),
            transaction.size.into(),
            hex::encode(&transaction.extra.nonce).into(),
            hex::encode(&transaction.extra.raw).into(),
        ],
    )];

    for (index, input) in transaction.inputs.iter().enumerate() {
        statements.push(Statement::new(
            INPUT_UPSERT,
            vec![
                transaction.hash.as_str().into(),
                index.into(),
                input.key_image().into(),
                input.amount().into(),
                input.type_code().unwrap_or_default().into(),
            ],
        ));
    }

    for (index, output) in transaction.outputs.iter().enumerate() {
        statements.push(Statement::new(
            OUTPUT_UPSERT,
            vec![
                transaction.hash.as_str().into(),
                index.into(),
                output.global_index.into(),
                output.output.amount.into(),
                output.output.target.data.key.as_str().into(),
                output.type_code().unwrap_or_default().into(),
            ],
        ));
    }

    statements
}

/// Deletes for every block at or above `height`: inputs and outputs first,
/// then transactions, then the blocks themselves.
async fn delete_range_statements(
    conn: &mut SqliteConnection,
    height: u64,
) -> std::result::Result<Vec<Statement>, sqlx::Error> {
    let block_hashes = sqlx::query_scalar::<_, String>(
        "SELECT hash FROM blocks WHERE height >= ? ORDER BY height DESC",
    )
    .bind(sql_height(height))
    .fetch_all(&mut *conn)
    .await?;

    if block_hashes.is_empty() {
        return Ok(Vec::new());
    }

    let tx_hashes = sqlx::query_scalar::<_, String>(
        r#"
        SELECT t.hash
        FROM transactions t
        INNER JOIN blocks b ON t.block_hash = b.hash
        WHERE b.height >= ?
        ORDER BY b.height DESC, t.hash
        "#,
    )
    .bind(sql_height(height))
    .fetch_all(&mut *conn)
    .await?;

    let mut statements = Vec::with_capacity(tx_hashes.len() * 3 + block_hashes.len());
    for hash in &tx_hashes {
        statements.push(Statement::new(DELETE_INPUTS, vec![hash.as_str().into()]));
        statements.push(Statement::new(DELETE_OUTPUTS, vec![hash.as_str().into()]));
    }
    statements.extend(
        tx_hashes
            .iter()
            .map(|hash| Statement::new(DELETE_TRANSACTION, vec![hash.as_str().into()])),
    );
    statements.extend(
        block_hashes
            .iter()
            .map(|hash| Statement::new(DELETE_BLOCK, vec![hash.as_str().into()])),
    );

    Ok(statements)
}

fn report(statements: &[Statement], blocks: &[BlockDetails]) -> SaveReport {
    let deletes = statements.iter().filter(|s| s.is_delete()).count();
    SaveReport {
        deletes,
        inserts: statements.len() - deletes,
        blocks: blocks.iter().map(|b| (b.index, b.hash.clone())).collect(),
    }
}

/// Owns the write side of the schema.
#[derive(Clone)]
pub struct PersistenceEngine {
    pool: SqlitePool,
}

impl PersistenceEngine {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    /// Apply `statements` as one all-or-nothing unit.
    ///
    /// Any failure rolls the transaction back and surfaces the original
    /// error; a failed rollback is only logged.
    pub async fn apply(&self, statements: &[Statement]) -> Result<u64> {
        let tx = self.pool.begin().await.map_err(IndexerError::TransactionFailed)?;
        Self::finish(tx, statements).await
    }

    async fn finish(mut tx: sqlx::Transaction<'static, Sqlite>, statements: &[Statement]) -> Result<u64> {
        let mut affected = 0;

        for statement in statements {
            match statement.query().execute(&mut *tx).await {
                Ok(done) => affected += done.rows_affected(),
                Err(e) => {
                    Self::rollback(tx).await;
                    return Err(IndexerError::TransactionFailed(e));
                }
            }
        }

        tx.commit().await.map_err(IndexerError::TransactionFailed)?;
        Ok(affected)
    }

    async fn rollback(tx: sqlx::Transaction<'static, Sqlite>) {
        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed: {}", e);
        }
    }

    /// Store a single block with its transactions, inputs and outputs.
    pub async fn save_block(&self, block: &BlockDetails) -> Result<SaveReport> {
        validate_block(block)?;

        let statements = block_statements(block);
        self.apply(&statements).await?;
        Ok(report(&statements, std::slice::from_ref(block)))
    }

    /// Store a window of blocks in one transaction without touching anything
    /// already stored at other heights.
    pub async fn insert_blocks(&self, blocks: &[BlockDetails]) -> Result<SaveReport> {
        for block in blocks {
            validate_block(block)?;
        }

        let statements: Vec<Statement> = blocks.iter().flat_map(block_statements).collect();
        self.apply(&statements).await?;
        Ok(report(&statements, blocks))
    }

    /// Replace everything at or above `start_height` with `blocks`.
    ///
    /// The deletes and inserts commit together, so a reorg is never visible
    /// half applied. Nothing is written if any block fails validation.
    pub async fn save_blocks(&self, blocks: &[BlockDetails], start_height: u64) -> Result<SaveReport> {
        for block in blocks {
            validate_block(block)?;
        }

        let mut tx = self.pool.begin().await.map_err(IndexerError::TransactionFailed)?;
        let mut statements = match delete_range_statements(&mut *tx, start_height).await {
            Ok(deletes) => deletes,
            Err(e) => {
                Self::rollback(tx).await;
                return Err(IndexerError::TransactionFailed(e));
            }
        };
        statements.extend(blocks.iter().flat_map(block_statements));

        Self::finish(tx, &statements).await?;
        Ok(report(&statements, blocks))
    }

    /// Deletes for every block at or above `height`, children first.
    pub async fn build_delete_range(&self, height: u64) -> Result<Vec<Statement>> {
        let mut conn = self.pool.acquire().await?;
        Ok(delete_range_statements(&mut *conn, height).await?)
    }

    /// Drop every block at or above `height` in one transaction.
    pub async fn rewind(&self, height: u64) -> Result<SaveReport> {
        self.save_blocks(&[], height).await
    }

    /// Replace the pool snapshot with `transactions`.
    pub async fn save_transaction_pool(&self, transactions: &[PoolTransaction]) -> Result<usize> {
        for tx in transactions {
            let fields = [("fee", tx.fee), ("amount", tx.amount_out), ("size", tx.size)];
            if let Some((name, value)) = first_oversized(&fields) {
                return Err(IndexerError::Internal(format!(
                    "pool transaction {} {} {} exceeds the integer column range",
                    tx.hash, name, value
                )));
            }
        }

        let mut statements = Vec::with_capacity(transactions.len() + 1);
        statements.push(Statement::new("DELETE FROM transaction_pool", vec![]));
        statements.extend(transactions.iter().map(|tx| {
            Statement::new(
                POOL_UPSERT,
                vec![tx.hash.as_str().into(), tx.fee.into(), tx.amount_out.into(), tx.size.into()],
            )
        }));

        self.apply(&statements).await?;
        debug!(count = transactions.len(), "Saved transaction pool snapshot");
        Ok(transactions.len())
    }

    pub async fn save_info(&self, key: &str, payload: &serde_json::Value) -> Result<()> {
        let statement = Statement::new(
            INFO_UPSERT,
            vec![
                key.into(),
                serde_json::to_string(payload)?.into(),
                chrono::Utc::now().timestamp().into(),
            ],
        );

        self.apply(std::slice::from_ref(&statement)).await?;
        Ok(())
    }

    /// Empty every table.
    pub async fn reset(&self) -> Result<()> {
        let statements: Vec<Statement> = schema::TRUNCATE
            .iter()
            .copied()
            .map(|sql| Statement::new(sql, vec![]))
            .collect();

        self.apply(&statements).await?;
        Ok(())
    }
}
