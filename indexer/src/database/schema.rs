//! Database schema definitions
//!
//! One statement per constant; `SCHEMA` lists them in creation order.

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    hash TEXT PRIMARY KEY,
    prev_hash TEXT NOT NULL,
    height INTEGER NOT NULL UNIQUE,
    base_reward INTEGER NOT NULL,
    reward INTEGER NOT NULL,
    difficulty INTEGER NOT NULL,
    major_version INTEGER NOT NULL,
    minor_version INTEGER NOT NULL,
    nonce INTEGER NOT NULL,
    size INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    tx_count INTEGER NOT NULL
)
"#;

pub const CREATE_BLOCKS_TIMESTAMP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks(timestamp)";

// unlock_time is TEXT so the full unsigned 64-bit range survives.
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    hash TEXT PRIMARY KEY,
    block_hash TEXT NOT NULL REFERENCES blocks(hash),
    mixin INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    payment_id TEXT NOT NULL DEFAULT '',
    unlock_time TEXT NOT NULL,
    public_key TEXT NOT NULL,
    fee INTEGER NOT NULL,
    size INTEGER NOT NULL,
    nonce TEXT NOT NULL,
    extra TEXT NOT NULL
)
"#;

pub const CREATE_TRANSACTIONS_BLOCK_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_hash ON transactions(block_hash)";

pub const CREATE_TRANSACTIONS_PAYMENT_ID_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_payment_id ON transactions(payment_id)";

pub const CREATE_TRANSACTION_INPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_inputs (
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    input_index INTEGER NOT NULL,
    key_image TEXT NOT NULL,
    amount INTEGER NOT NULL,
    input_type INTEGER NOT NULL,
    PRIMARY KEY (tx_hash, input_index)
)
"#;

pub const CREATE_TRANSACTION_INPUTS_KEY_IMAGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tx_inputs_key_image ON transaction_inputs(key_image)";

pub const CREATE_TRANSACTION_OUTPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_outputs (
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    output_index INTEGER NOT NULL,
    global_index INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    key TEXT NOT NULL,
    output_type INTEGER NOT NULL,
    PRIMARY KEY (tx_hash, output_index)
)
"#;

pub const CREATE_TRANSACTION_OUTPUTS_KEY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tx_outputs_key ON transaction_outputs(key)";

pub const CREATE_TRANSACTION_POOL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_pool (
    hash TEXT PRIMARY KEY,
    fee INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    size INTEGER NOT NULL
)
"#;

pub const CREATE_INFORMATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS information (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

pub const SCHEMA: &[&str] = &[
    CREATE_BLOCKS_TABLE,
    CREATE_BLOCKS_TIMESTAMP_INDEX,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_TRANSACTIONS_BLOCK_INDEX,
    CREATE_TRANSACTIONS_PAYMENT_ID_INDEX,
    CREATE_TRANSACTION_INPUTS_TABLE,
    CREATE_TRANSACTION_INPUTS_KEY_IMAGE_INDEX,
    CREATE_TRANSACTION_OUTPUTS_TABLE,
    CREATE_TRANSACTION_OUTPUTS_KEY_INDEX,
    CREATE_TRANSACTION_POOL_TABLE,
    CREATE_INFORMATION_TABLE,
];

/// Every table, children before parents.
pub const TABLES: &[&str] = &[
    "transaction_inputs",
    "transaction_outputs",
    "transactions",
    "blocks",
    "transaction_pool",
    "information",
];

/// Statements that empty every table, children before parents.
pub const TRUNCATE: &[&str] = &[
    "DELETE FROM transaction_inputs",
    "DELETE FROM transaction_outputs",
    "DELETE FROM transactions",
    "DELETE FROM blocks",
    "DELETE FROM transaction_pool",
    "DELETE FROM information",
];
