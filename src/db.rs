use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    institution TEXT,
    currency TEXT NOT NULL DEFAULT 'BRL',
    initial_balance_cents INTEGER NOT NULL DEFAULT 0,
    current_balance_cents INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    cost_center_id INTEGER,
    transaction_type TEXT NOT NULL DEFAULT 'debit',
    description TEXT,
    amount_cents INTEGER NOT NULL,
    balance_after INTEGER,
    occurred_at INTEGER NOT NULL,
    reference TEXT,
    source TEXT NOT NULL DEFAULT 'manual',
    source_payload TEXT,
    metadata TEXT,
    import_row_id INTEGER,
    checksum TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_occurred_at ON transactions(occurred_at);
CREATE INDEX IF NOT EXISTS idx_transactions_checksum ON transactions(checksum);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    filename TEXT NOT NULL,
    filepath TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_rows INTEGER NOT NULL DEFAULT 0,
    processed_rows INTEGER NOT NULL DEFAULT 0,
    valid_rows INTEGER NOT NULL DEFAULT 0,
    invalid_rows INTEGER NOT NULL DEFAULT 0,
    imported_rows INTEGER NOT NULL DEFAULT 0,
    failed_rows INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER,
    completed_at INTEGER,
    metadata TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_import_batches_account ON import_batches(account_id);
CREATE INDEX IF NOT EXISTS idx_import_batches_status ON import_batches(status);

CREATE TABLE IF NOT EXISTS import_rows (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    row_number INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    transaction_type TEXT,
    amount_cents INTEGER,
    occurred_at INTEGER,
    description TEXT,
    reference TEXT,
    checksum TEXT,
    raw_payload TEXT,
    normalized_payload TEXT,
    error_code TEXT,
    error_message TEXT,
    transaction_id INTEGER,
    imported_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_import_rows_batch ON import_rows(batch_id);
CREATE INDEX IF NOT EXISTS idx_import_rows_status ON import_rows(status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_import_rows_checksum ON import_rows(batch_id, checksum);

CREATE TABLE IF NOT EXISTS import_events (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    context TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_import_events_batch ON import_events(batch_id);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Epoch seconds, the timestamp unit used across every table.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
