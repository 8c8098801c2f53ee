use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Import batch {0} not found")]
    BatchNotFound(i64),

    #[error("Account {0} linked to this batch no longer exists")]
    AccountGone(i64),

    #[error("Statement file is not readable: {0}")]
    UnreadableFile(String),

    #[error("Statement file is empty")]
    EmptyFile,

    #[error("Statement file has no header line")]
    MissingHeader,

    #[error("Statement file is missing the required \"{0}\" column")]
    MissingColumn(&'static str),

    #[error("No transaction blocks found in the statement file")]
    NoTransactionBlocks,

    #[error("No transactions were found in the uploaded file")]
    EmptyBatch,

    #[error("Batch {0} is not ready for import (status: {1})")]
    BatchNotReady(i64, String),

    #[error("No eligible rows available for import")]
    NoEligibleRows,

    #[error("Row {0} not found in this batch")]
    RowNotFound(i64),

    #[error("Row {0} is already imported and cannot be skipped")]
    RowAlreadyImported(i64),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
