use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;
use serde_json::json;

use crate::error::{Result, TallyError};
use crate::ledger;
use crate::models::{BatchStatus, ImportBatch, ImportOptions, RawRecord, RowError, RowErrorCode, RowStatus};
use crate::normalizer;
use crate::reader::RecordReader;
use crate::store::{self, BatchCounters, EventLevel, StagedRow};

/// Staged rows are flushed to the store in chunks of this size.
pub const ROW_BUFFER_SIZE: usize = 250;

#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub total_rows: i64,
    pub valid_rows: i64,
    pub invalid_rows: i64,
}

#[derive(Debug, Default)]
struct StageStats {
    total_rows: i64,
    valid_rows: i64,
    invalid_rows: i64,
}

/// Parse-and-stage phase. Safe to re-run for a failed batch (staged
/// rows are cleared first); not safe to run concurrently for the same
/// batch — callers serialize.
pub fn process_batch(conn: &Connection, batch_id: i64) -> Result<BatchOutcome> {
    process_batch_with(conn, batch_id, ROW_BUFFER_SIZE)
}

pub fn process_batch_with(
    conn: &Connection,
    batch_id: i64,
    buffer_size: usize,
) -> Result<BatchOutcome> {
    let batch = store::find_batch(conn, batch_id)?.ok_or(TallyError::BatchNotFound(batch_id))?;

    let mut stats = StageStats::default();
    match run(conn, &batch, buffer_size, &mut stats) {
        Ok(outcome) => Ok(outcome),
        Err(error) => {
            // Whatever was read so far counts as failed; the error
            // still surfaces to the caller.
            store::fail_batch(conn, batch.id, stats.total_rows)?;
            store::record_event(conn, batch.id, EventLevel::Error, &error.to_string(), None)?;
            Err(error)
        }
    }
}

fn run(
    conn: &Connection,
    batch: &ImportBatch,
    buffer_size: usize,
    stats: &mut StageStats,
) -> Result<BatchOutcome> {
    let account = ledger::find_account(conn, batch.account_id)?
        .ok_or(TallyError::AccountGone(batch.account_id))?;

    let path = Path::new(&batch.filepath);
    if !path.is_file() {
        return Err(TallyError::UnreadableFile(batch.filepath.clone()));
    }
    let options = ImportOptions::resolve(batch.metadata.as_deref(), path)?;

    store::mark_batch_processing(conn, batch.id)?;
    store::record_event(
        conn,
        batch.id,
        EventLevel::Info,
        "Processing started",
        Some(json!({ "file_type": options.file_type.as_str() })),
    )?;
    store::clear_rows(conn, batch.id)?;

    let reader = RecordReader::open(path, options.file_type)?;
    let mut buffer: Vec<StagedRow> = Vec::with_capacity(buffer_size.max(1));
    let mut seen_checksums: HashSet<String> = HashSet::new();
    let mut row_number = 0i64;

    for item in reader {
        let raw = item?;
        row_number += 1;
        stats.total_rows += 1;

        let mut outcome = normalizer::normalize(&raw, account.id, &options);

        // File-internal dedup: a fingerprint already seen in this same
        // file turns the repeat into an error row.
        if let Ok(record) = &outcome {
            if let Some(checksum) = &record.checksum {
                if !seen_checksums.insert(checksum.clone()) {
                    outcome = Err(RowError::new(
                        RowErrorCode::DuplicateRow,
                        "Duplicate row within the file",
                    ));
                }
            }
        }

        match &outcome {
            Ok(_) => stats.valid_rows += 1,
            Err(_) => stats.invalid_rows += 1,
        }

        buffer.push(build_staged_row(row_number, &raw, outcome)?);
        if buffer.len() >= buffer_size.max(1) {
            store::insert_rows(conn, batch.id, &buffer)?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        store::insert_rows(conn, batch.id, &buffer)?;
    }

    if stats.total_rows == 0 {
        return Err(TallyError::EmptyBatch);
    }

    let status = if stats.valid_rows > 0 {
        BatchStatus::Ready
    } else {
        BatchStatus::Failed
    };
    let counters = BatchCounters {
        total_rows: stats.total_rows,
        processed_rows: stats.total_rows,
        valid_rows: stats.valid_rows,
        invalid_rows: stats.invalid_rows,
        imported_rows: 0,
        failed_rows: if status == BatchStatus::Failed {
            stats.total_rows
        } else {
            0
        },
    };
    store::finalize_batch(conn, batch.id, status, &counters)?;
    store::record_event(
        conn,
        batch.id,
        EventLevel::Info,
        "Processing finished",
        Some(json!({
            "status": status.as_str(),
            "valid_rows": stats.valid_rows,
            "invalid_rows": stats.invalid_rows,
        })),
    )?;

    Ok(BatchOutcome {
        batch_id: batch.id,
        status,
        total_rows: stats.total_rows,
        valid_rows: stats.valid_rows,
        invalid_rows: stats.invalid_rows,
    })
}

/// Combine raw snapshot, normalization outcome, and error slot into the
/// row shape the staging store persists. Only valid rows carry the
/// normalized columns and payload.
fn build_staged_row(
    row_number: i64,
    raw: &RawRecord,
    outcome: std::result::Result<crate::models::NormalizedRecord, RowError>,
) -> Result<StagedRow> {
    let raw_payload = serde_json::to_string(raw)?;
    match outcome {
        Ok(record) => Ok(StagedRow {
            row_number,
            status: RowStatus::Valid,
            transaction_type: Some(record.transaction_type.as_str()),
            amount_cents: Some(record.amount_cents),
            occurred_at: Some(record.occurred_at),
            description: Some(record.description.clone()),
            reference: record.reference.clone(),
            checksum: record.checksum.clone(),
            normalized_payload: Some(serde_json::to_string(&record)?),
            raw_payload,
            error_code: None,
            error_message: None,
        }),
        Err(error) => Ok(StagedRow {
            row_number,
            status: RowStatus::Invalid,
            transaction_type: None,
            amount_cents: None,
            occurred_at: None,
            description: None,
            reference: None,
            checksum: None,
            normalized_payload: None,
            raw_payload,
            error_code: Some(error.code.as_str()),
            error_message: Some(error.message),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        conn.execute("INSERT INTO accounts (name) VALUES ('Test Checking')", [])
            .unwrap();
        (dir, conn)
    }

    fn write_statement(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    fn create_batch(conn: &Connection, filepath: &str) -> i64 {
        let name = Path::new(filepath)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        store::create_batch(conn, 1, &name, filepath, Some(r#"{"timezone":"UTC"}"#)).unwrap()
    }

    #[test]
    fn test_csv_end_to_end() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\n2024-01-05,Office Rent,-1500.00\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch(&conn, batch_id).unwrap();
        assert_eq!(outcome.status, BatchStatus::Ready);
        assert_eq!(outcome.total_rows, 1);
        assert_eq!(outcome.valid_rows, 1);

        let batch = store::find_batch(&conn, batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Ready);
        assert_eq!(batch.valid_rows, 1);
        assert_eq!(batch.processed_rows, 1);
        assert!(batch.started_at.is_some());
        assert!(batch.completed_at.is_some());

        let rows = store::rows_for_batch(&conn, batch_id, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RowStatus::Valid);
        assert_eq!(rows[0].amount_cents, Some(150_000));
        assert_eq!(rows[0].transaction_type.as_deref(), Some("debit"));
        assert!(rows[0].checksum.is_some());
        assert!(rows[0].normalized_payload.is_some());
    }

    #[test]
    fn test_ofx_end_to_end() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.ofx",
            "<STMTTRN><DTPOSTED>20240105</DTPOSTED><TRNAMT>250.00</TRNAMT>\
             <NAME>Client X</NAME></STMTTRN>",
        );
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch(&conn, batch_id).unwrap();
        assert_eq!(outcome.status, BatchStatus::Ready);
        assert_eq!(outcome.valid_rows, 1);

        let rows = store::rows_for_batch(&conn, batch_id, None, 10).unwrap();
        assert_eq!(rows[0].transaction_type.as_deref(), Some("credit"));
        assert_eq!(rows[0].amount_cents, Some(25_000));
        assert_eq!(rows[0].description.as_deref(), Some("Client X"));
    }

    #[test]
    fn test_in_file_duplicate_becomes_error_row() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\n\
             2024-01-05,Rent,-50.00\n\
             2024-01-05,Rent,-50.00\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch(&conn, batch_id).unwrap();
        assert_eq!(outcome.total_rows, 2);
        assert_eq!(outcome.valid_rows, 1);
        assert_eq!(outcome.invalid_rows, 1);

        let rows = store::rows_for_batch(&conn, batch_id, None, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, RowStatus::Valid);
        assert_eq!(rows[1].status, RowStatus::Invalid);
        assert_eq!(rows[1].error_code.as_deref(), Some("duplicate_row"));
    }

    #[test]
    fn test_invalid_rows_do_not_stop_the_stream() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\n\
             bad-date,Rent,-50.00\n\
             2024-01-06,,10.00\n\
             2024-01-07,Deposit,not-a-number\n\
             2024-01-08,Deposit,100.00\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch(&conn, batch_id).unwrap();
        assert_eq!(outcome.status, BatchStatus::Ready);
        assert_eq!(outcome.total_rows, 4);
        assert_eq!(outcome.valid_rows, 1);
        assert_eq!(outcome.invalid_rows, 3);

        let rows = store::rows_for_batch(&conn, batch_id, None, 10).unwrap();
        assert_eq!(rows[0].error_code.as_deref(), Some("invalid_date"));
        assert_eq!(rows[1].error_code.as_deref(), Some("missing_description"));
        assert_eq!(rows[2].error_code.as_deref(), Some("invalid_amount"));
        assert_eq!(rows[3].status, RowStatus::Valid);
    }

    #[test]
    fn test_all_invalid_marks_batch_failed() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\nbad,Rent,worse\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch(&conn, batch_id).unwrap();
        assert_eq!(outcome.status, BatchStatus::Failed);
        let batch = store::find_batch(&conn, batch_id).unwrap().unwrap();
        assert_eq!(batch.failed_rows, 1);
    }

    #[test]
    fn test_missing_required_column_fails_before_staging() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description\n2024-01-05,Rent\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        let err = process_batch(&conn, batch_id).unwrap_err();
        assert!(matches!(err, TallyError::MissingColumn("amount")));

        let batch = store::find_batch(&conn, batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(store::rows_for_batch(&conn, batch_id, None, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let (_dir, conn) = test_db();
        let batch_id = create_batch(&conn, "/nonexistent/stmt.csv");
        let err = process_batch(&conn, batch_id).unwrap_err();
        assert!(matches!(err, TallyError::UnreadableFile(_)));
        let batch = store::find_batch(&conn, batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
    }

    #[test]
    fn test_missing_account_is_fatal() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\n2024-01-05,Rent,-50.00\n",
        );
        let batch_id = create_batch(&conn, &filepath);
        conn.execute("PRAGMA foreign_keys=OFF", []).unwrap();
        conn.execute("DELETE FROM accounts", []).unwrap();

        let err = process_batch(&conn, batch_id).unwrap_err();
        assert!(matches!(err, TallyError::AccountGone(1)));
    }

    #[test]
    fn test_unknown_batch_is_fatal() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            process_batch(&conn, 404),
            Err(TallyError::BatchNotFound(404))
        ));
    }

    #[test]
    fn test_reprocessing_clears_previous_rows() {
        let (dir, conn) = test_db();
        let filepath = write_statement(
            dir.path(),
            "stmt.csv",
            "date,description,amount\n2024-01-05,Rent,-50.00\n2024-01-06,Power,-30.00\n",
        );
        let batch_id = create_batch(&conn, &filepath);

        process_batch(&conn, batch_id).unwrap();
        process_batch(&conn, batch_id).unwrap();

        let rows = store::rows_for_batch(&conn, batch_id, None, 10).unwrap();
        assert_eq!(rows.len(), 2);
        let batch = store::find_batch(&conn, batch_id).unwrap().unwrap();
        assert_eq!(batch.total_rows, 2);
    }

    #[test]
    fn test_buffer_flush_handles_small_chunks() {
        let (dir, conn) = test_db();
        let mut content = String::from("date,description,amount\n");
        for i in 1..=7 {
            content.push_str(&format!("2024-01-{i:02},Item {i},-{i}.00\n"));
        }
        let filepath = write_statement(dir.path(), "stmt.csv", &content);
        let batch_id = create_batch(&conn, &filepath);

        let outcome = process_batch_with(&conn, batch_id, 3).unwrap();
        assert_eq!(outcome.total_rows, 7);
        assert_eq!(outcome.valid_rows, 7);
        let rows = store::rows_for_batch(&conn, batch_id, None, 20).unwrap();
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[6].row_number, 7);
    }
}
