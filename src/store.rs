use rusqlite::{params, Connection};

use crate::db::now;
use crate::error::Result;
use crate::models::{BatchStatus, ImportBatch, ImportRow, RowStatus, RowStatusSummary};

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

pub fn create_batch(
    conn: &Connection,
    account_id: i64,
    filename: &str,
    filepath: &str,
    metadata: Option<&str>,
) -> Result<i64> {
    let ts = now();
    conn.execute(
        "INSERT INTO import_batches (account_id, filename, filepath, status, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
        params![account_id, filename, filepath, metadata, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_batch(conn: &Connection, batch_id: i64) -> Result<Option<ImportBatch>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, filename, filepath, status, total_rows, processed_rows, \
                valid_rows, invalid_rows, imported_rows, failed_rows, started_at, completed_at, metadata \
         FROM import_batches WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map([batch_id], |row| {
        Ok(ImportBatch {
            id: row.get(0)?,
            account_id: row.get(1)?,
            filename: row.get(2)?,
            filepath: row.get(3)?,
            status: BatchStatus::parse(&row.get::<_, String>(4)?),
            total_rows: row.get(5)?,
            processed_rows: row.get(6)?,
            valid_rows: row.get(7)?,
            invalid_rows: row.get(8)?,
            imported_rows: row.get(9)?,
            failed_rows: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
            metadata: row.get(13)?,
        })
    })?;
    Ok(rows.next().transpose()?)
}

pub fn mark_batch_processing(conn: &Connection, batch_id: i64) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_batches SET status = 'processing', started_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![ts, batch_id],
    )?;
    Ok(())
}

/// Final counter set written once at the end of the parse phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCounters {
    pub total_rows: i64,
    pub processed_rows: i64,
    pub valid_rows: i64,
    pub invalid_rows: i64,
    pub imported_rows: i64,
    pub failed_rows: i64,
}

pub fn finalize_batch(
    conn: &Connection,
    batch_id: i64,
    status: BatchStatus,
    counters: &BatchCounters,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_batches SET status = ?1, total_rows = ?2, processed_rows = ?3, \
                valid_rows = ?4, invalid_rows = ?5, imported_rows = ?6, failed_rows = ?7, \
                completed_at = ?8, updated_at = ?8 \
         WHERE id = ?9",
        params![
            status.as_str(),
            counters.total_rows,
            counters.processed_rows,
            counters.valid_rows,
            counters.invalid_rows,
            counters.imported_rows,
            counters.failed_rows,
            ts,
            batch_id
        ],
    )?;
    Ok(())
}

pub fn fail_batch(conn: &Connection, batch_id: i64, failed_rows: i64) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_batches SET status = 'failed', failed_rows = ?1, completed_at = ?2, updated_at = ?2 \
         WHERE id = ?3",
        params![failed_rows, ts, batch_id],
    )?;
    Ok(())
}

/// Counter refresh after a review-phase mutation. `processed` derives
/// from total minus still-pending, `failed` from errors plus skips.
pub fn refresh_batch(
    conn: &Connection,
    batch_id: i64,
    status: BatchStatus,
    summary: &RowStatusSummary,
    total_rows: i64,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_batches SET status = ?1, valid_rows = ?2, invalid_rows = ?3, \
                imported_rows = ?4, failed_rows = ?5, processed_rows = ?6, updated_at = ?7 \
         WHERE id = ?8",
        params![
            status.as_str(),
            summary.valid,
            summary.invalid,
            summary.imported,
            summary.error + summary.skipped,
            (total_rows - summary.pending).max(0),
            ts,
            batch_id
        ],
    )?;
    Ok(())
}

pub fn batch_status_summary(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM import_batches GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn recent_batches(conn: &Connection, limit: i64) -> Result<Vec<ImportBatch>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, filename, filepath, status, total_rows, processed_rows, \
                valid_rows, invalid_rows, imported_rows, failed_rows, started_at, completed_at, metadata \
         FROM import_batches ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit.max(1)], |row| {
            Ok(ImportBatch {
                id: row.get(0)?,
                account_id: row.get(1)?,
                filename: row.get(2)?,
                filepath: row.get(3)?,
                status: BatchStatus::parse(&row.get::<_, String>(4)?),
                total_rows: row.get(5)?,
                processed_rows: row.get(6)?,
                valid_rows: row.get(7)?,
                invalid_rows: row.get(8)?,
                imported_rows: row.get(9)?,
                failed_rows: row.get(10)?,
                started_at: row.get(11)?,
                completed_at: row.get(12)?,
                metadata: row.get(13)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One staged row buffered by the parse phase before a bulk insert.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub row_number: i64,
    pub status: RowStatus,
    pub transaction_type: Option<&'static str>,
    pub amount_cents: Option<i64>,
    pub occurred_at: Option<i64>,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub checksum: Option<String>,
    pub raw_payload: String,
    pub normalized_payload: Option<String>,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

pub fn clear_rows(conn: &Connection, batch_id: i64) -> Result<()> {
    conn.execute("DELETE FROM import_rows WHERE batch_id = ?1", [batch_id])?;
    Ok(())
}

/// Bulk insert honoring the per-batch checksum unique index: a row
/// that collides is silently ignored by the store.
pub fn insert_rows(conn: &Connection, batch_id: i64, rows: &[StagedRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let ts = now();
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO import_rows (batch_id, row_number, status, transaction_type, \
                amount_cents, occurred_at, description, reference, checksum, raw_payload, \
                normalized_payload, error_code, error_message, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
    )?;
    for row in rows {
        stmt.execute(params![
            batch_id,
            row.row_number,
            row.status.as_str(),
            row.transaction_type,
            row.amount_cents,
            row.occurred_at,
            row.description,
            row.reference,
            row.checksum,
            row.raw_payload,
            row.normalized_payload,
            row.error_code,
            row.error_message,
            ts,
        ])?;
    }
    Ok(())
}

fn import_row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<ImportRow> {
    Ok(ImportRow {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        row_number: row.get(2)?,
        status: RowStatus::parse(&row.get::<_, String>(3)?),
        transaction_type: row.get(4)?,
        amount_cents: row.get(5)?,
        occurred_at: row.get(6)?,
        description: row.get(7)?,
        reference: row.get(8)?,
        checksum: row.get(9)?,
        raw_payload: row.get(10)?,
        normalized_payload: row.get(11)?,
        error_code: row.get(12)?,
        error_message: row.get(13)?,
        transaction_id: row.get(14)?,
        imported_at: row.get(15)?,
    })
}

const ROW_COLUMNS: &str = "id, batch_id, row_number, status, transaction_type, amount_cents, \
                           occurred_at, description, reference, checksum, raw_payload, \
                           normalized_payload, error_code, error_message, transaction_id, imported_at";

/// Rows eligible for commit: still `valid`, never linked to a ledger
/// transaction, optionally filtered to an id subset, in source order.
pub fn rows_for_import(
    conn: &Connection,
    batch_id: i64,
    row_ids: Option<&[i64]>,
) -> Result<Vec<ImportRow>> {
    let mut sql = format!(
        "SELECT {ROW_COLUMNS} FROM import_rows \
         WHERE batch_id = ?1 AND status = 'valid' AND transaction_id IS NULL"
    );
    let mut params_vec: Vec<i64> = vec![batch_id];

    if let Some(ids) = row_ids {
        let mut unique: Vec<i64> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (0..unique.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        sql.push_str(&format!(" AND id IN ({})", placeholders.join(", ")));
        params_vec.extend(unique);
    }

    sql.push_str(" ORDER BY row_number ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params_vec), import_row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn row_by_id(conn: &Connection, batch_id: i64, row_id: i64) -> Result<Option<ImportRow>> {
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM import_rows WHERE batch_id = ?1 AND id = ?2 LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![batch_id, row_id], import_row_from_sql)?;
    Ok(rows.next().transpose()?)
}

pub fn rows_for_batch(
    conn: &Connection,
    batch_id: i64,
    status: Option<RowStatus>,
    limit: i64,
) -> Result<Vec<ImportRow>> {
    let mut sql = format!("SELECT {ROW_COLUMNS} FROM import_rows WHERE batch_id = ?1");
    if status.is_some() {
        sql.push_str(" AND status = ?2");
    }
    sql.push_str(" ORDER BY row_number ASC LIMIT ");
    sql.push_str(&limit.max(1).to_string());

    let mut stmt = conn.prepare(&sql)?;
    let rows = match status {
        Some(s) => stmt
            .query_map(params![batch_id, s.as_str()], import_row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![batch_id], import_row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

pub fn row_status_summary(conn: &Connection, batch_id: i64) -> Result<RowStatusSummary> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM import_rows WHERE batch_id = ?1 GROUP BY status",
    )?;
    let mut summary = RowStatusSummary::default();
    let pairs = stmt.query_map([batch_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for pair in pairs {
        let (status, count) = pair?;
        match RowStatus::parse(&status) {
            RowStatus::Pending => summary.pending = count,
            RowStatus::Valid => summary.valid = count,
            RowStatus::Invalid => summary.invalid = count,
            RowStatus::Imported => summary.imported = count,
            RowStatus::Skipped => summary.skipped = count,
            RowStatus::Error => summary.error = count,
        }
    }
    Ok(summary)
}

pub fn mark_row_error(conn: &Connection, row_id: i64, code: &str, message: &str) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_rows SET status = 'error', error_code = ?1, error_message = ?2, \
                transaction_id = NULL, imported_at = NULL, updated_at = ?3 \
         WHERE id = ?4",
        params![code, message, ts, row_id],
    )?;
    Ok(())
}

pub fn mark_row_imported(
    conn: &Connection,
    row_id: i64,
    transaction_id: i64,
    imported_at: i64,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_rows SET status = 'imported', transaction_id = ?1, imported_at = ?2, \
                error_code = NULL, error_message = NULL, updated_at = ?3 \
         WHERE id = ?4",
        params![transaction_id, imported_at, ts, row_id],
    )?;
    Ok(())
}

pub fn mark_row_skipped(conn: &Connection, row_id: i64, code: &str, message: &str) -> Result<()> {
    let ts = now();
    conn.execute(
        "UPDATE import_rows SET status = 'skipped', error_code = ?1, error_message = ?2, \
                transaction_id = NULL, imported_at = NULL, updated_at = ?3 \
         WHERE id = ?4",
        params![code, message, ts, row_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct ImportEvent {
    pub id: i64,
    pub batch_id: i64,
    pub level: String,
    pub message: String,
    pub context: Option<String>,
    pub created_at: i64,
}

pub fn record_event(
    conn: &Connection,
    batch_id: i64,
    level: EventLevel,
    message: &str,
    context: Option<serde_json::Value>,
) -> Result<()> {
    let context = context.map(|c| c.to_string());
    conn.execute(
        "INSERT INTO import_events (batch_id, level, message, context, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![batch_id, level.as_str(), message, context, now()],
    )?;
    Ok(())
}

pub fn events_for_batch(conn: &Connection, batch_id: i64, limit: i64) -> Result<Vec<ImportEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_id, level, message, context, created_at \
         FROM import_events WHERE batch_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![batch_id, limit.max(1)], |row| {
            Ok(ImportEvent {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                level: row.get(2)?,
                message: row.get(3)?,
                context: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        conn.execute("INSERT INTO accounts (name) VALUES ('Test')", [])
            .unwrap();
        (dir, conn)
    }

    fn staged(row_number: i64, status: RowStatus, checksum: Option<&str>) -> StagedRow {
        StagedRow {
            row_number,
            status,
            transaction_type: Some("debit"),
            amount_cents: Some(5_000),
            occurred_at: Some(1_704_412_800),
            description: Some("Rent".to_string()),
            reference: None,
            checksum: checksum.map(str::to_string),
            raw_payload: "{}".to_string(),
            normalized_payload: Some("{}".to_string()),
            error_code: None,
            error_message: None,
        }
    }

    #[test]
    fn test_batch_roundtrip() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", Some("{}")).unwrap();
        let batch = find_batch(&conn, id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.filename, "f.csv");
        assert!(find_batch(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn test_insert_rows_and_summary() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        insert_rows(
            &conn,
            id,
            &[
                staged(1, RowStatus::Valid, Some("aaa")),
                staged(2, RowStatus::Invalid, None),
                staged(3, RowStatus::Valid, Some("bbb")),
            ],
        )
        .unwrap();
        let summary = row_status_summary(&conn, id).unwrap();
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_clear_rows_resets_staging() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        insert_rows(&conn, id, &[staged(1, RowStatus::Valid, Some("aaa"))]).unwrap();
        clear_rows(&conn, id).unwrap();
        assert_eq!(row_status_summary(&conn, id).unwrap().total(), 0);
    }

    #[test]
    fn test_rows_for_import_filters_and_orders() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        insert_rows(
            &conn,
            id,
            &[
                staged(2, RowStatus::Valid, Some("b")),
                staged(1, RowStatus::Valid, Some("a")),
                staged(3, RowStatus::Invalid, None),
            ],
        )
        .unwrap();
        let all = rows_for_import(&conn, id, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].row_number, 1);
        assert_eq!(all[1].row_number, 2);

        let subset = rows_for_import(&conn, id, Some(&[all[1].id, all[1].id])).unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].row_number, 2);

        assert!(rows_for_import(&conn, id, Some(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_row_status_mutations() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        insert_rows(&conn, id, &[staged(1, RowStatus::Valid, Some("a"))]).unwrap();
        let row = rows_for_import(&conn, id, None).unwrap().remove(0);

        mark_row_imported(&conn, row.id, 42, 1_704_412_800).unwrap();
        let row = row_by_id(&conn, id, row.id).unwrap().unwrap();
        assert_eq!(row.status, RowStatus::Imported);
        assert_eq!(row.transaction_id, Some(42));

        // Imported rows are no longer eligible.
        assert!(rows_for_import(&conn, id, None).unwrap().is_empty());
    }

    #[test]
    fn test_refresh_batch_counters() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        let summary = RowStatusSummary {
            valid: 1,
            imported: 2,
            skipped: 1,
            error: 1,
            ..Default::default()
        };
        refresh_batch(&conn, id, BatchStatus::Importing, &summary, 5).unwrap();
        let batch = find_batch(&conn, id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Importing);
        assert_eq!(batch.imported_rows, 2);
        assert_eq!(batch.failed_rows, 2);
        assert_eq!(batch.processed_rows, 5);
    }

    #[test]
    fn test_events_append_and_list() {
        let (_dir, conn) = test_db();
        let id = create_batch(&conn, 1, "f.csv", "/tmp/f.csv", None).unwrap();
        record_event(&conn, id, EventLevel::Info, "start", None).unwrap();
        record_event(
            &conn,
            id,
            EventLevel::Warning,
            "dup",
            Some(serde_json::json!({"row_id": 1})),
        )
        .unwrap();
        let events = events_for_batch(&conn, id, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, "warning");
        assert!(events[0].context.as_deref().unwrap().contains("row_id"));
    }
}
