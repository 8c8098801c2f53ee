use rusqlite::Connection;
use serde_json::json;

use crate::db::now;
use crate::error::{Result, TallyError};
use crate::ledger::{self, NewTransaction};
use crate::models::{BatchStatus, ImportBatch, ImportRow, NormalizedRecord, RowErrorCode, RowStatus};
use crate::normalizer::MAX_REFERENCE_CHARS;
use crate::store::{self, EventLevel};

/// Cross-batch dedup looks this far back into the ledger.
pub const DUPLICATE_WINDOW_SECS: i64 = 90 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: i64,
    pub errors: i64,
    pub duplicates: i64,
}

/// Commit a chosen subset (or all eligible rows) of a ready batch into
/// the ledger. One row's failure never aborts the loop; everything is
/// reported through row state and the returned stats.
pub fn import_rows(
    conn: &Connection,
    batch_id: i64,
    row_ids: Option<&[i64]>,
    override_duplicates: bool,
) -> Result<ImportStats> {
    let batch = store::find_batch(conn, batch_id)?.ok_or(TallyError::BatchNotFound(batch_id))?;
    if !matches!(batch.status, BatchStatus::Ready | BatchStatus::Importing) {
        return Err(TallyError::BatchNotReady(
            batch_id,
            batch.status.as_str().to_string(),
        ));
    }

    let rows = store::rows_for_import(conn, batch_id, row_ids)?;
    if rows.is_empty() {
        return Err(TallyError::NoEligibleRows);
    }

    let mut stats = ImportStats::default();
    let now_ts = now();
    let since = now_ts - DUPLICATE_WINDOW_SECS;

    for row in &rows {
        let normalized = match decode_payload(row) {
            Some(record) => record,
            None => {
                store::mark_row_error(
                    conn,
                    row.id,
                    RowErrorCode::InvalidPayload.as_str(),
                    "Normalized payload is missing or corrupt",
                )?;
                stats.errors += 1;
                continue;
            }
        };

        let checksum = match resolve_checksum(row, &normalized) {
            Some(checksum) => checksum,
            None => {
                store::mark_row_error(
                    conn,
                    row.id,
                    RowErrorCode::MissingChecksum.as_str(),
                    "Row has no computed checksum",
                )?;
                stats.errors += 1;
                continue;
            }
        };

        if !override_duplicates
            && ledger::find_by_checksum(conn, batch.account_id, &checksum, Some(since))?.is_some()
        {
            store::mark_row_error(
                conn,
                row.id,
                RowErrorCode::DuplicateExisting.as_str(),
                "A ledger transaction with this checksum already exists",
            )?;
            stats.errors += 1;
            stats.duplicates += 1;
            store::record_event(
                conn,
                batch_id,
                EventLevel::Warning,
                "Row blocked as duplicate",
                Some(json!({ "row_id": row.id, "checksum": checksum })),
            )?;
            continue;
        }

        let txn = build_transaction(&batch, row, &normalized, &checksum);
        match ledger::create_transaction(conn, &txn) {
            Ok(transaction_id) => {
                store::mark_row_imported(conn, row.id, transaction_id, now_ts)?;
                stats.imported += 1;
                store::record_event(
                    conn,
                    batch_id,
                    EventLevel::Info,
                    "Row imported",
                    Some(json!({
                        "row_id": row.id,
                        "transaction_id": transaction_id,
                        "checksum": checksum,
                    })),
                )?;
            }
            Err(error) => {
                let message = error.to_string();
                store::mark_row_error(
                    conn,
                    row.id,
                    RowErrorCode::TransactionError.as_str(),
                    &message,
                )?;
                stats.errors += 1;
                store::record_event(
                    conn,
                    batch_id,
                    EventLevel::Error,
                    "Row import failed",
                    Some(json!({ "row_id": row.id, "message": message })),
                )?;
            }
        }
    }

    if stats.imported > 0 {
        ledger::recalculate_balance(conn, batch.account_id)?;
    }

    let summary = store::row_status_summary(conn, batch_id)?;
    let status = batch.status.after_review(&summary);
    store::refresh_batch(conn, batch_id, status, &summary, batch.total_rows)?;
    store::record_event(
        conn,
        batch_id,
        EventLevel::Info,
        "Import summary",
        Some(json!({
            "imported": stats.imported,
            "errors": stats.errors,
            "duplicates": stats.duplicates,
            "remaining_valid": summary.valid,
            "rows": summary.total(),
        })),
    )?;

    Ok(stats)
}

/// Mark one staged row as skipped. Already-imported rows reject this.
pub fn skip_row(
    conn: &Connection,
    batch_id: i64,
    row_id: i64,
    reason: Option<&str>,
) -> Result<()> {
    let batch = store::find_batch(conn, batch_id)?.ok_or(TallyError::BatchNotFound(batch_id))?;
    let row = store::row_by_id(conn, batch_id, row_id)?.ok_or(TallyError::RowNotFound(row_id))?;

    if row.status == RowStatus::Imported {
        return Err(TallyError::RowAlreadyImported(row_id));
    }

    let message = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Manually marked as skipped");

    store::mark_row_skipped(conn, row.id, RowErrorCode::SkippedManual.as_str(), message)?;
    store::record_event(
        conn,
        batch_id,
        EventLevel::Warning,
        "Row skipped",
        Some(json!({ "row_id": row_id, "reason": message })),
    )?;

    let summary = store::row_status_summary(conn, batch_id)?;
    let status = batch.status.after_review(&summary);
    store::refresh_batch(conn, batch_id, status, &summary, batch.total_rows)?;
    Ok(())
}

fn decode_payload(row: &ImportRow) -> Option<NormalizedRecord> {
    row.normalized_payload
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .and_then(|p| serde_json::from_str(p).ok())
}

fn resolve_checksum(row: &ImportRow, normalized: &NormalizedRecord) -> Option<String> {
    row.checksum
        .clone()
        .filter(|c| !c.is_empty())
        .or_else(|| normalized.checksum.clone().filter(|c| !c.is_empty()))
}

/// Row hint wins when it names a positive cost-center id, else the
/// batch default applies.
fn resolve_cost_center(normalized: &NormalizedRecord) -> Option<i64> {
    normalized
        .cost_center_code
        .as_deref()
        .and_then(|code| code.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .or(normalized.default_cost_center_id.filter(|id| *id > 0))
}

fn build_transaction(
    batch: &ImportBatch,
    row: &ImportRow,
    normalized: &NormalizedRecord,
    checksum: &str,
) -> NewTransaction {
    let reference = normalized
        .reference
        .clone()
        .or_else(|| row.reference.clone())
        .map(|r| r.chars().take(MAX_REFERENCE_CHARS).collect());

    let metadata = json!({
        "import_batch_id": batch.id,
        "row_number": row.row_number,
        "signed_amount_cents": normalized.signed_amount_cents,
    });

    NewTransaction {
        account_id: batch.account_id,
        cost_center_id: resolve_cost_center(normalized),
        transaction_type: normalized.transaction_type,
        description: normalized.description.clone(),
        amount_cents: normalized.amount_cents,
        occurred_at: normalized.occurred_at,
        reference,
        source: "import",
        source_payload: row.raw_payload.clone(),
        metadata: Some(metadata.to_string()),
        import_row_id: Some(row.id),
        checksum: Some(checksum.to_string()),
    }
}
