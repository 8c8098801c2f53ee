use std::path::PathBuf;

use anyhow::bail;
use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::error::TallyError;
use crate::fmt::{batch_status, money_cents, row_status, timestamp};
use crate::ledger::find_account_by_name;
use crate::models::RowStatus;
use crate::processor::process_batch;
use crate::settings::db_path;
use crate::store;

pub fn create(
    file: &str,
    account: &str,
    file_type: Option<&str>,
    timezone: Option<&str>,
    cost_center_id: Option<i64>,
    category_prefix: Option<&str>,
) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    let account = find_account_by_name(&conn, account)?
        .ok_or_else(|| TallyError::UnknownAccount(account.to_string()))?;

    let path = PathBuf::from(file);
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    if !path.is_file() {
        bail!("Statement file not found: {}", path.display());
    }

    if let Some(ft) = file_type {
        if ft != "csv" && ft != "ofx" {
            bail!("Unsupported file type: {ft} (expected csv or ofx)");
        }
    }
    if let Some(tz) = timezone {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            bail!("Invalid timezone: {tz}");
        }
    }

    let mut meta = serde_json::Map::new();
    if let Some(ft) = file_type {
        meta.insert("file_type".to_string(), ft.into());
    }
    if let Some(tz) = timezone {
        meta.insert("timezone".to_string(), tz.into());
    }
    if let Some(cc) = cost_center_id {
        meta.insert("default_cost_center_id".to_string(), cc.into());
    }
    if let Some(prefix) = category_prefix {
        meta.insert("category_prefix".to_string(), prefix.into());
    }
    let metadata = if meta.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(meta).to_string())
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    let batch_id = store::create_batch(
        &conn,
        account.id,
        &filename,
        &path.to_string_lossy(),
        metadata.as_deref(),
    )?;

    println!("Created batch {batch_id} for account '{}'", account.name);
    println!("Next: tally batch process {batch_id}");
    Ok(())
}

pub fn process(batch_id: i64) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    let outcome = process_batch(&conn, batch_id)?;
    println!(
        "Batch {} is {}: {} rows ({} valid, {} invalid)",
        outcome.batch_id,
        batch_status(outcome.status),
        outcome.total_rows,
        outcome.valid_rows,
        outcome.invalid_rows
    );
    Ok(())
}

pub fn show(batch_id: i64) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    let batch = store::find_batch(&conn, batch_id)?.ok_or(TallyError::BatchNotFound(batch_id))?;

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("File"), Cell::new(&batch.filename)]);
    table.add_row(vec![Cell::new("Status"), Cell::new(batch_status(batch.status))]);
    table.add_row(vec![Cell::new("Total rows"), Cell::new(batch.total_rows)]);
    table.add_row(vec![Cell::new("Processed"), Cell::new(batch.processed_rows)]);
    table.add_row(vec![Cell::new("Valid"), Cell::new(batch.valid_rows)]);
    table.add_row(vec![Cell::new("Invalid"), Cell::new(batch.invalid_rows)]);
    table.add_row(vec![Cell::new("Imported"), Cell::new(batch.imported_rows)]);
    table.add_row(vec![Cell::new("Failed"), Cell::new(batch.failed_rows)]);
    if let Some(ts) = batch.started_at {
        table.add_row(vec![Cell::new("Started"), Cell::new(timestamp(ts))]);
    }
    if let Some(ts) = batch.completed_at {
        table.add_row(vec![Cell::new("Completed"), Cell::new(timestamp(ts))]);
    }
    println!("Batch {batch_id}\n{table}");

    let events = store::events_for_batch(&conn, batch_id, 10)?;
    if !events.is_empty() {
        println!("\nRecent events:");
        for event in events {
            println!("  [{}] {}", event.level, event.message);
        }
    }
    Ok(())
}

pub fn rows(batch_id: i64, status: Option<&str>, limit: i64) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    store::find_batch(&conn, batch_id)?.ok_or(TallyError::BatchNotFound(batch_id))?;

    let filter = status.map(RowStatus::parse);
    let rows = store::rows_for_batch(&conn, batch_id, filter, limit)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "#", "Status", "Type", "Amount", "Description", "Error"]);
    for row in &rows {
        let error = match (&row.error_code, &row.error_message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.clone(),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(row.row_number),
            Cell::new(row_status(row.status)),
            Cell::new(row.transaction_type.as_deref().unwrap_or("")),
            Cell::new(row.amount_cents.map(money_cents).unwrap_or_default()),
            Cell::new(row.description.as_deref().unwrap_or("")),
            Cell::new(error),
        ]);
    }
    println!("Rows of batch {batch_id}\n{table}");
    Ok(())
}
