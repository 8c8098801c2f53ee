use colored::Colorize;

use crate::models::{BatchStatus, RowStatus};

/// Format minor units as a decimal amount with thousands separators:
/// 123456 -> "1,234.56".
pub fn money_cents(cents: i64) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let int_part = (abs / 100).to_string();
    let dec_part = abs % 100;

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-{with_commas}.{dec_part:02}")
    } else {
        format!("{with_commas}.{dec_part:02}")
    }
}

/// Render an epoch-seconds timestamp for display (UTC).
pub fn timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

pub fn batch_status(status: BatchStatus) -> String {
    let s = status.as_str();
    match status {
        BatchStatus::Ready | BatchStatus::Completed => s.green().to_string(),
        BatchStatus::Failed | BatchStatus::Canceled => s.red().to_string(),
        BatchStatus::Processing | BatchStatus::Importing => s.yellow().to_string(),
        BatchStatus::Pending => s.dimmed().to_string(),
    }
}

pub fn row_status(status: RowStatus) -> String {
    let s = status.as_str();
    match status {
        RowStatus::Valid | RowStatus::Imported => s.green().to_string(),
        RowStatus::Invalid | RowStatus::Error => s.red().to_string(),
        RowStatus::Skipped => s.yellow().to_string(),
        RowStatus::Pending => s.dimmed().to_string(),
    }
}
