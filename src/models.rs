use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// One raw source record: lower-cased field name -> trimmed value.
pub type RawRecord = BTreeMap<String, String>;

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub institution: Option<String>,
    pub currency: String,
    pub current_balance_cents: i64,
}

#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub id: i64,
    pub account_id: i64,
    pub filename: String,
    pub filepath: String,
    pub status: BatchStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub valid_rows: i64,
    pub invalid_rows: i64,
    pub imported_rows: i64,
    pub failed_rows: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub metadata: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct ImportRow {
    pub id: i64,
    pub batch_id: i64,
    pub row_number: i64,
    pub status: RowStatus,
    pub transaction_type: Option<String>,
    pub amount_cents: Option<i64>,
    pub occurred_at: Option<i64>,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub checksum: Option<String>,
    pub raw_payload: Option<String>,
    pub normalized_payload: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub transaction_id: Option<i64>,
    pub imported_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Status machines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Processing,
    Ready,
    Importing,
    Completed,
    Failed,
    Canceled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Importing => "importing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "ready" => Self::Ready,
            "importing" => Self::Importing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// Decide the batch status after a review-phase mutation. Terminal
    /// statuses are never downgraded; otherwise the row summary drives
    /// the transition.
    pub fn after_review(self, summary: &RowStatusSummary) -> Self {
        if self.is_terminal() {
            return self;
        }
        if summary.valid == 0 && summary.pending == 0 {
            Self::Completed
        } else if summary.imported > 0 || summary.skipped > 0 || summary.error > 0 {
            Self::Importing
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Valid,
    Invalid,
    Imported,
    Skipped,
    Error,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Imported => "imported",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            "imported" => Self::Imported,
            "skipped" => Self::Skipped,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// Per-status row counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowStatusSummary {
    pub pending: i64,
    pub valid: i64,
    pub invalid: i64,
    pub imported: i64,
    pub skipped: i64,
    pub error: i64,
}

impl RowStatusSummary {
    pub fn total(&self) -> i64 {
        self.pending + self.valid + self.invalid + self.imported + self.skipped + self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    pub fn from_signed_cents(cents: i64) -> Self {
        if cents >= 0 {
            Self::Credit
        } else {
            Self::Debit
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization output
// ---------------------------------------------------------------------------

/// Canonical transaction produced by normalization and staged as the
/// row's normalized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub transaction_type: TransactionType,
    pub amount_cents: i64,
    pub signed_amount_cents: i64,
    pub occurred_at: i64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_center_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_cost_center_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowErrorCode {
    MissingDate,
    MissingDescription,
    MissingAmount,
    InvalidDate,
    InvalidAmount,
    DuplicateRow,
    InvalidPayload,
    MissingChecksum,
    DuplicateExisting,
    TransactionError,
    SkippedManual,
}

impl RowErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDate => "missing_date",
            Self::MissingDescription => "missing_description",
            Self::MissingAmount => "missing_amount",
            Self::InvalidDate => "invalid_date",
            Self::InvalidAmount => "invalid_amount",
            Self::DuplicateRow => "duplicate_row",
            Self::InvalidPayload => "invalid_payload",
            Self::MissingChecksum => "missing_checksum",
            Self::DuplicateExisting => "duplicate_existing",
            Self::TransactionError => "transaction_error",
            Self::SkippedManual => "skipped_manual",
        }
    }
}

/// Expected, non-fatal outcome for one row. Carried as data so a bad
/// row never interrupts the stream.
#[derive(Debug, Clone)]
pub struct RowError {
    pub code: RowErrorCode,
    pub message: String,
}

impl RowError {
    pub fn new(code: RowErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Ofx,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Ofx => "ofx",
        }
    }
}

pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

/// Batch-level options decoded from the batch metadata blob.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub file_type: FileType,
    pub timezone: chrono_tz::Tz,
    pub default_cost_center_id: Option<i64>,
    pub category_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchMetadata {
    file_type: Option<String>,
    timezone: Option<String>,
    default_cost_center_id: Option<i64>,
    category_prefix: Option<String>,
}

impl ImportOptions {
    /// Resolve options from the stored metadata blob, falling back to
    /// the file extension for the format and to the default timezone.
    pub fn resolve(metadata: Option<&str>, filepath: &Path) -> Result<Self> {
        let meta: BatchMetadata = match metadata {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_default(),
            _ => BatchMetadata::default(),
        };

        let file_type = meta
            .file_type
            .map(|t| t.to_lowercase())
            .or_else(|| {
                filepath
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
            })
            .unwrap_or_else(|| "ofx".to_string());
        let file_type = if file_type == "csv" {
            FileType::Csv
        } else {
            FileType::Ofx
        };

        let tz_name = meta.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| TallyError::InvalidTimezone(tz_name))?;

        let category_prefix = meta
            .category_prefix
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            file_type,
            timezone,
            default_cost_center_id: meta.default_cost_center_id,
            category_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_review_completes_when_nothing_left() {
        let summary = RowStatusSummary {
            imported: 3,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(
            BatchStatus::Importing.after_review(&summary),
            BatchStatus::Completed
        );
    }

    #[test]
    fn test_after_review_moves_to_importing_on_partial() {
        let summary = RowStatusSummary {
            valid: 2,
            imported: 1,
            ..Default::default()
        };
        assert_eq!(
            BatchStatus::Ready.after_review(&summary),
            BatchStatus::Importing
        );
    }

    #[test]
    fn test_after_review_never_downgrades_terminal() {
        let summary = RowStatusSummary {
            imported: 5,
            ..Default::default()
        };
        assert_eq!(BatchStatus::Failed.after_review(&summary), BatchStatus::Failed);
        assert_eq!(
            BatchStatus::Canceled.after_review(&summary),
            BatchStatus::Canceled
        );
    }

    #[test]
    fn test_after_review_holds_ready_with_no_outcomes() {
        let summary = RowStatusSummary {
            valid: 4,
            invalid: 1,
            ..Default::default()
        };
        assert_eq!(BatchStatus::Ready.after_review(&summary), BatchStatus::Ready);
    }

    #[test]
    fn test_options_default_to_extension_and_timezone() {
        let opts = ImportOptions::resolve(None, Path::new("/tmp/statement.csv")).unwrap();
        assert_eq!(opts.file_type, FileType::Csv);
        assert_eq!(opts.timezone.name(), "America/Sao_Paulo");
        assert!(opts.default_cost_center_id.is_none());
    }

    #[test]
    fn test_options_metadata_wins_over_extension() {
        let meta = r#"{"file_type":"ofx","timezone":"UTC","default_cost_center_id":7}"#;
        let opts = ImportOptions::resolve(Some(meta), Path::new("/tmp/statement.csv")).unwrap();
        assert_eq!(opts.file_type, FileType::Ofx);
        assert_eq!(opts.timezone.name(), "UTC");
        assert_eq!(opts.default_cost_center_id, Some(7));
    }

    #[test]
    fn test_options_reject_bad_timezone() {
        let meta = r#"{"timezone":"Not/AZone"}"#;
        assert!(ImportOptions::resolve(Some(meta), Path::new("/tmp/x.csv")).is_err());
    }

    #[test]
    fn test_unknown_extension_falls_back_to_ofx() {
        let opts = ImportOptions::resolve(None, Path::new("/tmp/statement.txt")).unwrap();
        assert_eq!(opts.file_type, FileType::Ofx);
    }
}
