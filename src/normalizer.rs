use std::sync::OnceLock;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::{
    ImportOptions, NormalizedRecord, RawRecord, RowError, RowErrorCode, TransactionType,
};

pub const MAX_DESCRIPTION_CHARS: usize = 255;
pub const MAX_REFERENCE_CHARS: usize = 120;

pub const REQUIRED_FIELDS: [&str; 3] = ["date", "description", "amount"];

/// Canonical field -> accepted raw header names, across locales and the
/// interchange tag vocabulary. First match wins.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("date", &["date", "data", "transaction_date", "posted_at", "dia"]),
    ("time", &["time", "hora", "transaction_time", "hour"]),
    (
        "description",
        &[
            "description",
            "descrição",
            "descricao",
            "memo",
            "detalhe",
            "historico",
            "histórico",
            "name",
        ],
    ),
    (
        "amount",
        &[
            "amount",
            "valor",
            "value",
            "amount_cents",
            "transaction_amount",
            "trnamt",
        ],
    ),
    (
        "reference",
        &[
            "reference",
            "documento",
            "doc",
            "id",
            "identificador",
            "comprovante",
            "fitid",
        ],
    ),
    ("cost_center", &["cost_center", "centro_de_custo", "cc", "costcentre"]),
];

fn aliases_for(field: &str) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(key, _)| *key == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// True when any alias of `field` appears among the (lower-cased)
/// headers. Used by the delimited reader to fail fast.
pub fn required_alias_match(field: &str, headers: &[String]) -> bool {
    aliases_for(field)
        .iter()
        .any(|alias| headers.iter().any(|h| h == alias))
}

fn extract_value<'a>(row: &'a RawRecord, field: &str) -> Option<&'a str> {
    aliases_for(field)
        .iter()
        .find_map(|alias| row.get(*alias))
        .map(|v| v.trim())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Map one raw record into the canonical transaction shape. Malformed
/// input is an expected outcome, reported through the error slot.
pub fn normalize(
    raw: &RawRecord,
    account_id: i64,
    options: &ImportOptions,
) -> Result<NormalizedRecord, RowError> {
    let date_value = extract_value(raw, "date");
    let time_value = extract_value(raw, "time");
    let description = extract_value(raw, "description");
    let amount_value = extract_value(raw, "amount");
    let reference = extract_value(raw, "reference");
    let cost_center = extract_value(raw, "cost_center");

    let date_value = match date_value {
        Some(v) if !v.is_empty() => v,
        _ => return Err(RowError::new(RowErrorCode::MissingDate, "Row has no date")),
    };
    let description = match description {
        Some(v) if !v.is_empty() => v,
        _ => {
            return Err(RowError::new(
                RowErrorCode::MissingDescription,
                "Row has no description",
            ))
        }
    };
    let amount_value = match amount_value {
        Some(v) if !v.is_empty() => v,
        _ => {
            return Err(RowError::new(
                RowErrorCode::MissingAmount,
                "Row has no amount",
            ))
        }
    };

    let occurred_at = match parse_date_time(date_value, time_value, options.timezone) {
        Some(ts) => ts,
        None => {
            return Err(RowError::new(
                RowErrorCode::InvalidDate,
                format!("Invalid date: {date_value}"),
            ))
        }
    };

    let signed_cents = match parse_amount_cents(amount_value) {
        Some(cents) if cents != 0 => cents,
        _ => {
            return Err(RowError::new(
                RowErrorCode::InvalidAmount,
                format!("Invalid amount: {amount_value}"),
            ))
        }
    };

    let transaction_type = TransactionType::from_signed_cents(signed_cents);
    let description = truncate_chars(description, MAX_DESCRIPTION_CHARS);
    let reference = reference
        .filter(|r| !r.is_empty())
        .map(|r| truncate_chars(r, MAX_REFERENCE_CHARS));

    let mut record = NormalizedRecord {
        transaction_type,
        amount_cents: signed_cents.abs(),
        signed_amount_cents: signed_cents,
        occurred_at,
        description,
        reference,
        cost_center_code: cost_center.filter(|c| !c.is_empty()).map(str::to_string),
        default_cost_center_id: options.default_cost_center_id,
        category_prefix: options.category_prefix.clone(),
        checksum: None,
    };

    record.checksum = Some(checksum(
        account_id,
        record.occurred_at,
        record.transaction_type,
        record.amount_cents,
        &record.description,
        record.reference.as_deref().unwrap_or(""),
    ));

    Ok(record)
}

/// Deterministic digest identifying one economic event. Two records
/// with the same fingerprint are considered the same posting.
pub fn checksum(
    account_id: i64,
    occurred_at: i64,
    transaction_type: TransactionType,
    amount_cents: i64,
    description: &str,
    reference: &str,
) -> String {
    let material = format!(
        "{account_id}|{occurred_at}|{}|{amount_cents}|{}|{}",
        transaction_type.as_str(),
        description.to_lowercase(),
        reference.to_lowercase(),
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

// ---------------------------------------------------------------------------
// Date parsing
// ---------------------------------------------------------------------------

/// Explicit patterns tried in priority order after the compact numeric
/// form; the bool marks formats that carry a time component.
const DATE_FORMATS: [(&str, bool); 7] = [
    ("%Y-%m-%d %H:%M", true),
    ("%Y-%m-%d", false),
    ("%d/%m/%Y %H:%M", true),
    ("%d/%m/%Y", false),
    ("%d-%m-%Y", false),
    ("%m/%d/%Y", false),
    ("%m/%d/%Y %H:%M", true),
];

pub fn parse_date_time(
    date_value: &str,
    time_value: Option<&str>,
    tz: chrono_tz::Tz,
) -> Option<i64> {
    // Compact interchange form: YYYYMMDD with optional HHMMSS,
    // possibly followed by a timezone suffix we ignore.
    static COMPACT: OnceLock<Regex> = OnceLock::new();
    let compact = COMPACT.get_or_init(|| {
        Regex::new(r"^(\d{4})(\d{2})(\d{2})(\d{2})?(\d{2})?(\d{2})?").expect("static pattern")
    });
    if let Some(cap) = compact.captures(date_value) {
        let part = |i: usize| -> u32 {
            cap.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let year: i32 = cap[1].parse().ok()?;
        if let Some(ndt) = NaiveDate::from_ymd_opt(year, part(2), part(3))
            .and_then(|d| d.and_hms_opt(part(4), part(5), part(6)))
        {
            return resolve_local(ndt, tz);
        }
    }

    let candidate = match time_value.filter(|t| !t.is_empty()) {
        Some(time) => format!("{date_value} {time}"),
        None => date_value.to_string(),
    };
    let candidate = candidate.trim();

    for (format, has_time) in DATE_FORMATS {
        let parsed = if has_time {
            NaiveDateTime::parse_from_str(candidate, format).ok()
        } else {
            NaiveDate::parse_from_str(candidate, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        };
        if let Some(ndt) = parsed {
            if let Some(ts) = resolve_local(ndt, tz) {
                return Some(ts);
            }
        }
    }

    // Last resort: the self-describing interchange timestamp forms.
    if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(candidate) {
        return Some(dt.timestamp());
    }

    None
}

fn resolve_local(ndt: NaiveDateTime, tz: chrono_tz::Tz) -> Option<i64> {
    match tz.from_local_datetime(&ndt) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.timestamp()),
        LocalResult::None => None,
    }
}

// ---------------------------------------------------------------------------
// Amount parsing
// ---------------------------------------------------------------------------

/// Parse a locale-ambiguous decimal string into signed minor units.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let clean: String = value
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{00a0}')
        .collect();
    let clean = clean.replace("R$", "").replace("r$", "").replace('$', "");
    let clean = normalize_decimal_separators(&clean).replace(',', ".");

    let number: f64 = clean.parse().ok()?;
    Some((number * 100.0).round() as i64)
}

/// Reconcile ambiguous thousands/decimal separators: when both appear
/// the rightmost is the decimal point; a lone comma is decimal; dots
/// without any comma are thousands separators once there is more than
/// one of them.
fn normalize_decimal_separators(value: &str) -> String {
    let mut value = value.to_string();

    if value.contains(',') && value.contains('.') {
        let last_comma = value.rfind(',');
        let last_dot = value.rfind('.');
        if let (Some(comma), Some(dot)) = (last_comma, last_dot) {
            if comma > dot {
                value = value.replace('.', "");
            } else {
                value = value.replace(',', "");
            }
        }
    }

    let commas = value.matches(',').count();
    let dots = value.matches('.').count();

    if commas == 1 && dots == 0 {
        return value.replace(',', ".");
    }
    if dots > 1 && commas == 0 {
        return value.replace('.', "");
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn utc_options() -> ImportOptions {
        ImportOptions::resolve(Some(r#"{"timezone":"UTC"}"#), Path::new("/tmp/x.csv")).unwrap()
    }

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_amount_separator_forms_agree() {
        for input in ["1.234,56", "1,234.56", "1234,56", "1234.56"] {
            assert_eq!(parse_amount_cents(input), Some(123_456), "input: {input}");
        }
    }

    #[test]
    fn test_amount_negative_and_currency_markers() {
        assert_eq!(parse_amount_cents("-50,00"), Some(-5_000));
        assert_eq!(parse_amount_cents("R$ 1.500,00"), Some(150_000));
        assert_eq!(parse_amount_cents("$2,000.00"), Some(200_000));
        assert_eq!(parse_amount_cents("1.234.567"), Some(123_456_700));
    }

    #[test]
    fn test_amount_rejects_garbage() {
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents("1,2,3"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn test_date_compact_forms() {
        let tz = chrono_tz::UTC;
        assert_eq!(parse_date_time("20240105", None, tz), Some(1_704_412_800));
        assert_eq!(
            parse_date_time("20240105123000", None, tz),
            Some(1_704_457_800)
        );
        // Trailing interchange timezone suffix is ignored.
        assert_eq!(
            parse_date_time("20240105120000[-3:GMT]", None, tz),
            Some(1_704_456_000)
        );
    }

    #[test]
    fn test_date_explicit_formats() {
        let tz = chrono_tz::UTC;
        let midnight = Some(1_704_412_800);
        assert_eq!(parse_date_time("2024-01-05", None, tz), midnight);
        assert_eq!(parse_date_time("05/01/2024", None, tz), midnight);
        assert_eq!(parse_date_time("05-01-2024", None, tz), midnight);
        assert_eq!(
            parse_date_time("2024-01-05", Some("10:30"), tz),
            Some(1_704_450_600)
        );
    }

    #[test]
    fn test_date_timezone_offsets_apply() {
        let sp: chrono_tz::Tz = "America/Sao_Paulo".parse().unwrap();
        // Midnight in Sao Paulo is 03:00 UTC.
        assert_eq!(parse_date_time("2024-01-05", None, sp), Some(1_704_423_600));
    }

    #[test]
    fn test_date_rfc3339_fallback() {
        let tz = chrono_tz::UTC;
        assert_eq!(
            parse_date_time("2024-01-05T12:00:00-03:00", None, tz),
            Some(1_704_466_800)
        );
    }

    #[test]
    fn test_date_rejects_nonsense() {
        let tz = chrono_tz::UTC;
        assert_eq!(parse_date_time("not a date", None, tz), None);
        assert_eq!(parse_date_time("2024-13-40", None, tz), None);
    }

    #[test]
    fn test_normalize_happy_path_credit() {
        let opts = utc_options();
        let raw = record(&[
            ("date", "2024-01-05"),
            ("description", "Client payment"),
            ("amount", "250.00"),
            ("reference", "inv-42"),
        ]);
        let rec = normalize(&raw, 1, &opts).unwrap();
        assert_eq!(rec.transaction_type, TransactionType::Credit);
        assert_eq!(rec.amount_cents, 25_000);
        assert_eq!(rec.signed_amount_cents, 25_000);
        assert_eq!(rec.occurred_at, 1_704_412_800);
        assert_eq!(rec.reference.as_deref(), Some("inv-42"));
        assert!(rec.checksum.is_some());
    }

    #[test]
    fn test_normalize_debit_from_sign() {
        let opts = utc_options();
        let raw = record(&[
            ("date", "2024-01-05"),
            ("description", "Office Rent"),
            ("amount", "-1500.00"),
        ]);
        let rec = normalize(&raw, 1, &opts).unwrap();
        assert_eq!(rec.transaction_type, TransactionType::Debit);
        assert_eq!(rec.amount_cents, 150_000);
        assert_eq!(rec.signed_amount_cents, -150_000);
    }

    #[test]
    fn test_normalize_missing_fields() {
        let opts = utc_options();
        let missing_date = record(&[("description", "x"), ("amount", "1.00")]);
        assert_eq!(
            normalize(&missing_date, 1, &opts).unwrap_err().code,
            RowErrorCode::MissingDate
        );
        let missing_desc = record(&[("date", "2024-01-05"), ("amount", "1.00")]);
        assert_eq!(
            normalize(&missing_desc, 1, &opts).unwrap_err().code,
            RowErrorCode::MissingDescription
        );
        let missing_amount = record(&[("date", "2024-01-05"), ("description", "x")]);
        assert_eq!(
            normalize(&missing_amount, 1, &opts).unwrap_err().code,
            RowErrorCode::MissingAmount
        );
    }

    #[test]
    fn test_normalize_invalid_and_zero_amount() {
        let opts = utc_options();
        let bad = record(&[
            ("date", "2024-01-05"),
            ("description", "x"),
            ("amount", "n/a"),
        ]);
        assert_eq!(
            normalize(&bad, 1, &opts).unwrap_err().code,
            RowErrorCode::InvalidAmount
        );
        let zero = record(&[
            ("date", "2024-01-05"),
            ("description", "x"),
            ("amount", "0.00"),
        ]);
        assert_eq!(
            normalize(&zero, 1, &opts).unwrap_err().code,
            RowErrorCode::InvalidAmount
        );
    }

    #[test]
    fn test_normalize_aliases_across_locales() {
        let opts = utc_options();
        let raw = record(&[
            ("data", "05/01/2024"),
            ("histórico", "Aluguel escritório"),
            ("valor", "-1.500,00"),
            ("documento", "doc-9"),
        ]);
        let rec = normalize(&raw, 1, &opts).unwrap();
        assert_eq!(rec.amount_cents, 150_000);
        assert_eq!(rec.description, "Aluguel escritório");
        assert_eq!(rec.reference.as_deref(), Some("doc-9"));
    }

    #[test]
    fn test_normalize_truncates_long_fields() {
        let opts = utc_options();
        let long_desc = "x".repeat(300);
        let long_ref = "y".repeat(200);
        let raw = record(&[
            ("date", "2024-01-05"),
            ("description", &long_desc),
            ("amount", "1.00"),
            ("reference", &long_ref),
        ]);
        let rec = normalize(&raw, 1, &opts).unwrap();
        assert_eq!(rec.description.chars().count(), MAX_DESCRIPTION_CHARS);
        assert_eq!(
            rec.reference.as_deref().map(|r| r.chars().count()),
            Some(MAX_REFERENCE_CHARS)
        );
    }

    #[test]
    fn test_checksum_deterministic_and_case_insensitive() {
        let a = checksum(1, 1_704_412_800, TransactionType::Debit, 5_000, "Rent", "REF");
        let b = checksum(1, 1_704_412_800, TransactionType::Debit, 5_000, "rent", "ref");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_varies_with_fields() {
        let base = checksum(1, 100, TransactionType::Debit, 5_000, "Rent", "");
        assert_ne!(
            base,
            checksum(2, 100, TransactionType::Debit, 5_000, "Rent", "")
        );
        assert_ne!(
            base,
            checksum(1, 101, TransactionType::Debit, 5_000, "Rent", "")
        );
        assert_ne!(
            base,
            checksum(1, 100, TransactionType::Credit, 5_000, "Rent", "")
        );
    }

    #[test]
    fn test_checksum_ignores_raw_field_order() {
        let opts = utc_options();
        let a = record(&[
            ("date", "2024-01-05"),
            ("description", "Rent"),
            ("amount", "-50,00"),
        ]);
        let b = record(&[
            ("amount", "-50,00"),
            ("date", "2024-01-05"),
            ("description", "RENT"),
        ]);
        let ra = normalize(&a, 7, &opts).unwrap();
        let rb = normalize(&b, 7, &opts).unwrap();
        assert_eq!(ra.checksum, rb.checksum);
        assert_eq!(ra.amount_cents, 5_000);
        assert_eq!(ra.transaction_type, TransactionType::Debit);
    }
}
