use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use regex::Regex;

use crate::error::{Result, TallyError};
use crate::models::{FileType, RawRecord};
use crate::normalizer::{required_alias_match, REQUIRED_FIELDS};

/// Label used when an interchange block carries neither payee nor memo.
const GENERIC_OFX_DESCRIPTION: &str = "OFX transaction";

/// Finite, forward-only stream of raw records from a statement file.
/// Construction performs all batch-fatal validation; iteration never
/// aborts on a malformed record.
pub enum RecordReader {
    Csv(CsvRecords),
    Ofx(OfxRecords),
}

impl RecordReader {
    pub fn open(path: &Path, file_type: FileType) -> Result<Self> {
        match file_type {
            FileType::Csv => Ok(Self::Csv(CsvRecords::open(path)?)),
            FileType::Ofx => Ok(Self::Ofx(OfxRecords::open(path)?)),
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Csv(r) => r.next(),
            Self::Ofx(r) => r.next(),
        }
    }
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// Pick the field delimiter by counting candidates in the header line.
/// Comma wins ties and the all-zero case.
pub fn detect_delimiter(header: &str) -> u8 {
    let comma = header.matches(',').count();
    let semi = header.matches(';').count();
    let tab = header.matches('\t').count();
    let max = comma.max(semi).max(tab);

    if max == 0 || comma == max {
        b','
    } else if semi == max {
        if tab == max {
            b','
        } else {
            b';'
        }
    } else {
        b'\t'
    }
}

fn strip_bom(line: &str) -> &str {
    line.strip_prefix('\u{feff}').unwrap_or(line)
}

pub struct CsvRecords {
    headers: Vec<String>,
    records: csv::StringRecordsIntoIter<BufReader<File>>,
}

impl std::fmt::Debug for CsvRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvRecords")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl CsvRecords {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        // First non-empty line is the header.
        let mut header_line = String::new();
        let mut saw_any_line = false;
        loop {
            header_line.clear();
            let read = reader.read_line(&mut header_line)?;
            if read == 0 {
                return Err(if saw_any_line {
                    TallyError::MissingHeader
                } else {
                    TallyError::EmptyFile
                });
            }
            saw_any_line = true;
            if !header_line.trim().is_empty() {
                break;
            }
        }

        let header_line = strip_bom(header_line.trim_end_matches(&['\r', '\n'][..]));
        let delimiter = detect_delimiter(header_line);
        let headers = parse_header_cells(header_line, delimiter)?;
        ensure_required_columns(&headers)?;

        let records = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Ok(Self { headers, records })
    }

    fn combine(&self, record: &csv::StringRecord) -> RawRecord {
        let mut assoc = RawRecord::new();
        for (index, value) in record.iter().enumerate() {
            let key = self
                .headers
                .get(index)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("col_{index}"));
            assoc.insert(key, value.trim().to_string());
        }
        assoc
    }
}

impl Iterator for CsvRecords {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.records.next()? {
                Ok(record) => {
                    if record.iter().all(|f| f.trim().is_empty()) {
                        continue;
                    }
                    return Some(Ok(self.combine(&record)));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

fn parse_header_cells(line: &str, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? || record.iter().all(|f| f.trim().is_empty()) {
        return Err(TallyError::MissingHeader);
    }

    Ok(record
        .iter()
        .map(|cell| strip_bom(cell).trim().to_lowercase())
        .collect())
}

/// Every required canonical field must resolve through the alias table
/// against the header, before any row is read.
fn ensure_required_columns(headers: &[String]) -> Result<()> {
    for field in REQUIRED_FIELDS {
        if !required_alias_match(field, headers) {
            return Err(TallyError::MissingColumn(field));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Interchange format (OFX)
// ---------------------------------------------------------------------------

const OFX_TAGS: [&str; 6] = ["DTPOSTED", "TRNAMT", "FITID", "TRNTYPE", "NAME", "MEMO"];

pub struct OfxRecords {
    blocks: std::vec::IntoIter<String>,
    tag_patterns: Vec<(&'static str, Regex)>,
}

impl OfxRecords {
    pub fn open(path: &Path) -> Result<Self> {
        let mut contents = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|_| TallyError::UnreadableFile(path.display().to_string()))?;

        let block_re = Regex::new(r"(?is)<STMTTRN>(.*?)</STMTTRN>")
            .map_err(|e| TallyError::Other(e.to_string()))?;
        let blocks: Vec<String> = block_re
            .captures_iter(&contents)
            .map(|c| c[1].to_string())
            .collect();
        if blocks.is_empty() {
            return Err(TallyError::NoTransactionBlocks);
        }

        let mut tag_patterns = Vec::with_capacity(OFX_TAGS.len());
        for tag in OFX_TAGS {
            let re = Regex::new(&format!(r"(?i)<{tag}>([^\r\n<]+)"))
                .map_err(|e| TallyError::Other(e.to_string()))?;
            tag_patterns.push((tag, re));
        }

        Ok(Self {
            blocks: blocks.into_iter(),
            tag_patterns,
        })
    }

    fn extract(&self, block: &str) -> Option<RawRecord> {
        let mut tags: [(&str, Option<String>); 6] =
            OFX_TAGS.map(|t| (t, None));
        for (slot, (_, re)) in tags.iter_mut().zip(&self.tag_patterns) {
            if let Some(cap) = re.captures(block) {
                slot.1 = Some(decode_entities(cap[1].trim()).trim().to_string());
            }
        }

        let get = |name: &str| -> Option<String> {
            tags.iter()
                .find(|(t, _)| *t == name)
                .and_then(|(_, v)| v.clone())
        };

        // Blocks missing a posted date or an amount never become rows.
        let date = get("DTPOSTED")?;
        let amount = get("TRNAMT")?;

        let name = get("NAME").unwrap_or_default();
        let memo = get("MEMO").unwrap_or_default();
        let mut description = format!("{name} {memo}").trim().to_string();
        if description.is_empty() {
            description = GENERIC_OFX_DESCRIPTION.to_string();
        }

        let mut record = RawRecord::new();
        record.insert("date".to_string(), date);
        record.insert("description".to_string(), description);
        record.insert("amount".to_string(), amount);
        if let Some(fitid) = get("FITID") {
            record.insert("reference".to_string(), fitid);
        }
        if let Some(trntype) = get("TRNTYPE") {
            record.insert("type".to_string(), trntype);
        }
        Some(record)
    }
}

impl Iterator for OfxRecords {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = self.blocks.next()?;
            if let Some(record) = self.extract(&block) {
                return Some(Ok(record));
            }
        }
    }
}

/// OFX payloads only ever carry the named XML entities.
fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
