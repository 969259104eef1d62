//! Aggregator CSV report parsing.
//!
//! Reports carry one row per track with cumulative lifetime counts. Column
//! names are fixed by the aggregator export. Rows without an `Id` are skipped
//! and counted; unparsable or missing numeric cells read as zero.

use std::borrow::Cow;

use csv::{ByteRecord, ReaderBuilder, Trim};
use thiserror::Error;

use crate::db::models::Metric;

pub const COL_ID: &str = "Id";
pub const COL_NAME: &str = "Name";
pub const COL_STREAMS: &str = "# Streams";
pub const COL_STREAMS_PCT: &str = "Streams %";
pub const COL_STREAMS_CHANGE: &str = "# Streams change";
pub const COL_STREAMS_CHANGE_PCT: &str = "Streams change %";
pub const COL_DOWNLOADS: &str = "# Downloads";
pub const COL_DOWNLOADS_PCT: &str = "Downloads %";
pub const COL_DOWNLOADS_CHANGE: &str = "# Downloads change";
pub const COL_DOWNLOADS_CHANGE_PCT: &str = "Downloads change %";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Malformed report: {0}")]
    MalformedInput(String),
}

/// A validated report row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    /// Aggregator track id, trimmed and non-empty.
    pub external_id: String,
    pub name: String,
    pub streams: Metric,
    pub downloads: Metric,
}

/// Output of parsing one report payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReport {
    pub rows: Vec<ReportRow>,
    /// Data rows dropped for a missing or blank `Id`.
    pub skipped_rows: usize,
}

impl ParsedReport {
    /// Every data row in the payload, kept or not.
    pub fn total_rows(&self) -> usize {
        self.rows.len() + self.skipped_rows
    }
}

/// Column positions resolved once from the header row.
struct Columns {
    id: Option<usize>,
    name: Option<usize>,
    streams: MetricColumns,
    downloads: MetricColumns,
}

struct MetricColumns {
    count: Option<usize>,
    pct: Option<usize>,
    change: Option<usize>,
    change_pct: Option<usize>,
}

impl Columns {
    fn resolve(headers: &[String]) -> Self {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
        };

        Self {
            id: find(COL_ID),
            name: find(COL_NAME),
            streams: MetricColumns {
                count: find(COL_STREAMS),
                pct: find(COL_STREAMS_PCT),
                change: find(COL_STREAMS_CHANGE),
                change_pct: find(COL_STREAMS_CHANGE_PCT),
            },
            downloads: MetricColumns {
                count: find(COL_DOWNLOADS),
                pct: find(COL_DOWNLOADS_PCT),
                change: find(COL_DOWNLOADS_CHANGE),
                change_pct: find(COL_DOWNLOADS_CHANGE_PCT),
            },
        }
    }
}

impl MetricColumns {
    fn read(&self, record: &ByteRecord) -> Metric {
        Metric {
            count: parse_int(&cell(record, self.count)),
            percentage_of_total: parse_float(&cell(record, self.pct)),
            change: parse_int(&cell(record, self.change)),
            change_percentage: parse_float(&cell(record, self.change_pct)),
        }
    }
}

/// Parse a report payload into validated rows.
///
/// Fails only when the payload isn't CSV with a header row. A header without
/// an `Id` column is accepted; every data row is then skipped. Cells that
/// aren't valid UTF-8 are decoded lossily rather than failing the batch.
pub fn parse_report(payload: &[u8]) -> Result<ParsedReport, ReportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(payload);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|e| ReportError::MalformedInput(e.to_string()))?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    if headers.iter().all(|h| h.trim_start_matches('\u{feff}').trim().is_empty()) {
        return Err(ReportError::MalformedInput("missing header row".to_string()));
    }
    let columns = Columns::resolve(&headers);
    if columns.id.is_none() {
        log::warn!("Report header has no '{COL_ID}' column; no rows can match");
    }

    let mut parsed = ParsedReport::default();
    for (index, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|e| {
            ReportError::MalformedInput(format!("data row {}: {e}", index + 1))
        })?;

        let external_id = cell(&record, columns.id);
        let external_id = external_id.trim();
        if external_id.is_empty() {
            log::debug!("Skipping report row {} without an Id", index + 1);
            parsed.skipped_rows += 1;
            continue;
        }

        parsed.rows.push(ReportRow {
            external_id: external_id.to_string(),
            name: cell(&record, columns.name).into_owned(),
            streams: columns.streams.read(&record),
            downloads: columns.downloads.read(&record),
        });
    }

    log::debug!(
        "Parsed report: {} rows kept, {} skipped",
        parsed.rows.len(),
        parsed.skipped_rows
    );
    Ok(parsed)
}

fn cell(record: &ByteRecord, index: Option<usize>) -> Cow<'_, str> {
    index
        .and_then(|i| record.get(i))
        .map(String::from_utf8_lossy)
        .unwrap_or(Cow::Borrowed(""))
}

/// Strip the decorations the aggregator sometimes puts on numbers
/// ("1,234", "12.5%", "+40").
fn clean_number(raw: &str) -> String {
    raw.trim()
        .trim_end_matches('%')
        .trim_start_matches('+')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect()
}

fn parse_int(raw: &str) -> i64 {
    let cleaned = clean_number(raw);
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| {
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.round() as i64)
        })
        .unwrap_or(0)
}

fn parse_float(raw: &str) -> f64 {
    clean_number(raw)
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}
