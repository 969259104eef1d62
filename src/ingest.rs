use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::db::models::NewSnapshot;
use crate::db::{Database, DbError};
use crate::matcher::TrackIndex;
use crate::report::{self, ReportError};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to parse report: {0}")]
    Parse(#[from] ReportError),
    #[error("Failed to store snapshots: {0}")]
    Persistence(#[from] DbError),
}

/// Result of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub records_processed: usize,
    pub total_records: usize,
    /// Rows dropped for a missing id or no matching release.
    #[serde(skip)]
    pub skipped: usize,
}

impl UploadSummary {
    pub fn skip_ratio(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.skipped as f64 / self.total_records as f64
        }
    }

    /// Warn when more than `warn_ratio` of the rows were skipped. A high skip
    /// rate usually means release track ids have gone stale.
    pub fn warn_if_stale(&self, warn_ratio: f64) -> bool {
        let stale = self.total_records > 0 && self.skip_ratio() > warn_ratio;
        if stale {
            log::warn!(
                "{} of {} report rows matched no release ({:.0}% skipped); check release track ids",
                self.skipped,
                self.total_records,
                self.skip_ratio() * 100.0
            );
        }
        stale
    }
}

/// Parse an operator-supplied report date. Accepts `YYYY-MM-DD` or an
/// RFC 3339 timestamp, of which only the date is kept.
pub fn parse_report_date(raw: &str) -> Result<NaiveDate, IngestError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IngestError::Validation("Report date is required".to_string()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| IngestError::Validation(format!("Invalid report date '{raw}'")))
}

/// Parse, match and store one report.
///
/// The whole upload fails if the batch write fails, even though matching
/// succeeded; nothing is partially stored.
pub fn ingest_report(
    db: &Database,
    payload: &[u8],
    report_date: NaiveDate,
    filename: &str,
) -> Result<UploadSummary, IngestError> {
    if payload.is_empty() {
        return Err(IngestError::Validation("Report file is required".to_string()));
    }

    let parsed = report::parse_report(payload)?;
    let total_records = parsed.total_rows();
    let missing_id = parsed.skipped_rows;

    let index = TrackIndex::from_releases(&db.get_releases_with_track_ids()?);
    log::debug!("Track index holds {} linked releases", index.len());

    let outcome = index.match_rows(parsed.rows);
    let snapshots: Vec<NewSnapshot> = outcome
        .matched
        .into_iter()
        .map(|m| NewSnapshot {
            release_id: m.release_id,
            landr_track_id: m.external_id,
            report_date,
            name: m.row.name,
            streams: m.row.streams,
            downloads: m.row.downloads,
            report_filename: filename.to_string(),
        })
        .collect();

    let records_processed = db.insert_snapshots(&snapshots).map_err(|e| {
        log::error!("Snapshot batch for {filename} ({report_date}) failed: {e}");
        e
    })?;

    let summary = UploadSummary {
        records_processed,
        total_records,
        skipped: missing_id + outcome.unmatched,
    };
    log::info!(
        "Ingested {filename} for {report_date}: {} of {} records stored ({} without id, {} unmatched)",
        summary.records_processed,
        summary.total_records,
        missing_id,
        outcome.unmatched
    );
    Ok(summary)
}
