use chrono::NaiveDate;
use serde::Serialize;

/// One metric block from a report row: cumulative count plus the
/// aggregator's share/change columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub count: i64,
    pub percentage_of_total: f64,
    pub change: i64,
    pub change_percentage: f64,
}

/// An artist from the external artist directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub image: Option<String>,
}

/// A release from the external release directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub id: String,
    /// Aggregator track id. Only releases with a non-empty value can match report rows.
    pub landr_track_id: Option<String>,
    pub title: String,
    pub slug: Option<String>,
    pub cover_image: Option<String>,
    /// Artist ids in credit order.
    pub artist_ids: Vec<String>,
}

/// A matched report row ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub release_id: String,
    pub landr_track_id: String,
    pub report_date: NaiveDate,
    pub name: String,
    pub streams: Metric,
    pub downloads: Metric,
    pub report_filename: String,
}

/// A stored snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: i64,
    pub release_id: String,
    pub landr_track_id: String,
    pub report_date: NaiveDate,
    pub name: String,
    pub streams: Metric,
    pub downloads: Metric,
    pub report_filename: String,
    pub created_at: String,
}

/// Which snapshots to load for aggregation. All present constraints AND together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotFilter {
    /// Restrict to these releases. `Some(empty)` matches nothing.
    pub release_ids: Option<Vec<String>>,
    /// Inclusive lower bound on report date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on report date.
    pub to: Option<NaiveDate>,
}

/// Store-wide counters for the `stats` command.
#[derive(Debug)]
pub struct SnapshotStats {
    pub total_snapshots: i64,
    pub total_releases: i64,
    pub linked_releases: i64,
    pub releases_with_snapshots: i64,
    pub report_dates: i64,
    pub report_files: Vec<(String, i64)>,
}
