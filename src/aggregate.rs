//! Derived analytics views over stored snapshots.
//!
//! Report counts are cumulative lifetime figures, so a release's total is the
//! highest count ever observed for it rather than the latest row's value. A
//! late or out-of-order report can't pull the total down; by the same token a
//! genuine downward correction from the source never shows up here.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::db::models::Snapshot;

/// How many distinct report dates the recent-reports list holds.
pub const RECENT_REPORTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistCredit {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
}

/// Lifetime view of one release.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAnalytics {
    pub release_id: String,
    pub title: String,
    pub slug: Option<String>,
    pub cover_image: Option<String>,
    pub artists: Vec<ArtistCredit>,
    /// Display name and track id from the most recent report.
    pub name: String,
    pub landr_track_id: String,
    pub total_streams: i64,
    pub total_downloads: i64,
    pub latest_date: NaiveDate,
    pub latest_data: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistAnalyticsSummary {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub image: Option<String>,
    pub release_count: usize,
    pub total_streams: i64,
}

/// Group snapshots by release, preserving first-seen order.
fn group_by_release(snapshots: &[Snapshot]) -> Vec<(&str, Vec<&Snapshot>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Snapshot>> = HashMap::new();
    for s in snapshots {
        groups
            .entry(s.release_id.as_str())
            .or_insert_with(|| {
                order.push(s.release_id.as_str());
                Vec::new()
            })
            .push(s);
    }
    order
        .into_iter()
        .map(|id| (id, groups.remove(id).unwrap_or_default()))
        .collect()
}

/// Per-release lifetime totals, highest stream total first, capped at `limit`.
///
/// The latest row is the one with the greatest report date; same-day
/// duplicates resolve to the one stored last.
pub fn release_totals(snapshots: &[Snapshot], catalog: &Catalog, limit: usize) -> Vec<ReleaseAnalytics> {
    let mut results: Vec<ReleaseAnalytics> = group_by_release(snapshots)
        .into_iter()
        .filter_map(|(release_id, group)| {
            let latest = group.iter().max_by_key(|s| (s.report_date, s.id))?;
            let total_streams = group.iter().map(|s| s.streams.count).max().unwrap_or(0);
            let total_downloads = group.iter().map(|s| s.downloads.count).max().unwrap_or(0);

            let release = catalog.release(release_id);
            let artists = release
                .map(|r| {
                    r.artist_ids
                        .iter()
                        .filter_map(|id| catalog.artist(id))
                        .map(|a| ArtistCredit {
                            id: a.id.clone(),
                            name: a.name.clone(),
                            slug: a.slug.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            Some(ReleaseAnalytics {
                release_id: release_id.to_string(),
                title: release
                    .map(|r| r.title.clone())
                    .unwrap_or_else(|| latest.name.clone()),
                slug: release.and_then(|r| r.slug.clone()),
                cover_image: release.and_then(|r| r.cover_image.clone()),
                artists,
                name: latest.name.clone(),
                landr_track_id: latest.landr_track_id.clone(),
                total_streams,
                total_downloads,
                latest_date: latest.report_date,
                latest_data: (*latest).clone(),
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.total_streams
            .cmp(&a.total_streams)
            .then_with(|| b.total_downloads.cmp(&a.total_downloads))
            .then_with(|| a.release_id.cmp(&b.release_id))
    });
    results.truncate(limit);
    results
}

/// Per-artist rollups. An artist appears only with at least one credited
/// release that has at least one snapshot. `total_streams` sums the stream
/// count of every snapshot across the artist's releases, so duplicate
/// uploads are counted twice here. The sum saturates at `i64::MAX`.
pub fn artist_rollups(snapshots: &[Snapshot], catalog: &Catalog) -> Vec<ArtistAnalyticsSummary> {
    let mut by_release: HashMap<&str, Vec<&Snapshot>> = HashMap::new();
    for s in snapshots {
        by_release.entry(s.release_id.as_str()).or_default().push(s);
    }

    let mut rollups: Vec<ArtistAnalyticsSummary> = catalog
        .artists()
        .filter_map(|artist| {
            let release_ids = catalog.releases_of(&artist.id);
            if release_ids.is_empty() {
                return None;
            }

            let observed: Vec<&Snapshot> = release_ids
                .iter()
                .filter_map(|id| by_release.get(id.as_str()))
                .flatten()
                .copied()
                .collect();
            if observed.is_empty() {
                return None;
            }

            Some(ArtistAnalyticsSummary {
                id: artist.id.clone(),
                name: artist.name.clone(),
                slug: artist.slug.clone(),
                image: artist.image.clone(),
                release_count: release_ids.len(),
                total_streams: observed
                    .iter()
                    .fold(0i64, |acc, s| acc.saturating_add(s.streams.count)),
            })
        })
        .collect();

    // Stable sort keeps name order among equal totals
    rollups.sort_by(|a, b| b.total_streams.cmp(&a.total_streams));
    rollups
}

/// Most recent distinct report dates, newest first.
pub fn recent_reports(snapshots: &[Snapshot], count: usize) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = snapshots.iter().map(|s| s.report_date).collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();
    dates.truncate(count);
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Artist, Metric, Release};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn snap(id: i64, release_id: &str, day: &str, streams: i64, downloads: i64) -> Snapshot {
        Snapshot {
            id,
            release_id: release_id.into(),
            landr_track_id: format!("ext-{release_id}"),
            report_date: date(day),
            name: format!("{release_id} on {day}"),
            streams: Metric { count: streams, ..Default::default() },
            downloads: Metric { count: downloads, ..Default::default() },
            report_filename: format!("{day}.csv"),
            created_at: "2024-01-01 00:00:00".into(),
        }
    }

    fn catalog() -> Catalog {
        let release = |id: &str, artists: &[&str]| Release {
            id: id.into(),
            landr_track_id: Some(format!("ext-{id}")),
            title: format!("Title {id}"),
            slug: Some(id.to_lowercase()),
            cover_image: None,
            artist_ids: artists.iter().map(|a| a.to_string()).collect(),
        };
        let artist = |id: &str, name: &str| Artist {
            id: id.into(),
            name: name.into(),
            slug: None,
            image: None,
        };
        Catalog::from_parts(
            vec![release("R", &["a1"]), release("S", &["a1", "a2"]), release("T", &["a3"])],
            vec![artist("a1", "Alder"), artist("a2", "Birch"), artist("a3", "Cedar"), artist("a4", "Dogwood")],
        )
    }

    #[test]
    fn test_total_is_max_while_latest_is_newest() {
        let snapshots = vec![
            snap(1, "R", "2024-01-01", 100, 1),
            snap(2, "R", "2024-01-02", 250, 3),
            snap(3, "R", "2024-01-03", 50, 2),
        ];
        let totals = release_totals(&snapshots, &catalog(), 50);

        assert_eq!(totals.len(), 1);
        let r = &totals[0];
        assert_eq!(r.total_streams, 250);
        assert_eq!(r.total_downloads, 3);
        assert_eq!(r.latest_date, date("2024-01-03"));
        assert_eq!(r.latest_data.streams.count, 50);
        assert_eq!(r.name, "R on 2024-01-03");
        assert_eq!(r.title, "Title R");
        assert_eq!(r.artists.len(), 1);
        assert_eq!(r.artists[0].name, "Alder");
    }

    #[test]
    fn test_out_of_order_rows_use_report_date() {
        // Stored out of date order: the later insert carries the older date
        let snapshots = vec![snap(1, "R", "2024-02-01", 300, 0), snap(2, "R", "2024-01-01", 100, 0)];
        let totals = release_totals(&snapshots, &catalog(), 50);
        assert_eq!(totals[0].latest_date, date("2024-02-01"));
        assert_eq!(totals[0].total_streams, 300);
    }

    #[test]
    fn test_same_day_duplicates_are_idempotent() {
        let snapshots = vec![snap(1, "R", "2024-01-01", 100, 0), snap(2, "R", "2024-01-01", 100, 0)];
        let totals = release_totals(&snapshots, &catalog(), 50);
        assert_eq!(totals[0].total_streams, 100);
        assert_eq!(totals[0].latest_data.id, 2);
    }

    #[test]
    fn test_sorted_by_streams_and_limited() {
        let snapshots = vec![
            snap(1, "S", "2024-01-01", 500, 0),
            snap(2, "R", "2024-01-01", 1000, 0),
            snap(3, "T", "2024-01-01", 750, 0),
        ];
        let ids: Vec<String> = release_totals(&snapshots, &catalog(), 50)
            .into_iter()
            .map(|r| r.release_id)
            .collect();
        assert_eq!(ids, vec!["R", "T", "S"]);

        let limited = release_totals(&snapshots, &catalog(), 2);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].release_id, "T");
    }

    #[test]
    fn test_unknown_release_falls_back_to_report_name() {
        let snapshots = vec![snap(1, "ghost", "2024-01-01", 5, 0)];
        let totals = release_totals(&snapshots, &catalog(), 50);
        assert_eq!(totals[0].title, "ghost on 2024-01-01");
        assert!(totals[0].artists.is_empty());
    }

    #[test]
    fn test_artist_rollups_sum_and_filter() {
        let snapshots = vec![
            snap(1, "R", "2024-01-01", 100, 0),
            snap(2, "R", "2024-01-02", 150, 0),
            snap(3, "S", "2024-01-02", 40, 0),
        ];
        let rollups = artist_rollups(&snapshots, &catalog());

        // a3 has a release but no snapshots, a4 has no releases
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].id, "a1");
        assert_eq!(rollups[0].release_count, 2);
        assert_eq!(rollups[0].total_streams, 290);
        assert_eq!(rollups[1].id, "a2");
        assert_eq!(rollups[1].release_count, 1);
        assert_eq!(rollups[1].total_streams, 40);
    }

    #[test]
    fn test_artist_rollup_saturates() {
        let snapshots = vec![
            snap(1, "R", "2024-01-01", i64::MAX, 0),
            snap(2, "R", "2024-01-02", i64::MAX, 0),
        ];
        let rollups = artist_rollups(&snapshots, &catalog());
        assert_eq!(rollups[0].total_streams, i64::MAX);
        assert_eq!(release_totals(&snapshots, &catalog(), 50)[0].total_streams, i64::MAX);
    }

    #[test]
    fn test_recent_reports_distinct_and_capped() {
        let snapshots: Vec<Snapshot> = [
            "2024-01-01", "2024-01-03", "2024-01-03", "2024-01-02", "2024-01-06", "2024-01-05", "2024-01-04",
        ]
        .iter()
        .enumerate()
        .map(|(i, d)| snap(i as i64, "R", d, 1, 0))
        .collect();

        let dates = recent_reports(&snapshots, RECENT_REPORTS);
        assert_eq!(
            dates,
            vec![
                date("2024-01-06"),
                date("2024-01-05"),
                date("2024-01-04"),
                date("2024-01-03"),
                date("2024-01-02"),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(release_totals(&[], &catalog(), 50).is_empty());
        assert!(artist_rollups(&[], &catalog()).is_empty());
        assert!(recent_reports(&[], RECENT_REPORTS).is_empty());
    }
}
