use std::collections::HashMap;

use crate::db::models::Release;
use crate::report::ReportRow;

/// Lookup from aggregator track id to release, built once per upload.
pub struct TrackIndex {
    /// Trimmed external id → release id.
    by_external_id: HashMap<String, String>,
}

/// A report row resolved to a release.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow {
    pub release_id: String,
    pub external_id: String,
    pub row: ReportRow,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedRow>,
    /// Rows whose id matched no release.
    pub unmatched: usize,
}

impl TrackIndex {
    /// Index every release with a non-blank external id. When two releases
    /// share an id the first one wins.
    pub fn from_releases(releases: &[Release]) -> Self {
        let mut by_external_id: HashMap<String, String> = HashMap::with_capacity(releases.len());
        for release in releases {
            let Some(raw) = release.landr_track_id.as_deref() else {
                continue;
            };
            let external_id = raw.trim();
            if external_id.is_empty() {
                continue;
            }
            if let Some(existing) = by_external_id.get(external_id) {
                log::warn!(
                    "Track id '{}' is set on releases {} and {}; keeping {}",
                    external_id, existing, release.id, existing
                );
                continue;
            }
            by_external_id.insert(external_id.to_string(), release.id.clone());
        }
        Self { by_external_id }
    }

    pub fn len(&self) -> usize {
        self.by_external_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_external_id.is_empty()
    }

    /// Exact match on the trimmed id. No fuzzy or title fallback.
    pub fn lookup(&self, external_id: &str) -> Option<&str> {
        self.by_external_id.get(external_id.trim()).map(String::as_str)
    }

    /// Resolve every row; misses are counted, never errors.
    pub fn match_rows(&self, rows: Vec<ReportRow>) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        for row in rows {
            match self.lookup(&row.external_id) {
                Some(release_id) => outcome.matched.push(MatchedRow {
                    release_id: release_id.to_string(),
                    external_id: row.external_id.trim().to_string(),
                    row,
                }),
                None => {
                    log::debug!("No release for track id '{}' ({})", row.external_id, row.name);
                    outcome.unmatched += 1;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Metric;

    fn release(id: &str, track_id: Option<&str>) -> Release {
        Release {
            id: id.into(),
            landr_track_id: track_id.map(String::from),
            title: format!("Title {id}"),
            slug: None,
            cover_image: None,
            artist_ids: Vec::new(),
        }
    }

    fn row(id: &str) -> ReportRow {
        ReportRow {
            external_id: id.into(),
            name: format!("Row {id}"),
            streams: Metric { count: 10, ..Default::default() },
            downloads: Metric::default(),
        }
    }

    #[test]
    fn test_index_skips_missing_and_blank_ids() {
        let index = TrackIndex::from_releases(&[
            release("r1", Some("abc")),
            release("r2", None),
            release("r3", Some("  ")),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("abc"), Some("r1"));
    }

    #[test]
    fn test_lookup_trims_both_sides() {
        let index = TrackIndex::from_releases(&[release("r1", Some("  abc "))]);
        assert_eq!(index.lookup(" abc"), Some("r1"));
        assert_eq!(index.lookup("ABC"), None);
    }

    #[test]
    fn test_first_release_wins_on_duplicate_id() {
        let index = TrackIndex::from_releases(&[release("r1", Some("abc")), release("r2", Some("abc"))]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("abc"), Some("r1"));
    }

    #[test]
    fn test_match_rows_counts_misses() {
        let index = TrackIndex::from_releases(&[release("X", Some("abc")), release("Y", Some("def"))]);
        let outcome = index.match_rows(vec![row("abc"), row("xyz"), row("def")]);

        assert_eq!(outcome.unmatched, 1);
        let ids: Vec<&str> = outcome.matched.iter().map(|m| m.release_id.as_str()).collect();
        assert_eq!(ids, vec!["X", "Y"]);
        assert_eq!(outcome.matched[0].row.streams.count, 10);
    }

    #[test]
    fn test_matched_row_keeps_trimmed_id() {
        let index = TrackIndex::from_releases(&[release("X", Some("abc"))]);
        let outcome = index.match_rows(vec![row(" abc  ")]);
        assert_eq!(outcome.matched[0].external_id, "abc");
        assert_eq!(outcome.matched[0].row.external_id, " abc  ");
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let index = TrackIndex::from_releases(&[]);
        assert!(index.is_empty());
        let outcome = index.match_rows(vec![row("abc")]);
        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.unmatched, 1);
    }
}
