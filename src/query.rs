//! Analytics service: the single entry point for uploads and queries, shared
//! by the CLI and the HTTP server.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{self, ArtistAnalyticsSummary, ReleaseAnalytics, RECENT_REPORTS};
use crate::cache::{CacheKey, Clock, TtlCache};
use crate::catalog::{self, Catalog, CatalogExport, SyncResult};
use crate::config::{AppConfig, QueryConfig};
use crate::db::models::{Artist, SnapshotFilter};
use crate::db::{Database, DbError};
use crate::ingest::{self, IngestError, UploadSummary};

const CATALOG_KEY: &str = "catalog";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    InvalidFilter(String),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Validated analytics filters. All present filters AND together; date bounds
/// are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsQuery {
    pub release: Option<String>,
    pub artist: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// `None` or 0 means the configured default.
    pub limit: Option<usize>,
}

/// Raw query-string parameters, as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsParams {
    pub release: Option<String>,
    pub artist: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
}

impl TryFrom<AnalyticsParams> for AnalyticsQuery {
    type Error = QueryError;

    fn try_from(params: AnalyticsParams) -> Result<Self, Self::Error> {
        let limit = match non_blank(params.limit) {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|_| QueryError::InvalidFilter(format!("Invalid limit '{raw}'")))?,
            ),
            None => None,
        };
        Ok(Self {
            release: non_blank(params.release),
            artist: non_blank(params.artist),
            from: non_blank(params.from).map(|d| parse_date_filter(&d)).transpose()?,
            to: non_blank(params.to).map(|d| parse_date_filter(&d)).transpose()?,
            limit,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a `YYYY-MM-DD` date bound.
pub fn parse_date_filter(raw: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidFilter(format!("Invalid date '{raw}', expected YYYY-MM-DD")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub analytics: Vec<ReleaseAnalytics>,
    pub recent_reports: Vec<NaiveDate>,
    pub artists: Vec<ArtistAnalyticsSummary>,
    pub current_artist: Option<Artist>,
}

pub struct AnalyticsService {
    db: Mutex<Database>,
    catalog_cache: TtlCache<Arc<Catalog>>,
    bucket_secs: u64,
    limits: QueryConfig,
    stale_warn_ratio: f64,
}

impl AnalyticsService {
    pub fn new(db: Database, config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Mutex::new(db),
            catalog_cache: TtlCache::new(clock, config.cache.ttl(), config.cache.max_entries),
            bucket_secs: config.cache.bucket_secs,
            limits: config.query.clone(),
            stale_warn_ratio: config.stale_mapping_warn_ratio,
        }
    }

    pub fn db(&self) -> MutexGuard<'_, Database> {
        // SQLite rolls back an interrupted transaction, so a poisoned lock
        // still guards a consistent database.
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cache(&self) -> &TtlCache<Arc<Catalog>> {
        &self.catalog_cache
    }

    /// Catalog view shared by every request in the current time bucket.
    fn catalog(&self, db: &Database) -> Result<Arc<Catalog>, DbError> {
        let key = CacheKey::new(CATALOG_KEY)
            .bucketed(self.bucket_secs, self.catalog_cache.now())
            .build();
        self.catalog_cache.get_or_compute(&key, || {
            let catalog = Catalog::load(db)?;
            log::debug!("Loaded catalog with {} releases", catalog.release_count());
            Ok(Arc::new(catalog))
        })
    }

    /// Ingest one report. Snapshots are never cached, so the upload is
    /// visible to the next query.
    pub fn upload(
        &self,
        payload: &[u8],
        report_date: NaiveDate,
        filename: &str,
    ) -> Result<UploadSummary, IngestError> {
        let summary = ingest::ingest_report(&self.db(), payload, report_date, filename)?;
        summary.warn_if_stale(self.stale_warn_ratio);
        Ok(summary)
    }

    /// Mirror a directory export and drop the cached catalog.
    pub fn sync_catalog(&self, export: &CatalogExport) -> anyhow::Result<SyncResult> {
        let result = catalog::sync_catalog(&self.db(), export)?;
        let dropped = self.catalog_cache.clear();
        log::debug!("Invalidated {dropped} cached catalog entries");
        Ok(result)
    }

    pub fn query(&self, query: &AnalyticsQuery) -> Result<AnalyticsResponse, QueryError> {
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(QueryError::InvalidFilter(format!(
                    "'from' ({from}) is after 'to' ({to})"
                )));
            }
        }
        let limit = self.limits.resolve_limit(query.limit);

        let db = self.db();
        let catalog = self.catalog(&db)?;

        let mut release_ids: Option<Vec<String>> = query.release.clone().map(|id| vec![id]);
        let mut current_artist = None;

        if let Some(artist_id) = &query.artist {
            let owned = catalog.releases_of(artist_id);
            if owned.is_empty() {
                log::debug!("Artist {artist_id} has no releases");
                return Ok(AnalyticsResponse::default());
            }
            release_ids = Some(match release_ids {
                Some(ids) => ids.into_iter().filter(|id| owned.contains(id)).collect(),
                None => owned.to_vec(),
            });
            current_artist = catalog.artist(artist_id).cloned();
        }

        let snapshots = db.query_snapshots(&SnapshotFilter {
            release_ids,
            from: query.from,
            to: query.to,
        })?;
        drop(db);

        Ok(AnalyticsResponse {
            analytics: aggregate::release_totals(&snapshots, &catalog, limit),
            recent_reports: aggregate::recent_reports(&snapshots, RECENT_REPORTS),
            artists: aggregate::artist_rollups(&snapshots, &catalog),
            current_artist,
        })
    }
}

impl std::fmt::Debug for AnalyticsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsService")
            .field("catalog_cache", &self.catalog_cache)
            .field("bucket_secs", &self.bucket_secs)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    pub(crate) const HEADER: &str = "Id,Name,# Streams,Streams %,# Streams change,Streams change %,# Downloads,Downloads %,# Downloads change,Downloads change %";

    pub(crate) const EXPORT: &str = r#"{
        "artists": [
            {"_id": "a1", "name": "Alder", "slug": "alder"},
            {"_id": "a2", "name": "Birch"},
            {"_id": "a3", "name": "Cedar"}
        ],
        "releases": [
            {"_id": "X", "landrTrackId": "abc", "title": "Release X", "artists": ["a1"]},
            {"_id": "Y", "landrTrackId": "def", "title": "Release Y", "artists": ["a2"]},
            {"_id": "Z", "title": "Release Z", "artists": ["a2"]}
        ]
    }"#;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub(crate) fn e2e_payload() -> Vec<u8> {
        format!("{HEADER}\nabc,Track X,1000,50,0,0,10,0,0,0\nxyz,Nobody,300,0,0,0,0,0,0,0\ndef,Track Y,500,25,0,0,5,0,0,0\n")
            .into_bytes()
    }

    pub(crate) fn service_with(clock: Arc<ManualClock>) -> AnalyticsService {
        let service = AnalyticsService::new(Database::open_in_memory().unwrap(), &AppConfig::default(), clock);
        let export: CatalogExport = serde_json::from_str(EXPORT).unwrap();
        service.sync_catalog(&export).unwrap();
        service
    }

    pub(crate) fn service() -> AnalyticsService {
        let start = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        service_with(Arc::new(ManualClock::new(start)))
    }

    #[test]
    fn test_end_to_end_upload_then_query() {
        let service = service();
        let summary = service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.total_records, 3);

        let response = service.query(&AnalyticsQuery::default()).unwrap();
        let order: Vec<(&str, i64)> = response
            .analytics
            .iter()
            .map(|r| (r.release_id.as_str(), r.total_streams))
            .collect();
        assert_eq!(order, vec![("X", 1000), ("Y", 500)]);
        assert_eq!(response.analytics[0].title, "Release X");
        assert_eq!(response.recent_reports, vec![date("2024-05-01")]);
        assert!(response.current_artist.is_none());

        let artists: Vec<(&str, i64)> = response
            .artists
            .iter()
            .map(|a| (a.id.as_str(), a.total_streams))
            .collect();
        assert_eq!(artists, vec![("a1", 1000), ("a2", 500)]);
        // Z has no snapshots but still counts towards Birch's releases
        assert_eq!(response.artists[1].release_count, 2);
    }

    #[test]
    fn test_repeated_queries_are_identical() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        let first = service.query(&AnalyticsQuery::default()).unwrap();
        let second = service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reupload_keeps_totals() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();

        let response = service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(response.analytics[0].total_streams, 1000);
        // Rollups sum every observation
        assert_eq!(response.artists[0].total_streams, 2000);
    }

    #[test]
    fn test_huge_counts_query_without_overflow() {
        let service = service();
        let payload = format!("{HEADER}\nabc,Track X,1e300,0,0,0,0,0,0,0\n");
        service.upload(payload.as_bytes(), date("2024-05-01"), "big.csv").unwrap();
        service.upload(payload.as_bytes(), date("2024-05-02"), "big.csv").unwrap();

        let response = service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(response.analytics[0].total_streams, i64::MAX);
        assert_eq!(response.artists[0].total_streams, i64::MAX);
    }

    #[test]
    fn test_upload_without_id_column() {
        let service = service();
        let summary = service
            .upload(b"Track,# Streams\nfoo,1\nbar,2\n", date("2024-05-01"), "x.csv")
            .unwrap();
        assert_eq!(summary.records_processed, 0);
        assert_eq!(summary.total_records, 2);
    }

    #[test]
    fn test_artist_without_releases_is_empty() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();

        for artist in ["a3", "missing"] {
            let response = service
                .query(&AnalyticsQuery {
                    artist: Some(artist.into()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(response, AnalyticsResponse::default());
        }
    }

    #[test]
    fn test_artist_filter() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();

        let response = service
            .query(&AnalyticsQuery {
                artist: Some("a2".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.analytics.len(), 1);
        assert_eq!(response.analytics[0].release_id, "Y");
        assert_eq!(response.current_artist.as_ref().map(|a| a.name.as_str()), Some("Birch"));

        // Release outside the artist's set ANDs down to nothing
        let response = service
            .query(&AnalyticsQuery {
                artist: Some("a2".into()),
                release: Some("X".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(response.analytics.is_empty());
        assert!(response.current_artist.is_some());
    }

    #[test]
    fn test_release_and_date_filters() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        service.upload(&e2e_payload(), date("2024-06-01"), "june.csv").unwrap();

        let response = service
            .query(&AnalyticsQuery {
                release: Some("Y".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.analytics.len(), 1);
        assert_eq!(response.recent_reports, vec![date("2024-06-01"), date("2024-05-01")]);

        let response = service
            .query(&AnalyticsQuery {
                from: Some(date("2024-05-01")),
                to: Some(date("2024-05-01")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.recent_reports, vec![date("2024-05-01")]);
        assert_eq!(response.analytics[0].latest_date, date("2024-05-01"));
    }

    #[test]
    fn test_inverted_range_is_invalid() {
        let service = service();
        let result = service.query(&AnalyticsQuery {
            from: Some(date("2024-06-01")),
            to: Some(date("2024-05-01")),
            ..Default::default()
        });
        assert!(matches!(result, Err(QueryError::InvalidFilter(_))));
    }

    #[test]
    fn test_limit_caps_results() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        let response = service
            .query(&AnalyticsQuery {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.analytics.len(), 1);
        assert_eq!(response.analytics[0].release_id, "X");
        // Rollups are not limited
        assert_eq!(response.artists.len(), 2);
    }

    #[test]
    fn test_catalog_cached_within_bucket() {
        let start = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        let service = service_with(clock.clone());

        service.query(&AnalyticsQuery::default()).unwrap();
        service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(service.cache().misses(), 1);
        assert_eq!(service.cache().hits(), 1);

        // Next bucket builds a new entry
        clock.advance(Duration::from_secs(300));
        service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(service.cache().misses(), 2);
    }

    #[test]
    fn test_sync_invalidates_cached_catalog() {
        let service = service();
        service.upload(&e2e_payload(), date("2024-05-01"), "may.csv").unwrap();
        service.query(&AnalyticsQuery::default()).unwrap();

        let update: CatalogExport = serde_json::from_str(
            r#"{"releases": [{"_id": "X", "landrTrackId": "abc", "title": "Renamed X", "artists": ["a1"]}]}"#,
        )
        .unwrap();
        service.sync_catalog(&update).unwrap();

        let response = service.query(&AnalyticsQuery::default()).unwrap();
        assert_eq!(response.analytics[0].title, "Renamed X");
    }

    #[test]
    fn test_params_conversion() {
        let query = AnalyticsQuery::try_from(AnalyticsParams {
            release: Some("  ".into()),
            artist: Some("a1".into()),
            from: Some("2024-05-01".into()),
            to: None,
            limit: Some("10".into()),
        })
        .unwrap();
        assert_eq!(query.release, None);
        assert_eq!(query.artist.as_deref(), Some("a1"));
        assert_eq!(query.from, Some(date("2024-05-01")));
        assert_eq!(query.limit, Some(10));

        let bad_date = AnalyticsQuery::try_from(AnalyticsParams {
            from: Some("yesterday".into()),
            ..Default::default()
        });
        assert!(matches!(bad_date, Err(QueryError::InvalidFilter(_))));

        let bad_limit = AnalyticsQuery::try_from(AnalyticsParams {
            limit: Some("-3".into()),
            ..Default::default()
        });
        assert!(matches!(bad_limit, Err(QueryError::InvalidFilter(_))));
    }
}
