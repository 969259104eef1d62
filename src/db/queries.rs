use std::collections::HashMap;

use super::models::{Artist, Metric, NewSnapshot, Release, Snapshot, SnapshotFilter, SnapshotStats};
use super::{Database, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter};

const SNAPSHOT_COLUMNS: &str = "
    id, release_id, landr_track_id, report_date, name,
    streams_count, streams_pct, streams_change, streams_change_pct,
    downloads_count, downloads_pct, downloads_change, downloads_change_pct,
    report_filename, created_at";

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        release_id: row.get(1)?,
        landr_track_id: row.get(2)?,
        report_date: row.get(3)?,
        name: row.get(4)?,
        streams: Metric {
            count: row.get(5)?,
            percentage_of_total: row.get(6)?,
            change: row.get(7)?,
            change_percentage: row.get(8)?,
        },
        downloads: Metric {
            count: row.get(9)?,
            percentage_of_total: row.get(10)?,
            change: row.get(11)?,
            change_percentage: row.get(12)?,
        },
        report_filename: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl Database {
    // ---------------------------------------------------------------------
    // Catalog mirror
    // ---------------------------------------------------------------------

    /// Upsert a whole directory export in one transaction. Artists are
    /// written first so release credits can resolve.
    pub fn upsert_catalog(&self, artists: &[Artist], releases: &[Release]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for a in artists {
            Self::write_artist(&tx, a)?;
        }
        for r in releases {
            Self::write_release(&tx, r)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_artist(conn: &rusqlite::Connection, a: &Artist) -> Result<()> {
        conn.execute(
            "INSERT INTO artists (id, name, slug, image)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                slug = excluded.slug,
                image = excluded.image",
            params![a.id, a.name, a.slug, a.image],
        )?;
        Ok(())
    }

    fn write_release(conn: &rusqlite::Connection, r: &Release) -> Result<()> {
        conn.execute(
            "INSERT INTO releases (id, landr_track_id, title, slug, cover_image)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                landr_track_id = excluded.landr_track_id,
                title = excluded.title,
                slug = excluded.slug,
                cover_image = excluded.cover_image",
            params![r.id, r.landr_track_id, r.title, r.slug, r.cover_image],
        )?;
        conn.execute("DELETE FROM release_artists WHERE release_id = ?1", params![r.id])?;

        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO release_artists (release_id, artist_id, position)
             SELECT ?1, id, ?3 FROM artists WHERE id = ?2",
        )?;
        for (pos, artist_id) in r.artist_ids.iter().enumerate() {
            stmt.execute(params![r.id, artist_id, pos as i64])?;
        }
        Ok(())
    }

    /// All releases with their artist credits, ordered by id.
    pub fn get_releases(&self) -> Result<Vec<Release>> {
        let credits = self.release_credits()?;
        let mut stmt = self.conn.prepare(
            "SELECT id, landr_track_id, title, slug, cover_image FROM releases ORDER BY id",
        )?;
        let releases = stmt
            .query_map([], |row| {
                Ok(Release {
                    id: row.get(0)?,
                    landr_track_id: row.get(1)?,
                    title: row.get(2)?,
                    slug: row.get(3)?,
                    cover_image: row.get(4)?,
                    artist_ids: Vec::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(releases
            .into_iter()
            .map(|mut r| {
                r.artist_ids = credits.get(&r.id).cloned().unwrap_or_default();
                r
            })
            .collect())
    }

    /// Releases whose external track id is set (non-blank). These are the
    /// only releases a report row can ever match.
    pub fn get_releases_with_track_ids(&self) -> Result<Vec<Release>> {
        Ok(self
            .get_releases()?
            .into_iter()
            .filter(|r| r.landr_track_id.as_deref().is_some_and(|id| !id.trim().is_empty()))
            .collect())
    }

    fn release_credits(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT release_id, artist_id FROM release_artists ORDER BY release_id, position",
        )?;
        let mut credits: HashMap<String, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (release_id, artist_id) = row?;
            credits.entry(release_id).or_default().push(artist_id);
        }
        Ok(credits)
    }

    /// All artists, ordered by name.
    pub fn get_artists(&self) -> Result<Vec<Artist>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, slug, image FROM artists ORDER BY name, id")?;
        let artists = stmt
            .query_map([], |row| {
                Ok(Artist {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    slug: row.get(2)?,
                    image: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(artists)
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Store a batch of snapshots in a single transaction. Either every row
    /// is written or none is. Returns the number of rows written.
    pub fn insert_snapshots(&self, snapshots: &[NewSnapshot]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO snapshots (
                    release_id, landr_track_id, report_date, name,
                    streams_count, streams_pct, streams_change, streams_change_pct,
                    downloads_count, downloads_pct, downloads_change, downloads_change_pct,
                    report_filename
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?;
            for s in snapshots {
                stmt.execute(params![
                    s.release_id, s.landr_track_id, s.report_date, s.name,
                    s.streams.count, s.streams.percentage_of_total,
                    s.streams.change, s.streams.change_percentage,
                    s.downloads.count, s.downloads.percentage_of_total,
                    s.downloads.change, s.downloads.change_percentage,
                    s.report_filename,
                ])?;
            }
        }
        tx.commit()?;
        Ok(snapshots.len())
    }

    /// Load snapshots matching a filter, oldest report first.
    pub fn query_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(ids) = &filter.release_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("release_id IN ({placeholders})"));
            values.extend(ids.iter().cloned());
        }
        if let Some(from) = filter.from {
            clauses.push("report_date >= ?".to_string());
            values.push(from.to_string());
        }
        if let Some(to) = filter.to {
            clauses.push("report_date <= ?".to_string());
            values.push(to.to_string());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots {where_sql} ORDER BY report_date, id"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params_from_iter(values.iter()), snapshot_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    /// Distinct report dates, newest first.
    pub fn get_report_dates(&self, limit: usize) -> Result<Vec<NaiveDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT report_date FROM snapshots ORDER BY report_date DESC LIMIT ?1",
        )?;
        let dates = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<NaiveDate>, _>>()?;
        Ok(dates)
    }

    /// Store-wide counters.
    pub fn snapshot_stats(&self) -> Result<SnapshotStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        let total_snapshots = count("SELECT COUNT(*) FROM snapshots")?;
        let total_releases = count("SELECT COUNT(*) FROM releases")?;
        let linked_releases = count(
            "SELECT COUNT(*) FROM releases
             WHERE landr_track_id IS NOT NULL AND TRIM(landr_track_id) != ''",
        )?;
        let releases_with_snapshots = count("SELECT COUNT(DISTINCT release_id) FROM snapshots")?;
        let report_dates = count("SELECT COUNT(DISTINCT report_date) FROM snapshots")?;

        let mut file_stmt = self.conn.prepare(
            "SELECT report_filename, COUNT(*) FROM snapshots
             GROUP BY report_filename
             ORDER BY MAX(report_date) DESC, report_filename
             LIMIT 20",
        )?;
        let report_files: Vec<(String, i64)> = file_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SnapshotStats {
            total_snapshots,
            total_releases,
            linked_releases,
            releases_with_snapshots,
            report_dates,
            report_files,
        })
    }
}
