pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Schema version written to `PRAGMA user_version` after migrating.
const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode so analytics reads don't block an in-flight upload
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: catalog mirror (artists, releases) + report snapshots
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artists (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                slug        TEXT,
                image       TEXT
            );

            CREATE TABLE IF NOT EXISTS releases (
                id              TEXT PRIMARY KEY,
                landr_track_id  TEXT,
                title           TEXT NOT NULL,
                slug            TEXT,
                cover_image     TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_releases_track_id ON releases(landr_track_id);

            CREATE TABLE IF NOT EXISTS release_artists (
                release_id  TEXT NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
                artist_id   TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (release_id, artist_id)
            );

            CREATE INDEX IF NOT EXISTS idx_release_artists_artist ON release_artists(artist_id);

            -- One row per (release, report) observation. No uniqueness on
            -- (release_id, report_date): re-uploading a report duplicates rows.
            CREATE TABLE IF NOT EXISTS snapshots (
                id                          INTEGER PRIMARY KEY AUTOINCREMENT,
                release_id                  TEXT NOT NULL REFERENCES releases(id),
                landr_track_id              TEXT NOT NULL,
                report_date                 TEXT NOT NULL,
                name                        TEXT NOT NULL,

                -- Cumulative lifetime figures as reported
                streams_count               INTEGER NOT NULL DEFAULT 0,
                streams_pct                 REAL NOT NULL DEFAULT 0,
                streams_change              INTEGER NOT NULL DEFAULT 0,
                streams_change_pct          REAL NOT NULL DEFAULT 0,
                downloads_count             INTEGER NOT NULL DEFAULT 0,
                downloads_pct               REAL NOT NULL DEFAULT 0,
                downloads_change            INTEGER NOT NULL DEFAULT 0,
                downloads_change_pct        REAL NOT NULL DEFAULT 0,

                report_filename             TEXT NOT NULL,
                created_at                  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_release ON snapshots(release_id);
            CREATE INDEX IF NOT EXISTS idx_snapshots_date ON snapshots(report_date);
            ",
        )?;
        Ok(())
    }
}
