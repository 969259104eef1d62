use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::db::models::{Artist, Release};
use crate::db::Database;

/// Read-only view of the release and artist directories.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    releases: HashMap<String, Release>,
    artists: HashMap<String, Artist>,
    /// Artist ids sorted by name.
    artist_order: Vec<String>,
    /// artist id → credited release ids
    credits: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub fn load(db: &Database) -> crate::db::Result<Self> {
        Ok(Self::from_parts(db.get_releases()?, db.get_artists()?))
    }

    pub fn from_parts(releases: Vec<Release>, artists: Vec<Artist>) -> Self {
        let mut credits: HashMap<String, Vec<String>> = HashMap::new();
        for release in &releases {
            for artist_id in &release.artist_ids {
                credits.entry(artist_id.clone()).or_default().push(release.id.clone());
            }
        }

        let mut sorted: Vec<&Artist> = artists.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let artist_order = sorted.into_iter().map(|a| a.id.clone()).collect();

        Self {
            releases: releases.into_iter().map(|r| (r.id.clone(), r)).collect(),
            artists: artists.into_iter().map(|a| (a.id.clone(), a)).collect(),
            artist_order,
            credits,
        }
    }

    pub fn release(&self, id: &str) -> Option<&Release> {
        self.releases.get(id)
    }

    pub fn artist(&self, id: &str) -> Option<&Artist> {
        self.artists.get(id)
    }

    /// Artists in name order.
    pub fn artists(&self) -> impl Iterator<Item = &Artist> {
        self.artist_order.iter().filter_map(|id| self.artists.get(id))
    }

    /// Ids of releases credited to `artist_id`.
    pub fn releases_of(&self, artist_id: &str) -> &[String] {
        self.credits.get(artist_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn release_count(&self) -> usize {
        self.releases.len()
    }
}

// ---------------------------------------------------------------------------
// Directory export mirroring
// ---------------------------------------------------------------------------

/// JSON export of the main application's directories.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CatalogExport {
    pub artists: Vec<ExportedArtist>,
    pub releases: Vec<ExportedRelease>,
}

#[derive(Debug, Deserialize)]
pub struct ExportedArtist {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedRelease {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub landr_track_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
}

pub struct SyncResult {
    pub artists: usize,
    pub releases: usize,
    pub linked_releases: usize,
}

impl CatalogExport {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse catalog export {}", path.display()))
    }
}

/// Mirror an export into the local catalog tables. Upserts only: nothing is
/// deleted and snapshots are untouched.
pub fn sync_catalog(db: &Database, export: &CatalogExport) -> Result<SyncResult> {
    let artists: Vec<Artist> = export
        .artists
        .iter()
        .map(|a| Artist {
            id: a.id.clone(),
            name: a.name.clone(),
            slug: a.slug.clone(),
            image: a.image.clone(),
        })
        .collect();

    let releases: Vec<Release> = export
        .releases
        .iter()
        .map(|r| Release {
            id: r.id.clone(),
            landr_track_id: r
                .landr_track_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from),
            title: r.title.clone(),
            slug: r.slug.clone(),
            cover_image: r.cover_image.clone(),
            artist_ids: r.artists.clone(),
        })
        .collect();
    let linked_releases = releases.iter().filter(|r| r.landr_track_id.is_some()).count();

    db.upsert_catalog(&artists, &releases)
        .context("Failed to store catalog export")?;

    log::info!(
        "Synced catalog: {} artists, {} releases ({} linked)",
        artists.len(),
        releases.len(),
        linked_releases
    );

    Ok(SyncResult {
        artists: artists.len(),
        releases: releases.len(),
        linked_releases,
    })
}
