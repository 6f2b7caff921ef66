//! Indexer provider API types.
//!
//! Mirrors the provider's v1 REST resources. Fields the core does not use are
//! ignored; records missing required fields are rejected at parse time.

use serde::{Deserialize, Serialize};

// =============================================================================
// Artists
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistStatistics {
    #[serde(default)]
    pub album_count: u32,
    #[serde(default)]
    pub track_file_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub value: f64,
}

/// Options sent along when adding an artist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddArtistOptions {
    /// Which albums to monitor: "none" leaves album selection to us
    pub monitor: String,
    pub search_for_missing_albums: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistResource {
    /// Provider id, absent for lookup results not yet added
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub artist_name: String,
    pub foreign_artist_id: String,
    #[serde(default)]
    pub artist_type: Option<String>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub quality_profile_id: Option<u32>,
    #[serde(default)]
    pub metadata_profile_id: Option<u32>,
    #[serde(default)]
    pub root_folder_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub statistics: Option<ArtistStatistics>,
    #[serde(default)]
    pub ratings: Option<Ratings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_options: Option<AddArtistOptions>,
}

impl ArtistResource {
    pub fn album_count(&self) -> u32 {
        self.statistics.as_ref().map_or(0, |s| s.album_count)
    }

    pub fn is_type(&self, artist_type: &str) -> bool {
        self.artist_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(artist_type))
    }
}

// =============================================================================
// Albums and releases
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumStatistics {
    #[serde(default)]
    pub track_file_count: u32,
    #[serde(default)]
    pub track_count: u32,
    #[serde(default)]
    pub size_on_disk: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumResource {
    pub id: i64,
    pub title: String,
    pub foreign_album_id: String,
    pub artist_id: i64,
    /// "Album", "EP", "Single", ...
    #[serde(default)]
    pub album_type: Option<String>,
    /// "Live", "Compilation", ...
    #[serde(default)]
    pub secondary_types: Vec<String>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub any_release_ok: bool,
    #[serde(default)]
    pub statistics: Option<AlbumStatistics>,
}

impl AlbumResource {
    pub fn has_files(&self) -> bool {
        self.statistics
            .as_ref()
            .is_some_and(|s| s.track_file_count > 0)
    }

    /// Plain studio album: album type "Album" without secondary types.
    pub fn is_studio_album(&self) -> bool {
        self.album_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("album"))
            && self.secondary_types.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResource {
    pub guid: String,
    pub title: String,
    pub indexer_id: i64,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub seeders: Option<u32>,
    #[serde(default)]
    pub leechers: Option<u32>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rejections: Vec<String>,
}

impl ReleaseResource {
    pub fn peers(&self) -> u32 {
        self.seeders.unwrap_or(0) + self.leechers.unwrap_or(0)
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: i64,
    /// Download client handle, the provider_ref of a job
    #[serde(default)]
    pub download_id: Option<String>,
    #[serde(default)]
    pub album_id: Option<i64>,
    #[serde(default)]
    pub artist_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub sizeleft: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tracked_download_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueuePage {
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

// =============================================================================
// Commands, folders, tags
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all_fields = "camelCase")]
pub enum CommandRequest {
    AlbumSearch { album_ids: Vec<i64> },
    RefreshArtist { artist_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFolderResource {
    #[serde(default)]
    pub id: Option<i64>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagResource {
    pub id: i64,
    pub label: String,
}
