//! Indexer provider HTTP client.
//!
//! Thin typed wrapper over the provider's v1 REST API, authenticated with an
//! `X-Api-Key` header.

use super::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

/// Typed surface of the indexer provider.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    // === Artists ===

    /// Search the provider's metadata for artists. `term` is a name or
    /// `lidarr:{external id}`.
    async fn lookup_artist(&self, term: &str) -> Result<Vec<ArtistResource>>;

    /// Artists already added to the provider.
    async fn list_artists(&self) -> Result<Vec<ArtistResource>>;

    async fn add_artist(&self, artist: &ArtistResource) -> Result<ArtistResource>;

    async fn update_artist(&self, artist: &ArtistResource) -> Result<ArtistResource>;

    // === Albums and releases ===

    async fn list_albums(&self, artist_id: i64) -> Result<Vec<AlbumResource>>;

    async fn albums_by_foreign_id(&self, foreign_album_id: &str) -> Result<Vec<AlbumResource>>;

    async fn update_album(&self, album: &AlbumResource) -> Result<AlbumResource>;

    async fn list_releases(&self, album_id: i64) -> Result<Vec<ReleaseResource>>;

    async fn grab_release(&self, release: &ReleaseResource) -> Result<()>;

    // === Queue ===

    async fn list_queue(&self) -> Result<Vec<QueueRecord>>;

    async fn remove_queue_item(&self, id: i64, blocklist: bool, skip_redownload: bool)
        -> Result<()>;

    // === Commands, folders, tags ===

    async fn run_command(&self, command: &CommandRequest) -> Result<()>;

    async fn root_folders(&self) -> Result<Vec<RootFolderResource>>;

    async fn add_root_folder(&self, path: &str) -> Result<RootFolderResource>;

    async fn tags(&self) -> Result<Vec<TagResource>>;

    async fn create_tag(&self, label: &str) -> Result<TagResource>;
}

/// Keep the records that match the schema, logging the ones that do not.
pub fn parse_records<T: DeserializeOwned>(records: Vec<serde_json::Value>, kind: &str) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<T>(record) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Dropping malformed {} record from indexer: {}", kind, e);
                None
            }
        })
        .collect()
}

pub struct HttpIndexerApi {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl HttpIndexerApi {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, kind: &str) -> Result<Vec<T>> {
        let records: Vec<serde_json::Value> = self
            .http_client
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} list", kind))?;
        Ok(parse_records(records, kind))
    }
}

#[async_trait]
impl IndexerApi for HttpIndexerApi {
    // =========================================================================
    // Artists
    // =========================================================================

    async fn lookup_artist(&self, term: &str) -> Result<Vec<ArtistResource>> {
        self.get_list(
            &format!("artist/lookup?term={}", urlencoding::encode(term)),
            "artist",
        )
        .await
    }

    async fn list_artists(&self) -> Result<Vec<ArtistResource>> {
        self.get_list("artist", "artist").await
    }

    async fn add_artist(&self, artist: &ArtistResource) -> Result<ArtistResource> {
        let response = self
            .http_client
            .post(self.url("artist"))
            .header("X-Api-Key", &self.api_key)
            .json(artist)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn update_artist(&self, artist: &ArtistResource) -> Result<ArtistResource> {
        let id = artist.id.context("Cannot update an artist without id")?;
        let response = self
            .http_client
            .put(self.url(&format!("artist/{}", id)))
            .header("X-Api-Key", &self.api_key)
            .json(artist)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    // =========================================================================
    // Albums and releases
    // =========================================================================

    async fn list_albums(&self, artist_id: i64) -> Result<Vec<AlbumResource>> {
        self.get_list(&format!("album?artistId={}", artist_id), "album")
            .await
    }

    async fn albums_by_foreign_id(&self, foreign_album_id: &str) -> Result<Vec<AlbumResource>> {
        self.get_list(
            &format!(
                "album?foreignAlbumId={}",
                urlencoding::encode(foreign_album_id)
            ),
            "album",
        )
        .await
    }

    async fn update_album(&self, album: &AlbumResource) -> Result<AlbumResource> {
        let response = self
            .http_client
            .put(self.url(&format!("album/{}", album.id)))
            .header("X-Api-Key", &self.api_key)
            .json(album)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn list_releases(&self, album_id: i64) -> Result<Vec<ReleaseResource>> {
        self.get_list(&format!("release?albumId={}", album_id), "release")
            .await
    }

    async fn grab_release(&self, release: &ReleaseResource) -> Result<()> {
        self.http_client
            .post(self.url("release"))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "guid": release.guid,
                "indexerId": release.indexer_id,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // =========================================================================
    // Queue
    // =========================================================================

    async fn list_queue(&self) -> Result<Vec<QueueRecord>> {
        let page: QueuePage = self
            .http_client
            .get(self.url("queue?pageSize=1000&includeUnknownArtistItems=true"))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse queue page")?;
        Ok(parse_records(page.records, "queue"))
    }

    async fn remove_queue_item(
        &self,
        id: i64,
        blocklist: bool,
        skip_redownload: bool,
    ) -> Result<()> {
        let path = format!(
            "queue/{}?removeFromClient=true&blocklist={}&skipRedownload={}",
            id, blocklist, skip_redownload
        );
        self.http_client
            .delete(self.url(&path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // =========================================================================
    // Commands, folders, tags
    // =========================================================================

    async fn run_command(&self, command: &CommandRequest) -> Result<()> {
        self.http_client
            .post(self.url("command"))
            .header("X-Api-Key", &self.api_key)
            .json(command)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn root_folders(&self) -> Result<Vec<RootFolderResource>> {
        self.get_list("rootfolder", "root folder").await
    }

    async fn add_root_folder(&self, path: &str) -> Result<RootFolderResource> {
        let response = self
            .http_client
            .post(self.url("rootfolder"))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({ "path": path, "name": path }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn tags(&self) -> Result<Vec<TagResource>> {
        self.get_list("tag", "tag").await
    }

    async fn create_tag(&self, label: &str) -> Result<TagResource> {
        let response = self
            .http_client
            .post(self.url("tag"))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({ "label": label }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
