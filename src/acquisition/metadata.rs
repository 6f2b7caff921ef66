//! Artist identifier lookups against an external metadata source.
//!
//! The shipped implementation talks to the MusicBrainz web service, which
//! requires a descriptive User-Agent.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";

const USER_AGENT: &str = concat!(
    "AlbumAcquirer/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/album-acquirer)"
);

/// Artist as known to the metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtistRecord {
    pub id: String,
    pub name: String,
    /// "Person", "Group", ...
    #[serde(rename = "type")]
    pub artist_type: Option<String>,
    /// Search relevance (0-100), only present on search results
    pub score: Option<u32>,
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn search_artist(&self, name: &str) -> Result<Vec<ArtistRecord>>;

    async fn lookup_artist(&self, id: &str) -> Result<Option<ArtistRecord>>;
}

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<ArtistRecord>,
}

pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(MUSICBRAINZ_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataLookup for MusicBrainzClient {
    async fn search_artist(&self, name: &str) -> Result<Vec<ArtistRecord>> {
        let query = format!("artist:\"{}\"", name.replace('"', ""));
        let url = format!(
            "{}/artist?query={}&fmt=json&limit=5",
            self.base_url,
            urlencoding::encode(&query)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Artist search request failed")?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            bail!("Metadata source rate limited the artist search");
        }
        let body: ArtistSearchResponse = response
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse artist search response")?;
        Ok(body.artists)
    }

    async fn lookup_artist(&self, id: &str) -> Result<Option<ArtistRecord>> {
        let url = format!(
            "{}/artist/{}?fmt=json",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Artist lookup request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let artist: ArtistRecord = response
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse artist lookup response")?;
        Ok(Some(artist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("AlbumAcquirer/"));
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client =
            MusicBrainzClient::with_base_url("http://localhost:8080/ws/2/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/ws/2");
    }

    #[test]
    fn test_parse_search_response() {
        let json = r#"{
            "created": "2024-01-01T00:00:00Z",
            "count": 1,
            "artists": [
                {"id": "abc", "name": "Broods", "type": "Group", "score": 100, "country": "NZ"}
            ]
        }"#;
        let parsed: ArtistSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.artists.len(), 1);
        assert_eq!(parsed.artists[0].artist_type.as_deref(), Some("Group"));
        assert_eq!(parsed.artists[0].score, Some(100));
    }
}
