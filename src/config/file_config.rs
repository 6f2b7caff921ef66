use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub indexer_url: Option<String>,
    pub indexer_api_key: Option<String>,
    pub p2p_gateway_url: Option<String>,

    // Feature configs
    pub indexer: Option<IndexerConfig>,
    pub p2p: Option<P2pConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub reputation: Option<ReputationConfig>,
    pub reaper: Option<ReaperConfig>,
    pub orchestrator: Option<OrchestratorConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IndexerConfig {
    pub root_folder: Option<String>,
    pub quality_profile_id: Option<u32>,
    pub metadata_profile_id: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub discovery_tag: Option<String>,
    pub allow_any_release_escalation: Option<bool>,
    pub album_poll_attempts: Option<u32>,
    pub album_poll_delay_secs: Option<u64>,
    pub refresh_wait_secs: Option<u64>,
    pub metadata_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct P2pConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub download_dir: Option<String>,
    pub search_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub inactivity_timeout_secs: Option<u64>,
    pub download_ceiling_secs: Option<u64>,
    pub min_file_size_bytes: Option<u64>,
    pub size_tolerance: Option<f64>,
    pub max_download_attempts: Option<usize>,
    pub min_score: Option<i32>,
    pub max_candidates: Option<usize>,
    pub search_cache_ttl_secs: Option<u64>,
    pub reconnect_cooldown_secs: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub search_concurrency: Option<usize>,
    pub download_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_searches: Option<usize>,
    pub window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReputationConfig {
    pub mild_threshold: Option<u32>,
    pub severe_threshold: Option<u32>,
    pub skip_threshold: Option<u32>,
    pub mild_penalty: Option<i32>,
    pub severe_penalty: Option<i32>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: Option<u64>,
    pub pending_timeout_secs: Option<u64>,
    pub no_source_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub reconcile_interval_secs: Option<u64>,
    pub cache_prune_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_fallback_chain: Option<u32>,
    pub import_failure_dedup_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
