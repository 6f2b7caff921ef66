mod file_config;

pub use file_config::{
    FileConfig, IndexerConfig, OrchestratorConfig, P2pConfig, RateLimitConfig, ReaperConfig,
    ReputationConfig,
};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub indexer_url: Option<String>,
    pub indexer_api_key: Option<String>,
    pub p2p_gateway_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,

    pub indexer: IndexerSettings,
    pub p2p: P2pSettings,
    pub rate_limit: RateLimitSettings,
    pub reputation: ReputationSettings,
    pub reaper: ReaperSettings,
    pub orchestrator: OrchestratorSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let indexer_url = file.indexer_url.or_else(|| cli.indexer_url.clone());
        let indexer_api_key = file.indexer_api_key.or_else(|| cli.indexer_api_key.clone());
        let p2p_gateway_url = file.p2p_gateway_url.or_else(|| cli.p2p_gateway_url.clone());

        let idx_file = file.indexer.unwrap_or_default();
        let idx_default = IndexerSettings::default();
        let indexer = IndexerSettings {
            base_url: indexer_url,
            api_key: indexer_api_key,
            root_folder: idx_file.root_folder.unwrap_or(idx_default.root_folder),
            quality_profile_id: idx_file
                .quality_profile_id
                .unwrap_or(idx_default.quality_profile_id),
            metadata_profile_id: idx_file
                .metadata_profile_id
                .unwrap_or(idx_default.metadata_profile_id),
            request_timeout_secs: idx_file
                .request_timeout_secs
                .unwrap_or(idx_default.request_timeout_secs),
            discovery_tag: idx_file.discovery_tag.unwrap_or(idx_default.discovery_tag),
            allow_any_release_escalation: idx_file
                .allow_any_release_escalation
                .unwrap_or(idx_default.allow_any_release_escalation),
            album_poll_attempts: idx_file
                .album_poll_attempts
                .unwrap_or(idx_default.album_poll_attempts),
            album_poll_delay_secs: idx_file
                .album_poll_delay_secs
                .unwrap_or(idx_default.album_poll_delay_secs),
            refresh_wait_secs: idx_file
                .refresh_wait_secs
                .unwrap_or(idx_default.refresh_wait_secs),
            metadata_base_url: idx_file.metadata_base_url,
        };

        let p2p_file = file.p2p.unwrap_or_default();
        let p2p_default = P2pSettings::default();
        let p2p = P2pSettings {
            gateway_url: p2p_gateway_url,
            username: p2p_file.username,
            password: p2p_file.password,
            download_dir: p2p_file
                .download_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| db_dir.join("p2p-downloads")),
            search_timeout_secs: p2p_file
                .search_timeout_secs
                .unwrap_or(p2p_default.search_timeout_secs),
            connect_timeout_secs: p2p_file
                .connect_timeout_secs
                .unwrap_or(p2p_default.connect_timeout_secs),
            inactivity_timeout_secs: p2p_file
                .inactivity_timeout_secs
                .unwrap_or(p2p_default.inactivity_timeout_secs),
            download_ceiling_secs: p2p_file
                .download_ceiling_secs
                .unwrap_or(p2p_default.download_ceiling_secs),
            min_file_size_bytes: p2p_file
                .min_file_size_bytes
                .unwrap_or(p2p_default.min_file_size_bytes),
            size_tolerance: p2p_file.size_tolerance.unwrap_or(p2p_default.size_tolerance),
            max_download_attempts: p2p_file
                .max_download_attempts
                .unwrap_or(p2p_default.max_download_attempts),
            min_score: p2p_file.min_score.unwrap_or(p2p_default.min_score),
            max_candidates: p2p_file.max_candidates.unwrap_or(p2p_default.max_candidates),
            search_cache_ttl_secs: p2p_file
                .search_cache_ttl_secs
                .unwrap_or(p2p_default.search_cache_ttl_secs),
            reconnect_cooldown_secs: p2p_file
                .reconnect_cooldown_secs
                .unwrap_or(p2p_default.reconnect_cooldown_secs),
            max_consecutive_failures: p2p_file
                .max_consecutive_failures
                .unwrap_or(p2p_default.max_consecutive_failures),
            search_concurrency: p2p_file
                .search_concurrency
                .unwrap_or(p2p_default.search_concurrency),
            download_concurrency: p2p_file
                .download_concurrency
                .unwrap_or(p2p_default.download_concurrency),
        };

        let rl_file = file.rate_limit.unwrap_or_default();
        let rl_default = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            max_searches: rl_file.max_searches.unwrap_or(rl_default.max_searches),
            window_secs: rl_file.window_secs.unwrap_or(rl_default.window_secs),
        };

        let rep_file = file.reputation.unwrap_or_default();
        let rep_default = ReputationSettings::default();
        let reputation = ReputationSettings {
            mild_threshold: rep_file.mild_threshold.unwrap_or(rep_default.mild_threshold),
            severe_threshold: rep_file
                .severe_threshold
                .unwrap_or(rep_default.severe_threshold),
            skip_threshold: rep_file.skip_threshold.unwrap_or(rep_default.skip_threshold),
            mild_penalty: rep_file.mild_penalty.unwrap_or(rep_default.mild_penalty),
            severe_penalty: rep_file.severe_penalty.unwrap_or(rep_default.severe_penalty),
            ttl_secs: rep_file.ttl_secs.unwrap_or(rep_default.ttl_secs),
        };
        if !(reputation.mild_threshold <= reputation.severe_threshold
            && reputation.severe_threshold <= reputation.skip_threshold)
        {
            bail!("Reputation thresholds must satisfy mild <= severe <= skip");
        }

        let reaper_file = file.reaper.unwrap_or_default();
        let reaper_default = ReaperSettings::default();
        let reaper = ReaperSettings {
            interval_secs: reaper_file.interval_secs.unwrap_or(reaper_default.interval_secs),
            pending_timeout_secs: reaper_file
                .pending_timeout_secs
                .unwrap_or(reaper_default.pending_timeout_secs),
            no_source_timeout_secs: reaper_file
                .no_source_timeout_secs
                .unwrap_or(reaper_default.no_source_timeout_secs),
            download_timeout_secs: reaper_file
                .download_timeout_secs
                .unwrap_or(reaper_default.download_timeout_secs),
            reconcile_interval_secs: reaper_file
                .reconcile_interval_secs
                .unwrap_or(reaper_default.reconcile_interval_secs),
            cache_prune_interval_secs: reaper_file
                .cache_prune_interval_secs
                .unwrap_or(reaper_default.cache_prune_interval_secs),
        };

        let orch_file = file.orchestrator.unwrap_or_default();
        let orch_default = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            max_fallback_chain: orch_file
                .max_fallback_chain
                .unwrap_or(orch_default.max_fallback_chain),
            import_failure_dedup_secs: orch_file
                .import_failure_dedup_secs
                .unwrap_or(orch_default.import_failure_dedup_secs),
        };

        Ok(Self {
            db_dir,
            indexer,
            p2p,
            rate_limit,
            reputation,
            reaper,
            orchestrator,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("acquisition_jobs.db")
    }
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// None means the indexer provider is not configured
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub root_folder: String,
    pub quality_profile_id: u32,
    pub metadata_profile_id: u32,
    pub request_timeout_secs: u64,
    pub discovery_tag: String,
    /// Relax "any release acceptable" once when a strict search finds nothing
    pub allow_any_release_escalation: bool,
    pub album_poll_attempts: u32,
    pub album_poll_delay_secs: u64,
    pub refresh_wait_secs: u64,
    /// Override for the metadata source used to resolve artist ids
    pub metadata_base_url: Option<String>,
}

impl IndexerSettings {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            root_folder: "/music".to_string(),
            quality_profile_id: 1,
            metadata_profile_id: 1,
            request_timeout_secs: 30,
            discovery_tag: "discovery".to_string(),
            allow_any_release_escalation: true,
            album_poll_attempts: 6,
            album_poll_delay_secs: 5,
            refresh_wait_secs: 10,
            metadata_base_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct P2pSettings {
    /// None means the P2P network is not configured
    pub gateway_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub download_dir: PathBuf,
    pub search_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub inactivity_timeout_secs: u64,
    pub download_ceiling_secs: u64,
    pub min_file_size_bytes: u64,
    /// Relative size mismatch tolerated before it is logged
    pub size_tolerance: f64,
    pub max_download_attempts: usize,
    pub min_score: i32,
    pub max_candidates: usize,
    pub search_cache_ttl_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub max_consecutive_failures: u32,
    pub search_concurrency: usize,
    pub download_concurrency: usize,
}

impl Default for P2pSettings {
    fn default() -> Self {
        Self {
            gateway_url: None,
            username: None,
            password: None,
            download_dir: PathBuf::from("p2p-downloads"),
            search_timeout_secs: 15,
            connect_timeout_secs: 30,
            inactivity_timeout_secs: 60,
            download_ceiling_secs: 600, // 10 minutes
            min_file_size_bytes: 500 * 1024,
            size_tolerance: 0.10,
            max_download_attempts: 3,
            min_score: 20,
            max_candidates: 10,
            search_cache_ttl_secs: 600,
            reconnect_cooldown_secs: 30,
            max_consecutive_failures: 3,
            search_concurrency: 3,
            download_concurrency: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_searches: usize,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_searches: 34,
            window_secs: 220,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReputationSettings {
    pub mild_threshold: u32,
    pub severe_threshold: u32,
    pub skip_threshold: u32,
    pub mild_penalty: i32,
    pub severe_penalty: i32,
    pub ttl_secs: u64,
}

impl Default for ReputationSettings {
    fn default() -> Self {
        Self {
            mild_threshold: 2,
            severe_threshold: 4,
            skip_threshold: 6,
            mild_penalty: 10,
            severe_penalty: 40,
            ttl_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    pub interval_secs: u64,
    /// Pending jobs never started are failed after this long
    pub pending_timeout_secs: u64,
    /// Processing jobs without a provider ref
    pub no_source_timeout_secs: u64,
    /// Processing jobs with a provider ref, measured from the last progress
    pub download_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub cache_prune_interval_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            pending_timeout_secs: 24 * 3600,
            no_source_timeout_secs: 30 * 60,
            download_timeout_secs: 4 * 3600,
            reconcile_interval_secs: 600,
            cache_prune_interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of successor jobs started in a row by one request
    pub max_fallback_chain: u32,
    pub import_failure_dedup_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_fallback_chain: 5,
            import_failure_dedup_secs: 30,
        }
    }
}
