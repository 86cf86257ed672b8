use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CollectError, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Scrape-target configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_aastocks_base_url")]
    pub aastocks_base_url: String,

    #[serde(default = "default_hkex_base_url")]
    pub hkex_base_url: String,

    /// One timeout budget for every call, scrape pages and API alike.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Historical-price CSV API configuration. The token is a secret; supply it
/// via the environment (HKEX__API__TOKEN), not a checked-in file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Bound on in-flight detail-page fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Consecutive per-code failures tolerated before a price sweep gives up.
    #[serde(default = "default_failure_limit")]
    pub consecutive_failure_limit: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_aastocks_base_url() -> String {
    "http://www.aastocks.com".to_string()
}
fn default_hkex_base_url() -> String {
    "https://www.hkexnews.hk".to_string()
}
fn default_api_base_url() -> String {
    "https://www.quandl.com/api/v3/datasets/HKEX".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    "hkex-etl/0.1 (market data collection; research use)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/hkex.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    4
}
fn default_failure_limit() -> u32 {
    20
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("HKEX").separator("__"))
            .build()
            .map_err(|e| CollectError::Config(e.to_string()))?;

        Self::from_config(cfg)
    }

    /// Absent sections fall back to defaults; a present-but-malformed value
    /// is a hard `Config` error, never a silent default.
    fn from_config(cfg: config::Config) -> Result<Self> {
        cfg.try_deserialize()
            .map_err(|e| CollectError::Config(e.to_string()))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            aastocks_base_url: default_aastocks_base_url(),
            hkex_base_url: default_hkex_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            consecutive_failure_limit: default_failure_limit(),
        }
    }
}
