use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HarvestError;
use crate::resolver::DEFAULT_MAX_PAGES;

pub const DEFAULT_CONFIG_FILE: &str = "scimago-harvest.json";
pub const DEFAULT_BASE_URL: &str = "https://www.scimagojr.com/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub base_url: String,
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub checkpoint: Utf8PathBuf,
    pub retry_list: Utf8PathBuf,
    pub partial_prefix: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub use_cache: bool,
    pub concurrency: usize,
    pub max_pages: u32,
    pub snapshot_every: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub user_agent: String,
    pub accept_language: String,
    /// Plain-text copy of the log, next to the console output.
    pub log_file: Option<Utf8PathBuf>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            input: Utf8PathBuf::from("revistas.json"),
            output: Utf8PathBuf::from("revistas_scimago.json"),
            checkpoint: Utf8PathBuf::from("ultimo_procesado.txt"),
            retry_list: Utf8PathBuf::from("reintentar_extraccion.json"),
            partial_prefix: Utf8PathBuf::from("revistas_scimago_parcial"),
            cache_dir: default_cache_dir(),
            use_cache: true,
            concurrency: 5,
            max_pages: DEFAULT_MAX_PAGES,
            snapshot_every: 200,
            timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 1000,
            delay_min_ms: 500,
            delay_max_ms: 1800,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "es-ES,es;q=0.9".to_string(),
            log_file: None,
        }
    }
}

/// The subset of [`HarvestConfig`] a single HTTP client needs.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub referer: String,
    pub user_agent: String,
    pub accept_language: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.concurrency == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(HarvestError::InvalidConfig(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.snapshot_every == 0 {
            return Err(HarvestError::InvalidConfig(
                "snapshot_every must be at least 1".to_string(),
            ));
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(HarvestError::InvalidConfig(format!(
                "delay_min_ms ({}) exceeds delay_max_ms ({})",
                self.delay_min_ms, self.delay_max_ms
            )));
        }
        self.base()?;
        if self.use_cache {
            let cache = self.cache_dir.as_std_path();
            if cache.exists() && !cache.is_dir() {
                return Err(HarvestError::InvalidConfig(format!(
                    "cache path {} is not a directory",
                    self.cache_dir
                )));
            }
        }
        Ok(())
    }

    pub fn base(&self) -> Result<Url, HarvestError> {
        let base = Url::parse(&self.base_url).map_err(|err| HarvestError::InvalidUrl {
            url: self.base_url.clone(),
            message: err.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(HarvestError::InvalidConfig(format!(
                "base_url {} cannot be used as a base",
                self.base_url
            )));
        }
        Ok(base)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            referer: self.base_url.clone(),
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            delay_min: Duration::from_millis(self.delay_min_ms),
            delay_max: Duration::from_millis(self.delay_max_ms),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `scimago-harvest.json` from the working directory when
    /// present. Without either, the defaults apply.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<HarvestConfig, HarvestError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Ok(HarvestConfig::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| HarvestError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<HarvestConfig, HarvestError> {
        serde_json::from_str(content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }
}

pub fn default_cache_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("scimago-harvest").join("pages"))
                .ok()
        })
        .unwrap_or_else(|| Utf8PathBuf::from("cache"))
}
