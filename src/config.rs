// src/config.rs
//! Service configuration: `config/advisor.toml` plus environment overrides.
//!
//! Lookup order for the file:
//! 1) `$ADVISOR_CONFIG_PATH` (must exist)
//! 2) `config/advisor.toml`
//! 3) built-in defaults (the cache TTL must then come from the env)

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::features::Source;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/advisor.toml";
pub const ENV_CONFIG_PATH: &str = "ADVISOR_CONFIG_PATH";
pub const ENV_CACHE_TTL_SECS: &str = "ADVISOR_CACHE_TTL_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "ADVISOR_RETRY_MAX_ATTEMPTS";
/// Upper bound for `retry.max_delay_secs` (one day).
pub const MAX_RETRY_DELAY_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_base_delay_secs() -> u64 {
    5
}
fn default_max_delay_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// No TTL default on purpose: it must be set in the file or the env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: Option<u64>,
    /// TTL for entries built while an optional source was unavailable.
    pub degraded_ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Result<Duration> {
        match self.ttl_secs {
            Some(0) => bail!("cache.ttl_secs must be positive"),
            Some(s) => Ok(Duration::from_secs(s)),
            None => Err(anyhow!(
                "cache.ttl_secs is not configured (set it in the config file or {ENV_CACHE_TTL_SECS})"
            )),
        }
    }

    pub fn degraded_ttl(&self) -> Result<Duration> {
        match self.degraded_ttl_secs {
            Some(0) => bail!("cache.degraded_ttl_secs must be positive"),
            Some(s) => Ok(Duration::from_secs(s)),
            None => self.ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    /// Probe at binary start-up before serving.
    #[serde(default = "default_true")]
    pub probe_on_startup: bool,
}

fn default_targets() -> Vec<String> {
    vec![
        "archive-api.open-meteo.com".to_string(),
        "modis.ornl.gov".to_string(),
        "rest.isric.org".to_string(),
    ]
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            timeout_secs: default_probe_timeout_secs(),
            probe_on_startup: true,
        }
    }
}

impl ConnectivityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One upstream data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub lookback_days: u32,
    pub timeout_secs: u64,
    /// Optional credential. "ENV" means: read from `ADVISOR_<SOURCE>_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_climate")]
    pub climate: SourceConfig,
    #[serde(default = "default_vegetation")]
    pub vegetation: SourceConfig,
    #[serde(default = "default_soil")]
    pub soil: SourceConfig,
}

fn default_climate() -> SourceConfig {
    SourceConfig {
        base_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
        lookback_days: 365,
        timeout_secs: 30,
        api_key: None,
    }
}
fn default_vegetation() -> SourceConfig {
    SourceConfig {
        base_url: "https://modis.ornl.gov/rst/api/v1".to_string(),
        lookback_days: 144,
        timeout_secs: 30,
        api_key: None,
    }
}
fn default_soil() -> SourceConfig {
    SourceConfig {
        base_url: "https://rest.isric.org/soilgrids/v2.0/properties/query".to_string(),
        lookback_days: 1,
        timeout_secs: 30,
        api_key: None,
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            climate: default_climate(),
            vegetation: default_vegetation(),
            soil: default_soil(),
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, source: Source) -> &SourceConfig {
        match source {
            Source::Climate => &self.climate,
            Source::Vegetation => &self.vegetation,
            Source::Soil => &self.soil,
        }
    }

    fn get_mut(&mut self, source: Source) -> &mut SourceConfig {
        match source {
            Source::Climate => &mut self.climate,
            Source::Vegetation => &mut self.vegetation,
            Source::Soil => &mut self.soil,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Overrides the embedded artifact when set.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            top_n: default_top_n(),
        }
    }
}

/// Env var holding the credential for `source` when its `api_key` is "ENV".
pub fn api_key_env_var(source: Source) -> String {
    format!("ADVISOR_{}_API_KEY", source.as_str().to_ascii_uppercase())
}

impl AppConfig {
    /// Parse TOML without env overrides or validation.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing advisor config toml")
    }

    /// Load from an explicit path, apply env overrides, resolve keys, validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)?;
        cfg.finish()
    }

    /// Load using `$ADVISOR_CONFIG_PATH`, then `config/advisor.toml`, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        Self::default().finish()
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env_overrides()?;
        self.resolve_api_keys()?;
        self.validate()?;
        Ok(self)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var(ENV_CACHE_TTL_SECS) {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CACHE_TTL_SECS} must be an integer"))?;
            self.cache.ttl_secs = Some(secs);
        }
        if let Ok(v) = env::var(ENV_RETRY_MAX_ATTEMPTS) {
            self.retry.max_attempts = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_RETRY_MAX_ATTEMPTS} must be an integer"))?;
        }
        Ok(())
    }

    fn resolve_api_keys(&mut self) -> Result<()> {
        for source in Source::ALL {
            let sc = self.sources.get_mut(source);
            let Some(raw) = sc.api_key.as_deref().map(str::trim) else {
                continue;
            };
            if raw.is_empty() {
                sc.api_key = None;
            } else if raw.eq_ignore_ascii_case("env") {
                let var = api_key_env_var(source);
                let key = env::var(&var).map_err(|_| anyhow!("Missing {var} env var"))?;
                sc.api_key = Some(key);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.ttl()?;
        self.cache.degraded_ttl()?;
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay_secs > MAX_RETRY_DELAY_SECS {
            bail!("retry.max_delay_secs must not exceed {MAX_RETRY_DELAY_SECS}");
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            bail!("retry.base_delay_secs must not exceed retry.max_delay_secs");
        }
        if self.connectivity.targets.iter().all(|t| t.trim().is_empty()) {
            bail!("connectivity.targets must name at least one host");
        }
        if self.model.top_n == 0 {
            bail!("model.top_n must be at least 1");
        }
        for source in Source::ALL {
            let sc = self.sources.get(source);
            if sc.base_url.trim().is_empty() {
                bail!("sources.{source}.base_url is empty");
            }
            if sc.lookback_days == 0 {
                bail!("sources.{source}.lookback_days must be positive");
            }
            if sc.timeout_secs == 0 {
                bail!("sources.{source}.timeout_secs must be positive");
            }
        }
        Ok(())
    }
}
