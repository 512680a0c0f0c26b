//! Engine configuration.
//!
//! Sources are layered, later ones winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional file, TOML, YAML or JSON by extension.
//! 3. Environment variables prefixed `CORPUS_`, with `__` separating
//!    nested keys (`CORPUS_CACHE__TTL_SECS=60`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CORPUS_";

// Hard limits of the FastCDC 2020 chunker.
pub const CHUNK_MIN_FLOOR: u32 = 64;
pub const CHUNK_AVG_FLOOR: u32 = 256;
pub const CHUNK_MAX_FLOOR: u32 = 1024;
pub const CHUNK_MIN_CEILING: u32 = 1_048_576;
pub const CHUNK_AVG_CEILING: u32 = 4_194_304;
pub const CHUNK_MAX_CEILING: u32 = 16_777_216;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "corpus")
}

/// Where [`Config::load`] looks when no file is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from(".corpus"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds `chunks.pack` and `index.sqlite`.
    pub data_dir: PathBuf,
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            cache: CacheConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Refuse to grow the chunk container beyond this many bytes.
    pub max_bytes: Option<u64>,
    /// `fdatasync` the container after every append.
    pub sync_writes: bool,
}

/// FastCDC bounds, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { min_size: 16 * 1024, avg_size: 64 * 1024, max_size: 256 * 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Budget for cached decompressed bytes.
    pub max_bytes: u64,
    pub ttl_secs: u64,
    /// Period of the background expiry sweep. Zero disables it.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 4096, max_bytes: 64 * 1024 * 1024, ttl_secs: 300, sweep_interval_secs: 30 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Number of lock stripes guarding fast-digest buckets and documents.
    pub stripes: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { stripes: 256 }
    }
}

impl Config {
    /// Load from defaults, then `path` (if given and present), then the
    /// environment, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_file(figment, path)?;
            } else {
                tracing::debug!(path = %path.display(), "No configuration file; using defaults");
            }
        }
        let config: Config =
            figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// The same configuration rooted at another data directory.
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let ChunkingConfig { min_size, avg_size, max_size } = self.chunking;
        if !(min_size <= avg_size && avg_size <= max_size) {
            exn::bail!(invalid(format!("chunk sizes must satisfy min <= avg <= max, got {min_size}/{avg_size}/{max_size}")));
        }
        check_bounds("chunking.min_size", min_size, CHUNK_MIN_FLOOR, CHUNK_MIN_CEILING)?;
        check_bounds("chunking.avg_size", avg_size, CHUNK_AVG_FLOOR, CHUNK_AVG_CEILING)?;
        check_bounds("chunking.max_size", max_size, CHUNK_MAX_FLOOR, CHUNK_MAX_CEILING)?;
        if self.cache.max_entries == 0 || self.cache.max_bytes == 0 {
            exn::bail!(invalid("cache capacity must be non-zero".to_string()));
        }
        if self.dedup.stripes == 0 {
            exn::bail!(invalid("dedup.stripes must be at least 1".to_string()));
        }
        if self.store.max_bytes == Some(0) {
            exn::bail!(invalid("store.max_bytes must be non-zero when set".to_string()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> ErrorKind {
    ErrorKind::Invalid(reason)
}

fn check_bounds(name: &str, value: u32, floor: u32, ceiling: u32) -> Result<()> {
    if !(floor..=ceiling).contains(&value) {
        exn::bail!(invalid(format!("{name} must be within {floor}..={ceiling}, got {value}")));
    }
    Ok(())
}
