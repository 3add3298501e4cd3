//! Configuration schema definitions for bootrun.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── CacheConfig      - Where downloaded artifacts live
//! ├── HttpConfig       - Download retry and timeout settings
//! ├── EngineConfig     - How the execution engine is invoked
//! └── StorageConfig    - Where default kernels, rootfs and test definitions come from
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for bootrun.
///
/// # TOML Structure
///
/// ```toml
/// [cache]
/// dir = "~/.cache/bootrun"
///
/// [http]
/// retries = 8
/// timeout_secs = 60
///
/// [engine]
/// command = "lava-run --job-id 1 --output-dir {output} {job}"
/// replay_command = "lava-run --device {device} --job-id 1 --output-dir {output} {job}"
///
/// [storage]
/// base_url = "https://storage.tuxboot.com"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Artifact cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Download settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Execution engine invocation.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default artifact locations.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Artifact cache settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache directory. `~` is expanded.
    ///
    /// Default: the platform cache directory joined with `bootrun`.
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// The effective cache directory.
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned()),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("bootrun"),
        }
    }
}

/// Download settings for remote artifacts.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `retries` | 8 |
/// | `timeout_secs` | 60 |
/// | `backoff_secs` | 1 |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Number of retries after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Backoff factor in seconds; the n-th retry waits `backoff * 2^(n-1)`.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_retries() -> u32 {
    8
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_backoff_secs() -> u64 {
    1
}

/// Execution engine invocation.
///
/// Commands are split with shell-words rules. Placeholders are substituted
/// per run:
///
/// | Placeholder | Value |
/// |-------------|-------|
/// | `{job}` | Path of the job definition |
/// | `{output}` | Per-run output directory for the engine |
/// | `{id}` | Execution id of the run |
/// | `{device}` | Path of the device dictionary (`replay_command` only) |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Command line template for rendered jobs.
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Command line template for a pre-rendered job and device dictionary.
    #[serde(default = "default_replay_command")]
    pub replay_command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            replay_command: default_replay_command(),
        }
    }
}

fn default_engine_command() -> String {
    "lava-run --job-id 1 --output-dir {output} {job}".to_string()
}

fn default_replay_command() -> String {
    "lava-run --device {device} --job-id 1 --output-dir {output} {job}".to_string()
}

/// Default artifact locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Base URL that device default kernels, rootfs and DTBs are relative to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Location of the test-definition bundle.
    #[serde(default = "default_test_definitions")]
    pub test_definitions: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            test_definitions: default_test_definitions(),
        }
    }
}

impl StorageConfig {
    /// Joins a device default path onto the base URL.
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), relative)
    }
}

fn default_base_url() -> String {
    "https://storage.tuxboot.com".to_string()
}

fn default_test_definitions() -> String {
    "https://storage.tuxboot.com/test-definitions/2025.01.tar.zst".to_string()
}
