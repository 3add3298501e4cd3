//! Configuration loading and schema definitions for bootrun.
//!
//! This module provides types and functions for loading bootrun configuration
//! from TOML files or strings. Every section is optional; a missing file
//! yields the built-in defaults.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads bootrun configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use bootrun::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("bootrun.toml"))?;
/// println!("Retries: {}", config.http.retries);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from `path` if it exists, defaults otherwise.
///
/// Used for the implicit `bootrun.toml` in the working directory: its
/// absence is not an error, but a present-and-broken file is.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Loads bootrun configuration from a TOML string.
///
/// # Example
///
/// ```
/// use bootrun::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [http]
///     retries = 2
/// "#)?;
///
/// assert_eq!(config.http.retries, 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.http.retries, 8);
        assert_eq!(config.http.timeout_secs, 60);
        assert_eq!(config.storage.base_url, "https://storage.tuxboot.com");
        assert!(config.engine.command.contains("{job}"));
        assert!(config.engine.replay_command.contains("{device}"));
    }

    #[test]
    fn test_partial_sections() {
        let config = load_config_str(
            r#"
            [engine]
            command = "my-engine {job}"

            [cache]
            dir = "/var/cache/bootrun"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.command, "my-engine {job}");
        assert!(config.engine.replay_command.starts_with("lava-run --device"));
        assert_eq!(
            config.cache.dir.as_deref(),
            Some(std::path::Path::new("/var/cache/bootrun"))
        );
        assert_eq!(config.http.retries, 8);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(load_config_str("[http]\nretires = 3\n").is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config_or_default(&temp_dir.path().join("bootrun.toml")).unwrap();
        assert_eq!(config.http.retries, 8);
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bootrun.toml");
        std::fs::write(&path, "[http\n").unwrap();
        assert!(load_config_or_default(&path).is_err());
    }
}
