//! Configuration loading and schema definitions for testpost.
//!
//! This module provides types and functions for loading testpost
//! configuration from TOML files or strings. The schema covers the worker
//! pool, the result file search, and the remote store.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result, bail};

/// Loads testpost configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
/// - A value is out of range (zero workers or zero batch size)
///
/// # Example
///
/// ```no_run
/// use testpost::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("testpost.toml"))?;
/// println!("Workers: {}", config.publish.workers);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate(&config).with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Loads testpost configuration from a TOML string.
///
/// # Example
///
/// ```
/// use testpost::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [search]
///     roots = ["out"]
///
///     [store]
///     collection_uri = "https://dev.azure.com/org/"
///     team_project = "public"
/// "#)?;
///
/// assert_eq!(config.publish.workers, 10);
/// assert_eq!(config.store.unwrap().api_version, "5.0");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.publish.workers == 0 {
        bail!("publish.workers must be at least 1");
    }
    if config.publish.batch_size == 0 {
        bail!("publish.batch_size must be at least 1");
    }
    if config.search.roots.is_empty() {
        bail!("search.roots must name at least one directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.publish.workers, 10);
        assert_eq!(config.publish.batch_size, 1000);
        assert_eq!(config.publish.max_attachments, None);
        assert_eq!(config.publish.max_attachment_bytes, 104_857_600);
        assert_eq!(config.search.roots, vec![PathBuf::from(".")]);
        assert!(config.store.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [publish]
            workers = 4
            batch_size = 250
            max_attachments = 5000

            [search]
            roots = ["a", "b"]
            work_item = "Nightly"

            [store]
            collection_uri = "https://dev.azure.com/org/"
            team_project = "public"
            run_id = 12345
            api_version = "6.0"

            [store.auth]
            type = "basic"
            token_env = "MY_PAT"
            "#,
        )
        .unwrap();

        assert_eq!(config.publish.limits().max_attachments, Some(5000));
        assert_eq!(config.search.work_item, "Nightly");
        let store = config.store.unwrap();
        assert_eq!(store.run_id, Some(12345));
        assert_eq!(store.api_version, "6.0");
        assert_eq!(store.auth.kind, AuthKind::Basic);
        assert_eq!(store.auth.token_env, "MY_PAT");
    }

    #[test]
    fn test_auth_defaults_to_bearer() {
        let config = load_config_str(
            r#"
            [store]
            collection_uri = "https://x/"
            team_project = "p"
            "#,
        )
        .unwrap();
        let auth = config.store.unwrap().auth;
        assert_eq!(auth.kind, AuthKind::Bearer);
        assert_eq!(auth.token_env, "SYSTEM_ACCESSTOKEN");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = load_config_str("[publish]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_rejects_unknown_auth_type() {
        let result = load_config_str(
            r#"
            [store]
            collection_uri = "https://x/"
            team_project = "p"
            [store.auth]
            type = "oauth"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("testpost.toml");
        std::fs::write(&path, "[publish]\nbatch_size = 10\n").unwrap();
        assert_eq!(load_config(&path).unwrap().publish.batch_size, 10);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
