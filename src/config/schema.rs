//! Configuration schema definitions for testpost.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── PublishConfig          - Worker pool, batching, attachment limits
//! ├── SearchConfig           - Search roots and work item name
//! └── StoreConfig (optional) - Remote test-run store
//!     └── AuthConfig         - Bearer token or basic PAT, read from env
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::publish::PublishLimits;

/// Root configuration structure for testpost.
///
/// Every section is optional. `[store]` is only needed to publish.
///
/// # TOML Structure
///
/// ```toml
/// [publish]
/// workers = 10
/// batch_size = 1000
///
/// [search]
/// roots = ["out/tests"]
/// work_item = "Nightly"
///
/// [store]
/// collection_uri = "https://dev.azure.com/org/"
/// team_project = "public"
/// run_id = 12345
///
/// [store.auth]
/// type = "bearer"
/// token_env = "SYSTEM_ACCESSTOKEN"
/// ```
///
/// # Example
///
/// ```
/// use testpost::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [publish]
///     workers = 2
/// "#).unwrap();
/// assert_eq!(config.publish.workers, 2);
/// assert_eq!(config.publish.batch_size, 1000);
/// assert!(config.store.is_none());
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Publishing settings (optional, has defaults).
    #[serde(default)]
    pub publish: PublishConfig,

    /// Where to look for result files (optional, has defaults).
    #[serde(default)]
    pub search: SearchConfig,

    /// Remote store; required only by `publish`.
    pub store: Option<StoreConfig>,
}

/// Worker pool and batching settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `workers` | 10 |
/// | `batch_size` | 1000 |
/// | `max_attachments` | None (unbounded) |
/// | `max_attachment_bytes` | 104857600 (100 MiB) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishConfig {
    /// Number of concurrent publishers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Canonical results per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attachments each worker may upload.
    #[serde(default)]
    pub max_attachments: Option<usize>,

    /// Largest attachment accepted, in bytes of text.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl PublishConfig {
    pub fn limits(&self) -> PublishLimits {
        PublishLimits {
            max_attachments: self.max_attachments,
            max_attachment_bytes: self.max_attachment_bytes,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            max_attachments: None,
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_workers() -> usize {
    10
}

fn default_batch_size() -> usize {
    1000
}

pub fn default_max_attachment_bytes() -> usize {
    100 * 1024 * 1024
}

/// Result file search settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Directories searched recursively for result files.
    ///
    /// Default: `["."]`
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Name of the placeholder result published when no result files exist.
    ///
    /// Default: `"WorkItem"`
    #[serde(default = "default_work_item")]
    pub work_item: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            work_item: default_work_item(),
        }
    }
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_work_item() -> String {
    "WorkItem".to_string()
}

/// Remote test-run store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Collection URL, e.g. `https://dev.azure.com/org/`.
    pub collection_uri: String,

    /// Project that owns the run.
    pub team_project: String,

    /// Run to add results to. May be supplied on the command line instead.
    #[serde(default)]
    pub run_id: Option<u64>,

    /// REST API version.
    ///
    /// Default: `"5.0"`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_api_version() -> String {
    "5.0".to_string()
}

/// How to authenticate against the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Authentication scheme.
    #[serde(rename = "type", default)]
    pub kind: AuthKind,

    /// Environment variable holding the token or personal access token.
    ///
    /// Default: `"SYSTEM_ACCESSTOKEN"`
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kind: AuthKind::default(),
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "SYSTEM_ACCESSTOKEN".to_string()
}

/// Authentication scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// `Authorization: Bearer <token>`.
    #[default]
    Bearer,
    /// HTTP basic with an empty user name and the token as password.
    Basic,
}
