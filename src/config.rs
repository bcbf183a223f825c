use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The source selector value that means "default upstream, no rewriting".
pub const DEFAULT_SOURCE: &str = "mojang";

/// Snapshot of the download-related configuration, taken once per transfer.
///
/// Passing a snapshot in (instead of reading live settings mid-transfer)
/// keeps a transfer deterministic: the mirror decision made at start holds
/// for every redirect hop of the same transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download source selector. Anything other than the default upstream
    /// enables mirror rewriting (provided a mirror base is configured).
    #[serde(default = "default_source")]
    pub source: String,
    /// Base URL of the configured mirror or proxy. Empty disables rewriting.
    #[serde(default)]
    pub mirror_base: String,
    /// When set, the mirror acts as a proxy and receives the full original
    /// URL as a path suffix instead of a per-host remapping.
    #[serde(default)]
    pub proxy_mode: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on redirect hops for one transfer. The protocol itself
    /// offers no bound, so this guards against redirect loops.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}
fn default_user_agent() -> String {
    format!("launchnet/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    10
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            mirror_base: String::new(),
            proxy_mode: false,
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl DownloadConfig {
    /// Parse a configuration snapshot from TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse download configuration")
    }

    /// True when the configured source is the default upstream, in which
    /// case mirror rewriting is skipped entirely.
    pub fn uses_default_upstream(&self) -> bool {
        self.source.eq_ignore_ascii_case(DEFAULT_SOURCE)
    }
}
