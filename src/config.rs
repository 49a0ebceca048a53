//! Configuration for remote code search
//!
//! Settings come from the `[search]` table of `<repo>/.fastnav/config.toml`,
//! then `FASTNAV_*` environment variables override individual values.
//! Anything left unset falls back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

use crate::cache::DEFAULT_TTL;
use crate::models::{MAX_CODE_SEARCH_RESULTS, QUERY_CODE_SEARCH_TIMEOUT};

/// Per-repository configuration directory
pub const CONFIG_DIR: &str = ".fastnav";
pub const CONFIG_TOML: &str = "config.toml";

/// Where the remote query runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SearchMode {
    /// In this process
    Direct,
    /// In a child process reached over the RPC bridge
    Bridged,
}

/// Remote search configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_mode")]
    pub mode: SearchMode,

    /// Bound on one remote round trip
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Results requested from the index (capped at 200)
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How long the bridge waits for its child process to connect
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Restrict searches to one file extension (e.g. `cs`)
    #[serde(default)]
    pub file_extension: Option<String>,

    /// Override the search URL derived from the project URI
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Token sent as basic auth; acquiring it is up to the user
    #[serde(default)]
    pub personal_access_token: Option<String>,

    /// Executable launched as the bridge child (defaults to the current exe)
    #[serde(default)]
    pub client_executable: Option<PathBuf>,
}

fn default_mode() -> SearchMode {
    SearchMode::Bridged
}

fn default_timeout_secs() -> u64 {
    QUERY_CODE_SEARCH_TIMEOUT.as_secs()
}

fn default_max_results() -> usize {
    MAX_CODE_SEARCH_RESULTS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_branch() -> String {
    "master".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            timeout_secs: default_timeout_secs(),
            max_results: default_max_results(),
            cache_ttl_secs: default_cache_ttl_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            branch: default_branch(),
            file_extension: None,
            endpoint: None,
            personal_access_token: None,
            client_executable: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Apply `FASTNAV_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("FASTNAV_MODE") {
            self.mode = mode
                .parse()
                .with_context(|| format!("Invalid FASTNAV_MODE '{}' (expected direct or bridged)", mode))?;
        }
        if let Some(value) = lookup("FASTNAV_TIMEOUT_SECS") {
            self.timeout_secs = parse_number("FASTNAV_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("FASTNAV_MAX_RESULTS") {
            self.max_results = parse_number("FASTNAV_MAX_RESULTS", &value)?;
        }
        if let Some(value) = lookup("FASTNAV_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_number("FASTNAV_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("FASTNAV_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_number("FASTNAV_CONNECT_TIMEOUT_SECS", &value)?;
        }
        if let Some(branch) = lookup("FASTNAV_BRANCH") {
            self.branch = branch;
        }
        if let Some(ext) = lookup("FASTNAV_FILE_EXTENSION") {
            self.file_extension = Some(ext);
        }
        if let Some(endpoint) = lookup("FASTNAV_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("FASTNAV_PAT") {
            self.personal_access_token = Some(token);
        }
        if let Some(exe) = lookup("FASTNAV_CLIENT_EXECUTABLE") {
            self.client_executable = Some(PathBuf::from(exe));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} '{}'", name, value))
}

/// Load the `[search]` table from `<root>/.fastnav/config.toml`
///
/// Falls back to defaults if the file or the table is missing.
pub fn load_file_config(root: &Path) -> Result<SearchConfig> {
    let config_path = root.join(CONFIG_DIR).join(CONFIG_TOML);

    if !config_path.exists() {
        log::debug!("No {} found, using default search config", config_path.display());
        return Ok(SearchConfig::default());
    }

    let config_str = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    let toml_value: toml::Value = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;

    match toml_value.get("search") {
        Some(search_table) => search_table
            .clone()
            .try_into()
            .context("Failed to parse [search] section"),
        None => {
            log::debug!("No [search] section in {}, using defaults", config_path.display());
            Ok(SearchConfig::default())
        }
    }
}

/// Load file config for `root`, then apply environment overrides
pub fn load_config(root: &Path) -> Result<SearchConfig> {
    let mut config = load_file_config(root)?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}
