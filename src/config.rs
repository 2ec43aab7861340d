use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Directory under the storage root that holds one sub-directory per extract.
pub const CONTAINERS_DIR: &str = "containers";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Content root.  Extracts live under `{root}/containers/{id}`.
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    pub fn containers_path(&self) -> PathBuf {
        Path::new(&self.root).join(CONTAINERS_DIR)
    }
}

fn default_storage_root() -> String {
    ".".to_string()
}

// ---------------------------------------------------------------------------
// External tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Program that re-stamps a snapshot (`osmconvert`).
    #[serde(default = "default_convert_program")]
    pub convert_program: String,
    /// Program that applies replication diffs (`pyosmium-up-to-date`).
    #[serde(default = "default_update_program")]
    pub update_program: String,
    #[serde(default = "default_tool_timeout")]
    pub convert_timeout_secs: u64,
    /// Replication catch-up can be slow; defaults to one hour.
    #[serde(default = "default_tool_timeout")]
    pub update_timeout_secs: u64,
    /// Kill a tool that outlives its timeout instead of abandoning it.
    #[serde(default = "bool_true")]
    pub kill_on_timeout: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            convert_program: default_convert_program(),
            update_program: default_update_program(),
            convert_timeout_secs: default_tool_timeout(),
            update_timeout_secs: default_tool_timeout(),
            kill_on_timeout: true,
        }
    }
}

impl ToolsConfig {
    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }
}

fn default_convert_program() -> String {
    "osmconvert".to_string()
}

fn default_update_program() -> String {
    "pyosmium-up-to-date".to_string()
}

fn default_tool_timeout() -> u64 {
    3600
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Remote fetch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Whole-request timeout.  Base snapshots can be several GB.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    3600
}

fn default_user_agent() -> String {
    concat!("extract-keeper/", env!("CARGO_PKG_VERSION")).to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but falls back to defaults when `path` is absent
/// and `optional` is set (i.e. the user did not name a file explicitly).
pub fn load_config_or_default<P: AsRef<Path>>(path: P, optional: bool) -> Result<Config> {
    let path = path.as_ref();
    if optional && !path.exists() {
        let config = Config::default();
        validate_config(&config)?;
        return Ok(config);
    }
    load_config(path)
}

fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.tools.convert_program.trim().is_empty(),
        "tools.convert_program must not be empty"
    );
    anyhow::ensure!(
        !config.tools.update_program.trim().is_empty(),
        "tools.update_program must not be empty"
    );
    anyhow::ensure!(
        config.tools.convert_timeout_secs > 0 && config.tools.update_timeout_secs > 0,
        "tool timeouts must be greater than zero"
    );
    anyhow::ensure!(
        config.fetch.timeout_secs > 0,
        "fetch.timeout_secs must be greater than zero"
    );
    Ok(())
}
