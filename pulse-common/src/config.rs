//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `PULSE_ROOT_FOLDER`, then `PULSE_ROOT` environment variable
//! 3. TOML config file `root_folder`
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops startup: a warning is
//! logged and defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "PULSE_ROOT_FOLDER";
/// Alternative root folder environment variable
pub const ROOT_ENV: &str = "PULSE_ROOT";
/// Explicit TOML config path, overriding the platform search
pub const CONFIG_FILE_ENV: &str = "PULSE_CONFIG_FILE";

pub const DEFAULT_BIND: &str = "127.0.0.1:5740";
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// File names inside the root folder
pub const AGGREGATE_FILE: &str = "aggregates.json";
pub const CAPTURE_LOG_FILE: &str = "webhook-events.jsonl";
pub const SETTINGS_FILE: &str = "webhook-settings.json";

/// `[logging]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[webhook]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// `[provider]` table (upstream API credentials)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Contents of `pulse.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub capture_events: Option<bool>,
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub provider: ProviderSection,
}

impl TomlConfig {
    pub fn bind_address(&self) -> String {
        self.bind
            .clone()
            .unwrap_or_else(|| CompiledDefaults::for_current_platform().bind)
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_events.unwrap_or(true)
    }

    pub fn body_limit(&self) -> usize {
        self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }
}

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub bind: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    // ~/.local/share/pulse, ~/Library/Application Support/pulse, %LOCALAPPDATA%\pulse
    dirs::data_local_dir()
        .map(|d| d.join("pulse"))
        .unwrap_or_else(|| PathBuf::from("./pulse_data"))
}

/// Candidate TOML locations, in search order
pub fn config_file_candidates() -> Vec<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return vec![PathBuf::from(path)];
    }

    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("pulse").join("pulse.toml"));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/pulse/pulse.toml"));
    }
    candidates
}

/// Parse one TOML file strictly
pub fn load_toml_from(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Where the effective TOML configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// File found but unreadable or invalid; defaults used
    Invalid { path: PathBuf, reason: String },
    Defaults,
}

impl ConfigSource {
    /// Log the outcome (for callers that load before tracing is up)
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
            ConfigSource::Invalid { reason, .. } => warn!("{} (using defaults)", reason),
            ConfigSource::Defaults => info!("No configuration file found, using defaults"),
        }
    }
}

/// Load the first TOML config found without logging
pub fn locate_toml_config() -> (TomlConfig, ConfigSource) {
    for path in config_file_candidates() {
        if !path.exists() {
            continue;
        }
        return match load_toml_from(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (
                TomlConfig::default(),
                ConfigSource::Invalid {
                    path,
                    reason: e.to_string(),
                },
            ),
        };
    }
    (TomlConfig::default(), ConfigSource::Defaults)
}

/// Load the first TOML config found, falling back to defaults
pub fn load_toml_config() -> TomlConfig {
    let (config, source) = locate_toml_config();
    source.log();
    config
}

/// Write TOML atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolves the root folder per the priority order above
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        // Priority 2: Environment variables
        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    info!("{}: root folder from {}: {}", self.module_name, var, path);
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.toml_root {
            info!("{}: root folder from config file: {}", self.module_name, path.display());
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        let path = CompiledDefaults::for_current_platform().root_folder;
        info!("{}: root folder (default): {}", self.module_name, path.display());
        path
    }
}

/// Creates the root folder and names the files inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.root.join(AGGREGATE_FILE)
    }

    pub fn capture_log_path(&self) -> PathBuf {
        self.root.join(CAPTURE_LOG_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }
}

/// Log filter directive: `RUST_LOG` wins, then the TOML level
pub fn log_filter(config: &TomlConfig) -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| config.logging.level.clone())
}
