use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ide_detector::Variant;
use crate::platform::stable_app_data_dir;

const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "gorev.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    #[serde(skip)]
    pub config_path: PathBuf,
    pub log_level: String,
    pub watcher: WatcherConfig,
    pub installer: InstallerConfig,
    pub search: SearchDefaults,
    pub ide: IdeIntegrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        let base = stable_app_data_dir();
        Self {
            db_path: base.join(DB_FILE_NAME),
            config_path: base.join(CONFIG_FILE_NAME),
            log_level: "info".to_string(),
            watcher: WatcherConfig::default(),
            installer: InstallerConfig::default(),
            search: SearchDefaults::default(),
            ide: IdeIntegrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub watched_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub debounce_ms: u64,
    pub auto_update_status: bool,
    pub max_file_size: u64,
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        let extensions = [
            ".go", ".js", ".ts", ".py", ".java", ".cpp", ".c", ".h", ".md", ".txt", ".json",
            ".yaml", ".yml",
        ];
        let patterns = [
            "node_modules",
            ".git",
            ".vscode",
            "vendor",
            "build",
            "dist",
            "*.tmp",
            "*.log",
            "*.swp",
        ];
        Self {
            watched_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ignore_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            debounce_ms: 500,
            auto_update_status: true,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub release_api_base: String,
    pub release_owner: String,
    pub release_repo: String,
    pub extension_id: String,
    pub timeout_secs: u64,
    pub query_versions: bool,
    /// Parent for per-installer scratch dirs; the OS temp dir when unset.
    pub scratch_root: Option<PathBuf>,
}

impl InstallerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            release_api_base: "https://api.github.com".to_string(),
            release_owner: "msenol".to_string(),
            release_repo: "gorev".to_string(),
            extension_id: "mehmetsenol.gorev-vscode".to_string(),
            timeout_secs: 30,
            query_versions: false,
            scratch_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub max_results: usize,
    pub fuzzy_threshold: f64,
    pub history_retention_days: u32,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_results: 50,
            fuzzy_threshold: 0.6,
            history_retention_days: 30,
        }
    }
}

/// Editor integration preferences persisted alongside the rest of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeIntegrationConfig {
    pub auto_install: bool,
    pub auto_update: bool,
    pub check_interval_hours: u32,
    pub supported_ides: Vec<Variant>,
    pub extension_id: String,
    pub disable_prompts: bool,
    pub last_update_check: Option<DateTime<Utc>>,
}

impl IdeIntegrationConfig {
    pub fn should_check_for_updates(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_update {
            return false;
        }
        match self.last_update_check {
            None => true,
            Some(last) => {
                now.signed_duration_since(last)
                    >= chrono::Duration::hours(i64::from(self.check_interval_hours))
            }
        }
    }
}

impl Default for IdeIntegrationConfig {
    fn default() -> Self {
        Self {
            auto_install: false,
            auto_update: true,
            check_interval_hours: 24,
            supported_ides: vec![Variant::VsCode, Variant::Cursor, Variant::Windsurf],
            extension_id: InstallerConfig::default().extension_id,
            disable_prompts: false,
            last_update_check: None,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    stable_app_data_dir().join(CONFIG_FILE_NAME)
}

/// Reads the config file, falling back to defaults when it does not exist.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    let mut cfg = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)?;
        toml::from_str::<Config>(&raw)?
    } else {
        Config::default()
    };
    cfg.config_path = config_path;

    validate(&cfg)?;
    Ok(cfg)
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    validate(cfg)?;
    if let Some(parent) = cfg.config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    std::fs::write(&cfg.config_path, raw)?;
    Ok(())
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.db_path.as_os_str().is_empty() {
        return Err(invalid("db_path is required"));
    }

    if cfg.config_path.as_os_str().is_empty() {
        return Err(invalid("config_path is required"));
    }

    if cfg.search.max_results == 0 || cfg.search.max_results > 1000 {
        return Err(invalid("search.max_results out of range"));
    }

    if !(0.0..=1.0).contains(&cfg.search.fuzzy_threshold) {
        return Err(invalid("search.fuzzy_threshold must be within 0.0..=1.0"));
    }

    if cfg.watcher.debounce_ms == 0 || cfg.watcher.debounce_ms > 60_000 {
        return Err(invalid("watcher.debounce_ms out of range"));
    }

    for pattern in &cfg.watcher.ignore_patterns {
        if glob::Pattern::new(pattern).is_err() {
            return Err(invalid(&format!("invalid ignore pattern: {pattern}")));
        }
    }

    if cfg.installer.timeout_secs == 0 {
        return Err(invalid("installer.timeout_secs must be positive"));
    }

    if !cfg.installer.extension_id.contains('.') {
        return Err(invalid("installer.extension_id must look like publisher.name"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
