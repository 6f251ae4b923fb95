//! Configuration for the garage service.
//!
//! Settings live in `.garage/garage.toml` and are layered file → environment
//! → CLI. Every section has defaults, so a missing file is a valid config.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev_mode = false
//! db_file = "garage.db"
//!
//! [push]
//! backend = "fcm"
//! project_id = "garage-demo"
//! icon = "/favicon.png"
//!
//! [progress]
//! enabled = true
//! tick_secs = 2
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! file = false
//!
//! [[catalog]]
//! type = "Brakes"
//! duration_minutes = 60
//! price = 80000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Name of the data directory, relative to the working directory.
pub const DATA_DIR: &str = ".garage";
pub const CONFIG_FILE: &str = "garage.toml";
/// Overrides `[push] access_token`.
pub const ACCESS_TOKEN_ENV: &str = "GARAGE_FCM_ACCESS_TOKEN";

// ── [server] ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS for a locally served frontend.
    #[serde(default)]
    pub dev_mode: bool,
    /// SQLite file, relative to the data directory.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_file() -> String {
    "garage.db".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            db_file: default_db_file(),
        }
    }
}

// ── [push] ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushBackend {
    /// Log messages instead of delivering them.
    #[default]
    Log,
    /// Firebase Cloud Messaging HTTP v1.
    Fcm,
}

impl std::fmt::Display for PushBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushBackend::Log => write!(f, "log"),
            PushBackend::Fcm => write!(f, "fcm"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub backend: PushBackend,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Full send URL; takes precedence over `project_id`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// OAuth bearer token. Prefer the environment variable.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_icon")]
    pub icon: Option<String>,
}

fn default_icon() -> Option<String> {
    Some("/favicon.png".to_string())
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            backend: PushBackend::default(),
            project_id: None,
            endpoint: None,
            access_token: None,
            icon: default_icon(),
        }
    }
}

impl PushConfig {
    /// Access token, with the environment taking precedence over the file.
    pub fn access_token(&self) -> Option<String> {
        self.resolve_access_token(std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    fn resolve_access_token(&self, from_env: Option<String>) -> Option<String> {
        from_env
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.access_token.clone())
    }
}

// ── [progress] ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    2
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
        }
    }
}

// ── [logging] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write a daily-rolling file under `<data dir>/logs`.
    #[serde(default)]
    pub file: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: false,
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

// ── [[catalog]] ───────────────────────────────────────────────────────

/// A repair type offered on the breakdown form, with its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub repair_type: String,
    pub duration_minutes: u32,
    /// Price in Ariary.
    pub price: i64,
}

impl CatalogEntry {
    fn new(repair_type: &str, duration_minutes: u32, price: i64) -> Self {
        Self {
            repair_type: repair_type.to_string(),
            duration_minutes,
            price,
        }
    }
}

pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new("Brakes", 60, 80_000),
        CatalogEntry::new("Oil change", 30, 45_000),
        CatalogEntry::new("Filter", 20, 25_000),
        CatalogEntry::new("Battery", 15, 150_000),
        CatalogEntry::new("Shock absorbers", 90, 200_000),
        CatalogEntry::new("Clutch", 180, 350_000),
        CatalogEntry::new("Tyres", 45, 120_000),
        CatalogEntry::new("Cooling system", 60, 90_000),
    ]
}

// ── garage.toml ───────────────────────────────────────────────────────

/// Contents of `garage.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarageToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub progress: ProgressSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default = "default_catalog")]
    pub catalog: Vec<CatalogEntry>,
}

impl Default for GarageToml {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            push: PushConfig::default(),
            progress: ProgressSection::default(),
            logging: LoggingSection::default(),
            catalog: default_catalog(),
        }
    }
}

impl GarageToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse garage.toml")
    }

    /// Load `garage.toml` from the data directory, or defaults if absent.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize garage.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be picked".to_string());
        }
        if self.progress.enabled && self.progress.tick_secs == 0 {
            warnings.push("progress.tick_secs must be at least 1".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Unknown logging.level '{}'. Valid values: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.push.backend == PushBackend::Fcm {
            if self.push.project_id.is_none() && self.push.endpoint.is_none() {
                warnings.push("push.backend = \"fcm\" needs project_id or endpoint".to_string());
            }
            if self.push.access_token().is_none() {
                warnings.push(format!(
                    "push.backend = \"fcm\" needs an access token ({} or push.access_token)",
                    ACCESS_TOKEN_ENV
                ));
            }
        }

        if self.catalog.is_empty() {
            warnings.push("catalog is empty; no breakdown can be reported".to_string());
        }
        let mut seen = HashSet::new();
        for entry in &self.catalog {
            let key = entry.repair_type.trim().to_lowercase();
            if key.is_empty() {
                warnings.push("catalog entry with an empty type".to_string());
                continue;
            }
            if !seen.insert(key) {
                warnings.push(format!("Duplicate catalog type '{}'", entry.repair_type));
            }
            if entry.duration_minutes == 0 {
                warnings.push(format!(
                    "Catalog type '{}' has a zero duration",
                    entry.repair_type
                ));
            }
            if entry.price < 0 {
                warnings.push(format!(
                    "Catalog type '{}' has a negative price",
                    entry.repair_type
                ));
            }
        }

        warnings
    }
}

// ── Resolved configuration ────────────────────────────────────────────

/// Configuration after merging file, environment and CLI.
#[derive(Debug, Clone)]
pub struct GarageConfig {
    pub data_dir: PathBuf,
    pub toml: GarageToml,
    pub cli_host: Option<String>,
    pub cli_port: Option<u16>,
    pub cli_dev: bool,
}

impl GarageConfig {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        let toml = GarageToml::load_or_default(&data_dir)?;
        Ok(Self {
            data_dir,
            toml,
            cli_host: None,
            cli_port: None,
            cli_dev: false,
        })
    }

    pub fn with_cli_args(
        data_dir: PathBuf,
        host: Option<String>,
        port: Option<u16>,
        dev: bool,
    ) -> Result<Self> {
        let mut config = Self::new(data_dir)?;
        config.cli_host = host;
        config.cli_port = port;
        config.cli_dev = dev;
        Ok(config)
    }

    pub fn host(&self) -> String {
        self.cli_host
            .clone()
            .unwrap_or_else(|| self.toml.server.host.clone())
    }

    pub fn port(&self) -> u16 {
        self.cli_port.unwrap_or(self.toml.server.port)
    }

    pub fn dev_mode(&self) -> bool {
        self.cli_dev || self.toml.server.dev_mode
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.toml.server.db_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let toml = GarageToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.server.port, 8080);
        assert_eq!(toml.server.host, "127.0.0.1");
        assert_eq!(toml.push.backend, PushBackend::Log);
        assert_eq!(toml.push.icon.as_deref(), Some("/favicon.png"));
        assert_eq!(toml.progress.tick_secs, 2);
        assert_eq!(toml.logging.format, LogFormat::Pretty);
        assert_eq!(toml.catalog.len(), 8);
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = GarageToml::parse(
            r#"
            [server]
            port = 9000

            [push]
            backend = "fcm"
            project_id = "demo"
            "#,
        )
        .unwrap();
        assert_eq!(toml.server.port, 9000);
        assert_eq!(toml.server.db_file, "garage.db");
        assert_eq!(toml.push.backend, PushBackend::Fcm);
        assert_eq!(toml.push.project_id.as_deref(), Some("demo"));
        assert!(toml.progress.enabled);
        assert_eq!(toml.catalog, default_catalog());
    }

    #[test]
    fn test_parse_custom_catalog_replaces_default() {
        let toml = GarageToml::parse(
            r#"
            [[catalog]]
            type = "Wipers"
            duration_minutes = 10
            price = 15000
            "#,
        )
        .unwrap();
        assert_eq!(toml.catalog, vec![CatalogEntry::new("Wipers", 10, 15_000)]);
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let err = GarageToml::parse("[push]\nbackend = \"pigeon\"\n").unwrap_err();
        assert!(err.to_string().contains("garage.toml"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = GarageToml::default();
        toml.server.port = 9191;
        toml.logging.format = LogFormat::Json;
        toml.save(&path).unwrap();

        let loaded = GarageToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9191);
        assert_eq!(loaded.logging.format, LogFormat::Json);
        assert_eq!(loaded.catalog, toml.catalog);
    }

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(GarageToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut toml = GarageToml::default();
        toml.progress.tick_secs = 0;
        toml.logging.level = "loud".into();
        toml.push.backend = PushBackend::Fcm;
        toml.catalog.push(CatalogEntry::new("brakes", 0, -1));

        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("tick_secs")));
        assert!(warnings.iter().any(|w| w.contains("logging.level")));
        assert!(warnings.iter().any(|w| w.contains("project_id or endpoint")));
        assert!(warnings.iter().any(|w| w.contains("Duplicate catalog type")));
        assert!(warnings.iter().any(|w| w.contains("zero duration")));
        assert!(warnings.iter().any(|w| w.contains("negative price")));
    }

    #[test]
    fn test_env_token_overrides_file() {
        let push = PushConfig {
            access_token: Some("from-file".into()),
            ..PushConfig::default()
        };
        assert_eq!(
            push.resolve_access_token(Some("from-env".into())).as_deref(),
            Some("from-env")
        );
        assert_eq!(push.resolve_access_token(None).as_deref(), Some("from-file"));
        assert_eq!(
            push.resolve_access_token(Some("  ".into())).as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempdir().unwrap();
        GarageToml::parse("[server]\nport = 9000\nhost = \"0.0.0.0\"\n")
            .unwrap()
            .save(&dir.path().join(CONFIG_FILE))
            .unwrap();

        let config = GarageConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.host(), "0.0.0.0");
        assert!(!config.dev_mode());

        let config =
            GarageConfig::with_cli_args(dir.path().to_path_buf(), None, Some(7000), true).unwrap();
        assert_eq!(config.port(), 7000);
        assert_eq!(config.host(), "0.0.0.0");
        assert!(config.dev_mode());
        assert_eq!(config.db_path(), dir.path().join("garage.db"));
        assert_eq!(config.log_dir(), dir.path().join("logs"));
    }
}
