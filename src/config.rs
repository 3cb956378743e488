//! qrserve runtime configuration handling

use crate::error::{Error, Result};
use crate::storage::DirectoryStore;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration structure persisted to disk or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QrserveConfig {
    /// HTTP listener configuration
    pub server: ServerOptions,
    /// Save directory configuration
    pub storage: StorageOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
}

impl QrserveConfig {
    /// Load configuration.
    ///
    /// Without an explicit path the built-in defaults are used as-is: no file
    /// is searched for and no environment variable is read. With a path, the
    /// file is parsed and `QRSERVE_*` variables are layered on top of it.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = explicit_path else {
            return Ok(Self::default());
        };

        let mut config = Self::from_file(path)?;
        tracing::info!("Using configuration file: {}", path.display());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse TOML {}: {e}", path.display()))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config format '{}', expected toml/yaml",
                other
            ))),
        }
    }

    /// Apply environment variable overrides after file/default loading.
    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.storage.apply_env_overrides();
        self.logging.apply_env_overrides();
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Bind address for the HTTP server
    pub bind_address: String,
    /// Bind port for the HTTP server
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ServerOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(addr) = env::var("QRSERVE_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Ok(port) = env::var("QRSERVE_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.port = parsed;
            }
        }
    }

    /// Socket address helper for binding servers
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Save directory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Directory saved images are written to. Defaults to `saved_qrcodes`
    /// next to the executable.
    pub save_dir: Option<PathBuf>,
}

impl StorageOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("QRSERVE_SAVE_DIR") {
            if dir.trim().is_empty() {
                self.save_dir = None;
            } else {
                self.save_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// The configured save directory, or the default next to the executable
    pub fn resolved_save_dir(&self) -> Result<PathBuf> {
        match &self.save_dir {
            Some(dir) => Ok(dir.clone()),
            None => DirectoryStore::default_dir(),
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default log level (overridable via `QRSERVE_LOG_LEVEL`)
    pub level: String,
    /// Optional log file path for teeing structured logs
    pub file: Option<PathBuf>,
    /// Force ANSI colors in stdout logging
    pub color: bool,
    /// Optional log rotation strategy applied to `file`
    pub rotation: Option<LogRotation>,
    /// Aggregate generation metrics, log them periodically and serve `/metrics`
    pub metrics: bool,
    /// Interval in seconds for emitting aggregated metrics when enabled
    pub metrics_interval_secs: u64,
    /// Output format for the `/metrics` route (`json` or `prometheus`)
    pub metrics_format: MetricsFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            color: true,
            rotation: None,
            metrics: false,
            metrics_interval_secs: 60,
            metrics_format: MetricsFormat::Json,
        }
    }
}

impl LoggingOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("QRSERVE_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(file) = env::var("QRSERVE_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Ok(color) = env::var("QRSERVE_LOG_COLOR") {
            if let Some(flag) = parse_flag(&color) {
                self.color = flag;
            }
        }
        if let Ok(rotation) = env::var("QRSERVE_LOG_ROTATION") {
            if let Some(parsed) = LogRotation::parse(&rotation) {
                self.rotation = Some(parsed);
            }
        }
        if let Ok(metrics) = env::var("QRSERVE_METRICS") {
            if let Some(flag) = parse_flag(&metrics) {
                self.metrics = flag;
            }
        }
        if let Ok(interval) = env::var("QRSERVE_METRICS_INTERVAL") {
            if let Ok(value) = interval.parse::<u64>() {
                self.metrics_interval_secs = value.max(5);
            }
        }
        if let Ok(format) = env::var("QRSERVE_METRICS_FORMAT") {
            if let Ok(parsed) = format.parse::<MetricsFormat>() {
                self.metrics_format = parsed;
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Supported log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl LogRotation {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }
}

/// Supported serialization formats for the metrics route
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricsFormat {
    /// Emit metrics as structured JSON
    Json,
    /// Emit metrics in Prometheus text exposition format
    Prometheus,
}

impl MetricsFormat {
    /// Parse a metrics format identifier (case-insensitive) from a string slice.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "prometheus" => Some(Self::Prometheus),
            _ => None,
        }
    }
}

impl FromStr for MetricsFormat {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            format!("Unsupported metrics format '{value}', expected 'json' or 'prometheus'")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QrserveConfig::default();
        assert_eq!(config.server.socket_address(), "127.0.0.1:5000");
        assert!(config.storage.save_dir.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.metrics);
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = QrserveConfig::load(None).unwrap();
        assert_eq!(config.server.socket_address(), "127.0.0.1:5000");
        assert!(config.storage.save_dir.is_none());
    }

    #[test]
    fn test_load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[server]\nport = 5050\n").unwrap();

        let config = QrserveConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 5050);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = QrserveConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_save_dir_is_next_to_executable() {
        let dir = StorageOptions::default().resolved_save_dir().unwrap();
        assert!(dir.ends_with("saved_qrcodes"));
        let exe = env::current_exe().unwrap();
        assert_eq!(dir.parent(), exe.parent());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrserve.toml");
        fs::write(
            &path,
            r#"
[server]
port = 8080

[storage]
save_dir = "/var/lib/qrserve"

[logging]
level = "debug"
rotation = "daily"
metrics = true
metrics_format = "prometheus"
"#,
        )
        .unwrap();

        let config = QrserveConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(
            config.storage.save_dir.as_deref(),
            Some(Path::new("/var/lib/qrserve"))
        );
        assert_eq!(config.logging.rotation, Some(LogRotation::Daily));
        assert_eq!(config.logging.metrics_format, MetricsFormat::Prometheus);
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrserve.yaml");
        fs::write(&path, "server:\n  bind_address: 0.0.0.0\n").unwrap();

        let config = QrserveConfig::from_file(&path).unwrap();
        assert_eq!(config.server.socket_address(), "0.0.0.0:5000");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrserve.ini");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            QrserveConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_metrics_format_parse() {
        assert_eq!("JSON".parse::<MetricsFormat>(), Ok(MetricsFormat::Json));
        assert!("xml".parse::<MetricsFormat>().is_err());
    }
}
