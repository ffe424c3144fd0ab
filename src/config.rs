//! TOML configuration for linkspeed.
//!
//! Layered lookup: an explicit `--config` path, the `LINKSPEED_CONFIG`
//! environment variable, `./linkspeed.toml`, then compiled-in defaults.
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::selection::UnreachablePolicy;
use crate::throughput::TransferConfig;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "LINKSPEED_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "linkspeed.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub selection: SelectionConfig,
    pub download: TransferSettings,
    pub upload: TransferSettings,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration. An explicit path must load; the
    /// environment and working-directory files fall through on error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LINKSPEED_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Effective download session configuration.
    pub fn download_config(&self) -> TransferConfig {
        self.download.resolve(TransferConfig::download_defaults())
    }

    /// Effective upload session configuration.
    pub fn upload_config(&self) -> TransferConfig {
        self.upload.resolve(TransferConfig::upload_defaults())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Where candidate servers come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// JSON server-list endpoint.
    pub servers_url: String,
    /// JSON geolocation endpoint for the client's IP, ISP and position.
    /// An empty string disables the lookup.
    pub client_url: String,
    /// Maximum number of servers requested from the list endpoint.
    pub limit: u32,
    /// Server ids never to use.
    pub ignore_ids: Vec<String>,
    /// Fixed server list. When non-empty the HTTP directory is not used.
    pub servers: Vec<StaticServer>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            servers_url: "https://www.speedtest.net/api/js/servers?engine=js".to_string(),
            client_url: "http://ip-api.com/json".to_string(),
            limit: 20,
            ignore_ids: Vec::new(),
            servers: Vec::new(),
        }
    }
}

/// A server entry declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticServer {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sponsor: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub distance_km: f64,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// How many of the closest servers get probed.
    pub candidates: usize,
    /// Probes per candidate.
    pub probes: u32,
    /// Treatment of unreachable probe samples.
    pub unreachable: UnreachablePolicy,
    /// Pick at random among this many closest servers (0 = probe instead).
    pub randomize: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            candidates: 5,
            probes: 3,
            unreachable: UnreachablePolicy::Disqualify,
            randomize: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Per-direction overrides. Unset keys keep the direction's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub workers: Option<usize>,
    pub sizes: Option<Vec<u64>>,
    pub length: Option<usize>,
    pub repeat: Option<u32>,
    pub timeout_secs: Option<u64>,
}

impl TransferSettings {
    pub fn resolve(&self, base: TransferConfig) -> TransferConfig {
        TransferConfig {
            workers: self.workers.unwrap_or(base.workers),
            sizes: self.sizes.clone().unwrap_or(base.sizes),
            length: self.length.unwrap_or(base.length),
            repeat: self.repeat.unwrap_or(base.repeat),
            timeout: self.timeout_secs.map(Duration::from_secs).or(base.timeout),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Whole-request deadline. Unset by default: large downloads on slow
    /// links legitimately take minutes.
    pub request_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: None,
            user_agent: concat!("linkspeed/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.selection.candidates, 5);
        assert_eq!(cfg.selection.probes, 3);
        assert_eq!(cfg.selection.unreachable, UnreachablePolicy::Disqualify);
        assert_eq!(cfg.selection.randomize, 0);

        let down = cfg.download_config();
        assert_eq!(down.workers, 4);
        assert_eq!(down.sizes, vec![31_625_365]);
        assert_eq!(down.repeat, 1);
        assert_eq!(down.timeout, None);

        let up = cfg.upload_config();
        assert_eq!(up.workers, 2);
        assert_eq!(up.length, 3);

        assert_eq!(cfg.http.connect_timeout_secs, 10);
        assert!(cfg.http.user_agent.starts_with("linkspeed/"));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert!(cfg.directory.servers.is_empty());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[directory]
limit = 50
ignore_ids = ["1234", "5678"]

[[directory.servers]]
id = "1"
url = "http://speed.example.net:8080/speedtest/upload.php"
name = "Krakow"
distance_km = 12.5

[selection]
candidates = 3
probes = 5
unreachable = "count_as_zero"

[download]
workers = 8
repeat = 2
timeout_secs = 30

[upload]
sizes = [100000, 200000]
length = 2

[logging]
level = "debug"
format = "json"
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.directory.limit, 50);
        assert_eq!(cfg.directory.ignore_ids, vec!["1234", "5678"]);
        assert_eq!(cfg.directory.servers.len(), 1);
        assert_eq!(cfg.directory.servers[0].distance_km, 12.5);
        assert_eq!(cfg.directory.servers[0].sponsor, "");
        assert_eq!(cfg.selection.candidates, 3);
        assert_eq!(cfg.selection.unreachable, UnreachablePolicy::CountAsZero);

        let down = cfg.download_config();
        assert_eq!(down.workers, 8);
        assert_eq!(down.repeat, 2);
        assert_eq!(down.timeout, Some(Duration::from_secs(30)));
        // Untouched keys keep the download defaults.
        assert_eq!(down.sizes, vec![31_625_365]);

        let up = cfg.upload_config();
        assert_eq!(up.workers, 2);
        assert_eq!(up.sizes, vec![100_000, 200_000]);
        assert_eq!(up.length, 2);

        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        let defaults = AppConfig::default();

        assert_eq!(cfg.directory.servers_url, defaults.directory.servers_url);
        assert_eq!(cfg.download_config(), defaults.download_config());
        assert_eq!(cfg.upload_config(), defaults.upload_config());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("linkspeed.toml");
        std::fs::write(
            &path,
            r#"
[selection]
randomize = 4
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.selection.randomize, 4);

        let explicit = AppConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(explicit.selection.randomize, 4);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = AppConfig::load_or_default(Some(Path::new("/nonexistent/linkspeed.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_policy_is_rejected() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[selection]\nunreachable = \"maybe\"\n");
        assert!(result.is_err());
    }
}
