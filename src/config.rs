//! Process-wide configuration, loaded once from TOML with environment
//! variable overrides.
//!
//! Loaded lazily behind a `OnceLock`-backed `config()` accessor and memoized
//! for the life of the process; every field is `#[serde(default)]` so a
//! partial or missing config file never fails to parse.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
    pub oauth: OAuthOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub custom_models_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8787,
            custom_models_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub total_non_streaming_secs: u64,
    pub total_streaming_secs: u64,
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            total_non_streaming_secs: 300,
            total_streaming_secs: 3600,
            idle_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
    pub fn total_non_streaming(&self) -> Duration {
        Duration::from_secs(self.total_non_streaming_secs)
    }
    pub fn total_streaming(&self) -> Duration {
        Duration::from_secs(self.total_streaming_secs)
    }
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Non-standard, operator-controlled overrides for values otherwise trusted
/// to the upstream's own response (e.g. long-lived token lifetime).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OAuthOverrides {
    pub client_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
            oauth: OAuthOverrides::default(),
        }
    }
}

impl Config {
    fn load() -> Self {
        let path = config_path();
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                crate::logging::error(&format!(
                    "Failed to parse config at {}: {}; using defaults",
                    path.display(),
                    e
                ));
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_CUSTOM_MODELS") {
            self.server.custom_models_path = Some(v);
        }
        if let Ok(v) = std::env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    pub fn custom_models_path(&self) -> Option<&Path> {
        self.server.custom_models_path.as_deref().map(Path::new)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn gateway_dir() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("GATEWAY_HOME") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
    Ok(home.join(".max-gateway"))
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
        return PathBuf::from(path);
    }
    gateway_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.toml")
}

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::load)
}
