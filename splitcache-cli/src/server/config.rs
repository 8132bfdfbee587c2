use std::env;

use serde::Deserialize;
use splitcache_lib::Config;
use tracing::warn;

/// Top-level splitcache.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct SplitcacheConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub split: Config,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hostname: default_hostname(),
        }
    }
}

impl SplitcacheConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path, error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `SPLITCACHE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("SPLITCACHE_API_KEY") {
            self.split.api_key = Some(val);
        }

        if let Some(val) = var("SPLITCACHE_API_BASE_URI") {
            self.split.api_base_uri = val;
        }

        if let Some(val) = var("SPLITCACHE_POLLING_INTERVAL_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => self.split.polling_interval_seconds = secs,
                Err(_) => warn!(value = %val, "ignoring invalid SPLITCACHE_POLLING_INTERVAL_SECONDS"),
            }
        }

        if let Some(val) = var("SPLITCACHE_REQUEST_TIMEOUT_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => self.split.request_timeout_seconds = secs,
                Err(_) => warn!(value = %val, "ignoring invalid SPLITCACHE_REQUEST_TIMEOUT_SECONDS"),
            }
        }

        if let Some(val) = var("SPLITCACHE_INCLUDE_SEGMENTS") {
            match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.split.include_segments = true,
                "0" | "false" | "no" => self.split.include_segments = false,
                other => warn!(value = %other, "ignoring invalid SPLITCACHE_INCLUDE_SEGMENTS"),
            }
        }

        if let Some(val) = var("SPLITCACHE_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }
    }
}
