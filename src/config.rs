use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::preload::{is_valid_global_name, DEFAULT_GLOBAL_NAME};
use crate::projection::SegmentPolicy;
use crate::sync::DEFAULT_MAX_REQUESTS;

pub const DEFAULT_API_BASE_URI: &str = "https://sdk.split.io/api";
pub const DEFAULT_POLLING_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Poller configuration. Every field has a default, so a partial TOML
/// table deserializes cleanly. camelCase spellings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "pollingIntervalSeconds")]
    pub polling_interval_seconds: u64,
    #[serde(alias = "includeSegments")]
    pub include_segments: bool,
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "apiBaseUri")]
    pub api_base_uri: String,
    /// Upper bound on a single change feed request.
    #[serde(alias = "requestTimeoutSeconds")]
    pub request_timeout_seconds: u64,
    #[serde(alias = "maxSyncRequestsPerCycle")]
    pub max_sync_requests_per_cycle: usize,
    #[serde(alias = "segmentPolicy")]
    pub segment_policy: SegmentPolicy,
    #[serde(alias = "globalName")]
    pub global_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            polling_interval_seconds: DEFAULT_POLLING_INTERVAL_SECONDS,
            include_segments: false,
            api_key: None,
            api_base_uri: DEFAULT_API_BASE_URI.to_string(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            max_sync_requests_per_cycle: DEFAULT_MAX_REQUESTS,
            segment_policy: SegmentPolicy::default(),
            global_name: DEFAULT_GLOBAL_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_seconds == 0 {
            return Err(Error::Config(
                "polling_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(Error::Config(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.max_sync_requests_per_cycle == 0 {
            return Err(Error::Config(
                "max_sync_requests_per_cycle must be greater than zero".into(),
            ));
        }
        if !is_valid_global_name(&self.global_name) {
            return Err(Error::Config(format!(
                "global_name '{}' is not a valid identifier",
                self.global_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.polling_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.include_segments);
        assert_eq!(config.max_sync_requests_per_cycle, 100);
        assert_eq!(config.global_name, "__splitCachePreload");
        assert_eq!(config.segment_policy, SegmentPolicy::ReuseFull);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_with_aliases() {
        let config: Config = serde_json::from_str(
            r#"{"pollingIntervalSeconds": 30, "includeSegments": true, "apiKey": "abc",
                "segment_policy": "resolve_per_subset"}"#,
        )
        .unwrap();
        assert_eq!(config.polling_interval_seconds, 30);
        assert!(config.include_segments);
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.segment_policy, SegmentPolicy::ResolvePerSubset);
        assert_eq!(config.api_base_uri, DEFAULT_API_BASE_URI);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            polling_interval_seconds: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            max_sync_requests_per_cycle: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            request_timeout_seconds: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            global_name: "window.x = 1; //".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
