use std::sync::Arc;

use crate::client::ChangeFeedClient;
use crate::config::Config;
use crate::error::Result;
use crate::poller::{PollError, Poller, Update};
use crate::projection::SegmentPolicy;

type ErrorHook = Box<dyn Fn(&PollError) + Send + Sync + 'static>;
type UpdateHook = Box<dyn Fn(&Update) + Send + Sync + 'static>;

pub struct PollerBuilder {
    config: Config,
    client: Option<Arc<dyn ChangeFeedClient>>,
    on_error: Vec<ErrorHook>,
    on_updated: Vec<UpdateHook>,
}

pub fn create_builder() -> PollerBuilder {
    PollerBuilder {
        config: Config::default(),
        client: None,
        on_error: Vec::new(),
        on_updated: Vec::new(),
    }
}

impl PollerBuilder {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.api_key = Some(key.to_string());
        self
    }

    pub fn api_base_uri(mut self, uri: &str) -> Self {
        self.config.api_base_uri = uri.to_string();
        self
    }

    pub fn polling_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.polling_interval_seconds = seconds;
        self
    }

    pub fn request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.request_timeout_seconds = seconds;
        self
    }

    pub fn include_segments(mut self, include: bool) -> Self {
        self.config.include_segments = include;
        self
    }

    pub fn max_sync_requests(mut self, max: usize) -> Self {
        self.config.max_sync_requests_per_cycle = max;
        self
    }

    pub fn segment_policy(mut self, policy: SegmentPolicy) -> Self {
        self.config.segment_policy = policy;
        self
    }

    pub fn global_name(mut self, name: &str) -> Self {
        self.config.global_name = name.to_string();
        self
    }

    /// Uses `client` instead of the HTTP client built from the API settings.
    pub fn client(mut self, client: Arc<dyn ChangeFeedClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&PollError) + Send + Sync + 'static) -> Self {
        self.on_error.push(Box::new(hook));
        self
    }

    pub fn on_updated(mut self, hook: impl Fn(&Update) + Send + Sync + 'static) -> Self {
        self.on_updated.push(Box::new(hook));
        self
    }

    /// Validates the configuration and builds the poller. The poller is
    /// idle until [`Poller::start`] is called.
    pub fn build(self) -> Result<Poller> {
        self.config.validate()?;
        let client = match self.client {
            Some(client) => client,
            None => default_client(&self.config)?,
        };

        let poller = Poller::new(client, self.config);
        for hook in self.on_error {
            poller.on_error(hook);
        }
        for hook in self.on_updated {
            poller.on_updated(hook);
        }
        Ok(poller)
    }
}

#[cfg(feature = "remote")]
fn default_client(config: &Config) -> Result<Arc<dyn ChangeFeedClient>> {
    Ok(Arc::new(crate::client::HttpChangeFeedClient::from_config(
        config,
    )?))
}

#[cfg(not(feature = "remote"))]
fn default_client(_config: &Config) -> Result<Arc<dyn ChangeFeedClient>> {
    Ok(Arc::new(crate::client::UnconfiguredClient))
}
