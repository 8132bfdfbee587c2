use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A change feed exposed by the flag-management service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Split definitions.
    Splits,
    /// Membership changes of the named segment.
    Segment(String),
}

impl Feed {
    /// Request path of this feed, relative to the API base URI.
    pub fn path(&self) -> String {
        match self {
            Feed::Splits => "splitChanges".to_string(),
            Feed::Segment(name) => format!("segmentChanges/{}", name),
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Fetches one page of changes from a feed.
///
/// `since` is the cursor returned by the previous page, or
/// [`FIRST_REQUEST`](crate::sync::FIRST_REQUEST) on the first call. The raw
/// page body is returned; decoding into a page type is left to the caller.
/// Implementations must not retry: a failure aborts that feed's sync for
/// the current cycle.
#[async_trait]
pub trait ChangeFeedClient: Send + Sync {
    async fn fetch_page(&self, feed: &Feed, since: i64) -> Result<Value>;
}

/// Placeholder client for a poller that was never given a real one.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredClient;

#[async_trait]
impl ChangeFeedClient for UnconfiguredClient {
    async fn fetch_page(&self, _feed: &Feed, _since: i64) -> Result<Value> {
        Err(Error::NotImplemented("fetch_page"))
    }
}

#[cfg(feature = "remote")]
pub use self::http::HttpChangeFeedClient;

#[cfg(feature = "remote")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tracing::debug;

    use super::{ChangeFeedClient, Feed};
    use crate::config::Config;
    use crate::error::{Error, Result};

    /// Connection setup never waits longer than this, nor longer than the
    /// request timeout.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Change feed client over HTTP, authenticated with the SDK API key.
    ///
    /// Every request is bounded by `timeout`, so a stalled connection
    /// surfaces as a transport error instead of holding up the poller.
    #[derive(Debug, Clone)]
    pub struct HttpChangeFeedClient {
        client: reqwest::Client,
        base_uri: String,
        api_key: String,
        timeout: Duration,
    }

    impl HttpChangeFeedClient {
        pub fn new(base_uri: &str, api_key: &str, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout.min(CONNECT_TIMEOUT))
                .build()
                .map_err(|e| Error::Config(format!("failed to build http client: {}", e)))?;
            Ok(HttpChangeFeedClient {
                client,
                base_uri: base_uri.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
                timeout,
            })
        }

        pub fn timeout(&self) -> Duration {
            self.timeout
        }

        /// Builds a client from `api_base_uri` and `api_key`. Fails when no
        /// API key is configured.
        pub fn from_config(config: &Config) -> Result<Self> {
            match config.api_key.as_deref() {
                Some(key) if !key.is_empty() => {
                    Self::new(&config.api_base_uri, key, config.request_timeout())
                }
                _ => Err(Error::Config("api_key is required".into())),
            }
        }

        pub(crate) fn feed_url(&self, feed: &Feed) -> String {
            format!("{}/{}", self.base_uri, feed.path())
        }
    }

    #[async_trait]
    impl ChangeFeedClient for HttpChangeFeedClient {
        async fn fetch_page(&self, feed: &Feed, since: i64) -> Result<Value> {
            let url = self.feed_url(feed);
            debug!(%url, since, "fetching change page");

            let response = self
                .client
                .get(&url)
                .query(&[("since", since)])
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| Error::transport(e.to_string(), e.status().map(|s| s.as_u16())))?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::transport(
                    format!("{} returned {}", feed, status),
                    Some(status.as_u16()),
                ));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| Error::Decode(format!("{}: {}", feed, e)))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_feed_url_trims_trailing_slash() {
            let client = HttpChangeFeedClient::new(
                "https://sdk.example.com/api/",
                "key",
                Duration::from_secs(5),
            )
            .unwrap();
            assert_eq!(
                client.feed_url(&Feed::Splits),
                "https://sdk.example.com/api/splitChanges"
            );
            assert_eq!(
                client.feed_url(&Feed::Segment("employees".into())),
                "https://sdk.example.com/api/segmentChanges/employees"
            );
        }

        #[test]
        fn test_from_config_requires_api_key() {
            let config = Config::default();
            assert!(matches!(
                HttpChangeFeedClient::from_config(&config),
                Err(Error::Config(_))
            ));

            let config = Config {
                api_key: Some("sdk-key".into()),
                ..Config::default()
            };
            assert!(HttpChangeFeedClient::from_config(&config).is_ok());
        }

        #[test]
        fn test_from_config_bounds_requests() {
            let config = Config {
                api_key: Some("sdk-key".into()),
                request_timeout_seconds: 7,
                ..Config::default()
            };
            let client = HttpChangeFeedClient::from_config(&config).unwrap();
            assert_eq!(client.timeout(), Duration::from_secs(7));

            let client = HttpChangeFeedClient::from_config(&Config {
                api_key: Some("sdk-key".into()),
                ..Config::default()
            })
            .unwrap();
            assert_eq!(client.timeout(), Duration::from_secs(30));
        }

        #[tokio::test]
        async fn test_stalled_server_becomes_transport_error() {
            // Accepts the connection but never answers.
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = tokio::spawn(async move {
                let (_socket, _) = listener.accept().await.unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
            });

            let client = HttpChangeFeedClient::new(
                &format!("http://{}", addr),
                "key",
                Duration::from_millis(200),
            )
            .unwrap();
            let err = client.fetch_page(&Feed::Splits, -1).await.unwrap_err();
            assert!(matches!(err, Error::Transport { status: None, .. }));
            server.abort();
        }
    }
}

/// In-memory client serving scripted pages, for tests and local runs.
///
/// Pages are keyed by feed and the `since` cursor they answer. A cursor
/// with no scripted page answers with an empty page whose `till` equals
/// `since`, i.e. the feed has converged.
#[derive(Debug, Default)]
pub struct MockFeedClient {
    pages: Mutex<HashMap<(Feed, i64), Value>>,
    failures: Mutex<HashMap<Feed, Option<u16>>>,
    calls: Mutex<Vec<(Feed, i64)>>,
}

impl MockFeedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the page returned for `feed` at cursor `since`.
    pub fn set_page(&self, feed: Feed, since: i64, page: Value) {
        self.pages.lock().insert((feed, since), page);
    }

    /// Makes every request to `feed` fail with a transport error.
    pub fn set_failure(&self, feed: Feed, status: Option<u16>) {
        self.failures.lock().insert(feed, status);
    }

    pub fn clear_failure(&self, feed: &Feed) {
        self.failures.lock().remove(feed);
    }

    /// Every request made so far, in order.
    pub fn calls(&self) -> Vec<(Feed, i64)> {
        self.calls.lock().clone()
    }

    /// Number of requests made to `feed`.
    pub fn call_count(&self, feed: &Feed) -> usize {
        self.calls.lock().iter().filter(|(f, _)| f == feed).count()
    }
}

#[async_trait]
impl ChangeFeedClient for MockFeedClient {
    async fn fetch_page(&self, feed: &Feed, since: i64) -> Result<Value> {
        self.calls.lock().push((feed.clone(), since));

        if let Some(status) = self.failures.lock().get(feed) {
            return Err(Error::transport(format!("{} unavailable", feed), *status));
        }

        if let Some(page) = self.pages.lock().get(&(feed.clone(), since)) {
            return Ok(page.clone());
        }

        Ok(match feed {
            Feed::Splits => json!({"splits": [], "since": since, "till": since}),
            Feed::Segment(name) => {
                json!({"name": name, "added": [], "removed": [], "since": since, "till": since})
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_paths() {
        assert_eq!(Feed::Splits.path(), "splitChanges");
        assert_eq!(Feed::Segment("beta".into()).path(), "segmentChanges/beta");
        assert_eq!(Feed::Segment("beta".into()).to_string(), "segmentChanges/beta");
    }

    #[tokio::test]
    async fn test_unconfigured_client_is_not_implemented() {
        let res = UnconfiguredClient.fetch_page(&Feed::Splits, -1).await;
        assert!(matches!(res, Err(Error::NotImplemented(_))));
        let res = UnconfiguredClient
            .fetch_page(&Feed::Segment("foo".into()), -1)
            .await;
        assert!(matches!(res, Err(Error::NotImplemented(_))));
    }

    #[tokio::test]
    async fn test_mock_client_converges_on_unscripted_cursor() {
        let client = MockFeedClient::new();
        let page = client.fetch_page(&Feed::Splits, 5).await.unwrap();
        assert_eq!(page["till"], 5);

        client.set_page(Feed::Splits, 5, json!({"splits": [], "till": 6}));
        let page = client.fetch_page(&Feed::Splits, 5).await.unwrap();
        assert_eq!(page["till"], 6);
        assert_eq!(client.call_count(&Feed::Splits), 2);
    }

    #[tokio::test]
    async fn test_mock_client_failure() {
        let client = MockFeedClient::new();
        let feed = Feed::Segment("foo".into());
        client.set_failure(feed.clone(), Some(500));
        let err = client.fetch_page(&feed, -1).await.unwrap_err();
        assert_eq!(err.status(), Some(500));

        client.clear_failure(&feed);
        assert!(client.fetch_page(&feed, -1).await.is_ok());
        assert_eq!(client.calls(), vec![(feed.clone(), -1), (feed, -1)]);
    }
}
