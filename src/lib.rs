//! Locally cached, periodically refreshed snapshot of split (feature flag)
//! definitions and segment memberships, served as a preload script that a
//! client runtime can evaluate flags from without a network round trip.
//!
//! The [`Poller`] syncs the split and segment change feeds on a timer and
//! keeps serialized projections of the cache up to date. The
//! [`PreloadScriptBuilder`] wraps those projections in a `<script>` block.

use std::sync::Arc;

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod poller;
pub mod preload;
pub mod projection;
pub mod segments;
pub mod splits;
pub mod sync;

pub use cache::{Cache, CacheStats};
pub use client::{ChangeFeedClient, Feed, MockFeedClient, UnconfiguredClient};
#[cfg(feature = "remote")]
pub use client::HttpChangeFeedClient;
pub use config::Config;
pub use error::{Error, Result};
pub use model::{Segment, Split};
pub use poller::{PollError, Poller, Stream, Update};
pub use preload::{wrap_script, PreloadScriptBuilder, DEFAULT_GLOBAL_NAME};
pub use projection::{subset_key, Projection, SegmentPolicy};

/// Returns a builder for configuring a [`Poller`].
///
/// # Examples
/// ```no_run
/// # async fn run() -> splitcache_lib::Result<()> {
/// let poller = splitcache_lib::init()
///     .api_key("sdk-key")
///     .include_segments(true)
///     .on_error(|e| eprintln!("{}", e))
///     .build()?;
/// poller.start().await?;
///
/// let preload = splitcache_lib::PreloadScriptBuilder::new(poller.clone());
/// let script = preload.script(&["checkout-redesign"]).await?;
/// # let _ = script;
/// poller.stop();
/// # Ok(())
/// # }
/// ```
pub fn init() -> builder::PollerBuilder {
    builder::create_builder()
}

/// Builds a poller around an already constructed client.
pub fn with_client(client: Arc<dyn ChangeFeedClient>, config: Config) -> Result<Poller> {
    init().config(config).client(client).build()
}
