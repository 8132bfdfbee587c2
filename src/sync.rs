//! Cursor-driven incremental synchronization against a single change feed.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::client::{ChangeFeedClient, Feed};
use crate::error::{Error, Result};
use crate::model::ChangePage;

/// Cursor sent on the first request to a feed.
pub const FIRST_REQUEST: i64 = -1;

/// Default bound on page requests per feed per cycle.
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// Pages accumulated by [`sync_feed`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome<P> {
    /// Pages in cursor order. The converging page is never included.
    pub pages: Vec<P>,
    /// `till` of the last accumulated page, or [`FIRST_REQUEST`] if none.
    pub final_cursor: i64,
    /// `false` when `max_requests` ran out before the feed converged. The
    /// pages are still usable, just possibly incomplete.
    pub converged: bool,
}

/// Fetches pages from `feed` starting at [`FIRST_REQUEST`], advancing the
/// cursor until a page reports `till == since` or `max_requests` pages have
/// been accumulated.
///
/// Transport and decode failures abort the sync and are returned as is.
pub async fn sync_feed<P>(
    client: &dyn ChangeFeedClient,
    feed: &Feed,
    max_requests: usize,
) -> Result<SyncOutcome<P>>
where
    P: ChangePage + DeserializeOwned + Send,
{
    let mut cursor = FIRST_REQUEST;
    let mut pages = Vec::new();

    while pages.len() < max_requests {
        let body = client.fetch_page(feed, cursor).await?;
        let page: P =
            serde_json::from_value(body).map_err(|e| Error::Decode(format!("{}: {}", feed, e)))?;
        let till = page.till();
        debug!(%feed, since = cursor, till, "received change page");

        if till == cursor {
            return Ok(SyncOutcome {
                pages,
                final_cursor: cursor,
                converged: true,
            });
        }

        pages.push(page);
        cursor = till;
    }

    warn!(
        %feed,
        requests = max_requests,
        cursor,
        "request limit reached before change feed converged"
    );
    Ok(SyncOutcome {
        pages,
        final_cursor: cursor,
        converged: false,
    })
}
