use std::collections::BTreeMap;

use tracing::debug;

use crate::client::{ChangeFeedClient, Feed};
use crate::error::Result;
use crate::model::{Split, SplitChangesPage};
use crate::sync::sync_feed;

/// Current split definitions keyed by name.
pub type Splits = BTreeMap<String, Split>;

/// Result of one split feed sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSync {
    pub splits: Splits,
    pub since: i64,
    pub converged: bool,
}

/// Applies split pages to `splits` in arrival order.
///
/// Archived records delete the entry (missing entries are fine), any other
/// record replaces the entry whole. The last record seen for a name wins.
pub fn apply_split_pages<I>(splits: &mut Splits, pages: I)
where
    I: IntoIterator<Item = SplitChangesPage>,
{
    for page in pages {
        for split in page.splits {
            if split.is_archived() {
                if splits.remove(&split.name).is_some() {
                    debug!(split = %split.name, "split archived");
                }
            } else {
                splits.insert(split.name.clone(), split);
            }
        }
    }
}

/// Runs the split feed and folds the result over `previous`.
pub async fn sync_splits(
    client: &dyn ChangeFeedClient,
    previous: &Splits,
    max_requests: usize,
) -> Result<SplitSync> {
    let outcome = sync_feed::<SplitChangesPage>(client, &Feed::Splits, max_requests).await?;
    let mut splits = previous.clone();
    apply_split_pages(&mut splits, outcome.pages);
    Ok(SplitSync {
        splits,
        since: outcome.final_cursor,
        converged: outcome.converged,
    })
}
