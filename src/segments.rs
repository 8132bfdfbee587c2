use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::client::{ChangeFeedClient, Feed};
use crate::error::Result;
use crate::model::{Segment, SegmentChangesPage, Split};
use crate::sync::sync_feed;

/// Folded segments keyed by name.
pub type Segments = BTreeMap<String, Segment>;

/// Segments referenced by a set of splits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentUsage {
    pub names: BTreeSet<String>,
    /// Number of splits referencing at least one segment.
    pub using_segments_count: usize,
}

/// Segment data resolved for some set of splits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentSync {
    pub segments: Segments,
    pub using_segments_count: usize,
}

/// Collects the segment names referenced by `IN_SEGMENT` matchers and
/// counts the splits that reference any. A split with several references
/// counts once.
pub fn segment_usage<'a, I>(splits: I) -> SegmentUsage
where
    I: IntoIterator<Item = &'a Split>,
{
    let mut usage = SegmentUsage::default();
    for split in splits {
        let names = split.segment_names();
        if names.is_empty() {
            continue;
        }
        usage.using_segments_count += 1;
        usage.names.extend(names.into_iter().map(String::from));
    }
    usage
}

/// Folds membership pages in order. Within a page additions are applied
/// before removals, so an id both added and removed ends up absent.
pub fn fold_segment_pages(name: &str, pages: &[SegmentChangesPage]) -> Segment {
    let mut members = BTreeSet::new();
    for page in pages {
        members.extend(page.added.iter().cloned());
        for id in &page.removed {
            members.remove(id);
        }
    }
    Segment {
        name: name.to_string(),
        added: members.into_iter().collect(),
    }
}

/// Syncs every named segment. The first failing feed aborts the whole run.
pub async fn sync_segments(
    client: &dyn ChangeFeedClient,
    names: &BTreeSet<String>,
    max_requests: usize,
) -> Result<Segments> {
    let mut segments = Segments::new();
    for name in names {
        let feed = Feed::Segment(name.clone());
        let outcome = sync_feed::<SegmentChangesPage>(client, &feed, max_requests).await?;
        let segment = fold_segment_pages(name, &outcome.pages);
        debug!(segment = %name, members = segment.added.len(), "segment synced");
        segments.insert(name.clone(), segment);
    }
    Ok(segments)
}

/// Discovers and syncs the segments used by `splits`, degrading to empty
/// segment data when any segment feed fails.
pub async fn sync_segments_or_empty<'a, I>(
    client: &dyn ChangeFeedClient,
    splits: I,
    max_requests: usize,
) -> SegmentSync
where
    I: IntoIterator<Item = &'a Split>,
{
    let usage = segment_usage(splits);
    match sync_segments(client, &usage.names, max_requests).await {
        Ok(segments) => SegmentSync {
            segments,
            using_segments_count: usage.using_segments_count,
        },
        Err(e) => {
            warn!(error = %e, "segment sync failed, using empty segment data");
            SegmentSync::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockFeedClient;
    use crate::sync::DEFAULT_MAX_REQUESTS;
    use serde_json::json;

    fn split_using(name: &str, segments: &[&str]) -> Split {
        let matchers: Vec<_> = segments
            .iter()
            .map(|s| {
                json!({"matcherType": "IN_SEGMENT",
                       "userDefinedSegmentMatcherData": {"segmentName": s}})
            })
            .collect();
        serde_json::from_value(json!({
            "name": name,
            "status": "ACTIVE",
            "conditions": [{"matcherGroup": {"matchers": matchers}}]
        }))
        .unwrap()
    }

    fn page(added: &[&str], removed: &[&str]) -> SegmentChangesPage {
        SegmentChangesPage {
            name: "foo".into(),
            added: added.iter().map(|s| s.to_string()).collect(),
            removed: removed.iter().map(|s| s.to_string()).collect(),
            since: 0,
            till: 0,
        }
    }

    #[test]
    fn test_usage_counts_each_split_once() {
        let splits = vec![
            split_using("a", &["employees", "qa"]),
            split_using("b", &["employees"]),
            Split::new("c"),
        ];
        let usage = segment_usage(&splits);
        assert_eq!(usage.using_segments_count, 2);
        assert_eq!(
            usage.names.into_iter().collect::<Vec<_>>(),
            vec!["employees".to_string(), "qa".to_string()]
        );
    }

    #[test]
    fn test_usage_of_no_splits_is_empty() {
        assert_eq!(segment_usage(&Vec::<Split>::new()), SegmentUsage::default());
    }

    #[test]
    fn test_fold_removal_in_later_page_wins() {
        let segment = fold_segment_pages("foo", &[page(&["x", "y"], &[]), page(&[], &["y"])]);
        assert_eq!(segment.name, "foo");
        assert_eq!(segment.added, vec!["x".to_string()]);
    }

    #[test]
    fn test_fold_readd_after_removal_is_present() {
        let segment = fold_segment_pages(
            "foo",
            &[page(&["x"], &[]), page(&[], &["x"]), page(&["x"], &[])],
        );
        assert_eq!(segment.added, vec!["x".to_string()]);
    }

    #[test]
    fn test_fold_removal_wins_within_page_and_dedups() {
        let segment = fold_segment_pages("foo", &[page(&["x", "y", "x"], &["y"])]);
        assert_eq!(segment.added, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_segments_folds_each_feed() {
        let client = MockFeedClient::new();
        let foo = Feed::Segment("foo".into());
        client.set_page(foo.clone(), -1, json!({"name": "foo", "added": ["x", "y"], "till": 1}));
        client.set_page(foo.clone(), 1, json!({"name": "foo", "removed": ["y"], "since": 1, "till": 2}));

        let names: BTreeSet<String> = ["foo".to_string(), "bar".to_string()].into();
        let segments = sync_segments(&client, &names, DEFAULT_MAX_REQUESTS)
            .await
            .unwrap();
        assert_eq!(segments["foo"].added, vec!["x".to_string()]);
        assert!(segments["bar"].added.is_empty());
    }

    #[tokio::test]
    async fn test_failed_segment_degrades_to_empty() {
        let client = MockFeedClient::new();
        client.set_page(
            Feed::Segment("employees".into()),
            -1,
            json!({"added": ["u1"], "till": 1}),
        );
        client.set_failure(Feed::Segment("qa".into()), Some(502));

        let splits = vec![split_using("a", &["employees", "qa"])];
        let result = sync_segments_or_empty(&client, &splits, DEFAULT_MAX_REQUESTS).await;
        assert_eq!(result, SegmentSync::default());
        assert_eq!(result.using_segments_count, 0);
    }

    #[tokio::test]
    async fn test_subset_sync_only_touches_referenced_segments() {
        let client = MockFeedClient::new();
        let splits = vec![split_using("a", &["employees"])];
        let result = sync_segments_or_empty(&client, &splits, DEFAULT_MAX_REQUESTS).await;
        assert_eq!(result.using_segments_count, 1);
        assert!(result.segments.contains_key("employees"));
        assert_eq!(client.calls(), vec![(Feed::Segment("employees".into()), -1)]);
    }
}
