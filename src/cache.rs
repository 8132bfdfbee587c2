use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::segments::{SegmentSync, Segments};
use crate::splits::{SplitSync, Splits};

/// A subset projection kept fresh by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsetProjection {
    /// Canonical (sorted, deduplicated) split names of the subset.
    pub names: Vec<String>,
    pub serialized: String,
}

/// In-memory state owned by the poller.
///
/// Each field stays `None` until the stream feeding it has synced at least
/// once, so projections can tell "never synced" apart from "empty".
#[derive(Debug, Clone, Default)]
pub struct Cache {
    pub splits: Option<Splits>,
    pub since: Option<i64>,
    pub segments: Option<Segments>,
    pub using_segments_count: Option<usize>,
    /// Serialized projection of every split.
    pub serialized: Option<String>,
    /// Serialized subset projections keyed by subset key.
    pub subsets: BTreeMap<String, SubsetProjection>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Counters describing the cache, for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub splits: usize,
    pub segments: usize,
    pub since: Option<i64>,
    pub using_segments_count: Option<usize>,
    pub subsets: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.splits.is_some()
    }

    pub fn apply_splits(&mut self, sync: SplitSync) {
        self.splits = Some(sync.splits);
        self.since = Some(sync.since);
        self.updated_at = Some(Utc::now());
    }

    pub fn apply_segments(&mut self, sync: SegmentSync) {
        self.segments = Some(sync.segments);
        self.using_segments_count = Some(sync.using_segments_count);
        self.updated_at = Some(Utc::now());
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            splits: self.splits.as_ref().map_or(0, |s| s.len()),
            segments: self.segments.as_ref().map_or(0, |s| s.len()),
            since: self.since,
            using_segments_count: self.using_segments_count,
            subsets: self.subsets.len(),
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, Split};

    #[test]
    fn test_new_cache_is_unsynced() {
        let cache = Cache::new();
        assert!(!cache.is_synced());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_apply_splits_and_segments() {
        let mut cache = Cache::new();
        let mut splits = Splits::new();
        splits.insert("A".into(), Split::new("A"));
        cache.apply_splits(SplitSync {
            splits,
            since: 12,
            converged: true,
        });
        assert!(cache.is_synced());
        assert!(cache.segments.is_none());

        let mut segments = Segments::new();
        segments.insert(
            "foo".into(),
            Segment {
                name: "foo".into(),
                added: vec!["x".into()],
            },
        );
        cache.apply_segments(SegmentSync {
            segments,
            using_segments_count: 1,
        });

        let stats = cache.stats();
        assert_eq!(stats.splits, 1);
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.since, Some(12));
        assert_eq!(stats.using_segments_count, Some(1));
        assert!(stats.updated_at.is_some());
    }
}
