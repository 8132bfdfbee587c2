//! Serialized views of the cache, whole or restricted to a subset of
//! splits.
//!
//! Every split and segment is encoded to its own JSON string before being
//! placed in the projection, so the client can parse entries lazily. A
//! projection only carries the fields whose cache counterpart has been
//! populated: an unsynced cache projects to `{}`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Cache;
use crate::error::Result;
use crate::segments::SegmentSync;

/// Joins sorted split names into a subset key.
pub const SUBSET_SEPARATOR: &str = ".";

/// Which segment data a subset projection embeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// Embed the segments synced for the full cache.
    #[default]
    ReuseFull,
    /// Discover and sync only the segments the subset's splits reference.
    ResolvePerSubset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(rename = "flagsData", skip_serializing_if = "Option::is_none")]
    pub flags_data: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(rename = "segmentsData", skip_serializing_if = "Option::is_none")]
    pub segments_data: Option<BTreeMap<String, String>>,
    #[serde(rename = "usingSegmentsCount", skip_serializing_if = "Option::is_none")]
    pub using_segments_count: Option<usize>,
}

impl Projection {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Sorted, deduplicated split names.
pub fn canonical_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Order-independent key for a subset of split names.
///
/// Names containing the separator can collide: `["a.b"]` and `["a", "b"]`
/// share the key `a.b`. Keep the [`canonical_names`] alongside the key and
/// compare them before trusting a cached entry.
pub fn subset_key<S: AsRef<str>>(names: &[S]) -> String {
    canonical_names(names).join(SUBSET_SEPARATOR)
}

/// Encodes a value as an entry string. Strings are taken as already
/// encoded and returned unchanged.
pub fn encode_entry(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn encode_entries<'a, T, I>(entries: I) -> Result<BTreeMap<String, String>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = (&'a String, &'a T)>,
{
    entries
        .into_iter()
        .map(|(name, entry)| Ok((name.clone(), encode_entry(&serde_json::to_value(entry)?)?)))
        .collect()
}

/// Projects the cache. An empty `subset` selects every split; segment data
/// is always the full cached set.
pub fn project(cache: &Cache, subset: &[String]) -> Result<Projection> {
    let segments_data = cache.segments.as_ref().map(encode_entries).transpose()?;
    Ok(Projection {
        flags_data: project_splits(cache, subset)?,
        since: cache.since,
        segments_data,
        using_segments_count: cache.using_segments_count,
    })
}

/// Like [`project`], but embeds `segments` in place of the cached segment
/// data.
pub fn project_with_segments(
    cache: &Cache,
    subset: &[String],
    segments: &SegmentSync,
) -> Result<Projection> {
    Ok(Projection {
        flags_data: project_splits(cache, subset)?,
        since: cache.since,
        segments_data: Some(encode_entries(&segments.segments)?),
        using_segments_count: Some(segments.using_segments_count),
    })
}

fn project_splits(cache: &Cache, subset: &[String]) -> Result<Option<BTreeMap<String, String>>> {
    let Some(splits) = cache.splits.as_ref() else {
        return Ok(None);
    };
    let data = if subset.is_empty() {
        encode_entries(splits)?
    } else {
        encode_entries(splits.iter().filter(|(name, _)| subset.contains(*name)))?
    };
    Ok(Some(data))
}
