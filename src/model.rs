use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status value marking a split as permanently removed.
pub const ARCHIVED: &str = "ARCHIVED";

/// Matcher type that references a segment by name.
pub const IN_SEGMENT: &str = "IN_SEGMENT";

/// A split (feature flag) definition as returned by the change feed.
///
/// Only the fields the cache needs to reason about are typed. Everything
/// else is kept in `extra` so the definition serializes back with the same
/// content it arrived with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Split {
    pub fn new(name: &str) -> Self {
        Split {
            name: name.to_string(),
            status: None,
            conditions: None,
            extra: Map::new(),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status.as_deref() == Some(ARCHIVED)
    }

    /// Names of every segment referenced by an `IN_SEGMENT` matcher in this
    /// split's targeting rules.
    pub fn segment_names(&self) -> BTreeSet<&str> {
        self.conditions
            .iter()
            .flatten()
            .filter_map(|c| c.matcher_group.as_ref())
            .flat_map(|g| g.matchers.iter())
            .filter_map(Matcher::segment_name)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(
        rename = "matcherGroup",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub matcher_group: Option<MatcherGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherGroup {
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    #[serde(
        rename = "matcherType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub matcher_type: Option<String>,
    #[serde(
        rename = "userDefinedSegmentMatcherData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub segment_data: Option<SegmentMatcherData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Matcher {
    /// Returns the referenced segment name for `IN_SEGMENT` matchers.
    pub fn segment_name(&self) -> Option<&str> {
        if self.matcher_type.as_deref() != Some(IN_SEGMENT) {
            return None;
        }
        self.segment_data.as_ref().map(|d| d.segment_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMatcherData {
    #[serde(rename = "segmentName")]
    pub segment_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A page fetched from a change feed. Every page reports the cursor the
/// next request should start from.
pub trait ChangePage {
    fn till(&self) -> i64;
}

/// One page of the split feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitChangesPage {
    #[serde(default)]
    pub splits: Vec<Split>,
    #[serde(default)]
    pub since: i64,
    pub till: i64,
}

impl ChangePage for SplitChangesPage {
    fn till(&self) -> i64 {
        self.till
    }
}

/// One page of a single segment's membership feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChangesPage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub since: i64,
    pub till: i64,
}

impl ChangePage for SegmentChangesPage {
    fn till(&self) -> i64 {
        self.till
    }
}

/// Folded membership of one segment. `added` is sorted and duplicate free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub added: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_keeps_unknown_fields() {
        let raw = json!({
            "name": "checkout",
            "status": "ACTIVE",
            "trafficTypeName": "user",
            "defaultTreatment": "off",
        });
        let split: Split = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(split.name, "checkout");
        assert!(!split.is_archived());
        assert_eq!(serde_json::to_value(&split).unwrap(), raw);
    }

    #[test]
    fn test_archived_status() {
        let split: Split =
            serde_json::from_value(json!({"name": "old", "status": "ARCHIVED"})).unwrap();
        assert!(split.is_archived());
        assert!(!Split::new("fresh").is_archived());
    }

    #[test]
    fn test_segment_names_only_from_in_segment_matchers() {
        let split: Split = serde_json::from_value(json!({
            "name": "beta",
            "status": "ACTIVE",
            "conditions": [
                {"matcherGroup": {"combiner": "AND", "matchers": [
                    {"matcherType": "IN_SEGMENT",
                     "userDefinedSegmentMatcherData": {"segmentName": "employees"}},
                    {"matcherType": "ALL_KEYS"}
                ]}},
                {"matcherGroup": {"matchers": [
                    {"matcherType": "IN_SEGMENT",
                     "userDefinedSegmentMatcherData": {"segmentName": "qa"}},
                    {"matcherType": "IN_SEGMENT",
                     "userDefinedSegmentMatcherData": {"segmentName": "employees"}},
                    {"matcherType": "WHITELIST",
                     "userDefinedSegmentMatcherData": {"segmentName": "ignored"}}
                ]}},
                {"label": "no matcher group"}
            ]
        }))
        .unwrap();
        let names: Vec<&str> = split.segment_names().into_iter().collect();
        assert_eq!(names, vec!["employees", "qa"]);
    }

    #[test]
    fn test_split_without_conditions_has_no_segments() {
        assert!(Split::new("plain").segment_names().is_empty());
    }

    #[test]
    fn test_pages_default_missing_lists() {
        let page: SegmentChangesPage =
            serde_json::from_value(json!({"name": "foo", "since": 3, "till": 3})).unwrap();
        assert!(page.added.is_empty());
        assert!(page.removed.is_empty());
        assert_eq!(page.till(), 3);

        let page: SplitChangesPage = serde_json::from_value(json!({"till": 7})).unwrap();
        assert!(page.splits.is_empty());
        assert_eq!(page.since, 0);
    }

    #[test]
    fn test_page_without_till_is_rejected() {
        let res: Result<SplitChangesPage, _> = serde_json::from_value(json!({"splits": []}));
        assert!(res.is_err());
    }
}
