//! Cross-partition query detection.
//!
//! The store reports no structured "this query fanned out" flag, so the
//! free-text diagnostics returned with each page are scanned for markers.
//! This depends on provider wording and is only used for warning logs;
//! nothing may branch on it for correctness.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Explicit fan-out wording, e.g. "cross-partition query"
static CROSS_PARTITION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcross[-_ ]?partition\b").expect("valid regex"));

/// Physical range ids touched by the query, e.g. `"PartitionKeyRangeId":"3"`
static RANGE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?partitionKeyRangeId"?\s*[:=]\s*"?(\d+)"?"#).expect("valid regex")
});

/// Check whether page diagnostics suggest the query ran on more than one
/// partition range.
pub fn indicates_cross_partition(diagnostics: &str) -> bool {
    if diagnostics.is_empty() {
        return false;
    }

    if CROSS_PARTITION_MARKER.is_match(diagnostics) {
        return true;
    }

    let ranges: HashSet<&str> = RANGE_ID
        .captures_iter(diagnostics)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    ranges.len() > 1
}
