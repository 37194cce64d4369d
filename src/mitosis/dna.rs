//! DNA extraction primitives (§4.6 Safety): char-boundary-safe
//! substring extraction and the per-line set-containment de-duplication
//! used to build a handoff delta.
//!
//! Grounded on `enterprise::collaboration::crdt`'s `HashSet`-backed
//! OR-Set membership tests, swapped for a `BTreeSet` here since the
//! spec asks for an *ordered*-set containment check.

use std::collections::BTreeSet;

/// Only lines longer than this are indexed for de-duplication; short
/// lines (blank separators, single words) pass through untouched so
/// that trimming noise doesn't collapse meaningful short updates.
const DEDUP_MIN_LINE_LEN: usize = 10;

/// Extract `text[start..end]` by character offset, clamping to valid
/// bounds and never panicking. An inverted or out-of-range request
/// yields an empty string rather than an error.
pub fn safe_sub(text: &str, start: usize, end: usize) -> String {
    if start >= end {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}

/// Leading slice of `text` sized `ratio * |text|` characters (at least
/// 0, never beyond `text`'s length).
pub fn leading_slice(text: &str, ratio: f64) -> String {
    let len = text.chars().count();
    let take = ((len as f64) * ratio).round() as usize;
    safe_sub(text, 0, take.min(len))
}

/// Remove every long line of `delta` that also appears, verbatim, as a
/// long line in `reference`. Short lines are always kept. Runs in
/// O((n+m) log n): one ordered-set build over `reference`'s lines, one
/// membership test per `delta` line.
pub fn dedup_lines(delta: &str, reference: &str) -> String {
    let indexed: BTreeSet<&str> = reference
        .lines()
        .filter(|line| line.len() > DEDUP_MIN_LINE_LEN)
        .collect();

    delta
        .lines()
        .filter(|line| line.len() <= DEDUP_MIN_LINE_LEN || !indexed.contains(line))
        .collect::<Vec<_>>()
        .join("\n")
}
