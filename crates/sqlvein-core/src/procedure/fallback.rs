//! Pattern-based statement splitting
//!
//! Used when structural parsing of a procedure body yields nothing, which is
//! the common case for pl/pgsql: control-flow statements, DECLARE sections,
//! and diagnostics assignments are not parseable SQL. The patterns only need
//! to recognize the data-moving statements; everything in between is noise.

use std::sync::LazyLock;

use regex::Regex;

use super::NodeKind;

static COMMENT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").unwrap());
static COMMENT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Statement-shape patterns, tried in this order; all matches from every
/// pattern are re-sorted by source offset afterwards.
static PATTERNS: LazyLock<Vec<(NodeKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            NodeKind::Truncate,
            Regex::new(r"(?i)\bTRUNCATE\s+(?:TABLE\s+)?[A-Za-z_][\w.]*").unwrap(),
        ),
        (
            NodeKind::CreateTempTable,
            Regex::new(
                r"(?is)\bCREATE\s+(?:GLOBAL\s+|LOCAL\s+)?TEMP(?:ORARY)?\s+TABLE\s+[A-Za-z_][\w.]*\s+AS\s+SELECT[^;]*",
            )
            .unwrap(),
        ),
        (
            NodeKind::Insert,
            Regex::new(r"(?is)\bINSERT\s+INTO\s+[A-Za-z_][\w.]*[^;]*").unwrap(),
        ),
        (
            NodeKind::Update,
            Regex::new(r"(?is)\bUPDATE\s+[A-Za-z_][\w.]*\s+SET\b[^;]*").unwrap(),
        ),
        (
            NodeKind::Delete,
            Regex::new(r"(?is)\bDELETE\s+FROM\s+[A-Za-z_][\w.]*[^;]*").unwrap(),
        ),
        (
            NodeKind::Merge,
            Regex::new(r"(?is)\bMERGE\s+INTO\s+[A-Za-z_][\w.]*[^;]*").unwrap(),
        ),
    ]
});

/// Strip comments and collapse run-on whitespace.
pub(super) fn normalize_statement(text: &str) -> String {
    let text = COMMENT_BLOCK_RE.replace_all(text, " ");
    let text = COMMENT_LINE_RE.replace_all(&text, " ");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Split a body by statement-shape patterns.
///
/// Returns `(kind, normalized statement text)` in source order. Overlapping
/// matches keep the earliest-starting one.
pub(super) fn split_by_patterns(body: &str) -> Vec<(NodeKind, String)> {
    let mut matches: Vec<(usize, NodeKind, &str)> = Vec::new();

    for (kind, pattern) in PATTERNS.iter() {
        for found in pattern.find_iter(body) {
            matches.push((found.start(), *kind, found.as_str()));
        }
    }

    // Source order regardless of which pattern matched.
    matches.sort_by_key(|(start, _, _)| *start);

    let mut result = Vec::new();
    let mut last_end = 0usize;
    for (start, kind, text) in matches {
        if start < last_end {
            continue;
        }
        last_end = start + text.len();
        result.push((kind, normalize_statement(text)));
    }
    result
}
