//! Error and issue types
//!
//! Two failure classes exist in this library. Precondition failures
//! ([`EnhanceError`]) abort the analysis of one query: without a parseable
//! statement and an identifiable output table there is nothing downstream to
//! attach lineage to. Everything else is a degraded-result condition carried
//! as an [`Issue`] on the result, so callers always see how complete the
//! answer is without losing the parts that resolved.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal error for a single query analysis
#[derive(Debug, Error, Diagnostic)]
pub enum EnhanceError {
    /// The statement could not be parsed at all
    #[error("failed to parse SQL query: {0}")]
    #[diagnostic(code(sqlvein::parse_error))]
    Parse(String),

    /// Upstream table identity could not be established
    #[error("failed to resolve tables in SQL query: {0}")]
    #[diagnostic(code(sqlvein::table_resolution))]
    TableResolution(String),

    /// The query writes to no identifiable table
    #[error("no output table found in the query; cannot establish lineage")]
    #[diagnostic(
        code(sqlvein::no_output_table),
        help("lineage requires an INSERT, UPDATE, DELETE, MERGE, CTAS, or SELECT INTO statement")
    )]
    NoOutputTable,
}

/// Issue severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Info,
}

/// Non-fatal condition recorded during analysis
///
/// Unresolved aliases, exhausted expansion depth, malformed intermediate
/// expressions and the like end up here; the surrounding result is still
/// produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}
