//! Procedure decomposition
//!
//! Splits a multi-statement procedure body into an ordered sequence of typed
//! nodes. The structural path parses the isolated body with the SQL parser;
//! when that digests nothing (pl/pgsql control flow, DECLARE sections), a
//! pattern-based splitter takes over. Decomposition never fails: in the worst
//! case the whole input becomes a single `unknown` node.

mod fallback;
pub mod orchestrator;
pub mod registry;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::dialect::SqlDialect;

pub use orchestrator::{NodeRecord, ProcedureLineageResult, ProcedureRun};
pub use registry::{TempTableEntry, TempTableRegistry};

/// Operation type of one procedure node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    ProcedureStart,
    CreateTempTable,
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    SelectInto,
    Unknown,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::ProcedureStart => "procedure-start",
            NodeKind::CreateTempTable => "create-temp-table",
            NodeKind::Insert => "insert",
            NodeKind::Update => "update",
            NodeKind::Delete => "delete",
            NodeKind::Merge => "merge",
            NodeKind::Truncate => "truncate",
            NodeKind::SelectInto => "select-into",
            NodeKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// One operation extracted from a procedure body.
///
/// `sequence` is strictly increasing and matches textual appearance order in
/// the source; it is the only ordering guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureNode {
    pub sequence: usize,
    pub kind: NodeKind,
    pub statement: String,
    pub created_temp_tables: Vec<String>,
    pub consumed_temp_tables: Vec<String>,
}

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\bCREATE\s+(?:OR\s+REPLACE\s+)?(?:FUNCTION|PROCEDURE)\s+([A-Za-z_][\w.]*)\s*\(([^)]*)\)",
    )
    .unwrap()
});
static DOLLAR_QUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[A-Za-z_]*\$").unwrap());
static BEGIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBEGIN\b").unwrap());
static END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bEND\b").unwrap());
static TEMP_TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bCREATE\s+(?:GLOBAL\s+|LOCAL\s+)?TEMP(?:ORARY)?\s+TABLE\s+([A-Za-z_][\w.]*)")
        .unwrap()
});

/// Decompose procedural SQL text into an ordered node sequence.
pub fn decompose(text: &str, dialect: &SqlDialect) -> Vec<ProcedureNode> {
    let mut nodes: Vec<ProcedureNode> = Vec::new();

    let body = match HEADER_RE.captures(text) {
        Some(header) => {
            let params = header.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            nodes.push(ProcedureNode {
                sequence: 0,
                kind: NodeKind::ProcedureStart,
                statement: fallback::normalize_statement(params),
                created_temp_tables: Vec::new(),
                consumed_temp_tables: Vec::new(),
            });
            isolate_body(&text[header.get(0).unwrap().end()..])
        }
        None => text,
    };

    let mut operations = structural_split(body, dialect);
    if operations.is_empty() {
        debug!("structural parse yielded no statements; using pattern fallback");
        operations = fallback::split_by_patterns(body);
    }
    if operations.is_empty() {
        // Decomposition must never fail outright: wrap whatever is left as a
        // single unknown node.
        let remainder = if nodes.is_empty() { text } else { body };
        let remainder = fallback::normalize_statement(remainder);
        if !remainder.is_empty() || nodes.is_empty() {
            operations.push((NodeKind::Unknown, remainder));
        }
    }

    let offset = nodes.len();
    for (i, (kind, statement)) in operations.into_iter().enumerate() {
        nodes.push(ProcedureNode {
            sequence: offset + i,
            kind,
            statement,
            created_temp_tables: Vec::new(),
            consumed_temp_tables: Vec::new(),
        });
    }

    annotate_temp_tables(&mut nodes);
    nodes
}

/// The executable body: inside dollar quotes when present, then between the
/// outermost BEGIN/END pair when present.
fn isolate_body(text: &str) -> &str {
    let mut body = text;

    if let Some(open) = DOLLAR_QUOTE_RE.find(body) {
        let tag = open.as_str();
        let after_open = &body[open.end()..];
        if let Some(close) = after_open.find(tag) {
            body = &after_open[..close];
        }
    }

    if let Some(begin) = BEGIN_RE.find(body) {
        let after_begin = &body[begin.end()..];
        let last_end = END_RE.find_iter(after_begin).last();
        body = match last_end {
            Some(end) => &after_begin[..end.start()],
            None => after_begin,
        };
    }

    body
}

/// Structural path: parse the body as a statement sequence.
fn structural_split(body: &str, dialect: &SqlDialect) -> Vec<(NodeKind, String)> {
    let parser_dialect = dialect.parser_dialect();
    match Parser::parse_sql(parser_dialect.as_ref(), body) {
        Ok(statements) => statements
            .iter()
            .map(|stmt| (classify_statement(stmt), stmt.to_string()))
            .collect(),
        Err(e) => {
            debug!(error = %e, "procedure body failed structural parsing");
            Vec::new()
        }
    }
}

fn classify_statement(stmt: &Statement) -> NodeKind {
    match stmt {
        Statement::CreateTable(create) if create.temporary => NodeKind::CreateTempTable,
        Statement::Insert(_) => NodeKind::Insert,
        Statement::Update { .. } => NodeKind::Update,
        Statement::Delete(_) => NodeKind::Delete,
        Statement::Merge { .. } => NodeKind::Merge,
        Statement::Truncate { .. } => NodeKind::Truncate,
        Statement::Query(query) if crate::lineage::select_into_target(query).is_some() => {
            NodeKind::SelectInto
        }
        _ => NodeKind::Unknown,
    }
}

/// Fill in created/consumed temp-table sets from statement texts.
fn annotate_temp_tables(nodes: &mut [ProcedureNode]) {
    let mut created: Vec<(usize, String)> = Vec::new();

    for node in nodes.iter_mut() {
        if node.kind == NodeKind::CreateTempTable {
            if let Some(caps) = TEMP_TABLE_NAME_RE.captures(&node.statement) {
                let name = caps[1].to_lowercase();
                node.created_temp_tables.push(name.clone());
                created.push((node.sequence, name));
            }
        }
    }

    for node in nodes.iter_mut() {
        for (creation_seq, name) in &created {
            if node.sequence <= *creation_seq {
                continue;
            }
            if node.created_temp_tables.contains(name) {
                // Re-creation replaces the table; it does not read it.
                continue;
            }
            let word = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).unwrap();
            if word.is_match(&node.statement) && !node.consumed_temp_tables.contains(name) {
                node.consumed_temp_tables.push(name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(nodes: &[ProcedureNode]) -> Vec<NodeKind> {
        nodes.iter().map(|n| n.kind).collect()
    }

    #[test]
    fn test_plain_script_uses_structural_path() {
        let nodes = decompose(
            "TRUNCATE x; CREATE TEMP TABLE t AS SELECT a, b FROM y; INSERT INTO z SELECT t.a FROM t;",
            &SqlDialect::PostgreSQL,
        );

        assert_eq!(
            kinds(&nodes),
            vec![NodeKind::Truncate, NodeKind::CreateTempTable, NodeKind::Insert]
        );
        let sequences: Vec<usize> = nodes.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);

        assert_eq!(nodes[1].created_temp_tables, vec!["t"]);
        assert_eq!(nodes[2].consumed_temp_tables, vec!["t"]);
    }

    #[test]
    fn test_plpgsql_function_uses_fallback() {
        let proc = r#"
            CREATE OR REPLACE FUNCTION calculate_scores()
            RETURNS INTEGER AS $$
            DECLARE
                processed_count INTEGER;
            BEGIN
                -- Clear existing scores
                TRUNCATE TABLE analytics_scores;

                CREATE TEMP TABLE tmp_metrics AS
                SELECT customer_id, COUNT(order_id) AS order_count
                FROM raw_orders
                GROUP BY customer_id;

                INSERT INTO analytics_scores (customer_id, order_count)
                SELECT customer_id, order_count FROM tmp_metrics;

                GET DIAGNOSTICS processed_count = ROW_COUNT;
                RETURN processed_count;
            END;
            $$ LANGUAGE plpgsql;
        "#;

        let nodes = decompose(proc, &SqlDialect::PostgreSQL);
        assert_eq!(
            kinds(&nodes),
            vec![
                NodeKind::ProcedureStart,
                NodeKind::Truncate,
                NodeKind::CreateTempTable,
                NodeKind::Insert,
            ]
        );

        // Order matches textual appearance; sequence is strictly increasing.
        for pair in nodes.windows(2) {
            assert!(pair[0].sequence < pair[1].sequence);
        }
        assert_eq!(nodes[2].created_temp_tables, vec!["tmp_metrics"]);
        assert_eq!(nodes[3].consumed_temp_tables, vec!["tmp_metrics"]);
    }

    #[test]
    fn test_procedure_start_carries_parameters() {
        let nodes = decompose(
            "CREATE FUNCTION refresh(run_date DATE, full_refresh BOOLEAN) RETURNS VOID AS $$ \
             BEGIN TRUNCATE t; END; $$ LANGUAGE plpgsql;",
            &SqlDialect::PostgreSQL,
        );
        assert_eq!(nodes[0].kind, NodeKind::ProcedureStart);
        assert_eq!(nodes[0].statement, "run_date DATE, full_refresh BOOLEAN");
    }

    #[test]
    fn test_unparseable_body_yields_single_unknown_node() {
        let nodes = decompose("this is not sql at all", &SqlDialect::PostgreSQL);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, NodeKind::Unknown);
        assert_eq!(nodes[0].statement, "this is not sql at all");
    }

    #[test]
    fn test_select_into_classification() {
        let nodes = decompose(
            "SELECT a, b INTO summary FROM details;",
            &SqlDialect::PostgreSQL,
        );
        assert_eq!(kinds(&nodes), vec![NodeKind::SelectInto]);
    }

    #[test]
    fn test_temp_table_recreation_both_recorded() {
        let nodes = decompose(
            "CREATE TEMP TABLE t AS SELECT a FROM x; \
             CREATE TEMP TABLE t AS SELECT b FROM y; \
             INSERT INTO z SELECT t.b FROM t;",
            &SqlDialect::PostgreSQL,
        );
        assert_eq!(nodes[0].created_temp_tables, vec!["t"]);
        assert_eq!(nodes[1].created_temp_tables, vec!["t"]);
        assert_eq!(nodes[2].consumed_temp_tables, vec!["t"]);
    }
}
