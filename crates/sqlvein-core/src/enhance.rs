//! Lineage enhancement pipeline
//!
//! Orchestrates the full flow for one statement: parse, lift scalar
//! subqueries into named definitions, resolve base lineage, extract
//! definitions, then per output column expand definition references and
//! resolve aliases so the recorded transformation shows the real calculation.
//! Emission to a [`LineageSink`] is a separate, final step.

use indexmap::IndexSet;
use serde::Serialize;
use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use tracing::debug;

use crate::aliases::{resolve_aliases, AliasBindings};
use crate::definitions::{extract_definitions, DefinitionCatalog};
use crate::dialect::SqlDialect;
use crate::error::{EnhanceError, Issue, Severity};
use crate::expand::{expand_expression, DEFAULT_MAX_DEPTH};
use crate::expr::parse_statement;
use crate::facts::{
    DatasetRef, FieldRef, FineGrainedLineageFact, LineageSink, QueryRecord, TableLineageFact,
};
use crate::lineage::{resolve_statement_lineage, LineageContext};
use crate::unnest::lift_scalar_subqueries;

/// Pipeline options.
///
/// The real-world variants of this pipeline (with/without definition
/// expansion, with/without alias resolution) are one option surface, not
/// separate code paths.
#[derive(Debug, Clone, Copy)]
pub struct EnhanceOptions {
    pub expand_definitions: bool,
    pub resolve_aliases: bool,
    pub max_depth: usize,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            expand_definitions: true,
            resolve_aliases: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One output column with its enhanced transformation expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnTransformation {
    pub downstream_column: String,
    pub upstreams: Vec<FieldRef>,
    /// `COPY: <expr>` or `SQL: <expr>`
    pub transform: Option<String>,
}

/// Enhanced lineage for one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedLineage {
    pub out_table: DatasetRef,
    pub in_tables: Vec<DatasetRef>,
    pub columns: Vec<ColumnTransformation>,
    pub query: QueryRecord,
    pub confidence: f64,
    pub issues: Vec<Issue>,
}

impl EnhancedLineage {
    /// Emit all facts to a sink: per upstream table the fine-grained facts
    /// then one coarse-grained fact, and the query record last.
    pub fn emit(&self, sink: &mut dyn LineageSink) -> std::io::Result<()> {
        for upstream in &self.in_tables {
            if *upstream == self.out_table {
                // Self-lineage carries no information.
                continue;
            }

            for column in &self.columns {
                let upstream_fields: Vec<FieldRef> = column
                    .upstreams
                    .iter()
                    .filter(|field| field.dataset == *upstream)
                    .cloned()
                    .collect();
                if upstream_fields.is_empty() {
                    continue;
                }

                sink.fine_grained(&FineGrainedLineageFact {
                    upstreams: upstream_fields,
                    downstream: FieldRef {
                        dataset: self.out_table.clone(),
                        column: column.downstream_column.clone(),
                    },
                    transform: column.transform.clone(),
                    query_fingerprint: self.query.fingerprint.clone(),
                    confidence: self.confidence,
                })?;
            }

            sink.table_lineage(&TableLineageFact {
                upstream: upstream.clone(),
                downstream: self.out_table.clone(),
                query_fingerprint: self.query.fingerprint.clone(),
            })?;
        }

        sink.query_record(&self.query)
    }
}

/// The lineage enhancement pipeline for one platform/dialect context.
#[derive(Debug, Clone)]
pub struct Enhancer {
    platform: String,
    dialect: SqlDialect,
    default_db: Option<String>,
    default_schema: Option<String>,
    options: EnhanceOptions,
}

impl Enhancer {
    pub fn new(platform: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            platform: platform.into(),
            dialect,
            default_db: None,
            default_schema: None,
            options: EnhanceOptions::default(),
        }
    }

    pub fn with_defaults(mut self, db: Option<&str>, schema: Option<&str>) -> Self {
        self.default_db = db.map(str::to_string);
        self.default_schema = schema.map(str::to_string);
        self
    }

    pub fn with_options(mut self, options: EnhanceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Enhance one statement.
    pub fn enhance(&self, sql: &str) -> Result<EnhancedLineage, EnhanceError> {
        self.enhance_with(sql, &DefinitionCatalog::new())
    }

    /// Enhance one statement with additional definitions in scope
    /// (temp tables registered by earlier procedure nodes).
    pub fn enhance_with(
        &self,
        sql: &str,
        extra: &DefinitionCatalog,
    ) -> Result<EnhancedLineage, EnhanceError> {
        let raw = parse_statement(sql, &self.dialect).map_err(EnhanceError::Parse)?;
        let (lifted, lifted_count) = lift_scalar_subqueries(raw.clone(), &self.dialect);
        if lifted_count > 0 {
            debug!(count = lifted_count, "using lifted statement for definition extraction");
        }

        let ctx = LineageContext {
            platform: &self.platform,
            default_db: self.default_db.as_deref(),
            default_schema: self.default_schema.as_deref(),
        };
        let base = resolve_statement_lineage(&lifted, &ctx)?;
        let out_table = base
            .out_tables
            .first()
            .cloned()
            .ok_or(EnhanceError::NoOutputTable)?;

        let mut definitions = if self.options.expand_definitions {
            extract_definitions(&lifted)
        } else {
            DefinitionCatalog::new()
        };
        // Statement-local definitions shadow cross-statement ones.
        for (name, def) in extra {
            definitions
                .entry(name.clone())
                .or_insert_with(|| def.clone());
        }

        let bindings = if self.options.resolve_aliases {
            self.alias_bindings(&raw, &base.in_tables)
        } else {
            AliasBindings::new()
        };

        let columns = base
            .columns
            .iter()
            .map(|col| {
                let transform = col.logic.as_ref().map(|logic| {
                    let mut text = logic.expression.clone();
                    if self.options.expand_definitions {
                        text = expand_expression(
                            &text,
                            &definitions,
                            &self.dialect,
                            self.options.max_depth,
                        );
                    }
                    // A reference that expanded into a calculation is no
                    // longer a plain copy; alias resolution alone keeps it one.
                    let is_copy = logic.is_direct_copy && text == logic.expression;
                    if self.options.resolve_aliases {
                        text = resolve_aliases(&text, &bindings, &self.dialect);
                    }
                    if is_copy {
                        format!("COPY: {}", text)
                    } else {
                        format!("SQL: {}", text)
                    }
                });

                ColumnTransformation {
                    downstream_column: col.downstream_column.clone(),
                    upstreams: col.upstreams.clone(),
                    transform,
                }
            })
            .collect::<Vec<_>>();

        let confidence = if base
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Warning)
        {
            0.9
        } else {
            1.0
        };

        let mut subjects: IndexSet<String> = IndexSet::new();
        subjects.insert(out_table.to_string());
        for table in &base.in_tables {
            if *table != out_table {
                subjects.insert(table.to_string());
            }
        }
        for column in &columns {
            subjects.insert(format!("{}.{}", out_table, column.downstream_column));
            for field in &column.upstreams {
                subjects.insert(field.to_string());
            }
        }

        Ok(EnhancedLineage {
            out_table,
            in_tables: base.in_tables,
            columns,
            query: QueryRecord::new(sql, subjects),
            confidence,
            issues: base.issues,
        })
    }

    /// Bind each literal table name in the raw statement to the upstream
    /// dataset whose canonical name contains it. First match wins.
    fn alias_bindings(&self, raw: &Statement, in_tables: &[DatasetRef]) -> AliasBindings {
        let mut bindings = AliasBindings::new();
        let mut references = Vec::new();
        collect_table_references(raw, &mut references);

        for (lookup, table_name) in references {
            if bindings.contains_key(&lookup) {
                continue;
            }
            let needle = table_name.to_lowercase();
            if let Some(dataset) = in_tables
                .iter()
                .find(|ds| ds.name.to_lowercase().contains(&needle))
            {
                bindings.insert(lookup, dataset.clone());
            }
        }
        bindings
    }
}

/// Collect `(alias-or-name, table-name)` pairs for every table reference.
fn collect_table_references(stmt: &Statement, out: &mut Vec<(String, String)>) {
    match stmt {
        Statement::Query(query) => walk_query_tables(query, out),
        Statement::Insert(insert) => {
            if let Some(source) = &insert.source {
                walk_query_tables(source, out);
            }
        }
        Statement::CreateTable(create) => {
            if let Some(query) = &create.query {
                walk_query_tables(query, out);
            }
        }
        Statement::Update { table, from, .. } => {
            walk_table_with_joins(table, out);
            if let Some(from_table) = from {
                walk_table_with_joins(from_table, out);
            }
        }
        Statement::Merge { table, source, .. } => {
            walk_table_factor(table, out);
            walk_table_factor(source, out);
        }
        _ => {}
    }
}

fn walk_query_tables(query: &Query, out: &mut Vec<(String, String)>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            walk_query_tables(&cte.query, out);
        }
    }
    walk_set_expr_tables(&query.body, out);
}

fn walk_set_expr_tables(set_expr: &SetExpr, out: &mut Vec<(String, String)>) {
    match set_expr {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                walk_table_with_joins(table_with_joins, out);
            }
            // Tables inside scalar subqueries bind aliases too.
            for item in &select.projection {
                match item {
                    sqlparser::ast::SelectItem::UnnamedExpr(expr)
                    | sqlparser::ast::SelectItem::ExprWithAlias { expr, .. } => {
                        walk_expr_tables(expr, out);
                    }
                    _ => {}
                }
            }
            if let Some(selection) = &select.selection {
                walk_expr_tables(selection, out);
            }
        }
        SetExpr::Query(query) => walk_query_tables(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr_tables(left, out);
            walk_set_expr_tables(right, out);
        }
        _ => {}
    }
}

fn walk_table_with_joins(table: &TableWithJoins, out: &mut Vec<(String, String)>) {
    walk_table_factor(&table.relation, out);
    for join in &table.joins {
        walk_table_factor(&join.relation, out);
    }
}

fn walk_expr_tables(expr: &sqlparser::ast::Expr, out: &mut Vec<(String, String)>) {
    use sqlparser::ast::Expr;
    match expr {
        Expr::Subquery(query) | Expr::InSubquery {
            subquery: query, ..
        } => walk_query_tables(query, out),
        Expr::Exists { subquery, .. } => walk_query_tables(subquery, out),
        _ => crate::expr::walk_children(expr, &mut |child| walk_expr_tables(child, out)),
    }
}

fn walk_table_factor(factor: &TableFactor, out: &mut Vec<(String, String)>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let Some(table_name) = name.0.last().map(|i| i.value.clone()) {
                let lookup = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table_name.clone());
                out.push((lookup, table_name));
            }
        }
        TableFactor::Derived { subquery, .. } => walk_query_tables(subquery, out),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => walk_table_with_joins(table_with_joins, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::RecordingSink;
    use pretty_assertions::assert_eq;

    fn enhancer() -> Enhancer {
        Enhancer::new("postgres", SqlDialect::PostgreSQL)
            .with_defaults(Some("ecommerce"), Some("public"))
    }

    #[test]
    fn test_correlated_subquery_becomes_readable() {
        let result = enhancer()
            .enhance(
                "INSERT INTO staging (id, v) \
                 SELECT p.id, COALESCE((SELECT AVG(x) FROM t WHERE t.id = p.id), p.base) AS v \
                 FROM p_table p",
            )
            .unwrap();

        let v = &result.columns[1];
        // The optimizer placeholder is expanded and the alias resolved.
        assert_eq!(
            v.transform.as_deref(),
            Some("SQL: COALESCE(AVG(t.x), p_table.base)")
        );
    }

    #[test]
    fn test_direct_copy_gets_copy_prefix() {
        let result = enhancer()
            .enhance("INSERT INTO target SELECT p.product_id FROM raw_products p")
            .unwrap();

        assert_eq!(
            result.columns[0].transform.as_deref(),
            Some("COPY: raw_products.product_id")
        );
    }

    #[test]
    fn test_cte_reference_expands_through_alias() {
        let result = enhancer()
            .enhance(
                "INSERT INTO metrics \
                 WITH price_avg (product_id, avg_price) AS \
                   (SELECT product_id, AVG(new_price) FROM price_history GROUP BY product_id) \
                 SELECT pa.avg_price FROM price_avg pa",
            )
            .unwrap();

        assert_eq!(
            result.columns[0].transform.as_deref(),
            Some("SQL: AVG(price_history.new_price)")
        );
    }

    #[test]
    fn test_options_disable_each_step() {
        let sql = "INSERT INTO metrics \
                   WITH c AS (SELECT id, SUM(v) AS total FROM src GROUP BY id) \
                   SELECT c.total FROM c";

        let raw = enhancer()
            .with_options(EnhanceOptions {
                expand_definitions: false,
                resolve_aliases: false,
                max_depth: DEFAULT_MAX_DEPTH,
            })
            .enhance(sql)
            .unwrap();
        assert_eq!(raw.columns[0].transform.as_deref(), Some("COPY: c.total"));

        let expanded = enhancer().enhance(sql).unwrap();
        assert_eq!(
            expanded.columns[0].transform.as_deref(),
            Some("SQL: SUM(src.v)")
        );
    }

    #[test]
    fn test_bare_select_is_a_precondition_failure() {
        let err = enhancer().enhance("SELECT a FROM t").unwrap_err();
        assert!(matches!(err, EnhanceError::NoOutputTable));
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let err = enhancer().enhance("NOT A QUERY AT ALL ;;;").unwrap_err();
        assert!(matches!(err, EnhanceError::Parse(_)));
    }

    #[test]
    fn test_emit_groups_facts_per_upstream_table() {
        let result = enhancer()
            .enhance(
                "INSERT INTO staging (pid, total) \
                 SELECT p.product_id, SUM(oi.quantity) \
                 FROM raw_products p JOIN raw_order_items oi ON oi.product_id = p.product_id",
            )
            .unwrap();

        let mut sink = RecordingSink::default();
        result.emit(&mut sink).unwrap();

        // One coarse fact per upstream table.
        assert_eq!(sink.table_lineage.len(), 2);
        // Each fine-grained fact references a single upstream table's fields.
        assert!(!sink.fine_grained.is_empty());
        for fact in &sink.fine_grained {
            let first = &fact.upstreams[0].dataset;
            assert!(fact.upstreams.iter().all(|f| f.dataset == *first));
        }
        // Query record is emitted once, last.
        assert_eq!(sink.query_records.len(), 1);
        assert!(sink.query_records[0]
            .subjects
            .iter()
            .any(|s| s.contains("staging")));
    }

    #[test]
    fn test_extra_definitions_expand_temp_table_references() {
        let mut extra = DefinitionCatalog::new();
        let mut def = crate::definitions::Definition::new("temp_metrics");
        def.columns
            .insert("order_count".to_string(), "COUNT(raw_orders.order_id)".to_string());
        extra.insert("temp_metrics".to_string(), def);

        let result = enhancer()
            .enhance_with(
                "INSERT INTO scores SELECT tm.order_count FROM temp_metrics tm",
                &extra,
            )
            .unwrap();

        assert_eq!(
            result.columns[0].transform.as_deref(),
            Some("SQL: COUNT(raw_orders.order_id)")
        );
    }
}
