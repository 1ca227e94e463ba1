//! Definition extraction
//!
//! A [`Definition`] is one named, column-addressable source of derived
//! values: a CTE, a derived table given a FROM/JOIN alias, or a temp table
//! registered across procedure statements. The extractor walks a statement
//! and records, per definition, the SQL expression that computes each output
//! column, so later passes can substitute references like `pa.avg_price` or
//! an optimizer's `_u_0._col_0` with the real calculation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Cte, Expr, Query, Select, SelectItem, SetExpr, Statement, TableAliasColumnDef, TableFactor,
    TableWithJoins,
};

use crate::expr::{qualify_bare_column_refs, serialize_expr};

/// Positional name assigned to unnamed projections, matching the convention
/// SQL optimizers use for internal columns.
pub fn positional_column_name(idx: usize) -> String {
    format!("_col_{}", idx)
}

/// One named, column-addressable source of derived values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Alias under which the definition is referenced
    pub name: String,
    /// Output column name -> SQL text of its defining expression
    pub columns: IndexMap<String, String>,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }
}

/// Alias -> Definition, insertion-ordered.
///
/// Iteration order is load-bearing: the expander resolves qualifier/column
/// collisions by first-seen catalog entry, and that tie-break must be
/// deterministic.
pub type DefinitionCatalog = IndexMap<String, Definition>;

/// Extract every CTE and aliased derived-table definition from a statement.
///
/// Duplicate aliases overwrite (last seen wins). A FROM/JOIN reference to a
/// known definition under an alias (`FROM price_avg pa`) registers the alias
/// as a second catalog key for the same definition. Nested definition bodies
/// are not inlined here; nesting is the expander's job.
pub fn extract_definitions(stmt: &Statement) -> DefinitionCatalog {
    let mut catalog = DefinitionCatalog::new();
    match stmt {
        Statement::Query(query) => walk_query(query, &mut catalog),
        Statement::Insert(insert) => {
            if let Some(source) = &insert.source {
                walk_query(source, &mut catalog);
            }
        }
        Statement::CreateTable(create) => {
            if let Some(query) = &create.query {
                walk_query(query, &mut catalog);
            }
        }
        Statement::Update { table, from, .. } => {
            walk_table_with_joins(table, &mut catalog);
            if let Some(from_table) = from {
                walk_table_with_joins(from_table, &mut catalog);
            }
        }
        Statement::Merge { table, source, .. } => {
            walk_table_factor(table, &mut catalog);
            walk_table_factor(source, &mut catalog);
        }
        _ => {}
    }
    catalog
}

fn walk_query(query: &Query, catalog: &mut DefinitionCatalog) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            record_cte(cte, catalog);
            walk_query(&cte.query, catalog);
        }
    }
    walk_set_expr(&query.body, catalog);
}

fn walk_set_expr(set_expr: &SetExpr, catalog: &mut DefinitionCatalog) {
    match set_expr {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                walk_table_with_joins(table_with_joins, catalog);
            }
        }
        SetExpr::Query(query) => walk_query(query, catalog),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, catalog);
            walk_set_expr(right, catalog);
        }
        _ => {}
    }
}

fn walk_table_with_joins(table: &TableWithJoins, catalog: &mut DefinitionCatalog) {
    walk_table_factor(&table.relation, catalog);
    for join in &table.joins {
        walk_table_factor(&join.relation, catalog);
    }
}

fn walk_table_factor(factor: &TableFactor, catalog: &mut DefinitionCatalog) {
    match factor {
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            if let Some(a) = alias {
                record_definition(a.name.value.clone(), &a.columns, subquery, catalog);
            }
            // A derived table with no alias is not addressable; skip it.
            walk_query(subquery, catalog);
        }
        TableFactor::Table { name, alias, .. } => {
            // `FROM price_avg pa`: make the definition reachable under the
            // alias actually used in column qualifiers.
            if let (Some(a), [table_ident]) = (alias, name.0.as_slice()) {
                if let Some(def) = catalog.get(&table_ident.value).cloned() {
                    catalog.insert(a.name.value.clone(), def);
                }
            }
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            walk_table_with_joins(table_with_joins, catalog);
        }
        _ => {}
    }
}

fn record_cte(cte: &Cte, catalog: &mut DefinitionCatalog) {
    let name = cte.alias.name.value.clone();
    if name.is_empty() {
        return;
    }
    record_definition(name, &cte.alias.columns, &cte.query, catalog);
}

fn record_definition(
    name: String,
    declared: &[TableAliasColumnDef],
    query: &Query,
    catalog: &mut DefinitionCatalog,
) {
    let mut def = Definition::new(name.clone());

    // Only a plain SELECT body yields a bounded column set; set operations
    // and other bodies are recorded by name alone so lookups fail gracefully.
    if let SetExpr::Select(select) = query.body.as_ref() {
        collect_select_columns(select, declared, &mut def);
    }

    catalog.insert(name, def);
}

fn collect_select_columns(select: &Select, declared: &[TableAliasColumnDef], def: &mut Definition) {
    let sole_relation = sole_relation_name(select);

    for (idx, item) in select.projection.iter().enumerate() {
        let expr = match item {
            SelectItem::UnnamedExpr(expr) => expr,
            SelectItem::ExprWithAlias { expr, .. } => expr,
            // Wildcards cannot express a bounded column set.
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => continue,
        };

        let column_name = declared
            .get(idx)
            .map(|c| c.name.value.clone())
            .or_else(|| projection_name(item))
            .unwrap_or_else(|| positional_column_name(idx));

        // With a single source relation, bare references are qualified so the
        // defining expression stays meaningful once substituted elsewhere.
        let text = match &sole_relation {
            Some(relation) => serialize_expr(&qualify_bare_column_refs(expr, relation)),
            None => serialize_expr(expr),
        };

        def.columns.insert(column_name, text);
    }
}

/// The single relation a SELECT reads from, if there is exactly one.
fn sole_relation_name(select: &Select) -> Option<String> {
    match select.from.as_slice() {
        [TableWithJoins { relation, joins }] if joins.is_empty() => match relation {
            TableFactor::Table { name, alias, .. } => match alias {
                Some(a) => Some(a.name.value.clone()),
                None => name.0.last().map(|i| i.value.clone()),
            },
            TableFactor::Derived {
                alias: Some(a), ..
            } => Some(a.name.value.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// The inherent output name of a projection, when it has one.
fn projection_name(item: &SelectItem) -> Option<String> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => Some(ident.value.clone()),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => {
            idents.last().map(|i| i.value.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlDialect;
    use crate::expr::parse_statement;
    use pretty_assertions::assert_eq;

    fn extract(sql: &str) -> DefinitionCatalog {
        let stmt = parse_statement(sql, &SqlDialect::PostgreSQL).unwrap();
        extract_definitions(&stmt)
    }

    #[test]
    fn test_cte_with_declared_column_list() {
        let catalog = extract(
            "WITH price_avg (product_id, avg_price) AS \
             (SELECT product_id, AVG(new_price) FROM price_history GROUP BY product_id) \
             SELECT pa.avg_price FROM price_avg pa",
        );

        let def = &catalog["price_avg"];
        assert_eq!(def.columns["product_id"], "price_history.product_id");
        assert_eq!(def.columns["avg_price"], "AVG(price_history.new_price)");
        // The FROM alias addresses the same definition.
        assert_eq!(catalog["pa"], catalog["price_avg"]);
    }

    #[test]
    fn test_unnamed_projection_gets_positional_name() {
        let catalog = extract(
            "WITH stats AS (SELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id) \
             SELECT * FROM stats",
        );

        let def = &catalog["stats"];
        assert_eq!(def.columns["customer_id"], "orders.customer_id");
        assert_eq!(def.columns["_col_1"], "COUNT(*)");
    }

    #[test]
    fn test_derived_table_in_join() {
        let catalog = extract(
            "SELECT p.id, t.total FROM products p \
             JOIN (SELECT product_id, SUM(quantity) AS total FROM order_items GROUP BY product_id) t \
             ON t.product_id = p.id",
        );

        let def = &catalog["t"];
        assert_eq!(def.columns["total"], "SUM(order_items.quantity)");
        assert_eq!(def.columns["product_id"], "order_items.product_id");
    }

    #[test]
    fn test_wildcard_projection_is_skipped() {
        let catalog = extract("WITH c AS (SELECT * FROM t) SELECT * FROM c");
        assert!(catalog["c"].columns.is_empty());
    }

    #[test]
    fn test_set_operation_body_recorded_by_name_only() {
        let catalog = extract(
            "WITH u AS (SELECT a FROM t1 UNION ALL SELECT a FROM t2) SELECT * FROM u",
        );
        assert!(catalog.contains_key("u"));
        assert!(catalog["u"].columns.is_empty());
    }

    #[test]
    fn test_duplicate_alias_last_seen_wins() {
        let catalog = extract(
            "WITH d AS (SELECT 1 AS x) \
             SELECT * FROM (SELECT 2 AS x) d",
        );
        assert_eq!(catalog["d"].columns["x"], "2");
    }

    #[test]
    fn test_nested_cte_definitions_are_all_found() {
        let catalog = extract(
            "WITH outer_cte AS ( \
               WITH inner_cte AS (SELECT a AS val FROM base) \
               SELECT val FROM inner_cte \
             ) SELECT val FROM outer_cte",
        );
        assert!(catalog.contains_key("outer_cte"));
        assert!(catalog.contains_key("inner_cte"));
        assert_eq!(catalog["inner_cte"].columns["val"], "base.a");
    }

    #[test]
    fn test_insert_source_definitions() {
        let catalog = extract(
            "INSERT INTO target SELECT s.v FROM (SELECT value AS v FROM src) s",
        );
        assert_eq!(catalog["s"].columns["v"], "src.value");
    }
}
