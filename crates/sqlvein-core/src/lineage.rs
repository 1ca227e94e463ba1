//! Base statement-level lineage resolution
//!
//! For one parsed statement, determines the output table(s), every physical
//! upstream table, and per output column the upstream `(table, column)` pairs
//! plus raw transformation logic. Resolution goes through FROM aliases, CTEs,
//! and derived tables down to physical columns; what cannot be resolved is
//! recorded as an issue and skipped, never fatal on its own. Table identity
//! is the one hard precondition: a statement with no recognizable output
//! table fails.

use indexmap::{IndexMap, IndexSet};
use sqlparser::ast::{
    Expr, ObjectName, Query, Select, SelectItem, SetExpr, Statement, TableAliasColumnDef,
    TableFactor, TableWithJoins,
};
use tracing::debug;

use crate::definitions::positional_column_name;
use crate::error::{EnhanceError, Issue};
use crate::expr::{
    collect_column_refs, qualify_bare_column_refs, serialize_expr, ColumnRefParts,
};
use crate::facts::{DatasetRef, FieldRef};

/// How one output column is computed, as raw statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLogic {
    pub is_direct_copy: bool,
    pub expression: String,
}

/// Lineage of one output column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLineage {
    pub downstream_column: String,
    pub upstreams: Vec<FieldRef>,
    pub logic: Option<ColumnLogic>,
}

/// Result of base lineage resolution for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementLineage {
    pub out_tables: Vec<DatasetRef>,
    pub in_tables: Vec<DatasetRef>,
    pub columns: Vec<ColumnLineage>,
    pub issues: Vec<Issue>,
}

/// Identity context for dataset qualification.
#[derive(Debug, Clone, Copy)]
pub struct LineageContext<'a> {
    pub platform: &'a str,
    pub default_db: Option<&'a str>,
    pub default_schema: Option<&'a str>,
}

impl<'a> LineageContext<'a> {
    fn dataset(&self, name: &ObjectName) -> DatasetRef {
        let dotted = name
            .0
            .iter()
            .map(|i| i.value.clone())
            .collect::<Vec<_>>()
            .join(".");
        DatasetRef::qualified(self.platform, self.default_db, self.default_schema, &dotted)
    }
}

/// Resolve base lineage for a statement.
pub fn resolve_statement_lineage(
    stmt: &Statement,
    ctx: &LineageContext<'_>,
) -> Result<StatementLineage, EnhanceError> {
    match stmt {
        Statement::Insert(insert) => {
            let out = ctx.dataset(&insert.table_name);
            let source = insert
                .source
                .as_ref()
                .ok_or_else(|| EnhanceError::TableResolution("INSERT without source".into()))?;

            let mut analysis = QueryAnalysis::default();
            analyze_query(source, ctx, &CteShapes::new(), &mut analysis);

            let columns = if insert.columns.is_empty() {
                analysis.projections_as_lineage()
            } else {
                // Explicit column list: pair by position.
                insert
                    .columns
                    .iter()
                    .zip(&analysis.projections)
                    .map(|(ident, proj)| proj.as_lineage(ident.value.clone()))
                    .collect()
            };

            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: analysis.in_tables.into_iter().collect(),
                columns,
                issues: analysis.issues,
            })
        }

        Statement::CreateTable(create) => {
            let query = create.query.as_ref().ok_or(EnhanceError::NoOutputTable)?;
            let out = ctx.dataset(&create.name);

            let mut analysis = QueryAnalysis::default();
            analyze_query(query, ctx, &CteShapes::new(), &mut analysis);

            let columns = analysis.projections_as_lineage();
            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: analysis.in_tables.into_iter().collect(),
                columns,
                issues: analysis.issues,
            })
        }

        Statement::Query(query) => {
            let into = select_into_target(query).ok_or(EnhanceError::NoOutputTable)?;
            let out = ctx.dataset(&into);

            let mut analysis = QueryAnalysis::default();
            analyze_query(query, ctx, &CteShapes::new(), &mut analysis);

            let columns = analysis.projections_as_lineage();
            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: analysis.in_tables.into_iter().collect(),
                columns,
                issues: analysis.issues,
            })
        }

        Statement::Update {
            table,
            assignments,
            from,
            ..
        } => {
            let target_name = table_factor_name(&table.relation).ok_or_else(|| {
                EnhanceError::TableResolution("UPDATE target is not a plain table".into())
            })?;
            let out = ctx.dataset(&target_name);

            let mut analysis = QueryAnalysis::default();
            let mut scope = Scope::default();
            scope.add_table_with_joins(table, ctx, &CteShapes::new(), &mut analysis);
            if let Some(from_table) = from {
                scope.add_table_with_joins(from_table, ctx, &CteShapes::new(), &mut analysis);
            }

            let mut columns = Vec::new();
            for assignment in assignments {
                let Some(column_name) = assignment_column_name(&assignment.target) else {
                    continue;
                };
                let upstreams = scope.resolve_expr_refs(&assignment.value, &mut analysis.issues);
                let logic = scope.logic_for(&assignment.value);
                columns.push(ColumnLineage {
                    downstream_column: column_name,
                    upstreams,
                    logic: Some(logic),
                });
            }

            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: analysis.in_tables.into_iter().collect(),
                columns,
                issues: analysis.issues,
            })
        }

        Statement::Delete(delete) => {
            let tables = match &delete.from {
                sqlparser::ast::FromTable::WithFromKeyword(tables)
                | sqlparser::ast::FromTable::WithoutKeyword(tables) => tables,
            };
            let target = tables
                .first()
                .and_then(|t| table_factor_name(&t.relation))
                .ok_or(EnhanceError::NoOutputTable)?;
            let out = ctx.dataset(&target);

            let mut in_tables = IndexSet::new();
            if let Some(using_tables) = &delete.using {
                for table in using_tables {
                    if let Some(name) = table_factor_name(&table.relation) {
                        in_tables.insert(ctx.dataset(&name));
                    }
                }
            }

            // Row removal carries no column-level lineage.
            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: in_tables.into_iter().collect(),
                columns: Vec::new(),
                issues: Vec::new(),
            })
        }

        Statement::Merge { table, source, .. } => {
            let target = table_factor_name(table).ok_or_else(|| {
                EnhanceError::TableResolution("MERGE target is not a plain table".into())
            })?;
            let out = ctx.dataset(&target);

            let mut in_tables = IndexSet::new();
            let mut issues = Vec::new();
            match source {
                TableFactor::Table { name, .. } => {
                    in_tables.insert(ctx.dataset(name));
                }
                TableFactor::Derived { subquery, .. } => {
                    let mut analysis = QueryAnalysis::default();
                    analyze_query(subquery, ctx, &CteShapes::new(), &mut analysis);
                    in_tables.extend(analysis.in_tables);
                }
                _ => {}
            }
            issues.push(Issue::info(
                "MERGE column-level lineage is not extracted; table-level only",
            ));

            Ok(StatementLineage {
                out_tables: vec![out],
                in_tables: in_tables.into_iter().collect(),
                columns: Vec::new(),
                issues,
            })
        }

        _ => Err(EnhanceError::NoOutputTable),
    }
}

/// The `INTO` target of a `SELECT ... INTO t FROM ...` query, if present.
pub(crate) fn select_into_target(query: &Query) -> Option<ObjectName> {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.into.as_ref().map(|into| into.name.clone()),
        _ => None,
    }
}

fn table_factor_name(factor: &TableFactor) -> Option<ObjectName> {
    match factor {
        TableFactor::Table { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn assignment_column_name(target: &sqlparser::ast::AssignmentTarget) -> Option<String> {
    match target {
        sqlparser::ast::AssignmentTarget::ColumnName(name) => {
            name.0.last().map(|i| i.value.clone())
        }
        sqlparser::ast::AssignmentTarget::Tuple(_) => None,
    }
}

/// One projection of an analyzed SELECT.
#[derive(Debug, Clone)]
struct ProjectionLineage {
    name: String,
    upstreams: Vec<FieldRef>,
    logic: ColumnLogic,
}

impl ProjectionLineage {
    fn as_lineage(&self, downstream_column: String) -> ColumnLineage {
        ColumnLineage {
            downstream_column,
            upstreams: self.upstreams.clone(),
            logic: Some(self.logic.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct QueryAnalysis {
    projections: Vec<ProjectionLineage>,
    in_tables: IndexSet<DatasetRef>,
    issues: Vec<Issue>,
}

impl QueryAnalysis {
    fn projections_as_lineage(&self) -> Vec<ColumnLineage> {
        self.projections
            .iter()
            .map(|p| p.as_lineage(p.name.clone()))
            .collect()
    }
}

/// Output shape of an analyzed CTE: column -> physical upstream fields.
#[derive(Debug, Clone, Default)]
struct CteShape {
    columns: IndexMap<String, Vec<FieldRef>>,
}

type CteShapes = IndexMap<String, CteShape>;

/// A relation visible in one SELECT scope.
#[derive(Debug, Clone)]
enum Relation {
    /// Physical table
    Physical(DatasetRef),
    /// CTE or derived table: column -> physical upstream fields
    Virtual(CteShape),
}

/// Alias/name -> relation, for one SELECT.
#[derive(Debug, Default)]
struct Scope {
    relations: IndexMap<String, Relation>,
    /// CTEs visible to this scope even when not joined in FROM; lifted
    /// subquery definitions are referenced by qualifier alone.
    ctes: CteShapes,
}

impl Scope {
    fn new(ctes: CteShapes) -> Self {
        Self {
            relations: IndexMap::new(),
            ctes,
        }
    }

    fn add_table_with_joins(
        &mut self,
        table: &TableWithJoins,
        ctx: &LineageContext<'_>,
        ctes: &CteShapes,
        analysis: &mut QueryAnalysis,
    ) {
        self.add_table_factor(&table.relation, ctx, ctes, analysis);
        for join in &table.joins {
            self.add_table_factor(&join.relation, ctx, ctes, analysis);
        }
    }

    fn add_table_factor(
        &mut self,
        factor: &TableFactor,
        ctx: &LineageContext<'_>,
        ctes: &CteShapes,
        analysis: &mut QueryAnalysis,
    ) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let lookup = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .or_else(|| name.0.last().map(|i| i.value.clone()))
                    .unwrap_or_default();

                // Single-part names may reference a CTE in scope.
                if let [table_ident] = name.0.as_slice() {
                    if let Some(shape) = ctes.get(&table_ident.value) {
                        self.relations.insert(lookup, Relation::Virtual(shape.clone()));
                        return;
                    }
                }

                let dataset = ctx.dataset(name);
                analysis.in_tables.insert(dataset.clone());
                self.relations.insert(lookup, Relation::Physical(dataset));
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let mut sub_analysis = QueryAnalysis::default();
                analyze_query(subquery, ctx, ctes, &mut sub_analysis);

                let declared = alias.as_ref().map(|a| a.columns.as_slice()).unwrap_or(&[]);
                let shape = shape_from_analysis(&sub_analysis, declared);

                analysis.in_tables.extend(sub_analysis.in_tables);
                analysis.issues.extend(sub_analysis.issues);

                if let Some(a) = alias {
                    self.relations
                        .insert(a.name.value.clone(), Relation::Virtual(shape));
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.add_table_with_joins(table_with_joins, ctx, ctes, analysis);
            }
            _ => {}
        }
    }

    /// Physical upstream fields of every column reference in an expression.
    fn resolve_expr_refs(&self, expr: &Expr, issues: &mut Vec<Issue>) -> Vec<FieldRef> {
        let mut refs = Vec::new();
        collect_column_refs(expr, &mut refs);

        let mut upstreams: Vec<FieldRef> = Vec::new();
        for parts in refs {
            for field in self.resolve_ref(&parts, issues) {
                if !upstreams.contains(&field) {
                    upstreams.push(field);
                }
            }
        }
        upstreams
    }

    fn resolve_ref(&self, parts: &ColumnRefParts, issues: &mut Vec<Issue>) -> Vec<FieldRef> {
        match &parts.qualifier {
            Some(qualifier) => {
                let relation = self
                    .relations
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(qualifier))
                    .map(|(_, relation)| relation);

                if let Some(relation) = relation {
                    return relation_fields(relation, &parts.column, issues);
                }

                // A definition referenced by qualifier without a FROM entry:
                // resolve through the CTE shape directly.
                if let Some(shape) = self
                    .ctes
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(qualifier))
                    .map(|(_, shape)| shape)
                {
                    return relation_fields(&Relation::Virtual(shape.clone()), &parts.column, issues);
                }

                issues.push(Issue::warning(format!(
                    "unresolved table alias '{}' for column '{}'",
                    qualifier, parts.column
                )));
                Vec::new()
            }
            None => match self.relations.len() {
                0 => Vec::new(),
                1 => {
                    let relation = self.relations.values().next().unwrap();
                    relation_fields(relation, &parts.column, issues)
                }
                _ => {
                    // No schema catalog: prefer a virtual relation exporting
                    // the column, else fall back to the first relation.
                    for relation in self.relations.values() {
                        if let Relation::Virtual(shape) = relation {
                            if shape
                                .columns
                                .keys()
                                .any(|c| c.eq_ignore_ascii_case(&parts.column))
                            {
                                return relation_fields(relation, &parts.column, issues);
                            }
                        }
                    }
                    issues.push(Issue::info(format!(
                        "ambiguous unqualified column '{}'; attributed to first relation in scope",
                        parts.column
                    )));
                    let relation = self.relations.values().next().unwrap();
                    relation_fields(relation, &parts.column, issues)
                }
            },
        }
    }

    /// Raw logic text for a projection expression, qualified when the scope
    /// has exactly one relation so the text survives substitution elsewhere.
    fn logic_for(&self, expr: &Expr) -> ColumnLogic {
        let is_direct_copy = matches!(expr, Expr::Identifier(_) | Expr::CompoundIdentifier(_));

        let expression = if self.relations.len() == 1 {
            let qualifier = self.relations.keys().next().unwrap();
            serialize_expr(&qualify_bare_column_refs(expr, qualifier))
        } else {
            serialize_expr(expr)
        };

        ColumnLogic {
            is_direct_copy,
            expression,
        }
    }
}

fn relation_fields(relation: &Relation, column: &str, issues: &mut Vec<Issue>) -> Vec<FieldRef> {
    match relation {
        Relation::Physical(dataset) => vec![FieldRef {
            dataset: dataset.clone(),
            column: column.to_string(),
        }],
        Relation::Virtual(shape) => {
            let found = shape
                .columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, fields)| fields.clone());
            match found {
                Some(fields) => fields,
                None => {
                    issues.push(Issue::warning(format!(
                        "column '{}' not exported by referenced subquery",
                        column
                    )));
                    Vec::new()
                }
            }
        }
    }
}

fn shape_from_analysis(analysis: &QueryAnalysis, declared: &[TableAliasColumnDef]) -> CteShape {
    let mut shape = CteShape::default();
    for (idx, proj) in analysis.projections.iter().enumerate() {
        let name = declared
            .get(idx)
            .map(|c| c.name.value.clone())
            .unwrap_or_else(|| proj.name.clone());
        shape.columns.insert(name, proj.upstreams.clone());
    }
    shape
}

/// Analyze a query: resolve CTEs in order, then the body.
fn analyze_query(
    query: &Query,
    ctx: &LineageContext<'_>,
    outer_ctes: &CteShapes,
    analysis: &mut QueryAnalysis,
) {
    let mut ctes = outer_ctes.clone();

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let mut cte_analysis = QueryAnalysis::default();
            analyze_query(&cte.query, ctx, &ctes, &mut cte_analysis);

            let shape = shape_from_analysis(&cte_analysis, &cte.alias.columns);
            analysis.in_tables.extend(cte_analysis.in_tables);
            analysis.issues.extend(cte_analysis.issues);

            ctes.insert(cte.alias.name.value.clone(), shape);
        }
    }

    analyze_set_expr(&query.body, ctx, &ctes, analysis);
}

fn analyze_set_expr(
    set_expr: &SetExpr,
    ctx: &LineageContext<'_>,
    ctes: &CteShapes,
    analysis: &mut QueryAnalysis,
) {
    match set_expr {
        SetExpr::Select(select) => analyze_select(select, ctx, ctes, analysis),
        SetExpr::Query(query) => analyze_query(query, ctx, ctes, analysis),
        SetExpr::SetOperation { left, right, .. } => {
            // Projections come from the left branch; the right branch still
            // contributes upstream tables.
            analyze_set_expr(left, ctx, ctes, analysis);
            let mut right_analysis = QueryAnalysis::default();
            analyze_set_expr(right, ctx, ctes, &mut right_analysis);
            analysis.in_tables.extend(right_analysis.in_tables);
            analysis.issues.extend(right_analysis.issues);
        }
        _ => {}
    }
}

fn analyze_select(
    select: &Select,
    ctx: &LineageContext<'_>,
    ctes: &CteShapes,
    analysis: &mut QueryAnalysis,
) {
    let mut scope = Scope::new(ctes.clone());
    for table_with_joins in &select.from {
        scope.add_table_with_joins(table_with_joins, ctx, ctes, analysis);
    }

    for (idx, item) in select.projection.iter().enumerate() {
        let expr = match item {
            SelectItem::UnnamedExpr(expr) => expr,
            SelectItem::ExprWithAlias { expr, .. } => expr,
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                debug!("wildcard projection cannot be enumerated without a schema");
                analysis
                    .issues
                    .push(Issue::info("wildcard projection not expanded"));
                continue;
            }
        };

        let name = projection_output_name(item, idx);
        let upstreams = scope.resolve_expr_refs(expr, &mut analysis.issues);
        let logic = scope.logic_for(expr);

        analysis.projections.push(ProjectionLineage {
            name,
            upstreams,
            logic,
        });
    }
}

fn projection_output_name(item: &SelectItem, idx: usize) -> String {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => alias.value.clone(),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => ident.value.clone(),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => idents
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| positional_column_name(idx)),
        _ => positional_column_name(idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlDialect;
    use crate::expr::parse_statement;
    use pretty_assertions::assert_eq;

    const CTX: LineageContext<'static> = LineageContext {
        platform: "postgres",
        default_db: Some("ecommerce"),
        default_schema: Some("public"),
    };

    fn resolve(sql: &str) -> StatementLineage {
        let stmt = parse_statement(sql, &SqlDialect::PostgreSQL).unwrap();
        resolve_statement_lineage(&stmt, &CTX).unwrap()
    }

    #[test]
    fn test_insert_select_with_join() {
        let lineage = resolve(
            "INSERT INTO staging_product_metrics (product_id, total_sold) \
             SELECT p.product_id, COALESCE(SUM(oi.quantity), 0) AS total_sold \
             FROM raw_products p \
             LEFT JOIN raw_order_items oi ON oi.product_id = p.product_id",
        );

        assert_eq!(
            lineage.out_tables[0].name,
            "ecommerce.public.staging_product_metrics"
        );
        let in_names: Vec<_> = lineage.in_tables.iter().map(|t| t.table_name()).collect();
        assert_eq!(in_names, vec!["raw_products", "raw_order_items"]);

        let product_id = &lineage.columns[0];
        assert_eq!(product_id.downstream_column, "product_id");
        assert_eq!(product_id.upstreams.len(), 1);
        assert_eq!(product_id.upstreams[0].column, "product_id");
        assert!(product_id.logic.as_ref().unwrap().is_direct_copy);

        let total_sold = &lineage.columns[1];
        assert_eq!(total_sold.downstream_column, "total_sold");
        assert_eq!(total_sold.upstreams[0].dataset.table_name(), "raw_order_items");
        let logic = total_sold.logic.as_ref().unwrap();
        assert!(!logic.is_direct_copy);
        assert_eq!(logic.expression, "COALESCE(SUM(oi.quantity), 0)");
    }

    #[test]
    fn test_single_relation_logic_is_qualified() {
        let lineage = resolve("CREATE TEMP TABLE t AS SELECT a, b FROM y");

        assert_eq!(lineage.out_tables[0].table_name(), "t");
        assert_eq!(lineage.columns[0].logic.as_ref().unwrap().expression, "y.a");
        assert_eq!(lineage.columns[1].logic.as_ref().unwrap().expression, "y.b");
        assert_eq!(lineage.columns[0].upstreams[0].dataset.table_name(), "y");
    }

    #[test]
    fn test_cte_references_resolve_to_physical_columns() {
        let lineage = resolve(
            "INSERT INTO target \
             WITH price_avg (product_id, avg_price) AS \
               (SELECT product_id, AVG(new_price) FROM price_history GROUP BY product_id) \
             SELECT pa.product_id, pa.avg_price FROM price_avg pa",
        );

        let avg_price = &lineage.columns[1];
        assert_eq!(avg_price.downstream_column, "avg_price");
        assert_eq!(avg_price.upstreams.len(), 1);
        assert_eq!(avg_price.upstreams[0].dataset.table_name(), "price_history");
        assert_eq!(avg_price.upstreams[0].column, "new_price");
    }

    #[test]
    fn test_bare_select_has_no_output_table() {
        let stmt =
            parse_statement("SELECT a FROM t", &SqlDialect::PostgreSQL).unwrap();
        assert!(matches!(
            resolve_statement_lineage(&stmt, &CTX),
            Err(EnhanceError::NoOutputTable)
        ));
    }

    #[test]
    fn test_select_into_is_an_output() {
        let lineage = resolve("SELECT a, b INTO summary FROM details");
        assert_eq!(lineage.out_tables[0].table_name(), "summary");
        assert_eq!(lineage.columns.len(), 2);
    }

    #[test]
    fn test_update_assignments() {
        let lineage = resolve(
            "UPDATE products SET price = base_price * 1.1 WHERE id = 1",
        );
        assert_eq!(lineage.out_tables[0].table_name(), "products");
        assert_eq!(lineage.columns[0].downstream_column, "price");
        assert_eq!(
            lineage.columns[0].logic.as_ref().unwrap().expression,
            "products.base_price * 1.1"
        );
    }

    #[test]
    fn test_unresolved_alias_becomes_issue_not_error() {
        let lineage = resolve("INSERT INTO t SELECT z.a FROM known_table k");
        assert_eq!(lineage.columns[0].upstreams.len(), 0);
        assert!(lineage
            .issues
            .iter()
            .any(|i| i.message.contains("unresolved table alias 'z'")));
    }

    #[test]
    fn test_merge_is_table_level_only() {
        let lineage = resolve(
            "MERGE INTO target USING source_table ON target.id = source_table.id \
             WHEN MATCHED THEN UPDATE SET v = source_table.v",
        );
        assert_eq!(lineage.out_tables[0].table_name(), "target");
        assert_eq!(lineage.in_tables[0].table_name(), "source_table");
        assert!(lineage.columns.is_empty());
    }

    #[test]
    fn test_union_collects_tables_from_both_sides() {
        let lineage = resolve(
            "INSERT INTO all_ids SELECT id FROM t1 UNION ALL SELECT id FROM t2",
        );
        let names: Vec<_> = lineage.in_tables.iter().map(|t| t.table_name()).collect();
        assert_eq!(names, vec!["t1", "t2"]);
        assert_eq!(lineage.columns.len(), 1);
    }
}
