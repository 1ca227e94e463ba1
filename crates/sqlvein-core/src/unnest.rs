//! Scalar subquery lifting
//!
//! Correlated scalar subqueries in projections are the main reason raw
//! transformation logic is unreadable: the interesting calculation lives
//! inside `(SELECT AVG(x) FROM t WHERE ...)`. This pass moves each such
//! subquery into a synthetic CTE named `_u_{n}` and replaces the original
//! expression with a `_u_{n}._col_0` reference, the same shape an SQL
//! optimizer's subquery unnesting produces. The lifted tree is consumed only
//! by definition extraction and the base lineage resolver; it is never
//! executed, so correlation predicates may stay inside the lifted body.

use sqlparser::ast::{Expr, Ident, Query, SelectItem, SetExpr, Statement};
use tracing::{debug, warn};

use crate::dialect::SqlDialect;
use crate::expr::{parse_statement, rewrite_expr};

/// Lift scalar projection subqueries into `_u_{n}` CTEs.
///
/// Returns the rewritten statement and the number of subqueries lifted.
/// Statements with no query body (UPDATE, DELETE...) pass through unchanged.
pub fn lift_scalar_subqueries(mut stmt: Statement, dialect: &SqlDialect) -> (Statement, usize) {
    let mut lifted: Vec<(String, Query)> = Vec::new();

    let target = match &mut stmt {
        Statement::Query(query) => Some(query.as_mut()),
        Statement::Insert(insert) => insert.source.as_mut().map(|q| q.as_mut()),
        Statement::CreateTable(create) => create.query.as_mut().map(|q| q.as_mut()),
        _ => None,
    };

    if let Some(query) = target {
        lift_in_set_expr(&mut query.body, &mut lifted);
        if !lifted.is_empty() {
            attach_ctes(query, &lifted, dialect);
        }
    }

    let count = lifted.len();
    if count > 0 {
        debug!(count, "lifted scalar subqueries into named definitions");
    }
    (stmt, count)
}

fn lift_in_set_expr(set_expr: &mut SetExpr, lifted: &mut Vec<(String, Query)>) {
    match set_expr {
        SetExpr::Select(select) => {
            for item in &mut select.projection {
                let expr = match item {
                    SelectItem::UnnamedExpr(expr) => expr,
                    SelectItem::ExprWithAlias { expr, .. } => expr,
                    _ => continue,
                };
                rewrite_expr(expr, &mut |node| lift_node(node, lifted));
            }
        }
        SetExpr::Query(query) => lift_in_set_expr(&mut query.body, lifted),
        SetExpr::SetOperation { left, right, .. } => {
            lift_in_set_expr(left, lifted);
            lift_in_set_expr(right, lifted);
        }
        _ => {}
    }
}

fn lift_node(node: &Expr, lifted: &mut Vec<(String, Query)>) -> Option<Expr> {
    let Expr::Subquery(subquery) = node else {
        return None;
    };
    if !is_scalar_select(subquery) {
        return None;
    }

    let name = format!("_u_{}", lifted.len());
    lifted.push((name.clone(), subquery.as_ref().clone()));

    Some(Expr::CompoundIdentifier(vec![
        Ident::new(name),
        Ident::new("_col_0"),
    ]))
}

/// A subquery is liftable when its body is a single-projection SELECT.
fn is_scalar_select(query: &Query) -> bool {
    match query.body.as_ref() {
        SetExpr::Select(select) => {
            select.projection.len() == 1
                && !matches!(
                    select.projection[0],
                    SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _)
                )
        }
        _ => false,
    }
}

/// Splice the lifted definitions into the query's WITH list, first.
///
/// The CTE nodes are built by parsing a skeleton statement rather than by
/// hand-assembling AST structs, so the shapes always match what the parser
/// itself produces.
fn attach_ctes(query: &mut Query, lifted: &[(String, Query)], dialect: &SqlDialect) {
    let mut skeleton_sql = String::from("WITH ");
    for (i, (name, subquery)) in lifted.iter().enumerate() {
        if i > 0 {
            skeleton_sql.push_str(", ");
        }
        skeleton_sql.push_str(name);
        skeleton_sql.push_str(" AS (");
        skeleton_sql.push_str(&subquery.to_string());
        skeleton_sql.push(')');
    }
    skeleton_sql.push_str(" SELECT 1");

    let skeleton = match parse_statement(&skeleton_sql, dialect) {
        Ok(Statement::Query(q)) => *q,
        _ => {
            warn!("failed to reparse lifted definitions; leaving them unattached");
            return;
        }
    };
    let Some(mut new_with) = skeleton.with else {
        return;
    };

    match &mut query.with {
        Some(with) => {
            let mut ctes = std::mem::take(&mut new_with.cte_tables);
            ctes.append(&mut with.cte_tables);
            with.cte_tables = ctes;
        }
        None => query.with = Some(new_with),
    }
}
