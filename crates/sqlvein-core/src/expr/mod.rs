//! Expression-level parse, serialize, and substitution primitives
//!
//! Transformation logic travels through this crate as SQL text. To operate on
//! it structurally, an expression is wrapped as `SELECT <text>`, parsed in the
//! statement's dialect, rewritten on the tree, and serialized back. The
//! wrap/unwrap round trip preserves evaluation semantics: nothing is rewritten
//! except the nodes a substitution callback explicitly replaces.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, SelectItem, SetExpr, Statement,
    Subscript, WindowType,
};
use sqlparser::parser::Parser;

use crate::dialect::SqlDialect;

/// Parse a full SQL statement, returning the first statement.
pub fn parse_statement(sql: &str, dialect: &SqlDialect) -> Result<Statement, String> {
    let parser_dialect = dialect.parser_dialect();
    let mut statements =
        Parser::parse_sql(parser_dialect.as_ref(), sql).map_err(|e| e.to_string())?;
    if statements.is_empty() {
        return Err("empty statement".to_string());
    }
    Ok(statements.remove(0))
}

/// Parse expression text as a standalone projection.
///
/// The text is wrapped as `SELECT <text>`; a trailing alias on the projection
/// is stripped, since an alias inside a substituted fragment is meaningless.
pub fn parse_standalone_expr(text: &str, dialect: &SqlDialect) -> Result<Expr, String> {
    let stmt = parse_statement(&format!("SELECT {}", text), dialect)?;
    let Statement::Query(query) = stmt else {
        return Err(format!("not an expression: {}", text));
    };
    let SetExpr::Select(select) = *query.body else {
        return Err(format!("not a plain projection: {}", text));
    };
    match select.projection.into_iter().next() {
        Some(SelectItem::UnnamedExpr(expr)) => Ok(expr),
        Some(SelectItem::ExprWithAlias { expr, .. }) => Ok(expr),
        _ => Err(format!("not a column expression: {}", text)),
    }
}

/// Serialize an expression back to SQL text.
pub fn serialize_expr(expr: &Expr) -> String {
    expr.to_string()
}

/// A `qualifier.column` (or bare `column`) reference found in an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRefParts {
    pub qualifier: Option<String>,
    pub column: String,
}

impl ColumnRefParts {
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Identifier(ident) => Some(Self {
                qualifier: None,
                column: ident.value.clone(),
            }),
            Expr::CompoundIdentifier(idents) => match idents.as_slice() {
                [table, column] => Some(Self {
                    qualifier: Some(table.value.clone()),
                    column: column.value.clone(),
                }),
                [_catalog, table, column] => Some(Self {
                    qualifier: Some(table.value.clone()),
                    column: column.value.clone(),
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Collect every column reference in an expression, in traversal order.
///
/// Stops at subquery boundaries: scalar subqueries are lifted into named
/// definitions before projection logic reaches this code.
pub fn collect_column_refs(expr: &Expr, out: &mut Vec<ColumnRefParts>) {
    if let Some(parts) = ColumnRefParts::from_expr(expr) {
        out.push(parts);
        return;
    }
    walk_children(expr, &mut |child| collect_column_refs(child, out));
}

/// Apply a substitution over an expression tree.
///
/// `subst` is consulted at every node (pre-order); when it returns a
/// replacement, the node is swapped and the replacement subtree is NOT
/// revisited. This is what keeps a self-referential definition from looping
/// inside a single pass. Returns the number of replacements performed.
pub fn rewrite_expr(expr: &mut Expr, subst: &mut dyn FnMut(&Expr) -> Option<Expr>) -> usize {
    if let Some(replacement) = subst(expr) {
        *expr = replacement;
        return 1;
    }
    let mut count = 0;
    walk_children_mut(expr, &mut |child| {
        count += rewrite_expr(child, subst);
    });
    count
}

/// Qualify bare column references with a relation name.
///
/// Used when an expression's scope has exactly one relation, so `new_price`
/// becomes `price_history.new_price` and survives substitution into a scope
/// where the bare name would be meaningless. Already-qualified references are
/// untouched.
pub fn qualify_bare_column_refs(expr: &Expr, qualifier: &str) -> Expr {
    let mut qualified = expr.clone();
    rewrite_expr(&mut qualified, &mut |e| match e {
        Expr::Identifier(ident) => Some(Expr::CompoundIdentifier(vec![
            sqlparser::ast::Ident::new(qualifier),
            ident.clone(),
        ])),
        _ => None,
    });
    qualified
}

/// Visit the direct expression children of a node (read-only).
pub(crate) fn walk_children(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::UnaryOp { expr, .. } => visit(expr),
        Expr::Nested(inner) => visit(inner),
        Expr::Function(func) => {
            if let FunctionArguments::List(arg_list) = &func.args {
                for arg in &arg_list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => visit(e),
                        FunctionArg::Named { arg, .. } | FunctionArg::ExprNamed { arg, .. } => {
                            if let FunctionArgExpr::Expr(e) = arg {
                                visit(e);
                            }
                        }
                        _ => {}
                    }
                }
            }
            if let Some(filter) = &func.filter {
                visit(filter);
            }
            if let Some(WindowType::WindowSpec(spec)) = &func.over {
                for e in &spec.partition_by {
                    visit(e);
                }
                for ob in &spec.order_by {
                    visit(&ob.expr);
                }
            }
        }
        Expr::InList { expr, list, .. } => {
            visit(expr);
            for e in list {
                visit(e);
            }
        }
        Expr::InSubquery { expr, .. } => visit(expr),
        Expr::Between {
            expr, low, high, ..
        } => {
            visit(expr);
            visit(low);
            visit(high);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                visit(op);
            }
            for cond in conditions {
                visit(cond);
            }
            for result in results {
                visit(result);
            }
            if let Some(else_r) = else_result {
                visit(else_r);
            }
        }
        Expr::IsNull(e) | Expr::IsNotNull(e) => visit(e),
        Expr::Cast { expr, .. } => visit(expr),
        Expr::Extract { expr, .. } => visit(expr),
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            visit(expr);
            if let Some(from) = substring_from {
                visit(from);
            }
            if let Some(for_expr) = substring_for {
                visit(for_expr);
            }
        }
        Expr::Trim {
            expr, trim_what, ..
        } => {
            visit(expr);
            if let Some(what) = trim_what {
                visit(what);
            }
        }
        Expr::Position { expr, r#in } => {
            visit(expr);
            visit(r#in);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            visit(expr);
            visit(pattern);
        }
        Expr::IsTrue(e) | Expr::IsFalse(e) | Expr::IsNotTrue(e) | Expr::IsNotFalse(e) => visit(e),
        Expr::IsUnknown(e) | Expr::IsNotUnknown(e) => visit(e),
        Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::AtTimeZone {
            timestamp,
            time_zone,
        } => {
            visit(timestamp);
            visit(time_zone);
        }
        Expr::Collate { expr, .. } => visit(expr),
        Expr::Ceil { expr, .. } | Expr::Floor { expr, .. } => visit(expr),
        Expr::Overlay {
            expr,
            overlay_what,
            overlay_from,
            overlay_for,
        } => {
            visit(expr);
            visit(overlay_what);
            visit(overlay_from);
            if let Some(for_expr) = overlay_for {
                visit(for_expr);
            }
        }
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            visit(a);
            visit(b);
        }
        Expr::Tuple(exprs) => {
            for e in exprs {
                visit(e);
            }
        }
        Expr::Array(arr) => {
            for e in &arr.elem {
                visit(e);
            }
        }
        Expr::Subscript { expr, subscript } => {
            visit(expr);
            match subscript.as_ref() {
                Subscript::Index { index } => visit(index),
                Subscript::Slice {
                    lower_bound,
                    upper_bound,
                    stride,
                } => {
                    if let Some(lb) = lower_bound {
                        visit(lb);
                    }
                    if let Some(ub) = upper_bound {
                        visit(ub);
                    }
                    if let Some(s) = stride {
                        visit(s);
                    }
                }
            }
        }
        // Subqueries are opaque here: substitution and collection stop at
        // their boundary (scalar subqueries are lifted before this code runs).
        _ => {}
    }
}

/// Mutable counterpart of [`walk_children`].
fn walk_children_mut(expr: &mut Expr, visit: &mut dyn FnMut(&mut Expr)) {
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::UnaryOp { expr, .. } => visit(expr),
        Expr::Nested(inner) => visit(inner),
        Expr::Function(func) => {
            if let FunctionArguments::List(arg_list) = &mut func.args {
                for arg in &mut arg_list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => visit(e),
                        FunctionArg::Named { arg, .. } | FunctionArg::ExprNamed { arg, .. } => {
                            if let FunctionArgExpr::Expr(e) = arg {
                                visit(e);
                            }
                        }
                        _ => {}
                    }
                }
            }
            if let Some(filter) = &mut func.filter {
                visit(filter);
            }
            if let Some(WindowType::WindowSpec(spec)) = &mut func.over {
                for e in &mut spec.partition_by {
                    visit(e);
                }
                for ob in &mut spec.order_by {
                    visit(&mut ob.expr);
                }
            }
        }
        Expr::InList { expr, list, .. } => {
            visit(expr);
            for e in list {
                visit(e);
            }
        }
        Expr::InSubquery { expr, .. } => visit(expr),
        Expr::Between {
            expr, low, high, ..
        } => {
            visit(expr);
            visit(low);
            visit(high);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                visit(op);
            }
            for cond in conditions {
                visit(cond);
            }
            for result in results {
                visit(result);
            }
            if let Some(else_r) = else_result {
                visit(else_r);
            }
        }
        Expr::IsNull(e) | Expr::IsNotNull(e) => visit(e),
        Expr::Cast { expr, .. } => visit(expr),
        Expr::Extract { expr, .. } => visit(expr),
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            visit(expr);
            if let Some(from) = substring_from {
                visit(from);
            }
            if let Some(for_expr) = substring_for {
                visit(for_expr);
            }
        }
        Expr::Trim {
            expr, trim_what, ..
        } => {
            visit(expr);
            if let Some(what) = trim_what {
                visit(what);
            }
        }
        Expr::Position { expr, r#in } => {
            visit(expr);
            visit(r#in);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            visit(expr);
            visit(pattern);
        }
        Expr::IsTrue(e) | Expr::IsFalse(e) | Expr::IsNotTrue(e) | Expr::IsNotFalse(e) => visit(e),
        Expr::IsUnknown(e) | Expr::IsNotUnknown(e) => visit(e),
        Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::AtTimeZone {
            timestamp,
            time_zone,
        } => {
            visit(timestamp);
            visit(time_zone);
        }
        Expr::Collate { expr, .. } => visit(expr),
        Expr::Ceil { expr, .. } | Expr::Floor { expr, .. } => visit(expr),
        Expr::Overlay {
            expr,
            overlay_what,
            overlay_from,
            overlay_for,
        } => {
            visit(expr);
            visit(overlay_what);
            visit(overlay_from);
            if let Some(for_expr) = overlay_for {
                visit(for_expr);
            }
        }
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            visit(a);
            visit(b);
        }
        Expr::Tuple(exprs) => {
            for e in exprs {
                visit(e);
            }
        }
        Expr::Array(arr) => {
            for e in &mut arr.elem {
                visit(e);
            }
        }
        Expr::Subscript { expr, subscript } => {
            visit(expr);
            match subscript.as_mut() {
                Subscript::Index { index } => visit(index),
                Subscript::Slice {
                    lower_bound,
                    upper_bound,
                    stride,
                } => {
                    if let Some(lb) = lower_bound {
                        visit(lb);
                    }
                    if let Some(ub) = upper_bound {
                        visit(ub);
                    }
                    if let Some(s) = stride {
                        visit(s);
                    }
                }
            }
        }
        _ => {}
    }
}
