//! Recursive expansion of definition-backed column references
//!
//! Given transformation-logic text and a [`DefinitionCatalog`], replaces every
//! reference that resolves through the catalog with its defining calculation,
//! repeating to a depth bound so nested definitions (a CTE built on a CTE, a
//! temp table built on a temp table) flatten into one readable expression.

use sqlparser::ast::Expr;
use tracing::debug;

use crate::definitions::DefinitionCatalog;
use crate::dialect::SqlDialect;
use crate::expr::{parse_standalone_expr, rewrite_expr, serialize_expr, ColumnRefParts};

/// Default bound on nested definition substitutions.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Expand definition-backed references in `text`, to `max_depth` levels.
///
/// Each pass parses the text, substitutes every reference whose qualifier is
/// a catalog key and whose column the definition exports, and re-runs on the
/// result while anything changed and depth remains. A substituted subtree is
/// not revisited within its pass, so a self-referential definition degrades
/// into an unexpanded remainder instead of looping. Unresolvable references
/// and malformed defining expressions are left in place.
pub fn expand_expression(
    text: &str,
    definitions: &DefinitionCatalog,
    dialect: &SqlDialect,
    max_depth: usize,
) -> String {
    if definitions.is_empty() || max_depth == 0 {
        return text.to_string();
    }

    let mut expr = match parse_standalone_expr(text, dialect) {
        Ok(expr) => expr,
        Err(e) => {
            debug!(error = %e, "transformation logic not parseable; skipping expansion");
            return text.to_string();
        }
    };

    let replaced = rewrite_expr(&mut expr, &mut |node| {
        substitution_for(node, definitions, dialect)
    });

    if replaced == 0 {
        return text.to_string();
    }

    let result = serialize_expr(&expr);
    if max_depth > 1 {
        expand_expression(&result, definitions, dialect, max_depth - 1)
    } else {
        result
    }
}

/// The replacement for one reference node, if it resolves through the catalog.
fn substitution_for(
    node: &Expr,
    definitions: &DefinitionCatalog,
    dialect: &SqlDialect,
) -> Option<Expr> {
    let parts = ColumnRefParts::from_expr(node)?;
    // Unqualified references may be genuine base-table columns; never touched.
    let qualifier = parts.qualifier?;
    let column = parts.column;

    if let Some(def) = definitions.get(&qualifier) {
        let calculation = def.columns.get(&column)?;
        return parse_replacement(calculation, dialect);
    }

    // Optimizer flattening artifact: the qualifier is itself a column name
    // exported by some definition. First exporter in catalog order wins.
    for def in definitions.values() {
        if let Some(calculation) = def.columns.get(&qualifier) {
            debug!(
                qualifier = %qualifier,
                definition = %def.name,
                "qualifier resolved as exported column"
            );
            return parse_replacement(calculation, dialect);
        }
    }

    None
}

fn parse_replacement(calculation: &str, dialect: &SqlDialect) -> Option<Expr> {
    match parse_standalone_expr(calculation, dialect) {
        Ok(expr) => Some(expr),
        Err(e) => {
            debug!(calculation = %calculation, error = %e, "defining expression not parseable; skipped");
            None
        }
    }
}
