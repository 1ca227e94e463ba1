//! Table alias resolution
//!
//! Rewrites the table qualifier of column references from statement-local
//! aliases (`p.base`) to canonical bare table names (`raw_products.base`).
//! This is a pure identity rewrite: bindings never carry columns, and running
//! the resolver twice with the same bindings is a no-op the second time.

use indexmap::IndexMap;
use sqlparser::ast::{Expr, Ident};
use tracing::debug;

use crate::dialect::SqlDialect;
use crate::expr::{parse_standalone_expr, rewrite_expr, serialize_expr};
use crate::facts::DatasetRef;

/// Table alias -> canonical dataset, for one statement.
pub type AliasBindings = IndexMap<String, DatasetRef>;

/// Rewrite alias qualifiers in `text` to canonical bare table names.
///
/// Single pass, no recursion. Qualifiers with no binding are left as-is;
/// unparseable text is returned unchanged.
pub fn resolve_aliases(text: &str, bindings: &AliasBindings, dialect: &SqlDialect) -> String {
    if bindings.is_empty() {
        return text.to_string();
    }

    let mut expr = match parse_standalone_expr(text, dialect) {
        Ok(expr) => expr,
        Err(e) => {
            debug!(error = %e, "transformation logic not parseable; skipping alias resolution");
            return text.to_string();
        }
    };

    let replaced = rewrite_expr(&mut expr, &mut |node| rebind_qualifier(node, bindings));

    if replaced == 0 {
        text.to_string()
    } else {
        serialize_expr(&expr)
    }
}

fn rebind_qualifier(node: &Expr, bindings: &AliasBindings) -> Option<Expr> {
    let Expr::CompoundIdentifier(idents) = node else {
        return None;
    };
    if idents.len() < 2 {
        return None;
    }

    let qualifier_idx = idents.len() - 2;
    let qualifier = &idents[qualifier_idx].value;

    let dataset = bindings
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(qualifier))
        .map(|(_, dataset)| dataset)?;

    let table_name = dataset.table_name();
    if table_name == qualifier {
        // Already canonical: replacing would loop the pass counter for nothing.
        return None;
    }

    let mut rebound = idents.clone();
    rebound[qualifier_idx] = Ident::new(table_name);
    Some(Expr::CompoundIdentifier(rebound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bindings(entries: &[(&str, &str)]) -> AliasBindings {
        entries
            .iter()
            .map(|(alias, name)| (alias.to_string(), DatasetRef::new("postgres", *name)))
            .collect()
    }

    #[test]
    fn test_rewrites_alias_to_bare_table_name() {
        let b = bindings(&[("p", "ecommerce.public.raw_products")]);
        let out = resolve_aliases(
            "COALESCE(AVG(x), p.base)",
            &b,
            &SqlDialect::PostgreSQL,
        );
        assert_eq!(out, "COALESCE(AVG(x), raw_products.base)");
    }

    #[test]
    fn test_idempotent() {
        let b = bindings(&[
            ("p", "ecommerce.public.raw_products"),
            ("oi", "ecommerce.public.raw_order_items"),
        ]);
        let once = resolve_aliases(
            "p.base_price * SUM(oi.quantity)",
            &b,
            &SqlDialect::PostgreSQL,
        );
        let twice = resolve_aliases(&once, &b, &SqlDialect::PostgreSQL);
        assert_eq!(once, twice);
        assert_eq!(once, "raw_products.base_price * SUM(raw_order_items.quantity)");
    }

    #[test]
    fn test_unmatched_qualifier_left_untouched() {
        let b = bindings(&[("p", "db.s.products")]);
        let out = resolve_aliases("x.value + p.base", &b, &SqlDialect::PostgreSQL);
        assert_eq!(out, "x.value + products.base");
    }

    #[test]
    fn test_qualifier_match_is_case_insensitive() {
        let b = bindings(&[("P", "db.s.products")]);
        let out = resolve_aliases("p.base", &b, &SqlDialect::PostgreSQL);
        assert_eq!(out, "products.base");
    }

    #[test]
    fn test_unqualified_refs_untouched() {
        let b = bindings(&[("p", "db.s.products")]);
        let out = resolve_aliases("base + 1", &b, &SqlDialect::PostgreSQL);
        assert_eq!(out, "base + 1");
    }
}
