// Integration tests for the lineage enhancement pipeline
use sqlvein_core::definitions::Definition;
use sqlvein_core::expand::{expand_expression, DEFAULT_MAX_DEPTH};
use sqlvein_core::{
    AliasBindings, DatasetRef, DefinitionCatalog, EnhanceError, EnhanceOptions, Enhancer,
    RecordingSink, SqlDialect,
};

fn enhancer() -> Enhancer {
    Enhancer::new("postgres", SqlDialect::PostgreSQL)
        .with_defaults(Some("ecommerce"), Some("public"))
}

fn definition(name: &str, columns: &[(&str, &str)]) -> Definition {
    let mut def = Definition::new(name);
    for (col, calc) in columns {
        def.columns.insert(col.to_string(), calc.to_string());
    }
    def
}

// The optimizer introduces `_u_0` with `_col_0 = AVG(x)`; the raw expression
// `COALESCE(_u_0._col_0, p.base)` must come back readable with the alias
// resolved from its source table.
#[test]
fn scenario_correlated_subquery_placeholder() {
    let mut defs = DefinitionCatalog::new();
    defs.insert("_u_0".to_string(), definition("_u_0", &[("_col_0", "AVG(x)")]));

    let expanded = expand_expression(
        "COALESCE(_u_0._col_0, p.base)",
        &defs,
        &SqlDialect::PostgreSQL,
        DEFAULT_MAX_DEPTH,
    );
    assert_eq!(expanded, "COALESCE(AVG(x), p.base)");

    let mut bindings = AliasBindings::new();
    bindings.insert(
        "p".to_string(),
        DatasetRef::new("postgres", "ecommerce.public.p_table"),
    );
    let resolved =
        sqlvein_core::aliases::resolve_aliases(&expanded, &bindings, &SqlDialect::PostgreSQL);
    assert_eq!(resolved, "COALESCE(AVG(x), p_table.base)");
}

// End-to-end version of the same shape, through the whole pipeline.
#[test]
fn scenario_correlated_subquery_end_to_end() {
    let result = enhancer()
        .enhance(
            "INSERT INTO staging_product_metrics (product_id, avg_price_last_30d) \
             SELECT p.product_id, \
                    COALESCE((SELECT AVG(new_price) FROM raw_price_history ph \
                              WHERE ph.product_id = p.product_id), p.base_price) \
             FROM raw_products p",
        )
        .unwrap();

    let avg = &result.columns[1];
    assert_eq!(
        avg.transform.as_deref(),
        Some("SQL: COALESCE(AVG(raw_price_history.new_price), raw_products.base_price)")
    );
    // The subquery's source table participates in column lineage.
    assert!(avg
        .upstreams
        .iter()
        .any(|f| f.dataset.table_name() == "raw_price_history" && f.column == "new_price"));
}

// A CTE with a declared column list, referenced under a FROM alias.
#[test]
fn scenario_cte_expansion() {
    let result = enhancer()
        .enhance(
            "INSERT INTO product_metrics \
             WITH price_avg (product_id, avg_price) AS \
               (SELECT product_id, AVG(new_price) FROM price_history GROUP BY product_id) \
             SELECT pa.product_id, pa.avg_price FROM price_avg pa",
        )
        .unwrap();

    assert_eq!(
        result.columns[1].transform.as_deref(),
        Some("SQL: AVG(price_history.new_price)")
    );
    assert_eq!(
        result.columns[1].upstreams[0].dataset.table_name(),
        "price_history"
    );
}

// A reference to an alias tracked nowhere must pass through unmodified.
#[test]
fn scenario_untracked_alias_is_untouched() {
    let defs = DefinitionCatalog::new();
    let text = "mystery.column_a + 1";
    assert_eq!(
        expand_expression(text, &defs, &SqlDialect::PostgreSQL, DEFAULT_MAX_DEPTH),
        text
    );
    assert_eq!(
        sqlvein_core::aliases::resolve_aliases(
            text,
            &AliasBindings::new(),
            &SqlDialect::PostgreSQL
        ),
        text
    );
}

#[test]
fn table_error_is_fatal_column_error_is_not() {
    // No output table: precondition failure.
    assert!(matches!(
        enhancer().enhance("SELECT a FROM t"),
        Err(EnhanceError::NoOutputTable)
    ));

    // An unresolvable column alias degrades, it does not fail.
    let result = enhancer()
        .enhance("INSERT INTO t SELECT ghost.v FROM real_table r")
        .unwrap();
    assert!(result.columns[0].upstreams.is_empty());
    assert!(!result.issues.is_empty());
    assert!(result.confidence < 1.0);
}

#[test]
fn disabled_options_keep_raw_logic() {
    let sql = "INSERT INTO out_table \
               WITH c AS (SELECT id, SUM(v) AS total FROM src GROUP BY id) \
               SELECT c.total FROM c";

    let result = enhancer()
        .with_options(EnhanceOptions {
            expand_definitions: false,
            resolve_aliases: false,
            max_depth: DEFAULT_MAX_DEPTH,
        })
        .enhance(sql)
        .unwrap();

    assert_eq!(result.columns[0].transform.as_deref(), Some("COPY: c.total"));
}

#[test]
fn emitted_facts_reference_the_query_fingerprint() {
    let sql = "INSERT INTO downstream SELECT u.id FROM upstream u";
    let result = enhancer().enhance(sql).unwrap();

    let mut sink = RecordingSink::default();
    result.emit(&mut sink).unwrap();

    let fp = &sink.query_records[0].fingerprint;
    assert!(sink.table_lineage.iter().all(|f| f.query_fingerprint == *fp));
    assert!(sink.fine_grained.iter().all(|f| f.query_fingerprint == *fp));

    // Same text, same fingerprint on re-run.
    let again = enhancer().enhance(sql).unwrap();
    assert_eq!(again.query.fingerprint, *fp);
}

#[test]
fn self_lineage_is_skipped_on_emit() {
    let result = enhancer()
        .enhance("INSERT INTO t SELECT t.id + 1 FROM t")
        .unwrap();

    let mut sink = RecordingSink::default();
    result.emit(&mut sink).unwrap();
    assert!(sink.table_lineage.is_empty());
}
