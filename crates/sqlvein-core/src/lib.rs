//! sqlvein-core: column-level SQL lineage extraction
//!
//! This library parses SQL text, resolves column-level lineage, and produces
//! a readable transformation expression for every output column: real
//! calculations like `SUM(order_items.quantity)` instead of optimizer
//! placeholders (`_u_0._col_0`) or raw table aliases (`p.product_id`).
//! Multi-statement procedures are decomposed into typed nodes with temp-table
//! tracking across statements.

pub mod aliases;
pub mod definitions;
pub mod dialect;
pub mod enhance;
pub mod error;
pub mod expand;
pub mod expr;
pub mod facts;
pub mod lineage;
pub mod procedure;
pub mod unnest;

pub use aliases::AliasBindings;
pub use definitions::{Definition, DefinitionCatalog};
pub use dialect::SqlDialect;
pub use enhance::{EnhanceOptions, EnhancedLineage, Enhancer};
pub use error::{EnhanceError, Issue, Severity};
pub use facts::{
    DatasetRef, FieldRef, FineGrainedLineageFact, JsonLinesSink, LineageSink, QueryRecord,
    RecordingSink, TableLineageFact,
};
pub use lineage::{ColumnLineage, StatementLineage};
pub use procedure::{NodeKind, ProcedureLineageResult, ProcedureNode, ProcedureRun};
