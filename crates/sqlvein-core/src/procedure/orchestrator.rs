//! Procedure lineage orchestration
//!
//! Drives decomposition and, per node in sequence order, dispatches to the
//! enhancement pipeline (DML nodes) or to temp-table registration
//! (create-temp-table nodes), threading registry state across nodes. A node
//! that fails contributes no lineage; the run always completes. Records are
//! assembled after every node has been processed, so a late failure cannot
//! leave an early node's output half-emitted.

use serde::Serialize;
use tracing::{info, warn};

use super::registry::TempTableRegistry;
use super::{decompose, NodeKind, ProcedureNode};
use crate::definitions::Definition;
use crate::enhance::{EnhancedLineage, Enhancer};
use crate::facts::{LineageSink, ProcedureFlowFact, ProcedureNodeFact};

/// Outcome of one node of a procedure run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub node: ProcedureNode,
    pub lineage: Option<EnhancedLineage>,
    pub error: Option<String>,
}

impl NodeRecord {
    fn plain(node: ProcedureNode) -> Self {
        Self {
            node,
            lineage: None,
            error: None,
        }
    }
}

/// Result of one procedure run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureLineageResult {
    pub flow: ProcedureFlowFact,
    pub nodes: Vec<NodeRecord>,
}

impl ProcedureLineageResult {
    /// Emit the flow record, then per node its job record followed by its
    /// lineage facts, in node order.
    pub fn emit(&self, sink: &mut dyn LineageSink) -> std::io::Result<()> {
        sink.flow_record(&self.flow)?;
        for record in &self.nodes {
            sink.node_record(&node_fact(&self.flow.name, record))?;
            if let Some(lineage) = &record.lineage {
                lineage.emit(sink)?;
            }
        }
        Ok(())
    }
}

fn node_fact(flow: &str, record: &NodeRecord) -> ProcedureNodeFact {
    ProcedureNodeFact {
        flow: flow.to_string(),
        name: node_name(flow, &record.node),
        kind: record.node.kind.to_string(),
        statement: record.node.statement.clone(),
        created_temp_tables: record.node.created_temp_tables.clone(),
        consumed_temp_tables: record.node.consumed_temp_tables.clone(),
        error: record.error.clone(),
    }
}

fn node_name(flow: &str, node: &ProcedureNode) -> String {
    match node.kind {
        NodeKind::ProcedureStart => format!("{}_start", flow),
        _ => format!("{}_node_{}", flow, node.sequence),
    }
}

/// One procedure-processing run.
///
/// Owns the temp-table registry; must not be shared across concurrent runs.
pub struct ProcedureRun<'a> {
    name: String,
    enhancer: &'a Enhancer,
    registry: TempTableRegistry,
}

impl<'a> ProcedureRun<'a> {
    pub fn new(name: impl Into<String>, enhancer: &'a Enhancer) -> Self {
        Self {
            name: name.into(),
            enhancer,
            registry: TempTableRegistry::new(),
        }
    }

    /// Process a procedure body: decompose, analyze each node in order,
    /// return the complete result set.
    pub fn process(mut self, procedure_sql: &str) -> ProcedureLineageResult {
        let nodes = decompose(procedure_sql, self.enhancer.dialect());
        info!(
            procedure = %self.name,
            nodes = nodes.len(),
            "decomposed procedure"
        );

        let mut records: Vec<NodeRecord> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let record = match node.kind {
                NodeKind::ProcedureStart | NodeKind::Truncate | NodeKind::Unknown => {
                    // Structural markers only; no lineage to compute.
                    NodeRecord::plain(node)
                }
                NodeKind::CreateTempTable | NodeKind::SelectInto => self.create_temp_node(node),
                NodeKind::Insert | NodeKind::Update | NodeKind::Delete | NodeKind::Merge => {
                    self.dml_node(node)
                }
            };
            records.push(record);
        }

        let node_names: Vec<String> = records
            .iter()
            .map(|record| node_name(&self.name, &record.node))
            .collect();

        ProcedureLineageResult {
            flow: ProcedureFlowFact {
                name: self.name.clone(),
                platform: self.enhancer.platform().to_string(),
                node_names,
            },
            nodes: records,
        }
    }

    /// Enhance the creating statement, then register the new table's columns
    /// so later nodes expand through it.
    fn create_temp_node(&mut self, node: ProcedureNode) -> NodeRecord {
        match self
            .enhancer
            .enhance_with(&node.statement, &self.registry.definitions())
        {
            Ok(lineage) => {
                let table = lineage.out_table.table_name().to_string();
                let mut definition = Definition::new(&table);
                for column in &lineage.columns {
                    if let Some(transform) = &column.transform {
                        definition.columns.insert(
                            column.downstream_column.clone(),
                            strip_transform_prefix(transform).to_string(),
                        );
                    }
                }
                self.registry
                    .register(&table, definition, node.sequence, lineage.out_table.clone());
                NodeRecord {
                    node,
                    lineage: Some(lineage),
                    error: None,
                }
            }
            Err(e) => self.failed_node(node, e),
        }
    }

    fn dml_node(&mut self, node: ProcedureNode) -> NodeRecord {
        match self
            .enhancer
            .enhance_with(&node.statement, &self.registry.definitions())
        {
            Ok(lineage) => NodeRecord {
                node,
                lineage: Some(lineage),
                error: None,
            },
            Err(e) => self.failed_node(node, e),
        }
    }

    fn failed_node(&self, node: ProcedureNode, error: crate::error::EnhanceError) -> NodeRecord {
        warn!(
            procedure = %self.name,
            sequence = node.sequence,
            error = %error,
            "node contributes no lineage"
        );
        NodeRecord {
            node,
            lineage: None,
            error: Some(error.to_string()),
        }
    }
}

/// Strip the `COPY: ` / `SQL: ` marker from an enhanced expression.
fn strip_transform_prefix(transform: &str) -> &str {
    transform
        .strip_prefix("COPY: ")
        .or_else(|| transform.strip_prefix("SQL: "))
        .unwrap_or(transform)
}
