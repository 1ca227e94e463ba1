//! Lineage facts and the metadata sink boundary
//!
//! Everything the pipeline learns is packaged as plain serializable facts:
//! coarse table-to-table lineage, fine-grained field lineage with the
//! enhanced transformation expression attached, and one query record naming
//! every field the statement touches. A [`LineageSink`] receives them; the
//! core never talks to a metadata store directly.

use std::io::Write;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A dataset identity: platform plus dot-joined `db.schema.table` path.
///
/// Stands in for a full metadata URN; URN construction is the caller's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub platform: String,
    pub name: String,
}

impl DatasetRef {
    pub fn new(platform: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            name: name.into(),
        }
    }

    /// Build a dataset reference from a (possibly already qualified) table
    /// name plus default db/schema context.
    pub fn qualified(
        platform: &str,
        default_db: Option<&str>,
        default_schema: Option<&str>,
        table: &str,
    ) -> Self {
        let name = if table.contains('.') {
            table.to_string()
        } else {
            let mut parts: Vec<&str> = Vec::new();
            if let Some(db) = default_db {
                if !db.is_empty() {
                    parts.push(db);
                }
            }
            if let Some(schema) = default_schema {
                if !schema.is_empty() {
                    parts.push(schema);
                }
            }
            parts.push(table);
            parts.join(".")
        };
        Self::new(platform, name)
    }

    /// The bare table name: the last path segment, without db/schema prefix.
    pub fn table_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

impl std::fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.name)
    }
}

/// A single column of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub dataset: DatasetRef,
    pub column: String,
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.column)
    }
}

/// Coarse-grained lineage: one upstream table feeds one downstream table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLineageFact {
    pub upstream: DatasetRef,
    pub downstream: DatasetRef,
    pub query_fingerprint: String,
}

/// Fine-grained lineage: a set of upstream fields feeds one downstream field,
/// with the readable transformation expression attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineGrainedLineageFact {
    pub upstreams: Vec<FieldRef>,
    pub downstream: FieldRef,
    /// `COPY: <expr>` for direct copies, `SQL: <expr>` for computed columns
    pub transform: Option<String>,
    pub query_fingerprint: String,
    pub confidence: f64,
}

/// Identity record for the originating query and every field it touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub fingerprint: String,
    pub statement: String,
    /// Datasets and fields involved, in first-seen order
    pub subjects: Vec<String>,
}

impl QueryRecord {
    pub fn new(statement: &str, subjects: IndexSet<String>) -> Self {
        Self {
            fingerprint: fingerprint(statement),
            statement: statement.to_string(),
            subjects: subjects.into_iter().collect(),
        }
    }
}

/// Flow-level record for one procedure run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureFlowFact {
    pub name: String,
    pub platform: String,
    pub node_names: Vec<String>,
}

/// Job-level record for one node of a procedure run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureNodeFact {
    pub flow: String,
    pub name: String,
    pub kind: String,
    pub statement: String,
    pub created_temp_tables: Vec<String>,
    pub consumed_temp_tables: Vec<String>,
    /// Error message when this node contributed no lineage
    pub error: Option<String>,
}

/// Deterministic fingerprint of a query text (FNV-1a, hex).
///
/// Stable across runs so re-emitting the same query yields the same identity.
pub fn fingerprint(text: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in text.trim().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", hash)
}

/// Receiver of lineage facts.
///
/// Implementations are expected to be idempotent per fact; the core only
/// consumes success/failure.
pub trait LineageSink {
    fn table_lineage(&mut self, fact: &TableLineageFact) -> std::io::Result<()>;
    fn fine_grained(&mut self, fact: &FineGrainedLineageFact) -> std::io::Result<()>;
    fn query_record(&mut self, record: &QueryRecord) -> std::io::Result<()>;
    fn flow_record(&mut self, record: &ProcedureFlowFact) -> std::io::Result<()>;
    fn node_record(&mut self, record: &ProcedureNodeFact) -> std::io::Result<()>;
}

/// In-memory sink, for tests and for callers that post-process facts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub table_lineage: Vec<TableLineageFact>,
    pub fine_grained: Vec<FineGrainedLineageFact>,
    pub query_records: Vec<QueryRecord>,
    pub flow_records: Vec<ProcedureFlowFact>,
    pub node_records: Vec<ProcedureNodeFact>,
}

impl LineageSink for RecordingSink {
    fn table_lineage(&mut self, fact: &TableLineageFact) -> std::io::Result<()> {
        self.table_lineage.push(fact.clone());
        Ok(())
    }

    fn fine_grained(&mut self, fact: &FineGrainedLineageFact) -> std::io::Result<()> {
        self.fine_grained.push(fact.clone());
        Ok(())
    }

    fn query_record(&mut self, record: &QueryRecord) -> std::io::Result<()> {
        self.query_records.push(record.clone());
        Ok(())
    }

    fn flow_record(&mut self, record: &ProcedureFlowFact) -> std::io::Result<()> {
        self.flow_records.push(record.clone());
        Ok(())
    }

    fn node_record(&mut self, record: &ProcedureNodeFact) -> std::io::Result<()> {
        self.node_records.push(record.clone());
        Ok(())
    }
}

/// Tagged wire form for [`JsonLinesSink`].
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FactLine<'a> {
    TableLineage(&'a TableLineageFact),
    FineGrained(&'a FineGrainedLineageFact),
    Query(&'a QueryRecord),
    Flow(&'a ProcedureFlowFact),
    Node(&'a ProcedureNodeFact),
}

/// Sink that writes one JSON object per fact to a writer.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    fn write_line(&mut self, line: &FactLine<'_>) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")
    }
}

impl<W: Write> LineageSink for JsonLinesSink<W> {
    fn table_lineage(&mut self, fact: &TableLineageFact) -> std::io::Result<()> {
        self.write_line(&FactLine::TableLineage(fact))
    }

    fn fine_grained(&mut self, fact: &FineGrainedLineageFact) -> std::io::Result<()> {
        self.write_line(&FactLine::FineGrained(fact))
    }

    fn query_record(&mut self, record: &QueryRecord) -> std::io::Result<()> {
        self.write_line(&FactLine::Query(record))
    }

    fn flow_record(&mut self, record: &ProcedureFlowFact) -> std::io::Result<()> {
        self.write_line(&FactLine::Flow(record))
    }

    fn node_record(&mut self, record: &ProcedureNodeFact) -> std::io::Result<()> {
        self.write_line(&FactLine::Node(record))
    }
}
