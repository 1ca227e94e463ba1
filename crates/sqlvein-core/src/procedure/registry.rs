//! Temp-table registry
//!
//! The only stateful entity in the core, scoped to one procedure run. Nodes
//! that create temporary tables register their column definitions here; later
//! nodes read them back as additional definitions so transformation logic
//! expands across statement boundaries. The dependency structure this tracks
//! (creating node -> consuming nodes) lives in this id-keyed registry rather
//! than as back-references inside node objects.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::definitions::{Definition, DefinitionCatalog};
use crate::facts::DatasetRef;

/// One registered temporary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempTableEntry {
    pub definition: Definition,
    /// Sequence number of the node that created (or last re-created) it
    pub created_by: usize,
    pub dataset: DatasetRef,
}

/// Lowercase-normalized table name -> entry.
#[derive(Debug, Clone, Default)]
pub struct TempTableRegistry {
    entries: IndexMap<String, TempTableEntry>,
}

impl TempTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a temp table. Re-registration replaces the previous
    /// definition outright; column maps are never merged.
    pub fn register(
        &mut self,
        name: &str,
        definition: Definition,
        created_by: usize,
        dataset: DatasetRef,
    ) {
        self.entries.insert(
            name.to_lowercase(),
            TempTableEntry {
                definition,
                created_by,
                dataset,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&TempTableEntry> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot the registry as a definition catalog for the enhancer.
    ///
    /// Each table is addressable both under its original name and its
    /// lowercase key.
    pub fn definitions(&self) -> DefinitionCatalog {
        let mut catalog = DefinitionCatalog::new();
        for (key, entry) in &self.entries {
            catalog.insert(entry.definition.name.clone(), entry.definition.clone());
            if key != &entry.definition.name {
                catalog.insert(key.clone(), entry.definition.clone());
            }
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn definition(name: &str, columns: &[(&str, &str)]) -> Definition {
        let mut def = Definition::new(name);
        for (col, calc) in columns {
            def.columns.insert(col.to_string(), calc.to_string());
        }
        def
    }

    fn dataset(name: &str) -> DatasetRef {
        DatasetRef::new("postgres", name)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = TempTableRegistry::new();
        registry.register(
            "Tmp_Metrics",
            definition("Tmp_Metrics", &[("a", "y.a")]),
            1,
            dataset("db.s.tmp_metrics"),
        );

        assert!(registry.contains("TMP_METRICS"));
        assert_eq!(registry.get("tmp_metrics").unwrap().created_by, 1);
    }

    #[test]
    fn test_re_registration_replaces_not_merges() {
        let mut registry = TempTableRegistry::new();
        registry.register(
            "t",
            definition("t", &[("a", "x.a"), ("b", "x.b")]),
            1,
            dataset("db.s.t"),
        );
        registry.register("t", definition("t", &[("c", "y.c")]), 3, dataset("db.s.t"));

        let entry = registry.get("t").unwrap();
        assert_eq!(entry.created_by, 3);
        assert_eq!(entry.definition.columns.len(), 1);
        assert!(entry.definition.columns.contains_key("c"));
        assert!(!entry.definition.columns.contains_key("a"));
    }

    #[test]
    fn test_definitions_snapshot() {
        let mut registry = TempTableRegistry::new();
        registry.register(
            "t1",
            definition("t1", &[("a", "y.a")]),
            1,
            dataset("db.s.t1"),
        );
        registry.register(
            "t2",
            definition("t2", &[("b", "t1.a")]),
            2,
            dataset("db.s.t2"),
        );

        let catalog = registry.definitions();
        assert_eq!(catalog["t1"].columns["a"], "y.a");
        assert_eq!(catalog["t2"].columns["b"], "t1.a");
    }
}
