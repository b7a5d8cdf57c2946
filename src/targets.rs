use crate::schema::{ReferenceData, TargetTableSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DISBURSEMENT_TARGETS: &str = "disbursement";
pub const COLLECTION_TARGETS: &str = "collection";

pub const MONTHLY_TARGET: &str = "monthly";
pub const MTD_TARGET: &str = "mtd";
pub const COLLECTION_TARGET: &str = "collection";

/// Per-branch target values for one business metric.
///
/// A branch without an entry has no target at all; it is never treated as a zero target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    pub name: String,
    pub columns: Vec<String>,
    entries: BTreeMap<String, BTreeMap<String, f64>>,
}

impl TargetTable {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_spec(name: &str, spec: &TargetTableSpec) -> Self {
        let mut table = Self::new(name, spec.columns.clone());
        for (branch, values) in &spec.entries {
            table.insert(branch, values.clone());
        }
        table
    }

    pub fn with_entry(mut self, branch: &str, values: &[(&str, f64)]) -> Self {
        let values = values
            .iter()
            .map(|(column, value)| (column.to_string(), *value))
            .collect();
        self.insert(branch, values);
        self
    }

    pub fn insert(&mut self, branch: &str, values: BTreeMap<String, f64>) {
        self.entries.insert(branch.trim().to_string(), values);
    }

    pub fn entry(&self, branch: &str) -> Option<&BTreeMap<String, f64>> {
        self.entries.get(branch)
    }

    pub fn value(&self, branch: &str, column: &str) -> Option<f64> {
        self.entries.get(branch).and_then(|v| v.get(column)).copied()
    }

    pub fn contains(&self, branch: &str) -> bool {
        self.entries.contains_key(branch)
    }

    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only lookup of every target table known to the report.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    tables: BTreeMap<String, TargetTable>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reference(reference: &ReferenceData) -> Self {
        let tables = reference
            .targets
            .iter()
            .map(|(name, spec)| (name.clone(), TargetTable::from_spec(name, spec)))
            .collect();
        Self { tables }
    }

    pub fn with_table(mut self, table: TargetTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TargetTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
