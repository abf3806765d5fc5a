//! Sink definitions as seen by the bridge.
//!
//! Definitions are owned by the definition layer; this crate only carries
//! the parts the bridge and the storage repository read.

use serde::{Deserialize, Serialize};

use crate::key::SinkKey;
use crate::types::TableId;

/// A configured destination receiving records from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    pub key: SinkKey,
    pub target: SinkTarget,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Sink {
    /// Create an enabled sink writing into a remote warehouse table.
    #[must_use]
    pub fn keboola_table(key: SinkKey, table_id: impl Into<TableId>, mapping: TableMapping) -> Self {
        Self {
            key,
            target: SinkTarget::KeboolaTable(TableSink {
                table_id: table_id.into(),
                mapping,
            }),
            disabled: false,
            deleted: false,
        }
    }

    /// Whether the sink currently accepts records.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.deleted
    }

    /// The table target, if the sink writes into a remote warehouse table.
    #[must_use]
    pub fn table(&self) -> Option<&TableSink> {
        match &self.target {
            SinkTarget::KeboolaTable(table) => Some(table),
            SinkTarget::Other { .. } => None,
        }
    }
}

/// Where a sink delivers its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkTarget {
    KeboolaTable(TableSink),
    /// A sink type handled by another plugin; the bridge ignores it.
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSink {
    pub table_id: TableId,
    pub mapping: TableMapping,
}

/// Ordered list of table columns with their primary-key flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub columns: Vec<Column>,
}

impl TableMapping {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
        }
    }

    #[must_use]
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: true,
        }
    }
}
