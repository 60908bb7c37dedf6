use crate::errors::{ChunkyardError, Result};
use crate::values::TableData;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int64,
    Float64,
    Utf8,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Schema and row-wise partitioning of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    pub columns: Vec<Field>,
    pub npartitions: usize,
    #[serde(default)]
    pub resizable: bool,
}

impl TableStructure {
    pub fn new(columns: Vec<Field>, npartitions: usize) -> Result<Self> {
        let structure = Self {
            columns,
            npartitions,
            resizable: false,
        };
        structure.validate()?;
        Ok(structure)
    }

    pub fn from_table(table: &TableData, npartitions: usize) -> Self {
        Self {
            columns: table.fields(),
            npartitions: npartitions.max(1),
            resizable: false,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|f| f.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|f| f.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.columns {
            if !seen.insert(field.name.as_str()) {
                return Err(ChunkyardError::validation(format!(
                    "duplicate column name '{}'",
                    field.name
                )));
            }
        }
        if self.npartitions == 0 {
            return Err(ChunkyardError::validation(
                "a table needs at least one partition",
            ));
        }
        Ok(())
    }

    pub fn check_partition(&self, partition: usize) -> Result<()> {
        if partition >= self.npartitions {
            return Err(ChunkyardError::address(format!(
                "partition {} is out of range: table has {} partitions",
                partition, self.npartitions
            )));
        }
        Ok(())
    }

    /// Verify `table` has exactly this schema, in order.
    pub fn check_schema(&self, table: &TableData) -> Result<()> {
        let fields = table.fields();
        if fields != self.columns {
            return Err(ChunkyardError::validation(format!(
                "table columns {:?} do not match declared columns {:?}",
                fields, self.columns
            )));
        }
        Ok(())
    }
}
