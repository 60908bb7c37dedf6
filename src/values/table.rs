//! Tabular values: ordered, named, equal-length columns

use crate::errors::{ChunkyardError, Result};
use crate::structures::{ColumnType, Field};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;

/// Values of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Utf8(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> ColumnType {
        match self {
            Column::Int64(_) => ColumnType::Int64,
            Column::Float64(_) => ColumnType::Float64,
            Column::Utf8(_) => ColumnType::Utf8,
            Column::Bool(_) => ColumnType::Bool,
        }
    }

    pub fn empty(data_type: ColumnType) -> Self {
        match data_type {
            ColumnType::Int64 => Column::Int64(Vec::new()),
            ColumnType::Float64 => Column::Float64(Vec::new()),
            ColumnType::Utf8 => Column::Utf8(Vec::new()),
            ColumnType::Bool => Column::Bool(Vec::new()),
        }
    }

    fn slice(&self, rows: Range<usize>) -> Self {
        match self {
            Column::Int64(v) => Column::Int64(v[rows].to_vec()),
            Column::Float64(v) => Column::Float64(v[rows].to_vec()),
            Column::Utf8(v) => Column::Utf8(v[rows].to_vec()),
            Column::Bool(v) => Column::Bool(v[rows].to_vec()),
        }
    }

    fn extend_from(&mut self, other: &Column) -> Result<()> {
        match (self, other) {
            (Column::Int64(a), Column::Int64(b)) => a.extend_from_slice(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend_from_slice(b),
            (Column::Utf8(a), Column::Utf8(b)) => a.extend_from_slice(b),
            (Column::Bool(a), Column::Bool(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(ChunkyardError::validation(format!(
                    "cannot append {:?} column to {:?} column",
                    b.data_type(),
                    a.data_type()
                )))
            }
        }
        Ok(())
    }

    /// Approximate in-memory size, used for response limits
    pub fn nbytes(&self) -> usize {
        match self {
            Column::Int64(v) => v.len() * 8,
            Column::Float64(v) => v.len() * 8,
            Column::Utf8(v) => v.iter().map(String::len).sum(),
            Column::Bool(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedColumn {
    pub name: String,
    pub values: Column,
}

/// An ordered set of named columns with equal row counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct TableData {
    columns: Vec<NamedColumn>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<NamedColumn>,
}

impl TryFrom<RawTable> for TableData {
    type Error = ChunkyardError;

    fn try_from(raw: RawTable) -> Result<Self> {
        TableData::from_named(raw.columns)
    }
}

impl TableData {
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        Self::from_named(
            columns
                .into_iter()
                .map(|(name, values)| NamedColumn {
                    name: name.into(),
                    values,
                })
                .collect(),
        )
    }

    fn from_named(columns: Vec<NamedColumn>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ChunkyardError::validation(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
                return Err(ChunkyardError::validation(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.values.len(),
                    rows
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Zero-row table with the given schema
    pub fn empty(fields: &[Field]) -> Self {
        Self {
            columns: fields
                .iter()
                .map(|f| NamedColumn {
                    name: f.name.clone(),
                    values: Column::empty(f.data_type),
                })
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn columns(&self) -> &[NamedColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }

    pub fn fields(&self) -> Vec<Field> {
        self.columns
            .iter()
            .map(|c| Field {
                name: c.name.clone(),
                data_type: c.values.data_type(),
            })
            .collect()
    }

    /// Keep only `names`, in the requested order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| ChunkyardError::address(format!("no column named '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_named(columns)
    }

    pub fn slice_rows(&self, rows: Range<usize>) -> Result<Self> {
        if rows.start > rows.end || rows.end > self.num_rows() {
            return Err(ChunkyardError::address(format!(
                "row range {:?} is outside a table of {} rows",
                rows,
                self.num_rows()
            )));
        }
        Ok(Self {
            columns: self
                .columns
                .iter()
                .map(|c| NamedColumn {
                    name: c.name.clone(),
                    values: c.values.slice(rows.clone()),
                })
                .collect(),
        })
    }

    /// Append the rows of `parts` in order; all parts must share one schema.
    pub fn concat(parts: &[TableData]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Ok(Self {
                columns: Vec::new(),
            });
        };
        let mut result = first.clone();
        for part in &parts[1..] {
            if part.fields() != result.fields() {
                return Err(ChunkyardError::validation(
                    "cannot concatenate tables with different schemas",
                ));
            }
            for (dst, src) in result.columns.iter_mut().zip(&part.columns) {
                dst.values.extend_from(&src.values)?;
            }
        }
        Ok(result)
    }

    pub fn nbytes(&self) -> usize {
        self.columns.iter().map(|c| c.values.nbytes()).sum()
    }
}
