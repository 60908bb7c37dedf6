//! In-memory values exchanged with adapters
//!
//! One value type per structure family, plus [`DataValue`] which closes over
//! all four for code that dispatches on the family at runtime.

pub mod array;
pub mod awkward;
pub mod sparse;
pub mod table;

pub use array::ArrayData;
pub use awkward::AwkwardBuffers;
pub use sparse::CooData;
pub use table::{Column, NamedColumn, TableData};

use crate::errors::{ChunkyardError, Result};
use crate::structures::StructureFamily;

/// A value of any structure family
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Array(ArrayData),
    Table(TableData),
    Sparse(CooData),
    Awkward(AwkwardBuffers),
}

impl DataValue {
    pub fn family(&self) -> StructureFamily {
        match self {
            DataValue::Array(_) => StructureFamily::Array,
            DataValue::Table(_) => StructureFamily::Table,
            DataValue::Sparse(_) => StructureFamily::Sparse,
            DataValue::Awkward(_) => StructureFamily::Awkward,
        }
    }

    pub fn nbytes(&self) -> usize {
        match self {
            DataValue::Array(a) => a.nbytes(),
            DataValue::Table(t) => t.nbytes(),
            DataValue::Sparse(s) => s.nbytes(),
            DataValue::Awkward(b) => b.nbytes(),
        }
    }

    pub fn into_array(self) -> Result<ArrayData> {
        match self {
            DataValue::Array(a) => Ok(a),
            other => Err(family_mismatch(StructureFamily::Array, &other)),
        }
    }

    pub fn into_table(self) -> Result<TableData> {
        match self {
            DataValue::Table(t) => Ok(t),
            other => Err(family_mismatch(StructureFamily::Table, &other)),
        }
    }

    pub fn into_sparse(self) -> Result<CooData> {
        match self {
            DataValue::Sparse(s) => Ok(s),
            other => Err(family_mismatch(StructureFamily::Sparse, &other)),
        }
    }

    pub fn into_awkward(self) -> Result<AwkwardBuffers> {
        match self {
            DataValue::Awkward(b) => Ok(b),
            other => Err(family_mismatch(StructureFamily::Awkward, &other)),
        }
    }
}

fn family_mismatch(expected: StructureFamily, found: &DataValue) -> ChunkyardError {
    ChunkyardError::validation(format!(
        "expected {} data, found {} data",
        expected,
        found.family()
    ))
}
