use super::{regular_chunks, ChunkGrid};
use crate::dtype::DataType;
use crate::errors::{ChunkyardError, Result};
use crate::values::ArrayData;
use serde::{Deserialize, Serialize};

/// Shape, chunking and element type of a dense N-dimensional array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayStructure {
    pub data_type: DataType,
    pub chunks: Vec<Vec<usize>>,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<Vec<String>>,
    #[serde(default)]
    pub resizable: bool,
}

impl ArrayStructure {
    pub fn new(data_type: DataType, shape: Vec<usize>, chunks: Vec<Vec<usize>>) -> Result<Self> {
        let structure = Self {
            data_type,
            chunks,
            shape,
            dims: None,
            resizable: false,
        };
        structure.validate()?;
        Ok(structure)
    }

    /// Describe an in-memory array as one chunk spanning each dimension.
    pub fn from_array(array: &ArrayData) -> Self {
        let shape = array.shape().to_vec();
        Self {
            data_type: array.data_type(),
            chunks: shape.iter().map(|&len| vec![len]).collect(),
            shape,
            dims: None,
            resizable: false,
        }
    }

    /// Regular chunking; the last chunk along a dimension may be shorter.
    pub fn with_chunk_shape(
        data_type: DataType,
        shape: Vec<usize>,
        chunk_shape: &[usize],
    ) -> Result<Self> {
        if chunk_shape.len() != shape.len() {
            return Err(ChunkyardError::validation(format!(
                "chunk shape {:?} does not match shape {:?}",
                chunk_shape, shape
            )));
        }
        let chunks = shape
            .iter()
            .zip(chunk_shape)
            .map(|(&len, &chunk)| regular_chunks(len, chunk))
            .collect();
        Self::new(data_type, shape, chunks)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_chunks()?;
        if let Some(dims) = &self.dims {
            if dims.len() != self.shape.len() {
                return Err(ChunkyardError::validation(format!(
                    "{} dimension names given for {} dimensions",
                    dims.len(),
                    self.shape.len()
                )));
            }
        }
        Ok(())
    }
}

impl ChunkGrid for ArrayStructure {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }
}
