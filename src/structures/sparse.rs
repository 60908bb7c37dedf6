use super::{regular_chunks, ChunkGrid};
use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Dense logical shape and chunking of a COO sparse array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct COOStructure {
    pub shape: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<Vec<String>>,
    #[serde(default)]
    pub resizable: bool,
}

impl COOStructure {
    pub fn new(shape: Vec<usize>, chunks: Vec<Vec<usize>>) -> Result<Self> {
        let structure = Self {
            shape,
            chunks,
            dims: None,
            resizable: false,
        };
        structure.validate()?;
        Ok(structure)
    }

    pub fn with_chunk_shape(shape: Vec<usize>, chunk_shape: &[usize]) -> Result<Self> {
        let chunks = shape
            .iter()
            .zip(chunk_shape)
            .map(|(&len, &chunk)| regular_chunks(len, chunk))
            .collect();
        Self::new(shape, chunks)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_chunks()
    }
}

impl ChunkGrid for COOStructure {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }
}
