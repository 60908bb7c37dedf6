//! Structure descriptors
//!
//! Pure, serializable descriptions of the shape and chunking of one dataset.
//! Each structure family has its own descriptor; [`Structure`] closes over the
//! four so a data source can carry any of them.

pub mod array;
pub mod awkward;
pub mod sparse;
pub mod table;

pub use array::ArrayStructure;
pub use awkward::AwkwardStructure;
pub use sparse::COOStructure;
pub use table::{ColumnType, Field, TableStructure};

use crate::errors::{ChunkyardError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureFamily {
    Array,
    Table,
    Sparse,
    Awkward,
}

impl StructureFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureFamily::Array => "array",
            StructureFamily::Table => "table",
            StructureFamily::Sparse => "sparse",
            StructureFamily::Awkward => "awkward",
        }
    }
}

impl fmt::Display for StructureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StructureFamily {
    type Err = ChunkyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "array" => Ok(StructureFamily::Array),
            "table" => Ok(StructureFamily::Table),
            "sparse" => Ok(StructureFamily::Sparse),
            "awkward" => Ok(StructureFamily::Awkward),
            other => Err(ChunkyardError::validation(format!(
                "unknown structure family '{}'",
                other
            ))),
        }
    }
}

/// Structure descriptor of any family
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Structure {
    Array(ArrayStructure),
    Table(TableStructure),
    Sparse(COOStructure),
    Awkward(AwkwardStructure),
}

impl Structure {
    pub fn family(&self) -> StructureFamily {
        match self {
            Structure::Array(_) => StructureFamily::Array,
            Structure::Table(_) => StructureFamily::Table,
            Structure::Sparse(_) => StructureFamily::Sparse,
            Structure::Awkward(_) => StructureFamily::Awkward,
        }
    }

    /// Decode a descriptor whose type is given by the family tag stored next to it.
    pub fn from_json(family: StructureFamily, value: JsonValue) -> Result<Self> {
        let structure = match family {
            StructureFamily::Array => Structure::Array(serde_json::from_value(value)?),
            StructureFamily::Table => Structure::Table(serde_json::from_value(value)?),
            StructureFamily::Sparse => Structure::Sparse(serde_json::from_value(value)?),
            StructureFamily::Awkward => Structure::Awkward(serde_json::from_value(value)?),
        };
        Ok(structure)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Structure::Array(s) => s.validate(),
            Structure::Table(s) => s.validate(),
            Structure::Sparse(s) => s.validate(),
            Structure::Awkward(s) => s.validate(),
        }
    }
}

/// Chunk layout shared by the dense and sparse array descriptors
///
/// `chunks()[d]` lists the lengths of the chunks along dimension `d`; a block
/// index picks one chunk per dimension.
pub trait ChunkGrid {
    fn shape(&self) -> &[usize];
    fn chunks(&self) -> &[Vec<usize>];

    fn ndim(&self) -> usize {
        self.shape().len()
    }

    fn nchunks_per_dim(&self) -> Vec<usize> {
        self.chunks().iter().map(Vec::len).collect()
    }

    fn nchunks(&self) -> usize {
        self.nchunks_per_dim().iter().product()
    }

    /// Valid block indices along each dimension
    fn block_ranges(&self) -> Vec<Range<usize>> {
        self.nchunks_per_dim().into_iter().map(|n| 0..n).collect()
    }

    fn validate_chunks(&self) -> Result<()> {
        if self.chunks().len() != self.shape().len() {
            return Err(ChunkyardError::validation(format!(
                "chunks describe {} dimensions but shape has {}",
                self.chunks().len(),
                self.shape().len()
            )));
        }
        for (dim, (chunks, &len)) in self.chunks().iter().zip(self.shape()).enumerate() {
            let covered: usize = chunks.iter().sum();
            if covered != len {
                return Err(ChunkyardError::validation(format!(
                    "chunks along dimension {} cover {} elements but shape is {}",
                    dim, covered, len
                )));
            }
            if chunks.is_empty() {
                return Err(ChunkyardError::validation(format!(
                    "dimension {} has no chunks",
                    dim
                )));
            }
        }
        Ok(())
    }

    fn check_block(&self, block: &[usize]) -> Result<()> {
        if block.len() != self.ndim() {
            return Err(ChunkyardError::address(format!(
                "block {:?} has {} indices, expected {}",
                block,
                block.len(),
                self.ndim()
            )));
        }
        for (dim, (&index, chunks)) in block.iter().zip(self.chunks()).enumerate() {
            if index >= chunks.len() {
                return Err(ChunkyardError::address(format!(
                    "block {:?} is outside the chunk grid: dimension {} has {} chunks",
                    block,
                    dim,
                    chunks.len()
                )));
            }
        }
        Ok(())
    }

    /// Element ranges covered by `block` along each dimension
    fn block_offsets(&self, block: &[usize]) -> Result<Vec<Range<usize>>> {
        self.check_block(block)?;
        Ok(block
            .iter()
            .zip(self.chunks())
            .map(|(&index, chunks)| {
                let start: usize = chunks[..index].iter().sum();
                start..start + chunks[index]
            })
            .collect())
    }

    fn block_shape(&self, block: &[usize]) -> Result<Vec<usize>> {
        self.check_block(block)?;
        Ok(block
            .iter()
            .zip(self.chunks())
            .map(|(&index, chunks)| chunks[index])
            .collect())
    }

    /// Every block index in C order
    fn blocks(&self) -> Vec<Vec<usize>> {
        cartesian(&self.block_ranges())
    }

    /// Blocks whose element ranges intersect `bounds`
    fn blocks_overlapping(&self, bounds: &[Range<usize>]) -> Vec<Vec<usize>> {
        let per_dim: Vec<Vec<usize>> = self
            .chunks()
            .iter()
            .zip(bounds)
            .map(|(chunks, bound)| {
                let mut start = 0;
                let mut hits = Vec::new();
                for (index, &len) in chunks.iter().enumerate() {
                    let end = start + len;
                    if start < bound.end && bound.start < end {
                        hits.push(index);
                    }
                    start = end;
                }
                hits
            })
            .collect();
        if per_dim.iter().any(Vec::is_empty) {
            return Vec::new();
        }
        let ranges: Vec<Range<usize>> = per_dim.iter().map(|hits| 0..hits.len()).collect();
        cartesian(&ranges)
            .into_iter()
            .map(|pick| {
                pick.iter()
                    .zip(&per_dim)
                    .map(|(&i, hits)| hits[i])
                    .collect()
            })
            .collect()
    }

    /// Block containing element `index`
    fn block_of(&self, index: &[usize]) -> Option<Vec<usize>> {
        index
            .iter()
            .zip(self.chunks())
            .map(|(&i, chunks)| {
                let mut end = 0;
                chunks.iter().position(|&len| {
                    end += len;
                    i < end
                })
            })
            .collect()
    }
}

/// Regular chunk lengths for a dimension of `len` elements
pub fn regular_chunks(len: usize, chunk: usize) -> Vec<usize> {
    if len == 0 || chunk == 0 {
        return vec![len];
    }
    let mut chunks = vec![chunk; len / chunk];
    if len % chunk != 0 {
        chunks.push(len % chunk);
    }
    chunks
}

fn cartesian(ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::with_capacity(ranges.len())];
    for range in ranges {
        let mut next = Vec::with_capacity(result.len() * range.len());
        for prefix in &result {
            for i in range.clone() {
                let mut item = prefix.clone();
                item.push(i);
                next.push(item);
            }
        }
        result = next;
    }
    result
}
