//! Internally managed COO sparse arrays, one JSON file per chunk
//!
//! Each chunk file holds the chunk-local coordinates and values of the entries
//! falling inside that chunk.

use super::{block_file_name, read_optional, require_root, write_atomic, SparseAdapter, DATA_URI};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{NdSlice, ResolvedDim};
use crate::structures::{COOStructure, ChunkGrid, Structure};
use crate::values::CooData;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChunkEntries {
    coords: Vec<Vec<usize>>,
    data: Vec<f64>,
}

pub struct SparseChunksAdapter {
    root: PathBuf,
    structure: COOStructure,
}

impl SparseChunksAdapter {
    pub fn new(root: PathBuf, structure: COOStructure) -> Self {
        Self { root, structure }
    }

    pub fn from_data_source(data_source: &DataSource) -> Result<Self> {
        match &data_source.structure {
            Structure::Sparse(structure) => Ok(Self::new(
                data_source.asset_path(DATA_URI)?,
                structure.clone(),
            )),
            other => Err(ChunkyardError::CatalogCorrupted(format!(
                "sparse chunk storage cannot serve {} data",
                other.family()
            ))),
        }
    }

    fn chunk_path(&self, block: &[usize]) -> PathBuf {
        self.root.join(block_file_name(block, Some("json")))
    }

    /// Entries of one chunk in chunk-local coordinates
    async fn load_block(&self, block: &[usize]) -> Result<CooData> {
        let shape = self.structure.block_shape(block)?;
        let path = self.chunk_path(block);
        require_root(&self.root).await?;
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(CooData::empty(shape));
        };
        let entries: ChunkEntries = serde_json::from_slice(&bytes)
            .map_err(|e| ChunkyardError::storage(path.display(), e))?;
        CooData::new(shape, entries.coords, entries.data)
            .map_err(|e| ChunkyardError::storage(path.display(), e))
    }

    async fn store_block(&self, block: &[usize], coo: &CooData) -> Result<()> {
        require_root(&self.root).await?;
        let entries = ChunkEntries {
            coords: coo.coords.clone(),
            data: coo.data.clone(),
        };
        write_atomic(&self.chunk_path(block), &serde_json::to_vec(&entries)?).await?;
        debug!(root = %self.root.display(), ?block, nnz = coo.nnz(), "wrote sparse chunk");
        Ok(())
    }

    /// Split a full-shape value into chunk-local pieces, one per chunk.
    fn split(&self, coo: &CooData) -> Result<Vec<(Vec<usize>, CooData)>> {
        let mut pieces: HashMap<Vec<usize>, CooData> = HashMap::new();
        for block in self.structure.blocks() {
            let shape = self.structure.block_shape(&block)?;
            pieces.insert(block, CooData::empty(shape));
        }
        for k in 0..coo.nnz() {
            let coordinate = coo.coordinate(k);
            let block = self.structure.block_of(&coordinate).ok_or_else(|| {
                ChunkyardError::validation(format!(
                    "coordinate {:?} falls outside the chunk grid",
                    coordinate
                ))
            })?;
            let offsets = self.structure.block_offsets(&block)?;
            let piece = pieces.get_mut(&block).ok_or_else(|| {
                ChunkyardError::validation(format!("block {:?} is not in the chunk grid", block))
            })?;
            for (d, (c, range)) in coordinate.iter().zip(&offsets).enumerate() {
                piece.coords[d].push(c - range.start);
            }
            piece.data.push(coo.data[k]);
        }
        let mut pieces: Vec<_> = pieces.into_iter().collect();
        pieces.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pieces)
    }
}

#[async_trait]
impl SparseAdapter for SparseChunksAdapter {
    fn structure(&self) -> &COOStructure {
        &self.structure
    }

    async fn read(&self, slice: &NdSlice) -> Result<CooData> {
        let dims = slice.resolve(&self.structure.shape)?;
        let bounds: Vec<Range<usize>> = dims.iter().map(ResolvedDim::bounds).collect();
        require_root(&self.root).await?;
        let blocks = if dims.iter().any(ResolvedDim::is_empty) {
            Vec::new()
        } else {
            self.structure.blocks_overlapping(&bounds)
        };
        let chunks = try_join_all(blocks.iter().map(|block| self.load_block(block))).await?;

        let mut gathered = CooData::empty(self.structure.shape.clone());
        for (block, chunk) in blocks.iter().zip(&chunks) {
            let offsets = self.structure.block_offsets(block)?;
            for k in 0..chunk.nnz() {
                for (d, range) in offsets.iter().enumerate() {
                    gathered.coords[d].push(chunk.coords[d][k] + range.start);
                }
                gathered.data.push(chunk.data[k]);
            }
        }
        Ok(gathered.slice_resolved(&dims))
    }

    async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<CooData> {
        self.load_block(block).await?.slice(slice)
    }

    async fn write(&self, data: &CooData) -> Result<()> {
        data.validate()?;
        if data.shape != self.structure.shape {
            return Err(ChunkyardError::validation(format!(
                "sparse value has shape {:?}, structure declares {:?}",
                data.shape, self.structure.shape
            )));
        }
        let pieces = self.split(data)?;
        require_root(&self.root).await?;
        try_join_all(
            pieces
                .iter()
                .map(|(block, piece)| self.store_block(block, piece)),
        )
        .await?;
        Ok(())
    }

    async fn write_block(&self, data: &CooData, block: &[usize]) -> Result<()> {
        let shape = self.structure.block_shape(block)?;
        data.validate()?;
        if data.shape != shape {
            return Err(ChunkyardError::validation(format!(
                "block {:?} has shape {:?}, value has shape {:?}",
                block, shape, data.shape
            )));
        }
        self.store_block(block, data).await
    }
}
