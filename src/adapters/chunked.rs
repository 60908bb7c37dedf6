//! Internally managed dense arrays, one file per chunk
//!
//! Chunk `(i, j, k)` lives in `<root>/i.j.k` as raw C-order bytes in the
//! declared dtype and byte order. Chunks that were never written read as zeros;
//! once the directory itself is reclaimed, every read and write fails.

use super::{block_file_name, read_optional, require_root, write_atomic, ArrayAdapter, DATA_URI};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{output_shape, NdSlice, ResolvedDim};
use crate::structures::{ArrayStructure, ChunkGrid, Structure};
use crate::values::ArrayData;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::ops::Range;
use std::path::PathBuf;
use tracing::debug;

pub struct ChunkedArrayAdapter {
    root: PathBuf,
    structure: ArrayStructure,
}

impl ChunkedArrayAdapter {
    pub fn new(root: PathBuf, structure: ArrayStructure) -> Self {
        Self { root, structure }
    }

    pub fn from_data_source(data_source: &DataSource) -> Result<Self> {
        match &data_source.structure {
            Structure::Array(structure) => Ok(Self::new(
                data_source.asset_path(DATA_URI)?,
                structure.clone(),
            )),
            other => Err(ChunkyardError::CatalogCorrupted(format!(
                "chunked array storage cannot serve {} data",
                other.family()
            ))),
        }
    }

    fn chunk_path(&self, block: &[usize]) -> PathBuf {
        self.root.join(block_file_name(block, None))
    }

    async fn load_block(&self, block: &[usize]) -> Result<ArrayData> {
        let shape = self.structure.block_shape(block)?;
        let path = self.chunk_path(block);
        require_root(&self.root).await?;
        match read_optional(&path).await? {
            Some(bytes) => ArrayData::from_bytes(&self.structure.data_type, &shape, &bytes)
                .map_err(|e| ChunkyardError::storage(path.display(), e)),
            None => ArrayData::zeros(&self.structure.data_type, &shape),
        }
    }

    async fn store_block(&self, block: &[usize], data: &ArrayData) -> Result<()> {
        require_root(&self.root).await?;
        let bytes = data.to_bytes(self.structure.data_type.endianness);
        write_atomic(&self.chunk_path(block), &bytes).await?;
        debug!(root = %self.root.display(), ?block, bytes = bytes.len(), "wrote chunk");
        Ok(())
    }
}

/// Overlap of `chunk` and `bounds` along one dimension, relative to each
fn overlap(chunk: &Range<usize>, bounds: &Range<usize>) -> (Range<usize>, Range<usize>) {
    let start = chunk.start.max(bounds.start);
    let end = chunk.end.min(bounds.end);
    (
        start - chunk.start..end - chunk.start,
        start - bounds.start..end - bounds.start,
    )
}

#[async_trait]
impl ArrayAdapter for ChunkedArrayAdapter {
    fn structure(&self) -> &ArrayStructure {
        &self.structure
    }

    async fn read(&self, slice: &NdSlice) -> Result<ArrayData> {
        let dims = slice.resolve(&self.structure.shape)?;
        if dims.iter().any(ResolvedDim::is_empty) {
            require_root(&self.root).await?;
            return ArrayData::zeros(&self.structure.data_type, &output_shape(&dims));
        }
        let bounds: Vec<Range<usize>> = dims.iter().map(ResolvedDim::bounds).collect();
        let blocks = self.structure.blocks_overlapping(&bounds);
        let chunks = try_join_all(blocks.iter().map(|block| self.load_block(block))).await?;

        let bounding_shape: Vec<usize> = bounds.iter().map(|b| b.len()).collect();
        let mut region = ArrayData::zeros(&self.structure.data_type, &bounding_shape)?;
        for (block, chunk) in blocks.iter().zip(&chunks) {
            let offsets = self.structure.block_offsets(block)?;
            let (src, dst): (Vec<_>, Vec<_>) = offsets
                .iter()
                .zip(&bounds)
                .map(|(chunk_range, bound)| overlap(chunk_range, bound))
                .unzip();
            let piece = chunk.slice(&NdSlice::from_ranges(&src))?;
            region.assign_region(&dst, &piece)?;
        }

        let residual: Vec<ResolvedDim> = dims
            .iter()
            .zip(&bounds)
            .map(|(dim, bound)| ResolvedDim {
                start: 0,
                stop: bound.len(),
                step: dim.step,
                collapse: dim.collapse,
            })
            .collect();
        Ok(region.slice_resolved(&residual))
    }

    async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<ArrayData> {
        self.load_block(block).await?.slice(slice)
    }

    async fn write(&self, data: &ArrayData) -> Result<()> {
        data.check_layout(&self.structure.data_type, &self.structure.shape)?;
        require_root(&self.root).await?;
        let blocks = self.structure.blocks();
        let pieces = blocks
            .iter()
            .map(|block| {
                let offsets = self.structure.block_offsets(block)?;
                data.slice(&NdSlice::from_ranges(&offsets))
            })
            .collect::<Result<Vec<_>>>()?;
        try_join_all(
            blocks
                .iter()
                .zip(&pieces)
                .map(|(block, piece)| self.store_block(block, piece)),
        )
        .await?;
        Ok(())
    }

    async fn write_block(&self, data: &ArrayData, block: &[usize]) -> Result<()> {
        let shape = self.structure.block_shape(block)?;
        data.check_layout(&self.structure.data_type, &shape)?;
        self.store_block(block, data).await
    }
}
