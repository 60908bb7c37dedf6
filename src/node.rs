//! Consolidated nodes and their parts
//!
//! A [`ConsolidatedNode`] groups several independently structured datasets
//! under one key and one metadata mapping. Each [`Part`] dispatches reads and
//! writes to its adapter; block and partition writes are serialized per chunk
//! through the catalog's [`ChunkLocks`].

use crate::adapters::{AnyAdapter, Metadata};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::locks::{ChunkKey, ChunkLocks};
use crate::ndslice::NdSlice;
use crate::structures::{ChunkGrid, Structure, StructureFamily};
use crate::values::{DataValue, TableData};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Chunks (or partitions) of a part, in grid order, paired with their index
pub type BlockStream =
    Pin<Box<dyn Stream<Item = Result<(Vec<usize>, DataValue)>> + Send + 'static>>;

/// One named dataset of a consolidated node
#[derive(Debug, Clone)]
pub struct Part {
    data_source: DataSource,
    adapter: AnyAdapter,
    locks: Arc<ChunkLocks>,
    node_metadata: Arc<Metadata>,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.data_source.name
    }

    pub fn family(&self) -> StructureFamily {
        self.adapter.family()
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    pub fn adapter(&self) -> &AnyAdapter {
        &self.adapter
    }

    pub fn structure(&self) -> Structure {
        self.adapter.structure()
    }

    /// Adapter metadata with the node's metadata layered on top
    pub async fn metadata(&self) -> Result<Metadata> {
        let mut metadata = self.adapter.metadata().await?;
        for (key, value) in self.node_metadata.iter() {
            metadata.insert(key.clone(), value.clone());
        }
        Ok(metadata)
    }

    fn data_source_id(&self) -> Result<i64> {
        self.data_source.id.ok_or_else(|| {
            ChunkyardError::CatalogCorrupted(format!(
                "part '{}' has not been recorded in the catalog",
                self.data_source.name
            ))
        })
    }

    fn unsupported(&self, operation: &str) -> ChunkyardError {
        ChunkyardError::unsupported(operation, self.family())
    }

    pub async fn read(&self) -> Result<DataValue> {
        self.adapter.read_full().await
    }

    /// Array and sparse parts only
    pub async fn read_slice(&self, slice: &NdSlice) -> Result<DataValue> {
        match &self.adapter {
            AnyAdapter::Array(a) => Ok(DataValue::Array(a.read(slice).await?)),
            AnyAdapter::Sparse(a) => Ok(DataValue::Sparse(a.read(slice).await?)),
            _ => Err(self.unsupported("read_slice")),
        }
    }

    pub async fn read_columns(&self, columns: &[String]) -> Result<TableData> {
        match &self.adapter {
            AnyAdapter::Table(a) => a.read(Some(columns)).await,
            _ => Err(self.unsupported("read_columns")),
        }
    }

    pub async fn read_rows(&self, rows: Range<usize>, columns: Option<&[String]>) -> Result<TableData> {
        match &self.adapter {
            AnyAdapter::Table(a) => a.read_rows(rows, columns).await,
            _ => Err(self.unsupported("read_rows")),
        }
    }

    /// One chunk; an index outside the chunk grid is an address error.
    pub async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<DataValue> {
        match &self.adapter {
            AnyAdapter::Array(a) => {
                a.structure().check_block(block)?;
                Ok(DataValue::Array(a.read_block(block, slice).await?))
            }
            AnyAdapter::Sparse(a) => {
                a.structure().check_block(block)?;
                Ok(DataValue::Sparse(a.read_block(block, slice).await?))
            }
            _ => Err(self.unsupported("read_block")),
        }
    }

    pub async fn read_partition(&self, partition: usize, columns: Option<&[String]>) -> Result<TableData> {
        match &self.adapter {
            AnyAdapter::Table(a) => {
                a.structure().check_partition(partition)?;
                a.read_partition(partition, columns).await
            }
            _ => Err(self.unsupported("read_partition")),
        }
    }

    /// Replace the whole dataset; excludes concurrent chunk writers.
    pub async fn write(&self, value: DataValue) -> Result<()> {
        if value.family() != self.family() {
            return Err(ChunkyardError::validation(format!(
                "part '{}' holds {} data, got {} data",
                self.name(),
                self.family(),
                value.family()
            )));
        }
        let _guard = self.locks.lock_dataset(self.data_source_id()?).await?;
        self.adapter.write_full(value).await?;
        debug!(part = %self.name(), "wrote part");
        Ok(())
    }

    pub async fn write_block(&self, value: DataValue, block: &[usize]) -> Result<()> {
        let id = self.data_source_id()?;
        match &self.adapter {
            AnyAdapter::Array(a) => {
                a.structure().check_block(block)?;
                let value = value.into_array()?;
                let _guard = self.locks.lock_chunk(id, ChunkKey::Block(block.to_vec())).await?;
                a.write_block(&value, block).await
            }
            AnyAdapter::Sparse(a) => {
                a.structure().check_block(block)?;
                let value = value.into_sparse()?;
                let _guard = self.locks.lock_chunk(id, ChunkKey::Block(block.to_vec())).await?;
                a.write_block(&value, block).await
            }
            _ => Err(self.unsupported("write_block")),
        }
    }

    pub async fn write_partition(&self, value: &TableData, partition: usize) -> Result<()> {
        let id = self.data_source_id()?;
        match &self.adapter {
            AnyAdapter::Table(a) => {
                a.structure().check_partition(partition)?;
                let _guard = self.locks.lock_chunk(id, ChunkKey::Partition(partition)).await?;
                a.write_partition(value, partition).await
            }
            _ => Err(self.unsupported("write_partition")),
        }
    }

    /// Every chunk (array, sparse) or partition (table) in order; an awkward
    /// part yields its whole buffer set once, under the empty index.
    pub fn stream_blocks(&self) -> BlockStream {
        let adapter = self.adapter.clone();
        Box::pin(async_stream::stream! {
            match adapter {
                AnyAdapter::Array(a) => {
                    for block in a.structure().blocks() {
                        match a.read_block(&block, &NdSlice::full()).await {
                            Ok(chunk) => yield Ok((block, DataValue::Array(chunk))),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
                AnyAdapter::Sparse(a) => {
                    for block in a.structure().blocks() {
                        match a.read_block(&block, &NdSlice::full()).await {
                            Ok(chunk) => yield Ok((block, DataValue::Sparse(chunk))),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
                AnyAdapter::Table(a) => {
                    for partition in 0..a.structure().npartitions {
                        match a.read_partition(partition, None).await {
                            Ok(table) => yield Ok((vec![partition], DataValue::Table(table))),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
                AnyAdapter::Awkward(a) => {
                    yield a.read().await.map(|buffers| (Vec::new(), DataValue::Awkward(buffers)));
                }
            }
        })
    }
}

/// Name-indexed view of a node's parts, in creation order
#[derive(Debug, Clone, Copy)]
pub struct Parts<'a> {
    parts: &'a [Part],
}

impl<'a> Parts<'a> {
    pub fn get(&self, name: &str) -> Option<&'a Part> {
        self.parts.iter().find(|p| p.name() == name)
    }

    pub fn names(&self) -> Vec<&'a str> {
        self.parts.iter().map(Part::name).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'a, Part> {
        self.parts.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// What a top-level name on a node resolves to
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    /// A column of a table part
    Column { part: &'a Part, column: &'a str },
    Part(&'a Part),
}

#[derive(Debug, Clone)]
pub struct ConsolidatedNode {
    key: String,
    metadata: Arc<Metadata>,
    time_created: DateTime<Utc>,
    parts: Vec<Part>,
}

/// Serializable summary used by `describe` and create responses
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    pub key: String,
    pub metadata: Metadata,
    pub time_created: DateTime<Utc>,
    pub parts: Vec<DataSource>,
}

impl ConsolidatedNode {
    pub(crate) fn assemble(
        key: String,
        metadata: Metadata,
        time_created: DateTime<Utc>,
        parts: Vec<(DataSource, AnyAdapter)>,
        locks: Arc<ChunkLocks>,
    ) -> Self {
        let metadata = Arc::new(metadata);
        let parts = parts
            .into_iter()
            .map(|(data_source, adapter)| Part {
                data_source,
                adapter,
                locks: Arc::clone(&locks),
                node_metadata: Arc::clone(&metadata),
            })
            .collect();
        Self {
            key,
            metadata,
            time_created,
            parts,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.time_created
    }

    pub fn parts(&self) -> Parts<'_> {
        Parts { parts: &self.parts }
    }

    pub fn part(&self, name: &str) -> Result<&Part> {
        self.parts()
            .get(name)
            .ok_or_else(|| ChunkyardError::NotFound(format!("part '{}' of node '{}'", name, self.key)))
    }

    /// Table columns across table parts (in part order), then the other parts by name.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for part in &self.parts {
            if let Structure::Table(table) = &part.data_source.structure {
                columns.extend(table.column_names());
            }
        }
        for part in &self.parts {
            if part.family() != StructureFamily::Table {
                columns.push(part.name().to_string());
            }
        }
        columns
    }

    /// Resolve a top-level name: a table column first, then a part name.
    pub fn entry(&self, name: &str) -> Result<Entry<'_>> {
        for part in &self.parts {
            if let Structure::Table(table) = &part.data_source.structure {
                if let Some(field) = table.columns.iter().find(|f| f.name == name) {
                    return Ok(Entry::Column {
                        part,
                        column: &field.name,
                    });
                }
            }
        }
        match self.parts().get(name) {
            Some(part) => Ok(Entry::Part(part)),
            None => Err(ChunkyardError::NotFound(format!(
                "'{}' is neither a column nor a part of node '{}'",
                name, self.key
            ))),
        }
    }

    /// Read whatever `name` resolves to: a single-column table or a whole part.
    pub async fn read_entry(&self, name: &str) -> Result<DataValue> {
        match self.entry(name)? {
            Entry::Column { part, column } => Ok(DataValue::Table(
                part.read_columns(&[column.to_string()]).await?,
            )),
            Entry::Part(part) => part.read().await,
        }
    }

    pub fn describe(&self) -> NodeDescription {
        NodeDescription {
            key: self.key.clone(),
            metadata: self.metadata.as_ref().clone(),
            time_created: self.time_created,
            parts: self.parts.iter().map(|p| p.data_source.clone()).collect(),
        }
    }
}
