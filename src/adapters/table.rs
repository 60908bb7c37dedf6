//! Internally managed tables, one JSON file per partition

use super::{read_optional, require_root, write_atomic, TableAdapter, DATA_URI};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::structures::{Structure, TableStructure};
use crate::values::TableData;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

pub struct TablePartitionsAdapter {
    root: PathBuf,
    structure: TableStructure,
}

impl TablePartitionsAdapter {
    pub fn new(root: PathBuf, structure: TableStructure) -> Self {
        Self { root, structure }
    }

    pub fn from_data_source(data_source: &DataSource) -> Result<Self> {
        match &data_source.structure {
            Structure::Table(structure) => Ok(Self::new(
                data_source.asset_path(DATA_URI)?,
                structure.clone(),
            )),
            other => Err(ChunkyardError::CatalogCorrupted(format!(
                "table partition storage cannot serve {} data",
                other.family()
            ))),
        }
    }

    fn partition_path(&self, partition: usize) -> PathBuf {
        self.root.join(format!("partition-{}.json", partition))
    }

    /// Row ranges a full write splits into, as even as possible
    fn split_rows(&self, num_rows: usize) -> Vec<std::ops::Range<usize>> {
        let n = self.structure.npartitions;
        let (base, extra) = (num_rows / n, num_rows % n);
        let mut start = 0;
        (0..n)
            .map(|p| {
                let len = base + usize::from(p < extra);
                let range = start..start + len;
                start += len;
                range
            })
            .collect()
    }
}

#[async_trait]
impl TableAdapter for TablePartitionsAdapter {
    fn structure(&self) -> &TableStructure {
        &self.structure
    }

    async fn read_partition(
        &self,
        partition: usize,
        columns: Option<&[String]>,
    ) -> Result<TableData> {
        self.structure.check_partition(partition)?;
        let path = self.partition_path(partition);
        require_root(&self.root).await?;
        let bytes = read_optional(&path).await?.ok_or_else(|| {
            ChunkyardError::storage(
                path.display(),
                format!("partition {} has not been written", partition),
            )
        })?;
        let table: TableData = serde_json::from_slice(&bytes)
            .map_err(|e| ChunkyardError::storage(path.display(), e))?;
        match columns {
            Some(columns) => table.select(columns),
            None => Ok(table),
        }
    }

    /// Rows are split across partitions as evenly as possible, earlier
    /// partitions taking the remainder.
    async fn write(&self, data: &TableData) -> Result<()> {
        self.structure.check_schema(data)?;
        require_root(&self.root).await?;
        for (partition, rows) in self.split_rows(data.num_rows()).into_iter().enumerate() {
            self.write_partition(&data.slice_rows(rows)?, partition).await?;
        }
        Ok(())
    }

    async fn write_partition(&self, data: &TableData, partition: usize) -> Result<()> {
        self.structure.check_partition(partition)?;
        self.structure.check_schema(data)?;
        require_root(&self.root).await?;
        let bytes = serde_json::to_vec(data)?;
        write_atomic(&self.partition_path(partition), &bytes).await?;
        debug!(root = %self.root.display(), partition, rows = data.num_rows(), "wrote partition");
        Ok(())
    }
}
