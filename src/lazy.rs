//! Partition-deferred table frames
//!
//! A [`PartitionedFrame`] holds one deferred task per partition of a table
//! part. Nothing is read until a partition is asked for; each partition is
//! read at most once and cached.

use crate::adapters::{AnyAdapter, TableAdapter};
use crate::errors::{ChunkyardError, Result};
use crate::node::Part;
use crate::values::TableData;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct PartitionedFrame {
    adapter: Arc<dyn TableAdapter>,
    columns: Option<Vec<String>>,
    partitions: Vec<OnceCell<TableData>>,
    max_in_flight: usize,
}

impl std::fmt::Debug for PartitionedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedFrame")
            .field("columns", &self.columns)
            .field("npartitions", &self.partitions.len())
            .field("resolved", &self.resolved())
            .finish()
    }
}

impl PartitionedFrame {
    pub fn new(adapter: Arc<dyn TableAdapter>, max_in_flight: usize) -> Self {
        let npartitions = adapter.structure().npartitions;
        Self {
            adapter,
            columns: None,
            partitions: (0..npartitions).map(|_| OnceCell::new()).collect(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Frame over a table part of a node
    pub fn from_part(part: &Part, max_in_flight: usize) -> Result<Self> {
        match part.adapter() {
            AnyAdapter::Table(adapter) => Ok(Self::new(Arc::clone(adapter), max_in_flight)),
            _ => Err(ChunkyardError::unsupported("partitioned frame", part.family())),
        }
    }

    /// Restrict every partition to `columns`. Resets any cached partitions.
    pub fn select(mut self, columns: Vec<String>) -> Result<Self> {
        let structure = self.adapter.structure();
        if let Some(missing) = columns.iter().find(|c| !structure.has_column(c)) {
            return Err(ChunkyardError::address(format!("unknown column '{}'", missing)));
        }
        self.columns = Some(columns);
        self.partitions = (0..self.partitions.len()).map(|_| OnceCell::new()).collect();
        Ok(self)
    }

    pub fn npartitions(&self) -> usize {
        self.partitions.len()
    }

    /// Number of partitions already read
    pub fn resolved(&self) -> usize {
        self.partitions.iter().filter(|cell| cell.initialized()).count()
    }

    pub async fn partition(&self, index: usize) -> Result<&TableData> {
        let cell = self.partitions.get(index).ok_or_else(|| {
            ChunkyardError::address(format!(
                "partition {} is out of range: frame has {} partitions",
                index,
                self.partitions.len()
            ))
        })?;
        cell.get_or_try_init(|| async {
            debug!(partition = index, "resolving partition");
            self.adapter
                .read_partition(index, self.columns.as_deref())
                .await
        })
        .await
    }

    /// Resolve every partition, at most `max_in_flight` at a time, and
    /// concatenate them in partition order.
    pub async fn compute(&self) -> Result<TableData> {
        let parts: Vec<TableData> = stream::iter(0..self.partitions.len())
            .map(|index| async move { self.partition(index).await.cloned() })
            .buffered(self.max_in_flight)
            .try_collect()
            .await?;
        TableData::concat(&parts)
    }
}
