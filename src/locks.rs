//! Write serialization per chunk and partition
//!
//! Writers to the same `(data source, chunk)` key are mutually exclusive;
//! writers to different chunks of one data source proceed in parallel. A full
//! write excludes every chunk writer of that data source. Readers take no
//! locks: a read racing a write sees the old or the new chunk file, never a
//! mix, but no snapshot across chunks.

use crate::errors::{ChunkyardError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Addressable write unit within one data source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkKey {
    Block(Vec<usize>),
    Partition(usize),
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKey::Block(block) => write!(f, "block {:?}", block),
            ChunkKey::Partition(p) => write!(f, "partition {}", p),
        }
    }
}

type ChunkMap = DashMap<(i64, ChunkKey), Arc<Mutex<()>>>;

/// Held while writing one chunk
///
/// Dropping the last guard (with no writer queued behind it) removes the
/// chunk's entry, so the registry only tracks chunks being written.
pub struct ChunkWriteGuard {
    chunk: Option<OwnedMutexGuard<()>>,
    _dataset: OwnedRwLockReadGuard<()>,
    chunks: Arc<ChunkMap>,
    key: (i64, ChunkKey),
}

impl Drop for ChunkWriteGuard {
    fn drop(&mut self) {
        drop(self.chunk.take());
        // Callers clone the mutex under the shard lock, so a count of one
        // means nobody holds or waits for it.
        self.chunks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Held while replacing a whole dataset
pub struct DatasetWriteGuard {
    _dataset: OwnedRwLockWriteGuard<()>,
}

#[derive(Debug)]
pub struct ChunkLocks {
    datasets: DashMap<i64, Arc<RwLock<()>>>,
    chunks: Arc<ChunkMap>,
    timeout: Duration,
}

impl ChunkLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            datasets: DashMap::new(),
            chunks: Arc::new(DashMap::new()),
            timeout,
        }
    }

    fn dataset_lock(&self, data_source: i64) -> Arc<RwLock<()>> {
        Arc::clone(self.datasets.entry(data_source).or_default().value())
    }

    fn contention(&self, data_source: i64, what: impl fmt::Display) -> ChunkyardError {
        ChunkyardError::Concurrency {
            key: format!("data source {} {}", data_source, what),
            timeout_ms: self.timeout.as_millis(),
        }
    }

    pub async fn lock_chunk(&self, data_source: i64, key: ChunkKey) -> Result<ChunkWriteGuard> {
        let dataset = tokio::time::timeout(self.timeout, self.dataset_lock(data_source).read_owned())
            .await
            .map_err(|_| self.contention(data_source, "(full write in progress)"))?;
        let entry = (data_source, key);
        let mutex = Arc::clone(self.chunks.entry(entry.clone()).or_default().value());
        let chunk = match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(chunk) => chunk,
            Err(_) => {
                // The holder may have released while this waiter kept the entry alive.
                self.chunks
                    .remove_if(&entry, |_, mutex| Arc::strong_count(mutex) == 1);
                return Err(self.contention(data_source, &entry.1));
            }
        };
        Ok(ChunkWriteGuard {
            chunk: Some(chunk),
            _dataset: dataset,
            chunks: Arc::clone(&self.chunks),
            key: entry,
        })
    }

    pub async fn lock_dataset(&self, data_source: i64) -> Result<DatasetWriteGuard> {
        let dataset = tokio::time::timeout(self.timeout, self.dataset_lock(data_source).write_owned())
            .await
            .map_err(|_| self.contention(data_source, "(dataset)"))?;
        Ok(DatasetWriteGuard { _dataset: dataset })
    }

    /// Drop all lock state of a deleted data source.
    pub fn forget(&self, data_source: i64) {
        self.datasets.remove(&data_source);
        self.chunks.retain(|(id, _), _| *id != data_source);
    }

    pub fn tracked_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locks(ms: u64) -> ChunkLocks {
        ChunkLocks::new(Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_same_chunk_is_exclusive() {
        let locks = locks(50);
        let _held = locks.lock_chunk(1, ChunkKey::Partition(0)).await.unwrap();
        let err = locks
            .lock_chunk(1, ChunkKey::Partition(0))
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_distinct_chunks_do_not_block() {
        let locks = locks(50);
        let _a = locks.lock_chunk(1, ChunkKey::Block(vec![0, 0])).await.unwrap();
        let _b = locks.lock_chunk(1, ChunkKey::Block(vec![0, 1])).await.unwrap();
        let _c = locks.lock_chunk(2, ChunkKey::Block(vec![0, 0])).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_write_excludes_chunk_writers() {
        let locks = locks(50);
        let held = locks.lock_dataset(7).await.unwrap();
        assert!(locks.lock_chunk(7, ChunkKey::Partition(3)).await.is_err());
        drop(held);
        let _chunk = locks.lock_chunk(7, ChunkKey::Partition(3)).await.unwrap();
        assert!(locks.lock_dataset(7).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let locks = locks(50);
        {
            let _held = locks.lock_chunk(1, ChunkKey::Partition(0)).await.unwrap();
        }
        assert!(locks.lock_chunk(1, ChunkKey::Partition(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_forget_clears_state() {
        let locks = locks(50);
        let _a = locks.lock_chunk(1, ChunkKey::Partition(0)).await.unwrap();
        let _b = locks.lock_chunk(2, ChunkKey::Partition(0)).await.unwrap();
        assert_eq!(locks.tracked_chunks(), 2);
        locks.forget(1);
        assert_eq!(locks.tracked_chunks(), 1);
    }

    #[tokio::test]
    async fn test_idle_chunks_are_not_tracked() {
        let locks = locks(50);
        for i in 0..16 {
            drop(locks.lock_chunk(1, ChunkKey::Block(vec![i, 0])).await.unwrap());
        }
        assert_eq!(locks.tracked_chunks(), 0);

        let held = locks.lock_chunk(1, ChunkKey::Block(vec![0, 0])).await.unwrap();
        assert_eq!(locks.tracked_chunks(), 1);
        drop(held);
        assert_eq!(locks.tracked_chunks(), 0);
    }

    #[tokio::test]
    async fn test_queued_writer_keeps_chunk_entry() {
        let locks = Arc::new(locks(1_000));
        let held = locks.lock_chunk(3, ChunkKey::Partition(1)).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock_chunk(3, ChunkKey::Partition(1)).await.unwrap();
                locks.tracked_chunks()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(locks.tracked_chunks(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_writer_leaves_no_entry() {
        let locks = locks(20);
        let held = locks.lock_chunk(4, ChunkKey::Partition(0)).await.unwrap();
        assert!(locks.lock_chunk(4, ChunkKey::Partition(0)).await.is_err());
        assert_eq!(locks.tracked_chunks(), 1);
        drop(held);
        assert_eq!(locks.tracked_chunks(), 0);
    }
}
