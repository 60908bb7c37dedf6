//! Parallel processing configuration and management
//!
//! Slab decoding for multi-file datasets runs on a dedicated Rayon pool built
//! from [`ParallelConfig`], so CPU-bound work never occupies async workers.

use crate::errors::{ChunkyardError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::info;

/// Thread count for the slab loading pool; `None` means one per core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Number of threads a pool built from this configuration will run
    pub fn effective_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Build a dedicated pool for slab loading.
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let threads = self.effective_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chunkyard-io-{}", i))
            .build()
            .map_err(|e| {
                ChunkyardError::ThreadPool(format!(
                    "Failed to initialize thread pool with {} threads: {}",
                    threads, e
                ))
            })?;
        info!(threads, "configured slab loading pool");
        Ok(pool)
    }
}

/// Get information about the current parallel configuration
pub fn get_parallel_info(config: &ParallelConfig) -> ParallelInfo {
    ParallelInfo {
        configured_threads: config.effective_threads(),
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone, Serialize)]
pub struct ParallelInfo {
    pub configured_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
}
