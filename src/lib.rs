//! chunkyard: a catalog and chunked access layer for scientific datasets
//!
//! Datasets of four structure families (dense arrays, tables, COO sparse
//! arrays and awkward arrays) are registered in a SQLite catalog as parts of
//! *consolidated nodes*. Each part is served by an adapter chosen by mimetype,
//! over storage the catalog owns (internal) or merely references (external),
//! and is read and written whole or one chunk/partition at a time.
//!
//! ## Module Organization
//!
//! - [`structures`]: structure descriptors and chunk-grid arithmetic
//! - [`values`]: in-memory values exchanged with adapters
//! - [`ndslice`]: per-dimension slice selectors
//! - [`data_source`]: assets, data sources and management modes
//! - [`adapters`]: the adapter contract, registry and built-in adapters
//! - [`catalog`]: the relational catalog and internal storage allocation
//! - [`node`]: consolidated nodes and their parts
//! - [`protocol`]: transport-agnostic read/write requests
//! - [`lazy`]: partition-deferred table frames
//! - [`config`], [`parallel`], [`logging`]: process configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chunkyard::prelude::*;
//!
//! # async fn demo() -> chunkyard::Result<()> {
//! let catalog = Catalog::open(Settings::default()).await?;
//! let data = ArrayData::from_vec(&[4, 3], (0..12).map(|v| v as f64).collect())?;
//! let structure = ArrayStructure::with_chunk_shape(data.data_type(), data.shape().to_vec(), &[2, 3])?;
//! let node = catalog
//!     .create_consolidated(
//!         "run-1",
//!         Default::default(),
//!         vec![DataSource::internal("temperature", Structure::Array(structure))],
//!     )
//!     .await?;
//! let part = node.part("temperature")?;
//! part.write(DataValue::Array(data)).await?;
//! let block = part.read_block(&[1, 0], &NdSlice::full()).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod data_source;
pub mod dtype;
pub mod errors;
pub mod lazy;
pub mod locks;
pub mod logging;
pub mod ndslice;
pub mod node;
pub mod parallel;
pub mod protocol;
pub mod structures;
pub mod values;

pub use errors::{ChunkyardError, ErrorKind, Result};
pub use logging::init_logging;
pub use parallel::{get_parallel_info, ParallelConfig, ParallelInfo};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::adapters::{
        AdapterRegistry, AnyAdapter, ArrayAdapter, AwkwardAdapter, SparseAdapter, TableAdapter,
    };
    pub use crate::catalog::Catalog;
    pub use crate::config::Settings;
    pub use crate::data_source::{Asset, DataSource, Management};
    pub use crate::dtype::{DataType, Endianness, Kind};
    pub use crate::errors::{ChunkyardError, Result};
    pub use crate::lazy::PartitionedFrame;
    pub use crate::ndslice::{DimSelector, NdSlice};
    pub use crate::node::{ConsolidatedNode, Part};
    pub use crate::parallel::ParallelConfig;
    pub use crate::structures::{
        ArrayStructure, AwkwardStructure, COOStructure, ChunkGrid, ColumnType, Field, Structure,
        StructureFamily, TableStructure,
    };
    pub use crate::values::{ArrayData, AwkwardBuffers, Column, CooData, DataValue, TableData};
}
