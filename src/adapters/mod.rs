//! Adapter contract and registry
//!
//! An adapter answers read and write requests for one data source. There is
//! one trait per structure family; each has a single required read and builds
//! the convenience wrappers (`read_block`, full reads, row ranges) on top of it.
//! Writes are optional and report [`ChunkyardError::Unsupported`] by default.
//!
//! The [`AdapterRegistry`] maps a data source's mimetype to the adapter that
//! serves it and to the asset parameters that adapter accepts.

pub mod awkward;
pub mod chunked;
pub mod csv;
pub mod sequence;
pub mod sparse;
pub mod table;

pub use self::awkward::AwkwardBuffersAdapter;
pub use self::chunked::ChunkedArrayAdapter;
pub use self::csv::CsvTableAdapter;
pub use self::sequence::{FileSequenceAdapter, NetCdfSlabs, SlabHeader, SlabReader};
pub use self::sparse::SparseChunksAdapter;
pub use self::table::TablePartitionsAdapter;

use crate::config::Settings;
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::NdSlice;
use crate::structures::{
    ArrayStructure, AwkwardStructure, COOStructure, ChunkGrid, Structure, StructureFamily,
    TableStructure,
};
use crate::values::{ArrayData, AwkwardBuffers, CooData, DataValue, TableData};
use async_trait::async_trait;
use rayon::ThreadPool;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const NDARRAY_CHUNKS: &str = "application/x-ndarray-chunks";
pub const COO_CHUNKS: &str = "application/x-coo-chunks";
pub const TABLE_PARTITIONS: &str = "application/x-table-partitions";
pub const AWKWARD_BUFFERS: &str = "application/x-awkward-buffers";
pub const NETCDF_SEQUENCE: &str = "multipart/related;type=application/x-netcdf";
pub const CSV: &str = "text/csv";

/// Asset parameter name used by every internally managed adapter
pub const DATA_URI: &str = "data_uri";
/// Ordered-list asset parameter of the multi-file adapters
pub const DATA_URIS: &str = "data_uris";

pub type Metadata = Map<String, JsonValue>;

/// Dense N-dimensional arrays
#[async_trait]
pub trait ArrayAdapter: Send + Sync {
    fn structure(&self) -> &ArrayStructure;

    async fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    /// Read the region selected by `slice`; an empty slice is the whole array.
    async fn read(&self, slice: &NdSlice) -> Result<ArrayData>;

    /// Read one chunk, then apply `slice` within it.
    async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<ArrayData> {
        let offsets = self.structure().block_offsets(block)?;
        let chunk = self.read(&NdSlice::from_ranges(&offsets)).await?;
        chunk.slice(slice)
    }

    async fn write(&self, _data: &ArrayData) -> Result<()> {
        Err(ChunkyardError::unsupported("write", StructureFamily::Array))
    }

    async fn write_block(&self, _data: &ArrayData, _block: &[usize]) -> Result<()> {
        Err(ChunkyardError::unsupported("write_block", StructureFamily::Array))
    }
}

/// Row-partitioned tables
#[async_trait]
pub trait TableAdapter: Send + Sync {
    fn structure(&self) -> &TableStructure;

    async fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    async fn read_partition(&self, partition: usize, columns: Option<&[String]>)
        -> Result<TableData>;

    /// All partitions, concatenated in order.
    async fn read(&self, columns: Option<&[String]>) -> Result<TableData> {
        let mut parts = Vec::with_capacity(self.structure().npartitions);
        for partition in 0..self.structure().npartitions {
            parts.push(self.read_partition(partition, columns).await?);
        }
        TableData::concat(&parts)
    }

    /// A global row range; partitions past the end of the range are not read.
    async fn read_rows(&self, rows: Range<usize>, columns: Option<&[String]>) -> Result<TableData> {
        let mut pieces = Vec::new();
        let mut offset = 0;
        for partition in 0..self.structure().npartitions {
            if offset >= rows.end && !pieces.is_empty() {
                break;
            }
            let part = self.read_partition(partition, columns).await?;
            let len = part.num_rows();
            let start = rows.start.max(offset).min(offset + len);
            let end = rows.end.max(offset).min(offset + len);
            if start < end || pieces.is_empty() {
                pieces.push(part.slice_rows(start - offset..end - offset)?);
            }
            offset += len;
        }
        if rows.start > rows.end || rows.end > offset {
            return Err(ChunkyardError::address(format!(
                "row range {:?} is outside a table of at least {} rows",
                rows, offset
            )));
        }
        TableData::concat(&pieces)
    }

    async fn write(&self, _data: &TableData) -> Result<()> {
        Err(ChunkyardError::unsupported("write", StructureFamily::Table))
    }

    async fn write_partition(&self, _data: &TableData, _partition: usize) -> Result<()> {
        Err(ChunkyardError::unsupported("write_partition", StructureFamily::Table))
    }
}

/// Chunked COO sparse arrays
#[async_trait]
pub trait SparseAdapter: Send + Sync {
    fn structure(&self) -> &COOStructure;

    async fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    async fn read(&self, slice: &NdSlice) -> Result<CooData>;

    async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<CooData> {
        let offsets = self.structure().block_offsets(block)?;
        let chunk = self.read(&NdSlice::from_ranges(&offsets)).await?;
        chunk.slice(slice)
    }

    async fn write(&self, _data: &CooData) -> Result<()> {
        Err(ChunkyardError::unsupported("write", StructureFamily::Sparse))
    }

    async fn write_block(&self, _data: &CooData, _block: &[usize]) -> Result<()> {
        Err(ChunkyardError::unsupported("write_block", StructureFamily::Sparse))
    }
}

/// Irregular arrays stored as a set of flat buffers, read and written whole
#[async_trait]
pub trait AwkwardAdapter: Send + Sync {
    fn structure(&self) -> &AwkwardStructure;

    async fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    /// Buffers of the listed form keys, or of every node when `None`
    async fn read_buffers(&self, form_keys: Option<&[String]>) -> Result<AwkwardBuffers>;

    async fn read(&self) -> Result<AwkwardBuffers> {
        self.read_buffers(None).await
    }

    async fn write(&self, _data: &AwkwardBuffers) -> Result<()> {
        Err(ChunkyardError::unsupported("write", StructureFamily::Awkward))
    }
}

/// An adapter of any family
#[derive(Clone)]
pub enum AnyAdapter {
    Array(Arc<dyn ArrayAdapter>),
    Table(Arc<dyn TableAdapter>),
    Sparse(Arc<dyn SparseAdapter>),
    Awkward(Arc<dyn AwkwardAdapter>),
}

impl std::fmt::Debug for AnyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnyAdapter::{}", self.family())
    }
}

impl AnyAdapter {
    pub fn family(&self) -> StructureFamily {
        match self {
            AnyAdapter::Array(_) => StructureFamily::Array,
            AnyAdapter::Table(_) => StructureFamily::Table,
            AnyAdapter::Sparse(_) => StructureFamily::Sparse,
            AnyAdapter::Awkward(_) => StructureFamily::Awkward,
        }
    }

    pub fn structure(&self) -> Structure {
        match self {
            AnyAdapter::Array(a) => Structure::Array(a.structure().clone()),
            AnyAdapter::Table(a) => Structure::Table(a.structure().clone()),
            AnyAdapter::Sparse(a) => Structure::Sparse(a.structure().clone()),
            AnyAdapter::Awkward(a) => Structure::Awkward(a.structure().clone()),
        }
    }

    pub async fn metadata(&self) -> Result<Metadata> {
        match self {
            AnyAdapter::Array(a) => a.metadata().await,
            AnyAdapter::Table(a) => a.metadata().await,
            AnyAdapter::Sparse(a) => a.metadata().await,
            AnyAdapter::Awkward(a) => a.metadata().await,
        }
    }

    /// The whole dataset
    pub async fn read_full(&self) -> Result<DataValue> {
        Ok(match self {
            AnyAdapter::Array(a) => DataValue::Array(a.read(&NdSlice::full()).await?),
            AnyAdapter::Table(a) => DataValue::Table(a.read(None).await?),
            AnyAdapter::Sparse(a) => DataValue::Sparse(a.read(&NdSlice::full()).await?),
            AnyAdapter::Awkward(a) => DataValue::Awkward(a.read().await?),
        })
    }

    pub async fn write_full(&self, value: DataValue) -> Result<()> {
        match self {
            AnyAdapter::Array(a) => a.write(&value.into_array()?).await,
            AnyAdapter::Table(a) => a.write(&value.into_table()?).await,
            AnyAdapter::Sparse(a) => a.write(&value.into_sparse()?).await,
            AnyAdapter::Awkward(a) => a.write(&value.into_awkward()?).await,
        }
    }
}

/// Shared resources handed to adapter constructors
#[derive(Clone)]
pub struct AdapterContext {
    pub settings: Arc<Settings>,
    pub pool: Arc<ThreadPool>,
}

impl AdapterContext {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let pool = Arc::new(settings.parallel.build_pool()?);
        Ok(Self { settings, pool })
    }
}

/// One named constructor argument fed by assets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetParameter {
    pub name: &'static str,
    /// Takes an ordered list of assets numbered from 1
    pub list: bool,
}

pub type AdapterConstructor = fn(&DataSource, &AdapterContext) -> Result<AnyAdapter>;

#[derive(Clone)]
pub struct AdapterSpec {
    pub family: StructureFamily,
    pub parameters: Vec<AssetParameter>,
    /// Keyword options accepted through `DataSource::parameters`
    pub options: Vec<&'static str>,
    /// Serves catalog-owned storage rather than pre-existing files
    pub internal: bool,
    pub construct: AdapterConstructor,
}

/// Mimetype to adapter mapping
#[derive(Clone)]
pub struct AdapterRegistry {
    specs: HashMap<String, AdapterSpec>,
    internal_defaults: HashMap<StructureFamily, String>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
            internal_defaults: HashMap::new(),
        }
    }

    /// The built-in adapters for internal storage, NetCDF sequences and CSV.
    pub fn with_defaults() -> Self {
        let single = vec![AssetParameter {
            name: DATA_URI,
            list: false,
        }];
        let listed = vec![AssetParameter {
            name: DATA_URIS,
            list: true,
        }];
        let mut registry = Self::empty();
        registry.register(
            NDARRAY_CHUNKS,
            AdapterSpec {
                family: StructureFamily::Array,
                parameters: single.clone(),
                options: Vec::new(),
                internal: true,
                construct: |ds, _| {
                    Ok(AnyAdapter::Array(Arc::new(
                        ChunkedArrayAdapter::from_data_source(ds)?,
                    )))
                },
            },
        );
        registry.register(
            COO_CHUNKS,
            AdapterSpec {
                family: StructureFamily::Sparse,
                parameters: single.clone(),
                options: Vec::new(),
                internal: true,
                construct: |ds, _| {
                    Ok(AnyAdapter::Sparse(Arc::new(
                        SparseChunksAdapter::from_data_source(ds)?,
                    )))
                },
            },
        );
        registry.register(
            TABLE_PARTITIONS,
            AdapterSpec {
                family: StructureFamily::Table,
                parameters: single.clone(),
                options: Vec::new(),
                internal: true,
                construct: |ds, _| {
                    Ok(AnyAdapter::Table(Arc::new(
                        TablePartitionsAdapter::from_data_source(ds)?,
                    )))
                },
            },
        );
        registry.register(
            AWKWARD_BUFFERS,
            AdapterSpec {
                family: StructureFamily::Awkward,
                parameters: single,
                options: Vec::new(),
                internal: true,
                construct: |ds, _| {
                    Ok(AnyAdapter::Awkward(Arc::new(
                        AwkwardBuffersAdapter::from_data_source(ds)?,
                    )))
                },
            },
        );
        registry.register(
            NETCDF_SEQUENCE,
            AdapterSpec {
                family: StructureFamily::Array,
                parameters: listed.clone(),
                options: vec!["variable"],
                internal: false,
                construct: |ds, ctx| {
                    Ok(AnyAdapter::Array(Arc::new(
                        FileSequenceAdapter::<NetCdfSlabs>::from_data_source(ds, ctx)?,
                    )))
                },
            },
        );
        registry.register(
            CSV,
            AdapterSpec {
                family: StructureFamily::Table,
                parameters: listed,
                options: Vec::new(),
                internal: false,
                construct: |ds, _| {
                    Ok(AnyAdapter::Table(Arc::new(
                        CsvTableAdapter::from_data_source(ds)?,
                    )))
                },
            },
        );
        registry
    }

    /// Register (or replace) the adapter for `mimetype`.
    ///
    /// The first internal adapter registered for a family becomes that
    /// family's default for data sources that omit a mimetype.
    pub fn register(&mut self, mimetype: &str, spec: AdapterSpec) {
        if spec.internal {
            self.internal_defaults
                .entry(spec.family)
                .or_insert_with(|| mimetype.to_string());
        }
        self.specs.insert(mimetype.to_string(), spec);
    }

    pub fn get(&self, mimetype: &str) -> Result<&AdapterSpec> {
        self.specs.get(mimetype).ok_or_else(|| {
            ChunkyardError::validation(format!("no adapter registered for mimetype '{}'", mimetype))
        })
    }

    pub fn default_internal(&self, family: StructureFamily) -> Result<&str> {
        self.internal_defaults
            .get(&family)
            .map(String::as_str)
            .ok_or_else(|| {
                ChunkyardError::validation(format!(
                    "no adapter can store {} data internally",
                    family
                ))
            })
    }

    pub fn mimetypes(&self) -> Vec<&str> {
        let mut mimetypes: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        mimetypes.sort_unstable();
        mimetypes
    }

    /// Build the adapter serving `data_source`.
    pub fn instantiate(&self, data_source: &DataSource, ctx: &AdapterContext) -> Result<AnyAdapter> {
        let mimetype = data_source.effective_mimetype(self)?;
        let spec = self.get(mimetype)?;
        debug!(name = %data_source.name, mimetype, "instantiating adapter");
        let adapter = (spec.construct)(data_source, ctx)?;
        if adapter.family() != data_source.structure_family {
            return Err(ChunkyardError::CatalogCorrupted(format!(
                "adapter for '{}' serves {} data but data source '{}' is {}",
                mimetype,
                adapter.family(),
                data_source.name,
                data_source.structure_family
            )));
        }
        Ok(adapter)
    }
}

/// Replace `path` with `bytes` so readers see either the old or the new file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ChunkyardError::storage(path.display(), "invalid chunk path"))?;
    let staging = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    let storage_err = |e: std::io::Error| ChunkyardError::storage(path.display(), e);
    tokio::fs::write(&staging, bytes).await.map_err(storage_err)?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(storage_err(e));
    }
    Ok(())
}

/// Fail unless the data source's storage directory still exists.
///
/// A missing chunk inside `root` means "not written yet"; a missing `root`
/// means the storage was reclaimed and nothing may be read from or written to it.
pub(crate) async fn require_root(root: &Path) -> Result<()> {
    match tokio::fs::try_exists(root).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ChunkyardError::storage(
            root.display(),
            "storage has been reclaimed",
        )),
        Err(e) => Err(ChunkyardError::storage(root.display(), e)),
    }
}

/// Read a file that may legitimately not exist yet.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ChunkyardError::storage(path.display(), e)),
    }
}

/// File name of a chunk: block indices joined by dots, `0` for a scalar.
pub(crate) fn block_file_name(block: &[usize], extension: Option<&str>) -> String {
    let stem = if block.is_empty() {
        "0".to_string()
    } else {
        block
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(".")
    };
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}
