//! Dense arrays backed by an ordered sequence of files
//!
//! Each file holds one slab of shape `S`; the logical array is the slabs
//! stacked along a new leading dimension, shape `(N, *S)`, with one chunk per
//! file along that dimension and a single chunk spanning each trailing one.
//!
//! Reads only open the files the leading-dimension selector picks. Any
//! trailing-dimension selection is applied after loading and never changes
//! which files are opened.

use super::{AdapterContext, ArrayAdapter, Metadata, DATA_URIS};
use crate::data_source::DataSource;
use crate::dtype::{DataType, Endianness, Kind};
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{DimSelector, NdSlice};
use crate::structures::{ArrayStructure, ChunkGrid, Structure};
use crate::values::ArrayData;
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Element type, shape and descriptive attributes of one slab file
#[derive(Debug, Clone, PartialEq)]
pub struct SlabHeader {
    pub data_type: DataType,
    pub shape: Vec<usize>,
    pub attributes: Metadata,
}

/// Decoder for one slab file
///
/// Called from the loading pool, never from an async task.
pub trait SlabReader: Send + Sync + 'static {
    fn read_header(&self, path: &Path) -> Result<SlabHeader>;
    fn read_slab(&self, path: &Path) -> Result<ArrayData>;
}

/// NetCDF slabs: one variable per file, global attributes as metadata
#[derive(Debug, Clone, Default)]
pub struct NetCdfSlabs {
    /// Variable to load; defaults to the first non-coordinate variable
    pub variable: Option<String>,
}

impl NetCdfSlabs {
    pub fn new(variable: Option<String>) -> Self {
        Self { variable }
    }

    fn pick_variable<'f>(&self, file: &'f netcdf::File, path: &Path) -> Result<netcdf::Variable<'f>> {
        if let Some(name) = &self.variable {
            return file.variable(name).ok_or_else(|| {
                ChunkyardError::storage(path.display(), format!("no variable named '{}'", name))
            });
        }
        let is_coordinate = |var: &netcdf::Variable| {
            let dims = var.dimensions();
            dims.len() == 1 && dims[0].name() == var.name()
        };
        let mut candidates: Vec<netcdf::Variable<'f>> = file.variables().collect();
        let position = candidates
            .iter()
            .position(|v| !is_coordinate(v))
            .or(if candidates.is_empty() { None } else { Some(0) })
            .ok_or_else(|| ChunkyardError::storage(path.display(), "file has no variables"))?;
        Ok(candidates.swap_remove(position))
    }
}

/// Map NetCDF's variable type onto a data type, by its debug name
/// (`int(i16)`, `float(f64)`, ...).
fn netcdf_data_type(vartype: &str, path: &Path) -> Result<DataType> {
    let (kind, itemsize) = match vartype {
        "int(u8)" | "ubyte" => (Kind::Uint, 1),
        "int(u16)" | "ushort" => (Kind::Uint, 2),
        "int(u32)" | "uint" => (Kind::Uint, 4),
        "int(u64)" | "uint64" => (Kind::Uint, 8),
        "int(i8)" | "byte" => (Kind::Int, 1),
        "int(i16)" | "short" => (Kind::Int, 2),
        "int(i32)" | "int" => (Kind::Int, 4),
        "int(i64)" | "int64" => (Kind::Int, 8),
        "float(f32)" | "float" => (Kind::Float, 4),
        "float(f64)" | "double" => (Kind::Float, 8),
        other => {
            return Err(ChunkyardError::storage(
                path.display(),
                format!("unsupported NetCDF variable type '{}'", other),
            ))
        }
    };
    DataType::new(kind, itemsize, Endianness::Little)
}

fn attribute_to_json(value: AttributeValue) -> Option<JsonValue> {
    Some(match value {
        AttributeValue::Str(v) => json!(v),
        AttributeValue::Strs(v) => json!(v),
        AttributeValue::Uchar(v) => json!(v),
        AttributeValue::Uchars(v) => json!(v),
        AttributeValue::Ushort(v) => json!(v),
        AttributeValue::Ushorts(v) => json!(v),
        AttributeValue::Short(v) => json!(v),
        AttributeValue::Shorts(v) => json!(v),
        AttributeValue::Uint(v) => json!(v),
        AttributeValue::Uints(v) => json!(v),
        AttributeValue::Int(v) => json!(v),
        AttributeValue::Ints(v) => json!(v),
        AttributeValue::Float(v) => json!(v),
        AttributeValue::Floats(v) => json!(v),
        AttributeValue::Double(v) => json!(v),
        AttributeValue::Doubles(v) => json!(v),
        _ => return None,
    })
}

macro_rules! load_values {
    ($var:expr, $shape:expr, $t:ty) => {{
        let values: Vec<$t> = $var.get_values::<$t, _>(..)?;
        ArrayData::from(ArrayD::from_shape_vec(IxDyn($shape), values)?)
    }};
}

impl SlabReader for NetCdfSlabs {
    fn read_header(&self, path: &Path) -> Result<SlabHeader> {
        let file = netcdf::open(path)?;
        let var = self.pick_variable(&file, path)?;
        let vartype = format!("{:?}", var.vartype()).to_lowercase();
        let mut attributes = Metadata::new();
        for attr in file.attributes() {
            if let Some(value) = attr.value().ok().and_then(attribute_to_json) {
                attributes.insert(attr.name().to_string(), value);
            }
        }
        Ok(SlabHeader {
            data_type: netcdf_data_type(&vartype, path)?,
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
            attributes,
        })
    }

    fn read_slab(&self, path: &Path) -> Result<ArrayData> {
        let file = netcdf::open(path)?;
        let var = self.pick_variable(&file, path)?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let vartype = format!("{:?}", var.vartype()).to_lowercase();
        let data_type = netcdf_data_type(&vartype, path)?;
        let slab = match (data_type.kind, data_type.itemsize) {
            (Kind::Uint, 1) => load_values!(var, &shape, u8),
            (Kind::Uint, 2) => load_values!(var, &shape, u16),
            (Kind::Uint, 4) => load_values!(var, &shape, u32),
            (Kind::Uint, 8) => load_values!(var, &shape, u64),
            (Kind::Int, 1) => load_values!(var, &shape, i8),
            (Kind::Int, 2) => load_values!(var, &shape, i16),
            (Kind::Int, 4) => load_values!(var, &shape, i32),
            (Kind::Int, 8) => load_values!(var, &shape, i64),
            (Kind::Float, 4) => load_values!(var, &shape, f32),
            _ => load_values!(var, &shape, f64),
        };
        Ok(slab)
    }
}

pub struct FileSequenceAdapter<R: SlabReader> {
    paths: Vec<PathBuf>,
    structure: ArrayStructure,
    reader: Arc<R>,
    pool: Arc<ThreadPool>,
    metadata: OnceCell<Metadata>,
}

impl<R: SlabReader> FileSequenceAdapter<R> {
    /// Wrap files whose layout is already known.
    pub fn new(
        paths: Vec<PathBuf>,
        structure: ArrayStructure,
        reader: R,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        Self::with_shared_reader(paths, structure, Arc::new(reader), pool)
    }

    fn with_shared_reader(
        paths: Vec<PathBuf>,
        structure: ArrayStructure,
        reader: Arc<R>,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        structure.validate()?;
        if structure.ndim() == 0 || structure.shape[0] != paths.len() {
            return Err(ChunkyardError::validation(format!(
                "a sequence of {} files needs a leading dimension of {}, structure has shape {:?}",
                paths.len(),
                paths.len(),
                structure.shape
            )));
        }
        if structure.chunks[0].iter().any(|&c| c != 1)
            || structure.chunks[1..].iter().any(|c| c.len() != 1)
        {
            return Err(ChunkyardError::validation(
                "a file sequence has one chunk per file and a single chunk along trailing dimensions",
            ));
        }
        Ok(Self {
            paths,
            structure,
            reader,
            pool,
            metadata: OnceCell::new(),
        })
    }

    /// Infer the structure from the first file.
    pub async fn infer(paths: Vec<PathBuf>, reader: R, pool: Arc<ThreadPool>) -> Result<Self> {
        let first = paths.first().cloned().ok_or_else(|| {
            ChunkyardError::validation("cannot infer the structure of an empty file sequence")
        })?;
        let reader = Arc::new(reader);
        let header = {
            let reader = Arc::clone(&reader);
            let path = first.clone();
            tokio::task::spawn_blocking(move || reader.read_header(&path))
                .await
                .map_err(|e| ChunkyardError::storage(first.display(), e))??
        };
        let structure = Self::sequence_structure(paths.len(), &header)?;
        let adapter = Self::with_shared_reader(paths, structure, reader, pool)?;
        let _ = adapter.metadata.set(header.attributes);
        Ok(adapter)
    }

    /// `(n, *S)` with one chunk per file.
    pub fn sequence_structure(n: usize, header: &SlabHeader) -> Result<ArrayStructure> {
        let mut shape = vec![n];
        shape.extend(&header.shape);
        let mut chunks = vec![vec![1; n]];
        chunks.extend(header.shape.iter().map(|&len| vec![len]));
        ArrayStructure::new(header.data_type, shape, chunks)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn slab_shape(&self) -> &[usize] {
        &self.structure.shape[1..]
    }

    /// Load the files at `indices`, in order, on the loading pool.
    async fn load(&self, indices: Vec<usize>) -> Result<Vec<ArrayData>> {
        let paths: Vec<PathBuf> = indices.iter().map(|&i| self.paths[i].clone()).collect();
        debug!(files = ?indices, "loading slabs");
        let reader = Arc::clone(&self.reader);
        let pool = Arc::clone(&self.pool);
        let slabs = tokio::task::spawn_blocking(move || {
            pool.install(|| {
                paths
                    .par_iter()
                    .map(|path| {
                        reader.read_slab(path).map_err(|e| match e {
                            e @ ChunkyardError::Storage { .. } => e,
                            other => ChunkyardError::storage(path.display(), other),
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
        })
        .await
        .map_err(|e| ChunkyardError::storage("file sequence", e))??;

        for (slab, &i) in slabs.iter().zip(&indices) {
            if slab.shape() != self.slab_shape()
                || !slab.data_type().same_element(&self.structure.data_type)
            {
                return Err(ChunkyardError::storage(
                    self.paths[i].display(),
                    format!(
                        "slab is {} {:?}, sequence declares {} {:?}",
                        slab.data_type(),
                        slab.shape(),
                        self.structure.data_type,
                        self.slab_shape()
                    ),
                ));
            }
        }
        Ok(slabs)
    }

    async fn load_one(&self, index: usize) -> Result<ArrayData> {
        self.load(vec![index])
            .await?
            .pop()
            .ok_or_else(|| ChunkyardError::storage(self.paths[index].display(), "slab not loaded"))
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        let Some(first) = self.paths.first().cloned() else {
            return Ok(Metadata::new());
        };
        let reader = Arc::clone(&self.reader);
        let path = first.clone();
        let header = tokio::task::spawn_blocking(move || reader.read_header(&path))
            .await
            .map_err(|e| ChunkyardError::storage(first.display(), e))??;
        Ok(header.attributes)
    }
}

impl FileSequenceAdapter<NetCdfSlabs> {
    pub fn from_data_source(data_source: &DataSource, ctx: &AdapterContext) -> Result<Self> {
        let Structure::Array(structure) = &data_source.structure else {
            return Err(ChunkyardError::CatalogCorrupted(format!(
                "a NetCDF sequence cannot serve {} data",
                data_source.structure_family
            )));
        };
        let variable = match data_source.parameters.get("variable") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(name)) => Some(name.clone()),
            Some(other) => {
                return Err(ChunkyardError::validation(format!(
                    "option 'variable' must be a string, got {}",
                    other
                )))
            }
        };
        Self::new(
            data_source.asset_paths(DATA_URIS)?,
            structure.clone(),
            NetCdfSlabs::new(variable),
            Arc::clone(&ctx.pool),
        )
    }
}

#[async_trait]
impl<R: SlabReader> ArrayAdapter for FileSequenceAdapter<R> {
    fn structure(&self) -> &ArrayStructure {
        &self.structure
    }

    async fn metadata(&self) -> Result<Metadata> {
        self.metadata
            .get_or_try_init(|| self.load_metadata())
            .await
            .cloned()
    }

    async fn read(&self, slice: &NdSlice) -> Result<ArrayData> {
        let n = self.paths.len();
        let selectors = slice.expand(self.structure.ndim())?;
        let Some((leading, rest)) = selectors.split_first() else {
            return Err(ChunkyardError::address("a file sequence has at least one dimension"));
        };
        match leading {
            DimSelector::Index(_) => {
                let index = leading.resolve(n)?.start;
                let slab = self.load_one(index).await?;
                slab.slice(&NdSlice::new(rest.to_vec()))
            }
            DimSelector::Range { .. } => {
                let dim = leading.resolve(n)?;
                let indices: Vec<usize> = (dim.start..dim.stop).step_by(dim.step).collect();
                let stacked = if indices.is_empty() {
                    let mut shape = vec![0];
                    shape.extend(self.slab_shape());
                    ArrayData::zeros(&self.structure.data_type, &shape)?
                } else {
                    info!(files = indices.len(), of = n, "reading file sequence");
                    ArrayData::stack(&self.load(indices).await?)?
                };
                let mut residual = vec![DimSelector::all()];
                residual.extend_from_slice(rest);
                stacked.slice(&NdSlice::new(residual))
            }
            DimSelector::Ellipsis => Err(ChunkyardError::address(format!(
                "unsupported selector in '{}'",
                slice
            ))),
        }
    }

    /// Only the leading block index picks a file; trailing indices must be 0.
    /// The result is that file's slab, leading dimension dropped.
    async fn read_block(&self, block: &[usize], slice: &NdSlice) -> Result<ArrayData> {
        self.structure.check_block(block)?;
        if let Some(d) = block.iter().skip(1).position(|&b| b != 0) {
            return Err(ChunkyardError::address(format!(
                "block {:?}: dimension {} of a file sequence has a single chunk",
                block,
                d + 1
            )));
        }
        self.load_one(block[0]).await?.slice(slice)
    }
}
