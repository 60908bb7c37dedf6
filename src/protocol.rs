//! Transport-agnostic request handling
//!
//! Requests name a node, a part (or a top-level column) and an [`Address`]
//! within it. Payloads are negotiated by media type: JSON works for every
//! family, raw bytes for dense arrays only. Write payloads are decoded against
//! the declared structure at the target address, so a mismatch fails before
//! any bytes reach storage.

use crate::adapters::Metadata;
use crate::catalog::Catalog;
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{output_shape, NdSlice};
use crate::node::{ConsolidatedNode, Entry, NodeDescription, Part};
use crate::structures::{ChunkGrid, Structure, StructureFamily};
use crate::values::{ArrayData, AwkwardBuffers, CooData, DataValue, TableData};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

pub const JSON: &str = "application/json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Create a consolidated node from an ordered list of part descriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub key: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub data_sources: Vec<DataSource>,
}

impl CreateNodeRequest {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            ChunkyardError::validation(format!("malformed create request: {}", e))
        })
    }

    pub async fn submit(self, catalog: &Catalog) -> Result<NodeDescription> {
        let node = catalog
            .create_consolidated(&self.key, self.metadata, self.data_sources)
            .await?;
        Ok(node.describe())
    }
}

/// Region of a part a request applies to
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    Full,
    Slice(NdSlice),
    Block { block: Vec<usize>, slice: NdSlice },
    Partition { partition: usize, columns: Option<Vec<String>> },
    Columns(Vec<String>),
    Rows { rows: Range<usize>, columns: Option<Vec<String>> },
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub node: String,
    /// Part name, or a column of one of the node's table parts
    pub target: String,
    pub address: Address,
    pub accept: String,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub node: String,
    pub part: String,
    pub address: Address,
    pub media_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub media_type: &'static str,
    /// Structure of the part the payload was read from
    pub structure: Structure,
    pub body: Vec<u8>,
}

fn negotiate(requested: &str) -> Result<&'static str> {
    let essence = requested.split(';').next().unwrap_or("").trim();
    match essence {
        "" | "*/*" | JSON => Ok(JSON),
        OCTET_STREAM => Ok(OCTET_STREAM),
        other => Err(ChunkyardError::validation(format!(
            "unsupported media type '{}'",
            other
        ))),
    }
}

/// Column restriction carried by the address, narrowed further by a column target
fn merge_columns(address: Option<&[String]>, column: Option<&str>) -> Result<Option<Vec<String>>> {
    match (address, column) {
        (None, None) => Ok(None),
        (Some(cols), None) => Ok(Some(cols.to_vec())),
        (None, Some(col)) => Ok(Some(vec![col.to_string()])),
        (Some(cols), Some(col)) if cols.iter().any(|c| c == col) => Ok(Some(vec![col.to_string()])),
        (Some(_), Some(col)) => Err(ChunkyardError::address(format!(
            "column selection does not include target column '{}'",
            col
        ))),
    }
}

/// Upper bound of the decoded size of a dense read, when cheap to compute
fn estimated_nbytes(part: &Part, address: &Address) -> Result<Option<usize>> {
    let Structure::Array(structure) = part.structure() else {
        return Ok(None);
    };
    let shape = match address {
        Address::Full => structure.shape.clone(),
        Address::Slice(slice) => output_shape(&slice.resolve(&structure.shape)?),
        Address::Block { block, .. } => structure.block_shape(block)?,
        _ => return Ok(None),
    };
    Ok(Some(shape.iter().product::<usize>() * structure.data_type.itemsize))
}

fn check_limit(nbytes: usize, limit: usize) -> Result<()> {
    if nbytes > limit {
        return Err(ChunkyardError::address(format!(
            "response of {} bytes exceeds the limit of {} bytes; request a block or partition instead",
            nbytes, limit
        )));
    }
    Ok(())
}

async fn read_part(part: &Part, address: &Address, column: Option<&str>) -> Result<DataValue> {
    let table = |t: TableData| -> Result<DataValue> { Ok(DataValue::Table(t)) };
    match (address, part.family()) {
        (Address::Full, StructureFamily::Table) => match column {
            Some(col) => table(part.read_columns(&[col.to_string()]).await?),
            None => part.read().await,
        },
        (Address::Full, _) => part.read().await,
        (Address::Slice(slice), _) => part.read_slice(slice).await,
        (Address::Block { block, slice }, _) => part.read_block(block, slice).await,
        (Address::Partition { partition, columns }, _) => {
            let columns = merge_columns(columns.as_deref(), column)?;
            table(part.read_partition(*partition, columns.as_deref()).await?)
        }
        (Address::Columns(columns), _) => {
            let columns = merge_columns(Some(columns.as_slice()), column)?.unwrap_or_default();
            table(part.read_columns(&columns).await?)
        }
        (Address::Rows { rows, columns }, _) => {
            let columns = merge_columns(columns.as_deref(), column)?;
            table(part.read_rows(rows.clone(), columns.as_deref()).await?)
        }
    }
}

pub fn encode(value: &DataValue, media_type: &str) -> Result<Vec<u8>> {
    match (media_type, value) {
        (JSON, DataValue::Array(array)) => Ok(serde_json::to_vec(&array.to_json())?),
        (JSON, DataValue::Table(table)) => Ok(serde_json::to_vec(table)?),
        (JSON, DataValue::Sparse(coo)) => Ok(serde_json::to_vec(coo)?),
        (JSON, DataValue::Awkward(buffers)) => Ok(serde_json::to_vec(buffers)?),
        (OCTET_STREAM, DataValue::Array(array)) => {
            Ok(array.to_bytes(array.data_type().endianness))
        }
        (other, value) => Err(ChunkyardError::unsupported(
            &format!("encoding as {}", other),
            value.family(),
        )),
    }
}

/// Decode a write payload against the structure declared at `address`.
pub fn decode(part: &Part, address: &Address, media_type: &str, body: &[u8]) -> Result<DataValue> {
    match part.structure() {
        Structure::Array(structure) => {
            let shape = match address {
                Address::Full => structure.shape.clone(),
                Address::Block { block, .. } => structure.block_shape(block)?,
                other => return Err(unwritable(other)),
            };
            let array = match media_type {
                OCTET_STREAM => ArrayData::from_bytes(&structure.data_type, &shape, body)?,
                _ => {
                    let value: serde_json::Value = serde_json::from_slice(body)?;
                    ArrayData::from_json(&value, Some(&structure.data_type))?
                }
            };
            array.check_layout(&structure.data_type, &shape)?;
            Ok(DataValue::Array(array))
        }
        Structure::Table(structure) => {
            require_json(media_type, StructureFamily::Table)?;
            let table: TableData = serde_json::from_slice(body)?;
            structure.check_schema(&table)?;
            Ok(DataValue::Table(table))
        }
        Structure::Sparse(structure) => {
            require_json(media_type, StructureFamily::Sparse)?;
            let coo: CooData = serde_json::from_slice(body)?;
            coo.validate()?;
            let shape = match address {
                Address::Full => structure.shape.clone(),
                Address::Block { block, .. } => structure.block_shape(block)?,
                other => return Err(unwritable(other)),
            };
            if coo.shape != shape {
                return Err(ChunkyardError::validation(format!(
                    "sparse payload has shape {:?}, expected {:?}",
                    coo.shape, shape
                )));
            }
            Ok(DataValue::Sparse(coo))
        }
        Structure::Awkward(structure) => {
            require_json(media_type, StructureFamily::Awkward)?;
            let buffers: AwkwardBuffers = serde_json::from_slice(body)?;
            structure.validate_buffers(&buffers)?;
            Ok(DataValue::Awkward(buffers))
        }
    }
}

fn require_json(media_type: &str, family: StructureFamily) -> Result<()> {
    if media_type == JSON {
        Ok(())
    } else {
        Err(ChunkyardError::unsupported(
            &format!("decoding {}", media_type),
            family,
        ))
    }
}

fn unwritable(address: &Address) -> ChunkyardError {
    ChunkyardError::address(format!("cannot write to address {:?}", address))
}

fn resolve_target<'a>(node: &'a ConsolidatedNode, target: &str) -> Result<(&'a Part, Option<&'a str>)> {
    match node.entry(target)? {
        Entry::Column { part, column } => Ok((part, Some(column))),
        Entry::Part(part) => Ok((part, None)),
    }
}

pub async fn read(catalog: &Catalog, request: &ReadRequest) -> Result<Response> {
    let media_type = negotiate(&request.accept)?;
    let node = catalog.get(&request.node).await?;
    let (part, column) = resolve_target(&node, &request.target)?;
    let limit = catalog.settings().response_bytesize_limit;
    if let Some(nbytes) = estimated_nbytes(part, &request.address)? {
        check_limit(nbytes, limit)?;
    }
    let value = read_part(part, &request.address, column).await?;
    check_limit(value.nbytes(), limit)?;
    let body = encode(&value, media_type)?;
    debug!(
        node = %request.node,
        target = %request.target,
        bytes = body.len(),
        "served read"
    );
    Ok(Response {
        media_type,
        structure: part.structure(),
        body,
    })
}

pub async fn write(catalog: &Catalog, request: &WriteRequest) -> Result<()> {
    let media_type = negotiate(&request.media_type)?;
    let node = catalog.get(&request.node).await?;
    let part = node.part(&request.part)?;
    match &request.address {
        Address::Full => {
            let value = decode(part, &request.address, media_type, &request.body)?;
            part.write(value).await
        }
        Address::Block { block, slice } => {
            if !slice.is_full() {
                return Err(ChunkyardError::address(
                    "block writes replace the whole block; a slice is not allowed",
                ));
            }
            let value = decode(part, &request.address, media_type, &request.body)?;
            part.write_block(value, block).await
        }
        Address::Partition { partition, columns: None } => {
            let table = decode(part, &request.address, media_type, &request.body)?.into_table()?;
            part.write_partition(&table, *partition).await
        }
        other => Err(unwritable(other)),
    }
}
