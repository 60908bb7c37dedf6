use crate::errors::{ChunkyardError, Result};
use crate::values::AwkwardBuffers;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Length and form of an irregular (awkward) array
///
/// The form is kept as the JSON document awkward produces; it is walked on
/// demand to find which buffers a complete value must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwkwardStructure {
    pub length: usize,
    pub form: JsonValue,
}

impl AwkwardStructure {
    pub fn new(length: usize, form: JsonValue) -> Result<Self> {
        let structure = Self { length, form };
        structure.validate()?;
        Ok(structure)
    }

    pub fn validate(&self) -> Result<()> {
        let mut keys = BTreeSet::new();
        collect_nodes(&self.form, Some(self.length), &mut keys, &mut BTreeMap::new())
    }

    /// Every buffer key (`{form_key}-{role}`) the form requires
    pub fn buffer_keys(&self) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        collect_nodes(&self.form, Some(self.length), &mut keys, &mut BTreeMap::new())?;
        Ok(keys)
    }

    /// Byte lengths that follow from `length` alone, for nodes whose length
    /// does not depend on buffer contents
    pub fn known_buffer_sizes(&self) -> Result<BTreeMap<String, usize>> {
        let mut sizes = BTreeMap::new();
        collect_nodes(&self.form, Some(self.length), &mut BTreeSet::new(), &mut sizes)?;
        Ok(sizes)
    }

    pub fn form_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .buffer_keys()?
            .into_iter()
            .filter_map(|k| k.rsplit_once('-').map(|(form_key, _)| form_key.to_string()))
            .collect();
        keys.dedup();
        Ok(keys)
    }

    /// Check a buffer set carries exactly the required keys with consistent sizes.
    pub fn validate_buffers(&self, buffers: &AwkwardBuffers) -> Result<()> {
        if buffers.length != self.length {
            return Err(ChunkyardError::validation(format!(
                "awkward value has length {}, structure declares {}",
                buffers.length, self.length
            )));
        }
        let expected = self.buffer_keys()?;
        let found: BTreeSet<String> = buffers.buffers.keys().cloned().collect();
        if let Some(missing) = expected.difference(&found).next() {
            return Err(ChunkyardError::validation(format!(
                "awkward value is missing buffer '{}'",
                missing
            )));
        }
        if let Some(extra) = found.difference(&expected).next() {
            return Err(ChunkyardError::validation(format!(
                "awkward value has unexpected buffer '{}'",
                extra
            )));
        }
        for (key, size) in self.known_buffer_sizes()? {
            let actual = buffers.buffers.get(&key).map(Vec::len).unwrap_or(0);
            if actual != size {
                return Err(ChunkyardError::validation(format!(
                    "buffer '{}' holds {} bytes, expected {}",
                    key, actual, size
                )));
            }
        }
        Ok(())
    }
}

fn form_error(message: impl Into<String>) -> ChunkyardError {
    ChunkyardError::validation(format!("invalid awkward form: {}", message.into()))
}

fn index_size(name: &str) -> Result<usize> {
    match name {
        "i8" | "u8" => Ok(1),
        "i32" | "u32" => Ok(4),
        "i64" => Ok(8),
        other => Err(form_error(format!("unknown index type '{}'", other))),
    }
}

fn primitive_size(name: &str) -> Result<usize> {
    match name {
        "bool" | "int8" | "uint8" => Ok(1),
        "int16" | "uint16" | "float16" => Ok(2),
        "int32" | "uint32" | "float32" => Ok(4),
        "int64" | "uint64" | "float64" | "complex64" | "datetime64" | "timedelta64" => Ok(8),
        "complex128" => Ok(16),
        other => Err(form_error(format!("unknown primitive '{}'", other))),
    }
}

fn str_field<'a>(node: &'a JsonValue, field: &str) -> Result<&'a str> {
    node.get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| form_error(format!("node is missing string field '{}'", field)))
}

fn child<'a>(node: &'a JsonValue, field: &str) -> Result<&'a JsonValue> {
    node.get(field)
        .ok_or_else(|| form_error(format!("node is missing '{}'", field)))
}

/// Walk one form node.
///
/// `length` is the node's length when it follows from the parent's; only then
/// are buffer sizes recorded.
fn collect_nodes(
    node: &JsonValue,
    length: Option<usize>,
    keys: &mut BTreeSet<String>,
    sizes: &mut BTreeMap<String, usize>,
) -> Result<()> {
    let class = str_field(node, "class")?;
    let buffer = |keys: &mut BTreeSet<String>,
                  sizes: &mut BTreeMap<String, usize>,
                  role: &str,
                  size: Option<usize>|
     -> Result<()> {
        let key = format!("{}-{}", str_field(node, "form_key")?, role);
        if let Some(size) = size {
            sizes.insert(key.clone(), size);
        }
        keys.insert(key);
        Ok(())
    };

    match class {
        "EmptyArray" => Ok(()),
        "NumpyArray" => {
            let itemsize = primitive_size(str_field(node, "primitive")?)?;
            let inner: usize = match node.get("inner_shape") {
                Some(JsonValue::Array(dims)) => dims
                    .iter()
                    .map(|d| d.as_u64().map(|d| d as usize))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| form_error("inner_shape must list integers"))?
                    .iter()
                    .product(),
                _ => 1,
            };
            buffer(keys, sizes, "data", length.map(|n| n * inner * itemsize))
        }
        "ListOffsetArray" => {
            let size = index_size(str_field(node, "offsets")?)?;
            buffer(keys, sizes, "offsets", length.map(|n| (n + 1) * size))?;
            collect_nodes(child(node, "content")?, None, keys, sizes)
        }
        "ListArray" => {
            let size = index_size(str_field(node, "starts")?)?;
            buffer(keys, sizes, "starts", length.map(|n| n * size))?;
            buffer(keys, sizes, "stops", length.map(|n| n * size))?;
            collect_nodes(child(node, "content")?, None, keys, sizes)
        }
        "RegularArray" => {
            let width = child(node, "size")?
                .as_u64()
                .ok_or_else(|| form_error("RegularArray size must be an integer"))?
                as usize;
            collect_nodes(child(node, "content")?, length.map(|n| n * width), keys, sizes)
        }
        "IndexedArray" | "IndexedOptionArray" => {
            let size = index_size(str_field(node, "index")?)?;
            buffer(keys, sizes, "index", length.map(|n| n * size))?;
            collect_nodes(child(node, "content")?, None, keys, sizes)
        }
        "ByteMaskedArray" => {
            buffer(keys, sizes, "mask", length)?;
            collect_nodes(child(node, "content")?, length, keys, sizes)
        }
        "BitMaskedArray" => {
            buffer(keys, sizes, "mask", length.map(|n| n.div_ceil(8)))?;
            collect_nodes(child(node, "content")?, None, keys, sizes)
        }
        "UnmaskedArray" => collect_nodes(child(node, "content")?, length, keys, sizes),
        "RecordArray" => match child(node, "contents")? {
            JsonValue::Array(contents) => contents
                .iter()
                .try_for_each(|c| collect_nodes(c, length, keys, sizes)),
            JsonValue::Object(contents) => contents
                .values()
                .try_for_each(|c| collect_nodes(c, length, keys, sizes)),
            _ => Err(form_error("RecordArray contents must be a list or mapping")),
        },
        "UnionArray" => {
            let size = index_size(str_field(node, "index")?)?;
            buffer(keys, sizes, "tags", length)?;
            buffer(keys, sizes, "index", length.map(|n| n * size))?;
            match child(node, "contents")? {
                JsonValue::Array(contents) => contents
                    .iter()
                    .try_for_each(|c| collect_nodes(c, None, keys, sizes)),
                _ => Err(form_error("UnionArray contents must be a list")),
            }
        }
        other => Err(form_error(format!("unknown class '{}'", other))),
    }
}
