//! Dense N-dimensional array values

use crate::dtype::{DataType, Element, Endianness, Kind};
use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{NdSlice, ResolvedDim};
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde_json::{json, Value as JsonValue};
use std::ops::Range;

/// A dense array of one of the supported element types
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Apply `$body` to the typed array inside any variant.
macro_rules! dispatch {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            ArrayData::Bool($arr) => $body,
            ArrayData::U8($arr) => $body,
            ArrayData::U16($arr) => $body,
            ArrayData::U32($arr) => $body,
            ArrayData::U64($arr) => $body,
            ArrayData::I8($arr) => $body,
            ArrayData::I16($arr) => $body,
            ArrayData::I32($arr) => $body,
            ArrayData::I64($arr) => $body,
            ArrayData::F32($arr) => $body,
            ArrayData::F64($arr) => $body,
        }
    };
}

/// Pick the element type matching `$dtype` and evaluate `$body` with it bound to `$t`.
macro_rules! with_element_type {
    ($dtype:expr, $t:ident => $body:expr) => {
        match ($dtype.kind, $dtype.itemsize) {
            (Kind::Bool, 1) => {
                type $t = bool;
                $body
            }
            (Kind::Uint, 1) => {
                type $t = u8;
                $body
            }
            (Kind::Uint, 2) => {
                type $t = u16;
                $body
            }
            (Kind::Uint, 4) => {
                type $t = u32;
                $body
            }
            (Kind::Uint, 8) => {
                type $t = u64;
                $body
            }
            (Kind::Int, 1) => {
                type $t = i8;
                $body
            }
            (Kind::Int, 2) => {
                type $t = i16;
                $body
            }
            (Kind::Int, 4) => {
                type $t = i32;
                $body
            }
            (Kind::Int, 8) => {
                type $t = i64;
                $body
            }
            (Kind::Float, 4) => {
                type $t = f32;
                $body
            }
            (Kind::Float, 8) => {
                type $t = f64;
                $body
            }
            _ => {
                return Err(ChunkyardError::validation(format!(
                    "unsupported data type {}",
                    $dtype
                )))
            }
        }
    };
}

fn type_mismatch(expected: DataType, found: &ArrayData) -> ChunkyardError {
    ChunkyardError::validation(format!(
        "data type mismatch: expected {}, found {}",
        expected,
        found.data_type()
    ))
}

impl<T: Element> From<ArrayD<T>> for ArrayData {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl ArrayData {
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        Ok(T::wrap(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    pub fn zeros(dtype: &DataType, shape: &[usize]) -> Result<Self> {
        Ok(with_element_type!(dtype, T => T::wrap(ArrayD::<T>::default(IxDyn(shape)))))
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, arr => arr.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        dispatch!(self, arr => arr.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type, reported as native little-endian
    pub fn data_type(&self) -> DataType {
        dispatch!(self, arr => data_type_of(arr))
    }

    pub fn nbytes(&self) -> usize {
        self.len() * self.data_type().itemsize
    }

    pub fn as_typed<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::unwrap_ref(self)
    }

    /// Check this value can be stored as `dtype` with the given shape.
    pub fn check_layout(&self, dtype: &DataType, shape: &[usize]) -> Result<()> {
        if !self.data_type().same_element(dtype) {
            return Err(type_mismatch(*dtype, self));
        }
        if self.shape() != shape {
            return Err(ChunkyardError::validation(format!(
                "shape mismatch: expected {:?}, found {:?}",
                shape,
                self.shape()
            )));
        }
        Ok(())
    }

    /// Raw bytes in C order with the given byte order.
    pub fn to_bytes(&self, endianness: Endianness) -> Vec<u8> {
        dispatch!(self, arr => encode_all(arr, endianness))
    }

    pub fn from_bytes(dtype: &DataType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.itemsize;
        if bytes.len() != expected {
            return Err(ChunkyardError::validation(format!(
                "expected {} bytes for shape {:?} of {}, found {}",
                expected,
                shape,
                dtype,
                bytes.len()
            )));
        }
        Ok(with_element_type!(dtype, T => {
            let values: Vec<T> = bytes
                .chunks_exact(dtype.itemsize)
                .map(|b| T::decode(b, dtype.endianness))
                .collect();
            T::wrap(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }))
    }

    pub fn slice(&self, slice: &NdSlice) -> Result<Self> {
        if slice.is_full() {
            return Ok(self.clone());
        }
        let dims = slice.resolve(self.shape())?;
        Ok(self.slice_resolved(&dims))
    }

    pub fn slice_resolved(&self, dims: &[ResolvedDim]) -> Self {
        dispatch!(self, arr => ArrayData::from(slice_typed(arr, dims)))
    }

    /// Stack equally-shaped arrays along a new leading axis.
    pub fn stack(parts: &[ArrayData]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| ChunkyardError::validation("cannot stack an empty list of arrays"))?;
        dispatch!(first, arr => stack_like(arr, parts))
    }

    /// Overwrite `region` of `self` with `src`.
    pub fn assign_region(&mut self, region: &[Range<usize>], src: &ArrayData) -> Result<()> {
        dispatch!(self, dst => assign_typed(dst, region, src))
    }

    pub fn to_json(&self) -> JsonValue {
        let data: Vec<JsonValue> = dispatch!(self, arr => arr.iter().map(|v| v.to_json()).collect());
        json!({
            "data_type": self.data_type(),
            "shape": self.shape(),
            "data": data,
        })
    }

    /// Decode the JSON form produced by [`ArrayData::to_json`].
    ///
    /// When `expected` is given it overrides the payload's own `data_type`.
    pub fn from_json(value: &JsonValue, expected: Option<&DataType>) -> Result<Self> {
        let dtype = match expected {
            Some(dtype) => *dtype,
            None => serde_json::from_value(value["data_type"].clone())?,
        };
        let shape: Vec<usize> = serde_json::from_value(value["shape"].clone())?;
        let data = value["data"]
            .as_array()
            .ok_or_else(|| ChunkyardError::validation("array payload is missing 'data'"))?;
        Ok(with_element_type!(dtype, T => {
            let values = data
                .iter()
                .map(|v| {
                    T::from_json(v).ok_or_else(|| {
                        ChunkyardError::validation(format!("value {} is not a valid {}", v, dtype))
                    })
                })
                .collect::<Result<Vec<T>>>()?;
            T::wrap(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
        }))
    }
}

fn data_type_of<T: Element>(_: &ArrayD<T>) -> DataType {
    DataType::of::<T>()
}

fn encode_all<T: Element>(arr: &ArrayD<T>, endianness: Endianness) -> Vec<u8> {
    let mut out = Vec::with_capacity(arr.len() * std::mem::size_of::<T>());
    for value in arr.iter() {
        value.encode(endianness, &mut out);
    }
    out
}

fn slice_typed<T: Element>(arr: &ArrayD<T>, dims: &[ResolvedDim]) -> ArrayD<T> {
    let mut view = arr.view();
    for (axis, dim) in dims.iter().enumerate() {
        view.slice_axis_inplace(
            Axis(axis),
            Slice::new(dim.start as isize, Some(dim.stop as isize), dim.step as isize),
        );
    }
    for (axis, dim) in dims.iter().enumerate().rev() {
        if dim.collapse {
            view = view.index_axis_move(Axis(axis), 0);
        }
    }
    view.to_owned()
}

fn stack_like<T: Element>(_: &ArrayD<T>, parts: &[ArrayData]) -> Result<ArrayData> {
    let views = parts
        .iter()
        .map(|part| {
            T::unwrap_ref(part)
                .map(|a| a.view())
                .ok_or_else(|| type_mismatch(DataType::of::<T>(), part))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(T::wrap(ndarray::stack(Axis(0), &views)?))
}

fn assign_typed<T: Element>(dst: &mut ArrayD<T>, region: &[Range<usize>], src: &ArrayData) -> Result<()> {
    let src = T::unwrap_ref(src).ok_or_else(|| type_mismatch(DataType::of::<T>(), src))?;
    if region.len() != dst.ndim() {
        return Err(ChunkyardError::validation(format!(
            "region has {} dimensions, array has {}",
            region.len(),
            dst.ndim()
        )));
    }
    let mut view = dst.view_mut();
    for (axis, range) in region.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.clone()));
    }
    if view.shape() != src.shape() {
        return Err(ChunkyardError::validation(format!(
            "cannot assign array of shape {:?} into region of shape {:?}",
            src.shape(),
            view.shape()
        )));
    }
    view.assign(src);
    Ok(())
}
