//! Sparse coordinate (COO) values

use crate::errors::{ChunkyardError, Result};
use crate::ndslice::{output_shape, NdSlice, ResolvedDim};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Coordinate-list sparse array of `f64` values
///
/// `coords[d][k]` is the coordinate along dimension `d` of the `k`-th stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooData {
    pub shape: Vec<usize>,
    pub coords: Vec<Vec<usize>>,
    pub data: Vec<f64>,
}

impl CooData {
    pub fn new(shape: Vec<usize>, coords: Vec<Vec<usize>>, data: Vec<f64>) -> Result<Self> {
        let coo = Self {
            shape,
            coords,
            data,
        };
        coo.validate()?;
        Ok(coo)
    }

    pub fn empty(shape: Vec<usize>) -> Self {
        let coords = vec![Vec::new(); shape.len()];
        Self {
            shape,
            coords,
            data: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.coords.len() != self.shape.len() {
            return Err(ChunkyardError::validation(format!(
                "sparse array of {} dimensions has {} coordinate lists",
                self.shape.len(),
                self.coords.len()
            )));
        }
        for (dim, (coords, &len)) in self.coords.iter().zip(&self.shape).enumerate() {
            if coords.len() != self.data.len() {
                return Err(ChunkyardError::validation(format!(
                    "dimension {} has {} coordinates for {} values",
                    dim,
                    coords.len(),
                    self.data.len()
                )));
            }
            if let Some(bad) = coords.iter().find(|&&c| c >= len) {
                return Err(ChunkyardError::validation(format!(
                    "coordinate {} is out of bounds for dimension {} of length {}",
                    bad, dim, len
                )));
            }
        }
        Ok(())
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn coordinate(&self, k: usize) -> Vec<usize> {
        self.coords.iter().map(|c| c[k]).collect()
    }

    pub fn from_dense(array: &ArrayD<f64>) -> Self {
        let ndim = array.ndim();
        let mut coo = Self::empty(array.shape().to_vec());
        for (index, &value) in array.indexed_iter() {
            if value != 0.0 {
                for d in 0..ndim {
                    coo.coords[d].push(index[d]);
                }
                coo.data.push(value);
            }
        }
        coo
    }

    /// Duplicate coordinates are summed.
    pub fn to_dense(&self) -> ArrayD<f64> {
        let mut dense = ArrayD::<f64>::zeros(IxDyn(&self.shape));
        for (k, &value) in self.data.iter().enumerate() {
            dense[IxDyn(&self.coordinate(k))] += value;
        }
        dense
    }

    pub fn slice(&self, slice: &NdSlice) -> Result<Self> {
        if slice.is_full() {
            return Ok(self.clone());
        }
        let dims = slice.resolve(&self.shape)?;
        Ok(self.slice_resolved(&dims))
    }

    /// Keep the entries selected by `dims`, renumbered into the output shape.
    pub fn slice_resolved(&self, dims: &[ResolvedDim]) -> Self {
        let mut out = Self::empty(output_shape(dims));
        'entries: for k in 0..self.nnz() {
            let mut position = Vec::with_capacity(out.shape.len());
            for (dim, coords) in dims.iter().zip(&self.coords) {
                match dim.position_of(coords[k]) {
                    Some(p) if !dim.collapse => position.push(p),
                    Some(_) => {}
                    None => continue 'entries,
                }
            }
            for (d, p) in position.into_iter().enumerate() {
                out.coords[d].push(p);
            }
            out.data.push(self.data[k]);
        }
        out
    }

    pub fn nbytes(&self) -> usize {
        self.data.len() * (8 + 8 * self.shape.len())
    }
}
