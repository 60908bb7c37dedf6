//! Multi-dimensional slice requests
//!
//! An [`NdSlice`] is an ordered list of per-dimension selectors as sent over the
//! wire (`"0:2,1,::2"`). It is resolved against a concrete shape into
//! [`ResolvedDim`]s before any data is touched.

use crate::errors::{ChunkyardError, Result};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Selector for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimSelector {
    /// Single position; the dimension is dropped from the result
    Index(isize),
    /// Python-style `start:stop:step`, each part optional
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    },
    /// Stands for as many full ranges as needed to cover the remaining dimensions
    Ellipsis,
}

impl DimSelector {
    pub fn all() -> Self {
        DimSelector::Range {
            start: None,
            stop: None,
            step: None,
        }
    }

    pub fn range(start: usize, stop: usize) -> Self {
        DimSelector::Range {
            start: Some(start as isize),
            stop: Some(stop as isize),
            step: None,
        }
    }

    fn is_all(&self) -> bool {
        match self {
            DimSelector::Ellipsis => true,
            DimSelector::Range { start, stop, step } => {
                matches!(start, None | Some(0)) && stop.is_none() && matches!(step, None | Some(1))
            }
            DimSelector::Index(_) => false,
        }
    }

    /// Resolve against a dimension of length `len`.
    pub fn resolve(&self, len: usize) -> Result<ResolvedDim> {
        match *self {
            DimSelector::Index(i) => {
                let index = normalize_index(i, len)?;
                Ok(ResolvedDim {
                    start: index,
                    stop: index + 1,
                    step: 1,
                    collapse: true,
                })
            }
            DimSelector::Range { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step <= 0 {
                    return Err(ChunkyardError::address(format!(
                        "slice step must be positive, got {}",
                        step
                    )));
                }
                let start = clamp_bound(start.unwrap_or(0), len);
                let stop = clamp_bound(stop.unwrap_or(len as isize), len).max(start);
                Ok(ResolvedDim {
                    start,
                    stop,
                    step: step as usize,
                    collapse: false,
                })
            }
            DimSelector::Ellipsis => Err(ChunkyardError::address(
                "ellipsis must be expanded before resolving",
            )),
        }
    }
}

fn normalize_index(i: isize, len: usize) -> Result<usize> {
    let resolved = if i < 0 { i + len as isize } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(ChunkyardError::address(format!(
            "index {} is out of bounds for dimension of length {}",
            i, len
        )));
    }
    Ok(resolved as usize)
}

fn clamp_bound(bound: isize, len: usize) -> usize {
    let len = len as isize;
    let bound = if bound < 0 { bound + len } else { bound };
    bound.clamp(0, len) as usize
}

/// A selector after resolution: elements `start, start+step, ... < stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDim {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
    /// Whether the dimension is dropped from the output
    pub collapse: bool,
}

impl ResolvedDim {
    /// Number of selected positions
    pub fn len(&self) -> usize {
        if self.stop <= self.start {
            0
        } else {
            (self.stop - self.start).div_ceil(self.step)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest contiguous range holding every selected position
    pub fn bounds(&self) -> Range<usize> {
        match self.len() {
            0 => self.start..self.start,
            n => self.start..self.start + (n - 1) * self.step + 1,
        }
    }

    /// Output position of input coordinate `i`, if selected
    pub fn position_of(&self, i: usize) -> Option<usize> {
        if i < self.start || i >= self.stop || (i - self.start) % self.step != 0 {
            return None;
        }
        Some((i - self.start) / self.step)
    }
}

/// Shape of the result of applying `dims`
pub fn output_shape(dims: &[ResolvedDim]) -> Vec<usize> {
    dims.iter()
        .filter(|d| !d.collapse)
        .map(ResolvedDim::len)
        .collect()
}

/// Ordered per-dimension selection; empty selects everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdSlice(Vec<DimSelector>);

impl NdSlice {
    pub fn full() -> Self {
        NdSlice(Vec::new())
    }

    pub fn new(selectors: Vec<DimSelector>) -> Self {
        NdSlice(selectors)
    }

    pub fn index(i: isize) -> Self {
        NdSlice(vec![DimSelector::Index(i)])
    }

    pub fn range(start: usize, stop: usize) -> Self {
        NdSlice(vec![DimSelector::range(start, stop)])
    }

    pub fn from_ranges(ranges: &[Range<usize>]) -> Self {
        NdSlice(
            ranges
                .iter()
                .map(|r| DimSelector::range(r.start, r.end))
                .collect(),
        )
    }

    pub fn selectors(&self) -> &[DimSelector] {
        &self.0
    }

    /// True when the slice selects the whole dataset unchanged.
    pub fn is_full(&self) -> bool {
        self.0.iter().all(DimSelector::is_all)
    }

    /// Replace the ellipsis (if any) and pad with full ranges so exactly `ndim`
    /// explicit selectors remain.
    pub fn expand(&self, ndim: usize) -> Result<Vec<DimSelector>> {
        let ellipses = self
            .0
            .iter()
            .filter(|s| matches!(s, DimSelector::Ellipsis))
            .count();
        if ellipses > 1 {
            return Err(ChunkyardError::address(format!(
                "slice '{}' contains more than one ellipsis",
                self
            )));
        }
        let explicit = self.0.len() - ellipses;
        if explicit > ndim {
            return Err(ChunkyardError::address(format!(
                "slice '{}' has {} selectors for {} dimensions",
                self, explicit, ndim
            )));
        }
        let mut expanded = Vec::with_capacity(ndim);
        for selector in &self.0 {
            match selector {
                DimSelector::Ellipsis => {
                    expanded.extend(std::iter::repeat(DimSelector::all()).take(ndim - explicit))
                }
                other => expanded.push(*other),
            }
        }
        while expanded.len() < ndim {
            expanded.push(DimSelector::all());
        }
        Ok(expanded)
    }

    pub fn resolve(&self, shape: &[usize]) -> Result<Vec<ResolvedDim>> {
        self.expand(shape.len())?
            .iter()
            .zip(shape)
            .map(|(selector, &len)| selector.resolve(len))
            .collect()
    }
}

impl FromStr for NdSlice {
    type Err = ChunkyardError;

    /// Parse `"0:2,1,::2,..."`; the empty string selects everything.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(NdSlice::full());
        }
        s.split(',').map(parse_selector).collect::<Result<_>>().map(NdSlice)
    }
}

fn parse_selector(part: &str) -> Result<DimSelector> {
    let part = part.trim();
    if part == "..." {
        return Ok(DimSelector::Ellipsis);
    }
    let pieces: Vec<&str> = part.split(':').collect();
    let parse_bound = |piece: &str| -> Result<Option<isize>> {
        let piece = piece.trim();
        if piece.is_empty() {
            return Ok(None);
        }
        piece.parse::<isize>().map(Some).map_err(|_| {
            ChunkyardError::address(format!("invalid slice bound '{}' in '{}'", piece, part))
        })
    };
    match pieces.as_slice() {
        [single] => parse_bound(single)?
            .map(DimSelector::Index)
            .ok_or_else(|| ChunkyardError::address("empty dimension selector")),
        [start, stop] => Ok(DimSelector::Range {
            start: parse_bound(start)?,
            stop: parse_bound(stop)?,
            step: None,
        }),
        [start, stop, step] => Ok(DimSelector::Range {
            start: parse_bound(start)?,
            stop: parse_bound(stop)?,
            step: parse_bound(step)?,
        }),
        _ => Err(ChunkyardError::address(format!(
            "invalid dimension selector '{}'",
            part
        ))),
    }
}

impl fmt::Display for NdSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_bound = |b: Option<isize>| b.map(|v| v.to_string()).unwrap_or_default();
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|selector| match *selector {
                DimSelector::Index(i) => i.to_string(),
                DimSelector::Ellipsis => "...".to_string(),
                DimSelector::Range {
                    start,
                    stop,
                    step: None,
                } => format!("{}:{}", fmt_bound(start), fmt_bound(stop)),
                DimSelector::Range { start, stop, step } => format!(
                    "{}:{}:{}",
                    fmt_bound(start),
                    fmt_bound(stop),
                    fmt_bound(step)
                ),
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}
