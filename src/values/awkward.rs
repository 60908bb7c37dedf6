//! Buffers backing an irregular (awkward) array

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The flat buffers of an awkward array, keyed `{form_key}-{role}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwkwardBuffers {
    pub length: usize,
    pub buffers: BTreeMap<String, Vec<u8>>,
}

impl AwkwardBuffers {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            buffers: BTreeMap::new(),
        }
    }

    pub fn with_buffer(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.buffers.insert(key.into(), bytes);
        self
    }

    pub fn nbytes(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }
}
