//! Internally managed awkward arrays
//!
//! The buffer set lives in `<root>/buffers/`, one file per buffer key. A write
//! stages the complete set in a sibling directory and swaps it in, so the
//! buffers are always replaced together.

use super::{require_root, AwkwardAdapter, DATA_URI};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::structures::{AwkwardStructure, Structure};
use crate::values::AwkwardBuffers;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::path::PathBuf;
use tracing::debug;

pub struct AwkwardBuffersAdapter {
    root: PathBuf,
    structure: AwkwardStructure,
}

impl AwkwardBuffersAdapter {
    pub fn new(root: PathBuf, structure: AwkwardStructure) -> Self {
        Self { root, structure }
    }

    pub fn from_data_source(data_source: &DataSource) -> Result<Self> {
        match &data_source.structure {
            Structure::Awkward(structure) => Ok(Self::new(
                data_source.asset_path(DATA_URI)?,
                structure.clone(),
            )),
            other => Err(ChunkyardError::CatalogCorrupted(format!(
                "awkward buffer storage cannot serve {} data",
                other.family()
            ))),
        }
    }

    fn buffers_dir(&self) -> PathBuf {
        self.root.join("buffers")
    }
}

#[async_trait]
impl AwkwardAdapter for AwkwardBuffersAdapter {
    fn structure(&self) -> &AwkwardStructure {
        &self.structure
    }

    async fn read_buffers(&self, form_keys: Option<&[String]>) -> Result<AwkwardBuffers> {
        require_root(&self.root).await?;
        let dir = self.buffers_dir();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(ChunkyardError::storage(
                dir.display(),
                "awkward buffers have not been written",
            ));
        }
        let keys: Vec<String> = self
            .structure
            .buffer_keys()?
            .into_iter()
            .filter(|key| match form_keys {
                None => true,
                Some(wanted) => key
                    .rsplit_once('-')
                    .map(|(form_key, _)| wanted.iter().any(|w| w == form_key))
                    .unwrap_or(false),
            })
            .collect();
        let contents = try_join_all(keys.iter().map(|key| {
            let path = dir.join(key);
            async move {
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| ChunkyardError::storage(path.display(), e))
            }
        }))
        .await?;
        Ok(AwkwardBuffers {
            length: self.structure.length,
            buffers: keys.into_iter().zip(contents).collect(),
        })
    }

    async fn write(&self, data: &AwkwardBuffers) -> Result<()> {
        self.structure.validate_buffers(data)?;
        let storage_err = |e: std::io::Error| ChunkyardError::storage(self.root.display(), e);
        let id = uuid::Uuid::new_v4();
        let staging = self.root.join(format!(".staging-{}", id));
        require_root(&self.root).await?;
        tokio::fs::create_dir(&staging).await.map_err(storage_err)?;
        for (key, bytes) in &data.buffers {
            if let Err(e) = tokio::fs::write(staging.join(key), bytes).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(storage_err(e));
            }
        }

        let current = self.buffers_dir();
        let retired = self.root.join(format!(".retired-{}", id));
        let had_previous = tokio::fs::try_exists(&current).await.unwrap_or(false);
        if had_previous {
            tokio::fs::rename(&current, &retired).await.map_err(storage_err)?;
        }
        if let Err(e) = tokio::fs::rename(&staging, &current).await {
            if had_previous {
                let _ = tokio::fs::rename(&retired, &current).await;
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(storage_err(e));
        }
        if had_previous {
            let _ = tokio::fs::remove_dir_all(&retired).await;
        }
        debug!(root = %self.root.display(), buffers = data.buffers.len(), "wrote awkward buffers");
        Ok(())
    }
}
