//! Assets and data sources
//!
//! A [`DataSource`] is the catalog-facing description of where the bytes of
//! one dataset live: its structure, which adapter reads it (by mimetype), the
//! physical [`Asset`]s feeding that adapter, and who owns the storage.

use crate::adapters::AdapterRegistry;
use crate::errors::{ChunkyardError, Result};
use crate::structures::{Structure, StructureFamily};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Who owns the storage behind a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Management {
    /// Allocated, written and reclaimed by the catalog
    Internal,
    /// Pre-existing files the catalog only references
    External,
}

impl Management {
    pub fn as_str(&self) -> &'static str {
        match self {
            Management::Internal => "internal",
            Management::External => "external",
        }
    }
}

/// One physical file or directory backing a data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub data_uri: String,
    #[serde(default)]
    pub is_directory: bool,
    /// Adapter argument this asset feeds
    #[serde(default)]
    pub parameter: Option<String>,
    /// 1-based position when `parameter` takes an ordered list
    #[serde(default)]
    pub num: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Asset {
    pub fn new(data_uri: impl Into<String>, parameter: &str, num: Option<usize>) -> Self {
        Self {
            data_uri: data_uri.into(),
            is_directory: false,
            parameter: Some(parameter.to_string()),
            num,
            id: None,
        }
    }

    /// Asset for a local file, addressed as `file://localhost/...`
    pub fn from_path(path: &Path, parameter: &str, num: Option<usize>) -> Result<Self> {
        Ok(Self::new(uri_from_path(path)?, parameter, num))
    }

    pub fn directory(path: &Path, parameter: &str) -> Result<Self> {
        Ok(Self {
            is_directory: true,
            ..Self::from_path(path, parameter, None)?
        })
    }

    pub fn path(&self) -> Result<PathBuf> {
        path_from_uri(&self.data_uri)
    }
}

/// Render an absolute local path as a `file://localhost/...` URI.
pub fn uri_from_path(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let url = Url::from_file_path(&absolute).map_err(|_| {
        ChunkyardError::validation(format!(
            "cannot express '{}' as a file URI",
            absolute.display()
        ))
    })?;
    Ok(format!("file://localhost{}", url.path()))
}

/// Resolve a `file://` URI on this machine to a path.
pub fn path_from_uri(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri).map_err(|e| ChunkyardError::storage(uri, e))?;
    if url.scheme() != "file" {
        return Err(ChunkyardError::storage(
            uri,
            format!("unsupported URI scheme '{}'", url.scheme()),
        ));
    }
    match url.host_str() {
        None | Some("") | Some("localhost") => {}
        Some(host) => {
            return Err(ChunkyardError::storage(
                uri,
                format!("host '{}' is not this machine", host),
            ))
        }
    }
    url.to_file_path()
        .map_err(|_| ChunkyardError::storage(uri, "not a valid local path"))
}

/// Structure, adapter selection and assets of one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataSource")]
pub struct DataSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub structure_family: StructureFamily,
    pub structure: Structure,
    pub mimetype: Option<String>,
    /// Adapter keyword arguments that are not assets
    pub parameters: Map<String, JsonValue>,
    pub assets: Vec<Asset>,
    pub management: Management,
}

#[derive(Deserialize)]
struct RawDataSource {
    #[serde(default)]
    id: Option<i64>,
    name: String,
    structure_family: StructureFamily,
    structure: JsonValue,
    #[serde(default)]
    mimetype: Option<String>,
    #[serde(default)]
    parameters: Map<String, JsonValue>,
    #[serde(default)]
    assets: Vec<Asset>,
    #[serde(default = "default_management")]
    management: Management,
}

fn default_management() -> Management {
    Management::Internal
}

impl TryFrom<RawDataSource> for DataSource {
    type Error = ChunkyardError;

    fn try_from(raw: RawDataSource) -> Result<Self> {
        let structure = Structure::from_json(raw.structure_family, raw.structure).map_err(|e| {
            ChunkyardError::validation(format!(
                "structure does not describe a {} dataset: {}",
                raw.structure_family, e
            ))
        })?;
        Ok(Self {
            id: raw.id,
            name: raw.name,
            structure_family: raw.structure_family,
            structure,
            mimetype: raw.mimetype,
            parameters: raw.parameters,
            assets: raw.assets,
            management: raw.management,
        })
    }
}

impl DataSource {
    /// An internally managed data source; the catalog allocates its storage.
    pub fn internal(name: impl Into<String>, structure: Structure) -> Self {
        Self {
            id: None,
            name: name.into(),
            structure_family: structure.family(),
            structure,
            mimetype: None,
            parameters: Map::new(),
            assets: Vec::new(),
            management: Management::Internal,
        }
    }

    pub fn external(
        name: impl Into<String>,
        structure: Structure,
        mimetype: &str,
        assets: Vec<Asset>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            structure_family: structure.family(),
            structure,
            mimetype: Some(mimetype.to_string()),
            parameters: Map::new(),
            assets,
            management: Management::External,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: JsonValue) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Assets sorted by parameter, then by `num`
    pub fn assets_by_parameter(&self) -> BTreeMap<String, Vec<&Asset>> {
        let mut grouped: BTreeMap<String, Vec<&Asset>> = BTreeMap::new();
        for asset in &self.assets {
            let key = asset.parameter.clone().unwrap_or_default();
            grouped.entry(key).or_default().push(asset);
        }
        for assets in grouped.values_mut() {
            assets.sort_by_key(|a| a.num.unwrap_or(0));
        }
        grouped
    }

    /// Local paths of the assets feeding `parameter`, in order
    pub fn asset_paths(&self, parameter: &str) -> Result<Vec<PathBuf>> {
        self.assets_by_parameter()
            .get(parameter)
            .map(|assets| assets.iter().map(|a| a.path()).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Single asset path for a non-list parameter
    pub fn asset_path(&self, parameter: &str) -> Result<PathBuf> {
        let paths = self.asset_paths(parameter)?;
        match paths.as_slice() {
            [path] => Ok(path.clone()),
            [] => Err(ChunkyardError::CatalogCorrupted(format!(
                "data source '{}' has no asset for parameter '{}'",
                self.name, parameter
            ))),
            _ => Err(ChunkyardError::CatalogCorrupted(format!(
                "data source '{}' has {} assets for single parameter '{}'",
                self.name,
                paths.len(),
                parameter
            ))),
        }
    }

    /// The mimetype selecting this data source's adapter
    pub fn effective_mimetype<'a>(&'a self, registry: &'a AdapterRegistry) -> Result<&'a str> {
        match &self.mimetype {
            Some(mimetype) => Ok(mimetype),
            None if self.management == Management::Internal => {
                registry.default_internal(self.structure_family)
            }
            None => Err(ChunkyardError::validation(
                "an external data source needs a mimetype",
            )),
        }
    }

    /// Check the record is well formed and consistent with the registered adapter.
    ///
    /// External assets must already exist; nothing is created here.
    pub fn validate(&self, registry: &AdapterRegistry) -> Result<()> {
        if self.name.is_empty() {
            return Err(ChunkyardError::validation("data source name must not be empty"));
        }
        if self.structure.family() != self.structure_family {
            return Err(ChunkyardError::validation(format!(
                "structure_family is '{}' but structure describes a {} dataset",
                self.structure_family,
                self.structure.family()
            )));
        }
        self.structure.validate()?;

        let mimetype = self.effective_mimetype(registry)?;
        let spec = registry.get(mimetype)?;
        if spec.family != self.structure_family {
            return Err(ChunkyardError::validation(format!(
                "mimetype '{}' reads {} data, not {}",
                mimetype, spec.family, self.structure_family
            )));
        }
        for key in self.parameters.keys() {
            if !spec.options.contains(&key.as_str()) {
                return Err(ChunkyardError::validation(format!(
                    "adapter for '{}' has no option '{}'",
                    mimetype, key
                )));
            }
        }

        match self.management {
            Management::Internal => {
                if !spec.internal {
                    return Err(ChunkyardError::validation(format!(
                        "mimetype '{}' cannot back internally managed storage",
                        mimetype
                    )));
                }
                if !self.assets.is_empty() {
                    return Err(ChunkyardError::validation(
                        "internally managed data sources must not list assets",
                    ));
                }
                Ok(())
            }
            Management::External => {
                if spec.internal {
                    return Err(ChunkyardError::validation(format!(
                        "mimetype '{}' is reserved for internally managed storage",
                        mimetype
                    )));
                }
                self.validate_assets(registry, mimetype)?;
                for asset in &self.assets {
                    let path = asset.path()?;
                    let found = if asset.is_directory {
                        path.is_dir()
                    } else {
                        path.is_file()
                    };
                    if !found {
                        return Err(ChunkyardError::storage(
                            &asset.data_uri,
                            "external asset does not exist",
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Parameter names and ordinals only; does not touch storage.
    pub fn validate_assets(&self, registry: &AdapterRegistry, mimetype: &str) -> Result<()> {
        let spec = registry.get(mimetype)?;
        if self.assets.is_empty() {
            return Err(ChunkyardError::validation("data source lists no assets"));
        }
        let grouped = self.assets_by_parameter();
        for (parameter, assets) in &grouped {
            let declared = spec
                .parameters
                .iter()
                .find(|p| p.name == parameter)
                .ok_or_else(|| {
                    ChunkyardError::validation(format!(
                        "adapter for '{}' has no parameter '{}'",
                        mimetype, parameter
                    ))
                })?;
            let nums: Vec<usize> = assets.iter().map(|a| a.num.unwrap_or(0)).collect();
            if declared.list {
                let single_unnumbered = nums == [0];
                let contiguous = nums.iter().enumerate().all(|(i, &n)| n == i + 1);
                if !(single_unnumbered || contiguous) {
                    return Err(ChunkyardError::validation(format!(
                        "assets for parameter '{}' must be numbered 1..{} without gaps, found {:?}",
                        parameter,
                        nums.len(),
                        nums
                    )));
                }
            } else if nums != [0] {
                return Err(ChunkyardError::validation(format!(
                    "parameter '{}' takes a single unnumbered asset, found {:?}",
                    parameter, nums
                )));
            }
        }
        if let Some(missing) = spec
            .parameters
            .iter()
            .find(|p| !grouped.contains_key(p.name))
        {
            return Err(ChunkyardError::validation(format!(
                "adapter for '{}' requires parameter '{}'",
                mimetype, missing.name
            )));
        }
        Ok(())
    }
}
