//! The catalog: consolidated nodes persisted in SQLite
//!
//! Creating a node validates every part, allocates storage for the internally
//! managed ones and records everything in a single transaction. Either all
//! parts are registered or none are, and storage allocated for a create that
//! did not commit is released again.

pub mod storage;
mod store;

pub use self::storage::{AllocationGuard, StorageAllocator};

use crate::adapters::{AdapterContext, AdapterRegistry, AnyAdapter, Metadata, DATA_URI};
use crate::config::Settings;
use crate::data_source::{Asset, DataSource, Management};
use crate::errors::{ChunkyardError, ErrorKind, Result};
use crate::locks::ChunkLocks;
use crate::node::ConsolidatedNode;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const IN_MEMORY: &str = "sqlite::memory:";

pub struct Catalog {
    pool: SqlitePool,
    settings: Arc<Settings>,
    registry: Arc<AdapterRegistry>,
    context: AdapterContext,
    locks: Arc<ChunkLocks>,
    storage: StorageAllocator,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("database_uri", &self.settings.database_uri)
            .field("writable_storage", &self.storage.root())
            .finish()
    }
}

/// Bounded pool; waiting for a connection is limited by the acquire timeout.
async fn connect(settings: &Settings) -> Result<SqlitePool> {
    let pool_options =
        SqlitePoolOptions::new().acquire_timeout(settings.database_acquire_timeout);
    let pool = match &settings.database_uri {
        Some(uri) if !settings.is_in_memory() => {
            let options = if uri.starts_with("sqlite:") {
                SqliteConnectOptions::from_str(uri)?
            } else {
                SqliteConnectOptions::new().filename(uri)
            };
            let options = options
                .create_if_missing(settings.database_init_if_not_exists)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(settings.database_acquire_timeout);
            pool_options
                .max_connections(settings.database_pool_size)
                .connect_with(options)
                .await?
        }
        // Every connection to :memory: opens its own database, so keep exactly one alive.
        _ => {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str(IN_MEMORY)?)
                .await?
        }
    };
    Ok(pool)
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') {
        return Err(ChunkyardError::validation(format!(
            "invalid node key '{}': must be non-empty and contain no '/'",
            key
        )));
    }
    Ok(())
}

/// Name the offending record in validation failures; other errors pass through.
fn invalid_record(index: usize, data_source: &DataSource, error: ChunkyardError) -> ChunkyardError {
    match error {
        ChunkyardError::InvalidDataSource { .. } => error,
        error if error.kind() == ErrorKind::Validation => ChunkyardError::InvalidDataSource {
            index,
            name: data_source.name.clone(),
            message: error.to_string(),
        },
        error => error,
    }
}

impl Catalog {
    pub async fn open(settings: Settings) -> Result<Self> {
        Self::open_with_registry(settings, AdapterRegistry::with_defaults()).await
    }

    pub async fn open_with_registry(settings: Settings, registry: AdapterRegistry) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let pool = connect(&settings).await?;
        if settings.is_in_memory() || settings.database_init_if_not_exists {
            store::initialize(&pool).await?;
        } else if !store::is_initialized(&pool).await? {
            return Err(ChunkyardError::CatalogCorrupted(format!(
                "database {} has no catalog schema; initialize it first",
                settings.database_uri.as_deref().unwrap_or(IN_MEMORY)
            )));
        }

        let storage = StorageAllocator::open(&settings.writable_storage).await?;
        let context = AdapterContext::new(Arc::clone(&settings))?;
        let locks = Arc::new(ChunkLocks::new(settings.write_lock_timeout));
        info!(
            database = settings.database_uri.as_deref().unwrap_or(IN_MEMORY),
            storage = %storage.root().display(),
            "catalog opened"
        );
        Ok(Self {
            pool,
            settings,
            registry: Arc::new(registry),
            context,
            locks,
            storage,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn context(&self) -> &AdapterContext {
        &self.context
    }

    /// Validate, allocate storage for, and instantiate the adapters of new parts.
    ///
    /// `first_index` is the position of `parts[0]` in the caller's request.
    async fn prepare_parts(
        &self,
        parts: Vec<DataSource>,
        first_index: usize,
        guard: &mut AllocationGuard,
    ) -> Result<Vec<(DataSource, AnyAdapter)>> {
        for (i, data_source) in parts.iter().enumerate() {
            data_source
                .validate(&self.registry)
                .map_err(|e| invalid_record(first_index + i, data_source, e))?;
        }

        let mut prepared = Vec::with_capacity(parts.len());
        for (i, mut data_source) in parts.into_iter().enumerate() {
            if data_source.management == Management::Internal {
                let mimetype = data_source.effective_mimetype(&self.registry)?.to_string();
                let parameter = self
                    .registry
                    .get(&mimetype)?
                    .parameters
                    .first()
                    .map(|p| p.name)
                    .unwrap_or(DATA_URI);
                let dir = self.storage.allocate().await?;
                guard.track(dir.clone());
                data_source.assets = vec![Asset::directory(&dir, parameter)?];
                data_source.mimetype = Some(mimetype);
            }
            let adapter = self
                .registry
                .instantiate(&data_source, &self.context)
                .map_err(|e| invalid_record(first_index + i, &data_source, e))?;
            prepared.push((data_source, adapter));
        }
        Ok(prepared)
    }

    /// Allocate storage for `parts` and record the node in one transaction.
    async fn insert_node(
        &self,
        key: &str,
        metadata: &Metadata,
        parts: Vec<DataSource>,
        guard: &mut AllocationGuard,
    ) -> Result<(Vec<(DataSource, AnyAdapter)>, DateTime<Utc>)> {
        let mut prepared = self.prepare_parts(parts, 0, guard).await?;
        let time_created = Utc::now();

        let mut tx = self.pool.begin().await?;
        let node_id = store::insert_node(&mut tx, key, metadata, time_created)
            .await
            .map_err(|e| {
                if store::is_unique_violation(&e) {
                    ChunkyardError::validation(format!("node '{}' already exists", key))
                } else {
                    e
                }
            })?;
        for (data_source, _) in prepared.iter_mut() {
            store::insert_data_source(&mut tx, node_id, data_source).await?;
        }
        tx.commit().await?;
        Ok((prepared, time_created))
    }

    async fn insert_part(
        &self,
        node_id: i64,
        key: &str,
        data_source: DataSource,
        index: usize,
        guard: &mut AllocationGuard,
    ) -> Result<()> {
        let mut prepared = self.prepare_parts(vec![data_source], index, guard).await?;
        let mut tx = self.pool.begin().await?;
        for (data_source, _) in prepared.iter_mut() {
            store::insert_data_source(&mut tx, node_id, data_source)
                .await
                .map_err(|e| {
                    if store::is_unique_violation(&e) {
                        ChunkyardError::validation(format!(
                            "node '{}' already has a part named '{}'",
                            key, data_source.name
                        ))
                    } else {
                        e
                    }
                })?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Create a node from an ordered list of parts, atomically.
    pub async fn create_consolidated(
        &self,
        key: &str,
        metadata: Metadata,
        parts: Vec<DataSource>,
    ) -> Result<ConsolidatedNode> {
        check_key(key)?;
        let mut names = HashSet::new();
        for (i, part) in parts.iter().enumerate() {
            if !names.insert(part.name.as_str()) {
                return Err(ChunkyardError::InvalidDataSource {
                    index: i,
                    name: part.name.clone(),
                    message: "duplicate part name".to_string(),
                });
            }
        }
        if store::find_node(&self.pool, key).await?.is_some() {
            return Err(ChunkyardError::validation(format!(
                "node '{}' already exists",
                key
            )));
        }

        let mut guard = AllocationGuard::new();
        let (prepared, time_created) =
            match self.insert_node(key, &metadata, parts, &mut guard).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    guard.release().await;
                    return Err(e);
                }
            };
        guard.commit();

        info!(key, parts = prepared.len(), "created consolidated node");
        Ok(ConsolidatedNode::assemble(
            key.to_string(),
            metadata,
            time_created,
            prepared,
            Arc::clone(&self.locks),
        ))
    }

    /// Add one part to an existing node, with the same guarantees as creation.
    pub async fn add_part(&self, key: &str, data_source: DataSource) -> Result<ConsolidatedNode> {
        let record = store::find_node(&self.pool, key)
            .await?
            .ok_or_else(|| ChunkyardError::NotFound(format!("node '{}'", key)))?;
        let existing = store::load_data_sources(&self.pool, record.id).await?;
        if existing.iter().any(|ds| ds.name == data_source.name) {
            return Err(ChunkyardError::InvalidDataSource {
                index: existing.len(),
                name: data_source.name,
                message: "duplicate part name".to_string(),
            });
        }

        let mut guard = AllocationGuard::new();
        if let Err(e) = self
            .insert_part(record.id, key, data_source, existing.len(), &mut guard)
            .await
        {
            guard.release().await;
            return Err(e);
        }
        guard.commit();
        debug!(key, "added part");
        self.get(key).await
    }

    pub async fn get(&self, key: &str) -> Result<ConsolidatedNode> {
        let record = store::find_node(&self.pool, key)
            .await?
            .ok_or_else(|| ChunkyardError::NotFound(format!("node '{}'", key)))?;
        let data_sources = store::load_data_sources(&self.pool, record.id).await?;
        let mut parts = Vec::with_capacity(data_sources.len());
        for data_source in data_sources {
            let adapter = self
                .registry
                .instantiate(&data_source, &self.context)
                .map_err(|e| {
                    ChunkyardError::CatalogCorrupted(format!(
                        "part '{}' of node '{}' cannot be served: {}",
                        data_source.name, key, e
                    ))
                })?;
            parts.push((data_source, adapter));
        }
        Ok(ConsolidatedNode::assemble(
            record.key,
            record.metadata,
            record.time_created,
            parts,
            Arc::clone(&self.locks),
        ))
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        store::list_keys(&self.pool).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(store::find_node(&self.pool, key).await?.is_some())
    }

    /// Delete a node: reclaim internally managed storage, then drop the records.
    ///
    /// In-flight writes to the node's parts are waited for. External files are
    /// never touched.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let record = store::find_node(&self.pool, key)
            .await?
            .ok_or_else(|| ChunkyardError::NotFound(format!("node '{}'", key)))?;
        let data_sources = store::load_data_sources(&self.pool, record.id).await?;

        let mut held = Vec::with_capacity(data_sources.len());
        for data_source in &data_sources {
            if let Some(id) = data_source.id {
                held.push(self.locks.lock_dataset(id).await?);
            }
        }
        for data_source in &data_sources {
            if data_source.management != Management::Internal {
                continue;
            }
            for asset in &data_source.assets {
                self.storage.reclaim(&asset.path()?).await?;
            }
        }

        let mut tx = self.pool.begin().await?;
        store::delete_node(&mut tx, record.id).await?;
        tx.commit().await?;
        drop(held);
        for id in data_sources.iter().filter_map(|ds| ds.id) {
            self.locks.forget(id);
        }
        info!(key, parts = data_sources.len(), "deleted node");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("catalog closed");
    }
}
