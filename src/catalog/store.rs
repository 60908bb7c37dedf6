//! Relational catalog records
//!
//! Three tables: `nodes`, `data_sources` (one row per part, indexed by node)
//! and `assets` (one row per physical URI, indexed by data source). JSON
//! columns hold metadata, structures and adapter options.

use crate::adapters::Metadata;
use crate::data_source::{Asset, DataSource, Management};
use crate::errors::{ChunkyardError, Result};
use crate::structures::{Structure, StructureFamily};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// Parent of top-level nodes
pub(crate) const ROOT: &str = "";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL,
        parent TEXT NOT NULL DEFAULT '',
        metadata TEXT NOT NULL,
        time_created TEXT NOT NULL,
        UNIQUE(parent, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        node_id INTEGER NOT NULL REFERENCES nodes(id),
        name TEXT NOT NULL,
        structure_family TEXT NOT NULL,
        structure TEXT NOT NULL,
        mimetype TEXT NOT NULL,
        parameters TEXT NOT NULL,
        management TEXT NOT NULL,
        UNIQUE(node_id, name)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_data_sources_node_id ON data_sources(node_id)",
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        data_source_id INTEGER NOT NULL REFERENCES data_sources(id),
        data_uri TEXT NOT NULL,
        is_directory INTEGER NOT NULL,
        parameter TEXT,
        num INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_assets_data_source_id ON assets(data_source_id)",
];

const TABLES: [&str; 3] = ["nodes", "data_sources", "assets"];

pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub(crate) async fn is_initialized(pool: &SqlitePool) -> Result<bool> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(pool)
        .await?;
    let mut found = 0;
    for row in rows {
        let name: String = row.try_get("name")?;
        if TABLES.contains(&name.as_str()) {
            found += 1;
        }
    }
    Ok(found == TABLES.len())
}

#[derive(Debug, Clone)]
pub(crate) struct NodeRecord {
    pub id: i64,
    pub key: String,
    pub metadata: Metadata,
    pub time_created: DateTime<Utc>,
}

fn corrupted(what: &str, error: impl std::fmt::Display) -> ChunkyardError {
    ChunkyardError::CatalogCorrupted(format!("{}: {}", what, error))
}

fn node_from_row(row: &SqliteRow) -> Result<NodeRecord> {
    let key: String = row.try_get("key")?;
    let metadata: String = row.try_get("metadata")?;
    let metadata: Metadata = serde_json::from_str(&metadata)
        .map_err(|e| corrupted(&format!("metadata of node '{}'", key), e))?;
    let time_created: String = row.try_get("time_created")?;
    let time_created = DateTime::parse_from_rfc3339(&time_created)
        .map_err(|e| corrupted(&format!("creation time of node '{}'", key), e))?
        .with_timezone(&Utc);
    Ok(NodeRecord {
        id: row.try_get("id")?,
        key,
        metadata,
        time_created,
    })
}

pub(crate) async fn find_node(pool: &SqlitePool, key: &str) -> Result<Option<NodeRecord>> {
    let row = sqlx::query(
        "SELECT id, key, metadata, time_created FROM nodes WHERE parent = ?1 AND key = ?2",
    )
    .bind(ROOT)
    .bind(key)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(node_from_row).transpose()
}

pub(crate) async fn list_keys(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT key FROM nodes WHERE parent = ?1 ORDER BY key")
        .bind(ROOT)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| row.try_get("key").map_err(ChunkyardError::from))
        .collect()
}

pub(crate) async fn insert_node(
    conn: &mut SqliteConnection,
    key: &str,
    metadata: &Metadata,
    time_created: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO nodes (key, parent, metadata, time_created) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(key)
    .bind(ROOT)
    .bind(serde_json::to_string(metadata)?)
    .bind(time_created.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a data source and its assets, filling in the assigned ids.
pub(crate) async fn insert_data_source(
    conn: &mut SqliteConnection,
    node_id: i64,
    data_source: &mut DataSource,
) -> Result<()> {
    let mimetype = data_source.mimetype.clone().ok_or_else(|| {
        ChunkyardError::validation(format!(
            "data source '{}' has no resolved mimetype",
            data_source.name
        ))
    })?;
    let result = sqlx::query(
        r#"
        INSERT INTO data_sources
            (node_id, name, structure_family, structure, mimetype, parameters, management)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(node_id)
    .bind(&data_source.name)
    .bind(data_source.structure_family.as_str())
    .bind(serde_json::to_string(&data_source.structure)?)
    .bind(mimetype)
    .bind(serde_json::to_string(&data_source.parameters)?)
    .bind(data_source.management.as_str())
    .execute(&mut *conn)
    .await?;
    let data_source_id = result.last_insert_rowid();

    for asset in data_source.assets.iter_mut() {
        let num = asset.num.map(|n| n as i64);
        let result = sqlx::query(
            r#"
            INSERT INTO assets (data_source_id, data_uri, is_directory, parameter, num)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(data_source_id)
        .bind(&asset.data_uri)
        .bind(asset.is_directory)
        .bind(asset.parameter.as_deref())
        .bind(num)
        .execute(&mut *conn)
        .await?;
        asset.id = Some(result.last_insert_rowid());
    }
    data_source.id = Some(data_source_id);
    Ok(())
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let num: Option<i64> = row.try_get("num")?;
    let num = num
        .map(|n| usize::try_from(n).map_err(|e| corrupted("asset ordinal", e)))
        .transpose()?;
    Ok(Asset {
        data_uri: row.try_get("data_uri")?,
        is_directory: row.try_get("is_directory")?,
        parameter: row.try_get("parameter")?,
        num,
        id: Some(row.try_get("id")?),
    })
}

fn data_source_from_row(row: &SqliteRow, assets: Vec<Asset>) -> Result<DataSource> {
    let name: String = row.try_get("name")?;
    let what = format!("data source '{}'", name);
    let family: String = row.try_get("structure_family")?;
    let structure_family: StructureFamily = family.parse().map_err(|e| corrupted(&what, e))?;
    let structure: String = row.try_get("structure")?;
    let structure: JsonValue = serde_json::from_str(&structure).map_err(|e| corrupted(&what, e))?;
    let structure =
        Structure::from_json(structure_family, structure).map_err(|e| corrupted(&what, e))?;
    let parameters: String = row.try_get("parameters")?;
    let parameters = serde_json::from_str(&parameters).map_err(|e| corrupted(&what, e))?;
    let management = match row.try_get::<String, _>("management")?.as_str() {
        "internal" => Management::Internal,
        "external" => Management::External,
        other => return Err(corrupted(&what, format!("unknown management '{}'", other))),
    };
    if assets.is_empty() {
        return Err(corrupted(&what, "no assets recorded"));
    }
    Ok(DataSource {
        id: Some(row.try_get("id")?),
        name,
        structure_family,
        structure,
        mimetype: Some(row.try_get("mimetype")?),
        parameters,
        assets,
        management,
    })
}

/// Data sources of one node in creation order, each with its assets.
pub(crate) async fn load_data_sources(pool: &SqlitePool, node_id: i64) -> Result<Vec<DataSource>> {
    let asset_rows = sqlx::query(
        r#"
        SELECT a.id, a.data_source_id, a.data_uri, a.is_directory, a.parameter, a.num
        FROM assets a JOIN data_sources d ON a.data_source_id = d.id
        WHERE d.node_id = ?1
        ORDER BY a.data_source_id, a.parameter, a.num, a.id
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    let mut assets: HashMap<i64, Vec<Asset>> = HashMap::new();
    for row in &asset_rows {
        let data_source_id: i64 = row.try_get("data_source_id")?;
        assets
            .entry(data_source_id)
            .or_default()
            .push(asset_from_row(row)?);
    }

    let rows = sqlx::query(
        r#"
        SELECT id, name, structure_family, structure, mimetype, parameters, management
        FROM data_sources WHERE node_id = ?1 ORDER BY id
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            data_source_from_row(row, assets.remove(&id).unwrap_or_default())
        })
        .collect()
}

pub(crate) async fn delete_node(conn: &mut SqliteConnection, node_id: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM assets WHERE data_source_id IN (SELECT id FROM data_sources WHERE node_id = ?1)",
    )
    .bind(node_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM data_sources WHERE node_id = ?1")
        .bind(node_id)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM nodes WHERE id = ?1")
        .bind(node_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() != 1 {
        return Err(ChunkyardError::CatalogCorrupted(format!(
            "node {} vanished during delete",
            node_id
        )));
    }
    Ok(())
}

pub(crate) fn is_unique_violation(error: &ChunkyardError) -> bool {
    match error {
        ChunkyardError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}
