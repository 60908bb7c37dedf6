//! External CSV tables, one partition per file

use super::{TableAdapter, DATA_URIS};
use crate::data_source::DataSource;
use crate::errors::{ChunkyardError, Result};
use crate::structures::{ColumnType, Field, Structure, TableStructure};
use crate::values::{Column, TableData};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct CsvTableAdapter {
    paths: Vec<PathBuf>,
    structure: TableStructure,
}

impl CsvTableAdapter {
    pub fn new(paths: Vec<PathBuf>, structure: TableStructure) -> Result<Self> {
        if paths.len() != structure.npartitions {
            return Err(ChunkyardError::validation(format!(
                "{} CSV files given for a table of {} partitions",
                paths.len(),
                structure.npartitions
            )));
        }
        Ok(Self { paths, structure })
    }

    /// One partition per file, with the schema inferred from the first file
    pub fn infer(paths: Vec<PathBuf>) -> Result<Self> {
        let first = paths
            .first()
            .ok_or_else(|| ChunkyardError::validation("no CSV files given"))?;
        let structure = TableStructure::new(infer_csv_schema(first)?, paths.len())?;
        Self::new(paths, structure)
    }

    pub fn from_data_source(data_source: &DataSource) -> Result<Self> {
        match &data_source.structure {
            Structure::Table(structure) => {
                Self::new(data_source.asset_paths(DATA_URIS)?, structure.clone())
            }
            other => Err(ChunkyardError::CatalogCorrupted(format!(
                "CSV files cannot serve {} data",
                other.family()
            ))),
        }
    }
}

fn parse_cell<T: std::str::FromStr>(path: &Path, field: &Field, row: usize, cell: &str) -> Result<T> {
    cell.trim().parse().map_err(|_| {
        ChunkyardError::storage(
            path.display(),
            format!(
                "row {}: '{}' is not a valid {:?} value for column '{}'",
                row, cell, field.data_type, field.name
            ),
        )
    })
}

/// Parse one CSV file against the declared schema.
pub fn read_csv(path: &Path, fields: &[Field]) -> Result<TableData> {
    let storage_err = |e: csv::Error| ChunkyardError::storage(path.display(), e);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(storage_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(storage_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    if headers != names {
        return Err(ChunkyardError::storage(
            path.display(),
            format!("header {:?} does not match declared columns {:?}", headers, names),
        ));
    }

    let mut columns: Vec<Column> = fields.iter().map(|f| Column::empty(f.data_type)).collect();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(storage_err)?;
        for ((column, field), cell) in columns.iter_mut().zip(fields).zip(record.iter()) {
            match column {
                Column::Int64(values) => values.push(parse_cell(path, field, row, cell)?),
                Column::Float64(values) => values.push(parse_cell(path, field, row, cell)?),
                Column::Utf8(values) => values.push(cell.to_string()),
                Column::Bool(values) => values.push(match cell.trim() {
                    "true" | "True" | "1" => true,
                    "false" | "False" | "0" => false,
                    _ => parse_cell(path, field, row, cell)?,
                }),
            }
        }
    }
    TableData::new(
        fields
            .iter()
            .map(|f| f.name.clone())
            .zip(columns),
    )
}

/// Infer a schema from the first file: integers, then floats, then booleans,
/// then text.
pub fn infer_csv_schema(path: &Path) -> Result<Vec<Field>> {
    let storage_err = |e: csv::Error| ChunkyardError::storage(path.display(), e);
    let mut reader = csv::Reader::from_path(path).map_err(storage_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(storage_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut types = vec![ColumnType::Int64; headers.len()];
    for record in reader.records() {
        let record = record.map_err(storage_err)?;
        for (ty, cell) in types.iter_mut().zip(record.iter()) {
            let cell = cell.trim();
            *ty = match *ty {
                ColumnType::Int64 if cell.parse::<i64>().is_ok() => ColumnType::Int64,
                ColumnType::Int64 | ColumnType::Float64 if cell.parse::<f64>().is_ok() => {
                    ColumnType::Float64
                }
                ColumnType::Int64 | ColumnType::Float64 | ColumnType::Bool
                    if matches!(cell, "true" | "false" | "True" | "False") =>
                {
                    ColumnType::Bool
                }
                _ => ColumnType::Utf8,
            };
        }
    }
    Ok(headers
        .into_iter()
        .zip(types)
        .map(|(name, data_type)| Field { name, data_type })
        .collect())
}

#[async_trait]
impl TableAdapter for CsvTableAdapter {
    fn structure(&self) -> &TableStructure {
        &self.structure
    }

    async fn read_partition(
        &self,
        partition: usize,
        columns: Option<&[String]>,
    ) -> Result<TableData> {
        self.structure.check_partition(partition)?;
        let path = self.paths[partition].clone();
        let fields = self.structure.columns.clone();
        let table = tokio::task::spawn_blocking(move || read_csv(&path, &fields))
            .await
            .map_err(|e| ChunkyardError::storage(self.paths[partition].display(), e))??;
        match columns {
            Some(columns) => table.select(columns),
            None => Ok(table),
        }
    }
}
