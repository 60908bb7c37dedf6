//! Defines command-line interface options using `clap` for the chunkyard binary.

use crate::ndslice::NdSlice;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Catalog and chunked access for scientific datasets
#[derive(Parser, Debug)]
#[command(
    version,
    name = "chunkyard",
    about = "Catalog of consolidated nodes over chunked array, table, sparse and awkward data"
)]
pub struct Args {
    /// SQLite catalog URI or path. Defaults to CHUNKYARD_DATABASE_URI, else in memory.
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Root directory for internally managed storage
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Create the catalog database and schema if missing
    #[arg(long, global = true, default_value_t = false)]
    pub init: bool,

    /// Number of threads to use for file I/O. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Enable verbose output.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a consolidated node from a JSON manifest
    Create {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// List node keys
    List,
    /// Print a node's metadata and parts
    Describe { key: String },
    /// Read a part, or a column of a table part, as JSON
    Read {
        key: String,
        /// Part name or column name
        target: String,
        /// Per-dimension selection, e.g. "0:2,...,::2"
        #[arg(long, value_parser = parse_slice_arg)]
        slice: Option<NdSlice>,
        /// Chunk index, formatted as i,j,...
        #[arg(long, value_parser = parse_block_arg)]
        block: Option<Vec<usize>>,
        #[arg(long)]
        partition: Option<usize>,
        /// Comma-separated column names
        #[arg(long, value_parser = parse_columns_arg)]
        columns: Option<Vec<String>>,
    },
    /// Delete a node and reclaim its internally managed storage
    Delete { key: String },
    /// Infer the structure of a sequence of NetCDF files without registering it
    InspectSequence {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Variable to read; defaults to the first data variable
        #[arg(long)]
        variable: Option<String>,
    },
    /// Infer the table structure of CSV files, one partition per file
    InspectCsv {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show configuration, thread pool and registered adapters
    Info,
}

fn parse_slice_arg(s: &str) -> Result<NdSlice, String> {
    s.parse().map_err(|e: crate::errors::ChunkyardError| e.to_string())
}

fn parse_block_arg(s: &str) -> Result<Vec<usize>, String> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("Invalid block index '{}': expected i,j,...", part))
        })
        .collect()
}

fn parse_columns_arg(s: &str) -> Result<Vec<String>, String> {
    let columns: Vec<String> = s
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        return Err("Invalid format: expected 'A,B,...'".to_string());
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_arg() {
        assert_eq!(parse_block_arg("1, 0,2").unwrap(), vec![1, 0, 2]);
        assert_eq!(parse_block_arg("").unwrap(), Vec::<usize>::new());
        assert!(parse_block_arg("1,x").is_err());
    }

    #[test]
    fn test_parse_columns_arg() {
        assert_eq!(parse_columns_arg("A,B").unwrap(), vec!["A", "B"]);
        assert!(parse_columns_arg(",").is_err());
    }

    #[test]
    fn test_read_command_parses() {
        let args = Args::parse_from([
            "chunkyard", "--database", "cat.db", "read", "node", "temp", "--block", "1,0",
        ]);
        assert_eq!(args.database.as_deref(), Some("cat.db"));
        match args.command {
            Command::Read { key, target, block, .. } => {
                assert_eq!(key, "node");
                assert_eq!(target, "temp");
                assert_eq!(block, Some(vec![1, 0]));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
