//! Entry point for the chunkyard binary.
//! Handles CLI parsing, opens the catalog and dispatches the requested command.

use chunkyard::adapters::{CsvTableAdapter, FileSequenceAdapter, NetCdfSlabs};
use chunkyard::cli::{Args, Command};
use chunkyard::prelude::*;
use chunkyard::protocol::{self, Address, CreateNodeRequest, ReadRequest, JSON};
use chunkyard::{get_parallel_info, init_logging};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

fn settings_from(args: &Args) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(database) = &args.database {
        settings.database_uri = Some(database.clone());
    }
    if let Some(storage) = &args.storage {
        settings.writable_storage = storage.clone();
    }
    if args.init {
        settings.database_init_if_not_exists = true;
    }
    if let Some(threads) = args.threads {
        settings.parallel = ParallelConfig::with_threads(threads);
    }
    settings.validate()?;
    Ok(settings)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_address(
    slice: Option<NdSlice>,
    block: Option<Vec<usize>>,
    partition: Option<usize>,
    columns: Option<Vec<String>>,
) -> Result<Address> {
    Ok(match (slice, block, partition, columns) {
        (None, None, None, None) => Address::Full,
        (Some(slice), None, None, None) => Address::Slice(slice),
        (slice, Some(block), None, None) => Address::Block {
            block,
            slice: slice.unwrap_or_default(),
        },
        (None, None, Some(partition), columns) => Address::Partition { partition, columns },
        (None, None, None, Some(columns)) => Address::Columns(columns),
        _ => {
            return Err(ChunkyardError::address(
                "combine --slice with --block, or --columns with --partition; nothing else",
            ))
        }
    })
}

async fn run(args: Args) -> Result<()> {
    let settings = settings_from(&args)?;

    if let Command::InspectSequence { files, variable } = &args.command {
        let pool = Arc::new(settings.parallel.build_pool()?);
        let adapter =
            FileSequenceAdapter::infer(files.clone(), NetCdfSlabs::new(variable.clone()), pool)
                .await?;
        let metadata = adapter.metadata().await?;
        return print_json(&json!({
            "structure": adapter.structure(),
            "metadata": metadata,
        }));
    }
    if let Command::InspectCsv { files } = &args.command {
        let adapter = CsvTableAdapter::infer(files.clone())?;
        return print_json(&json!({ "structure": adapter.structure() }));
    }
    if let Command::Info = &args.command {
        let registry = AdapterRegistry::with_defaults();
        return print_json(&json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": settings.database_uri,
            "writable_storage": settings.writable_storage,
            "parallel": get_parallel_info(&settings.parallel),
            "max_concurrent_partitions": settings.max_concurrent_partitions,
            "mimetypes": registry.mimetypes(),
        }));
    }

    let catalog = Catalog::open(settings).await?;
    let result = match args.command {
        Command::Create { manifest } => {
            let body = std::fs::read(&manifest)?;
            let description = CreateNodeRequest::from_json(&body)?.submit(&catalog).await?;
            print_json(&serde_json::to_value(description)?)
        }
        Command::List => print_json(&json!(catalog.keys().await?)),
        Command::Describe { key } => {
            let node = catalog.get(&key).await?;
            print_json(&serde_json::to_value(node.describe())?)
        }
        Command::Read {
            key,
            target,
            slice,
            block,
            partition,
            columns,
        } => {
            let request = ReadRequest {
                node: key,
                target,
                address: read_address(slice, block, partition, columns)?,
                accept: JSON.to_string(),
            };
            let response = protocol::read(&catalog, &request).await?;
            let data: serde_json::Value = serde_json::from_slice(&response.body)?;
            print_json(&json!({ "structure": response.structure, "data": data }))
        }
        Command::Delete { key } => {
            catalog.delete(&key).await?;
            print_json(&json!({ "deleted": key }))
        }
        Command::InspectSequence { .. } | Command::InspectCsv { .. } | Command::Info => Ok(()),
    };
    catalog.close().await;
    result
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!(kind = ?e.kind(), "{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
