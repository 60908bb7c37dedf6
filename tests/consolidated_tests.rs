use chunkyard::adapters::{CsvTableAdapter, Metadata, CSV, DATA_URIS, NETCDF_SEQUENCE};
use chunkyard::errors::ErrorKind;
use chunkyard::node::Entry;
use chunkyard::prelude::*;
use futures::TryStreamExt;
use ndarray::Array2;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

async fn open_catalog(dir: &TempDir) -> Result<Catalog> {
    Catalog::open(Settings::default().with_writable_storage(dir.path().join("storage"))).await
}

fn storage_entries(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("storage"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn grid_structure() -> Result<ArrayStructure> {
    ArrayStructure::with_chunk_shape(DataType::of::<f64>(), vec![4, 6], &[2, 3])
}

fn grid_values() -> Result<ArrayData> {
    ArrayData::from_vec(&[4, 6], (0..24).map(f64::from).collect())
}

fn ab_table() -> Result<TableData> {
    TableData::new([
        ("A", Column::Int64(vec![1, 2, 3])),
        ("B", Column::Float64(vec![10.0, 20.0, 30.0])),
    ])
}

fn ab_structure(npartitions: usize) -> Result<TableStructure> {
    TableStructure::new(
        vec![
            Field::new("A", ColumnType::Int64),
            Field::new("B", ColumnType::Float64),
        ],
        npartitions,
    )
}

fn list_form() -> serde_json::Value {
    json!({
        "class": "ListOffsetArray",
        "offsets": "i64",
        "form_key": "node0",
        "content": {"class": "NumpyArray", "primitive": "float64", "form_key": "node1"}
    })
}

fn list_buffers() -> AwkwardBuffers {
    let offsets = [0i64, 2, 2, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
    let data = [1.5f64, 2.5, 3.5].iter().flat_map(|v| v.to_le_bytes()).collect();
    AwkwardBuffers::new(3)
        .with_buffer("node0-offsets", offsets)
        .with_buffer("node1-data", data)
}

fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("Failed to write CSV");
    path
}

fn write_netcdf(dir: &Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = dir.join(format!("t{}.nc", i));
            let mut file = netcdf::create(&path).expect("Failed to create NetCDF file");
            file.add_dimension("y", 2).expect("Failed to add dimension y");
            file.add_dimension("x", 2).expect("Failed to add dimension x");
            let mut var = file
                .add_variable::<f32>("t", &["y", "x"])
                .expect("Failed to add variable");
            let values: Vec<f32> = (0..4).map(|k| (i * 10 + k) as f32).collect();
            let data = Array2::from_shape_vec((2, 2), values).expect("Failed to create array");
            var.put(data.view(), ..).expect("Failed to write data");
            path
        })
        .collect()
}

#[tokio::test]
async fn test_round_trip_every_family() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let coo = CooData::new(
        vec![4, 4],
        vec![vec![0, 1, 3], vec![0, 3, 2]],
        vec![1.0, 2.0, 3.0],
    )?;
    let node = catalog
        .create_consolidated(
            "everything",
            metadata(json!({"experiment": "alpha"})),
            vec![
                DataSource::internal("grid", Structure::Array(grid_structure()?)),
                DataSource::internal("table", Structure::Table(ab_structure(2)?)),
                DataSource::internal(
                    "sparse",
                    Structure::Sparse(COOStructure::with_chunk_shape(vec![4, 4], &[2, 2])?),
                ),
                DataSource::internal(
                    "ragged",
                    Structure::Awkward(AwkwardStructure::new(3, list_form())?),
                ),
            ],
        )
        .await?;
    assert_eq!(node.parts().names(), vec!["grid", "table", "sparse", "ragged"]);
    assert_eq!(storage_entries(&dir), 4);

    node.part("grid")?.write(DataValue::Array(grid_values()?)).await?;
    node.part("table")?.write(DataValue::Table(ab_table()?)).await?;
    node.part("sparse")?.write(DataValue::Sparse(coo.clone())).await?;
    node.part("ragged")?.write(DataValue::Awkward(list_buffers())).await?;

    let node = catalog.get("everything").await?;
    assert_eq!(node.part("grid")?.read().await?, DataValue::Array(grid_values()?));
    assert_eq!(node.part("table")?.read().await?, DataValue::Table(ab_table()?));
    let sparse = node.part("sparse")?.read().await?.into_sparse()?;
    assert_eq!(sparse.to_dense(), coo.to_dense());
    assert_eq!(node.part("ragged")?.read().await?, DataValue::Awkward(list_buffers()));

    let partition = node.part("table")?.read_partition(1, None).await?;
    assert_eq!(partition.num_rows(), 1);
    assert_eq!(partition.column("A"), Some(&Column::Int64(vec![3])));
    Ok(())
}

#[tokio::test]
async fn test_blocks_written_in_any_order() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "blocks",
            Metadata::new(),
            vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
        )
        .await?;
    let part = node.part("grid")?;
    let full = grid_values()?;

    for block in [vec![1, 1], vec![0, 0], vec![1, 0], vec![0, 1]] {
        let offsets = grid_structure()?.block_offsets(&block)?;
        let chunk = full.slice(&NdSlice::from_ranges(&offsets))?;
        part.write_block(DataValue::Array(chunk), &block).await?;
    }
    assert_eq!(part.read().await?, DataValue::Array(full.clone()));

    let block = part.read_block(&[1, 0], &NdSlice::full()).await?.into_array()?;
    assert_eq!(block.shape(), &[2, 3]);
    assert_eq!(block.as_typed::<f64>().expect("f64 data")[[0, 0]], 12.0);

    let sliced = part.read_slice(&"1:3,2".parse()?).await?.into_array()?;
    assert_eq!(sliced.shape(), &[2]);
    assert_eq!(sliced.as_typed::<f64>().expect("f64 data")[[1]], 14.0);

    let wrong_shape = ArrayData::from_vec(&[2, 2], vec![0.0f64; 4])?;
    let err = part.write_block(DataValue::Array(wrong_shape), &[0, 0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn test_unwritten_chunks_read_as_zeros() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "sparse-writes",
            Metadata::new(),
            vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
        )
        .await?;
    let part = node.part("grid")?;
    let ones = ArrayData::from_vec(&[2, 3], vec![1.0f64; 6])?;
    part.write_block(DataValue::Array(ones), &[1, 1]).await?;

    let data = part.read().await?.into_array()?;
    let values = data.as_typed::<f64>().expect("f64 data");
    assert_eq!(values[[0, 0]], 0.0);
    assert_eq!(values[[3, 5]], 1.0);
    assert_eq!(values.iter().sum::<f64>(), 6.0);
    Ok(())
}

#[tokio::test]
async fn test_table_columns_and_partitions() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "tabular",
            Metadata::new(),
            vec![
                DataSource::internal("t", Structure::Table(ab_structure(1)?)),
                DataSource::internal("grid", Structure::Array(grid_structure()?)),
            ],
        )
        .await?;
    let part = node.part("t")?;
    part.write(DataValue::Table(ab_table()?)).await?;

    let a = part.read_columns(&["A".to_string()]).await?;
    assert_eq!(a.column_names(), vec!["A"]);
    assert_eq!(a.column("A"), Some(&Column::Int64(vec![1, 2, 3])));
    assert_eq!(a.num_rows(), 3);

    assert_eq!(node.columns(), vec!["A", "B", "grid"]);
    assert!(matches!(node.entry("B")?, Entry::Column { column: "B", .. }));
    assert!(matches!(node.entry("grid")?, Entry::Part(_)));
    assert_eq!(node.entry("C").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        node.read_entry("A").await?,
        DataValue::Table(ab_table()?.select(&["A".to_string()])?)
    );

    let rows = part.read_rows(1..3, None).await?;
    assert_eq!(rows.column("B"), Some(&Column::Float64(vec![20.0, 30.0])));

    let err = part.read_partition(1, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    let err = part.read_columns(&["C".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    Ok(())
}

#[tokio::test]
async fn test_partitions_written_in_any_order() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "partitions",
            Metadata::new(),
            vec![DataSource::internal("t", Structure::Table(ab_structure(3)?))],
        )
        .await?;
    let part = node.part("t")?;
    let table = ab_table()?;

    let err = part.read().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    for p in [2, 0, 1] {
        part.write_partition(&table.slice_rows(p..p + 1)?, p).await?;
    }
    assert_eq!(part.read().await?, DataValue::Table(table.clone()));

    let frame = PartitionedFrame::from_part(part, 2)?.select(vec!["B".to_string()])?;
    assert_eq!(frame.npartitions(), 3);
    assert_eq!(frame.resolved(), 0);
    let second = frame.partition(1).await?;
    assert_eq!(second.column("B"), Some(&Column::Float64(vec![20.0])));
    assert_eq!(frame.resolved(), 1);
    let computed = frame.compute().await?;
    assert_eq!(computed, table.select(&["B".to_string()])?);
    assert_eq!(frame.resolved(), 3);

    let err = part.write_partition(&table, 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    let other_schema = TableData::new([("A", Column::Int64(vec![1]))])?;
    let err = part.write_partition(&other_schema, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn test_node_metadata_unaffected_by_writes() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node_metadata = metadata(json!({"experiment": "beta", "revision": 3}));
    let node = catalog
        .create_consolidated(
            "meta",
            node_metadata.clone(),
            vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
        )
        .await?;
    node.part("grid")?.write(DataValue::Array(grid_values()?)).await?;

    let reloaded = catalog.get("meta").await?;
    assert_eq!(reloaded.metadata(), &node_metadata);
    assert_eq!(reloaded.time_created(), node.time_created());
    let part_metadata = reloaded.part("grid")?.metadata().await?;
    assert_eq!(part_metadata.get("revision"), Some(&json!(3)));
    Ok(())
}

#[tokio::test]
async fn test_external_parts_and_delete() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let external = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;

    let csv_files = vec![
        write_csv(external.path(), "a.csv", "A,B\n1,10.0\n2,20.0\n"),
        write_csv(external.path(), "b.csv", "A,B\n3,30.0\n"),
    ];
    let nc_files = write_netcdf(external.path(), 3);
    let csv_assets = csv_files
        .iter()
        .enumerate()
        .map(|(i, path)| Asset::from_path(path, DATA_URIS, Some(i + 1)))
        .collect::<Result<Vec<_>>>()?;
    let nc_assets = nc_files
        .iter()
        .enumerate()
        .map(|(i, path)| Asset::from_path(path, DATA_URIS, Some(i + 1)))
        .collect::<Result<Vec<_>>>()?;
    let sequence = ArrayStructure::new(
        DataType::of::<f32>(),
        vec![3, 2, 2],
        vec![vec![1, 1, 1], vec![2], vec![2]],
    )?;

    let node = catalog
        .create_consolidated(
            "mixed",
            Metadata::new(),
            vec![
                DataSource::external("table", Structure::Table(ab_structure(2)?), CSV, csv_assets),
                DataSource::external("t", Structure::Array(sequence), NETCDF_SEQUENCE, nc_assets),
                DataSource::internal("scratch", Structure::Array(grid_structure()?)),
            ],
        )
        .await?;

    assert_eq!(node.part("table")?.read().await?, DataValue::Table(ab_table()?));
    let slab = node.part("t")?.read_slice(&NdSlice::index(2)).await?.into_array()?;
    assert_eq!(slab.shape(), &[2, 2]);
    assert_eq!(slab.as_typed::<f32>().expect("f32 data")[[1, 1]], 23.0);
    let block = node.part("t")?.read_block(&[1, 0, 0], &NdSlice::full()).await?;
    assert_eq!(block.into_array()?.shape(), &[2, 2]);

    let err = node
        .part("table")?
        .write(DataValue::Table(ab_table()?))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);

    let description = node.describe();
    assert_eq!(description.parts[0].management, Management::External);
    assert_eq!(description.parts[2].management, Management::Internal);
    assert_eq!(description.parts[2].assets.len(), 1);
    assert!(description.parts[2].assets[0].is_directory);
    assert_eq!(storage_entries(&dir), 1);

    catalog.delete("mixed").await?;
    assert!(!catalog.contains("mixed").await?);
    assert_eq!(storage_entries(&dir), 0);
    for path in csv_files.iter().chain(&nc_files) {
        assert!(path.exists(), "{} must survive delete", path.display());
    }
    assert_eq!(catalog.get("mixed").await.unwrap_err().kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_out_of_grid_addresses() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "grid",
            Metadata::new(),
            vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
        )
        .await?;
    let part = node.part("grid")?;
    for block in [vec![2, 0], vec![0, 2], vec![0]] {
        let err = part.read_block(&block, &NdSlice::full()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Address, "block {:?}", block);
    }
    let chunk = ArrayData::from_vec(&[2, 3], vec![0.0f64; 6])?;
    let err = part.write_block(DataValue::Array(chunk), &[5, 5]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    let err = part.read_partition(0, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    assert_eq!(node.part("missing").unwrap_err().kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_failed_create_leaves_nothing_behind() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let external = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;

    let err = catalog
        .create_consolidated(
            "dup",
            Metadata::new(),
            vec![
                DataSource::internal("x", Structure::Array(grid_structure()?)),
                DataSource::internal("x", Structure::Table(ab_structure(1)?)),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkyardError::InvalidDataSource { index: 1, .. }));
    assert!(!catalog.contains("dup").await?);

    // The CSV part only fails once its adapter is built, after the first
    // part's storage has been allocated.
    let csv = write_csv(external.path(), "only.csv", "A,B\n1,1.0\n");
    let err = catalog
        .create_consolidated(
            "late-failure",
            Metadata::new(),
            vec![
                DataSource::internal("grid", Structure::Array(grid_structure()?)),
                DataSource::external(
                    "table",
                    Structure::Table(ab_structure(2)?),
                    CSV,
                    vec![Asset::from_path(&csv, DATA_URIS, Some(1))?],
                ),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkyardError::InvalidDataSource { index: 1, .. }));
    assert!(!catalog.contains("late-failure").await?);
    assert_eq!(storage_entries(&dir), 0);

    let missing = external.path().join("gone.csv");
    let err = catalog
        .create_consolidated(
            "missing-asset",
            Metadata::new(),
            vec![DataSource::external(
                "table",
                Structure::Table(ab_structure(1)?),
                CSV,
                vec![Asset::from_path(&missing, DATA_URIS, Some(1))?],
            )],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(catalog.keys().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_keys_and_duplicate_nodes() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    for key in ["b", "a"] {
        catalog
            .create_consolidated(
                key,
                Metadata::new(),
                vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
            )
            .await?;
    }
    assert_eq!(catalog.keys().await?, vec!["a", "b"]);

    let err = catalog
        .create_consolidated("a", Metadata::new(), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(catalog
        .create_consolidated("a/b", Metadata::new(), Vec::new())
        .await
        .is_err());

    let node = catalog
        .add_part("a", DataSource::internal("t", Structure::Table(ab_structure(1)?)))
        .await?;
    assert_eq!(node.parts().names(), vec!["grid", "t"]);
    let err = catalog
        .add_part("a", DataSource::internal("t", Structure::Table(ab_structure(1)?)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkyardError::InvalidDataSource { index: 2, .. }));
    assert_eq!(
        catalog
            .add_part("zzz", DataSource::internal("t", Structure::Table(ab_structure(1)?)))
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_distinct_chunks() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let structure = ArrayStructure::with_chunk_shape(DataType::of::<i64>(), vec![8, 8], &[2, 2])?;
    let node = catalog
        .create_consolidated(
            "concurrent",
            Metadata::new(),
            vec![DataSource::internal("grid", Structure::Array(structure.clone()))],
        )
        .await?;

    let mut tasks = Vec::new();
    for block in structure.blocks() {
        let part = node.part("grid")?.clone();
        tasks.push(tokio::spawn(async move {
            let fill = (block[0] * 4 + block[1]) as i64;
            let chunk = ArrayData::from_vec(&[2, 2], vec![fill; 4])?;
            part.write_block(DataValue::Array(chunk), &block).await
        }));
    }
    for task in tasks {
        task.await.expect("write task panicked")?;
    }

    let data = node.part("grid")?.read().await?.into_array()?;
    let values = data.as_typed::<i64>().expect("i64 data");
    for ((row, col), expected) in [((0, 0), 0), ((1, 7), 3), ((7, 0), 12), ((6, 6), 15)] {
        assert_eq!(values[[row, col]], expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_blocks_in_grid_order() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "stream",
            Metadata::new(),
            vec![
                DataSource::internal("grid", Structure::Array(grid_structure()?)),
                DataSource::internal("t", Structure::Table(ab_structure(2)?)),
            ],
        )
        .await?;
    node.part("grid")?.write(DataValue::Array(grid_values()?)).await?;
    node.part("t")?.write(DataValue::Table(ab_table()?)).await?;

    let blocks: Vec<(Vec<usize>, DataValue)> =
        node.part("grid")?.stream_blocks().try_collect().await?;
    let indices: Vec<Vec<usize>> = blocks.iter().map(|(index, _)| index.clone()).collect();
    assert_eq!(indices, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    let last = blocks[3].1.clone().into_array()?;
    assert_eq!(last.as_typed::<f64>().expect("f64 data")[[1, 2]], 23.0);

    let partitions: Vec<(Vec<usize>, DataValue)> =
        node.part("t")?.stream_blocks().try_collect().await?;
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[1].0, vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_file_catalog_persists_across_opens() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let database = dir.path().join("catalog.db");
    let settings = Settings::default()
        .with_database_uri(database.display().to_string())
        .with_writable_storage(dir.path().join("storage"));

    let err = Catalog::open(settings.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);

    let init = Settings {
        database_init_if_not_exists: true,
        ..settings.clone()
    };
    let catalog = Catalog::open(init).await?;
    let node = catalog
        .create_consolidated(
            "persisted",
            metadata(json!({"units": "K"})),
            vec![DataSource::internal("grid", Structure::Array(grid_structure()?))],
        )
        .await?;
    node.part("grid")?.write(DataValue::Array(grid_values()?)).await?;
    catalog.close().await;

    let reopened = Catalog::open(settings).await?;
    let node = reopened.get("persisted").await?;
    assert_eq!(node.metadata().get("units"), Some(&json!("K")));
    assert_eq!(node.part("grid")?.read().await?, DataValue::Array(grid_values()?));
    reopened.close().await;
    Ok(())
}

#[tokio::test]
async fn test_csv_schema_inferred_from_first_file() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = vec![
        write_csv(dir.path(), "p0.csv", "id,score,ok,label\n1,2.5,true,a\n2,3,False,b\n"),
        write_csv(dir.path(), "p1.csv", "id,score,ok,label\n3,4.0,true,c\n"),
    ];
    let adapter = CsvTableAdapter::infer(paths)?;
    let structure = adapter.structure();
    assert_eq!(structure.npartitions, 2);
    assert_eq!(
        structure.columns,
        vec![
            Field::new("id", ColumnType::Int64),
            Field::new("score", ColumnType::Float64),
            Field::new("ok", ColumnType::Bool),
            Field::new("label", ColumnType::Utf8),
        ]
    );

    let partition = adapter.read_partition(1, None).await?;
    assert_eq!(partition.column("score"), Some(&Column::Float64(vec![4.0])));

    let err = CsvTableAdapter::infer(Vec::new()).err().expect("no files");
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn test_parts_outliving_delete_cannot_touch_storage() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir).await?;
    let node = catalog
        .create_consolidated(
            "short-lived",
            Metadata::new(),
            vec![
                DataSource::internal("grid", Structure::Array(grid_structure()?)),
                DataSource::internal("table", Structure::Table(ab_structure(2)?)),
                DataSource::internal(
                    "sparse",
                    Structure::Sparse(COOStructure::with_chunk_shape(vec![4, 4], &[2, 2])?),
                ),
                DataSource::internal(
                    "ragged",
                    Structure::Awkward(AwkwardStructure::new(3, list_form())?),
                ),
            ],
        )
        .await?;
    let grid = node.part("grid")?.clone();
    grid.write(DataValue::Array(grid_values()?)).await?;
    catalog.delete("short-lived").await?;
    assert_eq!(storage_entries(&dir), 0);

    let err = grid.write(DataValue::Array(grid_values()?)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.to_string().contains("reclaimed"));
    let chunk = ArrayData::from_vec(&[2, 3], vec![1.0f64; 6])?;
    let err = grid.write_block(DataValue::Array(chunk), &[0, 0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    let err = grid.read().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    let err = grid.read_block(&[1, 1], &NdSlice::full()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let table = node.part("table")?;
    let err = table.write(DataValue::Table(ab_table()?)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    let err = table.read_partition(0, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let sparse = node.part("sparse")?;
    let coo = CooData::new(vec![4, 4], vec![vec![0], vec![0]], vec![1.0])?;
    let err = sparse.write(DataValue::Sparse(coo)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    let err = sparse.read().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let ragged = node.part("ragged")?;
    let err = ragged.write(DataValue::Awkward(list_buffers())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!(storage_entries(&dir), 0);
    Ok(())
}

#[tokio::test]
async fn test_busy_database_is_retryable() -> Result<()> {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection};

    let dir = tempdir().expect("Failed to create temp dir");
    let database = dir.path().join("catalog.db");
    let settings = Settings {
        database_init_if_not_exists: true,
        database_acquire_timeout: std::time::Duration::from_millis(200),
        ..Settings::default()
            .with_database_uri(database.display().to_string())
            .with_writable_storage(dir.path().join("storage"))
    };
    let catalog = Catalog::open(settings).await?;

    let mut writer = SqliteConnectOptions::new().filename(&database).connect().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut writer).await?;

    let parts = || vec![DataSource::internal("grid", Structure::Array(grid_structure().unwrap()))];
    let err = catalog
        .create_consolidated("contended", Metadata::new(), parts())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Concurrency);
    assert!(err.is_retryable());
    assert_eq!(storage_entries(&dir), 0);

    sqlx::query("ROLLBACK").execute(&mut writer).await?;
    writer.close().await?;

    let node = catalog
        .create_consolidated("contended", Metadata::new(), parts())
        .await?;
    assert_eq!(node.parts().names(), vec!["grid"]);
    assert_eq!(storage_entries(&dir), 1);
    catalog.close().await;
    Ok(())
}
