use chunkyard::errors::ErrorKind;
use chunkyard::prelude::*;
use chunkyard::protocol::{
    self, Address, CreateNodeRequest, ReadRequest, WriteRequest, JSON, OCTET_STREAM,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

async fn open_catalog(dir: &TempDir, limit: Option<usize>) -> Result<Catalog> {
    let mut settings = Settings::default().with_writable_storage(dir.path().join("storage"));
    if let Some(limit) = limit {
        settings.response_bytesize_limit = limit;
    }
    Catalog::open(settings).await
}

fn create_body() -> Vec<u8> {
    let request = json!({
        "key": "run-7",
        "metadata": {"site": "south"},
        "data_sources": [
            {
                "name": "temperature",
                "structure_family": "array",
                "structure": {
                    "data_type": {"endianness": "little", "kind": "f", "itemsize": 8},
                    "shape": [4, 2],
                    "chunks": [[2, 2], [2]]
                }
            },
            {
                "name": "stations",
                "structure_family": "table",
                "structure": {
                    "columns": [
                        {"name": "id", "data_type": "int64"},
                        {"name": "label", "data_type": "utf8"}
                    ],
                    "npartitions": 2
                }
            }
        ]
    });
    serde_json::to_vec(&request).expect("serialize request")
}

async fn created(dir: &TempDir, limit: Option<usize>) -> Result<Catalog> {
    let catalog = open_catalog(dir, limit).await?;
    CreateNodeRequest::from_json(&create_body())?
        .submit(&catalog)
        .await?;
    Ok(catalog)
}

fn write_request(part: &str, address: Address, media_type: &str, body: Vec<u8>) -> WriteRequest {
    WriteRequest {
        node: "run-7".to_string(),
        part: part.to_string(),
        address,
        media_type: media_type.to_string(),
        body,
    }
}

fn read_request(target: &str, address: Address, accept: &str) -> ReadRequest {
    ReadRequest {
        node: "run-7".to_string(),
        target: target.to_string(),
        address,
        accept: accept.to_string(),
    }
}

#[tokio::test]
async fn test_create_request_describes_node() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir, None).await?;
    let description = CreateNodeRequest::from_json(&create_body())?
        .submit(&catalog)
        .await?;
    assert_eq!(description.key, "run-7");
    assert_eq!(description.metadata.get("site"), Some(&json!("south")));
    assert_eq!(description.parts.len(), 2);
    assert_eq!(description.parts[0].structure_family, StructureFamily::Array);
    assert!(description.parts[0].mimetype.is_some());
    assert!(description.parts.iter().all(|p| p.id.is_some()));

    let encoded = serde_json::to_value(&description)?;
    assert_eq!(encoded["parts"][1]["management"], json!("internal"));

    let err = CreateNodeRequest::from_json(b"{\"key\": 3}").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn test_create_request_names_offending_record() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = open_catalog(&dir, None).await?;
    let body = json!({
        "key": "bad",
        "data_sources": [
            {
                "name": "ok",
                "structure_family": "table",
                "structure": {"columns": [{"name": "a", "data_type": "bool"}], "npartitions": 1}
            },
            {
                "name": "broken",
                "structure_family": "array",
                "structure": {
                    "data_type": {"endianness": "little", "kind": "f", "itemsize": 8},
                    "shape": [4],
                    "chunks": [[3]]
                }
            }
        ]
    });
    let request: CreateNodeRequest = serde_json::from_value(body)?;
    let err = request.submit(&catalog).await.unwrap_err();
    match err {
        ChunkyardError::InvalidDataSource { index, name, .. } => {
            assert_eq!(index, 1);
            assert_eq!(name, "broken");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!catalog.contains("bad").await?);
    Ok(())
}

#[tokio::test]
async fn test_array_block_writes_and_reads() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = created(&dir, None).await?;

    let block: Vec<u8> = [1.0f64, 2.0, 3.0, 4.0]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let address = Address::Block {
        block: vec![1, 0],
        slice: NdSlice::full(),
    };
    protocol::write(
        &catalog,
        &write_request("temperature", address.clone(), OCTET_STREAM, block.clone()),
    )
    .await?;

    let response = protocol::read(&catalog, &read_request("temperature", address, OCTET_STREAM)).await?;
    assert_eq!(response.media_type, OCTET_STREAM);
    assert_eq!(response.body, block);
    assert_eq!(response.structure.family(), StructureFamily::Array);

    let response = protocol::read(
        &catalog,
        &read_request("temperature", Address::Slice("2:4,1".parse()?), "*/*"),
    )
    .await?;
    assert_eq!(response.media_type, JSON);
    let payload: serde_json::Value = serde_json::from_slice(&response.body)?;
    assert_eq!(payload["shape"], json!([2]));
    assert_eq!(payload["data"], json!([2.0, 4.0]));

    let full = protocol::read(&catalog, &read_request("temperature", Address::Full, JSON)).await?;
    let payload: serde_json::Value = serde_json::from_slice(&full.body)?;
    assert_eq!(payload["data"], json!([0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0]));
    Ok(())
}

#[tokio::test]
async fn test_write_payload_checked_before_storage() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = created(&dir, None).await?;
    let address = Address::Block {
        block: vec![0, 0],
        slice: NdSlice::full(),
    };

    let short = vec![0u8; 24];
    let err = protocol::write(
        &catalog,
        &write_request("temperature", address.clone(), OCTET_STREAM, short),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let out_of_grid = Address::Block {
        block: vec![2, 0],
        slice: NdSlice::full(),
    };
    let err = protocol::write(
        &catalog,
        &write_request("temperature", out_of_grid, OCTET_STREAM, vec![0u8; 32]),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);

    let err = protocol::write(
        &catalog,
        &write_request("temperature", address, "text/plain", Vec::new()),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = protocol::write(
        &catalog,
        &write_request("temperature", Address::Slice(NdSlice::index(0)), JSON, Vec::new()),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    Ok(())
}

#[tokio::test]
async fn test_table_partitions_and_column_targets() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = created(&dir, None).await?;

    let partitions = [
        TableData::new([
            ("id", Column::Int64(vec![1, 2])),
            ("label", Column::Utf8(vec!["a".into(), "b".into()])),
        ])?,
        TableData::new([
            ("id", Column::Int64(vec![3])),
            ("label", Column::Utf8(vec!["c".into()])),
        ])?,
    ];
    for (partition, table) in partitions.iter().enumerate().rev() {
        protocol::write(
            &catalog,
            &write_request(
                "stations",
                Address::Partition {
                    partition,
                    columns: None,
                },
                JSON,
                serde_json::to_vec(table)?,
            ),
        )
        .await?;
    }

    let response = protocol::read(&catalog, &read_request("label", Address::Full, JSON)).await?;
    let table: TableData = serde_json::from_slice(&response.body)?;
    assert_eq!(table.column_names(), vec!["label"]);
    assert_eq!(
        table.column("label"),
        Some(&Column::Utf8(vec!["a".into(), "b".into(), "c".into()]))
    );

    let response = protocol::read(
        &catalog,
        &read_request(
            "stations",
            Address::Partition {
                partition: 1,
                columns: Some(vec!["id".to_string()]),
            },
            JSON,
        ),
    )
    .await?;
    let table: TableData = serde_json::from_slice(&response.body)?;
    assert_eq!(table.column("id"), Some(&Column::Int64(vec![3])));
    assert!(table.column("label").is_none());

    let response = protocol::read(
        &catalog,
        &read_request(
            "stations",
            Address::Rows {
                rows: 1..3,
                columns: None,
            },
            JSON,
        ),
    )
    .await?;
    let table: TableData = serde_json::from_slice(&response.body)?;
    assert_eq!(table.num_rows(), 2);

    let err = protocol::read(&catalog, &read_request("stations", Address::Full, OCTET_STREAM))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);

    let wrong_schema = TableData::new([("id", Column::Int64(vec![9]))])?;
    let err = protocol::write(
        &catalog,
        &write_request(
            "stations",
            Address::Partition {
                partition: 0,
                columns: None,
            },
            JSON,
            serde_json::to_vec(&wrong_schema)?,
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = protocol::read(&catalog, &read_request("nothing", Address::Full, JSON))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_response_size_limit() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let catalog = created(&dir, Some(40)).await?;

    let err = protocol::read(&catalog, &read_request("temperature", Address::Full, JSON))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    assert!(err.to_string().contains("request a block or partition"));

    let block = protocol::read(
        &catalog,
        &read_request(
            "temperature",
            Address::Block {
                block: vec![0, 0],
                slice: NdSlice::full(),
            },
            OCTET_STREAM,
        ),
    )
    .await?;
    assert_eq!(block.body.len(), 32);
    Ok(())
}
