use chunkyard::adapters::{FileSequenceAdapter, NetCdfSlabs, SlabHeader, SlabReader};
use chunkyard::errors::ErrorKind;
use chunkyard::prelude::*;
use ndarray::{Array2, ArrayD, IxDyn};
use netcdf::create;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// Values of slab `i`: `i * 100 + flat position`
fn slab_values(i: usize, len: usize) -> Vec<f32> {
    (0..len).map(|k| (i * 100 + k) as f32).collect()
}

fn write_netcdf_slabs(dir: &TempDir, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = dir.path().join(format!("slab_{:03}.nc", i));
            let mut file = create(&path).expect("Failed to create NetCDF file");
            file.add_dimension("y", 2).expect("Failed to add dimension y");
            file.add_dimension("x", 3).expect("Failed to add dimension x");
            file.add_attribute("title", "synthetic run".to_string())
                .expect("Failed to add attribute");
            let mut var = file
                .add_variable::<f32>("temperature", &["y", "x"])
                .expect("Failed to add variable");
            let data = Array2::from_shape_vec((2, 3), slab_values(i, 6))
                .expect("Failed to create array");
            var.put(data.view(), ..).expect("Failed to write data");
            path
        })
        .collect()
}

fn pool() -> Arc<rayon::ThreadPool> {
    Arc::new(
        ParallelConfig::with_threads(2)
            .build_pool()
            .expect("Failed to build pool"),
    )
}

/// Synthesizes slabs from the file name and records which files were opened.
#[derive(Clone, Default)]
struct CountingReader {
    opened: Arc<Mutex<Vec<usize>>>,
}

impl CountingReader {
    fn index_of(path: &Path) -> usize {
        path.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.rsplit('_').next())
            .and_then(|s| s.parse().ok())
            .unwrap_or(usize::MAX)
    }

    fn opened(&self) -> Vec<usize> {
        let mut opened = self.opened.lock().unwrap().clone();
        opened.sort_unstable();
        opened
    }

    fn reset(&self) {
        self.opened.lock().unwrap().clear();
    }
}

impl SlabReader for CountingReader {
    fn read_header(&self, _path: &Path) -> Result<SlabHeader> {
        Ok(SlabHeader {
            data_type: DataType::of::<f32>(),
            shape: vec![2, 3],
            attributes: Default::default(),
        })
    }

    fn read_slab(&self, path: &Path) -> Result<ArrayData> {
        let i = Self::index_of(path);
        self.opened.lock().unwrap().push(i);
        ArrayData::from_vec(&[2, 3], slab_values(i, 6))
    }
}

fn counting_paths(n: usize) -> Vec<PathBuf> {
    (0..n).map(|i| PathBuf::from(format!("/virtual/slab_{}", i))).collect()
}

#[tokio::test]
async fn test_infer_structure_from_first_file() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = write_netcdf_slabs(&dir, 4);
    let adapter = FileSequenceAdapter::infer(paths, NetCdfSlabs::default(), pool()).await?;

    let structure = adapter.structure();
    assert_eq!(structure.shape, vec![4, 2, 3]);
    assert_eq!(structure.chunks, vec![vec![1, 1, 1, 1], vec![2], vec![3]]);
    assert_eq!(structure.data_type, DataType::of::<f32>());

    let metadata = adapter.metadata().await?;
    assert_eq!(metadata.get("title"), Some(&serde_json::json!("synthetic run")));
    Ok(())
}

#[tokio::test]
async fn test_netcdf_sequence_reads() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = write_netcdf_slabs(&dir, 3);
    let adapter = FileSequenceAdapter::infer(
        paths,
        NetCdfSlabs::new(Some("temperature".to_string())),
        pool(),
    )
    .await?;

    let full = adapter.read(&NdSlice::full()).await?;
    assert_eq!(full.shape(), &[3, 2, 3]);
    let values = full.as_typed::<f32>().expect("f32 data");
    assert_eq!(values[[2, 1, 2]], 205.0);

    let one = adapter.read(&NdSlice::index(1)).await?;
    assert_eq!(one.shape(), &[2, 3]);
    let expected = ArrayD::from_shape_vec(IxDyn(&[2, 3]), slab_values(1, 6))
        .expect("Failed to build expected slab");
    assert_eq!(one.as_typed::<f32>(), Some(&expected));

    let last = adapter.read(&NdSlice::index(-1)).await?;
    assert_eq!(last.as_typed::<f32>().expect("f32 data")[[0, 0]], 200.0);

    let range = adapter.read(&NdSlice::range(1, 3)).await?;
    assert_eq!(range.shape(), &[2, 2, 3]);

    let trailing = adapter.read(&"0:2,1,...".parse()?).await?;
    assert_eq!(trailing.shape(), &[2, 3]);
    assert_eq!(trailing.as_typed::<f32>().expect("f32 data")[[1, 0]], 103.0);
    Ok(())
}

#[tokio::test]
async fn test_missing_variable_is_storage_error() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = write_netcdf_slabs(&dir, 2);
    let err = FileSequenceAdapter::infer(paths, NetCdfSlabs::new(Some("salinity".into())), pool())
        .await
        .err()
        .expect("unknown variable must be rejected");
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.to_string().contains("salinity"));
    Ok(())
}

#[tokio::test]
async fn test_reads_touch_only_selected_files() -> Result<()> {
    let reader = CountingReader::default();
    let adapter = FileSequenceAdapter::infer(counting_paths(10), reader.clone(), pool()).await?;
    assert_eq!(adapter.structure().shape, vec![10, 2, 3]);
    assert!(reader.opened().is_empty());

    let data = adapter.read(&NdSlice::range(3, 6)).await?;
    assert_eq!(data.shape(), &[3, 2, 3]);
    assert_eq!(reader.opened(), vec![3, 4, 5]);

    reader.reset();
    adapter.read(&NdSlice::index(7)).await?;
    assert_eq!(reader.opened(), vec![7]);

    reader.reset();
    adapter.read(&"::4,0".parse()?).await?;
    assert_eq!(reader.opened(), vec![0, 4, 8]);

    reader.reset();
    let empty = adapter.read(&NdSlice::range(5, 5)).await?;
    assert_eq!(empty.shape(), &[0, 2, 3]);
    assert!(reader.opened().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_read_block_equals_indexed_read() -> Result<()> {
    let reader = CountingReader::default();
    let adapter = FileSequenceAdapter::infer(counting_paths(4), reader.clone(), pool()).await?;

    let block = adapter.read_block(&[2, 0, 0], &NdSlice::full()).await?;
    let indexed = adapter.read(&NdSlice::index(2)).await?;
    assert_eq!(block, indexed);

    let err = adapter
        .read_block(&[2, 1, 0], &NdSlice::full())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    let err = adapter
        .read_block(&[4, 0, 0], &NdSlice::full())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_index_is_address_error() -> Result<()> {
    let adapter =
        FileSequenceAdapter::infer(counting_paths(3), CountingReader::default(), pool()).await?;
    let err = adapter.read(&NdSlice::index(3)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    Ok(())
}

#[tokio::test]
async fn test_slab_shape_mismatch_is_storage_error() -> Result<()> {
    let header = SlabHeader {
        data_type: DataType::of::<f32>(),
        shape: vec![4],
        attributes: Default::default(),
    };
    let structure = FileSequenceAdapter::<CountingReader>::sequence_structure(2, &header)?;
    let adapter = FileSequenceAdapter::new(
        counting_paths(2),
        structure,
        CountingReader::default(),
        pool(),
    )?;
    let err = adapter.read(&NdSlice::index(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    Ok(())
}

#[test]
fn test_sequence_structure_requires_matching_file_count() -> Result<()> {
    let header = SlabHeader {
        data_type: DataType::of::<f64>(),
        shape: vec![5],
        attributes: Default::default(),
    };
    let structure = FileSequenceAdapter::<NetCdfSlabs>::sequence_structure(3, &header)?;
    assert_eq!(structure.shape, vec![3, 5]);
    let err = FileSequenceAdapter::new(
        counting_paths(2),
        structure,
        NetCdfSlabs::default(),
        pool(),
    )
    .err()
    .expect("mismatched file count must be rejected");
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}
