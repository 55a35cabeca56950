use ndarray::array;
use sonata_core::{File, StoreError, View};

fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scratch.sonata");
    (dir, path)
}

#[test]
fn test_int_and_float_round_trip() {
    let (_dir, path) = scratch();
    let ints: Vec<i32> = vec![7, -3, 0, i32::MAX, i32::MIN, 42];
    let floats: Vec<f64> = vec![0.5, -1.25, 1e-300, f64::MAX, 3.0];
    {
        let mut file = File::create(&path).unwrap();
        let group = file.root_mut().unwrap().add_group("data").unwrap();
        group.add_dataset("ints", ints.clone()).unwrap();
        group.add_dataset("floats", floats.clone()).unwrap();
    }

    let file = File::open(&path).unwrap();
    let root = View::new(file.root().clone());
    let data = root.group("data").unwrap();

    assert_eq!(data.read_all::<i32>("ints").unwrap(), ints);
    assert_eq!(data.read_all::<f64>("floats").unwrap(), floats);
    assert_eq!(data.read_range::<i32>("ints", 1, 4).unwrap(), ints[1..4].to_vec());
    assert_eq!(data.read_range::<f64>("floats", 2, 5).unwrap(), floats[2..5].to_vec());
    assert_eq!(data.read_at::<i32>("ints", 5).unwrap(), 42);
    assert_eq!(data.dataset_size("ints"), Some(6));
    assert_eq!(data.dataset_size("missing"), None);
}

#[test]
fn test_range_edges() {
    let (_dir, path) = scratch();
    let mut file = File::create(&path).unwrap();
    let ds = file
        .root_mut()
        .unwrap()
        .add_dataset("ints", vec![1, 2, 3])
        .unwrap()
        .clone();

    assert!(ds.read_range::<i32>(2, 2).unwrap().is_empty());
    assert!(ds.read_range::<i32>(3, 1).unwrap().is_empty());
    assert!(matches!(
        ds.read_at::<i32>(3),
        Err(StoreError::Decode { .. })
    ));
    assert!(matches!(
        ds.read_range::<i32>(1, 4),
        Err(StoreError::Decode { .. })
    ));

    let err = ds.read_at::<i32>(9).unwrap_err().to_string();
    assert!(err.contains("/ints") && err.contains("index 9"), "{}", err);
}

#[test]
fn test_kind_mismatch_is_a_decode_error() {
    let (_dir, path) = scratch();
    let mut file = File::create(&path).unwrap();
    let ds = file
        .root_mut()
        .unwrap()
        .add_dataset("floats", vec![1.0, 2.0])
        .unwrap()
        .clone();

    assert!(matches!(ds.read_all::<i32>(), Err(StoreError::Decode { .. })));
    assert!(matches!(ds.read_at::<String>(0), Err(StoreError::Decode { .. })));
    assert!(matches!(
        ds.read_range::<(i32, i32)>(0, 1),
        Err(StoreError::Decode { .. })
    ));
}

#[test]
fn test_strings_pairs_and_matrices() {
    let (_dir, path) = scratch();
    {
        let mut file = File::create(&path).unwrap();
        let root = file.root_mut().unwrap();
        root.add_dataset("names", vec!["soma", "dendrite", ""]).unwrap();
        root.add_dataset("ranges", vec![(0, 3), (3, 3), (3, 8)]).unwrap();
        root.add_dataset("grid", vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
            .unwrap();
        root.add_dataset("ids", array![[1, 2], [3, 4], [5, 6]]).unwrap();
    }

    let file = File::open(&path).unwrap();
    let root = View::new(file.root().clone());

    assert_eq!(
        root.read_all::<String>("names").unwrap(),
        vec!["soma", "dendrite", ""]
    );
    assert_eq!(root.read_at::<String>("names", 1).unwrap(), "dendrite");
    assert_eq!(
        root.read_range::<(i32, i32)>("ranges", 1, 3).unwrap(),
        vec![(3, 3), (3, 8)]
    );
    assert_eq!(
        root.dataset("grid").unwrap().read_matrix::<f64>().unwrap(),
        array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
    assert_eq!(
        root.dataset("ids").unwrap().read_matrix::<i32>().unwrap(),
        array![[1, 2], [3, 4], [5, 6]]
    );
    // a two-column int dataset also reads as pairs
    assert_eq!(root.read_at::<(i32, i32)>("ids", 2).unwrap(), (5, 6));
    assert!(root.dataset("names").unwrap().read_matrix::<i32>().is_err());
}

#[test]
fn test_ragged_rows_are_rejected() {
    let (_dir, path) = scratch();
    let mut file = File::create(&path).unwrap();
    let root = file.root_mut().unwrap();
    assert!(matches!(
        root.add_dataset("bad", vec![vec![1, 2], vec![3]]),
        Err(StoreError::Structural(_))
    ));
    root.add_dataset("good", vec![1]).unwrap();
    assert!(matches!(
        root.add_dataset("good", vec![2]),
        Err(StoreError::Structural(_))
    ));
}

#[test]
fn test_groups_are_discovered_in_order() {
    let (_dir, path) = scratch();
    {
        let mut file = File::create(&path).unwrap();
        let root = file.root_mut().unwrap();
        let a = root.add_group("a").unwrap();
        a.add_group("nested").unwrap().add_dataset("x", vec![1]).unwrap();
        a.add_dataset("first", vec![1.0]).unwrap();
        a.add_dataset("second", vec![2.0]).unwrap();
        root.add_group("b").unwrap();
        // reopening an existing group keeps its children
        root.add_group("a").unwrap().add_dataset("third", vec![3.0]).unwrap();
    }

    let file = File::open(&path).unwrap();
    let root = View::new(file.root().clone());
    assert_eq!(root.len(), 2);
    assert_eq!(root.find_group("a"), Some(0));
    assert_eq!(root.find_group("b"), Some(1));
    assert_eq!(root.find_group("c"), None);
    assert_eq!(root.member(1).unwrap().name(), "b");
    assert!(root.member(2).is_err());

    let a = root.group("a").unwrap();
    assert_eq!(a.find_dataset("first"), Some(0));
    assert_eq!(a.find_dataset("third"), Some(2));
    assert_eq!(a.group("nested").unwrap().read_all::<i32>("x").unwrap(), vec![1]);
    assert!(matches!(
        a.dataset("fourth"),
        Err(StoreError::NotFound { kind: "dataset", .. })
    ));
    assert!(matches!(
        root.group("c"),
        Err(StoreError::NotFound { kind: "group", .. })
    ));

    let dump = file.to_string();
    assert!(dump.contains("nested") && dump.contains("third"), "{}", dump);
}

#[test]
fn test_attributes_survive_reopen() {
    let (_dir, path) = scratch();
    {
        let mut file = File::create(&path).unwrap();
        file.root_mut()
            .unwrap()
            .add_dataset("source_node_id", vec![0, 1])
            .unwrap()
            .set_attribute("node_population", "pop_e")
            .unwrap();
    }

    let file = File::open(&path).unwrap();
    let ds = &file.root().datasets()[0];
    assert_eq!(
        ds.attribute("node_population").unwrap().as_deref(),
        Some("pop_e")
    );
    assert_eq!(ds.attribute("missing").unwrap(), None);
}

#[test]
fn test_read_only_files_cannot_be_written() {
    let (_dir, path) = scratch();
    File::create(&path).unwrap();

    let mut file = File::open(&path).unwrap();
    assert!(matches!(
        file.root_mut().unwrap().add_group("late"),
        Err(StoreError::Precondition(_))
    ));
}

#[test]
fn test_shared_tree_cannot_be_modified() {
    let (_dir, path) = scratch();
    let mut file = File::create(&path).unwrap();
    let view = View::new(file.root().clone());
    assert!(matches!(file.root_mut(), Err(StoreError::Precondition(_))));
    drop(view);
    assert!(file.root_mut().is_ok());
}

#[test]
fn test_missing_and_garbage_files() {
    let (dir, path) = scratch();
    assert!(matches!(File::open(&path), Err(StoreError::Io { .. })));

    let garbage = dir.path().join("garbage.sonata");
    std::fs::write(&garbage, b"definitely not a container").unwrap();
    assert!(matches!(File::open(&garbage), Err(StoreError::Format { .. })));

    // valid magic, catalog length far past the end of the file
    let huge = dir.path().join("huge.sonata");
    let mut header = b"SNTAv001".to_vec();
    header.extend_from_slice(&24u64.to_le_bytes());
    header.extend_from_slice(&u64::MAX.to_le_bytes());
    std::fs::write(&huge, header).unwrap();
    assert!(matches!(File::open(&huge), Err(StoreError::Format { .. })));
}

#[cfg(not(feature = "hdf5"))]
#[test]
fn test_hdf5_files_need_the_feature() {
    let (_dir, path) = scratch();
    let mut bytes = b"\x89HDF\r\n\x1a\n".to_vec();
    bytes.resize(96, 0);
    std::fs::write(&path, bytes).unwrap();
    let err = File::open(&path).unwrap_err();
    assert!(matches!(err, StoreError::Format { .. }));
    assert!(err.to_string().contains("hdf5"), "{}", err);
}
