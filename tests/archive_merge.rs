//! Archiver: index merge across runs, truncation and failure ordering

mod common;

use common::engine;
use tempfile::TempDir;
use tmco_rs::{
    ArchiveOptions, Archiver, Index, KvStore, MemoryRegistry, Members, StorageProvider, TmcoError,
};

fn read_index(store: &KvStore) -> Index {
    Index::decode(&store.get("index").unwrap().unwrap()).unwrap()
}

fn filenames(index: &Index) -> Vec<&str> {
    index.filenames().collect()
}

#[test]
fn test_rearchive_without_truncate_merges() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let archiver = Archiver::for_engine(&engine);
    let target = dir.path().join("app.tmca");

    archiver
        .archive(
            &target,
            Members::new().bytes("a.js", engine.container("exports.a = 1;")),
            &ArchiveOptions::default(),
        )
        .unwrap();
    let outcome = archiver
        .archive(
            &target,
            Members::new().bytes("b.js", engine.container("exports.b = 2;")),
            &ArchiveOptions::default().truncate(false),
        )
        .unwrap();

    assert_eq!(outcome.written, 1);
    assert_eq!(outcome.index.size, 2);
    let ids: Vec<u64> = outcome.index.entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(filenames(&outcome.index), vec!["a.js", "b.js"]);

    let store = KvStore::open_path(&target).unwrap();
    assert_eq!(read_index(&store), outcome.index);
    assert!(store.contains("a.js"));
    assert!(store.contains("b.js"));
}

#[test]
fn test_kept_members_come_first() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let archiver = Archiver::for_engine(&engine);
    let target = dir.path().join("merge.tmca");
    let keep = ArchiveOptions::default().truncate(false);

    archiver
        .archive(
            &target,
            vec![
                ("z.js".to_string(), b"tick;".to_vec()),
                ("m.js".to_string(), b"tick;".to_vec()),
            ],
            &keep,
        )
        .unwrap();
    let outcome = archiver
        .archive(
            &target,
            vec![
                ("m.js".to_string(), b"tick;".to_vec()),
                ("c.js".to_string(), b"tick;".to_vec()),
            ],
            &keep,
        )
        .unwrap();

    // z.js survives from the first run; m.js was rewritten so it sorts with the new names
    assert_eq!(filenames(&outcome.index), vec!["z.js", "c.js", "m.js"]);
    assert_eq!(outcome.index.entries[2].id, 2);
}

#[test]
fn test_truncate_discards_previous_members() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let archiver = Archiver::for_engine(&engine);
    let target = dir.path().join("fresh.tmca");

    archiver
        .archive(
            &target,
            Members::new().bytes("old.js", b"tick;".to_vec()),
            &ArchiveOptions::default(),
        )
        .unwrap();
    let outcome = archiver
        .archive(
            &target,
            Members::new().bytes("new.js", b"tick;".to_vec()),
            &ArchiveOptions::default(),
        )
        .unwrap();

    assert_eq!(filenames(&outcome.index), vec!["new.js"]);
    let store = KvStore::open_path(&target).unwrap();
    assert!(!store.contains("old.js"));
}

#[test]
fn test_empty_member_set_writes_empty_index() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let target = dir.path().join("empty.tmca");

    let outcome = Archiver::for_engine(&engine)
        .archive(&target, Members::new(), &ArchiveOptions::default())
        .unwrap();
    assert_eq!(outcome.index.size, 0);

    let store = KvStore::open_path(&target).unwrap();
    let index = read_index(&store);
    assert!(index.is_empty());
    assert_eq!(index.size, 0);
    assert!(store.contains("versions"));
}

#[test]
fn test_failed_member_leaves_index_unwritten() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let target = dir.path().join("partial.tmca");

    let result = Archiver::for_engine(&engine).archive(
        &target,
        Members::new()
            .bytes("ok.js", b"tick;".to_vec())
            .file(dir.path().join("missing.js").to_string_lossy()),
        &ArchiveOptions::default(),
    );
    assert!(matches!(result, Err(TmcoError::Io(_))));

    let store = KvStore::open_path(&target).unwrap();
    assert!(store.get("index").unwrap().is_none());
}

#[test]
fn test_factory_storage_per_target() {
    let engine = engine();
    let registry = MemoryRegistry::new();
    let storage = StorageProvider::memory(registry.clone());

    Archiver::for_engine(&engine)
        .archive(
            "one.tmca",
            Members::new().bytes("a.js", b"tick;".to_vec()),
            &ArchiveOptions::default().storage(storage.clone()),
        )
        .unwrap();
    Archiver::for_engine(&engine)
        .archive(
            "two.tmca",
            Members::new().bytes("b.js", b"tick;".to_vec()),
            &ArchiveOptions::default().storage(storage),
        )
        .unwrap();

    assert_eq!(registry.names(), vec!["one.tmca".to_string(), "two.tmca".to_string()]);

    let one = KvStore::from_bytes(&registry.get("one.tmca").unwrap().to_vec()).unwrap();
    assert_eq!(filenames(&read_index(&one)), vec!["a.js"]);
    // raw payload, no entry wrapper, over external storage
    assert_eq!(one.get("a.js").unwrap().unwrap(), b"tick;");
}
