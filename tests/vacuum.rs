use blobcache::{BlobCache, Result, Value};
use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

fn store(dir: &TempDir) -> PathBuf {
    dir.path().join("store")
}

fn data_path(dir: &TempDir) -> PathBuf {
    dir.path().join("store.data.bin")
}

fn ten_kb_value(seed: u32) -> Vec<u8> {
    let mut value = vec![0u8; 10 * 1024];
    value[..4].copy_from_slice(&seed.to_le_bytes());
    value
}

#[test]
fn fragmentation_bounds() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    // Empty blob counts as fully fragmented.
    assert_eq!(cache.fragmentation_ratio()?, 1.0);

    cache.set("a", "1", None)?;
    assert_eq!(cache.fragmentation_ratio()?, 0.0);

    cache.set("a", "2", None)?;
    let ratio = cache.fragmentation_ratio()?;
    assert!(ratio > 0.0 && ratio < 1.0);
    cache.close()?;
    Ok(())
}

#[test]
fn repeated_overwrites_fragment_and_vacuum_reclaims() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::builder(store(&dir))
        .auto_vacuum_threshold(1.0)
        .open()?;

    let mut last = Vec::new();
    for i in 0..100u32 {
        last = ten_kb_value(i);
        cache.set("k", last.clone(), None)?;
    }
    assert!(cache.fragmentation_ratio()? > 0.98);

    let before = fs::metadata(data_path(&dir))?.len();
    cache.vacuum()?;
    let after = fs::metadata(data_path(&dir))?.len();

    assert_eq!(cache.fragmentation_ratio()?, 0.0);
    assert!(after < before);
    assert_eq!(cache.get("k")?, Value::Bytes(last));
    cache.close()?;
    Ok(())
}

#[test]
fn values_are_identical_after_vacuum() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("text", "hello", None)?;
    cache.set("num", 42i64, None)?;
    cache.set("list", Value::List(vec![Value::Bool(true), Value::Int(7)]), None)?;
    cache.set("dead", "overwritten", None)?;
    cache.set("dead", "live", None)?;
    cache.delete("text")?;
    cache.set("text", "hello again", None)?;

    cache.vacuum()?;

    assert_eq!(cache.get("text")?, Value::from("hello again"));
    assert_eq!(cache.get("num")?, Value::Int(42));
    assert_eq!(
        cache.get("list")?,
        Value::List(vec![Value::Bool(true), Value::Int(7)])
    );
    assert_eq!(cache.get("dead")?, Value::from("live"));
    cache.close()?;
    Ok(())
}

#[test]
fn vacuumed_state_survives_a_crash() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("a", "1", None)?;
    cache.set("a", "2", None)?;
    cache.set("b", "3", None)?;
    cache.vacuum()?;
    // Mutations after the vacuum land in the fresh WAL.
    cache.set("c", "4", None)?;
    drop(cache);

    let mut cache = BlobCache::open(store(&dir))?;
    assert_eq!(cache.get("a")?, Value::from("2"));
    assert_eq!(cache.get("b")?, Value::from("3"));
    assert_eq!(cache.get("c")?, Value::from("4"));
    cache.close()?;
    Ok(())
}

#[test]
fn vacuum_drops_expired_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("stale", "x", Some(1))?;
    cache.set("live", "y", None)?;
    sleep(Duration::from_millis(2_200));

    cache.vacuum()?;
    assert!(!cache.has("stale")?);
    assert_eq!(cache.get("live")?, Value::from("y"));
    assert_eq!(cache.fragmentation_ratio()?, 0.0);
    cache.close()?;
    Ok(())
}

#[test]
fn close_auto_vacuums_over_the_threshold() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;
    for i in 0..50u32 {
        cache.set("k", ten_kb_value(i), None)?;
    }
    let before = fs::metadata(data_path(&dir))?.len();
    cache.close()?;
    let after = fs::metadata(data_path(&dir))?.len();
    assert!(after < before / 10);

    let mut cache = BlobCache::open(store(&dir))?;
    assert_eq!(cache.fragmentation_ratio()?, 0.0);
    assert_eq!(cache.get("k")?, Value::Bytes(ten_kb_value(49)));
    cache.close()?;
    Ok(())
}

#[test]
fn threshold_of_one_disables_auto_vacuum() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::builder(store(&dir))
        .auto_vacuum_threshold(1.0)
        .open()?;
    for i in 0..50u32 {
        cache.set("k", ten_kb_value(i), None)?;
    }
    let before = fs::metadata(data_path(&dir))?.len();
    cache.close()?;
    assert_eq!(fs::metadata(data_path(&dir))?.len(), before);
    Ok(())
}

#[test]
fn vacuum_on_an_empty_store() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;
    cache.vacuum()?;
    assert_eq!(cache.fragmentation_ratio()?, 1.0);
    assert_eq!(fs::metadata(data_path(&dir))?.len(), 18);
    cache.close()?;
    Ok(())
}
