use blobcache::{BlobCache, Error, Result, Value};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

fn store(dir: &TempDir) -> PathBuf {
    dir.path().join("store")
}

#[test]
fn ttl_expiration() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("session", "value", Some(1))?;
    assert!(cache.has("session")?);
    assert_eq!(cache.get("session")?, Value::from("value"));

    sleep(Duration::from_millis(2_200));
    assert!(!cache.has("session")?);
    assert!(matches!(cache.get("session"), Err(Error::NotFound)));
    assert!(!cache.keys()?.contains(&"session".to_owned()));

    // The expired key must not resurrect on reopen.
    cache.close()?;
    let cache = BlobCache::open(store(&dir))?;
    assert!(!cache.has("session")?);
    Ok(())
}

#[test]
fn zero_ttl_means_never_expires() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("forever", "v", Some(0))?;
    cache.set("also_forever", "v", None)?;

    assert_eq!(cache.when_expired("forever", false)?, 0);
    assert!(cache.when_expired("forever", true)? < 0);
    assert_eq!(cache.when_expired("also_forever", false)?, 0);
    cache.close()?;
    Ok(())
}

#[test]
fn when_expired_reports_the_deadline() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("k", "v", Some(20))?;
    let relative = cache.when_expired("k", true)?;
    assert!(relative > 0 && relative <= 20);
    let absolute = cache.when_expired("k", false)?;
    assert!(absolute > 0);

    assert!(matches!(
        cache.when_expired("missing", false),
        Err(Error::NotFound)
    ));
    cache.close()?;
    Ok(())
}

#[test]
fn refresh_populates_a_miss() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    let mut calls = 0;
    for _ in 0..3 {
        let value = cache.get_or_refresh(
            "r",
            |_| {
                calls += 1;
                Value::from("value_new_20")
            },
            Some(20),
        )?;
        assert_eq!(value, Value::from("value_new_20"));
    }
    // Only the first lookup was a miss.
    assert_eq!(calls, 1);

    let relative = cache.when_expired("r", true)?;
    assert!(relative > 0 && relative <= 20);

    let stats = cache.stats()?;
    assert_eq!(stats.refreshes, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    cache.close()?;
    Ok(())
}

#[test]
fn refresh_replaces_an_expired_entry() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cache = BlobCache::open(store(&dir))?;

    cache.set("r", "stale", Some(1))?;
    sleep(Duration::from_millis(2_200));

    let value = cache.get_or_refresh("r", |_| Value::from("fresh"), None)?;
    assert_eq!(value, Value::from("fresh"));
    assert_eq!(cache.get("r")?, Value::from("fresh"));
    assert_eq!(cache.when_expired("r", false)?, 0);
    cache.close()?;
    Ok(())
}
