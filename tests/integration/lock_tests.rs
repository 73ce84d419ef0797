//! Job lock behavior between independent database connections

use chrono::{Duration, Utc};
use highrise::config::JobConfig;
use highrise::lock::{default_ttl, DistributedLock, LockError};
use highrise::storage::{share, JobRecord, SqliteStorage, Storage};
use tempfile::TempDir;

fn open_pair(dir: &TempDir) -> (DistributedLock<SqliteStorage>, DistributedLock<SqliteStorage>) {
    let path = dir.path().join("locks.db");

    let mut first = SqliteStorage::new(&path).unwrap();
    first
        .upsert_job(&JobRecord::from_config(&JobConfig::new("news", "frontpage")))
        .unwrap();
    let second = SqliteStorage::new(&path).unwrap();

    (
        DistributedLock::new(share(first), "news", "frontpage"),
        DistributedLock::new(share(second), "news", "frontpage"),
    )
}

#[test]
fn test_acquire_twice_is_contended() {
    let dir = TempDir::new().unwrap();
    let (lock, _) = open_pair(&dir);

    lock.acquire(default_ttl()).unwrap();
    match lock.acquire(default_ttl()) {
        Err(LockError::Contended { namespace, job }) => {
            assert_eq!(namespace, "news");
            assert_eq!(job, "frontpage");
        }
        other => panic!("expected contention, got {:?}", other),
    }

    lock.release().unwrap();
    assert!(lock.acquire(default_ttl()).is_ok());
}

#[test]
fn test_lock_is_visible_to_other_connections() {
    let dir = TempDir::new().unwrap();
    let (here, elsewhere) = open_pair(&dir);

    here.acquire(default_ttl()).unwrap();
    assert!(elsewhere.is_locked().unwrap());
    assert!(matches!(
        elsewhere.acquire(default_ttl()),
        Err(LockError::Contended { .. })
    ));

    here.release().unwrap();
    assert!(elsewhere.acquire(default_ttl()).is_ok());
    assert!(here.is_locked().unwrap());
}

#[test]
fn test_crashed_holder_expires() {
    let dir = TempDir::new().unwrap();
    let (crashed, survivor) = open_pair(&dir);

    let start = Utc::now();
    crashed.acquire_at(Duration::minutes(30), start).unwrap();
    drop(crashed);

    let before_expiry = start + Duration::minutes(29);
    assert!(survivor.acquire_at(default_ttl(), before_expiry).is_err());

    let after_expiry = start + Duration::minutes(31);
    assert!(survivor.acquire_at(default_ttl(), after_expiry).is_ok());
}
