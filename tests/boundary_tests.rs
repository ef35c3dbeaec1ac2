// Boundary Condition Tests for mapkv
// These tests verify behavior at engine limits and on misuse

use mapkv::{Binding, DatabaseFlags, EnvOptions, Environment, Error, ErrorCategory, ErrorKind, WriteFlags};
use tempfile::TempDir;

fn open_with(dir: &TempDir, options: EnvOptions) -> Environment {
    Environment::open_with(Binding::new().unwrap(), dir.path(), &options).unwrap()
}

/// Test operations on a completely empty environment
#[test]
fn test_empty_environment_operations() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());

    env.read(|txn| {
        assert_eq!(txn.get("nonexistent")?, None);
        let mut cursor = txn.cursor()?;
        assert_eq!(cursor.first()?, None);
        assert_eq!(cursor.last()?, None);
        assert_eq!(cursor.iter().count(), 0);
        Ok(())
    })
    .unwrap();

    let err = env.write(|txn| txn.primary_database()?.delete("nonexistent")).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(env.stat().unwrap().entries, 0);
}

/// Test empty and oversized keys are rejected by the engine
#[test]
fn test_key_size_limits() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());
    let max = env.max_key_size().unwrap();

    let err = env.write(|txn| txn.set("", "v")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValSize);

    let too_long = vec![b'k'; max + 1];
    let err = env.write(|txn| txn.set(&too_long, "v")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValSize);
    assert_eq!(err.kind().category(), ErrorCategory::Misuse);

    let longest = vec![b'k'; max];
    env.write(|txn| txn.set(&longest, "v")).unwrap();
    assert!(env.read(|txn| txn.contains(&longest)).unwrap());
}

/// Test empty and large values
#[test]
fn test_value_sizes() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());
    let large = vec![0xabu8; 1024 * 1024];

    env.write(|txn| {
        txn.set("empty", b"")?;
        txn.set("large", &large)
    })
    .unwrap();

    env.read(|txn| {
        assert_eq!(txn.get("empty")?.map(|v| v.len()), Some(0));
        assert_eq!(txn.get("large")?.as_deref(), Some(&large[..]));
        Ok(())
    })
    .unwrap();
    assert!(env.stat().unwrap().overflow_pages > 0);
}

/// Test a full map fails the write, and growing the map lets a retry succeed
#[test]
fn test_map_full_then_resize() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default().map_size(256 * 1024));
    let chunk = vec![7u8; 16 * 1024];

    let mut written = 0;
    let err = loop {
        let key = format!("chunk{:04}", written);
        match env.write(|txn| txn.set(&key, &chunk)) {
            Ok(()) => written += 1,
            Err(e) => break e,
        }
        assert!(written < 1000, "map never filled up");
    };
    assert_eq!(err.kind(), ErrorKind::MapFull);
    assert!(err.is_retryable());
    assert_eq!(env.open_transactions(), 0);

    env.set_map_size(4 * 1024 * 1024).unwrap();
    let key = format!("chunk{:04}", written);
    env.write(|txn| txn.set(&key, &chunk)).unwrap();
    assert_eq!(env.stat().unwrap().entries, written + 1);
}

/// Test NO_OVERWRITE and the special write flags
#[test]
fn test_write_flags() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());

    env.write(|txn| txn.set("k", "first")).unwrap();
    let err = env.write(|txn| txn.put("k", "second", WriteFlags::NO_OVERWRITE)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyExists);
    assert_eq!(env.read(|txn| txn.get("k")).unwrap().as_deref(), Some(&b"first"[..]));

    // Buffer-handing flags are only reachable through their dedicated calls
    let err = env.write(|txn| txn.put("k", "v", WriteFlags::RESERVE)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

/// Test a reserved value is filled in place
#[test]
fn test_reserve() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());

    env.write(|txn| {
        let db = txn.primary_database()?;
        db.reserve("filled", 8, WriteFlags::empty(), |buf| buf.copy_from_slice(b"reserved"))?;
        db.reserve("zero", 0, WriteFlags::empty(), |buf| assert!(buf.is_empty()))
    })
    .unwrap();

    env.read(|txn| {
        assert_eq!(txn.get("filled")?.as_deref(), Some(&b"reserved"[..]));
        assert_eq!(txn.get("zero")?.map(|v| v.len()), Some(0));
        Ok(())
    })
    .unwrap();
}

/// Test the keyspace limit is enforced
#[test]
fn test_max_dbs_limit() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default().max_dbs(2));

    let err = env
        .write(|txn| {
            txn.database(Some("one"), DatabaseFlags::CREATE)?;
            txn.database(Some("two"), DatabaseFlags::CREATE)?;
            txn.database(Some("three"), DatabaseFlags::CREATE)?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DbsFull);
    assert!(err.is_retryable());
}

/// Test writes inside a read-only transaction fail without side effects
#[test]
fn test_write_in_read_only_transaction() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());

    let err = env.read(|txn| txn.set("k", "v")).unwrap_err();
    assert_eq!(err.code(), Some(libc::EACCES));
    assert!(!env.read(|txn| txn.contains("k")).unwrap());
}

/// Test invalid options are rejected before any handle is created
#[test]
fn test_invalid_options() {
    let dir = TempDir::new().unwrap();
    let result = Environment::open_with(Binding::new().unwrap(), dir.path(), &EnvOptions::default().map_size(0));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    let result =
        Environment::open_with(Binding::new().unwrap(), dir.path(), &EnvOptions::default().max_readers(0));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

/// Test an environment that was closed refuses every operation
#[test]
fn test_operations_after_close() {
    let dir = TempDir::new().unwrap();
    let env = open_with(&dir, EnvOptions::default());
    env.close().unwrap();

    assert!(matches!(env.begin_rw(), Err(Error::NotOpen)));
    assert!(matches!(env.info(), Err(Error::NotOpen)));
    assert!(matches!(env.sync(true), Err(Error::NotOpen)));
    assert!(matches!(env.set_map_size(1 << 20), Err(Error::NotOpen)));
}
