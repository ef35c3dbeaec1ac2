// Concurrent Access Tests for mapkv
// These tests verify environments shared across threads

use mapkv::{Binding, EnvOptions, Environment, Error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Environment {
    Environment::open_with(Binding::new().unwrap(), dir.path(), &EnvOptions::default()).unwrap()
}

fn read_counter(env: &Environment) -> u64 {
    env.read(|txn| {
        Ok(match txn.get("counter")? {
            Some(raw) => u64::from_le_bytes(raw.as_ref().try_into().unwrap()),
            None => 0,
        })
    })
    .unwrap()
}

/// Test concurrent writers each committing their own keys
#[test]
fn test_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let env = open(&dir);

    let num_threads = 8;
    let writes_per_thread = 50;
    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let env = env.clone();
        handles.push(thread::spawn(move || {
            for i in 0..writes_per_thread {
                let key = format!("thread_{}_key_{}", thread_id, i);
                let value = format!("thread_{}_value_{}", thread_id, i);
                env.write(|txn| txn.set(&key, &value)).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(env.stat().unwrap().entries, (num_threads * writes_per_thread) as usize);
    env.read(|txn| {
        for thread_id in 0..num_threads {
            for i in 0..writes_per_thread {
                let key = format!("thread_{}_key_{}", thread_id, i);
                let expected = format!("thread_{}_value_{}", thread_id, i);
                assert_eq!(txn.get(&key)?.as_deref(), Some(expected.as_bytes()));
            }
        }
        Ok(())
    })
    .unwrap();
}

/// Test read-modify-write increments are never lost
#[test]
fn test_serialized_increments() {
    let dir = TempDir::new().unwrap();
    let env = open(&dir);

    let num_threads = 6;
    let increments = 100;
    let barrier = Arc::new(Barrier::new(num_threads));
    let mut handles = vec![];

    for _ in 0..num_threads {
        let env = env.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..increments {
                env.write(|txn| {
                    let current = match txn.get("counter")? {
                        Some(raw) => u64::from_le_bytes(
                            raw.as_ref()
                                .try_into()
                                .map_err(|_| Error::invalid_state("counter is not eight bytes"))?,
                        ),
                        None => 0,
                    };
                    txn.set("counter", (current + 1).to_le_bytes())
                })
                .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(read_counter(&env), (num_threads * increments) as u64);
}

/// Test readers on other threads keep a consistent snapshot while a writer commits
#[test]
fn test_concurrent_snapshot_readers() {
    let dir = TempDir::new().unwrap();
    let env = open(&dir);

    env.write(|txn| {
        for i in 0..100 {
            txn.set(format!("key{:03}", i), "v1")?;
        }
        Ok(())
    })
    .unwrap();

    let num_readers = 4;
    let opened = Arc::new(Barrier::new(num_readers + 1));
    let committed = Arc::new(Barrier::new(num_readers + 1));
    let mut handles = vec![];

    for _ in 0..num_readers {
        let env = env.clone();
        let opened = Arc::clone(&opened);
        let committed = Arc::clone(&committed);
        handles.push(thread::spawn(move || {
            let txn = env.begin_ro().unwrap();
            opened.wait();
            committed.wait();

            // Every value still comes from the pre-commit snapshot
            let mut cursor = txn.cursor().unwrap();
            let mut seen = 0;
            for entry in cursor.iter() {
                let (_, value) = entry.unwrap();
                assert_eq!(value, "v1");
                seen += 1;
            }
            assert_eq!(seen, 100);
            drop(cursor);
            txn.abort();

            env.read(|txn| txn.get("key000")).unwrap()
        }));
    }

    opened.wait();
    env.write(|txn| {
        for i in 0..100 {
            txn.set(format!("key{:03}", i), "v2")?;
        }
        txn.set("extra", "new")
    })
    .unwrap();
    committed.wait();

    for handle in handles {
        let latest = handle.join().unwrap();
        assert_eq!(latest.as_deref(), Some(&b"v2"[..]));
    }
}

/// Test many threads reading the same keys
#[test]
fn test_concurrent_reads() {
    let dir = TempDir::new().unwrap();
    let env = open(&dir);

    env.write(|txn| {
        for i in 0..200 {
            txn.set(format!("key{}", i), format!("value{}", i))?;
        }
        Ok(())
    })
    .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];
    for _ in 0..8 {
        let env = env.clone();
        let hits = Arc::clone(&hits);
        handles.push(thread::spawn(move || {
            env.read(|txn| {
                for i in 0..200 {
                    if txn.get(format!("key{}", i))?.is_some() {
                        hits.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(())
            })
            .unwrap();
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(hits.load(Ordering::Relaxed), 8 * 200);
    assert_eq!(env.open_transactions(), 0);
}

/// Test close is refused while another thread holds a transaction
#[test]
fn test_close_refused_across_threads() {
    let dir = TempDir::new().unwrap();
    let env = open(&dir);

    let opened = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let handle = {
        let env = env.clone();
        let opened = Arc::clone(&opened);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            let txn = env.begin_ro().unwrap();
            opened.wait();
            release.wait();
            txn.abort();
        })
    };

    opened.wait();
    assert!(matches!(env.close(), Err(Error::TransactionsOpen(1))));
    release.wait();
    handle.join().unwrap();

    env.close().unwrap();
    assert!(!env.is_open());
}
