// Property-Based Tests for mapkv
// These tests check stored data against an in-memory model

use std::collections::BTreeMap;

use mapkv::batch::{BatchExecutor, BatchRequest};
use mapkv::{Binding, EnvOptions, Environment};
use proptest::prelude::*;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Environment {
    Environment::open_with(Binding::new().unwrap(), dir.path(), &EnvOptions::default()).unwrap()
}

/// Strategy for keys the engine accepts: non-empty and well under the key limit.
fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

#[derive(Debug, Clone)]
enum Op {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_key(), arb_value()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => arb_key().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every committed record reads back exactly
    #[test]
    fn prop_set_then_get(entries in prop::collection::btree_map(arb_key(), arb_value(), 0..64)) {
        let dir = TempDir::new().unwrap();
        let env = open(&dir);

        env.write(|txn| {
            for (key, value) in &entries {
                txn.set(key, value)?;
            }
            Ok(())
        }).unwrap();

        env.read(|txn| {
            for (key, value) in &entries {
                let stored = txn.get(key)?;
                assert_eq!(stored.as_deref(), Some(&value[..]));
            }
            Ok(())
        }).unwrap();
    }

    /// Cursor iteration matches the sorted model after any mix of writes
    #[test]
    fn prop_cursor_matches_model(ops in prop::collection::vec(arb_op(), 0..128)) {
        let dir = TempDir::new().unwrap();
        let env = open(&dir);
        let mut model = BTreeMap::new();

        env.write(|txn| {
            for op in &ops {
                match op {
                    Op::Set(key, value) => {
                        txn.set(key, value)?;
                        model.insert(key.clone(), value.clone());
                    }
                    Op::Delete(key) => {
                        let removed = txn.delete(key)?;
                        assert_eq!(removed, model.remove(key).is_some());
                    }
                }
            }
            Ok(())
        }).unwrap();

        let stored: Vec<(Vec<u8>, Vec<u8>)> = env.read(|txn| {
            let mut cursor = txn.cursor()?;
            let entries = cursor
                .iter()
                .map(|entry| entry.map(|(k, v)| (k.to_vec(), v.to_vec())))
                .collect::<mapkv::Result<Vec<_>>>()?;
            Ok(entries)
        }).unwrap();
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(stored, expected);
    }

    /// A dump replayed into a fresh environment reproduces every text record
    #[test]
    fn prop_dump_replay(entries in prop::collection::btree_map("[a-z0-9]{1,16}", ".{0,32}", 0..32)) {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let source = BatchExecutor::new(open(&source_dir));
        let target = BatchExecutor::new(open(&target_dir));

        let mut request = BatchRequest::new(true);
        for (key, value) in &entries {
            request.set(key, value);
        }
        prop_assert!(source.execute(&request).unwrap().committed);

        let script = source.dump().unwrap().to_request().unwrap();
        prop_assert!(target.execute(&script).unwrap().committed);
        prop_assert_eq!(source.dump().unwrap(), target.dump().unwrap());
    }
}
