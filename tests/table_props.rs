//! Property-based tests for the connection table.

use proctrack::{ConnectionContext, ConnectionTable, InsertOutcome, ProcessRecord, TableError};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Insert(u64, ProcessRecord),
    Remove(u64),
}

fn record_strategy() -> impl Strategy<Value = ProcessRecord> {
    (any::<u32>(), any::<u32>(), "[a-z0-9._-]{0,20}", any::<u64>())
        .prop_map(|(pid, uid, comm, start)| ProcessRecord::new(pid, uid, comm.as_str(), start))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small key space so inserts, replacements and removes collide often
    prop_oneof![
        3 => (0..24u64, record_strategy()).prop_map(|(key, rec)| Op::Insert(key, rec)),
        2 => (0..24u64).prop_map(Op::Remove),
    ]
}

proptest! {
    /// The table behaves like a capacity-limited map
    #[test]
    fn matches_bounded_map_model(
        capacity in 1..16usize,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let table = ConnectionTable::with_stripes(capacity, 4);
        let mut model: HashMap<u64, ProcessRecord> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(key, rec) => {
                    let result = table.insert_or_replace(ConnectionContext::new(key), rec);
                    match model.get(&key).copied() {
                        Some(previous) => {
                            prop_assert_eq!(result, Ok(InsertOutcome::Replaced(previous)));
                            model.insert(key, rec);
                        }
                        None if model.len() < capacity => {
                            prop_assert_eq!(result, Ok(InsertOutcome::Inserted));
                            model.insert(key, rec);
                        }
                        None => {
                            prop_assert_eq!(result, Err(TableError::CapacityExceeded { capacity }));
                        }
                    }
                }
                Op::Remove(key) => {
                    let removed = table.remove(ConnectionContext::new(key));
                    prop_assert_eq!(removed, model.remove(&key));
                }
            }
            prop_assert_eq!(table.len(), model.len());
        }

        for key in 0..24u64 {
            prop_assert_eq!(table.lookup(ConnectionContext::new(key)), model.get(&key).copied());
        }

        let mut listed: Vec<_> = table.iter().map(|(k, r)| (k.raw(), r)).collect();
        listed.sort_by_key(|(k, _)| *k);
        let mut expected: Vec<_> = model.into_iter().collect();
        expected.sort_by_key(|(k, _)| *k);
        prop_assert_eq!(listed, expected);
    }

    /// Stored command names never exceed fifteen bytes
    #[test]
    fn comm_is_always_truncated(name in "\\PC{0,40}") {
        let table = ConnectionTable::new(1);
        let ctx = ConnectionContext::new(1);
        table.insert_or_replace(ctx, ProcessRecord::new(1, 1, name.as_str(), 1)).unwrap();

        let stored = table.lookup(ctx).unwrap();
        prop_assert!(stored.comm.len() <= 15);
        prop_assert!(name.starts_with(&*stored.comm.as_str()));
    }
}
