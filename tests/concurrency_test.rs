//! Tests for concurrent table access

use proctrack::{ConnectionContext, ConnectionTable, ProcessRecord, TableError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

const THREADS: u64 = 8;

fn record_for(raw: u64) -> ProcessRecord {
    ProcessRecord::new(raw as u32, (raw >> 32) as u32, "conc", raw)
}

#[test]
fn test_concurrent_distinct_key_inserts() {
    let per_thread = 1_000u64;
    let table = ConnectionTable::new((THREADS * per_thread) as usize);

    thread::scope(|s| {
        for t in 0..THREADS {
            let table = &table;
            s.spawn(move || {
                for i in 0..per_thread {
                    let raw = (t << 32) | i;
                    table
                        .insert_or_replace(ConnectionContext::new(raw), record_for(raw))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(table.len(), (THREADS * per_thread) as usize);
    for t in 0..THREADS {
        for i in 0..per_thread {
            let raw = (t << 32) | i;
            assert_eq!(table.lookup(ConnectionContext::new(raw)), Some(record_for(raw)));
        }
    }
    assert_eq!(table.iter().count(), (THREADS * per_thread) as usize);
}

#[test]
fn test_racing_for_last_slots_never_overfills() {
    let capacity = 500;
    let table = ConnectionTable::new(capacity);
    let accepted = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..THREADS {
            let (table, accepted, rejected) = (&table, &accepted, &rejected);
            s.spawn(move || {
                for i in 0..200u64 {
                    let raw = (t << 32) | i;
                    match table.insert_or_replace(ConnectionContext::new(raw), record_for(raw)) {
                        Ok(_) => accepted.fetch_add(1, Ordering::Relaxed),
                        Err(TableError::CapacityExceeded { .. }) => {
                            rejected.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });

    assert_eq!(accepted.load(Ordering::Relaxed), capacity);
    assert_eq!(rejected.load(Ordering::Relaxed), THREADS as usize * 200 - capacity);
    assert_eq!(table.len(), capacity);
    assert_eq!(table.iter().count(), capacity);
}

#[test]
fn test_no_torn_reads_during_replacement() {
    let table = ConnectionTable::new(16);
    let ctx = ConnectionContext::new(77);
    // Both records are internally consistent: every field derives from one value
    let make = |v: u32| ProcessRecord::new(v, v, if v % 2 == 0 { "even" } else { "odd" }, u64::from(v));
    table.insert_or_replace(ctx, make(0)).unwrap();

    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for v in 1..50_000u32 {
                table.insert_or_replace(ctx, make(v)).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..3 {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let rec = table.lookup(ctx).expect("key is never removed");
                    assert_eq!(rec, make(rec.pid), "torn record observed: {:?}", rec);
                }
            });
        }

        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                for (key, rec) in table.iter() {
                    assert_eq!(key, ctx);
                    assert_eq!(rec, make(rec.pid));
                }
            }
        });
    });

    assert_eq!(table.lookup(ctx), Some(make(49_999)));
}

#[test]
fn test_concurrent_open_close_churn() {
    let capacity = 256;
    let table = ConnectionTable::with_stripes(capacity, 8);

    thread::scope(|s| {
        for t in 0..THREADS {
            let table = &table;
            s.spawn(move || {
                for round in 0..2_000u64 {
                    let raw = (t << 32) | (round % 16);
                    let ctx = ConnectionContext::new(raw);
                    if table.insert_or_replace(ctx, record_for(raw)).is_ok() {
                        assert_eq!(table.lookup(ctx), Some(record_for(raw)));
                        assert!(table.remove(ctx).is_some());
                    }
                    assert!(table.len() <= capacity);
                }
            });
        }
    });

    assert!(table.is_empty());
    assert_eq!(table.iter().count(), 0);
}

#[test]
fn test_same_key_insert_remove_race_leaves_single_entry_or_none() {
    let table = ConnectionTable::new(8);
    let ctx = ConnectionContext::new(5);

    thread::scope(|s| {
        for t in 0..4u32 {
            let table = &table;
            s.spawn(move || {
                for i in 0..5_000u32 {
                    if (i + t) % 3 == 0 {
                        table.remove(ctx);
                    } else {
                        table
                            .insert_or_replace(ctx, ProcessRecord::new(t, i, "race", 0))
                            .unwrap();
                    }
                }
            });
        }
    });

    let live: Vec<_> = table.iter().collect();
    assert!(live.len() <= 1);
    assert_eq!(table.len(), live.len());
}

#[test]
fn test_long_lived_entries_survive_neighbour_churn() {
    let table = ConnectionTable::with_stripes(512, 16);
    let long_lived: Vec<u64> = (0..128u64).map(|i| (1 << 40) | i).collect();
    for raw in &long_lived {
        table
            .insert_or_replace(ConnectionContext::new(*raw), record_for(*raw))
            .unwrap();
    }
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let mut churners = Vec::new();
        for t in 0..THREADS {
            let table = &table;
            churners.push(s.spawn(move || {
                for round in 0..20_000u64 {
                    let raw = (t << 32) | round;
                    let ctx = ConnectionContext::new(raw);
                    if table.insert_or_replace(ctx, record_for(raw)).is_ok() {
                        assert_eq!(table.lookup(ctx), Some(record_for(raw)));
                        assert_eq!(table.remove(ctx), Some(record_for(raw)));
                    }
                }
            }));
        }

        let (table, long_lived, done) = (&table, &long_lived, &done);
        s.spawn(move || {
            while !done.load(Ordering::Acquire) {
                for raw in long_lived {
                    assert_eq!(
                        table.lookup(ConnectionContext::new(*raw)),
                        Some(record_for(*raw)),
                        "long-lived entry {:#x} went missing",
                        raw
                    );
                }
            }
        });

        let results: Vec<_> = churners.into_iter().map(|churner| churner.join()).collect();
        done.store(true, Ordering::Release);
        for result in results {
            result.unwrap();
        }
    });

    assert_eq!(table.len(), long_lived.len());
    assert_eq!(table.iter().count(), long_lived.len());
}
