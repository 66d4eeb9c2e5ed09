//! Stress tests for concurrency and durability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use quorumkv::{LsmEngine, OptionsBuilder};
use tempfile::TempDir;

fn small_tables(dir: &TempDir) -> Arc<LsmEngine> {
    let options = OptionsBuilder::new()
        .flush_threshold(4 * 1024)
        .compaction_trigger(6)
        .build()
        .unwrap();
    LsmEngine::open_with_options(dir.path(), options).unwrap()
}

/// Test concurrent writers with many keys.
#[test]
fn stress_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let engine = small_tables(&dir);

    let num_threads = 8;
    let keys_per_thread = 1000;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..keys_per_thread {
                    let key = format!("thread{:02}_key{:05}", t, i);
                    let value = format!("value_{}", i);
                    engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..num_threads {
        for i in 0..keys_per_thread {
            let key = format!("thread{:02}_key{:05}", t, i);
            let cell = engine.get(key.as_bytes()).unwrap();
            assert_eq!(
                cell.into_data(),
                Some(Bytes::from(format!("value_{}", i))),
                "Missing key: {}",
                key
            );
        }
    }
    assert!(engine.stats().flushes_completed > 0);
}

/// Readers never see a key disappear while writers rotate and compact.
#[test]
fn stress_concurrent_read_write() {
    let dir = TempDir::new().unwrap();
    let engine = small_tables(&dir);

    for i in 0..1000 {
        let key = format!("key{:05}", i);
        engine.upsert(key.as_bytes(), b"initial").unwrap();
    }

    let num_readers = 4;
    let num_writers = 4;
    let ops_per_thread = 2000;
    let mut handles = vec![];

    for r in 0..num_readers {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = format!("key{:05}", (i * 7 + r) % 1000);
                let cell = engine.get(key.as_bytes()).unwrap();
                assert!(cell.is_present(), "{} vanished", key);
            }
        }));
    }

    for t in 0..num_writers {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = format!("key{:05}", (i * 13 + t) % 1000);
                let value = format!("t{}_i{}", t, i);
                engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(engine.range(b"", None).unwrap().count(), 1000);
}

/// Explicit compactions racing with writes and scans keep every key.
#[test]
fn stress_compaction_during_writes() {
    let dir = TempDir::new().unwrap();
    let engine = small_tables(&dir);
    let stop = Arc::new(AtomicBool::new(false));

    let compactor = {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                engine.compact().unwrap();
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let scanner = {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let mut previous: Option<Bytes> = None;
                for item in engine.range(b"", None).unwrap() {
                    let (key, _) = item.unwrap();
                    if let Some(previous) = &previous {
                        assert!(previous < &key, "scan out of order");
                    }
                    previous = Some(key);
                }
            }
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..1500 {
                    let key = format!("w{}_{:05}", t, i);
                    engine.upsert(key.as_bytes(), &[b'x'; 40]).unwrap();
                    if i % 5 == 0 {
                        engine.remove(key.as_bytes()).unwrap();
                    }
                }
            })
        })
        .collect();

    for h in writers {
        h.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    compactor.join().unwrap();
    scanner.join().unwrap();

    assert_eq!(engine.range(b"", None).unwrap().count(), 4 * 1200);
    engine.flush().unwrap();
    engine.compact().unwrap();
    assert_eq!(engine.stats().sstable_count, 1);
    assert_eq!(engine.range(b"", None).unwrap().count(), 4 * 1200);
}

/// Test rapid open/close cycles.
#[test]
fn stress_open_close_cycles() {
    let dir = TempDir::new().unwrap();

    for cycle in 0..10 {
        let engine = LsmEngine::open(dir.path()).unwrap();

        for i in 0..100 {
            let key = format!("cycle{}_key{}", cycle, i);
            let value = format!("value_{}", i);
            engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
        }

        if cycle > 0 {
            for i in 0..100 {
                let key = format!("cycle{}_key{}", cycle - 1, i);
                let cell = engine.get(key.as_bytes()).unwrap();
                assert!(cell.is_present(), "Missing key from cycle {}", cycle - 1);
            }
        }

        engine.close().unwrap();
    }

    let engine = LsmEngine::open(dir.path()).unwrap();
    for cycle in 0..10 {
        for i in 0..100 {
            let key = format!("cycle{}_key{}", cycle, i);
            assert!(engine.get(key.as_bytes()).unwrap().is_present(), "Missing key: {}", key);
        }
    }
}

/// Test large values.
#[test]
fn stress_large_values() {
    let dir = TempDir::new().unwrap();
    let engine = small_tables(&dir);

    let sizes = [1024, 4096, 16384, 65536, 262144];

    for (i, &size) in sizes.iter().enumerate() {
        let key = format!("large_key_{}", i);
        let value = vec![b'x'; size];
        engine.upsert(key.as_bytes(), &value).unwrap();
    }
    engine.flush().unwrap();

    for (i, &size) in sizes.iter().enumerate() {
        let key = format!("large_key_{}", i);
        let value = engine.get(key.as_bytes()).unwrap().into_data().unwrap();
        assert_eq!(value.len(), size);
        assert!(value.iter().all(|&b| b == b'x'));
    }
}

/// Test overwrite stress - same keys updated many times.
#[test]
fn stress_overwrites() {
    let dir = TempDir::new().unwrap();
    let engine = small_tables(&dir);

    let num_keys = 100;
    let num_rounds = 50;

    for round in 0..num_rounds {
        for i in 0..num_keys {
            let key = format!("key{:03}", i);
            let value = format!("round{}_value{}", round, i);
            engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
        }
    }

    for i in 0..num_keys {
        let key = format!("key{:03}", i);
        let expected = format!("round{}_value{}", num_rounds - 1, i);
        let value = engine.get(key.as_bytes()).unwrap().into_data().unwrap();
        assert_eq!(value, Bytes::from(expected));
    }
}
