//! Stress harnesses for the Silt engine.
//!
//! These drive high operation counts through a store, sequentially and
//! from contending threads, and report how the run went. A put that
//! loses the first-writer race is a conflict, not a failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use silt_core::{DictionaryId, Key, Store, TransactionId};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that committed or read successfully.
    pub successful_ops: usize,
    /// Puts that lost the first-writer race and rolled back.
    pub conflicted_ops: usize,
    /// Operations that hit a hard error.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, conflicted: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + conflicted + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            conflicted_ops: conflicted,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Conflicted: {}", self.conflicted_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for contention tests).
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys. Small values force write contention.
    pub key_space: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            value_size: 128,
            key_space: 16,
        }
    }
}

/// Runs a sequential write stress test, one commit per operation.
pub fn stress_sequential_writes(
    store: &Store,
    dictionary: DictionaryId,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut conflicted = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = Key::Int((i % config.key_space) as i64);
        let tx = TransactionId::new();

        match store.put(dictionary, tx, key, &value) {
            Ok(true) => match store.commit(tx) {
                Ok(()) => successful += 1,
                Err(_) => {
                    store.rollback(tx);
                    failed += 1;
                }
            },
            Ok(false) => {
                store.rollback(tx);
                conflicted += 1;
            }
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, conflicted, failed, start.elapsed())
}

/// Runs a sequential read stress test over pre-populated keys.
pub fn stress_sequential_reads(
    store: &Store,
    dictionary: DictionaryId,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    for i in 0..config.key_space {
        let tx = TransactionId::new();
        let _ = store.put(dictionary, tx, Key::Int(i as i64), &value);
        let _ = store.commit(tx);
    }

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let reader = TransactionId::new();
    for i in 0..config.operations {
        let key = Key::Int((i % config.key_space) as i64);

        match store.get(dictionary, reader, &key) {
            Ok(Some(_)) => successful += 1,
            Ok(None) => successful += 1, // a miss is still a successful read
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, 0, failed, start.elapsed())
}

/// Runs a mixed put/get/delete stress test.
pub fn stress_mixed_operations(
    store: &Store,
    dictionary: DictionaryId,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut conflicted = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = Key::Int((i % config.key_space) as i64);

        if i % 3 == 1 {
            let reader = TransactionId::new();
            match store.get(dictionary, reader, &key) {
                Ok(_) => successful += 1,
                Err(_) => failed += 1,
            }
            continue;
        }

        let tx = TransactionId::new();
        let staged = if i % 3 == 0 {
            store.put(dictionary, tx, key, &value)
        } else {
            store.delete(dictionary, tx, key)
        };

        match staged {
            Ok(true) => match store.commit(tx) {
                Ok(()) => successful += 1,
                Err(_) => {
                    store.rollback(tx);
                    failed += 1;
                }
            },
            Ok(false) => {
                store.rollback(tx);
                conflicted += 1;
            }
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, conflicted, failed, start.elapsed())
}

/// Runs a large-batch stress test, many puts per commit.
pub fn stress_large_batches(
    store: &Store,
    dictionary: DictionaryId,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let batch_size = 100;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let tx = TransactionId::new();
        let mut staged_all = true;
        for i in 0..batch_size {
            let key = Key::Int((batch * batch_size + i) as i64);
            match store.put(dictionary, tx, key, &value) {
                Ok(true) => {}
                _ => {
                    staged_all = false;
                    break;
                }
            }
        }

        let committed = staged_all && store.commit(tx).is_ok();
        if committed {
            successful += batch_size;
        } else {
            store.rollback(tx);
            failed += batch_size;
        }
    }

    StressTestResult::new(successful, 0, failed, start.elapsed())
}

/// Runs contending writers against a shared, deliberately small key space.
///
/// Each thread stages single-key transactions; a put that loses the
/// first-writer race rolls back and counts as a conflict.
pub fn stress_contending_writers(
    store: Arc<Store>,
    dictionary: DictionaryId,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let conflicted = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let conflicted = Arc::clone(&conflicted);
            let failed = Arc::clone(&failed);
            let key_space = config.key_space;
            let value = vec![0xABu8; config.value_size];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let slot = (t * 31 + i * 17) % key_space;
                    let tx = TransactionId::new();

                    match store.put(dictionary, tx, Key::Int(slot as i64), &value) {
                        Ok(true) => match store.commit(tx) {
                            Ok(()) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                store.rollback(tx);
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        Ok(false) => {
                            store.rollback(tx);
                            conflicted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        conflicted.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use silt_storage::{shared, MemorySource};

    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn sequential_writes_never_conflict() {
        let fixture = TestStore::memory();
        let config = StressConfig {
            operations: 200,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_writes(&fixture, fixture.dictionary, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.conflicted_ops, 0);
        assert_eq!(result.successful_ops, 200);
        assert!(fixture.item_count(fixture.dictionary).unwrap() <= config.key_space);
    }

    #[test]
    fn sequential_reads_succeed() {
        let fixture = TestStore::memory();
        let config = StressConfig {
            operations: 500,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_reads(&fixture, fixture.dictionary, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
    }

    #[test]
    fn mixed_operations_succeed() {
        let fixture = TestStore::memory();
        let config = StressConfig {
            operations: 300,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_mixed_operations(&fixture, fixture.dictionary, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.conflicted_ops, 0);
    }

    #[test]
    fn large_batches_commit_whole() {
        let fixture = TestStore::memory();
        let config = StressConfig {
            operations: 400,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_large_batches(&fixture, fixture.dictionary, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert_eq!(fixture.item_count(fixture.dictionary).unwrap(), 400);
    }

    #[test]
    fn contending_writers_account_for_every_operation() {
        let mut store = Store::new(shared(MemorySource::new()));
        let dictionary = store.register_dictionary();
        store.recover().unwrap();
        let store = Arc::new(store);

        let config = StressConfig {
            operations: 1_000,
            threads: 4,
            value_size: 64,
            key_space: 8,
        };

        let result = stress_contending_writers(Arc::clone(&store), dictionary, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(
            result.successful_ops + result.conflicted_ops,
            config.operations
        );
        assert!(result.successful_ops >= 1);
        assert!(store.item_count(dictionary).unwrap() <= config.key_space);

        // Whatever landed must be a whole value from some committed put
        let reader = TransactionId::new();
        for slot in 0..config.key_space {
            if let Some(value) = store.get(dictionary, reader, &Key::Int(slot as i64)).unwrap() {
                assert_eq!(value.len(), config.value_size);
            }
        }
    }
}
