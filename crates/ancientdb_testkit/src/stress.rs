//! Stress runs for the freezer.
//!
//! These runs exercise a freezer under sustained appends with concurrent
//! readers, checking every item a reader sees against its expected bytes.

use crate::fixtures::{fill_blocks, item_bytes, BODIES, HASHES, HEADERS};
use ancientdb_core::{AncientReader, Freezer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of blocks to append.
    pub blocks: u64,
    /// Blocks per batch.
    pub batch_size: u64,
    /// Number of concurrent reader threads.
    pub readers: usize,
    /// Size of each item in bytes.
    pub item_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            blocks: 2_000,
            batch_size: 50,
            readers: 4,
            item_size: 256,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            blocks: 200,
            batch_size: 10,
            readers: 2,
            item_size: 64,
        }
    }
}

/// Appends blocks in batches. Every batch counts as one operation.
pub fn run_sequential_append(freezer: &Freezer, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0;
    let mut failed = 0;

    let mut next = freezer.ancients().unwrap_or(0);
    let end = next + config.blocks;
    while next < end {
        let count = config.batch_size.min(end - next);
        match fill_blocks(freezer, next, count, config.item_size) {
            Ok(_) => {
                successful += 1;
                next += count;
            }
            Err(_) => {
                failed += 1;
                break;
            }
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends blocks while reader threads read random frozen items.
///
/// Reader operations that return wrong bytes, or fail for an item below
/// the frozen count they observed, count as failures.
pub fn run_concurrent_append_read(freezer: &Freezer, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let done = AtomicBool::new(false);
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    thread::scope(|scope| {
        for reader in 0..config.readers {
            let (done, successful, failed) = (&done, &successful, &failed);
            scope.spawn(move || {
                let mut step = reader as u64 + 1;
                while !done.load(Ordering::Acquire) {
                    let frozen = freezer.ancients().unwrap_or(0);
                    if frozen == 0 {
                        thread::yield_now();
                        continue;
                    }
                    step = step.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    let number = (step >> 33) % frozen;
                    let table = [HEADERS, HASHES, BODIES][(number % 3) as usize];
                    match freezer.ancient(table, number) {
                        Ok(item) if item == item_bytes(table, number, config.item_size) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let writes = run_sequential_append(freezer, config);
        successful.fetch_add(writes.successful_ops, Ordering::Relaxed);
        failed.fetch_add(writes.failed_ops, Ordering::Relaxed);
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{memory_freezer, TestFreezer};

    #[test]
    fn sequential_append_in_memory() {
        let freezer = memory_freezer();
        let config = StressConfig::quick();
        let result = run_sequential_append(&freezer, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 20);
        assert_eq!(freezer.ancients().unwrap(), 200);
    }

    #[test]
    fn concurrent_readers_see_committed_items() {
        let fixture = TestFreezer::new();
        let result = run_concurrent_append_read(&fixture, &StressConfig::quick());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(fixture.ancients().unwrap(), 200);
    }
}
