//! Benchmark utilities.

use ancientdb_core::{AncientWriter, Freezer, FreezerConfig, TableConfig};
use rand::Rng;

/// Tables used by the freezer benchmarks.
pub const BENCH_TABLES: [(&str, TableConfig); 2] = [
    ("blobs", TableConfig::new()),
    ("raw", TableConfig::new().compressed(false)),
];

/// Generate random item data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate repetitive item data, which compresses well like real block
/// bodies do.
pub fn repetitive_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 16) as u8).collect()
}

/// Open an in-memory freezer over [`BENCH_TABLES`] holding `items` items of
/// `size` bytes each.
pub fn populated_freezer(items: u64, size: usize) -> Freezer {
    let freezer = Freezer::open_in_memory(&BENCH_TABLES, FreezerConfig::new()).unwrap();
    let data = repetitive_data(size);
    freezer
        .modify_ancients(&mut |batch| {
            for number in 0..items {
                batch.append_raw("blobs", number, &data)?;
                batch.append_raw("raw", number, &data)?;
            }
            Ok(())
        })
        .unwrap();
    freezer
}
