//! Index file entries.
//!
//! ## Entry Format
//!
//! ```text
//! | file number (4, BE) | offset (4, BE) |
//! ```
//!
//! Entry 0 is a sentinel: `file` is the tail data file and `offset` is the
//! number of the first item stored in it (the actual tail). Every following
//! entry holds the data file of one item and the offset just past its last
//! byte. Item `r` (relative to the actual tail) therefore spans
//! `[entry[r].offset, entry[r + 1].offset)` in `entry[r + 1].file`, except
//! that an item starts at offset 0 whenever `r == 0` or the file number
//! changes between the two entries.

/// Size of one encoded index entry.
pub const ENTRY_SIZE: u64 = 8;

/// One fixed-size index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    /// Data file number.
    pub file: u32,
    /// End offset within `file` (or the tail item number for the sentinel).
    pub offset: u32,
}

impl IndexEntry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    /// Encodes the entry.
    #[must_use]
    pub fn encode(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[..4].copy_from_slice(&self.file.to_be_bytes());
        buf[4..].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    /// Appends the encoded entry to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.encode());
    }

    /// Decodes an entry from the first [`ENTRY_SIZE`] bytes of `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than [`ENTRY_SIZE`]. Callers slice whole
    /// entries out of the index, so a short slice is a logic error.
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        Self {
            file: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            offset: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        }
    }

    /// Returns whether `self` may directly follow `prev` in the index.
    ///
    /// An entry either stays in the same file without moving backwards, or
    /// moves on to exactly the next file.
    #[must_use]
    pub fn follows(&self, prev: &Self) -> bool {
        (self.file == prev.file && self.offset >= prev.offset)
            || Some(self.file) == prev.file.checked_add(1)
    }

    /// Computes the byte range of an item from its bounding entries.
    ///
    /// `first` is set for the first stored item, whose start bound is the
    /// sentinel rather than a real entry.
    ///
    /// Returns `(file, start, end)`, or `None` if the entries are
    /// inconsistent.
    #[must_use]
    pub fn bounds(start: Self, end: Self, first: bool) -> Option<(u32, u64, u64)> {
        if first || start.file != end.file {
            return Some((end.file, 0, u64::from(end.offset)));
        }
        if end.offset < start.offset {
            return None;
        }
        Some((end.file, u64::from(start.offset), u64::from(end.offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let entry = IndexEntry::new(3, 0x0102_0304);
        let encoded = entry.encode();
        assert_eq!(encoded, [0, 0, 0, 3, 1, 2, 3, 4]);
        assert_eq!(IndexEntry::decode(&encoded), entry);

        let mut buf = vec![0xff];
        entry.encode_into(&mut buf);
        assert_eq!(IndexEntry::decode(&buf[1..]), entry);
    }

    #[test]
    fn follows_rules() {
        let prev = IndexEntry::new(2, 100);
        assert!(IndexEntry::new(2, 100).follows(&prev));
        assert!(IndexEntry::new(2, 150).follows(&prev));
        assert!(IndexEntry::new(3, 10).follows(&prev));
        assert!(!IndexEntry::new(2, 99).follows(&prev));
        assert!(!IndexEntry::new(4, 10).follows(&prev));
        assert!(!IndexEntry::new(1, 200).follows(&prev));
    }

    #[test]
    fn bounds_within_one_file() {
        let start = IndexEntry::new(0, 40);
        let end = IndexEntry::new(0, 60);
        assert_eq!(IndexEntry::bounds(start, end, false), Some((0, 40, 60)));
    }

    #[test]
    fn bounds_at_file_change_start_at_zero() {
        let start = IndexEntry::new(0, 2048);
        let end = IndexEntry::new(1, 2048);
        assert_eq!(IndexEntry::bounds(start, end, false), Some((1, 0, 2048)));
    }

    #[test]
    fn bounds_of_first_item_ignore_sentinel() {
        // Sentinel says: tail file 5, first item is #1000.
        let sentinel = IndexEntry::new(5, 1000);
        let end = IndexEntry::new(5, 30);
        assert_eq!(IndexEntry::bounds(sentinel, end, true), Some((5, 0, 30)));
    }

    #[test]
    fn bounds_reject_backwards_offsets() {
        let start = IndexEntry::new(0, 60);
        let end = IndexEntry::new(0, 40);
        assert_eq!(IndexEntry::bounds(start, end, false), None);
    }
}
