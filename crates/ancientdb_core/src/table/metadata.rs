//! Table metadata.
//!
//! ## Versions
//!
//! | version | layout (big-endian)                                                  |
//! |---------|----------------------------------------------------------------------|
//! | 0       | no metadata file                                                     |
//! | 1       | `version (2) \| virtual_tail (8)`                                    |
//! | 2       | `version (2) \| virtual_tail (8) \| flush_offset (8) \| crc32 (4)`   |
//!
//! Decoding tries [`DECODERS`] newest-first. Every decoder yields the
//! current [`TableMetadata`]; fields an older layout lacks are re-derived by
//! the table during repair. A new layout is added by prepending a decoder,
//! never by changing an existing one.

use crate::codec::compute_crc32;
use crate::error::{CoreError, CoreResult};
use crate::table::index::ENTRY_SIZE;

/// Current metadata version.
pub const META_VERSION: u16 = 2;

/// Version reported for tables that have no metadata file.
pub const LEGACY_VERSION: u16 = 0;

const V1_SIZE: usize = 10;
const V2_SIZE: usize = 22;

type Decoder = fn(&[u8]) -> Result<Option<TableMetadata>, String>;

/// Known layouts, newest first.
const DECODERS: &[(u16, Decoder)] = &[(2, decode_v2), (1, decode_v1)];

/// Persistent per-table state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableMetadata {
    /// First visible item; items below it are hidden or deleted.
    pub virtual_tail: u64,
    /// Index length up to which data and index are known to be durable.
    pub flush_offset: u64,
}

impl TableMetadata {
    /// Creates metadata.
    #[must_use]
    pub const fn new(virtual_tail: u64, flush_offset: u64) -> Self {
        Self {
            virtual_tail,
            flush_offset,
        }
    }

    /// Encodes at the current version.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(V2_SIZE);
        buf.extend_from_slice(&META_VERSION.to_be_bytes());
        buf.extend_from_slice(&self.virtual_tail.to_be_bytes());
        buf.extend_from_slice(&self.flush_offset.to_be_bytes());
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Decodes metadata of any known version.
    ///
    /// Returns the metadata together with the version it was stored at.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IncompatibleVersion`] for a version with no decoder
    /// - [`CoreError::Corruption`] for malformed or checksum-failing bytes
    pub fn decode(table: &str, data: &[u8]) -> CoreResult<(Self, u16)> {
        for &(version, decoder) in DECODERS {
            match decoder(data) {
                Ok(Some(meta)) => return Ok((meta, version)),
                Ok(None) => continue,
                Err(message) => return Err(CoreError::corruption(table, message)),
            }
        }

        if data.len() < 2 {
            return Err(CoreError::corruption(table, "metadata too short"));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if DECODERS.iter().all(|&(known, _)| known != version) {
            return Err(CoreError::IncompatibleVersion {
                table: table.to_string(),
                version,
            });
        }
        Err(CoreError::corruption(
            table,
            format!("malformed v{version} metadata ({} bytes)", data.len()),
        ))
    }
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(buf)
}

fn decode_v2(data: &[u8]) -> Result<Option<TableMetadata>, String> {
    if data.len() != V2_SIZE || data[..2] != 2u16.to_be_bytes() {
        return Ok(None);
    }
    let stored = u32::from_be_bytes([data[18], data[19], data[20], data[21]]);
    let computed = compute_crc32(&data[..18]);
    if stored != computed {
        return Err(format!(
            "metadata checksum mismatch: expected {stored:08x}, got {computed:08x}"
        ));
    }
    let meta = TableMetadata::new(read_u64(data, 2), read_u64(data, 10));
    if meta.flush_offset % ENTRY_SIZE != 0 {
        return Err(format!("unaligned flush offset {}", meta.flush_offset));
    }
    Ok(Some(meta))
}

fn decode_v1(data: &[u8]) -> Result<Option<TableMetadata>, String> {
    if data.len() != V1_SIZE || data[..2] != 1u16.to_be_bytes() {
        return Ok(None);
    }
    Ok(Some(TableMetadata::new(read_u64(data, 2), 0)))
}

#[cfg(test)]
pub(crate) fn encode_v1(virtual_tail: u64) -> Vec<u8> {
    let mut buf = 1u16.to_be_bytes().to_vec();
    buf.extend_from_slice(&virtual_tail.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_roundtrip() {
        let meta = TableMetadata::new(1234, 8 * 77);
        let encoded = meta.encode();
        assert_eq!(encoded.len(), V2_SIZE);
        assert_eq!(
            TableMetadata::decode("bodies", &encoded).unwrap(),
            (meta, META_VERSION)
        );
    }

    #[test]
    fn v1_decodes_without_flush_offset() {
        let (meta, version) = TableMetadata::decode("bodies", &encode_v1(99)).unwrap();
        assert_eq!(version, 1);
        assert_eq!(meta, TableMetadata::new(99, 0));
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let mut encoded = TableMetadata::new(5, 16).encode();
        encoded[5] ^= 0x40;
        let err = TableMetadata::decode("receipts", &encoded).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn unknown_version_is_incompatible() {
        let mut encoded = TableMetadata::new(5, 16).encode();
        encoded[..2].copy_from_slice(&7u16.to_be_bytes());
        let err = TableMetadata::decode("receipts", &encoded).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IncompatibleVersion { version: 7, .. }
        ));
    }

    #[test]
    fn known_version_wrong_length_is_corruption() {
        let mut encoded = encode_v1(3);
        encoded.push(0);
        let err = TableMetadata::decode("headers", &encoded).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn short_input_is_corruption() {
        let err = TableMetadata::decode("headers", &[2]).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn unaligned_flush_offset_rejected() {
        let encoded = TableMetadata::new(0, 13).encode();
        assert!(TableMetadata::decode("headers", &encoded).is_err());
    }
}
