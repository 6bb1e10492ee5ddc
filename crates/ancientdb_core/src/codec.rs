//! Item codec.
//!
//! Items pass through two layers on their way to a data file:
//!
//! 1. **Serialization** - typed values are encoded as CBOR. Raw appends
//!    skip this step; the caller already holds the final bytes.
//! 2. **Compression** - a per-table setting. Compressed tables store every
//!    item as a zstd frame, uncompressed tables store the bytes verbatim.
//!
//! Retrieval undoes step 2 only, so a table always returns exactly the
//! bytes that went into step 2.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compression layer of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemCodec {
    compressed: bool,
}

impl ItemCodec {
    /// Creates a codec; `compressed` selects zstd framing.
    #[must_use]
    pub const fn new(compressed: bool) -> Self {
        Self { compressed }
    }

    /// Returns whether items are compressed.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        self.compressed
    }

    /// Converts item bytes into their stored representation.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode(self, item: &[u8]) -> CoreResult<Vec<u8>> {
        if !self.compressed {
            return Ok(item.to_vec());
        }
        Ok(zstd::bulk::compress(item, zstd::DEFAULT_COMPRESSION_LEVEL)?)
    }

    /// Converts stored bytes back into item bytes.
    ///
    /// A truncated or garbled zstd frame yields `Err` with a description;
    /// the table attaches its name and the item number.
    pub fn decode(self, stored: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.compressed {
            return Ok(stored);
        }
        zstd::stream::decode_all(stored.as_slice()).map_err(|err| err.to_string())
    }
}

/// Serializes a typed item as CBOR.
///
/// # Errors
///
/// Returns [`CoreError::Encode`] if the value cannot be serialized.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Deserializes a retrieved item that was appended with a typed `append`.
///
/// # Errors
///
/// Returns [`CoreError::Decode`] if the bytes are not a valid encoding of `T`.
pub fn decode_item<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    Ok(ciborium::from_reader(bytes)?)
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
