//! Compression codecs for cache file containers
//!
//! Each stored file names its codec in the first byte of its container:
//!
//! | tag | codec   |
//! |-----|---------|
//! | 0   | none    |
//! | 1   | bzip2   |
//! | 2   | gzip    |
//! | 3   | lzma    |
//! | 4   | zlib    |

use crate::core::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression method of a stored cache file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    /// Stored as-is
    #[default]
    None = 0,
    Bzip2 = 1,
    Gzip = 2,
    Lzma = 3,
    Zlib = 4,
}

impl Compression {
    /// Every supported codec
    pub const ALL: [Compression; 5] = [
        Compression::None,
        Compression::Bzip2,
        Compression::Gzip,
        Compression::Lzma,
        Compression::Zlib,
    ];

    /// Parse a container tag
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Bzip2),
            2 => Ok(Compression::Gzip),
            3 => Ok(Compression::Lzma),
            4 => Ok(Compression::Zlib),
            _ => Err(CacheError::UnsupportedFormat(format!(
                "unknown compression tag {}",
                value
            ))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Compress data using the specified method
pub fn compress(data: &[u8], method: Compression) -> Result<Vec<u8>> {
    match method {
        Compression::None => Ok(data.to_vec()),
        Compression::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Lzma => {
            let mut compressed = Vec::new();
            lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut compressed)?;
            Ok(compressed)
        }
    }
}

/// Decompress data using the specified method.
///
/// `expected_len` bounds the output: producing more (or fewer) bytes is
/// treated as corruption rather than trusted.
pub fn decompress(data: &[u8], method: Compression, expected_len: usize) -> Result<Vec<u8>> {
    let decompressed = match method {
        Compression::None => data.to_vec(),
        Compression::Bzip2 => read_bounded(bzip2::read::BzDecoder::new(data), method, expected_len)?,
        Compression::Gzip => {
            read_bounded(flate2::read::GzDecoder::new(data), method, expected_len)?
        }
        Compression::Zlib => {
            read_bounded(flate2::read::ZlibDecoder::new(data), method, expected_len)?
        }
        Compression::Lzma => {
            let mut out = Vec::with_capacity(expected_len);
            lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out).map_err(|e| {
                CacheError::Corruption(format!("lzma decompression failed: {}", e))
            })?;
            out
        }
    };

    if decompressed.len() != expected_len {
        return Err(CacheError::Corruption(format!(
            "{:?} payload decompressed to {} bytes, expected {}",
            method,
            decompressed.len(),
            expected_len
        )));
    }
    Ok(decompressed)
}

fn read_bounded<R: Read>(reader: R, method: Compression, expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    reader
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Corruption(format!("{:?} decompression failed: {}", method, e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_tag_conversion() {
        for method in Compression::ALL {
            assert_eq!(Compression::from_u8(method.tag()).unwrap(), method);
        }
        assert!(matches!(
            Compression::from_u8(99),
            Err(CacheError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_all_codecs_round_trip() {
        let data = b"Hello, cache sectors! ".repeat(100);
        for method in Compression::ALL {
            let compressed = compress(&data, method).unwrap();
            let decompressed = decompress(&compressed, method, data.len()).unwrap();
            assert_eq!(decompressed, data, "{:?}", method);
            if method != Compression::None {
                assert!(compressed.len() < data.len(), "{:?}", method);
            }
        }
    }

    #[test]
    fn test_empty_input() {
        for method in Compression::ALL {
            let compressed = compress(&[], method).unwrap();
            assert!(decompress(&compressed, method, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let data = b"X".repeat(2000);
        let compressed = compress(&data, Compression::Gzip).unwrap();
        assert!(matches!(
            decompress(&compressed, Compression::Gzip, 1999),
            Err(CacheError::Corruption(_))
        ));
        assert!(matches!(
            decompress(&compressed, Compression::Gzip, 2001),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_garbage_is_corruption() {
        let garbage = [0x13u8; 64];
        for method in [Compression::Bzip2, Compression::Gzip, Compression::Zlib, Compression::Lzma] {
            assert!(
                matches!(decompress(&garbage, method, 64), Err(CacheError::Corruption(_))),
                "{:?}",
                method
            );
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Compression::Bzip2).unwrap();
        assert_eq!(json, "\"bzip2\"");
        let parsed: Compression = serde_json::from_str("\"lzma\"").unwrap();
        assert_eq!(parsed, Compression::Lzma);
    }
}
