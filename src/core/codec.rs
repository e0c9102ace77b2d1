//! Cache file containers
//!
//! Turns a [`LogicalFile`] into the bytes handed to the store, and back:
//!
//! ```text
//! [tag:u8][compressed_len:u32][uncompressed_len:u32 if tag != 0][data][version:u16]?
//! ```
//!
//! When a file has more than one entry, the decompressed payload carries a
//! trailing directory:
//!
//! ```text
//! [entry bytes in ascending id order][(id:u32, length:u32) * count][count:u32]
//! ```
//!
//! Both directions are pure; nothing here touches storage.

use crate::core::compression::{compress, decompress, Compression};
use crate::core::error::{CacheError, Result};
use crate::core::metadata::{FileContent, FileMetadata, FileSizes, LogicalFile, DIGEST_LEN};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;

/// Length of the optional version trailer
pub const VERSION_TRAILER_LEN: usize = 2;

const DIRECTORY_ENTRY_LEN: usize = 8;

/// Parsed container framing
struct Framing {
    compression: Compression,
    header_len: usize,
    /// End of the compressed data; the checksummed region is `raw[..body_end]`
    body_end: usize,
    uncompressed_len: usize,
    version: Option<u16>,
}

fn parse_framing(raw: &[u8]) -> Result<Framing> {
    if raw.len() < 5 {
        return Err(CacheError::Corruption(format!(
            "container too short: {} bytes",
            raw.len()
        )));
    }

    let compression = Compression::from_u8(raw[0])?;
    let compressed_len = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;

    let (header_len, uncompressed_len): (usize, usize) = match compression {
        Compression::None => (5, compressed_len),
        _ => {
            if raw.len() < 9 {
                return Err(CacheError::corruption(
                    "container truncated inside its header",
                ));
            }
            (9, u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) as usize)
        }
    };

    let body_end = header_len
        .checked_add(compressed_len)
        .filter(|&end| end <= raw.len())
        .ok_or_else(|| {
            CacheError::Corruption(format!(
                "container declares {} data bytes but holds {}",
                compressed_len,
                raw.len() - header_len
            ))
        })?;

    let version = match raw.len() - body_end {
        0 => None,
        VERSION_TRAILER_LEN => Some(u16::from_be_bytes([raw[body_end], raw[body_end + 1]])),
        n => {
            return Err(CacheError::Corruption(format!(
                "{} unexpected trailing bytes after container data",
                n
            )))
        }
    };

    Ok(Framing {
        compression,
        header_len,
        body_end,
        uncompressed_len,
        version,
    })
}

/// Version number in a container's trailer, if it has one
pub fn container_version(raw: &[u8]) -> Result<Option<u16>> {
    Ok(parse_framing(raw)?.version)
}

/// Decode stored bytes into a logical file using its catalog metadata
pub fn decode(raw: &[u8], metadata: &FileMetadata) -> Result<LogicalFile> {
    let framing = parse_framing(raw)?;

    if let Some(expected) = metadata.crc {
        let actual = crc32fast::hash(&raw[..framing.body_end]);
        if actual != expected {
            return Err(CacheError::ChecksumMismatch { expected, actual });
        }
    }

    if let Some(expected) = metadata.uncompressed_size() {
        if expected as usize != framing.uncompressed_len {
            return Err(CacheError::Corruption(format!(
                "container declares {} uncompressed bytes, catalog records {}",
                framing.uncompressed_len, expected
            )));
        }
    }

    let payload = decompress(
        &raw[framing.header_len..framing.body_end],
        framing.compression,
        framing.uncompressed_len,
    )?;

    let content = if metadata.is_entry_packed() {
        FileContent::Entries(unpack_entries(&payload, metadata)?)
    } else if let Some(&entry_id) = metadata.entries.keys().next() {
        FileContent::Entries(BTreeMap::from([(entry_id, payload)]))
    } else {
        FileContent::Blob(payload)
    };

    let mut metadata = metadata.clone();
    metadata.compression = Some(framing.compression);
    Ok(LogicalFile { metadata, content })
}

/// Encode a logical file, returning the bytes to store and the metadata to
/// record in the reference table.
pub fn encode(file: &LogicalFile, compression: Compression) -> Result<(Vec<u8>, FileMetadata)> {
    let identifier_of = |entry_id: &u32| file.metadata.entries.get(entry_id).copied().flatten();

    let (payload, entries) = match &file.content {
        FileContent::Blob(bytes) => (bytes.clone(), BTreeMap::new()),
        FileContent::Entries(map) if map.is_empty() => {
            return Err(CacheError::InvalidInput(
                "an entry file needs at least one entry".into(),
            ))
        }
        FileContent::Entries(map) => {
            let entries: BTreeMap<u32, Option<i32>> =
                map.keys().map(|id| (*id, identifier_of(id))).collect();
            let payload = if map.len() == 1 {
                map.values().next().cloned().unwrap_or_default()
            } else {
                pack_entries(map)?
            };
            (payload, entries)
        }
    };

    let uncompressed_len = u32::try_from(payload.len()).map_err(|_| {
        CacheError::InvalidInput(format!("payload too large: {} bytes", payload.len()))
    })?;
    let compressed = compress(&payload, compression)?;
    let compressed_len = u32::try_from(compressed.len()).map_err(|_| {
        CacheError::InvalidInput(format!(
            "compressed payload too large: {} bytes",
            compressed.len()
        ))
    })?;

    let mut raw = Vec::with_capacity(compressed.len() + 9 + VERSION_TRAILER_LEN);
    raw.push(compression.tag());
    raw.extend_from_slice(&compressed_len.to_be_bytes());
    if compression != Compression::None {
        raw.extend_from_slice(&uncompressed_len.to_be_bytes());
    }
    raw.extend_from_slice(&compressed);

    let body_len = raw.len() as u32;
    let crc = crc32fast::hash(&raw);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&Sha512::digest(&raw));

    raw.extend_from_slice(&(file.metadata.version as u16).to_be_bytes());

    let metadata = FileMetadata {
        compression: Some(compression),
        crc: Some(crc),
        version: file.metadata.version,
        identifier: file.metadata.identifier,
        digest: Some(digest),
        sizes: Some(FileSizes {
            compressed: body_len,
            uncompressed: uncompressed_len,
        }),
        aux_hash: Some(crc32fast::hash(&payload)),
        entries,
    };

    Ok((raw, metadata))
}

/// Check the digest and payload hash recorded for a container, when present.
///
/// `decode` already verifies the CRC; this covers the slower checks used by
/// bulk verification.
pub fn verify_hashes(raw: &[u8], metadata: &FileMetadata) -> Result<()> {
    let framing = parse_framing(raw)?;

    if let Some(expected) = metadata.digest {
        let actual = Sha512::digest(&raw[..framing.body_end]);
        if actual.as_slice() != expected.as_slice() {
            return Err(CacheError::corruption("content digest mismatch"));
        }
    }

    if let Some(expected) = metadata.aux_hash {
        let payload = decompress(
            &raw[framing.header_len..framing.body_end],
            framing.compression,
            framing.uncompressed_len,
        )?;
        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(CacheError::ChecksumMismatch { expected, actual });
        }
    }

    Ok(())
}

fn pack_entries(entries: &BTreeMap<u32, Vec<u8>>) -> Result<Vec<u8>> {
    let data_len: usize = entries.values().map(Vec::len).sum();
    let mut out =
        Vec::with_capacity(data_len + entries.len() * DIRECTORY_ENTRY_LEN + 4);

    for bytes in entries.values() {
        out.extend_from_slice(bytes);
    }
    for (&entry_id, bytes) in entries {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CacheError::InvalidInput(format!("entry {} too large: {} bytes", entry_id, bytes.len()))
        })?;
        out.extend_from_slice(&entry_id.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
    }
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    Ok(out)
}

fn unpack_entries(payload: &[u8], metadata: &FileMetadata) -> Result<BTreeMap<u32, Vec<u8>>> {
    if payload.len() < 4 {
        return Err(CacheError::corruption("entry directory missing"));
    }
    let tail = payload.len() - 4;
    let count = u32::from_be_bytes([
        payload[tail],
        payload[tail + 1],
        payload[tail + 2],
        payload[tail + 3],
    ]) as usize;

    if count != metadata.entries.len() {
        return Err(CacheError::Corruption(format!(
            "entry directory lists {} entries, catalog records {}",
            count,
            metadata.entries.len()
        )));
    }

    let directory_start = count
        .checked_mul(DIRECTORY_ENTRY_LEN)
        .and_then(|len| tail.checked_sub(len))
        .ok_or_else(|| CacheError::corruption("entry directory larger than payload"))?;
    let directory = &payload[directory_start..tail];

    let mut entries = BTreeMap::new();
    let mut offset = 0usize;
    for (record, &expected_id) in directory
        .chunks_exact(DIRECTORY_ENTRY_LEN)
        .zip(metadata.entries.keys())
    {
        let entry_id = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        let len = u32::from_be_bytes([record[4], record[5], record[6], record[7]]) as usize;

        if entry_id != expected_id {
            return Err(CacheError::Corruption(format!(
                "entry directory names id {}, catalog expects {}",
                entry_id, expected_id
            )));
        }
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= directory_start)
            .ok_or_else(|| {
                CacheError::Corruption(format!("entry {} runs past the entry data", entry_id))
            })?;

        entries.insert(entry_id, payload[offset..end].to_vec());
        offset = end;
    }

    if offset != directory_start {
        return Err(CacheError::Corruption(format!(
            "{} unaccounted bytes before entry directory",
            directory_start - offset
        )));
    }

    Ok(entries)
}
