//! File metadata and logical file structures

use crate::core::compression::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of the content digest (SHA-512)
pub const DIGEST_LEN: usize = 64;

/// Stored and decompressed sizes of a cache file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSizes {
    /// Container length, version trailer excluded
    pub compressed: u32,
    /// Length of the decompressed payload (entry directory included)
    pub uncompressed: u32,
}

/// Per-file metadata kept in a reference table
///
/// Optional fields are present exactly when the owning table's flags say so;
/// see [`ReferenceTable::insert`](crate::core::reference_table::ReferenceTable::insert).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Codec of the stored container. Not recorded in reference tables;
    /// filled in when a container is encoded or decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    /// CRC-32 of the container, version trailer excluded
    pub crc: Option<u32>,

    pub version: u32,

    /// Name hash, see [`name_hash`](crate::core::reference_table::name_hash)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<i32>,

    /// SHA-512 of the container, version trailer excluded
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "digest_hex"
    )]
    pub digest: Option<[u8; DIGEST_LEN]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<FileSizes>,

    /// CRC-32 of the decompressed payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_hash: Option<u32>,

    /// Entry id -> entry identifier. More than one entry means the payload
    /// is entry-packed.
    #[serde(default)]
    pub entries: BTreeMap<u32, Option<i32>>,
}

impl FileMetadata {
    pub fn new(version: u32) -> Self {
        FileMetadata {
            version,
            ..Default::default()
        }
    }

    pub fn with_identifier(mut self, identifier: i32) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Whether the stored payload carries an entry directory
    pub fn is_entry_packed(&self) -> bool {
        self.entries.len() > 1
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn uncompressed_size(&self) -> Option<u32> {
        self.sizes.map(|s| s.uncompressed)
    }
}

/// Content of a logical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// One opaque payload
    Blob(Vec<u8>),
    /// Sub-entries by id
    Entries(BTreeMap<u32, Vec<u8>>),
}

impl FileContent {
    /// Bytes of a blob, or of the single entry of a one-entry file
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FileContent::Blob(bytes) => Some(bytes),
            FileContent::Entries(entries) if entries.len() == 1 => {
                entries.values().next().map(Vec::as_slice)
            }
            FileContent::Entries(_) => None,
        }
    }

    pub fn entry(&self, entry_id: u32) -> Option<&[u8]> {
        match self {
            FileContent::Entries(entries) => entries.get(&entry_id).map(Vec::as_slice),
            FileContent::Blob(_) => None,
        }
    }
}

/// The caller-visible storage unit: content paired with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    pub metadata: FileMetadata,
    pub content: FileContent,
}

impl LogicalFile {
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        LogicalFile {
            metadata: FileMetadata::default(),
            content: FileContent::Blob(bytes.into()),
        }
    }

    pub fn entries(entries: BTreeMap<u32, Vec<u8>>) -> Self {
        LogicalFile {
            metadata: FileMetadata::default(),
            content: FileContent::Entries(entries),
        }
    }

    pub fn with_metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

mod digest_hex {
    use super::DIGEST_LEN;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        digest: &Option<[u8; DIGEST_LEN]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match digest {
            Some(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                serializer.serialize_some(&hex)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; DIGEST_LEN]>, D::Error> {
        let hex: Option<String> = Option::deserialize(deserializer)?;
        let Some(hex) = hex else {
            return Ok(None);
        };
        if hex.len() != DIGEST_LEN * 2 {
            return Err(serde::de::Error::custom("digest must be 128 hex characters"));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(Some(bytes))
    }
}
