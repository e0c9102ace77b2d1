//! Reference tables: the per-category catalog of file metadata
//!
//! A reference table is itself stored as a cache file in the reserved
//! category, under the id of the category it describes. Its layout is
//! self-describing: a flags byte says which optional fields follow.
//!
//! ```text
//! flags:u8 | file_count:u32 |
//!   per file (ascending id):
//!     id_delta:u32 | crc:u32 | [identifier:i32] | [digest:64] |
//!     [compressed:u32 uncompressed:u32] | [aux_hash:u32] |
//!     version:u32 | entry_count:u32 |
//!     per entry (ascending id): entry_delta:u32 | [identifier:i32]
//! ```

use crate::core::error::{CacheError, Result};
use crate::core::metadata::{FileMetadata, FileSizes, DIGEST_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category that stores the reference tables of every other category
pub const REFERENCE_CATEGORY: u8 = 255;

/// Which optional per-file fields a reference table records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableFlags(u8);

impl TableFlags {
    pub const IDENTIFIERS: TableFlags = TableFlags(0x01);
    pub const DIGESTS: TableFlags = TableFlags(0x02);
    pub const SIZES: TableFlags = TableFlags(0x04);
    pub const AUX_HASHES: TableFlags = TableFlags(0x08);

    const KNOWN_BITS: u8 = 0x0F;

    pub const fn empty() -> Self {
        TableFlags(0)
    }

    pub const fn all() -> Self {
        TableFlags(Self::KNOWN_BITS)
    }

    /// Parse a flags byte, rejecting bits this format does not define
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::KNOWN_BITS == 0).then_some(TableFlags(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TableFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TableFlags) -> Self {
        TableFlags(self.0 | other.0)
    }
}

impl Default for TableFlags {
    /// Flags used for tables this crate creates
    fn default() -> Self {
        TableFlags::all()
    }
}

impl std::ops::BitOr for TableFlags {
    type Output = TableFlags;

    fn bitor(self, rhs: TableFlags) -> TableFlags {
        self.union(rhs)
    }
}

/// Hash a file or entry name into an identifier.
///
/// Names are matched case-insensitively (ASCII).
pub fn name_hash(name: &str) -> i32 {
    name.bytes().fold(0i32, |hash, b| {
        hash.wrapping_mul(31)
            .wrapping_add(b.to_ascii_lowercase() as i32)
    })
}

/// Catalog of the files stored in one category
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceTable {
    flags: TableFlags,
    files: BTreeMap<u32, FileMetadata>,
}

impl ReferenceTable {
    /// Create an empty table with the default flags
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: TableFlags) -> Self {
        ReferenceTable {
            flags,
            files: BTreeMap::new(),
        }
    }

    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Change the recorded fields. Every entry is conformed to the new flags;
    /// newly enabled fields are zero-filled.
    pub fn set_flags(&mut self, flags: TableFlags) {
        self.flags = flags;
        for metadata in self.files.values_mut() {
            conform(flags, metadata);
        }
    }

    /// Look up a file's metadata
    pub fn get(&self, file_id: u32) -> Result<&FileMetadata> {
        self.files
            .get(&file_id)
            .ok_or(CacheError::UnknownFile(file_id))
    }

    pub fn contains(&self, file_id: u32) -> bool {
        self.files.contains_key(&file_id)
    }

    /// Insert or replace a file's metadata, conformed to this table's flags:
    /// fields the table does not record are dropped, recorded fields that are
    /// missing are zero-filled, and the codec is cleared.
    pub fn insert(&mut self, file_id: u32, mut metadata: FileMetadata) {
        conform(self.flags, &mut metadata);
        self.files.insert(file_id, metadata);
    }

    pub fn remove(&mut self, file_id: u32) -> Option<FileMetadata> {
        self.files.remove(&file_id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File ids in ascending order
    pub fn file_ids(&self) -> Vec<u32> {
        self.files.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &FileMetadata)> {
        self.files.iter().map(|(id, meta)| (*id, meta))
    }

    /// Find a file by the name its identifier was hashed from
    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        let hash = name_hash(name);
        self.files
            .iter()
            .find(|(_, meta)| meta.identifier == Some(hash))
            .map(|(id, _)| *id)
    }

    /// Pretty JSON rendering, for listings and debugging
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a serialized table
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let raw_flags = reader.u8()?;
        let flags = TableFlags::from_bits(raw_flags).ok_or_else(|| {
            CacheError::Corruption(format!("unknown reference table flags {:#04x}", raw_flags))
        })?;

        let file_count = reader.u32()?;
        let mut files = BTreeMap::new();
        let mut file_id: u32 = 0;

        for index in 0..file_count {
            file_id = next_id(file_id, reader.u32()?, index == 0)?;

            let mut metadata = FileMetadata {
                crc: Some(reader.u32()?),
                ..Default::default()
            };
            if flags.contains(TableFlags::IDENTIFIERS) {
                metadata.identifier = Some(reader.i32()?);
            }
            if flags.contains(TableFlags::DIGESTS) {
                metadata.digest = Some(reader.array::<DIGEST_LEN>()?);
            }
            if flags.contains(TableFlags::SIZES) {
                metadata.sizes = Some(FileSizes {
                    compressed: reader.u32()?,
                    uncompressed: reader.u32()?,
                });
            }
            if flags.contains(TableFlags::AUX_HASHES) {
                metadata.aux_hash = Some(reader.u32()?);
            }
            metadata.version = reader.u32()?;

            let entry_count = reader.u32()?;
            let mut entry_id: u32 = 0;
            for entry_index in 0..entry_count {
                entry_id = next_id(entry_id, reader.u32()?, entry_index == 0)?;
                let identifier = if flags.contains(TableFlags::IDENTIFIERS) {
                    Some(reader.i32()?)
                } else {
                    None
                };
                metadata.entries.insert(entry_id, identifier);
            }

            files.insert(file_id, metadata);
        }

        if reader.remaining() != 0 {
            return Err(CacheError::Corruption(format!(
                "{} trailing bytes after reference table",
                reader.remaining()
            )));
        }

        Ok(ReferenceTable { flags, files })
    }

    /// Serialize the table
    pub fn encode(&self) -> Result<Vec<u8>> {
        let file_count = u32::try_from(self.files.len()).map_err(|_| {
            CacheError::InvalidInput("too many files for one reference table".into())
        })?;

        let mut out = Vec::new();
        out.push(self.flags.bits());
        out.extend_from_slice(&file_count.to_be_bytes());

        let mut previous = 0u32;
        for (&file_id, metadata) in &self.files {
            out.extend_from_slice(&(file_id - previous).to_be_bytes());
            previous = file_id;

            out.extend_from_slice(&metadata.crc.unwrap_or(0).to_be_bytes());
            if self.flags.contains(TableFlags::IDENTIFIERS) {
                out.extend_from_slice(&metadata.identifier.unwrap_or(0).to_be_bytes());
            }
            if self.flags.contains(TableFlags::DIGESTS) {
                out.extend_from_slice(&metadata.digest.unwrap_or([0u8; DIGEST_LEN]));
            }
            if self.flags.contains(TableFlags::SIZES) {
                let sizes = metadata.sizes.unwrap_or_default();
                out.extend_from_slice(&sizes.compressed.to_be_bytes());
                out.extend_from_slice(&sizes.uncompressed.to_be_bytes());
            }
            if self.flags.contains(TableFlags::AUX_HASHES) {
                out.extend_from_slice(&metadata.aux_hash.unwrap_or(0).to_be_bytes());
            }
            out.extend_from_slice(&metadata.version.to_be_bytes());

            let entry_count = u32::try_from(metadata.entries.len()).map_err(|_| {
                CacheError::InvalidInput(format!("too many entries in file {}", file_id))
            })?;
            out.extend_from_slice(&entry_count.to_be_bytes());

            let mut previous_entry = 0u32;
            for (&entry_id, identifier) in &metadata.entries {
                out.extend_from_slice(&(entry_id - previous_entry).to_be_bytes());
                previous_entry = entry_id;
                if self.flags.contains(TableFlags::IDENTIFIERS) {
                    out.extend_from_slice(&identifier.unwrap_or(0).to_be_bytes());
                }
            }
        }

        Ok(out)
    }
}

fn conform(flags: TableFlags, metadata: &mut FileMetadata) {
    metadata.compression = None;
    metadata.crc = Some(metadata.crc.unwrap_or(0));

    let identifiers = flags.contains(TableFlags::IDENTIFIERS);
    metadata.identifier = identifiers.then_some(metadata.identifier.unwrap_or(0));
    for identifier in metadata.entries.values_mut() {
        let current = identifier.unwrap_or(0);
        *identifier = identifiers.then_some(current);
    }

    let digest = metadata.digest.unwrap_or([0u8; DIGEST_LEN]);
    metadata.digest = flags.contains(TableFlags::DIGESTS).then_some(digest);
    let sizes = metadata.sizes.unwrap_or_default();
    metadata.sizes = flags.contains(TableFlags::SIZES).then_some(sizes);
    let aux_hash = metadata.aux_hash.unwrap_or(0);
    metadata.aux_hash = flags.contains(TableFlags::AUX_HASHES).then_some(aux_hash);
}

/// Apply a delta; ids after the first must strictly increase
fn next_id(previous: u32, delta: u32, first: bool) -> Result<u32> {
    if !first && delta == 0 {
        return Err(CacheError::corruption("duplicate id in reference table"));
    }
    previous
        .checked_add(delta)
        .ok_or_else(|| CacheError::corruption("id delta overflows in reference table"))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(CacheError::Corruption(format!(
                "reference table truncated at offset {} (needed {} more bytes)",
                self.pos, N
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }
}
