//! Sector chain storage
//!
//! The store owns one shared data container of back-to-back sectors and one
//! location index per category. An index record is 6 bytes:
//!
//! ```text
//! [length:u24][first_sector:u24]   at byte offset 6 * file_id
//! ```
//!
//! An all-zero record (or an offset past the end of the index) means the file
//! is absent. Sector 0 is reserved, so a stored file never starts there.
//!
//! **Allocation**: a rewrite reuses the positions of the file's previous chain
//! for as many sectors as it can and appends the remainder at the end of the
//! container. A chain that shrinks leaves its old tail unreclaimed.

use crate::core::error::{CacheError, Result};
use crate::core::io::{FileMedium, Medium, MemoryMedium};
use crate::core::sector::{
    split_payload, HeaderLayout, Sector, SectorLink, END_OF_CHAIN, MAX_SECTOR, SECTOR_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the shared data container
pub const DATA_FILE_NAME: &str = "main_file_cache.dat2";

/// Prefix of the per-category location index files (`main_file_cache.idx{N}`)
pub const INDEX_FILE_PREFIX: &str = "main_file_cache.idx";

/// Size of one location index record
pub const INDEX_RECORD_SIZE: usize = 6;

/// Largest logical file the 24-bit length field can describe
pub const MAX_FILE_SIZE: usize = 0x00FF_FFFF;

/// One location index record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Length of the stored bytes
    pub length: u32,
    /// Position of chunk 0
    pub first_sector: u32,
}

impl IndexRecord {
    pub fn from_bytes(bytes: &[u8; INDEX_RECORD_SIZE]) -> Self {
        IndexRecord {
            length: u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]),
            first_sector: u32::from_be_bytes([0, bytes[3], bytes[4], bytes[5]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; INDEX_RECORD_SIZE] {
        let mut bytes = [0u8; INDEX_RECORD_SIZE];
        bytes[0..3].copy_from_slice(&self.length.to_be_bytes()[1..]);
        bytes[3..6].copy_from_slice(&self.first_sector.to_be_bytes()[1..]);
        bytes
    }

    /// Only an all-zero record means absent. Any other record pointing at
    /// the reserved sector is damaged.
    pub fn is_absent(&self) -> bool {
        self.length == 0 && self.first_sector == END_OF_CHAIN
    }
}

enum Backing {
    Disk(PathBuf),
    Memory,
}

/// Sector chain store over one data container and per-category indexes
pub struct FileStore {
    backing: Backing,
    read_only: bool,
    data: Arc<dyn Medium>,
    indexes: RwLock<HashMap<u8, Arc<dyn Medium>>>,
    /// Serializes allocation and index updates
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open an existing store directory
    pub fn open<P: AsRef<Path>>(dir: P, read_only: bool) -> Result<Self> {
        let dir = dir.as_ref();
        info!(
            "Opening file store at {:?}{}",
            dir,
            if read_only { " (read-only)" } else { "" }
        );
        let data = FileMedium::open(dir.join(DATA_FILE_NAME), !read_only)?;

        Ok(FileStore {
            backing: Backing::Disk(dir.to_path_buf()),
            read_only,
            data: Arc::new(data),
            indexes: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Create a store directory (or open it read/write if it already exists)
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Creating file store at {:?}", dir);
        std::fs::create_dir_all(dir)?;

        let data = FileMedium::open_or_create(dir.join(DATA_FILE_NAME))?;
        if data.is_empty()? {
            data.write_at(0, &[0u8; SECTOR_SIZE])?;
        }

        Ok(FileStore {
            backing: Backing::Disk(dir.to_path_buf()),
            read_only: false,
            data: Arc::new(data),
            indexes: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Create a store that lives entirely in memory
    pub fn in_memory() -> Self {
        FileStore {
            backing: Backing::Memory,
            read_only: false,
            data: Arc::new(MemoryMedium::from_bytes(vec![0u8; SECTOR_SIZE])),
            indexes: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn index_path(dir: &Path, category: u8) -> PathBuf {
        dir.join(format!("{}{}", INDEX_FILE_PREFIX, category))
    }

    /// Location index for `category`, opened lazily
    fn index(&self, category: u8, create: bool) -> Result<Option<Arc<dyn Medium>>> {
        if let Some(index) = self.indexes.read().get(&category) {
            return Ok(Some(Arc::clone(index)));
        }

        let opened: Arc<dyn Medium> = match &self.backing {
            Backing::Disk(dir) => {
                let path = Self::index_path(dir, category);
                if path.exists() {
                    Arc::new(FileMedium::open(&path, !self.read_only)?)
                } else if create && !self.read_only {
                    debug!("Creating location index {:?}", path);
                    Arc::new(FileMedium::open_or_create(&path)?)
                } else {
                    return Ok(None);
                }
            }
            Backing::Memory if create && !self.read_only => Arc::new(MemoryMedium::new()),
            Backing::Memory => return Ok(None),
        };

        let mut indexes = self.indexes.write();
        Ok(Some(Arc::clone(indexes.entry(category).or_insert(opened))))
    }

    fn record_in(index: &dyn Medium, file_id: u32) -> Result<Option<IndexRecord>> {
        let offset = file_id as u64 * INDEX_RECORD_SIZE as u64;
        if offset + INDEX_RECORD_SIZE as u64 > index.len()? {
            return Ok(None);
        }

        let mut bytes = [0u8; INDEX_RECORD_SIZE];
        index.read_at(offset, &mut bytes)?;
        let record = IndexRecord::from_bytes(&bytes);
        Ok((!record.is_absent()).then_some(record))
    }

    /// Location record for a file, if present
    pub fn record(&self, category: u8, file_id: u32) -> Result<Option<IndexRecord>> {
        match self.index(category, false)? {
            Some(index) => Self::record_in(index.as_ref(), file_id),
            None => Ok(None),
        }
    }

    /// Check whether a file is present in its category's index
    pub fn contains(&self, category: u8, file_id: u32) -> Result<bool> {
        Ok(self.record(category, file_id)?.is_some())
    }

    /// Number of whole sectors in the data container
    pub fn sector_count(&self) -> Result<u32> {
        let sectors = self.data.len()? / SECTOR_SIZE as u64;
        Ok(sectors.min(u32::MAX as u64) as u32)
    }

    fn read_block(&self, position: u32) -> Result<[u8; SECTOR_SIZE]> {
        let mut block = [0u8; SECTOR_SIZE];
        self.data
            .read_at(position as u64 * SECTOR_SIZE as u64, &mut block)?;
        Ok(block)
    }

    /// Read the stored bytes of `(category, file_id)`
    pub fn read(&self, category: u8, file_id: u32) -> Result<Vec<u8>> {
        let record = self
            .record(category, file_id)?
            .ok_or(CacheError::NotFound { category, file_id })?;
        if record.first_sector == END_OF_CHAIN {
            return Err(CacheError::Corruption(format!(
                "index record for {}/{} points at the reserved sector",
                category, file_id
            )));
        }

        let length = record.length as usize;
        let data_len = HeaderLayout::for_file_id(file_id).data_len();
        let total_sectors = self.sector_count()?;

        let mut out = Vec::with_capacity(length);
        let mut position = record.first_sector;
        let mut chunk: u32 = 0;

        while out.len() < length {
            if position == END_OF_CHAIN {
                return Err(CacheError::Corruption(format!(
                    "chain for {}/{} ended after {} of {} bytes",
                    category,
                    file_id,
                    out.len(),
                    length
                )));
            }
            if position >= total_sectors {
                return Err(CacheError::Corruption(format!(
                    "chain for {}/{} points at sector {} beyond container end ({})",
                    category, file_id, position, total_sectors
                )));
            }
            if chunk > u16::MAX as u32 {
                return Err(CacheError::Corruption(format!(
                    "chain for {}/{} exceeds the chunk index range",
                    category, file_id
                )));
            }

            let block = self.read_block(position)?;
            let sector = Sector::decode(position, &block, category, file_id, chunk as u16)?;

            let take = (length - out.len()).min(data_len);
            out.extend_from_slice(&sector.data[..take]);

            position = match sector.next {
                Some(SectorLink::Next(next)) => next,
                _ => END_OF_CHAIN,
            };
            chunk += 1;
        }

        debug!(
            "Read {}/{}: {} bytes in {} sectors",
            category, file_id, length, chunk
        );
        Ok(out)
    }

    /// Positions of an existing chain, up to `limit` sectors. Stops quietly at
    /// the first sector that does not check out.
    fn previous_chain(
        &self,
        category: u8,
        file_id: u32,
        record: IndexRecord,
        limit: usize,
    ) -> Vec<u32> {
        let data_len = HeaderLayout::for_file_id(file_id).data_len();
        let stored = (record.length as usize).div_ceil(data_len).max(1);
        let limit = limit.min(stored);
        let total_sectors = match self.sector_count() {
            Ok(n) => n,
            Err(_) => return Vec::new(),
        };

        let mut positions = Vec::with_capacity(limit);
        let mut position = record.first_sector;
        while positions.len() < limit && position != END_OF_CHAIN && position < total_sectors {
            let chunk = positions.len() as u16;
            let sector = match self
                .read_block(position)
                .and_then(|block| Sector::decode(position, &block, category, file_id, chunk))
            {
                Ok(sector) => sector,
                Err(e) => {
                    debug!(
                        "Not reusing chain of {}/{} past chunk {}: {}",
                        category, file_id, chunk, e
                    );
                    break;
                }
            };
            positions.push(position);
            position = match sector.next {
                Some(SectorLink::Next(next)) => next,
                _ => END_OF_CHAIN,
            };
        }
        positions
    }

    fn check_writable(&self, what: &str) -> Result<()> {
        if self.read_only {
            return Err(CacheError::Permission(format!(
                "cannot {} in a read-only store",
                what
            )));
        }
        Ok(())
    }

    /// Store `bytes` as the content of `(category, file_id)`
    pub fn write(&self, category: u8, file_id: u32, bytes: &[u8]) -> Result<()> {
        self.check_writable("write")?;
        if bytes.len() > MAX_FILE_SIZE {
            return Err(CacheError::InvalidInput(format!(
                "file too large: {} bytes (max: {})",
                bytes.len(),
                MAX_FILE_SIZE
            )));
        }

        let mut sectors = split_payload(bytes, category, file_id)?;
        if sectors.is_empty() {
            // An empty file still needs a first sector to be distinguishable from absent
            sectors.push(Sector {
                position: 0,
                category,
                file_id,
                chunk: 0,
                next: None,
                data: Vec::new(),
            });
        }

        let _guard = self.write_lock.lock();

        let index = self
            .index(category, true)?
            .ok_or(CacheError::CategoryNotFound(category))?;
        let reused = match Self::record_in(index.as_ref(), file_id)? {
            Some(previous) => self.previous_chain(category, file_id, previous, sectors.len()),
            None => Vec::new(),
        };

        let data_len = self.data.len()?;
        let mut next_free = data_len.div_ceil(SECTOR_SIZE as u64).max(1);
        let mut positions = Vec::with_capacity(sectors.len());
        for i in 0..sectors.len() {
            match reused.get(i) {
                Some(&position) => positions.push(position),
                None => {
                    if next_free > MAX_SECTOR as u64 {
                        return Err(CacheError::ContainerFull);
                    }
                    positions.push(next_free as u32);
                    next_free += 1;
                }
            }
        }

        for (i, sector) in sectors.iter_mut().enumerate() {
            sector.position = positions[i];
            sector.next = Some(match positions.get(i + 1) {
                Some(&next) => SectorLink::Next(next),
                None => SectorLink::End,
            });
            let block = sector.encode()?;
            self.data
                .write_at(sector.position as u64 * SECTOR_SIZE as u64, &block)?;
        }

        let record = IndexRecord {
            length: bytes.len() as u32,
            first_sector: positions[0],
        };
        index.write_at(
            file_id as u64 * INDEX_RECORD_SIZE as u64,
            &record.to_bytes(),
        )?;

        debug!(
            "Wrote {}/{}: {} bytes in {} sectors ({} reused)",
            category,
            file_id,
            bytes.len(),
            positions.len(),
            reused.len()
        );
        Ok(())
    }

    /// Drop `(category, file_id)` from its index. Its sectors are not reclaimed.
    pub fn remove(&self, category: u8, file_id: u32) -> Result<()> {
        self.check_writable("remove")?;
        let _guard = self.write_lock.lock();

        let index = self
            .index(category, false)?
            .ok_or(CacheError::NotFound { category, file_id })?;
        if Self::record_in(index.as_ref(), file_id)?.is_none() {
            return Err(CacheError::NotFound { category, file_id });
        }

        index.write_at(
            file_id as u64 * INDEX_RECORD_SIZE as u64,
            &[0u8; INDEX_RECORD_SIZE],
        )?;
        debug!("Removed {}/{} from location index", category, file_id);
        Ok(())
    }

    /// Ids with a present record in the category's index, ascending
    pub fn file_ids(&self, category: u8) -> Result<Vec<u32>> {
        let index = self
            .index(category, false)?
            .ok_or(CacheError::CategoryNotFound(category))?;

        let len = index.len()? as usize;
        let mut bytes = vec![0u8; len - len % INDEX_RECORD_SIZE];
        index.read_at(0, &mut bytes)?;

        Ok(bytes
            .chunks_exact(INDEX_RECORD_SIZE)
            .enumerate()
            .filter_map(|(id, raw)| {
                let mut record = [0u8; INDEX_RECORD_SIZE];
                record.copy_from_slice(raw);
                (!IndexRecord::from_bytes(&record).is_absent()).then_some(id as u32)
            })
            .collect())
    }

    /// Categories that have a location index, ascending
    pub fn categories(&self) -> Result<Vec<u8>> {
        let mut categories: Vec<u8> = self.indexes.read().keys().copied().collect();
        if let Backing::Disk(dir) = &self.backing {
            for category in 0..=u8::MAX {
                if !categories.contains(&category) && Self::index_path(dir, category).exists() {
                    categories.push(category);
                }
            }
        }
        categories.sort_unstable();
        Ok(categories)
    }

    /// Sync the data container and every opened index
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.data.sync()?;
        for index in self.indexes.read().values() {
            index.sync()?;
        }
        Ok(())
    }
}
