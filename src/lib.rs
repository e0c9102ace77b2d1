//! # assetcache-rs - Game Asset Cache Storage Engine
//!
//! `assetcache-rs` reads and writes a flat, sector-chained asset cache: tens of
//! thousands of files addressed by `(category, file id)` packed into one data
//! container plus one location index per category.
//!
//! - **Sector chains** of fixed 520-byte blocks, each self-verifying against
//!   the file it belongs to
//! - **Reference tables**: a per-category catalog (version, CRC, sizes,
//!   digests, sub-entry layout) stored through the same chains it describes
//! - **Multi-codec containers**: none, bzip2, gzip, LZMA and zlib
//! - **Entry packing** of many small sub-files into one logical file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use assetcache_rs::{AssetCache, Compression, LogicalFile, Result};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<()> {
//! let cache = AssetCache::create("/srv/assets/cache")?;
//!
//! // Write a file made of two entries
//! let entries = BTreeMap::from([(65, b"first".to_vec()), (71, b"second".to_vec())]);
//! cache.put_file(17, 5, &LogicalFile::entries(entries), Compression::Gzip)?;
//!
//! // Read it back
//! let file = cache.get_file(17, 5)?;
//! assert_eq!(file.content.entry(71), Some(&b"second"[..]));
//!
//! // Catalog only, no payload fetch
//! let table = cache.reference_table(17)?;
//! assert_eq!(table.get(5)?.entries.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! ```text
//! main_file_cache.dat2      sectors, 520 bytes each (sector 0 reserved)
//! main_file_cache.idx{N}    6-byte records: [length:u24][first_sector:u24]
//! main_file_cache.idx255    location index of the reference tables
//! ```

pub mod core;

pub use crate::core::{
    compression::Compression,
    config::CacheConfig,
    error::{CacheError, Result},
    metadata::{FileContent, FileMetadata, FileSizes, LogicalFile},
    reference_table::{name_hash, ReferenceTable, TableFlags, REFERENCE_CATEGORY},
    sector::{HeaderLayout, Sector, SectorLink, SECTOR_SIZE},
    store::FileStore,
    table_cache::{LruTableCache, TableCache},
};

use crate::core::codec;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Codec used for reference tables themselves
pub const CATALOG_COMPRESSION: Compression = Compression::None;

/// Outcome of verifying every file of a category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Files that decoded and matched every recorded hash
    pub valid: Vec<u32>,
    /// Catalogued files with no location record
    pub missing: Vec<u32>,
    /// Files that failed, with the reason
    pub corrupt: Vec<(u32, String)>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.corrupt.is_empty()
    }
}

/// Asset cache: sector store, reference tables and codec behind one API
///
/// `AssetCache` is `Send + Sync`; share it across worker threads with an
/// `Arc`. Reads never block each other. A write holds its category
/// exclusively from the data write to the catalog update, so a reader of
/// that category sees either the old file and catalog or the new ones.
/// Sector allocation is serialized across the whole cache.
///
/// # Examples
///
/// ```rust,no_run
/// use assetcache_rs::{AssetCache, Result};
///
/// # fn main() -> Result<()> {
/// let cache = AssetCache::open_read_only("/srv/assets/cache")?;
/// for category in cache.categories()? {
///     println!("category {}: {} files", category, cache.file_ids(category)?.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct AssetCache {
    store: FileStore,
    tables: Box<dyn TableCache>,
    /// Shared by readers, exclusive for catalog read-modify-write
    category_locks: Vec<RwLock<()>>,
    default_compression: Compression,
}

impl AssetCache {
    fn from_parts(
        store: FileStore,
        tables: Box<dyn TableCache>,
        default_compression: Compression,
    ) -> Self {
        AssetCache {
            store,
            tables,
            category_locks: (0..=u8::MAX).map(|_| RwLock::new(())).collect(),
            default_compression,
        }
    }

    /// Open an existing cache for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(&CacheConfig::at(path))
    }

    /// Open an existing cache; every write fails with `Permission`
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(&CacheConfig {
            read_only: true,
            ..CacheConfig::at(path)
        })
    }

    /// Create a cache directory, or open it if it already holds a cache
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(&CacheConfig {
            create_if_missing: true,
            ..CacheConfig::at(path)
        })
    }

    /// Create a cache that lives entirely in memory
    pub fn in_memory() -> Self {
        Self::from_parts(
            FileStore::in_memory(),
            Box::new(LruTableCache::default()),
            CacheConfig::default().default_compression,
        )
    }

    /// Open a cache as described by `config`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        AssetCacheBuilder::from_config(config.clone()).build()
    }

    pub fn builder() -> AssetCacheBuilder {
        AssetCacheBuilder::new()
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    /// The underlying sector store
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(CacheError::Permission(
                "cache was opened read-only".into(),
            ));
        }
        Ok(())
    }

    fn check_not_reference(category: u8) -> Result<()> {
        if category == REFERENCE_CATEGORY {
            return Err(CacheError::InvalidInput(format!(
                "category {} holds reference tables and is written through the category it describes",
                REFERENCE_CATEGORY
            )));
        }
        Ok(())
    }

    /// Read and decode a file
    ///
    /// Files of the reserved category are returned as raw catalog blobs.
    pub fn get_file(&self, category: u8, file_id: u32) -> Result<LogicalFile> {
        debug!("Reading file {}/{}", category, file_id);

        if category == REFERENCE_CATEGORY {
            // Catalogs are rewritten under the lock of the category they describe
            let _guard = u8::try_from(file_id)
                .ok()
                .map(|described| self.category_locks[described as usize].read());
            let raw = self.store.read(category, file_id)?;
            return codec::decode(&raw, &FileMetadata::default());
        }

        let _guard = self.category_locks[category as usize].read();
        let raw = self.store.read(category, file_id)?;

        let table = self.load_table_locked(category).map_err(|e| match e {
            CacheError::CategoryNotFound(_) => CacheError::Corruption(format!(
                "file {}/{} is stored but its category has no reference table",
                category, file_id
            )),
            other => other,
        })?;
        let metadata = table.get(file_id).map_err(|_| {
            CacheError::Corruption(format!(
                "file {}/{} is stored but missing from its reference table",
                category, file_id
            ))
        })?;

        codec::decode(&raw, metadata)
    }

    /// Read a file by the name its identifier was hashed from
    pub fn get_file_by_name(&self, category: u8, name: &str) -> Result<Option<LogicalFile>> {
        match self.reference_table(category)?.find_by_name(name) {
            Some(file_id) => self.get_file(category, file_id).map(Some),
            None => Ok(None),
        }
    }

    /// Encode and store a file, then record it in the category's reference table
    ///
    /// Returns the metadata produced for the file.
    pub fn put_file(
        &self,
        category: u8,
        file_id: u32,
        file: &LogicalFile,
        compression: Compression,
    ) -> Result<FileMetadata> {
        self.check_writable()?;
        Self::check_not_reference(category)?;

        let (raw, metadata) = codec::encode(file, compression)?;
        debug!(
            "Writing file {}/{}: {} bytes ({:?})",
            category,
            file_id,
            raw.len(),
            compression
        );

        let _guard = self.category_locks[category as usize].write();

        // Catalog first: a category whose table cannot be read is left untouched
        let mut table = match self.load_table_locked(category) {
            Ok(table) => (*table).clone(),
            Err(CacheError::CategoryNotFound(_)) => {
                info!("Creating reference table for category {}", category);
                ReferenceTable::new()
            }
            Err(e) => return Err(e),
        };

        self.store.write(category, file_id, &raw)?;
        table.insert(file_id, metadata.clone());
        self.write_table(category, &table)?;

        Ok(metadata)
    }

    /// Store an opaque blob with the configured default codec
    pub fn put_blob(&self, category: u8, file_id: u32, bytes: &[u8]) -> Result<FileMetadata> {
        self.put_file(
            category,
            file_id,
            &LogicalFile::blob(bytes),
            self.default_compression,
        )
    }

    /// Remove a file from its location index and reference table
    pub fn remove_file(&self, category: u8, file_id: u32) -> Result<()> {
        self.check_writable()?;
        Self::check_not_reference(category)?;

        let _guard = self.category_locks[category as usize].write();
        let mut table = (*self.load_table_locked(category)?).clone();
        self.store.remove(category, file_id)?;

        if table.remove(file_id).is_none() {
            warn!(
                "Removed {}/{} had no reference table entry",
                category, file_id
            );
        }
        self.write_table(category, &table)
    }

    /// Reference table of `category` (catalog only, no payload fetch)
    pub fn reference_table(&self, category: u8) -> Result<Arc<ReferenceTable>> {
        Self::check_not_reference(category)?;
        if let Some(table) = self.tables.get(category) {
            return Ok(table);
        }

        let _guard = self.category_locks[category as usize].read();
        self.load_table_locked(category)
    }

    /// Cached table, or decode it from the store. Caller holds the category
    /// lock (shared or exclusive), so no write can land between the decode
    /// and the cache insert.
    fn load_table_locked(&self, category: u8) -> Result<Arc<ReferenceTable>> {
        if let Some(table) = self.tables.get(category) {
            return Ok(table);
        }

        let raw = self
            .store
            .read(REFERENCE_CATEGORY, category as u32)
            .map_err(|e| match e {
                CacheError::NotFound { .. } => CacheError::CategoryNotFound(category),
                other => other,
            })?;
        let file = codec::decode(&raw, &FileMetadata::default())?;
        let table = match file.content {
            FileContent::Blob(bytes) => ReferenceTable::decode(&bytes)?,
            FileContent::Entries(_) => {
                return Err(CacheError::corruption("reference table stored as entries"))
            }
        };

        debug!(
            "Loaded reference table for category {} ({} files)",
            category,
            table.len()
        );
        let table = Arc::new(table);
        self.tables.insert(category, Arc::clone(&table));
        Ok(table)
    }

    /// Persist a table and drop the cached copy. Caller holds the category
    /// lock exclusively.
    fn write_table(&self, category: u8, table: &ReferenceTable) -> Result<()> {
        let (raw, _) = codec::encode(&LogicalFile::blob(table.encode()?), CATALOG_COMPRESSION)?;
        self.store
            .write(REFERENCE_CATEGORY, category as u32, &raw)?;
        self.tables.invalidate(category);
        Ok(())
    }

    /// Drop the cached reference table of `category`
    pub fn invalidate(&self, category: u8) {
        self.tables.invalidate(category);
    }

    /// Categories that have a reference table, ascending
    pub fn categories(&self) -> Result<Vec<u8>> {
        match self.store.file_ids(REFERENCE_CATEGORY) {
            Ok(ids) => Ok(ids
                .into_iter()
                .filter_map(|id| u8::try_from(id).ok())
                .filter(|&category| category != REFERENCE_CATEGORY)
                .collect()),
            Err(CacheError::CategoryNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// File ids of a category, ascending
    ///
    /// Regular categories list their reference table; the reserved category
    /// lists its location index.
    pub fn file_ids(&self, category: u8) -> Result<Vec<u32>> {
        if category == REFERENCE_CATEGORY {
            return self.store.file_ids(REFERENCE_CATEGORY);
        }
        Ok(self.reference_table(category)?.file_ids())
    }

    /// Decode every catalogued file of a category, checking all recorded hashes
    ///
    /// Per-file failures are logged and collected; only medium failures abort.
    pub fn verify_category(&self, category: u8) -> Result<VerifyReport> {
        Self::check_not_reference(category)?;
        let _guard = self.category_locks[category as usize].read();
        let table = self.load_table_locked(category)?;
        let mut report = VerifyReport::default();

        for (file_id, metadata) in table.iter() {
            let outcome = self.store.read(category, file_id).and_then(|raw| {
                codec::decode(&raw, metadata)?;
                codec::verify_hashes(&raw, metadata)
            });

            match outcome {
                Ok(()) => report.valid.push(file_id),
                Err(e) if e.is_not_found() => report.missing.push(file_id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping corrupt file {}/{}: {}", category, file_id, e);
                    report.corrupt.push((file_id, e.to_string()));
                }
            }
        }

        info!(
            "Verified category {}: {} valid, {} missing, {} corrupt",
            category,
            report.valid.len(),
            report.missing.len(),
            report.corrupt.len()
        );
        Ok(report)
    }

    /// Sync the data container and every opened index
    pub fn flush(&self) -> Result<()> {
        debug!("Flushing cache to disk");
        self.store.flush()
    }
}

/// Builder for customizing how a cache is opened
///
/// # Examples
///
/// ```rust,no_run
/// use assetcache_rs::{AssetCacheBuilder, Compression};
///
/// # fn main() -> assetcache_rs::Result<()> {
/// let cache = AssetCacheBuilder::new()
///     .path("/srv/assets/cache")
///     .create_if_missing()
///     .catalog_cache_capacity(32)
///     .default_compression(Compression::Bzip2)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct AssetCacheBuilder {
    config: CacheConfig,
    table_cache: Option<Box<dyn TableCache>>,
}

impl AssetCacheBuilder {
    /// Create a new builder with default settings (in-memory cache)
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    pub fn from_config(config: CacheConfig) -> Self {
        AssetCacheBuilder {
            config,
            table_cache: None,
        }
    }

    /// Directory of the cache (omit for an in-memory cache)
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.config.read_only = true;
        self
    }

    pub fn create_if_missing(mut self) -> Self {
        self.config.create_if_missing = true;
        self
    }

    pub fn catalog_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.catalog_cache_capacity = capacity;
        self
    }

    pub fn default_compression(mut self, compression: Compression) -> Self {
        self.config.default_compression = compression;
        self
    }

    /// Use a custom reference table cache
    pub fn table_cache(mut self, cache: Box<dyn TableCache>) -> Self {
        self.table_cache = Some(cache);
        self
    }

    /// Build the AssetCache instance
    pub fn build(self) -> Result<AssetCache> {
        self.config.validate()?;
        let config = self.config;

        let store = match &config.path {
            None => FileStore::in_memory(),
            Some(path) if config.read_only => FileStore::open(path, true)?,
            Some(path) if config.create_if_missing => FileStore::create(path)?,
            Some(path) => FileStore::open(path, false)?,
        };

        let tables = self
            .table_cache
            .unwrap_or_else(|| Box::new(LruTableCache::new(config.catalog_cache_capacity)));

        info!(
            "Opened asset cache at {:?} (read_only: {})",
            config.path, config.read_only
        );
        Ok(AssetCache::from_parts(
            store,
            tables,
            config.default_compression,
        ))
    }
}

impl Default for AssetCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
