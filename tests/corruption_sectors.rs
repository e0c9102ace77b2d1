//! Sector chain corruption detection tests
//!
//! Damage the data container or a location index on disk and check that
//! reads report it instead of returning wrong bytes.

use assetcache_rs::core::store::{DATA_FILE_NAME, INDEX_FILE_PREFIX, INDEX_RECORD_SIZE};
use assetcache_rs::{
    AssetCache, CacheError, Compression, LogicalFile, REFERENCE_CATEGORY, SECTOR_SIZE,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::tempdir;

/// Helper: Overwrite bytes of the data container
fn patch_data(dir: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(dir.join(DATA_FILE_NAME))
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

/// Helper: Write a file, close the cache and return the first sector of its chain
fn store_blob(dir: &Path, category: u8, file_id: u32, payload: &[u8]) -> u32 {
    let cache = AssetCache::create(dir).unwrap();
    cache
        .put_file(category, file_id, &LogicalFile::blob(payload.to_vec()), Compression::None)
        .unwrap();
    let record = cache.store().record(category, file_id).unwrap().unwrap();
    cache.flush().unwrap();
    record.first_sector
}

#[test]
fn test_wrong_file_id_in_sector_header() {
    let dir = tempdir().unwrap();
    let first = store_blob(dir.path(), 3, 7, &vec![0x11; 1500]);

    // Header starts with the 16-bit file id
    patch_data(dir.path(), first as u64 * SECTOR_SIZE as u64, &[0x00, 0x08]);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(cache.get_file(3, 7), Err(CacheError::Corruption(_))));
}

#[test]
fn test_wrong_category_in_sector_header() {
    let dir = tempdir().unwrap();
    let first = store_blob(dir.path(), 3, 7, b"short payload");

    // Category byte is the last byte of the regular header
    patch_data(dir.path(), first as u64 * SECTOR_SIZE as u64 + 7, &[4]);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(cache.get_file(3, 7), Err(CacheError::Corruption(_))));
}

#[test]
fn test_flipped_payload_byte_fails_checksum() {
    let dir = tempdir().unwrap();
    let first = store_blob(dir.path(), 2, 0, &vec![0x42; 300]);

    // Past the 8-byte sector header and 5-byte container header
    patch_data(dir.path(), first as u64 * SECTOR_SIZE as u64 + 8 + 5 + 40, &[0x43]);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(
        cache.get_file(2, 0),
        Err(CacheError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_truncated_container() {
    let dir = tempdir().unwrap();
    store_blob(dir.path(), 1, 4, &vec![0xAB; 5000]);

    let path = dir.path().join(DATA_FILE_NAME);
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 2 * SECTOR_SIZE as u64).unwrap();
    drop(file);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(cache.get_file(1, 4), Err(CacheError::Corruption(_))));
}

#[test]
fn test_index_pointing_at_reserved_sector() {
    let dir = tempdir().unwrap();
    store_blob(dir.path(), 5, 1, b"payload");

    let mut index = OpenOptions::new()
        .write(true)
        .open(dir.path().join(format!("{}5", INDEX_FILE_PREFIX)))
        .unwrap();
    index
        .seek(SeekFrom::Start(INDEX_RECORD_SIZE as u64))
        .unwrap();
    // length 7, first sector 0
    index.write_all(&[0, 0, 7, 0, 0, 0]).unwrap();
    drop(index);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(cache.get_file(5, 1), Err(CacheError::Corruption(_))));
}

#[test]
fn test_verify_category_skips_corrupt_files() {
    let dir = tempdir().unwrap();
    let damaged_first;
    {
        let cache = AssetCache::create(dir.path()).unwrap();
        for file_id in 0..5 {
            cache
                .put_file(8, file_id, &LogicalFile::blob(vec![file_id as u8; 800]), Compression::None)
                .unwrap();
        }
        damaged_first = cache.store().record(8, 2).unwrap().unwrap().first_sector;
        cache.flush().unwrap();
    }
    patch_data(dir.path(), damaged_first as u64 * SECTOR_SIZE as u64 + 8 + 5 + 10, &[0xFF]);

    let cache = AssetCache::open(dir.path()).unwrap();
    let report = cache.verify_category(8).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.valid, vec![0, 1, 3, 4]);
    assert_eq!(report.corrupt.len(), 1);
    assert_eq!(report.corrupt[0].0, 2);
}

#[test]
fn test_verify_category_reports_missing_files() {
    let dir = tempdir().unwrap();
    {
        let cache = AssetCache::create(dir.path()).unwrap();
        cache.put_blob(4, 0, b"kept").unwrap();
        cache.put_blob(4, 1, b"unlinked").unwrap();
        // Drop the location record but leave the catalog entry behind
        cache.store().remove(4, 1).unwrap();
    }

    let cache = AssetCache::open(dir.path()).unwrap();
    let report = cache.verify_category(4).unwrap();
    assert_eq!(report.valid, vec![0]);
    assert_eq!(report.missing, vec![1]);
    assert!(report.corrupt.is_empty());
}

#[test]
fn test_unreadable_catalog_leaves_file_untouched() {
    let dir = tempdir().unwrap();
    let before;
    let catalog_first;
    {
        let cache = AssetCache::create(dir.path()).unwrap();
        cache.put_blob(3, 1, b"first version").unwrap();
        before = cache.store().record(3, 1).unwrap().unwrap();
        catalog_first = cache
            .store()
            .record(REFERENCE_CATEGORY, 3)
            .unwrap()
            .unwrap()
            .first_sector;
        cache.flush().unwrap();
    }
    // Catalog sector now claims another category
    patch_data(dir.path(), catalog_first as u64 * SECTOR_SIZE as u64 + 7, &[4]);

    let cache = AssetCache::open(dir.path()).unwrap();
    assert!(matches!(
        cache.put_blob(3, 1, &vec![0x77; 3000]),
        Err(CacheError::Corruption(_))
    ));
    assert!(matches!(
        cache.remove_file(3, 1),
        Err(CacheError::Corruption(_))
    ));

    // Neither failed call reached the location index or the chain
    assert_eq!(cache.store().record(3, 1).unwrap(), Some(before));
    assert_eq!(cache.store().read(3, 1).unwrap().len(), before.length as usize);
}
