//! Property-based tests for the container codec, reference tables and sector chains
//!
//! Uses proptest to check invariants across many random inputs

use assetcache_rs::core::codec;
use assetcache_rs::core::sector::{split_payload, HeaderLayout};
use assetcache_rs::{
    AssetCache, Compression, FileContent, FileMetadata, LogicalFile, ReferenceTable, TableFlags,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn any_compression() -> impl Strategy<Value = Compression> {
    prop::sample::select(Compression::ALL.to_vec())
}

fn any_entries() -> impl Strategy<Value = BTreeMap<u32, Vec<u8>>> {
    prop::collection::btree_map(any::<u32>(), prop::collection::vec(any::<u8>(), 0..300), 1..8)
}

fn any_metadata() -> impl Strategy<Value = FileMetadata> {
    (
        any::<u32>(),
        any::<u32>(),
        any::<i32>(),
        any::<[u8; 32]>(),
        (any::<u32>(), any::<u32>(), any::<u32>()),
        prop::collection::btree_map(0u32..5000, any::<i32>(), 0..6),
    )
        .prop_map(|(crc, version, identifier, half, (compressed, uncompressed, aux), entries)| {
            let mut digest = [0u8; 64];
            digest[..32].copy_from_slice(&half);
            digest[32..].copy_from_slice(&half);
            FileMetadata {
                compression: None,
                crc: Some(crc),
                version,
                identifier: Some(identifier),
                digest: Some(digest),
                sizes: Some(assetcache_rs::FileSizes {
                    compressed,
                    uncompressed,
                }),
                aux_hash: Some(aux),
                entries: entries.into_iter().map(|(id, ident)| (id, Some(ident))).collect(),
            }
        })
}

proptest! {
    #[test]
    fn prop_blob_codec_round_trip(
        bytes in prop::collection::vec(any::<u8>(), 0..4096),
        compression in any_compression(),
    ) {
        let (raw, metadata) = codec::encode(&LogicalFile::blob(bytes.clone()), compression).unwrap();
        let decoded = codec::decode(&raw, &metadata).unwrap();

        prop_assert_eq!(decoded.content, FileContent::Blob(bytes.clone()));
        prop_assert_eq!(metadata.aux_hash, Some(crc32fast::hash(&bytes)));
        prop_assert!(codec::verify_hashes(&raw, &metadata).is_ok());
    }

    #[test]
    fn prop_entry_codec_round_trip(
        entries in any_entries(),
        compression in any_compression(),
    ) {
        let file = LogicalFile::entries(entries.clone());
        let (raw, metadata) = codec::encode(&file, compression).unwrap();
        prop_assert_eq!(metadata.entry_count(), entries.len());

        let decoded = codec::decode(&raw, &metadata).unwrap();
        prop_assert_eq!(decoded.content, FileContent::Entries(entries));
    }

    #[test]
    fn prop_reference_table_round_trip(
        files in prop::collection::btree_map(any::<u32>(), any_metadata(), 0..20),
        bits in 0u8..16,
    ) {
        let mut table = ReferenceTable::with_flags(TableFlags::from_bits(bits).unwrap());
        for (file_id, metadata) in files {
            table.insert(file_id, metadata);
        }

        let bytes = table.encode().unwrap();
        let decoded = ReferenceTable::decode(&bytes).unwrap();
        prop_assert_eq!(decoded.encode().unwrap(), bytes);
        prop_assert_eq!(decoded, table);
    }

    #[test]
    fn prop_split_payload_chunk_count(
        len in 0usize..20_000,
        file_id in prop_oneof![0u32..=65535, 65536u32..=u32::MAX],
    ) {
        let bytes = vec![0xA5u8; len];
        let sectors = split_payload(&bytes, 3, file_id).unwrap();
        let data_len = HeaderLayout::for_file_id(file_id).data_len();

        prop_assert_eq!(sectors.len(), len.div_ceil(data_len));
        for (i, sector) in sectors.iter().enumerate() {
            prop_assert_eq!(sector.chunk as usize, i);
            prop_assert_eq!(sector.data.len(), data_len);
        }
        let joined: Vec<u8> = sectors.iter().flat_map(|s| s.data.iter().copied()).collect();
        prop_assert_eq!(&joined[..len], &bytes[..]);
    }

    #[test]
    fn prop_store_round_trip_in_memory(
        writes in prop::collection::vec((0u8..4, 0u32..40, prop::collection::vec(any::<u8>(), 0..3000)), 1..20),
    ) {
        let cache = AssetCache::in_memory();
        let mut expected = BTreeMap::new();

        for (category, file_id, bytes) in writes {
            cache.put_file(category, file_id, &LogicalFile::blob(bytes.clone()), Compression::None).unwrap();
            expected.insert((category, file_id), bytes);
        }

        for ((category, file_id), bytes) in &expected {
            let file = cache.get_file(*category, *file_id).unwrap();
            prop_assert_eq!(file.content.as_bytes(), Some(bytes.as_slice()));
        }
    }
}
