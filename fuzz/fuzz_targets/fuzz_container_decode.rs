#![no_main]
use assetcache_rs::core::codec;
use assetcache_rs::FileMetadata;
use libfuzzer_sys::fuzz_target;

// Malformed containers must produce errors, never panics
fuzz_target!(|data: &[u8]| {
    let _ = codec::container_version(data);
    let metadata = FileMetadata::default();
    if codec::decode(data, &metadata).is_ok() {
        let _ = codec::verify_hashes(data, &metadata);
    }
});
