#![no_main]
use arbitrary::Arbitrary;
use assetcache_rs::{Sector, SECTOR_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    position: u32,
    category: u8,
    file_id: u32,
    chunk: u16,
    block: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut block = [0u8; SECTOR_SIZE];
    let n = input.block.len().min(SECTOR_SIZE);
    block[..n].copy_from_slice(&input.block[..n]);

    // Anything that decodes must encode back to the same block
    if let Ok(sector) = Sector::decode(
        input.position,
        &block,
        input.category,
        input.file_id,
        input.chunk,
    ) {
        if let Ok(encoded) = sector.encode() {
            assert_eq!(encoded, block);
        }
    }
});
