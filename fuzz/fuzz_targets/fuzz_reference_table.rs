#![no_main]
use assetcache_rs::ReferenceTable;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(table) = ReferenceTable::decode(data) {
        let encoded = table.encode().expect("decoded table encodes");
        let again = ReferenceTable::decode(&encoded).expect("re-encoded table decodes");
        assert_eq!(again, table);
    }
});
