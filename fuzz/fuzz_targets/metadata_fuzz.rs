//! Fuzz target: metadata document decoding.
//!
//! Arbitrary JSON must either fail to decode or decode into metadata whose
//! re-encoding decodes to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rollup_tables::ParentTableMetadata;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(metadata) = ParentTableMetadata::from_json(json) else {
        return;
    };
    let encoded = metadata.to_json().expect("decoded metadata must encode");
    let again = ParentTableMetadata::from_json(&encoded).expect("re-encoded metadata must decode");
    assert_eq!(again, metadata);
    let _ = metadata.child_names();
    let _ = metadata.is_child_table();
});
