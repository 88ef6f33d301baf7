//! Fuzz target: granularity labels and child column names.
//!
//! Parsing must never panic, and anything that parses must round-trip
//! through its canonical label.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rollup_tables::Granularity;
use rollup_tables::agg::parse_child_column_name;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(g) = Granularity::parse(input) {
        let reparsed = Granularity::parse(&g.label()).expect("canonical label must parse");
        assert_eq!(reparsed, g);
        let _ = g.width_secs();
        let _ = g.nests_in(&reparsed);
    }

    if let Some((base, name)) = input.split_once('|') {
        let _ = parse_child_column_name(base, name);
    }
});
