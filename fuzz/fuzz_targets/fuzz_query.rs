//! Fuzz testing for query string lookups.
//!
//! Ensures the raw query parsers never panic and that their results keep
//! the documented shape on arbitrary input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_query -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use mux_facade::request::form::parse_values;
use mux_facade::request::lookup::{first_query_value, query_values, resolve};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let values = query_values(raw, &["a", "b"]);
    // A winning key always contributes at least one value
    if !values.is_empty() {
        assert!(raw.contains('='));
    }

    let _ = parse_values(data);

    // Single-key misses never fall back to a literal
    let single = resolve(|k| first_query_value(raw, k), &["a"]);
    if single.is_empty() {
        assert!(first_query_value(raw, "a").is_empty());
    }

    // Multi-key misses fall back to the last key
    let multi = resolve(|k| first_query_value(raw, k), &["a", "b", "fallback"]);
    assert!(!multi.is_empty());
});
