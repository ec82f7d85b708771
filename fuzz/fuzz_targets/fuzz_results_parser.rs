#![no_main]

use jestcheck_adapters_results::parse_results;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Malformed results must come back as errors, never panics.
        let _ = parse_results(text);
    }
});
