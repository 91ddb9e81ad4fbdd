//! Fuzz target for Topic::parse
//!
//! Any destination the parser accepts must render back to itself.

#![no_main]

use kinship_proto::Topic;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(destination) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(topic) = Topic::parse(destination) {
        assert_eq!(topic.destination(), destination);
    }
});
