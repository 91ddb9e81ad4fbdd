//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the frame decoder, and anything it
//! accepts must encode back to a frame that decodes to the same value.

#![no_main]

use kinship_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut encoded = Vec::new();
    if frame.encode(&mut encoded).is_ok() {
        assert_eq!(Frame::decode(&encoded).ok(), Some(frame));
    }
});
