//! Fuzz target for Payload::decode and Payload::from_frame
//!
//! Exercises the CBOR body decoder with malformed data, wrong variant tags
//! and oversized strings. Invalid input must return an error, never panic.

#![no_main]

use kinship_proto::{Frame, Payload, Topic};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Payload::decode(data);

    let frame = Frame::new(Topic::Conversation("c1".into()).destination(), data.to_vec());
    let _ = Payload::from_frame(&frame);
});
