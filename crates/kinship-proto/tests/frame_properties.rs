//! Property-based tests for frame and payload decoding.
//!
//! Decoding must never panic on arbitrary input, and every strict prefix of a
//! valid encoding must be rejected rather than misread.

use kinship_proto::{DeliveryStatus, Frame, Payload, ProtocolError, ServerMessage, TypingSignal};
use proptest::prelude::*;

fn destination_strategy() -> impl Strategy<Value = String> {
    "/[a-z]{1,10}(/[a-z0-9.-]{1,12}){0,4}"
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop_oneof![
        ("[a-z0-9-]{1,12}", "[a-z0-9]{1,8}", ".{0,64}", any::<u64>()).prop_map(
            |(id, sender, text, timestamp)| {
                Payload::Message(ServerMessage {
                    id,
                    conversation_id: "c1".into(),
                    sender_id: sender,
                    text,
                    timestamp,
                    status: DeliveryStatus::Delivered,
                    client_temp_id: None,
                })
            }
        ),
        ("[a-z0-9]{1,8}", any::<bool>()).prop_map(|(sender_id, is_typing)| {
            Payload::Typing(TypingSignal { conversation_id: "c1".into(), sender_id, is_typing })
        }),
    ]
}

proptest! {
    #[test]
    fn prop_frame_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Frame::decode(&bytes);
    }

    #[test]
    fn prop_payload_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Payload::decode(&bytes);
    }

    #[test]
    fn prop_strict_prefix_is_truncated(
        destination in destination_strategy(),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame::new(destination, body);
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        for cut in 0..buf.len() {
            let result = Frame::decode(&buf[..cut]);
            prop_assert!(
                matches!(result, Err(ProtocolError::FrameTruncated { .. })),
                "prefix of length {} decoded as {:?}", cut, result
            );
        }
        prop_assert_eq!(Frame::decode(&buf).unwrap(), frame);
    }

    #[test]
    fn prop_payload_survives_wire_encoding(
        destination in destination_strategy(),
        payload in payload_strategy(),
    ) {
        let frame = payload.into_frame(destination).unwrap();
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        let decoded = Frame::decode(&buf).unwrap();
        prop_assert_eq!(Payload::from_frame(&decoded).unwrap(), payload);
    }
}
