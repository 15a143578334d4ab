//! Fuzz target for frame decoding
//!
//! Decodes arbitrary captures as every frame kind and checks that a decoded
//! frame stays within its kind's bounds and renders without panicking.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use linklayer_core::{Frame, FrameKind};

#[derive(Debug, Arbitrary)]
struct Capture {
    kind: u8,
    extra_wire_len: u16,
    bytes: Vec<u8>,
}

fuzz_target!(|capture: Capture| {
    let kind = FrameKind::ALL[capture.kind as usize % FrameKind::ALL.len()];
    let wire_len = capture.bytes.len() + capture.extra_wire_len as usize;

    if let Ok(frame) = Frame::decode_captured(&capture.bytes, kind, wire_len) {
        assert!(frame.envelope().length() <= kind.max_frame_len());
        assert!(frame.payload().len() <= kind.max_payload());
        let _ = frame.describe();

        // Re-encoding a frame that fit its kind reproduces the capture
        if capture.bytes.len() <= kind.max_frame_len() {
            assert_eq!(frame.encode(), capture.bytes);
        }
    }
});
