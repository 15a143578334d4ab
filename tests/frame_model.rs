//! Integration tests for the frame model
//!
//! Tests for:
//! - The reference 802.3 description
//! - Structural payload bounds per kind
//! - Partial captures reported by the kernel
//! - Decoding arbitrary bytes as any kind

use linklayer_core::{Frame, FrameError, FrameKind, Ieee8023Frame, Ieee80211Frame, MacAddr};
use linklayer_integration_tests::TEST_SOURCE;
use proptest::prelude::*;

#[test]
fn test_describe_reference_frame() {
    let frame = Frame::from(
        Ieee8023Frame::new(
            MacAddr::BROADCAST,
            "00:11:22:33:44:55".parse().unwrap(),
            0x0800,
            vec![0u8; 10],
        )
        .unwrap(),
    );

    let text = frame.describe();
    assert!(text.contains("FF:FF:FF:FF:FF:FF"));
    assert!(text.contains("00:11:22:33:44:55"));
    assert!(text.contains("0x0800"));
    assert!(text.contains("payload   10 bytes"));
    assert!(text.contains("    00:00:00:00:00:00:00:00\n    00:00\n"));

    // Deterministic: decoding the encoded frame renders identically
    let decoded = Frame::decode(&frame.encode(), FrameKind::Ieee8023).unwrap();
    assert_eq!(decoded.describe(), text);
}

#[test]
fn test_payload_bounds_per_kind() {
    for kind in FrameKind::ALL {
        let max = kind.max_payload();
        assert!(Frame::synthetic(kind, TEST_SOURCE, 0x88B5, max).is_ok(), "{kind}");
        assert_eq!(
            Frame::synthetic(kind, TEST_SOURCE, 0x88B5, max + 1).unwrap_err(),
            FrameError::PayloadTooLarge {
                kind,
                maximum: max,
                actual: max + 1,
            }
        );
    }
}

#[test]
fn test_80211_has_no_ethertype() {
    let frame = Ieee80211Frame::new(MacAddr::BROADCAST, TEST_SOURCE, vec![0xAB; 3]).unwrap();
    let bytes = frame.encode();
    assert_eq!(bytes.len(), 12 + 3);
    assert_eq!(&bytes[..6], &[0xFF; 6]);
    assert!(!frame.describe().contains("ethertype"));
}

#[test]
fn test_short_buffers_are_truncated_errors() {
    assert!(matches!(
        Frame::decode(&[0u8; 13], FrameKind::Ieee8023),
        Err(FrameError::Truncated { minimum: 14, actual: 13, .. })
    ));
    assert!(matches!(
        Frame::decode(&[0u8; 11], FrameKind::Ieee80211),
        Err(FrameError::Truncated { minimum: 12, actual: 11, .. })
    ));
    assert_eq!(Frame::decode(&[], FrameKind::Raw).unwrap().envelope().length(), 0);
}

#[test]
fn test_partial_capture_is_kept_and_reported() {
    let bytes = Frame::synthetic(FrameKind::Ieee8023, TEST_SOURCE, 0x0800, 100)
        .unwrap()
        .encode();
    let frame = Frame::decode_captured(&bytes[..64], FrameKind::Ieee8023, bytes.len()).unwrap();

    let envelope = frame.envelope();
    assert_eq!(envelope.length(), 64);
    assert_eq!(envelope.wire_length(), 114);
    assert!(envelope.is_partial());
    assert!(frame.describe().contains("captured  64 of 114 bytes"));
}

#[test]
fn test_oversized_capture_is_clipped() {
    let bytes = vec![0x5Au8; 2000];
    let frame = Frame::decode(&bytes, FrameKind::Ieee8023).unwrap();
    assert_eq!(frame.envelope().length(), 1514);
    assert_eq!(frame.payload().len(), 1500);
}

proptest! {
    #[test]
    fn prop_decode_any_bytes_within_kind_bounds(
        bytes in prop::collection::vec(any::<u8>(), 0..5000),
        kind in prop::sample::select(FrameKind::ALL.to_vec()),
    ) {
        match Frame::decode(&bytes, kind) {
            Ok(frame) => {
                prop_assert!(frame.envelope().length() <= kind.max_frame_len());
                prop_assert_eq!(frame.kind(), kind);
                prop_assert!(frame.payload().len() <= kind.max_payload());
            }
            Err(FrameError::Truncated { minimum, actual, .. }) => {
                prop_assert!(actual < minimum);
                prop_assert_eq!(minimum, kind.header_len());
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
