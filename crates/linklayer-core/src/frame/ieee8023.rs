//! IEEE 802.3 / Ethernet II framing.
//!
//! ```text
//!  Offset  Size  Field
//!  0       6     Destination MAC
//!  6       6     Source MAC
//!  12      2     Ethertype, or payload length if <= 1500 (big-endian)
//!  14      n     Payload (0..=1500 bytes)
//! ```
//!
//! The frame check sequence is appended and stripped by the NIC and never
//! reaches a packet socket.

use std::fmt::Write;

use tracing::warn;

use super::hexdump::hex_dump;
use super::{FrameEnvelope, FrameKind, MacAddr};
use crate::error::FrameError;

/// Fixed header length.
pub const IEEE8023_HEADER_LEN: usize = 14;

/// Largest payload an 802.3 frame carries.
pub const IEEE8023_MAX_PAYLOAD: usize = 1500;

/// Largest 802.3 frame without FCS.
pub const IEEE8023_MAX_FRAME_LEN: usize = IEEE8023_HEADER_LEN + IEEE8023_MAX_PAYLOAD;

/// An IEEE 802.3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ieee8023Frame {
    envelope: FrameEnvelope,
    dest: MacAddr,
    src: MacAddr,
    ethertype: u16,
    payload: Vec<u8>,
}

impl Ieee8023Frame {
    /// Build a frame from its fields.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::PayloadTooLarge` if `payload` exceeds 1500 bytes.
    pub fn new(
        dest: MacAddr,
        src: MacAddr,
        ethertype: u16,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > IEEE8023_MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                kind: FrameKind::Ieee8023,
                maximum: IEEE8023_MAX_PAYLOAD,
                actual: payload.len(),
            });
        }
        let length = IEEE8023_HEADER_LEN + payload.len();
        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Ieee8023, length, length),
            dest,
            src,
            ethertype,
            payload,
        })
    }

    /// Decode a frame from its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than 14 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        Self::decode_captured(buf, buf.len())
    }

    /// Decode a capture of `buf.len()` bytes of a frame that was `wire_len`
    /// bytes on the wire.
    ///
    /// Bytes past the 1500-byte payload limit are not kept.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than 14 bytes.
    pub fn decode_captured(buf: &[u8], wire_len: usize) -> Result<Self, FrameError> {
        if buf.len() < IEEE8023_HEADER_LEN {
            return Err(FrameError::Truncated {
                kind: FrameKind::Ieee8023,
                minimum: IEEE8023_HEADER_LEN,
                actual: buf.len(),
            });
        }

        let dest = MacAddr::from_slice(&buf[0..6]);
        let src = MacAddr::from_slice(&buf[6..12]);
        let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
        let end = buf.len().min(IEEE8023_MAX_FRAME_LEN);
        let payload = buf[IEEE8023_HEADER_LEN..end].to_vec();

        if buf.len() < wire_len {
            warn!(
                captured = buf.len(),
                wire_len,
                "partial 802.3 capture"
            );
        }
        if ethertype as usize <= IEEE8023_MAX_PAYLOAD && payload.len() < ethertype as usize {
            warn!(
                length_field = ethertype,
                payload = payload.len(),
                "802.3 payload shorter than its length field"
            );
        }

        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Ieee8023, end, wire_len.max(buf.len())),
            dest,
            src,
            ethertype,
            payload,
        })
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(IEEE8023_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(self.dest.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(&self.ethertype.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Multi-line rendering of the header fields and payload.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} frame, {} bytes", FrameKind::Ieee8023, self.envelope.length());
        let _ = writeln!(out, "  dest      {}", self.dest);
        let _ = writeln!(out, "  src       {}", self.src);
        match self.length_field() {
            Some(_) => {
                let _ = writeln!(out, "  ethertype 0x{:04X} (length)", self.ethertype);
            }
            None => {
                let _ = writeln!(out, "  ethertype 0x{:04X}", self.ethertype);
            }
        }
        if self.envelope.is_partial() {
            let _ = writeln!(
                out,
                "  captured  {} of {} bytes",
                self.envelope.length(),
                self.envelope.wire_length()
            );
        }
        let _ = writeln!(out, "  payload   {} bytes", self.payload.len());
        out.push_str(&hex_dump(&self.payload, "    "));
        out
    }

    /// Envelope metadata.
    #[must_use]
    pub fn envelope(&self) -> &FrameEnvelope {
        &self.envelope
    }

    /// Destination address.
    #[must_use]
    pub fn dest(&self) -> MacAddr {
        self.dest
    }

    /// Source address.
    #[must_use]
    pub fn src(&self) -> MacAddr {
        self.src
    }

    /// Ethertype (or length) field.
    #[must_use]
    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    /// The ethertype field read as an 802.3 length, when it is one.
    #[must_use]
    pub fn length_field(&self) -> Option<usize> {
        let value = usize::from(self.ethertype);
        (value <= IEEE8023_MAX_PAYLOAD).then_some(value)
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ieee8023Frame {
        Ieee8023Frame::new(
            MacAddr::BROADCAST,
            "00:11:22:33:44:55".parse().unwrap(),
            0x0800,
            vec![0u8; 10],
        )
        .unwrap()
    }

    #[test]
    fn test_ieee8023_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..6], &[0xFF; 6]);
        assert_eq!(&bytes[6..12], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(&bytes[12..14], &[0x08, 0x00]);
        assert!(bytes[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ieee8023_payload_limit() {
        let src = MacAddr::ZERO;
        assert!(Ieee8023Frame::new(MacAddr::BROADCAST, src, 1, vec![0u8; 1500]).is_ok());
        let err = Ieee8023Frame::new(MacAddr::BROADCAST, src, 1, vec![0u8; 1501]).unwrap_err();
        assert_eq!(
            err,
            FrameError::PayloadTooLarge {
                kind: FrameKind::Ieee8023,
                maximum: 1500,
                actual: 1501
            }
        );
    }

    #[test]
    fn test_ieee8023_describe() {
        let text = sample().describe();
        assert_eq!(
            text,
            "IEEE 802.3 frame, 24 bytes\n\
             \x20 dest      FF:FF:FF:FF:FF:FF\n\
             \x20 src       00:11:22:33:44:55\n\
             \x20 ethertype 0x0800\n\
             \x20 payload   10 bytes\n\
             \x20   00:00:00:00:00:00:00:00\n\
             \x20   00:00\n"
        );
    }

    #[test]
    fn test_ieee8023_describe_is_deterministic() {
        let a = sample();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = sample();
        assert_eq!(a.describe(), b.describe());
    }

    #[test]
    fn test_ieee8023_decode_oversized_buffer() {
        let buf = vec![0x5Au8; 2000];
        let frame = Ieee8023Frame::decode(&buf).unwrap();
        assert_eq!(frame.payload().len(), IEEE8023_MAX_PAYLOAD);
        assert_eq!(frame.envelope().length(), IEEE8023_MAX_FRAME_LEN);
        assert_eq!(frame.envelope().wire_length(), 2000);
    }

    #[test]
    fn test_ieee8023_partial_capture_still_decodes() {
        let bytes = sample().encode();
        let frame = Ieee8023Frame::decode_captured(&bytes[..16], 24).unwrap();
        assert_eq!(frame.payload(), &[0, 0]);
        assert!(frame.envelope().is_partial());
        assert!(frame.describe().contains("captured  16 of 24 bytes"));
    }

    #[test]
    fn test_ieee8023_length_field() {
        let frame = Ieee8023Frame::new(MacAddr::BROADCAST, MacAddr::ZERO, 46, vec![0u8; 4]).unwrap();
        assert_eq!(frame.length_field(), Some(46));
        assert!(frame.describe().contains("0x002E (length)"));
        assert_eq!(sample().length_field(), None);

        // Short payload against its length field only warns
        let decoded = Ieee8023Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.payload().len(), 4);
    }
}
