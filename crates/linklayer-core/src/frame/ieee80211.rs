//! Reduced IEEE 802.11 framing.
//!
//! Only the addressing part of the 802.11 MAC header is modelled:
//!
//! ```text
//!  Offset  Size  Field
//!  0       6     Destination MAC
//!  6       6     Source MAC
//!  12      n     Payload (0..=2313 bytes)
//! ```
//!
//! Frame control, duration, BSSID, sequence control and QoS fields are not
//! carried.

use std::fmt::Write;

use tracing::warn;

use super::hexdump::hex_dump;
use super::{FrameEnvelope, FrameKind, MacAddr};
use crate::error::FrameError;

/// Fixed (reduced) header length.
pub const IEEE80211_HEADER_LEN: usize = 12;

/// Largest payload an 802.11 frame carries.
pub const IEEE80211_MAX_PAYLOAD: usize = 2313;

/// Largest reduced 802.11 frame.
pub const IEEE80211_MAX_FRAME_LEN: usize = IEEE80211_HEADER_LEN + IEEE80211_MAX_PAYLOAD;

/// A reduced IEEE 802.11 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ieee80211Frame {
    envelope: FrameEnvelope,
    dest: MacAddr,
    src: MacAddr,
    payload: Vec<u8>,
}

impl Ieee80211Frame {
    /// Build a frame from its fields.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::PayloadTooLarge` if `payload` exceeds 2313 bytes.
    pub fn new(dest: MacAddr, src: MacAddr, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > IEEE80211_MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                kind: FrameKind::Ieee80211,
                maximum: IEEE80211_MAX_PAYLOAD,
                actual: payload.len(),
            });
        }
        let length = IEEE80211_HEADER_LEN + payload.len();
        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Ieee80211, length, length),
            dest,
            src,
            payload,
        })
    }

    /// Decode a frame from its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than 12 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        Self::decode_captured(buf, buf.len())
    }

    /// Decode a capture of a frame that was `wire_len` bytes on the wire.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than 12 bytes.
    pub fn decode_captured(buf: &[u8], wire_len: usize) -> Result<Self, FrameError> {
        if buf.len() < IEEE80211_HEADER_LEN {
            return Err(FrameError::Truncated {
                kind: FrameKind::Ieee80211,
                minimum: IEEE80211_HEADER_LEN,
                actual: buf.len(),
            });
        }
        if buf.len() < wire_len {
            warn!(captured = buf.len(), wire_len, "partial 802.11 capture");
        }

        let end = buf.len().min(IEEE80211_MAX_FRAME_LEN);
        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Ieee80211, end, wire_len.max(buf.len())),
            dest: MacAddr::from_slice(&buf[0..6]),
            src: MacAddr::from_slice(&buf[6..12]),
            payload: buf[IEEE80211_HEADER_LEN..end].to_vec(),
        })
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(IEEE80211_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(self.dest.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Multi-line rendering of the header fields and payload.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} frame, {} bytes", FrameKind::Ieee80211, self.envelope.length());
        let _ = writeln!(out, "  dest      {}", self.dest);
        let _ = writeln!(out, "  src       {}", self.src);
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

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
