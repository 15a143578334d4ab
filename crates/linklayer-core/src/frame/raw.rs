//! Header-less frames: the bytes as they came off the socket.

use std::fmt::Write;

use tracing::warn;

use super::hexdump::hex_dump;
use super::{FrameEnvelope, FrameKind};
use crate::error::FrameError;

/// Largest raw frame, one ring slot page.
pub const RAW_MAX_FRAME_LEN: usize = 4096;

/// An opaque link-layer buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    envelope: FrameEnvelope,
    bytes: Vec<u8>,
}

impl RawFrame {
    /// Wrap `bytes` as a frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::PayloadTooLarge` beyond 4096 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let bytes = bytes.into();
        if bytes.len() > RAW_MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLarge {
                kind: FrameKind::Raw,
                maximum: RAW_MAX_FRAME_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Raw, bytes.len(), bytes.len()),
            bytes,
        })
    }

    /// Decode never fails for raw frames; bytes past 4096 are dropped.
    ///
    /// # Errors
    ///
    /// Infallible, the `Result` matches the other kinds.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        Self::decode_captured(buf, buf.len())
    }

    /// Decode a capture of a frame that was `wire_len` bytes on the wire.
    ///
    /// # Errors
    ///
    /// Infallible, the `Result` matches the other kinds.
    pub fn decode_captured(buf: &[u8], wire_len: usize) -> Result<Self, FrameError> {
        if buf.len() < wire_len {
            warn!(captured = buf.len(), wire_len, "partial raw capture");
        }
        let end = buf.len().min(RAW_MAX_FRAME_LEN);
        Ok(Self {
            envelope: FrameEnvelope::seal(FrameKind::Raw, end, wire_len.max(buf.len())),
            bytes: buf[..end].to_vec(),
        })
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Length line followed by a hex dump.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} frame, {} bytes", FrameKind::Raw, self.envelope.length());
        if self.envelope.is_partial() {
            let _ = writeln!(
                out,
                "  captured  {} of {} bytes",
                self.envelope.length(),
                self.envelope.wire_length()
            );
        }
        out.push_str(&hex_dump(&self.bytes, "    "));
        out
    }

    /// Envelope metadata.
    #[must_use]
    pub fn envelope(&self) -> &FrameEnvelope {
        &self.envelope
    }

    /// Frame bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
