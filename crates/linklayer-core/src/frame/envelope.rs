use std::time::{SystemTime, UNIX_EPOCH};

use super::FrameKind;

/// Metadata shared by every frame kind.
///
/// An envelope is created once, when a frame is finalized by a successful
/// build or decode, and is read-only afterwards.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    kind: FrameKind,
    length: usize,
    wire_length: usize,
    captured_at: SystemTime,
}

impl FrameEnvelope {
    /// Seal an envelope for a frame of `length` bytes that occupied
    /// `wire_length` bytes on the wire.
    pub(crate) fn seal(kind: FrameKind, length: usize, wire_length: usize) -> Self {
        debug_assert!(length <= kind.max_frame_len());
        Self {
            kind,
            length,
            wire_length,
            captured_at: SystemTime::now(),
        }
    }

    /// Frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Bytes held by the frame, header included.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Length of the frame on the wire, as reported by the kernel.
    #[must_use]
    pub fn wire_length(&self) -> usize {
        self.wire_length
    }

    /// Whether fewer bytes were kept than the wire carried.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.length < self.wire_length
    }

    /// Instant the frame was finalized.
    #[must_use]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Finalization instant in microseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_micros(&self) -> u64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

// The finalization instant is metadata; two envelopes describing the same
// bytes are equal.
impl PartialEq for FrameEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.length == other.length
    }
}

impl Eq for FrameEnvelope {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_partial() {
        let full = FrameEnvelope::seal(FrameKind::Ieee8023, 60, 60);
        assert!(!full.is_partial());
        let short = FrameEnvelope::seal(FrameKind::Ieee8023, 60, 1514);
        assert!(short.is_partial());
        assert_eq!(short.wire_length(), 1514);
    }

    #[test]
    fn test_envelope_equality_ignores_timestamp() {
        let a = FrameEnvelope::seal(FrameKind::Raw, 8, 8);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = FrameEnvelope::seal(FrameKind::Raw, 8, 8);
        assert_ne!(a.captured_at(), b.captured_at());
        assert_eq!(a, b);
        assert!(a.timestamp_micros() > 0);
    }
}
