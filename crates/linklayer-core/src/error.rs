//! Error types for the frame model

use thiserror::Error;

use crate::frame::FrameKind;

/// Errors raised while building or decoding frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer shorter than the fixed header of the declared kind
    #[error("{kind} frame truncated: need at least {minimum} bytes, got {actual}")]
    Truncated {
        /// Declared frame kind
        kind: FrameKind,
        /// Minimum header length for the kind
        minimum: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Payload exceeds the structural maximum of the kind
    #[error("{kind} payload too large: maximum {maximum} bytes, got {actual}")]
    PayloadTooLarge {
        /// Frame kind being built
        kind: FrameKind,
        /// Largest payload the kind can carry
        maximum: usize,
        /// Requested payload length
        actual: usize,
    },
}

/// A hardware address string that is not six colon-separated hex pairs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(pub String);

/// An unknown frame kind name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown frame kind {0:?} (expected ieee8023, ieee80211 or raw)")]
pub struct ParseKindError(pub String);
