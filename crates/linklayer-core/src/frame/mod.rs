//! Link-layer frame kinds and the polymorphic [`Frame`] type.

mod envelope;
mod hexdump;
mod ieee80211;
mod ieee8023;
mod mac;
mod raw;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use envelope::FrameEnvelope;
pub use hexdump::{BYTES_PER_LINE, hex_dump};
pub use ieee80211::{IEEE80211_HEADER_LEN, IEEE80211_MAX_FRAME_LEN, IEEE80211_MAX_PAYLOAD, Ieee80211Frame};
pub use ieee8023::{
    IEEE8023_HEADER_LEN, IEEE8023_MAX_FRAME_LEN, IEEE8023_MAX_PAYLOAD, Ieee8023Frame,
};
pub use mac::MacAddr;
pub use raw::{RAW_MAX_FRAME_LEN, RawFrame};

use crate::error::{FrameError, ParseKindError};

/// Link-layer framing carried by a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Opaque buffer, no header
    Raw,
    /// IEEE 802.3 / Ethernet II
    Ieee8023,
    /// Reduced IEEE 802.11 (addresses only)
    Ieee80211,
}

impl FrameKind {
    /// All supported kinds.
    pub const ALL: [FrameKind; 3] = [FrameKind::Raw, FrameKind::Ieee8023, FrameKind::Ieee80211];

    /// Fixed header length in bytes.
    #[must_use]
    pub const fn header_len(self) -> usize {
        match self {
            FrameKind::Raw => 0,
            FrameKind::Ieee8023 => IEEE8023_HEADER_LEN,
            FrameKind::Ieee80211 => IEEE80211_HEADER_LEN,
        }
    }

    /// Largest payload the kind can carry.
    #[must_use]
    pub const fn max_payload(self) -> usize {
        match self {
            FrameKind::Raw => RAW_MAX_FRAME_LEN,
            FrameKind::Ieee8023 => IEEE8023_MAX_PAYLOAD,
            FrameKind::Ieee80211 => IEEE80211_MAX_PAYLOAD,
        }
    }

    /// Largest frame (header plus payload) of the kind.
    #[must_use]
    pub const fn max_frame_len(self) -> usize {
        self.header_len() + self.max_payload()
    }

    /// Human-readable name used in frame descriptions.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FrameKind::Raw => "raw",
            FrameKind::Ieee8023 => "IEEE 802.3",
            FrameKind::Ieee80211 => "IEEE 802.11",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FrameKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "buffer" => Ok(FrameKind::Raw),
            "ieee8023" | "8023" | "ethernet" => Ok(FrameKind::Ieee8023),
            "ieee80211" | "80211" | "wifi" => Ok(FrameKind::Ieee80211),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// A link-layer frame of any supported kind.
///
/// A frame is exclusively owned by whoever produced it last: the transmitter
/// builds one per TX event, the receiver decodes one per RX event, and both
/// drop it before the next event is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque buffer
    Raw(RawFrame),
    /// IEEE 802.3 frame
    Ieee8023(Ieee8023Frame),
    /// Reduced IEEE 802.11 frame
    Ieee80211(Ieee80211Frame),
}

impl Frame {
    /// Decode `buf` as a frame of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than the kind's
    /// fixed header.
    pub fn decode(buf: &[u8], kind: FrameKind) -> Result<Self, FrameError> {
        Self::decode_captured(buf, kind, buf.len())
    }

    /// Decode `buf` as a frame of `kind` whose full length on the wire was
    /// `wire_len`.
    ///
    /// A capture shorter than the frame's self-reported length is logged and
    /// decoded anyway.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` is shorter than the kind's
    /// fixed header.
    pub fn decode_captured(buf: &[u8], kind: FrameKind, wire_len: usize) -> Result<Self, FrameError> {
        Ok(match kind {
            FrameKind::Raw => Frame::Raw(RawFrame::decode_captured(buf, wire_len)?),
            FrameKind::Ieee8023 => Frame::Ieee8023(Ieee8023Frame::decode_captured(buf, wire_len)?),
            FrameKind::Ieee80211 => {
                Frame::Ieee80211(Ieee80211Frame::decode_captured(buf, wire_len)?)
            }
        })
    }

    /// Build the harness test frame: broadcast destination, `src` as the
    /// source, `sap` as the ethertype (802.3 only) and `payload_len` zero
    /// bytes of payload.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::PayloadTooLarge` if `payload_len` exceeds the
    /// kind's maximum payload.
    pub fn synthetic(
        kind: FrameKind,
        src: MacAddr,
        sap: u16,
        payload_len: usize,
    ) -> Result<Self, FrameError> {
        let payload = vec![0u8; payload_len];
        Ok(match kind {
            FrameKind::Raw => Frame::Raw(RawFrame::new(payload)?),
            FrameKind::Ieee8023 => {
                Frame::Ieee8023(Ieee8023Frame::new(MacAddr::BROADCAST, src, sap, payload)?)
            }
            FrameKind::Ieee80211 => {
                Frame::Ieee80211(Ieee80211Frame::new(MacAddr::BROADCAST, src, payload)?)
            }
        })
    }

    /// Serialize the frame to its wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Raw(f) => f.encode(),
            Frame::Ieee8023(f) => f.encode(),
            Frame::Ieee80211(f) => f.encode(),
        }
    }

    /// Deterministic, multi-line rendering of every header field and a hex
    /// dump of the payload.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Frame::Raw(f) => f.describe(),
            Frame::Ieee8023(f) => f.describe(),
            Frame::Ieee80211(f) => f.describe(),
        }
    }

    /// Envelope metadata.
    #[must_use]
    pub fn envelope(&self) -> &FrameEnvelope {
        match self {
            Frame::Raw(f) => f.envelope(),
            Frame::Ieee8023(f) => f.envelope(),
            Frame::Ieee80211(f) => f.envelope(),
        }
    }

    /// Kind of this frame.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.envelope().kind()
    }

    /// Payload bytes (the whole buffer for raw frames).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Raw(f) => f.bytes(),
            Frame::Ieee8023(f) => f.payload(),
            Frame::Ieee80211(f) => f.payload(),
        }
    }
}

impl From<RawFrame> for Frame {
    fn from(frame: RawFrame) -> Self {
        Frame::Raw(frame)
    }
}

impl From<Ieee8023Frame> for Frame {
    fn from(frame: Ieee8023Frame) -> Self {
        Frame::Ieee8023(frame)
    }
}

impl From<Ieee80211Frame> for Frame {
    fn from(frame: Ieee80211Frame) -> Self {
        Frame::Ieee80211(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
