//! # linklayer-core
//!
//! Frame model for the linklayertool harness.
//!
//! A single [`Frame`] sum type carries every link-layer framing the harness
//! can put on the wire:
//!
//! - [`Ieee8023Frame`]: Ethernet II / IEEE 802.3 (destination, source,
//!   ethertype or length field, payload)
//! - [`Ieee80211Frame`]: a reduced IEEE 802.11 header (destination and
//!   source addresses only)
//! - [`RawFrame`]: an opaque buffer with no header
//!
//! Every frame owns a [`FrameEnvelope`] recording its kind, byte length and
//! the instant it was finalized. Frames are built by the transmitter, decoded
//! by the receiver, and dropped once the I/O event that produced them has been
//! handled.
//!
//! ```
//! use linklayer_core::{Frame, FrameKind, MacAddr};
//!
//! let src: MacAddr = "00:11:22:33:44:55".parse().unwrap();
//! let frame = Frame::synthetic(FrameKind::Ieee8023, src, 0x0800, 10).unwrap();
//! let decoded = Frame::decode(&frame.encode(), FrameKind::Ieee8023).unwrap();
//! assert_eq!(frame, decoded);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;

pub use error::{FrameError, ParseKindError, ParseMacError};
pub use frame::{
    Frame, FrameEnvelope, FrameKind, Ieee8023Frame, Ieee80211Frame, MacAddr, RawFrame,
};
