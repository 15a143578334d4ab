//! # linklayer-transport
//!
//! Link-layer transport for the linklayertool harness.
//!
//! This crate provides:
//! - Non-blocking `AF_PACKET` raw sockets bound to one interface
//! - `PACKET_MMAP` rings (`TPACKET_V1`) shared with the kernel for RX and TX
//! - Interface name to index and hardware address resolution
//! - A single-threaded readiness reactor on the tokio current-thread runtime
//! - Frame callbacks that transmit test frames or decode received ones
//! - The [`LinkSocket`] lifecycle tying all of the above together
//!
//! Everything here is Linux-specific.

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(target_os = "linux")]
pub mod error;

#[cfg(target_os = "linux")]
pub mod handler;

#[cfg(target_os = "linux")]
pub mod interface;

// Packet sockets and rings
#[cfg(target_os = "linux")]
pub mod raw;
#[cfg(target_os = "linux")]
pub mod ring;

#[cfg(target_os = "linux")]
pub mod reactor;

#[cfg(target_os = "linux")]
pub mod socket;

#[cfg(target_os = "linux")]
pub use error::{LinkError, Result};
#[cfg(target_os = "linux")]
pub use interface::{InterfaceIdentity, InterfaceResolver, SystemResolver};
#[cfg(target_os = "linux")]
pub use reactor::{
    Callback, Dispatch, Reactor, ReactorStats, Readiness, StopHandle, StopSignal, Watcher,
    stop_channel,
};
#[cfg(target_os = "linux")]
pub use ring::{RingChannel, RingDirection, RingSlot, SlotStatus};
#[cfg(target_os = "linux")]
pub use socket::{LinkConfig, LinkSocket, Role, SocketState, TrafficOptions};
