//! `PACKET_MMAP` ring channels (`TPACKET_V1`).
//!
//! A ring is `capacity` slots of one page each, shared with the kernel
//! through `mmap`. Every slot starts with a `tpacket_hdr` whose `tp_status`
//! word is the ownership token:
//!
//! ```text
//!  RX: KERNEL --(kernel fills)--> USER[|COPY|LOSING] --(release)--> KERNEL
//!  TX: AVAILABLE --(submit)--> SEND_REQUEST --(kernel sends)--> AVAILABLE
//!                                           \--(rejected)-----> WRONG_FORMAT
//! ```
//!
//! Status loads are `Acquire` and stores are `Release`, so the payload of a
//! slot is visible before the flag that hands it over. Only the slot at the
//! cursor may be claimed, which keeps frames in ring order.

use std::io::{self, Error};
use std::mem::{self, ManuallyDrop};
use std::os::fd::{AsRawFd, RawFd};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_ulong, c_void};
use linklayer_core::{FrameError, FrameKind};
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::raw::{self, RawSocket};

// Slot status bits (linux/if_packet.h)
pub(crate) const TP_STATUS_KERNEL: usize = 0;
pub(crate) const TP_STATUS_USER: usize = 1 << 0;
pub(crate) const TP_STATUS_COPY: usize = 1 << 1;
pub(crate) const TP_STATUS_LOSING: usize = 1 << 2;

pub(crate) const TP_STATUS_AVAILABLE: usize = 0;
pub(crate) const TP_STATUS_SEND_REQUEST: usize = 1 << 0;
pub(crate) const TP_STATUS_SENDING: usize = 1 << 1;
pub(crate) const TP_STATUS_WRONG_FORMAT: usize = 1 << 2;

const PACKET_RX_RING: c_int = 5;
const PACKET_VERSION: c_int = 10;
const PACKET_TX_RING: c_int = 13;
const TPACKET_V1: c_int = 0;

const TPACKET_ALIGNMENT: usize = 16;

/// Default number of ring slots.
pub const DEFAULT_RING_FRAMES: u32 = 128;

/// `struct tpacket_req` (linux/if_packet.h)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct TpacketReq {
    tp_block_size: u32,
    tp_block_nr: u32,
    tp_frame_size: u32,
    tp_frame_nr: u32,
}

/// `struct tpacket_hdr` (linux/if_packet.h)
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default)]
struct TpacketHdr {
    tp_status: c_ulong,
    tp_len: u32,
    tp_snaplen: u32,
    tp_mac: u16,
    tp_net: u16,
    tp_sec: u32,
    tp_usec: u32,
}

const fn tpacket_align(len: usize) -> usize {
    (len + TPACKET_ALIGNMENT - 1) & !(TPACKET_ALIGNMENT - 1)
}

/// Offset of frame data in a TX slot, `TPACKET_HDRLEN - sizeof(sockaddr_ll)`.
pub const TX_DATA_OFFSET: usize = tpacket_align(mem::size_of::<TpacketHdr>());

/// System page size; one ring slot.
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// Largest frame a TX slot holds.
#[must_use]
pub fn tx_slot_capacity() -> usize {
    page_size() - TX_DATA_OFFSET
}

/// Ring direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingDirection {
    /// `PACKET_RX_RING`, kernel produces
    Rx,
    /// `PACKET_TX_RING`, user produces
    Tx,
}

impl RingDirection {
    fn sockopt(self) -> (c_int, &'static str) {
        match self {
            RingDirection::Rx => (PACKET_RX_RING, "PACKET_RX_RING"),
            RingDirection::Tx => (PACKET_TX_RING, "PACKET_TX_RING"),
        }
    }
}

/// Ownership of a slot, decoded from its status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Kernel may fill (RX) or is not yet asked to send
    AvailableToKernel,
    /// User space may read (RX) or write (TX) the slot
    OwnedByUser,
    /// Queued for, or in, transmission
    SendRequested,
    /// Partially copied (RX) or rejected by the kernel (TX)
    Error,
}

/// A claimed slot.
///
/// Offsets are relative to the start of the mapping; the slot does not
/// borrow the ring, read its bytes through [`RingChannel::payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSlot {
    index: usize,
    status: SlotStatus,
    header_offset: usize,
    payload_offset: usize,
    frame_bytes: usize,
    wire_len: usize,
}

impl RingSlot {
    /// Slot index in the ring.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Status when the slot was claimed.
    #[must_use]
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// Offset of the slot header in the mapping.
    #[must_use]
    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// Offset of the frame data from the slot header.
    #[must_use]
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// RX: captured bytes. TX: room for frame data.
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// RX: frame length on the wire. TX: zero.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }
}

/// An mmap'd region, unmapped on drop unless [`unmap`](Self::unmap) was
/// called.
#[derive(Debug)]
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn shared(fd: RawFd, len: usize) -> io::Result<Self> {
        Self::map(fd, len, libc::MAP_SHARED | libc::MAP_POPULATE)
    }

    fn anonymous(len: usize) -> io::Result<Self> {
        Self::map(-1, len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS)
    }

    fn map(fd: RawFd, len: usize, flags: c_int) -> io::Result<Self> {
        // SAFETY: mmap is a standard POSIX syscall. We request a fresh
        // read/write mapping at a kernel-chosen address; the result is
        // checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| Error::other("mmap returned a null mapping"))
    }

    fn unmap(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        // SAFETY: unmapping the region with its original address and size;
        // ManuallyDrop keeps Drop from unmapping it a second time.
        match unsafe { libc::munmap(this.ptr.as_ptr() as *mut c_void, this.len) } {
            0 => Ok(()),
            _ => Err(Error::last_os_error()),
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the region with its original address and size
        if unsafe { libc::munmap(self.ptr.as_ptr() as *mut c_void, self.len) } != 0 {
            warn!(error = %Error::last_os_error(), "munmap failed during drop");
        }
    }
}

/// A `PACKET_MMAP` ring shared with the kernel.
#[derive(Debug)]
pub struct RingChannel {
    mapping: Mapping,
    direction: RingDirection,
    frame_size: usize,
    capacity: usize,
    cursor: usize,
    claimed: bool,
    /// Socket the ring is attached to, `None` for anonymous rings. The
    /// owning `LinkSocket` closes the ring before the socket.
    fd: Option<RawFd>,
    loss_reports: u64,
}

fn validate_frame_count(frame_count: u32) -> Result<usize> {
    if frame_count < 2 || !frame_count.is_power_of_two() {
        return Err(LinkError::Configuration(format!(
            "ring frame count must be a power of two >= 2, got {frame_count}"
        )));
    }
    Ok(frame_count as usize)
}

impl RingChannel {
    /// Request a ring of `frame_count` one-page slots on `socket` and map it.
    ///
    /// # Errors
    ///
    /// `Configuration` if `frame_count` is not a power of two >= 2;
    /// `Resource` (or `PermissionDenied`) if the kernel rejects the ring
    /// request or the mapping.
    pub fn open(socket: &RawSocket, direction: RingDirection, frame_count: u32) -> Result<Self> {
        let capacity = validate_frame_count(frame_count)?;
        let page = page_size();
        let (option, op) = direction.sockopt();

        socket
            .set_packet_option(PACKET_VERSION, &TPACKET_V1)
            .map_err(|e| LinkError::setup("PACKET_VERSION", e))?;

        let req = TpacketReq {
            tp_block_size: page as u32,
            tp_block_nr: frame_count,
            tp_frame_size: page as u32,
            tp_frame_nr: frame_count,
        };
        socket
            .set_packet_option(option, &req)
            .map_err(|e| LinkError::setup(op, e))?;

        let mapping =
            Mapping::shared(socket.as_raw_fd(), page * capacity).map_err(|e| LinkError::setup("mmap", e))?;

        debug!(
            fd = socket.as_raw_fd(),
            ?direction,
            frames = capacity,
            frame_size = page,
            "mapped packet ring"
        );

        Ok(Self {
            mapping,
            direction,
            frame_size: page,
            capacity,
            cursor: 0,
            claimed: false,
            fd: Some(socket.as_raw_fd()),
            loss_reports: 0,
        })
    }

    /// Ring with the same layout over anonymous memory and no socket.
    ///
    /// Submissions skip the kernel notification. Whoever drives the ring
    /// stands in for the kernel by writing slot status words.
    ///
    /// # Errors
    ///
    /// `Configuration` for a bad `frame_count`, `Resource` if the mapping
    /// fails.
    pub fn anonymous(direction: RingDirection, frame_count: u32) -> Result<Self> {
        let capacity = validate_frame_count(frame_count)?;
        let page = page_size();
        let mapping = Mapping::anonymous(page * capacity).map_err(|e| LinkError::setup("mmap", e))?;

        Ok(Self {
            mapping,
            direction,
            frame_size: page,
            capacity,
            cursor: 0,
            claimed: false,
            fd: None,
            loss_reports: 0,
        })
    }

    /// Ring direction.
    #[must_use]
    pub fn direction(&self) -> RingDirection {
        self.direction
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per slot.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Index of the next slot to claim.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Times the kernel reported dropped frames.
    #[must_use]
    pub fn loss_reports(&self) -> u64 {
        self.loss_reports
    }

    fn header(&self, index: usize) -> *mut TpacketHdr {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity, so the slot lies inside the mapping
        unsafe { self.mapping.ptr.as_ptr().add(index * self.frame_size) as *mut TpacketHdr }
    }

    fn status_word(&self, index: usize) -> &AtomicUsize {
        // SAFETY: tp_status is the first field of a page-aligned slot header,
        // so it is aligned for usize (c_ulong has the same size); the mapping
        // lives as long as `self`.
        unsafe { &*(self.header(index) as *const AtomicUsize) }
    }

    fn load_status(&self, index: usize) -> usize {
        self.status_word(index).load(Ordering::Acquire)
    }

    fn store_status(&self, index: usize, status: usize) {
        self.status_word(index).store(status, Ordering::Release)
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) & (self.capacity - 1);
    }

    fn expect_direction(&self, direction: RingDirection, op: &'static str) -> Result<()> {
        if self.direction != direction {
            return Err(LinkError::RingProtocol(op));
        }
        Ok(())
    }

    /// Decoded status of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[must_use]
    pub fn status(&self, index: usize) -> SlotStatus {
        assert!(index < self.capacity, "slot {index} out of range");
        let raw = self.load_status(index);
        match self.direction {
            RingDirection::Rx if raw & TP_STATUS_USER == 0 => SlotStatus::AvailableToKernel,
            RingDirection::Rx if raw & TP_STATUS_COPY != 0 => SlotStatus::Error,
            RingDirection::Rx => SlotStatus::OwnedByUser,
            RingDirection::Tx if raw == TP_STATUS_AVAILABLE => SlotStatus::OwnedByUser,
            RingDirection::Tx if raw & TP_STATUS_WRONG_FORMAT != 0 => SlotStatus::Error,
            RingDirection::Tx => SlotStatus::SendRequested,
        }
    }

    /// Claim the RX slot at the cursor if the kernel has handed it over.
    ///
    /// A frame the kernel could only partially copy comes back with status
    /// [`SlotStatus::Error`]; it still has to be released. Claiming again
    /// before releasing returns the same slot. The cursor does not move.
    ///
    /// # Errors
    ///
    /// `RingProtocol` on a TX ring.
    pub fn acquire_for_read(&mut self) -> Result<Option<RingSlot>> {
        self.expect_direction(RingDirection::Rx, "acquire_for_read on a TX ring")?;

        let index = self.cursor;
        let raw = self.load_status(index);
        if raw & TP_STATUS_USER == 0 {
            return Ok(None);
        }
        if raw & TP_STATUS_LOSING != 0 && !self.claimed {
            self.report_loss(index);
        }

        let hdr = self.header(index);
        // SAFETY: TP_STATUS_USER hands the slot to user space; the kernel
        // does not touch the header until it is released. The Acquire load
        // above orders these reads after the kernel's writes.
        let (wire_len, snaplen, mac) = unsafe {
            (
                ptr::addr_of!((*hdr).tp_len).read(),
                ptr::addr_of!((*hdr).tp_snaplen).read(),
                ptr::addr_of!((*hdr).tp_mac).read(),
            )
        };
        let payload_offset = usize::from(mac).min(self.frame_size);
        let frame_bytes = (snaplen as usize).min(self.frame_size - payload_offset);
        let status = if raw & TP_STATUS_COPY != 0 {
            SlotStatus::Error
        } else {
            SlotStatus::OwnedByUser
        };

        self.claimed = true;
        Ok(Some(RingSlot {
            index,
            status,
            header_offset: index * self.frame_size,
            payload_offset,
            frame_bytes,
            wire_len: wire_len as usize,
        }))
    }

    fn report_loss(&mut self, index: usize) {
        self.loss_reports += 1;
        // Reading the counters resets them and clears TP_STATUS_LOSING
        match self.fd.map(raw::packet_statistics) {
            Some(Ok(stats)) => warn!(
                slot = index,
                packets = stats.tp_packets,
                drops = stats.tp_drops,
                "kernel dropped frames, RX ring full"
            ),
            Some(Err(e)) => warn!(slot = index, error = %e, "kernel dropped frames, RX ring full"),
            None => warn!(slot = index, "kernel dropped frames, RX ring full"),
        }
    }

    /// Frame bytes of the claimed RX slot.
    ///
    /// # Errors
    ///
    /// `RingProtocol` unless `slot` is the currently claimed slot.
    pub fn payload(&self, slot: &RingSlot) -> Result<&[u8]> {
        if !self.claimed || slot.index != self.cursor {
            return Err(LinkError::RingProtocol("payload of a slot that is not claimed"));
        }
        let start = slot.header_offset + slot.payload_offset;
        debug_assert!(start + slot.frame_bytes <= self.mapping.len);
        // SAFETY: the slot is owned by user space until released and the
        // range was clamped to the slot when it was claimed.
        Ok(unsafe { slice::from_raw_parts(self.mapping.ptr.as_ptr().add(start), slot.frame_bytes) })
    }

    /// Hand the claimed RX slot back to the kernel and advance the cursor.
    ///
    /// # Errors
    ///
    /// `RingProtocol` if no slot is claimed.
    pub fn release_after_read(&mut self) -> Result<()> {
        if !self.claimed {
            return Err(LinkError::RingProtocol("release_after_read without a claimed slot"));
        }
        self.store_status(self.cursor, TP_STATUS_KERNEL);
        self.claimed = false;
        self.advance();
        Ok(())
    }

    /// Claim the TX slot at the cursor if the kernel is done with it.
    ///
    /// A slot the kernel rejected (`TP_STATUS_WRONG_FORMAT`) is returned
    /// with status [`SlotStatus::Error`] and may be overwritten.
    ///
    /// # Errors
    ///
    /// `RingProtocol` on an RX ring.
    pub fn acquire_for_write(&mut self) -> Result<Option<RingSlot>> {
        self.expect_direction(RingDirection::Tx, "acquire_for_write on an RX ring")?;

        let index = self.cursor;
        let raw = self.load_status(index);
        let status = if raw == TP_STATUS_AVAILABLE {
            SlotStatus::OwnedByUser
        } else if raw & TP_STATUS_WRONG_FORMAT != 0 {
            SlotStatus::Error
        } else {
            debug_assert!(raw & (TP_STATUS_SEND_REQUEST | TP_STATUS_SENDING) != 0);
            return Ok(None);
        };

        Ok(Some(RingSlot {
            index,
            status,
            header_offset: index * self.frame_size,
            payload_offset: TX_DATA_OFFSET,
            frame_bytes: self.frame_size - TX_DATA_OFFSET,
            wire_len: 0,
        }))
    }

    /// Copy `frame` into `slot`, mark it for sending, advance the cursor and
    /// kick the kernel. Returns without waiting for the transmission.
    ///
    /// # Errors
    ///
    /// `Frame(PayloadTooLarge)` if `frame` does not fit the slot,
    /// `RingProtocol` if `slot` is not the slot at the cursor, `Transport` if
    /// the kernel notification fails (the frame stays queued).
    pub fn submit_write(&mut self, slot: RingSlot, frame: &[u8]) -> Result<()> {
        self.expect_direction(RingDirection::Tx, "submit_write on an RX ring")?;
        if slot.index != self.cursor || slot.status == SlotStatus::SendRequested {
            return Err(LinkError::RingProtocol("submit_write on a slot not acquired at the cursor"));
        }
        if frame.len() > slot.frame_bytes {
            return Err(FrameError::PayloadTooLarge {
                kind: FrameKind::Raw,
                maximum: slot.frame_bytes,
                actual: frame.len(),
            }
            .into());
        }

        let hdr = self.header(slot.index);
        // SAFETY: the slot is AVAILABLE (or WRONG_FORMAT), so the kernel does
        // not read it until the SEND_REQUEST store below; the copy stays
        // inside the slot because frame.len() <= frame_size - TX_DATA_OFFSET.
        unsafe {
            ptr::copy_nonoverlapping(
                frame.as_ptr(),
                (hdr as *mut u8).add(TX_DATA_OFFSET),
                frame.len(),
            );
            ptr::addr_of_mut!((*hdr).tp_len).write(frame.len() as u32);
        }
        self.store_status(slot.index, TP_STATUS_SEND_REQUEST);
        self.advance();

        if let Some(fd) = self.fd {
            raw::flush_tx_ring(fd).map_err(|e| LinkError::transport("tx ring flush", e))?;
        }
        Ok(())
    }

    /// Unmap the ring.
    ///
    /// # Errors
    ///
    /// `Resource` if `munmap` fails.
    pub fn close(self) -> Result<()> {
        let direction = self.direction;
        self.mapping
            .unmap()
            .map_err(|e| LinkError::Resource { op: "munmap", source: e })?;
        debug!(?direction, "unmapped packet ring");
        Ok(())
    }
}

/// Kernel side of the ring protocol for tests on anonymous rings.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) const FRAME_OFFSET: u16 = 64;

    /// Deliver `bytes` (wire length `wire_len`) into RX slot `index`.
    pub(crate) fn kernel_deliver(ring: &RingChannel, index: usize, bytes: &[u8], wire_len: u32, flags: usize) {
        let hdr = ring.header(index);
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                (hdr as *mut u8).add(FRAME_OFFSET as usize),
                bytes.len(),
            );
            ptr::addr_of_mut!((*hdr).tp_len).write(wire_len);
            ptr::addr_of_mut!((*hdr).tp_snaplen).write(bytes.len() as u32);
            ptr::addr_of_mut!((*hdr).tp_mac).write(FRAME_OFFSET);
        }
        ring.store_status(index, TP_STATUS_USER | flags);
    }

    /// Finish a transmission of TX slot `index` with `status`.
    pub(crate) fn kernel_complete(ring: &RingChannel, index: usize, status: usize) {
        ring.store_status(index, status);
    }

    /// Frame bytes queued in TX slot `index`.
    pub(crate) fn queued_frame(ring: &RingChannel, index: usize) -> Vec<u8> {
        let hdr = ring.header(index);
        unsafe {
            let len = ptr::addr_of!((*hdr).tp_len).read() as usize;
            slice::from_raw_parts((hdr as *const u8).add(TX_DATA_OFFSET), len).to_vec()
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_rx_cursor_tracks_releases(
            shift in 1u32..6,
            ops in prop::collection::vec(any::<bool>(), 1..200),
        ) {
            let capacity = 1u32 << shift;
            let mut ring = RingChannel::anonymous(RingDirection::Rx, capacity).unwrap();
            let mut released = 0usize;
            for deliver in ops {
                if deliver {
                    ring.store_status(ring.cursor(), TP_STATUS_USER);
                }
                match ring.acquire_for_read().unwrap() {
                    Some(slot) => {
                        prop_assert_eq!(slot.index(), released % capacity as usize);
                        ring.release_after_read().unwrap();
                        released += 1;
                    }
                    None => prop_assert!(!deliver),
                }
                prop_assert_eq!(ring.cursor(), released % capacity as usize);
            }
        }
    }
}
