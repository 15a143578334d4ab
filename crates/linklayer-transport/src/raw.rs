//! Raw `AF_PACKET` / `SOCK_RAW` sockets.
//!
//! [`RawSocket`] owns the descriptor through `socket2` and drops down to
//! `libc` for the packet-socket specific calls (`sockaddr_ll` binding,
//! `SOL_PACKET` options, `MSG_TRUNC` receives).

use std::io::{self, Error};
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::ptr;

use libc::{c_int, c_void};
use linklayer_core::MacAddr;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{LinkError, Result};

/// `ETH_P_ALL`: every ethertype.
pub const ETH_P_ALL: u16 = libc::ETH_P_ALL as u16;

/// Link-layer destination of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddr {
    /// Interface index
    pub ifindex: u32,
    /// Ethertype / SAP, host byte order
    pub protocol: u16,
    /// Destination hardware address
    pub dest: MacAddr,
}

impl LinkAddr {
    fn to_sockaddr(self) -> libc::sockaddr_ll {
        sockaddr_ll(self.ifindex, self.protocol, self.dest)
    }
}

/// Result of a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes copied into the buffer
    pub captured: usize,
    /// Frame length on the wire
    pub wire_len: usize,
}

impl Received {
    /// Whether the buffer was too small for the frame.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.captured < self.wire_len
    }
}

fn sockaddr_ll(ifindex: u32, protocol: u16, dest: MacAddr) -> libc::sockaddr_ll {
    let mut sll_addr = [0u8; 8];
    sll_addr[..MacAddr::LEN].copy_from_slice(dest.as_bytes());
    libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: protocol.to_be(),
        sll_ifindex: ifindex as i32,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: MacAddr::LEN as u8,
        sll_addr,
    }
}

/// Non-blocking link-layer socket.
#[derive(Debug)]
pub struct RawSocket {
    inner: Socket,
}

impl RawSocket {
    /// Open a non-blocking `AF_PACKET` raw socket.
    ///
    /// The socket receives nothing until [`bind`](Self::bind) picks a
    /// protocol and interface.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without `CAP_NET_RAW`, `Resource` otherwise.
    pub fn open() -> Result<Self> {
        let inner = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(0)))
            .map_err(|e| LinkError::setup("socket", e))?;
        inner
            .set_nonblocking(true)
            .map_err(|e| LinkError::setup("set_nonblocking", e))?;
        debug!(fd = inner.as_raw_fd(), "opened packet socket");
        Ok(Self { inner })
    }

    /// Bind to interface `ifindex`, receiving frames of `protocol`
    /// (`ETH_P_ALL` for every ethertype).
    pub fn bind(&self, ifindex: u32, protocol: u16) -> io::Result<()> {
        let addr = sockaddr_ll(ifindex, protocol, MacAddr::ZERO);

        // SAFETY: bind is a standard POSIX syscall. `addr` is a fully
        // initialized sockaddr_ll living for the duration of the call and the
        // length passed matches its size.
        match unsafe {
            libc::bind(
                self.as_raw_fd(),
                ptr::addr_of!(addr) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        } {
            0 => Ok(()),
            _ => Err(Error::last_os_error()),
        }
    }

    /// Join promiscuous membership on `ifindex`.
    pub fn join_promiscuous(&self, ifindex: u32) -> io::Result<()> {
        let req = libc::packet_mreq {
            mr_ifindex: ifindex as i32,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0u8; 8],
        };
        self.set_packet_option(libc::PACKET_ADD_MEMBERSHIP, &req)
    }

    /// `setsockopt(SOL_PACKET, name, value)`.
    pub fn set_packet_option<T>(&self, name: c_int, value: &T) -> io::Result<()> {
        // SAFETY: setsockopt is a standard POSIX syscall. `value` points to a
        // live `T` and the length passed is exactly `size_of::<T>()`; the
        // kernel validates option name and length.
        match unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_PACKET,
                name,
                value as *const T as *const c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        } {
            0 => Ok(()),
            _ => Err(Error::last_os_error()),
        }
    }

    /// Receive one frame into `buf`.
    ///
    /// `MSG_TRUNC` makes the kernel report the full wire length even when
    /// `buf` is shorter than the frame.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Received> {
        // SAFETY: recv is a standard POSIX syscall. `buf` is a valid, writable
        // region of `buf.len()` bytes; the kernel writes at most that many.
        match unsafe {
            libc::recv(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                libc::MSG_TRUNC,
            )
        } {
            ..=-1 => Err(Error::last_os_error()),
            n => {
                let wire_len = n as usize;
                Ok(Received {
                    captured: wire_len.min(buf.len()),
                    wire_len,
                })
            }
        }
    }

    /// Send one frame to `addr`. Returns the number of bytes the kernel
    /// accepted.
    pub fn send_to(&self, buf: &[u8], addr: &LinkAddr) -> io::Result<usize> {
        let sockaddr = addr.to_sockaddr();

        // SAFETY: sendto is a standard POSIX syscall. `buf` is valid for
        // `buf.len()` bytes and `sockaddr` is an initialized sockaddr_ll.
        match unsafe {
            libc::sendto(
                self.as_raw_fd(),
                buf.as_ptr() as *const c_void,
                buf.len(),
                0,
                ptr::addr_of!(sockaddr) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        } {
            ..=-1 => Err(Error::last_os_error()),
            sent => Ok(sent as usize),
        }
    }

    /// Close the descriptor, reporting the `close(2)` result.
    pub fn close(self) -> io::Result<()> {
        let fd = self.inner.into_raw_fd();

        // SAFETY: `into_raw_fd` released ownership of `fd`, so it is closed
        // exactly once, here.
        match unsafe { libc::close(fd) } {
            0 => {
                debug!(fd, "closed packet socket");
                Ok(())
            }
            _ => Err(Error::last_os_error()),
        }
    }
}

/// Zero-length send on `fd`: asks the kernel to transmit every slot of its
/// TX ring marked for sending. Does not wait for completion.
pub(crate) fn flush_tx_ring(fd: RawFd) -> io::Result<()> {
    // SAFETY: a zero-length send with a null buffer is the PACKET_TX_RING
    // kick; the kernel reads the frames from the mapped ring.
    match unsafe { libc::send(fd, ptr::null(), 0, libc::MSG_DONTWAIT) } {
        ..=-1 => Err(Error::last_os_error()),
        _ => Ok(()),
    }
}

/// `struct tpacket_stats` (linux/if_packet.h)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketStats {
    /// Frames seen by the socket
    pub tp_packets: u32,
    /// Frames dropped for lack of ring or buffer space
    pub tp_drops: u32,
}

const PACKET_STATISTICS: c_int = 6;

/// Read and reset the socket's receive counters. Reading also clears
/// `TP_STATUS_LOSING` on subsequent RX ring frames.
pub(crate) fn packet_statistics(fd: RawFd) -> io::Result<PacketStats> {
    let mut stats = PacketStats::default();
    let mut len = mem::size_of::<PacketStats>() as libc::socklen_t;

    // SAFETY: getsockopt is a standard POSIX syscall. `stats` is a writable
    // tpacket_stats and `len` holds its size.
    match unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_PACKET,
            PACKET_STATISTICS,
            ptr::addr_of_mut!(stats) as *mut c_void,
            &mut len,
        )
    } {
        0 => Ok(stats),
        _ => Err(Error::last_os_error()),
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl AsFd for RawSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_ll_layout() {
        let dest = MacAddr::BROADCAST;
        let addr = LinkAddr { ifindex: 3, protocol: 0x88B5, dest }.to_sockaddr();
        assert_eq!(addr.sll_family, libc::AF_PACKET as u16);
        assert_eq!(addr.sll_protocol, 0x88B5u16.to_be());
        assert_eq!(addr.sll_ifindex, 3);
        assert_eq!(addr.sll_halen, 6);
        assert_eq!(&addr.sll_addr[..6], &[0xFF; 6]);
        assert_eq!(&addr.sll_addr[6..], &[0, 0]);
    }

    #[test]
    fn test_received_truncation() {
        assert!(Received { captured: 1514, wire_len: 9000 }.is_truncated());
        assert!(!Received { captured: 60, wire_len: 60 }.is_truncated());
    }

    #[test]
    fn test_open_classifies_failures() {
        match RawSocket::open() {
            Ok(socket) => socket.close().unwrap(),
            // No CAP_NET_RAW, or a sandbox without AF_PACKET support
            Err(err) => assert!(
                matches!(
                    err,
                    LinkError::PermissionDenied(_) | LinkError::Resource { op: "socket", .. }
                ),
                "unexpected error: {err}"
            ),
        }
    }
}
