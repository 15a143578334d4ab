//! Interface identity lookup.

use std::ffi::CString;
use std::io::Error;
use std::os::fd::AsRawFd;

use libc::c_char;
use linklayer_core::MacAddr;
use socket2::{Domain, Socket, Type};
use tracing::debug;

use crate::error::{LinkError, Result};

/// Longest interface name, excluding the NUL (`IFNAMSIZ - 1`).
pub const MAX_INTERFACE_NAME: usize = libc::IFNAMSIZ - 1;

/// A resolved network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIdentity {
    /// Interface name
    pub name: String,
    /// Kernel interface index
    pub index: u32,
    /// Hardware address
    pub mac: MacAddr,
}

/// Resolves interface names to their index and hardware address.
pub trait InterfaceResolver {
    /// Look up `name`.
    ///
    /// # Errors
    ///
    /// `InterfaceNotFound` if no such interface exists, `PermissionDenied`
    /// if the lookup is not allowed.
    fn resolve(&self, name: &str) -> Result<InterfaceIdentity>;
}

/// Resolver backed by `if_nametoindex` and `ioctl(SIOCGIFHWADDR)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

/// `struct ifreq` restricted to the `ifr_hwaddr` member of its union.
#[repr(C)]
struct IfreqHwaddr {
    ifr_name: [c_char; libc::IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
    // Pads the union to sizeof(struct ifmap)
    _pad: [u8; 8],
}

impl InterfaceResolver for SystemResolver {
    fn resolve(&self, name: &str) -> Result<InterfaceIdentity> {
        if name.is_empty() || name.len() > MAX_INTERFACE_NAME {
            return Err(LinkError::Configuration(format!(
                "interface name must be 1..={MAX_INTERFACE_NAME} bytes, got {:?}",
                name
            )));
        }
        let c_name = CString::new(name)
            .map_err(|e| LinkError::Configuration(format!("Invalid interface name: {e}")))?;

        // SAFETY: if_nametoindex is a standard POSIX function that takes a
        // null-terminated C string; CString guarantees the terminator.
        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if index == 0 {
            let err = Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => {
                    LinkError::PermissionDenied(format!("if_nametoindex({name})"))
                }
                _ => LinkError::InterfaceNotFound(name.to_string()),
            });
        }

        let mac = hardware_address(name)?;
        debug!(interface = name, ifindex = index, %mac, "resolved interface");

        Ok(InterfaceIdentity {
            name: name.to_string(),
            index,
            mac,
        })
    }
}

fn hardware_address(name: &str) -> Result<MacAddr> {
    let probe = Socket::new(Domain::IPV4, Type::DGRAM, None)
        .map_err(|e| LinkError::setup("SIOCGIFHWADDR probe socket", e))?;

    // SAFETY: IfreqHwaddr is plain C data; all-zero is a valid value.
    let mut req: IfreqHwaddr = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(name.bytes()) {
        *dst = src as c_char;
    }

    // SAFETY: ioctl is a standard POSIX syscall. SIOCGIFHWADDR reads the
    // NUL-terminated name and writes a sockaddr into `req`, which is sized
    // like struct ifreq.
    let ret = unsafe { libc::ioctl(probe.as_raw_fd(), libc::SIOCGIFHWADDR, &mut req) };
    if ret < 0 {
        let err = Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENXIO) => LinkError::InterfaceNotFound(name.to_string()),
            _ => LinkError::setup("SIOCGIFHWADDR", err),
        });
    }

    let mut bytes = [0u8; 6];
    for (dst, src) in bytes.iter_mut().zip(req.ifr_hwaddr.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddr::new(bytes))
}
