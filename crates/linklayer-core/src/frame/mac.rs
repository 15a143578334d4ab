use std::fmt;
use std::str::FromStr;

use crate::error::ParseMacError;

/// 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Length of a hardware address in bytes.
    pub const LEN: usize = 6;

    /// `FF:FF:FF:FF:FF:FF`
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    /// `00:00:00:00:00:00`
    pub const ZERO: MacAddr = MacAddr([0x00; 6]);

    /// Wrap raw address bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Read an address from the first six bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf.len() < 6`.
    #[must_use]
    pub fn from_slice(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&buf[..Self::LEN]);
        Self(bytes)
    }

    /// Address bytes.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Address bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the broadcast address.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Whether the group bit is set.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_uppercase() {
        let mac = MacAddr::new([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        assert_eq!(mac.to_string(), "00:1A:2B:3C:4D:5E");
        assert_eq!(MacAddr::BROADCAST.to_string(), "FF:FF:FF:FF:FF:FF");
    }

    #[test]
    fn test_mac_parse() {
        let mac: MacAddr = "00:1a:2B:3c:4D:5e".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
        assert_eq!("ff-ff-ff-ff-ff-ff".parse::<MacAddr>().unwrap(), MacAddr::BROADCAST);
    }

    #[test]
    fn test_mac_parse_rejects_malformed() {
        for bad in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "0:11:22:33:44:55", "zz:11:22:33:44:55"] {
            assert!(bad.parse::<MacAddr>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_mac_flags() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!MacAddr::ZERO.is_multicast());
        assert!(MacAddr::new([0x01, 0x00, 0x5E, 0, 0, 1]).is_multicast());
    }
}
