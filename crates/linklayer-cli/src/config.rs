//! Session configuration: an optional TOML file overlaid by command-line
//! values, validated into an immutable [`SessionConfig`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use linklayer_core::FrameKind;
use linklayer_transport::interface::MAX_INTERFACE_NAME;
use linklayer_transport::ring::{DEFAULT_RING_FRAMES, tx_slot_capacity};
use linklayer_transport::{LinkConfig, Role, TrafficOptions};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Longest accepted transmit delay.
pub const MAX_TX_DELAY_MS: u64 = 1000;

/// Payload bytes per test frame unless configured otherwise.
pub const DEFAULT_PAYLOAD_LEN: usize = 10;

/// Shortest raw frame an Ethernet-type link accepts from a sender without
/// `CAP_SYS_RAWIO`: one link-layer header.
pub const MIN_RAW_TX_LEN: usize = 14;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Neither or both of transmit and receive selected
    #[error("Exactly one of --tx <DELAY_MS> or --rx must be given")]
    MissingMode,

    /// A required setting has no value
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// Transmit delay out of range
    #[error("tx_delay must be 1..={MAX_TX_DELAY_MS} ms, got {0}")]
    TxDelay(u64),

    /// SAP out of range
    #[error("link_sap must be 1..=0xFFFF, got {0}")]
    LinkSap(u32),

    /// Empty interface name
    #[error("Interface name must not be empty")]
    EmptyInterface,

    /// Ring size not a power of two >= 2
    #[error("ring_frames must be a power of two >= 2, got {0}")]
    RingFrames(u32),

    /// Test payload does not fit the frame kind or ring slot
    #[error("payload_len {actual} exceeds the {maximum} bytes a {kind} frame can carry here")]
    PayloadTooLarge {
        /// Frame kind
        kind: FrameKind,
        /// Largest payload allowed
        maximum: usize,
        /// Requested payload
        actual: usize,
    },

    /// Raw test frame shorter than a link-layer header
    #[error("payload_len {actual} is below the {minimum} bytes the kernel accepts for a raw frame")]
    PayloadTooShort {
        /// Smallest payload allowed
        minimum: usize,
        /// Requested payload
        actual: usize,
    },
}

/// Transmitter or receiver, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Send test frames
    Transmit,
    /// Receive and decode frames
    Receive,
}

/// Unvalidated settings from a config file or the command line.
///
/// Every field is optional so that partial sources can be layered with
/// [`Config::overlay`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transmit or receive
    pub mode: Option<Mode>,
    /// Delay between transmitted frames, milliseconds
    pub tx_delay_ms: Option<u64>,
    /// SAP / ethertype
    pub link_sap: Option<u32>,
    /// Interface name
    pub interface: Option<String>,
    /// Frame kind
    pub frame: Option<FrameKind>,
    /// Use PACKET_MMAP rings
    pub ring: Option<bool>,
    /// Ring slots per direction
    pub ring_frames: Option<u32>,
    /// Payload bytes per transmitted frame
    pub payload_len: Option<usize>,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `top` values win; unset ones fall back to `self`.
    #[must_use]
    pub fn overlay(self, top: Config) -> Config {
        Config {
            mode: top.mode.or(self.mode),
            tx_delay_ms: top.tx_delay_ms.or(self.tx_delay_ms),
            link_sap: top.link_sap.or(self.link_sap),
            interface: top.interface.or(self.interface),
            frame: top.frame.or(self.frame),
            ring: top.ring.or(self.ring),
            ring_frames: top.ring_frames.or(self.ring_frames),
            payload_len: top.payload_len.or(self.payload_len),
        }
    }

    /// Check every setting and produce the session configuration.
    pub fn validate(&self) -> Result<SessionConfig, ConfigError> {
        let role = match self.mode {
            Some(Mode::Transmit) => Role::Transmitter,
            Some(Mode::Receive) => Role::Receiver,
            None => return Err(ConfigError::MissingMode),
        };

        let tx_delay = match role {
            Role::Transmitter => {
                let ms = self.tx_delay_ms.ok_or(ConfigError::Missing("tx_delay_ms"))?;
                if ms == 0 || ms > MAX_TX_DELAY_MS {
                    return Err(ConfigError::TxDelay(ms));
                }
                Duration::from_millis(ms)
            }
            Role::Receiver => Duration::ZERO,
        };

        let sap = self.link_sap.ok_or(ConfigError::Missing("link_sap"))?;
        let link_sap = match u16::try_from(sap) {
            Ok(sap) if sap > 0 => sap,
            _ => return Err(ConfigError::LinkSap(sap)),
        };

        let interface = self.interface.as_deref().ok_or(ConfigError::Missing("interface"))?;
        if interface.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        let interface = truncate_interface_name(interface);

        let frame_kind = self.frame.ok_or(ConfigError::Missing("frame"))?;

        let ring_frames = if self.ring.unwrap_or(false) {
            let frames = self.ring_frames.unwrap_or(DEFAULT_RING_FRAMES);
            if frames < 2 || !frames.is_power_of_two() {
                return Err(ConfigError::RingFrames(frames));
            }
            Some(frames)
        } else {
            None
        };

        let raw_transmitter = role == Role::Transmitter && frame_kind == FrameKind::Raw;
        let payload_len = match self.payload_len {
            Some(len) if raw_transmitter && len < MIN_RAW_TX_LEN => {
                return Err(ConfigError::PayloadTooShort {
                    minimum: MIN_RAW_TX_LEN,
                    actual: len,
                });
            }
            Some(len) => len,
            None if raw_transmitter => MIN_RAW_TX_LEN,
            None => DEFAULT_PAYLOAD_LEN,
        };
        let mut maximum = frame_kind.max_payload();
        if ring_frames.is_some() && role == Role::Transmitter {
            maximum = maximum.min(tx_slot_capacity().saturating_sub(frame_kind.header_len()));
        }
        if payload_len > maximum {
            return Err(ConfigError::PayloadTooLarge {
                kind: frame_kind,
                maximum,
                actual: payload_len,
            });
        }

        Ok(SessionConfig {
            role,
            interface,
            frame_kind,
            link_sap,
            tx_delay,
            ring_frames,
            payload_len,
        })
    }
}

fn truncate_interface_name(name: &str) -> String {
    if name.len() <= MAX_INTERFACE_NAME {
        return name.to_string();
    }
    let mut end = MAX_INTERFACE_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        length = name.len(),
        maximum = MAX_INTERFACE_NAME,
        "interface name too long, truncating to {:?}",
        &name[..end]
    );
    name[..end].to_string()
}

/// Validated, immutable session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Transmitter or receiver
    pub role: Role,
    /// Interface name, at most 15 bytes
    pub interface: String,
    /// Frame kind
    pub frame_kind: FrameKind,
    /// SAP / ethertype
    pub link_sap: u16,
    /// Delay between transmitted frames; zero for a receiver
    pub tx_delay: Duration,
    /// `Some(frames)` in ring mode
    pub ring_frames: Option<u32>,
    /// Payload bytes per transmitted frame
    pub payload_len: usize,
}

impl SessionConfig {
    /// Link socket settings.
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            role: self.role,
            interface: self.interface.clone(),
            frame_kind: self.frame_kind,
            link_sap: self.link_sap,
            ring_frames: self.ring_frames,
        }
    }

    /// Per-frame traffic settings.
    #[must_use]
    pub fn traffic(&self) -> TrafficOptions {
        TrafficOptions {
            payload_len: self.payload_len,
            tx_delay: self.tx_delay,
        }
    }

    /// Log the configuration at startup.
    pub fn log(&self) {
        info!(
            role = %self.role,
            interface = %self.interface,
            frame = %self.frame_kind,
            link_sap = format_args!("0x{:04X}", self.link_sap),
            tx_delay_ms = self.tx_delay.as_millis() as u64,
            ring_frames = self.ring_frames.unwrap_or(0),
            payload_len = self.payload_len,
            "configuration"
        );
    }
}
