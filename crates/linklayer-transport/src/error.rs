//! Error types for the link-layer transport

use std::io;

use linklayer_core::FrameError;
use thiserror::Error;

use crate::socket::SocketState;

/// Errors raised by link sockets, rings and the reactor
#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid transport configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Interface name did not resolve
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Raw sockets need CAP_NET_RAW
    #[error("Permission denied during {0} (CAP_NET_RAW required)")]
    PermissionDenied(String),

    /// A kernel resource (socket, ring, mapping) could not be set up or torn down
    #[error("Resource error during {op}: {source}")]
    Resource {
        /// Operation that failed
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A resource that should exist was never created
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Sending or receiving a frame failed
    #[error("Transport error during {op}: {source}")]
    Transport {
        /// Operation that failed
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The kernel accepted fewer bytes than the frame holds
    #[error("Short send: wrote {written} of {requested} bytes")]
    ShortSend {
        /// Bytes written
        written: usize,
        /// Frame length
        requested: usize,
    },

    /// The kernel copied only part of a frame into a ring slot
    #[error("Ring slot {index} holds a partial frame: {captured} of {wire_len} bytes")]
    PartialDelivery {
        /// Slot index
        index: usize,
        /// Bytes in the slot
        captured: usize,
        /// Frame length on the wire
        wire_len: usize,
    },

    /// Ring ownership protocol misuse
    #[error("Ring protocol violation: {0}")]
    RingProtocol(&'static str),

    /// Frame build or decode failed
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Operation not allowed in the socket's current state
    #[error("Cannot {op} a socket in state {state:?}")]
    InvalidState {
        /// Attempted operation
        op: &'static str,
        /// State the socket was in
        state: SocketState,
    },

    /// One or more teardown steps failed
    #[error("Teardown failed: {}", join(.0))]
    Teardown(Vec<LinkError>),
}

fn join(errors: &[LinkError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl LinkError {
    /// Map an OS error from a setup step, singling out missing privileges.
    pub(crate) fn setup(op: &'static str, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => LinkError::PermissionDenied(op.to_string()),
            _ => LinkError::Resource { op, source },
        }
    }

    pub(crate) fn transport(op: &'static str, source: io::Error) -> Self {
        LinkError::Transport { op, source }
    }

    /// Whether the error leaves the descriptor or ring unusable.
    ///
    /// The reactor deregisters a watcher whose callback reports such an
    /// error; every other error is confined to the frame being handled.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            LinkError::Resource { .. }
                | LinkError::ResourceUnavailable(_)
                | LinkError::RingProtocol(_)
                | LinkError::InvalidState { .. }
                | LinkError::Teardown(_)
        )
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, LinkError>;
