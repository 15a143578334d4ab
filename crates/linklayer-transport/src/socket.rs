//! Link sockets: the interface binding, its descriptors and optional rings.
//!
//! ```text
//! Undefined --open--> Ready --bind--> Bound --start--> Running <--start-- Paused
//!     |                 |               |                 |                 ^
//!     +--- failure -----+--> Failed     |                 +------stop-------+
//!
//! any state --close--> Closed
//! ```

use std::fmt;
use std::mem;
use std::os::fd::AsFd;
use std::time::Duration;

use linklayer_core::FrameKind;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::handler::{FrameReceiver, FrameTransmitter, TransmitPlan};
use crate::interface::{InterfaceIdentity, InterfaceResolver};
use crate::raw::{ETH_P_ALL, RawSocket};
use crate::reactor::{Readiness, Watcher};
use crate::ring::{RingChannel, RingDirection};

/// Which way frames flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends test frames
    Transmitter,
    /// Receives and decodes frames
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Transmitter => write!(f, "transmitter"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Link socket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Created, nothing opened
    Undefined,
    /// Interface resolved, descriptors open
    Ready,
    /// Bound to the interface, rings mapped
    Bound,
    /// Frames flowing
    Running,
    /// Stopped after running
    Paused,
    /// Resources released
    Closed,
    /// Setup failed
    Failed,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketState::Undefined => write!(f, "undefined"),
            SocketState::Ready => write!(f, "ready"),
            SocketState::Bound => write!(f, "bound"),
            SocketState::Running => write!(f, "running"),
            SocketState::Paused => write!(f, "paused"),
            SocketState::Closed => write!(f, "closed"),
            SocketState::Failed => write!(f, "failed"),
        }
    }
}

/// What a link socket binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Transmitter or receiver
    pub role: Role,
    /// Interface name
    pub interface: String,
    /// Framing carried on the socket
    pub frame_kind: FrameKind,
    /// SAP / ethertype the transmitter binds and sends with
    pub link_sap: u16,
    /// `Some(frames)` selects PACKET_MMAP rings of that many slots
    pub ring_frames: Option<u32>,
}

/// Per-frame traffic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficOptions {
    /// Zero bytes of payload per transmitted frame
    pub payload_len: usize,
    /// Delay between transmitted frames
    pub tx_delay: Duration,
}

// Rings come before the sockets so that a drop unmaps before closing.
enum Transport {
    Unopened,
    Direct(RawSocket),
    Ring {
        rx_ring: Option<RingChannel>,
        tx_ring: Option<RingChannel>,
        rx: RawSocket,
        tx: RawSocket,
    },
}

/// A raw link-layer socket bound to one interface.
pub struct LinkSocket {
    config: LinkConfig,
    state: SocketState,
    identity: Option<InterfaceIdentity>,
    transport: Transport,
}

impl LinkSocket {
    /// Create an unopened socket.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: SocketState::Undefined,
            identity: None,
            transport: Transport::Unopened,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Configuration the socket was created with.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Resolved interface, once open.
    #[must_use]
    pub fn identity(&self) -> Option<&InterfaceIdentity> {
        self.identity.as_ref()
    }

    /// Whether the socket exchanges frames through PACKET_MMAP rings.
    #[must_use]
    pub fn uses_ring(&self) -> bool {
        self.config.ring_frames.is_some()
    }

    /// Resolve the interface and open the descriptors: one socket in
    /// direct mode, a TX/RX pair in ring mode.
    ///
    /// # Errors
    ///
    /// `InterfaceNotFound` or `PermissionDenied` from resolution or socket
    /// creation, `InvalidState` unless the socket is `Undefined`. Any
    /// failure leaves the socket `Failed`.
    pub fn open(&mut self, resolver: &dyn InterfaceResolver) -> Result<()> {
        self.expect_state("open", &[SocketState::Undefined])?;
        let outcome = self.open_descriptors(resolver);
        self.settle("open", outcome, SocketState::Ready)
    }

    fn open_descriptors(&mut self, resolver: &dyn InterfaceResolver) -> Result<()> {
        let identity = resolver.resolve(&self.config.interface)?;
        self.transport = if self.uses_ring() {
            Transport::Ring {
                rx_ring: None,
                tx_ring: None,
                rx: RawSocket::open()?,
                tx: RawSocket::open()?,
            }
        } else {
            Transport::Direct(RawSocket::open()?)
        };
        info!(
            role = %self.config.role,
            interface = %identity.name,
            ifindex = identity.index,
            mac = %identity.mac,
            ring = self.uses_ring(),
            "opened link socket"
        );
        self.identity = Some(identity);
        Ok(())
    }

    /// Bind to the interface. The transmitter binds to the link SAP; the
    /// receiver binds to every ethertype and joins promiscuous membership.
    /// In ring mode both rings are mapped first.
    ///
    /// # Errors
    ///
    /// `Resource` or `PermissionDenied` if the kernel rejects a step,
    /// `InvalidState` unless the socket is `Ready`. Any failure leaves the
    /// socket `Failed`.
    pub fn bind(&mut self) -> Result<()> {
        self.expect_state("bind", &[SocketState::Ready])?;
        let outcome = self.bind_descriptors();
        self.settle("bind", outcome, SocketState::Bound)
    }

    fn bind_descriptors(&mut self) -> Result<()> {
        let ifindex = self
            .identity
            .as_ref()
            .map(|identity| identity.index)
            .ok_or_else(|| LinkError::ResourceUnavailable("interface not resolved".to_string()))?;
        let role = self.config.role;
        let sap = self.config.link_sap;

        match &mut self.transport {
            Transport::Unopened => {
                return Err(LinkError::ResourceUnavailable("socket not opened".to_string()));
            }
            Transport::Direct(socket) => match role {
                Role::Transmitter => bind(socket, ifindex, sap)?,
                Role::Receiver => {
                    bind(socket, ifindex, ETH_P_ALL)?;
                    join_promiscuous(socket, ifindex)?;
                }
            },
            Transport::Ring {
                rx_ring,
                tx_ring,
                rx,
                tx,
            } => {
                let frames = self.config.ring_frames.unwrap_or(crate::ring::DEFAULT_RING_FRAMES);
                *rx_ring = Some(RingChannel::open(rx, RingDirection::Rx, frames)?);
                *tx_ring = Some(RingChannel::open(tx, RingDirection::Tx, frames)?);
                match role {
                    Role::Transmitter => {
                        bind(tx, ifindex, sap)?;
                        bind(rx, ifindex, 0)?;
                    }
                    Role::Receiver => {
                        bind(tx, ifindex, 0)?;
                        bind(rx, ifindex, ETH_P_ALL)?;
                        join_promiscuous(rx, ifindex)?;
                    }
                }
            }
        }
        debug!(ifindex, sap = format_args!("0x{sap:04X}"), role = %role, "bound link socket");
        Ok(())
    }

    /// `Bound | Paused -> Running`.
    ///
    /// # Errors
    ///
    /// `InvalidState` from any other state.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", &[SocketState::Bound, SocketState::Paused])?;
        self.state = SocketState::Running;
        info!(role = %self.config.role, "link socket running");
        Ok(())
    }

    /// `Running -> Paused`.
    ///
    /// # Errors
    ///
    /// `InvalidState` from any other state.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_state("stop", &[SocketState::Running])?;
        self.state = SocketState::Paused;
        info!(role = %self.config.role, "link socket paused");
        Ok(())
    }

    /// Reactor registration for the socket's role: the receive callback on
    /// the RX descriptor, or the transmit callback on the TX descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Running`; `Resource` if the runtime refuses
    /// the descriptor.
    pub fn watcher(&mut self, traffic: &TrafficOptions) -> Result<Watcher<'_>> {
        self.expect_state("watch", &[SocketState::Running])?;
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| LinkError::ResourceUnavailable("interface not resolved".to_string()))?;
        let kind = self.config.frame_kind;
        let plan = TransmitPlan {
            kind,
            source: identity.mac,
            link_sap: self.config.link_sap,
            ifindex: identity.index,
            payload_len: traffic.payload_len,
            delay: traffic.tx_delay,
        };

        match (&mut self.transport, self.config.role) {
            (Transport::Direct(socket), Role::Receiver) => {
                let socket = &*socket;
                Watcher::new(
                    "rx",
                    socket.as_fd(),
                    Readiness::Readable,
                    Box::new(FrameReceiver::direct(socket, kind)),
                )
            }
            (Transport::Direct(socket), Role::Transmitter) => {
                let socket = &*socket;
                Watcher::new(
                    "tx",
                    socket.as_fd(),
                    Readiness::Writable,
                    Box::new(FrameTransmitter::direct(socket, plan)),
                )
            }
            (
                Transport::Ring {
                    rx_ring: Some(ring),
                    rx,
                    ..
                },
                Role::Receiver,
            ) => {
                let rx = &*rx;
                Watcher::new(
                    "rx-ring",
                    rx.as_fd(),
                    Readiness::Readable,
                    Box::new(FrameReceiver::ring(ring, kind)),
                )
            }
            (
                Transport::Ring {
                    tx_ring: Some(ring),
                    tx,
                    ..
                },
                Role::Transmitter,
            ) => {
                let tx = &*tx;
                Watcher::new(
                    "tx-ring",
                    tx.as_fd(),
                    Readiness::Writable,
                    Box::new(FrameTransmitter::ring(ring, plan)),
                )
            }
            _ => Err(LinkError::ResourceUnavailable(
                "no descriptor for the socket's role".to_string(),
            )),
        }
    }

    /// Release everything: rings are unmapped before any descriptor is
    /// closed. Every step runs even when an earlier one fails.
    ///
    /// Always leaves the socket `Closed`; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// The failing step's error, `Teardown` listing all of them when more
    /// than one step failed. A ring socket whose rings were never mapped
    /// reports `ResourceUnavailable`.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SocketState::Closed {
            return Ok(());
        }
        let mut failures = Vec::new();

        match mem::replace(&mut self.transport, Transport::Unopened) {
            Transport::Unopened => {
                if self.uses_ring() {
                    failures.push(LinkError::ResourceUnavailable(
                        "packet rings were never mapped".to_string(),
                    ));
                }
            }
            Transport::Direct(socket) => {
                if let Err(e) = socket.close() {
                    failures.push(LinkError::Resource { op: "close", source: e });
                }
            }
            Transport::Ring {
                rx_ring,
                tx_ring,
                rx,
                tx,
            } => {
                let mut unmapped = Vec::new();
                for (label, ring) in [("rx", rx_ring), ("tx", tx_ring)] {
                    match ring {
                        Some(ring) => {
                            if let Err(e) = ring.close() {
                                failures.push(e);
                            }
                        }
                        None => unmapped.push(label),
                    }
                }
                if !unmapped.is_empty() {
                    failures.push(LinkError::ResourceUnavailable(format!(
                        "{} ring never mapped",
                        unmapped.join("/")
                    )));
                }
                for socket in [rx, tx] {
                    if let Err(e) = socket.close() {
                        failures.push(LinkError::Resource { op: "close", source: e });
                    }
                }
            }
        }

        let previous = mem::replace(&mut self.state, SocketState::Closed);
        debug!(from = %previous, failures = failures.len(), "closed link socket");

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(LinkError::Teardown(failures)),
        }
    }

    fn expect_state(&self, op: &'static str, allowed: &[SocketState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LinkError::InvalidState { op, state: self.state })
        }
    }

    fn settle(&mut self, op: &'static str, outcome: Result<()>, next: SocketState) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                warn!(op, error = %e, "link socket setup failed");
                self.state = SocketState::Failed;
                Err(e)
            }
        }
    }
}

impl Drop for LinkSocket {
    fn drop(&mut self) {
        if self.state != SocketState::Closed {
            warn!(state = %self.state, "link socket dropped without close");
            if let Err(e) = self.close() {
                warn!(error = %e, "teardown on drop failed");
            }
        }
    }
}

impl fmt::Debug for LinkSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match &self.transport {
            Transport::Unopened => "unopened",
            Transport::Direct(_) => "direct",
            Transport::Ring { .. } => "ring",
        };
        f.debug_struct("LinkSocket")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("identity", &self.identity)
            .field("transport", &transport)
            .finish()
    }
}

fn bind(socket: &RawSocket, ifindex: u32, protocol: u16) -> Result<()> {
    socket.bind(ifindex, protocol).map_err(|e| LinkError::setup("bind", e))
}

fn join_promiscuous(socket: &RawSocket, ifindex: u32) -> Result<()> {
    socket
        .join_promiscuous(ifindex)
        .map_err(|e| LinkError::setup("PACKET_ADD_MEMBERSHIP", e))
}
