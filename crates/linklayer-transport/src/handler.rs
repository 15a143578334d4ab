//! Frame callbacks: the receiver decodes one frame per readiness event, the
//! transmitter sends one test frame per event and then pauses.

use std::io::ErrorKind;
use std::time::Duration;

use linklayer_core::{Frame, FrameKind, MacAddr};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::raw::{LinkAddr, RawSocket};
use crate::reactor::{Callback, Dispatch};
use crate::ring::{RingChannel, SlotStatus};

enum Source<'a> {
    Socket(&'a RawSocket),
    Ring(&'a mut RingChannel),
}

/// Receives and logs frames of one kind.
pub struct FrameReceiver<'a> {
    source: Source<'a>,
    kind: FrameKind,
    buffer: Vec<u8>,
    received: u64,
}

impl<'a> FrameReceiver<'a> {
    /// Receive through `socket`.
    #[must_use]
    pub fn direct(socket: &'a RawSocket, kind: FrameKind) -> Self {
        Self {
            source: Source::Socket(socket),
            kind,
            buffer: vec![0u8; kind.max_frame_len()],
            received: 0,
        }
    }

    /// Receive from the RX ring `ring`.
    #[must_use]
    pub fn ring(ring: &'a mut RingChannel, kind: FrameKind) -> Self {
        Self {
            source: Source::Ring(ring),
            kind,
            buffer: Vec::new(),
            received: 0,
        }
    }

    /// Frames decoded so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    fn report(&mut self, frame: &Frame) {
        self.received += 1;
        let envelope = frame.envelope();
        info!(
            seq = self.received,
            kind = %envelope.kind(),
            len = envelope.length(),
            wire_len = envelope.wire_length(),
            ts_us = envelope.timestamp_micros(),
            "received frame\n{}",
            frame.describe()
        );
    }
}

impl Callback for FrameReceiver<'_> {
    fn on_ready(&mut self) -> Result<Dispatch> {
        let frame = match &mut self.source {
            Source::Socket(socket) => {
                let received = match socket.recv(&mut self.buffer) {
                    Ok(received) => received,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Dispatch::Idle),
                    Err(e) => return Err(LinkError::transport("recv", e)),
                };
                Frame::decode_captured(&self.buffer[..received.captured], self.kind, received.wire_len)?
            }
            Source::Ring(ring) => {
                let Some(slot) = ring.acquire_for_read()? else {
                    return Ok(Dispatch::Idle);
                };
                let decoded = if slot.status() == SlotStatus::Error {
                    Err(LinkError::PartialDelivery {
                        index: slot.index(),
                        captured: slot.frame_bytes(),
                        wire_len: slot.wire_len(),
                    })
                } else {
                    ring.payload(&slot).and_then(|bytes| {
                        Frame::decode_captured(bytes, self.kind, slot.wire_len()).map_err(LinkError::from)
                    })
                };
                // The slot goes back to the kernel whatever the decode result
                ring.release_after_read()?;
                decoded?
            }
        };
        self.report(&frame);
        Ok(Dispatch::Handled)
    }
}

/// What the transmitter sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitPlan {
    /// Frame kind
    pub kind: FrameKind,
    /// Source address, the interface's own
    pub source: MacAddr,
    /// SAP written as the 802.3 ethertype and used as the send protocol
    pub link_sap: u16,
    /// Interface to send on
    pub ifindex: u32,
    /// Zero bytes of payload per frame
    pub payload_len: usize,
    /// Inter-frame delay
    pub delay: Duration,
}

enum Sink<'a> {
    Socket(&'a RawSocket),
    Ring(&'a mut RingChannel),
}

/// Sends one broadcast test frame per readiness event, then pauses.
pub struct FrameTransmitter<'a> {
    sink: Sink<'a>,
    plan: TransmitPlan,
    sent: u64,
}

impl<'a> FrameTransmitter<'a> {
    /// Send through `socket`.
    #[must_use]
    pub fn direct(socket: &'a RawSocket, plan: TransmitPlan) -> Self {
        Self {
            sink: Sink::Socket(socket),
            plan,
            sent: 0,
        }
    }

    /// Queue into the TX ring `ring`.
    #[must_use]
    pub fn ring(ring: &'a mut RingChannel, plan: TransmitPlan) -> Self {
        Self {
            sink: Sink::Ring(ring),
            plan,
            sent: 0,
        }
    }

    /// Frames handed to the kernel so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Callback for FrameTransmitter<'_> {
    fn on_ready(&mut self) -> Result<Dispatch> {
        let plan = self.plan;
        let frame = Frame::synthetic(plan.kind, plan.source, plan.link_sap, plan.payload_len)?;
        let bytes = frame.encode();

        match &mut self.sink {
            Sink::Socket(socket) => {
                let dest = LinkAddr {
                    ifindex: plan.ifindex,
                    protocol: plan.link_sap,
                    dest: MacAddr::BROADCAST,
                };
                let written = match socket.send_to(&bytes, &dest) {
                    Ok(written) => written,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Dispatch::Idle),
                    Err(e) => return Err(LinkError::transport("sendto", e)),
                };
                if written != bytes.len() {
                    return Err(LinkError::ShortSend {
                        written,
                        requested: bytes.len(),
                    });
                }
            }
            Sink::Ring(ring) => {
                let Some(slot) = ring.acquire_for_write()? else {
                    return Ok(Dispatch::Idle);
                };
                if slot.status() == SlotStatus::Error {
                    warn!(slot = slot.index(), "kernel rejected the frame previously queued in this slot");
                }
                ring.submit_write(slot, &bytes)?;
            }
        }

        self.sent += 1;
        debug!(seq = self.sent, kind = %plan.kind, len = bytes.len(), "sent frame");
        Ok(Dispatch::Pause(plan.delay))
    }

    fn after_error(&self) -> Dispatch {
        // A failed frame is dropped; the next one goes out on schedule
        Dispatch::Pause(self.plan.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::testing::{kernel_complete, kernel_deliver, queued_frame};
    use crate::ring::{RingDirection, TP_STATUS_AVAILABLE, TP_STATUS_COPY, TP_STATUS_WRONG_FORMAT};

    fn plan(kind: FrameKind) -> TransmitPlan {
        TransmitPlan {
            kind,
            source: MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            link_sap: 0x88B5,
            ifindex: 1,
            payload_len: 10,
            delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_ring_transmitter_queues_test_frame() {
        let mut ring = RingChannel::anonymous(RingDirection::Tx, 2).unwrap();
        {
            let mut tx = FrameTransmitter::ring(&mut ring, plan(FrameKind::Ieee8023));
            assert_eq!(tx.on_ready().unwrap(), Dispatch::Pause(Duration::from_millis(5)));
            assert_eq!(tx.sent(), 1);
        }
        let queued = queued_frame(&ring, 0);
        let frame = Frame::decode(&queued, FrameKind::Ieee8023).unwrap();
        let Frame::Ieee8023(frame) = frame else {
            panic!("expected an 802.3 frame");
        };
        assert_eq!(frame.dest(), MacAddr::BROADCAST);
        assert_eq!(frame.ethertype(), 0x88B5);
        assert_eq!(frame.payload(), &[0u8; 10]);
    }

    #[test]
    fn test_ring_transmitter_idles_on_full_ring() {
        let mut ring = RingChannel::anonymous(RingDirection::Tx, 2).unwrap();
        let mut tx = FrameTransmitter::ring(&mut ring, plan(FrameKind::Ieee80211));
        tx.on_ready().unwrap();
        tx.on_ready().unwrap();
        assert_eq!(tx.on_ready().unwrap(), Dispatch::Idle);
        assert_eq!(tx.sent(), 2);
    }

    #[test]
    fn test_ring_transmitter_reuses_rejected_slot() {
        let mut ring = RingChannel::anonymous(RingDirection::Tx, 2).unwrap();
        kernel_complete(&ring, 0, TP_STATUS_WRONG_FORMAT);
        let mut tx = FrameTransmitter::ring(&mut ring, plan(FrameKind::Raw));
        assert!(matches!(tx.on_ready().unwrap(), Dispatch::Pause(_)));
        drop(tx);
        assert_eq!(ring.status(0), SlotStatus::SendRequested);
        kernel_complete(&ring, 0, TP_STATUS_AVAILABLE);
        assert_eq!(queued_frame(&ring, 0), vec![0u8; 10]);
    }

    #[test]
    fn test_transmitter_frame_error_pauses() {
        let mut ring = RingChannel::anonymous(RingDirection::Tx, 2).unwrap();
        let mut oversized = plan(FrameKind::Ieee8023);
        oversized.payload_len = 1501;
        let mut tx = FrameTransmitter::ring(&mut ring, oversized);
        let err = tx.on_ready().unwrap_err();
        assert!(!err.is_resource());
        assert_eq!(tx.after_error(), Dispatch::Pause(Duration::from_millis(5)));
    }

    #[test]
    fn test_ring_receiver_decodes_and_releases() {
        let mut ring = RingChannel::anonymous(RingDirection::Rx, 4).unwrap();
        let src = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let bytes = Frame::synthetic(FrameKind::Ieee8023, src, 0x0800, 10).unwrap().encode();
        kernel_deliver(&ring, 0, &bytes, bytes.len() as u32, 0);

        let mut rx = FrameReceiver::ring(&mut ring, FrameKind::Ieee8023);
        assert_eq!(rx.on_ready().unwrap(), Dispatch::Handled);
        assert_eq!(rx.received(), 1);
        assert_eq!(rx.on_ready().unwrap(), Dispatch::Idle);
        drop(rx);
        assert_eq!(ring.cursor(), 1);
        assert_eq!(ring.status(0), SlotStatus::AvailableToKernel);
    }

    #[test]
    fn test_ring_receiver_partial_slot_is_frame_error() {
        let mut ring = RingChannel::anonymous(RingDirection::Rx, 2).unwrap();
        kernel_deliver(&ring, 0, &[0u8; 64], 9000, TP_STATUS_COPY);

        let mut rx = FrameReceiver::ring(&mut ring, FrameKind::Ieee8023);
        let err = rx.on_ready().unwrap_err();
        assert!(matches!(err, LinkError::PartialDelivery { index: 0, captured: 64, wire_len: 9000 }));
        assert!(!err.is_resource());
        drop(rx);
        // Released despite the error
        assert_eq!(ring.cursor(), 1);
    }

    #[test]
    fn test_ring_receiver_truncated_frame_is_released() {
        let mut ring = RingChannel::anonymous(RingDirection::Rx, 2).unwrap();
        kernel_deliver(&ring, 0, &[0u8; 6], 6, 0);

        let mut rx = FrameReceiver::ring(&mut ring, FrameKind::Ieee8023);
        assert!(matches!(rx.on_ready(), Err(LinkError::Frame(_))));
        drop(rx);
        assert_eq!(ring.cursor(), 1);
    }
}
