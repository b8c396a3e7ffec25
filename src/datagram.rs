//! Single-frame datagram service, a little like UDP with smaller packets.
//!
//! The dispatch loop hands every frame tagged [`PROTOCOL_DATAGRAM`] to
//! [`Datagram::packet_received`], which parks it in the service's own
//! bounded queue until the application collects it. Sending goes through
//! the transport (`MeshRadio::send_datagram` on target), which wraps the
//! bytes with [`datagram_frame`].

use crate::frame::{FrameBuffer, MAX_PAYLOAD_SIZE, PROTOCOL_DATAGRAM};
use crate::log::debug;
use crate::queue::FrameQueue;
use crate::{Error, MAX_RX_QUEUE_DEPTH};

/// Wraps `data` into a broadcast datagram frame (group 0, current protocol
/// version, sequence number assigned at transmission).
pub fn datagram_frame(data: &[u8]) -> Result<FrameBuffer, Error> {
    FrameBuffer::new(PROTOCOL_DATAGRAM, 0, data)
}

/// A received datagram payload with its signal strength, detached from the
/// frame it arrived in.
#[derive(Debug, Clone)]
pub struct ReceivedDatagram {
    bytes: [u8; MAX_PAYLOAD_SIZE],
    len: usize,
    rssi: i16,
}

impl ReceivedDatagram {
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Signal strength of the carrying frame, in dBm.
    pub fn rssi(&self) -> i16 {
        self.rssi
    }
}

/// Application-facing receive side of the datagram protocol.
pub struct Datagram {
    queue: FrameQueue<MAX_RX_QUEUE_DEPTH>,
}

impl Datagram {
    pub const fn new() -> Self {
        Self {
            queue: FrameQueue::new(),
        }
    }

    /// Copies the oldest pending datagram into `buf` and releases it.
    ///
    /// Returns the number of bytes copied, which is the smaller of the
    /// payload length and `buf.len()` — a too-small buffer truncates
    /// silently. Fails with [`Error::InvalidParameter`] when no datagram
    /// is pending.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let frame = self.queue.pop().ok_or(Error::InvalidParameter)?;
        let payload = frame.payload();
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok(n)
    }

    /// Takes the oldest pending datagram together with its signal
    /// strength, or `None` when nothing is pending.
    pub fn recv_frame(&self) -> Option<ReceivedDatagram> {
        let frame = self.queue.pop()?;
        let payload = frame.payload();
        let mut bytes = [0; MAX_PAYLOAD_SIZE];
        bytes[..payload.len()].copy_from_slice(payload);
        Some(ReceivedDatagram {
            bytes,
            len: payload.len(),
            rssi: frame.rssi(),
        })
    }

    /// Number of datagrams waiting for the application.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Dispatch-loop callback: takes ownership of a datagram-tagged frame.
    ///
    /// Returns whether the frame was queued; at capacity it is dropped on
    /// the floor, matching the transport queue's lossy policy.
    pub(crate) fn packet_received(&self, frame: FrameBuffer) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_dropped) => {
                debug!("datagram queue full, frame dropped");
                false
            }
        }
    }
}

impl Default for Datagram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8], rssi: i16) -> FrameBuffer {
        let mut frame = datagram_frame(payload).unwrap();
        frame.set_rssi(rssi);
        frame
    }

    #[test]
    fn recv_with_empty_queue_is_invalid() {
        let datagram = Datagram::new();
        let mut buf = [0u8; 8];
        assert_eq!(datagram.recv(&mut buf), Err(Error::InvalidParameter));
        assert!(datagram.recv_frame().is_none());
    }

    #[test]
    fn recv_copies_whole_payload() {
        let datagram = Datagram::new();
        assert!(datagram.packet_received(frame(b"hello", -41)));

        let mut buf = [0u8; 32];
        let n = datagram.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(datagram.available(), 0);
    }

    #[test]
    fn short_buffer_truncates_silently() {
        let datagram = Datagram::new();
        assert!(datagram.packet_received(frame(b"truncate me", -41)));

        let mut buf = [0u8; 4];
        assert_eq!(datagram.recv(&mut buf), Ok(4));
        assert_eq!(&buf, b"trun");
        // The rest of the payload is gone with the frame.
        assert_eq!(datagram.available(), 0);
    }

    #[test]
    fn recv_frame_carries_rssi() {
        let datagram = Datagram::new();
        assert!(datagram.packet_received(frame(b"ping", -73)));

        let received = datagram.recv_frame().unwrap();
        assert_eq!(received.payload(), b"ping");
        assert_eq!(received.rssi(), -73);
    }

    #[test]
    fn queue_is_bounded_and_lossy() {
        let datagram = Datagram::new();
        for i in 0..MAX_RX_QUEUE_DEPTH as u8 {
            assert!(datagram.packet_received(frame(&[i], -50)));
        }
        assert!(!datagram.packet_received(frame(b"overflow", -50)));
        assert_eq!(datagram.available(), MAX_RX_QUEUE_DEPTH);
    }

    #[test]
    fn datagrams_come_out_in_order() {
        let datagram = Datagram::new();
        for i in 1..=3u8 {
            assert!(datagram.packet_received(frame(&[i], -50)));
        }
        for i in 1..=3u8 {
            assert_eq!(datagram.recv_frame().unwrap().payload(), &[i]);
        }
    }
}
