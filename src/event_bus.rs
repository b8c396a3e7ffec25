//! Transparent propagation of application events between devices.
//!
//! An event-bus frame ([`PROTOCOL_EVENTBUS`]) carries a fixed 4-byte
//! payload: the event id and value, both little-endian. The dispatch loop
//! decodes incoming frames and republishes them as
//! [`RadioNotification::Event`](crate::RadioNotification::Event); frames
//! whose payload is too short are dropped, reception being best-effort.

use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Error;
use crate::frame::{FrameBuffer, PROTOCOL_EVENTBUS};

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct EventWire {
    id: U16,
    value: U16,
}

/// An event raised on a peer device and rebroadcast here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RemoteEvent {
    pub id: u16,
    pub value: u16,
}

/// Wraps an event into a broadcast frame (group 0, sequence number
/// assigned at transmission).
pub fn event_frame(id: u16, value: u16) -> Result<FrameBuffer, Error> {
    let wire = EventWire {
        id: U16::new(id),
        value: U16::new(value),
    };
    FrameBuffer::new(PROTOCOL_EVENTBUS, 0, wire.as_bytes())
}

/// Decodes an event-bus frame, or `None` when the payload is malformed.
pub(crate) fn decode(frame: &FrameBuffer) -> Option<RemoteEvent> {
    let bytes = frame.payload().get(..size_of::<EventWire>())?;
    let wire = EventWire::read_from_bytes(bytes).ok()?;
    Some(RemoteEvent {
        id: wire.id.get(),
        value: wire.value.get(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_a_frame() {
        let frame = event_frame(0x1234, 0xBEEF).unwrap();
        assert_eq!(frame.protocol(), PROTOCOL_EVENTBUS);
        assert_eq!(frame.payload().len(), 4);

        let event = decode(&frame).unwrap();
        assert_eq!(
            event,
            RemoteEvent {
                id: 0x1234,
                value: 0xBEEF
            }
        );
    }

    #[test]
    fn wire_encoding_is_little_endian() {
        let frame = event_frame(0x0102, 0x0304).unwrap();
        assert_eq!(frame.payload(), &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let frame = FrameBuffer::new(PROTOCOL_EVENTBUS, 0, &[1, 2, 3]).unwrap();
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame = FrameBuffer::new(PROTOCOL_EVENTBUS, 0, &[0x02, 0x01, 0x04, 0x03, 0xFF]).unwrap();
        let event = decode(&frame).unwrap();
        assert_eq!(event.id, 0x0102);
        assert_eq!(event.value, 0x0304);
    }
}
