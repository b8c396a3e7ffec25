//! Point-to-multipoint broadcast radio for the nRF52 RADIO peripheral.
//!
//! Runs the radio in Nordic's proprietary 1 Mbit mode to exchange small,
//! unacknowledged datagrams between any number of devices tuned to the same
//! frequency band and group. There is no encryption, no retransmission and
//! no routing; corrupt frames are detected by the hardware CRC and dropped.
//!
//! The hardware-independent core (frame layout, sequence filtering, receive
//! queue, dispatch, datagram service) always builds and is tested on the
//! host. The transport itself (`radio::MeshRadio`) needs a chip feature
//! (`nrf52833` or `nrf52840`).

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

pub mod config;
pub mod datagram;
pub mod dispatch;
pub mod event_bus;
pub mod frame;
mod log;
mod queue;
pub mod rx;
mod seq;

#[cfg(feature = "nrf")]
pub mod radio;

pub use config::RadioConfig;
pub use datagram::{Datagram, ReceivedDatagram};
pub use dispatch::{Dispatcher, NotificationChannel, Notifications, RadioNotification};
pub use event_bus::RemoteEvent;
pub use frame::FrameBuffer;

/// Bound on the transport receive queue and the datagram queue, in frames.
pub const MAX_RX_QUEUE_DEPTH: usize = 4;

/// Capacity of the notification channel fed by the dispatch loop.
pub const NOTIFICATION_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Out-of-range configuration value, or an absent/oversized buffer.
    InvalidParameter,
    /// The operation needs exclusive RADIO access and cannot run in the
    /// current mode (transport disabled, or a BLE stack owns the hardware).
    NotSupported,
    /// A queue is at capacity or a buffer could not be provided.
    ResourceExhausted,
}

static BLE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Marks the RADIO peripheral as owned by a coexisting BLE stack.
///
/// While set, every operation that needs exclusive hardware access returns
/// [`Error::NotSupported`]. Intended to be wired to softdevice start/stop.
pub fn set_ble_active(active: bool) {
    BLE_ACTIVE.store(active, Ordering::Release);
}

pub(crate) fn ble_active() -> bool {
    BLE_ACTIVE.load(Ordering::Acquire)
}
