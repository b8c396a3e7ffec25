//! Background dispatch of completed frames to protocol handlers.
//!
//! [`Dispatcher::run`] is the task-context half of the receive path: it
//! drains the transport queue whenever the interrupt side signals new data
//! (with a periodic tick as a safety net) and routes each frame by its
//! inner protocol tag. Frames nobody claims are announced generically and
//! released; ownership moves out of the queue either way, so every frame
//! is freed exactly once.

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Ticker};

use crate::NOTIFICATION_QUEUE_DEPTH;
use crate::datagram::Datagram;
use crate::event_bus::{self, RemoteEvent};
use crate::frame::{PROTOCOL_DATAGRAM, PROTOCOL_EVENTBUS};
use crate::log::{debug, warn};
use crate::rx::RadioShared;

/// Interval of the fallback drain when no data-ready signal arrives.
const DISPATCH_TICK: Duration = Duration::from_millis(10);

/// Events published to the application by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioNotification {
    /// A frame arrived for a protocol tag nobody handles. The frame itself
    /// has been released; only its tag is reported.
    DataReady { protocol: u8 },
    /// A datagram was queued and can be collected from [`Datagram`].
    DatagramReady,
    /// An event-bus frame arrived.
    Event(RemoteEvent),
}

/// Channel carrying [`RadioNotification`]s from the dispatcher to the
/// application. Full-channel sends are dropped, like everything else on
/// this lossy layer.
pub type NotificationChannel =
    Channel<CriticalSectionRawMutex, RadioNotification, NOTIFICATION_QUEUE_DEPTH>;

/// Application handle for receiving [`RadioNotification`]s.
pub struct Notifications<'a> {
    rx: Receiver<'a, CriticalSectionRawMutex, RadioNotification, NOTIFICATION_QUEUE_DEPTH>,
}

impl<'a> Notifications<'a> {
    pub fn new(channel: &'a NotificationChannel) -> Self {
        Self {
            rx: channel.receiver(),
        }
    }

    pub async fn next(&self) -> RadioNotification {
        self.rx.receive().await
    }

    pub fn try_next(&self) -> Option<RadioNotification> {
        self.rx.try_receive().ok()
    }
}

/// The background dispatch task. Spawn [`run`](Self::run) once; it never
/// returns.
pub struct Dispatcher<'a> {
    shared: &'a RadioShared,
    datagram: &'a Datagram,
    notifications: Sender<'a, CriticalSectionRawMutex, RadioNotification, NOTIFICATION_QUEUE_DEPTH>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        shared: &'a RadioShared,
        datagram: &'a Datagram,
        notifications: &'a NotificationChannel,
    ) -> Self {
        Self {
            shared,
            datagram,
            notifications: notifications.sender(),
        }
    }

    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(DISPATCH_TICK);
        loop {
            select(self.shared.data_ready(), ticker.next()).await;
            self.process();
        }
    }

    /// One drain pass: empties the transport queue in arrival order,
    /// routing each frame by protocol tag. Does nothing while the
    /// transport is disabled.
    pub fn process(&mut self) {
        if !self.shared.is_enabled() {
            return;
        }

        while let Some(frame) = self.shared.recv() {
            match frame.protocol() {
                PROTOCOL_DATAGRAM => {
                    if self.datagram.packet_received(frame) {
                        self.notify(RadioNotification::DatagramReady);
                    }
                }
                PROTOCOL_EVENTBUS => {
                    if let Some(event) = event_bus::decode(&frame) {
                        self.notify(RadioNotification::Event(event));
                    }
                }
                protocol => {
                    debug!("releasing frame for unhandled protocol {}", protocol);
                    self.notify(RadioNotification::DataReady { protocol });
                }
            }
        }
    }

    fn notify(&self, notification: RadioNotification) {
        if self.notifications.try_send(notification).is_err() {
            warn!("notification channel full, notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuffer;
    use crate::rx::ReceiveVerdict;

    struct Rig {
        shared: RadioShared,
        datagram: Datagram,
        channel: NotificationChannel,
    }

    impl Rig {
        fn new() -> Self {
            let shared = RadioShared::new();
            shared.set_enabled(true);
            Self {
                shared,
                datagram: Datagram::new(),
                channel: NotificationChannel::new(),
            }
        }

        fn receive(&self, protocol: u8, payload: &[u8], seq_no: u8) {
            let mut frame = FrameBuffer::new(protocol, 0, payload).unwrap();
            frame.set_seq_no(seq_no);
            self.shared.simulate_reception(&frame);
            assert_eq!(
                self.shared.on_receive_complete(true, -55),
                ReceiveVerdict::Finalize
            );
            self.shared.finalize_receive().unwrap();
        }
    }

    #[test]
    fn datagrams_are_routed_to_the_datagram_service() {
        let rig = Rig::new();
        rig.receive(PROTOCOL_DATAGRAM, b"payload", 1);

        let mut dispatcher = Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel);
        dispatcher.process();

        assert_eq!(rig.shared.queued_frames(), 0);
        assert_eq!(rig.datagram.available(), 1);

        let notifications = Notifications::new(&rig.channel);
        assert_eq!(
            notifications.try_next(),
            Some(RadioNotification::DatagramReady)
        );
        assert_eq!(notifications.try_next(), None);
    }

    #[test]
    fn event_frames_are_decoded_and_published() {
        let rig = Rig::new();
        rig.receive(PROTOCOL_EVENTBUS, &[0x34, 0x12, 0x01, 0x00], 1);

        Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel).process();

        let notifications = Notifications::new(&rig.channel);
        assert_eq!(
            notifications.try_next(),
            Some(RadioNotification::Event(RemoteEvent {
                id: 0x1234,
                value: 1
            }))
        );
        assert_eq!(rig.datagram.available(), 0);
    }

    #[test]
    fn unknown_protocol_is_announced_and_released() {
        let rig = Rig::new();
        rig.receive(0x42, b"mystery", 1);

        Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel).process();

        // The frame is gone from every queue; only the tag survives.
        assert_eq!(rig.shared.queued_frames(), 0);
        assert_eq!(rig.datagram.available(), 0);
        assert_eq!(
            Notifications::new(&rig.channel).try_next(),
            Some(RadioNotification::DataReady { protocol: 0x42 })
        );
    }

    #[test]
    fn one_pass_drains_the_whole_queue_in_order() {
        let rig = Rig::new();
        rig.receive(PROTOCOL_DATAGRAM, b"first", 1);
        rig.receive(0x09, b"odd one", 2);
        rig.receive(PROTOCOL_DATAGRAM, b"second", 3);

        Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel).process();

        assert_eq!(rig.shared.queued_frames(), 0);
        assert_eq!(rig.datagram.recv_frame().unwrap().payload(), b"first");
        assert_eq!(rig.datagram.recv_frame().unwrap().payload(), b"second");

        let notifications = Notifications::new(&rig.channel);
        assert_eq!(
            notifications.try_next(),
            Some(RadioNotification::DatagramReady)
        );
        assert_eq!(
            notifications.try_next(),
            Some(RadioNotification::DataReady { protocol: 0x09 })
        );
        assert_eq!(
            notifications.try_next(),
            Some(RadioNotification::DatagramReady)
        );
    }

    #[test]
    fn disabled_transport_is_left_alone() {
        let rig = Rig::new();
        rig.receive(PROTOCOL_DATAGRAM, b"parked", 1);
        rig.shared.set_enabled(false);

        Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel).process();

        assert_eq!(rig.shared.queued_frames(), 1);
        assert_eq!(rig.datagram.available(), 0);
    }

    #[test]
    fn notification_overflow_does_not_stall_dispatch() {
        let rig = Rig::new();
        // More unknown-protocol frames than notification slots. The queue
        // bound is the same, so run two passes of three.
        for seq in 1..=3u8 {
            rig.receive(0x30, &[seq], seq);
        }
        let mut dispatcher = Dispatcher::new(&rig.shared, &rig.datagram, &rig.channel);
        dispatcher.process();
        for seq in 4..=6u8 {
            rig.receive(0x30, &[seq], seq);
        }
        dispatcher.process();

        // All frames were released even though some notifications fell out.
        assert_eq!(rig.shared.queued_frames(), 0);
        let notifications = Notifications::new(&rig.channel);
        let mut seen = 0;
        while notifications.try_next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, NOTIFICATION_QUEUE_DEPTH);
    }
}
