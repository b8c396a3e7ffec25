//! Broadcast transport over the nRF RADIO peripheral.
//!
//! Owns the register-level life of the radio: bringing it up in Nordic
//! proprietary 1 Mbit mode, the synchronous blocking transmit handshake,
//! and the END/finalize interrupt pair that feeds [`RadioShared`].
//!
//! Construct everything with [`new_mesh`]; the returned [`Dispatcher`] must
//! be driven by a background task for received frames to reach the
//! protocol services.

use core::marker::PhantomData;
use core::sync::atomic::{Ordering, compiler_fence};

use embassy_hal_internal::{PeripheralRef, into_ref};
use embassy_nrf::{
    Peripheral,
    interrupt::{self, typelevel::Interrupt},
    pac::{self, radio::vals},
    peripherals,
    radio::Instance,
};

use crate::datagram::{self, Datagram};
use crate::dispatch::{Dispatcher, NotificationChannel, Notifications};
use crate::event_bus;
use crate::frame::{FrameBuffer, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::log::info;
use crate::rx::{RadioShared, ReceiveVerdict};
use crate::{Error, RadioConfig, ble_active, config};

/// 40-bit on-air address: four fixed base bytes plus the group id in the
/// prefix byte, so the hardware address matcher drops other groups before
/// software ever runs.
const BASE_ADDRESS: u32 = 0x7542_744D;

/// Hardware TXPOWER codes for logical power levels 0..=7.
const POWER_LEVEL_CODES: [u8; 8] = [0xD8, 0xEC, 0xF0, 0xF4, 0xF8, 0xFC, 0x00, 0x04];

const CRC_INIT: u32 = 0x0000_FFFF;
const CRC_POLY: u32 = 0x0001_1021;
const WHITENING_IV: u8 = 0x18;

// Finalize clock: 16 MHz / 2^5 = 500 kHz, so 100 ticks = 200 us between
// accepting a frame and queueing it. This bounds how long a send can spin
// on the transmit block.
const FINALIZE_PRESCALER: u8 = 5;
const FINALIZE_TICKS: u32 = 100;

static SHARED: RadioShared = RadioShared::new();
static DATAGRAM: Datagram = Datagram::new();
static NOTIFICATIONS: NotificationChannel = NotificationChannel::new();

pub struct InterruptHandler<T: Instance> {
    _phantom: PhantomData<T>,
}

// The hard-coded RADIO register block is used because `Instance::regs()` is
// not public in embassy-nrf. No nRF device has a second radio, so the only
// way to go wrong is to pass a non-RADIO peripheral to `new_mesh`.
impl<T: Instance> interrupt::typelevel::Handler<T::Interrupt> for InterruptHandler<T> {
    unsafe fn on_interrupt() {
        let r = pac::RADIO;
        let t = pac::TIMER0;

        if r.events_end().read() != 0 {
            // Start the finalize clock immediately for maximum determinism;
            // it is cancelled below if the frame is not kept.
            t.tasks_clear().write_value(1);
            t.tasks_start().write_value(1);
            r.events_end().write_value(0);

            dma_end_fence();
            let crc_ok = r.crcstatus().read().crcstatus() == vals::Crcstatus::CRCOK;
            let rssi = -(r.rssisample().read().rssisample() as i16);

            match SHARED.on_receive_complete(crc_ok, rssi) {
                ReceiveVerdict::Finalize => {
                    // Hold the radio down until the finalize timer has
                    // queued the frame and re-armed the slot.
                    r.shorts().modify(|w| w.set_disabled_rxen(false));
                    r.tasks_disable().write_value(1);
                }
                ReceiveVerdict::RestartListening => {
                    t.tasks_stop().write_value(1);
                    t.tasks_clear().write_value(1);
                    // DISABLED->RXEN and READY->START chain straight back
                    // into listening; the slot is simply overwritten.
                    r.tasks_disable().write_value(1);
                }
            }
        }
    }
}

/// Handler for the finalize timer (TIMER0 compare 0), the second phase of
/// frame acceptance.
pub struct FinalizeTimerHandler;

impl interrupt::typelevel::Handler<interrupt::typelevel::TIMER0> for FinalizeTimerHandler {
    unsafe fn on_interrupt() {
        let r = pac::RADIO;
        let t = pac::TIMER0;

        if t.events_compare(0).read() != 0 {
            // COMPARE0->STOP and COMPARE0->CLEAR shorts have already parked
            // the timer.
            t.events_compare(0).write_value(0);

            let _ = SHARED.finalize_receive();

            // Re-arm reception on the recycled slot. The radio was left
            // DISABLED by the end-of-reception handler.
            r.packetptr().write_value(SHARED.slot_dma_ptr() as u32);
            r.shorts().modify(|w| w.set_disabled_rxen(true));
            dma_start_fence();
            r.tasks_rxen().write_value(1);
        }
    }
}

/// Constructs the transport and its companions, wired to the one RADIO
/// peripheral. One instance per chip is enforced by peripheral ownership.
///
/// ```ignore
/// bind_interrupts!(struct Irqs {
///     RADIO => InterruptHandler<peripherals::RADIO>;
///     TIMER0 => FinalizeTimerHandler;
/// });
///
/// let (mut radio, mut dispatcher, datagram, notifications) =
///     new_mesh(p.RADIO, p.TIMER0, Irqs, RadioConfig::default())?;
/// ```
pub fn new_mesh<'d, T: Instance>(
    radio: impl Peripheral<P = T> + 'd,
    timer: impl Peripheral<P = peripherals::TIMER0> + 'd,
    _irq: impl interrupt::typelevel::Binding<T::Interrupt, InterruptHandler<T>>
    + interrupt::typelevel::Binding<interrupt::typelevel::TIMER0, FinalizeTimerHandler>
    + 'd,
    config: RadioConfig,
) -> Result<
    (
        MeshRadio<'d, T>,
        Dispatcher<'static>,
        &'static Datagram,
        Notifications<'static>,
    ),
    Error,
> {
    config.validate()?;
    into_ref!(radio, timer);

    let mut radio = MeshRadio {
        _radio: radio,
        _timer: timer,
        band: config.band,
        power: config.power,
        group: config.group,
        enabled: false,
        sleep_restore: false,
        shared: &SHARED,
    };

    // Power-cycle to reset the peripheral to a known state.
    let r = radio.regs();
    r.power().write(|w| w.set_power(false));
    r.power().write(|w| w.set_power(true));

    Ok((
        radio,
        Dispatcher::new(&SHARED, &DATAGRAM, &NOTIFICATIONS),
        &DATAGRAM,
        Notifications::new(&NOTIFICATIONS),
    ))
}

/// The broadcast radio transport.
///
/// Demand-activated: hardware is only configured and reception armed once
/// [`enable`](Self::enable) runs. All waits on hardware signals are short
/// busy-loops bounded by radio ramp-up/ramp-down times (tens of
/// microseconds); nothing here yields.
pub struct MeshRadio<'d, T: Instance> {
    _radio: PeripheralRef<'d, T>,
    _timer: PeripheralRef<'d, peripherals::TIMER0>,
    band: u8,
    power: u8,
    group: u8,
    enabled: bool,
    sleep_restore: bool,
    shared: &'static RadioShared,
}

impl<'d, T: Instance> MeshRadio<'d, T> {
    fn regs(&mut self) -> pac::radio::Radio {
        pac::RADIO
    }

    /// Brings the radio up as a broadcast transceiver and arms reception.
    /// Idempotent: enabling an enabled transport is a successful no-op.
    pub fn enable(&mut self) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        if self.enabled {
            return Ok(());
        }

        // The RADIO module cannot run from the RC oscillator.
        let c = pac::CLOCK;
        c.events_hfclkstarted().write_value(0);
        c.tasks_hfclkstart().write_value(1);
        while c.events_hfclkstarted().read() == 0 {}

        let r = self.regs();
        r.txpower()
            .write(|w| w.0 = u32::from(POWER_LEVEL_CODES[usize::from(self.power)]));
        r.frequency().write(|w| w.set_frequency(self.band));
        r.mode().write(|w| w.set_mode(vals::Mode::NRF_1MBIT));

        r.base0().write_value(BASE_ADDRESS);
        r.prefix0().write(|w| w.0 = u32::from(self.group));
        r.txaddress().write(|w| w.set_txaddress(0));
        r.rxaddresses().write(|w| w.0 = 1);

        // 8-bit length field, no S0/S1; the length field counts the four
        // header bytes plus the payload.
        r.pcnf0().write(|w| {
            w.set_lflen(8);
            w.set_s0len(false);
            w.set_s1len(0);
        });
        r.pcnf1().write(|w| {
            w.set_maxlen((HEADER_SIZE + MAX_PAYLOAD_SIZE) as u8);
            w.set_statlen(0);
            w.set_balen(4);
            w.set_endian(vals::Endian::LITTLE);
            w.set_whiteen(true);
        });

        // CRC-16-CCITT over the whole frame.
        r.crccnf().write(|w| w.set_len(vals::Len::TWO));
        r.crcinit().write(|w| w.set_crcinit(CRC_INIT & 0x00FF_FFFF));
        r.crcpoly().write(|w| w.set_crcpoly(CRC_POLY & 0x00FF_FFFF));
        r.datawhiteiv().write(|w| w.0 = u32::from(WHITENING_IV));

        r.packetptr().write_value(self.shared.slot_dma_ptr() as u32);

        // One-shot finalize clock, self-stopping via shorts.
        let t = pac::TIMER0;
        t.prescaler().write(|w| w.0 = u32::from(FINALIZE_PRESCALER));
        t.cc(0).write_value(FINALIZE_TICKS);
        // COMPARE0->CLEAR and COMPARE0->STOP: the clock parks itself after
        // each one-shot deadline.
        t.shorts().write(|w| w.0 = (1 << 0) | (1 << 8));
        t.intenset().write(|w| w.0 = 1 << 16);
        t.tasks_stop().write_value(1);
        t.tasks_clear().write_value(1);

        r.shorts().write(|w| {
            w.set_ready_start(true);
            w.set_address_rssistart(true);
            w.set_disabled_rxen(true);
        });
        r.intenset().write(|w| w.set_end(true));

        // Arm reception; READY->START begins listening on its own.
        r.events_ready().write_value(0);
        dma_start_fence();
        r.tasks_rxen().write_value(1);
        while r.events_ready().read() == 0 {}
        r.events_end().write_value(0);

        T::Interrupt::unpend();
        unsafe { T::Interrupt::enable() };
        interrupt::typelevel::TIMER0::unpend();
        unsafe { interrupt::typelevel::TIMER0::enable() };

        self.enabled = true;
        self.shared.set_enabled(true);
        info!("radio enabled: band {} group {}", self.band, self.group);
        Ok(())
    }

    /// Halts reception deterministically and powers the protocol down.
    /// Idempotent: disabling a disabled transport is a successful no-op.
    pub fn disable(&mut self) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        if !self.enabled {
            return Ok(());
        }

        T::Interrupt::disable();
        interrupt::typelevel::TIMER0::disable();

        let t = pac::TIMER0;
        t.tasks_stop().write_value(1);
        t.tasks_clear().write_value(1);

        // The DISABLED->RXEN short must go first or the radio would bounce
        // straight back into reception.
        let r = self.regs();
        r.shorts().modify(|w| w.set_disabled_rxen(false));
        r.events_disabled().write_value(0);
        r.tasks_disable().write_value(1);
        while r.events_disabled().read() == 0 {}
        dma_end_fence();

        // A frame accepted but not yet finalized would leave the transmit
        // block latched forever; settle it now that the hardware is quiet.
        let _ = self.shared.finalize_receive();

        self.enabled = false;
        self.shared.set_enabled(false);
        info!("radio disabled");
        Ok(())
    }

    /// Sets the transmit power level, 0 (lowest) to 7 (highest).
    pub fn set_transmit_power(&mut self, power: u8) -> Result<(), Error> {
        config::validate_power(power)?;
        self.power = power;
        self.regs()
            .txpower()
            .write(|w| w.0 = u32::from(POWER_LEVEL_CODES[usize::from(power)]));
        Ok(())
    }

    /// Retunes to `band` (0..=100, 1 MHz steps from 2400 MHz). When the
    /// transport is enabled the radio is briefly stopped and re-armed so
    /// the change takes effect without the caller tearing anything down.
    pub fn set_frequency_band(&mut self, band: u8) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        config::validate_band(band)?;
        self.band = band;

        let r = self.regs();
        if self.enabled && r.frequency().read().frequency() != band {
            T::Interrupt::disable();
            interrupt::typelevel::TIMER0::disable();

            // Park the finalize clock and settle any half-accepted frame so
            // nothing rewrites the hardware mid-retune.
            let t = pac::TIMER0;
            t.tasks_stop().write_value(1);
            t.tasks_clear().write_value(1);
            let _ = self.shared.finalize_receive();

            r.shorts().modify(|w| w.set_disabled_rxen(false));
            r.events_disabled().write_value(0);
            r.tasks_disable().write_value(1);
            while r.events_disabled().read() == 0 {}

            r.frequency().write(|w| w.set_frequency(band));

            r.packetptr().write_value(self.shared.slot_dma_ptr() as u32);
            r.shorts().modify(|w| w.set_disabled_rxen(true));
            r.events_ready().write_value(0);
            r.tasks_rxen().write_value(1);
            while r.events_ready().read() == 0 {}
            r.events_end().write_value(0);

            T::Interrupt::unpend();
            interrupt::typelevel::TIMER0::unpend();
            unsafe {
                T::Interrupt::enable();
                interrupt::typelevel::TIMER0::enable();
            }
        }
        Ok(())
    }

    /// Joins `group`: only frames carrying this id in their address prefix
    /// reach this device, enforced by the hardware address matcher.
    pub fn set_group(&mut self, group: u8) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        self.group = group;
        self.regs().prefix0().write(|w| w.0 = u32::from(group));
        Ok(())
    }

    /// Transmits `frame` and waits for the transmission to complete.
    ///
    /// Fully synchronous: the call spins on the transmit block (bounded by
    /// the 200 us finalize deadline) and then runs the whole hardware
    /// handshake with both radio interrupts masked, so sends can never
    /// overlap. Reception is re-armed before interrupts are restored.
    pub fn send(&mut self, frame: &mut FrameBuffer) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        if !self.enabled {
            return Err(Error::NotSupported);
        }
        if usize::from(frame.length()) > HEADER_SIZE + MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidParameter);
        }

        // Wait out any in-flight acceptance decision. The re-check under
        // masked interrupts closes the window where a reception completes
        // between the spin and the mask.
        loop {
            while self.shared.transmit_blocked() {
                core::hint::spin_loop();
            }
            T::Interrupt::disable();
            interrupt::typelevel::TIMER0::disable();
            if !self.shared.transmit_blocked() {
                break;
            }
            unsafe {
                T::Interrupt::enable();
                interrupt::typelevel::TIMER0::enable();
            }
        }

        frame.set_seq_no(self.shared.next_seq_no());

        let r = self.regs();

        // Stop listening. Every wait below is bounded by hardware ramp
        // times, a few microseconds each.
        r.shorts().modify(|w| w.set_disabled_rxen(false));
        r.events_disabled().write_value(0);
        r.tasks_disable().write_value(1);
        while r.events_disabled().read() == 0 {}

        r.packetptr().write_value(frame.dma_ptr() as u32);

        // Transmit; READY->START runs the transfer, END marks the last bit
        // out of the antenna.
        r.events_ready().write_value(0);
        r.events_end().write_value(0);
        dma_start_fence();
        r.tasks_txen().write_value(1);
        while r.events_ready().read() == 0 {}
        while r.events_end().read() == 0 {}
        dma_end_fence();

        // Hand the hardware back to the receive slot and resume listening.
        r.events_disabled().write_value(0);
        r.tasks_disable().write_value(1);
        while r.events_disabled().read() == 0 {}

        r.packetptr().write_value(self.shared.slot_dma_ptr() as u32);
        r.shorts().modify(|w| w.set_disabled_rxen(true));
        r.events_ready().write_value(0);
        dma_start_fence();
        r.tasks_rxen().write_value(1);
        while r.events_ready().read() == 0 {}
        r.events_end().write_value(0);

        // Our own transmission pended END while masked; drop it. A pending
        // finalize, if any slipped in, is left to fire.
        T::Interrupt::unpend();
        unsafe {
            T::Interrupt::enable();
            interrupt::typelevel::TIMER0::enable();
        }
        Ok(())
    }

    /// Broadcasts `data` as a single datagram frame.
    pub fn send_datagram(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut frame = datagram::datagram_frame(data)?;
        self.send(&mut frame)
    }

    /// Broadcasts a text datagram.
    pub fn send_datagram_str(&mut self, text: &str) -> Result<(), Error> {
        self.send_datagram(text.as_bytes())
    }

    /// Broadcasts an event-bus frame.
    pub fn send_event(&mut self, id: u16, value: u16) -> Result<(), Error> {
        let mut frame = event_bus::event_frame(id, value)?;
        self.send(&mut frame)
    }

    /// Detaches and returns the oldest completed frame, or `None`.
    /// Normally the [`Dispatcher`] does this; direct use bypasses protocol
    /// routing.
    pub fn recv(&mut self) -> Option<FrameBuffer> {
        self.shared.recv()
    }

    /// Number of received frames waiting to be processed.
    pub fn queued_frames(&self) -> usize {
        self.shared.queued_frames()
    }

    /// Signal strength of the most recent reception in dBm, or
    /// [`Error::NotSupported`] while disabled.
    pub fn rssi(&self) -> Result<i16, Error> {
        self.shared.rssi()
    }

    pub fn set_rssi(&mut self, rssi: i16) -> Result<(), Error> {
        self.shared.set_rssi(rssi)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Low-power hook: sleeping disables an enabled transport and
    /// remembers to restore it on wake.
    pub fn set_sleep(&mut self, sleep: bool) -> Result<(), Error> {
        if ble_active() {
            return Err(Error::NotSupported);
        }
        if sleep {
            if self.enabled {
                self.disable()?;
                self.sleep_restore = true;
            }
        } else if self.sleep_restore {
            self.sleep_restore = false;
            self.enable()?;
        }
        Ok(())
    }
}

// NOTE must be followed by a volatile write operation
fn dma_start_fence() {
    compiler_fence(Ordering::Release);
}

// NOTE must be preceded by a volatile read operation
fn dma_end_fence() {
    compiler_fence(Ordering::Acquire);
}
