//! Interrupt-shared receive state.
//!
//! [`RadioShared`] owns everything the reception interrupt and the
//! task-level consumers both touch: the single DMA-active frame slot, the
//! bounded queue of completed frames, the sequence baseline and the
//! transmit-block flag. All mutation happens inside critical sections; the
//! slot itself is written by the radio DMA only between re-arming reception
//! and the next end-of-reception interrupt, a window in which software
//! never reads it.
//!
//! Reception is a two-phase state machine, one attempt at a time:
//!
//! ```text
//! AwaitingCrc --(crc fail)--------------------> RestartListening
//! AwaitingCrc --(crc ok, stale seq no)--------> RestartListening
//! AwaitingCrc --(crc ok, novel seq no)--------> PendingFinalize
//! PendingFinalize --(finalize timer fires)----> Queued, RestartListening
//! ```
//!
//! The split keeps the end-of-reception interrupt minimal: accepting a
//! frame only latches the signal strength and blocks transmission; the
//! queue append and slot recycling run a bounded 200 µs later from the
//! finalize timer, which also lifts the transmit block.

use core::cell::RefCell;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::frame::FrameBuffer;
use crate::log::warn;
use crate::queue::FrameQueue;
use crate::seq::SequenceGuard;
use crate::{Error, MAX_RX_QUEUE_DEPTH};

/// What the reception interrupt must do next with the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveVerdict {
    /// Frame accepted: hold the radio, keep the finalize timer running.
    Finalize,
    /// Frame discarded in place: stop the timer and listen again.
    RestartListening,
}

struct RxInner {
    /// The frame the radio DMA writes into. Exactly one frame is live to
    /// hardware at any time; queued frames are separate, owned values.
    slot: FrameBuffer,
    seq: SequenceGuard,
    /// Signal strength latched at end-of-reception, stamped onto the frame
    /// when it is queued.
    rssi: i16,
    pending_finalize: bool,
}

pub struct RadioShared {
    inner: Mutex<CriticalSectionRawMutex, RefCell<RxInner>>,
    queue: FrameQueue<MAX_RX_QUEUE_DEPTH>,
    block_transmit: AtomicBool,
    enabled: AtomicBool,
    data_ready: Signal<CriticalSectionRawMutex, ()>,
}

impl RadioShared {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(RxInner {
                slot: FrameBuffer::new_empty(),
                seq: SequenceGuard::new(),
                rssi: 0,
                pending_finalize: false,
            })),
            queue: FrameQueue::new(),
            block_transmit: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            data_ready: Signal::new(),
        }
    }

    /// End-of-reception gate, phase one. Called from interrupt context once
    /// the hardware has signalled a complete transfer into the slot.
    ///
    /// A corrupt or stale frame is abandoned where it lies; the caller
    /// restarts listening and the slot is simply overwritten by the next
    /// reception. A novel frame latches its signal strength, blocks
    /// transmission and waits for [`finalize_receive`](Self::finalize_receive).
    pub fn on_receive_complete(&self, crc_ok: bool, rssi_sample: i16) -> ReceiveVerdict {
        if !crc_ok {
            return ReceiveVerdict::RestartListening;
        }

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let candidate = inner.slot.seq_no();
            if inner.seq.accept(candidate) {
                inner.rssi = rssi_sample;
                inner.pending_finalize = true;
                self.block_transmit.store(true, Ordering::Release);
                ReceiveVerdict::Finalize
            } else {
                ReceiveVerdict::RestartListening
            }
        })
    }

    /// Phase two, run from the finalize timer interrupt: stamp the latched
    /// signal strength onto the completed frame, append it to the queue
    /// tail and recycle the slot for the next reception. The transmit block
    /// is lifted whether or not the frame fit.
    ///
    /// Fails with [`Error::ResourceExhausted`] when the queue is at
    /// capacity; the frame is dropped and the sender is none the wiser,
    /// which is the contract of a lossy broadcast medium.
    pub fn finalize_receive(&self) -> Result<(), Error> {
        let result = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !inner.pending_finalize {
                return Ok(false);
            }
            inner.pending_finalize = false;

            let rssi = inner.rssi;
            inner.slot.set_rssi(rssi);
            let frame = mem::replace(&mut inner.slot, FrameBuffer::new_empty());
            match self.queue.push(frame) {
                Ok(()) => Ok(true),
                Err(_dropped) => Err(Error::ResourceExhausted),
            }
        });
        self.block_transmit.store(false, Ordering::Release);

        match result {
            Ok(true) => {
                self.data_ready.signal(());
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!("rx queue full, frame dropped");
                Err(e)
            }
        }
    }

    /// Detaches and returns the oldest completed frame, transferring
    /// ownership to the caller. Interrupts are masked only for the queue
    /// pointer update itself.
    pub fn recv(&self) -> Option<FrameBuffer> {
        self.queue.pop()
    }

    /// Number of completed frames waiting to be consumed.
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// The novelty filter on its own: accepts `candidate` if strictly newer
    /// than the baseline, adopting it on success.
    pub fn compare_seq_no(&self, candidate: u8) -> bool {
        self.inner.lock(|inner| inner.borrow_mut().seq.accept(candidate))
    }

    /// Next outgoing sequence number. Shares the baseline with the novelty
    /// filter, matching the single-talker pairing this protocol targets.
    pub fn next_seq_no(&self) -> u8 {
        self.inner.lock(|inner| inner.borrow_mut().seq.next())
    }

    /// Last accepted or transmitted sequence number.
    pub fn last_seq_no(&self) -> u8 {
        self.inner.lock(|inner| inner.borrow().seq.current())
    }

    /// Signal strength of the most recent reception, in dBm.
    pub fn rssi(&self) -> Result<i16, Error> {
        if !self.is_enabled() {
            return Err(Error::NotSupported);
        }
        Ok(self.inner.lock(|inner| inner.borrow().rssi))
    }

    pub fn set_rssi(&self, rssi: i16) -> Result<(), Error> {
        if !self.is_enabled() {
            return Err(Error::NotSupported);
        }
        self.inner.lock(|inner| inner.borrow_mut().rssi = rssi);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Records the transport's enabled state. On target this is driven by
    /// the transport's enable/disable; host rigs set it directly.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// True while a reception is between acceptance and finalize; `send`
    /// spins on this for at most the finalize deadline (200 µs).
    pub fn transmit_blocked(&self) -> bool {
        self.block_transmit.load(Ordering::Acquire)
    }

    /// Resolves once at least one frame has been queued since the last
    /// call. Used by the dispatcher to avoid polling at full tick rate.
    pub(crate) async fn data_ready(&self) {
        self.data_ready.wait().await;
    }

    /// Pointer for the hardware DMA, valid for the lifetime of the shared
    /// state (it lives in a static on target).
    #[cfg(feature = "nrf")]
    pub(crate) fn slot_dma_ptr(&self) -> *mut u8 {
        self.inner.lock(|inner| inner.borrow_mut().slot.dma_ptr())
    }

    /// Stand-in for a completed DMA transfer: overwrites the slot's wire
    /// bytes as reception would.
    #[cfg(any(test, feature = "simulator"))]
    pub fn simulate_reception(&self, frame: &FrameBuffer) {
        self.inner.lock(|inner| inner.borrow_mut().slot.load_wire(frame));
    }

    #[cfg(test)]
    fn take_data_ready(&self) -> bool {
        self.data_ready.try_take().is_some()
    }
}
