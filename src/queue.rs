use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Deque;

use crate::frame::FrameBuffer;

/// Bounded FIFO of completed frames, shared between interrupt and task
/// context.
///
/// Every operation takes a critical section only for the pointer/counter
/// update itself, keeping the interrupt-masked window as small as possible.
/// Frames move in and out by value: popping transfers ownership to the
/// caller, so a frame can never sit in two queues at once.
pub(crate) struct FrameQueue<const N: usize> {
    frames: Mutex<CriticalSectionRawMutex, RefCell<Deque<FrameBuffer, N>>>,
}

impl<const N: usize> FrameQueue<N> {
    pub(crate) const fn new() -> Self {
        Self {
            frames: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Appends to the tail, preserving arrival order. Returns the frame to
    /// the caller when the queue is at capacity.
    pub(crate) fn push(&self, frame: FrameBuffer) -> Result<(), FrameBuffer> {
        self.frames.lock(|q| q.borrow_mut().push_back(frame))
    }

    /// Detaches and returns the head, or `None` when empty.
    pub(crate) fn pop(&self) -> Option<FrameBuffer> {
        self.frames.lock(|q| q.borrow_mut().pop_front())
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.lock(|q| q.borrow().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PROTOCOL_DATAGRAM;

    fn frame(tag: u8) -> FrameBuffer {
        FrameBuffer::new(PROTOCOL_DATAGRAM, 0, &[tag]).unwrap()
    }

    #[test]
    fn pops_in_arrival_order() {
        let queue: FrameQueue<4> = FrameQueue::new();
        for tag in 1..=3 {
            queue.push(frame(tag)).unwrap();
        }

        assert_eq!(queue.pop().unwrap().payload(), &[1]);
        assert_eq!(queue.pop().unwrap().payload(), &[2]);
        assert_eq!(queue.pop().unwrap().payload(), &[3]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let queue: FrameQueue<4> = FrameQueue::new();
        for tag in 0..4 {
            assert!(queue.push(frame(tag)).is_ok());
        }

        // The fifth frame bounces back to the caller and the depth stays put.
        let rejected = queue.push(frame(9)).unwrap_err();
        assert_eq!(rejected.payload(), &[9]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn pop_on_empty_is_a_no_op() {
        let queue: FrameQueue<4> = FrameQueue::new();
        assert!(queue.pop().is_none());
        assert_eq!(queue.len(), 0);
    }
}
