//! Single-slot "latest frame" buffer shared by the capture thread and every reader

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::capture::Frame;

/// Identifies one capture run's ownership of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId(u64);

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    run: u64,
}

/// Holds at most one frame. The lock only guards a reference swap; pixel
/// data is shared immutably, so a snapshot is never a partially written frame.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: replace the current frame
    pub fn publish(&self, frame: Frame) {
        let previous = self.slot().frame.replace(frame);
        // Release the old pixels outside the lock
        drop(previous);
    }

    /// Consumer: the latest frame, if any
    pub fn snapshot(&self) -> Option<Frame> {
        self.slot().frame.clone()
    }

    pub fn clear(&self) {
        let previous = self.slot().frame.take();
        drop(previous);
    }

    /// Empty the buffer and hand it to a new capture run.
    pub fn begin_run(&self) -> RunId {
        let mut slot = self.slot();
        let previous = slot.frame.take();
        slot.run += 1;
        let run = RunId(slot.run);
        drop(slot);
        drop(previous);
        run
    }

    /// Clear on behalf of `run`. Does nothing once a newer run began, so a
    /// late exiting thread cannot wipe its successor's frame.
    pub fn clear_run(&self, run: RunId) -> bool {
        let mut slot = self.slot();
        if slot.run != run.0 {
            return false;
        }
        let previous = slot.frame.take();
        drop(slot);
        drop(previous);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_follows_publish_and_clear() {
        let buffer = FrameBuffer::new();
        assert!(buffer.snapshot().is_none());

        buffer.publish(Frame::filled(2, 2, [1, 2, 3], 1));
        let snap = buffer.snapshot().unwrap();
        assert_eq!(snap.meta.sequence, 1);
        assert_eq!(&snap.data[..3], &[1, 2, 3]);

        buffer.publish(Frame::filled(2, 2, [4, 5, 6], 2));
        // Earlier snapshots are unaffected by later publishes
        assert_eq!(&snap.data[..3], &[1, 2, 3]);
        assert_eq!(buffer.snapshot().unwrap().meta.sequence, 2);

        buffer.clear();
        assert!(buffer.snapshot().is_none());
    }

    #[test]
    fn superseded_run_cannot_clear() {
        let buffer = FrameBuffer::new();
        let old = buffer.begin_run();
        buffer.publish(Frame::filled(2, 2, [1; 3], 1));

        let new = buffer.begin_run();
        assert!(buffer.snapshot().is_none());
        buffer.publish(Frame::filled(2, 2, [2; 3], 7));

        assert!(!buffer.clear_run(old));
        assert_eq!(buffer.snapshot().unwrap().meta.sequence, 7);

        assert!(buffer.clear_run(new));
        assert!(buffer.snapshot().is_none());
    }
}
