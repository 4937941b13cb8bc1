//! Frame pacing between the capture loop and a preview consumer
//!
//! A single-slot handoff guarded by a mutex and condition variable. The
//! capture thread publishes a frame and then blocks until the consumer
//! acknowledges it, which bounds capture to the consumer's rate without
//! dropping frames. With no consumer attached the pacer is pass-through so
//! a headless recording never stalls. `close()` interrupts any waiter.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// A raw captured video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Returned by `produce` once the pacer has been torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerClosed;

#[derive(Default)]
struct Slot {
    frame: Option<VideoFrame>,
    awaiting_ack: bool,
    consumers: usize,
    closed: bool,
}

/// Single-slot producer/consumer handoff.
///
/// Two condition variables share the slot mutex: `frame_ready` wakes a
/// consumer waiting for the next frame, `acked` wakes the producer parked
/// on the consumer's acknowledgment. Keeping them separate means an ack
/// can never be swallowed by a waiting consumer.
pub struct FramePacer {
    slot: Mutex<Slot>,
    frame_ready: Condvar,
    acked: Condvar,
}

impl FramePacer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::default()),
            frame_ready: Condvar::new(),
            acked: Condvar::new(),
        })
    }

    /// Publish a frame and wait for the consumer to acknowledge it.
    ///
    /// Returns immediately when no consumer is attached. Returns
    /// `Err(PacerClosed)` if the pacer is (or becomes) closed, so the
    /// capture thread can exit promptly during teardown.
    pub fn produce(&self, frame: VideoFrame) -> Result<(), PacerClosed> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(PacerClosed);
        }
        slot.frame = Some(frame);
        self.frame_ready.notify_one();
        if slot.consumers == 0 {
            return Ok(());
        }
        slot.awaiting_ack = true;
        while slot.awaiting_ack && !slot.closed && slot.consumers > 0 {
            self.acked.wait(&mut slot);
        }
        if slot.closed {
            return Err(PacerClosed);
        }
        Ok(())
    }

    /// Register a consumer. While at least one consumer is attached,
    /// `produce` blocks until `consumed` is called.
    pub fn attach(&self) {
        let mut slot = self.slot.lock();
        slot.consumers += 1;
    }

    /// Deregister a consumer, releasing a blocked producer if this was the
    /// last one.
    pub fn detach(&self) {
        let mut slot = self.slot.lock();
        slot.consumers = slot.consumers.saturating_sub(1);
        if slot.consumers == 0 {
            slot.awaiting_ack = false;
            self.acked.notify_all();
        }
    }

    /// Take the most recently published frame, if any
    pub fn take(&self) -> Option<VideoFrame> {
        self.slot.lock().frame.take()
    }

    /// Block until a frame is published, then take it. Returns `None` on
    /// timeout or close.
    pub fn wait_frame(&self, timeout: Duration) -> Option<VideoFrame> {
        let mut slot = self.slot.lock();
        let deadline = std::time::Instant::now() + timeout;
        while slot.frame.is_none() && !slot.closed {
            if self
                .frame_ready
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                break;
            }
        }
        slot.frame.take()
    }

    /// Acknowledge the published frame, waking exactly one waiting producer
    pub fn consumed(&self) {
        let mut slot = self.slot.lock();
        slot.awaiting_ack = false;
        self.acked.notify_one();
    }

    /// Tear down: every current and future waiter returns promptly
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        slot.awaiting_ack = false;
        self.acked.notify_all();
        self.frame_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }
}
