//! Latest-value-wins frame slot shared by one producer and many viewers

use super::Frame;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Outcome of waiting on a [`FrameSlot`]
#[derive(Debug, Clone)]
pub enum Wait {
    /// A frame newer than the caller's known sequence
    Frame(Frame),

    /// Nothing new arrived before the timeout (normal on a slow camera)
    TimedOut,

    /// The slot was closed and will never publish again
    Closed,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<Frame>,
    sequence: u64,
    closed: bool,
}

impl SlotState {
    fn outcome_after(&self, known_sequence: u64) -> Option<Wait> {
        if self.sequence > known_sequence {
            if let Some(frame) = &self.latest {
                return Some(Wait::Frame(frame.clone()));
            }
        }

        if self.closed {
            return Some(Wait::Closed);
        }

        None
    }
}

/// Single-slot holder for the most recent encoded frame
///
/// The frame and its sequence number are replaced together under one lock,
/// so a reader never sees a torn frame. The lock only guards the swap of a
/// [`Bytes`] handle; no I/O ever happens while it is held.
///
/// Readers compare sequence numbers instead of relying on wakeups alone:
/// a reader that was busy writing to its socket when a frame was published
/// still sees it on the next call instead of hanging until the one after.
pub struct FrameSlot {
    state: Mutex<SlotState>,
    frame_ready: Condvar,
    frame_notify: Notify,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            frame_ready: Condvar::new(),
            frame_notify: Notify::new(),
        }
    }

    /// Replaces the held frame and wakes every waiter
    ///
    /// # Returns
    /// - Some(sequence) assigned to the new frame
    /// - None if the slot is closed (the frame is discarded)
    pub fn publish(&self, data: impl Into<Bytes>) -> Option<u64> {
        let data = data.into();
        let captured_at = Instant::now();

        let sequence = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.sequence += 1;
            state.latest = Some(Frame {
                data,
                sequence: state.sequence,
                captured_at,
            });
            state.sequence
        };

        self.frame_ready.notify_all();
        self.frame_notify.notify_waiters();

        Some(sequence)
    }

    /// Blocks the calling thread until a frame newer than `known_sequence`
    /// exists, the timeout elapses, or the slot is closed
    pub fn wait_next(&self, known_sequence: u64, timeout: Duration) -> Wait {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(outcome) = state.outcome_after(known_sequence) {
                return outcome;
            }

            match deadline {
                Some(deadline) => {
                    if self.frame_ready.wait_until(&mut state, deadline).timed_out() {
                        return state
                            .outcome_after(known_sequence)
                            .unwrap_or(Wait::TimedOut);
                    }
                }
                None => self.frame_ready.wait(&mut state),
            }
        }
    }

    /// Async counterpart of [`FrameSlot::wait_next`] for tokio tasks
    pub async fn wait_next_async(&self, known_sequence: u64, timeout: Duration) -> Wait {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        loop {
            // Register interest before checking, otherwise a publish between
            // the check and the await would go unnoticed.
            let notified = self.frame_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = self.state.lock().outcome_after(known_sequence);
            if let Some(outcome) = ready {
                return outcome;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = &mut sleep => {
                    let ready = self.state.lock().outcome_after(known_sequence);
                    return ready.unwrap_or(Wait::TimedOut);
                }
            }
        }
    }

    /// Resolves once the slot is closed
    pub async fn closed(&self) {
        loop {
            let notified = self.frame_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().closed {
                return;
            }

            notified.await;
        }
    }

    /// Current frame without waiting, `None` before the first publish
    pub fn peek(&self) -> Option<Frame> {
        self.state.lock().latest.clone()
    }

    /// Sequence number of the current frame (0 before the first publish)
    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Stops accepting frames and wakes every waiter with [`Wait::Closed`]
    /// once it has consumed the last frame
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.frame_ready.notify_all();
        self.frame_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
