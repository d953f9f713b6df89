//! Per-viewer session accounting

use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks live viewer sessions and enforces the client limit
pub struct SessionRegistry {
    max_sessions: usize,
    active_sessions: Mutex<usize>,
    session_counter: AtomicU64,
    rejected: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            max_sessions,
            active_sessions: Mutex::new(0),
            session_counter: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    /// Opens a session emitting at most one frame per `interval`
    ///
    /// Returns `None` when the client limit is reached.
    pub fn open(self: &Arc<Self>, interval: Duration) -> Option<ConsumerSession> {
        {
            let mut active = self.active_sessions.lock();
            if *active >= self.max_sessions {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(max = self.max_sessions, "Max clients reached, rejecting viewer");
                return None;
            }
            *active += 1;
        }

        let id = self.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(session_id = id, active = self.active_sessions(), "Viewer session started");

        Some(ConsumerSession {
            id,
            known_sequence: 0,
            interval,
            frames_sent: 0,
            registry: Arc::clone(self),
        })
    }

    /// Sessions currently alive
    pub fn active_sessions(&self) -> usize {
        *self.active_sessions.lock()
    }

    /// Sessions ever opened
    pub fn total_sessions(&self) -> u64 {
        self.session_counter.load(Ordering::Relaxed)
    }

    /// Viewers turned away by the client limit
    pub fn rejected_sessions(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Frames emitted over all sessions
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Multipart bytes emitted over all sessions
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

/// State of one connected viewer
///
/// Deregisters itself on drop, so the active count follows the lifetime of
/// whatever owns the session (the response body of that connection).
#[derive(Debug)]
pub struct ConsumerSession {
    id: u64,
    known_sequence: u64,
    interval: Duration,
    frames_sent: u64,
    registry: Arc<SessionRegistry>,
}

impl ConsumerSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence of the last frame emitted (0 before the first)
    pub fn known_sequence(&self) -> u64 {
        self.known_sequence
    }

    /// Target time between two emitted frames
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Marks `frame` as delivered to this viewer
    pub(crate) fn advance(&mut self, frame: &Frame) {
        debug_assert!(frame.sequence() > self.known_sequence);

        self.known_sequence = frame.sequence();
        self.frames_sent += 1;
        self.registry.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, bytes: usize) {
        self.registry
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl Drop for ConsumerSession {
    fn drop(&mut self) {
        let remaining = {
            let mut active = self.registry.active_sessions.lock();
            *active = active.saturating_sub(1);
            *active
        };

        info!(
            session_id = self.id,
            frames = self.frames_sent,
            active = remaining,
            "Viewer session ended"
        );
        debug!(session_id = self.id, last_sequence = self.known_sequence, "Session released");
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("max_sessions", &self.max_sessions)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}
