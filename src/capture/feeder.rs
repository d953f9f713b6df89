//! Cuts an unframed encoder byte stream into JPEG frames

use crate::frame::{FrameSlot, EOI, SOI};
use bytes::BytesMut;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Smallest accepted accumulation cap
pub const MIN_BUFFER_BYTES: usize = 64 * 1024;

/// Snapshot of feeder statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeederStats {
    /// Complete frames handed to the slot
    pub frames_published: u64,

    /// Total bytes received from the encoder
    pub bytes_received: u64,

    /// Bytes thrown away (before the first marker, overflows, truncated tail)
    pub bytes_discarded: u64,

    /// Frames dropped for exceeding the accumulation cap
    pub overflows: u64,
}

/// Lock-free counters shared with whoever reports statistics
#[derive(Debug, Default)]
pub struct FeederCounters {
    frames_published: AtomicU64,
    bytes_received: AtomicU64,
    bytes_discarded: AtomicU64,
    overflows: AtomicU64,
}

impl FeederCounters {
    pub fn snapshot(&self) -> FeederStats {
        FeederStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

/// Streaming frame-boundary detector in front of a [`FrameSlot`]
///
/// Every start-of-image marker closes the frame accumulated so far and
/// publishes it. Markers split across two `on_bytes` calls are recognized.
/// The accumulation buffer never grows past `max_buffer_bytes`: an oversized
/// frame is dropped and scanning resumes at the next marker.
pub struct CaptureFeeder {
    slot: Arc<FrameSlot>,
    buffer: BytesMut,
    max_buffer_bytes: usize,

    // Accumulating a frame (a marker has been seen since the last reset)
    in_frame: bool,

    // Previous chunk ended with 0xFF, possibly the first half of a marker
    pending_ff: bool,

    counters: Arc<FeederCounters>,
}

impl CaptureFeeder {
    /// Creates a feeder publishing into `slot`
    ///
    /// # Arguments
    /// * `slot` - Destination for complete frames
    /// * `max_buffer_bytes` - Accumulation cap, raised to [`MIN_BUFFER_BYTES`]
    pub fn new(slot: Arc<FrameSlot>, max_buffer_bytes: usize) -> Self {
        let max_buffer_bytes = max_buffer_bytes.max(MIN_BUFFER_BYTES);

        Self {
            slot,
            buffer: BytesMut::with_capacity(MIN_BUFFER_BYTES),
            max_buffer_bytes,
            in_frame: false,
            pending_ff: false,
            counters: Arc::new(FeederCounters::default()),
        }
    }

    /// Consumes the next piece of encoder output
    pub fn on_bytes(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        self.counters
            .bytes_received
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut start = 0;

        if self.pending_ff && chunk[0] == SOI[1] {
            // Marker straddles the chunk boundary: the 0xFF is already
            // buffered (or discarded) and belongs to the new frame.
            if self.in_frame {
                let len = self.buffer.len().saturating_sub(1);
                self.buffer.truncate(len);
                self.complete_frame();
            } else {
                self.counters.bytes_discarded.fetch_sub(1, Ordering::Relaxed);
            }
            self.begin_frame(&SOI[..1]);
        }
        self.pending_ff = false;

        let mut pos = start;
        while let Some(offset) = find_marker(&chunk[pos..]) {
            let marker = pos + offset;

            if self.in_frame {
                self.append(&chunk[start..marker]);
                self.complete_frame();
            } else {
                self.discarded(marker - start);
            }

            self.begin_frame(&[]);
            start = marker;
            pos = marker + SOI.len();
        }

        let tail = &chunk[start..];
        if self.in_frame {
            self.append(tail);
        } else {
            self.discarded(tail.len());
        }

        self.pending_ff = chunk[chunk.len() - 1] == SOI[0];
    }

    /// Ends the stream
    ///
    /// A trailing frame that already carries its end-of-image marker is
    /// published; anything else still buffered is dropped.
    ///
    /// # Returns
    /// Number of bytes that were still buffered and never published
    pub fn finish(&mut self) -> usize {
        let mut dropped = 0;

        if self.in_frame && self.buffer.ends_with(&EOI) {
            self.complete_frame();
        } else if !self.buffer.is_empty() {
            dropped = self.buffer.len();
            debug!(bytes = dropped, "Dropping incomplete trailing frame");
            self.discarded(dropped);
        }

        self.buffer.clear();
        self.in_frame = false;
        self.pending_ff = false;

        dropped
    }

    /// Gets feeder statistics
    pub fn stats(&self) -> FeederStats {
        self.counters.snapshot()
    }

    /// Shared counters, readable from other threads while the feeder runs
    pub fn counters(&self) -> Arc<FeederCounters> {
        Arc::clone(&self.counters)
    }

    /// Slot the feeder publishes into
    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Bytes currently held for the frame in progress
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn begin_frame(&mut self, prefix: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(prefix);
        self.in_frame = true;
    }

    fn append(&mut self, bytes: &[u8]) {
        if !self.in_frame {
            self.discarded(bytes.len());
            return;
        }

        if self.buffer.len() + bytes.len() > self.max_buffer_bytes {
            let dropped = self.buffer.len() + bytes.len();
            warn!(
                bytes = dropped,
                limit = self.max_buffer_bytes,
                "Frame exceeds accumulation limit, dropping it"
            );
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
            self.discarded(dropped);
            self.buffer.clear();
            self.in_frame = false;
            return;
        }

        self.buffer.extend_from_slice(bytes);
    }

    fn complete_frame(&mut self) {
        if !self.in_frame || self.buffer.is_empty() {
            return;
        }

        let frame = self.buffer.split().freeze();
        let len = frame.len();

        match self.slot.publish(frame) {
            Some(sequence) => {
                self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, bytes = len, "Frame published");
            }
            None => self.discarded(len),
        }
    }

    fn discarded(&self, bytes: usize) {
        self.counters
            .bytes_discarded
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Position of the first complete start-of-image marker in `data`
fn find_marker(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == SOI)
}
