//! Encoded frames and the single-slot exchange between producer and viewers

mod slot;

pub use slot::{FrameSlot, Wait};

use bytes::Bytes;
use std::time::Instant;

/// JPEG start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete encoded image
///
/// Cloning is cheap: the payload is a reference-counted [`Bytes`] shared by
/// every viewer that picked it up.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Encoded payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Position in the publish order, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the frame was published
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
