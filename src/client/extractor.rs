//! Pulls whole JPEG images out of an MJPEG response body

use crate::frame::{EOI, SOI};
use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// Incremental SOI..EOI scanner over arbitrary body chunks
///
/// Multipart headers and boundaries between images are skipped as garbage.
/// A partial image that grows past `max_buffer_bytes` is dropped and scanning
/// restarts at the next start-of-image marker.
#[derive(Debug)]
pub struct JpegExtractor {
    buffer: BytesMut,
    max_buffer_bytes: usize,
    discarded: u64,
}

impl JpegExtractor {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer_bytes,
            discarded: 0,
        }
    }

    /// Feeds one chunk and returns every image it completed, oldest first
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut images = Vec::new();

        loop {
            let Some(start) = find(&self.buffer, SOI, 0) else {
                // Keep a trailing 0xFF, it may be the first half of a marker
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                self.skip(self.buffer.len() - keep);
                break;
            };
            self.skip(start);

            match find(&self.buffer, EOI, SOI.len()) {
                Some(end) => images.push(self.buffer.split_to(end + EOI.len()).freeze()),
                None => break,
            }
        }

        if self.buffer.len() > self.max_buffer_bytes {
            warn!(
                buffered = self.buffer.len(),
                max = self.max_buffer_bytes,
                "Image without end marker exceeds buffer cap, dropping"
            );
            let len = self.buffer.len();
            self.skip(len);
        }

        images
    }

    /// Bytes held for an unfinished image
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes thrown away so far (boundaries, headers, dropped images)
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn skip(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }
}

fn find(data: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
