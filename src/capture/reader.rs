//! Capture from any blocking byte reader (stdin, pipes, files)

use super::{CaptureError, CaptureFeeder, FrameSource};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Pulls encoder output from a [`Read`] in fixed-size chunks
pub struct ReaderSource<R> {
    name: &'static str,
    reader: R,
    chunk_bytes: usize,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(name: &'static str, reader: R, chunk_bytes: usize) -> Self {
        Self {
            name,
            reader,
            chunk_bytes: chunk_bytes.max(1),
        }
    }
}

impl<R: Read + Send> FrameSource for ReaderSource<R> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, feeder: &mut CaptureFeeder, stop: &AtomicBool) -> Result<(), CaptureError> {
        pump(&mut self.reader, self.chunk_bytes, feeder, stop)
    }
}

/// Copies `reader` into `feeder` until EOF or `stop`
pub(crate) fn pump<R: Read>(
    reader: &mut R,
    chunk_bytes: usize,
    feeder: &mut CaptureFeeder,
    stop: &AtomicBool,
) -> Result<(), CaptureError> {
    let mut chunk = vec![0u8; chunk_bytes];

    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("Encoder stream reached EOF");
                return Ok(());
            }
            Ok(n) => feeder.on_bytes(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
