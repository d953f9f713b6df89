//! Downstream consumers of decoded frames

use super::ClientError;
use crate::frame::Frame;
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Receives every frame the client decodes
///
/// This is where detection or display hooks in. Implementations run on the
/// consumer loop, so slow sinks make the client skip frames, never queue them.
pub trait FrameSink: Send {
    fn on_frame(&mut self, frame: &Frame, image: &DynamicImage) -> Result<(), ClientError>;
}

impl FrameSink for Vec<Box<dyn FrameSink>> {
    fn on_frame(&mut self, frame: &Frame, image: &DynamicImage) -> Result<(), ClientError> {
        for sink in self.iter_mut() {
            sink.on_frame(frame, image)?;
        }
        Ok(())
    }
}

/// Logs frame size and the received frame rate
pub struct LoggingSink {
    report_every: u64,
    frames: u64,
    window_start: Instant,
}

impl LoggingSink {
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
            frames: 0,
            window_start: Instant::now(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for LoggingSink {
    fn on_frame(&mut self, frame: &Frame, image: &DynamicImage) -> Result<(), ClientError> {
        self.frames += 1;
        debug!(
            sequence = frame.sequence(),
            bytes = frame.len(),
            width = image.width(),
            height = image.height(),
            "Frame decoded"
        );

        if self.frames % self.report_every == 0 {
            let elapsed = self.window_start.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 {
                self.report_every as f64 / elapsed
            } else {
                0.0
            };
            info!(
                "📊 Received {} frames | {}x{} | {:.1} fps",
                self.frames,
                image.width(),
                image.height(),
                fps
            );
            self.window_start = Instant::now();
        }

        Ok(())
    }
}

/// Writes every n-th frame as a JPEG file into a directory
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    seen: u64,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self, ClientError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            every: every.max(1),
            seen: 0,
        })
    }

    fn path_for(&self, frame: &Frame) -> PathBuf {
        self.dir.join(format!("frame_{:08}.jpg", frame.sequence()))
    }
}

impl FrameSink for SnapshotSink {
    fn on_frame(&mut self, frame: &Frame, _image: &DynamicImage) -> Result<(), ClientError> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }

        // Frames arrive JPEG-encoded already, no need to re-encode
        let path = self.path_for(frame);
        std::fs::write(&path, frame.data())?;
        debug!(path = %path.display(), "Snapshot saved");
        Ok(())
    }
}
