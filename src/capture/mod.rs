//! Camera capture: encoder byte streams in, complete frames out
//!
//! A [`FrameSource`] owns the camera (or encoder process) and drives a
//! [`CaptureFeeder`] from a dedicated thread. The feeder cuts the bytes into
//! frames and publishes them into the shared [`FrameSlot`](crate::frame::FrameSlot).

mod command;
mod feeder;
#[cfg(feature = "gstreamer")]
mod gst;
mod pattern;
mod platform;
mod reader;

pub use command::CommandSource;
pub use feeder::{CaptureFeeder, FeederCounters, FeederStats, MIN_BUFFER_BYTES};
#[cfg(feature = "gstreamer")]
pub use gst::GstSource;
pub use pattern::TestPatternSource;
pub use platform::{default_device, default_encoder_command, detect_platform, PlatformInfo};
pub use reader::ReaderSource;

use crate::config::{Config, SourceKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder exited: {0}")]
    EncoderExited(String),

    #[error("encoder stream ended unexpectedly")]
    EndOfStream,

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("capture thread panicked")]
    Panicked,
}

/// Producer of raw encoder output
///
/// Implementations block the calling thread and push every chunk they read
/// into the feeder until the stream ends, an error occurs, or `stop` is set.
pub trait FrameSource: Send {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Runs the capture loop on the calling thread
    fn run(&mut self, feeder: &mut CaptureFeeder, stop: &AtomicBool) -> Result<(), CaptureError>;
}

/// Builds the source selected in the configuration
pub fn build_source(config: &Config) -> Result<Box<dyn FrameSource>, CaptureError> {
    let source: Box<dyn FrameSource> = match config.capture.source {
        SourceKind::TestPattern => Box::new(TestPatternSource::new(&config.stream)),
        SourceKind::Command => {
            let argv = if config.capture.command.is_empty() {
                default_encoder_command(detect_platform(), &config.stream, &config.capture)
            } else {
                config.capture.command.clone()
            };
            Box::new(CommandSource::new(argv, config.capture.read_chunk_bytes)?)
        }
        SourceKind::Stdin => Box::new(ReaderSource::new(
            "stdin",
            std::io::stdin(),
            config.capture.read_chunk_bytes,
        )),
        #[cfg(feature = "gstreamer")]
        SourceKind::Gstreamer => Box::new(GstSource::new(&config.stream, &config.capture)?),
        #[cfg(not(feature = "gstreamer"))]
        SourceKind::Gstreamer => {
            return Err(CaptureError::Pipeline(
                "built without the `gstreamer` feature".to_string(),
            ))
        }
    };

    Ok(source)
}

/// Running capture thread
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<(), CaptureError>>,
}

impl CaptureHandle {
    /// Asks the source to stop at its next chunk boundary
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Shared stop flag, for callers that hand the join to another thread
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Blocks until the capture thread exits and returns its result
    pub fn join(self) -> Result<(), CaptureError> {
        self.thread.join().map_err(|_| CaptureError::Panicked)?
    }
}

/// Starts `source` on a dedicated thread feeding `feeder`
///
/// The slot is closed when the thread exits so every viewer ends its stream.
/// A source that stops on its own, without `stop` being requested, is a
/// producer fault: there is no degraded mode without frames.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    mut feeder: CaptureFeeder,
) -> Result<CaptureHandle, CaptureError> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = thread::Builder::new()
        .name(format!("capture-{}", source.name()))
        .spawn(move || {
            info!(source = source.name(), "Capture started");

            let result = source.run(&mut feeder, &thread_stop);
            feeder.finish();
            feeder.slot().close();

            let stats = feeder.stats();
            let result = match result {
                Ok(()) if !thread_stop.load(Ordering::Relaxed) => Err(CaptureError::EndOfStream),
                other => other,
            };

            match &result {
                Ok(()) => info!(
                    source = source.name(),
                    frames = stats.frames_published,
                    overflows = stats.overflows,
                    "Capture stopped"
                ),
                Err(e) => error!(source = source.name(), error = %e, "Capture failed"),
            }

            result
        })?;

    Ok(CaptureHandle { stop, thread })
}
