//! Single-camera MJPEG streaming for Raspberry Pi
//!
//! The camera encoder feeds a [`capture::CaptureFeeder`], which cuts the raw
//! byte stream into JPEG frames and publishes them into one shared
//! [`frame::FrameSlot`]. Every HTTP viewer gets its own
//! [`streaming::StreamMultiplexer`] that waits on the slot and serializes the
//! newest frame as a `multipart/x-mixed-replace` part:
//!
//! - Latest-value-wins: slow viewers skip frames, they never queue them
//! - Sequence numbers instead of bare signals, so no wakeup is ever lost
//! - Per-viewer rate limiting with a drift-free deadline grid
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpi_mjpeg_streamer::frame::FrameSlot;
//! use rpi_mjpeg_streamer::capture::CaptureFeeder;
//!
//! let slot = Arc::new(FrameSlot::new());
//! let mut feeder = CaptureFeeder::new(Arc::clone(&slot), 4 * 1024 * 1024);
//! // feeder.on_bytes(&encoder_output);
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod frame;
pub mod streaming;
pub mod web;

// Re-exports for convenience
pub use capture::{CaptureFeeder, CaptureError, FeederStats, FrameSource};
pub use frame::{Frame, FrameSlot, Wait};
pub use streaming::{RateLimiter, SessionRegistry, StreamMultiplexer, StreamerStats};
