//! Viewer-side client for the MJPEG stream
//!
//! [`StreamClient`] reads the HTTP body, cuts it into JPEG images with a
//! [`JpegExtractor`] and publishes them into a local [`FrameSlot`]. A
//! separate consumer, [`consume`], always takes the newest frame from that
//! slot, decodes it and hands it to a [`FrameSink`]. A slow sink therefore
//! skips frames instead of falling behind the live stream.

mod extractor;
mod sink;

pub use extractor::JpegExtractor;
pub use sink::{FrameSink, LoggingSink, SnapshotSink};

use crate::frame::{FrameSlot, Wait};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cap on one image while it is being reassembled
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream URL served by `mjpeg-server`
pub fn feed_url(ip: &str, port: u16) -> String {
    format!("http://{}:{}/video_feed", ip, port)
}

/// Pulls an MJPEG stream into a local frame slot
pub struct StreamClient {
    url: String,
    http: reqwest::Client,
    slot: Arc<FrameSlot>,
    max_image_bytes: usize,
}

impl StreamClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            url: url.into(),
            http,
            slot: Arc::new(FrameSlot::new()),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        })
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Slot receiving every extracted image
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    /// Reads the stream until the server ends it or the slot is closed
    ///
    /// The slot is closed on return, whatever the outcome, so a consumer
    /// blocked on it wakes up.
    ///
    /// # Returns
    /// Number of images published
    pub async fn run(&self) -> Result<u64, ClientError> {
        let result = self.pump().await;
        self.slot.close();
        result
    }

    async fn pump(&self) -> Result<u64, ClientError> {
        info!(url = %self.url, "Connecting to video stream");

        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        let mut extractor = JpegExtractor::new(self.max_image_bytes);
        let mut body = response.bytes_stream();
        let mut published = 0u64;

        loop {
            // A stalled server sends nothing, so closing must not wait for data
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = self.slot.closed() => {
                    debug!("Local slot closed, leaving stream");
                    return Ok(published);
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            for image in extractor.push(&chunk) {
                if self.slot.publish(image).is_none() {
                    debug!("Local slot closed, leaving stream");
                    return Ok(published);
                }
                published += 1;
            }
        }

        info!(
            images = published,
            discarded = extractor.discarded(),
            "Server ended the stream"
        );
        Ok(published)
    }
}

/// Hands the newest frame of `slot` to `sink` until the slot is closed
///
/// Blocks the calling thread. Frames that fail to decode are logged and
/// skipped. A sink error closes the slot, which also stops the
/// [`StreamClient`] feeding it.
///
/// # Returns
/// Number of frames delivered to the sink
pub fn consume(
    slot: &FrameSlot,
    sink: &mut dyn FrameSink,
    timeout: Duration,
) -> Result<u64, ClientError> {
    let result = deliver(slot, sink, timeout);
    if result.is_err() {
        slot.close();
    }
    result
}

fn deliver(
    slot: &FrameSlot,
    sink: &mut dyn FrameSink,
    timeout: Duration,
) -> Result<u64, ClientError> {
    let mut known_sequence = 0;
    let mut delivered = 0;

    loop {
        let frame = match slot.wait_next(known_sequence, timeout) {
            Wait::Frame(frame) => frame,
            Wait::TimedOut => {
                debug!(known_sequence, "No new frame yet");
                continue;
            }
            Wait::Closed => return Ok(delivered),
        };

        let skipped = frame.sequence() - known_sequence - 1;
        if skipped > 0 {
            debug!(skipped, "Consumer behind, frames skipped");
        }
        known_sequence = frame.sequence();

        match image::load_from_memory(frame.data()) {
            Ok(image) => {
                sink.on_frame(&frame, &image)?;
                delivered += 1;
            }
            Err(e) => warn!(sequence = frame.sequence(), error = %e, "Undecodable frame"),
        }
    }
}
