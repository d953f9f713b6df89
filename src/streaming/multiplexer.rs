//! One viewer's endless sequence of multipart frames

use super::multipart::encode_part;
use super::rate_limiter::RateLimiter;
use super::session::ConsumerSession;
use crate::frame::{Frame, FrameSlot, Wait};
use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Serves one viewer from the shared [`FrameSlot`]
///
/// Each iteration sleeps until the rate limiter allows the next emission,
/// then waits up to one frame interval for a frame newer than the last one
/// sent. A timeout emits nothing, so a stalled camera never produces
/// duplicate parts. The stream ends when the slot is closed; dropping the
/// multiplexer (or the stream built from it) releases the session.
pub struct StreamMultiplexer {
    slot: Arc<FrameSlot>,
    session: ConsumerSession,
    limiter: RateLimiter,
}

impl StreamMultiplexer {
    pub fn new(slot: Arc<FrameSlot>, session: ConsumerSession) -> Self {
        let limiter = RateLimiter::new(session.interval());

        Self {
            slot,
            session,
            limiter,
        }
    }

    pub fn session(&self) -> &ConsumerSession {
        &self.session
    }

    /// Waits for the next frame this viewer should get and marks it sent
    ///
    /// Returns `None` once the slot is closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let deadline = self.limiter.next_allowed_time();
            tokio::time::sleep_until(deadline).await;

            match self
                .slot
                .wait_next_async(self.session.known_sequence(), self.limiter.interval())
                .await
            {
                Wait::Frame(frame) => {
                    self.session.advance(&frame);
                    return Some(frame);
                }
                Wait::TimedOut => continue,
                Wait::Closed => {
                    debug!(session_id = self.session.id(), "Frame source closed");
                    return None;
                }
            }
        }
    }

    /// Waits for the next frame and encodes it as a multipart part
    pub async fn next_part(&mut self) -> Option<Bytes> {
        let frame = self.next_frame().await?;
        let part = encode_part(frame.data());
        self.session.record_bytes(part.len());
        Some(part)
    }

    /// Lazy body stream for an HTTP response
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut mux| async move {
            let part = mux.next_part().await?;
            Some((Ok(part), mux))
        })
    }

    /// Writes parts into `writer` until the slot closes or a write fails
    ///
    /// # Returns
    /// Number of frames written before the slot closed
    pub async fn serve<W>(mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(part) = self.next_part().await {
            writer.write_all(&part).await?;
            writer.flush().await?;
        }

        Ok(self.session.frames_sent())
    }
}
