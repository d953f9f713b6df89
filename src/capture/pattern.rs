//! Synthetic camera for running without hardware

use super::{CaptureError, CaptureFeeder, FrameSource};
use crate::config::StreamConfig;
use crate::streaming::RateLimiter;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Generates a moving test pattern, JPEG-encoded at the configured quality
pub struct TestPatternSource {
    width: u32,
    height: u32,
    quality: u8,
    interval: Duration,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(stream: &StreamConfig) -> Self {
        Self {
            width: stream.frame_width,
            height: stream.frame_height,
            quality: stream.jpeg_quality,
            interval: stream.frame_interval(),
            frame_index: 0,
        }
    }

    /// Encodes the next pattern frame
    pub fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let image = self.render();
        self.frame_index += 1;

        let mut jpeg = Vec::with_capacity((self.width * self.height / 8) as usize);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&image)?;
        Ok(jpeg)
    }

    fn render(&self) -> RgbImage {
        let bar_width = (self.width / 16).max(1);
        let bar_x = (self.frame_index * 8 % u64::from(self.width)) as u32;
        let shade = (self.frame_index % 256) as u8;

        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= bar_x && x < bar_x + bar_width {
                Rgb([255, 255, 255])
            } else {
                let r = (x * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                Rgb([r, g, shade])
            }
        })
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &'static str {
        "test-pattern"
    }

    fn run(&mut self, feeder: &mut CaptureFeeder, stop: &AtomicBool) -> Result<(), CaptureError> {
        let mut limiter = RateLimiter::new(self.interval);

        while !stop.load(Ordering::Relaxed) {
            let deadline = limiter.next_allowed_time();
            let wait = deadline.saturating_duration_since(tokio::time::Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }

            let jpeg = self.next_frame()?;
            feeder.on_bytes(&jpeg);
        }

        Ok(())
    }
}
