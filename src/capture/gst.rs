//! GStreamer-based MJPEG capture

use super::platform::{detect_platform, PlatformInfo};
use super::{CaptureError, CaptureFeeder, FrameSource};
use crate::config::{CaptureConfig, StreamConfig};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

impl From<gst::glib::Error> for CaptureError {
    fn from(e: gst::glib::Error) -> Self {
        CaptureError::Pipeline(e.to_string())
    }
}

/// Camera → jpegenc → appsink, each sample pushed into the feeder
pub struct GstSource {
    description: String,
    pipeline: Option<gst::Pipeline>,
}

impl GstSource {
    pub fn new(stream: &StreamConfig, capture: &CaptureConfig) -> Result<Self, CaptureError> {
        gst::init()?;

        Ok(Self {
            description: build_pipeline_string(detect_platform(), stream, capture),
            pipeline: None,
        })
    }

    fn start(&mut self) -> Result<gst_app::AppSink, CaptureError> {
        debug!(pipeline = %self.description, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&self.description)?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("Not a pipeline".to_string()))?;

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::Pipeline("No appsink found".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("Not an appsink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Pipeline(format!("{:?}", e)))?;

        self.pipeline = Some(pipeline);
        info!("GStreamer capture started");

        Ok(app_sink)
    }

    fn shutdown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}

impl FrameSource for GstSource {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn run(&mut self, feeder: &mut CaptureFeeder, stop: &AtomicBool) -> Result<(), CaptureError> {
        let app_sink = self.start()?;

        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }

            match app_sink.try_pull_sample(gst::ClockTime::from_mseconds(500)) {
                Some(sample) => {
                    let Some(buffer) = sample.buffer() else {
                        continue;
                    };
                    match buffer.map_readable() {
                        Ok(map) => feeder.on_bytes(map.as_slice()),
                        Err(_) => warn!("Unable to map GStreamer buffer"),
                    }
                }
                None if app_sink.is_eos() => break Ok(()),
                None => {
                    if let Some(err) = self.pending_error() {
                        break Err(err);
                    }
                }
            }
        };

        self.shutdown();
        result
    }
}

impl GstSource {
    fn pending_error(&self) -> Option<CaptureError> {
        let bus = self.pipeline.as_ref()?.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;

        match msg.view() {
            gst::MessageView::Error(err) => Some(CaptureError::Pipeline(err.error().to_string())),
            _ => None,
        }
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds the GStreamer pipeline description for `platform`
pub fn build_pipeline_string(
    platform: PlatformInfo,
    stream: &StreamConfig,
    capture: &CaptureConfig,
) -> String {
    let mut pipeline = match platform {
        PlatformInfo::MacOS => format!(
            "avfvideosrc device-index={} ! video/x-raw,width={},height={},framerate={}/1",
            capture.device, stream.frame_width, stream.frame_height, stream.target_fps
        ),
        PlatformInfo::RaspberryPi => format!(
            "libcamerasrc camera-name=\"{}\" ! video/x-raw,format=NV12,width={},height={},framerate={}/1",
            capture.device, stream.frame_width, stream.frame_height, stream.target_fps
        ),
        PlatformInfo::Linux => format!(
            "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1",
            capture.device, stream.frame_width, stream.frame_height, stream.target_fps
        ),
    };

    if let Some(flip) = capture.flip_method.as_deref() {
        pipeline.push_str(flip_element(flip));
    }

    pipeline.push_str(&format!(
        " ! queue max-size-buffers=2 leaky=downstream ! videoconvert ! jpegenc quality={} ! appsink name=sink max-buffers=2 drop=true sync=false",
        stream.jpeg_quality
    ));

    pipeline
}

fn flip_element(method: &str) -> &'static str {
    match method {
        "vertical-flip" => " ! videoflip video-direction=5",
        "horizontal-flip" => " ! videoflip video-direction=4",
        "rotate-180" => " ! videoflip video-direction=2",
        _ => {
            warn!(method = %method, "Unknown flip method");
            ""
        }
    }
}
