//! Platform detection for camera sources

use crate::config::{CaptureConfig, StreamConfig};
use std::env;
use std::path::Path;

/// Platform information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformInfo {
    /// macOS (Darwin)
    MacOS,

    /// Raspberry Pi (detected via /proc/device-tree)
    RaspberryPi,

    /// Generic Linux
    Linux,
}

/// Detects current platform
pub fn detect_platform() -> PlatformInfo {
    match env::consts::OS {
        "macos" => PlatformInfo::MacOS,
        "linux" if is_raspberry_pi() => PlatformInfo::RaspberryPi,
        _ => PlatformInfo::Linux,
    }
}

/// Checks if running on Raspberry Pi
fn is_raspberry_pi() -> bool {
    ["/proc/device-tree/model", "/sys/firmware/devicetree/base/model"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(Path::new(path)).ok())
        .any(|model| model.contains("Raspberry Pi"))
}

/// Camera device name the platform's capture stack expects
pub fn default_device(platform: PlatformInfo) -> &'static str {
    match platform {
        // avfoundation addresses cameras by index
        PlatformInfo::MacOS => "0",
        PlatformInfo::RaspberryPi | PlatformInfo::Linux => "/dev/video0",
    }
}

/// Encoder command writing an endless MJPEG stream to stdout
pub fn default_encoder_command(
    platform: PlatformInfo,
    stream: &StreamConfig,
    capture: &CaptureConfig,
) -> Vec<String> {
    let size = format!("{}x{}", stream.frame_width, stream.frame_height);

    let mut argv: Vec<String> = match platform {
        PlatformInfo::RaspberryPi => vec![
            "rpicam-vid".into(),
            "--nopreview".into(),
            "-t".into(),
            "0".into(),
            "--codec".into(),
            "mjpeg".into(),
            "--width".into(),
            stream.frame_width.to_string(),
            "--height".into(),
            stream.frame_height.to_string(),
            "--framerate".into(),
            stream.target_fps.to_string(),
            "-q".into(),
            stream.jpeg_quality.to_string(),
        ],
        PlatformInfo::Linux => vec![
            "ffmpeg".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "v4l2".into(),
            "-video_size".into(),
            size,
            "-framerate".into(),
            stream.target_fps.to_string(),
            "-i".into(),
            capture.device.clone(),
        ],
        PlatformInfo::MacOS => vec![
            "ffmpeg".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "avfoundation".into(),
            "-video_size".into(),
            size,
            "-framerate".into(),
            stream.target_fps.to_string(),
            "-i".into(),
            capture.device.clone(),
        ],
    };

    if platform == PlatformInfo::RaspberryPi {
        match capture.flip_method.as_deref() {
            Some("vertical-flip") => argv.push("--vflip".into()),
            Some("horizontal-flip") => argv.push("--hflip".into()),
            Some("rotate-180") => argv.extend(["--rotation".into(), "180".into()]),
            _ => {}
        }
        argv.extend(["-o".into(), "-".into()]);
    } else {
        // ffmpeg quality scale is 2 (best) to 31 (worst)
        let qscale = 31 - (u32::from(stream.jpeg_quality) * 29 / 100);
        argv.extend([
            "-f".into(),
            "mjpeg".into(),
            "-q:v".into(),
            qscale.to_string(),
            "-".into(),
        ]);
    }

    argv
}
