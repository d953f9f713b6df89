//! Configuration management for the MJPEG streamer

use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::capture::{self, MIN_BUFFER_BYTES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete streamer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address shown on the index page (auto-detected when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pi_ip: Option<String>,

    /// Statistics logging interval (seconds, 0 = off)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,

    /// Concurrent viewers before new ones get 503
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            pi_ip: None,
            stats_interval_seconds: default_stats_interval(),
            max_clients: default_max_clients(),
        }
    }
}

/// Frame format and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub frame_width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub frame_height: u32,

    /// Maximum frames per second sent to each viewer
    #[serde(default = "default_fps")]
    pub target_fps: u32,

    /// JPEG quality (1-100) requested from the encoder
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,

    /// Cap on bytes accumulated for one frame before it is dropped
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_width: default_width(),
            frame_height: default_height(),
            target_fps: default_fps(),
            jpeg_quality: default_quality(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

impl StreamConfig {
    /// Time between two frames at `target_fps`
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Where encoded frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Synthetic frames, no camera needed
    TestPattern,

    /// External encoder process writing MJPEG to stdout
    Command,

    /// MJPEG piped into our stdin
    Stdin,

    /// GStreamer pipeline (requires the `gstreamer` feature)
    Gstreamer,
}

/// Capture source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Encoder argv for `source = "command"` (empty = platform default)
    #[serde(default)]
    pub command: Vec<String>,

    /// Camera device
    /// - Raspberry Pi: "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10"
    /// - Linux: "/dev/video0"
    /// - macOS: "0"
    #[serde(default = "default_device")]
    pub device: String,

    /// Flip method (optional)
    /// - "vertical-flip"
    /// - "horizontal-flip"
    /// - "rotate-180"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip_method: Option<String>,

    /// Read size when pulling bytes from a pipe
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            command: Vec::new(),
            device: default_device(),
            flip_method: None,
            read_chunk_bytes: default_read_chunk(),
        }
    }
}

// Default value functions
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_stats_interval() -> u64 {
    10
}
fn default_max_clients() -> usize {
    8
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    15
}
fn default_quality() -> u8 {
    80
}
fn default_max_buffer_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_source() -> SourceKind {
    SourceKind::TestPattern
}
fn default_device() -> String {
    capture::default_device(capture::detect_platform()).to_string()
}
fn default_read_chunk() -> usize {
    64 * 1024
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stream = &self.stream;

        if stream.frame_width == 0 || stream.frame_height == 0 {
            return Err(ConfigError::Invalid(
                "frame_width and frame_height must be > 0".to_string(),
            ));
        }

        if stream.frame_width % 8 != 0 || stream.frame_height % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "frame size must be a multiple of 8, got {}x{}",
                stream.frame_width, stream.frame_height
            )));
        }

        if stream.target_fps == 0 || stream.target_fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "target_fps must be between 1 and 120, got {}",
                stream.target_fps
            )));
        }

        if stream.jpeg_quality == 0 || stream.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                stream.jpeg_quality
            )));
        }

        if stream.max_buffer_bytes < MIN_BUFFER_BYTES {
            return Err(ConfigError::Invalid(format!(
                "max_buffer_bytes must be at least {}, got {}",
                MIN_BUFFER_BYTES, stream.max_buffer_bytes
            )));
        }

        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be > 0".to_string()));
        }

        if self.capture.read_chunk_bytes == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_bytes must be > 0".to_string(),
            ));
        }

        if self.capture.source == SourceKind::Gstreamer && !cfg!(feature = "gstreamer") {
            return Err(ConfigError::Invalid(
                "source = \"gstreamer\" needs a build with the `gstreamer` feature".to_string(),
            ));
        }

        Ok(())
    }

    /// Address shown to viewers, auto-detecting if necessary
    pub fn pi_ip(&self) -> String {
        self.server
            .pi_ip
            .clone()
            .unwrap_or_else(|| get_local_ip().unwrap_or_else(|| "localhost".to_string()))
    }

    /// `host:port` the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_ip, self.server.port)
    }
}

/// Attempt to get the local IP address by connecting to an external address
pub fn get_local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let local_addr = socket.local_addr().ok()?;
    Some(local_addr.ip().to_string())
}
