//! Streaming statistics

use super::SessionRegistry;
use crate::capture::{FeederCounters, FeederStats};
use crate::frame::FrameSlot;
use serde::{Deserialize, Serialize};

/// Server-wide streaming statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamerStats {
    /// Sequence number of the newest frame
    pub current_sequence: u64,

    /// Frames cut from the encoder stream
    pub frames_captured: u64,

    /// Frames dropped for exceeding the accumulation cap
    pub capture_overflows: u64,

    /// Encoder bytes thrown away
    pub bytes_discarded: u64,

    /// Viewers currently connected
    pub active_sessions: usize,

    /// Viewers ever connected
    pub total_sessions: u64,

    /// Viewers rejected by the client limit
    pub rejected_sessions: u64,

    /// Frames sent over all viewers
    pub frames_sent: u64,

    /// Bytes sent over all viewers
    pub bytes_sent: u64,
}

impl StreamerStats {
    /// Gathers a snapshot from the live components
    pub fn collect(slot: &FrameSlot, feeder: &FeederCounters, registry: &SessionRegistry) -> Self {
        let FeederStats {
            frames_published,
            bytes_discarded,
            overflows,
            ..
        } = feeder.snapshot();

        Self {
            current_sequence: slot.sequence(),
            frames_captured: frames_published,
            capture_overflows: overflows,
            bytes_discarded,
            active_sessions: registry.active_sessions(),
            total_sessions: registry.total_sessions(),
            rejected_sessions: registry.rejected_sessions(),
            frames_sent: registry.frames_sent(),
            bytes_sent: registry.bytes_sent(),
        }
    }

    /// Calculates capture frame rate based on delta
    pub fn capture_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let frames_delta = self.frames_captured.saturating_sub(previous.frames_captured);
        frames_delta as f64 / elapsed_secs
    }

    /// Calculates outbound bitrate in kbps based on delta
    pub fn calculate_bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let bytes_delta = self.bytes_sent.saturating_sub(previous.bytes_sent);
        (bytes_delta as f64 * 8.0) / elapsed_secs / 1000.0
    }
}
