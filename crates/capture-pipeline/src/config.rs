//! Pipeline configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the capture pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of in-flight capture buffers on the byte-buffer path
    pub buffer_count: usize,
    /// Deliver frames as GPU textures instead of byte buffers
    pub capture_to_texture: bool,
    /// Total camera open attempts before giving up
    pub max_open_attempts: u32,
    /// Delay between camera open attempts
    pub open_retry_delay: Duration,
    /// Freeze watchdog sampling period
    pub watchdog_period: Duration,
    /// Frameless time before a freeze is reported
    pub freeze_timeout: Duration,
    /// How long `stop_capture` waits for the worker acknowledgement
    pub stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_count: frame_pool::DEFAULT_CAPTURE_BUFFERS,
            capture_to_texture: false,
            max_open_attempts: 3,
            open_retry_delay: Duration::from_millis(300),
            watchdog_period: Duration::from_secs(2),
            freeze_timeout: Duration::from_secs(6),
            stop_timeout: Duration::from_secs(7),
        }
    }
}
