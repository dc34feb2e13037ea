//! Capture pipeline error types

use std::time::Duration;

use camera_driver::DriverError;
use frame_pool::PoolError;
use thiserror::Error;

/// Errors surfaced by the capturer handle.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capturer is already started")]
    AlreadyStarted,

    #[error("capturer is not started")]
    NotStarted,

    #[error("a camera switch is already pending")]
    SwitchPending,

    #[error("no camera at index {0}")]
    NoSuchDevice(usize),

    #[error("camera {0} reports no usable capture format")]
    NoUsableFormat(usize),

    #[error("stop timed out after {0:?}")]
    StopTimeout(Duration),

    #[error("capture worker is gone")]
    WorkerGone,

    #[error("failed to start capture worker")]
    Worker(#[source] std::io::Error),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
