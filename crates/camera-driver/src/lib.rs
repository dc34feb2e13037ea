//! Device driver boundary for the camera capture pipeline
//!
//! The platform camera stack sits behind the traits in this crate. Every call
//! into a `CameraDevice` is made from the capture worker thread, and the
//! device delivers its asynchronous notifications (filled buffers, texture
//! updates, hardware faults) on the event sender handed to
//! `start_streaming`, which the same worker drains. The `testing` module
//! provides scripted fakes used by the capture crates' tests.

pub mod testing;

use capture_format::{CaptureDeviceHandle, CaptureFormat, FormatSource};
use thiserror::Error;
use tokio::sync::mpsc;

/// Identity of one pooled capture buffer, assigned at allocation time.
///
/// Frames are matched back to their buffer by this handle rather than by
/// reference identity, so a callback carrying a slot from a replaced
/// configuration is detectable as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot(pub u32);

/// Asynchronous notifications from an open device.
#[derive(Debug)]
pub enum DriverEvent {
    /// A queued capture buffer has been filled with a frame.
    FrameReady {
        slot: BufferSlot,
        data: Vec<u8>,
        timestamp_ns: u64,
    },
    /// The texture surface has a new image ready to be latched.
    TextureUpdated,
    /// Driver-reported hardware fault.
    DeviceError { code: i32, description: String },
}

pub type DriverEventSender = mpsc::UnboundedSender<DriverEvent>;
pub type DriverEventReceiver = mpsc::UnboundedReceiver<DriverEvent>;

/// Driver error types.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to open device {0}: {1}")]
    Open(usize, String),

    #[error("no device at index {0}")]
    NoSuchDevice(usize),

    #[error("driver rejected format: {0}")]
    Format(String),

    #[error("streaming error: {0}")]
    Stream(String),

    #[error("texture surface error: {0}")]
    Surface(String),
}

/// Entry point to the platform camera stack: format enumeration plus open.
pub trait CameraDriver: FormatSource + Send {
    /// Open the device at `index`. Fails when the device is busy or gone;
    /// the caller owns retry policy.
    fn open(&mut self, index: usize) -> Result<Box<dyn CameraDevice>, DriverError>;
}

/// One open camera. Dropping the device closes it.
pub trait CameraDevice: Send {
    fn handle(&self) -> CaptureDeviceHandle;

    /// Apply a negotiated capture format. Must be called before streaming
    /// starts and only while streaming is stopped.
    fn configure(&mut self, format: &CaptureFormat) -> Result<(), DriverError>;

    /// Start the streaming callback. All events go to `events`.
    fn start_streaming(&mut self, events: DriverEventSender) -> Result<(), DriverError>;

    fn stop_streaming(&mut self) -> Result<(), DriverError>;

    /// Hand a capture buffer to the device as a receive target. The device
    /// returns it, filled, in a `FrameReady` event carrying the same slot.
    fn queue_buffer(&mut self, slot: BufferSlot, buffer: Vec<u8>) -> Result<(), DriverError>;

    /// Create the GPU surface used by the texture capture path.
    fn create_texture_surface(&mut self) -> Result<Box<dyn TextureSurface>, DriverError>;
}

/// GPU-texture-backed receive surface for the texture capture path.
pub trait TextureSurface: Send {
    fn texture_id(&self) -> u32;

    /// Latch the most recent image the device delivered to the surface.
    fn update_image(&mut self) -> Result<(), DriverError>;

    /// Transform matrix of the latched image, column-major 4x4.
    fn transform_matrix(&self) -> [f32; 16];

    /// Timestamp of the latched image.
    fn timestamp_ns(&self) -> u64;

    /// Release the GPU resources. Idempotent.
    fn release(&mut self);
}
