//! Capture formats and device enumeration
//!
//! Leaf crate of the camera capture pipeline. Provides:
//! - `CaptureFormat`: a (width, height, frame-rate-range) triple a device can
//!   stream, with planar YUV420 frame-size math
//! - `CaptureDeviceHandle`: identity of one physical camera
//! - `FormatCatalog`: cached enumeration plus nearest-match selection

pub mod catalog;
pub mod device;
pub mod format;

pub use catalog::{
    nearest_format, nearest_framerate_range, CatalogError, DeviceFormats, FormatCatalog,
    FormatSource,
};
pub use device::{CaptureDeviceHandle, Facing};
pub use format::{CaptureFormat, FrameRateRange, PixelLayout};
