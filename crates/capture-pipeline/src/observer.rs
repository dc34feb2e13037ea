//! Consumer-facing observer interfaces
//!
//! All callbacks are invoked on the capture worker thread and must not
//! block; a consumer that needs to do real work should forward the frame to
//! its own executor. Byte-buffer frames borrow a pooled buffer until
//! `CameraCapturer::return_frame` is called with their timestamp; texture
//! frames hold the single texture slot until `return_texture_frame`.

use std::sync::Arc;

/// One captured byte-buffer frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Planar YUV420 pixel data, owned by the pool until returned.
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation to apply before display, derived from the sensor
    /// mount orientation.
    pub rotation_degrees: u32,
    pub timestamp_ns: u64,
}

/// One captured GPU texture frame.
#[derive(Debug, Clone)]
pub struct CapturedTextureFrame {
    /// Identifies the channel the frame came from; pass it back to
    /// `CameraCapturer::return_texture_frame`. Frames outliving their
    /// streaming session resolve against the right channel this way.
    pub channel_id: u64,
    pub texture_id: u32,
    /// Column-major sampling transform. Front-facing cameras have a
    /// horizontal flip folded in.
    pub transform_matrix: [f32; 16],
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub timestamp_ns: u64,
}

/// Receives captured frames and start outcomes.
pub trait FrameObserver: Send {
    /// Reports whether the initial open (including retries) succeeded.
    fn on_capturer_started(&self, success: bool);

    fn on_frame_captured(&self, frame: CapturedFrame);

    fn on_texture_frame_captured(&self, frame: CapturedTextureFrame);

    /// The consumer side asked for a different output format; forwarded
    /// verbatim so the encoder can react.
    fn on_output_format_request(&self, width: u32, height: u32, fps: u32);
}

/// Camera lifecycle notifications.
pub trait CameraEvents: Send + Sync {
    fn on_camera_opening(&self, name: &str);

    /// First frame of a streaming session, reported once per start.
    fn on_first_frame_available(&self);

    /// Runtime device fault, forwarded verbatim. The capturer keeps running.
    fn on_camera_error(&self, description: &str);

    /// Latched freeze report from the watchdog; at most one per session.
    fn on_camera_freezed(&self, description: &str);

    fn on_camera_closed(&self);
}

/// Outcome callback for one `switch_camera` request.
pub trait CameraSwitchObserver: Send {
    fn on_camera_switch_done(&self, is_front_facing: bool);

    fn on_camera_switch_error(&self, description: &str);
}
