//! Shared helpers for the pipeline integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use capture_pipeline::{
    CameraEvents, CameraSwitchObserver, CapturedFrame, CapturedTextureFrame, FrameObserver,
    PipelineConfig,
};

static TRACING: Once = Once::new();

pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config with timings shrunk so retries and watchdog periods elapse within
/// a test run.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        open_retry_delay: Duration::from_millis(20),
        watchdog_period: Duration::from_millis(40),
        freeze_timeout: Duration::from_millis(120),
        stop_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Default)]
struct ObserverState {
    started: Vec<bool>,
    frames: Vec<CapturedFrame>,
    texture_frames: Vec<CapturedTextureFrame>,
    format_requests: Vec<(u32, u32, u32)>,
}

/// Frame observer that records every callback.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    inner: Arc<Mutex<ObserverState>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<bool> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.inner.lock().unwrap().frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn texture_frames(&self) -> Vec<CapturedTextureFrame> {
        self.inner.lock().unwrap().texture_frames.clone()
    }

    pub fn texture_frame_count(&self) -> usize {
        self.inner.lock().unwrap().texture_frames.len()
    }

    pub fn format_requests(&self) -> Vec<(u32, u32, u32)> {
        self.inner.lock().unwrap().format_requests.clone()
    }
}

impl FrameObserver for RecordingObserver {
    fn on_capturer_started(&self, success: bool) {
        self.inner.lock().unwrap().started.push(success);
    }

    fn on_frame_captured(&self, frame: CapturedFrame) {
        self.inner.lock().unwrap().frames.push(frame);
    }

    fn on_texture_frame_captured(&self, frame: CapturedTextureFrame) {
        self.inner.lock().unwrap().texture_frames.push(frame);
    }

    fn on_output_format_request(&self, width: u32, height: u32, fps: u32) {
        self.inner
            .lock()
            .unwrap()
            .format_requests
            .push((width, height, fps));
    }
}

#[derive(Default)]
struct EventState {
    opening: Vec<String>,
    first_frames: usize,
    errors: Vec<String>,
    freezes: Vec<String>,
    closed: usize,
}

/// Camera event sink that records every callback.
#[derive(Clone, Default)]
pub struct RecordingEvents {
    inner: Arc<Mutex<EventState>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opening(&self) -> Vec<String> {
        self.inner.lock().unwrap().opening.clone()
    }

    pub fn first_frames(&self) -> usize {
        self.inner.lock().unwrap().first_frames
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().unwrap().errors.clone()
    }

    pub fn freezes(&self) -> Vec<String> {
        self.inner.lock().unwrap().freezes.clone()
    }

    pub fn closed(&self) -> usize {
        self.inner.lock().unwrap().closed
    }
}

impl CameraEvents for RecordingEvents {
    fn on_camera_opening(&self, name: &str) {
        self.inner.lock().unwrap().opening.push(name.to_string());
    }

    fn on_first_frame_available(&self) {
        self.inner.lock().unwrap().first_frames += 1;
    }

    fn on_camera_error(&self, description: &str) {
        self.inner.lock().unwrap().errors.push(description.to_string());
    }

    fn on_camera_freezed(&self, description: &str) {
        self.inner.lock().unwrap().freezes.push(description.to_string());
    }

    fn on_camera_closed(&self) {
        self.inner.lock().unwrap().closed += 1;
    }
}

#[derive(Default)]
struct SwitchState {
    done: Vec<bool>,
    errors: Vec<String>,
}

/// Switch observer that records the outcome.
#[derive(Clone, Default)]
pub struct RecordingSwitch {
    inner: Arc<Mutex<SwitchState>>,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done(&self) -> Vec<bool> {
        self.inner.lock().unwrap().done.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().unwrap().errors.clone()
    }
}

impl CameraSwitchObserver for RecordingSwitch {
    fn on_camera_switch_done(&self, is_front_facing: bool) {
        self.inner.lock().unwrap().done.push(is_front_facing);
    }

    fn on_camera_switch_error(&self, description: &str) {
        self.inner.lock().unwrap().errors.push(description.to_string());
    }
}
