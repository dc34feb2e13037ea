//! Scripted driver fakes shared by the capture crates' tests.
//!
//! `FakeDriver` implements the full driver boundary against in-memory state.
//! The paired `FakeDriverHandle` stays with the test and can script open
//! failures, inject frames and device errors, and inspect what the pipeline
//! did to the device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use capture_format::{CaptureDeviceHandle, CaptureFormat, CatalogError, Facing, FormatSource};

use crate::{
    BufferSlot, CameraDevice, CameraDriver, DriverError, DriverEvent, DriverEventSender,
    TextureSurface,
};

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Default)]
struct SurfaceState {
    released: bool,
    pending_timestamp_ns: u64,
    latched_timestamp_ns: u64,
    transform: [f32; 16],
    update_calls: usize,
}

#[derive(Default)]
struct SharedState {
    open_failures: VecDeque<String>,
    format_failures: Vec<usize>,
    open_calls: usize,
    opened: Option<usize>,
    configured: Vec<CaptureFormat>,
    streaming: bool,
    stop_streaming_calls: usize,
    queued: VecDeque<(BufferSlot, Vec<u8>)>,
    events: Option<DriverEventSender>,
    closed_devices: usize,
    /// Every surface created over the driver's life, oldest first. Each one
    /// keeps its own state so a late release cannot clobber a newer surface.
    surfaces: Vec<Arc<Mutex<SurfaceState>>>,
}

/// Scripted in-memory camera driver.
pub struct FakeDriver {
    handles: Vec<CaptureDeviceHandle>,
    formats: Vec<Vec<CaptureFormat>>,
    state: Arc<Mutex<SharedState>>,
}

impl FakeDriver {
    pub fn new(
        handles: Vec<CaptureDeviceHandle>,
        formats: Vec<Vec<CaptureFormat>>,
    ) -> (Self, FakeDriverHandle) {
        let state = Arc::new(Mutex::new(SharedState::default()));
        let handle = FakeDriverHandle {
            state: state.clone(),
        };
        (
            Self {
                handles,
                formats,
                state,
            },
            handle,
        )
    }

    /// Two devices, back then front, with a typical format spread.
    pub fn with_two_cameras() -> (Self, FakeDriverHandle) {
        let handles = vec![
            CaptureDeviceHandle {
                index: 0,
                name: "back".to_string(),
                facing: Facing::Back,
                orientation_degrees: 90,
            },
            CaptureDeviceHandle {
                index: 1,
                name: "front".to_string(),
                facing: Facing::Front,
                orientation_degrees: 270,
            },
        ];
        let formats = vec![
            vec![
                CaptureFormat::new(1280, 720, 15_000, 30_000),
                CaptureFormat::new(640, 480, 15_000, 30_000),
            ],
            vec![
                CaptureFormat::new(1280, 720, 15_000, 30_000),
                CaptureFormat::new(640, 480, 15_000, 30_000),
            ],
        ];
        Self::new(handles, formats)
    }

    /// A single back camera supporting the given formats.
    pub fn with_one_camera(formats: Vec<CaptureFormat>) -> (Self, FakeDriverHandle) {
        let handles = vec![CaptureDeviceHandle {
            index: 0,
            name: "back".to_string(),
            facing: Facing::Back,
            orientation_degrees: 90,
        }];
        Self::new(handles, vec![formats])
    }
}

impl FormatSource for FakeDriver {
    fn device_handles(&self) -> Vec<CaptureDeviceHandle> {
        self.handles.clone()
    }

    fn supported_formats(&self, index: usize) -> Result<Vec<CaptureFormat>, CatalogError> {
        if self.state.lock().unwrap().format_failures.contains(&index) {
            return Err(CatalogError::Query {
                index,
                reason: "scripted format failure".to_string(),
            });
        }
        Ok(self.formats.get(index).cloned().unwrap_or_default())
    }
}

impl CameraDriver for FakeDriver {
    fn open(&mut self, index: usize) -> Result<Box<dyn CameraDevice>, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.open_calls += 1;
        if index >= self.handles.len() {
            return Err(DriverError::NoSuchDevice(index));
        }
        if let Some(reason) = state.open_failures.pop_front() {
            return Err(DriverError::Open(index, reason));
        }
        state.opened = Some(index);
        Ok(Box::new(FakeDevice {
            handle: self.handles[index].clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeDevice {
    handle: CaptureDeviceHandle,
    state: Arc<Mutex<SharedState>>,
}

impl CameraDevice for FakeDevice {
    fn handle(&self) -> CaptureDeviceHandle {
        self.handle.clone()
    }

    fn configure(&mut self, format: &CaptureFormat) -> Result<(), DriverError> {
        self.state.lock().unwrap().configured.push(*format);
        Ok(())
    }

    fn start_streaming(&mut self, events: DriverEventSender) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.streaming = true;
        state.events = Some(events);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.streaming = false;
        state.stop_streaming_calls += 1;
        Ok(())
    }

    fn queue_buffer(&mut self, slot: BufferSlot, buffer: Vec<u8>) -> Result<(), DriverError> {
        self.state.lock().unwrap().queued.push_back((slot, buffer));
        Ok(())
    }

    fn create_texture_surface(&mut self) -> Result<Box<dyn TextureSurface>, DriverError> {
        let surface = Arc::new(Mutex::new(SurfaceState {
            transform: IDENTITY_MATRIX,
            ..SurfaceState::default()
        }));
        self.state.lock().unwrap().surfaces.push(surface.clone());
        Ok(Box::new(FakeSurface { surface }))
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed_devices += 1;
        state.streaming = false;
        state.events = None;
        state.opened = None;
        // Receive targets die with the device.
        state.queued.clear();
    }
}

struct FakeSurface {
    surface: Arc<Mutex<SurfaceState>>,
}

impl TextureSurface for FakeSurface {
    fn texture_id(&self) -> u32 {
        42
    }

    fn update_image(&mut self) -> Result<(), DriverError> {
        let mut surface = self.surface.lock().unwrap();
        if surface.released {
            return Err(DriverError::Surface("surface already released".to_string()));
        }
        surface.update_calls += 1;
        surface.latched_timestamp_ns = surface.pending_timestamp_ns;
        Ok(())
    }

    fn transform_matrix(&self) -> [f32; 16] {
        self.surface.lock().unwrap().transform
    }

    fn timestamp_ns(&self) -> u64 {
        self.surface.lock().unwrap().latched_timestamp_ns
    }

    fn release(&mut self) {
        self.surface.lock().unwrap().released = true;
    }
}

/// Test-side handle to a `FakeDriver`'s shared state.
#[derive(Clone)]
pub struct FakeDriverHandle {
    state: Arc<Mutex<SharedState>>,
}

impl FakeDriverHandle {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap()
    }

    /// Script the next opens to fail with the given reasons, in order.
    pub fn fail_next_opens(&self, reasons: &[&str]) {
        let mut state = self.lock();
        for reason in reasons {
            state.open_failures.push_back((*reason).to_string());
        }
    }

    /// Make format enumeration fail for one device index.
    pub fn fail_format_query(&self, index: usize) {
        self.lock().format_failures.push(index);
    }

    pub fn open_calls(&self) -> usize {
        self.lock().open_calls
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn stop_streaming_calls(&self) -> usize {
        self.lock().stop_streaming_calls
    }

    pub fn closed_devices(&self) -> usize {
        self.lock().closed_devices
    }

    pub fn queued_buffers(&self) -> usize {
        self.lock().queued.len()
    }

    pub fn configured_formats(&self) -> Vec<CaptureFormat> {
        self.lock().configured.clone()
    }

    /// Pop the oldest queued buffer without delivering an event, for tests
    /// that drive the frame path by hand.
    pub fn take_queued_buffer(&self) -> Option<(BufferSlot, Vec<u8>)> {
        self.lock().queued.pop_front()
    }

    fn latest_surface(&self) -> Option<Arc<Mutex<SurfaceState>>> {
        self.lock().surfaces.last().cloned()
    }

    pub fn surface_created(&self) -> bool {
        !self.lock().surfaces.is_empty()
    }

    /// Released state of the most recently created surface.
    pub fn surface_released(&self) -> bool {
        self.latest_surface()
            .map_or(false, |s| s.lock().unwrap().released)
    }

    /// Released state of the n-th surface created over the driver's life.
    pub fn surface_released_at(&self, index: usize) -> bool {
        let surface = self.lock().surfaces.get(index).cloned();
        surface.map_or(false, |s| s.lock().unwrap().released)
    }

    pub fn surface_update_calls(&self) -> usize {
        self.latest_surface()
            .map_or(0, |s| s.lock().unwrap().update_calls)
    }

    pub fn set_surface_transform(&self, transform: [f32; 16]) {
        if let Some(surface) = self.latest_surface() {
            surface.lock().unwrap().transform = transform;
        }
    }

    /// Stage the timestamp the surface will latch on its next image update.
    pub fn set_surface_timestamp(&self, timestamp_ns: u64) {
        if let Some(surface) = self.latest_surface() {
            surface.lock().unwrap().pending_timestamp_ns = timestamp_ns;
        }
    }

    /// Fill the oldest queued buffer and deliver it as a frame. Returns false
    /// when the device is not streaming or has no buffers left.
    pub fn deliver_next_frame(&self, timestamp_ns: u64) -> bool {
        let mut state = self.lock();
        if !state.streaming {
            return false;
        }
        let Some((slot, data)) = state.queued.pop_front() else {
            return false;
        };
        let Some(events) = state.events.clone() else {
            return false;
        };
        drop(state);
        events
            .send(DriverEvent::FrameReady {
                slot,
                data,
                timestamp_ns,
            })
            .is_ok()
    }

    /// Deliver a frame that belongs to no live configuration, emulating the
    /// stale callback some drivers emit right after a reconfiguration.
    pub fn deliver_stale_frame(&self, raw_slot: u32, size: usize, timestamp_ns: u64) -> bool {
        let Some(events) = self.lock().events.clone() else {
            return false;
        };
        events
            .send(DriverEvent::FrameReady {
                slot: BufferSlot(raw_slot),
                data: vec![0u8; size],
                timestamp_ns,
            })
            .is_ok()
    }

    /// Signal a texture surface update carrying the given timestamp.
    pub fn deliver_texture_frame(&self, timestamp_ns: u64) -> bool {
        let state = self.lock();
        if !state.streaming {
            return false;
        }
        let Some(surface) = state.surfaces.last().cloned() else {
            return false;
        };
        let Some(events) = state.events.clone() else {
            return false;
        };
        drop(state);
        surface.lock().unwrap().pending_timestamp_ns = timestamp_ns;
        events.send(DriverEvent::TextureUpdated).is_ok()
    }

    /// Report a runtime hardware fault.
    pub fn emit_device_error(&self, code: i32, description: &str) -> bool {
        let Some(events) = self.lock().events.clone() else {
            return false;
        };
        events
            .send(DriverEvent::DeviceError {
                code,
                description: description.to_string(),
            })
            .is_ok()
    }
}
