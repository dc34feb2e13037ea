//! Camera lifecycle controller
//!
//! `CameraCapturer` owns a dedicated worker thread that serializes every
//! interaction with the camera device: open (with bounded retry), streaming,
//! format changes, camera switches, buffer recycling, and the freeze
//! watchdog. The handle itself is cheap and non-blocking; the one exception
//! is [`CameraCapturer::stop_capture`], which waits for the worker to
//! acknowledge that the device is closed.
//!
//! Frames are delivered to a [`FrameObserver`] on the worker thread. The
//! consumer gives buffers back with [`CameraCapturer::return_frame`] (byte
//! path) or [`CameraCapturer::return_texture_frame`] (texture path);
//! `stop_capture` never waits for outstanding consumer buffers.

pub mod config;
pub mod error;
pub mod observer;
pub mod stats;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use camera_driver::CameraDriver;
use capture_format::FormatCatalog;
use tokio::sync::mpsc;
use tracing::warn;

pub use config::PipelineConfig;
pub use error::CaptureError;
pub use observer::{
    CameraEvents, CameraSwitchObserver, CapturedFrame, CapturedTextureFrame, FrameObserver,
};
pub use stats::{CaptureStatistics, FreezeReport};

use worker::Command;

/// Handle to one camera capture pipeline.
pub struct CameraCapturer {
    commands: mpsc::UnboundedSender<Command>,
    catalog: Arc<FormatCatalog>,
    running: Arc<AtomicBool>,
    pending_switch: Arc<AtomicBool>,
    stop_timeout: Duration,
    worker: Option<JoinHandle<()>>,
}

impl CameraCapturer {
    /// Enumerate the driver's cameras and spin up the capture worker. The
    /// capturer starts on the device at `initial_device` and switches
    /// round-robin from there.
    pub fn new(
        driver: Box<dyn CameraDriver>,
        initial_device: usize,
        events: Arc<dyn CameraEvents>,
        config: PipelineConfig,
    ) -> Result<Self, CaptureError> {
        let catalog = Arc::new(FormatCatalog::build(&*driver));
        if initial_device >= catalog.device_count() {
            return Err(CaptureError::NoSuchDevice(initial_device));
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (driver_events_tx, driver_events_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(false));
        let pending_switch = Arc::new(AtomicBool::new(false));
        let stop_timeout = config.stop_timeout;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(CaptureError::Worker)?;
        let state = worker::CaptureWorker::new(
            driver,
            catalog.clone(),
            config,
            events,
            running.clone(),
            pending_switch.clone(),
            initial_device,
            driver_events_tx,
        );
        let worker = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || runtime.block_on(worker::run(state, command_rx, driver_events_rx)))
            .map_err(CaptureError::Worker)?;

        Ok(Self {
            commands,
            catalog,
            running,
            pending_switch,
            stop_timeout,
            worker: Some(worker),
        })
    }

    /// The device/format snapshot taken at construction.
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the camera and start streaming frames to `observer`. The open
    /// outcome arrives via `FrameObserver::on_capturer_started`.
    pub fn start_capture(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        observer: Box<dyn FrameObserver>,
    ) -> Result<(), CaptureError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaptureError::AlreadyStarted);
        }
        if self
            .commands
            .send(Command::Start {
                width,
                height,
                fps,
                observer,
            })
            .is_err()
        {
            self.running.store(false, Ordering::SeqCst);
            return Err(CaptureError::WorkerGone);
        }
        Ok(())
    }

    /// Stop streaming and close the device. Blocks until the worker
    /// acknowledges; outstanding consumer buffers are not waited for.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::NotStarted);
        }
        let (ack, done) = std::sync::mpsc::channel();
        self.commands
            .send(Command::Stop { ack })
            .map_err(|_| CaptureError::WorkerGone)?;
        done.recv_timeout(self.stop_timeout)
            .map_err(|_| CaptureError::StopTimeout(self.stop_timeout))?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Renegotiate the capture format while streaming. A request that
    /// negotiates to the current format is a no-op.
    pub fn change_capture_format(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<(), CaptureError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::NotStarted);
        }
        self.commands
            .send(Command::ChangeFormat { width, height, fps })
            .map_err(|_| CaptureError::WorkerGone)
    }

    /// Switch to the next camera, round-robin. At most one switch may be in
    /// flight; the outcome arrives on `observer`.
    pub fn switch_camera(
        &self,
        observer: Box<dyn CameraSwitchObserver>,
    ) -> Result<(), CaptureError> {
        if !self.running.load(Ordering::SeqCst) {
            observer.on_camera_switch_error("camera is stopped");
            return Err(CaptureError::NotStarted);
        }
        if self
            .pending_switch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            observer.on_camera_switch_error("pending camera switch already in progress");
            return Err(CaptureError::SwitchPending);
        }
        if self
            .commands
            .send(Command::SwitchCamera { observer })
            .is_err()
        {
            self.pending_switch.store(false, Ordering::SeqCst);
            return Err(CaptureError::WorkerGone);
        }
        Ok(())
    }

    /// Forward an output format request to the frame observer.
    pub fn request_output_format(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<(), CaptureError> {
        self.commands
            .send(Command::RequestOutputFormat { width, height, fps })
            .map_err(|_| CaptureError::WorkerGone)
    }

    /// Give a byte-buffer frame back to the pool.
    pub fn return_frame(&self, timestamp_ns: u64) -> Result<(), CaptureError> {
        self.commands
            .send(Command::ReturnFrame { timestamp_ns })
            .map_err(|_| CaptureError::WorkerGone)
    }

    /// Give a texture frame back to the channel that delivered it,
    /// re-arming delivery. `channel_id` comes from the frame.
    pub fn return_texture_frame(&self, channel_id: u64) -> Result<(), CaptureError> {
        self.commands
            .send(Command::ReturnTextureFrame { channel_id })
            .map_err(|_| CaptureError::WorkerGone)
    }
}

impl Drop for CameraCapturer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked");
            }
        }
    }
}
