//! Capture worker thread
//!
//! Everything that touches the camera device runs here: opening (with
//! bounded retry), streaming, format changes, camera switches, buffer
//! recycling, the freeze watchdog, and teardown. The public handle posts
//! commands over an mpsc channel; the device posts its events over another.
//! Serializing both onto one loop removes every lock from the data path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camera_driver::{
    BufferSlot, CameraDevice, CameraDriver, DriverEvent, DriverEventReceiver, DriverEventSender,
};
use capture_format::{CaptureFormat, Facing, FormatCatalog};
use frame_pool::FramePool;
use texture_channel::{horizontal_flip_matrix, multiply_matrices, TextureChannel};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::CaptureError;
use crate::observer::{
    CameraEvents, CameraSwitchObserver, CapturedFrame, CapturedTextureFrame, FrameObserver,
};
use crate::stats::CaptureStatistics;

/// Requests posted by the `CameraCapturer` handle.
pub(crate) enum Command {
    Start {
        width: u32,
        height: u32,
        fps: u32,
        observer: Box<dyn FrameObserver>,
    },
    Stop {
        ack: std::sync::mpsc::Sender<()>,
    },
    ChangeFormat {
        width: u32,
        height: u32,
        fps: u32,
    },
    SwitchCamera {
        observer: Box<dyn CameraSwitchObserver>,
    },
    RequestOutputFormat {
        width: u32,
        height: u32,
        fps: u32,
    },
    ReturnFrame {
        timestamp_ns: u64,
    },
    ReturnTextureFrame {
        channel_id: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Opening,
    Running,
    Stopping,
}

pub(crate) struct CaptureWorker {
    driver: Box<dyn CameraDriver>,
    catalog: Arc<FormatCatalog>,
    config: PipelineConfig,
    events: Arc<dyn CameraEvents>,
    running_flag: Arc<AtomicBool>,
    pending_switch: Arc<AtomicBool>,
    driver_events_tx: DriverEventSender,

    state: LifecycleState,
    device_index: usize,
    device: Option<Box<dyn CameraDevice>>,
    requested: Option<(u32, u32, u32)>,
    format: Option<CaptureFormat>,
    observer: Option<Box<dyn FrameObserver>>,
    switch_observer: Option<Box<dyn CameraSwitchObserver>>,
    pool: FramePool,
    texture: Option<(u64, TextureChannel)>,
    /// Disconnected channels still waiting for a consumer return, keyed by
    /// the id stamped on their delivered frames.
    retired: Vec<(u64, TextureChannel)>,
    next_channel_id: u64,
    stats: CaptureStatistics,

    open_attempts: u32,
    retry_at: Option<Instant>,
    watchdog_at: Option<Instant>,
    started_reported: bool,
    first_frame_reported: bool,
    drop_next_frame: bool,
}

impl CaptureWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        driver: Box<dyn CameraDriver>,
        catalog: Arc<FormatCatalog>,
        config: PipelineConfig,
        events: Arc<dyn CameraEvents>,
        running_flag: Arc<AtomicBool>,
        pending_switch: Arc<AtomicBool>,
        device_index: usize,
        driver_events_tx: DriverEventSender,
    ) -> Self {
        let pool = FramePool::new(config.buffer_count);
        Self {
            driver,
            catalog,
            config,
            events,
            running_flag,
            pending_switch,
            driver_events_tx,
            state: LifecycleState::Stopped,
            device_index,
            device: None,
            requested: None,
            format: None,
            observer: None,
            switch_observer: None,
            pool,
            texture: None,
            retired: Vec::new(),
            next_channel_id: 0,
            stats: CaptureStatistics::new(),
            open_attempts: 0,
            retry_at: None,
            watchdog_at: None,
            started_reported: false,
            first_frame_reported: false,
            drop_next_frame: false,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                width,
                height,
                fps,
                observer,
            } => self.handle_start(width, height, fps, observer),
            Command::ChangeFormat { width, height, fps } => {
                self.handle_change_format(width, height, fps)
            }
            Command::SwitchCamera { observer } => self.handle_switch(observer),
            Command::RequestOutputFormat { width, height, fps } => {
                if let Some(observer) = &self.observer {
                    observer.on_output_format_request(width, height, fps);
                } else {
                    warn!("output format request with no active observer");
                }
            }
            Command::ReturnFrame { timestamp_ns } => {
                if let Err(e) = self.pool.release(timestamp_ns, self.device.as_deref_mut()) {
                    error!(error = %e, "frame return rejected");
                }
            }
            Command::ReturnTextureFrame { channel_id } => self.handle_return_texture(channel_id),
            // Stop and Shutdown are consumed by the run loop.
            Command::Stop { .. } | Command::Shutdown => {}
        }
    }

    fn handle_start(&mut self, width: u32, height: u32, fps: u32, observer: Box<dyn FrameObserver>) {
        if self.state != LifecycleState::Stopped {
            warn!(state = ?self.state, "start ignored, capturer already active");
            return;
        }
        let name = self.device_name();
        info!(device = self.device_index, name = %name, width, height, fps, "starting capture");
        self.events.on_camera_opening(&name);
        self.observer = Some(observer);
        self.requested = Some((width, height, fps));
        self.started_reported = false;
        self.open_attempts = 0;
        self.state = LifecycleState::Opening;
        self.attempt_open();
    }

    pub(crate) fn handle_stop(&mut self) {
        self.retry_at = None;
        self.watchdog_at = None;
        self.state = LifecycleState::Stopping;
        self.stop_streaming();
        self.state = LifecycleState::Stopped;
        self.observer = None;
        self.requested = None;
        self.running_flag.store(false, Ordering::SeqCst);
        if let Some(switch) = self.switch_observer.take() {
            self.pending_switch.store(false, Ordering::SeqCst);
            switch.on_camera_switch_error("capturer stopped during switch");
        }
        self.events.on_camera_closed();
        info!("capture stopped");
    }

    /// Close the device and detach the frame paths. Consumer-held buffers
    /// and texture frames stay resolvable afterwards.
    fn stop_streaming(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop_streaming() {
                warn!(error = %e, "stop streaming failed");
            }
        }
        self.pool.drain_stop();
        if let Some((id, mut channel)) = self.texture.take() {
            channel.disconnect();
            if channel.is_pending() {
                self.retired.push((id, channel));
            }
        }
        self.format = None;
        self.drop_next_frame = false;
    }

    fn handle_change_format(&mut self, width: u32, height: u32, fps: u32) {
        if self.state != LifecycleState::Running {
            warn!(state = ?self.state, "format change ignored, not running");
            return;
        }
        self.requested = Some((width, height, fps));
        let Some(format) = self.catalog.negotiate(self.device_index, width, height, fps) else {
            self.events.on_camera_error("no usable capture format");
            return;
        };
        if Some(format) == self.format {
            debug!(width, height, fps, "negotiated format unchanged, keeping stream");
            return;
        }
        info!(
            width = format.width,
            height = format.height,
            "applying new capture format"
        );
        if let Err(e) = self.restart_streaming(format) {
            error!(error = %e, "failed to apply capture format");
            self.events
                .on_camera_error(&format!("failed to apply capture format: {e}"));
        }
    }

    /// Restart the stream on the open device with a new format. The first
    /// frame afterwards may still carry old settings and is dropped.
    fn restart_streaming(&mut self, format: CaptureFormat) -> Result<(), CaptureError> {
        let Some(device) = self.device.as_deref_mut() else {
            return Err(CaptureError::NotStarted);
        };
        device.stop_streaming()?;
        device.configure(&format)?;
        if !self.config.capture_to_texture {
            self.pool.configure(format.frame_size(), device)?;
        }
        self.drop_next_frame = true;
        device.start_streaming(self.driver_events_tx.clone())?;
        self.format = Some(format);
        Ok(())
    }

    fn handle_switch(&mut self, observer: Box<dyn CameraSwitchObserver>) {
        if self.state != LifecycleState::Running {
            self.pending_switch.store(false, Ordering::SeqCst);
            observer.on_camera_switch_error("camera is not running");
            return;
        }
        if self.catalog.device_count() < 2 {
            self.pending_switch.store(false, Ordering::SeqCst);
            observer.on_camera_switch_error("no camera to switch to");
            return;
        }
        let next = (self.device_index + 1) % self.catalog.device_count();
        info!(from = self.device_index, to = next, "switching camera");
        self.stop_streaming();
        self.events.on_camera_closed();
        self.device_index = next;
        let name = self.device_name();
        self.events.on_camera_opening(&name);
        self.switch_observer = Some(observer);
        self.open_attempts = 0;
        self.state = LifecycleState::Opening;
        self.attempt_open();
    }

    /// One open attempt. On failure schedules a retry until the attempts
    /// are used up, then reports the terminal error.
    fn attempt_open(&mut self) {
        self.retry_at = None;
        if self.state != LifecycleState::Opening {
            return;
        }
        match self.open_and_stream() {
            Ok(()) => {
                self.state = LifecycleState::Running;
                self.stats.reset();
                self.first_frame_reported = false;
                self.watchdog_at = Some(Instant::now() + self.config.watchdog_period);
                info!(device = self.device_index, "camera capture running");
                if !self.started_reported {
                    self.started_reported = true;
                    if let Some(observer) = &self.observer {
                        observer.on_capturer_started(true);
                    }
                }
                if let Some(switch) = self.switch_observer.take() {
                    let is_front = self
                        .catalog
                        .device(self.device_index)
                        .map_or(false, |h| h.facing == Facing::Front);
                    self.pending_switch.store(false, Ordering::SeqCst);
                    switch.on_camera_switch_done(is_front);
                }
            }
            Err(e) => {
                self.open_attempts += 1;
                let terminal = matches!(e, CaptureError::NoUsableFormat(_));
                if !terminal && self.open_attempts < self.config.max_open_attempts {
                    warn!(attempt = self.open_attempts, error = %e, "camera open failed, retrying");
                    self.retry_at = Some(Instant::now() + self.config.open_retry_delay);
                    return;
                }
                error!(attempts = self.open_attempts, error = %e, "camera open failed, giving up");
                self.state = LifecycleState::Stopped;
                self.running_flag.store(false, Ordering::SeqCst);
                if !self.started_reported {
                    self.started_reported = true;
                    if let Some(observer) = &self.observer {
                        observer.on_capturer_started(false);
                    }
                }
                self.observer = None;
                if let Some(switch) = self.switch_observer.take() {
                    self.pending_switch.store(false, Ordering::SeqCst);
                    switch.on_camera_switch_error(&format!("camera open failed: {e}"));
                }
                self.events
                    .on_camera_error(&format!("camera open failed after {} attempts: {e}", self.open_attempts));
            }
        }
    }

    fn open_and_stream(&mut self) -> Result<(), CaptureError> {
        let (width, height, fps) = self.requested.ok_or(CaptureError::NotStarted)?;
        let format = self
            .catalog
            .negotiate(self.device_index, width, height, fps)
            .ok_or(CaptureError::NoUsableFormat(self.device_index))?;
        let mut device = self.driver.open(self.device_index)?;
        device.configure(&format)?;
        if self.config.capture_to_texture {
            let surface = device.create_texture_surface()?;
            self.next_channel_id += 1;
            self.texture = Some((self.next_channel_id, TextureChannel::new(surface)));
        } else {
            self.pool.configure(format.frame_size(), device.as_mut())?;
        }
        device.start_streaming(self.driver_events_tx.clone())?;
        debug!(
            width = format.width,
            height = format.height,
            texture = self.config.capture_to_texture,
            "camera configured"
        );
        self.format = Some(format);
        self.device = Some(device);
        Ok(())
    }

    /// Route a consumer return to the channel that delivered the frame. A
    /// return from a torn-down session must not re-arm the live channel.
    fn handle_return_texture(&mut self, channel_id: u64) {
        if let Some((id, channel)) = self.texture.as_mut() {
            if *id == channel_id {
                if let Err(e) = channel.return_frame() {
                    warn!(channel_id, error = %e, "texture frame return rejected");
                }
                return;
            }
        }
        if let Some((_, channel)) = self.retired.iter_mut().find(|(id, _)| *id == channel_id) {
            if let Err(e) = channel.return_frame() {
                warn!(channel_id, error = %e, "texture frame return rejected");
            }
            self.retired.retain(|(_, c)| c.is_pending());
            return;
        }
        warn!(channel_id, "texture frame returned for unknown channel");
    }

    fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::FrameReady {
                slot,
                data,
                timestamp_ns,
            } => self.on_frame_ready(slot, data, timestamp_ns),
            DriverEvent::TextureUpdated => self.on_texture_updated(),
            DriverEvent::DeviceError { code, description } => {
                warn!(code, description = %description, "device reported error");
                self.events
                    .on_camera_error(&format!("camera error {code}: {description}"));
            }
        }
    }

    fn on_frame_ready(&mut self, slot: BufferSlot, data: Vec<u8>, timestamp_ns: u64) {
        if self.state != LifecycleState::Running {
            debug!("frame delivered outside a streaming session, ignoring");
            return;
        }
        let Some(device) = self.device.as_deref_mut() else {
            return;
        };
        let claimed = match self.pool.claim(slot, data, timestamp_ns, device) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(error = %e, "failed to recycle capture buffer");
                return;
            }
        };
        let Some(data) = claimed else {
            return;
        };
        if self.drop_next_frame {
            self.drop_next_frame = false;
            debug!("dropping first frame after restart");
            if let Err(e) = self.pool.release(timestamp_ns, self.device.as_deref_mut()) {
                warn!(error = %e, "failed to requeue dropped frame");
            }
            return;
        }
        self.stats.record_frame();
        self.report_first_frame();
        let Some(format) = self.format else { return };
        if let Some(observer) = &self.observer {
            observer.on_frame_captured(CapturedFrame {
                data,
                width: format.width,
                height: format.height,
                rotation_degrees: self.frame_rotation(),
                timestamp_ns,
            });
        }
    }

    fn on_texture_updated(&mut self) {
        if self.state != LifecycleState::Running {
            debug!("texture update outside a streaming session, ignoring");
            return;
        }
        let is_front = self
            .catalog
            .device(self.device_index)
            .map_or(false, |h| h.facing == Facing::Front);
        let Some((channel_id, channel)) = self.texture.as_mut() else {
            return;
        };
        let channel_id = *channel_id;
        let frame = match channel.on_surface_updated() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to latch texture frame");
                return;
            }
        };
        let Some(frame) = frame else { return };
        if self.drop_next_frame {
            self.drop_next_frame = false;
            debug!("dropping first texture frame after restart");
            if let Err(e) = channel.return_frame() {
                warn!(error = %e, "failed to re-arm texture channel");
            }
            return;
        }
        let transform = if is_front {
            multiply_matrices(&frame.transform_matrix, &horizontal_flip_matrix())
        } else {
            frame.transform_matrix
        };
        self.stats.record_frame();
        self.report_first_frame();
        let Some(format) = self.format else { return };
        if let Some(observer) = &self.observer {
            observer.on_texture_frame_captured(CapturedTextureFrame {
                channel_id,
                texture_id: frame.texture_id,
                transform_matrix: transform,
                width: format.width,
                height: format.height,
                rotation_degrees: self.frame_rotation(),
                timestamp_ns: frame.timestamp_ns,
            });
        }
    }

    fn watchdog_tick(&mut self) {
        self.watchdog_at = None;
        if self.state != LifecycleState::Running {
            return;
        }
        let (held, capacity) = if self.config.capture_to_texture {
            (
                self.texture.as_ref().map_or(0, |(_, c)| c.is_pending() as usize),
                1,
            )
        } else {
            (self.pool.reserved_count(), self.pool.capacity())
        };
        let report = self.stats.tick(
            self.config.watchdog_period,
            self.config.freeze_timeout,
            held,
            capacity,
        );
        match report {
            Some(report) => {
                let description = if report.consumer_starved {
                    "Camera failure. Client must return video buffers."
                } else {
                    "Camera failure."
                };
                error!(held, capacity, "camera freeze detected: {description}");
                self.events.on_camera_freezed(description);
                // Latched; the watchdog stays disarmed for this session.
            }
            None => {
                self.watchdog_at = Some(Instant::now() + self.config.watchdog_period);
            }
        }
    }

    fn report_first_frame(&mut self) {
        if !self.first_frame_reported {
            self.first_frame_reported = true;
            self.events.on_first_frame_available();
        }
    }

    /// Clockwise rotation the consumer must apply, from the sensor mount.
    fn frame_rotation(&self) -> u32 {
        self.catalog
            .device(self.device_index)
            .map_or(0, |h| h.orientation_degrees % 360)
    }

    fn device_name(&self) -> String {
        self.catalog
            .device(self.device_index)
            .map(|h| h.name.clone())
            .unwrap_or_default()
    }

    fn is_stopped(&self) -> bool {
        self.state == LifecycleState::Stopped
    }
}

/// Worker loop: commands first, then device events, then timers.
pub(crate) async fn run(
    mut worker: CaptureWorker,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut driver_events: DriverEventReceiver,
) {
    debug!("capture worker started");
    loop {
        let retry_at = worker.retry_at;
        let watchdog_at = worker.watchdog_at;
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Stop { ack }) => {
                    worker.handle_stop();
                    let _ = ack.send(());
                }
                Some(Command::Shutdown) | None => {
                    if !worker.is_stopped() {
                        worker.handle_stop();
                    }
                    break;
                }
                Some(command) => worker.handle_command(command),
            },
            Some(event) = driver_events.recv() => worker.handle_driver_event(event),
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)),
                if retry_at.is_some() => worker.attempt_open(),
            _ = tokio::time::sleep_until(watchdog_at.unwrap_or_else(Instant::now)),
                if watchdog_at.is_some() => worker.watchdog_tick(),
        }
    }
    debug!("capture worker exited");
}
