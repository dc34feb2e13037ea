//! Single-slot GPU texture frame hand-off channel
//!
//! The texture capture path shares one GPU texture between the camera and
//! the consumer, so at most one texture frame may be outstanding. The channel
//! tracks that slot: a surface update while the consumer still holds the
//! frame is dropped and counted, and `return_frame` re-arms delivery.
//! Disconnecting releases the GPU surface immediately when the channel is
//! idle and defers the release to the in-flight return otherwise.
//!
//! Driven entirely from the capture worker thread.

pub mod matrix;

use camera_driver::{DriverError, TextureSurface};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub use matrix::{horizontal_flip_matrix, multiply_matrices, IDENTITY};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no texture frame is outstanding")]
    NoPendingFrame,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// One latched texture frame, valid until the consumer returns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingTextureFrame {
    pub texture_id: u32,
    pub transform_matrix: [f32; 16],
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Pending,
}

/// Hand-off channel wrapping one GPU texture surface.
pub struct TextureChannel {
    surface: Box<dyn TextureSurface>,
    state: SlotState,
    quitting: bool,
    released: bool,
    dropped_updates: u64,
}

impl TextureChannel {
    pub fn new(surface: Box<dyn TextureSurface>) -> Self {
        Self {
            surface,
            state: SlotState::Idle,
            quitting: false,
            released: false,
            dropped_updates: 0,
        }
    }

    pub fn texture_id(&self) -> u32 {
        self.surface.texture_id()
    }

    pub fn is_pending(&self) -> bool {
        self.state == SlotState::Pending
    }

    /// Surface updates dropped because the consumer held the slot.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates
    }

    /// React to a surface update notification. Latches the new image and
    /// hands it out when the slot is free; otherwise the update is dropped
    /// and counted.
    pub fn on_surface_updated(&mut self) -> Result<Option<PendingTextureFrame>, ChannelError> {
        if self.quitting {
            trace!("ignoring surface update on disconnected channel");
            return Ok(None);
        }
        if self.state == SlotState::Pending {
            self.dropped_updates += 1;
            debug!(dropped = self.dropped_updates, "texture frame dropped, consumer holds the slot");
            return Ok(None);
        }
        self.surface.update_image()?;
        self.state = SlotState::Pending;
        Ok(Some(PendingTextureFrame {
            texture_id: self.surface.texture_id(),
            transform_matrix: self.surface.transform_matrix(),
            timestamp_ns: self.surface.timestamp_ns(),
        }))
    }

    /// Consumer is done with the outstanding frame; the slot is free again.
    /// Completes a deferred disconnect if one is waiting on this return.
    pub fn return_frame(&mut self) -> Result<(), ChannelError> {
        if self.state != SlotState::Pending {
            return Err(ChannelError::NoPendingFrame);
        }
        self.state = SlotState::Idle;
        if self.quitting {
            self.release_surface();
        }
        Ok(())
    }

    /// Stop delivering frames and release the GPU surface. When the consumer
    /// still holds a frame the release is deferred to its `return_frame` (or
    /// to `Drop` if that never comes).
    pub fn disconnect(&mut self) {
        self.quitting = true;
        if self.state == SlotState::Idle {
            self.release_surface();
        } else {
            debug!("texture frame outstanding, deferring surface release");
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.quitting
    }

    fn release_surface(&mut self) {
        if !self.released {
            self.released = true;
            self.surface.release();
        }
    }
}

impl Drop for TextureChannel {
    fn drop(&mut self) {
        if !self.released && self.state == SlotState::Pending {
            warn!("texture channel dropped with a frame outstanding");
        }
        self.release_surface();
    }
}
