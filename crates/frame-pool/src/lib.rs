//! Recycled capture buffer pool for the byte-buffer frame path
//!
//! The pool owns a fixed set of pre-allocated frame buffers and tracks where
//! each one currently is: queued at the device as a receive target, reserved
//! by the consumer, or free between streaming sessions. Slots are identified
//! by integer handles assigned at allocation time, so a driver callback
//! carrying a buffer from a replaced configuration is detectable and dropped
//! instead of corrupting the arena.
//!
//! All methods are called from the capture worker thread; the pool itself is
//! not synchronized.

use std::collections::HashMap;
use std::sync::Arc;

use camera_driver::{BufferSlot, CameraDevice, DriverError};
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of in-flight capture buffers.
pub const DEFAULT_CAPTURE_BUFFERS: usize = 3;

/// Pool contract violations. Driver drops (stale slots, timestamp
/// collisions) are counted, not errored.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no reserved buffer with timestamp {0}")]
    UnknownTimestamp(u64),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

enum Slot {
    /// Handed to the device as a receive target; the bytes live driver-side.
    Queued,
    /// Held by the consumer until `release` is called with its timestamp.
    Reserved { data: Arc<Vec<u8>> },
    /// Parked between streaming sessions.
    Free { data: Vec<u8> },
}

/// Fixed-capacity arena of capture buffers.
pub struct FramePool {
    slots: HashMap<BufferSlot, Slot>,
    reserved: HashMap<u64, BufferSlot>,
    frame_size: usize,
    capacity: usize,
    next_slot: u32,
    attached: bool,
    stale_drops: u64,
    collision_drops: u64,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            reserved: HashMap::new(),
            frame_size: 0,
            capacity,
            next_slot: 0,
            attached: false,
            stale_drops: 0,
            collision_drops: 0,
        }
    }

    /// Size a streaming session: ensure the current epoch (buffers of
    /// `frame_size` bytes) is at full capacity at the device. Buffers of a
    /// previous size are discarded if parked; buffers still reserved by the
    /// consumer stay alive until returned but do not count against the new
    /// epoch's capacity.
    pub fn configure(
        &mut self,
        frame_size: usize,
        device: &mut dyn CameraDevice,
    ) -> Result<(), PoolError> {
        if frame_size != self.frame_size {
            self.slots.retain(|_, slot| matches!(slot, Slot::Reserved { .. }));
            self.frame_size = frame_size;
        }
        self.attached = true;

        // Re-queue parked buffers, then top up to capacity with fresh ones.
        let parked: Vec<BufferSlot> = self
            .slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Free { .. }))
            .map(|(id, _)| *id)
            .collect();
        for id in parked {
            if let Some(Slot::Free { data }) = self.slots.remove(&id) {
                device.queue_buffer(id, data)?;
                self.slots.insert(id, Slot::Queued);
            }
        }
        while self.queued_count() + self.epoch_reserved_count() < self.capacity {
            let id = BufferSlot(self.next_slot);
            self.next_slot += 1;
            device.queue_buffer(id, vec![0u8; frame_size])?;
            self.slots.insert(id, Slot::Queued);
        }
        debug!(
            queued = self.queued_count(),
            held = self.reserved.len(),
            frame_size,
            "capture buffers queued"
        );
        Ok(())
    }

    /// Accept a filled buffer back from the device and reserve it for the
    /// consumer. Returns `None` for dropped frames: a slot that is not one
    /// of ours (or not currently queued), a payload of the wrong size, or a
    /// timestamp that is already reserved. Collision payloads go straight
    /// back to the device so the slot is not stranded.
    pub fn claim(
        &mut self,
        slot: BufferSlot,
        data: Vec<u8>,
        timestamp_ns: u64,
        device: &mut dyn CameraDevice,
    ) -> Result<Option<Arc<Vec<u8>>>, PoolError> {
        if !matches!(self.slots.get(&slot), Some(Slot::Queued)) || data.len() != self.frame_size {
            self.stale_drops += 1;
            warn!(
                slot = slot.0,
                size = data.len(),
                expected = self.frame_size,
                "dropping frame from stale capture buffer"
            );
            return Ok(None);
        }
        if self.reserved.contains_key(&timestamp_ns) {
            self.collision_drops += 1;
            warn!(timestamp_ns, "dropping frame with already-reserved timestamp");
            device.queue_buffer(slot, data)?;
            return Ok(None);
        }
        let data = Arc::new(data);
        self.slots.insert(slot, Slot::Reserved { data: data.clone() });
        self.reserved.insert(timestamp_ns, slot);
        if self.queued_count() == 0 {
            debug!("camera is running out of capture buffers");
        }
        Ok(Some(data))
    }

    /// Take a buffer back from the consumer. While streaming the buffer is
    /// re-queued to the device; otherwise it is parked. A buffer whose size
    /// no longer matches the configured frame size retires its slot without
    /// debiting the current epoch: it never counted against the capacity
    /// `configure` established for the new size.
    pub fn release(
        &mut self,
        timestamp_ns: u64,
        device: Option<&mut (dyn CameraDevice + 'static)>,
    ) -> Result<(), PoolError> {
        let id = self
            .reserved
            .remove(&timestamp_ns)
            .ok_or(PoolError::UnknownTimestamp(timestamp_ns))?;
        let Some(Slot::Reserved { data }) = self.slots.remove(&id) else {
            return Err(PoolError::UnknownTimestamp(timestamp_ns));
        };
        // A consumer that kept a clone forfeits the allocation; replace it.
        let buffer = match Arc::try_unwrap(data) {
            Ok(buffer) => buffer,
            Err(shared) => vec![0u8; shared.len()],
        };
        if buffer.len() != self.frame_size {
            debug!(slot = id.0, size = buffer.len(), "retiring buffer from replaced format");
            return Ok(());
        }
        match device {
            Some(device) if self.attached => {
                device.queue_buffer(id, buffer)?;
                self.slots.insert(id, Slot::Queued);
            }
            _ => {
                self.slots.insert(id, Slot::Free { data: buffer });
            }
        }
        Ok(())
    }

    /// Stop handing buffers back to the device. Buffers queued driver-side
    /// are forgotten (they die with the device); reserved buffers stay
    /// reserved so a late `release` still resolves.
    pub fn drain_stop(&mut self) {
        self.attached = false;
        self.slots.retain(|_, slot| !matches!(slot, Slot::Queued));
        if !self.reserved.is_empty() {
            debug!(held = self.reserved.len(), "stopping with consumer-held buffers outstanding");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Buffers currently held by the consumer.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    pub fn queued_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Queued))
            .count()
    }

    /// Reserved buffers belonging to the current configuration epoch.
    fn epoch_reserved_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Reserved { data } if data.len() == self.frame_size))
            .count()
    }

    pub fn stale_drops(&self) -> u64 {
        self.stale_drops
    }

    pub fn collision_drops(&self) -> u64 {
        self.collision_drops
    }
}
