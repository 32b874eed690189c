//! In-memory GPU buffer device
//!
//! Keeps buffer contents in host memory and logs every call, so callers can
//! check both the resulting bytes and the exact sequence of transfers.

use std::collections::HashMap;

use ash::vk;

use super::{check_range, DeviceError, DeviceResult, GpuBufferDevice};

/// Buffer handle issued by [`RecordingDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// One call made against a [`RecordingDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// `create_uniform_buffer`
    Create {
        /// Issued handle
        buffer: BufferId,
        /// Requested size in bytes
        size: usize,
    },
    /// `bind_buffer_base`
    BindBase {
        /// Binding slot
        slot: u32,
        /// Bound buffer
        buffer: BufferId,
    },
    /// `write_buffer_range`
    WriteDirect {
        /// Target buffer
        buffer: BufferId,
        /// Byte offset
        offset: usize,
        /// Byte length
        len: usize,
    },
    /// `bind_uniform_target`
    BindTarget {
        /// Bound buffer
        buffer: BufferId,
    },
    /// `write_bound_range`
    WriteBound {
        /// Byte offset
        offset: usize,
        /// Byte length
        len: usize,
    },
    /// `destroy_buffer`
    Destroy {
        /// Released buffer
        buffer: BufferId,
    },
}

/// Host-memory device that records every call made against it
#[derive(Debug, Default)]
pub struct RecordingDevice {
    direct_update: bool,
    next_id: u32,
    buffers: HashMap<BufferId, Vec<u8>>,
    slots: HashMap<u32, BufferId>,
    bound: Option<BufferId>,
    calls: Vec<DeviceCall>,
    bind_failure: bool,
}

impl RecordingDevice {
    /// Create a device, optionally advertising direct range writes
    pub fn new(direct_update: bool) -> Self {
        Self {
            direct_update,
            ..Self::default()
        }
    }

    /// Make the next `bind_buffer_base` fail as a lost device would
    pub fn fail_next_bind(&mut self) {
        self.bind_failure = true;
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget the call log while keeping buffer contents
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Current contents of a live buffer
    pub fn contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Buffer attached to a binding slot
    pub fn buffer_at_slot(&self, slot: u32) -> Option<BufferId> {
        self.slots.get(&slot).copied()
    }

    /// Buffer bound to the uniform target
    pub fn bound_buffer(&self) -> Option<BufferId> {
        self.bound
    }

    /// Number of buffers that have not been destroyed
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn write(&mut self, buffer: BufferId, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        let storage = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownBuffer)?;
        check_range(offset, bytes.len(), storage.len())?;
        storage[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl GpuBufferDevice for RecordingDevice {
    type Handle = BufferId;

    fn supports_direct_update(&self) -> bool {
        self.direct_update
    }

    fn create_uniform_buffer(&mut self, size: usize) -> DeviceResult<BufferId> {
        self.next_id += 1;
        let buffer = BufferId(self.next_id);
        self.buffers.insert(buffer, vec![0; size]);
        self.calls.push(DeviceCall::Create { buffer, size });
        Ok(buffer)
    }

    fn bind_buffer_base(&mut self, slot: u32, buffer: BufferId) -> DeviceResult<()> {
        if std::mem::take(&mut self.bind_failure) {
            return Err(DeviceError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer);
        }
        self.slots.insert(slot, buffer);
        self.calls.push(DeviceCall::BindBase { slot, buffer });
        Ok(())
    }

    fn write_buffer_range(&mut self, buffer: BufferId, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        self.write(buffer, offset, bytes)?;
        self.calls.push(DeviceCall::WriteDirect { buffer, offset, len: bytes.len() });
        Ok(())
    }

    fn bind_uniform_target(&mut self, buffer: BufferId) -> DeviceResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer);
        }
        self.bound = Some(buffer);
        self.calls.push(DeviceCall::BindTarget { buffer });
        Ok(())
    }

    fn write_bound_range(&mut self, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        let buffer = self.bound.ok_or(DeviceError::NoBoundBuffer)?;
        self.write(buffer, offset, bytes)?;
        self.calls.push(DeviceCall::WriteBound { offset, len: bytes.len() });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("Destroying unknown buffer {:?}", buffer);
            return;
        }
        self.slots.retain(|_, bound| *bound != buffer);
        if self.bound == Some(buffer) {
            self.bound = None;
        }
        self.calls.push(DeviceCall::Destroy { buffer });
    }
}
