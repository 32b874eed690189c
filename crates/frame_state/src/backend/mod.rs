//! GPU buffer device abstraction
//!
//! The frame state only ever needs a handful of buffer operations: create a
//! fixed-size uniform buffer, attach it to a binding slot, overwrite a byte
//! range of it, and release it. [`GpuBufferDevice`] captures exactly that so
//! the frame state can run against Vulkan or against the in-memory
//! [`RecordingDevice`].
//!
//! Range writes come in two flavors. Devices that can address a buffer
//! directly implement [`GpuBufferDevice::write_buffer_range`]; every device
//! also supports binding the buffer to the uniform target first and writing
//! through that binding. Both must leave identical bytes in the buffer.

use ash::vk;
use thiserror::Error;

pub mod recording;
pub mod vulkan;

pub use recording::{BufferId, DeviceCall, RecordingDevice};
pub use vulkan::VulkanUniformDevice;

/// GPU buffer device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Buffer handle does not belong to this device
    #[error("Unknown buffer handle")]
    UnknownBuffer,

    /// A bound-target write was issued with no buffer bound
    #[error("No buffer bound to the uniform target")]
    NoBoundBuffer,

    /// Write range exceeds the buffer size
    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfRange {
        /// Byte offset of the write
        offset: usize,
        /// Byte length of the write
        len: usize,
        /// Size of the target buffer
        size: usize,
    },

    /// Recorded update breaks the `vkCmdUpdateBuffer` alignment or size limits
    #[error("Update of {len} bytes at offset {offset} cannot be recorded")]
    UnalignedUpdate {
        /// Byte offset of the write
        offset: usize,
        /// Byte length of the write
        len: usize,
    },
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// How range writes reach the GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePath {
    /// Write by buffer handle without touching the bound uniform target
    DirectUpdate,
    /// Bind the buffer to the uniform target, then write through the binding
    BindThenUpdate,
}

impl UpdatePath {
    /// Choose the path for a device, honoring a caller preference to avoid
    /// direct updates.
    pub fn select(direct_supported: bool, prefer_direct: bool) -> Self {
        if direct_supported && prefer_direct {
            Self::DirectUpdate
        } else {
            Self::BindThenUpdate
        }
    }
}

/// Buffer operations the frame state issues against a GPU device
pub trait GpuBufferDevice {
    /// Device-specific buffer handle
    type Handle: Copy + std::fmt::Debug + PartialEq;

    /// Whether range writes by handle are available.
    /// Queried once when a frame state is constructed.
    fn supports_direct_update(&self) -> bool;

    /// Allocate a uniform buffer of `size` bytes
    fn create_uniform_buffer(&mut self, size: usize) -> DeviceResult<Self::Handle>;

    /// Attach a buffer to a shader-visible uniform binding slot
    fn bind_buffer_base(&mut self, slot: u32, buffer: Self::Handle) -> DeviceResult<()>;

    /// Overwrite `bytes.len()` bytes at `offset` without changing the bound target
    fn write_buffer_range(&mut self, buffer: Self::Handle, offset: usize, bytes: &[u8]) -> DeviceResult<()>;

    /// Bind a buffer to the uniform target
    fn bind_uniform_target(&mut self, buffer: Self::Handle) -> DeviceResult<()>;

    /// Overwrite a range of whichever buffer is bound to the uniform target
    fn write_bound_range(&mut self, offset: usize, bytes: &[u8]) -> DeviceResult<()>;

    /// Release a buffer
    fn destroy_buffer(&mut self, buffer: Self::Handle);
}

impl<D: GpuBufferDevice + ?Sized> GpuBufferDevice for &mut D {
    type Handle = D::Handle;

    fn supports_direct_update(&self) -> bool {
        (**self).supports_direct_update()
    }

    fn create_uniform_buffer(&mut self, size: usize) -> DeviceResult<Self::Handle> {
        (**self).create_uniform_buffer(size)
    }

    fn bind_buffer_base(&mut self, slot: u32, buffer: Self::Handle) -> DeviceResult<()> {
        (**self).bind_buffer_base(slot, buffer)
    }

    fn write_buffer_range(&mut self, buffer: Self::Handle, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        (**self).write_buffer_range(buffer, offset, bytes)
    }

    fn bind_uniform_target(&mut self, buffer: Self::Handle) -> DeviceResult<()> {
        (**self).bind_uniform_target(buffer)
    }

    fn write_bound_range(&mut self, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        (**self).write_bound_range(offset, bytes)
    }

    fn destroy_buffer(&mut self, buffer: Self::Handle) {
        (**self).destroy_buffer(buffer);
    }
}

/// Check that a write of `len` bytes at `offset` fits in a buffer of `size` bytes
pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> DeviceResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(DeviceError::OutOfRange { offset, len, size }),
    }
}
