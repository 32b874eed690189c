//! Vulkan uniform buffer device
//!
//! Uniform buffers live in host-visible memory. When the device exposes a
//! `HOST_VISIBLE | HOST_COHERENT` memory type, buffers are persistently
//! mapped, which is what direct range updates use. Without coherent memory
//! only the bind-then-update path is advertised.
//!
//! Writes reach the buffer in one of two ways:
//!
//! - **Recorded**: after [`VulkanUniformDevice::record_into`], every write is
//!   recorded as `vkCmdUpdateBuffer` into the caller's command buffer,
//!   framed by barriers against shader uniform reads. Draws recorded after
//!   a write see it and draws recorded before it do not, and a frame still
//!   in flight is never overwritten. `vkCmdUpdateBuffer` must be recorded
//!   outside a render pass instance, so per-draw overrides need the render
//!   pass split around them. Offsets and lengths must be multiples of 4 and
//!   at most 65536 bytes.
//! - **Host**: with no command buffer attached, bytes are copied into the
//!   mapping immediately (map, copy, flush and unmap for non-coherent
//!   memory). Every draw of the next submission sees the last value
//!   written, so host writes are only correct between submissions, once
//!   the GPU has finished with the buffer.
//!
//! Binding slots map to descriptor bindings: [`VulkanUniformDevice::descriptor_buffer_info`]
//! hands back what a descriptor set write needs for a slot.

use std::collections::HashMap;

use ash::{vk, Device, Instance};

use super::{check_range, DeviceError, DeviceResult, GpuBufferDevice};

struct Allocation {
    memory: vk::DeviceMemory,
    size: usize,
    coherent: bool,
    mapped: Option<*mut u8>,
}

/// Vulkan device that owns host-visible uniform buffers
pub struct VulkanUniformDevice {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    coherent_memory: bool,
    buffers: HashMap<vk::Buffer, Allocation>,
    slots: HashMap<u32, vk::Buffer>,
    bound: Option<vk::Buffer>,
    commands: Option<vk::CommandBuffer>,
}

/// Largest write `vkCmdUpdateBuffer` accepts
pub const MAX_RECORDED_UPDATE: usize = 65536;

/// Check that a write can be recorded with `vkCmdUpdateBuffer`
pub(crate) fn check_recorded_update(offset: usize, len: usize) -> DeviceResult<()> {
    if offset % 4 != 0 || len % 4 != 0 || len == 0 || len > MAX_RECORDED_UPDATE {
        return Err(DeviceError::UnalignedUpdate { offset, len });
    }
    Ok(())
}

impl VulkanUniformDevice {
    /// Wrap a logical device. Memory properties are queried once here.
    pub fn new(device: Device, instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        let coherent_flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let coherent_memory = memory_properties.memory_types
            [..memory_properties.memory_type_count as usize]
            .iter()
            .any(|memory_type| memory_type.property_flags.contains(coherent_flags));

        log::debug!(
            "Vulkan uniform device created (host-coherent memory: {})",
            coherent_memory
        );

        Self {
            device,
            memory_properties,
            coherent_memory,
            buffers: HashMap::new(),
            slots: HashMap::new(),
            bound: None,
            commands: None,
        }
    }

    /// Record subsequent writes into `command_buffer` instead of writing
    /// host memory. The command buffer must be in the recording state and
    /// outside a render pass whenever a write is issued.
    pub fn record_into(&mut self, command_buffer: vk::CommandBuffer) {
        self.commands = Some(command_buffer);
    }

    /// Go back to host writes, returning the detached command buffer
    pub fn stop_recording(&mut self) -> Option<vk::CommandBuffer> {
        self.commands.take()
    }

    /// Command buffer writes are currently recorded into
    pub fn recording_target(&self) -> Option<vk::CommandBuffer> {
        self.commands
    }

    /// Descriptor info for the buffer attached to `slot`
    pub fn descriptor_buffer_info(&self, slot: u32) -> Option<vk::DescriptorBufferInfo> {
        let buffer = *self.slots.get(&slot)?;
        let allocation = self.buffers.get(&buffer)?;
        Some(
            vk::DescriptorBufferInfo::builder()
                .buffer(buffer)
                .offset(0)
                .range(allocation.size as vk::DeviceSize)
                .build(),
        )
    }

    fn allocate(&self, buffer: vk::Buffer) -> DeviceResult<(vk::DeviceMemory, bool)> {
        let mem_requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let (memory_type_index, is_coherent) =
            match find_memory_type(mem_requirements.memory_type_bits, coherent, &self.memory_properties) {
                Ok(index) => (index, true),
                Err(_) => (
                    find_memory_type(
                        mem_requirements.memory_type_bits,
                        vk::MemoryPropertyFlags::HOST_VISIBLE,
                        &self.memory_properties,
                    )?,
                    false,
                ),
            };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }
            .map_err(DeviceError::Api)?;

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(DeviceError::Api(e));
        }

        Ok((memory, is_coherent))
    }

    fn write(&self, buffer: vk::Buffer, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        let allocation = self.buffers.get(&buffer).ok_or(DeviceError::UnknownBuffer)?;
        check_range(offset, bytes.len(), allocation.size)?;

        if let Some(command_buffer) = self.commands {
            check_recorded_update(offset, bytes.len())?;
            self.record_update(command_buffer, buffer, offset, bytes);
            return Ok(());
        }

        if let Some(mapped) = allocation.mapped {
            // SAFETY: the mapping covers the whole allocation and the range was checked.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.add(offset), bytes.len());
            }
            return Ok(());
        }

        // SAFETY: memory is host visible, unmapped, and the range was checked.
        unsafe {
            let ptr = self
                .device
                .map_memory(allocation.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(DeviceError::Api)? as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());

            let flushed = if allocation.coherent {
                Ok(())
            } else {
                let range = vk::MappedMemoryRange::builder()
                    .memory(allocation.memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build();
                self.device.flush_mapped_memory_ranges(&[range])
            };
            self.device.unmap_memory(allocation.memory);
            flushed.map_err(DeviceError::Api)?;
        }
        Ok(())
    }

    fn record_update(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: usize, bytes: &[u8]) {
        let shader_stages = vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        let range = |src_access, dst_access| {
            vk::BufferMemoryBarrier::builder()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(offset as vk::DeviceSize)
                .size(bytes.len() as vk::DeviceSize)
                .build()
        };

        // SAFETY: the command buffer is recording (caller contract of `record_into`)
        // and the range was checked against the buffer and the update limits.
        unsafe {
            // Earlier draws finish reading before the update lands
            self.device.cmd_pipeline_barrier(
                command_buffer,
                shader_stages,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[range(vk::AccessFlags::UNIFORM_READ, vk::AccessFlags::TRANSFER_WRITE)],
                &[],
            );
            self.device
                .cmd_update_buffer(command_buffer, buffer, offset as vk::DeviceSize, bytes);
            // Later draws read the new bytes
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                shader_stages,
                vk::DependencyFlags::empty(),
                &[],
                &[range(vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::UNIFORM_READ)],
                &[],
            );
        }
    }

    fn release(&self, buffer: vk::Buffer, allocation: &Allocation) {
        unsafe {
            if allocation.mapped.is_some() {
                self.device.unmap_memory(allocation.memory);
            }
            self.device.destroy_buffer(buffer, None);
            self.device.free_memory(allocation.memory, None);
        }
    }
}

impl GpuBufferDevice for VulkanUniformDevice {
    type Handle = vk::Buffer;

    fn supports_direct_update(&self) -> bool {
        self.coherent_memory
    }

    fn create_uniform_buffer(&mut self, size: usize) -> DeviceResult<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(DeviceError::Api)?;

        let (memory, coherent) = match self.allocate(buffer) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Coherent memory stays mapped for the lifetime of the buffer
        let mapped = if coherent {
            match unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(ptr) => Some(ptr as *mut u8),
                Err(e) => {
                    unsafe {
                        self.device.destroy_buffer(buffer, None);
                        self.device.free_memory(memory, None);
                    }
                    return Err(DeviceError::Api(e));
                }
            }
        } else {
            None
        };

        log::debug!(
            "Created {} byte uniform buffer {:?} (coherent: {})",
            size,
            buffer,
            coherent
        );

        self.buffers.insert(buffer, Allocation { memory, size, coherent, mapped });
        Ok(buffer)
    }

    fn bind_buffer_base(&mut self, slot: u32, buffer: vk::Buffer) -> DeviceResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer);
        }
        self.slots.insert(slot, buffer);
        Ok(())
    }

    fn write_buffer_range(&mut self, buffer: vk::Buffer, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        self.write(buffer, offset, bytes)
    }

    fn bind_uniform_target(&mut self, buffer: vk::Buffer) -> DeviceResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer);
        }
        self.bound = Some(buffer);
        Ok(())
    }

    fn write_bound_range(&mut self, offset: usize, bytes: &[u8]) -> DeviceResult<()> {
        let buffer = self.bound.ok_or(DeviceError::NoBoundBuffer)?;
        self.write(buffer, offset, bytes)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        let Some(allocation) = self.buffers.remove(&buffer) else {
            log::warn!("Destroying unknown uniform buffer {:?}", buffer);
            return;
        };
        self.release(buffer, &allocation);
        self.slots.retain(|_, bound| *bound != buffer);
        if self.bound == Some(buffer) {
            self.bound = None;
        }
    }
}

impl Drop for VulkanUniformDevice {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            log::warn!("Dropping uniform device with {} live buffers", self.buffers.len());
        }
        for (buffer, allocation) in std::mem::take(&mut self.buffers) {
            self.release(buffer, &allocation);
        }
    }
}

/// Find a suitable memory type
fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
) -> DeviceResult<u32> {
    mem_properties.memory_types[..mem_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|&(i, memory_type)| {
            (type_filter & (1 << i)) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(DeviceError::NoSuitableMemoryType)
}
