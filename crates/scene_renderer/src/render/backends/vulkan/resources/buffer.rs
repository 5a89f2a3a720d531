//! Buffers bound to pool memory
//!
//! Construction: create the buffer, query its requirements, allocate from the
//! pool picked by [`MemoryUsage`], bind. Drop reverses it: destroy the
//! buffer, then hand the allocation back to the memory system.

use ash::{vk, Device};
use std::rc::Rc;

use crate::render::backends::vulkan::memory::{Allocation, MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// A `VkBuffer` and the memory it is bound to
pub struct Buffer {
    device: Device,
    memory: SharedMemory,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer of `size` bytes backed by the pool for `usage`
    pub fn new(
        device: Device,
        memory: &SharedMemory,
        size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        usage: MemoryUsage,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::invalid("Cannot create an empty buffer"));
        }

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(buffer_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None) }.map_err(VulkanError::creation("buffer"))?;

        let mut this = Self {
            device,
            memory: Rc::clone(memory),
            buffer,
            allocation: None,
            size,
        };

        let requirements = unsafe { this.device.get_buffer_memory_requirements(buffer) };
        let allocation = memory.borrow_mut().allocate(&requirements, usage)?;
        this.allocation = Some(allocation);

        unsafe {
            this.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(VulkanError::Api)?;

        Ok(this)
    }

    /// Create a host-visible buffer and fill it with `data`
    pub fn with_data(
        device: Device,
        memory: &SharedMemory,
        data: &[u8],
        buffer_usage: vk::BufferUsageFlags,
        usage: MemoryUsage,
    ) -> VulkanResult<Self> {
        let buffer = Self::new(device, memory, data.len() as vk::DeviceSize, buffer_usage, usage)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Pool this buffer's memory came from
    pub fn usage(&self) -> Option<MemoryUsage> {
        self.allocation.as_ref().map(Allocation::usage)
    }

    fn allocation(&self) -> VulkanResult<&Allocation> {
        self.allocation
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("Buffer has no memory bound"))
    }

    /// Write `data` at `offset`; host-visible buffers only
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(VulkanError::invalid(format!(
                "Write of {} bytes at {} overflows {} byte buffer",
                data.len(),
                offset,
                self.size
            )));
        }
        self.memory.borrow().write(self.allocation()?, offset, data)
    }

    /// Read the buffer's contents; host-visible buffers only
    pub fn read(&self) -> VulkanResult<Vec<u8>> {
        let mut bytes = self.memory.borrow().read(self.allocation()?)?;
        bytes.truncate(usize::try_from(self.size).unwrap_or(usize::MAX));
        Ok(bytes)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory.try_borrow_mut() {
                Ok(mut memory) => {
                    if let Err(e) = memory.release(&allocation) {
                        log::error!("Failed to release buffer memory: {e}");
                    }
                }
                Err(_) => log::error!("Memory system busy while dropping a buffer; allocation leaked"),
            }
        }
    }
}
