//! Raw memory blocks and where they come from
//!
//! Pools never call `vkAllocateMemory` themselves; they ask a
//! [`BlockProvider`]. The device-backed provider is used by the renderer, the
//! heap-backed one lets pool bookkeeping run without a GPU.

use ash::vk::{self, Handle};
use ash::Device;
use std::collections::HashMap;
use std::ptr::NonNull;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Round `value` up to the next multiple of `alignment` (treated as 1 when zero)
pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// One native memory allocation backing a pool
pub struct MemoryBlock {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
    mapped: Option<NonNull<u8>>,
}

impl MemoryBlock {
    /// Wrap an allocated block; `mapped` must cover `size` bytes while the block lives
    pub fn new(memory: vk::DeviceMemory, size: vk::DeviceSize, memory_type_index: u32, mapped: Option<NonNull<u8>>) -> Self {
        Self {
            memory,
            size,
            memory_type_index,
            mapped,
        }
    }

    /// Native memory handle
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Memory type the block was allocated from
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Whether the block is persistently mapped
    pub fn is_host_visible(&self) -> bool {
        self.mapped.is_some()
    }

    fn checked_range(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<(NonNull<u8>, usize)> {
        let ptr = self
            .mapped
            .ok_or_else(|| VulkanError::invalid("Block is not host visible"))?;
        let end = offset
            .checked_add(len as vk::DeviceSize)
            .ok_or_else(|| VulkanError::invalid("Mapped range overflows"))?;
        if end > self.size {
            return Err(VulkanError::invalid(format!(
                "Mapped range {offset}..{end} exceeds block of {} bytes",
                self.size
            )));
        }
        let offset = usize::try_from(offset).map_err(|_| VulkanError::invalid("Offset does not fit in usize"))?;
        Ok((ptr, offset))
    }

    /// Copy `data` into the mapping at `offset`
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let (ptr, offset) = self.checked_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Copy `len` bytes out of the mapping at `offset`
    pub fn read_bytes(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        let (ptr, offset) = self.checked_range(offset, len)?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }
}

/// Source of raw memory blocks for the pools
pub trait BlockProvider {
    /// Allocate `size` bytes of `memory_type_index`, mapping the block when `map` is set
    fn allocate(&mut self, size: vk::DeviceSize, memory_type_index: u32, map: bool) -> VulkanResult<MemoryBlock>;

    /// Release a block previously returned by [`BlockProvider::allocate`]
    fn free(&mut self, block: MemoryBlock);
}

/// Allocates blocks with `vkAllocateMemory`
pub struct DeviceBlockProvider {
    device: Device,
}

impl DeviceBlockProvider {
    /// Create a provider for `device`
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl BlockProvider for DeviceBlockProvider {
    fn allocate(&mut self, size: vk::DeviceSize, memory_type_index: u32, map: bool) -> VulkanResult<MemoryBlock> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)?;

        let mapped = if map {
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            };
            match ptr {
                Ok(ptr) => NonNull::new(ptr.cast::<u8>()),
                Err(e) => {
                    unsafe { self.device.free_memory(memory, None) };
                    return Err(VulkanError::Api(e));
                }
            }
        } else {
            None
        };

        log::debug!(
            "[MEMORY] Allocated {} byte block (type {}, mapped: {})",
            size,
            memory_type_index,
            mapped.is_some()
        );

        Ok(MemoryBlock::new(memory, size, memory_type_index, mapped))
    }

    fn free(&mut self, block: MemoryBlock) {
        unsafe {
            if block.is_host_visible() {
                self.device.unmap_memory(block.memory);
            }
            self.device.free_memory(block.memory, None);
        }
        log::debug!("[MEMORY] Freed {} byte block", block.size);
    }
}

/// Backs blocks with host heap memory
///
/// Handles are synthetic, so blocks from this provider must never reach a
/// real device. It can be capped to simulate device memory exhaustion.
#[derive(Default)]
pub struct HeapBlockProvider {
    storage: HashMap<u64, Box<[u8]>>,
    next_handle: u64,
    capacity: Option<vk::DeviceSize>,
    allocated: vk::DeviceSize,
}

impl HeapBlockProvider {
    /// Unlimited provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that reports out-of-memory once `bytes` are outstanding
    pub fn with_capacity(bytes: vk::DeviceSize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::default()
        }
    }

    /// Number of blocks currently allocated
    pub fn live_blocks(&self) -> usize {
        self.storage.len()
    }

    /// Bytes currently allocated
    pub fn allocated_bytes(&self) -> vk::DeviceSize {
        self.allocated
    }
}

impl BlockProvider for HeapBlockProvider {
    fn allocate(&mut self, size: vk::DeviceSize, memory_type_index: u32, map: bool) -> VulkanResult<MemoryBlock> {
        if let Some(capacity) = self.capacity {
            if self.allocated + size > capacity {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
        }
        let len = usize::try_from(size).map_err(|_| VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;

        self.next_handle += 1;
        let mut bytes = vec![0u8; len].into_boxed_slice();
        let mapped = if map { NonNull::new(bytes.as_mut_ptr()) } else { None };
        self.storage.insert(self.next_handle, bytes);
        self.allocated += size;

        Ok(MemoryBlock::new(
            vk::DeviceMemory::from_raw(self.next_handle),
            size,
            memory_type_index,
            mapped,
        ))
    }

    fn free(&mut self, block: MemoryBlock) {
        if self.storage.remove(&block.memory.as_raw()).is_some() {
            self.allocated -= block.size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(100, 16), 112);
        assert_eq!(align_up(112, 16), 112);
        assert_eq!(align_up(7, 0), 7);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_heap_block_read_write() {
        let mut provider = HeapBlockProvider::new();
        let block = provider.allocate(64, 0, true).unwrap();
        block.write_bytes(8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(block.read_bytes(8, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(block.write_bytes(62, &[0; 4]).is_err());
        provider.free(block);
        assert_eq!(provider.live_blocks(), 0);
    }

    #[test]
    fn test_unmapped_block_rejects_access() {
        let mut provider = HeapBlockProvider::new();
        let block = provider.allocate(64, 0, false).unwrap();
        assert!(!block.is_host_visible());
        assert!(block.write_bytes(0, &[1]).is_err());
    }

    #[test]
    fn test_capacity_reports_out_of_memory() {
        let mut provider = HeapBlockProvider::with_capacity(128);
        let _a = provider.allocate(100, 0, false).unwrap();
        assert!(matches!(
            provider.allocate(100, 0, false),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
    }
}
