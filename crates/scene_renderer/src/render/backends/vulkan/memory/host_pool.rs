//! Host-visible bump pool
//!
//! One persistently mapped block and a cursor. Allocation is an aligned bump,
//! there is no per-allocation free, and [`HostPool::reset`] rewinds the cursor
//! for the whole pool at once. Each reset starts a new generation; any
//! [`HostAllocation`] from an earlier generation is rejected on use.

use ash::vk;

use super::block::{align_up, BlockProvider, MemoryBlock};
use super::MemoryStats;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// A range inside a [`HostPool`], valid until the pool's next reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAllocation {
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    generation: u64,
}

impl HostAllocation {
    /// Memory the range lives in
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Byte offset within the block
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Pool generation the range was carved from
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Cursor position to rewind to with [`HostPool::rewind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMark {
    cursor: vk::DeviceSize,
    live: usize,
    generation: u64,
}

/// Monotonic allocator over a single host-visible block
pub struct HostPool {
    name: &'static str,
    block: Option<MemoryBlock>,
    cursor: vk::DeviceSize,
    generation: u64,
    live: usize,
}

impl HostPool {
    /// Allocate and map the pool's block
    pub fn new(
        provider: &mut dyn BlockProvider,
        name: &'static str,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VulkanResult<Self> {
        let block = provider.allocate(size, memory_type_index, true).map_err(|e| match e {
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                VulkanError::OutOfDeviceMemory { requested: size, pool: name }
            }
            other => other,
        })?;

        log::debug!("[MEMORY] {} pool: {} bytes, memory type {}", name, size, memory_type_index);

        Ok(Self {
            name,
            block: Some(block),
            cursor: 0,
            generation: 0,
            live: 0,
        })
    }

    fn block(&self) -> VulkanResult<&MemoryBlock> {
        self.block
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("{} pool already destroyed", self.name)))
    }

    /// Pool name used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Memory type backing the pool
    pub fn memory_type_index(&self) -> Option<u32> {
        self.block.as_ref().map(MemoryBlock::memory_type_index)
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> vk::DeviceSize {
        self.block.as_ref().map_or(0, MemoryBlock::size)
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Carve `size` bytes aligned to `alignment`
    pub fn alloc(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> VulkanResult<HostAllocation> {
        let block = self.block()?;
        let offset = align_up(self.cursor, alignment);
        let end = offset.checked_add(size).unwrap_or(vk::DeviceSize::MAX);

        if end > block.size() {
            log::error!(
                "[MEMORY] {} pool exhausted: {} bytes requested, {} of {} in use",
                self.name,
                size,
                self.cursor,
                block.size()
            );
            return Err(VulkanError::OutOfDeviceMemory {
                requested: size,
                pool: self.name,
            });
        }

        let allocation = HostAllocation {
            memory: block.memory(),
            offset,
            size,
            generation: self.generation,
        };
        self.cursor = end;
        self.live += 1;
        Ok(allocation)
    }

    /// Invalidate every allocation and rewind to offset 0
    pub fn reset(&mut self) {
        log::debug!(
            "[MEMORY] {} pool reset: {} allocations, {} bytes released",
            self.name,
            self.live,
            self.cursor
        );
        self.cursor = 0;
        self.live = 0;
        self.generation += 1;
    }

    /// Current cursor, for giving back what a failed upload carved
    pub fn mark(&self) -> PoolMark {
        PoolMark {
            cursor: self.cursor,
            live: self.live,
            generation: self.generation,
        }
    }

    /// Give back everything carved since `mark`
    ///
    /// Every allocation made after the mark must already be dropped. A mark
    /// from before a reset, or one ahead of the cursor, is rejected.
    pub fn rewind(&mut self, mark: PoolMark) -> VulkanResult<()> {
        if mark.generation != self.generation || mark.cursor > self.cursor || mark.live > self.live {
            return Err(VulkanError::StaleAllocation);
        }
        log::debug!(
            "[MEMORY] {} pool rewound: {} allocations, {} bytes returned",
            self.name,
            self.live - mark.live,
            self.cursor - mark.cursor
        );
        self.cursor = mark.cursor;
        self.live = mark.live;
        Ok(())
    }

    /// Check that `allocation` still belongs to the live generation of this pool
    pub fn validate(&self, allocation: &HostAllocation) -> VulkanResult<()> {
        let block = self.block()?;
        if allocation.memory != block.memory() || allocation.generation != self.generation {
            return Err(VulkanError::StaleAllocation);
        }
        Ok(())
    }

    /// Write `data` at `offset` bytes into `allocation`
    pub fn write(&self, allocation: &HostAllocation, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.validate(allocation)?;
        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.map_or(true, |end| end > allocation.size) {
            return Err(VulkanError::invalid(format!(
                "Write of {} bytes at {} overflows {} byte allocation",
                data.len(),
                offset,
                allocation.size
            )));
        }
        self.block()?.write_bytes(allocation.offset + offset, data)
    }

    /// Read the full contents of `allocation`
    pub fn read(&self, allocation: &HostAllocation) -> VulkanResult<Vec<u8>> {
        self.validate(allocation)?;
        let len = usize::try_from(allocation.size).map_err(|_| VulkanError::invalid("Allocation too large to read"))?;
        self.block()?.read_bytes(allocation.offset, len)
    }

    /// Usage statistics
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            blocks: usize::from(self.block.is_some()),
            reserved_bytes: self.capacity(),
            used_bytes: self.cursor,
            live_allocations: self.live,
        }
    }

    /// Return the block to `provider`; later use reports an error
    pub fn destroy(&mut self, provider: &mut dyn BlockProvider) {
        if let Some(block) = self.block.take() {
            provider.free(block);
        }
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::memory::block::HeapBlockProvider;

    fn pool(size: vk::DeviceSize) -> (HeapBlockProvider, HostPool) {
        let mut provider = HeapBlockProvider::new();
        let pool = HostPool::new(&mut provider, "staging", size, 0).unwrap();
        (provider, pool)
    }

    #[test]
    fn test_bump_offsets_respect_alignment() {
        let (_provider, mut pool) = pool(1024 * 1024);
        let offsets: Vec<_> = [100, 200, 300]
            .iter()
            .map(|&size| pool.alloc(size, 16).unwrap().offset())
            .collect();
        assert_eq!(offsets, vec![0, 112, 320]);
    }

    #[test]
    fn test_reset_rewinds_and_invalidates() {
        let (_provider, mut pool) = pool(4096);
        let old = pool.alloc(100, 16).unwrap();
        pool.write(&old, 0, &[7; 100]).unwrap();

        pool.reset();

        let fresh = pool.alloc(100, 16).unwrap();
        assert_eq!(fresh.offset(), 0);
        assert!(matches!(pool.write(&old, 0, &[1]), Err(VulkanError::StaleAllocation)));
        assert!(matches!(pool.read(&old), Err(VulkanError::StaleAllocation)));
        assert!(pool.write(&fresh, 0, &[1; 100]).is_ok());
    }

    #[test]
    fn test_exhaustion_reports_pool() {
        let (_provider, mut pool) = pool(256);
        pool.alloc(200, 1).unwrap();
        match pool.alloc(100, 1) {
            Err(VulkanError::OutOfDeviceMemory { requested, pool }) => {
                assert_eq!(requested, 100);
                assert_eq!(pool, "staging");
            }
            other => panic!("expected OutOfDeviceMemory, got {other:?}"),
        }
    }

    #[test]
    fn test_write_bounds_checked_per_allocation() {
        let (_provider, mut pool) = pool(256);
        let a = pool.alloc(16, 4).unwrap();
        let b = pool.alloc(16, 4).unwrap();
        assert!(pool.write(&a, 8, &[0; 16]).is_err());
        pool.write(&b, 0, &[9; 16]).unwrap();
        pool.write(&a, 0, &[3; 16]).unwrap();
        assert_eq!(pool.read(&b).unwrap(), vec![9; 16]);
    }

    #[test]
    fn test_write_offset_overflow_rejected() {
        let (_provider, mut pool) = pool(256);
        let a = pool.alloc(16, 4).unwrap();
        assert!(matches!(
            pool.write(&a, u64::MAX, &[0; 2]),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_rewind_returns_space_after_mark() {
        let (_provider, mut pool) = pool(1024);
        let kept = pool.alloc(100, 16).unwrap();
        let mark = pool.mark();
        let before = pool.stats();

        pool.alloc(200, 16).unwrap();
        pool.alloc(300, 16).unwrap();
        pool.rewind(mark).unwrap();

        assert_eq!(pool.stats(), before);
        assert_eq!(pool.alloc(8, 16).unwrap().offset(), 112);
        pool.write(&kept, 0, &[5; 100]).unwrap();
    }

    #[test]
    fn test_rewind_rejects_mark_from_earlier_generation() {
        let (_provider, mut pool) = pool(1024);
        pool.alloc(64, 16).unwrap();
        let mark = pool.mark();
        pool.reset();
        assert!(matches!(pool.rewind(mark), Err(VulkanError::StaleAllocation)));
        assert_eq!(pool.stats().used_bytes, 0);
    }

    #[test]
    fn test_destroy_releases_block() {
        let (mut provider, mut pool) = pool(256);
        let a = pool.alloc(16, 4).unwrap();
        pool.destroy(&mut provider);
        assert_eq!(provider.live_blocks(), 0);
        assert!(pool.write(&a, 0, &[0]).is_err());
        assert!(pool.alloc(1, 1).is_err());
    }
}
