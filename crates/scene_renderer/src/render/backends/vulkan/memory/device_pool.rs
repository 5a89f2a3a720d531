//! Device-local free-list pool
//!
//! Blocks live in a generational arena and keep a sorted list of free ranges.
//! Allocation is first-fit across the blocks of the requested memory type;
//! when nothing fits a new block of at least `block_size` bytes is added.
//! Freed ranges merge with their neighbours. Live allocations are tracked by
//! key, so freeing twice or freeing a foreign allocation is an error instead
//! of silent corruption.

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use super::block::{align_up, BlockProvider, MemoryBlock};
use super::MemoryStats;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

new_key_type! {
    /// Arena key of a resident block
    pub struct BlockKey;
    /// Key of a live resident allocation
    pub struct AllocationKey;
}

const POOL_NAME: &str = "resident";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

impl FreeRange {
    fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

struct ResidentBlock {
    block: MemoryBlock,
    free: Vec<FreeRange>,
}

impl ResidentBlock {
    fn new(block: MemoryBlock) -> Self {
        let size = block.size();
        Self {
            block,
            free: vec![FreeRange { offset: 0, size }],
        }
    }

    /// First free range that can hold `size` bytes at `alignment`
    fn find_fit(&self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<(usize, vk::DeviceSize)> {
        self.free.iter().enumerate().find_map(|(index, range)| {
            let aligned = align_up(range.offset, alignment);
            (aligned + size <= range.end()).then_some((index, aligned))
        })
    }

    /// Remove `[offset, offset + size)` from free range `index`, keeping any padding
    fn carve(&mut self, index: usize, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let range = self.free.remove(index);
        let tail = FreeRange {
            offset: offset + size,
            size: range.end() - (offset + size),
        };
        let head = FreeRange {
            offset: range.offset,
            size: offset - range.offset,
        };
        if tail.size > 0 {
            self.free.insert(index, tail);
        }
        if head.size > 0 {
            self.free.insert(index, head);
        }
    }

    /// Return `[offset, offset + size)` and merge with adjacent ranges
    fn release(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let index = self.free.partition_point(|range| range.offset < offset);
        self.free.insert(index, FreeRange { offset, size });

        if index + 1 < self.free.len() && self.free[index].end() == self.free[index + 1].offset {
            self.free[index].size += self.free[index + 1].size;
            self.free.remove(index + 1);
        }
        if index > 0 && self.free[index - 1].end() == self.free[index].offset {
            self.free[index - 1].size += self.free[index].size;
            self.free.remove(index);
        }
    }

    fn free_bytes(&self) -> vk::DeviceSize {
        self.free.iter().map(|range| range.size).sum()
    }

    fn is_empty(&self) -> bool {
        self.free.len() == 1 && self.free[0].size == self.block.size()
    }
}

struct LiveAllocation {
    block: BlockKey,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

/// Handle to a range of resident memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAllocation {
    key: AllocationKey,
    block: BlockKey,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

impl DeviceAllocation {
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

    /// Arena key of the owning block
    pub fn block(&self) -> BlockKey {
        self.block
    }
}

/// Free-list allocator over device-local blocks
pub struct DevicePool {
    blocks: SlotMap<BlockKey, ResidentBlock>,
    live: SlotMap<AllocationKey, LiveAllocation>,
    block_size: vk::DeviceSize,
    budget: Option<vk::DeviceSize>,
}

impl DevicePool {
    /// Empty pool growing by at least `block_size` bytes per block
    pub fn new(block_size: vk::DeviceSize, budget: Option<vk::DeviceSize>) -> Self {
        Self {
            blocks: SlotMap::with_key(),
            live: SlotMap::with_key(),
            block_size,
            budget,
        }
    }

    fn reserved_bytes(&self) -> vk::DeviceSize {
        self.blocks.values().map(|b| b.block.size()).sum()
    }

    /// Allocate `size` bytes aligned to `alignment` from `memory_type_index`
    pub fn alloc(
        &mut self,
        provider: &mut dyn BlockProvider,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VulkanResult<DeviceAllocation> {
        if size == 0 {
            return Err(VulkanError::invalid("Zero-sized resident allocation"));
        }

        let existing = self
            .blocks
            .iter()
            .filter(|(_, b)| b.block.memory_type_index() == memory_type_index)
            .find_map(|(key, b)| b.find_fit(size, alignment).map(|(index, offset)| (key, index, offset)));

        let (block_key, index, offset) = match existing {
            Some(fit) => fit,
            None => {
                let key = self.grow(provider, align_up(size, alignment), memory_type_index)?;
                (key, 0, 0)
            }
        };

        let block = self
            .blocks
            .get_mut(block_key)
            .ok_or_else(|| VulkanError::invalid("Resident block vanished during allocation"))?;
        block.carve(index, offset, size);
        let memory = block.block.memory();

        let key = self.live.insert(LiveAllocation {
            block: block_key,
            offset,
            size,
        });

        Ok(DeviceAllocation {
            key,
            block: block_key,
            memory,
            offset,
            size,
        })
    }

    fn grow(
        &mut self,
        provider: &mut dyn BlockProvider,
        min_size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VulkanResult<BlockKey> {
        let size = self.block_size.max(min_size);

        if let Some(budget) = self.budget {
            if self.reserved_bytes() + size > budget {
                log::error!(
                    "[MEMORY] Resident budget of {} bytes exceeded ({} reserved, {} more needed)",
                    budget,
                    self.reserved_bytes(),
                    size
                );
                return Err(VulkanError::OutOfDeviceMemory {
                    requested: min_size,
                    pool: POOL_NAME,
                });
            }
        }

        let block = provider.allocate(size, memory_type_index, false).map_err(|e| match e {
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                VulkanError::OutOfDeviceMemory {
                    requested: min_size,
                    pool: POOL_NAME,
                }
            }
            other => other,
        })?;

        log::info!(
            "[MEMORY] Resident pool grew to {} blocks (+{} bytes, memory type {})",
            self.blocks.len() + 1,
            size,
            memory_type_index
        );
        Ok(self.blocks.insert(ResidentBlock::new(block)))
    }

    /// Return an allocation's range to its block
    pub fn free(&mut self, allocation: &DeviceAllocation) -> VulkanResult<()> {
        let live = self.live.remove(allocation.key).ok_or(VulkanError::StaleAllocation)?;
        let block = self.blocks.get_mut(live.block).ok_or(VulkanError::StaleAllocation)?;
        block.release(live.offset, live.size);
        Ok(())
    }

    /// Release blocks with no live allocations
    pub fn trim(&mut self, provider: &mut dyn BlockProvider) -> usize {
        let empty: Vec<BlockKey> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.is_empty())
            .map(|(key, _)| key)
            .collect();
        for key in &empty {
            if let Some(block) = self.blocks.remove(*key) {
                provider.free(block.block);
            }
        }
        empty.len()
    }

    /// Usage statistics
    pub fn stats(&self) -> MemoryStats {
        let reserved = self.reserved_bytes();
        let free: vk::DeviceSize = self.blocks.values().map(ResidentBlock::free_bytes).sum();
        MemoryStats {
            blocks: self.blocks.len(),
            reserved_bytes: reserved,
            used_bytes: reserved - free,
            live_allocations: self.live.len(),
        }
    }

    /// Release every block, live or not
    pub fn destroy(&mut self, provider: &mut dyn BlockProvider) {
        if !self.live.is_empty() {
            log::warn!("[MEMORY] Destroying resident pool with {} live allocations", self.live.len());
        }
        self.live.clear();
        for (_, block) in self.blocks.drain() {
            provider.free(block.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::memory::block::HeapBlockProvider;

    fn overlaps(a: &DeviceAllocation, b: &DeviceAllocation) -> bool {
        a.memory() == b.memory() && a.offset() < b.offset() + b.size() && b.offset() < a.offset() + a.size()
    }

    #[test]
    fn test_alloc_free_alloc_reuses_space() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(4096, None);

        let a = pool.alloc(&mut provider, 1000, 256, 1).unwrap();
        pool.free(&a).unwrap();
        let b = pool.alloc(&mut provider, 1000, 256, 1).unwrap();

        assert_eq!(pool.stats().blocks, 1);
        assert_eq!(b.offset(), a.offset());
        assert_eq!(provider.live_blocks(), 1);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(4096, None);
        let a = pool.alloc(&mut provider, 64, 16, 0).unwrap();
        pool.free(&a).unwrap();
        assert!(matches!(pool.free(&a), Err(VulkanError::StaleAllocation)));
    }

    #[test]
    fn test_allocations_aligned_and_disjoint() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(8192, None);
        let requests = [(100, 16), (33, 64), (500, 256), (7, 4), (1024, 1024), (3000, 512)];

        let allocations: Vec<_> = requests
            .iter()
            .map(|&(size, align)| pool.alloc(&mut provider, size, align, 0).unwrap())
            .collect();

        for (allocation, &(_, align)) in allocations.iter().zip(&requests) {
            assert_eq!(allocation.offset() % align, 0);
        }
        for (i, a) in allocations.iter().enumerate() {
            for b in &allocations[i + 1..] {
                assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_freed_neighbours_coalesce() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(1024, None);
        let a = pool.alloc(&mut provider, 256, 1, 0).unwrap();
        let b = pool.alloc(&mut provider, 256, 1, 0).unwrap();
        let c = pool.alloc(&mut provider, 256, 1, 0).unwrap();

        pool.free(&a).unwrap();
        pool.free(&c).unwrap();
        pool.free(&b).unwrap();

        let whole = pool.alloc(&mut provider, 1024, 1, 0).unwrap();
        assert_eq!(whole.offset(), 0);
        assert_eq!(pool.stats().blocks, 1);
    }

    #[test]
    fn test_grows_for_oversized_and_other_types() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(1024, None);

        let big = pool.alloc(&mut provider, 5000, 1, 0).unwrap();
        let other_type = pool.alloc(&mut provider, 16, 1, 3).unwrap();

        assert_ne!(big.block(), other_type.block());
        assert_eq!(pool.stats().blocks, 2);
        assert_eq!(pool.stats().reserved_bytes, 5000 + 1024);
    }

    #[test]
    fn test_budget_and_provider_exhaustion() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(1024, Some(2048));
        pool.alloc(&mut provider, 1024, 1, 0).unwrap();
        pool.alloc(&mut provider, 1024, 1, 0).unwrap();
        assert!(matches!(
            pool.alloc(&mut provider, 1, 1, 0),
            Err(VulkanError::OutOfDeviceMemory { pool: "resident", .. })
        ));

        let mut small = HeapBlockProvider::with_capacity(1024);
        let mut pool = DevicePool::new(1024, None);
        pool.alloc(&mut small, 1024, 1, 0).unwrap();
        assert!(matches!(
            pool.alloc(&mut small, 1, 1, 0),
            Err(VulkanError::OutOfDeviceMemory { requested: 1, .. })
        ));
    }

    #[test]
    fn test_trim_and_destroy_return_blocks() {
        let mut provider = HeapBlockProvider::new();
        let mut pool = DevicePool::new(1024, None);
        let a = pool.alloc(&mut provider, 16, 1, 0).unwrap();
        let _b = pool.alloc(&mut provider, 16, 1, 1).unwrap();
        pool.free(&a).unwrap();

        assert_eq!(pool.trim(&mut provider), 1);
        assert_eq!(provider.live_blocks(), 1);

        pool.destroy(&mut provider);
        assert_eq!(provider.live_blocks(), 0);
        assert_eq!(pool.stats().live_allocations, 0);
    }
}
