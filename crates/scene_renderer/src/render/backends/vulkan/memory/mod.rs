//! Device memory management
//!
//! The [`MemorySystem`] owns three pools:
//!
//! - `staging`: host-visible bump pool, reset after each upload batch
//! - `uniforms`: host-visible bump pool for persistently mapped uniform data, never reset
//! - `resident`: device-local free-list pool for long-lived buffers and images
//!
//! Resources hold a [`SharedMemory`] handle so their `Drop` can route the
//! release to the pool that issued them.

pub mod block;
pub mod device_pool;
pub mod host_pool;

use ash::vk;
use std::cell::RefCell;
use std::rc::Rc;

use self::block::{BlockProvider, DeviceBlockProvider};
use self::device_pool::{DeviceAllocation, DevicePool};
use self::host_pool::{HostAllocation, HostPool, PoolMark};
use crate::core::config::MemoryConfig;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Shared, single-threaded handle to the memory system
pub type SharedMemory = Rc<RefCell<MemorySystem>>;

/// Which pool a resource's memory should come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Transient upload source, reclaimed in bulk by [`MemorySystem::reset_staging`]
    Staging,
    /// Persistently mapped, host-written every frame
    Uniform,
    /// Device-local, freed individually
    Resident,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Native blocks held
    pub blocks: usize,
    /// Bytes reserved from the driver
    pub reserved_bytes: vk::DeviceSize,
    /// Bytes handed out to allocations
    pub used_bytes: vk::DeviceSize,
    /// Allocations not yet released
    pub live_allocations: usize,
}

/// A region handed to a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Range in the staging pool
    Staging(HostAllocation),
    /// Range in the uniform pool
    Uniform(HostAllocation),
    /// Range in the resident pool
    Resident(DeviceAllocation),
}

impl Allocation {
    /// Memory to bind against
    pub fn memory(&self) -> vk::DeviceMemory {
        match self {
            Self::Staging(a) | Self::Uniform(a) => a.memory(),
            Self::Resident(a) => a.memory(),
        }
    }

    /// Offset to bind at
    pub fn offset(&self) -> vk::DeviceSize {
        match self {
            Self::Staging(a) | Self::Uniform(a) => a.offset(),
            Self::Resident(a) => a.offset(),
        }
    }

    /// Size of the region
    pub fn size(&self) -> vk::DeviceSize {
        match self {
            Self::Staging(a) | Self::Uniform(a) => a.size(),
            Self::Resident(a) => a.size(),
        }
    }

    /// Pool the region came from
    pub fn usage(&self) -> MemoryUsage {
        match self {
            Self::Staging(_) => MemoryUsage::Staging,
            Self::Uniform(_) => MemoryUsage::Uniform,
            Self::Resident(_) => MemoryUsage::Resident,
        }
    }
}

/// Find a memory type allowed by `type_bits` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

const HOST_FLAGS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Owner of every device memory block the renderer uses
pub struct MemorySystem {
    provider: Box<dyn BlockProvider>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    granularity: vk::DeviceSize,
    staging: HostPool,
    uniforms: HostPool,
    resident: DevicePool,
}

impl MemorySystem {
    /// Create the pools on the context's device
    pub fn new(context: &VulkanContext, config: &MemoryConfig) -> VulkanResult<SharedMemory> {
        let physical = context.physical_device();
        let provider = DeviceBlockProvider::new(context.raw_device());
        Self::with_provider(
            Box::new(provider),
            physical.memory_properties,
            physical.properties.limits.buffer_image_granularity,
            config,
        )
        .map(|system| Rc::new(RefCell::new(system)))
    }

    /// Create the pools on top of any block provider
    pub fn with_provider(
        mut provider: Box<dyn BlockProvider>,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        granularity: vk::DeviceSize,
        config: &MemoryConfig,
    ) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|reason| VulkanError::InvalidOperation { reason })?;

        let host_type = find_memory_type(&memory_properties, u32::MAX, HOST_FLAGS)?;
        let staging = HostPool::new(provider.as_mut(), "staging", config.staging_pool_size, host_type)?;
        let uniforms = match HostPool::new(provider.as_mut(), "uniform", config.uniform_pool_size, host_type) {
            Ok(pool) => pool,
            Err(e) => {
                let mut staging = staging;
                staging.destroy(provider.as_mut());
                return Err(e);
            }
        };
        let resident = DevicePool::new(config.device_block_size, config.device_budget);

        log::info!(
            "[MEMORY] Pools ready: staging {} bytes, uniform {} bytes, resident blocks of {} bytes",
            config.staging_pool_size,
            config.uniform_pool_size,
            config.device_block_size
        );

        Ok(Self {
            provider,
            memory_properties,
            granularity: granularity.max(1),
            staging,
            uniforms,
            resident,
        })
    }

    /// Allocate memory satisfying `requirements` from the pool for `usage`
    pub fn allocate(&mut self, requirements: &vk::MemoryRequirements, usage: MemoryUsage) -> VulkanResult<Allocation> {
        match usage {
            MemoryUsage::Staging | MemoryUsage::Uniform => {
                let pool = if usage == MemoryUsage::Staging {
                    &mut self.staging
                } else {
                    &mut self.uniforms
                };
                let type_index = pool
                    .memory_type_index()
                    .ok_or_else(|| VulkanError::invalid("Host pool destroyed"))?;
                if requirements.memory_type_bits & (1 << type_index) == 0 {
                    return Err(VulkanError::NoSuitableMemoryType);
                }
                let allocation = pool.alloc(requirements.size, requirements.alignment)?;
                Ok(if usage == MemoryUsage::Staging {
                    Allocation::Staging(allocation)
                } else {
                    Allocation::Uniform(allocation)
                })
            }
            MemoryUsage::Resident => {
                let type_index = find_memory_type(
                    &self.memory_properties,
                    requirements.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?;
                let alignment = requirements.alignment.max(self.granularity);
                self.resident
                    .alloc(self.provider.as_mut(), requirements.size, alignment, type_index)
                    .map(Allocation::Resident)
            }
        }
    }

    /// Give an allocation back
    ///
    /// Resident ranges return to their block. Host ranges are only reclaimed
    /// by a pool reset, so releasing them is a no-op.
    pub fn release(&mut self, allocation: &Allocation) -> VulkanResult<()> {
        match allocation {
            Allocation::Resident(a) => self.resident.free(a),
            Allocation::Staging(_) | Allocation::Uniform(_) => Ok(()),
        }
    }

    fn host_pool(&self, allocation: &Allocation) -> VulkanResult<(&HostPool, HostAllocation)> {
        match allocation {
            Allocation::Staging(a) => Ok((&self.staging, *a)),
            Allocation::Uniform(a) => Ok((&self.uniforms, *a)),
            Allocation::Resident(_) => Err(VulkanError::invalid("Resident memory is not host visible")),
        }
    }

    /// Write into host-visible memory
    pub fn write(&self, allocation: &Allocation, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let (pool, host) = self.host_pool(allocation)?;
        pool.write(&host, offset, data)
    }

    /// Read back host-visible memory
    pub fn read(&self, allocation: &Allocation) -> VulkanResult<Vec<u8>> {
        let (pool, host) = self.host_pool(allocation)?;
        pool.read(&host)
    }

    /// Invalidate every staging allocation
    ///
    /// Only call once the GPU has finished the work that read from them.
    pub fn reset_staging(&mut self) {
        self.staging.reset();
    }

    /// Position of the staging cursor, for [`MemorySystem::rewind_staging`]
    pub fn staging_mark(&self) -> PoolMark {
        self.staging.mark()
    }

    /// Give back staging space carved since `mark`
    ///
    /// Only for uploads abandoned before anything was recorded; every buffer
    /// staged since the mark must already be dropped.
    pub fn rewind_staging(&mut self, mark: PoolMark) -> VulkanResult<()> {
        self.staging.rewind(mark)
    }

    /// Release resident blocks that no longer hold anything
    pub fn trim(&mut self) -> usize {
        self.resident.trim(self.provider.as_mut())
    }

    /// Find a memory type on this device
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Statistics for `usage`'s pool
    pub fn stats(&self, usage: MemoryUsage) -> MemoryStats {
        match usage {
            MemoryUsage::Staging => self.staging.stats(),
            MemoryUsage::Uniform => self.uniforms.stats(),
            MemoryUsage::Resident => self.resident.stats(),
        }
    }
}

impl Drop for MemorySystem {
    fn drop(&mut self) {
        let provider = self.provider.as_mut();
        self.staging.destroy(provider);
        self.uniforms.destroy(provider);
        self.resident.destroy(provider);
    }
}
