//! Allocator behaviour against heap-backed blocks

use ash::vk;
use scene_renderer::core::config::MemoryConfig;
use scene_renderer::render::backends::vulkan::memory::block::HeapBlockProvider;
use scene_renderer::render::backends::vulkan::memory::{Allocation, MemorySystem, MemoryUsage, SharedMemory};
use scene_renderer::render::backends::vulkan::upload::staging::staged;
use scene_renderer::{VulkanError, VulkanResult};
use std::cell::RefCell;
use std::rc::Rc;

fn memory_properties() -> vk::PhysicalDeviceMemoryProperties {
    let mut props = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 2,
        ..Default::default()
    };
    props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    props.memory_types[1].property_flags =
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    props
}

fn system(config: &MemoryConfig) -> MemorySystem {
    MemorySystem::with_provider(Box::new(HeapBlockProvider::new()), memory_properties(), 1, config).unwrap()
}

fn reqs(size: u64, alignment: u64) -> vk::MemoryRequirements {
    vk::MemoryRequirements {
        size,
        alignment,
        memory_type_bits: 0b11,
    }
}

/// Small deterministic generator so runs are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

#[test]
fn test_staging_offsets_follow_alignment() {
    let mut memory = system(&MemoryConfig::default().with_staging_pool_size(1024 * 1024));

    let a = memory.allocate(&reqs(100, 16), MemoryUsage::Staging).unwrap();
    let b = memory.allocate(&reqs(200, 16), MemoryUsage::Staging).unwrap();
    let c = memory.allocate(&reqs(300, 16), MemoryUsage::Staging).unwrap();

    assert_eq!(a.offset(), 0);
    assert_eq!(b.offset(), 112);
    assert_eq!(c.offset(), 320);
    assert_eq!(memory.stats(MemoryUsage::Staging).live_allocations, 3);

    memory.reset_staging();
    let d = memory.allocate(&reqs(100, 16), MemoryUsage::Staging).unwrap();
    assert_eq!(d.offset(), 0);
}

#[test]
fn test_staging_reset_invalidates_and_rewinds() {
    let mut memory = system(&MemoryConfig::default().with_staging_pool_size(1024));

    let before = memory.allocate(&reqs(512, 16), MemoryUsage::Staging).unwrap();
    memory.write(&before, 0, &[7; 512]).unwrap();
    memory.reset_staging();

    assert!(matches!(memory.read(&before), Err(VulkanError::StaleAllocation)));
    let after = memory.allocate(&reqs(512, 16), MemoryUsage::Staging).unwrap();
    assert_eq!(after.offset(), 0);
    assert_eq!(memory.stats(MemoryUsage::Staging).live_allocations, 1);
}

#[test]
fn test_staging_exhaustion_reports_pool() {
    let mut memory = system(&MemoryConfig::default().with_staging_pool_size(256));

    memory.allocate(&reqs(200, 16), MemoryUsage::Staging).unwrap();
    match memory.allocate(&reqs(100, 16), MemoryUsage::Staging) {
        Err(VulkanError::OutOfDeviceMemory { requested, pool }) => {
            assert_eq!(requested, 100);
            assert_eq!(pool, "staging");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn test_resident_reuses_freed_ranges() {
    let mut memory = system(&MemoryConfig::default().with_device_block_size(4096));

    let a = memory.allocate(&reqs(1024, 256), MemoryUsage::Resident).unwrap();
    let b = memory.allocate(&reqs(1024, 256), MemoryUsage::Resident).unwrap();
    memory.release(&a).unwrap();
    let c = memory.allocate(&reqs(512, 256), MemoryUsage::Resident).unwrap();

    assert_eq!(c.offset(), a.offset());
    assert_eq!(c.memory(), b.memory());
    assert_eq!(memory.stats(MemoryUsage::Resident).blocks, 1);
}

#[test]
fn test_resident_double_release_is_stale() {
    let mut memory = system(&MemoryConfig::default());

    let a = memory.allocate(&reqs(256, 256), MemoryUsage::Resident).unwrap();
    memory.release(&a).unwrap();
    assert!(matches!(memory.release(&a), Err(VulkanError::StaleAllocation)));
}

#[test]
fn test_resident_grows_then_trims() {
    let mut memory = system(&MemoryConfig::default().with_device_block_size(1024));

    let small = memory.allocate(&reqs(512, 256), MemoryUsage::Resident).unwrap();
    let large = memory.allocate(&reqs(4096, 256), MemoryUsage::Resident).unwrap();
    assert_ne!(small.memory(), large.memory());
    assert_eq!(memory.stats(MemoryUsage::Resident).blocks, 2);

    memory.release(&large).unwrap();
    assert_eq!(memory.trim(), 1);
    assert_eq!(memory.stats(MemoryUsage::Resident).blocks, 1);
}

#[test]
fn test_resident_budget_is_enforced() {
    let config = MemoryConfig::default()
        .with_device_block_size(1024)
        .with_device_budget(2048);
    let mut memory = system(&config);

    memory.allocate(&reqs(1024, 256), MemoryUsage::Resident).unwrap();
    memory.allocate(&reqs(1024, 256), MemoryUsage::Resident).unwrap();
    assert!(matches!(
        memory.allocate(&reqs(1024, 256), MemoryUsage::Resident),
        Err(VulkanError::OutOfDeviceMemory { .. })
    ));
}

#[test]
fn test_random_resident_allocations_never_overlap() {
    let mut memory = system(&MemoryConfig::default().with_device_block_size(64 * 1024));
    let mut rng = Lcg(0x5eed);
    let mut live: Vec<Allocation> = Vec::new();

    for _ in 0..500 {
        if live.is_empty() || rng.next() % 3 != 0 {
            let size = 1 + rng.next() % 4000;
            let alignment = 1 << (rng.next() % 9);
            let allocation = memory.allocate(&reqs(size, alignment), MemoryUsage::Resident).unwrap();
            assert_eq!(allocation.offset() % alignment, 0);
            live.push(allocation);
        } else {
            let index = (rng.next() as usize) % live.len();
            let allocation = live.swap_remove(index);
            memory.release(&allocation).unwrap();
        }

        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                if a.memory() == b.memory() {
                    let disjoint = a.offset() + a.size() <= b.offset() || b.offset() + b.size() <= a.offset();
                    assert!(disjoint, "{a:?} overlaps {b:?}");
                }
            }
        }
    }

    assert_eq!(memory.stats(MemoryUsage::Resident).live_allocations, live.len());
}

#[test]
fn test_failed_staging_gives_space_back() {
    let memory: SharedMemory = Rc::new(RefCell::new(system(
        &MemoryConfig::default().with_staging_pool_size(4096),
    )));
    let kept = memory.borrow_mut().allocate(&reqs(100, 16), MemoryUsage::Staging).unwrap();
    let before = memory.borrow().stats(MemoryUsage::Staging);

    let result: VulkanResult<()> = staged(&memory, || {
        memory.borrow_mut().allocate(&reqs(1000, 16), MemoryUsage::Staging)?;
        memory.borrow_mut().allocate(&reqs(1000, 16), MemoryUsage::Staging)?;
        memory.borrow_mut().allocate(&reqs(4000, 16), MemoryUsage::Staging)?;
        Ok(())
    });

    assert!(matches!(result, Err(VulkanError::OutOfDeviceMemory { pool: "staging", .. })));
    assert_eq!(memory.borrow().stats(MemoryUsage::Staging), before);
    memory.borrow().write(&kept, 0, &[1; 100]).unwrap();

    // a successful stage keeps what it carved
    let next = staged(&memory, || memory.borrow_mut().allocate(&reqs(64, 16), MemoryUsage::Staging)).unwrap();
    assert_eq!(next.offset(), 112);
    assert_eq!(memory.borrow().stats(MemoryUsage::Staging).live_allocations, 2);
}

#[test]
fn test_host_write_offset_overflow_is_rejected() {
    let mut memory = system(&MemoryConfig::default());
    let allocation = memory.allocate(&reqs(64, 16), MemoryUsage::Uniform).unwrap();
    assert!(matches!(
        memory.write(&allocation, u64::MAX - 1, &[0; 8]),
        Err(VulkanError::InvalidOperation { .. })
    ));
    memory.write(&allocation, 56, &[0; 8]).unwrap();
}
