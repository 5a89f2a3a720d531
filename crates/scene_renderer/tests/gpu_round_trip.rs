//! Tests against a real device
//!
//! Each test creates a headless context and returns early when no Vulkan
//! device is available, so the suite still passes on machines without one.

use ash::vk;
use scene_renderer::core::config::{FrameConfig, MemoryConfig, TextureEncoding};
use scene_renderer::render::backends::vulkan::memory::{MemorySystem, MemoryUsage, SharedMemory};
use scene_renderer::render::backends::vulkan::state::frame::{AcquireResult, FrameManager, FramePhase};
use scene_renderer::render::backends::vulkan::upload::staging::{StagingOwner, UploadBatch};
use scene_renderer::render::backends::vulkan::{
    Buffer, CommandPool, OffscreenTarget, PresentTarget, RenderCommands, Texture,
};
use scene_renderer::{MeshData, PixelData, VulkanContext, VulkanError};

const TIMEOUT_NS: u64 = 5_000_000_000;

fn context() -> Option<VulkanContext> {
    match VulkanContext::headless("scene_renderer tests", false) {
        Ok(context) => Some(context),
        Err(e) => {
            eprintln!("Skipping: no usable Vulkan device ({e})");
            None
        }
    }
}

fn memory(context: &VulkanContext) -> SharedMemory {
    MemorySystem::new(context, &MemoryConfig::default()).unwrap()
}

#[test]
fn test_buffer_bytes_survive_device_round_trip() {
    let Some(context) = context() else { return };
    let memory = memory(&context);
    let device = context.raw_device();

    let bytes: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    let size = bytes.len() as vk::DeviceSize;

    let source = Buffer::with_data(
        device.clone(),
        &memory,
        &bytes,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUsage::Staging,
    )
    .unwrap();
    let resident = Buffer::new(
        device.clone(),
        &memory,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUsage::Resident,
    )
    .unwrap();
    let readback = Buffer::new(
        device.clone(),
        &memory,
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryUsage::Staging,
    )
    .unwrap();

    let pool = CommandPool::new(device.clone(), context.graphics_queue_family()).unwrap();
    let mut recorder = pool.begin_single_time().unwrap();
    recorder.copy_buffer(source.handle(), resident.handle(), size).unwrap();
    let barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(resident.handle())
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .build();
    recorder
        .pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &[barrier],
            &[],
        )
        .unwrap();
    recorder.copy_buffer(resident.handle(), readback.handle(), size).unwrap();
    pool.submit_single_time(recorder, context.graphics_queue(), TIMEOUT_NS)
        .unwrap();

    assert_eq!(readback.read().unwrap(), bytes);
}

#[test]
fn test_cubemap_upload_builds_full_mip_chain() {
    let Some(context) = context() else { return };
    let memory = memory(&context);

    let faces: Vec<PixelData> = (0..6u8)
        .map(|i| PixelData::solid(256, 256, [i * 40, 0, 255 - i * 40, 255]))
        .collect();
    let mut cubemap = Texture::cubemap(&context, &memory, &faces, TextureEncoding::Srgb).unwrap();
    assert_eq!(cubemap.layer_count(), 6);
    assert_eq!(cubemap.mip_levels(), 9);

    let pool = CommandPool::new(context.raw_device(), context.graphics_queue_family()).unwrap();
    let mut batch = UploadBatch::begin(&pool, context.graphics_queue(), &memory, TIMEOUT_NS).unwrap();
    cubemap.upload_data(batch.recorder()).unwrap();
    batch
        .finish(std::iter::once(&mut cubemap as &mut dyn StagingOwner))
        .unwrap();

    assert!(!cubemap.has_staging());
    assert_eq!(memory.borrow().stats(MemoryUsage::Staging).used_bytes, 0);
}

#[test]
fn test_mesh_upload_releases_staging() {
    let Some(context) = context() else { return };
    let memory = memory(&context);

    let mut mesh =
        scene_renderer::render::backends::vulkan::Mesh::new(context.device(), &memory, &MeshData::cube()).unwrap();
    assert!(mesh.has_staging());
    assert_eq!(mesh.index_count(), 36);

    let pool = CommandPool::new(context.raw_device(), context.graphics_queue_family()).unwrap();
    let mut batch = UploadBatch::begin(&pool, context.graphics_queue(), &memory, TIMEOUT_NS).unwrap();
    mesh.upload(batch.recorder()).unwrap();
    batch.finish(std::iter::once(&mut mesh as &mut dyn StagingOwner)).unwrap();

    assert!(!mesh.has_staging());
    let mut pool_recorder = pool.begin_single_time().unwrap();
    assert!(matches!(
        mesh.upload(&mut pool_recorder),
        Err(VulkanError::InvalidOperation { .. })
    ));
    pool.submit_single_time(pool_recorder, context.graphics_queue(), TIMEOUT_NS)
        .unwrap();
}

#[test]
fn test_failed_mesh_staging_restores_pools() {
    let Some(context) = context() else { return };
    let config = MemoryConfig::default().with_staging_pool_size(256);
    let memory = MemorySystem::new(&context, &config).unwrap();

    let staging_before = memory.borrow().stats(MemoryUsage::Staging);
    let resident_before = memory.borrow().stats(MemoryUsage::Resident);

    // five attribute buffers and the indices do not fit in 256 bytes
    let result = scene_renderer::render::backends::vulkan::Mesh::new(context.device(), &memory, &MeshData::cube());
    assert!(result.is_err());

    assert_eq!(memory.borrow().stats(MemoryUsage::Staging), staging_before);
    let resident = memory.borrow().stats(MemoryUsage::Resident);
    assert_eq!(resident.used_bytes, resident_before.used_bytes);
    assert_eq!(resident.live_allocations, resident_before.live_allocations);
}

#[test]
fn test_buffer_write_offset_overflow_is_rejected() {
    let Some(context) = context() else { return };
    let memory = memory(&context);
    let buffer = Buffer::new(
        context.raw_device(),
        &memory,
        64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUsage::Staging,
    )
    .unwrap();

    assert!(matches!(
        buffer.write(u64::MAX, &[1, 2]),
        Err(VulkanError::InvalidOperation { .. })
    ));
    buffer.write(60, &[1, 2, 3, 4]).unwrap();
}

#[test]
fn test_offscreen_frames_cycle_and_resize_without_leaks() {
    let Some(context) = context() else { return };
    let memory = memory(&context);
    let extent = vk::Extent2D { width: 320, height: 240 };

    let target = OffscreenTarget::new(&context, &memory, extent, 3).unwrap();
    assert_eq!(target.final_layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    let mut frames = FrameManager::new(&context, &memory, Box::new(target), &FrameConfig::default()).unwrap();
    let initial = frames.handle_counts();
    assert_eq!(initial.framebuffers, 3);

    // out-of-order calls are rejected before anything is acquired
    assert!(matches!(frames.submit(), Err(VulkanError::InvalidOperation { .. })));

    for _ in 0..5 {
        assert!(matches!(frames.acquire(&context).unwrap(), AcquireResult::Ready(_)));
        frames
            .record(|recorder, _main| {
                recorder.reset()?;
                recorder.begin()?;
                recorder.end()
            })
            .unwrap();
        frames.submit().unwrap();
        assert!(!frames.present(&context).unwrap());
        assert_eq!(frames.phase(), FramePhase::Idle);
    }

    assert!(frames.resize(&context, vk::Extent2D { width: 640, height: 480 }).unwrap());
    assert!(frames.resize(&context, extent).unwrap());
    assert_eq!(frames.handle_counts(), initial);
    assert_eq!(frames.extent(), extent);

    assert!(!frames.resize(&context, vk::Extent2D { width: 0, height: 240 }).unwrap());
    assert_eq!(frames.acquire(&context).unwrap(), AcquireResult::Deferred);
    assert!(frames.resize(&context, extent).unwrap());
    assert!(matches!(frames.acquire(&context).unwrap(), AcquireResult::Ready(_)));
}

#[test]
fn test_failed_recording_abandons_frame() {
    let Some(context) = context() else { return };
    let memory = memory(&context);
    let extent = vk::Extent2D { width: 64, height: 64 };

    let target = OffscreenTarget::new(&context, &memory, extent, 2).unwrap();
    let mut frames = FrameManager::new(&context, &memory, Box::new(target), &FrameConfig::default()).unwrap();

    assert!(matches!(frames.acquire(&context).unwrap(), AcquireResult::Ready(_)));
    let err = frames
        .record(|recorder, _main| {
            recorder.reset()?;
            recorder.begin()?;
            Err(VulkanError::CommandRecordingFailed(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        })
        .unwrap_err();
    assert!(matches!(err, VulkanError::CommandRecordingFailed(_)));
    assert_eq!(frames.phase(), FramePhase::Acquired);
    assert!(frames.resize(&context, extent).is_err());

    frames.abandon().unwrap();
    assert_eq!(frames.phase(), FramePhase::Idle);

    // every image comes round again with its semaphores and command buffer reusable
    for _ in 0..4 {
        assert!(matches!(frames.acquire(&context).unwrap(), AcquireResult::Ready(_)));
        frames
            .record(|recorder, _main| {
                recorder.reset()?;
                recorder.begin()?;
                recorder.end()
            })
            .unwrap();
        frames.submit().unwrap();
        assert!(!frames.present(&context).unwrap());
    }
    assert!(frames.resize(&context, extent).unwrap());

    // abandoning with nothing in flight changes nothing
    frames.abandon().unwrap();
    assert_eq!(frames.phase(), FramePhase::Idle);
}

#[test]
fn test_command_pool_drop_after_submitted_work() {
    let Some(context) = context() else { return };

    for _ in 0..3 {
        let pool = CommandPool::new(context.raw_device(), context.graphics_queue_family()).unwrap();
        let recorder = pool.begin_single_time().unwrap();
        pool.submit_single_time(recorder, context.graphics_queue(), TIMEOUT_NS)
            .unwrap();
        drop(pool);
    }
    context.wait_idle().unwrap();
}
