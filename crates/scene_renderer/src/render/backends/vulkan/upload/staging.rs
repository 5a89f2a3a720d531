//! Staging buffers and upload batches
//!
//! An [`UploadBatch`] wraps one single-use command buffer. Resources record
//! their copies into it, then [`UploadBatch::finish`] submits, waits for the
//! fence, drops every staging buffer and finally resets the staging pool.
//! The staging pool must not be reset before that fence has signaled.

use ash::{vk, Device};
use std::rc::Rc;

use crate::render::backends::vulkan::memory::{MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::rendering::commands::{CommandPool, CommandRecorder};
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::VulkanResult;

/// Copy `data` into a new buffer from the staging pool
pub fn stage_bytes(device: &Device, memory: &SharedMemory, data: &[u8]) -> VulkanResult<Buffer> {
    Buffer::with_data(
        device.clone(),
        memory,
        data,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUsage::Staging,
    )
}

/// Run `stage`, giving back the staging space it carved if it fails
///
/// Whatever `stage` created must be dropped by the time it returns the error,
/// which holds for buffers kept in its locals.
pub fn staged<T, F>(memory: &SharedMemory, stage: F) -> VulkanResult<T>
where
    F: FnOnce() -> VulkanResult<T>,
{
    let mark = memory.borrow().staging_mark();
    stage().or_else(|e| {
        if let Err(rewind) = memory.borrow_mut().rewind_staging(mark) {
            log::warn!("Could not return staging space after a failed upload: {rewind}");
        }
        Err(e)
    })
}

/// Something holding staging buffers until its upload has executed
pub trait StagingOwner {
    /// Drop the staging buffers
    fn destroy_staging(&mut self);

    /// Whether staging buffers are still held
    fn has_staging(&self) -> bool;
}

/// One single-use command buffer worth of uploads
pub struct UploadBatch<'a> {
    pool: &'a CommandPool,
    queue: vk::Queue,
    memory: SharedMemory,
    recorder: CommandRecorder,
    timeout_ns: u64,
}

impl<'a> UploadBatch<'a> {
    /// Allocate and begin the command buffer
    pub fn begin(pool: &'a CommandPool, queue: vk::Queue, memory: &SharedMemory, timeout_ns: u64) -> VulkanResult<Self> {
        Ok(Self {
            pool,
            queue,
            memory: Rc::clone(memory),
            recorder: pool.begin_single_time()?,
            timeout_ns,
        })
    }

    /// Recorder to put copies and barriers into
    pub fn recorder(&mut self) -> &mut CommandRecorder {
        &mut self.recorder
    }

    /// Submit, wait, release staging from `owners`, then reset the staging pool
    pub fn finish<'o, I>(self, owners: I) -> VulkanResult<()>
    where
        I: IntoIterator<Item = &'o mut dyn StagingOwner>,
    {
        self.pool.submit_single_time(self.recorder, self.queue, self.timeout_ns)?;

        let mut released = 0usize;
        for owner in owners {
            if owner.has_staging() {
                owner.destroy_staging();
                released += 1;
            }
        }

        let mut memory = self.memory.borrow_mut();
        let stats = memory.stats(MemoryUsage::Staging);
        memory.reset_staging();
        log::info!(
            "Upload batch complete: {} objects, {} staging bytes released",
            released,
            stats.used_bytes
        );
        Ok(())
    }
}
