//! Frame lifecycle
//!
//! Each target image owns a [`FrameContext`]: command buffer, framebuffer,
//! in-flight fence and the two semaphores ordering acquire, render and
//! present. [`FrameManager`] drives one frame at a time through
//! [`FramePhase`] and rebuilds everything sized by the target when the target
//! goes out of date or is resized.
//!
//! Acquire semaphores live in a pool one larger than the image count. The
//! spare is handed to acquire; once fence `i` has signalled, the semaphore
//! image `i` used last time is free again and swaps places with the spare.

use ash::{vk, Device};
use std::rc::Rc;

use super::framebuffer::Framebuffer;
use super::sync::{Fence, Semaphore};
use super::targets::{AcquireOutcome, PresentOutcome, PresentTarget};
use crate::core::config::FrameConfig;
use crate::render::backends::vulkan::memory::SharedMemory;
use crate::render::backends::vulkan::rendering::commands::{CommandPool, CommandRecorder, RenderCommands};
use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::resources::texture::Texture;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Where the current frame is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// No frame in progress
    #[default]
    Idle,
    /// Image acquired, nothing recorded yet
    Acquired,
    /// Command buffer recorded
    Recorded,
    /// Command buffer submitted
    Submitted,
    /// Image queued for presentation
    Presented,
}

impl FramePhase {
    /// Whether moving from `self` to `next` is a legal step
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquired)
                | (Self::Acquired, Self::Recorded)
                | (Self::Recorded, Self::Submitted)
                | (Self::Submitted, Self::Presented)
                | (Self::Presented, Self::Idle)
        )
    }

    /// Semaphore that may be left without a waiter if the frame stops in this phase
    pub fn unwaited_semaphore(self) -> Option<FrameSemaphore> {
        match self {
            Self::Acquired | Self::Recorded => Some(FrameSemaphore::ImageAcquired),
            Self::Submitted => Some(FrameSemaphore::RenderFinished),
            Self::Idle | Self::Presented => None,
        }
    }
}

/// The two per-image semaphores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSemaphore {
    /// Signalled by acquire, waited on by submit
    ImageAcquired,
    /// Signalled by submit, waited on by present
    RenderFinished,
}

/// Tracks the phase and rejects out-of-order calls
#[derive(Debug, Default)]
pub struct FrameState {
    phase: FramePhase,
}

impl FrameState {
    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Move to `next`, or fail with [`VulkanError::InvalidOperation`]
    pub fn advance(&mut self, next: FramePhase) -> VulkanResult<()> {
        if self.phase.can_advance_to(next) {
            self.phase = next;
            Ok(())
        } else {
            Err(VulkanError::invalid(format!(
                "Frame cannot move from {:?} to {:?}",
                self.phase, next
            )))
        }
    }

    /// Require the current phase to be `expected`
    pub fn expect(&self, expected: FramePhase) -> VulkanResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!(
                "Frame is {:?}, expected {:?}",
                self.phase, expected
            )))
        }
    }

    /// Abandon the frame in progress
    pub fn reset(&mut self) {
        self.phase = FramePhase::Idle;
    }
}

/// Everything one target image needs to be rendered and presented
pub struct FrameContext {
    recorder: CommandRecorder,
    framebuffer: Framebuffer,
    image_acquired: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

/// The main pass a frame renders into
#[derive(Debug, Clone, Copy)]
pub struct MainPassTarget {
    /// Colour + depth render pass
    pub render_pass: vk::RenderPass,
    /// Framebuffer of the acquired image
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub extent: vk::Extent2D,
}

/// Live handle counts, for checking that rebuilds do not leak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCounts {
    /// Framebuffers
    pub framebuffers: usize,
    /// Command buffers
    pub command_buffers: usize,
    /// Fences
    pub fences: usize,
    /// Semaphores, including the spare acquire semaphore
    pub semaphores: usize,
}

/// Resources sized by the present target, rebuilt with it
pub struct SwapchainResources {
    frames: Vec<FrameContext>,
    spare_acquire: Semaphore,
    render_pass: RenderPass,
    depth: Texture,
    command_pool: CommandPool,
}

impl SwapchainResources {
    /// Build depth buffer, render pass and per-image contexts for `target`
    pub fn new(context: &VulkanContext, memory: &SharedMemory, target: &dyn PresentTarget) -> VulkanResult<Self> {
        let device = context.raw_device();
        let extent = target.extent();

        let depth = Texture::depth(context, memory, extent, false)?;
        let render_pass = RenderPass::new_main_pass(device.clone(), target.format(), target.final_layout(), depth.format())?;
        let command_pool = CommandPool::new(device.clone(), context.graphics_queue_family())?;

        let views = target.image_views();
        let command_buffers = command_pool.allocate_command_buffers(views.len() as u32)?;

        let mut frames = Vec::with_capacity(views.len());
        for (&view, command_buffer) in views.iter().zip(command_buffers) {
            frames.push(FrameContext {
                recorder: CommandRecorder::new(command_buffer, device.clone()),
                framebuffer: Framebuffer::new(device.clone(), render_pass.handle(), &[view, depth.view()], extent)?,
                image_acquired: Semaphore::new(device.clone())?,
                render_finished: Semaphore::new(device.clone())?,
                in_flight: Fence::new(device.clone(), true)?,
            });
        }

        log::debug!(
            "Frame resources ready: {} contexts at {}x{}",
            frames.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            frames,
            spare_acquire: Semaphore::new(device)?,
            render_pass,
            depth,
            command_pool,
        })
    }

    /// Main render pass
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Depth attachment shared by every framebuffer
    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    /// Live handle counts
    pub fn handle_counts(&self) -> HandleCounts {
        HandleCounts {
            framebuffers: self.frames.len(),
            command_buffers: self.frames.len(),
            fences: self.frames.len(),
            semaphores: self.frames.len() * 2 + 1,
        }
    }

    fn wait_all(&self, timeout_ns: u64) -> VulkanResult<()> {
        self.frames
            .iter()
            .try_for_each(|frame| frame.in_flight.wait(timeout_ns))
    }
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        let buffers: Vec<vk::CommandBuffer> = self.frames.iter().map(|frame| frame.recorder.handle()).collect();
        self.command_pool.free_command_buffers(&buffers);
    }
}

/// What came of asking for the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The image at this index is ready for recording
    Ready(u32),
    /// No image within the acquire timeout; try again next frame
    Timeout,
    /// The target was rebuilt; skip this frame
    Rebuilt,
    /// The target has zero area; skip until it is resized
    Deferred,
}

/// Drives acquire, record, submit and present over a [`PresentTarget`]
pub struct FrameManager {
    resources: Option<SwapchainResources>,
    target: Box<dyn PresentTarget>,
    memory: SharedMemory,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    state: FrameState,
    current: Option<u32>,
    last_submitted: Option<u32>,
    pending_extent: Option<vk::Extent2D>,
    acquire_timeout_ns: u64,
    fence_timeout_ns: u64,
}

impl FrameManager {
    /// Build frame resources for `target`
    pub fn new(
        context: &VulkanContext,
        memory: &SharedMemory,
        target: Box<dyn PresentTarget>,
        config: &FrameConfig,
    ) -> VulkanResult<Self> {
        let resources = SwapchainResources::new(context, memory, target.as_ref())?;
        Ok(Self {
            resources: Some(resources),
            target,
            memory: Rc::clone(memory),
            device: context.raw_device(),
            graphics_queue: context.graphics_queue(),
            present_queue: context.present_queue(),
            state: FrameState::default(),
            current: None,
            last_submitted: None,
            pending_extent: None,
            acquire_timeout_ns: config.acquire_timeout_ns(),
            fence_timeout_ns: config.fence_timeout_ns(),
        })
    }

    fn resources(&self) -> VulkanResult<&SwapchainResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("Frame resources are not built"))
    }

    fn current_frame(&self) -> VulkanResult<(u32, &FrameContext)> {
        let index = self
            .current
            .ok_or_else(|| VulkanError::invalid("No image acquired"))?;
        Ok((index, self.frame_at(index)?))
    }

    fn frame_at(&self, index: u32) -> VulkanResult<&FrameContext> {
        self.resources()?
            .frames
            .get(index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("Image index {index} out of range")))
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.state.phase()
    }

    /// Present target
    pub fn target(&self) -> &dyn PresentTarget {
        self.target.as_ref()
    }

    /// Current target extent
    pub fn extent(&self) -> vk::Extent2D {
        self.target.extent()
    }

    /// Main render pass of the current resources
    pub fn render_pass(&self) -> VulkanResult<&RenderPass> {
        Ok(self.resources()?.render_pass())
    }

    /// Live handle counts
    pub fn handle_counts(&self) -> HandleCounts {
        self.resources.as_ref().map_or(
            HandleCounts {
                framebuffers: 0,
                command_buffers: 0,
                fences: 0,
                semaphores: 0,
            },
            SwapchainResources::handle_counts,
        )
    }

    /// Whether a zero-area resize is waiting for a usable extent
    pub fn is_deferred(&self) -> bool {
        self.pending_extent.is_some()
    }

    /// Get the next image, rebuilding first when the target demands it
    pub fn acquire(&mut self, context: &VulkanContext) -> VulkanResult<AcquireResult> {
        self.state.expect(FramePhase::Idle)?;

        if let Some(extent) = self.pending_extent {
            return if is_zero(extent) {
                Ok(AcquireResult::Deferred)
            } else {
                self.rebuild(context, extent)?;
                Ok(AcquireResult::Rebuilt)
            };
        }

        let spare = self.resources()?.spare_acquire.handle();
        let outcome = self.target.acquire(spare, self.acquire_timeout_ns)?;

        match outcome {
            AcquireOutcome::Timeout => {
                log::debug!("Acquire timed out");
                Ok(AcquireResult::Timeout)
            }
            AcquireOutcome::OutOfDate => {
                log::info!("Target out of date on acquire, rebuilding");
                let extent = self.target.extent();
                self.rebuild(context, extent)?;
                Ok(AcquireResult::Rebuilt)
            }
            AcquireOutcome::Acquired { index, suboptimal } => {
                let fence_timeout_ns = self.fence_timeout_ns;
                let last_submitted = self.last_submitted;
                let resources = self
                    .resources
                    .as_mut()
                    .ok_or_else(|| VulkanError::invalid("Frame resources are not built"))?;

                let frame = resources
                    .frames
                    .get_mut(index as usize)
                    .ok_or_else(|| VulkanError::invalid(format!("Target returned image {index} out of range")))?;
                frame.in_flight.wait(fence_timeout_ns)?;
                std::mem::swap(&mut frame.image_acquired, &mut resources.spare_acquire);

                // The scene uniform is shared, so the previous frame must be done reading it.
                if let Some(previous) = last_submitted {
                    if let Some(frame) = resources.frames.get(previous as usize) {
                        frame.in_flight.wait(fence_timeout_ns)?;
                    }
                }

                if suboptimal {
                    log::info!("Target suboptimal on acquire, rebuilding");
                    let acquired = resources.frames[index as usize].image_acquired.handle();
                    self.consume_semaphore(acquired)?;
                    let extent = self.target.extent();
                    self.rebuild(context, extent)?;
                    return Ok(AcquireResult::Rebuilt);
                }

                self.state.advance(FramePhase::Acquired)?;
                self.current = Some(index);
                Ok(AcquireResult::Ready(index))
            }
        }
    }

    /// Wait on a signalled semaphore with an empty submission so it can be reused
    fn consume_semaphore(&self, semaphore: vk::Semaphore) -> VulkanResult<()> {
        let wait_semaphores = [semaphore];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
        }
        .map_err(VulkanError::Api)
    }

    /// Record the acquired image's command buffer with `record`
    pub fn record<F>(&mut self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder, MainPassTarget) -> VulkanResult<()>,
    {
        self.state.expect(FramePhase::Acquired)?;
        let index = self
            .current
            .ok_or_else(|| VulkanError::invalid("No image acquired"))?;
        let extent = self.target.extent();
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| VulkanError::invalid("Frame resources are not built"))?;
        let render_pass = resources.render_pass.handle();
        let frame = resources
            .frames
            .get_mut(index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("Image index {index} out of range")))?;

        let target = MainPassTarget {
            render_pass,
            framebuffer: frame.framebuffer.handle(),
            extent,
        };
        record(&mut frame.recorder, target)?;
        self.state.advance(FramePhase::Recorded)
    }

    /// Submit the recorded command buffer
    ///
    /// Waits for the acquire semaphore at colour output, signals
    /// render-finished and the image's fence.
    pub fn submit(&mut self) -> VulkanResult<()> {
        self.state.expect(FramePhase::Recorded)?;
        let (index, frame) = self.current_frame()?;

        let wait_semaphores = [frame.image_acquired.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.recorder.handle()];
        let signal_semaphores = [frame.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        frame.in_flight.reset()?;
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], frame.in_flight.handle())
        }
        .map_err(VulkanError::Api)?;

        self.last_submitted = Some(index);
        self.state.advance(FramePhase::Submitted)
    }

    /// Present the submitted image; returns `true` when the target was rebuilt
    pub fn present(&mut self, context: &VulkanContext) -> VulkanResult<bool> {
        self.state.expect(FramePhase::Submitted)?;
        let (index, frame) = self.current_frame()?;
        let wait = frame.render_finished.handle();

        let outcome = self.target.present(self.present_queue, index, wait)?;
        self.state.advance(FramePhase::Presented)?;
        self.state.advance(FramePhase::Idle)?;
        self.current = None;

        if outcome == PresentOutcome::NeedsRebuild {
            log::info!("Target out of date on present, rebuilding");
            let extent = self.target.extent();
            self.rebuild(context, extent)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Give up on the frame in progress after a failure
    ///
    /// Before submission the acquire semaphore is consumed by an empty submit
    /// and the command buffer is reset. After submission, present may or may
    /// not have waited on render-finished, so that semaphore is replaced once
    /// the device is idle. Either way the phase returns to
    /// [`FramePhase::Idle`], so the next acquire, resize or vsync change goes
    /// through. Does nothing when no frame is in progress.
    pub fn abandon(&mut self) -> VulkanResult<()> {
        let phase = self.state.phase();
        self.state.reset();
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        let Some(pending) = phase.unwaited_semaphore() else {
            return Ok(());
        };
        log::warn!("Abandoning frame for image {index} in phase {phase:?}");

        match pending {
            FrameSemaphore::ImageAcquired => {
                let semaphore = self.frame_at(index)?.image_acquired.handle();
                self.consume_semaphore(semaphore)?;
                unsafe { self.device.queue_wait_idle(self.graphics_queue) }.map_err(VulkanError::Api)?;
                self.frame_at_mut(index)?.recorder.reset()
            }
            FrameSemaphore::RenderFinished => {
                unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)?;
                let fresh = Semaphore::new(self.device.clone())?;
                self.frame_at_mut(index)?.render_finished = fresh;
                Ok(())
            }
        }
    }

    fn frame_at_mut(&mut self, index: u32) -> VulkanResult<&mut FrameContext> {
        self.resources
            .as_mut()
            .and_then(|resources| resources.frames.get_mut(index as usize))
            .ok_or_else(|| VulkanError::invalid(format!("Image index {index} out of range")))
    }

    /// Resize the target; returns `false` when deferred because of zero area
    pub fn resize(&mut self, context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<bool> {
        self.state.expect(FramePhase::Idle)?;
        if is_zero(extent) {
            log::debug!("Deferring rebuild for zero-area extent");
            self.pending_extent = Some(extent);
            return Ok(false);
        }
        self.rebuild(context, extent)?;
        Ok(true)
    }

    /// Switch vsync and rebuild with the new present mode
    pub fn set_vsync(&mut self, context: &VulkanContext, vsync: bool) -> VulkanResult<()> {
        self.state.expect(FramePhase::Idle)?;
        self.target.set_vsync(vsync);
        if self.pending_extent.is_none() {
            let extent = self.target.extent();
            self.rebuild(context, extent)?;
        }
        Ok(())
    }

    /// Whether the target presents with vsync
    pub fn vsync(&self) -> bool {
        self.target.vsync()
    }

    /// Wait for every submitted frame to finish
    pub fn wait_idle(&self) -> VulkanResult<()> {
        match &self.resources {
            Some(resources) => resources.wait_all(self.fence_timeout_ns),
            None => Ok(()),
        }
    }

    fn rebuild(&mut self, context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<()> {
        context.wait_idle()?;
        self.resources = None;
        self.current = None;
        self.last_submitted = None;
        self.state.reset();

        if is_zero(extent) {
            self.pending_extent = Some(extent);
            return Ok(());
        }

        self.target.rebuild(context, extent)?;
        if is_zero(self.target.extent()) {
            self.pending_extent = Some(self.target.extent());
            return Ok(());
        }
        self.resources = Some(SwapchainResources::new(context, &self.memory, self.target.as_ref())?);
        self.pending_extent = None;
        Ok(())
    }
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_phases_in_order() {
        let mut state = FrameState::default();
        for phase in [
            FramePhase::Acquired,
            FramePhase::Recorded,
            FramePhase::Submitted,
            FramePhase::Presented,
            FramePhase::Idle,
        ] {
            state.advance(phase).unwrap();
        }
        assert_eq!(state.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_submit_before_record_rejected() {
        let mut state = FrameState::default();
        state.advance(FramePhase::Acquired).unwrap();
        let err = state.advance(FramePhase::Submitted).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert_eq!(state.phase(), FramePhase::Acquired);
    }

    #[test]
    fn test_present_requires_submission() {
        let mut state = FrameState::default();
        assert!(state.advance(FramePhase::Presented).is_err());
        assert!(state.expect(FramePhase::Submitted).is_err());
        assert!(state.expect(FramePhase::Idle).is_ok());
    }

    #[test]
    fn test_reset_abandons_frame() {
        let mut state = FrameState::default();
        state.advance(FramePhase::Acquired).unwrap();
        state.advance(FramePhase::Recorded).unwrap();
        state.reset();
        assert_eq!(state.phase(), FramePhase::Idle);
        assert!(state.advance(FramePhase::Acquired).is_ok());
    }

    #[test]
    fn test_abandoned_acquire_allows_next_frame() {
        let mut state = FrameState::default();
        state.advance(FramePhase::Acquired).unwrap();
        assert!(state.expect(FramePhase::Idle).is_err());

        state.reset();
        state.expect(FramePhase::Idle).unwrap();
        state.advance(FramePhase::Acquired).unwrap();
        state.advance(FramePhase::Recorded).unwrap();
    }

    #[test]
    fn test_abandoned_submission_allows_next_frame() {
        let mut state = FrameState::default();
        for phase in [FramePhase::Acquired, FramePhase::Recorded, FramePhase::Submitted] {
            state.advance(phase).unwrap();
        }
        state.reset();
        assert!(state.advance(FramePhase::Acquired).is_ok());
    }

    #[test]
    fn test_unwaited_semaphore_per_phase() {
        assert_eq!(FramePhase::Idle.unwaited_semaphore(), None);
        assert_eq!(
            FramePhase::Acquired.unwaited_semaphore(),
            Some(FrameSemaphore::ImageAcquired)
        );
        assert_eq!(
            FramePhase::Recorded.unwaited_semaphore(),
            Some(FrameSemaphore::ImageAcquired)
        );
        assert_eq!(
            FramePhase::Submitted.unwaited_semaphore(),
            Some(FrameSemaphore::RenderFinished)
        );
        assert_eq!(FramePhase::Presented.unwaited_semaphore(), None);
    }

    #[test]
    fn test_zero_extent() {
        assert!(is_zero(vk::Extent2D { width: 0, height: 600 }));
        assert!(is_zero(vk::Extent2D { width: 800, height: 0 }));
        assert!(!is_zero(vk::Extent2D { width: 1, height: 1 }));
    }
}
