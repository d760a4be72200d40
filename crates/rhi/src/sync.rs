//! Synchronization primitives for Vulkan.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal
//! - [`SyncSet`] - the primitives owned by the single frame slot
//! - [`AccessScope`] - a stage/access pair used to build barriers and dependencies
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkcrt_rhi::device::Device;
//! use vkcrt_rhi::sync::SyncSet;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkcrt_rhi::RhiError> {
//! let sync = SyncSet::new(device)?;
//!
//! // Throttle: the previous frame must be finished before its buffers are reused
//! sync.frame_complete().wait(u64::MAX)?;
//! sync.frame_complete().reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;
use crate::tracker::{ResourceKind, TrackedResource};

/// Pipeline stage plus the memory access performed in it.
///
/// A producer scope becomes the source half of a barrier, a consumer scope
/// the destination half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessScope {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl AccessScope {
    pub const fn new(stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        Self { stage, access }
    }

    /// Global memory barrier making `self` visible to `consumer`.
    pub fn memory_barrier_to(self, consumer: AccessScope) -> vk::MemoryBarrier<'static> {
        vk::MemoryBarrier::default()
            .src_access_mask(self.access)
            .dst_access_mask(consumer.access)
    }
}

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
    _token: TrackedResource,
}

impl Semaphore {
    /// Creates a new binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        let token = device.tracker().track(ResourceKind::Semaphore);

        debug!("Created semaphore");

        Ok(Self {
            device,
            semaphore,
            _token: token,
        })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
    _token: TrackedResource,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Create the fence already signaled, so the first wait
    ///   returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        let token = device.tracker().track(ResourceKind::Fence);

        debug!("Created fence ({})", if signaled { "signaled" } else { "unsignaled" });

        Ok(Self {
            device,
            fence,
            _token: token,
        })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// # Errors
    ///
    /// Returns `vk::Result::TIMEOUT` on expiry, or the failure reported by the driver.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().wait_for_fences(&fences, true, timeout)? };
        Ok(())
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset operation fails.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

/// Synchronization objects for the one frame slot.
///
/// - `image_available`: signaled by acquire
/// - `compute_finished`: signaled by the compute submission, waited on by graphics
/// - `render_finished`: signaled by the graphics submission, waited on by present
/// - `frame_complete`: fence signaled by the graphics submission, created
///   signaled so the first frame does not block
pub struct SyncSet {
    image_available: Semaphore,
    compute_finished: Semaphore,
    render_finished: Semaphore,
    frame_complete: Fence,
}

impl SyncSet {
    /// Creates the semaphores and the frame fence.
    ///
    /// # Errors
    ///
    /// Returns an error if any object fails to create. Objects created before
    /// the failure are destroyed.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let compute_finished = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let frame_complete = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            compute_finished,
            render_finished,
            frame_complete,
        })
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn compute_finished(&self) -> &Semaphore {
        &self.compute_finished
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn frame_complete(&self) -> &Fence {
        &self.frame_complete
    }
}
