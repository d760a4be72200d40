//! The resource compute writes and graphics reads, and the hand-off between them.
//!
//! [`HandoffScopes`] declares the producer and consumer access scopes once.
//! They feed the setup barrier, the render pass dependency, the graphics
//! wait stage and the reverse barrier at the top of the compute commands.
//! [`SubmissionPlan`] says which semaphores each queue submission waits on
//! and signals.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use vkcrt_core::{MAX_DIMENSION, SharedResourceKind};
use vkcrt_rhi::{RhiError, RhiResult};
use vkcrt_rhi::buffer::Buffer;
use vkcrt_rhi::command::{CommandBuffer, CommandPool};
use vkcrt_rhi::descriptor::{write_storage_buffer, write_storage_image};
use vkcrt_rhi::device::Device;
use vkcrt_rhi::image::StorageImage;
use vkcrt_rhi::swapchain::color_subresource_range;
use vkcrt_rhi::sync::AccessScope;

/// Compute shader workgroup edge, matching `local_size_x/y` in the shaders.
pub const WORKGROUP_SIZE: u32 = 16;

/// Bytes per pixel in the buffer variant (one RGBA32F texel).
pub const TEXEL_SIZE: u64 = 16;

/// Storage image format of the texture variant.
pub const STORAGE_IMAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// The size every pass renders at: the presented one.
///
/// The surface may fix its extent to something other than the requested
/// window size. The shared resource, dispatch, geometry and push constants
/// then follow the swapchain so the graphics pass never reads past the
/// compute output.
///
/// # Errors
///
/// Returns [`RhiError::SwapchainError`] if the presented extent is empty or
/// larger than [`MAX_DIMENSION`] in either direction.
pub fn frame_extent(requested: vk::Extent2D, presented: vk::Extent2D) -> RhiResult<vk::Extent2D> {
    let (width, height) = (presented.width, presented.height);
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(RhiError::SwapchainError(format!(
            "cannot render at presented size {width}x{height}"
        )));
    }
    if (requested.width, requested.height) != (width, height) {
        warn!(
            "Surface fixed the frame at {}x{} instead of {}x{}; rendering at the surface size",
            width, height, requested.width, requested.height
        );
    }
    Ok(presented)
}

/// Workgroups needed to cover `extent`, rounding up.
pub fn dispatch_group_count(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width.div_ceil(WORKGROUP_SIZE), extent.height.div_ceil(WORKGROUP_SIZE))
}

/// Size of the shared buffer for `extent`.
pub fn buffer_size(extent: vk::Extent2D) -> u64 {
    u64::from(extent.width) * u64::from(extent.height) * TEXEL_SIZE
}

/// Producer and consumer scopes of the shared resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandoffScopes {
    pub producer: AccessScope,
    pub consumer: AccessScope,
}

impl HandoffScopes {
    pub const COMPUTE_WRITE: AccessScope =
        AccessScope::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE);

    pub fn for_kind(kind: SharedResourceKind) -> Self {
        let consumer = match kind {
            SharedResourceKind::Buffer => AccessScope::new(
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            ),
            SharedResourceKind::Texture => {
                AccessScope::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
            }
        };
        Self {
            producer: Self::COMPUTE_WRITE,
            consumer,
        }
    }
}

/// Semaphores of the frame slot, named by what signals them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPoint {
    /// Signaled by the swapchain acquire.
    ImageAvailable,
    /// Signaled by the compute submission.
    ComputeFinished,
    /// Signaled by the graphics submission, waited on by present.
    RenderFinished,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSubmission {
    pub waits: Vec<(SyncPoint, vk::PipelineStageFlags)>,
    pub signals: Vec<SyncPoint>,
    pub signals_fence: bool,
}

/// Compute then graphics, in submission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub compute: QueueSubmission,
    pub graphics: QueueSubmission,
}

impl SubmissionPlan {
    pub fn for_kind(kind: SharedResourceKind) -> Self {
        let scopes = HandoffScopes::for_kind(kind);
        match kind {
            // Compute does not touch the swapchain image, so the acquire wait
            // belongs to the graphics color output.
            SharedResourceKind::Buffer => Self {
                compute: QueueSubmission {
                    waits: Vec::new(),
                    signals: vec![SyncPoint::ComputeFinished],
                    signals_fence: false,
                },
                graphics: QueueSubmission {
                    waits: vec![
                        (SyncPoint::ImageAvailable, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                        (SyncPoint::ComputeFinished, scopes.consumer.stage),
                    ],
                    signals: vec![SyncPoint::RenderFinished],
                    signals_fence: true,
                },
            },
            SharedResourceKind::Texture => Self {
                compute: QueueSubmission {
                    waits: vec![(SyncPoint::ImageAvailable, scopes.producer.stage)],
                    signals: vec![SyncPoint::ComputeFinished],
                    signals_fence: false,
                },
                graphics: QueueSubmission {
                    waits: vec![(SyncPoint::ComputeFinished, scopes.consumer.stage)],
                    signals: vec![SyncPoint::RenderFinished],
                    signals_fence: true,
                },
            },
        }
    }
}

/// The buffer or image shared between the two pipelines.
pub enum SharedResource {
    Buffer(Buffer),
    Image(StorageImage),
}

impl SharedResource {
    /// Creates the resource for `kind`, sized to `extent`.
    ///
    /// The image variant is moved to `GENERAL` layout with a one-shot barrier
    /// on the compute queue before this returns.
    ///
    /// # Errors
    ///
    /// Returns allocation, memory type or Vulkan errors. Nothing is left
    /// alive on failure.
    pub fn new(device: Arc<Device>, kind: SharedResourceKind, extent: vk::Extent2D) -> RhiResult<Self> {
        let resource = match kind {
            SharedResourceKind::Buffer => SharedResource::Buffer(Buffer::new(
                device,
                buffer_size(extent),
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
                "shared vertex buffer",
            )?),
            SharedResourceKind::Texture => {
                let image = StorageImage::new(
                    device.clone(),
                    extent,
                    STORAGE_IMAGE_FORMAT,
                    vk::ImageUsageFlags::empty(),
                    "shared storage image",
                )?;
                transition_to_general(&device, &image)?;
                SharedResource::Image(image)
            }
        };

        info!("Shared {} resource ready at {}x{}", kind, extent.width, extent.height);
        Ok(resource)
    }

    pub fn kind(&self) -> SharedResourceKind {
        match self {
            SharedResource::Buffer(_) => SharedResourceKind::Buffer,
            SharedResource::Image(_) => SharedResourceKind::Texture,
        }
    }

    /// Points binding `binding` of `set` at this resource.
    pub fn write_descriptor(&self, device: &Device, set: vk::DescriptorSet, binding: u32) {
        match self {
            SharedResource::Buffer(buffer) => write_storage_buffer(device, set, binding, buffer.handle()),
            SharedResource::Image(image) => {
                write_storage_image(device, set, binding, image.view(), vk::ImageLayout::GENERAL)
            }
        }
    }

    /// The buffer to bind as vertex input, if graphics reads one.
    pub fn vertex_buffer(&self) -> Option<vk::Buffer> {
        match self {
            SharedResource::Buffer(buffer) => Some(buffer.handle()),
            SharedResource::Image(_) => None,
        }
    }
}

/// Records and waits for `UNDEFINED → GENERAL` on the compute queue.
fn transition_to_general(device: &Arc<Device>, image: &StorageImage) -> RhiResult<()> {
    let pool = CommandPool::new_transient(device.clone(), device.queue_families().compute_family)?;
    let cmd = CommandBuffer::new(device.clone(), &pool)?;
    let producer = HandoffScopes::COMPUTE_WRITE;

    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(producer.access)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.handle())
        .subresource_range(color_subresource_range());

    cmd.begin()?;
    cmd.pipeline_barrier(vk::PipelineStageFlags::TOP_OF_PIPE, producer.stage, &[], &[], &[barrier]);
    cmd.end()?;

    let command_buffers = [cmd.handle()];
    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
    unsafe {
        device.submit_compute(&[submit], vk::Fence::null())?;
    }
    device.wait_compute_idle()?;

    debug!("Storage image transitioned to GENERAL");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Logical order of the graphics pipeline stages used here.
    fn graphics_stage_rank(stage: vk::PipelineStageFlags) -> u32 {
        const ORDER: [vk::PipelineStageFlags; 6] = [
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::PipelineStageFlags::VERTEX_SHADER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ];
        ORDER
            .iter()
            .position(|&s| s == stage)
            .map(|p| p as u32)
            .unwrap_or_else(|| panic!("unranked stage {stage:?}"))
    }

    #[test]
    fn test_frame_extent_follows_surface() {
        let requested = vk::Extent2D { width: 1280, height: 720 };
        let presented = vk::Extent2D { width: 1300, height: 740 };

        let extent = frame_extent(requested, presented).unwrap();
        assert_eq!((extent.width, extent.height), (1300, 740));
        assert_eq!(buffer_size(extent), 1300 * 740 * 16);
        assert_eq!(dispatch_group_count(extent), (82, 47));

        let same = frame_extent(requested, requested).unwrap();
        assert_eq!((same.width, same.height), (1280, 720));
    }

    #[test]
    fn test_frame_extent_rejects_unusable_surface() {
        let requested = vk::Extent2D { width: 1280, height: 720 };
        for presented in [
            vk::Extent2D { width: 0, height: 720 },
            vk::Extent2D {
                width: MAX_DIMENSION + 1,
                height: 720,
            },
        ] {
            assert!(matches!(
                frame_extent(requested, presented),
                Err(RhiError::SwapchainError(_))
            ));
        }
    }

    #[test]
    fn test_dispatch_group_count_rounds_up() {
        assert_eq!(dispatch_group_count(vk::Extent2D { width: 1280, height: 720 }), (80, 45));
        assert_eq!(dispatch_group_count(vk::Extent2D { width: 17, height: 1 }), (2, 1));
        assert_eq!(dispatch_group_count(vk::Extent2D { width: 16, height: 16 }), (1, 1));
        assert_eq!(dispatch_group_count(vk::Extent2D { width: 1366, height: 768 }), (86, 48));
    }

    #[test]
    fn test_buffer_size_is_rgba32f_per_pixel() {
        assert_eq!(buffer_size(vk::Extent2D { width: 1280, height: 720 }), 1280 * 720 * 16);
        assert_eq!(buffer_size(vk::Extent2D { width: 65536, height: 65536 }), 1 << 36);
    }

    #[test]
    fn test_consumer_scopes_per_kind() {
        let buffer = HandoffScopes::for_kind(SharedResourceKind::Buffer);
        assert_eq!(buffer.producer, HandoffScopes::COMPUTE_WRITE);
        assert_eq!(buffer.consumer.stage, vk::PipelineStageFlags::VERTEX_INPUT);
        assert_eq!(buffer.consumer.access, vk::AccessFlags::VERTEX_ATTRIBUTE_READ);

        let texture = HandoffScopes::for_kind(SharedResourceKind::Texture);
        assert_eq!(texture.consumer.stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(texture.consumer.access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_every_wait_has_an_earlier_signal() {
        for kind in [SharedResourceKind::Buffer, SharedResourceKind::Texture] {
            let plan = SubmissionPlan::for_kind(kind);
            let mut signaled = vec![SyncPoint::ImageAvailable];

            for submission in [&plan.compute, &plan.graphics] {
                for (point, _) in &submission.waits {
                    assert!(signaled.contains(point), "{kind}: {point:?} waited before signaled");
                }
                signaled.extend(&submission.signals);
            }

            // ImageAvailable is consumed exactly once per frame.
            let acquire_waits = [&plan.compute, &plan.graphics]
                .iter()
                .flat_map(|s| &s.waits)
                .filter(|(p, _)| *p == SyncPoint::ImageAvailable)
                .count();
            assert_eq!(acquire_waits, 1, "{kind}");

            assert!(plan.graphics.signals.contains(&SyncPoint::RenderFinished));
            assert!(plan.graphics.signals_fence);
            assert!(!plan.compute.signals_fence);
        }
    }

    #[test]
    fn test_texture_read_never_precedes_compute_write() {
        let kind = SharedResourceKind::Texture;
        let scopes = HandoffScopes::for_kind(kind);
        let plan = SubmissionPlan::for_kind(kind);

        // The write happens in the compute submission, which signals the
        // semaphore graphics waits on.
        assert_eq!(scopes.producer.stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(plan.compute.signals.contains(&SyncPoint::ComputeFinished));

        let (_, wait_stage) = plan
            .graphics
            .waits
            .iter()
            .find(|(p, _)| *p == SyncPoint::ComputeFinished)
            .copied()
            .unwrap();

        // The read stage is blocked by the wait, so it cannot start early.
        assert!(graphics_stage_rank(wait_stage) <= graphics_stage_rank(scopes.consumer.stage));
    }

    #[test]
    fn test_buffer_wait_blocks_vertex_fetch() {
        let scopes = HandoffScopes::for_kind(SharedResourceKind::Buffer);
        let plan = SubmissionPlan::for_kind(SharedResourceKind::Buffer);

        assert!(plan.compute.waits.is_empty());
        let wait_stage = plan
            .graphics
            .waits
            .iter()
            .find(|(p, _)| *p == SyncPoint::ComputeFinished)
            .map(|(_, s)| *s)
            .unwrap();
        assert!(graphics_stage_rank(wait_stage) <= graphics_stage_rank(scopes.consumer.stage));
    }
}
