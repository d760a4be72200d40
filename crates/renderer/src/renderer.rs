//! Main renderer orchestration.
//!
//! [`Renderer`] owns every Vulkan object of the compute-to-graphics loop and
//! implements [`FrameBackend`] on top of them.

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{debug, error, info};

use vkcrt_core::{RenderConfig, SharedResourceKind};
use vkcrt_platform::{Surface, Window};
use vkcrt_rhi::command::{CommandBuffer, CommandPool};
use vkcrt_rhi::device::Device;
use vkcrt_rhi::instance::Instance;
use vkcrt_rhi::physical_device::select_physical_device;
use vkcrt_rhi::render_pass::{Framebuffer, RenderPass};
use vkcrt_rhi::swapchain::Swapchain;
use vkcrt_rhi::sync::SyncSet;
use vkcrt_rhi::tracker::ResourceTracker;
use vkcrt_rhi::{RhiError, RhiResult};

use crate::error::{RenderError, RenderResult};
use crate::frame::{self, AcquiredImage, FrameBackend, FrameCycle, FrameReport, FrameState};
use crate::passes::{CLEAR_COLOR, DescriptorBinding, FrameParams, PipelineSet, ShaderSet};
use crate::shared::{
    HandoffScopes, QueueSubmission, SharedResource, SubmissionPlan, SyncPoint, dispatch_group_count, frame_extent,
};

/// Command pools and the two re-recorded command buffers.
///
/// Buffers are declared before pools; they only hold device references and
/// are freed with their pool.
struct FrameCommands {
    /// Render pass and draw, re-recorded per swapchain image.
    graphics: CommandBuffer,
    /// Reverse barrier and dispatch.
    compute: CommandBuffer,
    /// Pool on the graphics family; also serves compute when the families match.
    graphics_pool: CommandPool,
    /// Pool on a distinct compute family.
    compute_pool: Option<CommandPool>,
}

impl FrameCommands {
    /// One pool per distinct queue family.
    fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let families = *device.queue_families();
        let graphics_pool = CommandPool::new(device.clone(), families.graphics_family)?;
        let compute_pool = if families.is_shared() {
            None
        } else {
            Some(CommandPool::new(device.clone(), families.compute_family)?)
        };

        let graphics = CommandBuffer::new(device.clone(), &graphics_pool)?;
        let compute = CommandBuffer::new(device.clone(), compute_pool.as_ref().unwrap_or(&graphics_pool))?;

        Ok(Self {
            graphics,
            compute,
            graphics_pool,
            compute_pool,
        })
    }
}

/// Main renderer that owns all Vulkan resources.
///
/// # Resource Destruction Order
///
/// After a device wait-idle, objects are destroyed in reverse creation order:
/// 1. Sync objects
/// 2. Command pools
/// 3. Pipelines and pipeline layout
/// 4. Framebuffers and render pass
/// 5. Descriptor pool and layout
/// 6. Shared buffer or image
/// 7. Shader modules
/// 8. Swapchain
/// 9. Device
/// 10. Surface
/// 11. Instance
///
/// ManuallyDrop is used to enforce that order.
pub struct Renderer {
    /// Semaphores and the frame fence of the single frame slot.
    sync: ManuallyDrop<SyncSet>,
    /// Command pools and the two reused command buffers.
    commands: ManuallyDrop<FrameCommands>,
    /// Compute and graphics pipelines plus their shared layout.
    pipelines: ManuallyDrop<PipelineSet>,
    /// One framebuffer per swapchain image view.
    framebuffers: ManuallyDrop<Vec<Framebuffer>>,
    /// Single color attachment pass with the compute hand-off dependency.
    render_pass: ManuallyDrop<RenderPass>,
    /// Layout, pool and set binding the shared resource.
    descriptors: ManuallyDrop<DescriptorBinding>,
    /// Buffer or storage image written by compute, read by graphics.
    shared: ManuallyDrop<SharedResource>,
    /// Vertex, fragment and compute modules.
    shaders: ManuallyDrop<ShaderSet>,
    /// Presentable images and their views.
    swapchain: ManuallyDrop<Swapchain>,
    /// Logical device and queues.
    device: ManuallyDrop<Arc<Device>>,
    /// Window surface; outlives the device, not the instance.
    surface: ManuallyDrop<Surface>,
    /// Vulkan instance and debug messenger; destroyed last.
    instance: ManuallyDrop<Instance>,

    /// Live object counters, kept past teardown for leak reports.
    tracker: Arc<ResourceTracker>,
    /// Frame state machine.
    cycle: FrameCycle,
    /// Buffer or texture variant.
    kind: SharedResourceKind,
    /// Compute-write and graphics-read scopes.
    scopes: HandoffScopes,
    /// Semaphore waits and signals of both submissions.
    plan: SubmissionPlan,
    /// Frame size shared by the compute output and the swapchain.
    extent: vk::Extent2D,
    /// Origin of the `time` push constant.
    started: Instant,
}

impl Renderer {
    /// Begins rendering: creates every object needed to draw frames into `window`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Setup`] naming the step that failed. Objects
    /// created before the failure are destroyed in reverse order before this
    /// returns.
    pub fn new(window: &Window, config: &RenderConfig) -> RenderResult<Self> {
        let kind = config.variant;
        let requested = vk::Extent2D {
            width: window.width(),
            height: window.height(),
        };

        info!("Initializing {} renderer ({}x{})", kind, requested.width, requested.height);

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))
            .map_err(RenderError::setup("surface extensions"))?;
        let instance = Instance::new(&surface_extensions, config.validation).map_err(RenderError::setup("instance"))?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))
            .map_err(RenderError::setup("surface"))?;

        let physical_device_info = select_physical_device(instance.handle(), config.prefer_dedicated_compute)
            .map_err(RenderError::setup("physical device"))?;
        let device = Device::new(&instance, &physical_device_info, &[ash::khr::swapchain::NAME])
            .map_err(RenderError::setup("logical device"))?;
        let tracker = device.tracker().clone();

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            surface.loader(),
            requested.width,
            requested.height,
        )
        .map_err(RenderError::setup("swapchain"))?;
        let extent = frame_extent(requested, swapchain.extent()).map_err(RenderError::setup("frame extent"))?;

        let shaders = ShaderSet::load(device.clone(), config).map_err(RenderError::setup("shader modules"))?;

        let shared =
            SharedResource::new(device.clone(), kind, extent).map_err(RenderError::setup("shared resource"))?;
        let descriptors =
            DescriptorBinding::new(device.clone(), &shared).map_err(RenderError::setup("descriptor binding"))?;

        let scopes = HandoffScopes::for_kind(kind);
        let render_pass = RenderPass::new(device.clone(), swapchain.format(), scopes.producer, scopes.consumer)
            .map_err(RenderError::setup("render pass"))?;
        let framebuffers = Framebuffer::for_views(&device, &render_pass, swapchain.image_views(), extent)
            .map_err(RenderError::setup("framebuffers"))?;

        let pipelines = PipelineSet::new(device.clone(), &shaders, &descriptors, &render_pass, kind, extent)
            .map_err(RenderError::setup("pipelines"))?;

        let commands = FrameCommands::new(&device).map_err(RenderError::setup("command buffers"))?;
        let sync = SyncSet::new(device.clone()).map_err(RenderError::setup("sync objects"))?;

        info!(
            "Renderer initialized on {}: {} swapchain images ({:?}), queue families graphics={} compute={}, {} live objects",
            physical_device_info.device_name(),
            swapchain.image_count(),
            swapchain.policy().present_mode,
            device.queue_families().graphics_family,
            device.queue_families().compute_family,
            tracker.live_total()
        );

        Ok(Self {
            sync: ManuallyDrop::new(sync),
            commands: ManuallyDrop::new(commands),
            pipelines: ManuallyDrop::new(pipelines),
            framebuffers: ManuallyDrop::new(framebuffers),
            render_pass: ManuallyDrop::new(render_pass),
            descriptors: ManuallyDrop::new(descriptors),
            shared: ManuallyDrop::new(shared),
            shaders: ManuallyDrop::new(shaders),
            swapchain: ManuallyDrop::new(swapchain),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            tracker,
            cycle: FrameCycle::new(),
            kind,
            scopes,
            plan: SubmissionPlan::for_kind(kind),
            extent,
            started: Instant::now(),
        })
    }

    /// Draws and presents one frame.
    ///
    /// # Errors
    ///
    /// See [`frame::draw_next_frame`]. After any error the renderer is
    /// terminal and only good for dropping.
    pub fn draw_next_frame(&mut self) -> RenderResult<FrameReport> {
        let mut cycle = std::mem::take(&mut self.cycle);
        let result = frame::draw_next_frame(&mut cycle, self);
        self.cycle = cycle;
        result
    }

    /// Blocks until the device has finished all submitted work.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Fatal`] if the wait fails.
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.cycle.state()
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.cycle.frames_presented()
    }

    #[inline]
    pub fn kind(&self) -> SharedResourceKind {
        self.kind
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    fn semaphore(&self, point: SyncPoint) -> vk::Semaphore {
        match point {
            SyncPoint::ImageAvailable => self.sync.image_available().handle(),
            SyncPoint::ComputeFinished => self.sync.compute_finished().handle(),
            SyncPoint::RenderFinished => self.sync.render_finished().handle(),
        }
    }

    fn submit(&self, submission: &QueueSubmission, cmd: &CommandBuffer, on_compute: bool) -> RhiResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission
            .waits
            .iter()
            .map(|&(point, stage)| (self.semaphore(point), stage))
            .unzip();
        let signal_semaphores: Vec<_> = submission.signals.iter().map(|&p| self.semaphore(p)).collect();
        let command_buffers = [cmd.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = if submission.signals_fence {
            self.sync.frame_complete().handle()
        } else {
            vk::Fence::null()
        };

        // SAFETY: The command buffer was recorded this frame and is not
        // pending; the fence was reset after the previous frame retired.
        unsafe {
            if on_compute {
                self.device.submit_compute(&[submit_info], fence)
            } else {
                self.device.submit_graphics(&[submit_info], fence)
            }
        }
    }

    fn record_compute(&self, params: &FrameParams) -> RhiResult<()> {
        let cmd = &self.commands.compute;
        let layout = self.pipelines.layout();

        cmd.reset()?;
        cmd.begin()?;

        // With one family the previous frame's read and this frame's write
        // share a queue; order them.
        if self.device.queue_families().is_shared() {
            let consumer = self.scopes.consumer;
            let producer = self.scopes.producer;
            cmd.pipeline_barrier(consumer.stage, producer.stage, &[consumer.memory_barrier_to(producer)], &[], &[]);
        }

        cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipelines.compute().handle());
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, layout, 0, &[self.descriptors.set()]);
        cmd.push_constants(layout, FrameParams::STAGES, 0, params.as_bytes());

        let (groups_x, groups_y) = dispatch_group_count(self.extent);
        cmd.dispatch(groups_x, groups_y, 1);

        cmd.end()
    }

    fn record_graphics(&self, image_index: u32, params: &FrameParams) -> RhiResult<()> {
        let cmd = &self.commands.graphics;
        let layout = self.pipelines.layout();
        let geometry = self.pipelines.geometry();
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| RhiError::InvalidHandle(format!("No framebuffer for swapchain image {image_index}")))?;
        let extent = self.extent;

        cmd.reset()?;
        cmd.begin()?;
        cmd.begin_render_pass(self.render_pass.handle(), framebuffer.handle(), extent, CLEAR_COLOR);

        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipelines.graphics().handle());
        cmd.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, 0, &[self.descriptors.set()]);
        cmd.push_constants(layout, FrameParams::STAGES, 0, params.as_bytes());

        if let Some(buffer) = self.shared.vertex_buffer().filter(|_| geometry.reads_vertex_buffer) {
            cmd.bind_vertex_buffers(0, &[buffer], &[0]);
        }
        cmd.draw(geometry.vertex_count, 1, 0, 0);

        cmd.end_render_pass();
        cmd.end()
    }
}

impl FrameBackend for Renderer {
    fn wait_for_previous_frame(&mut self) -> RenderResult<()> {
        self.sync.frame_complete().wait(u64::MAX)?;
        Ok(())
    }

    fn acquire_image(&mut self) -> RenderResult<AcquiredImage> {
        let (index, suboptimal) = self
            .swapchain
            .acquire_next_image(self.sync.image_available().handle())
            .map_err(RenderError::SurfaceGone)?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn reset_frame_fence(&mut self) -> RenderResult<()> {
        self.sync.frame_complete().reset()?;
        Ok(())
    }

    fn record(&mut self, image_index: u32, frame: u64) -> RenderResult<()> {
        let params = FrameParams::new(frame, self.started.elapsed().as_secs_f32(), self.extent);
        self.record_compute(&params)?;
        self.record_graphics(image_index, &params)?;
        Ok(())
    }

    fn submit_compute(&mut self) -> RenderResult<()> {
        self.submit(&self.plan.compute, &self.commands.compute, true)?;
        Ok(())
    }

    fn submit_graphics(&mut self) -> RenderResult<()> {
        self.submit(&self.plan.graphics, &self.commands.graphics, false)?;
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> RenderResult<bool> {
        self.swapchain
            .present(
                self.device.graphics_queue(),
                image_index,
                self.sync.render_finished().handle(),
            )
            .map_err(RenderError::SurfaceGone)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!(
            "Destroying renderer after {} frame(s) in state {:?}",
            self.cycle.frames_presented(),
            self.cycle.state()
        );

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before teardown: {}", e);
        }

        // SAFETY: Each field is dropped exactly once, here, after the device
        // is idle. Nothing uses them afterwards.
        unsafe {
            ManuallyDrop::drop(&mut self.sync);
            ManuallyDrop::drop(&mut self.commands);
            ManuallyDrop::drop(&mut self.pipelines);
            ManuallyDrop::drop(&mut self.framebuffers);
            ManuallyDrop::drop(&mut self.render_pass);
            ManuallyDrop::drop(&mut self.descriptors);
            ManuallyDrop::drop(&mut self.shared);
            ManuallyDrop::drop(&mut self.shaders);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        let snapshot = self.tracker.snapshot();
        debug!(
            "Teardown complete: {} created, {} still live",
            snapshot.created_total(),
            snapshot.live_total()
        );
    }
}
