//! Render pass and framebuffers for presenting to swapchain images.
//!
//! The pass has a single color attachment that is cleared, written and left
//! in `PRESENT_SRC_KHR`. Its external dependency is built from the scope of
//! whatever wrote the data the pass reads, so the same pass type serves both
//! shared resource kinds.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;
use crate::sync::AccessScope;
use crate::tracker::{ResourceKind, TrackedResource};

/// Subpass dependency from `VK_SUBPASS_EXTERNAL` into subpass 0.
///
/// Orders `producer` before `consumer`, and the presentation engine's read of
/// the swapchain image before the color write.
pub fn external_dependency(producer: AccessScope, consumer: AccessScope) -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(producer.stage | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(producer.access)
        .dst_stage_mask(consumer.stage | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(consumer.access | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    _token: TrackedResource,
}

impl RenderPass {
    /// Creates a single-subpass pass presenting to images of `color_format`.
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        producer: AccessScope,
        consumer: AccessScope,
    ) -> RhiResult<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        let dependencies = [external_dependency(producer, consumer)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };
        let token = device.tracker().track(ResourceKind::RenderPass);

        debug!(
            "Created render pass for {:?}, external dependency {:?} -> {:?}",
            color_format, producer.stage, consumer.stage
        );

        Ok(Self {
            device,
            render_pass,
            color_format,
            _token: token,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed render pass");
    }
}

/// Framebuffer binding one swapchain image view to a [`RenderPass`].
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    _token: TrackedResource,
}

impl Framebuffer {
    /// # Errors
    ///
    /// Returns an error if framebuffer creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        let token = device.tracker().track(ResourceKind::Framebuffer);

        Ok(Self {
            device,
            framebuffer,
            _token: token,
        })
    }

    /// One framebuffer per view, in view order.
    ///
    /// # Errors
    ///
    /// Returns the first creation error. Framebuffers created before it are
    /// destroyed.
    pub fn for_views(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Vec<Self>> {
        let framebuffers = views
            .iter()
            .map(|&view| Self::new(device.clone(), render_pass, view, extent))
            .collect::<RhiResult<Vec<_>>>()?;

        debug!("Created {} framebuffer(s) at {}x{}", framebuffers.len(), extent.width, extent.height);
        Ok(framebuffers)
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessContext;

    fn compute_write() -> AccessScope {
        AccessScope::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE)
    }

    #[test]
    fn test_external_dependency_buffer_consumer() {
        let consumer = AccessScope::new(
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        );
        let dep = external_dependency(compute_write(), consumer);

        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(dep.src_stage_mask.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(dep.src_stage_mask.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert_eq!(dep.src_access_mask, vk::AccessFlags::SHADER_WRITE);
        assert!(dep.dst_stage_mask.contains(vk::PipelineStageFlags::VERTEX_INPUT));
        assert!(dep.dst_access_mask.contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
        assert!(dep.dst_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_external_dependency_image_consumer() {
        let consumer = AccessScope::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ);
        let dep = external_dependency(compute_write(), consumer);

        assert!(dep.dst_stage_mask.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(!dep.dst_stage_mask.contains(vk::PipelineStageFlags::VERTEX_INPUT));
        assert!(dep.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
    }

    #[test]
    fn test_render_pass_and_framebuffers_are_tracked() {
        let Some(ctx) = HeadlessContext::try_new() else {
            eprintln!("Skipping test: Vulkan not available");
            return;
        };
        let device = ctx.device().clone();
        let consumer = AccessScope::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ);

        let render_pass =
            RenderPass::new(device.clone(), vk::Format::B8G8R8A8_SRGB, compute_write(), consumer).unwrap();
        assert_eq!(render_pass.color_format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(device.tracker().snapshot().live(ResourceKind::RenderPass), 1);

        drop(render_pass);
        assert_eq!(device.tracker().live_total(), 0);
    }
}
