//! Shader modules, descriptor binding and the two pipelines.
//!
//! Both pipelines share one descriptor set layout (binding 0, the shared
//! resource) and one pipeline layout with a [`FrameParams`] push constant
//! range.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::info;

use vkcrt_core::{RenderConfig, SharedResourceKind};
use vkcrt_rhi::RhiResult;
use vkcrt_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use vkcrt_rhi::device::Device;
use vkcrt_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout, PrimitiveTopology};
use vkcrt_rhi::render_pass::RenderPass;
use vkcrt_rhi::shader::{Shader, ShaderStage};

use crate::shared::{SharedResource, TEXEL_SIZE};

/// Binding index of the shared resource in set 0.
pub const SHARED_BINDING: u32 = 0;

/// Clear color of the presented image.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Per-frame push constants.
///
/// Matches the `Params` push constant block in the shaders:
///
/// - Offset 0: frame number
/// - Offset 4: seconds since start
/// - Offset 8: width
/// - Offset 12: height
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub frame: u32,
    pub time: f32,
    pub width: u32,
    pub height: u32,
}

impl FrameParams {
    /// Size of the struct in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// Every stage that declares the block. Pushes must name all of them.
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::COMPUTE.as_raw()
            | vk::ShaderStageFlags::VERTEX.as_raw()
            | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    );

    pub fn new(frame: u64, time: f32, extent: vk::Extent2D) -> Self {
        Self {
            // Shaders only use the frame number as a seed; wrapping is fine.
            frame: frame as u32,
            time,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn push_constant_range() -> vk::PushConstantRange {
        vk::PushConstantRange::default()
            .stage_flags(Self::STAGES)
            .offset(0)
            .size(Self::SIZE)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Draw parameters of the graphics pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub topology: PrimitiveTopology,
    pub vertex_count: u32,
    /// Whether the shared buffer is bound as vertex input.
    pub reads_vertex_buffer: bool,
}

impl Geometry {
    /// One point per pixel for the buffer, a full-screen triangle for the image.
    ///
    /// `extent` comes from [`crate::shared::frame_extent`], which caps both
    /// sides at [`vkcrt_core::MAX_DIMENSION`]; the pixel count saturates
    /// rather than wrapping for anything larger.
    pub fn for_kind(kind: SharedResourceKind, extent: vk::Extent2D) -> Self {
        match kind {
            SharedResourceKind::Buffer => Self {
                topology: PrimitiveTopology::PointList,
                vertex_count: extent.width.saturating_mul(extent.height),
                reads_vertex_buffer: true,
            },
            SharedResourceKind::Texture => Self {
                topology: PrimitiveTopology::TriangleList,
                vertex_count: 3,
                reads_vertex_buffer: false,
            },
        }
    }
}

/// Layout binding of the shared resource for `kind`.
pub fn shared_binding(kind: SharedResourceKind) -> vk::DescriptorSetLayoutBinding<'static> {
    match kind {
        SharedResourceKind::Buffer => DescriptorBindingBuilder::storage_buffer(
            SHARED_BINDING,
            vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX,
        ),
        SharedResourceKind::Texture => DescriptorBindingBuilder::storage_image(
            SHARED_BINDING,
            vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT,
        ),
    }
}

fn vertex_input(kind: SharedResourceKind) -> Option<(vk::VertexInputBindingDescription, vk::VertexInputAttributeDescription)> {
    match kind {
        SharedResourceKind::Buffer => Some((
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(TEXEL_SIZE as u32)
                .input_rate(vk::VertexInputRate::VERTEX),
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(0),
        )),
        SharedResourceKind::Texture => None,
    }
}

/// The three shader modules of one variant.
pub struct ShaderSet {
    vertex: Shader,
    fragment: Shader,
    compute: Shader,
}

impl ShaderSet {
    /// Loads `<stem>.{vert,frag,comp}.spv` from the configured shader directory.
    ///
    /// # Errors
    ///
    /// Returns [`vkcrt_rhi::RhiError::ShaderError`] for a missing or malformed
    /// file. Modules loaded before the failure are destroyed.
    pub fn load(device: Arc<Device>, config: &RenderConfig) -> RhiResult<Self> {
        let load = |stage: ShaderStage| {
            Shader::from_spirv_file(device.clone(), &config.shader_path(stage.extension()), stage, "main")
        };

        let vertex = load(ShaderStage::Vertex)?;
        let fragment = load(ShaderStage::Fragment)?;
        let compute = load(ShaderStage::Compute)?;

        info!("Loaded {} shader set from {:?}", config.variant, config.shader_dir);
        Ok(Self {
            vertex,
            fragment,
            compute,
        })
    }
}

/// Descriptor set layout, pool and the one set pointing at the shared resource.
///
/// The set is written once and never updated afterwards.
pub struct DescriptorBinding {
    pool: DescriptorPool,
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
}

impl DescriptorBinding {
    /// # Errors
    ///
    /// Returns an error if layout, pool or set creation fails.
    pub fn new(device: Arc<Device>, shared: &SharedResource) -> RhiResult<Self> {
        let binding = shared_binding(shared.kind());
        let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;

        let pool_size = vk::DescriptorPoolSize::default()
            .ty(binding.descriptor_type)
            .descriptor_count(1);
        let pool = DescriptorPool::new(device.clone(), 1, &[pool_size])?;

        let set = pool.allocate_one(layout.handle())?;
        shared.write_descriptor(&device, set, SHARED_BINDING);

        Ok(Self { pool, layout, set })
    }

    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool.handle()
    }
}

/// Compute and graphics pipelines and their shared layout.
///
/// Pipelines are declared before the layout so they are destroyed first.
pub struct PipelineSet {
    compute: Pipeline,
    graphics: Pipeline,
    layout: PipelineLayout,
    geometry: Geometry,
}

impl PipelineSet {
    /// # Errors
    ///
    /// Returns an error if either pipeline fails to build.
    pub fn new(
        device: Arc<Device>,
        shaders: &ShaderSet,
        binding: &DescriptorBinding,
        render_pass: &RenderPass,
        kind: SharedResourceKind,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let layout = PipelineLayout::new(
            device.clone(),
            &[binding.layout()],
            &[FrameParams::push_constant_range()],
        )?;

        let compute = Pipeline::compute(device.clone(), &shaders.compute, &layout)?;

        let geometry = Geometry::for_kind(kind, extent);
        let mut builder = GraphicsPipelineBuilder::new()
            .vertex_shader(&shaders.vertex)
            .fragment_shader(&shaders.fragment)
            .topology(geometry.topology)
            .render_pass(render_pass.handle(), 0);
        if let Some((vertex_binding, attribute)) = vertex_input(kind) {
            builder = builder.vertex_binding(vertex_binding).vertex_attributes(&[attribute]);
        }
        let graphics = builder.build(device, &layout)?;

        info!("{} pipelines ready: {:?}, {} vertices per draw", kind, geometry.topology, geometry.vertex_count);

        Ok(Self {
            compute,
            graphics,
            layout,
            geometry,
        })
    }

    #[inline]
    pub fn compute(&self) -> &Pipeline {
        &self.compute
    }

    #[inline]
    pub fn graphics(&self) -> &Pipeline {
        &self.graphics
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_params_layout() {
        assert_eq!(FrameParams::SIZE, 16);
        let params = FrameParams {
            frame: 1,
            time: 0.5,
            width: 1280,
            height: 720,
        };
        let bytes = params.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &1280u32.to_ne_bytes());
    }

    #[test]
    fn test_frame_params_push_range_covers_all_stages() {
        let range = FrameParams::push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 16);
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::COMPUTE));
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::VERTEX));
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_frame_number_wraps() {
        let params = FrameParams::new(u64::from(u32::MAX) + 2, 0.0, vk::Extent2D { width: 16, height: 16 });
        assert_eq!(params.frame, 1);
    }

    #[test]
    fn test_geometry_per_kind() {
        let extent = vk::Extent2D { width: 1280, height: 720 };

        let points = Geometry::for_kind(SharedResourceKind::Buffer, extent);
        assert_eq!(points.topology, PrimitiveTopology::PointList);
        assert_eq!(points.vertex_count, 1280 * 720);

        let largest = vk::Extent2D {
            width: vkcrt_core::MAX_DIMENSION,
            height: vkcrt_core::MAX_DIMENSION,
        };
        assert_eq!(Geometry::for_kind(SharedResourceKind::Buffer, largest).vertex_count, 1 << 28);
        let absurd = vk::Extent2D {
            width: u32::MAX,
            height: 2,
        };
        assert_eq!(Geometry::for_kind(SharedResourceKind::Buffer, absurd).vertex_count, u32::MAX);
        assert!(points.reads_vertex_buffer);

        let triangle = Geometry::for_kind(SharedResourceKind::Texture, extent);
        assert_eq!(triangle.topology, PrimitiveTopology::TriangleList);
        assert_eq!(triangle.vertex_count, 3);
        assert!(!triangle.reads_vertex_buffer);
    }

    #[test]
    fn test_shared_binding_per_kind() {
        let buffer = shared_binding(SharedResourceKind::Buffer);
        assert_eq!(buffer.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(
            buffer.stage_flags,
            vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX
        );

        let image = shared_binding(SharedResourceKind::Texture);
        assert_eq!(image.descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(
            image.stage_flags,
            vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_vertex_input_matches_texel() {
        let (binding, attribute) = vertex_input(SharedResourceKind::Buffer).unwrap();
        assert_eq!(u64::from(binding.stride), TEXEL_SIZE);
        assert_eq!(attribute.format, vk::Format::R32G32B32A32_SFLOAT);
        assert!(vertex_input(SharedResourceKind::Texture).is_none());
    }
}
