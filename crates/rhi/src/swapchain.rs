//! Presentation surface: the swapchain and one view per image.
//!
//! Creation is split in two. [`SurfaceSupport`] gathers what the surface
//! offers, and [`SwapchainPolicy`] turns that into concrete choices:
//! - image count: [`determine_image_count`], one over the minimum unless that passes the maximum
//! - format: [`choose_surface_format`], `B8G8R8A8_SRGB`/`SRGB_NONLINEAR` or the first one reported
//! - present mode: [`choose_present_mode`], `IMMEDIATE` or `FIFO`
//!
//! The policy is plain data, so it is tested without a GPU. The swapchain is
//! sized once; an out-of-date or lost surface is handed back to the caller.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ash::vk;
//! # use vkcrt_rhi::device::Device;
//! # use vkcrt_rhi::instance::Instance;
//! use vkcrt_rhi::swapchain::Swapchain;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR,
//! #            surface_loader: &ash::khr::surface::Instance, image_available: vk::Semaphore,
//! #            render_finished: vk::Semaphore) -> vkcrt_rhi::RhiResult<()> {
//! let swapchain = Swapchain::new(instance, device.clone(), surface, surface_loader, 1280, 720)?;
//!
//! let (image_index, _suboptimal) = swapchain.acquire_next_image(image_available)?;
//! // record and submit work that signals render_finished
//! swapchain.present(device.graphics_queue(), image_index, render_finished)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::tracker::{ResourceKind, TrackedResource};

/// What a surface offers to one queue family of one GPU.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries the surface for the device's graphics family.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::CapabilityNotSupported`] if that family cannot
    /// present to `surface`, or the Vulkan error of a failed query.
    pub fn query(device: &Device, surface: vk::SurfaceKHR, loader: &ash::khr::surface::Instance) -> RhiResult<Self> {
        let gpu = device.physical_device();
        let family = device.queue_families().graphics_family;

        // SAFETY: `gpu` and `surface` are live handles from the same instance as `loader`.
        let (can_present, capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_support(gpu, family, surface)?,
                loader.get_physical_device_surface_capabilities(gpu, surface)?,
                loader.get_physical_device_surface_formats(gpu, surface)?,
                loader.get_physical_device_surface_present_modes(gpu, surface)?,
            )
        };

        if !can_present {
            return Err(RhiError::CapabilityNotSupported(format!(
                "queue family {family} cannot present to the window surface"
            )));
        }

        debug!(
            "Surface offers {} format(s), {} present mode(s), images {}..={}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Concrete swapchain parameters picked from a [`SurfaceSupport`].
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPolicy {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPolicy {
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface reports no format
    /// or no present mode.
    pub fn decide(support: &SurfaceSupport, width: u32, height: u32) -> RhiResult<Self> {
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return Err(RhiError::SwapchainError(format!(
                "surface reports {} format(s) and {} present mode(s)",
                support.formats.len(),
                support.present_modes.len()
            )));
        }

        Ok(Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, width, height),
            image_count: determine_image_count(&support.capabilities),
            transform: support.capabilities.current_transform,
        })
    }
}

/// Owns the `VkSwapchainKHR` and a color view per image.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    policy: SwapchainPolicy,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    view_tokens: Vec<TrackedResource>,
    _token: TrackedResource,
}

impl Swapchain {
    /// Creates the swapchain for `surface` with exclusive sharing, then its views.
    ///
    /// `width` and `height` only matter when the surface leaves the extent open.
    ///
    /// # Errors
    ///
    /// - [`RhiError::CapabilityNotSupported`] if the graphics family cannot present
    /// - [`RhiError::SwapchainError`] if the surface reports no formats or modes
    /// - Vulkan errors from creation; a partial set of views is released
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let support = SurfaceSupport::query(&device, surface, surface_loader)?;
        let policy = SwapchainPolicy::decide(&support, width, height)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(policy.image_count)
            .image_format(policy.surface_format.format)
            .image_color_space(policy.surface_format.color_space)
            .image_extent(policy.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(policy.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(policy.present_mode)
            .clipped(true);

        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let token = device.tracker().track(ResourceKind::Swapchain);

        let mut this = Self {
            device,
            loader,
            swapchain,
            policy,
            images: Vec::new(),
            views: Vec::new(),
            view_tokens: Vec::new(),
            _token: token,
        };
        this.images = unsafe { this.loader.get_swapchain_images(swapchain)? };
        this.create_views()?;

        info!(
            "Swapchain {}x{}: {} image(s) ({} requested), {:?}/{:?}, {:?}",
            policy.extent.width,
            policy.extent.height,
            this.images.len(),
            policy.image_count,
            policy.surface_format.format,
            policy.surface_format.color_space,
            policy.present_mode
        );
        Ok(this)
    }

    // Views are pushed as they are made so Drop sees a partial set.
    fn create_views(&mut self) -> RhiResult<()> {
        for (index, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.policy.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_subresource_range());

            let view = unsafe { self.device.handle().create_image_view(&create_info, None) }
                .map_err(|e| RhiError::SwapchainError(format!("view of swapchain image {index}: {e}")))?;
            self.views.push(view);
            self.view_tokens.push(self.device.tracker().track(ResourceKind::ImageView));
        }
        Ok(())
    }

    /// Acquires the next image and signals `semaphore` once it is usable.
    ///
    /// Waits without timeout. Returns `(image_index, suboptimal)`; the raw
    /// `vk::Result` of a failure (`ERROR_OUT_OF_DATE_KHR`,
    /// `ERROR_SURFACE_LOST_KHR`, ...) is left for the caller to classify.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// `Ok(true)` means the swapchain is suboptimal.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<bool, vk::Result> {
        let wait = [wait_semaphore];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn policy(&self) -> &SwapchainPolicy {
        &self.policy
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.policy.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.policy.extent
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// One view per image, in image index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        self.view_tokens.clear();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };

        info!("Swapchain destroyed ({} images)", self.images.len());
    }
}

/// Single mip, single layer, color aspect.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// `B8G8R8A8_SRGB` in `SRGB_NONLINEAR` if offered, otherwise `formats[0]`.
///
/// # Panics
///
/// On an empty slice. [`SwapchainPolicy::decide`] rejects that case first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats
        .iter()
        .position(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR);

    match preferred {
        Some(index) => formats[index],
        None => {
            warn!(
                "B8G8R8A8_SRGB/SRGB_NONLINEAR not offered, falling back to {:?}/{:?}",
                formats[0].format, formats[0].color_space
            );
            formats[0]
        }
    }
}

/// `IMMEDIATE` if offered, otherwise `FIFO`, which every surface supports.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        warn!("IMMEDIATE present mode not offered, using FIFO");
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent, or the request clamped to its limits when the
/// surface reports `u32::MAX`.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX {
        return current;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

/// `min + 1`, or `min` when that would pass a non-zero maximum.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let (min, max) = (capabilities.min_image_count, capabilities.max_image_count);
    if max != 0 && min + 1 > max { min } else { min + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_image_count_capped_at_max() {
        assert_eq!(determine_image_count(&caps(2, 2)), 2);
        assert_eq!(determine_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn test_image_count_one_over_min() {
        assert_eq!(determine_image_count(&caps(2, 8)), 3);
        assert_eq!(determine_image_count(&caps(2, 0)), 3);
        assert_eq!(determine_image_count(&caps(1, 3)), 2);
    }

    #[test]
    fn test_image_count_within_bounds() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let count = determine_image_count(&caps(min, max));
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn test_preferred_format_at_index_two() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let first = choose_surface_format(&formats);
        assert_eq!(first.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(first.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(choose_surface_format(&formats).format, first.format);
    }

    #[test]
    fn test_format_needs_matching_color_space() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_present_mode_prefers_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_present_mode_without_immediate_is_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_follows_fixed_surface() {
        let extent = choose_extent(&caps(2, 3), 800, 600);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_open_extent_clamped() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 4096, 16);
        assert_eq!((extent.width, extent.height), (1920, 64));
        let extent = choose_extent(&capabilities, 1280, 720);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_policy_combines_choices() {
        let support = SurfaceSupport {
            capabilities: caps(2, 2),
            formats: vec![surface_format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let policy = SwapchainPolicy::decide(&support, 640, 480).unwrap();
        assert_eq!(policy.image_count, 2);
        assert_eq!(policy.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(policy.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(policy.extent.width, 1280);
    }

    #[test]
    fn test_policy_rejects_empty_support() {
        let support = SurfaceSupport {
            capabilities: caps(2, 3),
            formats: vec![surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![],
        };
        assert!(matches!(
            SwapchainPolicy::decide(&support, 1280, 720),
            Err(RhiError::SwapchainError(_))
        ));

        let support = SurfaceSupport {
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..support
        };
        assert!(SwapchainPolicy::decide(&support, 1280, 720).is_err());
    }
}
