//! Storage images written by compute and read by later passes.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::color_subresource_range;
use crate::tracker::{ResourceKind, TrackedResource};

/// Single-mip 2D image with a matching view, usable as a storage image.
///
/// The image starts in `UNDEFINED` layout; the caller transitions it once
/// before first use.
pub struct StorageImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    _image_token: TrackedResource,
    _view_token: Option<TrackedResource>,
}

impl StorageImage {
    /// Creates a device-local storage image and its view.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidHandle`] for a zero extent
    /// - [`RhiError::NoSuitableMemoryType`] if no device-local type fits
    /// - Allocator or Vulkan errors. Everything created so far is released.
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &'static str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Image extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let (sharing_mode, families) = device.queue_families().resource_sharing();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage | vk::ImageUsageFlags::STORAGE)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = unsafe { device.handle().create_image(&image_info, None)? };
        let image_token = device.tracker().track(ResourceKind::Image);

        let mut image = Self {
            device,
            image: handle,
            view: vk::ImageView::null(),
            allocation: None,
            format,
            extent,
            _image_token: image_token,
            _view_token: None,
        };

        image.bind_memory(name)?;
        image.create_view()?;

        debug!(
            "Created storage image '{}': {}x{} {:?} ({:?})",
            name, extent.width, extent.height, format, sharing_mode
        );
        Ok(image)
    }

    fn bind_memory(&mut self, name: &'static str) -> RhiResult<()> {
        let requirements = unsafe { self.device.handle().get_image_memory_requirements(self.image) };
        self.device
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let allocation = self.device.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        self.allocation = Some(allocation);

        unsafe {
            self.device.handle().bind_image_memory(self.image, memory, offset)?;
        }
        Ok(())
    }

    fn create_view(&mut self) -> RhiResult<()> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());

        self.view = unsafe { self.device.handle().create_image_view(&view_info, None)? };
        self._view_token = Some(self.device.tracker().track(ResourceKind::ImageView));
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for StorageImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking image allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!("Destroyed storage image {}x{}", self.extent.width, self.extent.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessContext;

    #[test]
    fn test_storage_image_creates_view() {
        let Some(ctx) = HeadlessContext::try_new() else {
            eprintln!("Skipping test: Vulkan not available");
            return;
        };
        let device = ctx.device().clone();

        let image = StorageImage::new(
            device.clone(),
            vk::Extent2D { width: 64, height: 32 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::empty(),
            "test image",
        )
        .unwrap();

        assert_ne!(image.view(), vk::ImageView::null());
        assert_eq!(image.extent().width, 64);

        let snapshot = device.tracker().snapshot();
        assert_eq!(snapshot.live(ResourceKind::Image), 1);
        assert_eq!(snapshot.live(ResourceKind::ImageView), 1);

        drop(image);
        assert_eq!(device.tracker().live_total(), 0);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let Some(ctx) = HeadlessContext::try_new() else {
            eprintln!("Skipping test: Vulkan not available");
            return;
        };

        let result = StorageImage::new(
            ctx.device().clone(),
            vk::Extent2D { width: 0, height: 16 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::empty(),
            "empty",
        );
        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
    }
}
