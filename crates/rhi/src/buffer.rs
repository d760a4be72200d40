//! GPU buffer management.
//!
//! [`Buffer`] wraps a VkBuffer bound to gpu-allocator managed, device-local
//! memory. Buffers touched by both queue roles are created with the sharing
//! mode from [`QueueFamilyIndices::resource_sharing`].
//!
//! [`QueueFamilyIndices::resource_sharing`]: crate::physical_device::QueueFamilyIndices::resource_sharing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkcrt_rhi::buffer::Buffer;
//! use vkcrt_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkcrt_rhi::RhiError> {
//! // One RGBA32F texel per pixel, written by compute and read as vertices
//! let pixels = Buffer::new(
//!     device,
//!     1280 * 720 * 16,
//!     vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
//!     "frame pixels",
//! )?;
//! assert_eq!(pixels.size(), 14_745_600);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::tracker::{ResourceKind, TrackedResource};

/// Device-local buffer with allocator-managed memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    name: &'static str,
    _token: TrackedResource,
}

impl Buffer {
    /// Creates a device-local buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `size` - Size in bytes, non-zero
    /// * `usage` - Vulkan usage flags
    /// * `name` - Label used for allocator bookkeeping and logs
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidHandle`] for a zero size
    /// - [`RhiError::NoSuitableMemoryType`] if no device-local type fits
    /// - Allocator or Vulkan errors. The buffer is released on any failure.
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle("Buffer size must be greater than 0".to_string()));
        }

        let (sharing_mode, families) = device.queue_families().resource_sharing();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let handle = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let token = device.tracker().track(ResourceKind::Buffer);

        let mut buffer = Self {
            device,
            buffer: handle,
            allocation: None,
            size,
            name,
            _token: token,
        };
        buffer.bind_memory()?;

        debug!("Created buffer '{}': {} bytes ({:?})", name, size, sharing_mode);
        Ok(buffer)
    }

    fn bind_memory(&mut self) -> RhiResult<()> {
        let requirements = unsafe { self.device.handle().get_buffer_memory_requirements(self.buffer) };
        let memory_type = self
            .device
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        debug!("Buffer '{}' uses memory type {}", self.name, memory_type);

        let allocation = self.device.allocator()?.allocate(&AllocationCreateDesc {
            name: self.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        // Stored before binding so Drop frees it if binding fails
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        self.allocation = Some(allocation);

        unsafe {
            self.device.handle().bind_buffer_memory(self.buffer, memory, offset)?;
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking allocation of buffer '{}': {}", self.name, e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed buffer '{}'", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessContext;

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let Some(ctx) = HeadlessContext::try_new() else {
            eprintln!("Skipping test: Vulkan not available");
            return;
        };

        let result = Buffer::new(ctx.device().clone(), 0, vk::BufferUsageFlags::STORAGE_BUFFER, "empty");
        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
        assert_eq!(ctx.device().tracker().snapshot().created(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_storage_vertex_buffer_lifecycle() {
        let Some(ctx) = HeadlessContext::try_new() else {
            eprintln!("Skipping test: Vulkan not available");
            return;
        };
        let device = ctx.device().clone();

        let buffer = Buffer::new(
            device.clone(),
            64 * 64 * 16,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            "test pixels",
        )
        .unwrap();
        assert_eq!(buffer.size(), 65_536);
        assert_ne!(buffer.handle(), vk::Buffer::null());
        assert_eq!(device.tracker().snapshot().live(ResourceKind::Buffer), 1);

        drop(buffer);
        assert_eq!(device.tracker().live_total(), 0);
    }
}
