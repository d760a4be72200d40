//! Vulkan logical device and queue management.
//!
//! # Overview
//!
//! [`Device`] owns:
//! - the logical device with the caller's extensions
//! - one graphics queue and one compute queue (the same queue when both roles
//!   share a family)
//! - the gpu-allocator instance
//! - the [`ResourceTracker`] every wrapper reports to
//!
//! # Example
//!
//! ```no_run
//! use vkcrt_rhi::device::Device;
//! use vkcrt_rhi::instance::Instance;
//! use vkcrt_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(&[], false).expect("Failed to create instance");
//! let info = select_physical_device(instance.handle(), false).expect("No usable GPU");
//! let device = Device::new(&instance, &info, &[]).expect("Failed to create logical device");
//!
//! println!("shared queue family: {}", device.queue_families().is_shared());
//! ```

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::tracker::ResourceTracker;

/// Vulkan logical device wrapper.
///
/// Shared as `Arc<Device>`; every wrapper created from it keeps a clone, so
/// the device outlives all of its objects.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    tracker: Arc<ResourceTracker>,
}

impl Device {
    /// Creates the logical device, retrieves both queues and sets up the allocator.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical_device_info` - The selected GPU and its queue families
    /// * `extensions` - Device extensions to enable (the swapchain extension
    ///   when presenting, nothing for headless use)
    ///
    /// # Errors
    ///
    /// - [`RhiError::CapabilityNotSupported`] if an extension is missing
    /// - Vulkan or allocator errors from creation
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> RhiResult<Arc<Self>> {
        let physical_device = physical_device_info.device;
        let queue_families = physical_device_info.queue_families;

        let available = unsafe {
            instance
                .handle()
                .enumerate_device_extension_properties(physical_device)?
        };
        let available: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        let missing = missing_extensions(extensions, &available);
        if !missing.is_empty() {
            return Err(RhiError::CapabilityNotSupported(format!(
                "device extensions not supported: {missing:?}"
            )));
        }

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let extension_names: Vec<*const std::ffi::c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device, &create_info, None)?
        };

        info!("Logical device created with {} extension(s)", extensions.len());

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics_family, 0) };
        let compute_queue = unsafe { device.get_device_queue(queue_families.compute_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, compute family {}",
            queue_families.graphics_family, queue_families.compute_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device,
            memory_properties: physical_device_info.memory_properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            compute_queue,
            queue_families,
            tracker: ResourceTracker::new(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle. Presentation also goes through it.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the compute queue handle.
    ///
    /// Identical to [`Device::graphics_queue`] when both roles share a family.
    #[inline]
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the live-object tracker for this device.
    #[inline]
    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Locks the GPU memory allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if a previous holder panicked.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("GPU allocator mutex poisoned".into()))
    }

    /// Finds a memory type index allowed by `type_bits` that has all of `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableMemoryType`] when nothing matches.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> RhiResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
            .ok_or(RhiError::NoSuitableMemoryType { type_bits, flags })
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and fully recorded
    /// - Wait and signal semaphores follow the frame's synchronization plan
    /// - The fence (if not null) is unsignaled and not in use
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_graphics(&self, submit_infos: &[vk::SubmitInfo], fence: vk::Fence) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Submits command buffers to the compute queue.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Device::submit_graphics`].
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_compute(&self, submit_infos: &[vk::SubmitInfo], fence: vk::Fence) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.compute_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Blocks until the compute queue is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_compute_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.compute_queue)? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            let leaked = self.tracker.report_leaks();
            if leaked > 0 {
                error!("Destroying device with {leaked} live object(s)");
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device is Send+Sync
// - vk handles are plain Copy values
// - Allocator is protected by Mutex
// - ResourceTracker uses atomics
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Lowest memory type index allowed by `type_bits` whose properties contain `flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
}

/// Requested extensions absent from `available`.
pub fn missing_extensions<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(2));
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_COHERENT), Some(1));
    }

    #[test]
    fn test_find_memory_type_none() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
        // Type exists but is excluded by the mask
        assert_eq!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE), None);
    }

    #[test]
    fn test_find_memory_type_ignores_types_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
    }

    #[test]
    fn test_missing_extensions() {
        let requested = [ash::khr::swapchain::NAME];
        assert!(missing_extensions(&requested, &[ash::khr::swapchain::NAME]).is_empty());
        assert_eq!(missing_extensions(&requested, &[]), vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
