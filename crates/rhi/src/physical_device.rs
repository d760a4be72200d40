//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! Selection is a ranked-preference scan rather than a scoring pass:
//! 1. Enumerate all GPUs
//! 2. Take the first discrete GPU, otherwise the first device reported
//! 3. Resolve the graphics and compute queue families on that device
//!
//! A device that cannot supply both roles is rejected with
//! [`RhiError::CapabilityNotSupported`]; no other device is tried.
//!
//! # Example
//!
//! ```no_run
//! use vkcrt_rhi::instance::Instance;
//! use vkcrt_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(&[], false).expect("Failed to create instance");
//! let info = select_physical_device(instance.handle(), false).expect("No usable GPU");
//!
//! println!("Selected GPU: {:?}", info.device_name());
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// The queue families assigned to the two execution roles.
///
/// Both roles may resolve to the same family (the common case) or to two
/// distinct families. Everything downstream handles either topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics submission and presentation.
    pub graphics_family: u32,
    /// Family used for compute submission.
    pub compute_family: u32,
}

impl QueueFamilyIndices {
    /// Whether both roles share one queue family.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics_family == self.compute_family
    }

    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics_family];
        if !self.is_shared() {
            families.push(self.compute_family);
        }
        families
    }

    /// Sharing mode for resources touched by both roles.
    ///
    /// EXCLUSIVE with no family list when shared, CONCURRENT across both
    /// families otherwise, so no ownership transfer is needed.
    pub fn resource_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, self.unique_families())
        }
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices for the graphics and compute roles.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects the physical device and resolves its queue families.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `prefer_dedicated_compute` - Put the compute role on a compute-only
///   family when the device has one
///
/// # Errors
///
/// - [`RhiError::NoSuitableGpu`] if the loader reports no devices.
/// - [`RhiError::CapabilityNotSupported`] if the chosen device has no family
///   for one of the roles.
pub fn select_physical_device(
    instance: &ash::Instance,
    prefer_dedicated_compute: bool,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let properties: Vec<vk::PhysicalDeviceProperties> = devices
        .iter()
        .map(|&device| unsafe { instance.get_physical_device_properties(device) })
        .collect();

    let types: Vec<vk::PhysicalDeviceType> = properties.iter().map(|p| p.device_type).collect();
    let Some(index) = preferred_device_index(&types) else {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    };

    info!("Found {} GPU(s)", devices.len());

    let device = devices[index];
    let properties = properties[index];
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = select_queue_families(&families, prefer_dedicated_compute)?;

    let selected = PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, graphics family {}, compute family {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        queue_families.graphics_family,
        queue_families.compute_family
    );

    Ok(selected)
}

/// Index of the first discrete GPU, else the first device.
///
/// Returns `None` only for an empty list.
pub fn preferred_device_index(types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    if types.is_empty() {
        return None;
    }
    Some(
        types
            .iter()
            .position(|&t| t == vk::PhysicalDeviceType::DISCRETE_GPU)
            .unwrap_or(0),
    )
}

/// Resolves the graphics and compute roles onto queue families.
///
/// - Default: the first family with GRAPHICS|COMPUTE serves both roles.
/// - Without such a family, graphics takes the first GRAPHICS family and
///   compute the first COMPUTE family.
/// - With `prefer_dedicated_compute`, a COMPUTE family without GRAPHICS wins
///   the compute role if one exists.
///
/// Families advertising zero queues are ignored.
///
/// # Errors
///
/// Returns [`RhiError::CapabilityNotSupported`] if either role is unfilled.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    prefer_dedicated_compute: bool,
) -> RhiResult<QueueFamilyIndices> {
    let first_with = |wanted: vk::QueueFlags, excluded: vk::QueueFlags| {
        families
            .iter()
            .position(|f| {
                f.queue_count > 0 && f.queue_flags.contains(wanted) && !f.queue_flags.intersects(excluded)
            })
            .map(|i| i as u32)
    };

    let combined = first_with(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty());

    let graphics_family = combined
        .or_else(|| first_with(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty()))
        .ok_or_else(|| RhiError::CapabilityNotSupported("no queue family supports graphics".into()))?;

    let dedicated = if prefer_dedicated_compute {
        first_with(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
    } else {
        None
    };

    let compute_family = dedicated
        .or(combined)
        .or_else(|| first_with(vk::QueueFlags::COMPUTE, vk::QueueFlags::empty()))
        .ok_or_else(|| RhiError::CapabilityNotSupported("no queue family supports compute".into()))?;

    let indices = QueueFamilyIndices {
        graphics_family,
        compute_family,
    };
    debug!("Queue families resolved: {:?} (shared: {})", indices, indices.is_shared());
    Ok(indices)
}
