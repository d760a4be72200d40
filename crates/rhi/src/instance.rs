//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and the debug
//! messenger that forwards validation output into `tracing`.
//!
//! # Overview
//!
//! [`Instance`] owns the loader entry, the instance handle and, when validation
//! is active, the debug messenger. Surface extensions are supplied by the
//! caller (the platform crate asks the window system for them) so a headless
//! instance can be created by passing an empty list.
//!
//! # Example
//!
//! ```no_run
//! use vkcrt_rhi::instance::Instance;
//!
//! // Headless instance, validation on in debug builds
//! let instance = Instance::new(&[], cfg!(debug_assertions)).expect("Failed to create Vulkan instance");
//! println!("validation: {}", instance.has_validation());
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

/// Layers enabled when validation is requested, in priority order.
///
/// Each one is enabled only if the loader reports it.
pub const VALIDATION_LAYERS: [&CStr; 2] = [c"VK_LAYER_KHRONOS_validation", c"VK_LAYER_LUNARG_monitor"];

/// Vulkan instance wrapper with optional validation layer support.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Layers that were actually enabled
    enabled_layers: Vec<&'static CStr>,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `surface_extensions` - Instance extensions required by the window system.
    ///   Pass an empty slice for a headless instance.
    /// * `enable_validation` - Enable the validation layers that are installed
    ///   and attach a debug messenger.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Vulkan library cannot be loaded
    /// - A requested extension is missing
    /// - Debug messenger setup fails (when validation is enabled)
    pub fn new(surface_extensions: &[*const c_char], enable_validation: bool) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let enabled_layers = if enable_validation {
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            let names: Vec<&CStr> = available
                .iter()
                .filter_map(|layer| layer.layer_name_as_c_str().ok())
                .collect();
            let enabled = filter_available_layers(&VALIDATION_LAYERS, &names);
            if enabled.is_empty() {
                warn!("Validation requested but no validation layer is installed, proceeding without it");
            }
            enabled
        } else {
            Vec::new()
        };
        let validation_available = !enabled_layers.is_empty();

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vkcrt")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkcrt")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = surface_extensions.to_vec();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers: Vec<*const c_char> = enabled_layers.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created ({} extensions, {} layers)",
            extensions.len(),
            layers.len()
        );
        for layer in &enabled_layers {
            debug!("Enabled layer {:?}", layer);
        }

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            enabled_layers,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether a debug messenger is attached.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Layers enabled on this instance.
    #[inline]
    pub fn enabled_layers(&self) -> &[&'static CStr] {
        &self.enabled_layers
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Keep the requested layers that appear in `available`, preserving request order.
pub fn filter_available_layers(requested: &[&'static CStr], available: &[&CStr]) -> Vec<&'static CStr> {
    requested
        .iter()
        .copied()
        .filter(|wanted| {
            let present = available.contains(wanted);
            if !present {
                debug!("Layer {:?} not installed", wanted);
            }
            present
        })
        .collect()
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid (or null) callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vkcrt_rhi::validation", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vkcrt_rhi::validation", "[{kind}] {message}"),
        _ => debug!(target: "vkcrt_rhi::validation", "[{kind}] {message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_keeps_request_order() {
        let available = [c"VK_LAYER_LUNARG_monitor", c"VK_LAYER_KHRONOS_validation", c"VK_LAYER_MESA_overlay"];
        let enabled = filter_available_layers(&VALIDATION_LAYERS, &available);
        assert_eq!(enabled, vec![c"VK_LAYER_KHRONOS_validation", c"VK_LAYER_LUNARG_monitor"]);
    }

    #[test]
    fn test_filter_drops_missing_layers() {
        let available = [c"VK_LAYER_KHRONOS_validation"];
        let enabled = filter_available_layers(&VALIDATION_LAYERS, &available);
        assert_eq!(enabled, vec![c"VK_LAYER_KHRONOS_validation"]);

        assert!(filter_available_layers(&VALIDATION_LAYERS, &[]).is_empty());
    }

    #[test]
    fn test_headless_instance_without_validation() {
        match Instance::new(&[], false) {
            Ok(instance) => {
                assert!(!instance.has_validation());
                assert!(instance.enabled_layers().is_empty());
            }
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_headless_instance_with_validation() {
        match Instance::new(&[], true) {
            Ok(instance) => {
                // Depends on the installed SDK
                assert_eq!(instance.has_validation(), !instance.enabled_layers().is_empty());
            }
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
