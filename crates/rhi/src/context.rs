//! Surface-less Vulkan context.
//!
//! Bundles an [`Instance`] and a [`Device`] for compute-only use: GPU tests,
//! offline checks, or anything that never presents.

use std::sync::Arc;

use tracing::warn;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::select_physical_device;

/// A device with no window surface.
///
/// Field order matters: the device is dropped before the instance.
pub struct HeadlessContext {
    device: Arc<Device>,
    instance: Instance,
}

impl HeadlessContext {
    /// Creates a headless instance and device on the preferred GPU.
    ///
    /// # Errors
    ///
    /// Same as [`Instance::new`], [`select_physical_device`] and [`Device::new`].
    pub fn new(enable_validation: bool, prefer_dedicated_compute: bool) -> RhiResult<Self> {
        let instance = Instance::new(&[], enable_validation)?;
        let info = select_physical_device(instance.handle(), prefer_dedicated_compute)?;
        let device = Device::new(&instance, &info, &[])?;
        Ok(Self { device, instance })
    }

    /// Creates a context, or returns `None` when no Vulkan loader or GPU is present.
    ///
    /// Any other failure is still treated as absence but logged.
    pub fn try_new() -> Option<Self> {
        match Self::new(false, false) {
            Ok(ctx) => Some(ctx),
            Err(RhiError::LoadingError(_) | RhiError::NoSuitableGpu) => None,
            Err(e) => {
                warn!("Headless Vulkan context unavailable: {e}");
                None
            }
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}
