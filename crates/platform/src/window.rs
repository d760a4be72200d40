//! The presentation window and its Vulkan surface.
//!
//! The window is fixed-size and starts hidden. The app shows it only once the
//! renderer has finished setup.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkcrt_core::{Error, Result};

/// A `VkSurfaceKHR`, destroyed on drop.
///
/// Must be dropped before the instance it was created from.
pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// `VK_KHR_surface` functions, for capability, format and present queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created from the loader's instance and destroyed only here.
        unsafe { self.loader.destroy_surface(self.surface, None) };
        tracing::debug!("Surface destroyed");
    }
}

/// Fixed-size, hidden-until-shown winit window.
pub struct Window {
    window: WinitWindow,
    width: u32,
    height: u32,
}

impl Window {
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the platform refuses the window.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false)
            .with_visible(false);
        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(format!("cannot create {width}x{height} window: {e}")))?;

        tracing::info!("Window '{}' created at {}x{}, hidden until setup completes", title, width, height);
        Ok(Self { window, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn show(&self) {
        self.window.set_visible(true);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions this window's display needs for a surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the display handle is unavailable or the platform
    /// has no Vulkan surface extension.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let (display, _) = self.raw_handles()?;
        get_required_extensions(display)
    }

    /// Creates a surface for this window on `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the handles are unavailable and
    /// [`Error::Surface`] if Vulkan rejects the surface.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let (display, window) = self.raw_handles()?;

        // SAFETY: both handles come from the live winit window, which outlives
        // the surface because the renderer is torn down first.
        let surface = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .map_err(|e| Error::Surface(format!("vkCreate*SurfaceKHR failed: {e}")))?;

        tracing::info!("Surface created");
        Ok(Surface {
            surface,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("window handle unavailable: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

/// Surface extensions `ash_window` requires for `display`.
///
/// The pointers refer to static names owned by `ash_window`.
///
/// # Errors
///
/// Returns [`Error::Surface`] for a display with no known surface extension.
pub fn get_required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Surface(format!("no Vulkan surface extension for this display: {e}")))?;

    // SAFETY: ash_window returns static, nul-terminated names.
    let names: Vec<&CStr> = extensions.iter().map(|&ext| unsafe { CStr::from_ptr(ext) }).collect();
    tracing::debug!("Surface extensions: {:?}", names);

    Ok(extensions.to_vec())
}
