// Presentation surface - binds the native window to the instance

use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::CStr;
use std::sync::Arc;

use super::InstanceContext;
use crate::error::{Result, VkResultExt};
use crate::platform::Window;

/// Instance extensions the platform needs to present to windows on `display`
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let names = ash_window::enumerate_required_extensions(display)
        .call("enumerate_required_extensions")?;
    // SAFETY: ash-window hands out pointers to 'static extension name constants
    Ok(names.iter().map(|&name| unsafe { CStr::from_ptr(name) }).collect())
}

/// Create the presentation surface for `window`
pub fn create_surface(instance: &Arc<InstanceContext>, window: &dyn Window) -> Result<Arc<PresentationSurface>> {
    PresentationSurface::new(instance, window).map(Arc::new)
}

pub struct PresentationSurface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
    _instance: Arc<InstanceContext>,
}

impl PresentationSurface {
    /// Create a surface for `window`; the window must outlive the surface
    pub fn new(instance: &Arc<InstanceContext>, window: &dyn Window) -> Result<Self> {
        let handles = window.native_handles()?;

        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                handles.display,
                handles.window,
                None,
            )
        }
        .call("vkCreateSurfaceKHR")?;

        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);

        log::info!("Created presentation surface");

        Ok(Self {
            surface,
            loader,
            _instance: Arc::clone(instance),
        })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        log::info!("Destroying presentation surface...");
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
