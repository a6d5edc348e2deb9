// Swapchain - window presentation
//
// Manages the chain of presentable images and their views across window
// resizes. A new chain is created with the previous one as `old_swapchain`,
// and the previous chain is destroyed only once the new one exists.

use ash::vk;
use std::sync::Arc;

use super::selector::{QueueFamilyAssignment, SurfaceConfiguration};
use super::{LogicalDevice, PresentationSurface};
use crate::error::{Result, VkResultExt};
use crate::platform::Window;

/// Device-facing calls the swapchain manager depends on
pub trait PresentationDriver {
    fn surface(&self) -> vk::SurfaceKHR;
    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR>;
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
}

/// `PresentationDriver` backed by the real device and surface
pub struct VulkanPresenter {
    loader: ash::khr::swapchain::Device,
    surface: Arc<PresentationSurface>,
    device: Arc<LogicalDevice>,
}

impl VulkanPresenter {
    pub fn new(device: &Arc<LogicalDevice>, surface: &Arc<PresentationSurface>) -> Self {
        let loader = ash::khr::swapchain::Device::new(&device.instance().instance, &device.device);
        Self {
            loader,
            surface: Arc::clone(surface),
            device: Arc::clone(device),
        }
    }
}

impl PresentationDriver for VulkanPresenter {
    fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        self.surface.capabilities(self.device.physical_device)
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> Result<vk::SwapchainKHR> {
        unsafe { self.loader.create_swapchain(info, None) }.call("vkCreateSwapchainKHR")
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.loader.get_swapchain_images(swapchain) }.call("vkGetSwapchainImagesKHR")
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        unsafe { self.device.device.create_image_view(info, None) }.call("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) }
    }
}

/// Surface's current extent when defined, else the window size clamped to the surface limits.
///
/// A zero-area window is returned unclamped so a minimized window still defers.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else if window.width == 0 || window.height == 0 {
        window
    } else {
        vk::Extent2D {
            width: window.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum unless it is 0 (unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// One live swapchain
#[derive(Debug, Clone, Copy)]
pub struct SwapchainGeneration {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    /// 1 for the first chain, incremented per recreation
    pub generation: u64,
    /// Set when a recreation using this chain as `old_swapchain` failed
    retired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Recreated,
    /// Zero-area extent (minimized window); the current chain was kept
    Deferred,
}

pub struct SwapchainManager<D: PresentationDriver = VulkanPresenter> {
    driver: D,
    config: SurfaceConfiguration,
    queues: QueueFamilyAssignment,
    current: Option<SwapchainGeneration>,
    image_views: Vec<vk::ImageView>,
    generations: u64,
}

impl<D: PresentationDriver> SwapchainManager<D> {
    pub fn new(driver: D, config: SurfaceConfiguration, queues: QueueFamilyAssignment) -> Self {
        Self {
            driver,
            config,
            queues,
            current: None,
            image_views: Vec::new(),
            generations: 0,
        }
    }

    /// Create the first chain, or replace the current one for the surface's new geometry
    pub fn create_or_recreate(&mut self, window_extent: vk::Extent2D) -> Result<ResizeOutcome> {
        let caps = self.driver.surface_capabilities()?;

        let extent = choose_extent(&caps, window_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!(
                "Deferring swapchain creation: extent {}x{}",
                extent.width,
                extent.height
            );
            return Ok(ResizeOutcome::Deferred);
        }

        let image_count = choose_image_count(&caps);
        let old_swapchain = match self.current {
            Some(current) if !current.retired => current.handle,
            _ => vk::SwapchainKHR::null(),
        };

        let families = self.queues.unique_families();
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.driver.surface())
            .min_image_count(image_count)
            .image_format(self.config.format.format)
            .image_color_space(self.config.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(self.queues.sharing_mode())
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        if !self.queues.is_shared() {
            create_info = create_info.queue_family_indices(&families);
        }

        let handle = match self.driver.create_swapchain(&create_info) {
            Ok(handle) => handle,
            Err(e) => {
                // The driver retires `old_swapchain` even when creation fails
                if let Some(current) = self.current.as_mut() {
                    current.retired |= old_swapchain != vk::SwapchainKHR::null();
                }
                return Err(e);
            }
        };

        // Views reference the prior chain's images, so they go first
        self.release_image_views();
        if let Some(prior) = self.current.take() {
            self.driver.destroy_swapchain(prior.handle);
        }

        self.generations += 1;
        self.current = Some(SwapchainGeneration {
            handle,
            extent,
            min_image_count: image_count,
            generation: self.generations,
            retired: false,
        });

        log::info!(
            "Created swapchain generation {}: {}x{}, {} image(s) requested, {:?}",
            self.generations,
            extent.width,
            extent.height,
            image_count,
            self.queues.sharing_mode()
        );

        Ok(ResizeOutcome::Recreated)
    }

    /// Extent a recreation for `window_extent` would use right now
    pub fn target_extent(&self, window_extent: vk::Extent2D) -> Result<vk::Extent2D> {
        let caps = self.driver.surface_capabilities()?;
        Ok(choose_extent(&caps, window_extent))
    }

    /// Replace the per-image views with fresh ones for the current chain
    pub fn rebuild_image_views(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        let images = self.driver.swapchain_images(current.handle)?;
        self.release_image_views();

        self.image_views = create_image_views(&self.driver, &images, self.config.format.format)?;

        log::debug!("Created {} swapchain image view(s)", self.image_views.len());
        Ok(())
    }

    /// Bring the chain in line with the window's current size
    pub fn on_window_resize(&mut self, window: &dyn Window) -> Result<ResizeOutcome> {
        let window_extent = vk::Extent2D {
            width: window.width(),
            height: window.height(),
        };

        let outcome = self.create_or_recreate(window_extent)?;
        if outcome == ResizeOutcome::Recreated {
            self.rebuild_image_views()?;
        }
        Ok(outcome)
    }

    fn release_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            self.driver.destroy_image_view(view);
        }
    }

    pub fn current(&self) -> Option<&SwapchainGeneration> {
        self.current.as_ref()
    }

    /// Extent of the live chain, or an empty extent before the first one
    pub fn extent(&self) -> vk::Extent2D {
        self.current.map(|c| c.extent).unwrap_or_default()
    }

    pub fn format(&self) -> vk::Format {
        self.config.format.format
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[cfg(test)]
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: PresentationDriver> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        self.release_image_views();
        if let Some(current) = self.current.take() {
            self.driver.destroy_swapchain(current.handle);
        }
    }
}

/// One 2-D color view per image; already created views are destroyed on failure
fn create_image_views<D: PresentationDriver>(
    driver: &D,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        match driver.create_image_view(&create_info) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views.drain(..) {
                    driver.destroy_image_view(view);
                }
                return Err(e);
            }
        }
    }

    Ok(views)
}
