// Render targets - per-swapchain-generation attachments
//
// The depth image and framebuffers depend on the swapchain extent and views,
// so they are rebuilt after every successful swapchain recreation.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::{AllocationError, MemoryLocation};
use std::sync::Arc;

use super::pipeline::RenderPass;
use super::LogicalDevice;
use crate::error::{RendererError, Result, VkResultExt};

/// Aspects a view of `format` needs to serve as the depth/stencil attachment
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Device-local, optimally tiled allocation request for the depth image
fn depth_allocation_desc(requirements: vk::MemoryRequirements) -> AllocationCreateDesc<'static> {
    AllocationCreateDesc {
        name: "depth attachment",
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }
}

/// Depth attachment plus one framebuffer per swapchain image view
pub struct RenderTargets {
    framebuffers: Vec<vk::Framebuffer>,
    depth_view: vk::ImageView,
    depth_image: vk::Image,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    device: Arc<LogicalDevice>,
}

impl RenderTargets {
    pub fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &RenderPass,
        color_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RendererError::DegenerateExtent {
                width: extent.width,
                height: extent.height,
            });
        }

        // Anything created below is released by Drop if a later step fails
        let mut targets = Self {
            framebuffers: Vec::with_capacity(color_views.len()),
            depth_view: vk::ImageView::null(),
            depth_image: vk::Image::null(),
            allocation: None,
            extent,
            device: Arc::clone(device),
        };

        targets.create_depth(render_pass.depth_format)?;
        for &color_view in color_views {
            let framebuffer = targets.create_framebuffer(render_pass, color_view)?;
            targets.framebuffers.push(framebuffer);
        }

        log::debug!(
            "Created render targets: {}x{}, {} framebuffer(s)",
            extent.width,
            extent.height,
            targets.framebuffers.len()
        );

        Ok(targets)
    }

    fn create_depth(&mut self, format: vk::Format) -> Result<()> {
        let device = &self.device.device;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        self.depth_image = unsafe { device.create_image(&image_info, None) }.call("vkCreateImage")?;

        let requirements = unsafe { device.get_image_memory_requirements(self.depth_image) };
        let allocation = self
            .device
            .allocator()
            .as_mut()
            .ok_or_else(|| AllocationError::Internal("allocator already released".to_string()))?
            .allocate(&depth_allocation_desc(requirements))?;

        let bind = unsafe { device.bind_image_memory(self.depth_image, allocation.memory(), allocation.offset()) };
        self.allocation = Some(allocation);
        bind.call("vkBindImageMemory")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.depth_image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: depth_aspect(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        self.depth_view = unsafe { device.create_image_view(&view_info, None) }.call("vkCreateImageView")?;
        Ok(())
    }

    fn create_framebuffer(&self, render_pass: &RenderPass, color_view: vk::ImageView) -> Result<vk::Framebuffer> {
        let attachments = [color_view, self.depth_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle)
            .attachments(&attachments)
            .width(self.extent.width)
            .height(self.extent.height)
            .layers(1);

        unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }.call("vkCreateFramebuffer")
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_image_view(self.depth_view, None);
            device.destroy_image(self.depth_image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.device.allocator().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free depth attachment memory: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn depth_only_formats_use_depth_aspect() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth_aspect(vk::Format::D16_UNORM), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn depth_memory_is_device_local_and_optimal() {
        let requirements = vk::MemoryRequirements {
            size: 1280 * 720 * 4,
            alignment: 256,
            memory_type_bits: 0b1010,
        };
        let desc = depth_allocation_desc(requirements);

        assert_eq!(desc.name, "depth attachment");
        assert_eq!(
            (desc.requirements.size, desc.requirements.alignment, desc.requirements.memory_type_bits),
            (1280 * 720 * 4, 256, 0b1010)
        );
        assert_eq!(desc.location, MemoryLocation::GpuOnly);
        assert!(!desc.linear);
        assert!(matches!(desc.allocation_scheme, AllocationScheme::GpuAllocatorManaged));
    }

    #[test]
    fn combined_formats_include_stencil() {
        for format in [vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT] {
            assert_eq!(
                depth_aspect(format),
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            );
        }
    }
}
