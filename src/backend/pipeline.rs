// Graphics pipeline creation and management
//
// The render pass and pipeline are built once and survive swapchain
// recreation: viewport and scissor are dynamic state, so nothing here
// depends on the swapchain extent.

use ash::vk;
use std::sync::Arc;

use super::shader::ShaderStages;
use super::LogicalDevice;
use crate::error::{RendererError, Result, VkResultExt};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// First candidate whose linear or optimal tiling supports depth/stencil attachment use
pub fn choose_depth_format(
    candidates: &[vk::Format],
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            let required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            props.linear_tiling_features.contains(required)
                || props.optimal_tiling_features.contains(required)
        })
        .ok_or(RendererError::NoDepthFormat)
}

/// Viewport covering `extent`, flipped so +Y points up
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Color (presented) and depth (discarded) attachments, both cleared on load
fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    [color, depth]
}

fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub depth_format: vk::Format,
    device: Arc<LogicalDevice>,
}

impl RenderPass {
    /// Single-subpass pass writing one color and one depth attachment
    pub fn new(
        device: &Arc<LogicalDevice>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let attachments = attachment_descriptions(color_format, depth_format);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];
        let dependencies = [external_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.device.create_render_pass(&create_info, None) }
            .call("vkCreateRenderPass")?;

        log::info!(
            "Created render pass (color {:?}, depth {:?})",
            color_format,
            depth_format
        );

        Ok(Self {
            handle,
            depth_format,
            device: Arc::clone(device),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) }
    }
}

/// Graphics pipeline plus its (empty) layout
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<LogicalDevice>,
}

impl GraphicsPipeline {
    pub fn new(device: &Arc<LogicalDevice>, render_pass: &RenderPass, shaders: &ShaderStages) -> Result<Self> {
        let stages = shaders.stage_infos();

        // Vertices come from gl_VertexIndex; no vertex buffers
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the values are set at record time
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .alpha_to_coverage_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .call("vkCreatePipelineLayout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0);

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((pipelines, result)) => {
                unsafe {
                    for pipeline in pipelines.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                        device.device.destroy_pipeline(pipeline, None);
                    }
                    device.device.destroy_pipeline_layout(layout, None);
                }
                return Err(RendererError::Vulkan {
                    call: "vkCreateGraphicsPipelines",
                    result,
                });
            }
        };

        log::info!("Created graphics pipeline");

        Ok(Self {
            pipeline,
            layout,
            device: Arc::clone(device),
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
