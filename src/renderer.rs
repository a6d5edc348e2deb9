// Renderer - owns every GPU object and drives the setup/resize lifecycle
//
// Field order is drop order: pipeline and per-extent targets go first, the
// instance last. Parent objects are additionally kept alive by the `Arc`s
// their children hold.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use crate::assets::ShaderPaths;
use crate::backend::pipeline::{choose_depth_format, DEPTH_FORMAT_CANDIDATES};
use crate::backend::selector::{select_physical_device, DeviceRequirements};
use crate::backend::surface::{create_surface, required_extensions};
use crate::backend::{
    GraphicsPipeline, InstanceContext, LogicalDevice, PresentationSurface, RenderPass, RenderTargets,
    ResizeOutcome, ShaderStages, SwapchainManager, VulkanPresenter,
};
use crate::config::Config;
use crate::error::Result;
use crate::platform::Window;

const DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Lifecycle stage of the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    InstanceReady,
    DeviceReady,
    SwapchainReady,
    PipelineReady,
    Failed,
}

impl RendererState {
    /// Setup moves strictly forward; a resize re-enters `SwapchainReady`.
    /// Any live state may fail, and `Failed` is terminal.
    pub fn can_advance_to(self, next: RendererState) -> bool {
        use RendererState::*;
        match (self, next) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Uninitialized, InstanceReady)
            | (InstanceReady, DeviceReady)
            | (DeviceReady, SwapchainReady)
            | (SwapchainReady, PipelineReady)
            | (PipelineReady, SwapchainReady) => true,
            _ => false,
        }
    }
}

fn advance(state: &mut RendererState, next: RendererState) {
    if state.can_advance_to(next) {
        log::debug!("Renderer state: {:?} -> {:?}", state, next);
    } else {
        log::warn!("Unexpected renderer transition {:?} -> {:?}", state, next);
    }
    *state = next;
}

pub struct Renderer {
    pipeline: GraphicsPipeline,
    targets: Option<RenderTargets>,
    render_pass: RenderPass,
    swapchain: SwapchainManager<VulkanPresenter>,
    _shaders: ShaderStages,
    device: Arc<LogicalDevice>,
    _surface: Arc<PresentationSurface>,
    instance: Arc<InstanceContext>,
    shader_paths: ShaderPaths,
    state: RendererState,
}

impl Renderer {
    /// Build the full object graph for `window`, which must outlive the renderer
    pub fn new(config: &Config, window: &dyn Window) -> Result<Self> {
        let mut state = RendererState::Uninitialized;
        Self::build(config, window, &mut state).inspect_err(|e| {
            log::error!("Renderer setup failed in {:?}: {}", state, e);
            advance(&mut state, RendererState::Failed);
        })
    }

    fn build(config: &Config, window: &dyn Window, state: &mut RendererState) -> Result<Self> {
        let handles = window.native_handles()?;
        let instance_extensions = required_extensions(handles.display)?;
        let instance = InstanceContext::new(
            &config.window.title,
            &instance_extensions,
            config.validation_enabled(),
        )?;
        advance(state, RendererState::InstanceReady);

        let surface = create_surface(&instance, window)?;
        let requirements = DeviceRequirements::new(&DEVICE_EXTENSIONS);
        let selected = select_physical_device(&instance, &surface, &requirements)?;
        let device = LogicalDevice::new(&instance, &selected.descriptor, selected.queues, &DEVICE_EXTENSIONS)?;
        log::debug!(
            "Graphics queue {:?}, present queue {:?}",
            device.graphics_queue,
            device.present_queue
        );
        advance(state, RendererState::DeviceReady);

        let shader_paths = ShaderPaths::new(&config.graphics.asset_root, &config.graphics.shader_base);
        let shaders = ShaderStages::load(&device, &shader_paths)?;

        let mut swapchain = SwapchainManager::new(
            VulkanPresenter::new(&device, &surface),
            selected.surface,
            selected.queues,
        );
        if swapchain.on_window_resize(window)? == ResizeOutcome::Deferred {
            log::warn!("Window has no visible area; swapchain creation deferred");
        }
        advance(state, RendererState::SwapchainReady);

        let depth_format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            device.format_properties(format)
        })?;
        let render_pass = RenderPass::new(&device, swapchain.format(), depth_format)?;
        let pipeline = GraphicsPipeline::new(&device, &render_pass, &shaders)?;

        let targets = match swapchain.current() {
            Some(_) => Some(RenderTargets::new(
                &device,
                &render_pass,
                swapchain.image_views(),
                swapchain.extent(),
            )?),
            None => None,
        };
        advance(state, RendererState::PipelineReady);

        log::info!("Renderer ready");

        Ok(Self {
            pipeline,
            targets,
            render_pass,
            swapchain,
            _shaders: shaders,
            device,
            _surface: surface,
            instance,
            shader_paths,
            state: *state,
        })
    }

    /// Recreate the swapchain and its dependent targets for the window's new size.
    ///
    /// Transient errors leave the renderer usable and may be retried; any
    /// other error moves it to `Failed`.
    pub fn on_window_resize(&mut self, window: &dyn Window) -> Result<ResizeOutcome> {
        self.resize(window).inspect_err(|e| {
            if !e.is_transient() {
                advance(&mut self.state, RendererState::Failed);
            }
        })
    }

    fn resize(&mut self, window: &dyn Window) -> Result<ResizeOutcome> {
        let window_extent = vk::Extent2D {
            width: window.width(),
            height: window.height(),
        };
        let extent = self.swapchain.target_extent(window_extent)?;
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Resize deferred: window has no visible area");
            return Ok(ResizeOutcome::Deferred);
        }

        self.device.wait_idle()?;

        // Framebuffers reference the views about to be replaced
        self.targets = None;
        advance(&mut self.state, RendererState::SwapchainReady);

        let outcome = self.swapchain.on_window_resize(window)?;
        if self.swapchain.current().is_some() {
            self.targets = Some(RenderTargets::new(
                &self.device,
                &self.render_pass,
                self.swapchain.image_views(),
                self.swapchain.extent(),
            )?);
        }
        advance(&mut self.state, RendererState::PipelineReady);

        Ok(outcome)
    }

    /// Reload the shader pair and rebuild the pipeline against the existing
    /// render pass. On error the previous pipeline stays in place.
    pub fn reload_shaders(&mut self) -> Result<()> {
        let shaders = ShaderStages::load(&self.device, &self.shader_paths)?;
        let pipeline = GraphicsPipeline::new(&self.device, &self.render_pass, &shaders)?;

        self.device.wait_idle()?;
        self.pipeline = pipeline;
        self._shaders = shaders;

        log::info!("Shaders reloaded (pipeline {:?})", self.pipeline.pipeline);
        Ok(())
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn shader_paths(&self) -> &ShaderPaths {
        &self.shader_paths
    }

    pub fn swapchain(&self) -> &SwapchainManager<VulkanPresenter> {
        &self.swapchain
    }

    /// Depth attachment and framebuffers for the live chain, if one exists
    pub fn targets(&self) -> Option<&RenderTargets> {
        self.targets.as_ref()
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RendererState::*;

    const ALL: [RendererState; 6] = [
        Uninitialized,
        InstanceReady,
        DeviceReady,
        SwapchainReady,
        PipelineReady,
        Failed,
    ];

    #[test]
    fn setup_advances_one_stage_at_a_time() {
        let path = [Uninitialized, InstanceReady, DeviceReady, SwapchainReady, PipelineReady];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(!Uninitialized.can_advance_to(DeviceReady));
        assert!(!InstanceReady.can_advance_to(PipelineReady));
        assert!(!DeviceReady.can_advance_to(InstanceReady));
    }

    #[test]
    fn resize_reenters_swapchain_stage() {
        assert!(PipelineReady.can_advance_to(SwapchainReady));
        assert!(SwapchainReady.can_advance_to(PipelineReady));
        assert!(!PipelineReady.can_advance_to(DeviceReady));
    }

    #[test]
    fn any_live_state_may_fail() {
        for state in ALL.into_iter().filter(|s| *s != Failed) {
            assert!(state.can_advance_to(Failed), "{:?}", state);
        }
    }

    #[test]
    fn failed_is_terminal() {
        for next in ALL {
            assert!(!Failed.can_advance_to(next), "{:?}", next);
        }
    }

    #[test]
    fn advance_records_the_new_state() {
        let mut state = Uninitialized;
        advance(&mut state, InstanceReady);
        assert_eq!(state, InstanceReady);
        advance(&mut state, Failed);
        assert_eq!(state, Failed);
    }
}
