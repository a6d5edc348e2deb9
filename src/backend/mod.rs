// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Each child object holds an `Arc` to its
// parent, so destruction order follows ownership rather than convention.

pub mod device;
pub mod instance;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod targets;

pub use device::LogicalDevice;
pub use instance::{InstanceContext, API_VERSION_FLOOR};
pub use pipeline::{GraphicsPipeline, RenderPass};
pub use shader::ShaderStages;
pub use surface::PresentationSurface;
pub use swapchain::{ResizeOutcome, SwapchainManager, VulkanPresenter};
pub use targets::RenderTargets;
