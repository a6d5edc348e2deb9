// Renderer error taxonomy
//
// Setup failures are fatal for the caller; transient failures (resize path)
// can be retried on the next resize or frame.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

/// Broad classification used to decide between aborting and retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required layer/extension/feature/format/queue family is absent
    Capability,
    /// A Vulkan (or allocator) call reported a non-success status
    Api,
    /// An enumeration returned zero candidates
    Exhaustion,
    /// Shader bytecode could not be loaded
    Asset,
    /// Surface geometry changed under us; try again later
    Transient,
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Required instance layer {0} is not available")]
    MissingLayer(String),

    #[error("Required instance extension {0} is not available")]
    MissingInstanceExtension(String),

    #[error("No Vulkan-capable GPU found")]
    NoPhysicalDevices,

    #[error("No GPU satisfies the renderer requirements")]
    NoSuitableDevice,

    #[error("Surface reports no formats or present modes")]
    NoSurfaceFormats,

    #[error("No depth format supports depth/stencil attachment use")]
    NoDepthFormat,

    #[error("Shader {path:?}: {reason}")]
    Shader { path: PathBuf, reason: String },

    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Surface extent {width}x{height} cannot back a swapchain")]
    DegenerateExtent { width: u32, height: u32 },
}

impl RendererError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingLayer(_)
            | Self::MissingInstanceExtension(_)
            | Self::NoSuitableDevice
            | Self::NoSurfaceFormats
            | Self::NoDepthFormat => ErrorKind::Capability,
            Self::NoPhysicalDevices => ErrorKind::Exhaustion,
            Self::Shader { .. } => ErrorKind::Asset,
            Self::DegenerateExtent { .. } => ErrorKind::Transient,
            Self::Vulkan { result, .. } if *result == vk::Result::ERROR_OUT_OF_DATE_KHR => {
                ErrorKind::Transient
            }
            Self::Loading(_) | Self::WindowHandle(_) | Self::Vulkan { .. } | Self::Allocation(_) => {
                ErrorKind::Api
            }
        }
    }

    /// Whether the resize path may retry instead of giving up
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Attach the failing Vulkan entry point to a raw `vk::Result`
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn call(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RendererError::Vulkan { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_transient() {
        let err: Result<()> = Err(vk::Result::ERROR_OUT_OF_DATE_KHR).call("vkCreateSwapchainKHR");
        let err = err.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_transient());
        assert!(err.to_string().contains("vkCreateSwapchainKHR"));
    }

    #[test]
    fn device_loss_is_fatal() {
        let err: Result<()> = Err(vk::Result::ERROR_DEVICE_LOST).call("vkDeviceWaitIdle");
        assert_eq!(err.unwrap_err().kind(), ErrorKind::Api);
    }

    #[test]
    fn negotiation_failures_are_classified() {
        assert_eq!(
            RendererError::MissingLayer("VK_LAYER_KHRONOS_validation".into()).kind(),
            ErrorKind::Capability
        );
        assert_eq!(RendererError::NoPhysicalDevices.kind(), ErrorKind::Exhaustion);
        assert_eq!(RendererError::NoDepthFormat.kind(), ErrorKind::Capability);
        assert!(RendererError::DegenerateExtent { width: 0, height: 720 }.is_transient());
    }
}
