// Platform layer - window capability consumed by the renderer
//
// The renderer only sees the `Window` trait. The concrete backend is picked
// at build time by `create_window`; each backend lives in its own module.

pub mod registry;

#[cfg(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod desktop;
#[cfg(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
use desktop as backend;

#[cfg(not(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
compile_error!("Unsupported platform: no window backend for this target");

use anyhow::Result;
use raw_window_handle::{HandleError, RawDisplayHandle, RawWindowHandle};
use registry::WindowRegistry;
use std::sync::Arc;

use crate::config::WindowConfig;

/// Raw handles a presentation surface is created from
#[derive(Debug, Clone, Copy)]
pub struct NativeHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

/// What the renderer needs from a window
pub trait Window {
    fn wants_to_close(&self) -> bool;

    /// Drain and dispatch pending events without blocking
    fn poll_events(&mut self);

    /// Client-area width in pixels
    fn width(&self) -> u32;

    /// Client-area height in pixels
    fn height(&self) -> u32;

    /// Returns true once per size change since the last call
    fn take_resized(&mut self) -> bool;

    fn native_handles(&self) -> Result<NativeHandles, HandleError>;
}

#[derive(Debug, Clone)]
pub struct WindowDesc {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
}

impl From<&WindowConfig> for WindowDesc {
    fn from(config: &WindowConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            title: config.title.clone(),
            resizable: config.resizable,
        }
    }
}

/// Windowing subsystem.
///
/// Create it once, before any window, and drop it after the last window is
/// gone. It owns the platform event pump and the window registry.
pub struct Windowing {
    pump: backend::EventPump,
    registry: Arc<WindowRegistry>,
}

impl Windowing {
    pub fn init() -> Result<Self> {
        let pump = backend::event_pump()?;
        let registry = WindowRegistry::new(
            || log::debug!("Window class registered"),
            || log::debug!("Window class unregistered"),
        );
        Ok(Self { pump, registry })
    }
}

impl Drop for Windowing {
    fn drop(&mut self) {
        let live = self.registry.live_windows();
        if live != 0 {
            log::warn!("Windowing shut down with {} live window(s)", live);
        }
    }
}

/// Create a window with the backend selected for this build target
pub fn create_window(windowing: &Windowing, desc: &WindowDesc) -> Result<Box<dyn Window>> {
    let registration = windowing.registry.acquire();
    let window = backend::DesktopWindow::create(&windowing.pump, registration, desc)?;
    Ok(Box::new(window))
}
