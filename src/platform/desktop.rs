// Desktop window backend (winit)
//
// The event loop is pumped on demand instead of owning the main loop, so the
// window can honour the poll-style `Window` contract.

use anyhow::{Context, Result};
use raw_window_handle::{HandleError, HasDisplayHandle, HasWindowHandle};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{WindowAttributes, WindowId},
};

use super::registry::Registration;
use super::{NativeHandles, Window, WindowDesc};

/// Pumps before giving up on the platform delivering `resumed`
const CREATE_ATTEMPTS: usize = 64;

pub type EventPump = Rc<RefCell<EventLoop<()>>>;

pub fn event_pump() -> Result<EventPump> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    Ok(Rc::new(RefCell::new(event_loop)))
}

#[derive(Default)]
struct WindowState {
    pending: Option<WindowAttributes>,
    window: Option<winit::window::Window>,
    size: PhysicalSize<u32>,
    wants_to_close: bool,
    resized: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.pending.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => {
                self.size = window.inner_size();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.wants_to_close = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.wants_to_close = true;
            }
            WindowEvent::Resized(size) => {
                if size != self.size {
                    log::debug!("Window resized to {}x{}", size.width, size.height);
                    self.size = size;
                    self.resized = true;
                }
            }
            _ => {}
        }
    }
}

pub struct DesktopWindow {
    pump: EventPump,
    state: WindowState,
    _registration: Registration,
}

impl DesktopWindow {
    pub fn create(pump: &EventPump, registration: Registration, desc: &WindowDesc) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(desc.title.clone())
            .with_inner_size(PhysicalSize::new(desc.width, desc.height))
            .with_resizable(desc.resizable);

        let mut window = Self {
            pump: Rc::clone(pump),
            state: WindowState {
                pending: Some(attributes),
                ..Default::default()
            },
            _registration: registration,
        };

        for _ in 0..CREATE_ATTEMPTS {
            window.poll_events();
            if window.state.window.is_some() || window.state.wants_to_close {
                break;
            }
        }

        if window.state.window.is_none() {
            anyhow::bail!("Window '{}' was not created by the event loop", desc.title);
        }

        log::info!(
            "Window '{}' created: {}x{}",
            desc.title,
            window.width(),
            window.height()
        );
        Ok(window)
    }
}

impl Window for DesktopWindow {
    fn wants_to_close(&self) -> bool {
        self.state.wants_to_close
    }

    fn poll_events(&mut self) {
        let status = self
            .pump
            .borrow_mut()
            .pump_app_events(Some(Duration::ZERO), &mut self.state);

        if let PumpStatus::Exit(code) = status {
            log::info!("Event loop exited with code {}", code);
            self.state.wants_to_close = true;
        }
    }

    fn width(&self) -> u32 {
        self.state.size.width
    }

    fn height(&self) -> u32 {
        self.state.size.height
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn native_handles(&self) -> Result<NativeHandles, HandleError> {
        let window = self.state.window.as_ref().ok_or(HandleError::Unavailable)?;
        Ok(NativeHandles {
            display: window.display_handle()?.as_raw(),
            window: window.window_handle()?.as_raw(),
        })
    }
}
