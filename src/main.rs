// =============================================================================
// BRICK RENDERER - Vulkan initialization and resize lifecycle
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Windowing (event pump + window registry)                       │
// │    └── Window (winit desktop backend)                           │
// │          └── Renderer                                           │
// │                ├── Instance + debug messenger                   │
// │                ├── Surface                                      │
// │                ├── Logical device (queues, allocator)           │
// │                ├── Swapchain manager (views, recreation)        │
// │                ├── Render pass + graphics pipeline              │
// │                └── Render targets (depth, framebuffers)         │
// └─────────────────────────────────────────────────────────────────┘
//
// LOOP:
// 1. Pump window events
// 2. On resize, recreate the swapchain and render targets
// 3. On shader bytecode change, rebuild the pipeline
//
// =============================================================================

mod assets;
mod backend;
mod config;
mod error;
mod hot_reload;
mod platform;
mod renderer;

use anyhow::{Context, Result};
use config::Config;
use hot_reload::ShaderWatcher;
use platform::{WindowDesc, Windowing};
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use crate::backend::ResizeOutcome;

const IDLE_INTERVAL: Duration = Duration::from_millis(16);

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    // Load configuration from config.toml
    let (config, load_error) = Config::load();

    init_logging(&config);
    if let Some(e) = load_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::debug!("Config: {:?}", config);
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable { "resizable" } else { "fixed" }
    );

    if let Err(e) = run(&config) {
        log::error!("FATAL: {:#}", e);
        std::process::exit(1);
    }

    log::info!("Shutdown complete");
}

fn run(config: &Config) -> Result<()> {
    let windowing = Windowing::init()?;
    let mut window = platform::create_window(&windowing, &WindowDesc::from(&config.window))?;

    let mut renderer = Renderer::new(config, window.as_ref()).context("Failed to initialize renderer")?;

    log::info!(
        "Renderer state {:?}, validation {}",
        renderer.state(),
        if renderer.instance().validation_enabled() { "on" } else { "off" }
    );

    let watcher = if config.hot_reload.enabled {
        match ShaderWatcher::new(renderer.shader_paths().directory()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Shader hot reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let mut resize_pending = false;

    while !window.wants_to_close() {
        window.poll_events();

        resize_pending |= window.take_resized();
        if resize_pending {
            match renderer.on_window_resize(window.as_ref()) {
                Ok(ResizeOutcome::Recreated) => {
                    if let Some(chain) = renderer.swapchain().current() {
                        log::info!(
                            "Resized to {}x{} (swapchain generation {}, {} images requested, {} framebuffers)",
                            chain.extent.width,
                            chain.extent.height,
                            chain.generation,
                            chain.min_image_count,
                            renderer.targets().map_or(0, |t| t.framebuffers().len())
                        );
                    }
                    resize_pending = false;
                }
                Ok(ResizeOutcome::Deferred) => resize_pending = false,
                Err(e) if e.is_transient() => log::warn!("Resize will be retried: {}", e),
                Err(e) => return Err(e).context("Swapchain recreation failed"),
            }
        }

        if watcher.as_ref().is_some_and(|w| w.poll()) {
            if let Err(e) = renderer.reload_shaders() {
                log::warn!("Shader reload failed, keeping previous pipeline: {}", e);
            }
        }

        std::thread::sleep(IDLE_INTERVAL);
    }

    log::info!("Window closed");
    Ok(())
}

// =============================================================================
// LOGGING
// =============================================================================

fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    // Configured level first so RUST_LOG can override it
    let level = config.log_level();
    let mut builder = Builder::new();
    builder.filter_level(level.unwrap_or(log::LevelFilter::Info));
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== {} Log ===", config.window.title);
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();

    if level.is_none() {
        log::warn!("Unknown log level '{}', defaulting to info", config.debug.log_level);
    }
}
