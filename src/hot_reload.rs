// =============================================================================
// SHADER HOT RELOAD - Watch the shader directory for new bytecode
// =============================================================================

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Watches one directory and reports when compiled shaders change
pub struct ShaderWatcher {
    events: mpsc::Receiver<notify::Result<Event>>,
    directory: PathBuf,
    // Dropping the watcher stops delivery
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(directory: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", directory))?;

        log::info!("Watching {:?} for shader changes", directory);

        Ok(Self {
            events: rx,
            directory: directory.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// Drain pending events; true if any SPIR-V file was written or created
    pub fn poll(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(event) if is_bytecode_change(&event) => {
                    log::debug!("Shader change: {:?}", event.paths);
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => log::warn!("File watcher error in {:?}: {}", self.directory, e),
            }
        }
        changed
    }
}

pub fn is_bytecode_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "spv"))
}
