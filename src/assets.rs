// Asset layout and file loading
//
// Shader bytecode lives at `<asset_root>/<base>.vert.spv` and
// `<asset_root>/<base>.frag.spv`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Paths of the vertex/fragment SPIR-V pair for one shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderPaths {
    pub fn new(asset_root: &Path, base: &str) -> Self {
        let base = asset_root.join(base);
        Self {
            vertex: with_suffix(&base, ".vert.spv"),
            fragment: with_suffix(&base, ".frag.spv"),
        }
    }

    /// Directory that holds both stages (watched for hot reload)
    pub fn directory(&self) -> &Path {
        self.vertex.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Read a whole file into memory
pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to open {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shader_paths_append_stage_suffixes() {
        let paths = ShaderPaths::new(Path::new("assets"), "shaders/main");
        assert_eq!(paths.vertex, PathBuf::from("assets/shaders/main.vert.spv"));
        assert_eq!(paths.fragment, PathBuf::from("assets/shaders/main.frag.spv"));
        assert_eq!(paths.directory(), Path::new("assets/shaders"));
    }

    #[test]
    fn dotted_base_names_are_preserved() {
        let paths = ShaderPaths::new(Path::new("root"), "post.fx");
        assert_eq!(paths.vertex, PathBuf::from("root/post.fx.vert.spv"));
    }

    #[test]
    fn load_file_reads_bytes() {
        let path = std::env::temp_dir().join(format!("brick-assets-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();
        assert_eq!(load_file(&path).unwrap(), vec![1, 2, 3, 4]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_file_reports_missing_path() {
        let err = load_file(Path::new("no/such/shader.vert.spv")).unwrap_err();
        assert!(err.to_string().contains("shader.vert.spv"));
    }
}
