// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode. The vertex/fragment pair is read through
// the asset layer, validated, and wrapped in modules that are destroyed with
// the owning `ShaderStages`.

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::LogicalDevice;
use crate::assets::{self, ShaderPaths};
use crate::error::{RendererError, Result, VkResultExt};

const ENTRY_POINT: &CStr = c"main";

/// Decode SPIR-V bytecode into words, rejecting empty or misaligned input
pub fn decode_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RendererError::Shader {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }

    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| RendererError::Shader {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = assets::load_file(path).map_err(|e| RendererError::Shader {
        path: path.to_path_buf(),
        reason: format!("{:#}", e),
    })?;
    decode_spirv(path, &bytes)
}

/// Vertex + fragment modules for one program
pub struct ShaderStages {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    device: Arc<LogicalDevice>,
}

impl ShaderStages {
    /// Load both stages; nothing is created unless both files decode
    pub fn load(device: &Arc<LogicalDevice>, paths: &ShaderPaths) -> Result<Self> {
        let vertex_code = read_spirv(&paths.vertex)?;
        let fragment_code = read_spirv(&paths.fragment)?;

        let vertex = create_shader_module(device, &vertex_code)?;
        let fragment = match create_shader_module(device, &fragment_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        log::info!(
            "Loaded shaders {:?} ({} words) and {:?} ({} words)",
            paths.vertex,
            vertex_code.len(),
            paths.fragment,
            fragment_code.len()
        );

        Ok(Self {
            vertex,
            fragment,
            device: Arc::clone(device),
        })
    }

    /// Stage descriptions for pipeline creation, both entering at `main`
    pub fn stage_infos(&self) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
        [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment)
                .name(ENTRY_POINT),
        ]
    }
}

impl Drop for ShaderStages {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.fragment, None);
            self.device.device.destroy_shader_module(self.vertex, None);
        }
    }
}

fn create_shader_module(device: &LogicalDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.device.create_shader_module(&create_info, None) }.call("vkCreateShaderModule")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian_words() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = decode_spirv(Path::new("main.vert.spv"), &bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
    }

    #[test]
    fn empty_bytecode_is_an_asset_error() {
        let err = decode_spirv(Path::new("main.frag.spv"), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Asset);
        assert!(err.to_string().contains("main.frag.spv"));
    }

    #[test]
    fn misaligned_bytecode_is_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0xFF);
        let err = decode_spirv(Path::new("odd.spv"), &bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Asset);
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let err = read_spirv(Path::new("assets/none/missing.vert.spv")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Asset);
    }
}
