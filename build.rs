// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADER_DIR: &str = "assets/shaders";
const SHADERS: [&str; 2] = ["main.vert", "main.frag"];

fn main() {
    println!("cargo:rerun-if-changed={}", SHADER_DIR);

    // Compile shaders using glslc (part of Vulkan SDK)
    for shader in SHADERS {
        let input = Path::new(SHADER_DIR).join(shader);
        let output = Path::new(SHADER_DIR).join(format!("{}.spv", shader));
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}); {} was not compiled", e, input.display());
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input.display(), output.display());
        }
    }
}
