//! SPIR-V loading and shader modules
//!
//! Binaries are read from disk once into [`ShaderCode`]. Modules are cheap to make
//! and only live for the duration of a pipeline build, so a [`ShaderModule`] is
//! created from the cached words every time a pipeline is (re)built.

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::context::{VulkanError, VulkanResult};
use crate::config::ShaderPaths;

/// SPIR-V magic number in host byte order
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point used by every stage
pub const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Validated SPIR-V words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCode {
    words: Vec<u32>,
    origin: PathBuf,
}

impl ShaderCode {
    /// Parse SPIR-V from raw bytes; `origin` names the source in error messages
    pub fn from_bytes(bytes: &[u8], origin: impl Into<PathBuf>) -> VulkanResult<Self> {
        let origin = origin.into();
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::Shader(format!("{}: {e}", origin.display())))?;

        match words.first() {
            Some(&SPIRV_MAGIC) => Ok(Self { words, origin }),
            _ => Err(VulkanError::Shader(format!("{}: missing SPIR-V magic number", origin.display()))),
        }
    }

    /// Read and parse a `.spv` file
    pub fn load(path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| VulkanError::Shader(format!("failed to read {}: {e}", path.display())))?;
        Self::from_bytes(&bytes, path)
    }

    /// SPIR-V words
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Where the code came from
    pub fn origin(&self) -> &Path {
        &self.origin
    }
}

/// Vertex and fragment code for both passes
#[derive(Debug, Clone)]
pub struct ShaderSet {
    /// Geometry pass vertex stage
    pub geometry_vertex: ShaderCode,
    /// Geometry pass fragment stage
    pub geometry_fragment: ShaderCode,
    /// Lighting pass vertex stage
    pub lighting_vertex: ShaderCode,
    /// Lighting pass fragment stage
    pub lighting_fragment: ShaderCode,
}

impl ShaderSet {
    /// Load all four binaries
    pub fn load(paths: &ShaderPaths) -> VulkanResult<Self> {
        Ok(Self {
            geometry_vertex: ShaderCode::load(&paths.geometry_vertex)?,
            geometry_fragment: ShaderCode::load(&paths.geometry_fragment)?,
            lighting_vertex: ShaderCode::load(&paths.lighting_vertex)?,
            lighting_fragment: ShaderCode::load(&paths.lighting_fragment)?,
        })
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Create a module for `stage` from cached code
    pub fn new(device: Device, code: &ShaderCode, stage: vk::ShaderStageFlags) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code.words());
        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| VulkanError::Shader(format!("{}: {e:?}", code.origin().display())))?;
        Ok(Self { device, module, stage })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_parses_valid_header() {
        let code = ShaderCode::from_bytes(&spirv(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]), "test.spv").unwrap();
        assert_eq!(code.words().len(), 5);
        assert_eq!(code.origin(), Path::new("test.spv"));
    }

    #[test]
    fn test_rejects_unaligned_bytes() {
        let mut bytes = spirv(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(matches!(
            ShaderCode::from_bytes(&bytes, "odd.spv"),
            Err(VulkanError::Shader(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_magic() {
        assert!(matches!(
            ShaderCode::from_bytes(&spirv(&[0xdead_beef, 0]), "bad.spv"),
            Err(VulkanError::Shader(_))
        ));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = ShaderCode::load("no/such/shader.spv").unwrap_err();
        assert!(err.to_string().contains("no/such/shader.spv"));
    }
}
