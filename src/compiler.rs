//! Shader compilation.
//!
//! Thin wrapper over naga: WGSL source in, SPIR-V words or a diagnostic
//! string out. The core treats compilation failure as fatal at startup;
//! there is no hot reload and no partial-pipeline fallback. The diagnostic
//! is surfaced in the error for the developer and nothing is retried.

use crate::error::RenderError;

/// Pipeline stage a shader entry point targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
}

/// WGSL-to-SPIR-V shader compiler.
#[derive(Debug, Default)]
pub struct ShaderCompiler;

impl ShaderCompiler {
    /// Create a new compiler.
    pub fn new() -> Self {
        Self
    }

    /// Compile one entry point of a WGSL source to SPIR-V.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ShaderCompilationFailed`] carrying the parse,
    /// validation, or code-generation diagnostic, or a note that the entry
    /// point does not exist for the requested stage.
    pub fn compile(
        &self,
        source: &str,
        entry_point: &str,
        stage: ShaderStage,
    ) -> Result<Vec<u32>, RenderError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            RenderError::ShaderCompilationFailed(format!(
                "WGSL parse error: {}",
                e.emit_to_string(source)
            ))
        })?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator.validate(&module).map_err(|e| {
            RenderError::ShaderCompilationFailed(format!("validation error: {e}"))
        })?;

        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        };

        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
        {
            return Err(RenderError::ShaderCompilationFailed(format!(
                "entry point '{}' not found for stage {:?}",
                entry_point, stage
            )));
        }

        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::empty(),
            capabilities: None,
            bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
            binding_map: Default::default(),
            debug_info: None,
            zero_initialize_workgroup_memory:
                naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
        };

        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: naga_stage,
            entry_point: entry_point.to_string(),
        };

        let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| {
            RenderError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}"))
        })?;

        log::trace!(
            "ShaderCompiler: compiled '{}' ({:?}) to {} SPIR-V words",
            entry_point,
            stage,
            words.len()
        );

        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SOURCE: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    #[test]
    fn test_compile_both_stages() {
        let compiler = ShaderCompiler::new();

        let vs = compiler
            .compile(VALID_SOURCE, "vs_main", ShaderStage::Vertex)
            .unwrap();
        let fs = compiler
            .compile(VALID_SOURCE, "fs_main", ShaderStage::Fragment)
            .unwrap();

        // SPIR-V magic number leads both modules.
        assert_eq!(vs[0], 0x0723_0203);
        assert_eq!(fs[0], 0x0723_0203);
        assert!(vs.len() > 8);
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let compiler = ShaderCompiler::new();
        let err = compiler
            .compile("@vertex fn broken(", "broken", ShaderStage::Vertex)
            .unwrap_err();

        match err {
            RenderError::ShaderCompilationFailed(diagnostic) => {
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected compilation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_point() {
        let compiler = ShaderCompiler::new();
        let err = compiler
            .compile(VALID_SOURCE, "nonexistent", ShaderStage::Vertex)
            .unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_wrong_stage_for_entry_point() {
        let compiler = ShaderCompiler::new();
        assert!(compiler
            .compile(VALID_SOURCE, "vs_main", ShaderStage::Fragment)
            .is_err());
    }
}
