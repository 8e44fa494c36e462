//! Pass shaders.
//!
//! Passes consume precompiled SPIR-V. The only shader this crate compiles
//! itself is the stock pass-through used by [`FilterChain::create_default`],
//! written in WGSL and translated with naga.
//!
//! [`FilterChain::create_default`]: crate::chain::FilterChain::create_default

use crate::error::{FilterChainError, Result};

/// Vertex + fragment SPIR-V of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassShaders {
    /// Vertex shader words.
    pub vertex: Vec<u32>,
    /// Fragment shader words.
    pub fragment: Vec<u32>,
}

impl PassShaders {
    /// Create a shader pair.
    pub fn new(vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        Self { vertex, fragment }
    }

    /// Compile a WGSL module containing both entry points.
    pub fn from_wgsl(source: &str, vertex_entry: &str, fragment_entry: &str) -> Result<Self> {
        Ok(Self {
            vertex: compile_wgsl(source, naga::ShaderStage::Vertex, vertex_entry)?,
            fragment: compile_wgsl(source, naga::ShaderStage::Fragment, fragment_entry)?,
        })
    }

    /// The stock pass-through shader.
    pub fn stock() -> Result<Self> {
        Self::from_wgsl(STOCK_WGSL, "vs_main", "fs_main")
    }

    /// Returns true if either stage is missing.
    pub fn is_empty(&self) -> bool {
        self.vertex.is_empty() || self.fragment.is_empty()
    }
}

/// Stock pass-through: samples `Source` at the interpolated UV.
pub const STOCK_WGSL: &str = r#"
struct Ubo {
    MVP: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> ubo: Ubo;
@group(0) @binding(1) var Source: texture_2d<f32>;
@group(0) @binding(2) var SourceSampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = ubo.MVP * vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(Source, SourceSampler, uv);
}
"#;

/// Compile one entry point of a WGSL module to SPIR-V.
///
/// Debug names are kept; reflection matches on them.
pub fn compile_wgsl(source: &str, stage: naga::ShaderStage, entry_point: &str) -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| FilterChainError::reflection(format!("WGSL parse error: {e}")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| FilterChainError::reflection(format!("Validation error: {e}")))?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage)
    {
        return Err(FilterChainError::reflection(format!(
            "Entry point '{}' not found for stage {:?}",
            entry_point, stage
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        flags: naga::back::spv::WriterFlags::DEBUG,
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| FilterChainError::reflection(format!("SPIR-V generation error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_shader_compiles() {
        let shaders = PassShaders::stock().unwrap();
        assert!(!shaders.is_empty());
        // SPIR-V magic number.
        assert_eq!(shaders.vertex[0], 0x0723_0203);
        assert_eq!(shaders.fragment[0], 0x0723_0203);
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_wgsl(STOCK_WGSL, naga::ShaderStage::Vertex, "fs_main").unwrap_err();
        assert!(matches!(err, FilterChainError::Reflection(_)));
    }
}
