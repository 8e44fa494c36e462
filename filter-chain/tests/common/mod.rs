//! Common utilities for filter chain integration tests.
//!
//! Everything runs against the dummy backend: chains are driven frame by
//! frame, and assertions inspect the recorded commands, descriptor writes
//! and uniform buffer contents.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_filter_chain::backend::dummy::DummyBackend;
use redlilium_filter_chain::backend::{DescriptorWrite, FilterBackend, ImageDescriptor};
use redlilium_filter_chain::reflection::UniformLocation;
use redlilium_filter_chain::{
    CommandBufferHandle, FilterChain, FilterChainCreateInfo, ImageLayout, ImageRef, PassShaders,
    Size2D, SwapchainInfo, TextureFormat, Viewport,
};

/// Install the test logger once.
pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// A dummy backend plus the caller-owned objects a chain needs.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub swapchain: SwapchainInfo,
    pub max_input_size: Size2D,
}

impl TestContext {
    /// Create a context presenting into `viewport` with `num_slots` frames in flight.
    pub fn new(viewport: Size2D, num_slots: usize) -> Self {
        init_logger();
        let backend = Arc::new(DummyBackend::new());
        let render_pass = backend
            .create_render_pass(TextureFormat::Bgra8Unorm)
            .expect("Failed to create presentation render pass");
        Self {
            backend,
            swapchain: SwapchainInfo {
                format: TextureFormat::Bgra8Unorm,
                num_sync_indices: num_slots,
                viewport: Viewport::from_dimensions(viewport.width, viewport.height),
                render_pass,
            },
            max_input_size: Size2D::new(320, 240),
        }
    }

    /// Create info for a chain of `num_passes` passes.
    pub fn create_info(&self, num_passes: usize) -> FilterChainCreateInfo {
        FilterChainCreateInfo {
            max_input_size: self.max_input_size,
            original_format: TextureFormat::Rgba8Unorm,
            swapchain: self.swapchain,
            num_passes,
        }
    }

    /// Create an unconfigured chain.
    pub fn chain(&self, num_passes: usize) -> FilterChain {
        FilterChain::new(self.backend.clone(), &self.create_info(num_passes))
            .expect("Failed to create filter chain")
    }

    /// Create an input image in shader-read-only layout.
    pub fn input_image(&self, size: Size2D) -> ImageRef {
        let backend = &self.backend;
        let (image, requirements) = backend
            .create_image(&ImageDescriptor {
                size,
                format: TextureFormat::Rgba8Unorm,
                mip_levels: 1,
            })
            .expect("Failed to create input image");
        let memory = backend
            .allocate_memory(&requirements)
            .expect("Failed to allocate input memory");
        backend
            .bind_image_memory(image, memory)
            .expect("Failed to bind input memory");
        let view = backend
            .create_image_view(image, TextureFormat::Rgba8Unorm, 0, 1)
            .expect("Failed to create input view");

        let cmd = backend.begin_command_buffer();
        backend.cmd_transition_image(
            cmd,
            image,
            1,
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnly,
        );

        ImageRef {
            image,
            view,
            layout: ImageLayout::ShaderReadOnly,
            width: size.width,
            height: size.height,
            format: TextureFormat::Rgba8Unorm,
        }
    }

    /// Record one frame in slot `slot` and return its command buffer.
    pub fn run_frame(
        &self,
        chain: &mut FilterChain,
        slot: usize,
        input: ImageRef,
    ) -> CommandBufferHandle {
        let viewport = chain.swapchain_info().viewport;
        chain.notify_sync_index(slot);
        chain.set_input_texture(input);
        let cmd = self.backend.begin_command_buffer();
        chain.build_offscreen_passes(cmd, &viewport);
        chain.build_viewport_pass(cmd, &viewport, None);
        chain.end_frame(cmd);
        cmd
    }

    /// Descriptor writes of a pass's set for `slot`.
    pub fn writes(&self, chain: &FilterChain, pass: usize, slot: usize) -> Vec<DescriptorWrite> {
        let set = chain
            .pass(pass)
            .and_then(|p| p.descriptor_set(slot))
            .expect("Pass has no descriptor set for slot");
        self.backend.descriptor_writes(set)
    }

    /// View bound at `binding` in a pass's set for `slot`.
    pub fn bound_view(
        &self,
        chain: &FilterChain,
        pass: usize,
        slot: usize,
        binding: u32,
    ) -> Option<redlilium_filter_chain::types::ImageViewHandle> {
        self.writes(chain, pass, slot)
            .into_iter()
            .find_map(|write| match write {
                DescriptorWrite::SampledImage { binding: b, view, .. }
                | DescriptorWrite::CombinedImageSampler { binding: b, view, .. }
                    if b == binding =>
                {
                    Some(view)
                }
                _ => None,
            })
    }

    /// Bytes of a pass's uniform block as written for `slot`.
    pub fn ubo_bytes(&self, chain: &FilterChain, pass: usize, slot: usize) -> Vec<u8> {
        let common = chain.common().expect("Chain is not initialized");
        let ubo = common.ubo().expect("Chain has no uniform buffer");
        let pass = chain.pass(pass).expect("No such pass");
        let contents = self
            .backend
            .buffer_contents(ubo.handle())
            .expect("Uniform buffer is not live");
        let start = (pass.ubo_offset() + slot as u64 * common.ubo_stride()) as usize;
        contents[start..start + pass.ubo_size() as usize].to_vec()
    }

    /// vec4 at a uniform location of a pass for `slot`.
    pub fn ubo_vec4(
        &self,
        chain: &FilterChain,
        pass: usize,
        slot: usize,
        location: UniformLocation,
    ) -> [f32; 4] {
        let offset = location.ubo_offset.expect("Value is not in the uniform block") as usize;
        let bytes = self.ubo_bytes(chain, pass, slot);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[offset..offset + 16]);
        [floats[0], floats[1], floats[2], floats[3]]
    }

    /// u32 at a uniform location of a pass for `slot`.
    pub fn ubo_u32(
        &self,
        chain: &FilterChain,
        pass: usize,
        slot: usize,
        location: UniformLocation,
    ) -> u32 {
        let offset = location.ubo_offset.expect("Value is not in the uniform block") as usize;
        let bytes = self.ubo_bytes(chain, pass, slot);
        u32::from_ne_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    /// f32 at a uniform location of a pass for `slot`.
    pub fn ubo_f32(
        &self,
        chain: &FilterChain,
        pass: usize,
        slot: usize,
        location: UniformLocation,
    ) -> f32 {
        f32::from_bits(self.ubo_u32(chain, pass, slot, location))
    }
}

// ============================================================================
// Test Shaders
// ============================================================================

/// Build a test shader pair.
///
/// The uniform block always starts with `MVP`, followed by `uniforms` as
/// `(name, wgsl type)`. Each texture gets a separate `<name>Sampler`; the
/// fragment stage samples all of them.
pub fn test_shaders(uniforms: &[(&str, &str)], textures: &[&str]) -> PassShaders {
    let mut source = String::from("struct Ubo {\n    MVP: mat4x4<f32>,\n");
    for (name, ty) in uniforms {
        source.push_str(&format!("    {}: {},\n", name, ty));
    }
    source.push_str("}\n\n@group(0) @binding(0) var<uniform> ubo: Ubo;\n");

    for (i, texture) in textures.iter().enumerate() {
        source.push_str(&format!(
            "@group(0) @binding({}) var {}: texture_2d<f32>;\n@group(0) @binding({}) var {}Sampler: sampler;\n",
            1 + 2 * i,
            texture,
            2 + 2 * i,
            texture
        ));
    }

    source.push_str(
        r#"
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
    var color = vec4<f32>(ubo.MVP[0][0] * 0.0);
"#,
    );
    for texture in textures {
        source.push_str(&format!(
            "    color += textureSample({}, {}Sampler, uv);\n",
            texture, texture
        ));
    }
    source.push_str("    return color;\n}\n");

    PassShaders::from_wgsl(&source, "vs_main", "fs_main").expect("Failed to compile test shader")
}

/// Pass-through of `Source` with no extra uniforms.
pub fn passthrough() -> PassShaders {
    test_shaders(&[], &["Source"])
}
