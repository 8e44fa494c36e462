//! A single shader pass.
//!
//! A [`Pass`] owns everything needed to run one shader over a full-screen
//! quad: the graphics pipeline and its layouts, one descriptor set per frame
//! slot, the reflection of its shaders, and its output render target (none
//! for the final pass, which draws into the caller's render pass).
//!
//! # Per-frame flow
//!
//! ```text
//! build_commands(original, source, viewport)
//!   ├── recompute output size, resize target if it changed
//!   ├── stage uniform + push-constant values (semantics)
//!   ├── write descriptor set of the current slot
//!   └── record: transition, begin RP, bind, draw, end RP, mips/barrier
//! end_frame()
//!   └── swap output and feedback targets
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{DescriptorWrite, GraphicsPipelineDescriptor, PushConstantRange};
use crate::common::{CommonResources, FINAL_QUAD_OFFSET};
use crate::disposer::{DeferredDisposer, DeferredResource};
use crate::error::{FilterChainError, Result};
use crate::lut::LookupTexture;
use crate::preset::ShaderPreset;
use crate::reflection::{
    ReflectionContext, Semantic, SemanticMap, ShaderReflection, TextureSemantic, reflect_spirv,
};
use crate::render_target::RenderTarget;
use crate::scale::Scale;
use crate::semantics::{BlockWriter, IDENTITY_MVP};
use crate::shader::PassShaders;
use crate::types::{
    AddressMode, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FilterMode, ImageLayout, PipelineHandle, PipelineLayoutHandle,
    RenderPassHandle, ScissorRect, Size2D, Texture, TextureFormat, Viewport,
};

/// Static configuration of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassConfig {
    /// Output scaling rule.
    pub scale: Scale,
    /// Output format. Ignored for the final pass.
    pub format: TextureFormat,
    /// Filter used when later stages sample this pass's input.
    pub filter: FilterMode,
    /// Mip filter used when sampling this pass's input.
    pub mip_filter: FilterMode,
    /// Address mode used when sampling this pass's input.
    pub address: AddressMode,
    /// Maximum mip levels of the output (at least 1).
    pub max_levels: u32,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            scale: Scale::default(),
            format: TextureFormat::Rgba8Unorm,
            filter: FilterMode::Linear,
            mip_filter: FilterMode::Nearest,
            address: AddressMode::ClampToEdge,
            max_levels: 1,
        }
    }
}

/// A preset parameter bound to a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassParameter {
    /// Identifier in the shader.
    pub id: String,
    /// Index into [`ShaderPreset::parameters`].
    pub index: usize,
    /// Position in the pass's parameter list, which reflection indexes by.
    pub semantic_index: usize,
}

/// Everything a pass is built from.
#[derive(Debug, Clone, Copy)]
pub struct PassBuildInfo<'a> {
    /// Position in the chain.
    pub index: usize,
    /// Whether this is the last pass.
    pub is_final: bool,
    /// Alias name; empty for none.
    pub name: &'a str,
    /// Static configuration.
    pub config: &'a PassConfig,
    /// SPIR-V pair.
    pub shaders: &'a PassShaders,
    /// Bound parameters, in semantic-index order.
    pub parameters: &'a [PassParameter],
    /// Chain-wide aliases.
    pub aliases: &'a SemanticMap,
    /// Number of passes in the chain.
    pub num_passes: usize,
    /// Number of registered lookup textures.
    pub num_lookups: usize,
    /// Number of frame slots.
    pub num_slots: usize,
    /// Presentation render pass, used by the final pass.
    pub swapchain_render_pass: RenderPassHandle,
    /// Presentation viewport.
    pub viewport: Viewport,
    /// Largest input size the chain accepts.
    pub max_original: Size2D,
    /// Output size of the previous pass at build time.
    pub max_source: Size2D,
    /// Frame counter period; 0 disables wrapping.
    pub frame_count_period: u32,
}

/// Per-frame inputs of [`Pass::build_commands`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    /// Shared resources.
    pub common: &'a CommonResources,
    /// Parameter values.
    pub preset: &'a ShaderPreset,
    /// User lookup textures.
    pub luts: &'a [LookupTexture],
    /// Chain input.
    pub original: &'a Texture,
    /// Previous stage output.
    pub source: &'a Texture,
    /// Presentation viewport.
    pub viewport: &'a Viewport,
    /// MVP for this pass; identity if absent.
    pub mvp: Option<&'a [f32; 16]>,
}

/// One shader stage of the chain.
pub struct Pass {
    disposer: Arc<DeferredDisposer>,
    index: usize,
    is_final: bool,
    name: String,
    config: PassConfig,
    shaders: PassShaders,
    reflection: ShaderReflection,

    set_layout: DescriptorSetLayoutHandle,
    pool: DescriptorPoolHandle,
    sets: Vec<DescriptorSetHandle>,
    pipeline_layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,

    framebuffer: Option<RenderTarget>,
    feedback: Option<RenderTarget>,

    parameters: Vec<PassParameter>,
    filtered_parameters: Vec<PassParameter>,
    ubo_scratch: Vec<u8>,
    push_scratch: Vec<u8>,
    ubo_offset: u64,

    sync_index: usize,
    frame_count: u64,
    frame_count_period: u32,
    frame_direction: i32,
    current_viewport: Viewport,
    current_size: Size2D,
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("is_final", &self.is_final)
            .field("current_size", &self.current_size)
            .field("framebuffer", &self.framebuffer)
            .field("feedback", &self.feedback)
            .finish_non_exhaustive()
    }
}

impl Pass {
    /// Reflect the shaders and create every GPU object of the pass.
    pub fn build(disposer: &Arc<DeferredDisposer>, info: PassBuildInfo<'_>) -> Result<Self> {
        info.config.scale.validate().map_err(|e| match e {
            FilterChainError::Configuration(msg) => {
                FilterChainError::Configuration(format!("pass #{}: {}", info.index, msg))
            }
            other => other,
        })?;
        if !info.is_final && info.config.format.is_undefined() {
            return Err(FilterChainError::config(format!(
                "pass #{} has no output format",
                info.index
            )));
        }
        if info.shaders.is_empty() {
            return Err(FilterChainError::config(format!(
                "pass #{} has no shaders",
                info.index
            )));
        }

        let mut parameter_map = HashMap::new();
        for parameter in info.parameters {
            if parameter_map
                .insert(parameter.id.clone(), parameter.semantic_index)
                .is_some()
            {
                return Err(FilterChainError::DuplicateAlias(parameter.id.clone()));
            }
        }

        let reflection = reflect_spirv(
            &info.shaders.vertex,
            &info.shaders.fragment,
            ReflectionContext {
                pass_number: info.index,
                aliases: info.aliases,
                parameters: &parameter_map,
                num_passes: info.num_passes,
                num_lookups: info.num_lookups,
            },
        )?;

        let filtered_parameters: Vec<PassParameter> = info
            .parameters
            .iter()
            .filter(|p| reflection.parameter(p.semantic_index).is_bound())
            .cloned()
            .collect();

        let viewport_size = viewport_size(&info.viewport);
        let size = info
            .config
            .scale
            .output_size(info.max_original, info.max_source, viewport_size);

        let ubo_size = reflection.ubo.map_or(0, |u| u.size as usize);
        let push_size = reflection.push_constant.map_or(0, |p| p.size as usize);

        let mut pass = Self {
            disposer: Arc::clone(disposer),
            index: info.index,
            is_final: info.is_final,
            name: info.name.to_string(),
            config: *info.config,
            shaders: info.shaders.clone(),
            reflection,
            set_layout: DescriptorSetLayoutHandle::NULL,
            pool: DescriptorPoolHandle::NULL,
            sets: Vec::new(),
            pipeline_layout: PipelineLayoutHandle::NULL,
            pipeline: PipelineHandle::NULL,
            framebuffer: None,
            feedback: None,
            parameters: info.parameters.to_vec(),
            filtered_parameters,
            ubo_scratch: vec![0; ubo_size],
            push_scratch: vec![0; push_size],
            ubo_offset: 0,
            sync_index: 0,
            frame_count: 0,
            frame_count_period: info.frame_count_period,
            frame_direction: 1,
            current_viewport: info.viewport,
            current_size: size,
        };

        if !info.is_final {
            pass.framebuffer = Some(RenderTarget::new(
                disposer,
                size,
                info.config.format,
                info.config.max_levels,
            )?);
        }

        pass.create_pipeline(info.num_slots, info.swapchain_render_pass)?;

        log::debug!(
            "Built pass #{}{} ({}x{}, {} of {} parameters bound)",
            pass.index,
            if pass.name.is_empty() {
                String::new()
            } else {
                format!(" '{}'", pass.name)
            },
            size.width,
            size.height,
            pass.filtered_parameters.len(),
            pass.parameters.len()
        );
        Ok(pass)
    }

    fn create_pipeline(
        &mut self,
        num_slots: usize,
        swapchain_render_pass: RenderPassHandle,
    ) -> Result<()> {
        let backend = self.disposer.backend();
        let bindings = self.reflection.descriptor_bindings();

        self.set_layout = backend.create_descriptor_set_layout(&bindings)?;

        let push_constants = self.reflection.push_constant.map(|p| PushConstantRange {
            size: p.size,
            stages: p.stages,
        });
        self.pipeline_layout = backend.create_pipeline_layout(self.set_layout, push_constants)?;

        self.pool = backend.create_descriptor_pool(&bindings, num_slots as u32)?;
        for _ in 0..num_slots {
            let set = backend.allocate_descriptor_set(self.pool, self.set_layout)?;
            self.sets.push(set);
        }

        let render_pass = match &self.framebuffer {
            Some(framebuffer) => framebuffer.render_pass(),
            None => swapchain_render_pass,
        };
        self.pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            layout: self.pipeline_layout,
            render_pass,
            vertex_spirv: &self.shaders.vertex,
            vertex_entry: &self.reflection.vertex_entry,
            fragment_spirv: &self.shaders.fragment,
            fragment_entry: &self.reflection.fragment_entry,
        })?;
        Ok(())
    }

    /// Create the feedback target, matching the output target.
    pub fn init_feedback(&mut self) -> Result<()> {
        let Some(framebuffer) = &self.framebuffer else {
            return Err(FilterChainError::config(
                "the final pass cannot be a feedback source",
            ));
        };
        let feedback = RenderTarget::new(
            &self.disposer,
            framebuffer.size(),
            framebuffer.format(),
            framebuffer.max_levels(),
        )?;
        self.feedback = Some(feedback);
        Ok(())
    }

    // --- Accessors ---

    /// Position in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this is the final pass.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Alias name; empty if unnamed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static configuration.
    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// The SPIR-V pair the pass was built from.
    pub fn shaders(&self) -> &PassShaders {
        &self.shaders
    }

    /// Reflection of the shaders.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Output render target; none for the final pass.
    pub fn framebuffer(&self) -> Option<&RenderTarget> {
        self.framebuffer.as_ref()
    }

    /// Target holding last frame's output, if the pass is a feedback source.
    pub fn feedback_framebuffer(&self) -> Option<&RenderTarget> {
        self.feedback.as_ref()
    }

    /// Descriptor set of a slot.
    pub fn descriptor_set(&self, slot: usize) -> Option<DescriptorSetHandle> {
        self.sets.get(slot).copied()
    }

    /// Pipeline handle.
    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    /// Pipeline layout handle.
    pub fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout
    }

    /// Every parameter bound to the pass.
    pub fn parameters(&self) -> &[PassParameter] {
        &self.parameters
    }

    /// Parameters the shaders actually reference.
    pub fn filtered_parameters(&self) -> &[PassParameter] {
        &self.filtered_parameters
    }

    /// Size of the uniform block, zero if none.
    pub fn ubo_size(&self) -> u64 {
        self.ubo_scratch.len() as u64
    }

    /// Offset of the pass's uniform block within a slot.
    pub fn ubo_offset(&self) -> u64 {
        self.ubo_offset
    }

    pub(crate) fn set_ubo_offset(&mut self, offset: u64) {
        self.ubo_offset = offset;
    }

    /// Output size of the most recent frame.
    pub fn current_size(&self) -> Size2D {
        self.current_size
    }

    /// Frame slot being recorded.
    pub fn sync_index(&self) -> usize {
        self.sync_index
    }

    /// Texture reference to this pass's output, sampled with the given state.
    pub fn output_texture(
        &self,
        filter: FilterMode,
        mip_filter: FilterMode,
        address: AddressMode,
    ) -> Option<Texture> {
        self.framebuffer.as_ref().map(|fb| {
            Texture::new(
                fb.image_ref(ImageLayout::ShaderReadOnly),
                filter,
                mip_filter,
                address,
            )
        })
    }

    // --- Frame state ---

    /// Enter a frame slot.
    pub fn notify_sync_index(&mut self, slot: usize) {
        self.sync_index = slot;
    }

    /// Set the frame counter.
    pub fn set_frame_count(&mut self, count: u64) {
        self.frame_count = count;
    }

    /// Wrap the frame counter modulo `period`; 0 disables wrapping.
    pub fn set_frame_count_period(&mut self, period: u32) {
        self.frame_count_period = period;
    }

    /// Set the frame direction.
    pub fn set_frame_direction(&mut self, direction: i32) {
        self.frame_direction = direction;
    }

    /// Frame counter value the shader sees.
    pub fn effective_frame_count(&self) -> u32 {
        if self.frame_count_period != 0 {
            (self.frame_count % self.frame_count_period as u64) as u32
        } else {
            self.frame_count as u32
        }
    }

    /// Swap the output and feedback targets.
    pub fn end_frame(&mut self) {
        if self.feedback.is_some() {
            std::mem::swap(&mut self.framebuffer, &mut self.feedback);
        }
    }

    // --- Recording ---

    /// Bind every input and record the pass into `cmd`.
    ///
    /// Returns false if nothing was recorded, in which case the output
    /// target may hold no image and must not be sampled this frame.
    pub fn build_commands(
        &mut self,
        cmd: CommandBufferHandle,
        inputs: FrameInputs<'_>,
    ) -> bool {
        self.current_viewport = *inputs.viewport;
        let size = self.config.scale.output_size(
            Size2D::new(inputs.original.image.width, inputs.original.image.height),
            Size2D::new(inputs.source.image.width, inputs.source.image.height),
            viewport_size(inputs.viewport),
        );

        if let Some(framebuffer) = &mut self.framebuffer {
            if framebuffer.size() != size || !framebuffer.is_ready() {
                if let Err(e) = framebuffer.resize(size, None) {
                    log::error!("Failed to resize pass #{} output: {}", self.index, e);
                    return false;
                }
            }
        }
        self.current_size = size;

        let Some(set) = self.sets.get(self.sync_index).copied() else {
            log::error!(
                "Pass #{} has no descriptor set for slot {}",
                self.index,
                self.sync_index
            );
            return false;
        };

        let mut writes = Vec::new();
        self.build_semantics(&inputs, &mut writes);

        if let (Some(ubo), Some(buffer)) = (self.reflection.ubo, inputs.common.ubo()) {
            let offset = self.ubo_offset + self.sync_index as u64 * inputs.common.ubo_stride();
            match buffer.map() {
                Ok(mut mapping) => mapping.write(offset, &self.ubo_scratch),
                Err(e) => log::error!("Failed to map uniform buffer: {}", e),
            }
            writes.push(DescriptorWrite::UniformBuffer {
                binding: ubo.binding,
                buffer: buffer.handle(),
                offset,
                range: ubo.size as u64,
            });
        }

        let backend = self.disposer.backend();
        backend.update_descriptor_set(set, &writes);

        if let Some(framebuffer) = &self.framebuffer {
            backend.cmd_transition_image(
                cmd,
                framebuffer.image(),
                1,
                ImageLayout::Undefined,
                ImageLayout::ColorAttachment,
            );
            backend.cmd_begin_render_pass(
                cmd,
                framebuffer.render_pass(),
                framebuffer.framebuffer(),
                size,
            );
        }

        backend.cmd_bind_pipeline(cmd, self.pipeline);
        backend.cmd_bind_descriptor_set(cmd, self.pipeline_layout, set);
        if let Some(push) = self.reflection.push_constant {
            backend.cmd_push_constants(cmd, self.pipeline_layout, push.stages, &self.push_scratch);
        }

        let vertex_offset = if self.is_final { FINAL_QUAD_OFFSET } else { 0 };
        backend.cmd_bind_vertex_buffer(cmd, inputs.common.vbo().handle(), vertex_offset);

        let viewport = if self.is_final {
            self.current_viewport
        } else {
            Viewport::from_dimensions(size.width, size.height)
        };
        backend.cmd_set_viewport(cmd, &viewport);
        backend.cmd_set_scissor(
            cmd,
            &if self.is_final {
                viewport.scissor()
            } else {
                ScissorRect::from_dimensions(size.width, size.height)
            },
        );

        backend.cmd_draw(cmd, 4, 0);

        if let Some(framebuffer) = &self.framebuffer {
            backend.cmd_end_render_pass(cmd);
            if framebuffer.levels() > 1 {
                backend.cmd_generate_mipmaps(cmd, framebuffer.image(), size, framebuffer.levels());
            } else {
                backend.cmd_transition_image(
                    cmd,
                    framebuffer.image(),
                    framebuffer.levels(),
                    ImageLayout::ColorAttachment,
                    ImageLayout::ShaderReadOnly,
                );
            }
        }
        true
    }

    fn build_semantics(&mut self, inputs: &FrameInputs<'_>, writes: &mut Vec<DescriptorWrite>) {
        let reflection = &self.reflection;
        let frame_count = self.effective_frame_count();
        let mut block = BlockWriter::new(&mut self.ubo_scratch, &mut self.push_scratch);

        block.write_mat4(
            reflection.semantic(Semantic::Mvp),
            inputs.mvp.unwrap_or(&IDENTITY_MVP),
        );
        block.write_size(
            reflection.semantic(Semantic::Output),
            self.current_size.width,
            self.current_size.height,
        );
        block.write_size(
            reflection.semantic(Semantic::FinalViewport),
            self.current_viewport.width as u32,
            self.current_viewport.height as u32,
        );
        block.write_u32(reflection.semantic(Semantic::FrameCount), frame_count);
        block.write_i32(
            reflection.semantic(Semantic::FrameDirection),
            self.frame_direction,
        );

        let mut binder = TextureBinder {
            reflection,
            common: inputs.common,
            fallback: inputs.original,
            block: &mut block,
            writes,
        };

        binder.bind(TextureSemantic::Original, 0, inputs.original);
        binder.bind(TextureSemantic::Source, 0, inputs.source);
        binder.bind(TextureSemantic::OriginalHistory, 0, inputs.original);

        for parameter in &self.filtered_parameters {
            binder.block.write_f32(
                reflection.parameter(parameter.semantic_index),
                inputs.preset.current(parameter.index),
            );
        }

        for (i, texture) in inputs.common.history().iter().enumerate() {
            binder.bind(TextureSemantic::OriginalHistory, i + 1, texture);
        }
        for (i, texture) in inputs.common.pass_outputs().iter().enumerate() {
            binder.bind(TextureSemantic::PassOutput, i, texture);
        }
        for (i, texture) in inputs.common.feedback().iter().enumerate() {
            binder.bind(TextureSemantic::PassFeedback, i, texture);
        }
        for (i, lut) in inputs.luts.iter().enumerate() {
            binder.bind(TextureSemantic::User, i, lut.texture());
        }
    }
}

impl Drop for Pass {
    fn drop(&mut self) {
        let disposer = &self.disposer;
        disposer.defer(DeferredResource::Pipeline(self.pipeline));
        disposer.defer(DeferredResource::PipelineLayout(self.pipeline_layout));
        disposer.defer(DeferredResource::DescriptorPool(self.pool));
        disposer.defer(DeferredResource::DescriptorSetLayout(self.set_layout));
    }
}

fn viewport_size(viewport: &Viewport) -> Size2D {
    Size2D::new(viewport.width as u32, viewport.height as u32)
}

/// Writes texture sizes and descriptor updates for one pass.
struct TextureBinder<'a, 'b> {
    reflection: &'a ShaderReflection,
    common: &'a CommonResources,
    /// Bound in place of textures with no image, so no descriptor keeps
    /// pointing at a disposed view.
    fallback: &'a Texture,
    block: &'a mut BlockWriter<'b>,
    writes: &'a mut Vec<DescriptorWrite>,
}

impl TextureBinder<'_, '_> {
    fn bind(&mut self, semantic: TextureSemantic, index: usize, texture: &Texture) {
        let Some(slot) = self.reflection.texture(semantic, index) else {
            return;
        };
        self.block
            .write_size(slot.size, texture.image.width, texture.image.height);

        let Some(binding) = slot.texture else {
            return;
        };
        let texture = if texture.image.is_null() {
            self.fallback
        } else {
            texture
        };
        let sampler = self.common.samplers().for_texture(texture);
        match binding.sampler_binding {
            Some(sampler_binding) => {
                self.writes.push(DescriptorWrite::SampledImage {
                    binding: binding.binding,
                    view: texture.image.view,
                    layout: texture.image.layout,
                });
                self.writes.push(DescriptorWrite::Sampler {
                    binding: sampler_binding,
                    sampler,
                });
            }
            None => self.writes.push(DescriptorWrite::CombinedImageSampler {
                binding: binding.binding,
                view: texture.image.view,
                layout: texture.image.layout,
                sampler,
            }),
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::FilterBackend;
    use crate::backend::dummy::{DummyBackend, ObjectKind, RecordedCommand};
    use crate::types::ImageRef;

    fn setup() -> (Arc<DummyBackend>, Arc<DeferredDisposer>) {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        (backend, disposer)
    }

    fn build_info<'a>(
        config: &'a PassConfig,
        shaders: &'a PassShaders,
        aliases: &'a SemanticMap,
        parameters: &'a [PassParameter],
        render_pass: RenderPassHandle,
        is_final: bool,
    ) -> PassBuildInfo<'a> {
        PassBuildInfo {
            index: 0,
            is_final,
            name: "",
            config,
            shaders,
            parameters,
            aliases,
            num_passes: 2,
            num_lookups: 0,
            num_slots: 2,
            swapchain_render_pass: render_pass,
            viewport: Viewport::from_dimensions(640, 480),
            max_original: Size2D::new(320, 240),
            max_source: Size2D::new(320, 240),
            frame_count_period: 0,
        }
    }

    fn input(backend: &DummyBackend) -> Texture {
        let (image, requirements) = backend
            .create_image(&crate::backend::ImageDescriptor {
                size: Size2D::new(320, 240),
                format: TextureFormat::Rgba8Unorm,
                mip_levels: 1,
            })
            .unwrap();
        let memory = backend.allocate_memory(&requirements).unwrap();
        backend.bind_image_memory(image, memory).unwrap();
        let view = backend
            .create_image_view(image, TextureFormat::Rgba8Unorm, 0, 1)
            .unwrap();
        Texture::new(
            ImageRef {
                image,
                view,
                layout: ImageLayout::ShaderReadOnly,
                width: 320,
                height: 240,
                format: TextureFormat::Rgba8Unorm,
            },
            FilterMode::Linear,
            FilterMode::Nearest,
            AddressMode::ClampToEdge,
        )
    }

    #[test]
    fn test_offscreen_pass_commands() {
        let (backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig {
            scale: Scale::source(2.0),
            ..Default::default()
        };
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
        )
        .unwrap();
        assert_eq!(pass.current_size(), Size2D::new(640, 480));

        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        let offsets = common.allocate_ubo(&disposer, &[pass.ubo_size()], 2).unwrap();
        pass.set_ubo_offset(offsets[0]);

        let original = input(&backend);
        let preset = ShaderPreset::new();
        let cmd = backend.begin_command_buffer();
        assert!(pass.build_commands(
            cmd,
            FrameInputs {
                common: &common,
                preset: &preset,
                luts: &[],
                original: &original,
                source: &original,
                viewport: &Viewport::from_dimensions(640, 480),
                mvp: None,
            },
        ));

        let commands = backend.commands(cmd);
        assert!(matches!(
            commands.first(),
            Some(RecordedCommand::TransitionImage {
                old_layout: ImageLayout::Undefined,
                new_layout: ImageLayout::ColorAttachment,
                ..
            })
        ));
        assert!(commands.contains(&RecordedCommand::Draw {
            vertex_count: 4,
            first_vertex: 0
        }));
        assert!(commands.contains(&RecordedCommand::BindVertexBuffer {
            buffer: common.vbo().handle(),
            offset: 0
        }));
        assert!(commands.contains(&RecordedCommand::SetViewport(
            Viewport::from_dimensions(640, 480)
        )));
        assert!(matches!(
            commands.last(),
            Some(RecordedCommand::TransitionImage {
                new_layout: ImageLayout::ShaderReadOnly,
                ..
            })
        ));

        let writes = backend.descriptor_writes(pass.descriptor_set(0).unwrap());
        assert!(writes.iter().any(|w| matches!(
            w,
            DescriptorWrite::SampledImage { view, .. } if *view == original.image.view
        )));
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_final_pass_uses_presentation_viewport() {
        let (backend, disposer) = setup();
        let render_pass = backend.create_render_pass(TextureFormat::Bgra8Unorm).unwrap();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig {
            scale: Scale::viewport(1.0),
            ..Default::default()
        };
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], render_pass, true),
        )
        .unwrap();
        assert!(pass.framebuffer().is_none());

        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        common.allocate_ubo(&disposer, &[pass.ubo_size()], 2).unwrap();

        let original = input(&backend);
        let preset = ShaderPreset::new();
        let viewport = Viewport::new(10.0, 20.0, 300.0, 200.0);
        let cmd = backend.begin_command_buffer();
        pass.build_commands(
            cmd,
            FrameInputs {
                common: &common,
                preset: &preset,
                luts: &[],
                original: &original,
                source: &original,
                viewport: &viewport,
                mvp: None,
            },
        );

        let commands = backend.commands(cmd);
        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
        );
        assert!(commands.contains(&RecordedCommand::SetViewport(viewport)));
        assert!(commands.contains(&RecordedCommand::SetScissor(ScissorRect::new(
            10, 20, 300, 200
        ))));
        assert!(commands.contains(&RecordedCommand::BindVertexBuffer {
            buffer: common.vbo().handle(),
            offset: FINAL_QUAD_OFFSET
        }));
        assert_eq!(pass.current_size(), Size2D::new(300, 200));
    }

    #[test]
    fn test_frame_count_period() {
        let (_backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig::default();
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
        )
        .unwrap();
        pass.set_frame_count(1001);
        assert_eq!(pass.effective_frame_count(), 1001);
        pass.set_frame_count_period(100);
        assert_eq!(pass.effective_frame_count(), 1);
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let (_backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig::default();
        let aliases = SemanticMap::new();
        let parameters = [
            PassParameter {
                id: "gamma".to_string(),
                index: 0,
                semantic_index: 0,
            },
            PassParameter {
                id: "gamma".to_string(),
                index: 1,
                semantic_index: 1,
            },
        ];
        let err = Pass::build(
            &disposer,
            build_info(
                &config,
                &shaders,
                &aliases,
                &parameters,
                RenderPassHandle::NULL,
                false,
            ),
        )
        .unwrap_err();
        assert_eq!(err, FilterChainError::DuplicateAlias("gamma".to_string()));
    }

    #[test]
    fn test_feedback_swap() {
        let (backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig::default();
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
        )
        .unwrap();
        pass.init_feedback().unwrap();

        let output = pass.framebuffer().unwrap().image();
        let feedback = pass.feedback_framebuffer().unwrap().image();
        pass.end_frame();
        assert_eq!(pass.framebuffer().unwrap().image(), feedback);
        assert_eq!(pass.feedback_framebuffer().unwrap().image(), output);

        drop(pass);
        disposer.flush_all();
        assert_eq!(backend.live_count(ObjectKind::Pipeline), 0);
        assert_eq!(backend.live_count(ObjectKind::Image), 0);
    }

    #[test]
    fn test_failed_build_releases_objects() {
        let (backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig::default();
        let aliases = SemanticMap::new();
        backend.inject_failure(ObjectKind::Pipeline);
        assert!(
            Pass::build(
                &disposer,
                build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
            )
            .is_err()
        );
        disposer.flush_all();
        assert_eq!(backend.live_count(ObjectKind::PipelineLayout), 0);
        assert_eq!(backend.live_count(ObjectKind::DescriptorPool), 0);
        assert_eq!(backend.live_count(ObjectKind::Image), 0);
    }

    #[test]
    fn test_failed_resize_records_nothing() {
        let (backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig::default();
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
        )
        .unwrap();
        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        common.allocate_ubo(&disposer, &[pass.ubo_size()], 2).unwrap();

        let original = input(&backend);
        let mut smaller = original;
        smaller.image.width = 160;
        smaller.image.height = 120;
        let preset = ShaderPreset::new();
        let cmd = backend.begin_command_buffer();

        backend.inject_failure(ObjectKind::ImageView);
        let recorded = pass.build_commands(
            cmd,
            FrameInputs {
                common: &common,
                preset: &preset,
                luts: &[],
                original: &smaller,
                source: &smaller,
                viewport: &Viewport::from_dimensions(640, 480),
                mvp: None,
            },
        );
        assert!(!recorded);
        assert!(backend.commands(cmd).is_empty());
        assert!(!pass.framebuffer().unwrap().is_ready());
        assert!(backend.descriptor_writes(pass.descriptor_set(0).unwrap()).is_empty());
    }

    #[test]
    fn test_missing_texture_binds_original() {
        let (backend, disposer) = setup();
        let shaders = PassShaders::stock().unwrap();
        let config = PassConfig {
            scale: Scale::viewport(1.0),
            ..Default::default()
        };
        let aliases = SemanticMap::new();
        let mut pass = Pass::build(
            &disposer,
            build_info(&config, &shaders, &aliases, &[], RenderPassHandle::NULL, false),
        )
        .unwrap();
        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        common.allocate_ubo(&disposer, &[pass.ubo_size()], 2).unwrap();

        let original = input(&backend);
        let preset = ShaderPreset::new();
        let cmd = backend.begin_command_buffer();
        assert!(pass.build_commands(
            cmd,
            FrameInputs {
                common: &common,
                preset: &preset,
                luts: &[],
                original: &original,
                source: &Texture::default(),
                viewport: &Viewport::from_dimensions(640, 480),
                mvp: None,
            },
        ));

        let writes = backend.descriptor_writes(pass.descriptor_set(0).unwrap());
        assert!(writes.iter().any(|w| matches!(
            w,
            DescriptorWrite::SampledImage { view, .. } if *view == original.image.view
        )));
        assert!(backend.violations().is_empty());
    }
}
