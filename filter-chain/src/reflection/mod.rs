//! Shader reflection.
//!
//! Reflection turns the interface of a vertex/fragment SPIR-V pair into a
//! binding map. Every standard value ([`Semantic`]), every texture role
//! ([`TextureSemantic`]) and every user parameter gets an optional
//! [`UniformLocation`] (uniform-block offset and/or push-constant offset),
//! and every referenced texture gets a [`TextureBinding`].
//!
//! ## Naming
//!
//! Block members and textures are matched by name:
//!
//! | Name | Meaning | Type |
//! |------|---------|------|
//! | `MVP` | model-view-projection matrix | mat4 |
//! | `OutputSize` | own output size | vec4 |
//! | `FinalViewportSize` | presentation viewport size | vec4 |
//! | `FrameCount` | frame counter | uint |
//! | `FrameDirection` | +1 or -1 | int |
//! | `Original`, `Source` | chain input, previous stage | texture |
//! | `OriginalHistory#`, `PassOutput#`, `PassFeedback#`, `User#` | indexed textures | texture |
//! | `OriginalSize`, `SourceSize`, `OriginalHistorySize#`, ... | texture sizes | vec4 |
//!
//! Named passes and lookup textures add aliases through a [`SemanticMap`].
//! Parameters are matched by id.
//!
//! Sizes are written as `(width, height, 1/width, 1/height)`.

mod interface;
mod spirv;

use std::collections::HashMap;

pub use spirv::{parse_spirv, reflect_spirv};

use crate::backend::{DescriptorBinding, DescriptorType};
use crate::error::{FilterChainError, Result};
use crate::types::ShaderStageFlags;

use interface::{BlockMember, MemberKind, StageInterface};

// ============================================================================
// Semantics
// ============================================================================

/// Standard values a shader may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    /// Model-view-projection matrix.
    Mvp,
    /// Own output size.
    Output,
    /// Presentation viewport size.
    FinalViewport,
    /// Frame counter.
    FrameCount,
    /// Frame direction.
    FrameDirection,
}

impl Semantic {
    /// Number of semantics.
    pub const COUNT: usize = 5;

    /// Every semantic, in binding order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Mvp,
        Self::Output,
        Self::FinalViewport,
        Self::FrameCount,
        Self::FrameDirection,
    ];

    /// Member name the shader uses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mvp => "MVP",
            Self::Output => "OutputSize",
            Self::FinalViewport => "FinalViewportSize",
            Self::FrameCount => "FrameCount",
            Self::FrameDirection => "FrameDirection",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    fn expected_kind(self) -> MemberKind {
        match self {
            Self::Mvp => MemberKind::Mat4,
            Self::Output | Self::FinalViewport => MemberKind::Vec4,
            Self::FrameCount => MemberKind::Uint,
            Self::FrameDirection => MemberKind::Int,
        }
    }
}

/// Texture roles a shader may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSemantic {
    /// Unmodified chain input.
    Original,
    /// Previous stage output, or the original for the first pass.
    Source,
    /// Previous chain inputs. Index 0 is the current original.
    OriginalHistory,
    /// Output of an earlier pass this frame.
    PassOutput,
    /// Output of a pass from the previous frame.
    PassFeedback,
    /// User lookup texture.
    User,
}

impl TextureSemantic {
    /// Number of texture semantics.
    pub const COUNT: usize = 6;

    /// Every texture semantic.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Original,
        Self::Source,
        Self::OriginalHistory,
        Self::PassOutput,
        Self::PassFeedback,
        Self::User,
    ];

    /// Base texture name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Original => "Original",
            Self::Source => "Source",
            Self::OriginalHistory => "OriginalHistory",
            Self::PassOutput => "PassOutput",
            Self::PassFeedback => "PassFeedback",
            Self::User => "User",
        }
    }

    /// Whether names carry an index suffix.
    pub fn is_array(self) -> bool {
        !matches!(self, Self::Original | Self::Source)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A texture semantic plus array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSemanticRef {
    /// Texture role.
    pub semantic: TextureSemantic,
    /// Array index, 0 for non-array semantics.
    pub index: usize,
}

impl TextureSemanticRef {
    /// Create a reference.
    pub const fn new(semantic: TextureSemantic, index: usize) -> Self {
        Self { semantic, index }
    }
}

fn parse_indexed(name: &str, prefix: &str) -> Option<usize> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn builtin_texture(name: &str) -> Option<TextureSemanticRef> {
    TextureSemantic::ALL.into_iter().find_map(|semantic| {
        if semantic.is_array() {
            parse_indexed(name, semantic.name()).map(|i| TextureSemanticRef::new(semantic, i))
        } else {
            (name == semantic.name()).then_some(TextureSemanticRef::new(semantic, 0))
        }
    })
}

fn builtin_texture_size(name: &str) -> Option<TextureSemanticRef> {
    TextureSemantic::ALL.into_iter().find_map(|semantic| {
        let base = format!("{}Size", semantic.name());
        if semantic.is_array() {
            parse_indexed(name, &base).map(|i| TextureSemanticRef::new(semantic, i))
        } else {
            (name == base).then_some(TextureSemanticRef::new(semantic, 0))
        }
    })
}

// ============================================================================
// Alias map
// ============================================================================

/// Name aliases for pass outputs, feedback and lookup textures.
///
/// A pass named `foo` adds `foo` and `fooFeedback` as texture names and
/// `fooSize` and `fooFeedbackSize` as size names. A lookup texture `lut`
/// adds `lut` and `lutSize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticMap {
    textures: HashMap<String, TextureSemanticRef>,
    uniforms: HashMap<String, TextureSemanticRef>,
}

impl SemanticMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_unique(
        map: &mut HashMap<String, TextureSemanticRef>,
        name: String,
        value: TextureSemanticRef,
    ) -> Result<()> {
        if map.contains_key(&name) {
            return Err(FilterChainError::DuplicateAlias(name));
        }
        map.insert(name, value);
        Ok(())
    }

    fn insert_texture(&mut self, name: String, value: TextureSemanticRef) -> Result<()> {
        if builtin_texture(&name).is_some() {
            return Err(FilterChainError::DuplicateAlias(name));
        }
        Self::insert_unique(&mut self.textures, name, value)
    }

    fn insert_uniform(&mut self, name: String, value: TextureSemanticRef) -> Result<()> {
        if Semantic::from_name(&name).is_some() || builtin_texture_size(&name).is_some() {
            return Err(FilterChainError::DuplicateAlias(name));
        }
        Self::insert_unique(&mut self.uniforms, name, value)
    }

    /// Register the aliases of a named pass.
    ///
    /// Names shadowing a built-in semantic are rejected.
    pub fn insert_pass(&mut self, name: &str, index: usize) -> Result<()> {
        let output = TextureSemanticRef::new(TextureSemantic::PassOutput, index);
        let feedback = TextureSemanticRef::new(TextureSemantic::PassFeedback, index);
        self.insert_texture(name.to_string(), output)?;
        self.insert_uniform(format!("{name}Size"), output)?;
        self.insert_texture(format!("{name}Feedback"), feedback)?;
        self.insert_uniform(format!("{name}FeedbackSize"), feedback)
    }

    /// Register the aliases of a lookup texture.
    pub fn insert_lookup(&mut self, id: &str, index: usize) -> Result<()> {
        let user = TextureSemanticRef::new(TextureSemantic::User, index);
        self.insert_texture(id.to_string(), user)?;
        self.insert_uniform(format!("{id}Size"), user)
    }

    /// Resolve a texture alias.
    pub fn texture(&self, name: &str) -> Option<TextureSemanticRef> {
        self.textures.get(name).copied()
    }

    /// Resolve a size alias.
    pub fn uniform(&self, name: &str) -> Option<TextureSemanticRef> {
        self.uniforms.get(name).copied()
    }

    /// Number of texture aliases.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Returns true if no alias is registered.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

// ============================================================================
// Reflection results
// ============================================================================

/// Where a value lives in the uniform block and/or push-constant block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformLocation {
    /// Byte offset in the uniform block.
    pub ubo_offset: Option<u32>,
    /// Byte offset in the push-constant block.
    pub push_offset: Option<u32>,
}

impl UniformLocation {
    /// Returns true if the value is referenced at all.
    pub fn is_bound(&self) -> bool {
        self.ubo_offset.is_some() || self.push_offset.is_some()
    }
}

/// Descriptor binding of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    /// Image binding (combined image-sampler when `sampler_binding` is none).
    pub binding: u32,
    /// Binding of a separate sampler.
    pub sampler_binding: Option<u32>,
    /// Stages reading the texture.
    pub stages: ShaderStageFlags,
}

/// Reflection of one texture semantic slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureSlot {
    /// Texture binding, if the texture is sampled.
    pub texture: Option<TextureBinding>,
    /// Location of its size vec4.
    pub size: UniformLocation,
}

/// Uniform block layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UboReflection {
    /// Descriptor binding in set 0.
    pub binding: u32,
    /// Block size in bytes.
    pub size: u32,
    /// Stages declaring the block.
    pub stages: ShaderStageFlags,
}

/// Push-constant block layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantReflection {
    /// Block size in bytes.
    pub size: u32,
    /// Stages declaring the block.
    pub stages: ShaderStageFlags,
}

/// Inputs reflection resolves names against.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionContext<'a> {
    /// Index of the pass being reflected.
    pub pass_number: usize,
    /// Pass and lookup-texture aliases.
    pub aliases: &'a SemanticMap,
    /// Parameter id to index in the pass's parameter list.
    pub parameters: &'a HashMap<String, usize>,
    /// Number of passes in the chain.
    pub num_passes: usize,
    /// Number of registered lookup textures.
    pub num_lookups: usize,
}

/// Binding map of a shader pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Vertex entry point name.
    pub vertex_entry: String,
    /// Fragment entry point name.
    pub fragment_entry: String,
    /// Uniform block, if declared.
    pub ubo: Option<UboReflection>,
    /// Push-constant block, if declared.
    pub push_constant: Option<PushConstantReflection>,
    semantics: [UniformLocation; Semantic::COUNT],
    textures: [Vec<TextureSlot>; TextureSemantic::COUNT],
    parameters: Vec<UniformLocation>,
}

impl ShaderReflection {
    fn new(vertex_entry: String, fragment_entry: String, num_parameters: usize) -> Self {
        Self {
            vertex_entry,
            fragment_entry,
            ubo: None,
            push_constant: None,
            semantics: [UniformLocation::default(); Semantic::COUNT],
            textures: Default::default(),
            parameters: vec![UniformLocation::default(); num_parameters],
        }
    }

    /// Location of a standard value.
    pub fn semantic(&self, semantic: Semantic) -> UniformLocation {
        self.semantics[semantic as usize]
    }

    /// Reflection of a texture slot.
    pub fn texture(&self, semantic: TextureSemantic, index: usize) -> Option<&TextureSlot> {
        self.textures[semantic.index()].get(index)
    }

    /// Number of slots of a texture semantic the shader references, as
    /// texture or size.
    pub fn texture_count(&self, semantic: TextureSemantic) -> usize {
        self.textures[semantic.index()].len()
    }

    /// Location of a parameter by index in the pass's parameter list.
    pub fn parameter(&self, index: usize) -> UniformLocation {
        self.parameters.get(index).copied().unwrap_or_default()
    }

    /// Number of parameters reflection was run against.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Every sampled texture, with its semantic.
    pub fn texture_bindings(&self) -> impl Iterator<Item = (TextureSemanticRef, TextureBinding)> + '_ {
        TextureSemantic::ALL.into_iter().flat_map(move |semantic| {
            self.textures[semantic.index()]
                .iter()
                .enumerate()
                .filter_map(move |(index, slot)| {
                    slot.texture
                        .map(|t| (TextureSemanticRef::new(semantic, index), t))
                })
        })
    }

    /// Descriptor-set layout bindings.
    pub fn descriptor_bindings(&self) -> Vec<DescriptorBinding> {
        let mut bindings = Vec::new();
        if let Some(ubo) = self.ubo {
            bindings.push(DescriptorBinding {
                binding: ubo.binding,
                ty: DescriptorType::UniformBuffer,
                stages: ubo.stages,
            });
        }
        for (_, texture) in self.texture_bindings() {
            match texture.sampler_binding {
                Some(sampler) => {
                    bindings.push(DescriptorBinding {
                        binding: texture.binding,
                        ty: DescriptorType::SampledImage,
                        stages: texture.stages,
                    });
                    bindings.push(DescriptorBinding {
                        binding: sampler,
                        ty: DescriptorType::Sampler,
                        stages: texture.stages,
                    });
                }
                None => bindings.push(DescriptorBinding {
                    binding: texture.binding,
                    ty: DescriptorType::CombinedImageSampler,
                    stages: texture.stages,
                }),
            }
        }
        bindings.sort_by_key(|b| b.binding);
        bindings
    }

    fn slot_mut(&mut self, texture: TextureSemanticRef) -> &mut TextureSlot {
        let slots = &mut self.textures[texture.semantic.index()];
        if slots.len() <= texture.index {
            slots.resize(texture.index + 1, TextureSlot::default());
        }
        &mut slots[texture.index]
    }
}

// ============================================================================
// Reflection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Ubo,
    PushConstant,
}

fn assign(location: &mut UniformLocation, block: BlockKind, offset: u32, name: &str) -> Result<()> {
    let slot = match block {
        BlockKind::Ubo => &mut location.ubo_offset,
        BlockKind::PushConstant => &mut location.push_offset,
    };
    match *slot {
        Some(existing) if existing != offset => Err(FilterChainError::reflection(format!(
            "'{}' has offset {} in one stage and {} in the other",
            name, existing, offset
        ))),
        _ => {
            *slot = Some(offset);
            Ok(())
        }
    }
}

fn check_kind(member: &BlockMember, expected: MemberKind) -> Result<()> {
    if member.kind != expected {
        return Err(FilterChainError::reflection(format!(
            "'{}' must be a {}, found {}",
            member.name,
            expected.name(),
            member.kind.name()
        )));
    }
    Ok(())
}

fn check_causal(pass_number: usize, texture: TextureSemanticRef) -> Result<()> {
    if texture.semantic == TextureSemantic::PassOutput && texture.index >= pass_number {
        return Err(FilterChainError::NonCausal {
            pass: pass_number,
            referenced: texture.index,
        });
    }
    Ok(())
}

struct Reflector<'a> {
    ctx: ReflectionContext<'a>,
    reflection: ShaderReflection,
    used_bindings: HashMap<u32, String>,
}

impl Reflector<'_> {
    /// Textures the chain never provides would leave their descriptor
    /// unwritten.
    fn check_bindable(&self, texture: TextureSemanticRef, name: &str) -> Result<()> {
        match texture.semantic {
            TextureSemantic::User if texture.index >= self.ctx.num_lookups => {
                Err(FilterChainError::reflection(format!(
                    "'{}' refers to lookup texture #{}, but only {} are registered",
                    name, texture.index, self.ctx.num_lookups
                )))
            }
            TextureSemantic::PassFeedback if texture.index + 1 >= self.ctx.num_passes => {
                Err(FilterChainError::reflection(format!(
                    "'{}' reads feedback of pass #{}, which has no output target",
                    name, texture.index
                )))
            }
            _ => Ok(()),
        }
    }

    fn claim_binding(&mut self, binding: u32, owner: &str) -> Result<()> {
        match self.used_bindings.get(&binding) {
            Some(existing) if existing != owner => Err(FilterChainError::reflection(format!(
                "binding {} is used by both '{}' and '{}'",
                binding, existing, owner
            ))),
            _ => {
                self.used_bindings.insert(binding, owner.to_string());
                Ok(())
            }
        }
    }

    fn member(&mut self, member: &BlockMember, block: BlockKind) -> Result<()> {
        if let Some(semantic) = Semantic::from_name(&member.name) {
            check_kind(member, semantic.expected_kind())?;
            return assign(
                &mut self.reflection.semantics[semantic as usize],
                block,
                member.offset,
                &member.name,
            );
        }

        let texture = builtin_texture_size(&member.name)
            .or_else(|| self.ctx.aliases.uniform(&member.name));
        if let Some(texture) = texture {
            check_kind(member, MemberKind::Vec4)?;
            check_causal(self.ctx.pass_number, texture)?;
            let slot = self.reflection.slot_mut(texture);
            return assign(&mut slot.size, block, member.offset, &member.name);
        }

        if let Some(&index) = self.ctx.parameters.get(&member.name) {
            check_kind(member, MemberKind::Float)?;
            return assign(
                &mut self.reflection.parameters[index],
                block,
                member.offset,
                &member.name,
            );
        }

        Err(FilterChainError::reflection(format!(
            "unknown semantic '{}'",
            member.name
        )))
    }

    fn stage(&mut self, stage: &StageInterface) -> Result<()> {
        if let Some(ubo) = &stage.ubo {
            match &mut self.reflection.ubo {
                Some(existing) if existing.binding != ubo.binding => {
                    return Err(FilterChainError::reflection(format!(
                        "uniform block binding differs between stages ({} and {})",
                        existing.binding, ubo.binding
                    )));
                }
                Some(existing) => {
                    existing.size = existing.size.max(ubo.size);
                    existing.stages |= stage.stage;
                }
                None => {
                    self.claim_binding(ubo.binding, "uniform block")?;
                    self.reflection.ubo = Some(UboReflection {
                        binding: ubo.binding,
                        size: ubo.size,
                        stages: stage.stage,
                    });
                }
            }
            for member in &ubo.members {
                self.member(member, BlockKind::Ubo)?;
            }
        }

        if let Some(push) = &stage.push_constant {
            let entry = self
                .reflection
                .push_constant
                .get_or_insert(PushConstantReflection {
                    size: 0,
                    stages: ShaderStageFlags::empty(),
                });
            entry.size = entry.size.max(push.size);
            entry.stages |= stage.stage;
            for member in &push.members {
                self.member(member, BlockKind::PushConstant)?;
            }
        }

        let mut paired_samplers = vec![false; stage.samplers.len()];
        for image in &stage.images {
            let texture = builtin_texture(&image.name)
                .or_else(|| self.ctx.aliases.texture(&image.name))
                .ok_or_else(|| {
                    FilterChainError::reflection(format!("unknown texture '{}'", image.name))
                })?;
            check_causal(self.ctx.pass_number, texture)?;
            self.check_bindable(texture, &image.name)?;

            let sampler = stage.samplers.iter().position(|s| {
                s.name == format!("{}Sampler", image.name)
                    || s.name == format!("{}_sampler", image.name)
            });
            let sampler_binding = sampler.map(|i| {
                paired_samplers[i] = true;
                stage.samplers[i].binding
            });

            self.claim_binding(image.binding, &image.name)?;
            if let Some(binding) = sampler_binding {
                self.claim_binding(binding, &format!("{}:sampler", image.name))?;
            }

            let stage_flags = stage.stage;
            let slot = self.reflection.slot_mut(texture);
            match &mut slot.texture {
                Some(existing)
                    if existing.binding != image.binding
                        || existing.sampler_binding != sampler_binding =>
                {
                    return Err(FilterChainError::reflection(format!(
                        "texture '{}' is bound differently in each stage",
                        image.name
                    )));
                }
                Some(existing) => existing.stages |= stage_flags,
                None => {
                    slot.texture = Some(TextureBinding {
                        binding: image.binding,
                        sampler_binding,
                        stages: stage_flags,
                    });
                }
            }
        }

        if let Some(unpaired) = paired_samplers
            .iter()
            .position(|paired| !paired)
            .map(|i| &stage.samplers[i])
        {
            return Err(FilterChainError::reflection(format!(
                "sampler '{}' is not paired with a texture",
                unpaired.name
            )));
        }

        Ok(())
    }
}

/// Reflect a vertex/fragment module pair.
pub fn reflect_modules(
    vertex: &naga::Module,
    fragment: &naga::Module,
    ctx: ReflectionContext<'_>,
) -> Result<ShaderReflection> {
    let vertex = StageInterface::from_module(vertex, naga::ShaderStage::Vertex)?;
    let fragment = StageInterface::from_module(fragment, naga::ShaderStage::Fragment)?;

    let num_parameters = ctx.parameters.values().map(|i| i + 1).max().unwrap_or(0);
    let mut reflector = Reflector {
        ctx,
        reflection: ShaderReflection::new(
            vertex.entry_point.clone(),
            fragment.entry_point.clone(),
            num_parameters,
        ),
        used_bindings: HashMap::new(),
    };
    reflector.stage(&vertex)?;
    reflector.stage(&fragment)?;
    Ok(reflector.reflection)
}
