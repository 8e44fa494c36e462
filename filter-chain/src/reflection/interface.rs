//! Per-stage shader interface extraction from a naga module.

use naga::{AddressSpace, ImageDimension, ScalarKind, TypeInner, VectorSize};

use crate::error::{FilterChainError, Result};
use crate::types::ShaderStageFlags;

/// Shape of a uniform or push-constant block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberKind {
    Mat4,
    Vec4,
    Float,
    Uint,
    Int,
    Other,
}

impl MemberKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Mat4 => "mat4",
            Self::Vec4 => "vec4",
            Self::Float => "float",
            Self::Uint => "uint",
            Self::Int => "int",
            Self::Other => "unsupported type",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BlockMember {
    pub name: String,
    pub offset: u32,
    pub kind: MemberKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub binding: u32,
    pub size: u32,
    pub members: Vec<BlockMember>,
}

/// An image or sampler global.
#[derive(Debug, Clone)]
pub(crate) struct ResourceGlobal {
    pub name: String,
    pub binding: u32,
}

/// Everything reflection needs from one shader stage.
#[derive(Debug, Clone)]
pub(crate) struct StageInterface {
    pub stage: ShaderStageFlags,
    pub entry_point: String,
    pub ubo: Option<Block>,
    pub push_constant: Option<Block>,
    pub images: Vec<ResourceGlobal>,
    pub samplers: Vec<ResourceGlobal>,
}

impl StageInterface {
    pub(crate) fn from_module(module: &naga::Module, stage: naga::ShaderStage) -> Result<Self> {
        let stage_flags = match stage {
            naga::ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            naga::ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            naga::ShaderStage::Compute => {
                return Err(FilterChainError::reflection(
                    "compute shaders cannot be used in a filter pass",
                ));
            }
        };

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == stage)
            .map(|ep| ep.name.clone())
            .ok_or_else(|| {
                FilterChainError::reflection(format!("no {:?} entry point in module", stage))
            })?;

        let mut interface = Self {
            stage: stage_flags,
            entry_point,
            ubo: None,
            push_constant: None,
            images: Vec::new(),
            samplers: Vec::new(),
        };

        for (_, var) in module.global_variables.iter() {
            let name = var.name.clone().unwrap_or_default();
            match var.space {
                AddressSpace::Uniform => {
                    let binding = resource_binding(var, &name)?;
                    if interface.ubo.is_some() {
                        return Err(FilterChainError::reflection(format!(
                            "{:?} stage declares more than one uniform block",
                            stage
                        )));
                    }
                    interface.ubo = Some(block(module, var.ty, binding, &name)?);
                }
                AddressSpace::PushConstant => {
                    if interface.push_constant.is_some() {
                        return Err(FilterChainError::reflection(format!(
                            "{:?} stage declares more than one push constant block",
                            stage
                        )));
                    }
                    interface.push_constant = Some(block(module, var.ty, 0, &name)?);
                }
                AddressSpace::Handle => {
                    let binding = resource_binding(var, &name)?;
                    match module.types[var.ty].inner {
                        TypeInner::Image {
                            dim: ImageDimension::D2,
                            arrayed: false,
                            ..
                        } => {
                            interface.images.push(ResourceGlobal { name, binding });
                        }
                        TypeInner::Sampler { .. } => {
                            interface.samplers.push(ResourceGlobal { name, binding });
                        }
                        _ => {
                            return Err(FilterChainError::reflection(format!(
                                "resource '{}' must be a 2D texture or a sampler",
                                name
                            )));
                        }
                    }
                }
                AddressSpace::Storage { .. } => {
                    return Err(FilterChainError::reflection(format!(
                        "storage buffer '{}' is not supported",
                        name
                    )));
                }
                _ => {}
            }
        }

        Ok(interface)
    }
}

fn resource_binding(var: &naga::GlobalVariable, name: &str) -> Result<u32> {
    let binding = var.binding.as_ref().ok_or_else(|| {
        FilterChainError::reflection(format!("resource '{}' has no binding", name))
    })?;
    if binding.group != 0 {
        return Err(FilterChainError::reflection(format!(
            "resource '{}' uses descriptor set {}, only set 0 is supported",
            name, binding.group
        )));
    }
    Ok(binding.binding)
}

fn block(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: u32,
    name: &str,
) -> Result<Block> {
    let TypeInner::Struct { span, .. } = module.types[ty].inner else {
        return Err(FilterChainError::reflection(format!(
            "block '{}' is not a struct",
            name
        )));
    };
    let mut members = Vec::new();
    collect_members(module, ty, 0, &mut members);
    Ok(Block {
        binding,
        size: span,
        members,
    })
}

// Nested structs are flattened; SPIR-V writers may wrap the block in an
// outer struct.
fn collect_members(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    base: u32,
    out: &mut Vec<BlockMember>,
) {
    let TypeInner::Struct { ref members, .. } = module.types[ty].inner else {
        return;
    };
    for member in members {
        let offset = base + member.offset;
        if matches!(module.types[member.ty].inner, TypeInner::Struct { .. }) {
            collect_members(module, member.ty, offset, out);
        } else {
            out.push(BlockMember {
                name: member.name.clone().unwrap_or_default(),
                offset,
                kind: member_kind(&module.types[member.ty].inner),
            });
        }
    }
}

fn member_kind(inner: &TypeInner) -> MemberKind {
    match *inner {
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar:
                naga::Scalar {
                    kind: ScalarKind::Float,
                    width: 4,
                },
        } => MemberKind::Mat4,
        TypeInner::Vector {
            size: VectorSize::Quad,
            scalar:
                naga::Scalar {
                    kind: ScalarKind::Float,
                    width: 4,
                },
        } => MemberKind::Vec4,
        TypeInner::Scalar(naga::Scalar { kind, width: 4 }) => match kind {
            ScalarKind::Float => MemberKind::Float,
            ScalarKind::Uint => MemberKind::Uint,
            ScalarKind::Sint => MemberKind::Int,
            _ => MemberKind::Other,
        },
        _ => MemberKind::Other,
    }
}
