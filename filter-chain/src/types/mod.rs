//! Common types and descriptors for filter chain resources.
//!
//! This module contains handles, formats, layouts, sampler state and
//! texture references used throughout the filter chain.

mod common;
mod handle;
mod sampler;
mod stage;
mod texture;

pub use common::{ScissorRect, Size2D, Viewport};
pub use handle::{
    BufferHandle, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FramebufferHandle, ImageHandle, ImageViewHandle, MemoryHandle,
    PipelineHandle, PipelineLayoutHandle, RenderPassHandle, SamplerHandle,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use stage::ShaderStageFlags;
pub use texture::{ImageLayout, ImageRef, Texture, TextureFormat};
