//! GPU backend abstraction layer.
//!
//! The filter chain never talks to a graphics API directly. Every resource
//! it creates and every command it records goes through the [`FilterBackend`]
//! trait, which covers exactly what a post-processing chain needs: buffers,
//! images with explicitly managed memory, render passes, framebuffers,
//! samplers, descriptor sets, graphics pipelines and a small set of command
//! recording primitives.
//!
//! # Available Backends
//!
//! - `dummy` (default): in-memory backend that records commands, tracks
//!   object liveness and supports failure injection, used by the tests
//! - `vulkan-backend`: native Vulkan backend using ash and gpu-allocator,
//!   operating on a caller-owned device
//!
//! # Ownership
//!
//! Command buffers are owned by the caller. The chain records into them but
//! never submits, so the backend has no notion of queues or fences; frame
//! pacing is reported to the chain through `notify_sync_index`.

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use crate::error::Result;
use crate::types::{
    BufferHandle, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FramebufferHandle, ImageHandle, ImageLayout, ImageViewHandle,
    MemoryHandle, PipelineHandle, PipelineLayoutHandle, RenderPassHandle, SamplerDescriptor,
    SamplerHandle, ScissorRect, ShaderStageFlags, Size2D, TextureFormat, Viewport,
};

// ============================================================================
// Descriptors
// ============================================================================

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer.
    Vertex,
    /// Uniform buffer.
    Uniform,
    /// Transfer source for image uploads.
    Staging,
}

/// Descriptor for creating a host-visible buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes.
    pub size: u64,
    /// Buffer usage.
    pub usage: BufferUsage,
}

/// Descriptor for creating a render target image.
///
/// Images are always 2D, single-sampled, optimally tiled and usable as color
/// attachment, sampled image, transfer source and transfer destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Size in pixels.
    pub size: Size2D,
    /// Pixel format.
    pub format: TextureFormat,
    /// Number of mip levels.
    pub mip_levels: u32,
}

/// Memory requirements reported for a freshly created image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryRequirements {
    /// Required allocation size in bytes.
    pub size: u64,
    /// Memory type index the allocation must come from.
    pub memory_type: u32,
}

/// Type of a descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Uniform buffer.
    UniformBuffer,
    /// Combined image and sampler.
    CombinedImageSampler,
    /// Sampled image without a sampler.
    SampledImage,
    /// Standalone sampler.
    Sampler,
}

/// One binding of a descriptor-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding index within set 0.
    pub binding: u32,
    /// Descriptor type.
    pub ty: DescriptorType,
    /// Stages that access the binding.
    pub stages: ShaderStageFlags,
}

/// A single descriptor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Bind a range of a uniform buffer.
    UniformBuffer {
        /// Binding index.
        binding: u32,
        /// Buffer to bind.
        buffer: BufferHandle,
        /// Byte offset into the buffer.
        offset: u64,
        /// Range size in bytes.
        range: u64,
    },
    /// Bind a combined image sampler.
    CombinedImageSampler {
        /// Binding index.
        binding: u32,
        /// Image view to bind.
        view: ImageViewHandle,
        /// Layout the image is in when sampled.
        layout: ImageLayout,
        /// Sampler to bind.
        sampler: SamplerHandle,
    },
    /// Bind a sampled image without a sampler.
    SampledImage {
        /// Binding index.
        binding: u32,
        /// Image view to bind.
        view: ImageViewHandle,
        /// Layout the image is in when sampled.
        layout: ImageLayout,
    },
    /// Bind a standalone sampler.
    Sampler {
        /// Binding index.
        binding: u32,
        /// Sampler to bind.
        sampler: SamplerHandle,
    },
}

impl DescriptorWrite {
    /// Binding index this write targets.
    pub fn binding(&self) -> u32 {
        match *self {
            Self::UniformBuffer { binding, .. }
            | Self::CombinedImageSampler { binding, .. }
            | Self::SampledImage { binding, .. }
            | Self::Sampler { binding, .. } => binding,
        }
    }
}

/// A push-constant range of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Size in bytes.
    pub size: u32,
    /// Stages that read the block.
    pub stages: ShaderStageFlags,
}

/// Descriptor for creating a filter pass graphics pipeline.
///
/// The fixed-function state is the same for every pass: a triangle strip of
/// interleaved `vec2` position and `vec2` texcoord (locations 0 and 1,
/// 16-byte stride), no culling, no blending, dynamic viewport and scissor.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDescriptor<'a> {
    /// Pipeline layout.
    pub layout: PipelineLayoutHandle,
    /// Render pass the pipeline renders into (subpass 0).
    pub render_pass: RenderPassHandle,
    /// Vertex shader SPIR-V words.
    pub vertex_spirv: &'a [u32],
    /// Vertex shader entry point.
    pub vertex_entry: &'a str,
    /// Fragment shader SPIR-V words.
    pub fragment_spirv: &'a [u32],
    /// Fragment shader entry point.
    pub fragment_entry: &'a str,
}

// ============================================================================
// Backend trait
// ============================================================================

/// Device and command-stream operations used by the filter chain.
///
/// Creation methods report failures as errors. Destruction methods are
/// infallible and must tolerate null handles. Command methods record into a
/// caller-owned command buffer that is in the recording state.
pub trait FilterBackend: Send + Sync + std::fmt::Debug {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Minimum alignment of dynamic uniform buffer offsets.
    fn min_uniform_buffer_offset_alignment(&self) -> u64;

    // --- Buffers ---

    /// Create a host-visible buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle>;

    /// Make the buffer's memory available for CPU writes.
    fn map_buffer(&self, buffer: BufferHandle) -> Result<()>;

    /// Copy `data` into a mapped buffer at `offset`.
    fn write_mapped(&self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// End CPU access to the buffer's memory.
    fn unmap_buffer(&self, buffer: BufferHandle);

    /// Destroy a buffer together with its memory.
    fn destroy_buffer(&self, buffer: BufferHandle);

    // --- Images and memory ---

    /// Create an image without memory bound.
    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, MemoryRequirements)>;

    /// Destroy an image. Bound memory is not freed.
    fn destroy_image(&self, image: ImageHandle);

    /// Allocate device-local memory.
    fn allocate_memory(&self, requirements: &MemoryRequirements) -> Result<MemoryHandle>;

    /// Free device memory.
    fn free_memory(&self, memory: MemoryHandle);

    /// Bind memory to an image at offset 0.
    fn bind_image_memory(&self, image: ImageHandle, memory: MemoryHandle) -> Result<()>;

    /// Create a 2D color view over `level_count` levels starting at `base_level`.
    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        base_level: u32,
        level_count: u32,
    ) -> Result<ImageViewHandle>;

    /// Destroy an image view.
    fn destroy_image_view(&self, view: ImageViewHandle);

    // --- Render passes and framebuffers ---

    /// Create a single-subpass render pass with one color attachment.
    ///
    /// The attachment is loaded as don't-care, stored, and transitions from
    /// color-attachment-optimal to color-attachment-optimal.
    fn create_render_pass(&self, format: TextureFormat) -> Result<RenderPassHandle>;

    /// Destroy a render pass.
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a framebuffer with a single attachment.
    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachment: ImageViewHandle,
        size: Size2D,
    ) -> Result<FramebufferHandle>;

    /// Destroy a framebuffer.
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // --- Samplers ---

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerHandle>;

    /// Destroy a sampler.
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // --- Descriptors and pipelines ---

    /// Create a descriptor-set layout for set 0.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor-set layout.
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor pool able to hold `max_sets` sets of `bindings`.
    fn create_descriptor_pool(
        &self,
        bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> Result<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate a descriptor set from a pool.
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle>;

    /// Apply descriptor writes to a set.
    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    /// Create a pipeline layout with one set layout and an optional push range.
    fn create_pipeline_layout(
        &self,
        set_layout: DescriptorSetLayoutHandle,
        push_constants: Option<PushConstantRange>,
    ) -> Result<PipelineLayoutHandle>;

    /// Destroy a pipeline layout.
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline.
    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor<'_>,
    ) -> Result<PipelineHandle>;

    /// Destroy a pipeline.
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // --- Synchronization ---

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self) -> Result<()>;

    // --- Command recording ---

    /// Transition every mip level of an image between layouts.
    fn cmd_transition_image(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        levels: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    );

    /// Begin a render pass covering `size`.
    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        size: Size2D,
    );

    /// End the current render pass.
    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle);

    /// Bind a graphics pipeline.
    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind a descriptor set at set 0.
    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    );

    /// Update push constants at offset 0.
    fn cmd_push_constants(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        data: &[u8],
    );

    /// Bind a vertex buffer at binding 0.
    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64);

    /// Set the dynamic viewport.
    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport);

    /// Set the dynamic scissor.
    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect);

    /// Draw non-indexed vertices.
    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32, first_vertex: u32);

    /// Generate the mip chain of an image whose level 0 is in
    /// color-attachment-optimal layout. Every level ends up shader-read-optimal.
    fn cmd_generate_mipmaps(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        size: Size2D,
        levels: u32,
    );

    /// Clear every level of an image in transfer-destination layout to zero.
    fn cmd_clear_image(&self, cmd: CommandBufferHandle, image: ImageHandle, levels: u32);

    /// Copy level 0 of `src` into level 0 of `dst`.
    ///
    /// `src_layout` is either transfer-source or general; `dst` must be in
    /// transfer-destination layout.
    fn cmd_copy_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        size: Size2D,
    );

    /// Copy tightly packed pixels from a buffer into level 0 of an image in
    /// transfer-destination layout.
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        size: Size2D,
    );
}
