//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It hands out sequential handles,
//! keeps buffer contents and descriptor writes in memory, and records every
//! command per command buffer so tests can inspect exactly what the chain
//! emitted.
//!
//! It also acts as a lifetime checker. Every handle is tracked from creation
//! to destruction, and the backend flags:
//! - recording or binding an object that was already destroyed,
//! - destroying an object referenced by a command buffer that was
//!   [`submit`](DummyBackend::submit)ted but not yet
//!   [`complete`](DummyBackend::complete)d,
//! - layout transitions whose source layout doesn't match the tracked layout.
//!
//! Violations are collected rather than panicking so tests can assert on
//! them with a readable message.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::{FilterChainError, Result};
use crate::types::{
    BufferHandle, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FramebufferHandle, ImageHandle, ImageLayout, ImageViewHandle,
    MemoryHandle, PipelineHandle, PipelineLayoutHandle, RenderPassHandle, SamplerDescriptor,
    SamplerHandle, ScissorRect, ShaderStageFlags, Size2D, TextureFormat, Viewport,
};

use super::{
    BufferDescriptor, DescriptorBinding, DescriptorWrite, FilterBackend,
    GraphicsPipelineDescriptor, ImageDescriptor, MemoryRequirements, PushConstantRange,
};

/// Kind of object tracked by the dummy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Buffer.
    Buffer,
    /// Image.
    Image,
    /// Image view.
    ImageView,
    /// Device memory.
    Memory,
    /// Render pass.
    RenderPass,
    /// Framebuffer.
    Framebuffer,
    /// Sampler.
    Sampler,
    /// Descriptor-set layout.
    DescriptorSetLayout,
    /// Descriptor pool.
    DescriptorPool,
    /// Descriptor set.
    DescriptorSet,
    /// Pipeline layout.
    PipelineLayout,
    /// Graphics pipeline.
    Pipeline,
    /// Command buffer.
    CommandBuffer,
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Image layout transition.
    TransitionImage {
        image: ImageHandle,
        levels: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    /// Render pass begin.
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        size: Size2D,
    },
    /// Render pass end.
    EndRenderPass,
    /// Pipeline bind.
    BindPipeline(PipelineHandle),
    /// Descriptor set bind.
    BindDescriptorSet {
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    },
    /// Push-constant update.
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        data: Vec<u8>,
    },
    /// Vertex buffer bind.
    BindVertexBuffer { buffer: BufferHandle, offset: u64 },
    /// Viewport update.
    SetViewport(Viewport),
    /// Scissor update.
    SetScissor(ScissorRect),
    /// Non-indexed draw.
    Draw { vertex_count: u32, first_vertex: u32 },
    /// Mip chain generation.
    GenerateMipmaps {
        image: ImageHandle,
        size: Size2D,
        levels: u32,
    },
    /// Clear to zero.
    ClearImage { image: ImageHandle, levels: u32 },
    /// Image copy.
    CopyImage {
        src: ImageHandle,
        dst: ImageHandle,
        size: Size2D,
    },
    /// Buffer to image upload.
    CopyBufferToImage {
        buffer: BufferHandle,
        image: ImageHandle,
        size: Size2D,
    },
}

/// Information about a live dummy image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyImage {
    /// The descriptor the image was created with.
    pub descriptor: ImageDescriptor,
    /// Memory bound to the image.
    pub memory: Option<MemoryHandle>,
    /// Layout tracked at record time.
    pub layout: ImageLayout,
}

#[derive(Debug, Default)]
struct DummyBuffer {
    data: Vec<u8>,
    mapped: bool,
}

#[derive(Debug)]
struct DummyView {
    image: ImageHandle,
    base_level: u32,
    level_count: u32,
}

#[derive(Debug)]
struct DummySet {
    pool: DescriptorPoolHandle,
    writes: BTreeMap<u32, DescriptorWrite>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    live: HashMap<u64, ObjectKind>,
    created: HashMap<ObjectKind, usize>,
    buffers: HashMap<u64, DummyBuffer>,
    images: HashMap<u64, DummyImage>,
    memory: HashMap<u64, MemoryRequirements>,
    views: HashMap<u64, DummyView>,
    framebuffers: HashMap<u64, ImageViewHandle>,
    sets: HashMap<u64, DummySet>,
    commands: HashMap<u64, Vec<RecordedCommand>>,
    in_flight: HashMap<u64, HashSet<u64>>,
    pending_failures: HashMap<ObjectKind, usize>,
    violations: Vec<String>,
    wait_idle_count: usize,
}

impl DummyState {
    fn create(&mut self, kind: ObjectKind) -> Result<u64> {
        if let Some(pending) = self.pending_failures.get_mut(&kind)
            && *pending > 0
        {
            *pending -= 1;
            log::trace!("DummyBackend: injected failure creating {:?}", kind);
            return Err(FilterChainError::resource(format!(
                "injected failure creating {:?}",
                kind
            )));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.live.insert(id, kind);
        *self.created.entry(kind).or_default() += 1;
        log::trace!("DummyBackend: created {:?} #{}", kind, id);
        Ok(id)
    }

    fn check_live(&mut self, id: u64, kind: ObjectKind, context: &str) -> bool {
        match self.live.get(&id) {
            Some(live_kind) if *live_kind == kind => true,
            _ => {
                self.violations
                    .push(format!("{}: {:?} #{} is not alive", context, kind, id));
                false
            }
        }
    }

    fn destroy(&mut self, id: u64, kind: ObjectKind) -> bool {
        if id == 0 {
            return false;
        }
        if !self.check_live(id, kind, "destroy") {
            return false;
        }
        for (cmd, refs) in &self.in_flight {
            if refs.contains(&id) {
                self.violations.push(format!(
                    "destroy: {:?} #{} is still referenced by in-flight command buffer #{}",
                    kind, id, cmd
                ));
            }
        }
        self.live.remove(&id);
        log::trace!("DummyBackend: destroyed {:?} #{}", kind, id);
        true
    }

    fn record(&mut self, cmd: CommandBufferHandle, command: RecordedCommand) {
        if !self.check_live(cmd.0, ObjectKind::CommandBuffer, "record") {
            return;
        }
        if self.in_flight.contains_key(&cmd.0) {
            self.violations.push(format!(
                "record: command buffer #{} is in flight",
                cmd.0
            ));
        }
        self.commands.entry(cmd.0).or_default().push(command);
    }

    fn transition(&mut self, image: ImageHandle, old: ImageLayout, new: ImageLayout) {
        if let Some(info) = self.images.get_mut(&image.0) {
            if old != ImageLayout::Undefined && info.layout != old {
                self.violations.push(format!(
                    "transition: image #{} is in {:?}, not {:?}",
                    image.0, info.layout, old
                ));
            }
            info.layout = new;
        }
    }

    fn expect_layout(&mut self, image: ImageHandle, layout: ImageLayout, context: &str) {
        if let Some(info) = self.images.get(&image.0)
            && info.layout != layout
        {
            let tracked = info.layout;
            self.violations.push(format!(
                "{}: image #{} is in {:?}, expected {:?}",
                context, image.0, tracked, layout
            ));
        }
    }

    fn write_refs(write: &DescriptorWrite, refs: &mut HashSet<u64>) {
        match *write {
            DescriptorWrite::UniformBuffer { buffer, .. } => {
                refs.insert(buffer.0);
            }
            DescriptorWrite::CombinedImageSampler { view, sampler, .. } => {
                refs.insert(view.0);
                refs.insert(sampler.0);
            }
            DescriptorWrite::SampledImage { view, .. } => {
                refs.insert(view.0);
            }
            DescriptorWrite::Sampler { sampler, .. } => {
                refs.insert(sampler.0);
            }
        }
    }

    /// Collect every object a command buffer reads when executed.
    fn command_refs(&self, cmd: u64) -> HashSet<u64> {
        let mut refs = HashSet::new();
        let Some(commands) = self.commands.get(&cmd) else {
            return refs;
        };
        for command in commands {
            match command {
                RecordedCommand::TransitionImage { image, .. }
                | RecordedCommand::GenerateMipmaps { image, .. }
                | RecordedCommand::ClearImage { image, .. } => {
                    refs.insert(image.0);
                }
                RecordedCommand::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    ..
                } => {
                    refs.insert(render_pass.0);
                    refs.insert(framebuffer.0);
                    if let Some(view) = self.framebuffers.get(&framebuffer.0) {
                        refs.insert(view.0);
                    }
                }
                RecordedCommand::BindPipeline(pipeline) => {
                    refs.insert(pipeline.0);
                }
                RecordedCommand::BindDescriptorSet { layout, set } => {
                    refs.insert(layout.0);
                    refs.insert(set.0);
                    if let Some(info) = self.sets.get(&set.0) {
                        refs.insert(info.pool.0);
                        for write in info.writes.values() {
                            Self::write_refs(write, &mut refs);
                        }
                    }
                }
                RecordedCommand::PushConstants { layout, .. } => {
                    refs.insert(layout.0);
                }
                RecordedCommand::BindVertexBuffer { buffer, .. } => {
                    refs.insert(buffer.0);
                }
                RecordedCommand::CopyImage { src, dst, .. } => {
                    refs.insert(src.0);
                    refs.insert(dst.0);
                }
                RecordedCommand::CopyBufferToImage { buffer, image, .. } => {
                    refs.insert(buffer.0);
                    refs.insert(image.0);
                }
                RecordedCommand::EndRenderPass
                | RecordedCommand::SetViewport(_)
                | RecordedCommand::SetScissor(_)
                | RecordedCommand::Draw { .. } => {}
            }
        }
        refs
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    min_uniform_alignment: u64,
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Create a new dummy backend with a 256-byte uniform offset alignment.
    pub fn new() -> Self {
        Self::with_uniform_alignment(256)
    }

    /// Create a dummy backend reporting the given uniform offset alignment.
    pub fn with_uniform_alignment(alignment: u64) -> Self {
        Self {
            min_uniform_alignment: alignment,
            state: Mutex::new(DummyState::default()),
        }
    }

    // --- Test controls ---

    /// Make the next creation of `kind` fail with a resource-creation error.
    pub fn inject_failure(&self, kind: ObjectKind) {
        *self.state.lock().pending_failures.entry(kind).or_default() += 1;
    }

    /// Drop any failures that were injected but not triggered.
    pub fn clear_failures(&self) {
        self.state.lock().pending_failures.clear();
    }

    /// Begin recording a new command buffer.
    pub fn begin_command_buffer(&self) -> CommandBufferHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, ObjectKind::CommandBuffer);
        state.commands.insert(id, Vec::new());
        CommandBufferHandle(id)
    }

    /// Simulate submission: every object the command buffer references is
    /// checked for liveness and pinned until [`complete`](Self::complete).
    pub fn submit(&self, cmd: CommandBufferHandle) {
        let mut state = self.state.lock();
        let refs = state.command_refs(cmd.0);
        let dead: Vec<u64> = refs
            .iter()
            .copied()
            .filter(|id| !state.live.contains_key(id))
            .collect();
        for id in dead {
            state.violations.push(format!(
                "submit: command buffer #{} references destroyed object #{}",
                cmd.0, id
            ));
        }
        state.in_flight.insert(cmd.0, refs);
    }

    /// Simulate GPU completion of a submitted command buffer.
    pub fn complete(&self, cmd: CommandBufferHandle) {
        let mut state = self.state.lock();
        if let Some(refs) = state.in_flight.remove(&cmd.0) {
            let dead: Vec<u64> = refs
                .iter()
                .copied()
                .filter(|id| !state.live.contains_key(id))
                .collect();
            for id in dead {
                state.violations.push(format!(
                    "complete: object #{} was destroyed while command buffer #{} executed",
                    id, cmd.0
                ));
            }
        }
    }

    /// Commands recorded into a command buffer so far.
    pub fn commands(&self, cmd: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .commands
            .get(&cmd.0)
            .cloned()
            .unwrap_or_default()
    }

    /// Every lifetime or layout violation observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Number of live objects of a kind.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    /// Number of objects of a kind created over the backend's lifetime.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .created
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    /// Whether a handle value refers to a live object.
    pub fn is_live(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// Number of times `wait_idle` was called.
    pub fn wait_idle_count(&self) -> usize {
        self.state.lock().wait_idle_count
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.clone())
    }

    /// Current descriptor writes of a set, ordered by binding.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Vec<DescriptorWrite> {
        self.state
            .lock()
            .sets
            .get(&set.0)
            .map(|s| s.writes.values().copied().collect())
            .unwrap_or_default()
    }

    /// Information about a live image.
    pub fn image(&self, image: ImageHandle) -> Option<DummyImage> {
        let state = self.state.lock();
        if !state.live.contains_key(&image.0) {
            return None;
        }
        state.images.get(&image.0).cloned()
    }

    /// Image a live view was created from.
    pub fn view_image(&self, view: ImageViewHandle) -> Option<ImageHandle> {
        let state = self.state.lock();
        if !state.live.contains_key(&view.0) {
            return None;
        }
        state.views.get(&view.0).map(|v| v.image)
    }

    /// Level range `(base, count)` of a live view.
    pub fn view_levels(&self, view: ImageViewHandle) -> Option<(u32, u32)> {
        let state = self.state.lock();
        if !state.live.contains_key(&view.0) {
            return None;
        }
        state.views.get(&view.0).map(|v| (v.base_level, v.level_count))
    }

    /// Size of a live memory allocation.
    pub fn memory_size(&self, memory: MemoryHandle) -> Option<u64> {
        let state = self.state.lock();
        if !state.live.contains_key(&memory.0) {
            return None;
        }
        state.memory.get(&memory.0).map(|m| m.size)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn image_requirements(descriptor: &ImageDescriptor) -> MemoryRequirements {
    let mut size = 0u64;
    let mut width = descriptor.size.width.max(1) as u64;
    let mut height = descriptor.size.height.max(1) as u64;
    for _ in 0..descriptor.mip_levels.max(1) {
        size += width * height * descriptor.format.block_size() as u64;
        width = (width / 2).max(1);
        height = (height / 2).max(1);
    }
    MemoryRequirements {
        size: size.div_ceil(256) * 256,
        memory_type: 0,
    }
}

impl FilterBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.min_uniform_alignment
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        let id = state.create(ObjectKind::Buffer)?;
        state.buffers.insert(
            id,
            DummyBuffer {
                data: vec![0; descriptor.size as usize],
                mapped: false,
            },
        );
        log::trace!(
            "DummyBackend: buffer #{} ({:?}, {} bytes)",
            id,
            descriptor.usage,
            descriptor.size
        );
        Ok(BufferHandle(id))
    }

    fn map_buffer(&self, buffer: BufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        if !state.check_live(buffer.0, ObjectKind::Buffer, "map") {
            return Err(FilterChainError::Backend(format!(
                "buffer #{} is not alive",
                buffer.0
            )));
        }
        if let Some(b) = state.buffers.get_mut(&buffer.0) {
            b.mapped = true;
        }
        Ok(())
    }

    fn write_mapped(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.check_live(buffer.0, ObjectKind::Buffer, "write") {
            return;
        }
        let Some(b) = state.buffers.get_mut(&buffer.0) else {
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if !b.mapped {
            state
                .violations
                .push(format!("write: buffer #{} is not mapped", buffer.0));
        } else if end > b.data.len() {
            state.violations.push(format!(
                "write: range {}..{} exceeds buffer #{} of {} bytes",
                start,
                end,
                buffer.0,
                b.data.len()
            ));
        } else {
            b.data[start..end].copy_from_slice(data);
        }
    }

    fn unmap_buffer(&self, buffer: BufferHandle) {
        if let Some(b) = self.state.lock().buffers.get_mut(&buffer.0) {
            b.mapped = false;
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().destroy(buffer.0, ObjectKind::Buffer);
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, MemoryRequirements)> {
        let mut state = self.state.lock();
        let id = state.create(ObjectKind::Image)?;
        state.images.insert(
            id,
            DummyImage {
                descriptor: descriptor.clone(),
                memory: None,
                layout: ImageLayout::Undefined,
            },
        );
        Ok((ImageHandle(id), image_requirements(descriptor)))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.state.lock().destroy(image.0, ObjectKind::Image);
    }

    fn allocate_memory(&self, requirements: &MemoryRequirements) -> Result<MemoryHandle> {
        let mut state = self.state.lock();
        let id = state.create(ObjectKind::Memory)?;
        state.memory.insert(id, *requirements);
        Ok(MemoryHandle(id))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        self.state.lock().destroy(memory.0, ObjectKind::Memory);
    }

    fn bind_image_memory(&self, image: ImageHandle, memory: MemoryHandle) -> Result<()> {
        let mut state = self.state.lock();
        if !state.check_live(image.0, ObjectKind::Image, "bind memory")
            || !state.check_live(memory.0, ObjectKind::Memory, "bind memory")
        {
            return Err(FilterChainError::Backend(
                "binding memory to a dead object".to_string(),
            ));
        }
        let required = state
            .images
            .get(&image.0)
            .map(|i| image_requirements(&i.descriptor).size)
            .unwrap_or_default();
        let available = state.memory.get(&memory.0).map(|m| m.size).unwrap_or_default();
        if required > available {
            return Err(FilterChainError::Backend(format!(
                "memory #{} holds {} bytes, image #{} needs {}",
                memory.0, available, image.0, required
            )));
        }
        if let Some(info) = state.images.get_mut(&image.0) {
            info.memory = Some(memory);
        }
        Ok(())
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        _format: TextureFormat,
        base_level: u32,
        level_count: u32,
    ) -> Result<ImageViewHandle> {
        let mut state = self.state.lock();
        if !state.check_live(image.0, ObjectKind::Image, "create view") {
            return Err(FilterChainError::resource("view of a dead image"));
        }
        let id = state.create(ObjectKind::ImageView)?;
        state.views.insert(
            id,
            DummyView {
                image,
                base_level,
                level_count,
            },
        );
        Ok(ImageViewHandle(id))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.state.lock().destroy(view.0, ObjectKind::ImageView);
    }

    fn create_render_pass(&self, _format: TextureFormat) -> Result<RenderPassHandle> {
        self.state
            .lock()
            .create(ObjectKind::RenderPass)
            .map(RenderPassHandle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state
            .lock()
            .destroy(render_pass.0, ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachment: ImageViewHandle,
        _size: Size2D,
    ) -> Result<FramebufferHandle> {
        let mut state = self.state.lock();
        state.check_live(render_pass.0, ObjectKind::RenderPass, "create framebuffer");
        state.check_live(attachment.0, ObjectKind::ImageView, "create framebuffer");
        let id = state.create(ObjectKind::Framebuffer)?;
        state.framebuffers.insert(id, attachment);
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state
            .lock()
            .destroy(framebuffer.0, ObjectKind::Framebuffer);
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor);
        self.state
            .lock()
            .create(ObjectKind::Sampler)
            .map(SamplerHandle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().destroy(sampler.0, ObjectKind::Sampler);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutHandle> {
        self.state
            .lock()
            .create(ObjectKind::DescriptorSetLayout)
            .map(DescriptorSetLayoutHandle)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state
            .lock()
            .destroy(layout.0, ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        _bindings: &[DescriptorBinding],
        _max_sets: u32,
    ) -> Result<DescriptorPoolHandle> {
        self.state
            .lock()
            .create(ObjectKind::DescriptorPool)
            .map(DescriptorPoolHandle)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        if !state.destroy(pool.0, ObjectKind::DescriptorPool) {
            return;
        }
        let sets: Vec<u64> = state
            .sets
            .iter()
            .filter(|(_, s)| s.pool == pool)
            .map(|(id, _)| *id)
            .collect();
        for set in sets {
            state.destroy(set, ObjectKind::DescriptorSet);
            state.sets.remove(&set);
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let mut state = self.state.lock();
        state.check_live(pool.0, ObjectKind::DescriptorPool, "allocate set");
        state.check_live(layout.0, ObjectKind::DescriptorSetLayout, "allocate set");
        let id = state.create(ObjectKind::DescriptorSet)?;
        state.sets.insert(
            id,
            DummySet {
                pool,
                writes: BTreeMap::new(),
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        if !state.check_live(set.0, ObjectKind::DescriptorSet, "update set") {
            return;
        }
        if state.in_flight.values().any(|refs| refs.contains(&set.0)) {
            state.violations.push(format!(
                "update set: set #{} is bound by an in-flight command buffer",
                set.0
            ));
        }
        for write in writes {
            match *write {
                DescriptorWrite::UniformBuffer { buffer, .. } => {
                    state.check_live(buffer.0, ObjectKind::Buffer, "update set");
                }
                DescriptorWrite::CombinedImageSampler { view, sampler, .. } => {
                    state.check_live(view.0, ObjectKind::ImageView, "update set");
                    state.check_live(sampler.0, ObjectKind::Sampler, "update set");
                }
                DescriptorWrite::SampledImage { view, .. } => {
                    state.check_live(view.0, ObjectKind::ImageView, "update set");
                }
                DescriptorWrite::Sampler { sampler, .. } => {
                    state.check_live(sampler.0, ObjectKind::Sampler, "update set");
                }
            }
            if let Some(s) = state.sets.get_mut(&set.0) {
                s.writes.insert(write.binding(), *write);
            }
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layout: DescriptorSetLayoutHandle,
        _push_constants: Option<PushConstantRange>,
    ) -> Result<PipelineLayoutHandle> {
        let mut state = self.state.lock();
        state.check_live(
            set_layout.0,
            ObjectKind::DescriptorSetLayout,
            "create pipeline layout",
        );
        state
            .create(ObjectKind::PipelineLayout)
            .map(PipelineLayoutHandle)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state
            .lock()
            .destroy(layout.0, ObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor<'_>,
    ) -> Result<PipelineHandle> {
        let mut state = self.state.lock();
        state.check_live(
            descriptor.layout.0,
            ObjectKind::PipelineLayout,
            "create pipeline",
        );
        state.check_live(
            descriptor.render_pass.0,
            ObjectKind::RenderPass,
            "create pipeline",
        );
        if descriptor.vertex_spirv.is_empty() || descriptor.fragment_spirv.is_empty() {
            return Err(FilterChainError::resource("empty shader module"));
        }
        state.create(ObjectKind::Pipeline).map(PipelineHandle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().destroy(pipeline.0, ObjectKind::Pipeline);
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.wait_idle_count += 1;
        state.in_flight.clear();
        Ok(())
    }

    fn cmd_transition_image(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        levels: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let mut state = self.state.lock();
        state.check_live(image.0, ObjectKind::Image, "transition");
        state.transition(image, old_layout, new_layout);
        state.record(
            cmd,
            RecordedCommand::TransitionImage {
                image,
                levels,
                old_layout,
                new_layout,
            },
        );
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        size: Size2D,
    ) {
        let mut state = self.state.lock();
        state.check_live(render_pass.0, ObjectKind::RenderPass, "begin render pass");
        state.check_live(framebuffer.0, ObjectKind::Framebuffer, "begin render pass");
        let image = state
            .framebuffers
            .get(&framebuffer.0)
            .and_then(|view| state.views.get(&view.0))
            .map(|v| v.image);
        if let Some(image) = image {
            state.expect_layout(image, ImageLayout::ColorAttachment, "begin render pass");
        }
        state.record(
            cmd,
            RecordedCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                size,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        self.state.lock().record(cmd, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        let mut state = self.state.lock();
        state.check_live(pipeline.0, ObjectKind::Pipeline, "bind pipeline");
        state.record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        let mut state = self.state.lock();
        state.check_live(layout.0, ObjectKind::PipelineLayout, "bind set");
        state.check_live(set.0, ObjectKind::DescriptorSet, "bind set");
        let writes: Vec<DescriptorWrite> = state
            .sets
            .get(&set.0)
            .map(|s| s.writes.values().copied().collect())
            .unwrap_or_default();
        for write in writes {
            let mut refs = HashSet::new();
            DummyState::write_refs(&write, &mut refs);
            for id in refs {
                if !state.live.contains_key(&id) {
                    state.violations.push(format!(
                        "bind set: set #{} references destroyed object #{}",
                        set.0, id
                    ));
                }
            }
        }
        state.record(cmd, RecordedCommand::BindDescriptorSet { layout, set });
    }

    fn cmd_push_constants(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        data: &[u8],
    ) {
        let mut state = self.state.lock();
        state.check_live(layout.0, ObjectKind::PipelineLayout, "push constants");
        state.record(
            cmd,
            RecordedCommand::PushConstants {
                layout,
                stages,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64) {
        let mut state = self.state.lock();
        state.check_live(buffer.0, ObjectKind::Buffer, "bind vertex buffer");
        state.record(cmd, RecordedCommand::BindVertexBuffer { buffer, offset });
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32, first_vertex: u32) {
        self.state.lock().record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                first_vertex,
            },
        );
    }

    fn cmd_generate_mipmaps(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        size: Size2D,
        levels: u32,
    ) {
        let mut state = self.state.lock();
        state.check_live(image.0, ObjectKind::Image, "generate mipmaps");
        state.expect_layout(image, ImageLayout::ColorAttachment, "generate mipmaps");
        state.transition(
            image,
            ImageLayout::ColorAttachment,
            ImageLayout::ShaderReadOnly,
        );
        state.record(
            cmd,
            RecordedCommand::GenerateMipmaps {
                image,
                size,
                levels,
            },
        );
    }

    fn cmd_clear_image(&self, cmd: CommandBufferHandle, image: ImageHandle, levels: u32) {
        let mut state = self.state.lock();
        state.check_live(image.0, ObjectKind::Image, "clear image");
        state.expect_layout(image, ImageLayout::TransferDst, "clear image");
        state.record(cmd, RecordedCommand::ClearImage { image, levels });
    }

    fn cmd_copy_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        size: Size2D,
    ) {
        let mut state = self.state.lock();
        state.check_live(src.0, ObjectKind::Image, "copy image");
        state.check_live(dst.0, ObjectKind::Image, "copy image");
        state.expect_layout(src, src_layout, "copy image");
        state.expect_layout(dst, ImageLayout::TransferDst, "copy image");
        state.record(cmd, RecordedCommand::CopyImage { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        size: Size2D,
    ) {
        let mut state = self.state.lock();
        state.check_live(buffer.0, ObjectKind::Buffer, "copy buffer to image");
        state.check_live(image.0, ObjectKind::Image, "copy buffer to image");
        state.expect_layout(image, ImageLayout::TransferDst, "copy buffer to image");
        state.record(
            cmd,
            RecordedCommand::CopyBufferToImage {
                buffer,
                image,
                size,
            },
        );
    }
}
