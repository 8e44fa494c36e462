//! Deferred destruction of GPU objects.
//!
//! Command buffers recorded by the chain execute asynchronously, up to
//! `num_slots` frames behind the CPU. An object dropped while frame slot `K`
//! is being recorded may still be read by the GPU work of slot `K`, so it
//! cannot be destroyed right away.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  DeferredDisposer                    │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐            │
//! │  │ Slot 0   │  │ Slot 1   │  │ Slot 2   │  ...       │
//! │  │ pending  │  │ pending  │  │ pending  │            │
//! │  └──────────┘  └──────────┘  └──────────┘            │
//! └──────────────────────────────────────────────────────┘
//!
//! On drop of an owning wrapper:
//!   1. Don't destroy the object
//!   2. Push it into the queue of the slot active right now
//!
//! On notify_sync_index(K):
//!   1. The caller has waited for slot K's previous GPU work
//!   2. Destroy everything in slot K's queue
//!   3. K becomes the active slot
//! ```
//!
//! Owning wrappers ([`Buffer`](crate::buffer::Buffer),
//! [`RenderTarget`](crate::render_target::RenderTarget),
//! [`Pass`](crate::pass::Pass) and the shared resources) hold an
//! `Arc<DeferredDisposer>` and queue their handles on drop, so nothing in the
//! chain ever destroys an object directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::FilterBackend;
use crate::types::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetLayoutHandle, FramebufferHandle,
    ImageHandle, ImageViewHandle, MemoryHandle, PipelineHandle, PipelineLayoutHandle,
    RenderPassHandle, SamplerHandle,
};

/// A GPU object pending destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredResource {
    /// A buffer with its memory.
    Buffer(BufferHandle),
    /// An image. Its memory is queued separately.
    Image(ImageHandle),
    /// An image view.
    ImageView(ImageViewHandle),
    /// A device memory allocation.
    Memory(MemoryHandle),
    /// A render pass.
    RenderPass(RenderPassHandle),
    /// A framebuffer.
    Framebuffer(FramebufferHandle),
    /// A sampler.
    Sampler(SamplerHandle),
    /// A descriptor-set layout.
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    /// A descriptor pool, with every set allocated from it.
    DescriptorPool(DescriptorPoolHandle),
    /// A pipeline layout.
    PipelineLayout(PipelineLayoutHandle),
    /// A graphics pipeline.
    Pipeline(PipelineHandle),
}

impl DeferredResource {
    /// Returns true if the wrapped handle is null.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Buffer(h) => h.is_null(),
            Self::Image(h) => h.is_null(),
            Self::ImageView(h) => h.is_null(),
            Self::Memory(h) => h.is_null(),
            Self::RenderPass(h) => h.is_null(),
            Self::Framebuffer(h) => h.is_null(),
            Self::Sampler(h) => h.is_null(),
            Self::DescriptorSetLayout(h) => h.is_null(),
            Self::DescriptorPool(h) => h.is_null(),
            Self::PipelineLayout(h) => h.is_null(),
            Self::Pipeline(h) => h.is_null(),
        }
    }

    /// Destroy the object immediately.
    ///
    /// The caller must ensure the GPU is no longer using it.
    pub fn destroy(self, backend: &dyn FilterBackend) {
        match self {
            Self::Buffer(h) => backend.destroy_buffer(h),
            Self::Image(h) => backend.destroy_image(h),
            Self::ImageView(h) => backend.destroy_image_view(h),
            Self::Memory(h) => backend.free_memory(h),
            Self::RenderPass(h) => backend.destroy_render_pass(h),
            Self::Framebuffer(h) => backend.destroy_framebuffer(h),
            Self::Sampler(h) => backend.destroy_sampler(h),
            Self::DescriptorSetLayout(h) => backend.destroy_descriptor_set_layout(h),
            Self::DescriptorPool(h) => backend.destroy_descriptor_pool(h),
            Self::PipelineLayout(h) => backend.destroy_pipeline_layout(h),
            Self::Pipeline(h) => backend.destroy_pipeline(h),
        }
    }
}

/// Per-slot queues of GPU objects waiting to be destroyed.
///
/// Also the chain's entry point to the backend: every owning wrapper reaches
/// the device through [`DeferredDisposer::backend`].
pub struct DeferredDisposer {
    backend: Arc<dyn FilterBackend>,
    queues: Mutex<Vec<Vec<DeferredResource>>>,
    current_slot: AtomicUsize,
}

impl std::fmt::Debug for DeferredDisposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDisposer")
            .field("backend", &self.backend.name())
            .field("num_slots", &self.num_slots())
            .field("current_slot", &self.current_slot())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl DeferredDisposer {
    /// Create a disposer with `num_slots` frame-in-flight slots (at least 1).
    pub fn new(backend: Arc<dyn FilterBackend>, num_slots: usize) -> Self {
        Self {
            backend,
            queues: Mutex::new(vec![Vec::new(); num_slots.max(1)]),
            current_slot: AtomicUsize::new(0),
        }
    }

    /// The backend objects are destroyed with.
    pub fn backend(&self) -> &dyn FilterBackend {
        self.backend.as_ref()
    }

    /// Shared handle to the backend.
    pub fn backend_arc(&self) -> &Arc<dyn FilterBackend> {
        &self.backend
    }

    /// Number of frame-in-flight slots.
    pub fn num_slots(&self) -> usize {
        self.queues.lock().len()
    }

    /// Slot whose queue receives deferred objects right now.
    pub fn current_slot(&self) -> usize {
        self.current_slot.load(Ordering::Relaxed)
    }

    /// Queue an object for destruction once the current slot is revisited.
    pub fn defer(&self, resource: DeferredResource) {
        if resource.is_null() {
            return;
        }
        let slot = self.current_slot();
        let mut queues = self.queues.lock();
        let index = slot.min(queues.len() - 1);
        queues[index].push(resource);
    }

    /// Enter slot `slot`, destroying everything deferred the last time it
    /// was active.
    ///
    /// The caller guarantees that the GPU work recorded during the previous
    /// use of `slot` has completed.
    pub fn notify_sync_index(&self, slot: usize) {
        let pending = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(slot) else {
                log::error!(
                    "Sync index {} out of range ({} slots)",
                    slot,
                    queues.len()
                );
                return;
            };
            std::mem::take(queue)
        };
        self.current_slot.store(slot, Ordering::Relaxed);

        if !pending.is_empty() {
            log::trace!(
                "Destroying {} deferred objects of slot {}",
                pending.len(),
                slot
            );
        }
        for resource in pending {
            resource.destroy(self.backend());
        }
    }

    /// Destroy every pending object of every slot.
    ///
    /// Only valid while the device is idle.
    pub fn flush_all(&self) {
        let pending: Vec<DeferredResource> = {
            let mut queues = self.queues.lock();
            queues.iter_mut().flat_map(std::mem::take).collect()
        };
        if !pending.is_empty() {
            log::debug!("Flushing {} deferred objects", pending.len());
        }
        for resource in pending {
            resource.destroy(self.backend());
        }
    }

    /// Change the number of slots. Flushes every queue first, so the device
    /// must be idle.
    pub fn set_num_slots(&self, num_slots: usize) {
        self.flush_all();
        let num_slots = num_slots.max(1);
        *self.queues.lock() = vec![Vec::new(); num_slots];
        if self.current_slot() >= num_slots {
            self.current_slot.store(0, Ordering::Relaxed);
        }
    }

    /// Number of objects pending destruction.
    pub fn pending_count(&self) -> usize {
        self.queues.lock().iter().map(Vec::len).sum()
    }

    /// Number of objects pending destruction in one slot.
    pub fn pending_in_slot(&self, slot: usize) -> usize {
        self.queues.lock().get(slot).map_or(0, Vec::len)
    }
}

impl Drop for DeferredDisposer {
    fn drop(&mut self) {
        let pending = self.pending_count();
        if pending > 0 {
            log::debug!("Disposer dropped with {} pending objects", pending);
            self.flush_all();
        }
    }
}
