//! Offscreen render targets.
//!
//! A [`RenderTarget`] owns everything a pass needs to render into an image
//! and let later passes sample it: the image, a view over all mip levels, a
//! single-level view used as the framebuffer attachment, the backing memory,
//! the render pass and the framebuffer.
//!
//! Resizing never destroys anything directly. The old objects are queued on
//! the [`DeferredDisposer`] for the active frame slot and new ones are created
//! right away. The backing memory survives a resize when the new image fits
//! into it.

use std::sync::Arc;

use crate::backend::{ImageDescriptor, MemoryRequirements};
use crate::disposer::{DeferredDisposer, DeferredResource};
use crate::error::{FilterChainError, Result};
use crate::types::{
    CommandBufferHandle, FramebufferHandle, ImageHandle, ImageLayout, ImageRef, ImageViewHandle,
    MemoryHandle, RenderPassHandle, Size2D, TextureFormat,
};

/// Number of mip levels for an image of `size`, capped at `max_levels`.
pub fn mip_levels(size: Size2D, max_levels: u32) -> u32 {
    let largest = size.width.max(size.height).max(1);
    let full_chain = u32::BITS - largest.leading_zeros();
    full_chain.min(max_levels).max(1)
}

#[derive(Debug, Clone, Copy)]
struct MemoryBlock {
    handle: MemoryHandle,
    size: u64,
    memory_type: u32,
}

impl MemoryBlock {
    fn fits(&self, requirements: &MemoryRequirements) -> bool {
        requirements.size <= self.size && requirements.memory_type == self.memory_type
    }
}

/// An image plus the objects needed to render into it.
pub struct RenderTarget {
    disposer: Arc<DeferredDisposer>,
    size: Size2D,
    format: TextureFormat,
    max_levels: u32,
    levels: u32,
    render_pass: RenderPassHandle,
    image: ImageHandle,
    view: ImageViewHandle,
    attachment_view: ImageViewHandle,
    framebuffer: FramebufferHandle,
    memory: Option<MemoryBlock>,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("levels", &self.levels)
            .field("image", &self.image)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl RenderTarget {
    /// Create a render target.
    ///
    /// `size` must be non-zero on both axes and `format` must be defined.
    pub fn new(
        disposer: &Arc<DeferredDisposer>,
        size: Size2D,
        format: TextureFormat,
        max_levels: u32,
    ) -> Result<Self> {
        if format.is_undefined() {
            return Err(FilterChainError::config(
                "render target format must be defined",
            ));
        }
        let mut target = Self {
            disposer: Arc::clone(disposer),
            size,
            format,
            max_levels: max_levels.max(1),
            levels: 1,
            render_pass: RenderPassHandle::NULL,
            image: ImageHandle::NULL,
            view: ImageViewHandle::NULL,
            attachment_view: ImageViewHandle::NULL,
            framebuffer: FramebufferHandle::NULL,
            memory: None,
        };
        target.render_pass = disposer.backend().create_render_pass(format)?;
        target.resize(size, None)?;
        Ok(target)
    }

    /// Current size.
    pub fn size(&self) -> Size2D {
        self.size
    }

    /// Current format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Number of mip levels of the current image.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Configured maximum number of mip levels.
    pub fn max_levels(&self) -> u32 {
        self.max_levels
    }

    /// Render pass compatible with this target's format.
    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Framebuffer over the attachment view.
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// Image handle.
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    /// View covering all mip levels.
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Backing memory.
    pub fn memory(&self) -> Option<MemoryHandle> {
        self.memory.map(|m| m.handle)
    }

    /// Size of the backing memory allocation.
    pub fn memory_size(&self) -> u64 {
        self.memory.map_or(0, |m| m.size)
    }

    /// Returns true once every object exists. False after a failed resize.
    pub fn is_ready(&self) -> bool {
        !self.image.is_null() && !self.view.is_null() && !self.framebuffer.is_null()
    }

    /// Texture reference to this target, as sampled in `layout`.
    pub fn image_ref(&self, layout: ImageLayout) -> ImageRef {
        ImageRef {
            image: self.image,
            view: self.view,
            layout,
            width: self.size.width,
            height: self.size.height,
            format: self.format,
        }
    }

    /// Resize the target, optionally changing its format.
    ///
    /// Old objects are deferred to the active frame slot. On failure the
    /// target is left not ready with null handles.
    pub fn resize(&mut self, size: Size2D, format: Option<TextureFormat>) -> Result<()> {
        if size.is_empty() {
            return Err(FilterChainError::config(format!(
                "render target size must be non-zero, got {}x{}",
                size.width, size.height
            )));
        }

        self.dispose_image_objects();

        if let Some(format) = format.filter(|f| !f.is_undefined() && *f != self.format) {
            self.disposer
                .defer(DeferredResource::RenderPass(self.render_pass));
            self.render_pass = RenderPassHandle::NULL;
            self.format = format;
            self.render_pass = self.disposer.backend().create_render_pass(format)?;
        }

        self.size = size;
        self.levels = mip_levels(size, self.max_levels);

        log::debug!(
            "Render target resized to {}x{} ({:?}, {} levels)",
            size.width,
            size.height,
            self.format,
            self.levels
        );

        if let Err(e) = self.create_image_objects() {
            self.dispose_image_objects();
            return Err(e);
        }
        Ok(())
    }

    fn create_image_objects(&mut self) -> Result<()> {
        let backend = self.disposer.backend();

        let (image, requirements) = backend.create_image(&ImageDescriptor {
            size: self.size,
            format: self.format,
            mip_levels: self.levels,
        })?;
        self.image = image;

        match self.memory {
            Some(block) if block.fits(&requirements) => {}
            _ => {
                if let Some(old) = self.memory.take() {
                    self.disposer.defer(DeferredResource::Memory(old.handle));
                }
                let handle = backend.allocate_memory(&requirements)?;
                self.memory = Some(MemoryBlock {
                    handle,
                    size: requirements.size,
                    memory_type: requirements.memory_type,
                });
            }
        }
        if let Some(block) = self.memory {
            backend.bind_image_memory(self.image, block.handle)?;
        }

        self.view = backend.create_image_view(self.image, self.format, 0, self.levels)?;
        self.attachment_view = backend.create_image_view(self.image, self.format, 0, 1)?;
        self.framebuffer =
            backend.create_framebuffer(self.render_pass, self.attachment_view, self.size)?;
        Ok(())
    }

    fn dispose_image_objects(&mut self) {
        let disposer = &self.disposer;
        disposer.defer(DeferredResource::Framebuffer(std::mem::take(
            &mut self.framebuffer,
        )));
        disposer.defer(DeferredResource::ImageView(std::mem::take(
            &mut self.attachment_view,
        )));
        disposer.defer(DeferredResource::ImageView(std::mem::take(&mut self.view)));
        disposer.defer(DeferredResource::Image(std::mem::take(&mut self.image)));
    }

    /// Record a clear of every level to transparent black. The image ends up
    /// in shader-read-only layout.
    pub fn clear(&self, cmd: CommandBufferHandle) {
        let backend = self.disposer.backend();
        backend.cmd_transition_image(
            cmd,
            self.image,
            self.levels,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        );
        backend.cmd_clear_image(cmd, self.image, self.levels);
        backend.cmd_transition_image(
            cmd,
            self.image,
            self.levels,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
        );
    }

    /// Record a copy of `source` into level 0. The source must be the same
    /// size as this target; it is returned to its original layout and this
    /// target ends up in shader-read-only layout.
    pub fn copy_from(&self, cmd: CommandBufferHandle, source: &ImageRef) {
        let backend = self.disposer.backend();
        let general = source.layout == ImageLayout::General;

        if !general {
            backend.cmd_transition_image(
                cmd,
                source.image,
                1,
                source.layout,
                ImageLayout::TransferSrc,
            );
        }
        backend.cmd_transition_image(
            cmd,
            self.image,
            self.levels,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        );

        let src_layout = if general {
            ImageLayout::General
        } else {
            ImageLayout::TransferSrc
        };
        backend.cmd_copy_image(cmd, source.image, src_layout, self.image, self.size);

        backend.cmd_transition_image(
            cmd,
            self.image,
            self.levels,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
        );
        if !general {
            backend.cmd_transition_image(
                cmd,
                source.image,
                1,
                ImageLayout::TransferSrc,
                source.layout,
            );
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.dispose_image_objects();
        if let Some(block) = self.memory.take() {
            self.disposer.defer(DeferredResource::Memory(block.handle));
        }
        self.disposer
            .defer(DeferredResource::RenderPass(self.render_pass));
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::FilterBackend;
    use crate::backend::dummy::{DummyBackend, ObjectKind};

    fn setup() -> (Arc<DummyBackend>, Arc<DeferredDisposer>) {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        (backend, disposer)
    }

    #[test]
    fn test_mip_levels() {
        assert_eq!(mip_levels(Size2D::new(256, 256), 1), 1);
        assert_eq!(mip_levels(Size2D::new(256, 256), 16), 9);
        assert_eq!(mip_levels(Size2D::new(300, 10), 16), 9);
        assert_eq!(mip_levels(Size2D::new(1, 1), 16), 1);
        assert_eq!(mip_levels(Size2D::new(640, 480), 4), 4);
    }

    #[test]
    fn test_new_render_target() {
        let (backend, disposer) = setup();
        let target =
            RenderTarget::new(&disposer, Size2D::new(320, 240), TextureFormat::Rgba8Unorm, 1)
                .unwrap();
        assert!(target.is_ready());
        assert_eq!(target.levels(), 1);
        assert_eq!(backend.live_count(ObjectKind::ImageView), 2);
        assert_eq!(
            backend.view_image(target.view()),
            Some(target.image())
        );
    }

    #[test]
    fn test_zero_size_rejected() {
        let (_backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(8, 8), TextureFormat::Rgba8Unorm, 1).unwrap();
        assert!(target.resize(Size2D::new(0, 8), None).is_err());
        assert!(RenderTarget::new(&disposer, Size2D::new(8, 0), TextureFormat::Rgba8Unorm, 1)
            .is_err());
    }

    #[test]
    fn test_memory_reused_on_shrink() {
        let (backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(512, 512), TextureFormat::Rgba8Unorm, 1)
                .unwrap();
        let memory = target.memory();

        target.resize(Size2D::new(256, 256), None).unwrap();
        assert_eq!(target.memory(), memory);
        assert_eq!(backend.created_count(ObjectKind::Memory), 1);
    }

    #[test]
    fn test_memory_reallocated_on_grow() {
        let (backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(64, 64), TextureFormat::Rgba8Unorm, 1)
                .unwrap();
        let old_memory = target.memory().unwrap();

        target.resize(Size2D::new(1024, 1024), None).unwrap();
        assert_ne!(target.memory(), Some(old_memory));
        // Old allocation waits for its slot.
        assert!(backend.is_live(old_memory.raw()));
        disposer.notify_sync_index(0);
        assert!(!backend.is_live(old_memory.raw()));
    }

    #[test]
    fn test_resize_defers_old_objects() {
        let (backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(64, 64), TextureFormat::Rgba8Unorm, 1)
                .unwrap();
        let old_image = target.image();

        target.resize(Size2D::new(32, 32), None).unwrap();
        assert!(backend.is_live(old_image.raw()));
        assert_eq!(disposer.pending_in_slot(0), 4);

        disposer.notify_sync_index(1);
        disposer.notify_sync_index(0);
        assert!(!backend.is_live(old_image.raw()));
        assert!(backend.is_live(target.image().raw()));
    }

    #[test]
    fn test_failed_resize_leaves_target_not_ready() {
        let (backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(64, 64), TextureFormat::Rgba8Unorm, 1)
                .unwrap();

        backend.inject_failure(ObjectKind::ImageView);
        assert!(target.resize(Size2D::new(128, 128), None).is_err());
        assert!(!target.is_ready());
        assert!(target.image().is_null());

        disposer.flush_all();
        assert_eq!(backend.live_count(ObjectKind::Image), 0);

        target.resize(Size2D::new(128, 128), None).unwrap();
        assert!(target.is_ready());
    }

    #[test]
    fn test_format_change_recreates_render_pass() {
        let (backend, disposer) = setup();
        let mut target =
            RenderTarget::new(&disposer, Size2D::new(64, 64), TextureFormat::Rgba8Unorm, 1)
                .unwrap();
        let render_pass = target.render_pass();

        target
            .resize(Size2D::new(64, 64), Some(TextureFormat::Rgba16Float))
            .unwrap();
        assert_ne!(target.render_pass(), render_pass);
        assert_eq!(target.format(), TextureFormat::Rgba16Float);

        target
            .resize(Size2D::new(64, 64), Some(TextureFormat::Undefined))
            .unwrap();
        assert_eq!(target.format(), TextureFormat::Rgba16Float);
        assert_eq!(backend.live_count(ObjectKind::RenderPass), 2);
    }

    #[test]
    fn test_drop_releases_everything() {
        let (backend, disposer) = setup();
        let target =
            RenderTarget::new(&disposer, Size2D::new(64, 64), TextureFormat::Rgba8Unorm, 4)
                .unwrap();
        assert_eq!(target.levels(), 4);
        drop(target);
        disposer.flush_all();
        assert_eq!(backend.live_count(ObjectKind::Image), 0);
        assert_eq!(backend.live_count(ObjectKind::Memory), 0);
        assert_eq!(backend.live_count(ObjectKind::RenderPass), 0);
        assert_eq!(backend.min_uniform_buffer_offset_alignment(), 256);
    }
}
