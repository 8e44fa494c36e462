//! User lookup textures.
//!
//! A lookup texture is a static image a preset ships alongside its shaders
//! (color grading tables, masks, noise). Shaders reference it by its id, or
//! as `User#` by registration order.

use std::sync::Arc;

use crate::backend::{BufferUsage, ImageDescriptor};
use crate::buffer::Buffer;
use crate::disposer::{DeferredDisposer, DeferredResource};
use crate::error::{FilterChainError, Result};
use crate::render_target::mip_levels;
use crate::types::{
    AddressMode, CommandBufferHandle, FilterMode, ImageHandle, ImageLayout, ImageRef,
    ImageViewHandle, MemoryHandle, Size2D, Texture, TextureFormat,
};

/// Sampling options of a lookup texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupSampling {
    /// Filter for minification and magnification.
    pub filter: FilterMode,
    /// Build a full mip chain and sample it with `filter`.
    pub mipmap: bool,
    /// Address mode.
    pub address: AddressMode,
}

impl Default for LookupSampling {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            mipmap: false,
            address: AddressMode::ClampToEdge,
        }
    }
}

/// A lookup texture owned by the chain.
pub struct LookupTexture {
    disposer: Arc<DeferredDisposer>,
    id: String,
    image: ImageHandle,
    view: ImageViewHandle,
    memory: MemoryHandle,
    staging: Option<Buffer>,
    texture: Texture,
    levels: u32,
}

impl std::fmt::Debug for LookupTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupTexture")
            .field("id", &self.id)
            .field("texture", &self.texture)
            .field("levels", &self.levels)
            .finish_non_exhaustive()
    }
}

impl LookupTexture {
    /// Create a lookup texture and record the upload of `pixels` into `cmd`.
    ///
    /// `pixels` holds tightly packed rows of level 0. The staging buffer is
    /// kept until [`release_staging_buffer`](Self::release_staging_buffer).
    pub fn upload(
        disposer: &Arc<DeferredDisposer>,
        cmd: CommandBufferHandle,
        id: impl Into<String>,
        size: Size2D,
        format: TextureFormat,
        pixels: &[u8],
        sampling: LookupSampling,
    ) -> Result<Self> {
        let id = id.into();
        if size.is_empty() || format.is_undefined() {
            return Err(FilterChainError::config(format!(
                "lookup texture '{}' has an empty size or undefined format",
                id
            )));
        }
        let expected = size.width as usize * size.height as usize * format.block_size() as usize;
        if pixels.len() != expected {
            return Err(FilterChainError::config(format!(
                "lookup texture '{}' expects {} bytes of pixels, got {}",
                id,
                expected,
                pixels.len()
            )));
        }

        let levels = if sampling.mipmap {
            mip_levels(size, u32::MAX)
        } else {
            1
        };

        let mut lut = Self {
            disposer: Arc::clone(disposer),
            id,
            image: ImageHandle::NULL,
            view: ImageViewHandle::NULL,
            memory: MemoryHandle::NULL,
            staging: None,
            texture: Texture::default(),
            levels,
        };

        let backend = disposer.backend();
        let (image, requirements) = backend.create_image(&ImageDescriptor {
            size,
            format,
            mip_levels: levels,
        })?;
        lut.image = image;
        lut.memory = backend.allocate_memory(&requirements)?;
        backend.bind_image_memory(lut.image, lut.memory)?;
        lut.view = backend.create_image_view(lut.image, format, 0, levels)?;

        let staging = Buffer::new(disposer, pixels.len() as u64, BufferUsage::Staging)?;
        staging.map()?.write(0, pixels);

        backend.cmd_transition_image(
            cmd,
            lut.image,
            levels,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        );
        backend.cmd_copy_buffer_to_image(cmd, staging.handle(), lut.image, size);
        if levels > 1 {
            backend.cmd_transition_image(
                cmd,
                lut.image,
                1,
                ImageLayout::TransferDst,
                ImageLayout::ColorAttachment,
            );
            backend.cmd_generate_mipmaps(cmd, lut.image, size, levels);
        } else {
            backend.cmd_transition_image(
                cmd,
                lut.image,
                levels,
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
            );
        }
        lut.staging = Some(staging);

        lut.texture = Texture {
            image: ImageRef {
                image: lut.image,
                view: lut.view,
                layout: ImageLayout::ShaderReadOnly,
                width: size.width,
                height: size.height,
                format,
            },
            filter: sampling.filter,
            mip_filter: if sampling.mipmap {
                sampling.filter
            } else {
                FilterMode::Nearest
            },
            address: sampling.address,
        };

        log::debug!(
            "Lookup texture '{}' {}x{} ({:?}, {} levels)",
            lut.id,
            size.width,
            size.height,
            format,
            levels
        );
        Ok(lut)
    }

    /// Identifier shaders use to reference the texture.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rename the texture.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Texture reference for binding.
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Number of mip levels.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Returns true while the upload staging buffer is held.
    pub fn has_staging_buffer(&self) -> bool {
        self.staging.is_some()
    }

    /// Drop the staging buffer once the upload has been submitted.
    pub fn release_staging_buffer(&mut self) {
        self.staging = None;
    }
}

impl Drop for LookupTexture {
    fn drop(&mut self) {
        self.disposer.defer(DeferredResource::ImageView(self.view));
        self.disposer.defer(DeferredResource::Image(self.image));
        self.disposer.defer(DeferredResource::Memory(self.memory));
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ObjectKind, RecordedCommand};

    #[test]
    fn test_upload_records_copy() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        let cmd = backend.begin_command_buffer();

        let mut lut = LookupTexture::upload(
            &disposer,
            cmd,
            "noise",
            Size2D::new(2, 2),
            TextureFormat::Rgba8Unorm,
            &[255; 16],
            LookupSampling::default(),
        )
        .unwrap();

        assert_eq!(lut.id(), "noise");
        assert_eq!(lut.texture().image.width, 2);
        let commands = backend.commands(cmd);
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::CopyBufferToImage { image, .. } if *image == lut.texture().image.image
        )));
        assert!(backend.violations().is_empty());

        lut.release_staging_buffer();
        assert!(!lut.has_staging_buffer());
        drop(lut);
        disposer.flush_all();
        assert_eq!(backend.live_count(ObjectKind::Image), 0);
        assert_eq!(backend.live_count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_mipmapped_upload() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        let cmd = backend.begin_command_buffer();
        let lut = LookupTexture::upload(
            &disposer,
            cmd,
            "mask",
            Size2D::new(8, 4),
            TextureFormat::R8Unorm,
            &[0; 32],
            LookupSampling {
                mipmap: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(lut.levels(), 4);
        assert_eq!(lut.texture().mip_filter, FilterMode::Linear);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_pixel_size_mismatch_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        let cmd = backend.begin_command_buffer();
        let result = LookupTexture::upload(
            &disposer,
            cmd,
            "bad",
            Size2D::new(2, 2),
            TextureFormat::Rgba8Unorm,
            &[0; 3],
            LookupSampling::default(),
        );
        assert!(result.is_err());
    }
}
