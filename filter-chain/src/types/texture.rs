//! Texture formats, image layouts and texture references.

use super::handle::{ImageHandle, ImageViewHandle};
use super::sampler::{AddressMode, FilterMode};

/// Texture format enumeration.
///
/// Covers the color formats a filter pass can render into or read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// No format given; keeps the current format when resizing.
    #[default]
    Undefined,
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,
    /// 8-bit RGBA channels, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 10-bit RGB with 2-bit alpha, unsigned normalized.
    Rgb10A2Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
}

impl TextureFormat {
    /// Returns true for [`TextureFormat::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10A2Unorm
            | Self::R32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Image layout states the chain transitions its images through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// General layout (readable and writable by every stage).
    General,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for transfer source operations.
    TransferSrc,
    /// Optimal for transfer destination operations.
    TransferDst,
}

/// Non-owning reference to an image that a pass can sample.
///
/// Either points at a chain-owned render target or at the externally owned
/// input frame. Rebuilt every frame from the owner's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRef {
    /// Image handle.
    pub image: ImageHandle,
    /// View covering all mip levels.
    pub view: ImageViewHandle,
    /// Layout the image is in when the pass samples it.
    pub layout: ImageLayout,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format; `Undefined` if unknown.
    pub format: TextureFormat,
}

impl ImageRef {
    /// Returns true if there is no view to bind.
    pub fn is_null(&self) -> bool {
        self.view.is_null()
    }
}

/// An [`ImageRef`] together with the sampling state it is bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Texture {
    /// The image being sampled.
    pub image: ImageRef,
    /// Minification/magnification filter.
    pub filter: FilterMode,
    /// Filter between mip levels.
    pub mip_filter: FilterMode,
    /// Address mode for all coordinates.
    pub address: AddressMode,
}

impl Texture {
    /// Create a texture reference with the given sampling state.
    pub fn new(
        image: ImageRef,
        filter: FilterMode,
        mip_filter: FilterMode,
        address: AddressMode,
    ) -> Self {
        Self {
            image,
            filter,
            mip_filter,
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size() {
        assert_eq!(TextureFormat::Rgba8Unorm.block_size(), 4);
        assert_eq!(TextureFormat::Rgba16Float.block_size(), 8);
        assert_eq!(TextureFormat::Undefined.block_size(), 0);
    }

    #[test]
    fn test_null_image_ref() {
        assert!(ImageRef::default().is_null());
        let image = ImageRef {
            view: ImageViewHandle(3),
            ..Default::default()
        };
        assert!(!image.is_null());
    }
}
