//! Pass output scaling rules.

use crate::error::{FilterChainError, Result};
use crate::types::Size2D;

/// How one axis of a pass's output size is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScaleType {
    /// Scale of the chain's original input.
    Original,
    /// Scale of the previous pass's output (or the original for pass 0).
    #[default]
    Source,
    /// Scale of the presentation viewport.
    Viewport,
    /// The scale value is a pixel count.
    Absolute,
}

/// Scaling rule for both axes of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Rule for the width.
    pub type_x: ScaleType,
    /// Rule for the height.
    pub type_y: ScaleType,
    /// Width factor, or pixel count for [`ScaleType::Absolute`].
    pub x: f32,
    /// Height factor, or pixel count for [`ScaleType::Absolute`].
    pub y: f32,
}

impl Default for Scale {
    fn default() -> Self {
        Self::uniform(ScaleType::Source, 1.0)
    }
}

impl Scale {
    /// Same rule and factor on both axes.
    pub const fn uniform(ty: ScaleType, scale: f32) -> Self {
        Self {
            type_x: ty,
            type_y: ty,
            x: scale,
            y: scale,
        }
    }

    /// Scale relative to the presentation viewport.
    pub const fn viewport(scale: f32) -> Self {
        Self::uniform(ScaleType::Viewport, scale)
    }

    /// Scale relative to the previous stage.
    pub const fn source(scale: f32) -> Self {
        Self::uniform(ScaleType::Source, scale)
    }

    /// Scale relative to the original input.
    pub const fn original(scale: f32) -> Self {
        Self::uniform(ScaleType::Original, scale)
    }

    /// Fixed pixel size.
    pub const fn absolute(width: f32, height: f32) -> Self {
        Self {
            type_x: ScaleType::Absolute,
            type_y: ScaleType::Absolute,
            x: width,
            y: height,
        }
    }

    /// Reject non-finite or non-positive factors.
    pub fn validate(&self) -> Result<()> {
        for (axis, value) in [("x", self.x), ("y", self.y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FilterChainError::config(format!(
                    "malformed scaling rule: scale_{} = {}",
                    axis, value
                )));
            }
        }
        Ok(())
    }

    /// Output size for the given bases. Each axis is rounded to the nearest
    /// integer and clamped to at least one pixel.
    pub fn output_size(&self, original: Size2D, source: Size2D, viewport: Size2D) -> Size2D {
        let width = scale_axis(
            self.type_x,
            self.x,
            original.width,
            source.width,
            viewport.width,
        );
        let height = scale_axis(
            self.type_y,
            self.y,
            original.height,
            source.height,
            viewport.height,
        );
        Size2D::new(width, height)
    }
}

/// Compute one axis of an output size.
pub fn scale_axis(ty: ScaleType, scale: f32, original: u32, source: u32, viewport: u32) -> u32 {
    let value = match ty {
        ScaleType::Original => original as f32 * scale,
        ScaleType::Source => source as f32 * scale,
        ScaleType::Viewport => viewport as f32 * scale,
        ScaleType::Absolute => scale,
    };
    (value.round().max(1.0)) as u32
}
