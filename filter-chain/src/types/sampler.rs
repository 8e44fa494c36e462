//! Sampler types and descriptors.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Linear interpolation.
    #[default]
    Linear,
    /// Nearest neighbour.
    Nearest,
}

impl FilterMode {
    /// Number of filter modes.
    pub const COUNT: usize = 2;

    /// All filter modes, in table order.
    pub const ALL: [FilterMode; Self::COUNT] = [FilterMode::Linear, FilterMode::Nearest];

    /// Index of this mode in sampler tables.
    pub fn index(self) -> usize {
        match self {
            Self::Linear => 0,
            Self::Nearest => 1,
        }
    }
}

/// Texture addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Repeat the texture.
    Repeat,
    /// Repeat the texture, mirroring every other copy.
    MirroredRepeat,
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
    /// Clamp to a transparent black border.
    ClampToBorder,
    /// Mirror once, then clamp to the edge.
    MirrorClampToEdge,
}

impl AddressMode {
    /// Number of address modes.
    pub const COUNT: usize = 5;

    /// All address modes, in table order.
    pub const ALL: [AddressMode; Self::COUNT] = [
        AddressMode::Repeat,
        AddressMode::MirroredRepeat,
        AddressMode::ClampToEdge,
        AddressMode::ClampToBorder,
        AddressMode::MirrorClampToEdge,
    ];

    /// Index of this mode in sampler tables.
    pub fn index(self) -> usize {
        match self {
            Self::Repeat => 0,
            Self::MirroredRepeat => 1,
            Self::ClampToEdge => 2,
            Self::ClampToBorder => 3,
            Self::MirrorClampToEdge => 4,
        }
    }
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    /// Magnification and minification filter.
    pub filter: FilterMode,
    /// Mipmap filter.
    pub mipmap_filter: FilterMode,
    /// Address mode for U, V and W.
    pub address_mode: AddressMode,
    /// Minimum LOD clamp.
    pub lod_min_clamp: f32,
    /// Maximum LOD clamp; `None` leaves the LOD unclamped.
    pub lod_max_clamp: Option<f32>,
}

impl SamplerDescriptor {
    /// Create a sampler descriptor for one entry of the sampler table.
    pub fn new(filter: FilterMode, mipmap_filter: FilterMode, address_mode: AddressMode) -> Self {
        Self {
            filter,
            mipmap_filter,
            address_mode,
            ..Default::default()
        }
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
            lod_min_clamp: 0.0,
            lod_max_clamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_indices_are_dense() {
        for (i, mode) in FilterMode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
        }
        for (i, mode) in AddressMode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
        }
    }
}
