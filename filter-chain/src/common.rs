//! Resources shared by every pass of a chain.

use std::sync::Arc;

use crate::backend::BufferUsage;
use crate::buffer::Buffer;
use crate::disposer::{DeferredDisposer, DeferredResource};
use crate::error::Result;
use crate::reflection::SemanticMap;
use crate::types::{AddressMode, FilterMode, SamplerDescriptor, SamplerHandle, Texture};

/// Quad vertices as `(x, y, u, v)`.
///
/// The first strip covers clip space and is used by offscreen passes with an
/// identity MVP. The second covers `[0, 1]` and is transformed by the
/// caller's MVP in the final pass.
pub const QUAD_VERTICES: [f32; 32] = [
    -1.0, -1.0, 0.0, 0.0, //
    -1.0, 1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 0.0, //
    1.0, 1.0, 1.0, 1.0, //
    0.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 1.0, //
    1.0, 0.0, 1.0, 0.0, //
    1.0, 1.0, 1.0, 1.0,
];

/// Byte offset of the final-pass quad in the vertex buffer.
pub const FINAL_QUAD_OFFSET: u64 = 16 * std::mem::size_of::<f32>() as u64;

/// Smallest uniform offset alignment the chain uses.
pub const MIN_UBO_ALIGNMENT: u64 = 16;

/// One sampler per (filter, mip filter, address mode).
#[derive(Debug)]
pub struct SamplerTable {
    disposer: Arc<DeferredDisposer>,
    samplers: Vec<SamplerHandle>,
}

impl SamplerTable {
    /// Number of samplers in a table.
    pub const LEN: usize = FilterMode::COUNT * FilterMode::COUNT * AddressMode::COUNT;

    /// Create every sampler.
    pub fn new(disposer: &Arc<DeferredDisposer>) -> Result<Self> {
        let mut table = Self {
            disposer: Arc::clone(disposer),
            samplers: Vec::with_capacity(Self::LEN),
        };
        for filter in FilterMode::ALL {
            for mip_filter in FilterMode::ALL {
                for address in AddressMode::ALL {
                    let descriptor = SamplerDescriptor::new(filter, mip_filter, address);
                    let sampler = disposer.backend().create_sampler(&descriptor)?;
                    table.samplers.push(sampler);
                }
            }
        }
        Ok(table)
    }

    fn index(filter: FilterMode, mip_filter: FilterMode, address: AddressMode) -> usize {
        (filter.index() * FilterMode::COUNT + mip_filter.index()) * AddressMode::COUNT
            + address.index()
    }

    /// Sampler for a combination of sampling states.
    pub fn get(
        &self,
        filter: FilterMode,
        mip_filter: FilterMode,
        address: AddressMode,
    ) -> SamplerHandle {
        self.samplers
            .get(Self::index(filter, mip_filter, address))
            .copied()
            .unwrap_or_default()
    }

    /// Sampler matching a texture's sampling state.
    pub fn for_texture(&self, texture: &Texture) -> SamplerHandle {
        self.get(texture.filter, texture.mip_filter, texture.address)
    }
}

impl Drop for SamplerTable {
    fn drop(&mut self) {
        for sampler in self.samplers.drain(..) {
            self.disposer.defer(DeferredResource::Sampler(sampler));
        }
    }
}

/// Cross-pass state.
///
/// Passes only read this while recording. The chain owns it and refreshes
/// the snapshot tables between passes.
#[derive(Debug)]
pub struct CommonResources {
    pub(crate) vbo: Buffer,
    pub(crate) ubo: Option<Buffer>,
    pub(crate) ubo_alignment: u64,
    pub(crate) ubo_stride: u64,
    pub(crate) samplers: SamplerTable,
    /// Output of each pass rendered so far this frame.
    pub(crate) pass_outputs: Vec<Texture>,
    /// Previous-frame output of each non-final pass. Empty if no pass
    /// reads feedback.
    pub(crate) feedback: Vec<Texture>,
    /// Previous inputs, most recent first. Holds history index 1 onwards.
    pub(crate) history: Vec<Texture>,
    pub(crate) aliases: SemanticMap,
}

impl CommonResources {
    /// Create the vertex buffer and sampler table.
    pub fn new(disposer: &Arc<DeferredDisposer>, aliases: SemanticMap) -> Result<Self> {
        let vbo = Buffer::new(
            disposer,
            std::mem::size_of_val(&QUAD_VERTICES) as u64,
            BufferUsage::Vertex,
        )?;
        vbo.map()?.write_slice(0, &QUAD_VERTICES);

        let ubo_alignment = disposer
            .backend()
            .min_uniform_buffer_offset_alignment()
            .max(MIN_UBO_ALIGNMENT);

        Ok(Self {
            vbo,
            ubo: None,
            ubo_alignment,
            ubo_stride: 0,
            samplers: SamplerTable::new(disposer)?,
            pass_outputs: Vec::new(),
            feedback: Vec::new(),
            history: Vec::new(),
            aliases,
        })
    }

    /// Lay out one uniform block per pass and allocate the shared buffer.
    ///
    /// `sizes[i]` is pass `i`'s block size, zero if it has none. Returns each
    /// pass's byte offset within a slot. Every slot gets its own copy of the
    /// whole layout.
    pub fn allocate_ubo(
        &mut self,
        disposer: &Arc<DeferredDisposer>,
        sizes: &[u64],
        num_slots: usize,
    ) -> Result<Vec<u64>> {
        let mut offset = 0u64;
        let mut offsets = Vec::with_capacity(sizes.len());
        for &size in sizes {
            if size == 0 {
                offsets.push(0);
                continue;
            }
            offset = offset.next_multiple_of(self.ubo_alignment);
            offsets.push(offset);
            offset += size;
        }
        self.ubo_stride = offset.next_multiple_of(self.ubo_alignment);
        self.ubo = if self.ubo_stride > 0 {
            Some(Buffer::new(
                disposer,
                self.ubo_stride * num_slots as u64,
                BufferUsage::Uniform,
            )?)
        } else {
            None
        };
        Ok(offsets)
    }

    /// Shared vertex buffer.
    pub fn vbo(&self) -> &Buffer {
        &self.vbo
    }

    /// Shared uniform buffer, if any pass declares a uniform block.
    pub fn ubo(&self) -> Option<&Buffer> {
        self.ubo.as_ref()
    }

    /// Alignment of per-pass uniform regions.
    pub fn ubo_alignment(&self) -> u64 {
        self.ubo_alignment
    }

    /// Size of one slot's uniform region.
    pub fn ubo_stride(&self) -> u64 {
        self.ubo_stride
    }

    /// The sampler table.
    pub fn samplers(&self) -> &SamplerTable {
        &self.samplers
    }

    /// Pass output snapshot.
    pub fn pass_outputs(&self) -> &[Texture] {
        &self.pass_outputs
    }

    /// Feedback snapshot.
    pub fn feedback(&self) -> &[Texture] {
        &self.feedback
    }

    /// History snapshot, starting at history index 1.
    pub fn history(&self) -> &[Texture] {
        &self.history
    }

    /// Name aliases in effect.
    pub fn aliases(&self) -> &SemanticMap {
        &self.aliases
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ObjectKind};

    fn setup(alignment: u64) -> (Arc<DummyBackend>, Arc<DeferredDisposer>) {
        let backend = Arc::new(DummyBackend::with_uniform_alignment(alignment));
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 3));
        (backend, disposer)
    }

    #[test]
    fn test_sampler_table() {
        let (backend, disposer) = setup(256);
        let common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        assert_eq!(backend.live_count(ObjectKind::Sampler), SamplerTable::LEN);

        let a = common
            .samplers()
            .get(FilterMode::Linear, FilterMode::Nearest, AddressMode::Repeat);
        let b = common
            .samplers()
            .get(FilterMode::Nearest, FilterMode::Nearest, AddressMode::Repeat);
        assert_ne!(a, b);
        assert!(!a.is_null());
    }

    #[test]
    fn test_vertex_buffer_contents() {
        let (backend, disposer) = setup(256);
        let common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        let contents = backend.buffer_contents(common.vbo().handle()).unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&contents);
        assert_eq!(floats, QUAD_VERTICES.to_vec());
        assert_eq!(FINAL_QUAD_OFFSET, 64);
    }

    #[test]
    fn test_ubo_layout() {
        let (_backend, disposer) = setup(64);
        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        let offsets = common.allocate_ubo(&disposer, &[80, 0, 16], 3).unwrap();
        assert_eq!(offsets, vec![0, 0, 128]);
        assert_eq!(common.ubo_stride(), 192);
        assert_eq!(common.ubo().unwrap().size(), 576);
    }

    #[test]
    fn test_ubo_alignment_floor() {
        let (_backend, disposer) = setup(1);
        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        assert_eq!(common.ubo_alignment(), MIN_UBO_ALIGNMENT);
        let offsets = common.allocate_ubo(&disposer, &[4, 4], 2).unwrap();
        assert_eq!(offsets, vec![0, 16]);
    }

    #[test]
    fn test_no_ubo_without_blocks() {
        let (_backend, disposer) = setup(256);
        let mut common = CommonResources::new(&disposer, SemanticMap::new()).unwrap();
        common.allocate_ubo(&disposer, &[0, 0], 2).unwrap();
        assert!(common.ubo().is_none());
    }
}
