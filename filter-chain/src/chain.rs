//! The filter chain orchestrator.
//!
//! [`FilterChain`] owns every pass, the shared resources, the history ring
//! and the deferred disposer, and drives them through the frame:
//!
//! ```text
//! notify_sync_index(slot)
//!   └── destroy what was deferred the last time `slot` was active
//! build_offscreen_passes(cmd, viewport)
//!   ├── clear history/feedback storage once after (re)allocation
//!   └── passes 0..N-2, each reading the previous output
//! build_viewport_pass(cmd, viewport, mvp)
//!   ├── final pass into the caller's render pass
//!   └── swap feedback targets
//! end_frame(cmd)
//!   └── copy the input into the oldest history slot and rotate
//! ```
//!
//! # Lifecycle
//!
//! A chain starts [`ChainState::Unconfigured`]. Pass setup (`set_shader`,
//! `set_pass_config`, `add_parameter`, ...) only records configuration;
//! [`FilterChain::init`] builds everything from it into fresh objects and
//! commits them only if every step succeeds.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::FilterBackend;
use crate::common::CommonResources;
use crate::disposer::DeferredDisposer;
use crate::error::{FilterChainError, Result};
use crate::lut::{LookupSampling, LookupTexture};
use crate::pass::{FrameInputs, Pass, PassBuildInfo, PassConfig, PassParameter};
use crate::preset::ShaderPreset;
use crate::reflection::{SemanticMap, TextureSemantic};
use crate::render_target::RenderTarget;
use crate::scale::Scale;
use crate::shader::PassShaders;
use crate::types::{
    AddressMode, CommandBufferHandle, FilterMode, ImageLayout, ImageRef, RenderPassHandle, Size2D,
    Texture, TextureFormat, Viewport,
};

/// Presentation target description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainInfo {
    /// Format of the presentation images.
    pub format: TextureFormat,
    /// Number of frames in flight.
    pub num_sync_indices: usize,
    /// Presentation viewport.
    pub viewport: Viewport,
    /// Caller-owned render pass the final pass draws in.
    pub render_pass: RenderPassHandle,
}

/// Parameters of [`FilterChain::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterChainCreateInfo {
    /// Largest input the chain will be fed.
    pub max_input_size: Size2D,
    /// Format of the input images.
    pub original_format: TextureFormat,
    /// Presentation target.
    pub swapchain: SwapchainInfo,
    /// Number of passes (at least 1).
    pub num_passes: usize,
}

/// Lifecycle state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    /// Nothing built, or the last rebuild for a new swapchain failed.
    Unconfigured,
    /// Built, no frame recorded yet.
    Initialized,
    /// Recording frames.
    Active,
}

/// Recorded configuration of one pass.
#[derive(Debug, Clone, Default)]
struct PassSetup {
    name: String,
    config: PassConfig,
    shaders: PassShaders,
    parameters: Vec<PassParameter>,
    frame_count_period: u32,
}

/// Everything `init` builds, committed as a whole.
struct BuiltChain {
    passes: Vec<Pass>,
    common: CommonResources,
    history: VecDeque<RenderTarget>,
    require_clear: bool,
}

/// A multi-pass post-processing chain.
pub struct FilterChain {
    disposer: Arc<DeferredDisposer>,
    max_input_size: Size2D,
    original_format: TextureFormat,
    swapchain: SwapchainInfo,

    setups: Vec<PassSetup>,
    preset: ShaderPreset,
    luts: Vec<LookupTexture>,

    passes: Vec<Pass>,
    common: Option<CommonResources>,
    history: VecDeque<RenderTarget>,
    input: ImageRef,
    require_clear: bool,
    state: ChainState,
    /// Set when an offscreen pass failed to record this frame.
    frame_skipped: bool,

    frame_count: u64,
    frame_direction: i32,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("state", &self.state)
            .field("num_passes", &self.setups.len())
            .field("history", &self.history.len())
            .field("luts", &self.luts.len())
            .field("disposer", &self.disposer)
            .finish_non_exhaustive()
    }
}

impl FilterChain {
    /// Create an unconfigured chain with `info.num_passes` empty passes.
    pub fn new(backend: Arc<dyn FilterBackend>, info: &FilterChainCreateInfo) -> Result<Self> {
        if info.num_passes == 0 {
            return Err(FilterChainError::config("a filter chain needs at least one pass"));
        }
        if info.max_input_size.is_empty() {
            return Err(FilterChainError::config("max input size must not be empty"));
        }
        if info.swapchain.num_sync_indices == 0 {
            return Err(FilterChainError::config(
                "swapchain needs at least one sync index",
            ));
        }

        log::info!(
            "Creating filter chain on {} backend: {} passes, max input {}x{}, {} frames in flight",
            backend.name(),
            info.num_passes,
            info.max_input_size.width,
            info.max_input_size.height,
            info.swapchain.num_sync_indices
        );

        let disposer = Arc::new(DeferredDisposer::new(
            backend,
            info.swapchain.num_sync_indices,
        ));

        Ok(Self {
            disposer,
            max_input_size: info.max_input_size,
            original_format: info.original_format,
            swapchain: info.swapchain,
            setups: vec![PassSetup::default(); info.num_passes],
            preset: ShaderPreset::new(),
            luts: Vec::new(),
            passes: Vec::new(),
            common: None,
            history: VecDeque::new(),
            input: ImageRef::default(),
            require_clear: false,
            state: ChainState::Unconfigured,
            frame_skipped: false,
            frame_count: 0,
            frame_direction: 1,
        })
    }

    /// Create and initialize a one-pass chain that stretches the input over
    /// the viewport with the stock shader.
    pub fn create_default(
        backend: Arc<dyn FilterBackend>,
        info: &FilterChainCreateInfo,
        filter: FilterMode,
    ) -> Result<Self> {
        let info = FilterChainCreateInfo {
            num_passes: 1,
            ..*info
        };
        let mut chain = Self::new(backend, &info)?;
        chain.set_shader(0, PassShaders::stock()?);
        chain.set_pass_config(
            0,
            PassConfig {
                scale: Scale::viewport(1.0),
                format: info.swapchain.format,
                filter,
                mip_filter: FilterMode::Nearest,
                address: AddressMode::ClampToEdge,
                max_levels: 1,
            },
        );
        chain.init()?;
        Ok(chain)
    }

    // --- Configuration ---

    fn setup_mut(&mut self, pass: usize) -> Option<&mut PassSetup> {
        let num_passes = self.setups.len();
        let setup = self.setups.get_mut(pass);
        if setup.is_none() {
            log::error!("Pass #{} out of range ({} passes)", pass, num_passes);
        }
        setup
    }

    /// Set the alias name of a pass. Takes effect on the next `init`.
    pub fn set_pass_name(&mut self, pass: usize, name: impl Into<String>) {
        if let Some(setup) = self.setup_mut(pass) {
            setup.name = name.into();
        }
    }

    /// Set the configuration of a pass. Takes effect on the next `init`.
    pub fn set_pass_config(&mut self, pass: usize, config: PassConfig) {
        if let Some(setup) = self.setup_mut(pass) {
            setup.config = config;
        }
    }

    /// Set the shaders of a pass. Takes effect on the next `init`.
    pub fn set_shader(&mut self, pass: usize, shaders: PassShaders) {
        if let Some(setup) = self.setup_mut(pass) {
            setup.shaders = shaders;
        }
    }

    /// Bind preset parameter `parameter_index` to a pass under `id`.
    /// Takes effect on the next `init`.
    pub fn add_parameter(&mut self, pass: usize, parameter_index: usize, id: impl Into<String>) {
        if let Some(setup) = self.setup_mut(pass) {
            let semantic_index = setup.parameters.len();
            setup.parameters.push(PassParameter {
                id: id.into(),
                index: parameter_index,
                semantic_index,
            });
        }
    }

    /// Wrap the frame counter of a pass modulo `period`; 0 disables wrapping.
    pub fn set_frame_count_period(&mut self, pass: usize, period: u32) {
        if let Some(setup) = self.setup_mut(pass) {
            setup.frame_count_period = period;
        }
        if let Some(pass) = self.passes.get_mut(pass) {
            pass.set_frame_count_period(period);
        }
    }

    /// Upload a lookup texture, recording the copy into `cmd`.
    ///
    /// Shaders can reference it as `User#` (by the returned index) or by
    /// `id` once the chain is re-initialized.
    pub fn add_lookup_texture(
        &mut self,
        cmd: CommandBufferHandle,
        id: impl Into<String>,
        size: Size2D,
        format: TextureFormat,
        pixels: &[u8],
        sampling: LookupSampling,
    ) -> Result<usize> {
        let lut = LookupTexture::upload(&self.disposer, cmd, id, size, format, pixels, sampling)?;
        self.luts.push(lut);
        Ok(self.luts.len() - 1)
    }

    /// Set the input of the next frame.
    pub fn set_input_texture(&mut self, image: ImageRef) {
        self.input = image;
    }

    /// Set the frame counter passed to every pass.
    pub fn set_frame_count(&mut self, count: u64) {
        self.frame_count = count;
        for pass in &mut self.passes {
            pass.set_frame_count(count);
        }
    }

    /// Set the frame direction passed to every pass.
    pub fn set_frame_direction(&mut self, direction: i32) {
        self.frame_direction = direction;
        for pass in &mut self.passes {
            pass.set_frame_direction(direction);
        }
    }

    /// Output format of a pass. The final pass renders in the swapchain format.
    pub fn pass_rt_format(&self, pass: usize) -> Option<TextureFormat> {
        let setup = self.setups.get(pass)?;
        if pass + 1 == self.setups.len() {
            Some(self.swapchain.format)
        } else {
            Some(setup.config.format)
        }
    }

    /// Parameter values read every frame.
    pub fn preset(&self) -> &ShaderPreset {
        &self.preset
    }

    /// Parameter values, for editing.
    pub fn preset_mut(&mut self) -> &mut ShaderPreset {
        &mut self.preset
    }

    /// Replace the parameter values.
    pub fn set_preset(&mut self, preset: ShaderPreset) {
        self.preset = preset;
    }

    // --- Lifecycle ---

    /// Build every pass, the shared resources, history and feedback storage.
    ///
    /// On failure the chain keeps whatever it had before.
    pub fn init(&mut self) -> Result<()> {
        if self.state != ChainState::Unconfigured {
            self.flush();
        }

        let built = match self.build() {
            Ok(built) => built,
            Err(e) => {
                log::error!("Failed to build filter chain: {}", e);
                return Err(e);
            }
        };

        self.passes = built.passes;
        self.common = Some(built.common);
        self.history = built.history;
        self.require_clear = built.require_clear;
        self.frame_skipped = false;
        self.state = ChainState::Initialized;

        log::info!(
            "Filter chain initialized: {} passes, {} history slots, {} feedback passes",
            self.passes.len(),
            self.history.len(),
            self.passes
                .iter()
                .filter(|p| p.feedback_framebuffer().is_some())
                .count()
        );
        Ok(())
    }

    /// Adopt a new presentation target and rebuild.
    ///
    /// On failure the chain is left unconfigured.
    pub fn update_swapchain_info(&mut self, info: SwapchainInfo) -> Result<()> {
        self.flush();
        if info.num_sync_indices == 0 {
            self.release();
            return Err(FilterChainError::config(
                "swapchain needs at least one sync index",
            ));
        }

        if info.num_sync_indices != self.disposer.num_slots() {
            // Objects built for the old slot count must not outlive it.
            self.release();
            self.disposer.flush_all();
            self.disposer.set_num_slots(info.num_sync_indices);
        }
        self.swapchain = info;

        log::info!(
            "Swapchain updated: {:?}, {}x{} viewport, {} frames in flight",
            info.format,
            info.viewport.width,
            info.viewport.height,
            info.num_sync_indices
        );

        if let Err(e) = self.init() {
            self.release();
            self.disposer.flush_all();
            return Err(e);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.passes.clear();
        self.common = None;
        self.history.clear();
        self.require_clear = false;
        self.state = ChainState::Unconfigured;
    }

    /// Wait for the device to go idle and destroy every deferred object.
    pub fn flush(&mut self) {
        if let Err(e) = self.disposer.backend().wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
        self.disposer.flush_all();
    }

    fn build(&self) -> Result<BuiltChain> {
        let num_passes = self.setups.len();
        let num_slots = self.disposer.num_slots();

        let mut aliases = SemanticMap::new();
        for (i, setup) in self.setups.iter().enumerate() {
            if !setup.name.is_empty() {
                aliases.insert_pass(&setup.name, i)?;
            }
        }
        for (i, lut) in self.luts.iter().enumerate() {
            aliases.insert_lookup(lut.id(), i)?;
        }

        let mut common = CommonResources::new(&self.disposer, aliases)?;

        let mut passes: Vec<Pass> = Vec::with_capacity(num_passes);
        let mut source = self.max_input_size;
        for (i, setup) in self.setups.iter().enumerate() {
            let is_final = i + 1 == num_passes;
            let config = if is_final {
                PassConfig {
                    format: self.swapchain.format,
                    ..setup.config
                }
            } else {
                setup.config
            };
            let mut pass = Pass::build(
                &self.disposer,
                PassBuildInfo {
                    index: i,
                    is_final,
                    name: &setup.name,
                    config: &config,
                    shaders: &setup.shaders,
                    parameters: &setup.parameters,
                    aliases: common.aliases(),
                    num_passes,
                    num_lookups: self.luts.len(),
                    num_slots,
                    swapchain_render_pass: self.swapchain.render_pass,
                    viewport: self.swapchain.viewport,
                    max_original: self.max_input_size,
                    max_source: source,
                    frame_count_period: setup.frame_count_period,
                },
            )?;
            pass.notify_sync_index(self.disposer.current_slot());
            pass.set_frame_count(self.frame_count);
            pass.set_frame_direction(self.frame_direction);
            source = pass.current_size();
            passes.push(pass);
        }

        let sizes: Vec<u64> = passes.iter().map(Pass::ubo_size).collect();
        let offsets = common.allocate_ubo(&self.disposer, &sizes, num_slots)?;
        for (pass, offset) in passes.iter_mut().zip(offsets) {
            pass.set_ubo_offset(offset);
        }

        let history = self.init_history(&passes)?;
        let feedback = init_feedback(&mut passes)?;

        common.pass_outputs = vec![Texture::default(); num_passes - 1];
        if feedback {
            common.feedback = vec![Texture::default(); num_passes - 1];
        }

        Ok(BuiltChain {
            passes,
            common,
            require_clear: feedback || !history.is_empty(),
            history,
        })
    }

    fn init_history(&self, passes: &[Pass]) -> Result<VecDeque<RenderTarget>> {
        let required = passes
            .iter()
            .map(|p| p.reflection().texture_count(TextureSemantic::OriginalHistory))
            .max()
            .unwrap_or(0);

        let mut history = VecDeque::new();
        if required < 2 {
            log::debug!("No history textures needed");
            return Ok(history);
        }

        if self.original_format.is_undefined() {
            return Err(FilterChainError::config(
                "original history needs a defined input format",
            ));
        }
        for _ in 1..required {
            history.push_back(RenderTarget::new(
                &self.disposer,
                self.max_input_size,
                self.original_format,
                1,
            )?);
        }
        log::info!("Using {} history textures", history.len());
        Ok(history)
    }

    // --- Per-frame ---

    fn is_configured(&self, what: &str) -> bool {
        if self.state == ChainState::Unconfigured {
            log::warn!("{} called on an unconfigured filter chain", what);
            return false;
        }
        true
    }

    fn can_record(&self, what: &str) -> bool {
        if !self.is_configured(what) {
            return false;
        }
        if self.input.is_null() {
            log::warn!("{} called without an input texture", what);
            return false;
        }
        true
    }

    /// Enter frame slot `slot`.
    ///
    /// The caller must have waited for the GPU work last recorded in this
    /// slot. Objects deferred then are destroyed now.
    pub fn notify_sync_index(&mut self, slot: usize) {
        if !self.is_configured("notify_sync_index") {
            return;
        }
        if slot >= self.disposer.num_slots() {
            log::error!(
                "Sync index {} out of range ({} slots)",
                slot,
                self.disposer.num_slots()
            );
            return;
        }
        self.disposer.notify_sync_index(slot);
        for pass in &mut self.passes {
            pass.notify_sync_index(slot);
        }
        // Uploads recorded before this frame have been submitted.
        for lut in &mut self.luts {
            lut.release_staging_buffer();
        }
    }

    fn original_texture(&self) -> Texture {
        let config = self.passes.first().map(|p| *p.config()).unwrap_or_default();
        Texture::new(self.input, config.filter, config.mip_filter, config.address)
    }

    /// Clear new storage and refresh the feedback and history tables.
    fn begin_recording(&mut self, cmd: CommandBufferHandle) {
        self.state = ChainState::Active;

        if self.require_clear {
            for target in self.history.iter().filter(|t| t.is_ready()) {
                target.clear(cmd);
            }
            for pass in &self.passes {
                if let Some(feedback) = pass.feedback_framebuffer().filter(|t| t.is_ready()) {
                    feedback.clear(cmd);
                }
            }
            self.require_clear = false;
        }

        let Some(common) = self.common.as_mut() else {
            return;
        };

        if !common.feedback.is_empty() {
            for (i, pass) in self.passes.iter().enumerate() {
                if let (Some(feedback), Some(slot)) =
                    (pass.feedback_framebuffer(), common.feedback.get_mut(i))
                {
                    let config = pass.config();
                    *slot = Texture::new(
                        feedback.image_ref(ImageLayout::ShaderReadOnly),
                        config.filter,
                        config.mip_filter,
                        config.address,
                    );
                }
            }
        }

        let config = self.passes.first().map(|p| *p.config()).unwrap_or_default();
        common.history = self
            .history
            .iter()
            .map(|target| {
                Texture::new(
                    target.image_ref(ImageLayout::ShaderReadOnly),
                    config.filter,
                    config.mip_filter,
                    config.address,
                )
            })
            .collect();
    }

    /// Record every pass but the last.
    ///
    /// If a pass fails to record, the passes after it and the final pass
    /// are skipped for this frame.
    pub fn build_offscreen_passes(&mut self, cmd: CommandBufferHandle, viewport: &Viewport) {
        self.frame_skipped = false;
        if !self.can_record("build_offscreen_passes") {
            return;
        }
        self.begin_recording(cmd);

        let original = self.original_texture();
        let Some(common) = self.common.as_mut() else {
            return;
        };
        let num_passes = self.passes.len();

        let mut source = original;
        for i in 0..num_passes.saturating_sub(1) {
            let recorded = self.passes[i].build_commands(
                cmd,
                FrameInputs {
                    common: &*common,
                    preset: &self.preset,
                    luts: &self.luts,
                    original: &original,
                    source: &source,
                    viewport,
                    mvp: None,
                },
            );
            if !recorded {
                log::warn!("Pass #{} was not recorded; skipping the rest of the frame", i);
                self.frame_skipped = true;
                return;
            }

            let next = *self.passes[i + 1].config();
            if let Some(output) =
                self.passes[i].output_texture(next.filter, next.mip_filter, next.address)
            {
                common.pass_outputs[i] = output;
                source = output;
            }
        }
    }

    /// Record the final pass into the caller's render pass, then swap
    /// feedback targets for the next frame.
    ///
    /// Does nothing if [`build_offscreen_passes`](Self::build_offscreen_passes)
    /// skipped the frame.
    pub fn build_viewport_pass(
        &mut self,
        cmd: CommandBufferHandle,
        viewport: &Viewport,
        mvp: Option<&[f32; 16]>,
    ) {
        if !self.can_record("build_viewport_pass") {
            return;
        }
        if std::mem::take(&mut self.frame_skipped) {
            return;
        }
        self.begin_recording(cmd);

        let original = self.original_texture();
        let Some(common) = self.common.as_ref() else {
            return;
        };
        let num_passes = self.passes.len();

        let source = if num_passes == 1 {
            original
        } else {
            common.pass_outputs[num_passes - 2]
        };

        if let Some(pass) = self.passes.last_mut() {
            pass.build_commands(
                cmd,
                FrameInputs {
                    common,
                    preset: &self.preset,
                    luts: &self.luts,
                    original: &original,
                    source: &source,
                    viewport,
                    mvp,
                },
            );
        }

        for pass in &mut self.passes {
            pass.end_frame();
        }
    }

    /// Push the current input into the history ring.
    pub fn end_frame(&mut self, cmd: CommandBufferHandle) {
        if !self.is_configured("end_frame") {
            return;
        }
        if self.history.is_empty() || self.input.is_null() {
            return;
        }
        let Some(mut oldest) = self.history.pop_back() else {
            return;
        };

        let size = Size2D::new(self.input.width, self.input.height);
        let format = (!self.input.format.is_undefined()).then_some(self.input.format);
        let format_changed = format.is_some_and(|f| f != oldest.format());
        if oldest.size() != size || format_changed || !oldest.is_ready() {
            if let Err(e) = oldest.resize(size, format) {
                log::error!("Failed to resize history texture: {}", e);
                self.history.push_back(oldest);
                return;
            }
        }

        oldest.copy_from(cmd, &self.input);
        self.history.push_front(oldest);
    }

    // --- Accessors ---

    /// Lifecycle state.
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Number of configured passes.
    pub fn num_passes(&self) -> usize {
        self.setups.len()
    }

    /// A built pass.
    pub fn pass(&self, index: usize) -> Option<&Pass> {
        self.passes.get(index)
    }

    /// Shared resources of the current build.
    pub fn common(&self) -> Option<&CommonResources> {
        self.common.as_ref()
    }

    /// History ring, most recent first. Holds history index 1 onwards.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &RenderTarget> {
        self.history.iter()
    }

    /// Registered lookup textures.
    pub fn lookup_textures(&self) -> &[LookupTexture] {
        &self.luts
    }

    /// Lookup texture by index, for editing.
    pub fn lookup_texture_mut(&mut self, index: usize) -> Option<&mut LookupTexture> {
        self.luts.get_mut(index)
    }

    /// Current presentation target.
    pub fn swapchain_info(&self) -> &SwapchainInfo {
        &self.swapchain
    }

    /// The deferred disposer shared by every owned object.
    pub fn disposer(&self) -> &Arc<DeferredDisposer> {
        &self.disposer
    }
}

/// Give every non-final pass read as feedback a second target.
///
/// Reflection already rejects feedback textures of the final pass.
fn init_feedback(passes: &mut [Pass]) -> Result<bool> {
    let num_passes = passes.len();
    let mut any = false;
    for i in 0..num_passes.saturating_sub(1) {
        let used = passes.iter().any(|p| {
            p.reflection()
                .texture(TextureSemantic::PassFeedback, i)
                .is_some_and(|slot| slot.texture.is_some() || slot.size.is_bound())
        });
        if used {
            passes[i].init_feedback()?;
            log::info!("Pass #{} is a feedback source", i);
            any = true;
        }
    }
    Ok(any)
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        self.passes.clear();
        self.common = None;
        self.history.clear();
        self.luts.clear();
        self.flush();
        log::debug!("Filter chain destroyed");
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ObjectKind};

    fn create_info(backend: &DummyBackend, num_passes: usize) -> FilterChainCreateInfo {
        FilterChainCreateInfo {
            max_input_size: Size2D::new(256, 224),
            original_format: TextureFormat::Rgba8Unorm,
            swapchain: SwapchainInfo {
                format: TextureFormat::Bgra8Unorm,
                num_sync_indices: 2,
                viewport: Viewport::from_dimensions(1024, 768),
                render_pass: backend.create_render_pass(TextureFormat::Bgra8Unorm).unwrap(),
            },
            num_passes,
        }
    }

    #[test]
    fn test_new_rejects_zero_passes() {
        let backend = Arc::new(DummyBackend::new());
        let info = create_info(&backend, 0);
        assert!(FilterChain::new(backend, &info).is_err());
    }

    #[test]
    fn test_create_default() {
        let backend = Arc::new(DummyBackend::new());
        let info = create_info(&backend, 3);
        let chain = FilterChain::create_default(backend.clone(), &info, FilterMode::Linear).unwrap();
        assert_eq!(chain.num_passes(), 1);
        assert_eq!(chain.state(), ChainState::Initialized);
        assert_eq!(chain.pass_rt_format(0), Some(TextureFormat::Bgra8Unorm));

        let pass = chain.pass(0).unwrap();
        assert!(pass.is_final());
        assert_eq!(pass.current_size(), Size2D::new(1024, 768));
        assert_eq!(chain.history().len(), 0);
    }

    #[test]
    fn test_per_frame_calls_on_unconfigured_chain() {
        let backend = Arc::new(DummyBackend::new());
        let info = create_info(&backend, 1);
        let mut chain = FilterChain::new(backend.clone(), &info).unwrap();
        let cmd = backend.begin_command_buffer();
        chain.notify_sync_index(0);
        chain.build_offscreen_passes(cmd, &info.swapchain.viewport);
        chain.build_viewport_pass(cmd, &info.swapchain.viewport, None);
        chain.end_frame(cmd);
        assert!(backend.commands(cmd).is_empty());
        assert_eq!(chain.state(), ChainState::Unconfigured);
    }

    #[test]
    fn test_init_without_shaders_fails() {
        let backend = Arc::new(DummyBackend::new());
        let info = create_info(&backend, 2);
        let mut chain = FilterChain::new(backend.clone(), &info).unwrap();
        assert!(matches!(
            chain.init(),
            Err(FilterChainError::Configuration(_))
        ));
        assert_eq!(chain.state(), ChainState::Unconfigured);
    }

    #[test]
    fn test_drop_releases_everything() {
        let backend = Arc::new(DummyBackend::new());
        let info = create_info(&backend, 1);
        let chain = FilterChain::create_default(backend.clone(), &info, FilterMode::Nearest).unwrap();
        assert!(backend.live_count(ObjectKind::Pipeline) > 0);
        drop(chain);
        assert_eq!(backend.live_count(ObjectKind::Pipeline), 0);
        assert_eq!(backend.live_count(ObjectKind::Sampler), 0);
        assert_eq!(backend.live_count(ObjectKind::Buffer), 0);
        assert!(backend.wait_idle_count() > 0);
    }
}
