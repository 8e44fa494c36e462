//! # RedLilium Filter Chain
//!
//! Multi-pass shader post-processing for presenting a rendered frame.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FilterChain`] - Orchestrates passes, history and feedback across frames in flight
//! - [`Pass`] - One shader over a full-screen quad, bound through reflection
//! - [`RenderTarget`] - Resizable offscreen target with memory reuse
//! - [`DeferredDisposer`] - Per-frame-slot destruction of GPU objects
//! - [`FilterBackend`] - Trait the chain reaches the GPU through, with a
//!   recording [`DummyBackend`](backend::dummy::DummyBackend) for tests and a
//!   Vulkan implementation
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_filter_chain::{FilterChain, FilterMode};
//!
//! let mut chain = FilterChain::create_default(backend, &info, FilterMode::Linear)?;
//! chain.set_input_texture(frame);
//! chain.notify_sync_index(slot);
//! chain.build_offscreen_passes(cmd, &viewport);
//! chain.build_viewport_pass(cmd, &viewport, None);
//! chain.end_frame(cmd);
//! ```

pub mod backend;
pub mod buffer;
pub mod chain;
pub mod common;
pub mod disposer;
pub mod error;
pub mod lut;
pub mod pass;
pub mod preset;
pub mod reflection;
pub mod render_target;
pub mod scale;
pub mod semantics;
pub mod shader;
pub mod types;

// Re-export main types for convenience
pub use backend::FilterBackend;
pub use chain::{ChainState, FilterChain, FilterChainCreateInfo, SwapchainInfo};
pub use common::CommonResources;
pub use disposer::{DeferredDisposer, DeferredResource};
pub use error::{FilterChainError, Result};
pub use lut::{LookupSampling, LookupTexture};
pub use pass::{Pass, PassConfig};
pub use preset::{ShaderParameter, ShaderPreset};
pub use reflection::{Semantic, ShaderReflection, TextureSemantic};
pub use render_target::RenderTarget;
pub use scale::{Scale, ScaleType};
pub use shader::PassShaders;
pub use types::{
    AddressMode, CommandBufferHandle, FilterMode, ImageLayout, ImageRef, RenderPassHandle, Size2D,
    Texture, TextureFormat, Viewport,
};

/// Filter chain library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
