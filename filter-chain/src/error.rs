//! Filter chain error types.

use thiserror::Error;

/// Errors that can occur while configuring or building a filter chain.
///
/// Per-frame command emission never returns errors; everything here is
/// raised while the chain (or one of its render targets) is being
/// (re)built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterChainError {
    /// Malformed pass configuration (scaling rule, sizes, pass indices).
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Two textures, passes or parameters resolve to the same alias.
    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),
    /// Shader reflection rejected the shader interface.
    #[error("shader reflection failed: {0}")]
    Reflection(String),
    /// A pass reads the output of itself or of a later pass.
    #[error("non-causal filter chain: pass #{pass} reads output of pass #{referenced}")]
    NonCausal {
        /// The pass doing the read.
        pass: usize,
        /// The pass whose output is referenced.
        referenced: usize,
    },
    /// Failed to create a GPU object.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The chain has not been successfully initialized.
    #[error("filter chain is not initialized")]
    NotInitialized,
    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl FilterChainError {
    /// Shorthand for a [`FilterChainError::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand for a [`FilterChainError::Reflection`] error.
    pub fn reflection(msg: impl Into<String>) -> Self {
        Self::Reflection(msg.into())
    }

    /// Shorthand for a [`FilterChainError::ResourceCreation`] error.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::ResourceCreation(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = FilterChainError> = std::result::Result<T, E>;
