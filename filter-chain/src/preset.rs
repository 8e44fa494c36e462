//! Shader preset metadata.
//!
//! The chain doesn't load presets. A loader (or UI) fills in a
//! [`ShaderPreset`] and hands it to the chain; the current parameter values
//! are read from it every frame, so edits through
//! [`FilterChain::preset_mut`](crate::chain::FilterChain::preset_mut) take
//! effect on the next draw.

/// A user-adjustable shader parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderParameter {
    /// Identifier shaders declare the parameter with.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Value the parameter starts with.
    pub initial: f32,
    /// Current value.
    pub current: f32,
    /// Lower bound.
    pub minimum: f32,
    /// Upper bound.
    pub maximum: f32,
    /// UI step.
    pub step: f32,
}

impl ShaderParameter {
    /// Create a parameter starting at `initial`.
    pub fn new(id: impl Into<String>, initial: f32, minimum: f32, maximum: f32, step: f32) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            initial,
            current: initial,
            minimum,
            maximum,
            step,
        }
    }

    /// Set the current value, clamped to the parameter's range.
    pub fn set(&mut self, value: f32) {
        self.current = value.clamp(self.minimum, self.maximum);
    }

    /// Restore the initial value.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Preset data the chain reads at draw time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderPreset {
    /// Parameters, indexed by [`FilterChain::add_parameter`](crate::chain::FilterChain::add_parameter).
    pub parameters: Vec<ShaderParameter>,
}

impl ShaderPreset {
    /// Create an empty preset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter, returning its index.
    pub fn push_parameter(&mut self, parameter: ShaderParameter) -> usize {
        self.parameters.push(parameter);
        self.parameters.len() - 1
    }

    /// Find a parameter by id.
    pub fn parameter(&self, id: &str) -> Option<&ShaderParameter> {
        self.parameters.iter().find(|p| p.id == id)
    }

    /// Find a parameter by id for editing.
    pub fn parameter_mut(&mut self, id: &str) -> Option<&mut ShaderParameter> {
        self.parameters.iter_mut().find(|p| p.id == id)
    }

    /// Current value of the parameter at `index`, or 0 if out of range.
    pub fn current(&self, index: usize) -> f32 {
        self.parameters.get(index).map_or(0.0, |p| p.current)
    }
}
