//! The inference-engine capability a [`Session`](crate::Session) drives.
//!
//! The session never looks inside the handles it owns: it creates them
//! through an [`Engine`], passes them back into engine calls and releases
//! them by dropping. Dropping a handle is the engine's release operation.

#[cfg(feature = "llama")]
pub mod llama;

use std::path::Path;

use thiserror::Error;

/// Token id produced by the engine's vocabulary.
pub type Token = i32;

/// Failure reported by an engine call. The session wraps it into the
/// matching [`Error`](crate::Error) variant.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for EngineError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for EngineError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Model-loading parameters passed through to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelParams {
    /// Layers to offload to the GPU.
    pub n_gpu_layers: i32,
}

/// Execution-context parameters passed through to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    /// Context window in tokens; 0 means the model's own default.
    pub n_ctx: u32,
    pub n_threads: i32,
    /// Maximum tokens per decode call.
    pub n_batch: u32,
}

/// Operations the session needs from an inference library.
///
/// Implementations must tolerate calls from any thread, but the session
/// guarantees that calls touching one context or sampler never overlap.
pub trait Engine: Send + Sync {
    type Model: Send;
    /// Must not outlive the model it was created from.
    type Context: Send;
    /// Must not outlive the context it samples from.
    type Sampler: Send;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, EngineError>;

    fn new_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, EngineError>;

    /// A sampler chain holding a single greedy stage.
    fn new_greedy_sampler(&self, model: &Self::Model) -> Result<Self::Sampler, EngineError>;

    fn tokenize(
        &self,
        model: &Self::Model,
        text: &str,
        add_bos: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError>;

    /// Run one forward pass over `tokens`, appending them to the context's
    /// cache.
    fn decode(&self, context: &mut Self::Context, tokens: &[Token]) -> Result<(), EngineError>;

    /// Forget every token cached in `context`.
    fn clear_cache(&self, context: &mut Self::Context);

    fn sample(&self, sampler: &mut Self::Sampler, context: &mut Self::Context) -> Token;

    fn is_end_of_generation(&self, model: &Self::Model, token: Token) -> bool;

    fn token_to_piece(&self, model: &Self::Model, token: Token) -> Result<String, EngineError>;

    fn vocab_size(&self, model: &Self::Model) -> i32;

    fn context_size(&self, context: &Self::Context) -> u32;

    fn meta_count(&self, model: &Self::Model) -> i32;

    /// Metadata `(key, value)` pair at `index`, if both are readable.
    fn meta_pair(&self, model: &Self::Model, index: i32) -> Option<(String, String)>;
}
