//! Single-model text generation session.
//!
//! A [`Session`] owns at most one loaded model together with its execution
//! context and sampler, runs one generation at a time and streams the
//! produced text to a registered [`TokenSink`]. The inference library sits
//! behind the [`Engine`] trait; the `llama` feature provides the llama.cpp
//! implementation.

pub mod engine;
pub mod error;
pub mod generation;
pub mod modelfile;
pub mod params;
pub mod prompt;
pub mod session;
pub mod sink;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use engine::{Engine, EngineError, Token};
pub use error::{Error, Result};
pub use generation::{FinishReason, Generation, GenerationSummary};
pub use modelfile::{Modelfile, ModelfileError};
pub use params::{GenerationRequest, LoadParams, SamplingParams};
pub use prompt::{ChatMessage, Role};
pub use session::{CancelMode, ModelInfo, Session};
pub use sink::{ChannelSink, TokenSink};

#[cfg(feature = "llama")]
pub use engine::llama::LlamaEngine;
