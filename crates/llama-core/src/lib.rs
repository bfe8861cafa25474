//! Safe Rust wrapper around the parts of the llama.cpp C API that lina uses.
//!
//! Each raw handle (model, context, sampler chain) is owned by an RAII type
//! that frees it on drop. A context keeps its model alive through an `Arc`,
//! so release order can never invert.

pub mod backend;
pub mod context;
pub mod error;
pub mod model;
pub mod sampler;
pub mod token;

pub use backend::LlamaBackend;
pub use context::{ContextParams, LlamaContext};
pub use error::{LlamaError, Result};
pub use model::{LlamaModel, ModelParams};
pub use sampler::SamplerChain;
pub use token::{token_to_piece, tokenize};

/// Token id as used by llama.cpp.
pub type LlamaToken = llama_sys::llama_token;
