//! [`Engine`] implementation backed by llama.cpp through `llama-core`.

use std::path::Path;
use std::sync::Arc;

use llama_core::{LlamaBackend, LlamaContext, LlamaError, LlamaModel, SamplerChain};

use super::{ContextParams, EngineError, ModelParams, Token};
use crate::Engine;

impl From<LlamaError> for EngineError {
    fn from(e: LlamaError) -> Self {
        EngineError::new(e.to_string())
    }
}

/// The production engine. Creating one initializes the llama.cpp backend
/// and routes its logs into `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct LlamaEngine {
    backend: LlamaBackend,
}

impl LlamaEngine {
    pub fn new() -> Self {
        let backend = LlamaBackend::init();
        backend.set_log_callback();
        Self { backend }
    }

    pub fn system_info(&self) -> String {
        self.backend.system_info()
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LlamaEngine {
    type Model = Arc<LlamaModel>;
    type Context = LlamaContext;
    type Sampler = SamplerChain;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, EngineError> {
        let params = llama_core::ModelParams {
            n_gpu_layers: params.n_gpu_layers,
            ..Default::default()
        };
        Ok(Arc::new(LlamaModel::load_from_file(path, &params)?))
    }

    fn new_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, EngineError> {
        let params = llama_core::ContextParams {
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            n_threads: params.n_threads,
        };
        Ok(LlamaContext::new(Arc::clone(model), &params)?)
    }

    fn new_greedy_sampler(&self, _model: &Self::Model) -> Result<Self::Sampler, EngineError> {
        Ok(SamplerChain::greedy()?)
    }

    fn tokenize(
        &self,
        model: &Self::Model,
        text: &str,
        add_bos: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError> {
        Ok(llama_core::tokenize(model, text, add_bos, parse_special)?)
    }

    fn decode(&self, context: &mut Self::Context, tokens: &[Token]) -> Result<(), EngineError> {
        Ok(context.decode(tokens)?)
    }

    fn clear_cache(&self, context: &mut Self::Context) {
        context.clear_memory();
    }

    fn sample(&self, sampler: &mut Self::Sampler, context: &mut Self::Context) -> Token {
        sampler.sample(context)
    }

    fn is_end_of_generation(&self, model: &Self::Model, token: Token) -> bool {
        model.is_eog(token)
    }

    fn token_to_piece(&self, model: &Self::Model, token: Token) -> Result<String, EngineError> {
        Ok(llama_core::token_to_piece(model, token)?)
    }

    fn vocab_size(&self, model: &Self::Model) -> i32 {
        model.n_vocab()
    }

    fn context_size(&self, context: &Self::Context) -> u32 {
        context.n_ctx()
    }

    fn meta_count(&self, model: &Self::Model) -> i32 {
        model.meta_count()
    }

    fn meta_pair(&self, model: &Self::Model, index: i32) -> Option<(String, String)> {
        Some((
            model.meta_key_by_index(index)?,
            model.meta_val_str_by_index(index)?,
        ))
    }
}
