//! Safe RAII wrapper around `llama_context`.

use std::sync::Arc;

use tracing::debug;

use crate::LlamaToken;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// Owns a `llama_context` pointer and its parent model reference.
pub struct LlamaContext {
    ptr: *mut llama_sys::llama_context,
    /// Keeps the model alive for the lifetime of the context.
    _model: Arc<LlamaModel>,
}

// Safety: every mutating call takes &mut self; the session layer serializes
// access behind a Mutex.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    /// Create a new inference context.
    pub fn new(model: Arc<LlamaModel>, params: &ContextParams) -> Result<Self> {
        let mut raw = unsafe { llama_sys::llama_context_default_params() };
        raw.n_ctx = params.n_ctx;
        raw.n_batch = params.n_batch;
        raw.n_threads = params.n_threads;
        raw.n_threads_batch = params.n_threads;
        raw.no_perf = false;

        let ptr = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), raw) };
        if ptr.is_null() {
            return Err(LlamaError::ContextCreationFailed(
                "llama_init_from_model returned null".into(),
            ));
        }

        debug!(
            n_ctx = params.n_ctx,
            n_threads = params.n_threads,
            n_batch = params.n_batch,
            "Context created"
        );
        Ok(Self { ptr, _model: model })
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_context {
        self.ptr
    }

    /// Size of the context window actually allocated.
    pub fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.ptr) }
    }

    /// Decode `tokens` as one batch continuing the current sequence.
    ///
    /// Positions are tracked by llama.cpp's memory, so the prompt and every
    /// later single token go through the same call. An empty batch is
    /// rejected by llama.cpp and reported as an error.
    pub fn decode(&mut self, tokens: &[LlamaToken]) -> Result<()> {
        // llama_batch_get_one only reads through the token pointer.
        let batch =
            unsafe { llama_sys::llama_batch_get_one(tokens.as_ptr().cast_mut(), tokens.len() as i32) };
        let rc = unsafe { llama_sys::llama_decode(self.ptr, batch) };
        if rc != 0 {
            return Err(LlamaError::DecodeFailed(rc));
        }
        Ok(())
    }

    /// Remove every cached token; the next decode starts at position 0.
    pub fn clear_memory(&mut self) {
        unsafe {
            let mem = llama_sys::llama_get_memory(self.ptr);
            if !mem.is_null() {
                llama_sys::llama_memory_clear(mem, true);
            }
        }
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama context");
            unsafe { llama_sys::llama_free(self.ptr) }
        }
    }
}

//  ContextParams

#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Context window; 0 uses the model's training context.
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
}

impl Default for ContextParams {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);
        Self {
            n_ctx: 0,
            n_batch: 512,
            n_threads: threads,
        }
    }
}
