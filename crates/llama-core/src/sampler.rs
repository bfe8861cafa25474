//! Sampler chain construction and token sampling.

use crate::LlamaToken;
use crate::context::LlamaContext;
use crate::error::{LlamaError, Result};

/// RAII wrapper around a `llama_sampler` chain.
pub struct SamplerChain {
    ptr: *mut llama_sys::llama_sampler,
}

unsafe impl Send for SamplerChain {}

impl SamplerChain {
    /// Create an empty sampler chain with performance counters enabled.
    pub fn new() -> Result<Self> {
        let mut params = unsafe { llama_sys::llama_sampler_chain_default_params() };
        params.no_perf = false;
        let ptr = unsafe { llama_sys::llama_sampler_chain_init(params) };
        if ptr.is_null() {
            return Err(LlamaError::SamplerCreationFailed);
        }
        Ok(Self { ptr })
    }

    /// A chain holding a single argmax stage.
    pub fn greedy() -> Result<Self> {
        let mut chain = Self::new()?;
        chain.add_greedy();
        Ok(chain)
    }

    pub fn add_greedy(&mut self) {
        unsafe {
            llama_sys::llama_sampler_chain_add(self.ptr, llama_sys::llama_sampler_init_greedy())
        }
    }

    /// Sample the next token from the logits of the last decoded position.
    pub fn sample(&mut self, ctx: &LlamaContext) -> LlamaToken {
        unsafe { llama_sys::llama_sampler_sample(self.ptr, ctx.as_ptr(), -1) }
    }
}

impl Drop for SamplerChain {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            tracing::debug!("Freeing sampler chain");
            unsafe { llama_sys::llama_sampler_free(self.ptr) }
        }
    }
}
