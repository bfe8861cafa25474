//! Request and load parameters.

use serde::{Deserialize, Serialize};

/// Fixed maximum tokens per decode call for every context the session
/// creates.
pub const BATCH_WIDTH: u32 = 512;

/// Default number of tokens a request may generate.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Parameters for [`Session::load`](crate::Session::load).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadParams {
    /// Context window in tokens (0 = model default).
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Worker threads for decoding.
    #[serde(default = "default_threads")]
    pub threads: i32,
    /// Layers offloaded to the GPU.
    #[serde(default = "default_gpu_layers")]
    pub gpu_layers: i32,
}

fn default_context_size() -> u32 {
    4096
}

pub(crate) fn default_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

fn default_gpu_layers() -> i32 {
    99
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            context_size: default_context_size(),
            threads: default_threads(),
            gpu_layers: default_gpu_layers(),
        }
    }
}

/// Sampling knobs carried by every request.
///
/// The session's sampler chain is greedy, so these are accepted and logged
/// but do not yet change which token is picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_temp")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
}

fn default_temp() -> f32 {
    0.8
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> i32 {
    40
}
fn default_repeat_penalty() -> f32 {
    1.0
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temp(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
        }
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub sampling: SamplingParams,
    /// Generation ends as soon as the produced text ends with one of these.
    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            sampling: SamplingParams::default(),
            stop: Vec::new(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn stop_on(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let req: GenerationRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(req, GenerationRequest::new("hi"));
        assert_eq!(req.max_tokens, 2048);
        assert_eq!(req.sampling.top_k, 40);
        assert!(req.stop.is_empty());
    }

    #[test]
    fn test_load_params_defaults() {
        let params = LoadParams::default();
        assert_eq!(params.context_size, 4096);
        assert_eq!(params.gpu_layers, 99);
        assert!(params.threads >= 1);
    }
}
