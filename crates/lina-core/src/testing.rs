//! In-memory engine for exercising sessions without a model file.
//!
//! [`ScriptedEngine`] replays a fixed token script, can be told to fail at
//! any engine step, and counts every handle it creates and releases so tests
//! can check for leaks and release order.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::engine::{ContextParams, Engine, EngineError, ModelParams, Token};
use crate::sink::TokenSink;

/// End-of-generation token of every script.
pub const EOG: Token = 0;

const BOS: Token = 1;

/// What a [`ScriptedEngine`] produces and where it fails.
#[derive(Debug, Clone)]
pub struct Script {
    /// Text piece per token id; id 0 is the end-of-generation marker.
    vocab: Vec<String>,
    /// Tokens returned by successive `sample` calls on one context.
    output: Vec<Token>,
    /// Restart `output` instead of sampling EOG once it is exhausted.
    cycle: bool,
    metadata: Vec<(String, String)>,
    n_ctx_train: u32,
    /// Whether the vocabulary prepends BOS when asked to.
    add_bos: bool,
    decode_delay: Option<Duration>,
    failures: Failures,
}

#[derive(Debug, Clone, Default)]
struct Failures {
    load: bool,
    context: bool,
    sampler: bool,
    tokenize: bool,
    prefill: bool,
    /// 1-based index of the generated-token decode that fails.
    decode_step: Option<usize>,
    piece: Option<Token>,
}

impl Script {
    /// A script that samples `pieces` in order and then the EOG token.
    pub fn words(pieces: &[&str]) -> Self {
        let mut vocab = vec!["</s>".to_string(), "<s>".to_string()];
        vocab.extend(pieces.iter().map(|p| p.to_string()));
        let output = (0..pieces.len()).map(|i| i as Token + 2).collect();
        Self {
            vocab,
            output,
            cycle: false,
            metadata: vec![
                ("general.architecture".into(), "llama".into()),
                ("general.name".into(), "scripted-model".into()),
            ],
            n_ctx_train: 2048,
            add_bos: true,
            decode_delay: None,
            failures: Failures::default(),
        }
    }

    /// Repeat the pieces forever; generation only ends through max tokens,
    /// a stop request or the context guard.
    pub fn cycle(mut self) -> Self {
        self.cycle = true;
        self
    }

    pub fn metadata(mut self, pairs: &[(&str, &str)]) -> Self {
        self.metadata = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Context size used when a load asks for the model default (0).
    pub fn n_ctx_train(mut self, n_ctx: u32) -> Self {
        self.n_ctx_train = n_ctx;
        self
    }

    /// Model a vocabulary that never prepends BOS, so an empty prompt
    /// tokenizes to nothing.
    pub fn no_bos(mut self) -> Self {
        self.add_bos = false;
        self
    }

    /// Sleep inside every decode call.
    pub fn decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    pub fn fail_load(mut self) -> Self {
        self.failures.load = true;
        self
    }

    pub fn fail_context(mut self) -> Self {
        self.failures.context = true;
        self
    }

    pub fn fail_sampler(mut self) -> Self {
        self.failures.sampler = true;
        self
    }

    pub fn fail_tokenize(mut self) -> Self {
        self.failures.tokenize = true;
        self
    }

    pub fn fail_prefill(mut self) -> Self {
        self.failures.prefill = true;
        self
    }

    /// Fail the `step`-th decode of a generated token (1-based).
    pub fn fail_decode_at(mut self, step: usize) -> Self {
        self.failures.decode_step = Some(step);
        self
    }

    /// Fail piece conversion of the `index`-th scripted piece (0-based).
    pub fn fail_piece_at(mut self, index: usize) -> Self {
        self.failures.piece = self.output.get(index).copied();
        self
    }
}

/// A released handle, in the order the engine saw releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    Sampler,
    Context,
    Model,
}

/// Call and handle counters shared by an engine and every handle it made.
#[derive(Debug, Default)]
pub struct Stats {
    pub models_created: AtomicUsize,
    pub models_released: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub contexts_released: AtomicUsize,
    pub samplers_created: AtomicUsize,
    pub samplers_released: AtomicUsize,
    pub tokenize_calls: AtomicUsize,
    pub decode_calls: AtomicUsize,
    pub sample_calls: AtomicUsize,
    pub cache_clears: AtomicUsize,
    releases: Mutex<Vec<Released>>,
    context_params: Mutex<Vec<ContextParams>>,
    model_params: Mutex<Vec<ModelParams>>,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> Vec<Released> {
        self.releases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn context_params(&self) -> Vec<ContextParams> {
        self.context_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn model_params(&self) -> Vec<ModelParams> {
        self.model_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every created handle has been released.
    pub fn balanced(&self) -> bool {
        Self::get(&self.models_created) == Self::get(&self.models_released)
            && Self::get(&self.contexts_created) == Self::get(&self.contexts_released)
            && Self::get(&self.samplers_created) == Self::get(&self.samplers_released)
    }

    fn record_release(&self, counter: &AtomicUsize, which: Released) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.releases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(which);
    }
}

#[derive(Debug)]
pub struct ScriptedEngine {
    script: Script,
    stats: Arc<Stats>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }
}

pub struct ScriptedModel {
    stats: Arc<Stats>,
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.stats
            .record_release(&self.stats.models_released, Released::Model);
    }
}

pub struct ScriptedContext {
    stats: Arc<Stats>,
    n_ctx: u32,
    cached: usize,
    decodes: usize,
    sampled: usize,
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.stats
            .record_release(&self.stats.contexts_released, Released::Context);
    }
}

pub struct ScriptedSampler {
    stats: Arc<Stats>,
}

impl Drop for ScriptedSampler {
    fn drop(&mut self) {
        self.stats
            .record_release(&self.stats.samplers_released, Released::Sampler);
    }
}

impl Engine for ScriptedEngine {
    type Model = ScriptedModel;
    type Context = ScriptedContext;
    type Sampler = ScriptedSampler;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, EngineError> {
        self.stats
            .model_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params.clone());
        if self.script.failures.load {
            return Err(format!("cannot open {}", path.display()).into());
        }
        self.stats.models_created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedModel {
            stats: self.stats(),
        })
    }

    fn new_context(
        &self,
        _model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, EngineError> {
        self.stats
            .context_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params.clone());
        if self.script.failures.context {
            return Err("out of memory".into());
        }
        self.stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        let n_ctx = if params.n_ctx == 0 {
            self.script.n_ctx_train
        } else {
            params.n_ctx
        };
        Ok(ScriptedContext {
            stats: self.stats(),
            n_ctx,
            cached: 0,
            decodes: 0,
            sampled: 0,
        })
    }

    fn new_greedy_sampler(&self, _model: &Self::Model) -> Result<Self::Sampler, EngineError> {
        if self.script.failures.sampler {
            return Err("sampler chain init failed".into());
        }
        self.stats.samplers_created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSampler {
            stats: self.stats(),
        })
    }

    fn tokenize(
        &self,
        _model: &Self::Model,
        text: &str,
        add_bos: bool,
        _parse_special: bool,
    ) -> Result<Vec<Token>, EngineError> {
        self.stats.tokenize_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.failures.tokenize {
            return Err("tokenizer rejected input".into());
        }
        let mut tokens: Vec<Token> = if add_bos && self.script.add_bos {
            vec![BOS]
        } else {
            Vec::new()
        };
        tokens.extend(text.split_whitespace().map(|_| BOS + 1));
        Ok(tokens)
    }

    fn decode(&self, context: &mut Self::Context, tokens: &[Token]) -> Result<(), EngineError> {
        self.stats.decode_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.decode_delay {
            std::thread::sleep(delay);
        }
        let step = context.decodes;
        context.decodes += 1;
        if step == 0 && self.script.failures.prefill {
            return Err("prefill rejected".into());
        }
        if step > 0 && self.script.failures.decode_step == Some(step) {
            return Err(format!("decode step {step} failed").into());
        }
        if tokens.is_empty() {
            return Err("empty batch".into());
        }
        if context.cached + tokens.len() > context.n_ctx as usize {
            return Err("context window exceeded".into());
        }
        context.cached += tokens.len();
        Ok(())
    }

    fn clear_cache(&self, context: &mut Self::Context) {
        self.stats.cache_clears.fetch_add(1, Ordering::SeqCst);
        context.cached = 0;
    }

    fn sample(&self, _sampler: &mut Self::Sampler, context: &mut Self::Context) -> Token {
        self.stats.sample_calls.fetch_add(1, Ordering::SeqCst);
        let index = context.sampled;
        context.sampled += 1;
        let output = &self.script.output;
        match output.get(index) {
            Some(&token) => token,
            None if self.script.cycle && !output.is_empty() => output[index % output.len()],
            None => EOG,
        }
    }

    fn is_end_of_generation(&self, _model: &Self::Model, token: Token) -> bool {
        token == EOG
    }

    fn token_to_piece(&self, _model: &Self::Model, token: Token) -> Result<String, EngineError> {
        if self.script.failures.piece == Some(token) {
            return Err(format!("no piece for token {token}").into());
        }
        usize::try_from(token)
            .ok()
            .and_then(|i| self.script.vocab.get(i))
            .cloned()
            .ok_or_else(|| format!("unknown token {token}").into())
    }

    fn vocab_size(&self, _model: &Self::Model) -> i32 {
        self.script.vocab.len() as i32
    }

    fn context_size(&self, context: &Self::Context) -> u32 {
        context.n_ctx
    }

    fn meta_count(&self, _model: &Self::Model) -> i32 {
        self.script.metadata.len() as i32
    }

    fn meta_pair(&self, _model: &Self::Model, index: i32) -> Option<(String, String)> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.script.metadata.get(i))
            .cloned()
    }
}

/// Sink that records every fragment it receives.
#[derive(Debug, Default)]
pub struct FragmentRecorder {
    fragments: Mutex<Vec<String>>,
}

impl FragmentRecorder {
    pub fn fragments(&self) -> Vec<String> {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenSink for FragmentRecorder {
    fn on_fragment(&self, fragment: &str) {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment.to_owned());
    }
}
