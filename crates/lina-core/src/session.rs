//! The generation session: one model, one generation at a time.
//!
//! Every operation that touches engine state (load, unload, generate,
//! metadata) runs under one session-wide mutex for its full duration, so a
//! generation blocks all of them until it ends. `is_generating`, `cancel`
//! and `set_token_sink` never wait on that mutex.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{ContextParams, Engine, ModelParams};
use crate::error::{Error, Result};
use crate::generation::{Generation, GenerationSummary};
use crate::params::{BATCH_WIDTH, GenerationRequest, LoadParams, default_threads};
use crate::sink::TokenSink;

/// Metadata key holding a model's display name.
pub const MODEL_NAME_KEY: &str = "general.name";

/// What [`Session::cancel`] does. There is no default; every session names
/// its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Raise a stop request checked once per loop iteration. The loop exits
    /// within one decode step and `is_generating` stays true until it has.
    StopRequest,
    /// Clear the generating flag and nothing else.
    ///
    /// `is_generating` turns false at once while the loop keeps running to
    /// its natural end, and the next `generate` call blocks on the session
    /// lock instead of being rejected. A sink that re-enters the session
    /// after such a cancel deadlocks.
    ClearFlag,
}

impl fmt::Display for CancelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopRequest => write!(f, "stop_request"),
            Self::ClearFlag => write!(f, "clear_flag"),
        }
    }
}

impl FromStr for CancelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stop_request" | "stop-request" => Ok(Self::StopRequest),
            "clear_flag" | "clear-flag" => Ok(Self::ClearFlag),
            other => Err(format!(
                "unknown cancel mode '{other}' (expected stop_request or clear_flag)"
            )),
        }
    }
}

/// Engine handles of a loaded model.
///
/// Field order is drop order: sampler, then context, then model.
pub(crate) struct Loaded<E: Engine> {
    pub(crate) sampler: E::Sampler,
    pub(crate) context: E::Context,
    pub(crate) model: E::Model,
    pub(crate) path: PathBuf,
    /// Tokens held in the context's cache, across every generation since
    /// the load or the last [`Session::clear_context`].
    pub(crate) cached: u32,
}

impl<E: Engine> Loaded<E> {
    fn release(self) {
        let Loaded {
            sampler,
            context,
            model,
            path,
            ..
        } = self;
        drop(sampler);
        drop(context);
        drop(model);
        debug!(path = %path.display(), "Engine handles released");
    }
}

/// Snapshot of the loaded model's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub name: String,
    pub vocab_size: i32,
    pub context_length: u32,
}

pub(crate) type StateGuard<'a, E> = MutexGuard<'a, Option<Loaded<E>>>;

/// Exclusive owner of at most one loaded model.
///
/// Share it between threads with `Arc<Session<E>>`.
pub struct Session<E: Engine> {
    engine: E,
    state: Mutex<Option<Loaded<E>>>,
    pub(crate) generating: AtomicBool,
    pub(crate) stop_requested: AtomicBool,
    sink: RwLock<Option<Arc<dyn TokenSink>>>,
    cancel_mode: CancelMode,
}

impl<E: Engine> Session<E> {
    /// An empty session driving `engine`.
    pub fn new(engine: E, cancel_mode: CancelMode) -> Self {
        Self {
            engine,
            state: Mutex::new(None),
            generating: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            sink: RwLock::new(None),
            cancel_mode,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cancel_mode(&self) -> CancelMode {
        self.cancel_mode
    }

    // A panicking sink poisons the lock mid-generation; the state itself is
    // still consistent, so keep going.
    fn lock_state(&self) -> StateGuard<'_, E> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    //  Lifecycle

    /// Load the model at `path`, replacing whatever was loaded.
    ///
    /// On any failure the session is left empty and no engine handle
    /// survives. A non-positive thread count means "all available cores".
    pub fn load(&self, path: impl AsRef<Path>, params: &LoadParams) -> Result<()> {
        let path = path.as_ref();
        let mut state = self.lock_state();

        if let Some(previous) = state.take() {
            info!(path = %previous.path.display(), "Replacing loaded model");
            previous.release();
        }

        match self.create(path, params) {
            Ok(loaded) => {
                *state = Some(loaded);
                info!(path = %path.display(), "Model loaded");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model load failed");
                Err(e)
            }
        }
    }

    fn create(&self, path: &Path, params: &LoadParams) -> Result<Loaded<E>> {
        let model_params = ModelParams {
            n_gpu_layers: params.gpu_layers,
        };
        let context_params = ContextParams {
            n_ctx: params.context_size,
            n_threads: if params.threads > 0 {
                params.threads
            } else {
                default_threads()
            },
            n_batch: BATCH_WIDTH,
        };

        // Early returns drop the locals in reverse order: context, then model.
        let model = self
            .engine
            .load_model(path, &model_params)
            .map_err(|source| Error::ModelLoad {
                path: path.display().to_string(),
                source,
            })?;
        let context = self
            .engine
            .new_context(&model, &context_params)
            .map_err(Error::ContextCreation)?;
        let sampler = self
            .engine
            .new_greedy_sampler(&model)
            .map_err(Error::SamplerCreation)?;

        Ok(Loaded {
            sampler,
            context,
            model,
            path: path.to_path_buf(),
            cached: 0,
        })
    }

    /// Release the loaded model, if any.
    pub fn unload(&self) {
        let mut state = self.lock_state();
        if let Some(loaded) = state.take() {
            loaded.release();
            info!("Model unloaded");
        }
    }

    /// Drop every token cached in the execution context so the next
    /// generation starts from an empty sequence. Generations otherwise
    /// continue the sequence left by the previous one.
    ///
    /// Waits for an in-flight generation; a no-op when nothing is loaded.
    pub fn clear_context(&self) {
        let mut state = self.lock_state();
        if let Some(loaded) = state.as_mut() {
            self.engine.clear_cache(&mut loaded.context);
            debug!(dropped = loaded.cached, "Context cache cleared");
            loaded.cached = 0;
        }
    }

    /// Tokens currently held in the context's cache, 0 when empty.
    pub fn cached_tokens(&self) -> u32 {
        self.lock_state().as_ref().map_or(0, |loaded| loaded.cached)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_state().is_some()
    }

    //  Streaming

    /// Replace the sink that receives streamed fragments. `None` drops
    /// fragments. Takes effect from the next fragment, even mid-generation.
    pub fn set_token_sink(&self, sink: Option<Arc<dyn TokenSink>>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Deliver `fragment` to the registered sink, if any. Hosts use this to
    /// report failures detected before a request reaches the session.
    pub fn emit(&self, fragment: &str) {
        // Never hold the slot lock across the callback: the sink may replace
        // itself.
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.on_fragment(fragment);
        }
    }

    /// Start a generation and return it as a lazy sequence of fragments.
    ///
    /// Tokenization and the prompt prefill happen here; each `next()` then
    /// samples, converts and (on the following call) decodes one token on
    /// the calling thread. The session stays locked until the returned
    /// [`Generation`] is dropped.
    pub fn stream(&self, request: &GenerationRequest) -> Result<Generation<'_, E>> {
        // Checked before blocking so a sink re-entering the session is
        // rejected instead of deadlocking.
        if self.generating.load(Ordering::Acquire) {
            return Err(Error::AlreadyGenerating);
        }
        let state = self.lock_state();
        Generation::start(self, state, request)
    }

    /// Run a generation to completion, delivering every fragment to the
    /// registered sink as soon as it is produced.
    ///
    /// Failures are delivered as one `"Error: ..."` fragment.
    pub fn generate_streaming(&self, request: &GenerationRequest) -> GenerationSummary {
        let mut generation = match self.stream(request) {
            Ok(generation) => generation,
            Err(e) => {
                if e.is_precondition() {
                    debug!(error = %e, "Streaming generation rejected");
                } else {
                    warn!(error = %e, "Streaming generation failed before the first token");
                }
                self.emit(&e.fragment());
                return GenerationSummary::failed();
            }
        };

        while let Some(item) = generation.next() {
            match item {
                Ok(piece) => self.emit(&piece),
                // A failed decode follows text already on screen.
                Err(e @ Error::Decode(_)) => self.emit(&format!("\n{}", e.fragment())),
                Err(e) => self.emit(&e.fragment()),
            }
        }
        generation.summary()
    }

    /// Run a generation to completion and return the produced text.
    ///
    /// Rejections and prompt failures return their `"Error: ..."` text
    /// instead; a failure after tokens were produced ends the text early.
    pub fn generate_blocking(&self, request: &GenerationRequest) -> String {
        let mut generation = match self.stream(request) {
            Ok(generation) => generation,
            Err(e) => return e.fragment(),
        };

        let mut text = String::new();
        for item in generation.by_ref() {
            match item {
                Ok(piece) => text.push_str(&piece),
                Err(e) => warn!(error = %e, "Generation ended early"),
            }
        }
        text
    }

    /// Advisory: may be stale by the time the caller acts on it.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Ask the in-flight generation to stop, according to the session's
    /// [`CancelMode`]. Returns immediately.
    pub fn cancel(&self) {
        match self.cancel_mode {
            CancelMode::StopRequest => self.stop_requested.store(true, Ordering::Release),
            CancelMode::ClearFlag => self.generating.store(false, Ordering::Release),
        }
        debug!(mode = %self.cancel_mode, "Cancel requested");
    }

    //  Metadata

    /// Vocabulary size of the loaded model, 0 when empty.
    pub fn vocab_size(&self) -> i32 {
        self.lock_state()
            .as_ref()
            .map_or(0, |loaded| self.engine.vocab_size(&loaded.model))
    }

    /// Size of the execution context's window, 0 when empty.
    pub fn context_length(&self) -> u32 {
        self.lock_state()
            .as_ref()
            .map_or(0, |loaded| self.engine.context_size(&loaded.context))
    }

    /// The model's `general.name` metadata value, empty when absent or when
    /// nothing is loaded.
    pub fn model_name(&self) -> String {
        self.lock_state()
            .as_ref()
            .map(|loaded| self.name_of(loaded))
            .unwrap_or_default()
    }

    fn name_of(&self, loaded: &Loaded<E>) -> String {
        (0..self.engine.meta_count(&loaded.model))
            .filter_map(|i| self.engine.meta_pair(&loaded.model, i))
            .find(|(key, value)| key == MODEL_NAME_KEY && !value.is_empty())
            .map(|(_, value)| value)
            .unwrap_or_default()
    }

    /// Everything the metadata accessors report, read under one lock.
    pub fn model_info(&self) -> Option<ModelInfo> {
        let state = self.lock_state();
        let loaded = state.as_ref()?;
        Some(ModelInfo {
            path: loaded.path.clone(),
            name: self.name_of(loaded),
            vocab_size: self.engine.vocab_size(&loaded.model),
            context_length: self.engine.context_size(&loaded.context),
        })
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = state.take() {
            loaded.release();
        }
    }
}

impl<E: Engine> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generating", &self.is_generating())
            .field("cancel_mode", &self.cancel_mode)
            .finish_non_exhaustive()
    }
}
