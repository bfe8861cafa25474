//! One generation as a lazy, finite, non-restartable sequence of fragments.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError, Token};
use crate::error::{Error, Result};
use crate::params::GenerationRequest;
use crate::session::{Session, StateGuard};

/// Why a generation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced an end-of-generation token.
    Stop,
    /// `max_tokens` were produced.
    Length,
    /// The context window is full.
    ContextFull,
    /// The produced text ended with this stop sequence.
    StopWord(String),
    /// A stop request was observed.
    Cancelled,
    /// The request was rejected or an engine call failed.
    Error,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ContextFull => write!(f, "context_full"),
            Self::StopWord(w) => write!(f, "stop_word:{w}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl GenerationSummary {
    pub(crate) fn failed() -> Self {
        Self {
            finish_reason: FinishReason::Error,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

/// Owns the session's generating flag; clears it when dropped, on every
/// exit path.
struct GeneratingFlag<'a>(&'a AtomicBool);

impl Drop for GeneratingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An in-flight generation holding the session lock.
///
/// Yields `Ok(piece)` per produced token, or one `Err` when an engine call
/// fails mid-way, then `None` for good. Each `next()` first decodes the
/// token yielded by the previous call, so a caller always sees a piece
/// before the engine moves on to the next step.
pub struct Generation<'a, E: Engine> {
    // Declared before `state`: the flag is cleared before the lock is
    // released, so no new generation can observe a stale flag.
    _flag: GeneratingFlag<'a>,
    state: StateGuard<'a, E>,
    session: &'a Session<E>,
    max_tokens: u32,
    stop: Vec<String>,
    prompt_tokens: u32,
    completion_tokens: u32,
    n_ctx: u32,
    /// Sampled and yielded but not yet decoded.
    pending: Option<Token>,
    /// Produced text, kept only for stop-sequence matching.
    text: String,
    finish: Option<FinishReason>,
}

impl<'a, E: Engine> Generation<'a, E> {
    /// Claim the generating flag, tokenize and prefill.
    pub(crate) fn start(
        session: &'a Session<E>,
        mut state: StateGuard<'a, E>,
        request: &GenerationRequest,
    ) -> Result<Self> {
        let engine = session.engine();
        let Some(loaded) = state.as_mut() else {
            return Err(Error::NoModelLoaded);
        };
        if session.generating.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyGenerating);
        }
        let flag = GeneratingFlag(&session.generating);
        session.stop_requested.store(false, Ordering::Release);

        let tokens = engine
            .tokenize(&loaded.model, &request.prompt, true, true)
            .map_err(Error::Tokenization)?;
        // Nothing would be decoded, so there would be no logits to sample.
        if tokens.is_empty() {
            return Err(Error::PromptDecode(EngineError::new("prompt produced no tokens")));
        }
        engine
            .decode(&mut loaded.context, &tokens)
            .map_err(Error::PromptDecode)?;
        let prompt_tokens = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
        loaded.cached = loaded.cached.saturating_add(prompt_tokens);
        let n_ctx = engine.context_size(&loaded.context);

        let sampling = &request.sampling;
        debug!(
            prompt_tokens,
            cached = loaded.cached,
            max_tokens = request.max_tokens,
            temperature = sampling.temperature,
            top_p = sampling.top_p,
            top_k = sampling.top_k,
            repeat_penalty = sampling.repeat_penalty,
            "Generation started"
        );

        Ok(Self {
            _flag: flag,
            state,
            session,
            max_tokens: request.max_tokens,
            stop: request
                .stop
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            prompt_tokens,
            completion_tokens: 0,
            n_ctx,
            pending: None,
            text: String::new(),
            finish: None,
        })
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    /// Tokens sampled so far, excluding the end-of-generation marker.
    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    /// `None` while the sequence can still yield.
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish.as_ref()
    }

    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            finish_reason: self.finish.clone().unwrap_or(FinishReason::Cancelled),
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        }
    }

    fn finish(&mut self, reason: FinishReason) -> Option<Result<String>> {
        self.finish = Some(reason);
        None
    }

    fn fail(&mut self, error: Error) -> Option<Result<String>> {
        warn!(error = %error, completion_tokens = self.completion_tokens, "Generation failed");
        self.finish = Some(FinishReason::Error);
        Some(Err(error))
    }
}

impl<E: Engine> Iterator for Generation<'_, E> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finish.is_some() {
            return None;
        }
        let session = self.session;
        let engine = session.engine();
        let Some(loaded) = self.state.as_mut() else {
            return self.fail(Error::NoModelLoaded);
        };

        if let Some(token) = self.pending.take() {
            // The cache also holds earlier generations' tokens.
            if self.n_ctx > 0 && loaded.cached >= self.n_ctx {
                return self.finish(FinishReason::ContextFull);
            }
            if let Err(e) = engine.decode(&mut loaded.context, &[token]) {
                return self.fail(Error::Decode(e));
            }
            loaded.cached += 1;
        }

        if self.completion_tokens >= self.max_tokens {
            return self.finish(FinishReason::Length);
        }
        if session.stop_requested.load(Ordering::Acquire) {
            return self.finish(FinishReason::Cancelled);
        }

        let token = engine.sample(&mut loaded.sampler, &mut loaded.context);
        if engine.is_end_of_generation(&loaded.model, token) {
            return self.finish(FinishReason::Stop);
        }
        let piece = match engine.token_to_piece(&loaded.model, token) {
            Ok(piece) => piece,
            Err(source) => return self.fail(Error::TokenConversion { token, source }),
        };
        self.completion_tokens += 1;

        if !self.stop.is_empty() {
            self.text.push_str(&piece);
            let text = &self.text;
            if let Some(word) = self.stop.iter().find(|w| text.ends_with(w.as_str())) {
                let word = word.clone();
                return self.finish(FinishReason::StopWord(word));
            }
        }

        self.pending = Some(token);
        Some(Ok(piece))
    }
}

impl<E: Engine> Drop for Generation<'_, E> {
    fn drop(&mut self) {
        match &self.finish {
            Some(reason) => debug!(
                finish_reason = %reason,
                prompt_tokens = self.prompt_tokens,
                completion_tokens = self.completion_tokens,
                "Generation finished"
            ),
            None => debug!(
                completion_tokens = self.completion_tokens,
                "Generation dropped before completion"
            ),
        }
    }
}
