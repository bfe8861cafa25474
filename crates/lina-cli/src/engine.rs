//! The engine model-backed commands run on.

#[cfg(feature = "llama")]
pub use lina_core::LlamaEngine as DefaultEngine;

#[cfg(feature = "llama")]
pub fn default_engine() -> anyhow::Result<DefaultEngine> {
    let engine = DefaultEngine::new();
    tracing::debug!(system_info = %engine.system_info(), "llama.cpp backend ready");
    Ok(engine)
}

#[cfg(not(feature = "llama"))]
pub use unavailable::Unavailable as DefaultEngine;

#[cfg(not(feature = "llama"))]
pub fn default_engine() -> anyhow::Result<DefaultEngine> {
    anyhow::bail!(
        "this build of lina has no inference engine; rebuild with `--features llama` \
         (needs a llama.cpp checkout or LLAMA_PREBUILT_DIR)"
    )
}

#[cfg(not(feature = "llama"))]
mod unavailable {
    use std::convert::Infallible;
    use std::path::Path;

    use lina_core::engine::{ContextParams, Engine, EngineError, ModelParams, Token};

    /// Stand-in engine for builds without one. It cannot be constructed.
    pub enum Unavailable {}

    impl Engine for Unavailable {
        type Model = Infallible;
        type Context = Infallible;
        type Sampler = Infallible;

        fn load_model(&self, _: &Path, _: &ModelParams) -> Result<Infallible, EngineError> {
            match *self {}
        }

        fn new_context(&self, m: &Infallible, _: &ContextParams) -> Result<Infallible, EngineError> {
            match *m {}
        }

        fn new_greedy_sampler(&self, m: &Infallible) -> Result<Infallible, EngineError> {
            match *m {}
        }

        fn tokenize(&self, m: &Infallible, _: &str, _: bool, _: bool) -> Result<Vec<Token>, EngineError> {
            match *m {}
        }

        fn decode(&self, c: &mut Infallible, _: &[Token]) -> Result<(), EngineError> {
            match *c {}
        }

        fn clear_cache(&self, c: &mut Infallible) {
            match *c {}
        }

        fn sample(&self, s: &mut Infallible, _: &mut Infallible) -> Token {
            match *s {}
        }

        fn is_end_of_generation(&self, m: &Infallible, _: Token) -> bool {
            match *m {}
        }

        fn token_to_piece(&self, m: &Infallible, _: Token) -> Result<String, EngineError> {
            match *m {}
        }

        fn vocab_size(&self, m: &Infallible) -> i32 {
            match *m {}
        }

        fn context_size(&self, c: &Infallible) -> u32 {
            match *c {}
        }

        fn meta_count(&self, m: &Infallible) -> i32 {
            match *m {}
        }

        fn meta_pair(&self, m: &Infallible, _: i32) -> Option<(String, String)> {
            match *m {}
        }
    }
}
