use thiserror::Error;

use crate::engine::{EngineError, Token};

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Already generating")]
    AlreadyGenerating,

    #[error("Failed to load model from '{path}': {source}")]
    ModelLoad { path: String, source: EngineError },

    #[error("Failed to create context: {0}")]
    ContextCreation(#[source] EngineError),

    #[error("Failed to create sampler: {0}")]
    SamplerCreation(#[source] EngineError),

    #[error("Failed to tokenize prompt: {0}")]
    Tokenization(#[source] EngineError),

    #[error("Failed to process prompt: {0}")]
    PromptDecode(#[source] EngineError),

    #[error("Failed to convert token {token}: {source}")]
    TokenConversion { token: Token, source: EngineError },

    #[error("Failed to decode token: {0}")]
    Decode(#[source] EngineError),
}

impl Error {
    /// The text delivered to a token sink (or returned by blocking
    /// generation) when this error ends a request.
    pub fn fragment(&self) -> String {
        format!("Error: {self}")
    }

    /// True for the errors that reject a request before any engine work.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NoModelLoaded | Self::AlreadyGenerating)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_and_precondition() {
        assert_eq!(Error::NoModelLoaded.fragment(), "Error: No model loaded");
        assert!(Error::AlreadyGenerating.is_precondition());

        let prefill = Error::PromptDecode(EngineError::new("prompt produced no tokens"));
        assert!(!prefill.is_precondition());
        assert_eq!(
            prefill.fragment(),
            "Error: Failed to process prompt: prompt produced no tokens"
        );
    }
}
