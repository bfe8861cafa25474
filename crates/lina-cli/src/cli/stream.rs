//! Drive a session from async code: loading and generation run under
//! `spawn_blocking`, fragments come back over a channel and Ctrl-C cancels.

use std::io::Write;
use std::sync::Arc;

use lina_core::{ChannelSink, Engine, FinishReason, GenerationRequest, GenerationSummary, Session};
use tracing::{debug, info};

use crate::cli::settings::Settings;
use crate::engine::{self, DefaultEngine};

/// Everything one request produced.
#[derive(Debug)]
pub struct Reply {
    /// Streamed text, including any `"Error: ..."` fragment.
    pub text: String,
    pub summary: GenerationSummary,
    /// Ctrl-C was pressed while the reply was streaming.
    pub interrupted: bool,
}

impl Reply {
    pub fn failed(&self) -> bool {
        self.summary.finish_reason == FinishReason::Error
    }
}

/// Create a session on the default engine and load the configured model.
pub async fn open(settings: &Settings) -> anyhow::Result<Arc<Session<DefaultEngine>>> {
    let session = Arc::new(Session::new(engine::default_engine()?, settings.cancel_mode));
    info!(model = %settings.model.display(), "Loading model…");
    load(&session, settings).await?;
    Ok(session)
}

pub async fn load<E: Engine + 'static>(
    session: &Arc<Session<E>>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let session = Arc::clone(session);
    let path = settings.model.clone();
    let params = settings.load.clone();
    tokio::task::spawn_blocking(move || session.load(&path, &params)).await??;
    Ok(())
}

/// Stream one reply into `out`, fragment by fragment.
///
/// The first Ctrl-C cancels the generation through the session's cancel
/// mode; the reply still runs to its end before this returns.
pub async fn stream_reply<E, W>(
    session: &Arc<Session<E>>,
    request: GenerationRequest,
    out: &mut W,
) -> anyhow::Result<Reply>
where
    E: Engine + 'static,
    W: Write,
{
    let (sink, mut rx) = ChannelSink::unbounded();
    session.set_token_sink(Some(sink));

    let mut worker = {
        let session = Arc::clone(session);
        tokio::task::spawn_blocking(move || session.generate_streaming(&request))
    };

    let mut text = String::new();
    let mut interrupted = false;
    let joined = loop {
        tokio::select! {
            biased;

            Some(fragment) = rx.recv() => {
                write!(out, "{fragment}")?;
                out.flush()?;
                text.push_str(&fragment);
            }
            joined = &mut worker => break joined,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                interrupted = true;
                debug!("Interrupt received");
                session.cancel();
            }
        }
    };

    session.set_token_sink(None);
    while let Ok(fragment) = rx.try_recv() {
        write!(out, "{fragment}")?;
        text.push_str(&fragment);
    }
    out.flush()?;

    Ok(Reply {
        text,
        summary: joined?,
        interrupted,
    })
}

/// Print the per-reply summary line on stderr.
pub fn print_summary(summary: &GenerationSummary) {
    eprintln!(
        "  [{} | prompt: {} tok, gen: {} tok]",
        summary.finish_reason, summary.prompt_tokens, summary.completion_tokens
    );
}

#[cfg(test)]
mod tests {
    use lina_core::testing::{Script, ScriptedEngine};
    use lina_core::CancelMode;

    use super::*;

    async fn loaded(script: Script) -> Arc<Session<ScriptedEngine>> {
        let session = Arc::new(Session::new(
            ScriptedEngine::new(script),
            CancelMode::StopRequest,
        ));
        let settings = test_settings();
        load(&session, &settings).await.unwrap();
        assert_eq!(session.context_length(), 256);
        session
    }

    fn test_settings() -> Settings {
        let model = crate::cli::ModelArgs {
            model: Some("models/scripted.gguf".into()),
            ctx_size: Some(256),
            ..Default::default()
        };
        Settings::resolve(
            &model,
            &crate::cli::SamplingArgs::default(),
            None,
            &crate::config::AppConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reply_is_streamed_in_order() {
        let session = loaded(Script::words(&["Hel", "lo", "!"])).await;
        let mut out = Vec::new();

        let reply = stream_reply(&session, GenerationRequest::new("hi"), &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hello!");
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.summary.finish_reason, FinishReason::Stop);
        assert_eq!(reply.summary.completion_tokens, 3);
        assert!(!reply.interrupted);
        assert!(!reply.failed());
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_failure_arrives_as_error_fragment() {
        let session = Arc::new(Session::new(
            ScriptedEngine::new(Script::words(&["a"])),
            CancelMode::StopRequest,
        ));
        let mut out = Vec::new();

        let reply = stream_reply(&session, GenerationRequest::new("hi"), &mut out)
            .await
            .unwrap();

        assert!(reply.failed());
        assert_eq!(reply.text, "Error: No model loaded");
    }

    #[tokio::test]
    async fn test_max_tokens_and_stop_words_reach_the_session() {
        let session = loaded(Script::words(&["a", "b", "c"]).cycle()).await;

        let mut out = Vec::new();
        let request = GenerationRequest::new("x").max_tokens(4);
        let reply = stream_reply(&session, request, &mut out).await.unwrap();
        assert_eq!(reply.summary.finish_reason, FinishReason::Length);
        assert_eq!(reply.summary.completion_tokens, 4);

        let mut out = Vec::new();
        let request = GenerationRequest::new("x").max_tokens(64).stop_on("c");
        let reply = stream_reply(&session, request, &mut out).await.unwrap();
        assert_eq!(
            reply.summary.finish_reason,
            FinishReason::StopWord("c".into())
        );
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let session = Arc::new(Session::new(
            ScriptedEngine::new(Script::words(&["a"]).fail_load()),
            CancelMode::StopRequest,
        ));
        let err = load(&session, &test_settings()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to load model"));
        assert!(!session.is_loaded());
    }
}
