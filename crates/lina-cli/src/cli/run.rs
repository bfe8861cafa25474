use std::io::{self, BufRead, Write};
use std::sync::Arc;

use lina_core::prompt::clean_response;
use lina_core::{ChatMessage, Engine, Session};
use tracing::warn;

use crate::cli::RunArgs;
use crate::cli::settings::Settings;
use crate::cli::stream::{self, Reply};
use crate::config::AppConfig;

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let cfg = AppConfig::load_or_default()?;
    let settings = Settings::resolve(&args.model, &args.sampling, args.system.as_deref(), &cfg)?;
    let session = stream::open(&settings).await?;
    let mut chat = Chat::new(session, settings);

    println!("Model loaded. Type your message (Ctrl-D to quit).\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = chat.turn(line, &mut stdout).await?;
        println!();
        stream::print_summary(&reply.summary);
        if reply.interrupted {
            eprintln!("  (interrupted)");
        }
        println!();
    }

    Ok(())
}

/// A conversation over one loaded session.
///
/// Each turn sends the whole conversation as a fresh prompt, so the
/// context cache is cleared first.
pub struct Chat<E: Engine> {
    session: Arc<Session<E>>,
    settings: Settings,
    history: Vec<ChatMessage>,
}

impl<E: Engine + 'static> Chat<E> {
    pub fn new(session: Arc<Session<E>>, settings: Settings) -> Self {
        Self {
            session,
            settings,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Stream the reply to `line` into `out`. Failed replies are left out
    /// of the history.
    pub async fn turn<W: Write>(&mut self, line: &str, out: &mut W) -> anyhow::Result<Reply> {
        self.session.clear_context();
        let prompt = self.settings.chat_prompt(&self.history, line);
        let reply = stream::stream_reply(&self.session, self.settings.request(prompt), out).await?;

        if reply.failed() {
            warn!("Reply failed; it is left out of the conversation");
        } else {
            self.history.push(ChatMessage::user(line));
            self.history.push(ChatMessage::assistant(clean_response(&reply.text)));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use lina_core::testing::{Script, ScriptedEngine};
    use lina_core::{CancelMode, FinishReason};

    use super::*;
    use crate::cli::{ModelArgs, SamplingArgs};

    async fn chat(script: Script, ctx_size: u32) -> Chat<ScriptedEngine> {
        let model = ModelArgs {
            model: Some("models/scripted.gguf".into()),
            ctx_size: Some(ctx_size),
            ..ModelArgs::default()
        };
        let sampling = SamplingArgs {
            max_tokens: Some(1),
            ..SamplingArgs::default()
        };
        let settings = Settings::resolve(&model, &sampling, None, &AppConfig::default()).unwrap();
        let session = Arc::new(Session::new(ScriptedEngine::new(script), CancelMode::StopRequest));
        stream::load(&session, &settings).await.unwrap();
        Chat::new(session, settings)
    }

    #[tokio::test]
    async fn test_turns_start_from_an_empty_context() {
        // The third transcript is 12 tokens; the three prompts together
        // would not fit in 16.
        let mut chat = chat(Script::words(&["ok"]).cycle(), 16).await;

        for line in ["a", "b", "c"] {
            let mut out = Vec::new();
            let reply = chat.turn(line, &mut out).await.unwrap();
            assert_eq!(reply.summary.finish_reason, FinishReason::Length);
            assert_eq!(reply.text, "ok");
        }
        assert_eq!(chat.session.cached_tokens(), 13);
        assert_eq!(
            chat.history(),
            [
                ChatMessage::user("a"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("b"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("c"),
                ChatMessage::assistant("ok"),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_remembered() {
        let mut chat = chat(Script::words(&["ok"]).cycle(), 2).await;

        let mut out = Vec::new();
        let reply = chat.turn("hello there", &mut out).await.unwrap();

        assert!(reply.failed());
        assert!(reply.text.starts_with("Error: Failed to process prompt"));
        assert!(chat.history().is_empty());
    }
}
