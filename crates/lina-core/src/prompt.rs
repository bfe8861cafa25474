//! Plain-text chat transcripts and cleanup of raw model output.

use serde::{Deserialize, Serialize};

/// Who wrote a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::User => "User:",
            Self::Assistant => "Assistant:",
        }
    }
}

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Markers some models print at the end of a turn instead of sampling EOG.
const END_MARKERS: &[&str] = &[
    "<|im_end|>",
    "<|eot_id|>",
    "</s>",
    "<|endoftext|>",
    "<|end|>",
    "[end of text]",
];

/// Render `history` and the new `prompt` as a `User:`/`Assistant:`
/// transcript that ends with an open assistant turn.
pub fn format_transcript(system: Option<&str>, history: &[ChatMessage], prompt: &str) -> String {
    let mut out = String::new();
    if let Some(system) = system.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str(system);
        out.push_str("\n\n");
    }
    for message in history {
        out.push_str(message.role.label());
        out.push(' ');
        out.push_str(&message.content);
        out.push_str("\n\n");
    }
    out.push_str("User: ");
    out.push_str(prompt);
    out.push_str("\n\nAssistant:");
    out
}

/// Strip end-of-turn markers and stray role labels from a raw reply.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.to_string();

    // A reply that echoes the user turn starts over after the assistant label.
    if text.starts_with("User:") {
        if let Some(pos) = text.find("\n\nAssistant:") {
            text.drain(..pos + "\n\nAssistant:".len());
        }
    }

    for marker in END_MARKERS {
        text = text.replace(marker, "");
    }

    let mut text = text.trim();
    for label in ["User:", "Assistant:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }
    // The model started the next turn on its own.
    loop {
        let before = text.len();
        for label in ["User:", "Assistant:"] {
            if let Some(rest) = text.strip_suffix(label) {
                text = rest.trim_end();
            }
        }
        if text.len() == before {
            break;
        }
    }

    collapse_blank_lines(text.trim())
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_without_history() {
        assert_eq!(
            format_transcript(None, &[], "Hi"),
            "User: Hi\n\nAssistant:"
        );
    }

    #[test]
    fn test_transcript_with_system_and_history() {
        let history = [ChatMessage::user("Hello"), ChatMessage::assistant("Hey!")];
        let out = format_transcript(Some("Be brief."), &history, "Bye");
        assert_eq!(
            out,
            "Be brief.\n\nUser: Hello\n\nAssistant: Hey!\n\nUser: Bye\n\nAssistant:"
        );
    }

    #[test]
    fn test_blank_system_is_skipped() {
        assert_eq!(
            format_transcript(Some("  "), &[], "x"),
            "User: x\n\nAssistant:"
        );
    }

    #[test]
    fn test_clean_strips_markers_and_labels() {
        assert_eq!(clean_response(" Assistant: Paris.<|im_end|>"), "Paris.");
        assert_eq!(clean_response("Sure</s>\nUser:"), "Sure");
        assert_eq!(clean_response("ok [end of text]"), "ok");
    }

    #[test]
    fn test_clean_drops_echoed_user_turn() {
        assert_eq!(
            clean_response("User: what?\n\nAssistant: this."),
            "this."
        );
    }

    #[test]
    fn test_clean_collapses_blank_lines() {
        assert_eq!(clean_response("a\n\n\n\nb\n\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn test_clean_keeps_plain_text() {
        assert_eq!(clean_response("fn main() {}\n\nDone."), "fn main() {}\n\nDone.");
    }
}
