//! Modelfile: a model path plus its system prompt, prompt template and
//! generation parameters, in the `FROM` / `SYSTEM` / `TEMPLATE` /
//! `PARAMETER` text format.
//!
//! ```text
//! FROM ./models/qwen2.5-0.5b-instruct-q4_k_m.gguf
//! SYSTEM """You are terse."""
//! PARAMETER temperature 0.7
//! PARAMETER stop "<|im_end|>"
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::params::{GenerationRequest, SamplingParams};
use crate::prompt;

const BLOCK_QUOTE: &str = "\"\"\"";
const SYSTEM_SLOT: &str = "{{ .System }}";
const PROMPT_SLOT: &str = "{{ .Prompt }}";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelfileError {
    #[error("Modelfile has no FROM line")]
    MissingFrom,

    #[error("line {line}: {directive} block is never closed with \"\"\"")]
    UnterminatedBlock { directive: &'static str, line: usize },

    #[error("line {line}: PARAMETER needs a key and a value")]
    InvalidParameter { line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modelfile {
    /// Path of the GGUF file, as written.
    pub from: String,
    pub system: String,
    pub template: String,
    parameters: BTreeMap<String, String>,
    stop: Vec<String>,
}

impl Default for Modelfile {
    /// ChatML preset with no model path.
    fn default() -> Self {
        let parameters = [
            ("num_ctx", "2048"),
            ("num_predict", "256"),
            ("repeat_penalty", "1.1"),
            ("temperature", "0.7"),
            ("top_k", "40"),
            ("top_p", "0.9"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            from: String::new(),
            system: "You are a helpful AI assistant.".into(),
            template: "<|im_start|>system\n{{ .System }}<|im_end|>\n<|im_start|>user\n{{ .Prompt }}<|im_end|>\n<|im_start|>assistant".into(),
            parameters,
            stop: vec!["<|im_end|>".into(), "<|im_start|>".into()],
        }
    }
}

impl Modelfile {
    /// An empty modelfile pointing at `from`.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            system: String::new(),
            template: String::new(),
            parameters: BTreeMap::new(),
            stop: Vec::new(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ModelfileError> {
        let mut file = Self::new("");
        let mut lines = content.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();

            match directive.to_ascii_uppercase().as_str() {
                "FROM" => file.from = rest.to_string(),
                "SYSTEM" => file.system = read_value("SYSTEM", index, rest, &mut lines)?,
                "TEMPLATE" => file.template = read_value("TEMPLATE", index, rest, &mut lines)?,
                "PARAMETER" => {
                    let Some((key, value)) = rest.split_once(char::is_whitespace) else {
                        return Err(ModelfileError::InvalidParameter { line: index + 1 });
                    };
                    file.set_parameter(key, unquote(value.trim()));
                }
                other => warn!(line = index + 1, directive = other, "Ignoring unknown Modelfile directive"),
            }
        }

        if file.from.is_empty() {
            return Err(ModelfileError::MissingFrom);
        }
        Ok(file)
    }

    /// Canonical text form: parameters sorted by key, one line per stop
    /// sequence.
    pub fn render(&self) -> String {
        let mut out = format!("FROM {}\n", self.from);
        if !self.system.is_empty() {
            let _ = write!(out, "\nSYSTEM {BLOCK_QUOTE}{}{BLOCK_QUOTE}\n", self.system);
        }
        if !self.template.is_empty() {
            let _ = write!(
                out,
                "\nTEMPLATE {BLOCK_QUOTE}\n{}\n{BLOCK_QUOTE}\n",
                self.template.trim_end_matches('\n')
            );
        }

        let mut lines: Vec<(&str, String)> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.as_str(), format!("PARAMETER {k} {v}")))
            .chain(
                self.stop
                    .iter()
                    .map(|s| ("stop", format!("PARAMETER stop \"{s}\""))),
            )
            .collect();
        lines.sort_by(|a, b| a.0.cmp(b.0));
        if !lines.is_empty() {
            out.push('\n');
        }
        for (_, line) in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        if key == "stop" {
            return self.stop.first().map(String::as_str);
        }
        self.parameters.get(key).map(String::as_str)
    }

    /// Set a parameter; `stop` values accumulate instead of replacing.
    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if key == "stop" {
            self.stop.push(value);
        } else {
            self.parameters.insert(key.to_string(), value);
        }
    }

    fn typed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.parameters.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring malformed Modelfile parameter");
                None
            }
        }
    }

    /// Context window requested by the file.
    pub fn num_ctx(&self) -> Option<u32> {
        self.typed("num_ctx")
    }

    /// Maximum tokens per reply.
    pub fn num_predict(&self) -> Option<u32> {
        self.typed("num_predict")
    }

    pub fn stop(&self) -> &[String] {
        &self.stop
    }

    /// Overwrite the sampling knobs the file sets; the rest stay as they are.
    pub fn apply_to(&self, sampling: &mut SamplingParams) {
        if let Some(v) = self.typed("temperature") {
            sampling.temperature = v;
        }
        if let Some(v) = self.typed("top_p") {
            sampling.top_p = v;
        }
        if let Some(v) = self.typed("top_k") {
            sampling.top_k = v;
        }
        if let Some(v) = self.typed("repeat_penalty") {
            sampling.repeat_penalty = v;
        }
    }

    /// Fill the template with the system prompt and `prompt`. Without a
    /// template the plain transcript format is used.
    pub fn format_prompt(&self, prompt: &str) -> String {
        if self.template.is_empty() {
            return prompt::format_transcript(Some(&self.system), &[], prompt);
        }
        self.template
            .replace(SYSTEM_SLOT, &self.system)
            .replace(PROMPT_SLOT, prompt)
    }

    /// A request for `prompt` carrying this file's template, sampling
    /// parameters, reply length and stop sequences.
    pub fn request(&self, prompt: &str) -> GenerationRequest {
        let mut request = GenerationRequest::new(self.format_prompt(prompt));
        self.apply_to(&mut request.sampling);
        if let Some(n) = self.num_predict() {
            request.max_tokens = n;
        }
        request.stop = self.stop.clone();
        request
    }
}

impl FromStr for Modelfile {
    type Err = ModelfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Read a directive value: either quoted on one line or a `"""` block that
/// may span lines.
fn read_value<'a>(
    directive: &'static str,
    index: usize,
    rest: &str,
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<String, ModelfileError> {
    let Some(opened) = rest.strip_prefix(BLOCK_QUOTE) else {
        return Ok(unquote(rest));
    };
    if let Some(end) = opened.find(BLOCK_QUOTE) {
        return Ok(opened[..end].trim().to_string());
    }

    let mut block = opened.to_string();
    for (_, line) in lines {
        if let Some(end) = line.find(BLOCK_QUOTE) {
            block.push('\n');
            block.push_str(&line[..end]);
            return Ok(block.trim().to_string());
        }
        block.push('\n');
        block.push_str(line);
    }
    Err(ModelfileError::UnterminatedBlock {
        directive,
        line: index + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r####"
# Assistant for code review
FROM ./models/tiny.gguf

SYSTEM """
You review code.
Be direct.
"""

TEMPLATE "### {{ .System }} ### {{ .Prompt }}"

PARAMETER temperature 0.2
PARAMETER num_ctx 8192
PARAMETER stop "###"
PARAMETER stop "</s>"
"####;

    #[test]
    fn test_parse_sample() {
        let file = Modelfile::parse(SAMPLE).unwrap();
        assert_eq!(file.from, "./models/tiny.gguf");
        assert_eq!(file.system, "You review code.\nBe direct.");
        assert_eq!(file.template, "### {{ .System }} ### {{ .Prompt }}");
        assert_eq!(file.num_ctx(), Some(8192));
        assert_eq!(file.num_predict(), None);
        assert_eq!(file.stop(), ["###", "</s>"]);
    }

    #[test]
    fn test_missing_from() {
        let err = Modelfile::parse("SYSTEM hi\n").unwrap_err();
        assert_eq!(err, ModelfileError::MissingFrom);
    }

    #[test]
    fn test_unterminated_block() {
        let err = Modelfile::parse("FROM m.gguf\nSYSTEM \"\"\"open\nstill open\n").unwrap_err();
        assert_eq!(
            err,
            ModelfileError::UnterminatedBlock {
                directive: "SYSTEM",
                line: 2
            }
        );
    }

    #[test]
    fn test_parameter_without_value() {
        let err = Modelfile::parse("FROM m.gguf\nPARAMETER temperature\n").unwrap_err();
        assert_eq!(err, ModelfileError::InvalidParameter { line: 2 });
    }

    #[test]
    fn test_render_is_canonical() {
        let file = Modelfile::parse(SAMPLE).unwrap();
        let rendered = file.render();
        assert_eq!(
            rendered,
            "FROM ./models/tiny.gguf\n\
             \n\
             SYSTEM \"\"\"You review code.\nBe direct.\"\"\"\n\
             \n\
             TEMPLATE \"\"\"\n### {{ .System }} ### {{ .Prompt }}\n\"\"\"\n\
             \n\
             PARAMETER num_ctx 8192\n\
             PARAMETER stop \"###\"\n\
             PARAMETER stop \"</s>\"\n\
             PARAMETER temperature 0.2\n"
        );
        assert_eq!(Modelfile::parse(&rendered).unwrap(), file);
    }

    #[test]
    fn test_default_preset() {
        let file = Modelfile::default();
        assert!(file.from.is_empty());
        assert_eq!(file.num_ctx(), Some(2048));
        assert_eq!(file.num_predict(), Some(256));
        assert_eq!(file.stop(), ["<|im_end|>", "<|im_start|>"]);

        let prompt = file.format_prompt("Hi");
        assert!(prompt.starts_with("<|im_start|>system\nYou are a helpful AI assistant.<|im_end|>"));
        assert!(prompt.contains("<|im_start|>user\nHi<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant"));

        let mut named = file.clone();
        named.from = "m.gguf".into();
        assert_eq!(Modelfile::parse(&named.render()).unwrap(), named);
    }

    #[test]
    fn test_apply_to_overrides_only_set_values() {
        let mut file = Modelfile::new("m.gguf");
        file.set_parameter("temperature", "0.1");
        file.set_parameter("top_k", "not-a-number");

        let mut sampling = SamplingParams::default();
        file.apply_to(&mut sampling);
        assert_eq!(sampling.temperature, 0.1);
        assert_eq!(sampling.top_k, 40);
        assert_eq!(sampling.top_p, 0.9);
    }

    #[test]
    fn test_request_uses_file_settings() {
        let request = Modelfile::default().request("Hi");
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.stop, ["<|im_end|>", "<|im_start|>"]);
        assert_eq!(request.sampling.repeat_penalty, 1.1);
        assert!(request.prompt.contains("Hi"));
    }

    #[test]
    fn test_no_template_falls_back_to_transcript() {
        let mut file = Modelfile::new("m.gguf");
        file.system = "Be brief.".into();
        assert_eq!(
            file.format_prompt("Hi"),
            "Be brief.\n\nUser: Hi\n\nAssistant:"
        );
    }
}
