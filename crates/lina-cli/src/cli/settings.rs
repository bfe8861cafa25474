//! Merge configuration, Modelfile and flags into one set of settings.
//!
//! Precedence, lowest first: config file, Modelfile, command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use lina_core::prompt::{self, ChatMessage};
use lina_core::{CancelMode, GenerationRequest, LoadParams, Modelfile, SamplingParams};

use crate::cli::{ModelArgs, SamplingArgs};
use crate::config::AppConfig;

/// Ends a reply in transcript mode once the model starts the next user turn.
const TRANSCRIPT_STOP: &str = "\nUser:";

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: PathBuf,
    pub load: LoadParams,
    pub cancel_mode: CancelMode,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub sampling: SamplingParams,
    pub stop: Vec<String>,
    /// Template source; `None` means the plain `User:`/`Assistant:`
    /// transcript.
    modelfile: Option<Modelfile>,
}

pub fn read_modelfile(path: &Path) -> anyhow::Result<Modelfile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading Modelfile {}", path.display()))?;
    Modelfile::parse(&text).with_context(|| format!("parsing Modelfile {}", path.display()))
}

impl Settings {
    pub fn resolve(
        model: &ModelArgs,
        sampling: &SamplingArgs,
        system: Option<&str>,
        cfg: &AppConfig,
    ) -> anyhow::Result<Self> {
        let modelfile = model.modelfile.as_deref().map(read_modelfile).transpose()?;
        let base_dir = model
            .modelfile
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(Path::new(""));
        Self::merge(model, sampling, system, cfg, modelfile, base_dir)
    }

    fn merge(
        model: &ModelArgs,
        sampling: &SamplingArgs,
        system: Option<&str>,
        cfg: &AppConfig,
        mut modelfile: Option<Modelfile>,
        base_dir: &Path,
    ) -> anyhow::Result<Self> {
        let mf = modelfile.as_ref();

        let Some(path) = model
            .model
            .clone()
            .or_else(|| mf.map(|m| base_dir.join(&m.from)))
        else {
            anyhow::bail!("no model given: pass a GGUF path or a --modelfile with FROM");
        };

        let mut load = cfg.load_params();
        if let Some(n) = mf.and_then(Modelfile::num_ctx) {
            load.context_size = n;
        }
        if let Some(n) = model.ctx_size {
            load.context_size = n;
        }
        if let Some(n) = model.threads {
            load.threads = n;
        }
        if let Some(n) = model.n_gpu_layers {
            load.gpu_layers = n;
        }

        let mut params = cfg.sampling.clone();
        if let Some(mf) = mf {
            mf.apply_to(&mut params);
        }
        if let Some(v) = sampling.temp {
            params.temperature = v;
        }
        if let Some(v) = sampling.top_p {
            params.top_p = v;
        }
        if let Some(v) = sampling.top_k {
            params.top_k = v;
        }
        if let Some(v) = sampling.repeat_penalty {
            params.repeat_penalty = v;
        }

        let max_tokens = sampling
            .max_tokens
            .or_else(|| mf.and_then(Modelfile::num_predict))
            .unwrap_or(cfg.default_max_tokens);

        let system = system
            .map(str::to_string)
            .or_else(|| mf.map(|m| m.system.clone()).filter(|s| !s.is_empty()))
            .or_else(|| cfg.system_prompt.clone());

        let mut stop: Vec<String> = mf.map(|m| m.stop().to_vec()).unwrap_or_default();
        stop.extend(sampling.stop.iter().cloned());

        // Only a Modelfile with a template changes the prompt format.
        if modelfile.as_ref().is_some_and(|m| m.template.is_empty()) {
            modelfile = None;
        }
        if let Some(mf) = modelfile.as_mut() {
            mf.system = system.clone().unwrap_or_default();
        } else {
            stop.push(TRANSCRIPT_STOP.to_string());
        }

        Ok(Self {
            model: path,
            load,
            cancel_mode: model.cancel_mode.unwrap_or(cfg.cancel_mode),
            system,
            max_tokens,
            sampling: params,
            stop,
            modelfile,
        })
    }

    /// The prompt for `line` after `history`. Templates only see the
    /// current turn.
    pub fn chat_prompt(&self, history: &[ChatMessage], line: &str) -> String {
        match &self.modelfile {
            Some(mf) => mf.format_prompt(line),
            None => prompt::format_transcript(self.system.as_deref(), history, line),
        }
    }

    pub fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            prompt,
            max_tokens: self.max_tokens,
            sampling: self.sampling.clone(),
            stop: self.stop.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(model: &str) -> ModelArgs {
        ModelArgs {
            model: Some(PathBuf::from(model)),
            ..ModelArgs::default()
        }
    }

    #[test]
    fn test_config_defaults_apply() {
        let cfg = AppConfig::default();
        let s = Settings::merge(&args("m.gguf"), &SamplingArgs::default(), None, &cfg, None, Path::new(""))
            .unwrap();
        assert_eq!(s.model, PathBuf::from("m.gguf"));
        assert_eq!(s.load.context_size, 4096);
        assert_eq!(s.load.gpu_layers, 99);
        assert_eq!(s.max_tokens, 2048);
        assert_eq!(s.cancel_mode, CancelMode::StopRequest);
        assert_eq!(s.stop, ["\nUser:"]);
        assert_eq!(s.chat_prompt(&[], "Hi"), "User: Hi\n\nAssistant:");
    }

    #[test]
    fn test_flags_beat_modelfile_beats_config() {
        let mut cfg = AppConfig::default();
        cfg.sampling.top_k = 10;
        cfg.system_prompt = Some("from config".into());

        let mut mf = Modelfile::new("tiny.gguf");
        mf.set_parameter("num_ctx", "1024");
        mf.set_parameter("temperature", "0.3");
        mf.set_parameter("stop", "###");
        mf.system = "from modelfile".into();
        mf.template = "[{{ .System }}] {{ .Prompt }} =>".into();

        let model = ModelArgs {
            ctx_size: Some(512),
            ..ModelArgs::default()
        };
        let sampling = SamplingArgs {
            temp: Some(0.9),
            stop: vec!["END".into()],
            ..SamplingArgs::default()
        };
        let s = Settings::merge(&model, &sampling, None, &cfg, Some(mf), Path::new("models")).unwrap();

        assert_eq!(s.model, PathBuf::from("models/tiny.gguf"));
        assert_eq!(s.load.context_size, 512);
        assert_eq!(s.sampling.temperature, 0.9);
        assert_eq!(s.sampling.top_k, 10);
        assert_eq!(s.system.as_deref(), Some("from modelfile"));
        assert_eq!(s.stop, ["###", "END"]);
        assert_eq!(s.chat_prompt(&[], "Hi"), "[from modelfile] Hi =>");

        let request = s.request("p".into());
        assert_eq!(request.max_tokens, 2048);
        assert_eq!(request.stop, ["###", "END"]);
    }

    #[test]
    fn test_system_flag_overrides_template_system() {
        let mut mf = Modelfile::new("m.gguf");
        mf.system = "old".into();
        mf.template = "{{ .System }}|{{ .Prompt }}".into();
        let s = Settings::merge(
            &ModelArgs::default(),
            &SamplingArgs::default(),
            Some("new"),
            &AppConfig::default(),
            Some(mf),
            Path::new(""),
        )
        .unwrap();
        assert_eq!(s.chat_prompt(&[], "q"), "new|q");
    }

    #[test]
    fn test_transcript_includes_history() {
        let mut cfg = AppConfig::default();
        cfg.system_prompt = Some("Be brief.".into());
        let s = Settings::merge(&args("m.gguf"), &SamplingArgs::default(), None, &cfg, None, Path::new(""))
            .unwrap();
        let history = [ChatMessage::user("a"), ChatMessage::assistant("b")];
        assert_eq!(
            s.chat_prompt(&history, "c"),
            "Be brief.\n\nUser: a\n\nAssistant: b\n\nUser: c\n\nAssistant:"
        );
    }

    #[test]
    fn test_missing_model_is_an_error() {
        let err = Settings::merge(
            &ModelArgs::default(),
            &SamplingArgs::default(),
            None,
            &AppConfig::default(),
            None,
            Path::new(""),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no model given"));
    }
}
