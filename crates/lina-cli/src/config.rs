//! Application configuration, persisted as JSON.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use lina_core::{CancelMode, LoadParams, SamplingParams};
use serde::{Deserialize, Serialize};

/// Overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "LINA_CONFIG_DIR";

const CONFIG_FILE: &str = "config.json";

/// Global configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default context size (0 = model default).
    #[serde(default = "default_ctx_size")]
    pub default_ctx_size: u32,
    /// Decode threads (unset = all cores).
    #[serde(default)]
    pub default_threads: Option<i32>,
    #[serde(default = "default_gpu_layers")]
    pub default_n_gpu_layers: i32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default = "default_cancel_mode")]
    pub cancel_mode: CancelMode,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_ctx_size() -> u32 {
    4096
}
fn default_gpu_layers() -> i32 {
    99
}
fn default_max_tokens() -> u32 {
    lina_core::params::DEFAULT_MAX_TOKENS
}
fn default_cancel_mode() -> CancelMode {
    CancelMode::StopRequest
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_ctx_size: default_ctx_size(),
            default_threads: None,
            default_n_gpu_layers: default_gpu_layers(),
            default_max_tokens: default_max_tokens(),
            sampling: SamplingParams::default(),
            cancel_mode: default_cancel_mode(),
            system_prompt: None,
        }
    }
}

impl AppConfig {
    /// `$LINA_CONFIG_DIR`, else the platform config directory:
    /// `~/.config/lina/`
    pub fn config_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lina")
    }

    pub fn config_file() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    pub fn load_or_default() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_dir())
    }

    /// Load from `dir`, or return defaults if the file doesn't exist.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_dir())
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), data)?;
        Ok(())
    }

    /// Update one value by its `config set` key.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "default_ctx_size" | "ctx_size" => self.default_ctx_size = value.parse()?,
            "default_threads" | "threads" => {
                self.default_threads = match value {
                    "" | "auto" => None,
                    n => Some(n.parse()?),
                }
            }
            "default_n_gpu_layers" | "n_gpu_layers" => self.default_n_gpu_layers = value.parse()?,
            "default_max_tokens" | "max_tokens" => self.default_max_tokens = value.parse()?,
            "temperature" | "temp" => self.sampling.temperature = value.parse()?,
            "top_p" => self.sampling.top_p = value.parse()?,
            "top_k" => self.sampling.top_k = value.parse()?,
            "repeat_penalty" => self.sampling.repeat_penalty = value.parse()?,
            "cancel_mode" => self.cancel_mode = value.parse().map_err(anyhow::Error::msg)?,
            "system_prompt" => {
                self.system_prompt = Some(value.to_string()).filter(|s| !s.is_empty())
            }
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            context_size: self.default_ctx_size,
            threads: self.default_threads.unwrap_or(0),
            gpu_layers: self.default_n_gpu_layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lina-config-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.default_ctx_size, 4096);
        assert_eq!(cfg.default_n_gpu_layers, 99);
        assert_eq!(cfg.default_max_tokens, 2048);
        assert_eq!(cfg.cancel_mode, CancelMode::StopRequest);
        assert_eq!(cfg.sampling.temperature, 0.8);
        assert_eq!(cfg.load_params().threads, 0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"default_ctx_size": 8192, "cancel_mode": "clear_flag"}"#)
                .unwrap();
        assert_eq!(cfg.default_ctx_size, 8192);
        assert_eq!(cfg.cancel_mode, CancelMode::ClearFlag);
        assert_eq!(cfg.default_max_tokens, 2048);
        assert_eq!(cfg.sampling.top_k, 40);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = scratch_dir("missing");
        assert_eq!(AppConfig::load_from(&dir).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = scratch_dir("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.set("threads", "6").unwrap();
        cfg.set("system_prompt", "Be brief.").unwrap();
        cfg.save_to(&dir).unwrap();

        let loaded = AppConfig::load_from(&dir).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.load_params().threads, 6);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_set_values() {
        let mut cfg = AppConfig::default();
        cfg.set("ctx_size", "0").unwrap();
        cfg.set("temperature", "0.2").unwrap();
        cfg.set("cancel_mode", "clear_flag").unwrap();
        cfg.set("threads", "auto").unwrap();
        assert_eq!(cfg.default_ctx_size, 0);
        assert_eq!(cfg.sampling.temperature, 0.2);
        assert_eq!(cfg.cancel_mode, CancelMode::ClearFlag);
        assert_eq!(cfg.default_threads, None);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut cfg = AppConfig::default();
        assert!(cfg.set("port", "8080").is_err());
        assert!(cfg.set("top_k", "many").is_err());
        assert!(cfg.set("cancel_mode", "abort").is_err());
        assert_eq!(cfg, AppConfig::default());
    }
}
