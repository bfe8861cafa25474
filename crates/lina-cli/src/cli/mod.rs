pub mod config_cmd;
pub mod generate;
pub mod info;
pub mod modelfile_cmd;
pub mod run;
pub mod settings;
pub mod stream;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lina_core::CancelMode;

#[derive(Parser)]
#[command(name = "lina", version, about = "Chat with a local GGUF model")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GlobalArgs {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, env = "LINA_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a model and start an interactive chat.
    Run(RunArgs),

    /// Generate a single reply and exit.
    Generate(GenerateArgs),

    /// Load a model and print its metadata.
    Info(InfoArgs),

    /// View / edit configuration.
    Config(ConfigArgs),

    /// Inspect Modelfiles.
    Modelfile(ModelfileArgs),
}

//  Shared argument groups

#[derive(Debug, clap::Args, Clone, Default)]
pub struct ModelArgs {
    /// Path to a GGUF model file (may be omitted when --modelfile has FROM).
    pub model: Option<PathBuf>,

    /// Modelfile supplying the model, system prompt, template and parameters.
    #[arg(long, short = 'f', env = "LINA_MODELFILE")]
    pub modelfile: Option<PathBuf>,

    /// Context size (0 = model default).
    #[arg(long, env = "LINA_CTX_SIZE")]
    pub ctx_size: Option<u32>,

    /// Decode threads (0 = all cores).
    #[arg(long, env = "LINA_THREADS")]
    pub threads: Option<i32>,

    /// GPU layers (0 = CPU only).
    #[arg(long, env = "LINA_N_GPU_LAYERS", allow_negative_numbers = true)]
    pub n_gpu_layers: Option<i32>,

    /// What Ctrl-C does to a running reply: stop_request or clear_flag.
    #[arg(long, env = "LINA_CANCEL_MODE")]
    pub cancel_mode: Option<CancelMode>,
}

#[derive(Debug, clap::Args, Clone, Default)]
pub struct SamplingArgs {
    /// Maximum tokens per reply.
    #[arg(long, short = 'n', env = "LINA_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// Temperature.
    #[arg(long)]
    pub temp: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<i32>,

    #[arg(long)]
    pub repeat_penalty: Option<f32>,

    /// Stop when the reply ends with this text (can be repeated).
    #[arg(long)]
    pub stop: Vec<String>,
}

//  Subcommand argument structs

#[derive(Debug, clap::Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// System prompt.
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Prompt text.
    #[arg(long, short = 'p')]
    pub prompt: String,

    /// System prompt.
    #[arg(long)]
    pub system: Option<String>,

    /// Send the prompt as-is, without a template or transcript framing.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Debug, clap::Args, Clone)]
pub struct InfoArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display the current configuration.
    Show,
    /// Set a configuration value.
    Set { key: String, value: String },
    /// Print the configuration file location.
    Path,
}

#[derive(Debug, clap::Args)]
pub struct ModelfileArgs {
    #[command(subcommand)]
    pub action: ModelfileAction,
}

#[derive(Debug, Subcommand)]
pub enum ModelfileAction {
    /// Summarize a Modelfile (the built-in ChatML preset when no path).
    Show { path: Option<PathBuf> },
    /// Print a Modelfile in canonical form.
    Render { path: Option<PathBuf> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "lina",
            "generate",
            "model.gguf",
            "-p",
            "Hi",
            "--n-gpu-layers",
            "-1",
            "--stop",
            "###",
            "--stop",
            "END",
            "--cancel-mode",
            "clear_flag",
        ])
        .unwrap();
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.model.model, Some(PathBuf::from("model.gguf")));
        assert_eq!(args.prompt, "Hi");
        assert_eq!(args.model.n_gpu_layers, Some(-1));
        assert_eq!(args.sampling.stop, ["###", "END"]);
        assert_eq!(args.model.cancel_mode, Some(CancelMode::ClearFlag));
    }

    #[test]
    fn test_bad_cancel_mode_is_rejected() {
        assert!(Cli::try_parse_from(["lina", "run", "m.gguf", "--cancel-mode", "abort"]).is_err());
    }
}
