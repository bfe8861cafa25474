mod cli;
mod config;
mod engine;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    //  Logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lina=debug,lina_core=debug"));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if args.global.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match args.command {
        cli::Commands::Run(run_args) => cli::run::execute(run_args).await,
        cli::Commands::Generate(g) => cli::generate::execute(g).await,
        cli::Commands::Info(i) => cli::info::execute(i).await,
        cli::Commands::Config(c) => cli::config_cmd::execute(c).await,
        cli::Commands::Modelfile(m) => cli::modelfile_cmd::execute(m).await,
    }
}
