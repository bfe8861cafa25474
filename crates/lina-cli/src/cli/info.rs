use crate::cli::settings::Settings;
use crate::cli::{InfoArgs, SamplingArgs, stream};
use crate::config::AppConfig;

pub async fn execute(args: InfoArgs) -> anyhow::Result<()> {
    let cfg = AppConfig::load_or_default()?;
    let settings = Settings::resolve(&args.model, &SamplingArgs::default(), None, &cfg)?;
    let session = stream::open(&settings).await?;

    let Some(info) = session.model_info() else {
        anyhow::bail!("model unloaded before its metadata could be read");
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let name = if info.name.is_empty() { "-" } else { info.name.as_str() };
    println!("{:<16} {}", "PATH", info.path.display());
    println!("{:<16} {}", "NAME", name);
    println!("{:<16} {}", "VOCAB", info.vocab_size);
    println!("{:<16} {}", "CONTEXT", info.context_length);
    Ok(())
}
