use std::io;

use crate::cli::GenerateArgs;
use crate::cli::settings::Settings;
use crate::cli::stream;
use crate::config::AppConfig;

pub async fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let cfg = AppConfig::load_or_default()?;
    let settings = Settings::resolve(&args.model, &args.sampling, args.system.as_deref(), &cfg)?;
    let prompt = if args.raw {
        args.prompt
    } else {
        settings.chat_prompt(&[], &args.prompt)
    };

    let session = stream::open(&settings).await?;
    let reply = stream::stream_reply(&session, settings.request(prompt), &mut io::stdout()).await?;
    println!();
    stream::print_summary(&reply.summary);

    if reply.failed() {
        anyhow::bail!("generation failed");
    }
    Ok(())
}
