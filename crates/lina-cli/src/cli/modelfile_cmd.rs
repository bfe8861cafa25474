use std::path::Path;

use lina_core::{Modelfile, SamplingParams};

use crate::cli::settings::read_modelfile;
use crate::cli::{ModelfileAction, ModelfileArgs};

pub async fn execute(args: ModelfileArgs) -> anyhow::Result<()> {
    match args.action {
        ModelfileAction::Show { path } => show(&open(path.as_deref())?),
        ModelfileAction::Render { path } => print!("{}", open(path.as_deref())?.render()),
    }
    Ok(())
}

/// The file at `path`, or the built-in ChatML preset.
fn open(path: Option<&Path>) -> anyhow::Result<Modelfile> {
    path.map_or_else(|| Ok(Modelfile::default()), read_modelfile)
}

fn show(mf: &Modelfile) {
    let mut sampling = SamplingParams::default();
    mf.apply_to(&mut sampling);
    let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };

    println!("{:<16} {}", "FROM", or_dash(&mf.from));
    println!("{:<16} {}", "SYSTEM", or_dash(&mf.system));
    println!(
        "{:<16} {}",
        "CONTEXT",
        mf.num_ctx().map_or("-".to_string(), |n| n.to_string())
    );
    println!(
        "{:<16} {}",
        "MAX TOKENS",
        mf.num_predict().map_or("-".to_string(), |n| n.to_string())
    );
    println!(
        "{:<16} temp={} top_p={} top_k={} repeat_penalty={}",
        "SAMPLING", sampling.temperature, sampling.top_p, sampling.top_k, sampling.repeat_penalty
    );
    println!("{:<16} {:?}", "STOP", mf.stop());
    if mf.template.is_empty() {
        println!("{:<16} -", "TEMPLATE");
    } else {
        println!("TEMPLATE\n{}", mf.template);
    }
}
