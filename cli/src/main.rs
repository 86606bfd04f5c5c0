mod cli;
mod scenario;

use clap::Parser;

use cli::{Opt, Subcommand};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::parse();

    match opt.subcommand {
        Some(Subcommand::Run { scenario }) => scenario::run(scenario::load(&scenario)?),
        Some(Subcommand::Validate { scenario }) => {
            let file = scenario::load(&scenario)?;
            file.config
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid tenant config: {e}"))?;
            println!("scenario ok: {} actions", file.actions.len());
            Ok(())
        }
        None => match opt.scenario {
            Some(path) => scenario::run(scenario::load(&path)?),
            None => {
                eprintln!("usage: swaps-cli run <scenario.json>");
                Ok(())
            }
        },
    }
}
