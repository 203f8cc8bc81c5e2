//! Check-config command - print the resolved configuration.

use anyhow::Result;
use clap::Args;
use warden_config::WardenConfig;

use super::Context;

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Only validate, print nothing on success
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the check-config command.
pub fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let (config, sources) = ctx.load_config()?;

    if args.quiet {
        return Ok(());
    }

    if sources.is_empty() {
        println!("# No config files found, using defaults");
    } else {
        for source in &sources {
            println!("# Loaded from {source}");
        }
    }

    let resolved = WardenConfig {
        session: Some(config.session()),
        identity: config.identity.clone(),
        auth: Some(config.auth()),
        server: Some(config.server()),
        logging: Some(config.logging()),
    };
    print!("{}", resolved.to_toml()?);

    Ok(())
}
