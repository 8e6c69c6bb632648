//! `livepatch config` — show the configuration the loop would use.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use livepatch_core::config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print only the path the config was loaded from.
    #[arg(long)]
    pub path: bool,
}

impl ConfigArgs {
    pub fn run(self, explicit: Option<&Path>) -> Result<()> {
        let (config, origin) =
            config::discover(explicit).context("failed to load livepatch config")?;
        if self.path {
            println!("{}", origin.display());
            return Ok(());
        }

        println!("# loaded from {}", origin.display());
        print!("{}", config.to_yaml().context("failed to render config")?);
        Ok(())
    }
}
