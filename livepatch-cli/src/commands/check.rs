//! `livepatch check` — verify the provider library before running the loop.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use livepatch_core::config;
use livepatch_provider::{probe, DylibProvider, SymbolStatus};
use livepatch_reloader::init_tracing;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CheckReportJson {
    library: String,
    symbols: Vec<SymbolJson>,
    self_test: Option<bool>,
}

#[derive(Serialize)]
struct SymbolJson {
    name: &'static str,
    required: bool,
    resolved: bool,
}

#[derive(Tabled)]
struct SymbolRow {
    #[tabled(rename = "entry point")]
    name: &'static str,
    #[tabled(rename = "required")]
    required: &'static str,
    #[tabled(rename = "status")]
    status: String,
}

impl CheckArgs {
    pub fn run(self, explicit: Option<&Path>) -> Result<()> {
        init_tracing(false);

        let (config, _) = config::discover(explicit).context("failed to load livepatch config")?;
        let library = config.provider_library();
        let statuses = probe(&library)
            .with_context(|| format!("failed to inspect provider {}", library.display()))?;

        let missing: Vec<&str> = statuses
            .iter()
            .filter(|s| s.required && !s.resolved)
            .map(|s| s.name)
            .collect();

        let self_test = if missing.is_empty() {
            let provider = DylibProvider::open(&library).context("failed to load provider")?;
            provider.self_test()
        } else {
            None
        };

        if self.json {
            print_json(&library, &statuses, self_test)?;
        } else {
            print_table(&library, &statuses, self_test);
        }

        if !missing.is_empty() {
            bail!(
                "provider {} is missing required entry points: {}",
                library.display(),
                missing.join(", ")
            );
        }
        if self_test == Some(false) {
            bail!("provider self-test failed");
        }
        Ok(())
    }
}

fn print_json(library: &Path, statuses: &[SymbolStatus], self_test: Option<bool>) -> Result<()> {
    let payload = CheckReportJson {
        library: library.display().to_string(),
        symbols: statuses
            .iter()
            .map(|s| SymbolJson {
                name: s.name,
                required: s.required,
                resolved: s.resolved,
            })
            .collect(),
        self_test,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize check JSON")?
    );
    Ok(())
}

fn print_table(library: &Path, statuses: &[SymbolStatus], self_test: Option<bool>) {
    println!("provider: {}", library.display().to_string().bold());

    let rows: Vec<SymbolRow> = statuses
        .iter()
        .map(|s| SymbolRow {
            name: s.name,
            required: if s.required { "yes" } else { "no" },
            status: status_label(s),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let verdict = match self_test {
        Some(true) => "passed".green().to_string(),
        Some(false) => "FAILED".red().bold().to_string(),
        None => "not run".bright_black().to_string(),
    };
    println!("self-test: {verdict}");
}

fn status_label(status: &SymbolStatus) -> String {
    match (status.resolved, status.required) {
        (true, _) => "resolved".green().to_string(),
        (false, true) => "MISSING".red().bold().to_string(),
        (false, false) => "absent".yellow().to_string(),
    }
}
