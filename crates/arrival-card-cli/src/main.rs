// Copyright 2026 Arrival Card Contributors
// SPDX-License-Identifier: MIT

//! arrival-card: submit a digital arrival card from the command line.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use arrival_card::{StrategyChoice, SubmissionError};

mod commands;

#[derive(Parser)]
#[command(
    name = "arrival-card",
    about = "Submit a digital arrival card and keep its confirmation",
    version
)]
struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to a config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a traveler record.
    Submit {
        /// Path to the record JSON.
        record: PathBuf,

        /// Which path to use (auto, hybrid, automation).
        #[arg(long, default_value = "auto", value_parser = parse_strategy)]
        strategy: StrategyChoice,

        /// Do not open a browser window when the hybrid path fails.
        #[arg(long)]
        no_fallback: bool,

        /// Write the proof document here.
        #[arg(long)]
        proof_out: Option<PathBuf>,
    },

    /// Show the stored confirmation for a trip key.
    Show {
        /// Trip key, as printed by `list`.
        trip_key: String,

        /// Write the proof document here.
        #[arg(long)]
        proof_out: Option<PathBuf>,
    },

    /// Forget the stored confirmation for a trip key.
    Clear {
        trip_key: String,
    },

    /// List stored confirmations.
    List,

    /// Inspect the field taxonomy.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Check the local environment (config, browser, storage, taxonomy).
    Doctor,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   arrival-card completions bash > ~/.local/share/bash-completion/completions/arrival-card
    ///   arrival-card completions zsh > ~/.zfunc/_arrival-card
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Print version, publication date, and coverage.
    Info,
    /// Check that every enumerated value of a record has a mapping.
    Check {
        record: PathBuf,
    },
}

fn parse_strategy(s: &str) -> Result<StrategyChoice, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    if let Err(err) = run(cli).await {
        report_error(&err, json);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = commands::Output { json: cli.json };
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Submit {
            record,
            strategy,
            no_fallback,
            proof_out,
        } => {
            let strategy = match (strategy, no_fallback) {
                (StrategyChoice::Auto, true) => StrategyChoice::Hybrid,
                (choice, _) => choice,
            };
            commands::submit::run(out, config, &record, strategy, proof_out.as_deref()).await
        }
        Commands::Show {
            trip_key,
            proof_out,
        } => commands::results::show(out, config, &trip_key, proof_out.as_deref()),
        Commands::Clear { trip_key } => commands::results::clear(out, config, &trip_key),
        Commands::List => commands::results::list(out, config),
        Commands::Registry { action } => match action {
            RegistryAction::Info => commands::registry::info(out, config),
            RegistryAction::Check { record } => commands::registry::check(out, config, &record),
        },
        Commands::Doctor => commands::doctor::run(out, config),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "arrival-card", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn report_error(err: &anyhow::Error, json: bool) {
    let classified = err.downcast_ref::<SubmissionError>();
    if json {
        let body = serde_json::json!({
            "error": format!("{err:#}"),
            "class": classified.map(|e| e.class()),
            "remediation": classified.map(|e| e.remediation()),
        });
        println!("{body}");
        return;
    }

    eprintln!("Error: {err:#}");
    if let Some(e) = classified {
        eprintln!("  class: {}", e.class());
        eprintln!("  next step: {}", commands::remediation_hint(e.remediation()));
    }
}
