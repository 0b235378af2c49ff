//! `phaser`: run and inspect scripted phase-scheduler scenarios.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use phaser::exit_codes;
use phaser::io::config::{RunnerConfig, load_config};
use phaser::io::report::{render_graph, render_summary, render_transitions};
use phaser::io::scenario::load_scenario;
use phaser::logging;
use phaser::runtime::PhaseRunner;
use phaser::simulate::{build_runner, exit_code, simulate};
use phaser::validate::validate_scenario_file;

#[derive(Parser)]
#[command(
    name = "phaser",
    version,
    about = "Deterministic testbench phase scheduler"
)]
struct Cli {
    /// Log run progress (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario and print its phase transitions and diagnostics.
    Run {
        scenario: PathBuf,
        /// Base runner config; the scenario's `[config]` table overrides it.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the full report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Check a scenario and the phase graph it builds.
    Validate {
        scenario: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the phase graph, optionally with a scenario's domains and syncs.
    Graph { scenario: Option<PathBuf> },
}

fn main() {
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        logging::VERBOSE_DIRECTIVE
    } else {
        logging::DEFAULT_DIRECTIVE
    });
    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            scenario,
            config,
            json,
        } => cmd_run(&scenario, config.as_deref(), json),
        Command::Validate { scenario, config } => {
            let base = base_config(config.as_deref())?;
            let summary = validate_scenario_file(&scenario, &base)?;
            println!(
                "ok: {} components, {} domains, {} phases, {} synced pairs",
                summary.components, summary.domains, summary.phase_nodes, summary.synced_pairs
            );
            Ok(exit_codes::OK)
        }
        Command::Graph { scenario } => {
            let runner = match scenario {
                Some(path) => build_runner(&load_scenario(&path)?, &RunnerConfig::default())?,
                None => PhaseRunner::new(RunnerConfig::default())?,
            };
            print!("{}", render_graph(&runner.graph()));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(scenario: &Path, config: Option<&Path>, json: bool) -> Result<i32> {
    let report = simulate(scenario, config)?;
    if json {
        let payload = serde_json::to_string_pretty(&report).context("serialize report")?;
        println!("{payload}");
    } else {
        print!("{}", render_transitions(&report));
        print!("{}", render_summary(&report));
    }
    Ok(exit_code(&report))
}

fn base_config(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(RunnerConfig::default()),
    }
}
