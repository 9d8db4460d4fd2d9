//! reroute command line
//!
//! - `config` prints the effective configuration
//! - `check-config` validates a configuration file
//! - `simulate` drives one incident through the engine against the
//!   in-memory metro network, on a paused clock

mod scenario;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reroute_core::{CascadePolicy, EngineConfig};
use scenario::{Scenario, ScenarioReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reroute", version, about = "SLA degradation incident engine")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective configuration as TOML
    Config {
        /// Configuration file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a scenario on the simulated metro network
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Scenario to run
    #[arg(long, value_enum, default_value_t = Scenario::Recovery)]
    scenario: Scenario,

    /// Configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the cascading degradation policy
    #[arg(long, value_enum)]
    cascade_policy: Option<CascadeArg>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CascadeArg {
    Recompute,
    Escalate,
}

impl From<CascadeArg> for CascadePolicy {
    fn from(arg: CascadeArg) -> Self {
        match arg {
            CascadeArg::Recompute => Self::Recompute,
            CascadeArg::Escalate => Self::Escalate,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckConfig { config } => {
            load_config(Some(&config))?;
            println!("{}: ok", config.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Simulate(args) => simulate(&args),
    }
}

fn simulate(args: &SimulateArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(policy) = args.cascade_policy {
        config = config.with_cascade_policy(policy.into());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .context("building simulation runtime")?;
    let report = runtime.block_on(scenario::run(args.scenario, config))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.expected() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &ScenarioReport) {
    let incident = &report.incident;
    println!("Scenario: {}", report.scenario.as_str());
    println!("Incident: {}", incident.id);
    println!("  State: {}", incident.state);
    if let Some(outcome) = incident.outcome {
        println!("  Outcome: {outcome:?}");
    }
    if let Some(path) = &incident.path {
        println!(
            "  Protection path: {} hops, {:.1}ms",
            path.hop_count(),
            path.total_delay_ms()
        );
    }
    if let Some(record) = &incident.escalation {
        println!(
            "  Escalation: {} -> {} ({})",
            record.reason, record.decision.action, record.decision.justification
        );
    }
    println!("  Live tunnels: {}", report.live_tunnels);
    println!("  Simulated time: {}s", report.elapsed_secs);
    println!();

    println!("History:");
    for t in &incident.history {
        let offset = (t.at - incident.created_at).num_seconds();
        println!("  +{offset:>4}s  {} -> {}  ({})", t.from, t.to, t.trigger);
    }
    println!();

    println!("Audit trail ({} events):", report.audit.len());
    for event in &report.audit {
        let offset = (event.at - incident.created_at).num_seconds();
        println!("  +{offset:>4}s  {}", event.kind.name());
    }
}
