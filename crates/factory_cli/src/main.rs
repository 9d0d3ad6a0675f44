//! Command-line driver: parse arguments, load the spec, run the simulation,
//! write the report.
//!
//! Exit codes: 0 success, 1 configuration error, 2 runtime error, 3 timeout.

use anyhow::{Context, Result};
use clap::Parser;
use factory_core::engine::{RunLimits, RunReport, TerminationReason};
use factory_core::SimulationError;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "factory_cli",
    about = "Self-replicating solar factory simulation"
)]
struct Cli {
    /// Path to the factory specification document.
    #[arg(long)]
    spec: PathBuf,

    /// Named profile to overlay on the base spec.
    #[arg(long)]
    profile: Option<String>,

    /// Maximum simulated hours before timing out.
    #[arg(long)]
    max_hours: Option<f64>,

    /// Maximum wall-clock seconds before timing out.
    #[arg(long)]
    max_wall_time: Option<f64>,

    /// Where to write the JSON run report.
    #[arg(long, default_value = "factory_simulation_log.json")]
    output: PathBuf,

    /// Instantiate subsystems from the spec's `subsystem_implementations`
    /// table instead of the feature-toggle defaults.
    #[arg(long)]
    modular: bool,

    /// RNG seed; runs with the same spec and seed are bit-identical.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;
const EXIT_TIMEOUT: i32 = 3;

fn write_report(path: &PathBuf, report: &RunReport) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn run(cli: &Cli) -> Result<i32> {
    let mut sim = factory_spec::load_simulation(
        &cli.spec,
        cli.profile.as_deref(),
        cli.seed,
        cli.modular,
    )?;

    let mut limits = RunLimits::from_constants(&sim.content.constants);
    if let Some(max_hours) = cli.max_hours {
        limits.max_hours = max_hours;
    }
    if let Some(max_wall_time) = cli.max_wall_time {
        limits.max_wall_time_seconds = max_wall_time;
    }

    info!(
        spec = %cli.spec.display(),
        seed = cli.seed,
        max_hours = limits.max_hours,
        "starting simulation"
    );

    let report = sim.run(limits)?;
    write_report(&cli.output, &report)?;

    let status = &report.final_status;
    info!(
        reason = status.terminated_reason.label(),
        sim_hours = status.sim_time_hours,
        wall_seconds = status.wall_time_seconds,
        output = %cli.output.display(),
        "simulation finished"
    );

    Ok(match status.terminated_reason {
        TerminationReason::Replicated | TerminationReason::Cancelled => 0,
        TerminationReason::MaxHours | TerminationReason::WallTime => EXIT_TIMEOUT,
        TerminationReason::Stalled => EXIT_RUNTIME_ERROR,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = match err.downcast_ref::<SimulationError>() {
                Some(
                    SimulationError::InvalidConfiguration { .. }
                    | SimulationError::CircularDependency { .. }
                    | SimulationError::InvalidPath { .. }
                    | SimulationError::FileTooLarge { .. },
                ) => EXIT_CONFIG_ERROR,
                Some(SimulationError::EventQueueOverflow { .. }) => EXIT_RUNTIME_ERROR,
                // IO / parse failures on the way in are configuration errors.
                None => EXIT_CONFIG_ERROR,
            };
            std::process::exit(code);
        }
    }
}
