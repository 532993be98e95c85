use std::{
    error::Error,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use log::info;
use probe_planner::{
    io::{BatchConfig, BatchReport},
    AffinePositioning, DeviceEnumerator, MockManipulator, MoveRequest, MoveSession, PlanReport,
    PositioningCollaborator, ScenarioConfig, TwoPhaseExecutor,
};

/// Plan and simulate collision-free manipulator moves.
#[derive(Debug, Parser)]
#[command(author, version, about = "Collision-free move planning for probe stations")]
struct Cli {
    /// Log debug output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan every batch of a scenario without moving anything.
    Plan {
        #[arg(long)]
        scenario: PathBuf,
        /// Write the report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Plan and execute every batch against a simulated controller.
    Simulate {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);
    if let Err(err) = try_main(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` overrides the level picked by `--verbose`.
#[cfg(feature = "tracing")]
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    probe_planner_core::init_tracing(json, level);
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, json: bool) {
    if json {
        eprintln!("--json-logs needs the `tracing` feature; using plain logs");
    }
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let _ = probe_planner_core::init_with_level(level);
}

fn try_main(command: Command) -> Result<(), Box<dyn Error>> {
    let (report, out, fallback) = match command {
        Command::Plan { scenario, out } => {
            let (cfg, base) = load_scenario(&scenario)?;
            (plan(&cfg, &base)?, out, cfg.output_path)
        }
        Command::Simulate { scenario, out } => {
            let (cfg, base) = load_scenario(&scenario)?;
            (simulate(&cfg, &base)?, out, cfg.output_path)
        }
    };

    match out.or(fallback) {
        Some(path) => {
            report.write_json(&path)?;
            println!("wrote report JSON to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn load_scenario(path: &Path) -> Result<(ScenarioConfig, PathBuf), Box<dyn Error>> {
    let cfg = ScenarioConfig::load_json(path)?;
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((cfg, base))
}

fn positioning(cfg: &ScenarioConfig) -> Option<AffinePositioning> {
    cfg.sample_to_image.map(AffinePositioning::new)
}

fn resolve(
    session: &MoveSession,
    batch: &BatchConfig,
    positioning: Option<&AffinePositioning>,
) -> Result<MoveRequest, Box<dyn Error>> {
    let positioning = positioning.map(|p| p as &dyn PositioningCollaborator);
    Ok(session.resolve_targets(&batch.targets, positioning)?)
}

/// Batches are planned independently against the starting cache.
fn plan(cfg: &ScenarioConfig, base: &Path) -> Result<PlanReport, Box<dyn Error>> {
    let session = MoveSession::from_scenario(cfg, base)?;
    let positioning = positioning(cfg);
    let mut report = PlanReport::default();
    for (index, batch) in cfg.batches.iter().enumerate() {
        let request = resolve(&session, batch, positioning.as_ref())?;
        let (collisions, outcome) = session.plan_batch(&request);
        report.batches.push(BatchReport {
            index,
            request,
            collisions,
            outcome,
            execution: None,
        });
    }
    info!("planned {} batch(es)", report.batches.len());
    Ok(report)
}

/// Batches run in order; each sees the positions left by the previous one.
fn simulate(cfg: &ScenarioConfig, base: &Path) -> Result<PlanReport, Box<dyn Error>> {
    let mut session = MoveSession::from_scenario(cfg, base)?;
    let positioning = positioning(cfg);

    let slots = cfg.mock_devices.unwrap_or(probe_planner_core::MAX_DEVICES);
    let mut driver = MockManipulator::new(slots);
    for (&device, &coord) in &cfg.positions {
        driver.place(device, coord);
    }
    let active = driver.active_devices()?;
    let mut executor = TwoPhaseExecutor::with_params(driver, cfg.executor.clone());
    let known: Vec<_> = active
        .into_iter()
        .filter(|d| cfg.positions.contains_key(d))
        .collect();
    session.refresh_positions(&mut executor, &known)?;

    let mut report = PlanReport::default();
    for (index, batch) in cfg.batches.iter().enumerate() {
        let request = resolve(&session, batch, positioning.as_ref())?;
        let batch_report = session.run_batch(index, &request, &mut executor);
        let failed = batch_report
            .execution
            .as_ref()
            .is_some_and(|e| e.error.is_some());
        report.batches.push(batch_report);
        if failed {
            break;
        }
    }
    Ok(report)
}
