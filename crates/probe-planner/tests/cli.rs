#![cfg(feature = "cli")]

use assert_cmd::Command;
use predicates::prelude::*;
use probe_planner::io::BatchConfig;
use probe_planner::{
    CalibrationStore, Correspondence, FootprintStore, PlanOutcome, PlanReport, ScenarioConfig,
    TargetSpec,
};
use probe_planner_core::{DeviceCoord, DeviceId, ImagePoint};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn id(raw: u8) -> DeviceId {
    DeviceId::new(raw).unwrap()
}

fn planner() -> Command {
    Command::new(env!("CARGO_BIN_EXE_probe-planner"))
}

/// Crossing batch that needs M2 to move first, followed by a batch that is
/// only clear once the first has run.
fn write_scenario(dir: &Path) -> PathBuf {
    let mut calibrations = CalibrationStore::new();
    let mut footprints = FootprintStore::new();
    for d in [id(1), id(2)] {
        calibrations
            .calibrate(
                d,
                &[
                    Correspondence::new(DeviceCoord::new(0.0, 0.0), ImagePoint::new(0.0, 0.0)),
                    Correspondence::new(DeviceCoord::new(100.0, 0.0), ImagePoint::new(100.0, 0.0)),
                    Correspondence::new(DeviceCoord::new(0.0, 100.0), ImagePoint::new(0.0, 100.0)),
                ],
            )
            .unwrap();
        footprints
            .set_footprint(
                d,
                &[
                    ImagePoint::new(-50.0, -50.0),
                    ImagePoint::new(50.0, -50.0),
                    ImagePoint::new(50.0, 50.0),
                    ImagePoint::new(-50.0, 50.0),
                ],
                ImagePoint::new(0.0, 0.0),
            )
            .unwrap();
    }

    let image = |x, y| TargetSpec::Image(ImagePoint::new(x, y));
    let cfg = ScenarioConfig {
        calibrations,
        footprints,
        positions: BTreeMap::from([
            (id(1), DeviceCoord::new(1000.0, 1000.0)),
            (id(2), DeviceCoord::new(1500.0, 1000.0)),
        ]),
        batches: vec![
            BatchConfig {
                targets: BTreeMap::from([
                    (id(1), image(2000.0, 1000.0)),
                    (id(2), image(1500.0, 2000.0)),
                ]),
            },
            BatchConfig {
                targets: BTreeMap::from([(id(1), image(1500.0, 1000.0))]),
            },
        ],
        ..ScenarioConfig::default()
    };
    let path = dir.join("scenario.json");
    cfg.write_json(&path).unwrap();
    path
}

#[test]
fn plan_prints_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_scenario(dir.path());
    planner()
        .arg("plan")
        .arg("--scenario")
        .arg(&scenario)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"sequential\""));
}

#[test]
fn simulate_writes_achieved_positions() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_scenario(dir.path());
    let out = dir.path().join("report.json");
    planner()
        .args(["simulate", "--scenario"])
        .arg(&scenario)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote report JSON"));

    let report = PlanReport::load_json(&out).unwrap();
    assert_eq!(report.batches.len(), 2);
    assert!(report.all_planned());
    assert!(matches!(
        report.batches[0].outcome,
        PlanOutcome::Sequential { .. }
    ));

    // M2 left (1500, 1000) in the first batch, so the second is direct
    assert!(matches!(report.batches[1].outcome, PlanOutcome::Direct { .. }));
    let execution = report.batches[1].execution.as_ref().unwrap();
    assert!(execution.error.is_none());
    assert!((execution.achieved[&id(1)].x - 1500.0).abs() < 1e-6);
}

#[test]
fn missing_scenario_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    planner()
        .arg("plan")
        .arg("--scenario")
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn verbose_flag_enables_debug_logs() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_scenario(dir.path());
    planner()
        .env_remove("RUST_LOG")
        .args(["--verbose", "plan", "--scenario"])
        .arg(&scenario)
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG"));

    planner()
        .env_remove("RUST_LOG")
        .args(["plan", "--scenario"])
        .arg(&scenario)
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG").not());
}
