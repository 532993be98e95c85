//! JSON persistence for the stores, plus scenario and report files.

use crate::calibration::CalibrationStore;
use crate::collaborators::SamplePoint;
use crate::collision::{CollisionReport, MoveRequest};
use crate::executor::ExecutionReport;
use crate::footprint::FootprintStore;
use crate::params::{ExecutorParams, PlannerParams};
use crate::sequencer::PlanOutcome;
use log::info;
use probe_planner_core::{AffineTransform, DeviceCoord, DeviceId, ImagePoint};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Read and deserialise a JSON file.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, IoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Serialise `value` as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Save every calibration; only forward matrices are written.
pub fn save_calibrations(store: &CalibrationStore, path: impl AsRef<Path>) -> Result<(), IoError> {
    write_json(store, path.as_ref())?;
    info!(
        "saved {} calibration(s) to {}",
        store.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Load calibrations, re-validating each map and rebuilding its inverse.
///
/// A singular or non-finite matrix fails the whole load.
pub fn load_calibrations(path: impl AsRef<Path>) -> Result<CalibrationStore, IoError> {
    let store: CalibrationStore = read_json(path.as_ref())?;
    info!(
        "loaded {} calibration(s) from {}",
        store.len(),
        path.as_ref().display()
    );
    Ok(store)
}

pub fn save_footprints(store: &FootprintStore, path: impl AsRef<Path>) -> Result<(), IoError> {
    write_json(store, path.as_ref())?;
    info!(
        "saved {} footprint(s) to {}",
        store.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load_footprints(path: impl AsRef<Path>) -> Result<FootprintStore, IoError> {
    let store: FootprintStore = read_json(path.as_ref())?;
    info!(
        "loaded {} footprint(s) from {}",
        store.len(),
        path.as_ref().display()
    );
    Ok(store)
}

/// Where a device should go, either directly in the image or as a point on
/// the sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    Image(ImagePoint),
    Sample(SamplePoint),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub targets: BTreeMap<DeviceId, TargetSpec>,
}

/// Input of the `probe-planner` binary.
///
/// Stores may be given inline or as paths; a path, resolved relative to the
/// scenario file, takes precedence over inline data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub calibrations: CalibrationStore,
    #[serde(default)]
    pub calibrations_path: Option<PathBuf>,
    #[serde(default)]
    pub footprints: FootprintStore,
    #[serde(default)]
    pub footprints_path: Option<PathBuf>,
    /// Cached device positions at the start of the run.
    #[serde(default)]
    pub positions: BTreeMap<DeviceId, DeviceCoord>,
    #[serde(default)]
    pub batches: Vec<BatchConfig>,
    /// Sample → image registration used for `sample` targets.
    #[serde(default)]
    pub sample_to_image: Option<AffineTransform>,
    #[serde(default)]
    pub planner: PlannerParams,
    #[serde(default)]
    pub executor: ExecutorParams,
    /// Populated slots of the simulated controller.
    #[serde(default)]
    pub mock_devices: Option<u8>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl ScenarioConfig {
    /// Load a JSON scenario from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        read_json(path)
    }

    /// Write this scenario to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(self, path)
    }

    /// Calibration and footprint stores, loading referenced files relative
    /// to `base_dir`.
    pub fn resolve_stores(
        &self,
        base_dir: &Path,
    ) -> Result<(CalibrationStore, FootprintStore), IoError> {
        let calibrations = match &self.calibrations_path {
            Some(p) => load_calibrations(base_dir.join(p))?,
            None => self.calibrations.clone(),
        };
        let footprints = match &self.footprints_path {
            Some(p) => load_footprints(base_dir.join(p))?,
            None => self.footprints.clone(),
        };
        Ok((calibrations, footprints))
    }
}

/// Result of executing one batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub completed: ExecutionReport,
    /// Cached position of every executed device afterwards.
    pub achieved: BTreeMap<DeviceId, DeviceCoord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub request: MoveRequest,
    pub collisions: CollisionReport,
    pub outcome: PlanOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,
}

/// Output of the `probe-planner` binary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub batches: Vec<BatchReport>,
}

impl PlanReport {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        read_json(path)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(self, path)
    }

    /// `true` if every batch produced an executable plan.
    pub fn all_planned(&self) -> bool {
        self.batches.iter().all(|b| b.outcome.is_executable())
    }
}
