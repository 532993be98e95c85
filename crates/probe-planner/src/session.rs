//! Batch pipeline: resolve targets, detect, sequence and optionally
//! execute, one batch after another against a shared position cache.

use crate::calibration::CalibrationStore;
use crate::collaborators::PositioningCollaborator;
use crate::collision::{CollisionDetector, CollisionReport, MoveRequest};
use crate::executor::{execute_plan, HardwareMoveError, MoveExecutor};
use crate::footprint::FootprintStore;
use crate::io::{BatchReport, ExecutionSummary, IoError, ScenarioConfig, TargetSpec};
use crate::params::PlannerParams;
use crate::position::PositionCache;
use crate::sequencer::{MovementSequencer, PlanOutcome};
use log::{info, warn};
use probe_planner_core::DeviceId;
use std::collections::BTreeMap;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("{device}: sample target given but no positioning is configured")]
    NoPositioning { device: DeviceId },
    #[error("{device}: sample point could not be located in the image")]
    UnlocatedSample { device: DeviceId },
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Hardware(#[from] HardwareMoveError),
}

/// Owns the planner state for a sequence of batches.
#[derive(Clone, Debug, Default)]
pub struct MoveSession {
    pub calibrations: CalibrationStore,
    pub footprints: FootprintStore,
    pub cache: PositionCache,
    pub params: PlannerParams,
}

impl MoveSession {
    pub fn new(
        calibrations: CalibrationStore,
        footprints: FootprintStore,
        cache: PositionCache,
        params: PlannerParams,
    ) -> Self {
        Self {
            calibrations,
            footprints,
            cache,
            params,
        }
    }

    /// Build a session from a scenario whose relative paths resolve
    /// against `base_dir`.
    pub fn from_scenario(scenario: &ScenarioConfig, base_dir: &Path) -> Result<Self, SessionError> {
        let (calibrations, footprints) = scenario.resolve_stores(base_dir)?;
        let mut cache = PositionCache::new();
        for (&device, &coord) in &scenario.positions {
            cache.set(device, coord);
        }
        Ok(Self::new(
            calibrations,
            footprints,
            cache,
            scenario.planner.clone(),
        ))
    }

    /// Turn per-device target specs into an image-space request.
    pub fn resolve_targets(
        &self,
        targets: &BTreeMap<DeviceId, TargetSpec>,
        positioning: Option<&dyn PositioningCollaborator>,
    ) -> Result<MoveRequest, SessionError> {
        let mut request = MoveRequest::new();
        for (&device, spec) in targets {
            let image = match spec {
                TargetSpec::Image(p) => *p,
                TargetSpec::Sample(sample) => positioning
                    .ok_or(SessionError::NoPositioning { device })?
                    .sample_point_to_image(sample)
                    .ok_or(SessionError::UnlocatedSample { device })?,
            };
            request.insert(device, image);
        }
        Ok(request)
    }

    /// Classify and sequence one batch without touching hardware.
    pub fn plan_batch(&self, request: &MoveRequest) -> (CollisionReport, PlanOutcome) {
        let detector =
            CollisionDetector::new(&self.calibrations, &self.footprints, &self.cache, &self.params);
        let report = detector.detect(request);
        let outcome = MovementSequencer::new(detector).plan(request, &report);
        (report, outcome)
    }

    /// Plan one batch and, if accepted, execute it.
    ///
    /// A refused batch is reported, not an error. A hardware failure stops
    /// the batch; the report then records what completed and the cache
    /// reflects it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, request, executor), fields(devices = request.len()))
    )]
    pub fn run_batch<E: MoveExecutor + ?Sized>(
        &mut self,
        index: usize,
        request: &MoveRequest,
        executor: &mut E,
    ) -> BatchReport {
        let (collisions, outcome) = self.plan_batch(request);
        let execution = outcome.plan().map(|plan| {
            let result = execute_plan(plan, executor, &mut self.cache);
            let achieved = plan
                .moves()
                .filter_map(|m| self.cache.get(m.device).map(|c| (m.device, c)))
                .collect();
            match result {
                Ok(completed) => ExecutionSummary {
                    completed,
                    achieved,
                    error: None,
                },
                Err(err) => {
                    warn!("batch {index}: {err}");
                    ExecutionSummary {
                        completed: err.completed().clone(),
                        achieved,
                        error: Some(err.to_string()),
                    }
                }
            }
        });
        if execution.is_none() {
            info!("batch {index} not executed");
        }
        BatchReport {
            index,
            request: request.clone(),
            collisions,
            outcome,
            execution,
        }
    }

    /// Bulk-refresh the cache for `devices` from the hardware.
    pub fn refresh_positions<E: MoveExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        devices: &[DeviceId],
    ) -> Result<usize, SessionError> {
        Ok(self.cache.refresh_from(executor, devices)?)
    }
}
