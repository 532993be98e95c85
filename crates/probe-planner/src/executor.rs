//! Hardware boundary: the move executor, a driver abstraction and an
//! in-memory mock controller.

use crate::collaborators::DeviceEnumerator;
use crate::params::ExecutorParams;
use crate::position::PositionCache;
use crate::sequencer::{MovementPlan, PlannedMove};
use log::{debug, info, warn};
use probe_planner_core::{DeviceCoord, DeviceId, MAX_DEVICES, MIN_MOTION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Failure reported by the hardware layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HardwareMoveError {
    #[error("controller is not connected")]
    NotConnected,
    #[error("{0} is not available on this controller")]
    DeviceUnavailable(DeviceId),
    #[error("{device}: {message}")]
    Driver { device: DeviceId, message: String },
    #[error("move of {0} was interrupted")]
    Interrupted(DeviceId),
}

/// Moves one device to an absolute device-space target and reports where
/// it ended up.
pub trait MoveExecutor {
    /// Blocks until the move completes; returns the achieved position.
    fn move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
    ) -> Result<DeviceCoord, HardwareMoveError>;

    fn current_position(&mut self, device: DeviceId) -> Result<DeviceCoord, HardwareMoveError>;
}

impl<E: MoveExecutor + ?Sized> MoveExecutor for &mut E {
    fn move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
    ) -> Result<DeviceCoord, HardwareMoveError> {
        (**self).move_to(device, target)
    }

    fn current_position(&mut self, device: DeviceId) -> Result<DeviceCoord, HardwareMoveError> {
        (**self).current_position(device)
    }
}

/// Low-level controller commands of a multi-manipulator stage.
pub trait ManipulatorDriver {
    fn is_connected(&self) -> bool;

    fn position(&mut self, device: DeviceId) -> Result<DeviceCoord, HardwareMoveError>;

    /// Fastest available motion, no speed control.
    fn quick_move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
    ) -> Result<(), HardwareMoveError>;

    /// Speed-controlled motion; `speed` is a controller speed index.
    fn slow_move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
        speed: u8,
    ) -> Result<(), HardwareMoveError>;
}

/// Executor that covers most of the distance with a quick move and
/// finishes with a speed-controlled precision leg.
#[derive(Debug)]
pub struct TwoPhaseExecutor<D> {
    driver: D,
    params: ExecutorParams,
}

impl<D: ManipulatorDriver> TwoPhaseExecutor<D> {
    pub fn new(driver: D) -> Self {
        Self::with_params(driver, ExecutorParams::default())
    }

    pub fn with_params(driver: D, params: ExecutorParams) -> Self {
        Self { driver, params }
    }

    pub fn params(&self) -> &ExecutorParams {
        &self.params
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_inner(self) -> D {
        self.driver
    }
}

impl<D: ManipulatorDriver> MoveExecutor for TwoPhaseExecutor<D> {
    fn move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
    ) -> Result<DeviceCoord, HardwareMoveError> {
        if !self.driver.is_connected() {
            return Err(HardwareMoveError::NotConnected);
        }
        let current = self.driver.position(device)?;
        let fraction = self.params.approach_fraction.clamp(0.0, 1.0);
        if fraction > 0.0 && current.distance(target) > MIN_MOTION {
            let waypoint = DeviceCoord::new(
                current.x + (target.x - current.x) * fraction,
                current.y + (target.y - current.y) * fraction,
            );
            debug!("{device} approach to ({:.1}, {:.1})", waypoint.x, waypoint.y);
            self.driver.quick_move_to(device, waypoint)?;
        }
        self.driver
            .slow_move_to(device, target, self.params.precision_speed)?;
        self.driver.position(device)
    }

    fn current_position(&mut self, device: DeviceId) -> Result<DeviceCoord, HardwareMoveError> {
        if !self.driver.is_connected() {
            return Err(HardwareMoveError::NotConnected);
        }
        self.driver.position(device)
    }
}

/// Travel limits of the mock controller, in µm.
pub const MOCK_TRAVEL_MIN: f64 = 0.0;
pub const MOCK_TRAVEL_MAX: f64 = 25_000.0;
/// Highest speed index the mock controller accepts.
pub const MOCK_MAX_SPEED: u8 = 12;

/// Command recorded by [`MockManipulator`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverCommand {
    Quick {
        device: DeviceId,
        target: DeviceCoord,
    },
    Slow {
        device: DeviceId,
        target: DeviceCoord,
        speed: u8,
    },
}

/// Software stand-in for a four-slot manipulator controller.
///
/// Moves complete instantly. Targets are clamped to the travel range, the
/// same way the real controller refuses to leave its handrails.
#[derive(Clone, Debug)]
pub struct MockManipulator {
    positions: Vec<DeviceCoord>,
    active: u8,
    connected: bool,
    failing: BTreeSet<DeviceId>,
    commands: Vec<DriverCommand>,
}

impl MockManipulator {
    /// Controller with slots `1..=active` populated, all at the origin.
    pub fn new(active: u8) -> Self {
        Self {
            positions: vec![DeviceCoord::new(0.0, 0.0); usize::from(MAX_DEVICES)],
            active: active.min(MAX_DEVICES),
            connected: true,
            failing: BTreeSet::new(),
            commands: Vec::new(),
        }
    }

    /// Teleport a device without recording a command.
    pub fn place(&mut self, device: DeviceId, coord: DeviceCoord) {
        if let Some(slot) = self.slot_index(device) {
            self.positions[slot] = clamp_to_travel(coord);
        }
    }

    /// Make every subsequent move of `device` fail.
    pub fn fail_device(&mut self, device: DeviceId) {
        self.failing.insert(device);
    }

    pub fn heal_device(&mut self, device: DeviceId) {
        self.failing.remove(&device);
    }

    pub fn connect(&mut self) {
        self.connected = true;
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn commands(&self) -> &[DriverCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn slot_index(&self, device: DeviceId) -> Option<usize> {
        (device.get() <= self.active).then(|| usize::from(device.get() - 1))
    }

    fn check(&self, device: DeviceId) -> Result<usize, HardwareMoveError> {
        if !self.connected {
            return Err(HardwareMoveError::NotConnected);
        }
        self.slot_index(device)
            .ok_or(HardwareMoveError::DeviceUnavailable(device))
    }

    fn check_motion(&self, device: DeviceId) -> Result<usize, HardwareMoveError> {
        let slot = self.check(device)?;
        if self.failing.contains(&device) {
            return Err(HardwareMoveError::Driver {
                device,
                message: "motor stalled".to_string(),
            });
        }
        Ok(slot)
    }
}

fn clamp_to_travel(c: DeviceCoord) -> DeviceCoord {
    DeviceCoord::new(
        c.x.clamp(MOCK_TRAVEL_MIN, MOCK_TRAVEL_MAX),
        c.y.clamp(MOCK_TRAVEL_MIN, MOCK_TRAVEL_MAX),
    )
}

impl ManipulatorDriver for MockManipulator {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn position(&mut self, device: DeviceId) -> Result<DeviceCoord, HardwareMoveError> {
        let slot = self.check(device)?;
        Ok(self.positions[slot])
    }

    fn quick_move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
    ) -> Result<(), HardwareMoveError> {
        let slot = self.check_motion(device)?;
        let target = clamp_to_travel(target);
        self.commands.push(DriverCommand::Quick { device, target });
        self.positions[slot] = target;
        Ok(())
    }

    fn slow_move_to(
        &mut self,
        device: DeviceId,
        target: DeviceCoord,
        speed: u8,
    ) -> Result<(), HardwareMoveError> {
        let slot = self.check_motion(device)?;
        let target = clamp_to_travel(target);
        let speed = speed.min(MOCK_MAX_SPEED);
        self.commands.push(DriverCommand::Slow {
            device,
            target,
            speed,
        });
        self.positions[slot] = target;
        Ok(())
    }
}

impl DeviceEnumerator for MockManipulator {
    fn active_devices(&mut self) -> Result<Vec<DeviceId>, HardwareMoveError> {
        if !self.connected {
            return Err(HardwareMoveError::NotConnected);
        }
        Ok((1..=self.active).filter_map(DeviceId::new).collect())
    }
}

/// Outcome of a fully executed plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub steps_completed: usize,
    pub moves_completed: usize,
}

/// Why execution of a plan stopped early.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecuteError {
    #[error("step {step}: {source}")]
    Hardware {
        step: usize,
        device: DeviceId,
        #[source]
        source: HardwareMoveError,
        completed: ExecutionReport,
    },
    #[error("cancelled before step {step}")]
    Cancelled {
        step: usize,
        completed: ExecutionReport,
    },
}

impl ExecuteError {
    /// Progress made before the failure.
    pub fn completed(&self) -> &ExecutionReport {
        match self {
            ExecuteError::Hardware { completed, .. } | ExecuteError::Cancelled { completed, .. } => {
                completed
            }
        }
    }
}

/// Run every step of `plan` in order, committing each achieved position.
///
/// Stops at the first hardware failure. Moves already performed stay
/// recorded in `cache`, and the failing device is re-read so a partial
/// move is recorded too.
pub fn execute_plan<E: MoveExecutor + ?Sized>(
    plan: &MovementPlan,
    executor: &mut E,
    cache: &mut PositionCache,
) -> Result<ExecutionReport, ExecuteError> {
    execute_plan_with(plan, executor, cache, |_| true)
}

/// [`execute_plan`] with a cancellation check evaluated before each step.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(steps = plan.steps().len()))
)]
pub fn execute_plan_with<E, F>(
    plan: &MovementPlan,
    executor: &mut E,
    cache: &mut PositionCache,
    mut should_continue: F,
) -> Result<ExecutionReport, ExecuteError>
where
    E: MoveExecutor + ?Sized,
    F: FnMut(usize) -> bool,
{
    let mut report = ExecutionReport::default();
    for (step, moves) in plan.steps().iter().enumerate() {
        if !should_continue(step) {
            info!("execution cancelled before step {step}");
            return Err(ExecuteError::Cancelled {
                step,
                completed: report,
            });
        }
        for planned in moves.moves() {
            run_move(planned, executor, cache).map_err(|source| {
                warn!("step {step} failed for {}: {source}", planned.device);
                ExecuteError::Hardware {
                    step,
                    device: planned.device,
                    source,
                    completed: report.clone(),
                }
            })?;
            report.moves_completed += 1;
        }
        report.steps_completed += 1;
    }
    info!(
        "plan executed: {} steps, {} moves",
        report.steps_completed, report.moves_completed
    );
    Ok(report)
}

fn run_move<E: MoveExecutor + ?Sized>(
    planned: &PlannedMove,
    executor: &mut E,
    cache: &mut PositionCache,
) -> Result<(), HardwareMoveError> {
    match executor.move_to(planned.device, planned.device_target) {
        Ok(achieved) => {
            cache.set(planned.device, achieved);
            Ok(())
        }
        Err(err) => {
            // a failed move may still have travelled part of the way
            match executor.current_position(planned.device) {
                Ok(actual) => cache.set(planned.device, actual),
                Err(read) => warn!("{}: position unknown after failure: {read}", planned.device),
            }
            Err(err)
        }
    }
}
