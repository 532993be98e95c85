//! Collision-safe planning for several manipulators sharing one camera view.
//!
//! Every device gets an affine calibration from its own motion coordinates
//! into the image, and a footprint polygon carried rigidly with its tip.
//! A batch of image-space targets is then:
//!
//! 1. classified by [`CollisionDetector`], which sweeps each straight-line
//!    trajectory against the stationary footprints of every other device;
//! 2. turned into a [`MovementPlan`] by [`MovementSequencer`]: one
//!    simultaneous step when nothing conflicts, otherwise the first
//!    collision-free one-at-a-time ordering, otherwise a refusal;
//! 3. executed step by step through a [`MoveExecutor`], updating the
//!    [`PositionCache`] after every completed move.
//!
//! ```
//! use probe_planner::{
//!     CalibrationStore, CollisionDetector, Correspondence, FootprintStore, MoveRequest,
//!     MovementSequencer, PlanOutcome, PlannerParams, PositionCache,
//! };
//! use probe_planner_core::{DeviceCoord, DeviceId, ImagePoint};
//!
//! let m1 = DeviceId::new(1).unwrap();
//! let mut calibrations = CalibrationStore::new();
//! calibrations
//!     .calibrate(
//!         m1,
//!         &[
//!             Correspondence::new(DeviceCoord::new(0.0, 0.0), ImagePoint::new(5.0, 5.0)),
//!             Correspondence::new(DeviceCoord::new(10.0, 0.0), ImagePoint::new(15.0, 5.0)),
//!             Correspondence::new(DeviceCoord::new(0.0, 10.0), ImagePoint::new(5.0, 15.0)),
//!         ],
//!     )
//!     .unwrap();
//! let mut cache = PositionCache::new();
//! cache.set(m1, DeviceCoord::new(0.0, 0.0));
//! let footprints = FootprintStore::new();
//! let params = PlannerParams::default();
//!
//! let detector = CollisionDetector::new(&calibrations, &footprints, &cache, &params);
//! let request = MoveRequest::new().with(m1, ImagePoint::new(50.0, 50.0));
//! let outcome = MovementSequencer::new(detector).plan_request(&request);
//! assert!(matches!(outcome, PlanOutcome::Direct { .. }));
//! ```

mod calibration;
mod collaborators;
mod collision;
mod executor;
mod footprint;
pub mod io;
mod overlay;
mod params;
mod position;
pub mod procedure;
mod sequencer;
mod session;

pub use calibration::{Calibration, CalibrationStore, Correspondence};
pub use collaborators::{
    AffinePositioning, DeviceEnumerator, PickRequest, PickResponse, PointPicker,
    PositioningCollaborator, SamplePoint, ScriptedPicker,
};
pub use collision::{
    CollisionDetector, CollisionPair, CollisionReport, ConfigurationError, MoveRequest,
    Placements,
};
pub use executor::{
    execute_plan, execute_plan_with, DriverCommand, ExecuteError, ExecutionReport,
    HardwareMoveError, ManipulatorDriver, MockManipulator, MoveExecutor, TwoPhaseExecutor,
    MOCK_MAX_SPEED, MOCK_TRAVEL_MAX, MOCK_TRAVEL_MIN,
};
pub use footprint::{Footprint, FootprintStore, FOOTPRINT_CORNERS};
pub use io::{IoError, PlanReport, ScenarioConfig, TargetSpec};
pub use overlay::{DeviceOverlay, OverlaySnapshot};
pub use params::{ExecutorParams, PlannerParams};
pub use position::{CachedPosition, PositionCache};
pub use procedure::{
    run_calibration, run_footprint_capture, CalibrationSequence, FootprintCapture,
    ProcedureError,
};
pub use sequencer::{MovementPlan, MovementSequencer, PlanOutcome, PlanStep, PlannedMove, Refusal};
pub use session::{MoveSession, SessionError};
