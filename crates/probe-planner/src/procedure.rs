//! Operator-driven setup procedures: calibration and footprint capture.
//!
//! Both run against the hardware boundary and a [`PointPicker`]; neither
//! touches the stores unless the whole procedure succeeds.

use crate::calibration::{Calibration, CalibrationStore, Correspondence};
use crate::collaborators::{PickRequest, PickResponse, PointPicker};
use crate::executor::{HardwareMoveError, MoveExecutor};
use crate::footprint::{Footprint, FootprintStore, FOOTPRINT_CORNERS};
use crate::position::PositionCache;
use log::{debug, info};
use probe_planner_core::{DeviceCoord, DeviceId, GeometryError, ImagePoint};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum ProcedureError {
    #[error("procedure cancelled by operator")]
    Cancelled,
    #[error("expected {expected} picked point(s), got {got}")]
    PickCount { expected: usize, got: usize },
    #[error("{0} has no calibration")]
    MissingCalibration(DeviceId),
    #[error(transparent)]
    Hardware(#[from] HardwareMoveError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

fn default_relative_moves() -> [[f64; 2]; 3] {
    [[0.0, 0.0], [3000.0, 0.0], [0.0, 3000.0]]
}

/// Device-space moves of the calibration procedure.
///
/// Each move is relative to where the previous one ended, so the default
/// visits the origin of the run, then +X, then +X+Y.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSequence {
    #[serde(default = "default_relative_moves")]
    pub relative_moves: [[f64; 2]; 3],
}

impl Default for CalibrationSequence {
    fn default() -> Self {
        Self {
            relative_moves: default_relative_moves(),
        }
    }
}

/// How the operator outlines a footprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FootprintCapture {
    /// Two opposite corners of an axis-aligned box.
    #[default]
    OppositeCorners,
    /// All four corners in perimeter order.
    Polygon,
}

impl FootprintCapture {
    fn pick_count(self) -> usize {
        match self {
            FootprintCapture::OppositeCorners => 2,
            FootprintCapture::Polygon => FOOTPRINT_CORNERS,
        }
    }
}

/// Calibrate `device`: make three relative moves, ask the operator to mark
/// the tip after each, and solve the affine map from the achieved
/// positions to the marked points.
///
/// The position cache follows every completed move. The calibration store
/// changes only on success.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(sequence, executor, picker, store, cache))
)]
pub fn run_calibration<E, P>(
    device: DeviceId,
    sequence: &CalibrationSequence,
    executor: &mut E,
    picker: &mut P,
    store: &mut CalibrationStore,
    cache: &mut PositionCache,
) -> Result<Calibration, ProcedureError>
where
    E: MoveExecutor + ?Sized,
    P: PointPicker + ?Sized,
{
    let mut position = executor.current_position(device)?;
    let mut correspondences = Vec::with_capacity(3);
    for (i, [dx, dy]) in sequence.relative_moves.iter().enumerate() {
        let target = DeviceCoord::new(position.x + dx, position.y + dy);
        position = executor.move_to(device, target)?;
        cache.set(device, position);

        let request = PickRequest {
            device,
            count: 1,
            prompt: format!("mark the tip of {device} ({}/3)", i + 1),
        };
        let image = pick(picker, &request)?[0];
        debug!(
            "{device} at ({:.1}, {:.1}) marked at ({:.1}, {:.1})",
            position.x, position.y, image.x, image.y
        );
        correspondences.push(Correspondence::new(position, image));
    }

    let points: [Correspondence; 3] =
        correspondences
            .try_into()
            .map_err(|v: Vec<_>| ProcedureError::PickCount {
                expected: 3,
                got: v.len(),
            })?;
    Ok(store.calibrate(device, &points)?)
}

/// Capture the footprint of `device` around its current tip position.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(executor, picker, calibrations, footprints, cache))
)]
pub fn run_footprint_capture<E, P>(
    device: DeviceId,
    mode: FootprintCapture,
    executor: &mut E,
    picker: &mut P,
    calibrations: &CalibrationStore,
    footprints: &mut FootprintStore,
    cache: &mut PositionCache,
) -> Result<Footprint, ProcedureError>
where
    E: MoveExecutor + ?Sized,
    P: PointPicker + ?Sized,
{
    let calibration = calibrations
        .get(device)
        .ok_or(ProcedureError::MissingCalibration(device))?;
    let coord = executor.current_position(device)?;
    cache.set(device, coord);
    let tip = calibration.to_image(coord);

    let request = PickRequest {
        device,
        count: mode.pick_count(),
        prompt: match mode {
            FootprintCapture::OppositeCorners => {
                format!("mark two opposite corners of {device}")
            }
            FootprintCapture::Polygon => format!("mark the four corners of {device}"),
        },
    };
    let picked = pick(picker, &request)?;
    let corners = match mode {
        FootprintCapture::OppositeCorners => box_corners(picked[0], picked[1]).to_vec(),
        FootprintCapture::Polygon => picked,
    };

    let footprint = Footprint::from_corners(&corners, tip)?;
    footprints.insert(device, footprint);
    info!("footprint captured for {device}");
    Ok(footprint)
}

fn pick<P: PointPicker + ?Sized>(
    picker: &mut P,
    request: &PickRequest,
) -> Result<Vec<ImagePoint>, ProcedureError> {
    match picker.request_points(request) {
        PickResponse::Cancelled => {
            info!("{} cancelled by operator", request.device);
            Err(ProcedureError::Cancelled)
        }
        PickResponse::Points(points) if points.len() != request.count => {
            Err(ProcedureError::PickCount {
                expected: request.count,
                got: points.len(),
            })
        }
        PickResponse::Points(points) => {
            if points.iter().any(|p| !p.is_finite()) {
                return Err(GeometryError::NonFinite.into());
            }
            Ok(points)
        }
    }
}

/// Axis-aligned rectangle through two opposite corners, in perimeter order.
fn box_corners(a: ImagePoint, b: ImagePoint) -> [ImagePoint; FOOTPRINT_CORNERS] {
    let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
    let (y0, y1) = (a.y.min(b.y), a.y.max(b.y));
    [
        ImagePoint::new(x0, y0),
        ImagePoint::new(x1, y0),
        ImagePoint::new(x1, y1),
        ImagePoint::new(x0, y1),
    ]
}
