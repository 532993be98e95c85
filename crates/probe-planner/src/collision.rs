//! Trajectory collision detection for one batch of moves.
//!
//! Every requested device is swept along the straight line from its cached
//! position to its target; at each sample its footprint is tested against
//! the stationary footprint of every other device at that device's cached
//! position. This is deliberately approximate: discrete sampling, straight
//! lines, and footprints that translate without rotating.

use crate::calibration::CalibrationStore;
use crate::footprint::{Footprint, FootprintStore, FOOTPRINT_CORNERS};
use crate::params::PlannerParams;
use crate::position::PositionCache;
use log::{debug, warn};
use probe_planner_core::{
    linear_trajectory, polygons_collide, Aabb, DeviceCoord, DeviceId, ImagePoint,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Target image point per device for one batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoveRequest {
    targets: BTreeMap<DeviceId, ImagePoint>,
}

impl MoveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, device: DeviceId, target: ImagePoint) -> Self {
        self.insert(device, target);
        self
    }

    pub fn insert(&mut self, device: DeviceId, target: ImagePoint) -> Option<ImagePoint> {
        self.targets.insert(device, target)
    }

    pub fn get(&self, device: DeviceId) -> Option<ImagePoint> {
        self.targets.get(&device).copied()
    }

    /// Requested devices in ascending id order.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.targets.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, ImagePoint)> + '_ {
        self.targets.iter().map(|(id, p)| (*id, *p))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromIterator<(DeviceId, ImagePoint)> for MoveRequest {
    fn from_iter<T: IntoIterator<Item = (DeviceId, ImagePoint)>>(iter: T) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// A requested device that cannot be planned.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("{device} has no calibration")]
    MissingCalibration { device: DeviceId },
    #[error("{device} has no cached position")]
    MissingPosition { device: DeviceId },
    #[error("{device} cached position is {age_s:.1}s old")]
    StalePosition { device: DeviceId, age_s: f64 },
    #[error("{device} has no footprint")]
    MissingFootprint { device: DeviceId },
    #[error("{device} target is not a finite image point")]
    InvalidTarget { device: DeviceId },
}

impl ConfigurationError {
    pub fn device(&self) -> DeviceId {
        match *self {
            ConfigurationError::MissingCalibration { device }
            | ConfigurationError::MissingPosition { device }
            | ConfigurationError::StalePosition { device, .. }
            | ConfigurationError::MissingFootprint { device }
            | ConfigurationError::InvalidTarget { device } => device,
        }
    }
}

/// Unordered pair of conflicting devices, stored with `low < high`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollisionPair {
    low: DeviceId,
    high: DeviceId,
}

impl CollisionPair {
    pub fn new(a: DeviceId, b: DeviceId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn devices(&self) -> (DeviceId, DeviceId) {
        (self.low, self.high)
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.low == device || self.high == device
    }
}

impl fmt::Display for CollisionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// Classification of one batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionReport {
    pub pairs: BTreeSet<CollisionPair>,
    pub unresolvable: Vec<ConfigurationError>,
}

impl CollisionReport {
    /// No unresolvable devices and no conflicts.
    pub fn is_clear(&self) -> bool {
        self.pairs.is_empty() && self.unresolvable.is_empty()
    }
}

/// Resolved start of one requested move.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedMove<'f> {
    pub device: DeviceId,
    pub start: ImagePoint,
    pub target: ImagePoint,
    pub device_target: DeviceCoord,
    pub footprint: Option<&'f Footprint>,
}

/// Tip image position for every device with both a calibration and a
/// cached position.
pub type Placements = BTreeMap<DeviceId, ImagePoint>;

/// Sweeps trajectories against stationary footprints.
///
/// Borrows the stores and the cache; it never mutates them.
pub struct CollisionDetector<'a> {
    calibrations: &'a CalibrationStore,
    footprints: &'a FootprintStore,
    positions: &'a PositionCache,
    params: &'a PlannerParams,
}

impl<'a> CollisionDetector<'a> {
    pub fn new(
        calibrations: &'a CalibrationStore,
        footprints: &'a FootprintStore,
        positions: &'a PositionCache,
        params: &'a PlannerParams,
    ) -> Self {
        Self {
            calibrations,
            footprints,
            positions,
            params,
        }
    }

    pub fn params(&self) -> &PlannerParams {
        self.params
    }

    pub fn calibrations(&self) -> &CalibrationStore {
        self.calibrations
    }

    /// Current tip positions in image space of all placeable devices.
    pub fn placements(&self) -> Placements {
        self.positions
            .all()
            .into_iter()
            .filter_map(|(device, coord)| {
                self.calibrations
                    .to_image(device, coord)
                    .map(|p| (device, p))
            })
            .collect()
    }

    /// Validate one requested move and resolve its image-space start.
    pub(crate) fn resolve(
        &self,
        device: DeviceId,
        target: ImagePoint,
        now: SystemTime,
    ) -> Result<ResolvedMove<'a>, ConfigurationError> {
        if !target.is_finite() {
            return Err(ConfigurationError::InvalidTarget { device });
        }
        let calibration = self
            .calibrations
            .get(device)
            .ok_or(ConfigurationError::MissingCalibration { device })?;
        let entry = self
            .positions
            .get_entry(device)
            .ok_or(ConfigurationError::MissingPosition { device })?;
        if let Some(max_age) = self.params.max_position_age() {
            let age = entry.age(now);
            if age > max_age {
                return Err(ConfigurationError::StalePosition {
                    device,
                    age_s: age.as_secs_f64(),
                });
            }
        }
        let footprint = self.footprints.get(device);
        if footprint.is_none() && self.params.require_footprints {
            return Err(ConfigurationError::MissingFootprint { device });
        }
        Ok(ResolvedMove {
            device,
            start: calibration.to_image(entry.coord),
            target,
            device_target: calibration.to_device(target),
            footprint,
        })
    }

    /// Resolve every requested move; failures are returned separately.
    pub(crate) fn resolve_all(
        &self,
        request: &MoveRequest,
    ) -> (Vec<ResolvedMove<'a>>, Vec<ConfigurationError>) {
        let now = SystemTime::now();
        let mut resolved = Vec::with_capacity(request.len());
        let mut unresolvable = Vec::new();
        for (device, target) in request.iter() {
            match self.resolve(device, target, now) {
                Ok(m) => resolved.push(m),
                Err(err) => {
                    warn!("{err}");
                    unresolvable.push(err);
                }
            }
        }
        (resolved, unresolvable)
    }

    /// Classify a batch: which pairs conflict, and which devices cannot be
    /// planned at all.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, request), fields(devices = request.len()))
    )]
    pub fn detect(&self, request: &MoveRequest) -> CollisionReport {
        let (resolved, unresolvable) = self.resolve_all(request);
        CollisionReport {
            pairs: self.collisions(&resolved, &self.placements()),
            unresolvable,
        }
    }

    /// Conflicting pairs when every move in `moves` starts from `world`.
    pub(crate) fn collisions(
        &self,
        moves: &[ResolvedMove<'_>],
        world: &Placements,
    ) -> BTreeSet<CollisionPair> {
        let mut pairs = BTreeSet::new();
        for m in moves {
            for other in self.sweep(m, world, false) {
                let pair = CollisionPair::new(m.device, other);
                debug!("collision {pair} while moving {}", m.device);
                pairs.insert(pair);
            }
        }
        pairs
    }

    /// Devices whose stationary footprint (at `world`) is hit by `m`'s
    /// footprint travelling `m.start → m.target`.
    ///
    /// With `first_only` the sweep stops at the first hit.
    pub(crate) fn sweep(
        &self,
        m: &ResolvedMove<'_>,
        world: &Placements,
        first_only: bool,
    ) -> Vec<DeviceId> {
        let Some(footprint) = m.footprint else {
            debug!("{} has no footprint; not checked", m.device);
            return Vec::new();
        };

        let trajectory = linear_trajectory(m.start, m.target, self.params.trajectory_samples);
        let swept = swept_bounds(footprint, &trajectory);

        let mut hits = Vec::new();
        for (&other, &tip) in world {
            if other == m.device {
                continue;
            }
            let Some(obstacle) = self.footprints.absolute_footprint(other, tip) else {
                continue;
            };
            if let (Some(swept), Some(ob)) = (swept, Aabb::from_points(&obstacle)) {
                if !swept.overlaps(&ob) {
                    continue;
                }
            }
            if trajectory_hits(footprint, &trajectory, &obstacle) {
                hits.push(other);
                if first_only {
                    break;
                }
            }
        }
        hits
    }

    /// `true` if `device` can travel `start → end` without touching any
    /// other device placed according to `obstacles`.
    ///
    /// A device without a footprint always has a clear path.
    pub fn path_is_clear(
        &self,
        device: DeviceId,
        start: ImagePoint,
        end: ImagePoint,
        obstacles: &Placements,
    ) -> bool {
        let m = ResolvedMove {
            device,
            start,
            target: end,
            device_target: DeviceCoord::default(),
            footprint: self.footprints.get(device),
        };
        self.sweep(&m, obstacles, true).is_empty()
    }
}

fn trajectory_hits(
    footprint: &Footprint,
    trajectory: &[ImagePoint],
    obstacle: &[ImagePoint; FOOTPRINT_CORNERS],
) -> bool {
    trajectory
        .iter()
        .any(|&tip| polygons_collide(&footprint.at(tip), obstacle))
}

/// Bounding rectangle of the footprint over the whole trajectory.
fn swept_bounds(footprint: &Footprint, trajectory: &[ImagePoint]) -> Option<Aabb> {
    let first = *trajectory.first()?;
    let last = *trajectory.last()?;
    let mut corners = Vec::with_capacity(2 * FOOTPRINT_CORNERS);
    corners.extend(footprint.at(first));
    corners.extend(footprint.at(last));
    Aabb::from_points(&corners)
}
