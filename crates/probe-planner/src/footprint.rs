//! Per-device bounding polygons stored relative to the tip.
//!
//! A footprint is captured while the device sits at a known tip position:
//! the operator marks four absolute corners and each corner is stored as an
//! offset from the tip. Placing the footprint elsewhere is a pure
//! translation. The polygon never rotates with the device pose; this is an
//! accepted simplification of the model.

use log::info;
use probe_planner_core::{anchor_polygon, DeviceId, GeometryError, ImageOffset, ImagePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of corners in every footprint polygon.
pub const FOOTPRINT_CORNERS: usize = 4;

/// Four corner offsets from the device tip, in polygon order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Footprint {
    offsets: [ImageOffset; FOOTPRINT_CORNERS],
}

impl Footprint {
    pub fn from_offsets(offsets: [ImageOffset; FOOTPRINT_CORNERS]) -> Self {
        Self { offsets }
    }

    /// Convert absolute corners into offsets from `reference_point`.
    ///
    /// Self-intersection is not checked; corners must be supplied in
    /// perimeter order.
    pub fn from_corners(
        absolute_corners: &[ImagePoint],
        reference_point: ImagePoint,
    ) -> Result<Self, GeometryError> {
        let corners: &[ImagePoint; FOOTPRINT_CORNERS] =
            absolute_corners
                .try_into()
                .map_err(|_| GeometryError::CornerCount {
                    expected: FOOTPRINT_CORNERS,
                    got: absolute_corners.len(),
                })?;
        if !reference_point.is_finite() || corners.iter().any(|c| !c.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        Ok(Self {
            offsets: corners.map(|c| c - reference_point),
        })
    }

    pub fn offsets(&self) -> &[ImageOffset; FOOTPRINT_CORNERS] {
        &self.offsets
    }

    /// Footprint polygon with the tip placed at `tip`.
    pub fn at(&self, tip: ImagePoint) -> [ImagePoint; FOOTPRINT_CORNERS] {
        anchor_polygon(&self.offsets, tip)
    }
}

/// Footprints keyed by device; serialises as
/// `{ "<id>": [{ "dx": .., "dy": .. }, ..4] }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FootprintStore {
    footprints: BTreeMap<DeviceId, Footprint>,
}

impl FootprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the footprint for `device` from four absolute image corners
    /// captured while the tip was at `reference_point`.
    pub fn set_footprint(
        &mut self,
        device: DeviceId,
        absolute_corners: &[ImagePoint],
        reference_point: ImagePoint,
    ) -> Result<(), GeometryError> {
        let footprint = Footprint::from_corners(absolute_corners, reference_point)?;
        self.insert(device, footprint);
        info!("footprint set for {device}");
        Ok(())
    }

    pub fn insert(&mut self, device: DeviceId, footprint: Footprint) -> Option<Footprint> {
        self.footprints.insert(device, footprint)
    }

    /// Returns `true` if a footprint existed.
    pub fn clear_footprint(&mut self, device: DeviceId) -> bool {
        self.footprints.remove(&device).is_some()
    }

    /// Returns the number of footprints removed.
    pub fn clear_all(&mut self) -> usize {
        let n = self.footprints.len();
        self.footprints.clear();
        n
    }

    pub fn get(&self, device: DeviceId) -> Option<&Footprint> {
        self.footprints.get(&device)
    }

    pub fn absolute_footprint(
        &self,
        device: DeviceId,
        tip_position: ImagePoint,
    ) -> Option<[ImagePoint; FOOTPRINT_CORNERS]> {
        self.get(device).map(|f| f.at(tip_position))
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.footprints.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }
}
