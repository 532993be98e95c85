//! Owned snapshot of planner state for visualisation threads.

use crate::calibration::CalibrationStore;
use crate::collision::MoveRequest;
use crate::footprint::{FootprintStore, FOOTPRINT_CORNERS};
use crate::position::PositionCache;
use probe_planner_core::{DeviceId, ImagePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a renderer needs to draw one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceOverlay {
    pub device: DeviceId,
    /// Tip in image space; `None` without a calibration or cached position.
    pub tip: Option<ImagePoint>,
    /// Absolute footprint at `tip`.
    pub footprint: Option<[ImagePoint; FOOTPRINT_CORNERS]>,
    /// Pending target, for drawing the planned trajectory.
    pub target: Option<ImagePoint>,
}

/// Copy of everything drawable, taken in one go so a render never holds
/// a borrow of the live stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub devices: Vec<DeviceOverlay>,
}

impl OverlaySnapshot {
    pub fn capture(
        calibrations: &CalibrationStore,
        footprints: &FootprintStore,
        cache: &PositionCache,
    ) -> Self {
        let known: BTreeSet<DeviceId> = calibrations
            .devices()
            .chain(footprints.devices())
            .chain(cache.all().into_keys())
            .collect();

        let devices = known
            .into_iter()
            .map(|device| {
                let tip = cache
                    .get(device)
                    .and_then(|coord| calibrations.get(device).map(|c| c.to_image(coord)));
                DeviceOverlay {
                    device,
                    tip,
                    footprint: tip.and_then(|t| footprints.absolute_footprint(device, t)),
                    target: None,
                }
            })
            .collect();
        Self { devices }
    }

    /// Attach pending targets; devices only present in `request` are added.
    pub fn with_targets(mut self, request: &MoveRequest) -> Self {
        for (device, target) in request.iter() {
            match self.devices.iter_mut().find(|d| d.device == device) {
                Some(entry) => entry.target = Some(target),
                None => self.devices.push(DeviceOverlay {
                    device,
                    tip: None,
                    footprint: None,
                    target: Some(target),
                }),
            }
        }
        self.devices.sort_by_key(|d| d.device);
        self
    }

    pub fn get(&self, device: DeviceId) -> Option<&DeviceOverlay> {
        self.devices.iter().find(|d| d.device == device)
    }
}
