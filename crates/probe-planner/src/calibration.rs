//! Per-device affine calibration between device space and image space.

use log::{debug, info};
use probe_planner_core::{
    affine_from_3pt, AffineTransform, DeviceCoord, DeviceId, GeometryError, ImagePoint,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest accepted |det| of the linear part of a loaded transform.
const MIN_LINEAR_DET: f64 = 1e-12;

/// One device-position / clicked-image-point pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub device: DeviceCoord,
    pub image: ImagePoint,
}

impl Correspondence {
    pub fn new(device: DeviceCoord, image: ImagePoint) -> Self {
        Self { device, image }
    }
}

/// Invertible affine map DeviceCoord → ImagePoint with its inverse cached.
///
/// Only the forward matrix is serialised; the inverse is rebuilt and the
/// map re-validated on load.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationRecord", into = "CalibrationRecord")]
pub struct Calibration {
    device_to_image: AffineTransform,
    image_to_device: AffineTransform,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct CalibrationRecord {
    /// Row-major `[[a, b, tx], [c, d, ty]]`.
    device_to_image: [[f64; 3]; 2],
}

impl TryFrom<CalibrationRecord> for Calibration {
    type Error = GeometryError;

    fn try_from(record: CalibrationRecord) -> Result<Self, Self::Error> {
        Calibration::from_transform(AffineTransform::from_rows(record.device_to_image))
    }
}

impl From<Calibration> for CalibrationRecord {
    fn from(cal: Calibration) -> Self {
        Self {
            device_to_image: cal.device_to_image.to_rows(),
        }
    }
}

impl Calibration {
    /// Solve the map exactly from three correspondences.
    pub fn from_correspondences(points: &[Correspondence; 3]) -> Result<Self, GeometryError> {
        let src = points.map(|c| c.device.to_point());
        let dst = points.map(|c| c.image.to_point());
        let forward = affine_from_3pt(&src, &dst)?;
        Self::from_transform(forward)
    }

    /// Wrap an existing forward transform, rejecting singular maps.
    pub fn from_transform(device_to_image: AffineTransform) -> Result<Self, GeometryError> {
        if !device_to_image.is_finite() {
            return Err(GeometryError::NonFinite);
        }
        let det = device_to_image.determinant();
        if det.abs() < MIN_LINEAR_DET {
            return Err(GeometryError::Degenerate { det });
        }
        let image_to_device = device_to_image
            .inverse()
            .ok_or(GeometryError::Degenerate { det })?;
        Ok(Self {
            device_to_image,
            image_to_device,
        })
    }

    #[inline]
    pub fn to_image(&self, p: DeviceCoord) -> ImagePoint {
        ImagePoint::from_point(self.device_to_image.apply(p.to_point()))
    }

    #[inline]
    pub fn to_device(&self, p: ImagePoint) -> DeviceCoord {
        DeviceCoord::from_point(self.image_to_device.apply(p.to_point()))
    }

    pub fn device_to_image(&self) -> &AffineTransform {
        &self.device_to_image
    }

    pub fn image_to_device(&self) -> &AffineTransform {
        &self.image_to_device
    }
}

/// Calibrations keyed by device. Serialises as a JSON object
/// `{ "<id>": { "device_to_image": [[..], [..]] } }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationStore {
    calibrations: BTreeMap<DeviceId, Calibration>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a calibration from three correspondences and install it for
    /// `device`, replacing any previous one.
    ///
    /// On error the store is left untouched.
    pub fn calibrate(
        &mut self,
        device: DeviceId,
        correspondences: &[Correspondence; 3],
    ) -> Result<Calibration, GeometryError> {
        let cal = Calibration::from_correspondences(correspondences)?;
        if self.insert(device, cal).is_some() {
            info!("replaced calibration for {device}");
        } else {
            info!("calibrated {device}");
        }
        Ok(cal)
    }

    /// Install a fully built calibration; returns the one it replaced.
    pub fn insert(&mut self, device: DeviceId, calibration: Calibration) -> Option<Calibration> {
        self.calibrations.insert(device, calibration)
    }

    pub fn remove(&mut self, device: DeviceId) -> Option<Calibration> {
        self.calibrations.remove(&device)
    }

    pub fn get(&self, device: DeviceId) -> Option<&Calibration> {
        self.calibrations.get(&device)
    }

    pub fn to_image(&self, device: DeviceId, p: DeviceCoord) -> Option<ImagePoint> {
        let cal = self.get(device);
        if cal.is_none() {
            debug!("no calibration for {device}");
        }
        cal.map(|c| c.to_image(p))
    }

    pub fn to_device(&self, device: DeviceId, p: ImagePoint) -> Option<DeviceCoord> {
        let cal = self.get(device);
        if cal.is_none() {
            debug!("no calibration for {device}");
        }
        cal.map(|c| c.to_device(p))
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.calibrations.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Calibration)> {
        self.calibrations.iter().map(|(id, c)| (*id, c))
    }

    pub fn len(&self) -> usize {
        self.calibrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calibrations.is_empty()
    }
}
