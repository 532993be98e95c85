//! Seams to the systems around the planner: sample positioning, hardware
//! enumeration and operator point picking.

use crate::executor::HardwareMoveError;
use probe_planner_core::{AffineTransform, DeviceId, ImagePoint};
use serde::{Deserialize, Serialize};

/// A logical location on the sample, e.g. a measurement site on a chip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub x: f64,
    pub y: f64,
}

impl SamplePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { label: None, x, y }
    }

    pub fn labelled(label: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            label: Some(label.into()),
            x,
            y,
        }
    }
}

/// Converts sample-space points into the image frame.
pub trait PositioningCollaborator {
    /// `None` when the point cannot be located (e.g. no registration yet).
    fn sample_point_to_image(&self, point: &SamplePoint) -> Option<ImagePoint>;
}

/// Positioning through a fixed sample → image affine registration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffinePositioning {
    pub sample_to_image: AffineTransform,
}

impl AffinePositioning {
    pub fn new(sample_to_image: AffineTransform) -> Self {
        Self { sample_to_image }
    }
}

impl PositioningCollaborator for AffinePositioning {
    fn sample_point_to_image(&self, point: &SamplePoint) -> Option<ImagePoint> {
        let p = ImagePoint::new(point.x, point.y);
        if !p.is_finite() {
            return None;
        }
        let mapped = ImagePoint::from_point(self.sample_to_image.apply(p.to_point()));
        mapped.is_finite().then_some(mapped)
    }
}

/// Reports which device slots are physically present.
pub trait DeviceEnumerator {
    fn active_devices(&mut self) -> Result<Vec<DeviceId>, HardwareMoveError>;
}

/// What the operator is asked to mark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickRequest {
    pub device: DeviceId,
    pub count: usize,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickResponse {
    Points(Vec<ImagePoint>),
    Cancelled,
}

/// Operator interaction for marking points on the image.
pub trait PointPicker {
    fn request_points(&mut self, request: &PickRequest) -> PickResponse;
}

/// Picker that replays prepared responses in order; cancels once drained.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPicker {
    responses: std::collections::VecDeque<PickResponse>,
    requests: Vec<PickRequest>,
}

impl ScriptedPicker {
    pub fn new(responses: impl IntoIterator<Item = PickResponse>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            requests: Vec::new(),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> &[PickRequest] {
        &self.requests
    }
}

impl PointPicker for ScriptedPicker {
    fn request_points(&mut self, request: &PickRequest) -> PickResponse {
        self.requests.push(request.clone());
        self.responses.pop_front().unwrap_or(PickResponse::Cancelled)
    }
}
