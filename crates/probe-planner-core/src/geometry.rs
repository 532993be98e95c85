//! Point and polygon primitives in image space.
//!
//! Everything here is a pure function. Polygons are slices of vertices in
//! order, implicitly closed. Callers must not pass polygons with fewer than
//! three vertices; degenerate input simply never reports containment.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Moves shorter than this (in image pixels) are treated as stationary.
pub const MIN_MOTION: f64 = 0.01;

/// Point in the shared image frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePoint {
    pub x: f64,
    pub y: f64,
}

/// Image-space displacement, e.g. a footprint corner relative to the tip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOffset {
    pub dx: f64,
    pub dy: f64,
}

/// Point in one manipulator's native motion frame.
///
/// There is deliberately no conversion to [`ImagePoint`] on this type; use a
/// calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCoord {
    pub x: f64,
    pub y: f64,
}

impl ImagePoint {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn to_point(self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    #[inline]
    pub fn from_point(p: Point2<f64>) -> Self {
        Self::new(p.x, p.y)
    }

    /// Linear interpolation `self + t * (other - self)`.
    #[inline]
    pub fn lerp(self, other: ImagePoint, t: f64) -> ImagePoint {
        ImagePoint::new(
            self.x + t * (other.x - self.x),
            self.y + t * (other.y - self.y),
        )
    }

    #[inline]
    pub fn distance(self, other: ImagePoint) -> f64 {
        (other.to_point() - self.to_point()).norm()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl ImageOffset {
    #[inline]
    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    #[inline]
    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.dx, self.dy)
    }
}

impl DeviceCoord {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn to_point(self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    #[inline]
    pub fn from_point(p: Point2<f64>) -> Self {
        Self::new(p.x, p.y)
    }

    #[inline]
    pub fn distance(self, other: DeviceCoord) -> f64 {
        (other.to_point() - self.to_point()).norm()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add<ImageOffset> for ImagePoint {
    type Output = ImagePoint;

    fn add(self, rhs: ImageOffset) -> ImagePoint {
        ImagePoint::new(self.x + rhs.dx, self.y + rhs.dy)
    }
}

impl Sub for ImagePoint {
    type Output = ImageOffset;

    fn sub(self, rhs: ImagePoint) -> ImageOffset {
        ImageOffset::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Axis-aligned bounding rectangle used as a cheap pre-filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: ImagePoint,
    pub max: ImagePoint,
}

impl Aabb {
    /// Bounding rectangle of `points`, `None` when empty.
    pub fn from_points(points: &[ImagePoint]) -> Option<Self> {
        let first = *points.first()?;
        let mut min = first;
        let mut max = first;
        for p in &points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Self { min, max })
    }

    /// Inclusive overlap test; touching rectangles overlap.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        !(self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y)
    }
}

/// Ray-casting parity test.
///
/// Boundary points are resolved by the half-open edge rule, so a point on
/// a shared edge is inside exactly one of two adjacent polygons.
pub fn point_in_polygon(p: ImagePoint, polygon: &[ImagePoint]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

fn orientation(a: ImagePoint, b: ImagePoint, c: ImagePoint) -> Orientation {
    let val = (b.y - a.y) * (c.x - b.x) - (b.x - a.x) * (c.y - b.y);
    if val > 0.0 {
        Orientation::Clockwise
    } else if val < 0.0 {
        Orientation::CounterClockwise
    } else {
        Orientation::Collinear
    }
}

/// True if `q` lies within the bounding box of segment `p`–`r`.
/// Only meaningful when the three points are collinear.
fn on_segment(p: ImagePoint, q: ImagePoint, r: ImagePoint) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// Segment `a1`–`a2` against segment `b1`–`b2`, including touching
/// endpoints and collinear overlap.
pub fn segments_intersect(a1: ImagePoint, a2: ImagePoint, b1: ImagePoint, b2: ImagePoint) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == Orientation::Collinear && on_segment(a1, b1, a2))
        || (o2 == Orientation::Collinear && on_segment(a1, b2, a2))
        || (o3 == Orientation::Collinear && on_segment(b1, a1, b2))
        || (o4 == Orientation::Collinear && on_segment(b1, a2, b2))
}

/// Polygon overlap: a vertex of either polygon inside the other, or any
/// pair of edges crossing.
///
/// Run [`Aabb::overlaps`] first (see [`polygons_collide`]); this test is
/// `O(n·m)`.
pub fn polygons_intersect(p: &[ImagePoint], q: &[ImagePoint]) -> bool {
    if p.iter().any(|&v| point_in_polygon(v, q)) || q.iter().any(|&v| point_in_polygon(v, p)) {
        return true;
    }

    let np = p.len();
    let nq = q.len();
    for i in 0..np {
        let a1 = p[i];
        let a2 = p[(i + 1) % np];
        for j in 0..nq {
            if segments_intersect(a1, a2, q[j], q[(j + 1) % nq]) {
                return true;
            }
        }
    }
    false
}

/// Rectangle pre-filter followed by the exact polygon test.
pub fn polygons_collide(p: &[ImagePoint], q: &[ImagePoint]) -> bool {
    match (Aabb::from_points(p), Aabb::from_points(q)) {
        (Some(bp), Some(bq)) if bp.overlaps(&bq) => polygons_intersect(p, q),
        _ => false,
    }
}

/// Evenly spaced samples along the straight line `start`→`end`,
/// `t = i / (samples - 1)` for `i in 0..samples`.
///
/// A move shorter than [`MIN_MOTION`] yields only `start`. `samples` is
/// clamped to at least 2 so both endpoints are always present.
pub fn linear_trajectory(start: ImagePoint, end: ImagePoint, samples: usize) -> Vec<ImagePoint> {
    if start.distance(end) < MIN_MOTION {
        return vec![start];
    }
    let samples = samples.max(2);
    let last = (samples - 1) as f64;
    (0..samples)
        .map(|i| start.lerp(end, i as f64 / last))
        .collect()
}

/// Translate polygon offsets to an anchor point.
pub fn anchor_polygon<const N: usize>(
    offsets: &[ImageOffset; N],
    anchor: ImagePoint,
) -> [ImagePoint; N] {
    std::array::from_fn(|i| anchor + offsets[i])
}
