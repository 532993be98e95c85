//! Core types for collision-safe manipulator planning.
//!
//! This crate is intentionally small and purely geometric. It knows about
//! image space, device space and the affine maps between them, but nothing
//! about hardware, persistence or batches of moves.

mod affine;
mod device;
mod error;
mod geometry;
mod logger;

pub use affine::{affine_from_3pt, AffineTransform, DEGENERACY_EPS};
pub use device::{DeviceId, InvalidDeviceId, MAX_DEVICES};
pub use error::GeometryError;
pub use geometry::{
    anchor_polygon, linear_trajectory, point_in_polygon, polygons_collide, polygons_intersect,
    segments_intersect, Aabb, DeviceCoord, ImageOffset, ImagePoint, MIN_MOTION,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
