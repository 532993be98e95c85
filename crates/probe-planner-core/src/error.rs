/// Local geometry errors, always raised at a store boundary before any
/// state is touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("calibration points are collinear or duplicated (det={det:.3e})")]
    Degenerate { det: f64 },
    #[error("footprint needs exactly {expected} corners, got {got}")]
    CornerCount { expected: usize, got: usize },
    #[error("non-finite coordinate in input")]
    NonFinite,
}
