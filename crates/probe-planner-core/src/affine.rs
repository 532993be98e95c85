use crate::GeometryError;
use nalgebra::{Matrix2, Matrix3, Point2, SMatrix, SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Absolute determinant threshold in Hartley-normalised coordinates below
/// which three points are considered collinear.
pub const DEGENERACY_EPS: f64 = 1e-9;

/// 2×3 affine map `p' = A p + t`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub linear: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl AffineTransform {
    pub fn new(linear: Matrix2<f64>, translation: Vector2<f64>) -> Self {
        Self {
            linear,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Matrix2::identity(), Vector2::zeros())
    }

    /// Build from row-major `[[a, b, tx], [c, d, ty]]`.
    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        Self::new(
            Matrix2::new(rows[0][0], rows[0][1], rows[1][0], rows[1][1]),
            Vector2::new(rows[0][2], rows[1][2]),
        )
    }

    pub fn to_rows(&self) -> [[f64; 3]; 2] {
        [
            [
                self.linear[(0, 0)],
                self.linear[(0, 1)],
                self.translation[0],
            ],
            [
                self.linear[(1, 0)],
                self.linear[(1, 1)],
                self.translation[1],
            ],
        ]
    }

    fn to_homogeneous(self) -> Matrix3<f64> {
        let r = self.to_rows();
        Matrix3::new(
            r[0][0], r[0][1], r[0][2], //
            r[1][0], r[1][1], r[1][2], //
            0.0, 0.0, 1.0,
        )
    }

    fn from_homogeneous(h: &Matrix3<f64>) -> Self {
        Self::from_rows([
            [h[(0, 0)], h[(0, 1)], h[(0, 2)]],
            [h[(1, 0)], h[(1, 1)], h[(1, 2)]],
        ])
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::from(self.linear * p.coords + self.translation)
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        self.linear.determinant()
    }

    /// Invert the 2×2 linear part and solve for the translation:
    /// `p = A⁻¹ p' − A⁻¹ t`.
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.linear.try_inverse()?;
        Some(Self::new(inv, -(inv * self.translation)))
    }

    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|v| v.is_finite()) && self.translation.iter().all(|v| v.is_finite())
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points3(pts: &[Point2<f64>; 3]) -> ([Point2<f64>; 3], Matrix3<f64>) {
    let n = 3.0_f64;
    let (cx, cy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (cx / n, cy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let out = pts.map(|p| {
        let v = t * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0], v[1])
    });
    (out, t)
}

/// Signed area factor of the triangle `p0 p1 p2` (twice the area).
fn triangle_det(pts: &[Point2<f64>; 3]) -> f64 {
    let u = pts[1] - pts[0];
    let v = pts[2] - pts[0];
    u.x * v.y - u.y * v.x
}

/// Compute A, t such that `dst = A * src + t` exactly, from 3 point
/// correspondences.
///
/// Fails with [`GeometryError::Degenerate`] when the `src` points are
/// collinear or coincide, and with [`GeometryError::NonFinite`] on NaN/inf
/// input.
pub fn affine_from_3pt(
    src: &[Point2<f64>; 3],
    dst: &[Point2<f64>; 3],
) -> Result<AffineTransform, GeometryError> {
    if src
        .iter()
        .chain(dst.iter())
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(GeometryError::NonFinite);
    }

    let (src_n, t_src) = normalize_points3(src);
    let (dst_n, t_dst) = normalize_points3(dst);

    let det = triangle_det(&src_n);
    if det.abs() < DEGENERACY_EPS {
        return Err(GeometryError::Degenerate { det });
    }

    // Unknowns: [a b tx c d ty]
    // a x + b y + tx = u
    // c x + d y + ty = v
    let mut a = SMatrix::<f64, 6, 6>::zeros();
    let mut b = SVector::<f64, 6>::zeros();

    for k in 0..3 {
        let x = src_n[k].x;
        let y = src_n[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        b[r0] = dst_n[k].x;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        b[r1] = dst_n[k].y;
    }

    let x = a
        .lu()
        .solve(&b)
        .ok_or(GeometryError::Degenerate { det })?;

    let hn = AffineTransform::from_rows([[x[0], x[1], x[2]], [x[3], x[4], x[5]]]);

    // Denormalize: H = Td^{-1} * Hn * Ts
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or(GeometryError::Degenerate { det })?;
    let full = t_dst_inv * hn.to_homogeneous() * t_src;

    Ok(AffineTransform::from_homogeneous(&full))
}
