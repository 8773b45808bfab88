//! Geometry utilities: homographies, quad angles and shape checks
use crate::config::ShapeConfig;
use crate::error::{ArqrError, Result};
use crate::models::{Point, Quad};

/// Projective transform (3x3 matrix, bottom-right entry fixed to 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [[f64; 3]; 3],
}

impl Homography {
    /// Create the homography mapping 4 source points onto 4 destination points
    pub fn from_points(src: &[Point; 4], dst: &[Point; 4]) -> Option<Self> {
        if has_collinear_triple(src) || has_collinear_triple(dst) {
            return None;
        }

        // Direct linear transform with h33 = 1
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for i in 0..4 {
            let (sx, sy) = (src[i].x as f64, src[i].y as f64);
            let (dx, dy) = (dst[i].x as f64, dst[i].y as f64);

            let row = i * 2;
            a[row] = [sx, sy, 1.0, 0.0, 0.0, 0.0, -dx * sx, -dx * sy];
            b[row] = dx;
            a[row + 1] = [0.0, 0.0, 0.0, sx, sy, 1.0, -dy * sx, -dy * sy];
            b[row + 1] = dy;
        }

        let h = solve_linear_system(&a, &b)?;
        let homography = Self {
            m: [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]],
        };
        if homography.m.iter().flatten().all(|v| v.is_finite()) {
            Some(homography)
        } else {
            None
        }
    }

    /// Build from a row-major 3x3 matrix
    pub fn from_matrix(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    /// Row-major matrix entries
    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.m
    }

    /// Map a point; `None` if it lands on the line at infinity
    pub fn apply(&self, p: &Point) -> Option<Point> {
        self.apply_f64(p.x as f64, p.y as f64)
            .map(|(x, y)| Point::new(x as f32, y as f32))
    }

    /// Map raw coordinates in double precision
    #[inline]
    pub fn apply_f64(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.m;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < 1e-12 {
            return None;
        }
        Some((
            (m[0][0] * x + m[0][1] * y + m[0][2]) / w,
            (m[1][0] * x + m[1][1] * y + m[1][2]) / w,
        ))
    }

    /// Inverse transform, `None` when the matrix is singular
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.m;
        let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
        let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
        let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
        let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let adj = [
            [
                c00,
                m[0][2] * m[2][1] - m[0][1] * m[2][2],
                m[0][1] * m[1][2] - m[0][2] * m[1][1],
            ],
            [
                c01,
                m[0][0] * m[2][2] - m[0][2] * m[2][0],
                m[0][2] * m[1][0] - m[0][0] * m[1][2],
            ],
            [
                c02,
                m[0][1] * m[2][0] - m[0][0] * m[2][1],
                m[0][0] * m[1][1] - m[0][1] * m[1][0],
            ],
        ];
        let mut out = [[0.0f64; 3]; 3];
        for (r, row) in adj.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                out[r][c] = v * inv_det;
            }
        }
        Some(Self { m: out })
    }
}

/// Any three of the four points lie on one line (no projective basis)
fn has_collinear_triple(pts: &[Point; 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(i, j, k)| {
        let u = pts[j] - pts[i];
        let v = pts[k] - pts[i];
        let cross = (u.x as f64) * (v.y as f64) - (u.y as f64) * (v.x as f64);
        let scale = (u.norm() as f64) * (v.norm() as f64);
        cross.abs() <= 1e-6 * scale.max(1e-12)
    })
}

/// Solve 8x8 linear system using Gaussian elimination with partial pivoting
#[allow(clippy::needless_range_loop)]
fn solve_linear_system(a: &[[f64; 8]; 8], b: &[f64; 8]) -> Option<[f64; 8]> {
    let mut a = *a;
    let mut b = *b;
    let n = 8;

    for i in 0..n {
        let mut max_val = a[i][i].abs();
        let mut max_row = i;
        for k in (i + 1)..n {
            if a[k][i].abs() > max_val {
                max_val = a[k][i].abs();
                max_row = k;
            }
        }

        if max_val < 1e-10 {
            return None;
        }

        if max_row != i {
            a.swap(i, max_row);
            b.swap(i, max_row);
        }

        for k in (i + 1)..n {
            let factor = a[k][i] / a[i][i];
            b[k] -= factor * b[i];
            for j in i..n {
                a[k][j] -= factor * a[i][j];
            }
        }
    }

    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Some(x)
}

/// Angle in radians between two vectors.
///
/// Zero-length vectors have no direction and are reported as
/// [`ArqrError::DegenerateGeometry`].
pub fn angle_between(v1: &Point, v2: &Point) -> Result<f32> {
    let n1 = v1.norm();
    let n2 = v2.norm();
    if n1 <= f32::EPSILON || n2 <= f32::EPSILON {
        return Err(ArqrError::DegenerateGeometry("zero-length edge"));
    }
    // Rounding can push the cosine a hair outside [-1, 1].
    let cos = (v1.dot(v2) / (n1 * n2)).clamp(-1.0, 1.0);
    Ok(cos.acos())
}

/// Angles between consecutive edges of a closed polygon.
///
/// Edge `i` runs from point `i` to point `i + 1` (wrapping); angle `i` is taken
/// between edge `i` and edge `i + 1`.
pub fn edge_angles(points: &[Point]) -> Result<Vec<f32>> {
    let n = points.len();
    let edges: Vec<Point> = (0..n).map(|i| points[(i + 1) % n] - points[i]).collect();
    (0..n)
        .map(|i| angle_between(&edges[i], &edges[(i + 1) % n]))
        .collect()
}

/// Whether 4 points plausibly outline a rectangle or parallelogram.
///
/// The angle sum must be close to 2*pi and opposite angles close to equal.
/// Any other point count, or a zero-length edge, yields `false`.
pub fn is_plausible_quad(points: &[Point], config: &ShapeConfig) -> bool {
    if points.len() != 4 {
        return false;
    }
    let angles = match edge_angles(points) {
        Ok(angles) => angles,
        Err(_) => return false,
    };

    let sum: f32 = angles.iter().sum();
    let sum_ok = (sum - 2.0 * std::f32::consts::PI).abs() < config.angle_sum_tolerance;
    let opposite_ok = (angles[0] - angles[2]).abs() < config.opposite_angle_tolerance
        && (angles[1] - angles[3]).abs() < config.opposite_angle_tolerance;

    sum_ok && opposite_ok
}

/// Mean of a set of points
pub fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::default();
    }
    let sum = points.iter().fold(Point::default(), |acc, p| acc + *p);
    sum * (1.0 / points.len() as f32)
}

/// Signed area of a polygon (shoelace formula)
pub fn polygon_area(points: &[Point]) -> f32 {
    let n = points.len();
    let twice: f32 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

/// Corners sorted into named positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalCorners {
    /// Upper point of the left pair
    pub top_left: Point,
    /// Lower point of the left pair
    pub bottom_left: Point,
    /// Upper point of the right pair
    pub top_right: Point,
    /// Lower point of the right pair
    pub bottom_right: Point,
}

impl CanonicalCorners {
    /// Split corners into left/right pairs by x, then top/bottom by y.
    ///
    /// Heuristic: codes rotated near 45 degrees can be mislabelled, since the
    /// decoder's point order carries no orientation guarantee.
    pub fn from_quad(quad: &Quad) -> Self {
        let mut pts = *quad;
        pts.sort_by(|a, b| a.x.total_cmp(&b.x));
        let (top_left, bottom_left) = order_by_y(pts[0], pts[1]);
        let (top_right, bottom_right) = order_by_y(pts[2], pts[3]);
        Self {
            top_left,
            bottom_left,
            top_right,
            bottom_right,
        }
    }
}

fn order_by_y(a: Point, b: Point) -> (Point, Point) {
    if b.y < a.y { (b, a) } else { (a, b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn square() -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ]
    }

    #[test]
    fn test_homography_round_trip() {
        let src = square();
        let dst = [
            Point::new(12.0, 31.0),
            Point::new(140.0, 18.0),
            Point::new(171.0, 133.0),
            Point::new(25.0, 150.0),
        ];
        let h = Homography::from_points(&src, &dst).expect("non-degenerate");
        for (s, d) in src.iter().zip(dst.iter()) {
            let p = h.apply(s).expect("finite");
            assert!(p.distance(d) < 1.0, "{p:?} vs {d:?}");
        }
    }

    #[test]
    fn test_homography_inverse() {
        let dst = [
            Point::new(5.0, 5.0),
            Point::new(60.0, 8.0),
            Point::new(55.0, 70.0),
            Point::new(2.0, 64.0),
        ];
        let h = Homography::from_points(&square(), &dst).unwrap();
        let inv = h.inverse().unwrap();
        let p = Point::new(37.0, 81.0);
        let back = inv.apply(&h.apply(&p).unwrap()).unwrap();
        assert!(back.distance(&p) < 1e-3);
    }

    #[test]
    fn test_homography_rejects_collinear_destination() {
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(30.0, 0.0),
        ];
        assert!(Homography::from_points(&square(), &dst).is_none());
    }

    #[test]
    fn test_square_is_plausible() {
        assert!(is_plausible_quad(&square(), &ShapeConfig::default()));
    }

    #[test]
    fn test_parallelogram_is_plausible() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(130.0, 80.0),
            Point::new(30.0, 80.0),
        ];
        assert!(is_plausible_quad(&pts, &ShapeConfig::default()));
    }

    #[test]
    fn test_collinear_points_rejected() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(30.0, 0.0),
        ];
        assert!(!is_plausible_quad(&pts, &ShapeConfig::default()));
    }

    #[test]
    fn test_repeated_point_rejected_without_panic() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!is_plausible_quad(&pts, &ShapeConfig::default()));
        assert!(matches!(
            edge_angles(&pts),
            Err(ArqrError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_wrong_cardinality_rejected() {
        let sq = square();
        assert!(!is_plausible_quad(&sq[..3], &ShapeConfig::default()));
        let five = [sq[0], sq[1], sq[2], sq[3], Point::new(50.0, 120.0)];
        assert!(!is_plausible_quad(&five, &ShapeConfig::default()));
    }

    #[test]
    fn test_170_degree_interior_angle_rejected() {
        // Interior angle at (100, 0) is 170 degrees.
        let turn = 10.0f32.to_radians();
        let b = Point::new(100.0, 0.0);
        let c = Point::new(b.x + 100.0 * turn.cos(), 100.0 * turn.sin());
        let pts = [Point::new(0.0, 0.0), b, c, Point::new(0.0, 60.0)];
        assert!(!is_plausible_quad(&pts, &ShapeConfig::default()));
    }

    #[test]
    fn test_edge_angles_of_square() {
        let angles = edge_angles(&square()).unwrap();
        for a in angles {
            assert!((a - PI / 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_centroid_and_area() {
        assert_eq!(centroid(&square()), Point::new(50.0, 50.0));
        assert_eq!(polygon_area(&square()).abs(), 10_000.0);
        let line = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(20.0, 20.0),
            Point::new(30.0, 30.0),
        ];
        assert_eq!(polygon_area(&line), 0.0);
    }

    #[test]
    fn test_canonical_corners_from_counter_clockwise_order() {
        let quad = [
            Point::new(10.0, 110.0),
            Point::new(110.0, 110.0),
            Point::new(110.0, 10.0),
            Point::new(10.0, 10.0),
        ];
        let c = CanonicalCorners::from_quad(&quad);
        assert_eq!(c.top_left, Point::new(10.0, 10.0));
        assert_eq!(c.bottom_left, Point::new(10.0, 110.0));
        assert_eq!(c.top_right, Point::new(110.0, 10.0));
        assert_eq!(c.bottom_right, Point::new(110.0, 110.0));
    }
}
