//! Small dense linear algebra used by the constitutive update.
//!
//! Everything here operates on 3x3 matrices: a one-sided Jacobi SVD, polar
//! decomposition built on top of it, a direct 3x3 solve for the per-particle
//! rotation-differential system, and the indexing helpers shared by the grid
//! and the transfer code.

use glam::{IVec3, Mat3, Vec3};

/// Flat cell index from (i, j, k): `i + n*j + n^2*k`.
#[inline]
pub fn flat_index(i: usize, j: usize, k: usize, n: usize) -> usize {
    i + n * (j + n * k)
}

/// Inverse of [`flat_index`].
#[inline]
pub fn cell_coords(index: usize, n: usize) -> (usize, usize, usize) {
    (index % n, (index / n) % n, index / (n * n))
}

/// Cell containing a particle, measured from the grid-edge origin (the lower
/// corner of the outer collision layer).
#[inline]
pub fn particle_cell(position: Vec3, cell_size: f32, edge_origin: Vec3) -> IVec3 {
    let rel = (position - edge_origin) / cell_size;
    IVec3::new(
        rel.x.floor() as i32,
        rel.y.floor() as i32,
        rel.z.floor() as i32,
    )
}

/// Sign function: +-1, and zero for zero. Used when differentiating |x|.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Double contraction A:B (sum of elementwise products).
#[inline]
pub fn ddot(a: &Mat3, b: &Mat3) -> f32 {
    a.x_axis.dot(b.x_axis) + a.y_axis.dot(b.y_axis) + a.z_axis.dot(b.z_axis)
}

/// Outer product `a b^T`.
#[inline]
pub fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Direct solve of the dense 3x3 system `A x = b`.
/// Returns `None` when A is numerically singular.
pub fn solve3(a: &Mat3, b: Vec3) -> Option<Vec3> {
    let det = a.determinant();
    if det.abs() < 1e-12 {
        return None;
    }
    Some(a.inverse() * b)
}

/// Singular value decomposition of a 3x3 matrix: `A = U * diag(s) * V^T`.
///
/// One-sided Jacobi: right rotations orthogonalise the columns of A, which
/// accumulate into V; the orthogonalised columns normalise into U. Singular
/// values are non-negative and sorted in descending order. For
/// rank-deficient input the missing U columns are completed by cross
/// products so U stays orthogonal.
pub fn svd3(a: &Mat3) -> (Mat3, Vec3, Mat3) {
    let mut b = [a.col(0), a.col(1), a.col(2)];
    let mut v = [Vec3::X, Vec3::Y, Vec3::Z];

    for _ in 0..30 {
        let mut rotated = false;
        for (p, q) in [(0usize, 1usize), (0, 2), (1, 2)] {
            let alpha = b[p].dot(b[p]);
            let beta = b[q].dot(b[q]);
            let gamma = b[p].dot(b[q]);
            if gamma.abs() <= 1e-12 * (alpha * beta).sqrt().max(f32::MIN_POSITIVE) {
                continue;
            }
            rotated = true;

            let zeta = (beta - alpha) / (2.0 * gamma);
            let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
            let c = 1.0 / (1.0 + t * t).sqrt();
            let s = c * t;

            let (bp, bq) = (b[p], b[q]);
            b[p] = c * bp - s * bq;
            b[q] = s * bp + c * bq;
            let (vp, vq) = (v[p], v[q]);
            v[p] = c * vp - s * vq;
            v[q] = s * vp + c * vq;
        }
        if !rotated {
            break;
        }
    }

    let mut sigma = [b[0].length(), b[1].length(), b[2].length()];
    let mut order = [0usize, 1, 2];
    order.sort_by(|&i, &j| sigma[j].partial_cmp(&sigma[i]).unwrap_or(std::cmp::Ordering::Equal));
    let b = [b[order[0]], b[order[1]], b[order[2]]];
    let v = [v[order[0]], v[order[1]], v[order[2]]];
    sigma = [sigma[order[0]], sigma[order[1]], sigma[order[2]]];

    let tiny = 1e-12 * sigma[0].max(1e-20);
    let u0 = if sigma[0] > tiny { b[0] / sigma[0] } else { Vec3::X };
    let u1 = if sigma[1] > tiny {
        b[1] / sigma[1]
    } else {
        // Any unit vector orthogonal to u0.
        let pick = if u0.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
        u0.cross(pick).normalize()
    };
    let u2 = if sigma[2] > tiny {
        b[2] / sigma[2]
    } else {
        u0.cross(u1).normalize()
    };

    (
        Mat3::from_cols(u0, u1, u2),
        Vec3::new(sigma[0], sigma[1], sigma[2]),
        Mat3::from_cols(v[0], v[1], v[2]),
    )
}

/// Polar decomposition `A = R * S` with R a proper rotation and S symmetric.
///
/// det R = +1 is enforced by flipping the sign of the smallest singular
/// value when the raw `U V^T` is a reflection.
pub fn polar_decomposition(a: &Mat3) -> (Mat3, Mat3) {
    let (mut u, mut s, v) = svd3(a);
    let r = u * v.transpose();
    if r.determinant() < 0.0 {
        u.z_axis = -u.z_axis;
        s.z = -s.z;
    }
    let r = u * v.transpose();
    let stretch = v * Mat3::from_diagonal(s) * v.transpose();
    (r, stretch)
}
