//! Interpolation kernels for particle/grid transfers.
//!
//! Two stencils are used side by side: the cubic B-spline (support 2 cells,
//! C2 continuous) carries mass, velocity and temperature, while the tighter
//! quadratic stencil (support 1.5 cells) is kept alongside it for the
//! narrow-stencil quantities. 3D weights are tensor products of the 1D
//! kernels; gradients differentiate one axis and multiply the other two.

use glam::Vec3;

/// 1D cubic B-spline weight.
/// Support: [-2, 2], N(0) = 2/3, N(+-1) = 1/6.
#[inline]
pub fn cubic_bspline(x: f32) -> f32 {
    let r = x.abs();
    if r < 1.0 {
        0.5 * r * r * r - r * r + 2.0 / 3.0
    } else if r < 2.0 {
        let t = 2.0 - r;
        t * t * t / 6.0
    } else {
        0.0
    }
}

/// Derivative of the 1D cubic B-spline.
#[inline]
pub fn cubic_bspline_deriv(x: f32) -> f32 {
    let r = x.abs();
    let d = if r < 1.0 {
        1.5 * r * r - 2.0 * r
    } else if r < 2.0 {
        let t = 2.0 - r;
        -0.5 * t * t
    } else {
        0.0
    };
    if x < 0.0 {
        -d
    } else {
        d
    }
}

/// 1D tight quadratic stencil weight.
/// Support: [-1.5, 1.5], value 3/4 - x^2 inside the centre band.
#[inline]
pub fn tight_quadratic(x: f32) -> f32 {
    let r = x.abs();
    if r < 0.5 {
        0.75 - r * r
    } else if r < 1.5 {
        let t = 1.5 - r;
        0.5 * t * t
    } else {
        0.0
    }
}

/// Derivative of the 1D tight quadratic stencil.
#[inline]
pub fn tight_quadratic_deriv(x: f32) -> f32 {
    let r = x.abs();
    let d = if r < 0.5 {
        -2.0 * r
    } else if r < 1.5 {
        -(1.5 - r)
    } else {
        0.0
    };
    if x < 0.0 {
        -d
    } else {
        d
    }
}

/// 3D cubic B-spline weight (tensor product of 1D).
/// `d` is the particle-to-node offset already scaled by 1/h.
#[inline]
pub fn cubic_bspline_3d(d: Vec3) -> f32 {
    cubic_bspline(d.x) * cubic_bspline(d.y) * cubic_bspline(d.z)
}

/// Gradient of the 3D cubic B-spline with respect to the particle position.
/// `inv_h` converts the dimensionless derivative back to world units.
#[inline]
pub fn cubic_bspline_grad(d: Vec3, inv_h: f32) -> Vec3 {
    let (nx, ny, nz) = (cubic_bspline(d.x), cubic_bspline(d.y), cubic_bspline(d.z));
    Vec3::new(
        cubic_bspline_deriv(d.x) * ny * nz,
        cubic_bspline_deriv(d.y) * nx * nz,
        cubic_bspline_deriv(d.z) * nx * ny,
    ) * inv_h
}

/// 3D tight quadratic stencil weight (tensor product of 1D).
#[inline]
pub fn tight_quadratic_3d(d: Vec3) -> f32 {
    tight_quadratic(d.x) * tight_quadratic(d.y) * tight_quadratic(d.z)
}

/// Gradient of the 3D tight quadratic stencil with respect to the particle
/// position.
#[inline]
pub fn tight_quadratic_grad(d: Vec3, inv_h: f32) -> Vec3 {
    let (nx, ny, nz) = (
        tight_quadratic(d.x),
        tight_quadratic(d.y),
        tight_quadratic(d.z),
    );
    Vec3::new(
        tight_quadratic_deriv(d.x) * ny * nz,
        tight_quadratic_deriv(d.y) * nx * nz,
        tight_quadratic_deriv(d.z) * nx * ny,
    ) * inv_h
}
