//! Deviatoric velocity update on the grid faces.
//!
//! The momentum update ignoring the pressure gradient is
//! `m_f v*_f = m_f v_f + dt (F_dev + m_f g.e)`, with the deviatoric force
//! coming from the fixed-corotated energy evaluated on the deviatoric
//! elastic gradient `J_E^{-1/3} F_E`. The dilational response is handled by
//! the pressure projection, so only the shear term enters here.
//!
//! The explicit variant evaluates the force directly. The implicit variant
//! solves `(I - dt^2 H / m) v* = v + dt (F_dev / m + g.e)` per axis with
//! MINRES. The system is symmetric in the mass-weighted inner product, so
//! it is solved in the scaled unknowns `sqrt(m) v*`, where it becomes
//! symmetric in the ordinary sense. The Hessian product is applied
//! matrix-free through per-particle stress differentials, with the rotation
//! differential obtained from a dense 3x3 solve per particle.

use glam::{Mat3, Vec3};
use rayon::prelude::*;

use crate::config::Integration;
use crate::emitter::Emitter;
use crate::grid::{CellState, MacGrid};
use crate::kernels;
use crate::math;
use crate::particle::Particle;
use crate::solver::{minres, LinearOperator};

/// Per-particle quantities fixed over one velocity solve.
struct StressContext {
    f_elastic: Mat3,
    f_inverse_transpose: Mat3,
    rotation: Mat3,
    /// J_E^{-1/3}.
    det_pow: f32,
    two_mu: f32,
    volume: f32,
    /// V_p (dPsi/dF_E) F_E^T, ready to contract with weight gradients.
    stress: Mat3,
    /// Coefficient matrix of the 3x3 skew system for the rotation
    /// differential (depends only on the stretch factor).
    skew_system: Mat3,
}

/// Scratch and settings for the deviatoric update, persistent across steps.
pub struct DeviatoricSolver {
    contexts: Vec<StressContext>,
    deltas: Vec<Mat3>,
    rhs: Vec<f32>,
    scaled_rhs: Vec<f32>,
    solution: Vec<f32>,
    inv_sqrt_mass: Vec<f32>,
    active: Vec<bool>,
    tolerance: f32,
    max_iterations: usize,
}

impl DeviatoricSolver {
    pub fn new(total_cells: usize, tolerance: f32, max_iterations: usize) -> Self {
        Self {
            contexts: Vec::new(),
            deltas: Vec::new(),
            rhs: vec![0.0; total_cells],
            scaled_rhs: vec![0.0; total_cells],
            solution: vec![0.0; total_cells],
            inv_sqrt_mass: vec![0.0; total_cells],
            active: vec![false; total_cells],
            tolerance,
            max_iterations,
        }
    }

    /// Compute the deviatoric forces and the post-force star velocities for
    /// all three face sets.
    pub fn update_velocity(
        &mut self,
        grid: &mut MacGrid,
        emitter: &Emitter,
        dt: f32,
        integration: Integration,
    ) {
        self.build_contexts(emitter);
        for axis in 0..3 {
            self.accumulate_face_forces(grid, axis);
            self.solve_axis(grid, emitter, dt, axis, integration);
        }
    }

    fn build_contexts(&mut self, emitter: &Emitter) {
        let particles = emitter.particles();
        self.contexts.clear();
        self.deltas.clear();
        self.deltas.resize(particles.len(), Mat3::ZERO);

        self.contexts = particles
            .par_iter()
            .map(|p| {
                let f_elastic = p.deformation_elastic;
                let f_inverse_transpose = f_elastic.inverse().transpose();
                let det_pow = 1.0 / p.det_elastic.cbrt();
                let two_mu = 2.0 * p.lame_mu;

                // dPsi/dF_hat for Psi = mu |F_hat - R|^2.
                let p_hat = two_mu * (p.deviatoric_elastic - p.rotation);
                // Pull back through the J^{-1/3} chain rule.
                let gradient = det_pow
                    * (p_hat - (math::ddot(&p_hat, &f_elastic) / 3.0) * f_inverse_transpose);
                let stress = p.initial_volume * gradient * f_elastic.transpose();

                StressContext {
                    f_elastic,
                    f_inverse_transpose,
                    rotation: p.rotation,
                    det_pow,
                    two_mu,
                    volume: p.initial_volume,
                    stress,
                    skew_system: skew_system(&p.stretch),
                }
            })
            .collect();
    }

    /// F_dev at each face: minus the stress of every contributing particle
    /// contracted with the weight gradient, picked along the face normal.
    fn accumulate_face_forces(&self, grid: &mut MacGrid, axis: usize) {
        let contexts = &self.contexts;
        let face = &mut grid.faces[axis];
        (&mut face.deviatoric_force, &face.records)
            .into_par_iter()
            .for_each(|(force, records)| {
                let mut sum = 0.0;
                for record in records {
                    let context = &contexts[record.particle as usize];
                    sum -= (context.stress * record.weight_grad)[axis];
                }
                *force = sum;
            });
    }

    fn solve_axis(
        &mut self,
        grid: &mut MacGrid,
        emitter: &Emitter,
        dt: f32,
        axis: usize,
        integration: Integration,
    ) {
        let gravity = grid.gravity[axis];
        {
            let face = &grid.faces[axis];
            (
                &mut self.active,
                &mut self.rhs,
                &mut self.scaled_rhs,
                &mut self.inv_sqrt_mass,
                &face.mass,
                &face.velocity,
                &face.deviatoric_force,
                &face.state,
            )
                .into_par_iter()
                .for_each(
                    |(active, rhs, scaled_rhs, inv_sqrt_mass, mass, velocity, force, state)| {
                        *active = *mass > 0.0 && *state != CellState::Colliding;
                        if *active {
                            *rhs = velocity + dt * (force / mass + gravity);
                            *scaled_rhs = *rhs * mass.sqrt();
                            *inv_sqrt_mass = 1.0 / mass.sqrt();
                        } else {
                            *rhs = 0.0;
                            *scaled_rhs = 0.0;
                            *inv_sqrt_mass = 0.0;
                        }
                    },
                );
        }

        match integration {
            Integration::Explicit => {
                grid.faces[axis].star_velocity.copy_from_slice(&self.rhs);
            }
            Integration::Implicit => {
                self.solution.copy_from_slice(&self.scaled_rhs);
                let mut operator = HessianOperator {
                    grid,
                    particles: emitter.particles(),
                    contexts: &self.contexts,
                    deltas: &mut self.deltas,
                    active: &self.active,
                    inv_sqrt_mass: &self.inv_sqrt_mass,
                    axis,
                    dt,
                };
                let stats = minres(
                    &mut operator,
                    &self.scaled_rhs,
                    &mut self.solution,
                    None,
                    0.0,
                    self.tolerance,
                    self.max_iterations,
                );
                if !stats.converged {
                    log::warn!(
                        "implicit deviatoric solve (axis {}) stopped at residual {:.3e} after {} iterations",
                        axis,
                        stats.residual,
                        stats.iterations
                    );
                }
                // Undo the sqrt(m) scaling of the unknowns.
                let face = &mut grid.faces[axis];
                (
                    &mut face.star_velocity,
                    &self.solution,
                    &self.inv_sqrt_mass,
                )
                    .into_par_iter()
                    .for_each(|(star, solution, inv_sqrt_mass)| {
                        *star = solution * inv_sqrt_mass;
                    });
            }
        }
    }
}

/// Matrix-free application of `I - dt^2 M^{-1/2} H M^{-1/2}` for one axis
/// (the mass-symmetrised form of `I - dt^2 H / m`).
struct HessianOperator<'a> {
    grid: &'a MacGrid,
    particles: &'a [Particle],
    contexts: &'a [StressContext],
    deltas: &'a mut Vec<Mat3>,
    active: &'a [bool],
    inv_sqrt_mass: &'a [f32],
    axis: usize,
    dt: f32,
}

impl LinearOperator for HessianOperator<'_> {
    fn len(&self) -> usize {
        self.active.len()
    }

    fn apply(&mut self, x: &[f32], out: &mut [f32]) {
        let grid = self.grid;
        let axis = self.axis;
        let dt = self.dt;
        let n = grid.n as i32;
        let inv_h = 1.0 / grid.cell_size;
        let origin = grid.origin;
        let active = self.active;
        let inv_sqrt_mass = self.inv_sqrt_mass;
        let contexts = self.contexts;
        let unit = crate::grid::axis_unit(axis);

        // Per-particle stress differential from the candidate velocities.
        self.deltas
            .par_iter_mut()
            .zip(self.particles.par_iter())
            .zip(contexts.par_iter())
            .for_each(|((delta, particle), context)| {
                let s = (particle.position - origin) * inv_h;
                let mut offset = Vec3::splat(0.5);
                offset[axis] = 0.0;
                let base = (s - offset).floor();

                let mut g = Vec3::ZERO;
                for dk in -1..=2i32 {
                    let k = base.z as i32 + dk;
                    if k < 0 || k >= n {
                        continue;
                    }
                    for dj in -1..=2i32 {
                        let j = base.y as i32 + dj;
                        if j < 0 || j >= n {
                            continue;
                        }
                        for di in -1..=2i32 {
                            let i = base.x as i32 + di;
                            if i < 0 || i >= n {
                                continue;
                            }
                            let index = math::flat_index(
                                i as usize,
                                j as usize,
                                k as usize,
                                grid.n,
                            );
                            if !active[index] {
                                continue;
                            }
                            let d = s - (Vec3::new(i as f32, j as f32, k as f32) + offset);
                            if kernels::cubic_bspline_3d(d) == 0.0 {
                                continue;
                            }
                            g += x[index]
                                * inv_sqrt_mass[index]
                                * kernels::cubic_bspline_grad(d, inv_h);
                        }
                    }
                }

                // dF_E for grid displacements dt * x along the face normal.
                let d_f = dt * math::outer(unit, g) * context.f_elastic;
                let d_f_hat = context.det_pow
                    * (d_f
                        - (math::ddot(&context.f_inverse_transpose, &d_f) / 3.0)
                            * context.f_elastic);

                // Rotation differential: R^T dR is skew; solve the 3x3
                // system built from the stretch factor.
                let k_mat = context.rotation.transpose() * d_f_hat
                    - d_f_hat.transpose() * context.rotation;
                let k_vec = Vec3::new(k_mat.y_axis.z, k_mat.z_axis.x, k_mat.x_axis.y);
                let w = math::solve3(&context.skew_system, k_vec).unwrap_or(Vec3::ZERO);
                let d_rotation = context.rotation * skew(w);

                let d_p_hat = context.two_mu * (d_f_hat - d_rotation);
                let d_gradient = context.det_pow
                    * (d_p_hat
                        - (math::ddot(&d_p_hat, &context.f_elastic) / 3.0)
                            * context.f_inverse_transpose);
                *delta = context.volume * d_gradient * context.f_elastic.transpose();
            });

        // Re-scatter: out = x - dt * M^{-1/2} d(force).
        let face = &grid.faces[axis];
        let deltas = &self.deltas;
        (out, x, &face.records)
            .into_par_iter()
            .enumerate()
            .for_each(|(index, (out, x, records))| {
                if !active[index] {
                    *out = *x;
                    return;
                }
                let mut d_force = 0.0;
                for record in records {
                    let delta = &deltas[record.particle as usize];
                    d_force -= (*delta * record.weight_grad)[axis];
                }
                *out = *x - dt * inv_sqrt_mass[index] * d_force;
            });
    }
}

/// Skew-symmetric matrix of `w` (the cross-product map).
#[inline]
fn skew(w: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, w.z, -w.y),
        Vec3::new(-w.z, 0.0, w.x),
        Vec3::new(w.y, -w.x, 0.0),
    )
}

/// Coefficient matrix B of the skew system `B w = vec(K)` where
/// `vec(M) = (M_21, M_02, M_10)` and the system encodes `W S + S W`.
fn skew_system(stretch: &Mat3) -> Mat3 {
    let column = |axis: Vec3| {
        let w = skew(axis);
        let m = w * *stretch + *stretch * w;
        Vec3::new(m.y_axis.z, m.z_axis.x, m.x_axis.y)
    };
    Mat3::from_cols(column(Vec3::X), column(Vec3::Y), column(Vec3::Z))
}
