//! Pressure projection on the interior cells.
//!
//! Enforces mass-weighted incompressibility coupled to the plastic volume
//! ratio: `div(v) + (1 - 1/J_E)/dt + lambda_inv p / dt = 0`. Substituting
//! the face update `v* -= dt grad(p) / m_f` yields the SPD system
//!
//! `dt * L(p) + lambda_inv p / dt = -div(v*) - (1 - 1/J_E)/dt`
//!
//! where L is the seven-point divergence-of-gradient weighted by the face
//! masses. Empty neighbours are Dirichlet p = 0; colliding faces drop out
//! of the stencil (solid wall). Solved with conjugate gradient; the system
//! storage persists across steps.

use rayon::prelude::*;

use crate::grid::{CellState, MacGrid};
use crate::math;
use crate::solver::{conjugate_gradient, StencilMatrix};

pub struct PressureSolver {
    system: StencilMatrix,
    rhs: Vec<f32>,
    pressure: Vec<f32>,
    tolerance: f32,
    max_iterations: usize,
}

impl PressureSolver {
    pub fn new(n: usize, tolerance: f32, max_iterations: usize) -> Self {
        let total = n * n * n;
        Self {
            system: StencilMatrix::new(n),
            rhs: vec![0.0; total],
            pressure: vec![0.0; total],
            tolerance,
            max_iterations,
        }
    }

    /// Cell-centre pressures from the last projection (diagnostic).
    pub fn pressures(&self) -> &[f32] {
        &self.pressure
    }

    /// Assemble and solve the projection system, then subtract the pressure
    /// gradient from the star velocities of the interior faces.
    pub fn project(&mut self, grid: &mut MacGrid, dt: f32) {
        self.assemble(grid, dt);

        let stats = conjugate_gradient(
            &mut self.system,
            &self.rhs,
            &mut self.pressure,
            self.tolerance,
            self.max_iterations,
        );
        if !stats.converged {
            log::warn!(
                "pressure projection stopped at residual {:.3e} after {} iterations",
                stats.residual,
                stats.iterations
            );
        }

        self.apply_gradient(grid, dt);
    }

    fn assemble(&mut self, grid: &MacGrid, dt: f32) {
        let n = grid.n;
        let h = grid.cell_size;
        let inv_h = 1.0 / h;
        let stride = [1usize, n, n * n];

        self.system.clear();
        let system = &mut self.system;
        let centres = &grid.centres;
        let faces = &grid.faces;

        (
            &mut system.diag,
            &mut system.active,
            &mut self.rhs,
            &mut self.pressure,
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(index, (diag, active, rhs, pressure))| {
                if centres.state[index] != CellState::Interior {
                    *active = false;
                    *rhs = 0.0;
                    // Identity rows need a zero unknown as the initial guess.
                    *pressure = 0.0;
                    return;
                }
                *active = true;

                let (i, j, k) = math::cell_coords(index, n);
                let mut divergence = 0.0;
                let mut coeff_sum = 0.0;
                for axis in 0..3 {
                    let lower = index;
                    let upper = match axis {
                        0 => math::flat_index(i + 1, j, k, n),
                        1 => math::flat_index(i, j + 1, k, n),
                        _ => math::flat_index(i, j, k + 1, n),
                    };
                    let face = &faces[axis];
                    divergence +=
                        (face.star_velocity[upper] - face.star_velocity[lower]) * inv_h;

                    for face_index in [lower, upper] {
                        if face.state[face_index] != CellState::Colliding
                            && face.mass[face_index] > 0.0
                        {
                            coeff_sum += dt / (h * h * face.mass[face_index]);
                        }
                    }
                }

                let det_elastic = centres.det_deformation_elastic[index].max(1e-6);
                *diag = coeff_sum + centres.lambda_inverse[index] / dt;
                *rhs = -divergence - (1.0 - 1.0 / det_elastic) / dt;
            });

        // Off-diagonal links, set once from the lower cell of each pair.
        for index in 0..system.diag.len() {
            if !system.active[index] {
                continue;
            }
            let (i, j, k) = math::cell_coords(index, n);
            let coords = [i, j, k];
            for axis in 0..3 {
                if coords[axis] + 1 >= n {
                    continue;
                }
                let neighbour = index + stride[axis];
                if !system.active[neighbour] {
                    continue;
                }
                // The shared face is the neighbour's lower face.
                let face = &faces[axis];
                if face.state[neighbour] == CellState::Colliding
                    || face.mass[neighbour] <= 0.0
                {
                    continue;
                }
                system.link[axis][index] = -dt / (h * h * face.mass[neighbour]);
            }
        }
    }

    fn apply_gradient(&self, grid: &mut MacGrid, dt: f32) {
        let n = grid.n;
        let h = grid.cell_size;
        let states = &grid.centres.state;
        let pressure = &self.pressure;
        let stride = [1usize, n, n * n];

        for (axis, face) in grid.faces.iter_mut().enumerate() {
            (
                &mut face.star_velocity,
                &face.mass,
                &face.state,
            )
                .into_par_iter()
                .enumerate()
                .for_each(|(index, (star, mass, state))| {
                    if *state == CellState::Colliding || *mass <= 0.0 {
                        return;
                    }
                    let (i, j, k) = math::cell_coords(index, n);
                    let coords = [i, j, k];
                    if coords[axis] == 0 {
                        return;
                    }
                    let hi = index;
                    let lo = index - stride[axis];
                    let hi_interior = states[hi] == CellState::Interior;
                    let lo_interior = states[lo] == CellState::Interior;
                    if !hi_interior && !lo_interior {
                        return;
                    }
                    let p_hi = if hi_interior { pressure[hi] } else { 0.0 };
                    let p_lo = if lo_interior { pressure[lo] } else { 0.0 };
                    *star -= dt * (p_hi - p_lo) / (h * *mass);
                });
        }
    }
}
