//! Implicit heat diffusion on the cell centres.
//!
//! Backward-Euler seven-point scheme with the face conductivities gathered
//! from the particles. Scaling each row by the cell's heat capacity keeps
//! the system symmetric positive definite:
//!
//! `(m_c c_c / dt) T_c + sum_f (kappa_f / h^2) (T_c - T_c') = m_c c_c T_c^n / dt`
//!
//! Empty neighbours contribute the ambient temperature to the right-hand
//! side and are not unknowns; colliding cells hold their boundary
//! temperatures (the heated floor plane or ambient). Solved with conjugate
//! gradient; the system storage persists across steps.

use rayon::prelude::*;

use crate::grid::{CellState, MacGrid};
use crate::math;
use crate::solver::{conjugate_gradient, StencilMatrix};

pub struct HeatSolver {
    system: StencilMatrix,
    rhs: Vec<f32>,
    solution: Vec<f32>,
    tolerance: f32,
    max_iterations: usize,
}

impl HeatSolver {
    pub fn new(n: usize, tolerance: f32, max_iterations: usize) -> Self {
        let total = n * n * n;
        Self {
            system: StencilMatrix::new(n),
            rhs: vec![0.0; total],
            solution: vec![0.0; total],
            tolerance,
            max_iterations,
        }
    }

    /// Assemble and solve the diffusion system, writing the new
    /// temperatures back to the interior cells. The pre-solve temperatures
    /// stay available as `previous_temperature` for the particle gather.
    pub fn solve(&mut self, grid: &mut MacGrid, dt: f32) {
        self.assemble(grid, dt);

        let stats = conjugate_gradient(
            &mut self.system,
            &self.rhs,
            &mut self.solution,
            self.tolerance,
            self.max_iterations,
        );
        if !stats.converged {
            log::warn!(
                "heat solve stopped at residual {:.3e} after {} iterations",
                stats.residual,
                stats.iterations
            );
        }

        let solution = &self.solution;
        let system = &self.system;
        (&mut grid.centres.temperature, &system.active, solution)
            .into_par_iter()
            .for_each(|(temperature, active, value)| {
                if *active {
                    *temperature = *value;
                }
            });
    }

    fn assemble(&mut self, grid: &MacGrid, dt: f32) {
        let n = grid.n;
        let h = grid.cell_size;
        let inv_h2 = 1.0 / (h * h);
        let stride = [1usize, n, n * n];

        self.system.clear();
        let system = &mut self.system;
        let centres = &grid.centres;
        let faces = &grid.faces;

        (
            &mut system.diag,
            &mut system.active,
            &mut self.rhs,
            &mut self.solution,
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(index, (diag, active, rhs, solution))| {
                if centres.state[index] != CellState::Interior {
                    *active = false;
                    *rhs = 0.0;
                    *solution = 0.0;
                    return;
                }
                *active = true;

                let capacity = centres.mass[index] * centres.heat_capacity[index];
                let mut d = capacity / dt;
                let mut b = capacity / dt * centres.previous_temperature[index];

                for axis in 0..3 {
                    // Interior cells are bounded by the wall layer, so both
                    // neighbours exist. The face shared with the upper
                    // neighbour is that neighbour's negative-side face.
                    let lower = (index, index - stride[axis]);
                    let upper = (index + stride[axis], index + stride[axis]);
                    for (face_index, cell_index) in [lower, upper] {
                        let kappa = faces[axis].conductivity[face_index];
                        if kappa <= 0.0 {
                            continue;
                        }
                        let coeff = kappa * inv_h2;
                        d += coeff;
                        if centres.state[cell_index] != CellState::Interior {
                            // Held temperature: ambient for Empty, boundary
                            // value for Colliding.
                            b += coeff * centres.temperature[cell_index];
                        }
                    }
                }

                *diag = d;
                *rhs = b;
                // Warm-start from the transferred temperature.
                *solution = centres.previous_temperature[index];
            });

        // Symmetric links between interior neighbours.
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
                let kappa = faces[axis].conductivity[neighbour];
                if kappa <= 0.0 {
                    continue;
                }
                system.link[axis][index] = -kappa * inv_h2;
            }
        }
    }
}
