//! Grid-to-particle gather.
//!
//! The particle-to-grid direction is cell-centric and lives on the grid;
//! the way back is particle-centric: every particle re-evaluates its face
//! and centre weights and samples the post-force grid state. The PIC and
//! FLIP contributions are stored separately on the particle and blended by
//! the step-initial hook.

use glam::{Mat3, Vec3};
use rayon::prelude::*;

use crate::emitter::Emitter;
use crate::grid::MacGrid;
use crate::kernels;

/// Gather the new grid velocities and temperatures back onto the particles.
///
/// Per particle this fills:
/// - `grid_velocity`: the PIC sample of the post-force face velocities,
/// - `grid_velocity_delta`: the FLIP increment (post-force minus
///   transferred),
/// - `grid_temperature` / `grid_temperature_delta`: same pair for the
///   cell-centre temperatures around the heat solve,
/// - `velocity_gradient`: sum of star velocities times weight gradients.
pub fn gather_to_particles(grid: &MacGrid, emitter: &mut Emitter) {
    let n = grid.n as i32;
    let cell_size = grid.cell_size;
    let inv_h = 1.0 / cell_size;
    let origin = grid.origin;

    emitter.particles_mut().par_iter_mut().for_each(|particle| {
        let s = (particle.position - origin) * inv_h;

        let mut pic_velocity = Vec3::ZERO;
        let mut flip_delta = Vec3::ZERO;
        let mut gradient_rows = [Vec3::ZERO; 3];

        for axis in 0..3 {
            let face = &grid.faces[axis];
            let mut offset = Vec3::splat(0.5);
            offset[axis] = 0.0;

            let base = (s - offset).floor();
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

                        let node = Vec3::new(i as f32, j as f32, k as f32) + offset;
                        let d = s - node;
                        let weight = kernels::cubic_bspline_3d(d);
                        if weight == 0.0 {
                            continue;
                        }

                        let index =
                            crate::math::flat_index(i as usize, j as usize, k as usize, grid.n);
                        let star = face.star_velocity[index];
                        let transferred = face.velocity[index];

                        pic_velocity[axis] += weight * star;
                        flip_delta[axis] += weight * (star - transferred);
                        gradient_rows[axis] += star * kernels::cubic_bspline_grad(d, inv_h);
                    }
                }
            }
        }

        let mut pic_temperature = 0.0;
        let mut temperature_delta = 0.0;
        let offset = Vec3::splat(0.5);
        let base = (s - offset).floor();
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

                    let node = Vec3::new(i as f32, j as f32, k as f32) + offset;
                    let d = s - node;
                    let weight = kernels::cubic_bspline_3d(d);
                    if weight == 0.0 {
                        continue;
                    }

                    let index =
                        crate::math::flat_index(i as usize, j as usize, k as usize, grid.n);
                    let temperature = grid.centres.temperature[index];
                    let previous = grid.centres.previous_temperature[index];
                    pic_temperature += weight * temperature;
                    temperature_delta += weight * (temperature - previous);
                }
            }
        }

        particle.grid_velocity = pic_velocity;
        particle.grid_velocity_delta = flip_delta;
        particle.grid_temperature = pic_temperature;
        particle.grid_temperature_delta = temperature_delta;
        particle.velocity_gradient =
            Mat3::from_cols(gradient_rows[0], gradient_rows[1], gradient_rows[2]).transpose();
    });
}
