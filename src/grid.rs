//! MAC staggered grid for the melting simulation.
//!
//! Scalars live at cell centres; velocity components live on the cell faces
//! with matching normal (the face on the negative side of each cell). The
//! outermost one-cell layer is the collision boundary; the interior n-2
//! cells cover the simulated bounding box.
//!
//! Per step the grid is cleared, particles are bucketed by containing cell,
//! and interpolation records are rebuilt cell-centrically: each cell pulls
//! its candidate particles from the 6x6x6 neighbourhood of buckets, so no
//! cell is written from two threads and the record order is deterministic.

use glam::Vec3;
use rayon::prelude::*;

use crate::emitter::Emitter;
use crate::kernels;
use crate::math;
use crate::particle::{CollisionBox, Particle};

/// Three-state cell classification driving boundary conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellState {
    Interior,
    Empty,
    Colliding,
}

/// Interpolation weights of one particle against one grid node, rebuilt
/// every step.
#[derive(Clone, Copy, Debug)]
pub struct InterpolationRecord {
    pub particle: u32,
    /// Cubic B-spline weight N.
    pub weight: f32,
    /// Gradient of N with respect to the particle position.
    pub weight_grad: Vec3,
    /// Tight quadratic stencil weight.
    pub quad_weight: f32,
    /// Gradient of the tight quadratic stencil.
    pub quad_weight_grad: Vec3,
}

/// Unit vector of a coordinate axis (0 = X, 1 = Y, 2 = Z).
#[inline]
pub fn axis_unit(axis: usize) -> Vec3 {
    match axis {
        0 => Vec3::X,
        1 => Vec3::Y,
        _ => Vec3::Z,
    }
}

/// Cell-centre storage (one entry per cell).
pub struct CellCentres {
    pub mass: Vec<f32>,
    pub det_deformation: Vec<f32>,
    pub det_deformation_elastic: Vec<f32>,
    pub det_deformation_plastic: Vec<f32>,
    pub heat_capacity: Vec<f32>,
    pub temperature: Vec<f32>,
    /// Temperature as transferred from particles, before the heat solve.
    pub previous_temperature: Vec<f32>,
    pub lambda_inverse: Vec<f32>,
    pub state: Vec<CellState>,
    pub records: Vec<Vec<InterpolationRecord>>,
}

impl CellCentres {
    fn new(total: usize) -> Self {
        Self {
            mass: vec![0.0; total],
            det_deformation: vec![0.0; total],
            det_deformation_elastic: vec![0.0; total],
            det_deformation_plastic: vec![0.0; total],
            heat_capacity: vec![0.0; total],
            temperature: vec![0.0; total],
            previous_temperature: vec![0.0; total],
            lambda_inverse: vec![0.0; total],
            state: vec![CellState::Colliding; total],
            records: (0..total).map(|_| Vec::new()).collect(),
        }
    }
}

/// Storage for one orientation of cell faces (one entry per cell; the face
/// sits on the negative side of the cell along the set's axis).
pub struct FaceSet {
    pub mass: Vec<f32>,
    /// Normal velocity as transferred from particles.
    pub velocity: Vec<f32>,
    /// Normal velocity after forces and projection.
    pub star_velocity: Vec<f32>,
    pub conductivity: Vec<f32>,
    pub deviatoric_force: Vec<f32>,
    pub state: Vec<CellState>,
    pub records: Vec<Vec<InterpolationRecord>>,
}

impl FaceSet {
    fn new(total: usize) -> Self {
        Self {
            mass: vec![0.0; total],
            velocity: vec![0.0; total],
            star_velocity: vec![0.0; total],
            conductivity: vec![0.0; total],
            deviatoric_force: vec![0.0; total],
            state: vec![CellState::Interior; total],
            records: (0..total).map(|_| Vec::new()).collect(),
        }
    }
}

/// The MAC grid. Construction fixes the geometry; everything else is
/// per-step state.
pub struct MacGrid {
    /// Cells per side (including the collision layer).
    pub n: usize,
    pub cell_size: f32,
    /// Lower corner of the collision layer (grid-edge origin).
    pub origin: Vec3,
    pub gravity: Vec3,
    /// Ambient temperature (Kelvin) held by Empty and non-heated Colliding
    /// cells.
    pub ambient_temperature: f32,
    /// Temperature (Kelvin) held by the heated floor plane (j = 0).
    pub heat_source_temperature: f32,
    /// Contributor count a cell and its faces must exceed to be Interior.
    pub particle_threshold: usize,

    pub centres: CellCentres,
    pub faces: [FaceSet; 3],

    /// Particle indices bucketed by containing cell, rebuilt per step.
    buckets: Vec<Vec<u32>>,
}

impl MacGrid {
    /// Build a grid around a bounding box: `n` cells per side where the
    /// interior n-2 cells span the box, so h = size / (n - 2) and the grid
    /// corner sits one cell below the box origin.
    pub fn new(
        box_origin: Vec3,
        box_size: f32,
        n: usize,
        gravity: Vec3,
        ambient_temperature: f32,
        heat_source_temperature: f32,
        particle_threshold: usize,
    ) -> Self {
        let cell_size = box_size / (n as f32 - 2.0);
        let origin = box_origin - Vec3::splat(cell_size);
        let total = n * n * n;
        Self {
            n,
            cell_size,
            origin,
            gravity,
            ambient_temperature,
            heat_source_temperature,
            particle_threshold,
            centres: CellCentres::new(total),
            faces: [FaceSet::new(total), FaceSet::new(total), FaceSet::new(total)],
            buckets: (0..total).map(|_| Vec::new()).collect(),
        }
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        self.n * self.n * self.n
    }

    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        math::flat_index(i, j, k, self.n)
    }

    /// World position of a cell centre.
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin
            + Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5) * self.cell_size
    }

    /// World position of the face on the negative side of a cell along
    /// `axis`.
    #[inline]
    pub fn face_position(&self, axis: usize, i: usize, j: usize, k: usize) -> Vec3 {
        let mut p = Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5);
        p[axis] -= 0.5;
        self.origin + p * self.cell_size
    }

    /// Origin of the simulated bounding box (inside the collision layer).
    #[inline]
    pub fn bounding_box_origin(&self) -> Vec3 {
        self.origin + Vec3::splat(self.cell_size)
    }

    #[inline]
    pub fn bounding_box_size(&self) -> f32 {
        (self.n as f32 - 2.0) * self.cell_size
    }

    /// The static collision box particles are kept inside.
    pub fn collision_box(&self) -> CollisionBox {
        CollisionBox {
            min: self.bounding_box_origin(),
            max: self.origin + Vec3::splat((self.n as f32 - 1.0) * self.cell_size),
        }
    }

    /// Number of particles whose containing cell is this cell (diagnostic,
    /// valid after [`MacGrid::build_interpolation_records`]).
    pub fn particles_in_cell(&self, index: usize) -> usize {
        self.buckets[index].len()
    }

    // ========== Per-step pipeline ==========

    /// Reset all per-step state: aggregates to zero, record lists cleared
    /// in place, centre states to the pessimistic Colliding default, face
    /// states to Interior.
    pub fn clear(&mut self) {
        let c = &mut self.centres;
        c.mass.fill(0.0);
        c.det_deformation.fill(0.0);
        c.det_deformation_elastic.fill(0.0);
        c.det_deformation_plastic.fill(0.0);
        c.heat_capacity.fill(0.0);
        c.temperature.fill(0.0);
        c.previous_temperature.fill(0.0);
        c.lambda_inverse.fill(0.0);
        c.state.fill(CellState::Colliding);
        c.records.par_iter_mut().for_each(Vec::clear);

        for face in &mut self.faces {
            face.mass.fill(0.0);
            face.velocity.fill(0.0);
            face.star_velocity.fill(0.0);
            face.conductivity.fill(0.0);
            face.deviatoric_force.fill(0.0);
            face.state.fill(CellState::Interior);
            face.records.par_iter_mut().for_each(Vec::clear);
        }

        self.buckets.par_iter_mut().for_each(Vec::clear);
    }

    /// Bucket particles by containing cell, then rebuild the interpolation
    /// record lists for the cell centres and all three face sets.
    pub fn build_interpolation_records(&mut self, emitter: &Emitter) {
        let n = self.n;
        for (index, particle) in emitter.particles().iter().enumerate() {
            let cell = math::particle_cell(particle.position, self.cell_size, self.origin);
            let i = cell.x.clamp(0, n as i32 - 1) as usize;
            let j = cell.y.clamp(0, n as i32 - 1) as usize;
            let k = cell.z.clamp(0, n as i32 - 1) as usize;
            let bucket = math::flat_index(i, j, k, n);
            self.buckets[bucket].push(index as u32);
        }

        let particles = emitter.particles();
        let buckets = &self.buckets;
        let cell_size = self.cell_size;
        let origin = self.origin;

        build_record_lists(
            &mut self.centres.records,
            buckets,
            particles,
            n,
            cell_size,
            origin,
            Vec3::splat(0.5),
        );
        for axis in 0..3 {
            let mut offset = Vec3::splat(0.5);
            offset[axis] = 0.0;
            build_record_lists(
                &mut self.faces[axis].records,
                buckets,
                particles,
                n,
                cell_size,
                origin,
                offset,
            );
        }
    }

    /// Scatter particle data onto the grid: mass-weighted aggregates per
    /// face and per centre, divided through by the accumulated mass.
    /// Cells that receive no mass keep zeros.
    pub fn transfer_particle_data(&mut self, emitter: &Emitter) {
        let particles = emitter.particles();
        let material = *emitter.material();

        for (axis, face) in self.faces.iter_mut().enumerate() {
            (
                &mut face.mass,
                &mut face.velocity,
                &mut face.conductivity,
                &face.records,
            )
                .into_par_iter()
                .for_each(|(mass, velocity, conductivity, records)| {
                    for record in records {
                        let p = &particles[record.particle as usize];
                        let (p_mass, p_velocity, p_phase) = p.face_sample();
                        let wm = record.weight * p_mass;
                        *mass += wm;
                        *velocity += wm * p_velocity[axis];
                        *conductivity += wm * material.heat_conductivity(p_phase);
                    }
                    if *mass > 0.0 {
                        *velocity /= *mass;
                        *conductivity /= *mass;
                    }
                });
        }

        let c = &mut self.centres;
        (
            &mut c.mass,
            &mut c.det_deformation,
            &mut c.det_deformation_elastic,
            &mut c.det_deformation_plastic,
            &mut c.heat_capacity,
            &mut c.temperature,
            &mut c.lambda_inverse,
            &c.records,
        )
            .into_par_iter()
            .for_each(
                |(mass, det, det_elastic, det_plastic, capacity, temperature, lambda_inv, records)| {
                    for record in records {
                        let sample = particles[record.particle as usize].centre_sample();
                        let wm = record.weight * sample.mass;
                        *mass += wm;
                        *det += wm * sample.det_deformation;
                        *det_elastic += wm * sample.det_deformation_elastic;
                        *temperature += wm * sample.temperature;
                        *lambda_inv += wm * sample.lambda_inverse;
                        *capacity += wm * material.heat_capacity(sample.phase);
                    }
                    if *mass > 0.0 {
                        *det /= *mass;
                        *det_elastic /= *mass;
                        *capacity /= *mass;
                        *temperature /= *mass;
                        *lambda_inv /= *mass;
                        if *det_elastic != 0.0 {
                            *det_plastic = *det / *det_elastic;
                        }
                    }
                },
            );
        c.previous_temperature.copy_from_slice(&c.temperature);
    }

    /// First-step particle volume initialisation: every contributing cell
    /// adds `N * m_c / h^3` to the particle's density, then volumes follow
    /// as mass over density.
    pub fn init_particle_volumes(&mut self, emitter: &mut Emitter) {
        let n = self.n as i32;
        let inv_cell_volume = 1.0 / self.cell_size.powi(3);
        let cell_size = self.cell_size;
        let origin = self.origin;
        let centre_mass = &self.centres.mass;
        let n_usize = self.n;

        emitter.particles_mut().par_iter_mut().for_each(|particle| {
            let cell = math::particle_cell(particle.position, cell_size, origin);
            let mut density = 0.0;
            for k in (cell.z - 2)..(cell.z + 4) {
                for j in (cell.y - 2)..(cell.y + 4) {
                    for i in (cell.x - 2)..(cell.x + 4) {
                        if i < 0 || i >= n || j < 0 || j >= n || k < 0 || k >= n {
                            continue;
                        }
                        let index =
                            math::flat_index(i as usize, j as usize, k as usize, n_usize);
                        let mass = centre_mass[index];
                        if mass == 0.0 {
                            continue;
                        }
                        let centre = origin
                            + Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5)
                                * cell_size;
                        let d = (particle.position - centre) / cell_size;
                        let weight = kernels::cubic_bspline_3d(d);
                        if weight > 0.0 {
                            density += weight * mass * inv_cell_volume;
                        }
                    }
                }
            }
            particle.add_density(density);
        });

        emitter.compute_initial_volumes();
    }

    /// Classify faces and cell centres.
    ///
    /// The outer layer collides: a face collides when one of its adjacent
    /// cells is a wall cell. An inner centre is Interior when its own and
    /// all six surrounding face record lists each exceed the particle
    /// threshold, else Empty. Colliding cells on the heated floor hold the
    /// heat-source temperature; other boundary and empty cells hold the
    /// ambient temperature.
    pub fn classify_cells(&mut self) {
        let n = self.n;
        for (axis, face) in self.faces.iter_mut().enumerate() {
            face.state
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, state)| {
                    let (i, j, k) = math::cell_coords(index, n);
                    let coords = [i, j, k];
                    let mut colliding = false;
                    for other in 0..3 {
                        if other == axis {
                            // Adjacent cells along the normal: coords-1 and
                            // coords, so indices 0, 1 and n-1 touch the wall.
                            colliding |= coords[other] <= 1 || coords[other] >= n - 1;
                        } else {
                            colliding |= coords[other] == 0 || coords[other] == n - 1;
                        }
                    }
                    *state = if colliding {
                        CellState::Colliding
                    } else {
                        CellState::Interior
                    };
                });
        }

        let threshold = self.particle_threshold;
        let faces = &self.faces;
        let ambient = self.ambient_temperature;
        let heat_source = self.heat_source_temperature;
        let c = &mut self.centres;
        (
            &mut c.state,
            &mut c.temperature,
            &mut c.previous_temperature,
            &c.records,
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(index, (state, temperature, previous, records))| {
                let (i, j, k) = math::cell_coords(index, n);
                let wall = i == 0
                    || i == n - 1
                    || j == 0
                    || j == n - 1
                    || k == 0
                    || k == n - 1;
                if wall {
                    *state = CellState::Colliding;
                    let held = if j == 0 { heat_source } else { ambient };
                    *temperature = held;
                    *previous = held;
                    return;
                }

                let lower = [
                    faces[0].records[index].len(),
                    faces[1].records[index].len(),
                    faces[2].records[index].len(),
                ];
                let upper = [
                    faces[0].records[math::flat_index(i + 1, j, k, n)].len(),
                    faces[1].records[math::flat_index(i, j + 1, k, n)].len(),
                    faces[2].records[math::flat_index(i, j, k + 1, n)].len(),
                ];
                let populated = records.len() > threshold
                    && lower.iter().all(|&count| count > threshold)
                    && upper.iter().all(|&count| count > threshold);

                if populated {
                    *state = CellState::Interior;
                } else {
                    *state = CellState::Empty;
                    *temperature = ambient;
                    *previous = ambient;
                }
            });
    }

    /// Stick boundary condition: colliding faces lose their normal velocity.
    pub fn apply_boundary_velocities(&mut self) {
        for face in &mut self.faces {
            (&mut face.star_velocity, &face.state)
                .into_par_iter()
                .for_each(|(star, state)| {
                    if *state == CellState::Colliding {
                        *star = 0.0;
                    }
                });
        }
    }

    // ========== Viewer accessors ==========

    #[inline]
    pub fn cell_state(&self, index: usize) -> CellState {
        self.centres.state[index]
    }

    #[inline]
    pub fn cell_temperature(&self, index: usize) -> f32 {
        self.centres.temperature[index]
    }
}

/// Rebuild one record list per cell for nodes at `offset` (in cell units)
/// from the grid corner. Each cell scans the buckets a cubic-B-spline
/// support away and keeps the particles whose weight product is non-zero.
fn build_record_lists(
    records: &mut [Vec<InterpolationRecord>],
    buckets: &[Vec<u32>],
    particles: &[Particle],
    n: usize,
    cell_size: f32,
    origin: Vec3,
    offset: Vec3,
) {
    let inv_h = 1.0 / cell_size;
    records
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, list)| {
            let (i, j, k) = math::cell_coords(index, n);
            let node = origin + (Vec3::new(i as f32, j as f32, k as f32) + offset) * cell_size;

            let lo = |c: usize| c.saturating_sub(3);
            let hi = |c: usize| (c + 2).min(n - 1);
            for bk in lo(k)..=hi(k) {
                for bj in lo(j)..=hi(j) {
                    for bi in lo(i)..=hi(i) {
                        let bucket = &buckets[math::flat_index(bi, bj, bk, n)];
                        for &particle_index in bucket {
                            let particle = &particles[particle_index as usize];
                            let d = (particle.position - node) * inv_h;
                            let weight = kernels::cubic_bspline_3d(d);
                            if weight > 0.0 {
                                list.push(InterpolationRecord {
                                    particle: particle_index,
                                    weight,
                                    weight_grad: kernels::cubic_bspline_grad(d, inv_h),
                                    quad_weight: kernels::tight_quadratic_3d(d),
                                    quad_weight_grad: kernels::tight_quadratic_grad(d, inv_h),
                                });
                            }
                        }
                    }
                }
            }
        });
}
