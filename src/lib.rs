//! Hybrid MPM solver for heat-driven melting of elasto-plastic materials.
//!
//! Lagrangian particles carry the constitutive state (elastic/plastic
//! deformation, temperature, latent-heat buffer); a MAC-staggered Eulerian
//! grid computes forces, the pressure projection and the heat diffusion.
//! Each step transfers particle state to the grid, updates velocities and
//! temperatures there, and gathers the result back before the particles
//! advance their deformation gradients, phase and position.
//!
//! # Example
//!
//! ```no_run
//! use melt3d::{MeltSimulation, SimulationParameters};
//!
//! let params: SimulationParameters =
//!     serde_json::from_str(&std::fs::read_to_string("scene.json").unwrap()).unwrap();
//! let mut sim = MeltSimulation::new(params).unwrap();
//! sim.run(|frame, particles| {
//!     println!("frame {}: {} particles", frame, particles.len());
//! });
//! ```

pub mod config;
pub mod constants;
pub mod deviatoric;
pub mod emitter;
pub mod grid;
pub mod heat;
pub mod kernels;
pub mod math;
pub mod particle;
pub mod pressure;
pub mod solver;
pub mod transfer;

pub use config::{
    ConfigError, Integration, MaterialParameters, ParticleSeed, SimulationParameters,
    SolverSettings,
};
pub use emitter::{Emitter, Material};
pub use glam::{Mat3, Vec3};
pub use grid::{CellState, MacGrid};
pub use particle::{CollisionBox, Particle, Phase};

use crate::constants::{CELSIUS_TO_KELVIN, GRAVITY_Y};
use crate::deviatoric::DeviatoricSolver;
use crate::heat::HeatSolver;
use crate::pressure::PressureSolver;

/// The simulation controller: owns the emitter and the grid and drives the
/// fixed-timestep loop.
pub struct MeltSimulation {
    grid: MacGrid,
    emitter: Emitter,
    deviatoric: DeviatoricSolver,
    pressure: PressureSolver,
    heat: HeatSolver,

    time_step: f32,
    velocity_blend: f32,
    temperature_blend: f32,
    integration: Integration,
    frame_count: u32,
    frame_interval: f32,
    steps_taken: u64,
}

impl MeltSimulation {
    /// Validate the parameters and build the simulation. Temperatures in
    /// the parameter set are Celsius; everything past this point is Kelvin.
    pub fn new(params: SimulationParameters) -> Result<Self, ConfigError> {
        params.validate()?;

        let material = params.material.to_material();
        let mut emitter = Emitter::with_capacity(material, params.particles.len());
        for seed in &params.particles {
            let phase = if seed.solid { Phase::Solid } else { Phase::Liquid };
            emitter.spawn(
                seed.position,
                seed.mass,
                seed.temperature + CELSIUS_TO_KELVIN,
                phase,
            );
        }

        let grid = MacGrid::new(
            params.box_origin,
            params.box_size,
            params.cells_per_side,
            Vec3::new(0.0, GRAVITY_Y, 0.0),
            params.ambient_temperature + CELSIUS_TO_KELVIN,
            params.heat_source_temperature + CELSIUS_TO_KELVIN,
            params.particle_threshold,
        );

        let total = grid.total_cells();
        let tolerance = params.solver.tolerance;
        let max_iterations = params.solver.max_iterations;

        Ok(Self {
            grid,
            emitter,
            deviatoric: DeviatoricSolver::new(total, tolerance, max_iterations),
            pressure: PressureSolver::new(params.cells_per_side, tolerance, max_iterations),
            heat: HeatSolver::new(params.cells_per_side, tolerance, max_iterations),
            time_step: params.time_step,
            velocity_blend: params.velocity_blend,
            temperature_blend: params.temperature_blend,
            integration: params.integration,
            frame_count: params.frame_count,
            frame_interval: params.frame_interval,
            steps_taken: 0,
        })
    }

    /// Advance the simulation by one time step.
    pub fn step(&mut self) {
        let dt = self.time_step;
        let first_step = self.steps_taken == 0;

        self.grid.clear();
        self.grid.build_interpolation_records(&self.emitter);
        self.grid.transfer_particle_data(&self.emitter);
        if first_step {
            self.grid.init_particle_volumes(&mut self.emitter);
        }
        self.grid.classify_cells();

        self.deviatoric
            .update_velocity(&mut self.grid, &self.emitter, dt, self.integration);
        self.grid.apply_boundary_velocities();
        self.pressure.project(&mut self.grid, dt);
        self.heat.solve(&mut self.grid, dt);

        transfer::gather_to_particles(&self.grid, &mut self.emitter);
        self.emitter
            .preset_particles(self.velocity_blend, self.temperature_blend);
        let bounds = self.grid.collision_box();
        self.emitter.update_particles(dt, &bounds);

        self.steps_taken += 1;
    }

    /// Run until the configured frame count, handing each finished frame's
    /// particles to the exporter. Multiple time steps are taken per frame
    /// when the step is shorter than the frame interval.
    pub fn run(&mut self, mut exporter: impl FnMut(u32, &[Particle])) {
        let mut elapsed = 0.0f32;
        let mut frames = 0u32;
        while frames < self.frame_count {
            self.step();
            elapsed += self.time_step;
            if elapsed + 1e-9 >= self.frame_interval {
                elapsed -= self.frame_interval;
                exporter(frames, self.emitter.particles());
                frames += 1;
            }
        }
    }

    #[inline]
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    #[inline]
    pub fn particles(&self) -> &[Particle] {
        self.emitter.particles()
    }

    #[inline]
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    #[inline]
    pub fn grid(&self) -> &MacGrid {
        &self.grid
    }

    // ========== Viewer interface (safe between steps) ==========

    /// Lower corner of the simulated bounding box.
    #[inline]
    pub fn bounding_box_position(&self) -> Vec3 {
        self.grid.bounding_box_origin()
    }

    #[inline]
    pub fn bounding_box_size(&self) -> f32 {
        self.grid.bounding_box_size()
    }

    /// Corner of the grid including the collision layer (one cell below the
    /// bounding box).
    #[inline]
    pub fn grid_position(&self) -> Vec3 {
        self.grid.origin
    }

    #[inline]
    pub fn grid_cell_size(&self) -> f32 {
        self.grid.cell_size
    }

    #[inline]
    pub fn grid_cells_per_side(&self) -> usize {
        self.grid.n
    }

    #[inline]
    pub fn grid_cell_count(&self) -> usize {
        self.grid.total_cells()
    }

    #[inline]
    pub fn grid_cell_state(&self, index: usize) -> CellState {
        self.grid.cell_state(index)
    }

    /// Cell temperature in Kelvin.
    #[inline]
    pub fn grid_cell_temperature(&self, index: usize) -> f32 {
        self.grid.cell_temperature(index)
    }

    /// Ambient temperature in Kelvin.
    #[inline]
    pub fn ambient_temperature(&self) -> f32 {
        self.grid.ambient_temperature
    }

    /// Heat-source temperature in Kelvin.
    #[inline]
    pub fn heat_source_temperature(&self) -> f32 {
        self.grid.heat_source_temperature
    }
}
