//! Simulation parameters as handed over by the scene-file reader.
//!
//! The external collaborator parses the Houdini-style scene and produces a
//! [`SimulationParameters`] value (serde makes that a one-liner for JSON
//! test fixtures). Validation happens once at construction; a simulation
//! never starts from an invalid parameter set. Temperatures arrive in
//! Celsius and are converted to Kelvin at the controller boundary.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    CELSIUS_TO_KELVIN, DEFAULT_FRAME_INTERVAL, DEFAULT_PARTICLE_THRESHOLD,
    DEFAULT_SOLVER_MAX_ITERATIONS, DEFAULT_SOLVER_TOLERANCE,
};
use crate::emitter::Material;

/// Which deviatoric velocity update to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    Explicit,
    #[default]
    Implicit,
}

/// Convergence settings shared by the iterative solvers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_SOLVER_TOLERANCE,
            max_iterations: DEFAULT_SOLVER_MAX_ITERATIONS,
        }
    }
}

fn default_tolerance() -> f32 {
    DEFAULT_SOLVER_TOLERANCE
}

fn default_max_iterations() -> usize {
    DEFAULT_SOLVER_MAX_ITERATIONS
}

/// Material constants as read from the scene file.
/// `freezing_temperature` is in Celsius.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MaterialParameters {
    pub lame_mu: f32,
    pub lame_lambda: f32,
    pub hardness: f32,
    pub compression_limit: f32,
    pub stretch_limit: f32,
    pub heat_capacity_solid: f32,
    pub heat_capacity_liquid: f32,
    pub heat_conductivity_solid: f32,
    pub heat_conductivity_liquid: f32,
    pub latent_heat: f32,
    pub freezing_temperature: f32,
}

impl MaterialParameters {
    pub(crate) fn to_material(self) -> Material {
        Material {
            lame_mu: self.lame_mu,
            lame_lambda: self.lame_lambda,
            hardness: self.hardness,
            compression_limit: self.compression_limit,
            stretch_limit: self.stretch_limit,
            heat_capacity_solid: self.heat_capacity_solid,
            heat_capacity_liquid: self.heat_capacity_liquid,
            heat_conductivity_solid: self.heat_conductivity_solid,
            heat_conductivity_liquid: self.heat_conductivity_liquid,
            latent_heat: self.latent_heat,
            freezing_temperature: self.freezing_temperature + CELSIUS_TO_KELVIN,
        }
    }
}

/// One initial particle from the scene file. `temperature` is in Celsius.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParticleSeed {
    pub position: Vec3,
    pub mass: f32,
    pub temperature: f32,
    #[serde(default = "default_solid")]
    pub solid: bool,
}

fn default_solid() -> bool {
    true
}

/// Everything the controller needs to run a simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub time_step: f32,
    pub frame_count: u32,
    #[serde(default = "default_frame_interval")]
    pub frame_interval: f32,

    pub box_origin: Vec3,
    pub box_size: f32,
    pub cells_per_side: usize,

    pub material: MaterialParameters,

    /// Celsius.
    pub ambient_temperature: f32,
    /// Celsius; held by the heated floor plane.
    pub heat_source_temperature: f32,

    /// PIC/FLIP blend for velocity (0 = PIC, 1 = FLIP).
    #[serde(default = "default_alpha")]
    pub velocity_blend: f32,
    /// PIC/FLIP blend for temperature.
    #[serde(default = "default_beta")]
    pub temperature_blend: f32,

    #[serde(default)]
    pub integration: Integration,
    #[serde(default = "default_particle_threshold")]
    pub particle_threshold: usize,
    #[serde(default)]
    pub solver: SolverSettings,

    pub particles: Vec<ParticleSeed>,
}

fn default_frame_interval() -> f32 {
    DEFAULT_FRAME_INTERVAL
}

fn default_alpha() -> f32 {
    0.95
}

fn default_beta() -> f32 {
    0.95
}

fn default_particle_threshold() -> usize {
    DEFAULT_PARTICLE_THRESHOLD
}

/// Reasons a parameter set is rejected at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("time step must be positive, got {0}")]
    InvalidTimeStep(f32),
    #[error("frame interval must be positive, got {0}")]
    InvalidFrameInterval(f32),
    #[error("grid needs at least 4 cells per side, got {0}")]
    TooFewCells(usize),
    #[error("bounding box size must be positive, got {0}")]
    InvalidBoxSize(f32),
    #[error("material parameter `{name}` is invalid: {value}")]
    InvalidMaterial { name: &'static str, value: f32 },
    #[error("blend factor `{name}` must lie in [0, 1], got {value}")]
    InvalidBlend { name: &'static str, value: f32 },
    #[error("solver tolerance must be positive, got {0}")]
    InvalidTolerance(f32),
    #[error("particle {index} has non-positive mass {mass}")]
    InvalidParticleMass { index: usize, mass: f32 },
    #[error("particle {index} lies outside the simulated box")]
    ParticleOutsideBox { index: usize },
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_step > 0.0) {
            return Err(ConfigError::InvalidTimeStep(self.time_step));
        }
        if !(self.frame_interval > 0.0) {
            return Err(ConfigError::InvalidFrameInterval(self.frame_interval));
        }
        if self.cells_per_side < 4 {
            return Err(ConfigError::TooFewCells(self.cells_per_side));
        }
        if !(self.box_size > 0.0) {
            return Err(ConfigError::InvalidBoxSize(self.box_size));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(ConfigError::InvalidTolerance(self.solver.tolerance));
        }

        let m = &self.material;
        let positive = [
            ("lame_mu", m.lame_mu),
            ("lame_lambda", m.lame_lambda),
            ("heat_capacity_solid", m.heat_capacity_solid),
            ("heat_capacity_liquid", m.heat_capacity_liquid),
            ("heat_conductivity_solid", m.heat_conductivity_solid),
            ("heat_conductivity_liquid", m.heat_conductivity_liquid),
            ("latent_heat", m.latent_heat),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::InvalidMaterial { name, value });
            }
        }
        if !(m.hardness >= 0.0) {
            return Err(ConfigError::InvalidMaterial {
                name: "hardness",
                value: m.hardness,
            });
        }
        if !(m.compression_limit > 0.0 && m.compression_limit < 1.0) {
            return Err(ConfigError::InvalidMaterial {
                name: "compression_limit",
                value: m.compression_limit,
            });
        }
        if !(m.stretch_limit >= 0.0) {
            return Err(ConfigError::InvalidMaterial {
                name: "stretch_limit",
                value: m.stretch_limit,
            });
        }

        for (name, value) in [
            ("velocity_blend", self.velocity_blend),
            ("temperature_blend", self.temperature_blend),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidBlend { name, value });
            }
        }

        let min = self.box_origin;
        let max = self.box_origin + Vec3::splat(self.box_size);
        for (index, seed) in self.particles.iter().enumerate() {
            if !(seed.mass > 0.0) {
                return Err(ConfigError::InvalidParticleMass {
                    index,
                    mass: seed.mass,
                });
            }
            let p = seed.position;
            if p.x < min.x || p.y < min.y || p.z < min.z || p.x > max.x || p.y > max.y || p.z > max.z
            {
                return Err(ConfigError::ParticleOutsideBox { index });
            }
        }

        Ok(())
    }
}
