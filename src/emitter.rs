//! Emitter: owning container for the particles of one material body.
//!
//! The emitter also holds the shared material constants that the grid
//! transfer reads (heat capacities, conductivities, latent heat, plastic
//! limits). Routines that need the constants receive `&Material` explicitly.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::particle::{CollisionBox, Particle, Phase};

/// Material constants shared by all particles of an emitter.
/// Temperatures are in Kelvin.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Material {
    /// Base Lame mu (shear) before hardening.
    pub lame_mu: f32,
    /// Base Lame lambda before hardening.
    pub lame_lambda: f32,
    /// Hardening coefficient xi in exp(xi (1 - J_P)).
    pub hardness: f32,
    /// Critical compression theta_c: singular values stay above 1 - theta_c.
    pub compression_limit: f32,
    /// Critical stretch theta_s: singular values stay below 1 + theta_s.
    pub stretch_limit: f32,
    pub heat_capacity_solid: f32,
    pub heat_capacity_liquid: f32,
    pub heat_conductivity_solid: f32,
    pub heat_conductivity_liquid: f32,
    /// Latent heat L of the solid/liquid transition.
    pub latent_heat: f32,
    /// Freezing/melting temperature (Kelvin).
    pub freezing_temperature: f32,
}

impl Material {
    #[inline]
    pub fn heat_capacity(&self, phase: Phase) -> f32 {
        match phase {
            Phase::Solid => self.heat_capacity_solid,
            Phase::Liquid => self.heat_capacity_liquid,
        }
    }

    #[inline]
    pub fn heat_conductivity(&self, phase: Phase) -> f32 {
        match phase {
            Phase::Solid => self.heat_conductivity_solid,
            Phase::Liquid => self.heat_conductivity_liquid,
        }
    }
}

/// Owns the particle array of one material body.
pub struct Emitter {
    material: Material,
    particles: Vec<Particle>,
}

impl Emitter {
    pub fn new(material: Material) -> Self {
        Self {
            material,
            particles: Vec::new(),
        }
    }

    pub fn with_capacity(material: Material, capacity: usize) -> Self {
        Self {
            material,
            particles: Vec::with_capacity(capacity),
        }
    }

    /// Spawn a particle at rest. `temperature` is in Kelvin.
    pub fn spawn(&mut self, position: Vec3, mass: f32, temperature: f32, phase: Phase) {
        self.particles
            .push(Particle::new(position, mass, temperature, phase, &self.material));
    }

    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    #[inline]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    #[inline]
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn total_mass(&self) -> f32 {
        self.particles.iter().map(|p| p.mass).sum()
    }

    /// Freeze initial volumes after the first-step density accumulation.
    pub fn compute_initial_volumes(&mut self) {
        self.particles
            .par_iter_mut()
            .for_each(Particle::compute_initial_volume);
    }

    /// Apply the step-initial hook to every particle.
    pub fn preset_particles(&mut self, alpha: f32, beta: f32) {
        let material = self.material;
        self.particles
            .par_iter_mut()
            .for_each(|p| p.preset_for_step(alpha, beta, &material));
    }

    /// Run the per-particle constitutive update.
    pub fn update_particles(&mut self, dt: f32, bounds: &CollisionBox) {
        let material = self.material;
        self.particles
            .par_iter_mut()
            .for_each(|p| p.update(dt, bounds, &material));
    }
}
