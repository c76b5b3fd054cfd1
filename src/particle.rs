//! Material points for the melting simulation.
//!
//! Each particle carries the full constitutive state: elastic/plastic
//! deformation gradients with cached polar factors, hardening-dependent Lame
//! parameters, and the latent-heat buffer that drives solid/liquid phase
//! transitions. The per-step update advances the deformation gradient with
//! the gathered velocity gradient, projects it back into the elastic region,
//! runs the phase transition, resolves box collisions and advects.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::DET_EPSILON;
use crate::emitter::Material;
use crate::math;

/// Solid/liquid phase flag. A particle with a partially filled latent-heat
/// buffer stays `Solid`; `Liquid` implies the buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Solid,
    Liquid,
}

/// Axis-aligned collision box (the interior of the simulated volume).
#[derive(Clone, Copy, Debug)]
pub struct CollisionBox {
    pub min: Vec3,
    pub max: Vec3,
}

/// Cell-centre aggregates read from a particle during the grid transfer.
#[derive(Clone, Copy, Debug)]
pub struct CentreSample {
    pub mass: f32,
    pub det_deformation: f32,
    pub det_deformation_elastic: f32,
    pub phase: Phase,
    pub temperature: f32,
    pub lambda_inverse: f32,
}

/// A single material point.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub previous_velocity: Vec3,
    pub velocity_gradient: Mat3,

    pub mass: f32,
    /// Accumulated during the first step, frozen afterwards.
    pub initial_density: f32,
    pub initial_volume: f32,

    /// Elastic deformation gradient F_E.
    pub deformation_elastic: Mat3,
    /// Plastic deformation gradient F_P.
    pub deformation_plastic: Mat3,
    pub det_elastic: f32,
    pub det_plastic: f32,

    /// Deviatoric elastic deformation J_E^{-1/3} F_E, refreshed each step.
    pub deviatoric_elastic: Mat3,
    /// Rotation factor of the polar decomposition of the deviatoric gradient.
    pub rotation: Mat3,
    /// Stretch factor of the same decomposition.
    pub stretch: Mat3,

    /// Hardening-scaled Lame parameters.
    pub lame_mu: f32,
    pub lame_lambda: f32,

    pub temperature: f32,
    pub previous_temperature: f32,
    /// Latent-heat buffer in [0, L]: 0 for settled solid, L for liquid.
    pub transition_heat: f32,
    pub phase: Phase,

    /// Grid samples accumulated by the gather, blended in `preset_for_step`.
    pub grid_velocity: Vec3,
    pub grid_velocity_delta: Vec3,
    pub grid_temperature: f32,
    pub grid_temperature_delta: f32,

    /// Set when a deformation determinant had to be clamped.
    pub degenerate: bool,
}

impl Particle {
    /// Create a particle at rest with identity deformation.
    /// `temperature` is in Kelvin; the emitter handles unit conversion.
    pub fn new(
        position: Vec3,
        mass: f32,
        temperature: f32,
        phase: Phase,
        material: &Material,
    ) -> Self {
        let transition_heat = match phase {
            Phase::Solid => 0.0,
            Phase::Liquid => material.latent_heat,
        };
        Self {
            position,
            velocity: Vec3::ZERO,
            previous_velocity: Vec3::ZERO,
            velocity_gradient: Mat3::ZERO,
            mass,
            initial_density: 0.0,
            initial_volume: 0.0,
            deformation_elastic: Mat3::IDENTITY,
            deformation_plastic: Mat3::IDENTITY,
            det_elastic: 1.0,
            det_plastic: 1.0,
            deviatoric_elastic: Mat3::IDENTITY,
            rotation: Mat3::IDENTITY,
            stretch: Mat3::IDENTITY,
            lame_mu: material.lame_mu,
            lame_lambda: material.lame_lambda,
            temperature,
            previous_temperature: temperature,
            transition_heat,
            phase,
            grid_velocity: Vec3::ZERO,
            grid_velocity_delta: Vec3::ZERO,
            grid_temperature: 0.0,
            grid_temperature_delta: 0.0,
            degenerate: false,
        }
    }

    /// Total deformation determinant J = J_E * J_P.
    #[inline]
    pub fn det_deformation(&self) -> f32 {
        self.det_elastic * self.det_plastic
    }

    /// Data read by the cell-face transfer.
    #[inline]
    pub fn face_sample(&self) -> (f32, Vec3, Phase) {
        (self.mass, self.velocity, self.phase)
    }

    /// Data read by the cell-centre transfer.
    #[inline]
    pub fn centre_sample(&self) -> CentreSample {
        CentreSample {
            mass: self.mass,
            det_deformation: self.det_deformation(),
            det_deformation_elastic: self.det_elastic,
            phase: self.phase,
            temperature: self.temperature,
            lambda_inverse: 1.0 / self.lame_lambda,
        }
    }

    /// Add a density contribution during first-step volume initialisation.
    #[inline]
    pub fn add_density(&mut self, density: f32) {
        self.initial_density += density;
    }

    /// Freeze the initial volume once the density accumulation is complete.
    #[inline]
    pub fn compute_initial_volume(&mut self) {
        if self.initial_density > 0.0 {
            self.initial_volume = self.mass / self.initial_density;
        }
    }

    /// Step-initial hook: blends the gathered PIC/FLIP contributions into
    /// velocity (`alpha`) and temperature (`beta`), then refreshes the
    /// deviatoric deformation cache and the hardening-scaled Lame
    /// parameters.
    pub fn preset_for_step(&mut self, alpha: f32, beta: f32, material: &Material) {
        self.previous_velocity = self.velocity;
        self.velocity = (1.0 - alpha) * self.grid_velocity
            + alpha * (self.velocity + self.grid_velocity_delta);

        self.previous_temperature = self.temperature;
        self.temperature = (1.0 - beta) * self.grid_temperature
            + beta * (self.temperature + self.grid_temperature_delta);

        self.recompute_lame(material);
        self.refresh_deviatoric_cache();
    }

    /// Full per-step particle update: deformation advance and plastic split,
    /// phase transition, box collision, advection.
    pub fn update(&mut self, dt: f32, bounds: &CollisionBox, material: &Material) {
        self.update_deformation_gradient(dt, material);
        self.apply_phase_transition(material);
        self.resolve_collision(dt, bounds);
        self.position += dt * self.velocity;
        self.clamp_to_bounds(bounds);
    }

    /// Advance F = (I + dt grad v) F_E F_P, then split the trial elastic
    /// gradient by clamping its singular values to the elastic region
    /// [1 - theta_c, 1 + theta_s] and pushing the overflow into F_P.
    fn update_deformation_gradient(&mut self, dt: f32, material: &Material) {
        let advance = Mat3::IDENTITY + self.velocity_gradient * dt;
        let elastic_trial = advance * self.deformation_elastic;
        let total = elastic_trial * self.deformation_plastic;

        let (u, sigma, v) = math::svd3(&elastic_trial);
        let lo = 1.0 - material.compression_limit;
        let hi = 1.0 + material.stretch_limit;
        let clamped = sigma.clamp(Vec3::splat(lo), Vec3::splat(hi));

        self.deformation_elastic = u * Mat3::from_diagonal(clamped) * v.transpose();
        self.deformation_plastic =
            v * Mat3::from_diagonal(clamped.recip()) * u.transpose() * total;

        self.refresh_determinants();
        self.recompute_lame(material);
        self.refresh_deviatoric_cache();
    }

    fn refresh_determinants(&mut self) {
        self.det_elastic = clamp_determinant(self.deformation_elastic.determinant(), &mut self.degenerate);
        self.det_plastic = clamp_determinant(self.deformation_plastic.determinant(), &mut self.degenerate);
    }

    /// mu = mu0 exp(xi (1 - J_P)), lambda = lambda0 exp(xi (1 - J_P)).
    fn recompute_lame(&mut self, material: &Material) {
        let hardening = (material.hardness * (1.0 - self.det_plastic)).exp();
        self.lame_mu = material.lame_mu * hardening;
        self.lame_lambda = material.lame_lambda * hardening;
    }

    /// Refresh J_E^{-1/3} F_E and its polar factors.
    fn refresh_deviatoric_cache(&mut self) {
        let scale = 1.0 / self.det_elastic.cbrt();
        self.deviatoric_elastic = self.deformation_elastic * scale;
        let (rotation, stretch) = math::polar_decomposition(&self.deviatoric_elastic);
        self.rotation = rotation;
        self.stretch = stretch;
    }

    /// Route the heat absorbed since the previous step,
    /// `dQ = c m (T - T_prev)`, through the latent-heat buffer once the
    /// melt point is crossed, pinning the temperature to the melt point
    /// while the buffer fills or drains. Completing the buffer flips the
    /// phase; the leftover heat goes back into temperature.
    fn apply_phase_transition(&mut self, material: &Material) {
        let t_melt = material.freezing_temperature;
        let latent = material.latent_heat;

        let transitioning =
            self.transition_heat > 0.0 && self.transition_heat < latent;
        if !transitioning {
            let melting = self.phase == Phase::Solid && self.temperature >= t_melt;
            let freezing = self.phase == Phase::Liquid && self.temperature < t_melt;
            if !melting && !freezing {
                return;
            }
        }

        let capacity = material.heat_capacity(self.phase);
        self.transition_heat +=
            capacity * self.mass * (self.temperature - self.previous_temperature);
        self.temperature = t_melt;

        if self.transition_heat >= latent {
            let leftover = self.transition_heat - latent;
            self.transition_heat = latent;
            self.phase = Phase::Liquid;
            self.temperature = t_melt + leftover / (material.heat_capacity_liquid * self.mass);
        } else if self.transition_heat <= 0.0 {
            let deficit = self.transition_heat;
            self.transition_heat = 0.0;
            self.phase = Phase::Solid;
            self.temperature = t_melt + deficit / (material.heat_capacity_solid * self.mass);
        } else {
            // Mid-transition: treated as solid, pinned at the melt point.
            self.phase = Phase::Solid;
        }
    }

    /// Sticky box collision: a particle whose predicted position penetrates
    /// a wall loses the velocity component along that wall's normal.
    fn resolve_collision(&mut self, dt: f32, bounds: &CollisionBox) {
        let predicted = self.position + dt * self.velocity;
        for axis in 0..3 {
            if predicted[axis] < bounds.min[axis] || predicted[axis] > bounds.max[axis] {
                self.velocity[axis] = 0.0;
            }
        }
    }

    /// Escape recovery: clamp a particle that left the simulated volume back
    /// inside and zero its outward velocity component.
    fn clamp_to_bounds(&mut self, bounds: &CollisionBox) {
        for axis in 0..3 {
            if self.position[axis] < bounds.min[axis] {
                self.position[axis] = bounds.min[axis];
                if self.velocity[axis] < 0.0 {
                    self.velocity[axis] = 0.0;
                }
            } else if self.position[axis] > bounds.max[axis] {
                self.position[axis] = bounds.max[axis];
                if self.velocity[axis] > 0.0 {
                    self.velocity[axis] = 0.0;
                }
            }
        }
    }
}

fn clamp_determinant(det: f32, degenerate: &mut bool) -> f32 {
    if det.abs() >= DET_EPSILON {
        return det;
    }
    *degenerate = true;
    if det == 0.0 {
        DET_EPSILON
    } else {
        math::sign(det) * DET_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Material;

    fn test_material() -> Material {
        Material {
            lame_mu: 1000.0,
            lame_lambda: 1500.0,
            hardness: 10.0,
            compression_limit: 0.025,
            stretch_limit: 0.0075,
            heat_capacity_solid: 2000.0,
            heat_capacity_liquid: 4000.0,
            heat_conductivity_solid: 2.2,
            heat_conductivity_liquid: 0.6,
            latent_heat: 334.0,
            freezing_temperature: 273.15,
        }
    }

    fn particle_at_melt(phase: Phase) -> Particle {
        let material = test_material();
        Particle::new(Vec3::splat(0.5), 0.01, material.freezing_temperature, phase, &material)
    }

    #[test]
    fn new_particle_buffer_matches_phase() {
        let material = test_material();
        let solid = Particle::new(Vec3::ZERO, 1.0, 250.0, Phase::Solid, &material);
        assert_eq!(solid.transition_heat, 0.0);
        let liquid = Particle::new(Vec3::ZERO, 1.0, 300.0, Phase::Liquid, &material);
        assert_eq!(liquid.transition_heat, material.latent_heat);
    }

    #[test]
    fn pure_stretch_advances_deformation() {
        let material = test_material();
        let mut p = Particle::new(Vec3::ZERO, 1.0, 250.0, Phase::Solid, &material);
        // Uniform expansion rate below the stretch limit per step.
        p.velocity_gradient = Mat3::from_diagonal(Vec3::splat(0.5));
        let bounds = CollisionBox {
            min: Vec3::splat(-10.0),
            max: Vec3::splat(10.0),
        };
        p.update(0.01, &bounds, &material);
        assert!(p.det_elastic > 1.0);
        assert!(p.det_elastic > 0.0 && p.det_plastic > 0.0);
    }

    #[test]
    fn plastic_split_respects_limits() {
        let material = test_material();
        let mut p = Particle::new(Vec3::ZERO, 1.0, 250.0, Phase::Solid, &material);
        // Strong compression: far beyond the elastic region in one step.
        p.velocity_gradient = Mat3::from_diagonal(Vec3::new(-8.0, -8.0, -8.0));
        let bounds = CollisionBox {
            min: Vec3::splat(-10.0),
            max: Vec3::splat(10.0),
        };
        p.update(0.01, &bounds, &material);

        let (_, sigma, _) = math::svd3(&p.deformation_elastic);
        let lo = 1.0 - material.compression_limit - 1e-4;
        let hi = 1.0 + material.stretch_limit + 1e-4;
        for s in [sigma.x, sigma.y, sigma.z] {
            assert!(s >= lo && s <= hi, "singular value {} outside [{}, {}]", s, lo, hi);
        }
        // Overflow went into the plastic part.
        assert!(p.det_plastic < 1.0);
        assert!(p.det_elastic > 0.0 && p.det_plastic > 0.0);
        // Hardening stiffened the material.
        assert!(p.lame_mu > material.lame_mu);
    }

    #[test]
    fn deviatoric_cache_has_unit_determinant() {
        let material = test_material();
        let mut p = Particle::new(Vec3::ZERO, 1.0, 250.0, Phase::Solid, &material);
        p.velocity_gradient = Mat3::from_diagonal(Vec3::new(0.4, -0.2, 0.1));
        let bounds = CollisionBox {
            min: Vec3::splat(-10.0),
            max: Vec3::splat(10.0),
        };
        p.update(0.01, &bounds, &material);
        assert!((p.deviatoric_elastic.determinant() - 1.0).abs() < 1e-4);
        assert!((p.rotation.determinant() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn solid_heated_past_melt_fills_buffer() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Solid);
        p.previous_temperature = material.freezing_temperature;
        p.temperature = material.freezing_temperature + 1.0;
        p.apply_phase_transition(&material);

        assert_eq!(p.phase, Phase::Solid);
        assert_eq!(p.temperature, material.freezing_temperature);
        let expected = material.heat_capacity_solid * p.mass * 1.0;
        assert!((p.transition_heat - expected).abs() < 1e-4);
    }

    #[test]
    fn buffer_charge_measures_heat_since_previous_step() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Solid);
        // Crossing step: the particle was 5 K below the melt point and the
        // gather heated it 5 K past it. The full step's heat goes through
        // the buffer, not just the part above the melt point.
        p.previous_temperature = material.freezing_temperature - 5.0;
        p.temperature = material.freezing_temperature + 5.0;
        p.apply_phase_transition(&material);

        let expected = material.heat_capacity_solid * p.mass * 10.0;
        assert!(
            (p.transition_heat - expected).abs() < 1e-4,
            "buffer {} expected {}",
            p.transition_heat,
            expected
        );
        assert_eq!(p.phase, Phase::Solid);
        assert_eq!(p.temperature, material.freezing_temperature);
    }

    #[test]
    fn buffer_overflow_melts_particle() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Solid);
        // Enough heat to complete the transition and warm the liquid.
        let overheat = (material.latent_heat + 40.0) / (material.heat_capacity_solid * p.mass);
        p.temperature = material.freezing_temperature + overheat;
        p.apply_phase_transition(&material);

        assert_eq!(p.phase, Phase::Liquid);
        assert_eq!(p.transition_heat, material.latent_heat);
        assert!(p.temperature > material.freezing_temperature);
    }

    #[test]
    fn liquid_cooled_below_melt_drains_buffer() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Liquid);
        let subcool = (material.latent_heat + 20.0) / (material.heat_capacity_liquid * p.mass);
        p.temperature = material.freezing_temperature - subcool;
        p.apply_phase_transition(&material);

        assert_eq!(p.phase, Phase::Solid);
        assert_eq!(p.transition_heat, 0.0);
        assert!(p.temperature < material.freezing_temperature);
    }

    #[test]
    fn warm_liquid_keeps_full_buffer() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Liquid);
        p.temperature = material.freezing_temperature + 5.0;
        p.apply_phase_transition(&material);
        assert_eq!(p.phase, Phase::Liquid);
        assert_eq!(p.transition_heat, material.latent_heat);
        // Temperature untouched: no transition in progress.
        assert_eq!(p.temperature, material.freezing_temperature + 5.0);
    }

    #[test]
    fn cold_solid_keeps_empty_buffer() {
        let material = test_material();
        let mut p = particle_at_melt(Phase::Solid);
        p.temperature = material.freezing_temperature - 30.0;
        p.apply_phase_transition(&material);
        assert_eq!(p.phase, Phase::Solid);
        assert_eq!(p.transition_heat, 0.0);
    }

    #[test]
    fn collision_zeroes_penetrating_velocity() {
        let material = test_material();
        let bounds = CollisionBox {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        };
        let mut p = Particle::new(Vec3::new(0.01, 0.5, 0.5), 1.0, 250.0, Phase::Solid, &material);
        p.velocity = Vec3::new(-5.0, 0.3, 0.0);
        p.update(0.01, &bounds, &material);
        assert_eq!(p.velocity.x, 0.0);
        assert!((p.velocity.y - 0.3).abs() < 1e-6);
        assert!(p.position.x >= bounds.min.x);
    }

    #[test]
    fn escaped_particle_is_clamped_back() {
        let material = test_material();
        let bounds = CollisionBox {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        };
        let mut p = Particle::new(Vec3::new(1.8, 0.5, 0.5), 1.0, 250.0, Phase::Solid, &material);
        p.velocity = Vec3::new(2.0, 0.0, 0.0);
        p.clamp_to_bounds(&bounds);
        assert_eq!(p.position.x, bounds.max.x);
        assert_eq!(p.velocity.x, 0.0);
    }

    #[test]
    fn preset_blends_pic_and_flip() {
        let material = test_material();
        let mut p = Particle::new(Vec3::ZERO, 1.0, 250.0, Phase::Solid, &material);
        p.velocity = Vec3::new(1.0, 0.0, 0.0);
        p.grid_velocity = Vec3::new(2.0, 0.0, 0.0);
        p.grid_velocity_delta = Vec3::new(0.5, 0.0, 0.0);
        p.grid_temperature = 260.0;
        p.grid_temperature_delta = 4.0;

        // Pure PIC.
        let mut pic = p;
        pic.preset_for_step(0.0, 0.0, &material);
        assert!((pic.velocity.x - 2.0).abs() < 1e-6);
        assert!((pic.temperature - 260.0).abs() < 1e-6);

        // Pure FLIP.
        let mut flip = p;
        flip.preset_for_step(1.0, 1.0, &material);
        assert!((flip.velocity.x - 1.5).abs() < 1e-6);
        assert!((flip.temperature - 254.0).abs() < 1e-6);
        assert_eq!(flip.previous_velocity, Vec3::new(1.0, 0.0, 0.0));
    }
}
