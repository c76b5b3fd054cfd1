//! Phase-change behaviour over full simulation steps: a cold solid block on
//! the heated floor warms up, pins at the melt point while the latent
//! buffer fills, and eventually turns liquid.

use glam::Vec3;
use melt3d::{
    Integration, MaterialParameters, MeltSimulation, ParticleSeed, Phase, SimulationParameters,
    SolverSettings,
};

/// Low latent heat so the transition completes within a short test run.
fn soft_ice() -> MaterialParameters {
    MaterialParameters {
        lame_mu: 1000.0,
        lame_lambda: 1500.0,
        hardness: 10.0,
        compression_limit: 0.025,
        stretch_limit: 0.0075,
        heat_capacity_solid: 100.0,
        heat_capacity_liquid: 100.0,
        heat_conductivity_solid: 50.0,
        heat_conductivity_liquid: 50.0,
        latent_heat: 5.0,
        freezing_temperature: 0.0,
    }
}

fn heated_floor_parameters() -> SimulationParameters {
    let mut particles = Vec::new();
    // Dense block resting on the floor so the bottom cells classify as
    // Interior and conduct against the heat-source plane.
    for i in 0..8 {
        for j in 0..6 {
            for k in 0..8 {
                particles.push(ParticleSeed {
                    position: Vec3::new(
                        0.30 + i as f32 * 0.05,
                        0.01 + j as f32 * 0.05,
                        0.30 + k as f32 * 0.05,
                    ),
                    mass: 0.02,
                    temperature: -2.0,
                    solid: true,
                });
            }
        }
    }
    SimulationParameters {
        time_step: 0.002,
        frame_count: 1,
        frame_interval: 1.0 / 24.0,
        box_origin: Vec3::ZERO,
        box_size: 1.0,
        cells_per_side: 12,
        material: soft_ice(),
        ambient_temperature: -2.0,
        heat_source_temperature: 90.0,
        velocity_blend: 0.95,
        temperature_blend: 0.5,
        integration: Integration::Explicit,
        particle_threshold: 4,
        solver: SolverSettings::default(),
        particles,
    }
}

#[test]
fn test_floor_heat_warms_particles() {
    let mut sim = MeltSimulation::new(heated_floor_parameters()).expect("valid parameters");
    let initial_mean: f32 = sim
        .particles()
        .iter()
        .map(|p| p.temperature)
        .sum::<f32>()
        / sim.particles().len() as f32;

    for _ in 0..30 {
        sim.step();
    }

    let mean: f32 = sim
        .particles()
        .iter()
        .map(|p| p.temperature)
        .sum::<f32>()
        / sim.particles().len() as f32;
    assert!(
        mean > initial_mean + 0.1,
        "mean temperature {} started at {}",
        mean,
        initial_mean
    );
}

#[test]
fn test_latent_buffer_invariants_hold() {
    let mut sim = MeltSimulation::new(heated_floor_parameters()).expect("valid parameters");
    let latent = 5.0;

    for _ in 0..60 {
        sim.step();
        for p in sim.particles() {
            assert!(
                p.transition_heat >= 0.0 && p.transition_heat <= latent + 1e-4,
                "buffer {} out of range",
                p.transition_heat
            );
            match p.phase {
                // A settled liquid carries a full buffer.
                Phase::Liquid => assert!(
                    (p.transition_heat - latent).abs() < 1e-4,
                    "liquid with buffer {}",
                    p.transition_heat
                ),
                // Transitioning solids are pinned at the melt point.
                Phase::Solid => {
                    if p.transition_heat > 0.0 {
                        assert!(
                            (p.temperature - 273.15).abs() < 1e-3,
                            "transitioning at {} K",
                            p.temperature
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_bottom_layer_melts_first() {
    let mut sim = MeltSimulation::new(heated_floor_parameters()).expect("valid parameters");

    let mut melted_low = 0usize;
    let mut melted_high = 0usize;
    for _ in 0..400 {
        sim.step();
        melted_low = 0;
        melted_high = 0;
        for p in sim.particles() {
            if p.phase == Phase::Liquid {
                if p.position.y < 0.15 {
                    melted_low += 1;
                } else if p.position.y > 0.2 {
                    melted_high += 1;
                }
            }
        }
        if melted_low > 20 {
            break;
        }
    }

    assert!(
        melted_low > 20,
        "no significant melt near the floor ({} particles)",
        melted_low
    );
    assert!(
        melted_low >= melted_high,
        "melt front inverted: {} low vs {} high",
        melted_low,
        melted_high
    );
}
