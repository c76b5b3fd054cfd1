//! End-to-end controller tests: free fall, conservation, frame pacing.

use glam::Vec3;
use melt3d::{
    Integration, MaterialParameters, MeltSimulation, ParticleSeed, Phase, SimulationParameters,
    SolverSettings,
};

fn ice_material() -> MaterialParameters {
    MaterialParameters {
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
        freezing_temperature: 0.0,
    }
}

fn base_parameters() -> SimulationParameters {
    SimulationParameters {
        time_step: 0.01,
        frame_count: 1,
        frame_interval: 1.0 / 24.0,
        box_origin: Vec3::splat(0.1),
        box_size: 0.8,
        cells_per_side: 10,
        material: ice_material(),
        ambient_temperature: -10.0,
        heat_source_temperature: -10.0,
        velocity_blend: 0.95,
        temperature_blend: 1.0,
        integration: Integration::Explicit,
        particle_threshold: 6,
        solver: SolverSettings::default(),
        particles: Vec::new(),
    }
}

/// A single particle under gravity picks up dt * g in one explicit step.
#[test]
fn test_single_particle_free_fall() {
    let mut params = base_parameters();
    params.particles.push(ParticleSeed {
        position: Vec3::splat(0.5),
        mass: 1.0,
        temperature: -273.15, // 0 K: heat plays no role here
        solid: true,
    });

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    sim.step();

    let p = &sim.particles()[0];
    assert!(p.velocity.x.abs() < 1e-5, "vx = {}", p.velocity.x);
    assert!(p.velocity.z.abs() < 1e-5, "vz = {}", p.velocity.z);
    assert!(
        (p.velocity.y + 0.0981).abs() < 1e-4,
        "vy = {}",
        p.velocity.y
    );

    assert!((p.position.x - 0.5).abs() < 1e-5);
    assert!((p.position.z - 0.5).abs() < 1e-5);
    assert!(
        (p.position.y - (0.5 - 0.000981)).abs() < 1e-5,
        "y = {}",
        p.position.y
    );
}

/// Total particle mass is conserved exactly across steps.
#[test]
fn test_mass_conservation() {
    let mut params = base_parameters();
    for i in 0..5 {
        for j in 0..5 {
            for k in 0..5 {
                params.particles.push(ParticleSeed {
                    position: Vec3::new(
                        0.4 + i as f32 * 0.05,
                        0.4 + j as f32 * 0.05,
                        0.4 + k as f32 * 0.05,
                    ),
                    mass: 0.02,
                    temperature: -10.0,
                    solid: true,
                });
            }
        }
    }

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    let before = sim.emitter().total_mass();
    for _ in 0..5 {
        sim.step();
    }
    let after = sim.emitter().total_mass();
    assert_eq!(before.to_bits(), after.to_bits(), "mass changed");
    assert_eq!(sim.particles().len(), 125);
}

/// Deformation-gradient determinants stay strictly positive through a
/// multi-step run under gravity and collisions.
#[test]
fn test_determinants_stay_positive() {
    let mut params = base_parameters();
    params.time_step = 0.002;
    for i in 0..6 {
        for j in 0..6 {
            for k in 0..6 {
                params.particles.push(ParticleSeed {
                    position: Vec3::new(
                        0.35 + i as f32 * 0.04,
                        0.15 + j as f32 * 0.04,
                        0.35 + k as f32 * 0.04,
                    ),
                    mass: 0.02,
                    temperature: -10.0,
                    solid: true,
                });
            }
        }
    }

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    for _ in 0..20 {
        sim.step();
    }
    for p in sim.particles() {
        assert!(p.det_elastic > 0.0, "det F_E = {}", p.det_elastic);
        assert!(p.det_plastic > 0.0, "det F_P = {}", p.det_plastic);
        assert!(p.position.is_finite());
        assert!(p.velocity.is_finite());
    }
}

/// Particles never end up outside the collision box.
#[test]
fn test_particles_stay_in_box() {
    let mut params = base_parameters();
    params.time_step = 0.005;
    // A clump near the floor, falling onto it.
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                params.particles.push(ParticleSeed {
                    position: Vec3::new(
                        0.45 + i as f32 * 0.03,
                        0.12 + j as f32 * 0.03,
                        0.45 + k as f32 * 0.03,
                    ),
                    mass: 0.02,
                    temperature: -10.0,
                    solid: true,
                });
            }
        }
    }

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    for _ in 0..50 {
        sim.step();
    }
    for p in sim.particles() {
        assert!(p.position.x >= 0.1 - 1e-5 && p.position.x <= 0.9 + 1e-5);
        assert!(p.position.y >= 0.1 - 1e-5 && p.position.y <= 0.9 + 1e-5);
        assert!(p.position.z >= 0.1 - 1e-5 && p.position.z <= 0.9 + 1e-5);
    }
}

/// The frame loop paces sub-steps: with a step of half the frame interval,
/// every exported frame is two steps apart.
#[test]
fn test_frame_pacing() {
    let mut params = base_parameters();
    params.frame_count = 3;
    params.frame_interval = 0.02;
    params.time_step = 0.01;
    params.particles.push(ParticleSeed {
        position: Vec3::splat(0.5),
        mass: 1.0,
        temperature: -10.0,
        solid: true,
    });

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    let mut frames = Vec::new();
    sim.run(|frame, particles| {
        frames.push((frame, particles.len()));
    });

    assert_eq!(frames, vec![(0, 1), (1, 1), (2, 1)]);
    assert_eq!(sim.steps_taken(), 6);
}

/// Viewer accessors expose the grid geometry and the Kelvin temperatures.
#[test]
fn test_viewer_interface() {
    let mut params = base_parameters();
    params.ambient_temperature = 20.0;
    params.heat_source_temperature = 80.0;
    params.particles.push(ParticleSeed {
        position: Vec3::splat(0.5),
        mass: 1.0,
        temperature: -10.0,
        solid: true,
    });

    let sim = MeltSimulation::new(params).expect("valid parameters");
    assert!((sim.bounding_box_position() - Vec3::splat(0.1)).length() < 1e-6);
    assert!((sim.bounding_box_size() - 0.8).abs() < 1e-6);
    // The grid corner sits one cell below the box.
    assert!((sim.grid_position() - Vec3::splat(0.0)).length() < 1e-6);
    assert!((sim.grid_cell_size() - 0.1).abs() < 1e-6);
    assert_eq!(sim.grid_cells_per_side(), 10);
    assert_eq!(sim.grid_cell_count(), 1000);
    assert!((sim.ambient_temperature() - 293.15).abs() < 1e-3);
    assert!((sim.heat_source_temperature() - 353.15).abs() < 1e-3);
}

/// Implicit integration stays stable on the same falling-block setup.
#[test]
fn test_implicit_integration_runs() {
    let mut params = base_parameters();
    params.integration = Integration::Implicit;
    params.time_step = 0.005;
    params.solver = SolverSettings {
        tolerance: 1e-5,
        max_iterations: 80,
    };
    for i in 0..5 {
        for j in 0..5 {
            for k in 0..5 {
                params.particles.push(ParticleSeed {
                    position: Vec3::new(
                        0.4 + i as f32 * 0.04,
                        0.4 + j as f32 * 0.04,
                        0.4 + k as f32 * 0.04,
                    ),
                    mass: 0.02,
                    temperature: -10.0,
                    solid: true,
                });
            }
        }
    }

    let mut sim = MeltSimulation::new(params).expect("valid parameters");
    for _ in 0..10 {
        sim.step();
    }
    for p in sim.particles() {
        assert!(p.velocity.is_finite());
        assert!(p.velocity.length() < 5.0, "v = {:?}", p.velocity);
        assert_eq!(p.phase, Phase::Solid);
    }
}
