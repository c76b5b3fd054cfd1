//! Shared numeric constants for the melting simulation.

/// Offset between Celsius (scene input) and Kelvin (internal unit).
pub const CELSIUS_TO_KELVIN: f32 = 273.15;

/// Default gravitational acceleration along Y (m/s^2).
pub const GRAVITY_Y: f32 = -9.81;

/// Floor applied to deformation-gradient determinants. A determinant that
/// falls below this magnitude is clamped to `sign * DET_EPSILON` and the
/// particle is flagged for diagnostics.
pub const DET_EPSILON: f32 = 1e-8;

/// Default number of contributing particles a cell (and its six faces) must
/// exceed to be classified Interior. Filters stray single-particle
/// contributions near body boundaries.
pub const DEFAULT_PARTICLE_THRESHOLD: usize = 6;

/// Default convergence tolerance for the iterative linear solvers.
pub const DEFAULT_SOLVER_TOLERANCE: f32 = 1e-6;

/// Default iteration cap for the iterative linear solvers.
pub const DEFAULT_SOLVER_MAX_ITERATIONS: usize = 300;

/// Default wall-clock interval between exported frames (seconds).
pub const DEFAULT_FRAME_INTERVAL: f32 = 1.0 / 24.0;
