use glam::Vec3;

use crate::error::ResourceError;

/// Which gravity solver drives the force pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    /// Monopole Barnes-Hut octree.
    #[default]
    Monopole,
    /// Spectral particle-mesh (FFT Poisson solve).
    Spectral,
    /// Spectral far field plus short-range correction.
    TreePm,
}

/// Mass assignment scheme for the particle-mesh deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Assignment {
    /// Nearest grid point: the home voxel gains the full mass.
    Ngp,
    /// Cloud-in-cell: trilinear spread over the eight surrounding voxels.
    #[default]
    Cic,
}

/// Axis-aligned world box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl WorldBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Grows each axis by `margin` of its extent on both sides.
    pub fn expanded(&self, margin: f32) -> Self {
        let pad = self.extent() * margin;
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Pads degenerate axes so the box always has usable volume.
    pub(crate) fn regularized(&self, min_extent: f32) -> Self {
        let mut out = *self;
        let center = self.center();
        for axis in 0..3 {
            if out.max[axis] - out.min[axis] < min_extent {
                out.min[axis] = center[axis] - min_extent * 0.5;
                out.max[axis] = center[axis] + min_extent * 0.5;
            }
        }
        out
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Tightest box around the given (x, y, z, mass) quads, with a 5% margin.
    pub(crate) fn infer(positions: &[f32]) -> Self {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for quad in positions.chunks_exact(4) {
            let p = Vec3::new(quad[0], quad[1], quad[2]);
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }.expanded(0.05).regularized(1.0)
    }
}

/// Immutable engine configuration.
///
/// Fixed at construction; changing the particle count or any option means
/// building a new engine.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub solver: SolverKind,
    /// World box; inferred from the initial positions when `None`.
    pub world_bounds: Option<WorldBounds>,
    /// Time step per `step()` call.
    pub dt: f32,
    /// Gravitational constant G.
    pub gravity: f32,
    /// Plummer softening length.
    pub softening: f32,
    /// Per-step velocity damping in `[0, 1)`.
    pub damping: f32,
    pub max_speed: f32,
    pub max_accel: f32,
    /// Barnes-Hut opening angle.
    pub theta: f32,
    /// Spectral grid side; power of two.
    pub grid_size: u32,
    pub assignment: Assignment,
    /// TreePM far/near split width; `0` disables the hybrid.
    pub split_sigma: f32,
    /// TreePM near-field scan radius in cells; `0` disables the hybrid.
    pub near_field_radius: u32,
    pub enable_profiling: bool,
    /// Frames between world-box refreshes.
    pub bounds_interval: u32,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            solver: SolverKind::default(),
            world_bounds: None,
            dt: 1.0 / 60.0,
            gravity: 3e-4,
            softening: 0.2,
            damping: 0.0,
            max_speed: 2.0,
            max_accel: 1.0,
            theta: 0.5,
            grid_size: 64,
            assignment: Assignment::default(),
            split_sigma: 0.0,
            near_field_radius: 2,
            enable_profiling: false,
            bounds_interval: 300,
        }
    }
}

impl SimulationOptions {
    pub(crate) fn validate(&self) -> Result<(), ResourceError> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(ResourceError::InvalidInput("dt must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(ResourceError::InvalidInput(
                "damping must be in [0, 1)".into(),
            ));
        }
        if !(self.theta > 0.0 && self.theta.is_finite()) {
            return Err(ResourceError::InvalidInput("theta must be positive".into()));
        }
        if self.softening < 0.0 || !self.softening.is_finite() {
            return Err(ResourceError::InvalidInput(
                "softening must be non-negative".into(),
            ));
        }
        if !(self.max_speed > 0.0) || !(self.max_accel > 0.0) {
            return Err(ResourceError::InvalidInput(
                "max_speed and max_accel must be positive".into(),
            ));
        }
        if !self.grid_size.is_power_of_two() || !(8..=256).contains(&self.grid_size) {
            return Err(ResourceError::InvalidInput(
                "grid_size must be a power of two in [8, 256]".into(),
            ));
        }
        if self.split_sigma < 0.0 || !self.split_sigma.is_finite() {
            return Err(ResourceError::InvalidInput(
                "split_sigma must be non-negative".into(),
            ));
        }
        if self.near_field_radius > 4 {
            return Err(ResourceError::InvalidInput(
                "near_field_radius must be at most 4 cells".into(),
            ));
        }
        if self.bounds_interval == 0 {
            return Err(ResourceError::InvalidInput(
                "bounds_interval must be at least 1".into(),
            ));
        }
        if let Some(bounds) = &self.world_bounds {
            if !bounds.is_finite() || bounds.extent().min_element() <= 0.0 {
                return Err(ResourceError::InvalidInput(
                    "world_bounds must be finite with positive extent".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the TreePM near-field correction is active.
    pub(crate) fn hybrid_enabled(&self) -> bool {
        self.solver == SolverKind::TreePm && self.split_sigma > 0.0 && self.near_field_radius > 0
    }
}
