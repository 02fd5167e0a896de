//! # PointGravity
//!
//! GPU-resident N-body gravity, driven entirely by rasterization.
//!
//! Particle state lives in float textures; force evaluation, integration and
//! mass aggregation run as fragment-shader passes. Three interchangeable
//! solvers are provided: a monopole Barnes-Hut octree, a spectral PM/FFT
//! pipeline, and a TreePM hybrid of the two.

/// # GPU context module
///
/// Device acquisition and capability negotiation.
pub mod context;

/// # Engine module
///
/// The host-facing [`Simulation`] facade.
pub mod engine;

/// # Error module
pub mod error;

/// # Simulation options
pub mod options;

pub mod grid;
pub mod particles;
pub mod texture;

pub(crate) mod kernels;
pub(crate) mod profiler;
pub(crate) mod readback;
pub(crate) mod solvers;

pub use context::*;
pub use engine::*;
pub use error::*;
pub use options::*;
pub use particles::*;
pub use texture::*;
