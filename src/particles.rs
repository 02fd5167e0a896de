use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::texture::{PingPong, TextureObject};

/// Caller-provided initial particle state.
///
/// Arrays are quads per particle: positions `[x, y, z, mass]` as f32,
/// velocities `[vx, vy, vz, 0]` as f32 (default zero), colors
/// `[r, g, b, 255]` as u8 (default white). The engine copies and pads them
/// to the texture planes; the caller keeps ownership of nothing.
#[derive(Debug, Clone)]
pub struct ParticleInit {
    pub(crate) count: u32,
    pub(crate) positions: Vec<f32>,
    pub(crate) velocities: Option<Vec<f32>>,
    pub(crate) colors: Option<Vec<u8>>,
}

impl ParticleInit {
    pub fn new(positions: Vec<f32>) -> Result<Self, ResourceError> {
        if positions.is_empty() || positions.len() % 4 != 0 {
            return Err(ResourceError::InvalidInput(
                "positions must be a non-empty multiple of 4 floats".into(),
            ));
        }
        if positions.iter().any(|v| !v.is_finite()) {
            return Err(ResourceError::InvalidInput(
                "positions must be finite".into(),
            ));
        }
        Ok(Self {
            count: (positions.len() / 4) as u32,
            positions,
            velocities: None,
            colors: None,
        })
    }

    pub fn with_velocities(mut self, velocities: Vec<f32>) -> Result<Self, ResourceError> {
        if velocities.len() != self.positions.len() {
            return Err(ResourceError::InvalidInput(format!(
                "velocities length {} != positions length {}",
                velocities.len(),
                self.positions.len()
            )));
        }
        if velocities.iter().any(|v| !v.is_finite()) {
            return Err(ResourceError::InvalidInput(
                "velocities must be finite".into(),
            ));
        }
        self.velocities = Some(velocities);
        Ok(self)
    }

    pub fn with_colors(mut self, colors: Vec<u8>) -> Result<Self, ResourceError> {
        if colors.len() != self.count as usize * 4 {
            return Err(ResourceError::InvalidInput(format!(
                "colors length {} != 4 * particle count {}",
                colors.len(),
                self.count
            )));
        }
        self.colors = Some(colors);
        Ok(self)
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Texture plane dimensions for `count` particles: W = ceil(sqrt(N)),
/// H = ceil(N / W).
pub(crate) fn plane_size(count: u32) -> (u32, u32) {
    let width = (count as f64).sqrt().ceil() as u32;
    let height = count.div_ceil(width);
    (width, height)
}

/// The four particle planes plus their ping-pong bookkeeping.
#[derive(Debug)]
pub(crate) struct ParticleTextures {
    pub count: u32,
    pub width: u32,
    pub height: u32,
    pub position: PingPong,
    pub velocity: PingPong,
    pub force: TextureObject,
    pub color: TextureObject,
}

impl ParticleTextures {
    pub fn new(context: &RenderContext, init: &ParticleInit) -> Result<Self, ResourceError> {
        let (width, height) = plane_size(init.count);
        let limit = context.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(ResourceError::InvalidInput(format!(
                "{} particles need a {width}x{height} plane, device limit is {limit}",
                init.count
            )));
        }

        let position = PingPong::new(
            context,
            "position plane",
            width,
            height,
            wgpu::TextureFormat::Rgba32Float,
        )?;
        let velocity = PingPong::new(
            context,
            "velocity plane",
            width,
            height,
            wgpu::TextureFormat::Rgba32Float,
        )?;
        let force = TextureObject::attachment(
            context,
            "force plane",
            width,
            height,
            wgpu::TextureFormat::Rgba32Float,
        )?;
        let color = TextureObject::attachment(
            context,
            "color plane",
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
        )?;

        let texels = (width * height) as usize;
        let mut plane = vec![0.0f32; texels * 4];
        plane[..init.positions.len()].copy_from_slice(&init.positions);
        position.current().upload(context, bytemuck::cast_slice(&plane));

        plane.fill(0.0);
        if let Some(velocities) = &init.velocities {
            plane[..velocities.len()].copy_from_slice(velocities);
        }
        velocity.current().upload(context, bytemuck::cast_slice(&plane));

        let mut bytes = vec![0u8; texels * 4];
        match &init.colors {
            Some(colors) => bytes[..colors.len()].copy_from_slice(colors),
            None => {
                for quad in bytes.chunks_exact_mut(4).take(init.count as usize) {
                    quad.copy_from_slice(&[255, 255, 255, 255]);
                }
            }
        }
        color.upload(context, &bytes);

        Ok(Self {
            count: init.count,
            width,
            height,
            position,
            velocity,
            force,
            color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Story: plane dimensions follow W = ceil(sqrt(N)), H = ceil(N / W).
    #[test]
    fn plane_dimensions() {
        assert_eq!(plane_size(1), (1, 1));
        assert_eq!(plane_size(4), (2, 2));
        assert_eq!(plane_size(5), (3, 2));
        assert_eq!(plane_size(1000), (32, 32));
        let (w, h) = plane_size(1_000_000);
        assert!(w as u64 * h as u64 >= 1_000_000);
        assert_eq!(w, 1000);
    }

    // Story: malformed input arrays are rejected with InvalidInput.
    #[test]
    fn rejects_malformed_arrays() {
        assert!(ParticleInit::new(vec![]).is_err());
        assert!(ParticleInit::new(vec![1.0, 2.0, 3.0]).is_err());
        assert!(ParticleInit::new(vec![f32::NAN, 0.0, 0.0, 1.0]).is_err());

        let init = ParticleInit::new(vec![0.0; 8]).unwrap();
        assert_eq!(init.count(), 2);
        assert!(init.clone().with_velocities(vec![0.0; 4]).is_err());
        assert!(init.clone().with_colors(vec![0; 12]).is_err());
        assert!(init.with_velocities(vec![0.0; 8]).is_ok());
    }
}
