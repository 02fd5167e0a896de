use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::deposit::DepositKernel;
use crate::kernels::fft::FftKernel;
use crate::kernels::gather::GatherKernel;
use crate::kernels::gradient::GradientKernel;
use crate::kernels::poisson::PoissonKernel;
use crate::options::{SimulationOptions, WorldBounds};
use crate::particles::ParticleTextures;
use crate::profiler::GpuProfiler;
use crate::texture::TextureObject;

/// Names the current owner of every complex spectrum texture.
///
/// The five textures are interchangeable storage; what matters is which
/// pipeline stage may read or write each one right now. Transfers are moves
/// between slots, so a stage running without its input is a debug panic
/// instead of a silent aliasing bug.
struct SpectrumLedger {
    /// FFT scratch pair; full between frames.
    fft_from: Option<TextureObject>,
    fft_to: Option<TextureObject>,
    /// Density spectrum, owned by Poisson as input after the forward pass.
    density: Option<TextureObject>,
    /// Potential spectrum, Poisson's output borrowed by Gradient.
    potential: Option<TextureObject>,
    /// Per-axis force spectra, owned by Gradient.
    force_spectrum: [Option<TextureObject>; 3],
}

impl SpectrumLedger {
    fn new(
        context: &RenderContext,
        grid: GridLayout,
    ) -> Result<Self, ResourceError> {
        let complex = |stage: &str| {
            TextureObject::attachment(
                context,
                stage,
                grid.tex_size,
                grid.tex_size,
                wgpu::TextureFormat::Rg32Float,
            )
        };
        Ok(Self {
            fft_from: Some(complex("fft scratch a")?),
            fft_to: Some(complex("fft scratch b")?),
            density: None,
            potential: None,
            force_spectrum: [
                Some(complex("force spectrum x")?),
                Some(complex("force spectrum y")?),
                Some(complex("force spectrum z")?),
            ],
        })
    }

    fn take(slot: &mut Option<TextureObject>, name: &str) -> TextureObject {
        debug_assert!(slot.is_some(), "spectrum ledger: `{name}` is empty");
        slot.take().expect("spectrum ledger slot")
    }
}

/// Spectral PM solver: deposit, forward FFT, Poisson, gradient, three
/// inverse FFTs, trilinear gather. `sigma` > 0 low-passes the far field for
/// the TreePM hybrid.
pub(crate) struct SpectralSolver {
    grid: GridLayout,
    mass_grid: TextureObject,
    force_grids: [TextureObject; 3],
    ledger: SpectrumLedger,
    deposit: DepositKernel,
    fft: FftKernel,
    poisson: PoissonKernel,
    gradient: GradientKernel,
    gather: GatherKernel,
}

impl SpectralSolver {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        particles: &ParticleTextures,
        sigma: f32,
    ) -> Result<Self, ResourceError> {
        let grid = GridLayout::new(options.grid_size);

        let real = |stage: &str| {
            TextureObject::attachment(
                context,
                stage,
                grid.tex_size,
                grid.tex_size,
                wgpu::TextureFormat::R32Float,
            )
        };
        let mass_grid = real("mass grid")?;
        let force_grids = [
            real("force grid x")?,
            real("force grid y")?,
            real("force grid z")?,
        ];
        let ledger = SpectrumLedger::new(context, grid)?;

        let deposit = DepositKernel::new(
            context,
            grid,
            options.assignment,
            bounds,
            particles.count,
            particles.width,
        )?;
        let fft = FftKernel::new(context, grid)?;
        fft.update_mass_scale(context, cell_volume(bounds, grid.grid_size));
        let poisson = PoissonKernel::new(
            context,
            grid,
            options.gravity,
            sigma,
            bounds.extent(),
        )?;
        let gradient = GradientKernel::new(context, grid, bounds.extent())?;
        let gather = GatherKernel::new(context, grid, bounds, particles.count, particles.width)?;

        Ok(Self {
            grid,
            mass_grid,
            force_grids,
            ledger,
            deposit,
            fft,
            poisson,
            gradient,
            gather,
        })
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        particles: &ParticleTextures,
        profiler: &GpuProfiler,
    ) {
        let positions = particles.position.current();

        let ts = profiler.scope("deposit").map(|s| s.single());
        self.deposit
            .encode(context, encoder, positions, &self.mass_grid, ts.flatten());

        // Forward transform: the FFT owns both scratch textures and the
        // result becomes Poisson's density-spectrum input, the scratch its
        // potential output. The FFT slots are left empty to prevent
        // aliasing.
        let ping = SpectrumLedger::take(&mut self.ledger.fft_from, "fft_from");
        let pong = SpectrumLedger::take(&mut self.ledger.fft_to, "fft_to");
        {
            let span = profiler.scope("fft forward");
            let (begin, end) = match &span {
                Some(s) => (s.begin(), s.end()),
                None => (None, None),
            };
            let result = self
                .fft
                .encode_forward(context, encoder, &self.mass_grid, &ping, &pong, [begin, end]);
            let (spectrum, scratch) = if result == 0 { (ping, pong) } else { (pong, ping) };
            self.ledger.density = Some(spectrum);
            self.ledger.potential = Some(scratch);
        }

        let density = SpectrumLedger::take(&mut self.ledger.density, "density");
        let potential = SpectrumLedger::take(&mut self.ledger.potential, "potential");
        let ts = profiler.scope("poisson").map(|s| s.single());
        self.poisson
            .encode(context, encoder, &density, &potential, ts.flatten());

        // Gradient borrows the potential spectrum and fills its own three
        // force spectra.
        let span = profiler.scope("gradient");
        let (mut begin, mut end) = match &span {
            Some(s) => (s.begin(), s.end()),
            None => (None, None),
        };
        for axis in 0..3 {
            let target = SpectrumLedger::take(&mut self.ledger.force_spectrum[axis], "force");
            let mut ts = if axis == 0 { begin.take() } else { None };
            if axis == 2 {
                ts = ts.or_else(|| end.take());
            }
            self.gradient
                .encode_axis(context, encoder, axis, &potential, &target, ts);
            self.ledger.force_spectrum[axis] = Some(target);
        }
        drop(span);

        // Reverse path: each force spectrum is consumed by a full 3D
        // inverse, ping-ponging against the reclaimed potential texture and
        // landing in its real force grid.
        let scratch = potential;
        let span = profiler.scope("fft inverse");
        let (mut begin, mut end) = match &span {
            Some(s) => (s.begin(), s.end()),
            None => (None, None),
        };
        for axis in 0..3 {
            let spectrum = SpectrumLedger::take(&mut self.ledger.force_spectrum[axis], "force");
            let first = if axis == 0 { begin.take() } else { None };
            let last = if axis == 2 { end.take() } else { None };
            self.fft.encode_inverse(
                context,
                encoder,
                &spectrum,
                &scratch,
                &self.force_grids[axis],
                [first, last],
            );
            self.ledger.force_spectrum[axis] = Some(spectrum);
        }
        drop(span);

        // The frame's spectra are spent: the density texture returns to the
        // FFT as next frame's scratch, alongside the surviving one.
        self.ledger.fft_from = Some(density);
        self.ledger.fft_to = Some(scratch);

        let ts = profiler.scope("gather").map(|s| s.single());
        self.gather.encode(
            context,
            encoder,
            positions,
            [
                &self.force_grids[0],
                &self.force_grids[1],
                &self.force_grids[2],
            ],
            &particles.force,
            ts.flatten(),
        );
    }

    pub fn update_bounds(&mut self, context: &RenderContext, bounds: &WorldBounds) {
        self.deposit.update_bounds(context, bounds);
        self.fft
            .update_mass_scale(context, cell_volume(bounds, self.grid.grid_size));
        self.poisson.update_box(context, bounds.extent());
        self.gradient.update_box(context, bounds.extent());
        self.gather.update_bounds(context, bounds);
    }

    pub(crate) fn mass_grid(&self) -> &TextureObject {
        &self.mass_grid
    }
}

/// Cell volume dV = Lx * Ly * Lz / N^3; the mass-to-density factor for a
/// non-uniform box, chosen so the deposited density integrates back to the
/// total mass.
fn cell_volume(bounds: &WorldBounds, grid_size: u32) -> f32 {
    let extent = bounds.extent();
    let n = grid_size as f32;
    (extent.x / n) * (extent.y / n) * (extent.z / n)
}
