//! The ink solver: field state, the per-step pass pipeline, splats and display.
//!
//! One `step(dt)` runs, in order: curl, vorticity confinement, divergence,
//! pressure warm start, Jacobi pressure relaxation, gradient subtraction,
//! velocity self-advection and dye advection. Each pass reads only finished
//! output of earlier passes, and every in-place update goes through a
//! [`DoubleBuffer`](crate::resource::DoubleBuffer) swap.

use crate::FluidError;
use crate::capabilities::DeviceCapabilities;
use crate::config::SimulationConfig;
use crate::device::{
    Blend, FilterMode, PassDescriptor, PassUniforms, ProgramId, RenderDevice, RenderTarget,
    Sampler, TextureBinding, TextureFormat, TextureId,
};
use crate::framebuffers::{FramebufferSet, grid_resolution};
use crate::pointer::{self, Pointer};
use crate::programs::{Keywords, Programs, dye_advection_keywords};
use crate::resource::Resource;
use glam::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A field read back from the device, bottom row first.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Vec4>,
}

impl FieldSnapshot {
    pub fn at(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.width + x) as usize]
    }

    /// Largest absolute value over the first `channels` components.
    pub fn max_abs(&self, channels: usize) -> f32 {
        self.texels
            .iter()
            .flat_map(|t| t.to_array().into_iter().take(channels))
            .fold(0.0f32, |acc, v| acc.max(v.abs()))
    }
}

fn draw<D: RenderDevice + ?Sized>(
    device: &mut D,
    program: ProgramId,
    uniforms: PassUniforms,
    bindings: &[(Sampler, TextureBinding)],
    target: RenderTarget,
) -> Result<(), FluidError> {
    device.draw(&PassDescriptor {
        program,
        uniforms,
        bindings,
        target,
        clear: None,
        blend: Blend::Replace,
    })
}

pub struct Simulation<D: RenderDevice> {
    device: D,
    config: SimulationConfig,
    capabilities: DeviceCapabilities,
    programs: Programs,
    framebuffers: FramebufferSet,
    canvas_width: u32,
    canvas_height: u32,
    pointer: Pointer,
    splat_stack: Vec<u32>,
    rng: StdRng,
    splat_count: u64,
    step_count: u64,
}

impl<D: RenderDevice> Simulation<D> {
    /// Negotiates formats, compiles programs and allocates every buffer for the canvas.
    pub fn new(
        mut device: D,
        mut config: SimulationConfig,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<Self, FluidError> {
        config.validate()?;
        let capabilities = DeviceCapabilities::negotiate(&mut device, &mut config)?;
        let programs = Programs::compile(&mut device, capabilities.linear_filtering)?;
        device.resize_surface(canvas_width, canvas_height);
        let framebuffers = FramebufferSet::allocate(
            &mut device,
            &capabilities,
            &config,
            canvas_width,
            canvas_height,
        )?;

        log::info!(
            "Ink simulation ready on {} device: sim {}x{}, dye {}x{}",
            device.label(),
            framebuffers.sim_size().width,
            framebuffers.sim_size().height,
            framebuffers.dye_size().width,
            framebuffers.dye_size().height
        );

        Ok(Self {
            device,
            config,
            capabilities,
            programs,
            framebuffers,
            canvas_width,
            canvas_height,
            pointer: Pointer::default(),
            splat_stack: Vec::new(),
            rng: StdRng::from_entropy(),
            splat_count: 0,
            step_count: 0,
        })
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Rebuilds every framebuffer for a new canvas size. Field contents are discarded.
    /// On failure the previous buffers and surface are kept.
    pub fn resize(&mut self, canvas_width: u32, canvas_height: u32) -> Result<(), FluidError> {
        let framebuffers = FramebufferSet::allocate(
            &mut self.device,
            &self.capabilities,
            &self.config,
            canvas_width,
            canvas_height,
        )?;
        let previous = std::mem::replace(&mut self.framebuffers, framebuffers);
        previous.release(&mut self.device);
        self.device.resize_surface(canvas_width, canvas_height);
        self.canvas_width = canvas_width;
        self.canvas_height = canvas_height;
        log::debug!("Resized simulation to canvas {canvas_width}x{canvas_height}");
        Ok(())
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn programs(&self) -> &Programs {
        &self.programs
    }

    pub fn framebuffers(&self) -> &FramebufferSet {
        &self.framebuffers
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn splat_count(&self) -> u64 {
        self.splat_count
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// A new contact: records it and bursts a little ink at the spot.
    pub fn pointer_down(&mut self, id: i64, pos: Vec2) -> Result<(), FluidError> {
        self.pointer
            .update_down(id, pos, self.canvas_width, self.canvas_height);
        self.click_splat()
    }

    /// Motion is only recorded here; the next frame turns it into a splat.
    pub fn pointer_move(&mut self, pos: Vec2) {
        self.pointer.update_move(
            pos,
            self.canvas_width,
            self.canvas_height,
            pointer::ink_color(),
        );
    }

    pub fn pointer_up(&mut self) {
        self.pointer.update_up();
    }

    pub fn queue_random_splats(&mut self, amount: u32) {
        self.splat_stack.push(amount);
    }

    /// Turns pending input into splats. Called once per frame before `step`.
    pub fn apply_inputs(&mut self) -> Result<(), FluidError> {
        if let Some(amount) = self.splat_stack.pop() {
            self.multiple_splats(amount)?;
        }
        if self.pointer.take_moved() {
            self.splat_pointer()?;
        }
        Ok(())
    }

    fn splat_pointer(&mut self) -> Result<(), FluidError> {
        let force = self.pointer.delta * self.config.splat_force;
        self.splat(self.pointer.texcoord, force, self.pointer.color)
    }

    fn click_splat(&mut self) -> Result<(), FluidError> {
        let force = pointer::burst_force(&mut self.rng);
        self.splat(self.pointer.texcoord, force, pointer::ink_color())
    }

    pub fn multiple_splats(&mut self, amount: u32) -> Result<(), FluidError> {
        for _ in 0..amount {
            let color = pointer::ink_color() * 10.0;
            let point = Vec2::new(self.rng.gen_range(0.0..1.0), self.rng.gen_range(0.0..1.0));
            let force = Vec2::new(
                1000.0 * self.rng.gen_range(-0.5..0.5),
                1000.0 * self.rng.gen_range(-0.5..0.5),
            );
            self.splat(point, force, color)?;
        }
        Ok(())
    }

    /// Adds a Gaussian impulse of `force` to velocity and `color` to dye around `point`.
    pub fn splat(&mut self, point: Vec2, force: Vec2, color: Vec3) -> Result<(), FluidError> {
        let aspect = pointer::aspect_ratio(self.canvas_width, self.canvas_height);
        let uniforms = PassUniforms {
            aspect_ratio: aspect,
            point: point.to_array(),
            radius: pointer::correct_radius(self.config.splat_radius / 100.0, aspect),
            color: [force.x, force.y, 0.0, 0.0],
            ..Default::default()
        };

        let fb = &mut self.framebuffers;
        draw(
            &mut self.device,
            self.programs.splat,
            uniforms,
            &[(Sampler::Target, fb.velocity.read().attach(0))],
            fb.velocity.write().target(),
        )?;
        fb.velocity.swap();

        draw(
            &mut self.device,
            self.programs.splat,
            PassUniforms {
                color: color.extend(0.0).to_array(),
                ..uniforms
            },
            &[(Sampler::Target, fb.dye.read().attach(0))],
            fb.dye.write().target(),
        )?;
        fb.dye.swap();

        self.splat_count += 1;
        log::trace!("Splat at {point} force {force}");
        Ok(())
    }

    /// Advances velocity and dye by `dt` seconds.
    pub fn step(&mut self, dt: f32) -> Result<(), FluidError> {
        if dt <= 0.0 {
            log::trace!("Skipping step with non-positive dt {dt}");
            return Ok(());
        }

        let Self {
            device,
            config,
            capabilities,
            programs,
            framebuffers: fb,
            ..
        } = self;
        let texel_size = fb.velocity.texel_size().to_array();
        let grid = PassUniforms {
            texel_size,
            ..Default::default()
        };

        draw(
            device,
            programs.curl,
            grid,
            &[(Sampler::Velocity, fb.velocity.read().attach(0))],
            fb.curl.target(),
        )?;

        draw(
            device,
            programs.vorticity,
            PassUniforms {
                curl: config.curl,
                dt,
                ..grid
            },
            &[
                (Sampler::Velocity, fb.velocity.read().attach(0)),
                (Sampler::Curl, fb.curl.attach(1)),
            ],
            fb.velocity.write().target(),
        )?;
        fb.velocity.swap();

        draw(
            device,
            programs.divergence,
            grid,
            &[(Sampler::Velocity, fb.velocity.read().attach(0))],
            fb.divergence.target(),
        )?;

        draw(
            device,
            programs.clear,
            PassUniforms {
                value: config.pressure,
                ..grid
            },
            &[(Sampler::Texture, fb.pressure.read().attach(0))],
            fb.pressure.write().target(),
        )?;
        fb.pressure.swap();

        for _ in 0..config.pressure_iterations {
            draw(
                device,
                programs.pressure,
                grid,
                &[
                    (Sampler::Divergence, fb.divergence.attach(0)),
                    (Sampler::Pressure, fb.pressure.read().attach(1)),
                ],
                fb.pressure.write().target(),
            )?;
            fb.pressure.swap();
        }

        draw(
            device,
            programs.gradient_subtract,
            grid,
            &[
                (Sampler::Pressure, fb.pressure.read().attach(0)),
                (Sampler::Velocity, fb.velocity.read().attach(1)),
            ],
            fb.velocity.write().target(),
        )?;
        fb.velocity.swap();

        // Velocity lives in narrow formats, so it is always filtered by hand.
        let velocity_advection = programs
            .advection
            .variant(device, Keywords::MANUAL_FILTERING)?;
        let velocity = fb.velocity.read().attach(0);
        draw(
            device,
            velocity_advection,
            PassUniforms {
                dye_texel_size: texel_size,
                dt,
                dissipation: config.velocity_dissipation,
                ..grid
            },
            &[(Sampler::Velocity, velocity), (Sampler::Source, velocity)],
            fb.velocity.write().target(),
        )?;
        fb.velocity.swap();

        let dye_advection = programs
            .advection
            .variant(device, dye_advection_keywords(capabilities.linear_filtering))?;
        draw(
            device,
            dye_advection,
            PassUniforms {
                dye_texel_size: fb.dye.texel_size().to_array(),
                dt,
                dissipation: config.density_dissipation,
                ..grid
            },
            &[
                (Sampler::Velocity, fb.velocity.read().attach(0)),
                (Sampler::Source, fb.dye.read().attach(1)),
            ],
            fb.dye.write().target(),
        )?;
        fb.dye.swap();

        self.step_count += 1;
        Ok(())
    }

    fn display_pass(&mut self, target: RenderTarget, width: u32, height: u32) -> Result<(), FluidError> {
        let keywords = Keywords::NONE.set(Keywords::SHADING, self.config.shading);
        let program = self.programs.display.variant(&mut self.device, keywords)?;
        let clear = if self.config.transparent {
            [0.0; 4]
        } else {
            Vec3::from(self.config.back_color.to_linear())
                .extend(1.0)
                .to_array()
        };

        self.device.draw(&PassDescriptor {
            program,
            uniforms: PassUniforms {
                texel_size: [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32],
                ..Default::default()
            },
            bindings: &[(Sampler::Texture, self.framebuffers.dye.read().attach(0))],
            target,
            clear: Some(clear),
            blend: Blend::PremultipliedOver,
        })
    }

    /// Composites the dye field onto the visible surface.
    pub fn render(&mut self) -> Result<(), FluidError> {
        let (width, height) = self.device.surface_size();
        self.display_pass(RenderTarget::Surface, width, height)
    }

    /// Renders the display into an off-screen 8-bit buffer at capture resolution.
    pub fn capture(&mut self) -> Result<FieldSnapshot, FluidError> {
        let size = grid_resolution(
            self.config.capture_resolution,
            self.canvas_width,
            self.canvas_height,
        );
        let target = Resource::create(
            &mut self.device,
            "capture",
            size.width,
            size.height,
            TextureFormat::Rgba8Unorm,
            FilterMode::Nearest,
        )?;
        let result = self
            .display_pass(target.target(), size.width, size.height)
            .and_then(|_| self.device.read_texture(target.texture()));
        target.release(&mut self.device);

        Ok(FieldSnapshot {
            width: size.width,
            height: size.height,
            texels: result?,
        })
    }

    fn snapshot(&mut self, texture: TextureId, width: u32, height: u32) -> Result<FieldSnapshot, FluidError> {
        Ok(FieldSnapshot {
            width,
            height,
            texels: self.device.read_texture(texture)?,
        })
    }

    pub fn read_velocity(&mut self) -> Result<FieldSnapshot, FluidError> {
        let read = self.framebuffers.velocity.read();
        let (texture, width, height) = (read.texture(), read.width(), read.height());
        self.snapshot(texture, width, height)
    }

    pub fn read_dye(&mut self) -> Result<FieldSnapshot, FluidError> {
        let read = self.framebuffers.dye.read();
        let (texture, width, height) = (read.texture(), read.width(), read.height());
        self.snapshot(texture, width, height)
    }

    pub fn read_pressure(&mut self) -> Result<FieldSnapshot, FluidError> {
        let read = self.framebuffers.pressure.read();
        let (texture, width, height) = (read.texture(), read.width(), read.height());
        self.snapshot(texture, width, height)
    }

    pub fn read_divergence(&mut self) -> Result<FieldSnapshot, FluidError> {
        let div = &self.framebuffers.divergence;
        let (texture, width, height) = (div.texture(), div.width(), div.height());
        self.snapshot(texture, width, height)
    }

    pub fn read_curl(&mut self) -> Result<FieldSnapshot, FluidError> {
        let curl = &self.framebuffers.curl;
        let (texture, width, height) = (curl.texture(), curl.width(), curl.height());
        self.snapshot(texture, width, height)
    }

    pub fn read_surface(&mut self) -> Result<FieldSnapshot, FluidError> {
        let (width, height) = self.device.surface_size();
        Ok(FieldSnapshot {
            width,
            height,
            texels: self.device.read_surface()?,
        })
    }
}
