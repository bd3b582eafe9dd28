//! The render-device seam.
//!
//! The simulation only ever talks to a [`RenderDevice`]: it allocates 2D
//! textures, compiles programs and draws full-grid passes that sample some
//! textures and write one target. Two devices implement it: the CPU
//! [`crate::software::SoftwareDevice`] and, with the `gpu` feature, the wgpu
//! backed [`crate::gpu::WgpuDevice`].
//!
//! Coordinates follow the render-to-texture convention: uv spans [0,1]²,
//! texel (x, y) has its centre at ((x+0.5)/w, (y+0.5)/h) and row 0 sits at
//! the bottom (uv.y ≈ 0). Sampling outside [0,1] clamps to the edge texel.

use crate::FluidError;
use crate::programs::{Keywords, ProgramKind};
use bytemuck::{Pod, Zeroable};
use glam::Vec4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba16Float,
    Rg16Float,
    R16Float,
    /// 8-bit normalized storage every device can render to.
    Rgba8Unorm,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::Rgba16Float | TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rg16Float => 2,
            TextureFormat::R16Float => 1,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, TextureFormat::Rgba8Unorm)
    }

    /// Drops the channels this format does not store, as a render target write would.
    pub fn store(self, value: Vec4) -> Vec4 {
        match self {
            TextureFormat::Rgba16Float => value,
            TextureFormat::Rg16Float => Vec4::new(value.x, value.y, 0.0, 1.0),
            TextureFormat::R16Float => Vec4::new(value.x, 0.0, 0.0, 1.0),
            TextureFormat::Rgba8Unorm => {
                (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
}

/// Named sampler inputs a program can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sampler {
    Velocity,
    Source,
    Curl,
    Pressure,
    Divergence,
    Texture,
    Target,
}

/// A texture bound to a texture unit, as returned by `Resource::attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub unit: u32,
    pub texture: TextureId,
}

/// Uniform block shared by every program. Fields a program does not read are ignored.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],
    pub dye_texel_size: [f32; 2],
    pub point: [f32; 2],
    /// Filled in by the device from the pass target.
    pub target_texel_size: [f32; 2],
    pub color: [f32; 4],
    pub dt: f32,
    pub dissipation: f32,
    pub curl: f32,
    pub value: f32,
    pub aspect_ratio: f32,
    pub radius: f32,
    pub _padding: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Texture(TextureId),
    /// The host's visible drawable.
    Surface,
}

/// How a pass's output combines with what the target already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    Replace,
    /// `src + dst * (1 - src.a)`, used to lay ink over the surface background.
    PremultipliedOver,
}

#[derive(Debug, Clone)]
pub struct PassDescriptor<'a> {
    pub program: ProgramId,
    pub uniforms: PassUniforms,
    pub bindings: &'a [(Sampler, TextureBinding)],
    pub target: RenderTarget,
    /// Colour the target is cleared to before the pass runs.
    pub clear: Option<[f32; 4]>,
    pub blend: Blend,
}

impl PassDescriptor<'_> {
    pub fn binding(&self, sampler: Sampler) -> Option<TextureBinding> {
        self.bindings
            .iter()
            .find(|(name, _)| *name == sampler)
            .map(|(_, binding)| *binding)
    }
}

pub trait RenderDevice {
    fn label(&self) -> &str;

    /// Whether half-float textures exist at all on this device.
    fn supports_half_float(&self) -> bool;

    fn supports_linear_filtering(&self) -> bool;

    fn max_texture_dimension(&self) -> u32;

    /// Attempts to render into a 4×4 texture of `format` and reports whether it completed.
    fn probe_render_target(&mut self, format: TextureFormat) -> bool;

    /// Allocates a texture cleared to transparent zero.
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, FluidError>;

    fn release_texture(&mut self, id: TextureId);

    fn compile_program(
        &mut self,
        kind: ProgramKind,
        keywords: Keywords,
    ) -> Result<ProgramId, FluidError>;

    /// Runs `pass.program` once per texel of the target.
    fn draw(&mut self, pass: &PassDescriptor<'_>) -> Result<(), FluidError>;

    fn resize_surface(&mut self, width: u32, height: u32);

    fn surface_size(&self) -> (u32, u32);

    /// Reads a texture back row by row, bottom row first.
    fn read_texture(&mut self, id: TextureId) -> Result<Vec<Vec4>, FluidError>;

    fn read_surface(&mut self) -> Result<Vec<Vec4>, FluidError>;

    /// Number of live textures, for leak checks.
    fn texture_count(&self) -> usize;
}
