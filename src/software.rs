//! CPU render device.
//!
//! Executes every program as a per-texel function over the target grid,
//! rows in parallel, with the same sampling rules a GPU applies: texel
//! centres at half-integer coordinates, clamp-to-edge addressing, nearest or
//! bilinear filtering per texture.

use crate::FluidError;
use crate::device::{
    Blend, FilterMode, PassDescriptor, ProgramId, RenderDevice, RenderTarget, Sampler,
    TextureDescriptor, TextureFormat, TextureId,
};
use crate::kernels::{self, Fragment, SampleSource};
use crate::programs::{Keywords, ProgramKind};
use glam::{Vec2, Vec4};
use rayon::prelude::*;
use std::collections::HashMap;

/// What the emulated hardware can do. Narrowing these exercises the capability fallbacks.
#[derive(Debug, Clone)]
pub struct SoftwareLimits {
    pub half_float: bool,
    pub linear_filtering: bool,
    pub renderable_formats: Vec<TextureFormat>,
    pub max_texture_dimension: u32,
    /// Live textures the device holds before allocation fails.
    pub max_textures: usize,
    /// Programs that fail to link, for exercising setup diagnostics.
    pub broken_programs: Vec<ProgramKind>,
}

impl Default for SoftwareLimits {
    fn default() -> Self {
        Self {
            half_float: true,
            linear_filtering: true,
            renderable_formats: vec![
                TextureFormat::Rgba16Float,
                TextureFormat::Rg16Float,
                TextureFormat::R16Float,
                TextureFormat::Rgba8Unorm,
            ],
            max_texture_dimension: 8192,
            max_textures: usize::MAX,
            broken_programs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct SoftwareTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    filter: FilterMode,
    data: Vec<Vec4>,
}

impl SoftwareTexture {
    fn new(width: u32, height: u32, format: TextureFormat, filter: FilterMode) -> Self {
        Self {
            width,
            height,
            format,
            filter,
            data: vec![Vec4::ZERO; (width * height) as usize],
        }
    }

    fn fetch(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width as usize + x]
    }

    fn sample(&self, uv: Vec2) -> Vec4 {
        let size = Vec2::new(self.width as f32, self.height as f32);
        match self.filter {
            FilterMode::Nearest => {
                let st = (uv * size).floor();
                self.fetch(st.x as i64, st.y as i64)
            }
            FilterMode::Linear => {
                let st = uv * size - 0.5;
                let base = st.floor();
                let frac = st - base;
                let (x, y) = (base.x as i64, base.y as i64);
                let a = self.fetch(x, y);
                let b = self.fetch(x + 1, y);
                let c = self.fetch(x, y + 1);
                let d = self.fetch(x + 1, y + 1);
                a.lerp(b, frac.x).lerp(c.lerp(d, frac.x), frac.y)
            }
        }
    }
}

/// The textures one pass samples, resolved by sampler name.
struct PassTextures<'a> {
    bound: Vec<(Sampler, &'a SoftwareTexture)>,
}

impl SampleSource for PassTextures<'_> {
    fn sample(&self, sampler: Sampler, uv: Vec2) -> Vec4 {
        self.bound
            .iter()
            .find(|(name, _)| *name == sampler)
            .map_or(Vec4::ZERO, |(_, texture)| texture.sample(uv))
    }
}

pub struct SoftwareDevice {
    limits: SoftwareLimits,
    textures: HashMap<TextureId, SoftwareTexture>,
    programs: Vec<(ProgramKind, Keywords)>,
    surface: SoftwareTexture,
    next_texture: u32,
    draw_calls: u64,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_limits(SoftwareLimits::default())
    }

    pub fn with_limits(limits: SoftwareLimits) -> Self {
        Self {
            limits,
            textures: HashMap::new(),
            programs: Vec::new(),
            surface: SoftwareTexture::new(1, 1, TextureFormat::Rgba8Unorm, FilterMode::Nearest),
            next_texture: 1,
            draw_calls: 0,
        }
    }

    pub fn limits_mut(&mut self) -> &mut SoftwareLimits {
        &mut self.limits
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn compiled_programs(&self) -> usize {
        self.programs.len()
    }

    fn program(&self, id: ProgramId) -> Result<(ProgramKind, Keywords), FluidError> {
        self.programs
            .get(id.0 as usize)
            .copied()
            .ok_or(FluidError::UnknownProgram(id.0))
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn rasterize(
    target: &mut SoftwareTexture,
    kind: ProgramKind,
    keywords: Keywords,
    pass: &PassDescriptor<'_>,
    sources: &PassTextures<'_>,
) {
    let mut uniforms = pass.uniforms;
    uniforms.target_texel_size = [1.0 / target.width as f32, 1.0 / target.height as f32];
    let texel_size = Vec2::from(uniforms.texel_size);
    let format = target.format;
    let width = target.width as usize;
    let height = target.height as f32;

    if let Some(color) = pass.clear {
        let color = format.store(Vec4::from(color));
        target.data.fill(color);
    }

    target
        .data
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height,
                );
                let frag = Fragment::new(uv, texel_size);
                let src = kernels::shade(kind, keywords, &frag, &uniforms, sources);
                let out = match pass.blend {
                    Blend::Replace => src,
                    Blend::PremultipliedOver => src + *texel * (1.0 - src.w),
                };
                *texel = format.store(out);
            }
        });
}

impl RenderDevice for SoftwareDevice {
    fn label(&self) -> &str {
        "software"
    }

    fn supports_half_float(&self) -> bool {
        self.limits.half_float
    }

    fn supports_linear_filtering(&self) -> bool {
        self.limits.linear_filtering
    }

    fn max_texture_dimension(&self) -> u32 {
        self.limits.max_texture_dimension
    }

    fn probe_render_target(&mut self, format: TextureFormat) -> bool {
        let probe = TextureDescriptor {
            label: "format probe",
            width: 4,
            height: 4,
            format,
            filter: FilterMode::Nearest,
        };
        match self.create_texture(&probe) {
            Ok(texture) => {
                self.release_texture(texture);
                true
            }
            Err(err) => {
                log::trace!("Render target probe for {format:?} failed: {err}");
                false
            }
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, FluidError> {
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.limits.max_texture_dimension
            || desc.height > self.limits.max_texture_dimension
        {
            return Err(FluidError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if !self.limits.renderable_formats.contains(&desc.format) {
            return Err(FluidError::Gpu(format!(
                "{:?} is not a complete render target",
                desc.format
            )));
        }
        if desc.format.is_float() && !self.limits.half_float {
            return Err(FluidError::Gpu("half float textures unavailable".to_string()));
        }
        if self.textures.len() >= self.limits.max_textures {
            return Err(FluidError::Gpu(format!(
                "out of texture memory creating {}",
                desc.label
            )));
        }

        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            id,
            SoftwareTexture::new(desc.width, desc.height, desc.format, desc.filter),
        );
        log::trace!(
            "Created {} texture {:?} {}x{} {:?}",
            desc.label,
            id,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn compile_program(
        &mut self,
        kind: ProgramKind,
        keywords: Keywords,
    ) -> Result<ProgramId, FluidError> {
        if self.limits.broken_programs.contains(&kind) {
            return Err(FluidError::ProgramLink {
                program: kind,
                log: "program failed to link".to_string(),
            });
        }
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push((kind, keywords));
        Ok(id)
    }

    fn draw(&mut self, pass: &PassDescriptor<'_>) -> Result<(), FluidError> {
        let (kind, keywords) = self.program(pass.program)?;

        for (_, binding) in pass.bindings {
            if pass.target == RenderTarget::Texture(binding.texture) {
                return Err(FluidError::FeedbackLoop {
                    texture: binding.texture.0,
                });
            }
            if !self.textures.contains_key(&binding.texture) {
                return Err(FluidError::UnknownTexture(binding.texture.0));
            }
        }

        match pass.target {
            RenderTarget::Texture(id) => {
                let mut target = self
                    .textures
                    .remove(&id)
                    .ok_or(FluidError::UnknownTexture(id.0))?;
                {
                    let sources = PassTextures {
                        bound: pass
                            .bindings
                            .iter()
                            .filter_map(|(sampler, binding)| {
                                self.textures.get(&binding.texture).map(|t| (*sampler, t))
                            })
                            .collect(),
                    };
                    rasterize(&mut target, kind, keywords, pass, &sources);
                }
                self.textures.insert(id, target);
            }
            RenderTarget::Surface => {
                let sources = PassTextures {
                    bound: pass
                        .bindings
                        .iter()
                        .filter_map(|(sampler, binding)| {
                            self.textures.get(&binding.texture).map(|t| (*sampler, t))
                        })
                        .collect(),
                };
                rasterize(&mut self.surface, kind, keywords, pass, &sources);
            }
        }

        self.draw_calls += 1;
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = SoftwareTexture::new(
            width.max(1),
            height.max(1),
            TextureFormat::Rgba8Unorm,
            FilterMode::Nearest,
        );
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    fn read_texture(&mut self, id: TextureId) -> Result<Vec<Vec4>, FluidError> {
        self.textures
            .get(&id)
            .map(|texture| texture.data.clone())
            .ok_or(FluidError::UnknownTexture(id.0))
    }

    fn read_surface(&mut self) -> Result<Vec<Vec4>, FluidError> {
        Ok(self.surface.data.clone())
    }

    fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
