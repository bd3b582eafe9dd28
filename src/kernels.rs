//! Per-texel programs executed by the software device.
//!
//! Each function is the body of one fragment program: it sees the texel's uv,
//! its four neighbours one `texel_size` away, the pass uniforms and the bound
//! samplers, and returns the value written to the target.

use crate::device::{PassUniforms, Sampler};
use crate::programs::{Keywords, ProgramKind};
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

/// Velocity components are kept inside ±VELOCITY_LIMIT.
pub const VELOCITY_LIMIT: f32 = 1000.0;

/// Alpha of fully saturated ink.
pub const INK_OPACITY: f32 = 0.8;

pub trait SampleSource {
    /// Filtered, edge-clamped lookup into the texture bound to `sampler`.
    fn sample(&self, sampler: Sampler, uv: Vec2) -> Vec4;
}

#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub uv: Vec2,
    pub left: Vec2,
    pub right: Vec2,
    pub top: Vec2,
    pub bottom: Vec2,
}

impl Fragment {
    pub fn new(uv: Vec2, texel_size: Vec2) -> Self {
        Self {
            uv,
            left: uv - Vec2::new(texel_size.x, 0.0),
            right: uv + Vec2::new(texel_size.x, 0.0),
            top: uv + Vec2::new(0.0, texel_size.y),
            bottom: uv - Vec2::new(0.0, texel_size.y),
        }
    }
}

pub fn shade(
    kind: ProgramKind,
    keywords: Keywords,
    frag: &Fragment,
    uniforms: &PassUniforms,
    textures: &impl SampleSource,
) -> Vec4 {
    match kind {
        ProgramKind::Clear => clear(frag, uniforms, textures),
        ProgramKind::Splat => splat(frag, uniforms, textures),
        ProgramKind::Advection => advection(keywords, frag, uniforms, textures),
        ProgramKind::Divergence => divergence(frag, textures),
        ProgramKind::Curl => curl(frag, textures),
        ProgramKind::Vorticity => vorticity(frag, uniforms, textures),
        ProgramKind::Pressure => pressure(frag, textures),
        ProgramKind::GradientSubtract => gradient_subtract(frag, textures),
        ProgramKind::Display => display(keywords, frag, uniforms, textures),
    }
}

fn clear(frag: &Fragment, uniforms: &PassUniforms, textures: &impl SampleSource) -> Vec4 {
    uniforms.value * textures.sample(Sampler::Texture, frag.uv)
}

fn splat(frag: &Fragment, uniforms: &PassUniforms, textures: &impl SampleSource) -> Vec4 {
    let mut p = frag.uv - Vec2::from(uniforms.point);
    p.x *= uniforms.aspect_ratio;
    let color = Vec4::from(uniforms.color).xyz();
    let splat = (-p.dot(p) / uniforms.radius).exp() * color;
    let base = textures.sample(Sampler::Target, frag.uv);
    (base.xyz() + splat).extend(base.w)
}

/// Bilinear reconstruction from the four texel centres around `uv`.
fn bilerp(textures: &impl SampleSource, sampler: Sampler, uv: Vec2, texel_size: Vec2) -> Vec4 {
    let st = uv / texel_size - 0.5;
    let iuv = st.floor();
    let fuv = st - iuv;
    let a = textures.sample(sampler, (iuv + Vec2::new(0.5, 0.5)) * texel_size);
    let b = textures.sample(sampler, (iuv + Vec2::new(1.5, 0.5)) * texel_size);
    let c = textures.sample(sampler, (iuv + Vec2::new(0.5, 1.5)) * texel_size);
    let d = textures.sample(sampler, (iuv + Vec2::new(1.5, 1.5)) * texel_size);
    a.lerp(b, fuv.x).lerp(c.lerp(d, fuv.x), fuv.y)
}

fn advection(
    keywords: Keywords,
    frag: &Fragment,
    uniforms: &PassUniforms,
    textures: &impl SampleSource,
) -> Vec4 {
    let texel_size = Vec2::from(uniforms.texel_size);
    let result = if keywords.contains(Keywords::MANUAL_FILTERING) {
        let velocity = bilerp(textures, Sampler::Velocity, frag.uv, texel_size).xy();
        let coord = frag.uv - uniforms.dt * velocity * texel_size;
        bilerp(textures, Sampler::Source, coord, Vec2::from(uniforms.dye_texel_size))
    } else {
        let velocity = textures.sample(Sampler::Velocity, frag.uv).xy();
        let coord = frag.uv - uniforms.dt * velocity * texel_size;
        textures.sample(Sampler::Source, coord)
    };
    let decay = 1.0 + uniforms.dissipation * uniforms.dt;
    result / decay
}

fn divergence(frag: &Fragment, textures: &impl SampleSource) -> Vec4 {
    let mut l = textures.sample(Sampler::Velocity, frag.left).x;
    let mut r = textures.sample(Sampler::Velocity, frag.right).x;
    let mut t = textures.sample(Sampler::Velocity, frag.top).y;
    let mut b = textures.sample(Sampler::Velocity, frag.bottom).y;
    let c = textures.sample(Sampler::Velocity, frag.uv).xy();

    // Walls reflect the outward component instead of sampling past the edge.
    if frag.left.x < 0.0 {
        l = -c.x;
    }
    if frag.right.x > 1.0 {
        r = -c.x;
    }
    if frag.top.y > 1.0 {
        t = -c.y;
    }
    if frag.bottom.y < 0.0 {
        b = -c.y;
    }

    let div = 0.5 * (r - l + t - b);
    Vec4::new(div, 0.0, 0.0, 1.0)
}

fn curl(frag: &Fragment, textures: &impl SampleSource) -> Vec4 {
    let l = textures.sample(Sampler::Velocity, frag.left).y;
    let r = textures.sample(Sampler::Velocity, frag.right).y;
    let t = textures.sample(Sampler::Velocity, frag.top).x;
    let b = textures.sample(Sampler::Velocity, frag.bottom).x;
    let vorticity = r - l - t + b;
    Vec4::new(0.5 * vorticity, 0.0, 0.0, 1.0)
}

fn vorticity(frag: &Fragment, uniforms: &PassUniforms, textures: &impl SampleSource) -> Vec4 {
    let l = textures.sample(Sampler::Curl, frag.left).x;
    let r = textures.sample(Sampler::Curl, frag.right).x;
    let t = textures.sample(Sampler::Curl, frag.top).x;
    let b = textures.sample(Sampler::Curl, frag.bottom).x;
    let c = textures.sample(Sampler::Curl, frag.uv).x;

    let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
    force /= force.length() + 0.0001;
    force *= uniforms.curl * c;
    force.y *= -1.0;

    let velocity = textures.sample(Sampler::Velocity, frag.uv).xy() + force * uniforms.dt;
    clamp_velocity(velocity).extend(0.0).extend(1.0)
}

fn pressure(frag: &Fragment, textures: &impl SampleSource) -> Vec4 {
    let l = textures.sample(Sampler::Pressure, frag.left).x;
    let r = textures.sample(Sampler::Pressure, frag.right).x;
    let t = textures.sample(Sampler::Pressure, frag.top).x;
    let b = textures.sample(Sampler::Pressure, frag.bottom).x;
    let divergence = textures.sample(Sampler::Divergence, frag.uv).x;
    let pressure = (l + r + b + t - divergence) * 0.25;
    Vec4::new(pressure, 0.0, 0.0, 1.0)
}

fn gradient_subtract(frag: &Fragment, textures: &impl SampleSource) -> Vec4 {
    let l = textures.sample(Sampler::Pressure, frag.left).x;
    let r = textures.sample(Sampler::Pressure, frag.right).x;
    let t = textures.sample(Sampler::Pressure, frag.top).x;
    let b = textures.sample(Sampler::Pressure, frag.bottom).x;
    let velocity = textures.sample(Sampler::Velocity, frag.uv).xy() - Vec2::new(r - l, t - b);
    clamp_velocity(velocity).extend(0.0).extend(1.0)
}

fn display(
    keywords: Keywords,
    frag: &Fragment,
    uniforms: &PassUniforms,
    textures: &impl SampleSource,
) -> Vec4 {
    let mut c = textures.sample(Sampler::Texture, frag.uv).xyz();

    if keywords.contains(Keywords::SHADING) {
        let lc = textures.sample(Sampler::Texture, frag.left).xyz();
        let rc = textures.sample(Sampler::Texture, frag.right).xyz();
        let tc = textures.sample(Sampler::Texture, frag.top).xyz();
        let bc = textures.sample(Sampler::Texture, frag.bottom).xyz();

        let dx = rc.length() - lc.length();
        let dy = tc.length() - bc.length();
        let n = Vec3::new(dx, dy, Vec2::from(uniforms.texel_size).length()).normalize();
        let diffuse = (n.dot(Vec3::Z) + 0.7).clamp(0.7, 1.0);
        c *= diffuse;
    }

    let concentration = c.max_element().clamp(0.0, 1.0);
    Vec4::new(0.0, 0.0, 0.0, concentration * INK_OPACITY)
}

fn clamp_velocity(velocity: Vec2) -> Vec2 {
    velocity.clamp(Vec2::splat(-VELOCITY_LIMIT), Vec2::splat(VELOCITY_LIMIT))
}
