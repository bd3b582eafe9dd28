//! WGSL source for the fragment programs run by [`crate::gpu::WgpuDevice`].
//!
//! One module holds every program. Each is a fragment entry point drawn over
//! a fullscreen triangle; `uv` comes from the fragment position scaled by the
//! target's texel size, so texel centres land where the software device puts
//! them. Keyword variants are pipeline-overridable constants.

use crate::device::Sampler;
use crate::programs::{Keywords, ProgramKind};
use std::collections::HashMap;

pub const SHADER_SOURCE: &str = r"
struct PassUniforms {
    texel_size: vec2<f32>,
    dye_texel_size: vec2<f32>,
    point: vec2<f32>,
    target_texel_size: vec2<f32>,
    color: vec4<f32>,
    dt: f32,
    dissipation: f32,
    curl: f32,
    value: f32,
    aspect_ratio: f32,
    radius: f32,
    _padding: vec2<f32>,
}

override MANUAL_FILTERING: bool = false;
override SHADING: bool = false;

const VELOCITY_LIMIT: f32 = 1000.0;
const INK_OPACITY: f32 = 0.8;

@group(0) @binding(0) var<uniform> u: PassUniforms;
@group(0) @binding(1) var tex0: texture_2d<f32>;
@group(0) @binding(2) var samp0: sampler;
@group(0) @binding(3) var tex1: texture_2d<f32>;
@group(0) @binding(4) var samp1: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
}

struct Fragment {
    uv: vec2<f32>,
    l: vec2<f32>,
    r: vec2<f32>,
    t: vec2<f32>,
    b: vec2<f32>,
}

fn fragment(position: vec4<f32>) -> Fragment {
    let uv = position.xy * u.target_texel_size;
    let dx = vec2<f32>(u.texel_size.x, 0.0);
    let dy = vec2<f32>(0.0, u.texel_size.y);
    return Fragment(uv, uv - dx, uv + dx, uv + dy, uv - dy);
}

fn s0(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(tex0, samp0, uv, 0.0);
}

fn s1(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(tex1, samp1, uv, 0.0);
}

fn clamp_velocity(v: vec2<f32>) -> vec2<f32> {
    return clamp(v, vec2<f32>(-VELOCITY_LIMIT), vec2<f32>(VELOCITY_LIMIT));
}

@fragment
fn fs_clear(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    return u.value * s0(f.uv);
}

@fragment
fn fs_splat(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    var p = f.uv - u.point;
    p.x = p.x * u.aspect_ratio;
    let splat = exp(-dot(p, p) / u.radius) * u.color.xyz;
    let base = s0(f.uv);
    return vec4<f32>(base.xyz + splat, base.w);
}

fn bilerp0(uv: vec2<f32>, tsize: vec2<f32>) -> vec4<f32> {
    let st = uv / tsize - 0.5;
    let iuv = floor(st);
    let fuv = fract(st);
    let a = s0((iuv + vec2<f32>(0.5, 0.5)) * tsize);
    let b = s0((iuv + vec2<f32>(1.5, 0.5)) * tsize);
    let c = s0((iuv + vec2<f32>(0.5, 1.5)) * tsize);
    let d = s0((iuv + vec2<f32>(1.5, 1.5)) * tsize);
    return mix(mix(a, b, fuv.x), mix(c, d, fuv.x), fuv.y);
}

fn bilerp1(uv: vec2<f32>, tsize: vec2<f32>) -> vec4<f32> {
    let st = uv / tsize - 0.5;
    let iuv = floor(st);
    let fuv = fract(st);
    let a = s1((iuv + vec2<f32>(0.5, 0.5)) * tsize);
    let b = s1((iuv + vec2<f32>(1.5, 0.5)) * tsize);
    let c = s1((iuv + vec2<f32>(0.5, 1.5)) * tsize);
    let d = s1((iuv + vec2<f32>(1.5, 1.5)) * tsize);
    return mix(mix(a, b, fuv.x), mix(c, d, fuv.x), fuv.y);
}

// tex0 = velocity, tex1 = source
@fragment
fn fs_advection(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    var result: vec4<f32>;
    if MANUAL_FILTERING {
        let coord = f.uv - u.dt * bilerp0(f.uv, u.texel_size).xy * u.texel_size;
        result = bilerp1(coord, u.dye_texel_size);
    } else {
        let coord = f.uv - u.dt * s0(f.uv).xy * u.texel_size;
        result = s1(coord);
    }
    return result / (1.0 + u.dissipation * u.dt);
}

// tex0 = velocity
@fragment
fn fs_divergence(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    var l = s0(f.l).x;
    var r = s0(f.r).x;
    var t = s0(f.t).y;
    var b = s0(f.b).y;
    let c = s0(f.uv).xy;
    if f.l.x < 0.0 { l = -c.x; }
    if f.r.x > 1.0 { r = -c.x; }
    if f.t.y > 1.0 { t = -c.y; }
    if f.b.y < 0.0 { b = -c.y; }
    return vec4<f32>(0.5 * (r - l + t - b), 0.0, 0.0, 1.0);
}

// tex0 = velocity
@fragment
fn fs_curl(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    let vorticity = s0(f.r).y - s0(f.l).y - s0(f.t).x + s0(f.b).x;
    return vec4<f32>(0.5 * vorticity, 0.0, 0.0, 1.0);
}

// tex0 = velocity, tex1 = curl
@fragment
fn fs_vorticity(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    let l = s1(f.l).x;
    let r = s1(f.r).x;
    let t = s1(f.t).x;
    let b = s1(f.b).x;
    let c = s1(f.uv).x;
    var force = 0.5 * vec2<f32>(abs(t) - abs(b), abs(r) - abs(l));
    force = force / (length(force) + 0.0001);
    force = force * u.curl * c;
    force.y = -force.y;
    let velocity = clamp_velocity(s0(f.uv).xy + force * u.dt);
    return vec4<f32>(velocity, 0.0, 1.0);
}

// tex0 = divergence, tex1 = pressure
@fragment
fn fs_pressure(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    let sum = s1(f.l).x + s1(f.r).x + s1(f.b).x + s1(f.t).x;
    return vec4<f32>((sum - s0(f.uv).x) * 0.25, 0.0, 0.0, 1.0);
}

// tex0 = pressure, tex1 = velocity
@fragment
fn fs_gradient_subtract(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    let gradient = vec2<f32>(s0(f.r).x - s0(f.l).x, s0(f.t).x - s0(f.b).x);
    let velocity = clamp_velocity(s1(f.uv).xy - gradient);
    return vec4<f32>(velocity, 0.0, 1.0);
}

// tex0 = dye
@fragment
fn fs_display(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let f = fragment(position);
    var c = s0(f.uv).xyz;
    if SHADING {
        let dx = length(s0(f.r).xyz) - length(s0(f.l).xyz);
        let dy = length(s0(f.t).xyz) - length(s0(f.b).xyz);
        let n = normalize(vec3<f32>(dx, dy, length(u.texel_size)));
        let diffuse = clamp(dot(n, vec3<f32>(0.0, 0.0, 1.0)) + 0.7, 0.7, 1.0);
        c = c * diffuse;
    }
    let concentration = clamp(max(c.x, max(c.y, c.z)), 0.0, 1.0);
    return vec4<f32>(0.0, 0.0, 0.0, concentration * INK_OPACITY);
}

// Copies tex0 into a 32-bit float target for readback.
@fragment
fn fs_readback(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(tex0, vec2<i32>(floor(position.xy)), 0);
}
";

/// Fragment entry point for a program.
pub fn entry_point(kind: ProgramKind) -> &'static str {
    match kind {
        ProgramKind::Clear => "fs_clear",
        ProgramKind::Splat => "fs_splat",
        ProgramKind::Advection => "fs_advection",
        ProgramKind::Divergence => "fs_divergence",
        ProgramKind::Curl => "fs_curl",
        ProgramKind::Vorticity => "fs_vorticity",
        ProgramKind::Pressure => "fs_pressure",
        ProgramKind::GradientSubtract => "fs_gradient_subtract",
        ProgramKind::Display => "fs_display",
    }
}

pub const READBACK_ENTRY_POINT: &str = "fs_readback";

/// Which sampler each of a program's two texture slots reads.
pub fn inputs(kind: ProgramKind) -> [Option<Sampler>; 2] {
    match kind {
        ProgramKind::Clear | ProgramKind::Display => [Some(Sampler::Texture), None],
        ProgramKind::Splat => [Some(Sampler::Target), None],
        ProgramKind::Advection => [Some(Sampler::Velocity), Some(Sampler::Source)],
        ProgramKind::Divergence | ProgramKind::Curl => [Some(Sampler::Velocity), None],
        ProgramKind::Vorticity => [Some(Sampler::Velocity), Some(Sampler::Curl)],
        ProgramKind::Pressure => [Some(Sampler::Divergence), Some(Sampler::Pressure)],
        ProgramKind::GradientSubtract => [Some(Sampler::Pressure), Some(Sampler::Velocity)],
    }
}

/// Override-constant values selecting a keyword variant.
pub fn constants(keywords: Keywords) -> HashMap<String, f64> {
    let flag = |k: Keywords| if keywords.contains(k) { 1.0 } else { 0.0 };
    HashMap::from([
        ("MANUAL_FILTERING".to_string(), flag(Keywords::MANUAL_FILTERING)),
        ("SHADING".to_string(), flag(Keywords::SHADING)),
    ])
}
