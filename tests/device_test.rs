use glam::Vec4;
use inkfluid::device::{
    Blend, FilterMode, PassDescriptor, PassUniforms, ProgramId, RenderDevice, RenderTarget,
    Sampler, TextureFormat,
};
use inkfluid::programs::{Keywords, Material, ProgramKind, Programs};
use inkfluid::{FluidError, Resource, SoftwareDevice, SoftwareLimits};

fn pass<'a>(
    program: ProgramId,
    uniforms: PassUniforms,
    bindings: &'a [(Sampler, inkfluid::device::TextureBinding)],
    target: RenderTarget,
) -> PassDescriptor<'a> {
    PassDescriptor {
        program,
        uniforms,
        bindings,
        target,
        clear: None,
        blend: Blend::Replace,
    }
}

/// A 2x1 texture holding (1,0,0) on the left texel and nothing on the right.
fn left_lit_source(device: &mut SoftwareDevice, filter: FilterMode) -> Resource {
    let blank = Resource::create(device, "blank", 2, 1, TextureFormat::Rgba16Float, filter).unwrap();
    let source = Resource::create(device, "source", 2, 1, TextureFormat::Rgba16Float, filter).unwrap();
    let splat = device.compile_program(ProgramKind::Splat, Keywords::NONE).unwrap();
    device
        .draw(&pass(
            splat,
            PassUniforms {
                point: [0.25, 0.5],
                radius: 0.01,
                aspect_ratio: 1.0,
                color: [1.0, 0.0, 0.0, 0.0],
                ..Default::default()
            },
            &[(Sampler::Target, blank.attach(0))],
            source.target(),
        ))
        .unwrap();
    blank.release(device);
    source
}

fn upsample(device: &mut SoftwareDevice, source: &Resource) -> Vec<f32> {
    let target = Resource::create(device, "wide", 4, 1, TextureFormat::Rgba16Float, FilterMode::Nearest)
        .unwrap();
    let clear = device.compile_program(ProgramKind::Clear, Keywords::NONE).unwrap();
    device
        .draw(&pass(
            clear,
            PassUniforms {
                value: 1.0,
                ..Default::default()
            },
            &[(Sampler::Texture, source.attach(0))],
            target.target(),
        ))
        .unwrap();
    let texels = device.read_texture(target.texture()).unwrap();
    target.release(device);
    texels.iter().map(|t| t.x).collect()
}

#[test]
fn test_nearest_sampling_picks_covering_texel() {
    let mut device = SoftwareDevice::new();
    let source = left_lit_source(&mut device, FilterMode::Nearest);
    let row = upsample(&mut device, &source);

    assert!((row[0] - 1.0).abs() < 1e-6, "got {row:?}");
    assert!((row[1] - 1.0).abs() < 1e-6, "got {row:?}");
    assert!(row[2].abs() < 1e-6, "got {row:?}");
    assert!(row[3].abs() < 1e-6, "got {row:?}");
}

#[test]
fn test_linear_sampling_blends_between_centres() {
    let mut device = SoftwareDevice::new();
    let source = left_lit_source(&mut device, FilterMode::Linear);
    let row = upsample(&mut device, &source);

    assert!((row[0] - 1.0).abs() < 1e-6, "Edges clamp, got {row:?}");
    assert!((row[1] - 0.75).abs() < 1e-5, "got {row:?}");
    assert!((row[2] - 0.25).abs() < 1e-5, "got {row:?}");
    assert!(row[3].abs() < 1e-6, "got {row:?}");
}

#[test]
fn test_clear_scales_the_source() {
    let mut device = SoftwareDevice::new();
    let source = left_lit_source(&mut device, FilterMode::Nearest);
    let target = Resource::create(&mut device, "half", 2, 1, TextureFormat::Rgba16Float, FilterMode::Nearest)
        .unwrap();
    let clear = device.compile_program(ProgramKind::Clear, Keywords::NONE).unwrap();
    device
        .draw(&pass(
            clear,
            PassUniforms {
                value: 0.8,
                ..Default::default()
            },
            &[(Sampler::Texture, source.attach(0))],
            target.target(),
        ))
        .unwrap();

    let texels = device.read_texture(target.texture()).unwrap();
    assert!((texels[0].x - 0.8).abs() < 1e-6);
    assert!(texels[1].x.abs() < 1e-6);
}

#[test]
fn test_feedback_loop_is_rejected() {
    let mut device = SoftwareDevice::new();
    let texture = Resource::create(&mut device, "loop", 4, 4, TextureFormat::Rgba16Float, FilterMode::Linear)
        .unwrap();
    let clear = device.compile_program(ProgramKind::Clear, Keywords::NONE).unwrap();

    let result = device.draw(&pass(
        clear,
        PassUniforms::default(),
        &[(Sampler::Texture, texture.attach(0))],
        texture.target(),
    ));
    assert!(matches!(result, Err(FluidError::FeedbackLoop { texture: id }) if id == texture.texture().0));
    assert_eq!(device.draw_calls(), 0, "A rejected pass must not run");
}

#[test]
fn test_unknown_handles_are_errors() {
    let mut device = SoftwareDevice::new();
    let texture = Resource::create(&mut device, "gone", 4, 4, TextureFormat::Rgba16Float, FilterMode::Linear)
        .unwrap();
    let id = texture.texture();
    let binding = texture.attach(0);
    texture.release(&mut device);

    assert!(matches!(device.read_texture(id), Err(FluidError::UnknownTexture(_))));

    let target = Resource::create(&mut device, "target", 4, 4, TextureFormat::Rgba16Float, FilterMode::Linear)
        .unwrap();
    let clear = device.compile_program(ProgramKind::Clear, Keywords::NONE).unwrap();
    let result = device.draw(&pass(
        clear,
        PassUniforms::default(),
        &[(Sampler::Texture, binding)],
        target.target(),
    ));
    assert!(matches!(result, Err(FluidError::UnknownTexture(_))));

    let result = device.draw(&pass(ProgramId(99), PassUniforms::default(), &[], target.target()));
    assert!(matches!(result, Err(FluidError::UnknownProgram(99))));
}

#[test]
fn test_texture_limits_are_enforced() {
    let mut device = SoftwareDevice::with_limits(SoftwareLimits {
        max_texture_dimension: 64,
        ..SoftwareLimits::default()
    });
    let zero = Resource::create(&mut device, "zero", 0, 4, TextureFormat::Rgba16Float, FilterMode::Linear);
    assert!(matches!(zero, Err(FluidError::InvalidDimensions { width: 0, height: 4 })));

    let huge = Resource::create(&mut device, "huge", 65, 4, TextureFormat::Rgba16Float, FilterMode::Linear);
    assert!(matches!(huge, Err(FluidError::InvalidDimensions { .. })));
    assert_eq!(device.texture_count(), 0);
}

#[test]
fn test_rgba8_storage_clamps_and_quantizes() {
    let stored = TextureFormat::Rgba8Unorm.store(Vec4::new(-0.5, 0.5, 2.0, 0.1));
    assert_eq!(stored.x, 0.0);
    assert!((stored.y - 128.0 / 255.0).abs() < 1e-6);
    assert_eq!(stored.z, 1.0);
    assert!((stored.w - 26.0 / 255.0).abs() < 1e-6);

    let narrow = TextureFormat::Rg16Float.store(Vec4::new(3.0, -4.0, 5.0, 6.0));
    assert_eq!(narrow, Vec4::new(3.0, -4.0, 0.0, 1.0));
}

#[test]
fn test_material_compiles_each_variant_once() {
    let mut device = SoftwareDevice::new();
    let mut material = Material::new(ProgramKind::Advection);
    assert_eq!(material.compiled_variants(), 0);

    let plain = material.variant(&mut device, Keywords::NONE).unwrap();
    let manual = material.variant(&mut device, Keywords::MANUAL_FILTERING).unwrap();
    assert_ne!(plain, manual);
    assert_eq!(material.variant(&mut device, Keywords::NONE).unwrap(), plain);
    assert_eq!(material.variant(&mut device, Keywords::MANUAL_FILTERING).unwrap(), manual);

    assert_eq!(material.compiled_variants(), 2);
    assert_eq!(device.compiled_programs(), 2, "Repeat lookups must not recompile");
}

#[test]
fn test_keyword_sets() {
    let both = Keywords::MANUAL_FILTERING | Keywords::SHADING;
    assert!(both.contains(Keywords::SHADING));
    assert!(both.contains(Keywords::MANUAL_FILTERING));
    assert!(!Keywords::NONE.contains(Keywords::SHADING));
    assert_eq!(both.set(Keywords::SHADING, false), Keywords::MANUAL_FILTERING);
    assert_eq!(Keywords::NONE.set(Keywords::SHADING, true), Keywords::SHADING);
}

#[test]
fn test_link_failure_names_the_program() {
    let mut device = SoftwareDevice::with_limits(SoftwareLimits {
        broken_programs: vec![ProgramKind::Pressure],
        ..SoftwareLimits::default()
    });
    let result = Programs::compile(&mut device, true);
    match result {
        Err(FluidError::ProgramLink { program, log }) => {
            assert_eq!(program, ProgramKind::Pressure);
            assert!(!log.is_empty(), "The link log should be carried along");
        }
        other => panic!("expected a link error, got {other:?}"),
    }
}
