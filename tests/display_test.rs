use glam::{Vec2, Vec3, Vec4};
use inkfluid::device::RenderDevice;
use inkfluid::kernels::INK_OPACITY;
use inkfluid::scheduler::MAX_FRAME_DT;
use inkfluid::{
    AnalysisRecorder, BackColor, FieldSnapshot, FluidMetrics, ImageExporter, Simulation,
    SimulationConfig, SoftwareDevice,
};

fn config() -> SimulationConfig {
    SimulationConfig {
        sim_resolution: 32,
        dye_resolution: 64,
        capture_resolution: 32,
        ..SimulationConfig::default()
    }
}

fn inked_simulation(config: SimulationConfig) -> Simulation<SoftwareDevice> {
    let mut sim = Simulation::new(SoftwareDevice::new(), config, 200, 100).unwrap();
    sim.splat(Vec2::new(0.5, 0.5), Vec2::ZERO, Vec3::splat(5.0)).unwrap();
    sim
}

#[test]
fn test_ink_is_black_with_bounded_alpha() {
    let mut sim = inked_simulation(config());
    sim.render().unwrap();
    let surface = sim.read_surface().unwrap();
    assert_eq!((surface.width, surface.height), (200, 100));

    for texel in &surface.texels {
        assert_eq!(texel.truncate(), Vec3::ZERO, "Ink carries no colour of its own");
        assert!(
            texel.w >= 0.0 && texel.w <= INK_OPACITY + 1e-3,
            "Alpha {} outside [0, {INK_OPACITY}]",
            texel.w
        );
    }

    let centre = surface.at(100, 50);
    assert!(
        (centre.w - INK_OPACITY).abs() < 1e-2,
        "Saturated ink should reach full ink opacity, got {}",
        centre.w
    );
    assert_eq!(surface.at(0, 0).w, 0.0, "Clear water stays transparent");
}

#[test]
fn test_opaque_background_shows_through_ink() {
    let mut sim = inked_simulation(SimulationConfig {
        transparent: false,
        back_color: BackColor { r: 255, g: 255, b: 255 },
        ..config()
    });
    sim.render().unwrap();
    let surface = sim.read_surface().unwrap();

    assert_eq!(surface.at(0, 0), Vec4::ONE, "Empty water shows the back colour");
    let centre = surface.at(100, 50);
    assert_eq!(centre.w, 1.0, "An opaque background stays opaque under ink");
    assert!(centre.x < 0.3, "Ink darkens the back colour, got {centre}");
}

#[test]
fn test_shading_only_darkens() {
    let mut flat = inked_simulation(SimulationConfig {
        shading: false,
        ..config()
    });
    let mut shaded = inked_simulation(config());
    flat.render().unwrap();
    shaded.render().unwrap();

    let flat = flat.read_surface().unwrap();
    let shaded = shaded.read_surface().unwrap();
    for (f, s) in flat.texels.iter().zip(&shaded.texels) {
        assert!(s.w <= f.w + 1e-6, "Shading must never add ink");
    }
}

#[test]
fn test_capture_uses_capture_resolution_and_frees_its_target() {
    let mut sim = inked_simulation(config());
    let textures = sim.device().texture_count();

    let capture = sim.capture().unwrap();
    assert_eq!((capture.width, capture.height), (64, 32));
    assert_eq!(capture.texels.len(), 64 * 32);
    assert!(capture.max_abs(4) > 0.0, "The capture should contain the splat");
    assert_eq!(sim.device().texture_count(), textures, "Capture target must be released");
}

#[test]
fn test_exporter_flips_rows() {
    let snapshot = FieldSnapshot {
        width: 1,
        height: 2,
        texels: vec![Vec4::new(0.0, 0.0, 0.0, 0.8), Vec4::ZERO],
    };
    let image = ImageExporter::new(1, 2).render_display(&snapshot);

    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0], "Top of the image is the last row");
    assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0, 204]);
}

#[test]
fn test_exporter_unpremultiplies() {
    let snapshot = FieldSnapshot {
        width: 1,
        height: 1,
        texels: vec![Vec4::new(0.25, 0.25, 0.25, 0.5)],
    };
    let image = ImageExporter::new(1, 1).render_display(&snapshot);
    assert_eq!(image.get_pixel(0, 0).0, [128, 128, 128, 128]);
}

#[test]
fn test_capture_png_is_written() {
    let mut sim = inked_simulation(config());
    let path = std::env::temp_dir().join(format!("inkfluid_capture_{}.png", std::process::id()));

    ImageExporter::new(64, 32)
        .export_capture_png(&mut sim, &path)
        .unwrap();

    let image = image::open(&path).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (64, 32));
    assert!(image.pixels().any(|p| p.0[3] > 0), "The PNG should show ink");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_velocity_png_shows_the_push() {
    let mut sim = inked_simulation(config());
    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(3000.0, 0.0), Vec3::ZERO)
        .unwrap();
    let path = std::env::temp_dir().join(format!("inkfluid_velocity_{}.png", std::process::id()));

    ImageExporter::new(64, 32)
        .export_velocity_png(&mut sim, &path)
        .unwrap();

    let image = image::open(&path).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (64, 32));
    let strongest = image.pixels().map(|p| p.0[0]).max().unwrap();
    assert_eq!(strongest, 255, "The fastest texel saturates red");
    assert!(
        image.pixels().all(|p| p.0[1] == 0),
        "A purely horizontal push leaves green empty"
    );
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_frame_sequence_writes_one_file_per_step() {
    let mut sim = inked_simulation(config());
    let dir = std::env::temp_dir().join(format!("inkfluid_sequence_{}", std::process::id()));

    let written = ImageExporter::new(32, 16)
        .export_frame_sequence(&mut sim, 3, MAX_FRAME_DT, &dir, "ink")
        .unwrap();

    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|p| p.exists()));
    assert!(written[0].ends_with("ink_frame_0000.png"));
    assert_eq!(sim.step_count(), 3);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_metrics_of_uniform_flow() {
    let velocity = FieldSnapshot {
        width: 4,
        height: 4,
        texels: vec![Vec4::new(3.0, 4.0, 0.0, 1.0); 16],
    };
    let mut dye_texels = vec![Vec4::ZERO; 16];
    dye_texels[5] = Vec4::new(0.5, 0.2, 0.1, 1.0);
    let dye = FieldSnapshot {
        width: 4,
        height: 4,
        texels: dye_texels,
    };

    let metrics = FluidMetrics::analyze(&velocity, &dye, 7);
    assert_eq!(metrics.frame, 7);
    assert!((metrics.max_speed - 5.0).abs() < 1e-6);
    assert!((metrics.avg_speed - 5.0).abs() < 1e-6);
    assert!((metrics.kinetic_energy - 16.0 * 12.5).abs() < 1e-3);
    assert_eq!(metrics.mean_divergence, 0.0, "Uniform flow has no divergence");
    assert_eq!(metrics.vorticity, 0.0);
    assert!((metrics.total_dye - 0.8).abs() < 1e-6);
    assert_eq!(metrics.max_concentration, 0.5);
    assert_eq!(metrics.ink_coverage, 1.0 / 16.0);
    assert!(metrics.dye_entropy > 0.0);
}

#[test]
fn test_recorder_tracks_fading_dye() {
    let mut sim = inked_simulation(config());
    let mut recorder = AnalysisRecorder::new();
    assert!(recorder.trend().is_none());

    let first = recorder.record_frame(&mut sim, 0).unwrap().total_dye;
    assert!(first > 0.0);
    for _ in 0..5 {
        sim.step(MAX_FRAME_DT).unwrap();
    }
    recorder.record_frame(&mut sim, 5).unwrap();

    let trend = recorder.trend().unwrap();
    assert!(trend.dye_change_percent < 0.0, "Dye dissipates, got {trend:?}");
    assert_eq!(recorder.metrics_history.len(), 2);
}
