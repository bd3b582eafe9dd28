use glam::{Vec2, Vec3};
use inkfluid::device::RenderDevice;
use inkfluid::kernels::VELOCITY_LIMIT;
use inkfluid::pointer::{MOUSE_POINTER_ID, ink_color};
use inkfluid::scheduler::MAX_FRAME_DT;
use inkfluid::programs::ProgramKind;
use inkfluid::{FluidError, SimulationConfig, Simulation, SoftwareDevice, SoftwareLimits};

fn small_config() -> SimulationConfig {
    SimulationConfig {
        sim_resolution: 32,
        dye_resolution: 64,
        capture_resolution: 32,
        ..SimulationConfig::default()
    }
}

fn small_simulation() -> Simulation<SoftwareDevice> {
    let mut sim = Simulation::new(SoftwareDevice::new(), small_config(), 200, 100).unwrap();
    sim.seed_rng(7);
    sim
}

#[test]
fn test_simulation_creation() {
    let sim = small_simulation();
    let fb = sim.framebuffers();
    assert_eq!(fb.sim_size().height, 32);
    assert_eq!(fb.sim_size().width, 64, "Long axis follows the 2:1 canvas");
    assert_eq!(fb.dye_size().height, 64);
    assert_eq!(fb.dye_size().width, 128);
    assert_eq!(
        sim.device().texture_count(),
        2 + 2 + 1 + 1 + 2,
        "dye, velocity and pressure are double buffered"
    );
    assert_eq!(sim.step_count(), 0);
}

#[test]
fn test_zero_dt_leaves_fields_unchanged() {
    let mut sim = small_simulation();
    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(300.0, -200.0), ink_color())
        .unwrap();

    let velocity = sim.read_velocity().unwrap();
    let dye = sim.read_dye().unwrap();

    sim.step(0.0).unwrap();

    assert_eq!(sim.read_velocity().unwrap(), velocity, "Velocity changed on dt = 0");
    assert_eq!(sim.read_dye().unwrap(), dye, "Dye changed on dt = 0");
    assert_eq!(sim.step_count(), 0, "A zero step is not counted");
}

#[test]
fn test_velocity_stays_clamped() {
    let mut sim = small_simulation();
    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(1.0e7, -1.0e7), ink_color())
        .unwrap();

    for _ in 0..5 {
        sim.step(MAX_FRAME_DT).unwrap();
        let velocity = sim.read_velocity().unwrap();
        let max = velocity.max_abs(2);
        assert!(
            max <= VELOCITY_LIMIT,
            "Velocity component {max} escaped the clamp"
        );
    }
}

fn flow(sim: &mut Simulation<SoftwareDevice>) -> Vec<Vec2> {
    let velocity = sim.read_velocity().unwrap();
    velocity.texels.iter().map(|t| t.truncate().truncate()).collect()
}

#[test]
fn test_zero_force_splat_leaves_velocity_unchanged() {
    let mut sim = small_simulation();
    let velocity = flow(&mut sim);
    let dye = sim.read_dye().unwrap();

    sim.splat(Vec2::new(0.5, 0.5), Vec2::ZERO, Vec3::ZERO).unwrap();
    assert_eq!(flow(&mut sim), velocity);
    assert_eq!(sim.read_dye().unwrap(), dye);

    sim.splat(Vec2::new(0.5, 0.5), Vec2::ZERO, ink_color()).unwrap();
    assert_eq!(
        flow(&mut sim),
        velocity,
        "Zero force must not move the fluid even when ink is added"
    );
    assert!(sim.read_dye().unwrap().max_abs(3) > 0.0, "Ink should be deposited");
}

#[test]
fn test_pointer_move_is_consumed_once() {
    let mut sim = small_simulation();

    sim.pointer_down(MOUSE_POINTER_ID, Vec2::new(100.0, 50.0)).unwrap();
    assert_eq!(sim.splat_count(), 1, "Contact bursts a little ink immediately");
    assert!(sim.pointer().down);

    sim.pointer_move(Vec2::new(105.0, 50.0));
    assert!(sim.pointer().moved, "A 5px move marks the pointer as moved");
    assert!(sim.pointer().delta.x > 0.0);
    assert_eq!(sim.pointer().delta.y, 0.0);

    sim.apply_inputs().unwrap();
    sim.step(MAX_FRAME_DT).unwrap();
    assert_eq!(sim.splat_count(), 2, "The move produces exactly one splat");
    assert!(!sim.pointer().moved, "The frame consumes the move");

    sim.apply_inputs().unwrap();
    assert_eq!(sim.splat_count(), 2, "No second splat without new motion");
}

#[test]
fn test_rapid_moves_overwrite() {
    let mut sim = small_simulation();
    sim.pointer_down(MOUSE_POINTER_ID, Vec2::new(20.0, 20.0)).unwrap();
    sim.pointer_move(Vec2::new(30.0, 20.0));
    sim.pointer_move(Vec2::new(40.0, 25.0));
    sim.pointer_move(Vec2::new(50.0, 30.0));

    sim.apply_inputs().unwrap();
    assert_eq!(
        sim.splat_count(),
        2,
        "Moves between frames collapse into one splat"
    );
    assert_eq!(sim.pointer().texcoord, Vec2::new(50.0 / 200.0, 1.0 - 30.0 / 100.0));
}

#[test]
fn test_motionless_move_does_not_splat() {
    let mut sim = small_simulation();
    sim.pointer_down(MOUSE_POINTER_ID, Vec2::new(100.0, 50.0)).unwrap();
    sim.pointer_move(Vec2::new(100.0, 50.0));
    assert!(!sim.pointer().moved);

    sim.apply_inputs().unwrap();
    assert_eq!(sim.splat_count(), 1);
}

#[test]
fn test_random_splats_are_queued_per_frame() {
    let mut sim = small_simulation();
    sim.queue_random_splats(3);
    sim.queue_random_splats(5);

    sim.apply_inputs().unwrap();
    assert_eq!(sim.splat_count(), 5, "The latest batch is applied first");
    sim.apply_inputs().unwrap();
    assert_eq!(sim.splat_count(), 8);
    sim.apply_inputs().unwrap();
    assert_eq!(sim.splat_count(), 8);
}

#[test]
fn test_dye_dissipates_over_time() {
    let mut sim = small_simulation();
    sim.splat(Vec2::new(0.5, 0.5), Vec2::ZERO, Vec3::ONE).unwrap();
    let before: f32 = sim.read_dye().unwrap().texels.iter().map(|t| t.x).sum();

    for _ in 0..10 {
        sim.step(MAX_FRAME_DT).unwrap();
    }
    let after: f32 = sim.read_dye().unwrap().texels.iter().map(|t| t.x).sum();

    assert!(after < before, "Dye should fade: {before} -> {after}");
    assert!(after > 0.0, "Dye should not vanish in ten frames");
}

#[test]
fn test_single_splat_divergence_is_local() {
    // 128x128 velocity and 256x256 dye on a square canvas.
    let config = SimulationConfig {
        sim_resolution: 128,
        dye_resolution: 256,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(SoftwareDevice::new(), config, 512, 512).unwrap();
    assert_eq!(sim.framebuffers().sim_size().width, 128);
    assert_eq!(sim.framebuffers().dye_size().width, 256);

    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(6000.0, 0.0), ink_color())
        .unwrap();
    sim.step(MAX_FRAME_DT).unwrap();

    let divergence = sim.read_divergence().unwrap();
    let mut near = 0.0f32;
    for y in 54..74 {
        for x in 54..74 {
            near = near.max(divergence.at(x, y).x.abs());
        }
    }
    let mut far = 0.0f32;
    for y in 0..16 {
        for x in 0..16 {
            far = far.max(divergence.at(x, y).x.abs());
        }
    }

    assert!(near > 1.0, "Divergence near the splat should be large, got {near}");
    assert!(far < 1e-3, "Divergence far from the splat should vanish, got {far}");
}

#[test]
fn test_projection_reduces_divergence() {
    let mut sim = small_simulation();
    sim.multiple_splats(4).unwrap();

    let measure = |sim: &mut Simulation<SoftwareDevice>| {
        let velocity = sim.read_velocity().unwrap();
        let dye = sim.read_dye().unwrap();
        inkfluid::FluidMetrics::analyze(&velocity, &dye, 0).mean_divergence
    };
    let before = measure(&mut sim);
    sim.step(MAX_FRAME_DT).unwrap();
    let after = measure(&mut sim);

    assert!(
        after < before,
        "Pressure projection should reduce divergence: {before} -> {after}"
    );
}

#[test]
fn test_resize_reallocates_without_leaking() {
    let mut sim = small_simulation();
    let textures = sim.device().texture_count();

    sim.resize(100, 300).unwrap();
    assert_eq!(sim.canvas_size(), (100, 300));
    assert_eq!(sim.framebuffers().sim_size().width, 32);
    assert_eq!(sim.framebuffers().sim_size().height, 96);
    assert_eq!(sim.device().surface_size(), (100, 300));
    assert_eq!(
        sim.device().texture_count(),
        textures,
        "Old framebuffers must be released"
    );
}

#[test]
fn test_program_variants_are_compiled_at_setup() {
    let mut sim = small_simulation();
    assert_eq!(
        sim.programs().advection.compiled_variants(),
        2,
        "Velocity filters by hand while dye uses hardware filtering"
    );
    assert_eq!(
        sim.programs().display.compiled_variants(),
        2,
        "Shaded and flat display are both ready"
    );
    let compiled = sim.device().compiled_programs();

    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(300.0, 0.0), ink_color())
        .unwrap();
    sim.step(MAX_FRAME_DT).unwrap();
    sim.render().unwrap();
    sim.capture().unwrap();
    assert_eq!(
        sim.device().compiled_programs(),
        compiled,
        "Frames reuse the variants compiled at setup"
    );
}

#[test]
fn test_lazily_used_programs_fail_at_setup() {
    for broken in [ProgramKind::Advection, ProgramKind::Display] {
        let device = SoftwareDevice::with_limits(SoftwareLimits {
            broken_programs: vec![broken],
            ..SoftwareLimits::default()
        });
        let result = Simulation::new(device, small_config(), 200, 100);
        match result {
            Err(FluidError::ProgramLink { program, .. }) => assert_eq!(program, broken),
            Err(other) => panic!("expected a link error for {broken:?}, got {other:?}"),
            Ok(_) => panic!("{broken:?} failing to link must stop setup"),
        }
    }
}

#[test]
fn test_failed_resize_keeps_previous_buffers() {
    let mut sim = small_simulation();
    let textures = sim.device().texture_count();
    let sim_size = sim.framebuffers().sim_size();

    // Room for three of the eight new textures.
    sim.device_mut().limits_mut().max_textures = textures + 3;
    let result = sim.resize(100, 300);
    assert!(result.is_err(), "Resize past the texture budget should fail");
    assert_eq!(
        sim.device().texture_count(),
        textures,
        "Textures created before the failure must be released"
    );
    assert_eq!(sim.canvas_size(), (200, 100));
    assert_eq!(sim.device().surface_size(), (200, 100));
    assert_eq!(sim.framebuffers().sim_size(), sim_size);

    sim.step(MAX_FRAME_DT).unwrap();
    sim.render().unwrap();
}

#[test]
fn test_pressure_and_curl_follow_a_splat() {
    let mut sim = small_simulation();
    sim.splat(Vec2::new(0.5, 0.5), Vec2::new(3000.0, 0.0), ink_color())
        .unwrap();
    sim.step(MAX_FRAME_DT).unwrap();

    let pressure = sim.read_pressure().unwrap();
    let curl = sim.read_curl().unwrap();
    assert_eq!((pressure.width, pressure.height), (64, 32));
    assert!(
        pressure.max_abs(1) > 0.0,
        "The pressure solve should react to the splat"
    );
    assert!(
        curl.max_abs(1) > 0.0,
        "A sideways push has rotation above and below its centre"
    );
}

#[test]
fn test_rgba8_fallback_still_steps() {
    let device = SoftwareDevice::with_limits(inkfluid::SoftwareLimits {
        half_float: false,
        ..Default::default()
    });
    let mut sim = Simulation::new(device, small_config(), 200, 100).unwrap();
    assert!(!sim.capabilities().linear_filtering);
    assert!(!sim.config().shading);

    sim.splat(Vec2::new(0.5, 0.5), Vec2::ZERO, Vec3::splat(0.5)).unwrap();
    sim.step(MAX_FRAME_DT).unwrap();
    sim.render().unwrap();

    let dye = sim.read_dye().unwrap();
    assert!(dye.max_abs(3) > 0.0);
    assert_eq!(sim.programs().advection.compiled_variants(), 1);
}
