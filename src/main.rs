use clap::{Parser, Subcommand};
use inkfluid::pointer::MOUSE_POINTER_ID;
use inkfluid::{
    AnalysisRecorder, Canvas, FluidBackground, HeadlessCanvas, ImageExporter, InkApp,
    SimulationConfig,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Frames spent dragging the scripted pointer across the canvas.
const STROKE_FRAMES: u32 = 30;

/// Point on a left-to-right wave across the middle of the canvas.
fn stroke_position(frame: u32, width: f32, height: f32) -> (f32, f32) {
    let t = frame as f32 / STROKE_FRAMES as f32;
    let x = width * (0.2 + 0.6 * t);
    let y = height * (0.5 + 0.15 * (t * std::f32::consts::TAU).sin());
    (x, y)
}

/// Ink-in-water fluid background
#[derive(Parser, Debug)]
#[command(name = "inkfluid")]
#[command(about = "Stable-fluids ink simulation", long_about = None)]
struct Args {
    /// JSON file overriding the default simulation settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the interactive window (default)
    Gui,
    /// Run without a window and write captures and metrics
    Headless {
        /// Number of frames to simulate
        #[arg(short, long, default_value_t = 120)]
        frames: u32,

        /// Canvas width in logical pixels
        #[arg(long, default_value_t = 640.0)]
        width: f32,

        /// Canvas height in logical pixels
        #[arg(long, default_value_t = 480.0)]
        height: f32,

        /// Random splats queued before the first frame
        #[arg(short, long, default_value_t = 12)]
        splats: u32,

        /// Seed for random splats
        #[arg(long)]
        seed: Option<u64>,

        /// Save a capture every N frames (0 = only the last)
        #[arg(long, default_value_t = 0)]
        capture_every: u32,

        /// Directory for PNG captures
        #[arg(short, long, default_value = "ink_frames")]
        output: PathBuf,

        /// Run the passes on the GPU instead of the software device
        #[cfg(feature = "gpu")]
        #[arg(long)]
        gpu: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::default(),
    };

    match args.command.unwrap_or(Command::Gui) {
        Command::Gui => run_gui_app(config),
        Command::Headless {
            frames,
            width,
            height,
            splats,
            seed,
            capture_every,
            output,
            #[cfg(feature = "gpu")]
            gpu,
        } => {
            #[cfg(feature = "gpu")]
            if gpu {
                return run_gpu_headless(config, frames, width, height, splats, &output);
            }
            run_headless(config, frames, width, height, splats, seed, capture_every, &output)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_headless(
    config: SimulationConfig,
    frames: u32,
    width: f32,
    height: f32,
    splats: u32,
    seed: Option<u64>,
    capture_every: u32,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Running headless ink simulation: {frames} frames at {width}x{height}");
    std::fs::create_dir_all(output)?;

    let mut background = FluidBackground::new(Some(HeadlessCanvas::new(width, height)), config)?;
    let mut now = Instant::now();
    background.start(now)?;

    let mut recorder = AnalysisRecorder::new();
    let (backing_width, backing_height) = background.canvas().backing_size();
    let exporter = ImageExporter::new(backing_width, backing_height);

    if let Some(simulation) = background.simulation_mut() {
        if let Some(seed) = seed {
            simulation.seed_rng(seed);
        }
        simulation.queue_random_splats(splats);
        recorder.record_frame(simulation, 0)?.log_summary();
    }

    let (x, y) = stroke_position(0, width, height);
    background.pointer_down(MOUSE_POINTER_ID, x, y)?;

    for frame in 1..=frames {
        now += Duration::from_millis(16);
        if frame <= STROKE_FRAMES {
            let (x, y) = stroke_position(frame, width, height);
            background.pointer_move(x, y);
        } else if frame == STROKE_FRAMES + 1 {
            background.pointer_up();
        }

        if background.canvas_mut().take_pending_request().is_none() {
            break;
        }
        background.animation_frame(now)?;

        let Some(simulation) = background.simulation_mut() else {
            continue;
        };
        let metrics = recorder.record_frame(simulation, frame as usize)?;
        if frame % 30 == 0 {
            metrics.log_summary();
        }

        let last = frame == frames;
        if last || (capture_every > 0 && frame % capture_every == 0) {
            let path = output.join(format!("ink_{frame:04}.png"));
            exporter.export_capture_png(simulation, &path)?;
        }
        if last {
            exporter.export_velocity_png(simulation, &output.join("ink_velocity.png"))?;
        }
    }

    background.stop();
    recorder.log_trends();
    log::info!("Headless run finished, captures in {}", output.display());
    Ok(())
}

#[cfg(feature = "gpu")]
fn run_gpu_headless(
    config: SimulationConfig,
    frames: u32,
    width: f32,
    height: f32,
    splats: u32,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let device = runtime.block_on(inkfluid::WgpuDevice::new())?;
    let (width, height) = (width as u32, height as u32);
    let mut simulation = inkfluid::Simulation::new(device, config, width, height)?;

    simulation.multiple_splats(splats)?;
    for _ in 0..frames {
        simulation.step(inkfluid::scheduler::MAX_FRAME_DT)?;
        simulation.render()?;
    }

    std::fs::create_dir_all(output)?;
    let path = output.join("ink_gpu.png");
    ImageExporter::new(width, height).export_capture_png(&mut simulation, &path)?;
    log::info!("GPU run finished, capture at {}", path.display());
    Ok(())
}

fn run_gui_app(config: SimulationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = InkApp::new(config)?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 640.0])
            .with_title("inkfluid - Ink in Water"),
        ..Default::default()
    };

    eframe::run_native("inkfluid", options, Box::new(|_cc| Box::new(app)))?;
    Ok(())
}
