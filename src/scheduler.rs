//! Frame scheduling and lifecycle around a host canvas.
//!
//! The host owns the drawable surface and the display-refresh signal. It hands
//! the simulator a [`Canvas`]; the simulator asks it for one refresh callback
//! at a time and the host calls [`FluidBackground::animation_frame`] when that
//! callback fires. `stop()` cancels the outstanding request, so the loop is a
//! single cancellable task rather than a self-perpetuating callback chain.

use crate::FluidError;
use crate::config::SimulationConfig;
use crate::device::RenderDevice;
use crate::simulation::Simulation;
use glam::Vec2;
use std::time::Instant;

/// Largest timestep a single frame may take, so long pauses never produce one huge step.
pub const MAX_FRAME_DT: f32 = 0.016666;

/// Handle for a pending display-refresh callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

/// What the simulator needs from its host surface.
pub trait Canvas {
    type Device: RenderDevice;

    /// Acquires a rendering context for this canvas.
    fn create_device(&mut self) -> Result<Self::Device, FluidError>;

    /// Layout size in logical pixels.
    fn client_size(&self) -> (f32, f32);

    fn pixel_ratio(&self) -> f32;

    /// Size of the backing drawable in device pixels.
    fn backing_size(&self) -> (u32, u32);

    fn set_backing_size(&mut self, width: u32, height: u32);

    fn set_visible(&mut self, visible: bool);

    fn request_frame(&mut self) -> FrameRequest;

    fn cancel_frame(&mut self, request: FrameRequest);
}

pub fn scale_by_pixel_ratio(input: f32, pixel_ratio: f32) -> u32 {
    (input * pixel_ratio).floor().max(0.0) as u32
}

/// Wall-clock delta between frames, capped at [`MAX_FRAME_DT`].
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    pub fn new(now: Instant) -> Self {
        Self { last: now }
    }

    pub fn delta(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        dt.min(MAX_FRAME_DT)
    }
}

/// Owns one simulation bound to one canvas and drives it frame by frame.
pub struct FluidBackground<C: Canvas> {
    canvas: C,
    config: SimulationConfig,
    simulation: Option<Simulation<C::Device>>,
    running: bool,
    pending_frame: Option<FrameRequest>,
    clock: FrameClock,
    initializations: u32,
}

impl<C: Canvas> FluidBackground<C> {
    /// Binds the simulator to `canvas`. Nothing touches the device until `start`.
    pub fn new(canvas: Option<C>, config: SimulationConfig) -> Result<Self, FluidError> {
        let Some(canvas) = canvas else {
            log::error!("Fluid background: no canvas to draw into");
            return Err(FluidError::CanvasMissing);
        };
        config.validate()?;

        Ok(Self {
            canvas,
            config,
            simulation: None,
            running: false,
            pending_frame: None,
            clock: FrameClock::new(Instant::now()),
            initializations: 0,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }

    pub fn simulation(&self) -> Option<&Simulation<C::Device>> {
        self.simulation.as_ref()
    }

    pub fn simulation_mut(&mut self) -> Option<&mut Simulation<C::Device>> {
        self.simulation.as_mut()
    }

    pub fn pending_frame(&self) -> Option<FrameRequest> {
        self.pending_frame
    }

    /// How many times the device and buffers have been built.
    pub fn initializations(&self) -> u32 {
        self.initializations
    }

    /// Shows the canvas and starts the frame loop. GPU setup happens on the first start only.
    pub fn start(&mut self, now: Instant) -> Result<(), FluidError> {
        if self.running {
            return Ok(());
        }
        self.running = true;
        self.canvas.set_visible(true);

        if self.simulation.is_none() {
            if let Err(err) = self.initialize() {
                self.running = false;
                self.canvas.set_visible(false);
                return Err(err);
            }
        }

        log::info!("Fluid background started");
        self.animation_frame(now)
    }

    /// Cancels the frame loop and hides the canvas. Device resources stay alive for a cheap restart.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(request) = self.pending_frame.take() {
            self.canvas.cancel_frame(request);
        }
        self.canvas.set_visible(false);
        log::info!("Fluid background stopped");
    }

    fn initialize(&mut self) -> Result<(), FluidError> {
        let device = self.canvas.create_device()?;
        self.resize_canvas();
        let (width, height) = self.canvas.backing_size();
        self.simulation = Some(Simulation::new(device, self.config.clone(), width, height)?);
        self.initializations += 1;
        Ok(())
    }

    /// Matches the backing drawable to the client size.
    fn resize_canvas(&mut self) {
        let (client_width, client_height) = self.canvas.client_size();
        let ratio = self.canvas.pixel_ratio();
        let width = scale_by_pixel_ratio(client_width, ratio).max(1);
        let height = scale_by_pixel_ratio(client_height, ratio).max(1);
        if self.canvas.backing_size() != (width, height) {
            self.canvas.set_backing_size(width, height);
        }
    }

    /// Host resize notification; reallocates immediately when the drawable changed size.
    pub fn on_resize(&mut self) -> Result<(), FluidError> {
        if self.simulation.is_none() {
            return Ok(());
        }
        self.resize_canvas();
        let result = self.match_canvas_size();
        self.stop_on_error(result)
    }

    /// One display refresh: resize if needed, apply input, step, render, schedule the next.
    ///
    /// A failed frame stops the background, so a later `start` brings the loop back.
    pub fn animation_frame(&mut self, now: Instant) -> Result<(), FluidError> {
        self.pending_frame = None;
        if !self.running {
            return Ok(());
        }

        let result = self.advance(now);
        self.stop_on_error(result)?;
        self.pending_frame = Some(self.canvas.request_frame());
        Ok(())
    }

    fn advance(&mut self, now: Instant) -> Result<(), FluidError> {
        let dt = self.clock.delta(now);
        self.resize_canvas();
        self.match_canvas_size()?;
        let paused = self.config.paused;

        if let Some(simulation) = self.simulation.as_mut() {
            simulation.apply_inputs()?;
            if !paused {
                simulation.step(dt)?;
            }
            simulation.render()?;
        }
        Ok(())
    }

    /// Reallocates the simulation when its buffers were sized for another drawable.
    fn match_canvas_size(&mut self) -> Result<(), FluidError> {
        let backing = self.canvas.backing_size();
        match self.simulation.as_mut() {
            Some(simulation) if simulation.canvas_size() != backing => {
                simulation.resize(backing.0, backing.1)
            }
            _ => Ok(()),
        }
    }

    fn stop_on_error(&mut self, result: Result<(), FluidError>) -> Result<(), FluidError> {
        if let Err(err) = &result {
            log::error!("Fluid frame failed: {err}");
            self.stop();
        }
        result
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.config.paused = paused;
    }

    fn device_position(&self, client_x: f32, client_y: f32) -> Vec2 {
        let ratio = self.canvas.pixel_ratio();
        Vec2::new(
            scale_by_pixel_ratio(client_x, ratio) as f32,
            scale_by_pixel_ratio(client_y, ratio) as f32,
        )
    }

    /// Press or touch start at client coordinates (top-left origin).
    pub fn pointer_down(&mut self, id: i64, client_x: f32, client_y: f32) -> Result<(), FluidError> {
        let pos = self.device_position(client_x, client_y);
        match self.simulation.as_mut() {
            Some(simulation) => simulation.pointer_down(id, pos),
            None => Ok(()),
        }
    }

    pub fn pointer_move(&mut self, client_x: f32, client_y: f32) {
        let pos = self.device_position(client_x, client_y);
        if let Some(simulation) = self.simulation.as_mut() {
            simulation.pointer_move(pos);
        }
    }

    pub fn pointer_up(&mut self) {
        if let Some(simulation) = self.simulation.as_mut() {
            simulation.pointer_up();
        }
    }
}
