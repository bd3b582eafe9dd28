use crate::FluidError;
use crate::config::SimulationConfig;
use crate::export::ImageExporter;
use crate::pointer::MOUSE_POINTER_ID;
use crate::scheduler::{Canvas, FluidBackground, FrameRequest};
use crate::software::SoftwareDevice;
use eframe::egui;
use rand::Rng;
use std::path::Path;
use std::time::Instant;

const PAPER: egui::Color32 = egui::Color32::from_rgb(244, 239, 228);

/// The egui panel the ink draws into. Frame requests become repaint requests.
pub struct DesktopCanvas {
    client_size: egui::Vec2,
    pixel_ratio: f32,
    backing: (u32, u32),
    visible: bool,
    next_request: u64,
    pending: Option<FrameRequest>,
}

impl DesktopCanvas {
    pub fn new() -> Self {
        Self {
            client_size: egui::Vec2::new(800.0, 600.0),
            pixel_ratio: 1.0,
            backing: (0, 0),
            visible: false,
            next_request: 1,
            pending: None,
        }
    }

    fn set_layout(&mut self, client_size: egui::Vec2, pixel_ratio: f32) {
        self.client_size = client_size;
        self.pixel_ratio = pixel_ratio;
    }

    fn take_pending(&mut self) -> Option<FrameRequest> {
        self.pending.take()
    }
}

impl Default for DesktopCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas for DesktopCanvas {
    type Device = SoftwareDevice;

    fn create_device(&mut self) -> Result<SoftwareDevice, FluidError> {
        Ok(SoftwareDevice::new())
    }

    fn client_size(&self) -> (f32, f32) {
        (self.client_size.x, self.client_size.y)
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn backing_size(&self) -> (u32, u32) {
        self.backing
    }

    fn set_backing_size(&mut self, width: u32, height: u32) {
        self.backing = (width, height);
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn request_frame(&mut self) -> FrameRequest {
        let request = FrameRequest(self.next_request);
        self.next_request += 1;
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }
}

pub struct InkApp {
    background: FluidBackground<DesktopCanvas>,
    ink_theme: bool,
    paused: bool,
    texture: Option<egui::TextureHandle>,
    status: Option<String>,
}

impl InkApp {
    pub fn new(config: SimulationConfig) -> Result<Self, FluidError> {
        let paused = config.paused;
        Ok(Self {
            background: FluidBackground::new(Some(DesktopCanvas::new()), config)?,
            ink_theme: true,
            paused,
            texture: None,
            status: None,
        })
    }

    fn report(&mut self, result: Result<(), FluidError>) {
        if let Err(err) = result {
            log::error!("Ink background: {err}");
            self.status = Some(err.to_string());
        }
    }

    fn apply_theme(&mut self) {
        if self.ink_theme {
            let result = self.background.start(Instant::now());
            if result.is_err() {
                self.ink_theme = false;
            }
            self.report(result);
        } else {
            self.background.stop();
        }
    }

    fn route_input(&mut self, ctx: &egui::Context, rect: egui::Rect) {
        let events = ctx.input(|i| i.events.clone());
        for event in events {
            match event {
                egui::Event::PointerButton {
                    pos,
                    button: egui::PointerButton::Primary,
                    pressed,
                    ..
                } => {
                    if pressed && rect.contains(pos) {
                        let local = pos - rect.min;
                        let result = self.background.pointer_down(MOUSE_POINTER_ID, local.x, local.y);
                        self.report(result);
                    } else if !pressed {
                        self.background.pointer_up();
                    }
                }
                egui::Event::PointerMoved(pos) => {
                    let local = pos - rect.min;
                    self.background.pointer_move(local.x, local.y);
                }
                egui::Event::Touch { id, phase, pos, .. } => {
                    let local = pos - rect.min;
                    match phase {
                        egui::TouchPhase::Start => {
                            let result =
                                self.background.pointer_down(id.0 as i64, local.x, local.y);
                            self.report(result);
                        }
                        egui::TouchPhase::Move => self.background.pointer_move(local.x, local.y),
                        egui::TouchPhase::End | egui::TouchPhase::Cancel => {
                            self.background.pointer_up()
                        }
                    }
                }
                _ => {}
            }
        }

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            let amount = rand::thread_rng().gen_range(5..25);
            if let Some(simulation) = self.background.simulation_mut() {
                simulation.queue_random_splats(amount);
            }
        }
    }

    fn upload_surface(&mut self, ctx: &egui::Context) -> Result<(), FluidError> {
        let Some(simulation) = self.background.simulation_mut() else {
            return Ok(());
        };
        let surface = simulation.read_surface()?;
        let (width, height) = (surface.width as usize, surface.height as usize);

        // Surface rows run bottom-up.
        let mut pixels = Vec::with_capacity(width * height);
        for y in (0..surface.height).rev() {
            for x in 0..surface.width {
                let texel = surface.at(x, y) * 255.0;
                pixels.push(egui::Color32::from_rgba_premultiplied(
                    texel.x.round() as u8,
                    texel.y.round() as u8,
                    texel.z.round() as u8,
                    texel.w.round() as u8,
                ));
            }
        }
        let image = egui::ColorImage {
            size: [width, height],
            pixels,
        };

        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.texture =
                    Some(ctx.load_texture("ink-surface", image, egui::TextureOptions::LINEAR))
            }
        }
        Ok(())
    }

    fn capture_png(&mut self) -> Result<(), FluidError> {
        let Some(simulation) = self.background.simulation_mut() else {
            return Ok(());
        };
        let resolution = simulation.config().capture_resolution;
        let (width, height) = simulation.canvas_size();
        let scale = resolution as f32 / width.min(height).max(1) as f32;
        let exporter = ImageExporter::new(
            (width as f32 * scale).round().max(1.0) as u32,
            (height as f32 * scale).round().max(1.0) as u32,
        );
        exporter.export_capture_png(simulation, Path::new("ink_capture.png"))?;
        self.status = Some("Saved ink_capture.png".to_string());
        Ok(())
    }
}

impl eframe::App for InkApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("inkfluid");
                ui.checkbox(&mut self.ink_theme, "Ink theme");
                if ui.checkbox(&mut self.paused, "Paused").changed() {
                    self.background.set_paused(self.paused);
                }
                if ui.button("Random splats").clicked() {
                    let amount = rand::thread_rng().gen_range(5..25);
                    if let Some(simulation) = self.background.simulation_mut() {
                        simulation.queue_random_splats(amount);
                    }
                }
                if ui.button("Capture PNG").clicked() {
                    let result = self.capture_png();
                    self.report(result);
                }
                if let Some(status) = &self.status {
                    ui.label(status);
                }
            });
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(PAPER))
            .show(ctx, |ui| {
                let (rect, _response) =
                    ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
                self.background
                    .canvas_mut()
                    .set_layout(rect.size(), ctx.pixels_per_point());

                if self.ink_theme != self.background.is_running() {
                    self.apply_theme();
                }
                self.route_input(ctx, rect);

                if self.background.canvas_mut().take_pending().is_some() {
                    let result = self
                        .background
                        .animation_frame(Instant::now())
                        .and_then(|_| self.upload_surface(ctx));
                    self.report(result);
                }

                if self.background.canvas().visible {
                    if let Some(texture) = &self.texture {
                        ui.painter().image(
                            texture.id(),
                            rect,
                            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                            egui::Color32::WHITE,
                        );
                    }
                }
            });

        if self.background.canvas().pending.is_some() {
            ctx.request_repaint();
        }
    }
}
