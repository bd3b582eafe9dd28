use crate::FluidError;
use crate::device::RenderDevice;
use crate::simulation::{FieldSnapshot, Simulation};
use image::{ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

/// Turns device readbacks into images. Snapshots store the bottom row first, images the top.
pub struct ImageExporter {
    width: u32,
    height: u32,
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl ImageExporter {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Nearest snapshot texel for an image pixel, flipping rows.
    fn source_texel(&self, snapshot: &FieldSnapshot, x: u32, y: u32) -> Option<(u32, u32)> {
        let sim_x = (x as f32 / self.width as f32 * snapshot.width as f32) as u32;
        let sim_y = (y as f32 / self.height as f32 * snapshot.height as f32) as u32;
        if sim_x < snapshot.width && sim_y < snapshot.height {
            Some((sim_x, snapshot.height - 1 - sim_y))
        } else {
            None
        }
    }

    /// A composited display frame as straight-alpha RGBA.
    pub fn render_display(&self, snapshot: &FieldSnapshot) -> RgbaImage {
        let mut img = ImageBuffer::new(self.width, self.height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = match self.source_texel(snapshot, x, y) {
                Some((sx, sy)) => {
                    let texel = snapshot.at(sx, sy);
                    let alpha = texel.w.clamp(0.0, 1.0);
                    let rgb = if alpha > 0.0 {
                        texel.truncate() / alpha
                    } else {
                        texel.truncate()
                    };
                    Rgba([to_byte(rgb.x), to_byte(rgb.y), to_byte(rgb.z), to_byte(alpha)])
                }
                None => Rgba([0, 0, 0, 0]),
            };
        }
        img
    }

    /// Velocity as colour: |u| in red, |v| in green, scaled so `full_scale` saturates.
    pub fn render_velocity(&self, snapshot: &FieldSnapshot, full_scale: f32) -> RgbImage {
        let mut img = ImageBuffer::new(self.width, self.height);
        let scale = 1.0 / full_scale.max(f32::EPSILON);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = match self.source_texel(snapshot, x, y) {
                Some((sx, sy)) => {
                    let texel = snapshot.at(sx, sy);
                    Rgb([to_byte(texel.x.abs() * scale), to_byte(texel.y.abs() * scale), 128])
                }
                None => Rgb([0, 0, 0]),
            };
        }
        img
    }

    pub fn export_capture_png<D: RenderDevice>(
        &self,
        simulation: &mut Simulation<D>,
        path: &Path,
    ) -> Result<(), FluidError> {
        let snapshot = simulation.capture()?;
        self.render_display(&snapshot).save(path)?;
        log::debug!("Exported capture to {}", path.display());
        Ok(())
    }

    pub fn export_velocity_png<D: RenderDevice>(
        &self,
        simulation: &mut Simulation<D>,
        path: &Path,
    ) -> Result<(), FluidError> {
        let snapshot = simulation.read_velocity()?;
        let full_scale = snapshot.max_abs(2).max(1.0);
        self.render_velocity(&snapshot, full_scale).save(path)?;
        Ok(())
    }

    /// Steps `steps` times at `dt`, saving a capture after each step.
    pub fn export_frame_sequence<D: RenderDevice>(
        &self,
        simulation: &mut Simulation<D>,
        steps: usize,
        dt: f32,
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, FluidError> {
        std::fs::create_dir_all(output_dir)?;
        let mut written = Vec::with_capacity(steps);
        for i in 0..steps {
            simulation.step(dt)?;
            let path = output_dir.join(format!("{prefix}_frame_{i:04}.png"));
            self.export_capture_png(simulation, &path)?;
            written.push(path);
        }
        Ok(written)
    }
}
