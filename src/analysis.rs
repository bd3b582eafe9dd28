use crate::FluidError;
use crate::device::RenderDevice;
use crate::simulation::{FieldSnapshot, Simulation};
use std::collections::HashMap;

/// Dye concentration below which a texel counts as clear water.
pub const INK_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct FluidMetrics {
    pub total_dye: f32,
    pub max_concentration: f32,
    /// Fraction of dye texels holding visible ink.
    pub ink_coverage: f32,
    pub kinetic_energy: f32,
    pub max_speed: f32,
    pub avg_speed: f32,
    pub dye_entropy: f32,
    /// Mean |∇·u| over interior cells, in texel units.
    pub mean_divergence: f32,
    pub vorticity: f32,
    pub frame: usize,
}

impl FluidMetrics {
    pub fn analyze(velocity: &FieldSnapshot, dye: &FieldSnapshot, frame: usize) -> Self {
        let mut total_dye = 0.0f32;
        let mut max_concentration = 0.0f32;
        let mut inked = 0usize;
        let mut histogram = HashMap::new();

        for texel in &dye.texels {
            let concentration = texel.x.max(texel.y).max(texel.z);
            total_dye += texel.x + texel.y + texel.z;
            max_concentration = max_concentration.max(concentration);
            if concentration > INK_THRESHOLD {
                inked += 1;
            }
            let bucket = (concentration.clamp(0.0, 1.0) * 10.0).floor() as usize;
            *histogram.entry(bucket).or_insert(0usize) += 1;
        }

        let dye_cells = dye.texels.len().max(1) as f32;
        let mut entropy = 0.0;
        for &count in histogram.values() {
            let probability = count as f32 / dye_cells;
            if probability > 0.0 {
                entropy -= probability * probability.log2();
            }
        }

        let mut kinetic_energy = 0.0f32;
        let mut max_speed = 0.0f32;
        let mut speed_sum = 0.0f32;
        for texel in &velocity.texels {
            let speed = texel.truncate().truncate().length();
            kinetic_energy += 0.5 * speed * speed;
            max_speed = max_speed.max(speed);
            speed_sum += speed;
        }

        let (mean_divergence, vorticity) = interior_derivatives(velocity);

        Self {
            total_dye,
            max_concentration,
            ink_coverage: inked as f32 / dye_cells,
            kinetic_energy,
            max_speed,
            avg_speed: speed_sum / velocity.texels.len().max(1) as f32,
            dye_entropy: entropy,
            mean_divergence,
            vorticity,
            frame,
        }
    }

    pub fn log_summary(&self) {
        log::info!(
            "Frame {}: dye {:.4} (max {:.4}, coverage {:.1}%), kinetic energy {:.4}, max speed {:.4}, avg speed {:.4}, entropy {:.4}, |div| {:.6}, vorticity {:.4}",
            self.frame,
            self.total_dye,
            self.max_concentration,
            self.ink_coverage * 100.0,
            self.kinetic_energy,
            self.max_speed,
            self.avg_speed,
            self.dye_entropy,
            self.mean_divergence,
            self.vorticity
        );
    }
}

/// Mean absolute divergence and curl of a velocity field by central differences.
fn interior_derivatives(velocity: &FieldSnapshot) -> (f32, f32) {
    let (width, height) = (velocity.width, velocity.height);
    if width < 3 || height < 3 {
        return (0.0, 0.0);
    }

    let mut divergence = 0.0f32;
    let mut vorticity = 0.0f32;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let left = velocity.at(x - 1, y);
            let right = velocity.at(x + 1, y);
            let bottom = velocity.at(x, y - 1);
            let top = velocity.at(x, y + 1);
            divergence += (0.5 * (right.x - left.x + top.y - bottom.y)).abs();
            vorticity += (0.5 * (right.y - left.y - top.x + bottom.x)).abs();
        }
    }

    let interior = ((width - 2) * (height - 2)) as f32;
    (divergence / interior, vorticity / interior)
}

/// Relative change between the first and last recorded frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    pub dye_change_percent: f32,
    pub energy_change_percent: f32,
    pub entropy_change_percent: f32,
}

#[derive(Debug, Default)]
pub struct AnalysisRecorder {
    pub metrics_history: Vec<FluidMetrics>,
}

impl AnalysisRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame<D: RenderDevice>(
        &mut self,
        simulation: &mut Simulation<D>,
        frame: usize,
    ) -> Result<&FluidMetrics, FluidError> {
        let velocity = simulation.read_velocity()?;
        let dye = simulation.read_dye()?;
        self.metrics_history
            .push(FluidMetrics::analyze(&velocity, &dye, frame));
        Ok(&self.metrics_history[self.metrics_history.len() - 1])
    }

    pub fn trend(&self) -> Option<Trend> {
        if self.metrics_history.len() < 2 {
            return None;
        }
        let first = &self.metrics_history[0];
        let last = &self.metrics_history[self.metrics_history.len() - 1];
        let percent = |from: f32, to: f32| (to - from) / from.max(0.001) * 100.0;

        Some(Trend {
            dye_change_percent: percent(first.total_dye, last.total_dye),
            energy_change_percent: percent(first.kinetic_energy, last.kinetic_energy),
            entropy_change_percent: percent(first.dye_entropy, last.dye_entropy),
        })
    }

    pub fn log_trends(&self) {
        if let Some(trend) = self.trend() {
            log::info!(
                "Trend over {} frames: dye {:+.3}%, kinetic energy {:+.3}%, entropy {:+.3}%",
                self.metrics_history.len(),
                trend.dye_change_percent,
                trend.energy_change_percent,
                trend.entropy_change_percent
            );
        }
    }
}
