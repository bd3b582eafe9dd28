//! Simulation tunables.
//!
//! Field names serialize in the same SCREAMING_SNAKE_CASE the tunables have
//! always been written in, so a JSON file like `{"CURL": 45, "SPLAT_FORCE": 8000}`
//! overrides just those two values.

use crate::FluidError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dye resolution used when the device cannot filter float textures linearly.
pub const REDUCED_DYE_RESOLUTION: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackColor {
    pub fn to_linear(self) -> [f32; 3] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimulationConfig {
    /// Short-axis texel count of the velocity/pressure grids.
    pub sim_resolution: u32,
    /// Short-axis texel count of the visible dye grid.
    pub dye_resolution: u32,
    pub capture_resolution: u32,
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    /// Fraction of last frame's pressure kept as the Jacobi warm start.
    pub pressure: f32,
    pub pressure_iterations: u32,
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub shading: bool,
    pub paused: bool,
    pub back_color: BackColor,
    pub transparent: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            capture_resolution: 512,
            density_dissipation: 1.0,
            velocity_dissipation: 0.2,
            pressure: 0.8,
            pressure_iterations: 20,
            curl: 30.0,
            splat_radius: 0.25,
            splat_force: 6000.0,
            shading: true,
            paused: false,
            back_color: BackColor { r: 0, g: 0, b: 0 },
            transparent: true,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, FluidError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, FluidError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded simulation config from {}", path.display());
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, FluidError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), FluidError> {
        if self.sim_resolution == 0 || self.dye_resolution == 0 || self.capture_resolution == 0 {
            return Err(FluidError::InvalidConfig(
                "resolutions must be positive".to_string(),
            ));
        }
        if self.pressure_iterations == 0 {
            return Err(FluidError::InvalidConfig(
                "at least one pressure iteration is required".to_string(),
            ));
        }
        let tunables = [
            ("DENSITY_DISSIPATION", self.density_dissipation),
            ("VELOCITY_DISSIPATION", self.velocity_dissipation),
            ("PRESSURE", self.pressure),
            ("CURL", self.curl),
            ("SPLAT_RADIUS", self.splat_radius),
            ("SPLAT_FORCE", self.splat_force),
        ];
        if let Some((name, value)) = tunables.iter().find(|(_, value)| !value.is_finite()) {
            return Err(FluidError::InvalidConfig(format!("{name} must be finite, got {value}")));
        }
        if self.density_dissipation < 0.0 || self.velocity_dissipation < 0.0 {
            return Err(FluidError::InvalidConfig(
                "dissipation rates cannot be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pressure) {
            return Err(FluidError::InvalidConfig(format!(
                "pressure retention {} outside [0, 1]",
                self.pressure
            )));
        }
        if self.splat_radius <= 0.0 {
            return Err(FluidError::InvalidConfig(
                "splat radius must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
