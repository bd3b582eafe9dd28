//! Startup negotiation of what the device can render into.

use crate::FluidError;
use crate::config::{REDUCED_DYE_RESOLUTION, SimulationConfig};
use crate::device::{FilterMode, RenderDevice, TextureFormat};

/// Formats and filtering resolved once at startup and used by every allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Storage for dye (four channels).
    pub rgba: TextureFormat,
    /// Storage for velocity (two channels).
    pub rg: TextureFormat,
    /// Storage for pressure, divergence and curl (one channel).
    pub r: TextureFormat,
    pub half_float: bool,
    pub linear_filtering: bool,
    pub max_texture_dimension: u32,
}

impl DeviceCapabilities {
    /// Probes the device and degrades `config` where the hardware falls short.
    pub fn negotiate<D: RenderDevice + ?Sized>(
        device: &mut D,
        config: &mut SimulationConfig,
    ) -> Result<Self, FluidError> {
        let half_float = device.supports_half_float();
        let rgba = resolve_format(device, TextureFormat::Rgba16Float, half_float, "dye")?;
        let rg = resolve_format(device, TextureFormat::Rg16Float, half_float, "velocity")?;
        let r = resolve_format(device, TextureFormat::R16Float, half_float, "pressure")?;

        let linear_filtering = half_float && rgba.is_float() && device.supports_linear_filtering();
        if !linear_filtering {
            log::warn!(
                "{}: no linear filtering of float targets, dye resolution {} -> {} and shading off",
                device.label(),
                config.dye_resolution,
                config.dye_resolution.min(REDUCED_DYE_RESOLUTION)
            );
            config.dye_resolution = config.dye_resolution.min(REDUCED_DYE_RESOLUTION);
            config.shading = false;
        }

        let capabilities = Self {
            rgba,
            rg,
            r,
            half_float,
            linear_filtering,
            max_texture_dimension: device.max_texture_dimension(),
        };
        log::info!("{}: negotiated {:?}", device.label(), capabilities);
        Ok(capabilities)
    }

    /// Filtering for the dye and velocity fields, which are sampled between texels.
    pub fn field_filter(&self) -> FilterMode {
        if self.linear_filtering {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }
}

/// Narrow formats that fail the probe are promoted to the next wider one.
fn supported_format<D: RenderDevice + ?Sized>(
    device: &mut D,
    requested: TextureFormat,
) -> Option<TextureFormat> {
    if device.probe_render_target(requested) {
        return Some(requested);
    }
    match requested {
        TextureFormat::R16Float => supported_format(device, TextureFormat::Rg16Float),
        TextureFormat::Rg16Float => supported_format(device, TextureFormat::Rgba16Float),
        _ => None,
    }
}

fn resolve_format<D: RenderDevice + ?Sized>(
    device: &mut D,
    requested: TextureFormat,
    half_float: bool,
    role: &'static str,
) -> Result<TextureFormat, FluidError> {
    if half_float {
        if let Some(format) = supported_format(device, requested) {
            if format != requested {
                log::warn!("{role} fields: {requested:?} unsupported, using {format:?}");
            }
            return Ok(format);
        }
    }

    if device.probe_render_target(TextureFormat::Rgba8Unorm) {
        log::warn!("{role} fields: no float render target, falling back to Rgba8Unorm");
        Ok(TextureFormat::Rgba8Unorm)
    } else {
        Err(FluidError::NoRenderTargetFormat { role })
    }
}
