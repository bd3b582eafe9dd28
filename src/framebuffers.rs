use crate::FluidError;
use crate::capabilities::DeviceCapabilities;
use crate::config::SimulationConfig;
use crate::device::{FilterMode, RenderDevice, TextureFormat};
use crate::resource::{DoubleBuffer, Resource, ResourceLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

/// Grid dimensions for `resolution` texels along the canvas's short axis,
/// with the long axis stretched to keep the canvas aspect ratio.
pub fn grid_resolution(resolution: u32, canvas_width: u32, canvas_height: u32) -> GridSize {
    let canvas_width = canvas_width.max(1);
    let canvas_height = canvas_height.max(1);

    let mut aspect_ratio = canvas_width as f32 / canvas_height as f32;
    if aspect_ratio < 1.0 {
        aspect_ratio = 1.0 / aspect_ratio;
    }

    let min = resolution;
    let max = (resolution as f32 * aspect_ratio).round() as u32;
    if canvas_width > canvas_height {
        GridSize {
            width: max,
            height: min,
        }
    } else {
        GridSize {
            width: min,
            height: max,
        }
    }
}

impl GridSize {
    fn clamped(self, limit: u32) -> GridSize {
        if self.width <= limit && self.height <= limit {
            return self;
        }
        log::warn!(
            "Grid {}x{} exceeds device limit {limit}, clamping",
            self.width,
            self.height
        );
        GridSize {
            width: self.width.min(limit),
            height: self.height.min(limit),
        }
    }
}

/// Every off-screen buffer the simulation owns. Rebuilt wholesale on resize.
#[derive(Debug)]
pub struct FramebufferSet {
    pub dye: DoubleBuffer,
    pub velocity: DoubleBuffer,
    pub divergence: Resource,
    pub curl: Resource,
    pub pressure: DoubleBuffer,
}

impl FramebufferSet {
    pub fn allocate<D: RenderDevice + ?Sized>(
        device: &mut D,
        capabilities: &DeviceCapabilities,
        config: &SimulationConfig,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<Self, FluidError> {
        let limit = capabilities.max_texture_dimension;
        let sim = grid_resolution(config.sim_resolution, canvas_width, canvas_height).clamped(limit);
        let dye = grid_resolution(config.dye_resolution, canvas_width, canvas_height).clamped(limit);
        let filter = capabilities.field_filter();

        let layout = |label: &'static str, size: GridSize, format: TextureFormat, filter: FilterMode| {
            ResourceLayout {
                label,
                width: size.width,
                height: size.height,
                format,
                filter,
            }
        };
        let dye_layout = layout("dye", dye, capabilities.rgba, filter);
        let velocity_layout = layout("velocity", sim, capabilities.rg, filter);
        let divergence_layout = layout("divergence", sim, capabilities.r, FilterMode::Nearest);
        let curl_layout = layout("curl", sim, capabilities.r, FilterMode::Nearest);
        let pressure_layout = layout("pressure", sim, capabilities.r, FilterMode::Nearest);

        let [
            dye_read,
            dye_write,
            velocity_read,
            velocity_write,
            divergence,
            curl,
            pressure_read,
            pressure_write,
        ] = Resource::create_all(
            device,
            [
                dye_layout,
                dye_layout,
                velocity_layout,
                velocity_layout,
                divergence_layout,
                curl_layout,
                pressure_layout,
                pressure_layout,
            ],
        )?;
        let set = Self {
            dye: DoubleBuffer::from_pair(dye_read, dye_write),
            velocity: DoubleBuffer::from_pair(velocity_read, velocity_write),
            divergence,
            curl,
            pressure: DoubleBuffer::from_pair(pressure_read, pressure_write),
        };

        log::debug!(
            "Allocated framebuffers: sim {}x{}, dye {}x{} for canvas {canvas_width}x{canvas_height}",
            sim.width,
            sim.height,
            dye.width,
            dye.height
        );
        Ok(set)
    }

    pub fn sim_size(&self) -> GridSize {
        GridSize {
            width: self.velocity.width(),
            height: self.velocity.height(),
        }
    }

    pub fn dye_size(&self) -> GridSize {
        GridSize {
            width: self.dye.width(),
            height: self.dye.height(),
        }
    }

    pub fn release<D: RenderDevice + ?Sized>(self, device: &mut D) {
        self.dye.release(device);
        self.velocity.release(device);
        self.divergence.release(device);
        self.curl.release(device);
        self.pressure.release(device);
    }
}
