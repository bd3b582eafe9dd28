//! Ink-in-water background for inkfluid: a stable-fluids solver run as a
//! chain of full-grid render passes over a pluggable render device.

pub mod analysis;
pub mod capabilities;
pub mod config;
pub mod desktop;
pub mod device;
pub mod error;
pub mod export;
pub mod framebuffers;
pub mod headless;
pub mod kernels;
pub mod pointer;
pub mod programs;
pub mod resource;
pub mod scheduler;
pub mod simulation;
pub mod software;

#[cfg(feature = "gpu")]
pub mod gpu;

#[cfg(feature = "gpu")]
pub mod wgsl;

pub use analysis::{AnalysisRecorder, FluidMetrics};
pub use capabilities::DeviceCapabilities;
pub use config::{BackColor, SimulationConfig};
pub use desktop::InkApp;
pub use device::{RenderDevice, TextureFormat};
pub use error::FluidError;
pub use export::ImageExporter;
pub use headless::HeadlessCanvas;
pub use resource::{DoubleBuffer, Resource, ResourceLayout};
pub use scheduler::{Canvas, FluidBackground};
pub use simulation::{FieldSnapshot, Simulation};
pub use software::{SoftwareDevice, SoftwareLimits};

#[cfg(feature = "gpu")]
pub use gpu::WgpuDevice;

