use crate::programs::ProgramKind;
use thiserror::Error;

/// Everything that can go wrong while setting up or driving the ink simulation.
#[derive(Error, Debug)]
pub enum FluidError {
    #[error("no drawable canvas was provided to the simulator")]
    CanvasMissing,
    #[error("device supports no render target format for {role} fields")]
    NoRenderTargetFormat { role: &'static str },
    #[error("failed to build {program:?} program: {log}")]
    ProgramLink { program: ProgramKind, log: String },
    #[error("pass samples texture {texture} while rendering into it")]
    FeedbackLoop { texture: u32 },
    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),
    #[error("unknown program handle {0}")]
    UnknownProgram(u32),
    #[error("invalid texture dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("gpu error: {0}")]
    Gpu(String),
}
