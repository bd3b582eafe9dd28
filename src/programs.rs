//! Program identities and keyword-specialised variants.

use crate::FluidError;
use crate::device::{ProgramId, RenderDevice};
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Clear,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
    Display,
}

impl ProgramKind {
    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Clear => "clear",
            ProgramKind::Splat => "splat",
            ProgramKind::Advection => "advection",
            ProgramKind::Divergence => "divergence",
            ProgramKind::Curl => "curl",
            ProgramKind::Vorticity => "vorticity",
            ProgramKind::Pressure => "pressure",
            ProgramKind::GradientSubtract => "gradient_subtract",
            ProgramKind::Display => "display",
        }
    }
}

/// Feature flags a program variant is specialised on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Keywords(u8);

impl Keywords {
    pub const NONE: Keywords = Keywords(0);
    /// Reconstruct bilinear samples from four nearest taps.
    pub const MANUAL_FILTERING: Keywords = Keywords(1 << 0);
    /// Light the dye surface from its gradient.
    pub const SHADING: Keywords = Keywords(1 << 1);

    const VARIANTS: usize = 4;

    pub fn contains(self, other: Keywords) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(self, flag: Keywords, enabled: bool) -> Keywords {
        if enabled {
            Keywords(self.0 | flag.0)
        } else {
            Keywords(self.0 & !flag.0)
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize % Self::VARIANTS
    }
}

impl BitOr for Keywords {
    type Output = Keywords;

    fn bitor(self, rhs: Keywords) -> Keywords {
        Keywords(self.0 | rhs.0)
    }
}

/// A program whose variants are compiled on first use and then reused.
#[derive(Debug)]
pub struct Material {
    kind: ProgramKind,
    variants: [Option<ProgramId>; Keywords::VARIANTS],
}

impl Material {
    pub fn new(kind: ProgramKind) -> Self {
        Self {
            kind,
            variants: [None; Keywords::VARIANTS],
        }
    }

    pub fn variant<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        keywords: Keywords,
    ) -> Result<ProgramId, FluidError> {
        let slot = &mut self.variants[keywords.index()];
        if let Some(program) = *slot {
            return Ok(program);
        }
        let program = device.compile_program(self.kind, keywords)?;
        log::debug!(
            "Compiled {} variant with keywords {:#04b}",
            self.kind.name(),
            keywords.bits()
        );
        *slot = Some(program);
        Ok(program)
    }

    pub fn compiled_variants(&self) -> usize {
        self.variants.iter().filter(|v| v.is_some()).count()
    }
}

/// Every program the pipeline uses, compiled once per device.
#[derive(Debug)]
pub struct Programs {
    pub clear: ProgramId,
    pub splat: ProgramId,
    pub divergence: ProgramId,
    pub curl: ProgramId,
    pub vorticity: ProgramId,
    pub pressure: ProgramId,
    pub gradient_subtract: ProgramId,
    pub advection: Material,
    pub display: Material,
}

impl Programs {
    /// Compiles every program and every variant a step or render can ask for, so link
    /// failures surface here rather than in the first frame.
    pub fn compile<D: RenderDevice + ?Sized>(
        device: &mut D,
        linear_filtering: bool,
    ) -> Result<Self, FluidError> {
        let report = |err: &FluidError| log::error!("Program setup failed: {err}");
        let mut build = |kind: ProgramKind| {
            device.compile_program(kind, Keywords::NONE).inspect_err(report)
        };

        let clear = build(ProgramKind::Clear)?;
        let splat = build(ProgramKind::Splat)?;
        let divergence = build(ProgramKind::Divergence)?;
        let curl = build(ProgramKind::Curl)?;
        let vorticity = build(ProgramKind::Vorticity)?;
        let pressure = build(ProgramKind::Pressure)?;
        let gradient_subtract = build(ProgramKind::GradientSubtract)?;

        let mut advection = Material::new(ProgramKind::Advection);
        advection
            .variant(device, Keywords::MANUAL_FILTERING)
            .inspect_err(report)?;
        advection
            .variant(device, dye_advection_keywords(linear_filtering))
            .inspect_err(report)?;

        let mut display = Material::new(ProgramKind::Display);
        for shading in [false, true] {
            display
                .variant(device, Keywords::NONE.set(Keywords::SHADING, shading))
                .inspect_err(report)?;
        }

        Ok(Self {
            clear,
            splat,
            divergence,
            curl,
            vorticity,
            pressure,
            gradient_subtract,
            advection,
            display,
        })
    }
}

/// Dye is filtered by hand only when the hardware cannot filter it.
pub fn dye_advection_keywords(linear_filtering: bool) -> Keywords {
    Keywords::NONE.set(Keywords::MANUAL_FILTERING, !linear_filtering)
}
