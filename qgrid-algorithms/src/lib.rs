//! qgrid-algorithms: Rebinning algorithms for neutron scattering data.
//!
//! This crate provides:
//! - **Coordinate calculators** - QxQz, KiKf, PSumPDiff and caller-defined
//! - **Reflectometry transforms** - centre-point, event and normalised-polygon
//! - **S(Q, ω)** - centre, polygon and normalised-polygon rebinning
//! - **Fractional rebinning** - polygon overlap onto rectilinear grids
//!
#![warn(missing_docs)]

mod angular_cache;
pub mod calculator;
mod fractional;
mod reflectometry;
mod sofqw;

pub use angular_cache::{DetectorAngularCache, SKIP_SENTINEL};
pub use calculator::{
    AngleState, CalculatorKind, CoordinateCalculator, CoordinateFn, GenericCalculator,
    KiKfCalculator, PSumPDiffCalculator, QxQzCalculator, TwoThetaConvention,
};
pub use fractional::{
    Contribution, FractionalRebinning, OutputGrid, RebinResult, VertexRow, VertexTable,
};
pub use reflectometry::{ReflectometryConfig, ReflectometryTransform};
pub use sofqw::{SofQw, SofQwConfig, SofQwMethod, SofQwOutput};

// Re-export core rebinning types
pub use qgrid_core::{BoxController, MdEventWorkspace, RebinStatistics, RebinnedOutput};
