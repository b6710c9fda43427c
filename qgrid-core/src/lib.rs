//! qgrid-core: Core types for neutron scattering rebinning.
//!
//! This crate provides the histogram workspace model, instrument geometry,
//! planar polygon clipping, sparse event workspaces and element-wise
//! workspace arithmetic used by the rebinning algorithms.
//!

pub mod binary_op;
pub mod error;
pub mod geometry;
pub mod histogram;
pub mod md;
pub mod polygon;
pub mod rebin;
pub mod rebinned;
pub mod units;

pub use binary_op::{
    check_size_compatibility, create_output_workspace, divide, minus, plus, OUTPUT_SENTINEL,
};
pub use error::{Error, Result};
pub use geometry::{
    BoundingBox, Detector, GeometryService, Instrument, PointingAlong, Quat, ReferenceFrame, V3,
};
pub use histogram::{BinEdgeAxis, DetectorId, Spectrum, Unit, Workspace};
pub use md::{BoxController, MdEvent, MdEventWorkspace};
pub use polygon::{normalize_winding, Quadrilateral, Rect, V2};
pub use rebin::{AxisBinning, RebinStatistics};
pub use rebinned::RebinnedOutput;
pub use units::EMode;
