//! Error types for qgrid-core.

use thiserror::Error;

/// Result type alias for qgrid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for qgrid operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Axis bounds that do not describe a non-empty range.
    #[error("invalid axis range: min {min} must be less than max {max}")]
    InvalidAxisRange { min: f64, max: f64 },

    /// Axis with no bins.
    #[error("axis must have at least one bin")]
    EmptyAxis,

    /// Bin edges that are not strictly increasing.
    #[error("bin edges must be strictly increasing (edge {index} = {value})")]
    NonIncreasingEdges { index: usize, value: f64 },

    /// Malformed rebin parameter list.
    #[error("invalid rebin parameters: {0}")]
    InvalidRebinParams(String),

    /// Spectrum whose X/Y/E lengths disagree.
    #[error("spectrum {spectrum}: expected {expected} bin edges for {bins} bins, found {found}")]
    HistogramLength {
        spectrum: usize,
        bins: usize,
        expected: usize,
        found: usize,
    },

    /// Spectrum index outside the workspace.
    #[error("spectrum index {index} out of range (workspace has {len} spectra)")]
    SpectrumOutOfRange { index: usize, len: usize },

    /// Operands whose sizes cannot be broadcast against each other.
    #[error("incompatible workspace sizes: {lhs} and {rhs}")]
    IncompatibleSizes { lhs: usize, rhs: usize },

    /// Derived neutron energy that is not physical.
    #[error("negative {kind} energy {energy} meV at spectrum {spectrum}, bin {bin}")]
    NegativeEnergy {
        kind: &'static str,
        energy: f64,
        spectrum: usize,
        bin: usize,
    },

    /// Wavelength that cannot be converted to a wavenumber.
    #[error("invalid wavelength {wavelength} at spectrum {spectrum}, bin {bin}")]
    InvalidWavelength {
        wavelength: f64,
        spectrum: usize,
        bin: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
