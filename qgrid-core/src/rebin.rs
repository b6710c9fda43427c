//! Output axis construction, bin lookup and per-run rebinning statistics.

use std::ops::Range;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Linear binning of one output dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisBinning {
    /// Lower bound of the first bin.
    pub min: f64,
    /// Upper bound of the last bin.
    pub max: f64,
    /// Number of bins.
    pub num_bins: usize,
}

impl Default for AxisBinning {
    fn default() -> Self {
        Self {
            min: -1.0,
            max: 1.0,
            num_bins: 100,
        }
    }
}

impl AxisBinning {
    /// Creates a binning description.
    pub fn new(min: f64, max: f64, num_bins: usize) -> Self {
        Self { min, max, num_bins }
    }

    /// Checks `min < max` and `num_bins > 0`.
    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min >= self.max {
            return Err(Error::InvalidAxisRange {
                min: self.min,
                max: self.max,
            });
        }
        if self.num_bins == 0 {
            return Err(Error::EmptyAxis);
        }
        Ok(())
    }

    /// Width of a single bin.
    #[allow(clippy::cast_precision_loss)]
    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.num_bins as f64
    }

    /// Bin edges; the last edge is exactly `max`.
    #[allow(clippy::cast_precision_loss)]
    pub fn edges(&self) -> Vec<f64> {
        let width = self.width();
        let mut edges: Vec<f64> = (0..self.num_bins)
            .map(|i| self.min + i as f64 * width)
            .collect();
        edges.push(self.max);
        edges
    }
}

/// Checks that `edges` describes at least one bin and is strictly increasing.
pub fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::EmptyAxis);
    }
    for (index, pair) in edges.windows(2).enumerate() {
        if !pair[0].is_finite() {
            return Err(Error::NonIncreasingEdges {
                index,
                value: pair[0],
            });
        }
        if !(pair[1] > pair[0]) {
            return Err(Error::NonIncreasingEdges {
                index: index + 1,
                value: pair[1],
            });
        }
    }
    Ok(())
}

/// Index of the bin containing `value`.
///
/// Upper-bound semantics: a value exactly on an interior edge belongs to the
/// bin above it; a value equal to the last edge is out of range. NaN is out
/// of range.
#[inline]
pub fn bin_index(edges: &[f64], value: f64) -> Option<usize> {
    let upper = edges.partition_point(|&edge| edge <= value);
    if upper == 0 || upper >= edges.len() {
        None
    } else {
        Some(upper - 1)
    }
}

/// Bins whose extent overlaps the open interval `(lo, hi)`.
pub fn bin_range(edges: &[f64], lo: f64, hi: f64) -> Range<usize> {
    let num_bins = edges.len().saturating_sub(1);
    if num_bins == 0 || !(lo < hi) {
        return 0..0;
    }
    let start = edges.partition_point(|&edge| edge <= lo).saturating_sub(1);
    let end = edges.partition_point(|&edge| edge < hi).min(num_bins);
    if start >= end {
        0..0
    } else {
        start..end
    }
}

/// Largest number of bins [`create_axis_from_rebin_params`] will produce.
pub const MAX_REBIN_BINS: usize = 100_000_000;

/// Bin centres of an edge array.
pub fn bin_centres(edges: &[f64]) -> Vec<f64> {
    edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

/// Expands `[x0, dx0, x1, dx1, x2, ...]` into bin edges.
///
/// Only linear (positive) steps are supported. A final partial bin is
/// clipped to the boundary. More than [`MAX_REBIN_BINS`] bins is an error.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn create_axis_from_rebin_params(params: &[f64]) -> Result<Vec<f64>> {
    if params.len() < 3 || params.len() % 2 == 0 {
        return Err(Error::InvalidRebinParams(format!(
            "expected an odd number (>= 3) of values, found {}",
            params.len()
        )));
    }
    if params.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidRebinParams("non-finite value".to_string()));
    }

    let mut edges = vec![params[0]];
    for segment in params[1..].chunks_exact(2) {
        let (step, boundary) = (segment[0], segment[1]);
        let start = *edges.last().unwrap_or(&params[0]);
        if step <= 0.0 {
            return Err(Error::InvalidRebinParams(format!(
                "step {step} must be positive (logarithmic binning is not supported)"
            )));
        }
        if boundary <= start {
            return Err(Error::InvalidRebinParams(format!(
                "boundary {boundary} must be greater than {start}"
            )));
        }
        let steps = (boundary - start) / step;
        if steps.ceil() + (edges.len() - 1) as f64 > MAX_REBIN_BINS as f64 {
            return Err(Error::InvalidRebinParams(format!(
                "step {step} from {start} to {boundary} exceeds {MAX_REBIN_BINS} bins"
            )));
        }
        let full = if (steps - steps.round()).abs() < 1e-9 {
            steps.round() as usize
        } else {
            steps.ceil() as usize
        };
        for i in 1..full {
            edges.push(start + i as f64 * step);
        }
        edges.push(boundary);
    }
    Ok(edges)
}

/// Bookkeeping returned by every rebinning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RebinStatistics {
    /// Spectra that contributed to the output.
    pub spectra_processed: usize,
    /// Spectra skipped (no detector, monitor, masked).
    pub spectra_skipped: usize,
    /// Input bins accumulated into at least one output cell.
    pub contributions: usize,
    /// Input bins that fell outside the output axes.
    pub contributions_dropped: usize,
    /// Input cells with zero-area or non-finite footprints.
    pub degenerate_cells: usize,
}

impl RebinStatistics {
    /// Adds the counters of `other` into `self`.
    pub fn merge(&mut self, other: &RebinStatistics) {
        self.spectra_processed += other.spectra_processed;
        self.spectra_skipped += other.spectra_skipped;
        self.contributions += other.contributions;
        self.contributions_dropped += other.contributions_dropped;
        self.degenerate_cells += other.degenerate_cells;
    }
}
