//! Per-spectrum detector angles, computed once per run.

use rayon::prelude::*;

use qgrid_core::geometry::group_position;
use qgrid_core::{Error, GeometryService, Result, Workspace};

/// Marker stored for spectra that must not contribute.
pub const SKIP_SENTINEL: f64 = -1.0;

/// Signed two-theta, angular width and height of every spectrum's detector.
///
/// A spectrum with no resolvable detector, or containing a monitor, holds
/// [`SKIP_SENTINEL`] for both angle values. Usability is decided on the width
/// because a signed two-theta of exactly `-1°` is a valid angle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectorAngularCache {
    thetas: Vec<f64>,
    theta_widths: Vec<f64>,
    detector_heights: Vec<f64>,
}

impl DetectorAngularCache {
    /// Builds the cache for every spectrum of `workspace`, in parallel.
    ///
    /// Fails when the instrument's up axis is parallel to the beam, which
    /// leaves the sign of two-theta undefined.
    pub fn build<G>(workspace: &Workspace, geometry: &G) -> Result<Self>
    where
        G: GeometryService + ?Sized,
    {
        let beam = geometry.beam_direction();
        if beam.cross(&geometry.pointing_up().unit()).norm() == 0.0 {
            return Err(Error::ConfigError(format!(
                "up axis {:?} is parallel to the beam",
                geometry.pointing_up()
            )));
        }

        let entries: Vec<(f64, f64, f64)> = (0..workspace.num_spectra())
            .into_par_iter()
            .map(|index| Self::entry(workspace, geometry, index))
            .collect();

        let mut cache = Self {
            thetas: Vec::with_capacity(entries.len()),
            theta_widths: Vec::with_capacity(entries.len()),
            detector_heights: Vec::with_capacity(entries.len()),
        };
        for (theta, width, height) in entries {
            cache.thetas.push(theta);
            cache.theta_widths.push(width);
            cache.detector_heights.push(height);
        }
        Ok(cache)
    }

    fn entry<G>(workspace: &Workspace, geometry: &G, index: usize) -> (f64, f64, f64)
    where
        G: GeometryService + ?Sized,
    {
        let skip = (SKIP_SENTINEL, SKIP_SENTINEL, 0.0);
        let detectors = geometry.resolve(workspace.detector_ids(index));
        if detectors.iter().any(|det| det.is_monitor) {
            return skip;
        }
        let (Some(&first), Some(position)) = (detectors.first(), group_position(&detectors)) else {
            return skip;
        };

        let theta = geometry.signed_two_theta(position).to_degrees();
        let height = first.extent_along(geometry.pointing_up());
        let l2 = geometry.l2(first);
        let width = 2.0 * ((height / 2.0) / l2).atan().abs().to_degrees();
        (theta, width, height)
    }

    /// Number of cached spectra.
    pub fn len(&self) -> usize {
        self.thetas.len()
    }

    /// True when no spectra are cached.
    pub fn is_empty(&self) -> bool {
        self.thetas.is_empty()
    }

    /// Signed two-theta (degrees) of spectrum `index`.
    #[inline]
    pub fn theta(&self, index: usize) -> f64 {
        self.thetas[index]
    }

    /// Angular width (degrees) of spectrum `index`.
    #[inline]
    pub fn theta_width(&self, index: usize) -> f64 {
        self.theta_widths[index]
    }

    /// Detector height along the up axis.
    #[inline]
    pub fn detector_height(&self, index: usize) -> f64 {
        self.detector_heights[index]
    }

    /// False for spectra carrying the skip sentinel.
    #[inline]
    pub fn is_usable(&self, index: usize) -> bool {
        self.theta_widths[index] >= 0.0
    }

    /// Lower and upper two-theta (degrees) of spectrum `index`.
    #[inline]
    pub fn theta_bounds(&self, index: usize) -> (f64, f64) {
        let half = self.theta_widths[index] / 2.0;
        (self.thetas[index] - half, self.thetas[index] + half)
    }
}
