//! Histogram workspaces: spectra of bin edges, signal and error.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::rebin::validate_edges;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a physical detector pixel.
pub type DetectorId = i32;

/// Physical unit attached to an axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    /// Neutron wavelength (Angstrom).
    Wavelength,
    /// Energy transfer (meV).
    DeltaE,
    /// Momentum transfer |Q| (inverse Angstrom).
    MomentumTransfer,
    /// Scattering angle (degrees).
    Degrees,
    /// Free-form label for derived coordinates (Qx, Ki, ...).
    Label(String),
    /// Dimensionless or unknown.
    #[default]
    Empty,
}

impl Unit {
    /// Short caption used in axis titles.
    pub fn caption(&self) -> &str {
        match self {
            Unit::Wavelength => "Wavelength",
            Unit::DeltaE => "Energy transfer",
            Unit::MomentumTransfer => "|Q|",
            Unit::Degrees => "Degrees",
            Unit::Label(label) => label,
            Unit::Empty => "",
        }
    }
}

/// A single spectrum: `x` holds bin edges, `y`/`e` hold per-bin values.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum {
    /// Spectrum number (1-based by convention).
    pub spectrum_no: i32,
    /// Bin edges, one more than the number of bins.
    pub x: Vec<f64>,
    /// Signal per bin.
    pub y: Vec<f64>,
    /// Error (standard deviation) per bin.
    pub e: Vec<f64>,
    /// Detectors contributing to this spectrum.
    #[cfg_attr(feature = "serde", serde(default))]
    pub detector_ids: BTreeSet<DetectorId>,
}

impl Spectrum {
    /// Creates a spectrum with no detector mapping.
    pub fn new(spectrum_no: i32, x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Self {
        Self {
            spectrum_no,
            x,
            y,
            e,
            detector_ids: BTreeSet::new(),
        }
    }

    /// Adds detector ids to the spectrum-detector mapping.
    #[must_use]
    pub fn with_detectors<I: IntoIterator<Item = DetectorId>>(mut self, ids: I) -> Self {
        self.detector_ids.extend(ids);
        self
    }

    /// Number of bins.
    #[inline]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Returns true if the spectrum has no bins.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    fn check(&self, index: usize) -> Result<()> {
        let bins = self.y.len();
        if self.x.len() != bins + 1 {
            return Err(Error::HistogramLength {
                spectrum: index,
                bins,
                expected: bins + 1,
                found: self.x.len(),
            });
        }
        if self.e.len() != bins {
            return Err(Error::HistogramLength {
                spectrum: index,
                bins,
                expected: bins,
                found: self.e.len(),
            });
        }
        Ok(())
    }
}

/// Bin-edge axis owned by a workspace (the vertical axis of 2D results).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinEdgeAxis {
    edges: Vec<f64>,
    unit: Unit,
}

impl BinEdgeAxis {
    /// Creates an axis from strictly increasing edges.
    pub fn new(edges: Vec<f64>, unit: Unit) -> Result<Self> {
        validate_edges(&edges)?;
        Ok(Self { edges, unit })
    }

    /// The bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// The axis unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Number of bins described by the axis.
    pub fn num_bins(&self) -> usize {
        self.edges.len() - 1
    }
}

/// Array-of-spectra container.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Workspace {
    spectra: Vec<Spectrum>,
    #[cfg_attr(feature = "serde", serde(default))]
    x_unit: Unit,
    #[cfg_attr(feature = "serde", serde(default))]
    distribution: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    vertical_axis: Option<BinEdgeAxis>,
}

impl Workspace {
    /// Builds a workspace, validating `len(x) == len(y) + 1 == len(e) + 1`
    /// for every spectrum.
    pub fn from_spectra(spectra: Vec<Spectrum>) -> Result<Self> {
        for (index, spectrum) in spectra.iter().enumerate() {
            spectrum.check(index)?;
        }
        Ok(Self {
            spectra,
            ..Self::default()
        })
    }

    /// Factory for a zero-filled workspace. Spectrum numbers start at 1.
    pub fn zeros(num_spectra: usize, num_x: usize, num_y: usize) -> Result<Self> {
        if num_x != num_y + 1 {
            return Err(Error::HistogramLength {
                spectrum: 0,
                bins: num_y,
                expected: num_y + 1,
                found: num_x,
            });
        }
        let spectra = (0..num_spectra)
            .map(|i| {
                Spectrum::new(
                    i32::try_from(i + 1).unwrap_or(i32::MAX),
                    vec![0.0; num_x],
                    vec![0.0; num_y],
                    vec![0.0; num_y],
                )
            })
            .collect();
        Ok(Self {
            spectra,
            ..Self::default()
        })
    }

    /// Sets the X unit.
    #[must_use]
    pub fn with_x_unit(mut self, unit: Unit) -> Self {
        self.x_unit = unit;
        self
    }

    /// Marks the workspace as a distribution (counts per unit X).
    #[must_use]
    pub fn with_distribution(mut self, distribution: bool) -> Self {
        self.distribution = distribution;
        self
    }

    /// Number of spectra.
    #[inline]
    pub fn num_spectra(&self) -> usize {
        self.spectra.len()
    }

    /// Number of bins in the first spectrum (0 when empty).
    pub fn blocksize(&self) -> usize {
        self.spectra.first().map_or(0, Spectrum::len)
    }

    /// Total number of signal values across all spectra.
    pub fn size(&self) -> usize {
        self.spectra.iter().map(Spectrum::len).sum()
    }

    /// All spectra.
    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    /// Spectrum at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn spectrum(&self, index: usize) -> &Spectrum {
        &self.spectra[index]
    }

    /// Mutable spectrum at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn spectrum_mut(&mut self, index: usize) -> &mut Spectrum {
        &mut self.spectra[index]
    }

    /// Bin edges of spectrum `index`.
    #[inline]
    pub fn x(&self, index: usize) -> &[f64] {
        &self.spectra[index].x
    }

    /// Signal of spectrum `index`.
    #[inline]
    pub fn y(&self, index: usize) -> &[f64] {
        &self.spectra[index].y
    }

    /// Errors of spectrum `index`.
    #[inline]
    pub fn e(&self, index: usize) -> &[f64] {
        &self.spectra[index].e
    }

    /// Mutable signal of spectrum `index`.
    #[inline]
    pub fn y_mut(&mut self, index: usize) -> &mut [f64] {
        &mut self.spectra[index].y
    }

    /// Mutable errors of spectrum `index`.
    #[inline]
    pub fn e_mut(&mut self, index: usize) -> &mut [f64] {
        &mut self.spectra[index].e
    }

    /// Replaces the bin edges of spectrum `index`; the bin count must not change.
    pub fn set_x(&mut self, index: usize, edges: Vec<f64>) -> Result<()> {
        let len = self.spectra.len();
        let spectrum = self
            .spectra
            .get_mut(index)
            .ok_or(Error::SpectrumOutOfRange { index, len })?;
        if edges.len() != spectrum.y.len() + 1 {
            return Err(Error::HistogramLength {
                spectrum: index,
                bins: spectrum.y.len(),
                expected: spectrum.y.len() + 1,
                found: edges.len(),
            });
        }
        spectrum.x = edges;
        Ok(())
    }

    /// Detector ids mapped to spectrum `index`.
    pub fn detector_ids(&self, index: usize) -> &BTreeSet<DetectorId> {
        &self.spectra[index].detector_ids
    }

    /// Replaces the spectrum-detector mapping of spectrum `index`.
    pub fn set_detector_ids(&mut self, index: usize, ids: BTreeSet<DetectorId>) {
        self.spectra[index].detector_ids = ids;
    }

    /// Unit of the X axis.
    pub fn x_unit(&self) -> &Unit {
        &self.x_unit
    }

    /// Sets the X unit in place.
    pub fn set_x_unit(&mut self, unit: Unit) {
        self.x_unit = unit;
    }

    /// Whether values are counts per unit X.
    pub fn is_distribution(&self) -> bool {
        self.distribution
    }

    /// The vertical bin-edge axis, if any.
    pub fn vertical_axis(&self) -> Option<&BinEdgeAxis> {
        self.vertical_axis.as_ref()
    }

    /// Moves `axis` into the workspace, returning the previous axis.
    ///
    /// The axis must describe exactly one bin per spectrum.
    pub fn replace_vertical_axis(&mut self, axis: BinEdgeAxis) -> Result<Option<BinEdgeAxis>> {
        if axis.num_bins() != self.spectra.len() {
            return Err(Error::ConfigError(format!(
                "vertical axis has {} bins but workspace has {} spectra",
                axis.num_bins(),
                self.spectra.len()
            )));
        }
        Ok(self.vertical_axis.replace(axis))
    }

    /// Sum of all finite signal values.
    pub fn total_signal(&self) -> f64 {
        self.spectra
            .iter()
            .flat_map(|s| s.y.iter())
            .filter(|v| v.is_finite())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(no: i32) -> Spectrum {
        Spectrum::new(no, vec![0.0, 1.0, 2.0], vec![3.0, 4.0], vec![1.0, 2.0])
    }

    #[test]
    fn test_from_spectra_validates_lengths() {
        let good = Workspace::from_spectra(vec![spectrum(1), spectrum(2)]).unwrap();
        assert_eq!(good.num_spectra(), 2);
        assert_eq!(good.blocksize(), 2);
        assert_eq!(good.size(), 4);

        let bad = Spectrum::new(3, vec![0.0, 1.0], vec![3.0, 4.0], vec![1.0, 2.0]);
        let err = Workspace::from_spectra(vec![spectrum(1), bad]).unwrap_err();
        assert!(matches!(err, Error::HistogramLength { spectrum: 1, .. }));
    }

    #[test]
    fn test_zeros_factory() {
        let ws = Workspace::zeros(3, 5, 4).unwrap();
        assert_eq!(ws.num_spectra(), 3);
        assert_eq!(ws.spectrum(2).spectrum_no, 3);
        assert!(ws.y(1).iter().all(|&v| v == 0.0));
        assert!(Workspace::zeros(1, 4, 4).is_err());
    }

    #[test]
    fn test_set_x_keeps_bin_count() {
        let mut ws = Workspace::from_spectra(vec![spectrum(1)]).unwrap();
        ws.set_x(0, vec![10.0, 11.0, 12.0]).unwrap();
        assert_eq!(ws.x(0), &[10.0, 11.0, 12.0]);
        assert!(ws.set_x(0, vec![1.0, 2.0]).is_err());
        assert!(matches!(
            ws.set_x(4, vec![1.0, 2.0, 3.0]),
            Err(Error::SpectrumOutOfRange { index: 4, len: 1 })
        ));
    }

    #[test]
    fn test_replace_vertical_axis() {
        let mut ws = Workspace::from_spectra(vec![spectrum(1), spectrum(2)]).unwrap();
        let axis = BinEdgeAxis::new(vec![0.5, 1.0, 1.5], Unit::MomentumTransfer).unwrap();
        assert!(ws.replace_vertical_axis(axis).unwrap().is_none());
        assert_eq!(ws.vertical_axis().unwrap().num_bins(), 2);

        let wrong = BinEdgeAxis::new(vec![0.5, 1.0], Unit::MomentumTransfer).unwrap();
        assert!(ws.replace_vertical_axis(wrong).is_err());
    }

    #[test]
    fn test_total_signal_skips_nan() {
        let mut ws = Workspace::from_spectra(vec![spectrum(1)]).unwrap();
        ws.y_mut(0)[1] = f64::NAN;
        assert!((ws.total_signal() - 3.0).abs() < f64::EPSILON);
    }
}
