//! Workspaces that remember how much of each output cell was covered.

use crate::error::{Error, Result};
use crate::histogram::Workspace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 2D result plus the fractional area delivered to every cell.
///
/// While un-finalized, `Y` holds `Σ f·y` and `E` holds `sqrt(Σ (f·e)²)`.
/// [`RebinnedOutput::finalize`] divides both by the fraction sum so the
/// values become area-normalised intensities.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RebinnedOutput {
    workspace: Workspace,
    fractions: Vec<Vec<f64>>,
    finalized: bool,
}

impl RebinnedOutput {
    /// Wraps `workspace` with zeroed fractions.
    pub fn new(workspace: Workspace) -> Self {
        let fractions = workspace
            .spectra()
            .iter()
            .map(|s| vec![0.0; s.len()])
            .collect();
        Self {
            workspace,
            fractions,
            finalized: false,
        }
    }

    /// Wraps `workspace` with explicit fractions.
    pub fn with_fractions(workspace: Workspace, fractions: Vec<Vec<f64>>) -> Result<Self> {
        if fractions.len() != workspace.num_spectra() {
            return Err(Error::ConfigError(format!(
                "{} fraction rows for {} spectra",
                fractions.len(),
                workspace.num_spectra()
            )));
        }
        for (index, (row, spectrum)) in fractions.iter().zip(workspace.spectra()).enumerate() {
            if row.len() != spectrum.len() {
                return Err(Error::HistogramLength {
                    spectrum: index,
                    bins: spectrum.len(),
                    expected: spectrum.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self {
            workspace,
            fractions,
            finalized: false,
        })
    }

    /// The underlying workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Consumes the output, returning the workspace.
    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }

    /// Fractional areas of spectrum `index`.
    pub fn fractions(&self, index: usize) -> &[f64] {
        &self.fractions[index]
    }

    /// Whether [`finalize`](Self::finalize) has been applied.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Divides signal and error by the fraction sum.
    ///
    /// Cells that received no area become NaN, or zero when `zero_empty`.
    pub fn finalize(&mut self, zero_empty: bool) {
        if self.finalized {
            return;
        }
        let empty = if zero_empty { 0.0 } else { f64::NAN };
        for (index, fractions) in self.fractions.iter().enumerate() {
            let spectrum = self.workspace.spectrum_mut(index);
            for ((y, e), &f) in spectrum.y.iter_mut().zip(spectrum.e.iter_mut()).zip(fractions) {
                if f > 0.0 {
                    *y /= f;
                    *e /= f;
                } else {
                    *y = empty;
                    *e = empty;
                }
            }
        }
        self.finalized = true;
    }

    /// Reverses [`finalize`](Self::finalize) for cells with coverage.
    pub fn unfinalize(&mut self) {
        if !self.finalized {
            return;
        }
        for (index, fractions) in self.fractions.iter().enumerate() {
            let spectrum = self.workspace.spectrum_mut(index);
            for ((y, e), &f) in spectrum.y.iter_mut().zip(spectrum.e.iter_mut()).zip(fractions) {
                if f > 0.0 {
                    *y *= f;
                    *e *= f;
                } else {
                    *y = 0.0;
                    *e = 0.0;
                }
            }
        }
        self.finalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Spectrum;
    use approx::assert_abs_diff_eq;

    fn output() -> RebinnedOutput {
        let ws = Workspace::from_spectra(vec![Spectrum::new(
            1,
            vec![0.0, 1.0, 2.0, 3.0],
            vec![2.0, 3.0, 0.0],
            vec![0.5, 1.5, 0.0],
        )])
        .unwrap();
        RebinnedOutput::with_fractions(ws, vec![vec![0.5, 1.5, 0.0]]).unwrap()
    }

    #[test]
    fn test_finalize_divides_by_fraction() {
        let mut out = output();
        out.finalize(false);
        let ws = out.workspace();
        assert_abs_diff_eq!(ws.y(0)[0], 4.0);
        assert_abs_diff_eq!(ws.y(0)[1], 2.0);
        assert_abs_diff_eq!(ws.e(0)[0], 1.0);
        assert!(ws.y(0)[2].is_nan());
        assert!(out.is_finalized());
    }

    #[test]
    fn test_finalize_zero_empty() {
        let mut out = output();
        out.finalize(true);
        assert_abs_diff_eq!(out.workspace().y(0)[2], 0.0);
    }

    #[test]
    fn test_unfinalize_round_trip() {
        let mut out = output();
        out.finalize(true);
        out.finalize(true);
        out.unfinalize();
        assert_abs_diff_eq!(out.workspace().y(0)[0], 2.0);
        assert_abs_diff_eq!(out.workspace().y(0)[1], 3.0);
        assert!(!out.is_finalized());
    }

    #[test]
    fn test_fraction_shape_checked() {
        let ws = Workspace::zeros(2, 3, 2).unwrap();
        assert!(RebinnedOutput::with_fractions(ws.clone(), vec![vec![0.0; 2]]).is_err());
        assert!(RebinnedOutput::with_fractions(ws, vec![vec![0.0; 2], vec![0.0; 3]]).is_err());
    }
}
