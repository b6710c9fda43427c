//! S(Q, ω): energy-transfer spectra rebinned onto |Q| × ΔE.
//!
//! Three methods are provided. `Centre` converts each bin centre to |Q| per
//! detector and assigns the whole bin to one cell. `Polygon` maps every
//! (ΔE bin × detector angular extent) cell to a quadrilateral in (ΔE, |Q|)
//! and shares it between output cells by area. `NormalisedPolygon` also
//! divides the result by the covered fraction.

use std::fmt;
use std::str::FromStr;

use qgrid_core::rebin::{bin_index, create_axis_from_rebin_params, validate_edges};
use qgrid_core::units::momentum_transfer;
use qgrid_core::{
    EMode, Error, GeometryService, Quadrilateral, RebinStatistics, RebinnedOutput, Result, Unit,
    Workspace, V2,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::angular_cache::DetectorAngularCache;
use crate::fractional::{process_spectra, OutputGrid, RebinAccumulator, RebinResult};

/// Rebinning method for [`SofQw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SofQwMethod {
    /// Bin centres, whole-bin assignment.
    #[default]
    Centre,
    /// Fractional-area rebinning, un-normalised.
    Polygon,
    /// Fractional-area rebinning divided by the covered fraction.
    NormalisedPolygon,
}

impl fmt::Display for SofQwMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SofQwMethod::Centre => "Centre",
            SofQwMethod::Polygon => "Polygon",
            SofQwMethod::NormalisedPolygon => "NormalisedPolygon",
        };
        f.write_str(name)
    }
}

impl FromStr for SofQwMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "centre" | "center" => Ok(SofQwMethod::Centre),
            "polygon" => Ok(SofQwMethod::Polygon),
            "normalisedpolygon" | "normalizedpolygon" => Ok(SofQwMethod::NormalisedPolygon),
            other => Err(Error::ConfigError(format!("unknown S(Q,w) method '{other}'"))),
        }
    }
}

/// Configuration of an S(Q, ω) run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SofQwConfig {
    /// Output |Q| bin edges (inverse Angstrom).
    pub q_edges: Vec<f64>,
    /// Output energy-transfer rebin parameters; `None` keeps the input's
    /// first-spectrum edges.
    pub energy_params: Option<Vec<f64>>,
    /// Energy mode.
    pub emode: EMode,
    /// Fixed energy (meV): incident for Direct, final for Indirect.
    pub efixed: f64,
    /// Rebinning method.
    pub method: SofQwMethod,
    /// Replace empty cells with zero instead of NaN after normalisation.
    pub zero_empty_cells: bool,
    /// Run the per-spectrum loop on the rayon pool.
    pub parallel: bool,
}

impl Default for SofQwConfig {
    fn default() -> Self {
        Self {
            q_edges: Vec::new(),
            energy_params: None,
            emode: EMode::Direct,
            efixed: 0.0,
            method: SofQwMethod::Centre,
            zero_empty_cells: false,
            parallel: true,
        }
    }
}

impl SofQwConfig {
    /// Configuration with explicit Q edges and fixed energy.
    pub fn new(q_edges: Vec<f64>, efixed: f64) -> Self {
        Self {
            q_edges,
            efixed,
            ..Self::default()
        }
    }

    /// Sets Q edges from `[q0, dq, q1, ...]` rebin parameters.
    pub fn with_q_rebin_params(mut self, params: &[f64]) -> Result<Self> {
        self.q_edges = create_axis_from_rebin_params(params)?;
        Ok(self)
    }

    /// Sets the output energy-transfer rebin parameters.
    #[must_use]
    pub fn with_energy_params(mut self, params: Vec<f64>) -> Self {
        self.energy_params = Some(params);
        self
    }

    /// Sets the energy mode.
    #[must_use]
    pub fn with_emode(mut self, emode: EMode) -> Self {
        self.emode = emode;
        self
    }

    /// Sets the fixed energy (meV).
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = efixed;
        self
    }

    /// Sets the rebinning method.
    #[must_use]
    pub fn with_method(mut self, method: SofQwMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets whether empty cells become zero after normalisation.
    #[must_use]
    pub fn with_zero_empty_cells(mut self, zero: bool) -> Self {
        self.zero_empty_cells = zero;
        self
    }

    /// Enables or disables the parallel spectrum loop.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checks Q edges, energy mode and fixed energy.
    pub fn validate(&self) -> Result<()> {
        validate_edges(&self.q_edges)?;
        if self.emode == EMode::Elastic {
            return Err(Error::ConfigError(
                "S(Q,w) requires Direct or Indirect energy mode".to_string(),
            ));
        }
        if !(self.efixed.is_finite() && self.efixed > 0.0) {
            return Err(Error::ConfigError(format!(
                "fixed energy must be positive, found {}",
                self.efixed
            )));
        }
        Ok(())
    }

    fn energy_edges(&self, workspace: &Workspace) -> Result<Vec<f64>> {
        let edges = match &self.energy_params {
            Some(params) => create_axis_from_rebin_params(params)?,
            None if workspace.num_spectra() > 0 => workspace.x(0).to_vec(),
            None => {
                return Err(Error::ConfigError(
                    "input workspace has no spectra".to_string(),
                ))
            }
        };
        validate_edges(&edges)?;
        Ok(edges)
    }
}

/// Result of an S(Q, ω) run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SofQwOutput {
    /// Centre and Polygon methods.
    Histogram(Workspace),
    /// NormalisedPolygon method.
    Rebinned(RebinnedOutput),
}

impl SofQwOutput {
    /// The output workspace.
    pub fn workspace(&self) -> &Workspace {
        match self {
            SofQwOutput::Histogram(ws) => ws,
            SofQwOutput::Rebinned(out) => out.workspace(),
        }
    }
}

/// S(Q, ω) rebinning of an energy-transfer workspace.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SofQw {
    config: SofQwConfig,
}

impl SofQw {
    /// Creates the algorithm.
    pub fn new(config: SofQwConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &SofQwConfig {
        &self.config
    }

    /// Runs the configured method.
    pub fn execute<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
    ) -> Result<RebinResult<SofQwOutput>>
    where
        G: GeometryService + ?Sized,
    {
        match self.config.method {
            SofQwMethod::Centre => Ok(wrap(
                self.execute_centre(workspace, geometry)?,
                SofQwOutput::Histogram,
            )),
            SofQwMethod::Polygon => Ok(wrap(
                self.execute_polygon(workspace, geometry)?,
                SofQwOutput::Histogram,
            )),
            SofQwMethod::NormalisedPolygon => Ok(wrap(
                self.execute_normalised_polygon(workspace, geometry)?,
                SofQwOutput::Rebinned,
            )),
        }
    }

    fn prepare(&self, workspace: &Workspace) -> Result<OutputGrid> {
        self.config.validate()?;
        match workspace.x_unit() {
            Unit::DeltaE | Unit::Empty => {}
            other => {
                return Err(Error::ConfigError(format!(
                    "input X unit must be energy transfer, found '{}'",
                    other.caption()
                )))
            }
        }
        OutputGrid::new(self.config.energy_edges(workspace)?, self.config.q_edges.clone())
    }

    /// Centre method.
    ///
    /// Each bin centre is converted to |Q| at the two-theta of every
    /// resolvable, unmasked detector of the spectrum; each detector receives
    /// `1/n` of the signal and of the squared error. Distribution inputs are
    /// divided by the Q-bin width.
    pub fn execute_centre<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
    ) -> Result<RebinResult<Workspace>>
    where
        G: GeometryService + ?Sized,
    {
        let template = self.prepare(workspace)?;
        let config = &self.config;

        let partial = process_spectra(
            workspace.num_spectra(),
            config.parallel,
            || RebinAccumulator::new(template.clone(), false),
            |acc, index| {
                let detectors: Vec<_> = geometry
                    .resolve(workspace.detector_ids(index))
                    .into_iter()
                    .filter(|det| !det.is_masked && !det.is_monitor)
                    .collect();
                if detectors.is_empty() {
                    acc.statistics.spectra_skipped += 1;
                    return Ok(());
                }
                acc.statistics.spectra_processed += 1;
                #[allow(clippy::cast_precision_loss)]
                let weight = 1.0 / detectors.len() as f64;

                let (x, y, e) = (workspace.x(index), workspace.y(index), workspace.e(index));
                for detector in detectors {
                    let two_theta = geometry.two_theta(detector.position);
                    let efixed = detector_efixed(config, detector.efixed);
                    for bin in 0..y.len() {
                        let delta_e = 0.5 * (x[bin] + x[bin + 1]);
                        let q = momentum_transfer(
                            config.emode,
                            efixed,
                            delta_e,
                            two_theta,
                            index,
                            bin,
                        )?;
                        let column = bin_index(acc.grid.x_edges(), delta_e);
                        let row = bin_index(acc.grid.y_edges(), q);
                        if let (Some(row), Some(column)) = (row, column) {
                            acc.grid.accumulate(
                                row,
                                column,
                                y[bin] * weight,
                                e[bin] * e[bin] * weight,
                                weight,
                            );
                            acc.grid.record_detectors(row, workspace.detector_ids(index));
                            acc.statistics.contributions += 1;
                        } else {
                            acc.statistics.contributions_dropped += 1;
                        }
                    }
                }
                Ok(())
            },
        )?;

        let mut grid = partial.grid;
        if workspace.is_distribution() {
            for row in 0..grid.num_rows() {
                let width = grid.y_edges()[row + 1] - grid.y_edges()[row];
                grid.scale_row(row, 1.0 / width);
            }
        }
        log_summary(SofQwMethod::Centre, &partial.statistics);
        let output = grid
            .into_workspace(Unit::DeltaE, Unit::MomentumTransfer)?
            .with_distribution(workspace.is_distribution());
        Ok(RebinResult {
            output,
            statistics: partial.statistics,
            vertices: None,
        })
    }

    /// Polygon method; the output conserves the total input signal that
    /// falls inside the grid.
    pub fn execute_polygon<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
    ) -> Result<RebinResult<Workspace>>
    where
        G: GeometryService + ?Sized,
    {
        let (grid, statistics) = self.rebin_polygons(workspace, geometry, SofQwMethod::Polygon)?;
        Ok(RebinResult {
            output: grid.into_workspace(Unit::DeltaE, Unit::MomentumTransfer)?,
            statistics,
            vertices: None,
        })
    }

    /// Normalised-polygon method: polygon rebinning followed by division by
    /// the fractional coverage of every cell.
    pub fn execute_normalised_polygon<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
    ) -> Result<RebinResult<RebinnedOutput>>
    where
        G: GeometryService + ?Sized,
    {
        let (grid, statistics) =
            self.rebin_polygons(workspace, geometry, SofQwMethod::NormalisedPolygon)?;
        let mut output = grid.into_rebinned_output(Unit::DeltaE, Unit::MomentumTransfer)?;
        output.finalize(self.config.zero_empty_cells);
        Ok(RebinResult {
            output,
            statistics,
            vertices: None,
        })
    }

    fn rebin_polygons<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
        method: SofQwMethod,
    ) -> Result<(OutputGrid, RebinStatistics)>
    where
        G: GeometryService + ?Sized,
    {
        let template = self.prepare(workspace)?;
        let cache = DetectorAngularCache::build(workspace, geometry)?;
        let config = &self.config;

        let partial = process_spectra(
            workspace.num_spectra(),
            config.parallel,
            || RebinAccumulator::new(template.clone(), false),
            |acc, index| {
                let detectors = geometry.resolve(workspace.detector_ids(index));
                if !cache.is_usable(index) || detectors.iter().any(|det| det.is_masked) {
                    acc.statistics.spectra_skipped += 1;
                    return Ok(());
                }
                acc.statistics.spectra_processed += 1;

                let theta = cache.theta(index).abs();
                let half_width = cache.theta_width(index) / 2.0;
                let theta_lower = (theta - half_width).max(0.0).to_radians();
                let theta_upper = (theta + half_width).to_radians();
                let efixed = detector_efixed(config, detectors.first().and_then(|d| d.efixed));

                let x = workspace.x(index);
                for bin in 0..workspace.y(index).len() {
                    let (e_lo, e_hi) = (x[bin], x[bin + 1]);
                    let q = |delta_e, two_theta| {
                        momentum_transfer(config.emode, efixed, delta_e, two_theta, index, bin)
                    };
                    let quad = Quadrilateral::new(
                        V2::new(e_lo, q(e_lo, theta_lower)?),
                        V2::new(e_hi, q(e_hi, theta_lower)?),
                        V2::new(e_hi, q(e_hi, theta_upper)?),
                        V2::new(e_lo, q(e_lo, theta_upper)?),
                    );
                    acc.add_cell(&quad, workspace, index, bin);
                }
                Ok(())
            },
        )?;

        log_summary(method, &partial.statistics);
        Ok((partial.grid, partial.statistics))
    }
}

fn wrap<T>(result: RebinResult<T>, f: impl FnOnce(T) -> SofQwOutput) -> RebinResult<SofQwOutput> {
    RebinResult {
        output: f(result.output),
        statistics: result.statistics,
        vertices: result.vertices,
    }
}

/// Indirect geometry prefers the detector's own analyser energy.
fn detector_efixed(config: &SofQwConfig, detector_efixed: Option<f64>) -> f64 {
    match (config.emode, detector_efixed) {
        (EMode::Indirect, Some(efixed)) => efixed,
        _ => config.efixed,
    }
}

fn log_summary(method: SofQwMethod, statistics: &RebinStatistics) {
    if statistics.spectra_skipped > 0 {
        log::warn!(
            "SofQW{method}: skipped {} spectra without usable detectors",
            statistics.spectra_skipped
        );
    }
    log::debug!(
        "SofQW{method}: {} spectra, {} contributions, {} dropped, {} degenerate",
        statistics.spectra_processed,
        statistics.contributions,
        statistics.contributions_dropped,
        statistics.degenerate_cells
    );
}
