//! Reflectometry transforms: wavelength × detector angle into 2D momentum
//! or wavevector space.

use qgrid_core::rebin::{bin_index, AxisBinning};
use qgrid_core::{
    BoxController, Error, GeometryService, MdEvent, MdEventWorkspace, RebinStatistics,
    RebinnedOutput, Result, Workspace,
};

use crate::angular_cache::DetectorAngularCache;
use crate::calculator::{CalculatorKind, TwoThetaConvention};
use crate::fractional::{process_spectra, OutputGrid, Partial, RebinAccumulator, RebinResult};

/// Configuration of a [`ReflectometryTransform`].
#[derive(Debug, Clone, Copy)]
pub struct ReflectometryConfig {
    /// Output coordinate system.
    pub calculator: CalculatorKind,
    /// Incident angle (degrees).
    pub theta_incident: f64,
    /// How detector two-theta maps to the final angle.
    pub convention: TwoThetaConvention,
    /// Binning of the first output dimension.
    pub dim0: AxisBinning,
    /// Binning of the second output dimension.
    pub dim1: AxisBinning,
    /// Replace empty cells with zero instead of NaN after normalisation.
    pub zero_empty_cells: bool,
    /// Run the per-spectrum loop on the rayon pool.
    pub parallel: bool,
}

impl Default for ReflectometryConfig {
    fn default() -> Self {
        Self {
            calculator: CalculatorKind::QxQz,
            theta_incident: 0.5,
            convention: TwoThetaConvention::default(),
            dim0: AxisBinning::new(-0.05, 0.05, 100),
            dim1: AxisBinning::new(0.0, 0.2, 100),
            zero_empty_cells: false,
            parallel: true,
        }
    }
}

impl ReflectometryConfig {
    /// Sets the output coordinate system.
    #[must_use]
    pub fn with_calculator(mut self, calculator: CalculatorKind) -> Self {
        self.calculator = calculator;
        self
    }

    /// Sets the incident angle (degrees).
    #[must_use]
    pub fn with_theta_incident(mut self, degrees: f64) -> Self {
        self.theta_incident = degrees;
        self
    }

    /// Sets the two-theta convention.
    #[must_use]
    pub fn with_convention(mut self, convention: TwoThetaConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Sets both output binnings.
    #[must_use]
    pub fn with_binning(mut self, dim0: AxisBinning, dim1: AxisBinning) -> Self {
        self.dim0 = dim0;
        self.dim1 = dim1;
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

    /// Checks the output binnings and the incident angle.
    pub fn validate(&self) -> Result<()> {
        self.dim0.validate()?;
        self.dim1.validate()?;
        if !self.theta_incident.is_finite() {
            return Err(Error::ConfigError(format!(
                "incident theta must be finite, found {}",
                self.theta_incident
            )));
        }
        Ok(())
    }
}

/// Transforms a wavelength workspace into a 2D output space.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectometryTransform {
    config: ReflectometryConfig,
}

#[derive(Debug, Default)]
struct EventBatch {
    events: Vec<MdEvent>,
    statistics: RebinStatistics,
}

impl Partial for EventBatch {
    fn merge(&mut self, other: Self) -> Result<()> {
        self.events.extend(other.events);
        self.statistics.merge(&other.statistics);
        Ok(())
    }
}

fn checked_wavelength(wavelength: f64, spectrum: usize, bin: usize) -> Result<f64> {
    if wavelength <= 0.0 {
        return Err(Error::InvalidWavelength {
            wavelength,
            spectrum,
            bin,
        });
    }
    Ok(wavelength)
}

impl ReflectometryTransform {
    /// Creates a transform.
    pub fn new(config: ReflectometryConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &ReflectometryConfig {
        &self.config
    }

    fn prepare<G>(&self, workspace: &Workspace, geometry: &G) -> Result<DetectorAngularCache>
    where
        G: GeometryService + ?Sized,
    {
        self.config.validate()?;
        DetectorAngularCache::build(workspace, geometry)
    }

    fn empty_grid(&self) -> Result<OutputGrid> {
        OutputGrid::new(self.config.dim0.edges(), self.config.dim1.edges())
    }

    /// Centre-point transform: every input bin lands, whole, in the output
    /// cell containing the coordinate of its wavelength centre.
    ///
    /// Bins whose centre is NaN or outside the output axes are dropped.
    /// Spectra with a masked detector are skipped.
    pub fn execute<G>(&self, workspace: &Workspace, geometry: &G) -> Result<RebinResult<Workspace>>
    where
        G: GeometryService + ?Sized,
    {
        let cache = self.prepare(workspace, geometry)?;
        let template = self.empty_grid()?;
        let config = &self.config;

        let partial = process_spectra(
            workspace.num_spectra(),
            config.parallel,
            || RebinAccumulator::new(template.clone(), false),
            |acc, index| {
                if skip_spectrum(&cache, geometry, workspace, index) {
                    acc.statistics.spectra_skipped += 1;
                    return Ok(());
                }
                acc.statistics.spectra_processed += 1;
                let mut calculator = config
                    .calculator
                    .create(config.theta_incident, config.convention);
                calculator.set_two_theta(cache.theta(index));

                let (x, y, e) = (workspace.x(index), workspace.y(index), workspace.e(index));
                for bin in 0..y.len() {
                    let wavelength = checked_wavelength(0.5 * (x[bin] + x[bin + 1]), index, bin)?;
                    let point = calculator.coordinates(wavelength);
                    let column = bin_index(acc.grid.x_edges(), point.x);
                    let row = bin_index(acc.grid.y_edges(), point.y);
                    if let (Some(row), Some(column)) = (row, column) {
                        acc.grid.accumulate(row, column, y[bin], e[bin] * e[bin], 1.0);
                        acc.grid.record_detectors(row, workspace.detector_ids(index));
                        acc.statistics.contributions += 1;
                    } else {
                        acc.statistics.contributions_dropped += 1;
                    }
                }
                Ok(())
            },
        )?;

        log_summary("centre-point", &partial.statistics);
        let [x_unit, y_unit] = config.calculator.dimension_units();
        Ok(RebinResult {
            output: partial.grid.into_workspace(x_unit, y_unit)?,
            statistics: partial.statistics,
            vertices: None,
        })
    }

    /// Event transform: one event per input bin at the coordinate of its
    /// wavelength centre, weighted by the bin's signal.
    ///
    /// Events outside the output extents are dropped and spectra with a
    /// masked detector are skipped. The event tree is split according to
    /// `box_controller` once all events are added.
    pub fn execute_md<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
        box_controller: BoxController,
    ) -> Result<RebinResult<MdEventWorkspace>>
    where
        G: GeometryService + ?Sized,
    {
        let cache = self.prepare(workspace, geometry)?;
        let config = &self.config;
        let names = config.calculator.dimension_units().map(|u| u.caption().to_string());
        let mut output = MdEventWorkspace::new(names, &config.dim0, &config.dim1, box_controller)?;

        let batch = process_spectra(
            workspace.num_spectra(),
            config.parallel,
            EventBatch::default,
            |batch, index| {
                if skip_spectrum(&cache, geometry, workspace, index) {
                    batch.statistics.spectra_skipped += 1;
                    return Ok(());
                }
                batch.statistics.spectra_processed += 1;
                let mut calculator = config
                    .calculator
                    .create(config.theta_incident, config.convention);
                calculator.set_two_theta(cache.theta(index));

                let (x, y, e) = (workspace.x(index), workspace.y(index), workspace.e(index));
                for bin in 0..y.len() {
                    let wavelength = checked_wavelength(0.5 * (x[bin] + x[bin + 1]), index, bin)?;
                    let point = calculator.coordinates(wavelength);
                    batch
                        .events
                        .push(MdEvent::new(y[bin], e[bin] * e[bin], [point.x, point.y]));
                }
                Ok(())
            },
        )?;

        let mut statistics = batch.statistics;
        for event in batch.events {
            if output.add_event(event) {
                statistics.contributions += 1;
            } else {
                statistics.contributions_dropped += 1;
            }
        }
        output.split_all_if_needed();
        log::debug!(
            "event transform produced {} events in {} boxes",
            output.num_events(),
            output.num_boxes()
        );
        log_summary("event", &statistics);
        Ok(RebinResult {
            output,
            statistics,
            vertices: None,
        })
    }

    /// Normalised-polygon transform.
    ///
    /// Each input bin becomes the quadrilateral spanned by its wavelength
    /// edges and the detector's angular extent `theta ± width/2`; the quad is
    /// rebinned by fractional area and the result divided by the covered
    /// fraction. Spectra with a masked detector are skipped.
    pub fn execute_norm_poly<G>(
        &self,
        workspace: &Workspace,
        geometry: &G,
        dump_vertexes: bool,
    ) -> Result<RebinResult<RebinnedOutput>>
    where
        G: GeometryService + ?Sized,
    {
        let cache = self.prepare(workspace, geometry)?;
        let template = self.empty_grid()?;
        let config = &self.config;

        let partial = process_spectra(
            workspace.num_spectra(),
            config.parallel,
            || RebinAccumulator::new(template.clone(), dump_vertexes),
            |acc, index| {
                if skip_spectrum(&cache, geometry, workspace, index) {
                    acc.statistics.spectra_skipped += 1;
                    return Ok(());
                }
                acc.statistics.spectra_processed += 1;
                let mut calculator = config
                    .calculator
                    .create(config.theta_incident, config.convention);
                let (theta_lower, theta_upper) = cache.theta_bounds(index);

                let x = workspace.x(index);
                for bin in 0..workspace.y(index).len() {
                    let lambda_lower = checked_wavelength(x[bin], index, bin)?;
                    let lambda_upper = checked_wavelength(x[bin + 1], index, bin)?;
                    let quad =
                        calculator.create_quad(lambda_upper, lambda_lower, theta_upper, theta_lower);
                    acc.add_cell(&quad, workspace, index, bin);
                }
                Ok(())
            },
        )?;

        log_summary("normalised-polygon", &partial.statistics);
        let [x_unit, y_unit] = config.calculator.dimension_units();
        let mut output = partial.grid.into_rebinned_output(x_unit, y_unit)?;
        output.finalize(config.zero_empty_cells);
        let vertices = partial.vertices.map(|mut table| {
            table.sort();
            table
        });
        Ok(RebinResult {
            output,
            statistics: partial.statistics,
            vertices,
        })
    }
}

/// Monitors, unresolved spectra and spectra with a masked detector take no
/// part in any of the transforms.
fn skip_spectrum<G>(
    cache: &DetectorAngularCache,
    geometry: &G,
    workspace: &Workspace,
    index: usize,
) -> bool
where
    G: GeometryService + ?Sized,
{
    !cache.is_usable(index)
        || geometry
            .resolve(workspace.detector_ids(index))
            .iter()
            .any(|det| det.is_masked)
}

fn log_summary(mode: &str, statistics: &RebinStatistics) {
    if statistics.spectra_skipped > 0 {
        log::warn!(
            "{mode} transform skipped {} spectra without usable detectors",
            statistics.spectra_skipped
        );
    }
    log::debug!(
        "{mode} transform: {} spectra, {} contributions, {} dropped, {} degenerate",
        statistics.spectra_processed,
        statistics.contributions,
        statistics.contributions_dropped,
        statistics.degenerate_cells
    );
}
