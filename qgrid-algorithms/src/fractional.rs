//! Fractional-area rebinning of input cells onto a rectilinear output grid.
//!
//! Each input cell is mapped into output space as a [`Quadrilateral`]. The
//! quad is clipped against every output cell its bounding box touches; a cell
//! overlapped by area `a` receives fraction `f = a / area(quad)` of the input
//! signal, `f²` of the squared error and `f` of coverage.

use std::collections::BTreeSet;

use rayon::prelude::*;

use qgrid_core::histogram::BinEdgeAxis;
use qgrid_core::polygon::{overlap_area, ClipBuffers, Rect};
use qgrid_core::rebin::{bin_range, validate_edges};
use qgrid_core::{
    DetectorId, Error, Quadrilateral, RebinStatistics, RebinnedOutput, Result, Spectrum, Unit,
    Workspace,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Accumulation grid: dim-0 edges index columns, dim-1 edges index rows.
///
/// Every row becomes one spectrum of the output workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGrid {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    signal: Vec<f64>,
    error_sq: Vec<f64>,
    fraction: Vec<f64>,
    row_detectors: Vec<BTreeSet<DetectorId>>,
}

impl OutputGrid {
    /// Zeroed grid over strictly increasing edges.
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>) -> Result<Self> {
        validate_edges(&x_edges)?;
        validate_edges(&y_edges)?;
        let rows = y_edges.len() - 1;
        let cells = rows * (x_edges.len() - 1);
        Ok(Self {
            x_edges,
            y_edges,
            signal: vec![0.0; cells],
            error_sq: vec![0.0; cells],
            fraction: vec![0.0; cells],
            row_detectors: vec![BTreeSet::new(); rows],
        })
    }

    /// Dim-0 (column) edges.
    pub fn x_edges(&self) -> &[f64] {
        &self.x_edges
    }

    /// Dim-1 (row) edges.
    pub fn y_edges(&self) -> &[f64] {
        &self.y_edges
    }

    /// Number of columns.
    #[inline]
    pub fn num_columns(&self) -> usize {
        self.x_edges.len() - 1
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.y_edges.len() - 1
    }

    #[inline]
    fn cell(&self, row: usize, column: usize) -> usize {
        row * self.num_columns() + column
    }

    /// Rectangle covered by a cell.
    #[inline]
    pub fn cell_rect(&self, row: usize, column: usize) -> Rect {
        Rect::new(
            self.x_edges[column],
            self.x_edges[column + 1],
            self.y_edges[row],
            self.y_edges[row + 1],
        )
    }

    /// Adds a contribution to one cell.
    #[inline]
    pub fn accumulate(
        &mut self,
        row: usize,
        column: usize,
        signal: f64,
        error_sq: f64,
        fraction: f64,
    ) {
        let cell = self.cell(row, column);
        self.signal[cell] += signal;
        self.error_sq[cell] += error_sq;
        self.fraction[cell] += fraction;
    }

    /// Adds detector ids to the mapping of `row`.
    pub fn record_detectors(&mut self, row: usize, ids: &BTreeSet<DetectorId>) {
        self.row_detectors[row].extend(ids.iter().copied());
    }

    /// Multiplies signal by `factor` and squared error by `factor²` along a row.
    pub fn scale_row(&mut self, row: usize, factor: f64) {
        let start = self.cell(row, 0);
        let end = start + self.num_columns();
        for cell in start..end {
            self.signal[cell] *= factor;
            self.error_sq[cell] *= factor * factor;
        }
    }

    /// `(signal, error², fraction)` of a cell.
    pub fn get(&self, row: usize, column: usize) -> (f64, f64, f64) {
        let cell = self.cell(row, column);
        (self.signal[cell], self.error_sq[cell], self.fraction[cell])
    }

    /// Detector ids recorded for `row`.
    pub fn row_detectors(&self, row: usize) -> &BTreeSet<DetectorId> {
        &self.row_detectors[row]
    }

    /// Sum of accumulated signal.
    pub fn total_signal(&self) -> f64 {
        self.signal.iter().sum()
    }

    /// Adds another partial grid of the same shape into this one.
    pub fn merge(&mut self, other: OutputGrid) -> Result<()> {
        if self.x_edges != other.x_edges || self.y_edges != other.y_edges {
            return Err(Error::ConfigError(
                "cannot merge output grids with different edges".to_string(),
            ));
        }
        for (a, b) in self.signal.iter_mut().zip(&other.signal) {
            *a += b;
        }
        for (a, b) in self.error_sq.iter_mut().zip(&other.error_sq) {
            *a += b;
        }
        for (a, b) in self.fraction.iter_mut().zip(&other.fraction) {
            *a += b;
        }
        for (a, b) in self.row_detectors.iter_mut().zip(other.row_detectors) {
            a.extend(b);
        }
        Ok(())
    }

    /// Converts the grid to a workspace with one spectrum per row.
    ///
    /// `E = sqrt(error²)`; the row edges become the vertical axis.
    pub fn into_workspace(self, x_unit: Unit, y_unit: Unit) -> Result<Workspace> {
        Ok(self.into_parts(x_unit, y_unit)?.0)
    }

    /// Converts the grid to an un-finalized [`RebinnedOutput`].
    pub fn into_rebinned_output(self, x_unit: Unit, y_unit: Unit) -> Result<RebinnedOutput> {
        let (workspace, fractions) = self.into_parts(x_unit, y_unit)?;
        RebinnedOutput::with_fractions(workspace, fractions)
    }

    fn into_parts(self, x_unit: Unit, y_unit: Unit) -> Result<(Workspace, Vec<Vec<f64>>)> {
        let columns = self.num_columns();
        let mut spectra = Vec::with_capacity(self.num_rows());
        let mut fractions = Vec::with_capacity(self.num_rows());
        for (row, ids) in self.row_detectors.into_iter().enumerate() {
            let cells = row * columns..(row + 1) * columns;
            let spectrum_no = i32::try_from(row + 1)
                .map_err(|_| Error::ConfigError(format!("too many output rows ({row})")))?;
            let errors = self.error_sq[cells.clone()].iter().map(|v| v.sqrt()).collect();
            spectra.push(
                Spectrum::new(
                    spectrum_no,
                    self.x_edges.clone(),
                    self.signal[cells.clone()].to_vec(),
                    errors,
                )
                .with_detectors(ids),
            );
            fractions.push(self.fraction[cells].to_vec());
        }
        let mut workspace = Workspace::from_spectra(spectra)?.with_x_unit(x_unit);
        workspace.replace_vertical_axis(BinEdgeAxis::new(self.y_edges, y_unit)?)?;
        Ok((workspace, fractions))
    }
}

/// Outcome of rebinning a single input cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    /// Delivered to this many output cells.
    Accumulated {
        /// Cells with positive overlap.
        cells: usize,
    },
    /// No overlap with the output grid.
    OutOfRange,
    /// Zero-area or non-finite footprint; nothing was added.
    Degenerate,
}

/// Polygon-overlap rebinning engine; owns the clipping scratch space.
#[derive(Debug, Default)]
pub struct FractionalRebinning {
    buffers: ClipBuffers,
}

impl FractionalRebinning {
    /// Creates an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebins bin `bin` of spectrum `spectrum` of `workspace`, whose
    /// footprint in output space is `quad`.
    pub fn rebin(
        &mut self,
        quad: &Quadrilateral,
        workspace: &Workspace,
        spectrum: usize,
        bin: usize,
        grid: &mut OutputGrid,
    ) -> Contribution {
        self.rebin_values(
            quad,
            workspace.y(spectrum)[bin],
            workspace.e(spectrum)[bin],
            workspace.detector_ids(spectrum),
            grid,
        )
    }

    /// Rebins a single `(signal, error)` value with footprint `quad`.
    pub fn rebin_values(
        &mut self,
        quad: &Quadrilateral,
        signal: f64,
        error: f64,
        detectors: &BTreeSet<DetectorId>,
        grid: &mut OutputGrid,
    ) -> Contribution {
        let area = quad.area();
        if !quad.is_finite() || !area.is_finite() || area <= 0.0 {
            log::debug!("skipping degenerate cell {quad:?} (area {area})");
            return Contribution::Degenerate;
        }

        let bbox = quad.bounding_box();
        let rows = bin_range(&grid.y_edges, bbox.y_min, bbox.y_max);
        let columns = bin_range(&grid.x_edges, bbox.x_min, bbox.x_max);
        let error_sq = error * error;
        let mut cells = 0;
        for row in rows {
            let mut touched = false;
            for column in columns.clone() {
                let overlap = overlap_area(quad, &grid.cell_rect(row, column), &mut self.buffers);
                if overlap <= 0.0 {
                    continue;
                }
                let fraction = overlap / area;
                grid.accumulate(
                    row,
                    column,
                    fraction * signal,
                    fraction * fraction * error_sq,
                    fraction,
                );
                touched = true;
                cells += 1;
            }
            if touched {
                grid.record_detectors(row, detectors);
            }
        }

        if cells == 0 {
            Contribution::OutOfRange
        } else {
            Contribution::Accumulated { cells }
        }
    }
}

/// One vertex of a rebinned input cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VertexRow {
    /// Input spectrum index.
    pub spectrum: usize,
    /// Input bin index.
    pub bin: usize,
    /// Vertex index within the quad (0..4).
    pub vertex: usize,
    /// Dim-0 coordinate.
    pub x: f64,
    /// Dim-1 coordinate.
    pub y: f64,
    /// Input signal.
    pub signal: f64,
    /// Input error.
    pub error: f64,
}

/// Debug table of every quad vertex produced during a run.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VertexTable {
    rows: Vec<VertexRow>,
}

impl VertexTable {
    /// Column names, in row order.
    pub const COLUMNS: [&'static str; 7] =
        ["spectrum", "bin", "vertex", "x", "y", "signal", "error"];

    /// Appends the four vertices of `quad`.
    pub fn push_quad(
        &mut self,
        spectrum: usize,
        bin: usize,
        quad: &Quadrilateral,
        signal: f64,
        error: f64,
    ) {
        for (vertex, v) in quad.vertices().iter().enumerate() {
            self.rows.push(VertexRow {
                spectrum,
                bin,
                vertex,
                x: v.x,
                y: v.y,
                signal,
                error,
            });
        }
    }

    /// Appends the rows of another table.
    pub fn merge(&mut self, other: VertexTable) {
        self.rows.extend(other.rows);
    }

    /// Orders rows by spectrum, bin and vertex.
    pub fn sort(&mut self) {
        self.rows.sort_by_key(|r| (r.spectrum, r.bin, r.vertex));
    }

    /// All rows.
    pub fn rows(&self) -> &[VertexRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Output of a rebinning run.
#[derive(Debug, Clone)]
pub struct RebinResult<T> {
    /// The rebinned data.
    pub output: T,
    /// Run bookkeeping.
    pub statistics: RebinStatistics,
    /// Vertex dump, when requested.
    pub vertices: Option<VertexTable>,
}

/// A per-worker partial result that can be folded into another.
pub(crate) trait Partial: Send + Sized {
    fn merge(&mut self, other: Self) -> Result<()>;
}

/// Thread-local state of a polygon rebinning run.
#[derive(Debug)]
pub(crate) struct RebinAccumulator {
    pub grid: OutputGrid,
    pub engine: FractionalRebinning,
    pub statistics: RebinStatistics,
    pub vertices: Option<VertexTable>,
}

impl RebinAccumulator {
    pub fn new(grid: OutputGrid, dump_vertexes: bool) -> Self {
        Self {
            grid,
            engine: FractionalRebinning::new(),
            statistics: RebinStatistics::default(),
            vertices: dump_vertexes.then(VertexTable::default),
        }
    }

    /// Rebins one cell and updates the statistics.
    pub fn add_cell(
        &mut self,
        quad: &Quadrilateral,
        workspace: &Workspace,
        spectrum: usize,
        bin: usize,
    ) {
        if let Some(vertices) = self.vertices.as_mut() {
            vertices.push_quad(
                spectrum,
                bin,
                quad,
                workspace.y(spectrum)[bin],
                workspace.e(spectrum)[bin],
            );
        }
        match self
            .engine
            .rebin(quad, workspace, spectrum, bin, &mut self.grid)
        {
            Contribution::Accumulated { .. } => self.statistics.contributions += 1,
            Contribution::OutOfRange => self.statistics.contributions_dropped += 1,
            Contribution::Degenerate => self.statistics.degenerate_cells += 1,
        }
    }
}

impl Partial for RebinAccumulator {
    fn merge(&mut self, other: Self) -> Result<()> {
        self.grid.merge(other.grid)?;
        self.statistics.merge(&other.statistics);
        match (self.vertices.as_mut(), other.vertices) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, theirs) => self.vertices = theirs,
            (Some(_), None) => {}
        }
        Ok(())
    }
}

/// Upper bound on rayon tasks per pool thread, and so on live partials.
const TASKS_PER_THREAD: usize = 4;

/// Runs `op` over every spectrum index and folds the partial results.
///
/// In parallel mode each rayon task folds into its own partial built by
/// `identity`; partials are merged pairwise. Each task covers at least
/// `num_spectra / (threads * TASKS_PER_THREAD)` spectra, which caps the
/// number of partials at `threads * TASKS_PER_THREAD`. The first error
/// aborts the run.
pub(crate) fn process_spectra<T, I, F>(
    num_spectra: usize,
    parallel: bool,
    identity: I,
    op: F,
) -> Result<T>
where
    T: Partial,
    I: Fn() -> T + Sync + Send,
    F: Fn(&mut T, usize) -> Result<()> + Sync + Send,
{
    if parallel {
        let min_len = num_spectra
            .div_ceil(rayon::current_num_threads() * TASKS_PER_THREAD)
            .max(1);
        (0..num_spectra)
            .into_par_iter()
            .with_min_len(min_len)
            .try_fold(&identity, |mut partial, index| -> Result<T> {
                op(&mut partial, index)?;
                Ok(partial)
            })
            .try_reduce(&identity, |mut a, b| {
                a.merge(b)?;
                Ok(a)
            })
    } else {
        let mut partial = identity();
        for index in 0..num_spectra {
            op(&mut partial, index)?;
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_abs_diff_eq;
    use qgrid_core::V2;

    fn grid() -> OutputGrid {
        OutputGrid::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0]).unwrap()
    }

    fn ids(values: &[DetectorId]) -> BTreeSet<DetectorId> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_centred_square_splits_four_ways() {
        let mut grid = grid();
        let mut engine = FractionalRebinning::new();
        let quad = Quadrilateral::from_rect(Rect::new(0.5, 1.5, 0.5, 1.5));
        let result = engine.rebin_values(&quad, 8.0, 2.0, &ids(&[7]), &mut grid);
        assert_eq!(result, Contribution::Accumulated { cells: 4 });
        for row in 0..2 {
            for column in 0..2 {
                let (s, e2, f) = grid.get(row, column);
                assert_abs_diff_eq!(s, 2.0, epsilon = 1e-12);
                assert_abs_diff_eq!(e2, 0.25, epsilon = 1e-12);
                assert_abs_diff_eq!(f, 0.25, epsilon = 1e-12);
            }
            assert!(grid.row_detectors(row).contains(&7));
        }
        assert_abs_diff_eq!(grid.total_signal(), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_partial_coverage_outside_grid() {
        let mut grid = grid();
        let mut engine = FractionalRebinning::new();
        let quad = Quadrilateral::from_rect(Rect::new(1.5, 2.5, 0.25, 0.75));
        engine.rebin_values(&quad, 4.0, 0.0, &ids(&[]), &mut grid);
        assert_abs_diff_eq!(grid.get(0, 1).0, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.total_signal(), 2.0, epsilon = 1e-12);
        assert!(grid.row_detectors(1).is_empty());
    }

    #[test]
    fn test_degenerate_and_out_of_range() {
        let mut grid = grid();
        let before = grid.clone();
        let mut engine = FractionalRebinning::new();
        let line = Quadrilateral::new(
            V2::new(0.2, 0.2),
            V2::new(0.8, 0.2),
            V2::new(0.8, 0.2),
            V2::new(0.2, 0.2),
        );
        assert_eq!(
            engine.rebin_values(&line, 1.0, 1.0, &ids(&[1]), &mut grid),
            Contribution::Degenerate
        );
        let nan = Quadrilateral::new(
            V2::new(f64::NAN, 0.2),
            V2::new(0.8, 0.2),
            V2::new(0.8, 0.8),
            V2::new(0.2, 0.8),
        );
        assert_eq!(
            engine.rebin_values(&nan, 1.0, 1.0, &ids(&[1]), &mut grid),
            Contribution::Degenerate
        );
        let far = Quadrilateral::from_rect(Rect::new(5.0, 6.0, 5.0, 6.0));
        assert_eq!(
            engine.rebin_values(&far, 1.0, 1.0, &ids(&[1]), &mut grid),
            Contribution::OutOfRange
        );
        assert_eq!(grid, before);
    }

    #[test]
    fn test_merge_and_into_workspace() {
        let mut a = grid();
        let mut b = grid();
        a.accumulate(0, 0, 1.0, 4.0, 0.5);
        b.accumulate(0, 0, 2.0, 5.0, 0.5);
        b.record_detectors(1, &ids(&[3, 4]));
        a.merge(b).unwrap();
        assert_eq!(a.get(0, 0), (3.0, 9.0, 1.0));

        let ws = a
            .clone()
            .into_workspace(Unit::DeltaE, Unit::MomentumTransfer)
            .unwrap();
        assert_eq!(ws.num_spectra(), 2);
        assert_eq!(ws.x(0), &[0.0, 1.0, 2.0]);
        assert_abs_diff_eq!(ws.e(0)[0], 3.0);
        assert_eq!(ws.detector_ids(1), &ids(&[3, 4]));
        assert_eq!(ws.vertical_axis().unwrap().edges(), &[0.0, 1.0, 2.0]);

        let other = OutputGrid::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        assert!(a.merge(other).is_err());
    }

    #[test]
    fn test_scale_row() {
        let mut grid = grid();
        grid.accumulate(1, 1, 4.0, 4.0, 1.0);
        grid.scale_row(1, 0.5);
        assert_eq!(grid.get(1, 1), (2.0, 1.0, 1.0));
    }

    #[test]
    fn test_vertex_table() {
        let mut table = VertexTable::default();
        let quad = Quadrilateral::from_rect(Rect::new(0.0, 1.0, 0.0, 1.0));
        table.push_quad(1, 0, &quad, 2.0, 0.5);
        let mut other = VertexTable::default();
        other.push_quad(0, 3, &quad, 1.0, 0.1);
        table.merge(other);
        table.sort();
        assert_eq!(table.len(), 8);
        assert_eq!(table.rows()[0].spectrum, 0);
        assert_eq!(table.rows()[4].vertex, 0);
        assert_abs_diff_eq!(table.rows()[6].x, 1.0);
    }

    #[test]
    fn test_process_spectra_parallel_matches_sequential() {
        let workspace = Workspace::from_spectra(
            (0..16)
                .map(|i| {
                    Spectrum::new(i + 1, vec![0.0, 1.0], vec![f64::from(i)], vec![1.0])
                        .with_detectors([i])
                })
                .collect(),
        )
        .unwrap();
        let run = |parallel| {
            process_spectra(
                workspace.num_spectra(),
                parallel,
                || RebinAccumulator::new(grid(), true),
                |acc, index| {
                    let offset = 0.1 * f64::from(u32::try_from(index).unwrap_or(0));
                    let quad = Quadrilateral::from_rect(Rect::new(
                        offset,
                        offset + 0.5,
                        offset,
                        offset + 0.5,
                    ));
                    acc.add_cell(&quad, &workspace, index, 0);
                    Ok(())
                },
            )
            .unwrap()
        };
        let sequential = run(false);
        let parallel = run(true);
        assert_abs_diff_eq!(
            sequential.grid.total_signal(),
            parallel.grid.total_signal(),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(sequential.grid.total_signal(), 120.0, epsilon = 1e-9);
        assert_eq!(sequential.statistics, parallel.statistics);
        assert_eq!(parallel.vertices.map(|v| v.len()), Some(64));
    }

    #[derive(Default)]
    struct TaskCount {
        spectra: usize,
        partials: usize,
    }

    impl Partial for TaskCount {
        fn merge(&mut self, other: Self) -> Result<()> {
            self.spectra += other.spectra;
            self.partials += other.partials;
            Ok(())
        }
    }

    #[test]
    fn test_process_spectra_bounds_partials() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let counted = pool
            .install(|| {
                process_spectra(10_000, true, TaskCount::default, |partial, _| {
                    if partial.spectra == 0 {
                        partial.partials = 1;
                    }
                    partial.spectra += 1;
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(counted.spectra, 10_000);
        assert!(counted.partials >= 1);
        assert!(counted.partials <= 2 * TASKS_PER_THREAD, "{}", counted.partials);
    }

    #[test]
    fn test_process_spectra_propagates_errors() {
        let result = process_spectra(
            8,
            true,
            || RebinAccumulator::new(grid(), false),
            |_, index| {
                if index == 5 {
                    Err(Error::ConfigError("boom".to_string()))
                } else {
                    Ok(())
                }
            },
        );
        assert!(result.is_err());
    }
}
