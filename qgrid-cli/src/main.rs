//! qgrid CLI - Command-line interface for qgrid.
//!
//! Reads a JSON document holding a histogram workspace and an instrument
//! description, runs a reflectometry transform or an S(Q, w) rebinning, and
//! writes the result (with run statistics) as JSON.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use qgrid_algorithms::{
    CalculatorKind, ReflectometryConfig, ReflectometryTransform, SofQw, SofQwConfig,
    SofQwMethod, TwoThetaConvention, VertexTable,
};
use qgrid_core::rebin::AxisBinning;
use qgrid_core::{BoxController, EMode, Instrument, RebinStatistics, Workspace};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] qgrid_core::Error),
}

/// Input document: the data and the geometry it was measured with.
#[derive(Debug, Serialize, Deserialize)]
struct InputFile {
    workspace: Workspace,
    instrument: Instrument,
}

/// Output document.
#[derive(Debug, Serialize)]
struct Report<T> {
    statistics: RebinStatistics,
    output: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    vertices: Option<VertexTable>,
}

/// Energy mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum EnergyMode {
    /// Fixed incident energy
    Direct,
    /// Fixed final energy
    Indirect,
}

/// S(Q, w) method selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    /// Whole-bin assignment at bin centres
    Centre,
    /// Fractional-area rebinning
    Polygon,
    /// Fractional-area rebinning divided by coverage
    NormalisedPolygon,
}

/// Reflectometry output coordinates.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transform {
    /// Momentum transfer parallel and perpendicular to the surface
    #[value(name = "qxqz")]
    QxQz,
    /// Incoming and outgoing normal wavevectors
    #[value(name = "kikf")]
    KiKf,
    /// Sum and difference of the normal wavevectors
    #[value(name = "psumpdiff")]
    PSumPDiff,
}

/// Reflectometry output representation.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Histogram, whole-bin assignment at bin centres
    Centre,
    /// Sparse event workspace
    Md,
    /// Histogram, normalised fractional-area rebinning
    NormPoly,
}

/// Rebinning of neutron scattering data onto momentum-transfer grids.
#[derive(Parser)]
#[command(name = "qgrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebin an energy-transfer workspace onto |Q| x energy transfer
    Sofqw {
        /// Input JSON file (workspace + instrument)
        input: PathBuf,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Q binning as rebin parameters: q0,dq,q1[,dq,q2...]
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        q_binning: Vec<f64>,

        /// Energy binning as rebin parameters (defaults to the input binning)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        energy_binning: Option<Vec<f64>>,

        /// Fixed energy in meV
        #[arg(long)]
        efixed: f64,

        /// Energy mode
        #[arg(long, value_enum, default_value = "direct")]
        emode: EnergyMode,

        /// Rebinning method
        #[arg(short, long, value_enum, default_value = "centre")]
        method: Method,

        /// Write zero instead of NaN into empty normalised cells
        #[arg(long)]
        zero_empty: bool,

        /// Disable the parallel spectrum loop
        #[arg(long)]
        sequential: bool,
    },

    /// Transform a wavelength workspace into 2D reflectometry coordinates
    Reflectometry {
        /// Input JSON file (workspace + instrument)
        input: PathBuf,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Output coordinate system
        #[arg(short, long, value_enum, default_value = "qxqz")]
        transform: Transform,

        /// Output representation
        #[arg(short, long, value_enum, default_value = "centre")]
        mode: Mode,

        /// Incident angle in degrees
        #[arg(long)]
        theta_incident: f64,

        /// Algorithm version selecting the two-theta convention
        #[arg(long, default_value = "2")]
        algorithm_version: i32,

        /// First dimension binning: min,max,bins
        #[arg(long, value_parser = parse_binning, allow_hyphen_values = true)]
        dim0: AxisBinning,

        /// Second dimension binning: min,max,bins
        #[arg(long, value_parser = parse_binning, allow_hyphen_values = true)]
        dim1: AxisBinning,

        /// Include the vertex table (norm-poly mode)
        #[arg(long)]
        dump_vertexes: bool,

        /// Event box split threshold (md mode)
        #[arg(long, default_value = "1000")]
        split_threshold: usize,

        /// Write zero instead of NaN into empty normalised cells
        #[arg(long)]
        zero_empty: bool,

        /// Disable the parallel spectrum loop
        #[arg(long)]
        sequential: bool,
    },

    /// Show information about an input file
    Info {
        /// Input JSON file
        input: PathBuf,
    },
}

fn parse_binning(s: &str) -> std::result::Result<AxisBinning, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [min, max, bins] = parts.as_slice() else {
        return Err(format!("expected min,max,bins but got '{s}'"));
    };
    let min: f64 = min.parse().map_err(|e| format!("invalid min '{min}': {e}"))?;
    let max: f64 = max.parse().map_err(|e| format!("invalid max '{max}': {e}"))?;
    let bins: usize = bins
        .parse()
        .map_err(|e| format!("invalid bin count '{bins}': {e}"))?;
    let binning = AxisBinning::new(min, max, bins);
    binning.validate().map_err(|e| e.to_string())?;
    Ok(binning)
}

fn load_input(path: &Path) -> Result<InputFile> {
    let reader = BufReader::new(File::open(path)?);
    let input: InputFile = serde_json::from_reader(reader)?;
    // Deserialisation bypasses the histogram length checks.
    let workspace = Workspace::from_spectra(input.workspace.spectra().to_vec())?
        .with_x_unit(input.workspace.x_unit().clone())
        .with_distribution(input.workspace.is_distribution());
    Ok(InputFile {
        workspace,
        instrument: input.instrument,
    })
}

fn write_report<T: Serialize>(path: &Path, report: &Report<T>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn print_statistics(statistics: &RebinStatistics, elapsed: f64) {
    println!("Finished in {:.3}s", elapsed);
    println!("Spectra processed: {}", statistics.spectra_processed);
    println!("Spectra skipped: {}", statistics.spectra_skipped);
    println!("Contributions: {}", statistics.contributions);
    println!("Dropped (out of range): {}", statistics.contributions_dropped);
    println!("Degenerate cells: {}", statistics.degenerate_cells);
}

fn info(path: &Path) -> Result<()> {
    let input = load_input(path)?;
    let ws = &input.workspace;
    println!("File: {}", path.display());
    println!("Spectra: {}", ws.num_spectra());
    println!("Bins (first spectrum): {}", ws.blocksize());
    println!("X unit: {}", ws.x_unit().caption());
    println!("Distribution: {}", ws.is_distribution());
    if ws.num_spectra() > 0 {
        let (min_x, max_x) = ws
            .spectra()
            .iter()
            .filter_map(|s| Some((*s.x.first()?, *s.x.last()?)))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| {
                (lo.min(a), hi.max(b))
            });
        println!("X range: {} - {}", min_x, max_x);
        println!("Total signal: {}", ws.total_signal());
    }
    println!("Instrument: {}", input.instrument.name);
    println!("Detectors: {}", input.instrument.num_detectors());
    let monitors = input
        .instrument
        .detectors()
        .filter(|det| det.is_monitor)
        .count();
    println!("Monitors: {}", monitors);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Sofqw {
            input,
            output,
            q_binning,
            energy_binning,
            efixed,
            emode,
            method,
            zero_empty,
            sequential,
        } => {
            let data = load_input(&input)?;
            let mut config = SofQwConfig::new(Vec::new(), efixed)
                .with_q_rebin_params(&q_binning)?
                .with_emode(match emode {
                    EnergyMode::Direct => EMode::Direct,
                    EnergyMode::Indirect => EMode::Indirect,
                })
                .with_method(match method {
                    Method::Centre => SofQwMethod::Centre,
                    Method::Polygon => SofQwMethod::Polygon,
                    Method::NormalisedPolygon => SofQwMethod::NormalisedPolygon,
                })
                .with_zero_empty_cells(zero_empty)
                .with_parallel(!sequential);
            if let Some(params) = energy_binning {
                config = config.with_energy_params(params);
            }
            log::info!(
                "SofQW{}: {} spectra, {} Q bins",
                config.method,
                data.workspace.num_spectra(),
                config.q_edges.len() - 1
            );

            let start = Instant::now();
            let result = SofQw::new(config).execute(&data.workspace, &data.instrument)?;
            let elapsed = start.elapsed().as_secs_f64();

            write_report(
                &output,
                &Report {
                    statistics: result.statistics,
                    output: &result.output,
                    vertices: None,
                },
            )?;
            print_statistics(&result.statistics, elapsed);
            println!("Output: {}", output.display());
        }

        Commands::Reflectometry {
            input,
            output,
            transform,
            mode,
            theta_incident,
            algorithm_version,
            dim0,
            dim1,
            dump_vertexes,
            split_threshold,
            zero_empty,
            sequential,
        } => {
            let data = load_input(&input)?;
            let config = ReflectometryConfig::default()
                .with_calculator(match transform {
                    Transform::QxQz => CalculatorKind::QxQz,
                    Transform::KiKf => CalculatorKind::KiKf,
                    Transform::PSumPDiff => CalculatorKind::PSumPDiff,
                })
                .with_theta_incident(theta_incident)
                .with_convention(TwoThetaConvention::from_version(algorithm_version))
                .with_binning(dim0, dim1)
                .with_zero_empty_cells(zero_empty)
                .with_parallel(!sequential);
            let algorithm = ReflectometryTransform::new(config);

            let start = Instant::now();
            let statistics = match mode {
                Mode::Centre => {
                    let result = algorithm.execute(&data.workspace, &data.instrument)?;
                    write_report(
                        &output,
                        &Report {
                            statistics: result.statistics,
                            output: &result.output,
                            vertices: None,
                        },
                    )?;
                    result.statistics
                }
                Mode::Md => {
                    let controller = BoxController::default().with_split_threshold(split_threshold);
                    let result =
                        algorithm.execute_md(&data.workspace, &data.instrument, controller)?;
                    println!(
                        "Events: {} in {} boxes",
                        result.output.num_events(),
                        result.output.num_boxes()
                    );
                    write_report(
                        &output,
                        &Report {
                            statistics: result.statistics,
                            output: &result.output,
                            vertices: None,
                        },
                    )?;
                    result.statistics
                }
                Mode::NormPoly => {
                    let result = algorithm.execute_norm_poly(
                        &data.workspace,
                        &data.instrument,
                        dump_vertexes,
                    )?;
                    write_report(
                        &output,
                        &Report {
                            statistics: result.statistics,
                            output: &result.output,
                            vertices: result.vertices,
                        },
                    )?;
                    result.statistics
                }
            };
            print_statistics(&statistics, start.elapsed().as_secs_f64());
            println!("Output: {}", output.display());
        }

        Commands::Info { input } => info(&input)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qgrid_core::{Detector, Spectrum, Unit, V3};

    fn sample_input() -> InputFile {
        let mut instrument = Instrument::new("TEST", V3::new(0.0, 0.0, -10.0), V3::default());
        instrument.add_detector(Detector::new(1, V3::new(0.0, 0.1, 3.0)));
        instrument.add_detector(Detector::new(2, V3::new(0.0, 0.0, -2.0)).monitor());
        let workspace = Workspace::from_spectra(vec![Spectrum::new(
            1,
            vec![2.0, 3.0, 4.0],
            vec![5.0, 6.0],
            vec![1.0, 2.0],
        )
        .with_detectors([1])])
        .unwrap()
        .with_x_unit(Unit::Wavelength);
        InputFile {
            workspace,
            instrument,
        }
    }

    #[test]
    fn test_load_input_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        let json = serde_json::to_string(&sample_input()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = load_input(&path).unwrap();
        assert_eq!(loaded.workspace.num_spectra(), 1);
        assert_eq!(loaded.workspace.x_unit(), &Unit::Wavelength);
        assert_eq!(loaded.instrument.num_detectors(), 2);
        assert_relative_eq!(loaded.workspace.total_signal(), 11.0);
    }

    #[test]
    fn test_load_input_rejects_bad_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let mut value = serde_json::to_value(sample_input()).unwrap();
        value["workspace"]["spectra"][0]["x"] = serde_json::json!([2.0, 3.0]);
        std::fs::write(&path, value.to_string()).unwrap();
        assert!(matches!(load_input(&path), Err(CliError::Core(_))));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let report = Report {
            statistics: RebinStatistics {
                spectra_processed: 3,
                ..RebinStatistics::default()
            },
            output: vec![1.0, 2.0],
            vertices: None,
        };
        write_report(&path, &report).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["statistics"]["spectra_processed"], 3);
        assert!(value.get("vertices").is_none());
    }

    #[test]
    fn test_parse_binning() {
        let binning = parse_binning("-0.05, 0.05, 100").unwrap();
        assert_eq!(binning.num_bins, 100);
        assert_relative_eq!(binning.min, -0.05);
        assert!(parse_binning("0,1").is_err());
        assert!(parse_binning("1,0,10").is_err());
        assert!(parse_binning("0,1,x").is_err());
    }

    #[test]
    fn test_reflectometry_pipeline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, serde_json::to_string(&sample_input()).unwrap()).unwrap();
        let data = load_input(&path).unwrap();

        let config = ReflectometryConfig::default()
            .with_theta_incident(1.0)
            .with_convention(TwoThetaConvention::TwoThetaIsFinal)
            .with_binning(
                AxisBinning::new(-0.1, 0.1, 20),
                AxisBinning::new(0.0, 0.2, 20),
            );
        let result = ReflectometryTransform::new(config)
            .execute(&data.workspace, &data.instrument)
            .unwrap();
        assert_eq!(result.statistics.spectra_processed, 1);

        let out = dir.path().join("out.json");
        write_report(
            &out,
            &Report {
                statistics: result.statistics,
                output: &result.output,
                vertices: None,
            },
        )
        .unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("\"spectra\""));
    }
}
