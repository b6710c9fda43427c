//! Coordinate calculators for reflectometry transforms.
//!
//! A calculator caches the trigonometry of the incident and final angles and
//! maps a wavelength onto a 2D output coordinate. Angles are set in degrees.
//! Non-finite or zero wavelengths produce non-finite coordinates rather than
//! errors; the rebinning engine discards such cells.

use std::f64::consts::PI;

use qgrid_core::polygon::{normalize_winding, Quadrilateral, V2};
use qgrid_core::units::wavenumber_from_wavelength;
use qgrid_core::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a detector two-theta maps to the final angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TwoThetaConvention {
    /// `theta_final = two_theta` (version 1 behaviour).
    TwoThetaIsFinal,
    /// `theta_final = two_theta - theta_incident` (version 2 and later).
    #[default]
    TwoThetaRelativeToIncident,
}

impl TwoThetaConvention {
    /// Convention used by a given algorithm version.
    pub fn from_version(version: i32) -> Self {
        if version <= 1 {
            TwoThetaConvention::TwoThetaIsFinal
        } else {
            TwoThetaConvention::TwoThetaRelativeToIncident
        }
    }

    /// Final angle (degrees) for a detector two-theta (degrees).
    #[inline]
    pub fn theta_final(self, two_theta: f64, theta_incident: f64) -> f64 {
        match self {
            TwoThetaConvention::TwoThetaIsFinal => two_theta,
            TwoThetaConvention::TwoThetaRelativeToIncident => two_theta - theta_incident,
        }
    }
}

/// Cached trigonometry shared by every calculator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngleState {
    theta_incident: f64,
    sin_theta_i: f64,
    cos_theta_i: f64,
    sin_theta_f: f64,
    cos_theta_f: f64,
    convention: TwoThetaConvention,
}

impl AngleState {
    /// State using `convention` for two-theta inputs.
    pub fn new(convention: TwoThetaConvention) -> Self {
        Self {
            cos_theta_i: 1.0,
            cos_theta_f: 1.0,
            convention,
            ..Self::default()
        }
    }

    /// Caches the incident angle.
    pub fn set_theta_incident(&mut self, degrees: f64) {
        self.theta_incident = degrees;
        let (sin, cos) = degrees.to_radians().sin_cos();
        self.sin_theta_i = sin;
        self.cos_theta_i = cos;
    }

    /// Caches the final angle.
    pub fn set_theta_final(&mut self, degrees: f64) {
        let (sin, cos) = degrees.to_radians().sin_cos();
        self.sin_theta_f = sin;
        self.cos_theta_f = cos;
    }

    /// Caches the final angle derived from a detector two-theta.
    pub fn set_two_theta(&mut self, degrees: f64) {
        self.set_theta_final(self.convention.theta_final(degrees, self.theta_incident));
    }

    /// Incident angle in degrees.
    pub fn theta_incident(&self) -> f64 {
        self.theta_incident
    }

    /// `sin(theta_i)`.
    pub fn sin_theta_incident(&self) -> f64 {
        self.sin_theta_i
    }

    /// `cos(theta_i)`.
    pub fn cos_theta_incident(&self) -> f64 {
        self.cos_theta_i
    }

    /// `sin(theta_f)`.
    pub fn sin_theta_final(&self) -> f64 {
        self.sin_theta_f
    }

    /// `cos(theta_f)`.
    pub fn cos_theta_final(&self) -> f64 {
        self.cos_theta_f
    }

    /// Two-theta convention in use.
    pub fn convention(&self) -> TwoThetaConvention {
        self.convention
    }
}

/// Maps (wavelength, incident angle, final angle) onto output coordinates.
pub trait CoordinateCalculator: Send {
    /// Calculator name.
    fn name(&self) -> &'static str;

    /// Names of the two output dimensions.
    fn dimension_names(&self) -> [&'static str; 2];

    /// Cached angle state.
    fn angles(&self) -> &AngleState;

    /// Mutable cached angle state.
    fn angles_mut(&mut self) -> &mut AngleState;

    /// First output coordinate.
    fn calculate_dim0(&self, wavelength: f64) -> f64;

    /// Second output coordinate.
    fn calculate_dim1(&self, wavelength: f64) -> f64;

    /// Sets the incident angle (degrees).
    fn set_theta_incident(&mut self, degrees: f64) {
        self.angles_mut().set_theta_incident(degrees);
    }

    /// Sets the final angle (degrees).
    fn set_theta_final(&mut self, degrees: f64) {
        self.angles_mut().set_theta_final(degrees);
    }

    /// Sets the final angle from a detector two-theta (degrees).
    fn set_two_theta(&mut self, degrees: f64) {
        self.angles_mut().set_two_theta(degrees);
    }

    /// Both coordinates at `wavelength`.
    #[inline]
    fn coordinates(&self, wavelength: f64) -> V2 {
        V2::new(
            self.calculate_dim0(wavelength),
            self.calculate_dim1(wavelength),
        )
    }

    /// Footprint of one (wavelength bin × detector two-theta bin) cell.
    ///
    /// Leaves the final angle set to `two_theta_upper`.
    fn create_quad(
        &mut self,
        lambda_upper: f64,
        lambda_lower: f64,
        two_theta_upper: f64,
        two_theta_lower: f64,
    ) -> Quadrilateral {
        self.set_two_theta(two_theta_lower);
        let first = self.coordinates(lambda_lower);
        let second = self.coordinates(lambda_upper);
        self.set_two_theta(two_theta_upper);
        let third = self.coordinates(lambda_lower);
        let fourth = self.coordinates(lambda_upper);
        normalize_winding(Quadrilateral::new(fourth, second, first, third))
    }
}

/// Qx/Qz: momentum transfer parallel and perpendicular to the surface.
#[derive(Debug, Clone, Copy)]
pub struct QxQzCalculator {
    angles: AngleState,
}

/// Incoming and outgoing wavevector components normal to the surface.
#[derive(Debug, Clone, Copy)]
pub struct KiKfCalculator {
    angles: AngleState,
}

/// Sum and difference of the normal wavevector components.
#[derive(Debug, Clone, Copy)]
pub struct PSumPDiffCalculator {
    angles: AngleState,
}

macro_rules! calculator_ctor {
    ($ty:ident) => {
        impl $ty {
            /// Creates a calculator using `convention` for two-theta inputs.
            pub fn new(convention: TwoThetaConvention) -> Self {
                Self {
                    angles: AngleState::new(convention),
                }
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new(TwoThetaConvention::default())
            }
        }
    };
}

calculator_ctor!(QxQzCalculator);
calculator_ctor!(KiKfCalculator);
calculator_ctor!(PSumPDiffCalculator);

impl CoordinateCalculator for QxQzCalculator {
    fn name(&self) -> &'static str {
        "QxQz"
    }

    fn dimension_names(&self) -> [&'static str; 2] {
        ["Qx", "Qz"]
    }

    fn angles(&self) -> &AngleState {
        &self.angles
    }

    fn angles_mut(&mut self) -> &mut AngleState {
        &mut self.angles
    }

    #[inline]
    fn calculate_dim0(&self, wavelength: f64) -> f64 {
        let k = wavenumber_from_wavelength(wavelength);
        k * (self.angles.cos_theta_f - self.angles.cos_theta_i)
    }

    #[inline]
    fn calculate_dim1(&self, wavelength: f64) -> f64 {
        let k = wavenumber_from_wavelength(wavelength);
        k * (self.angles.sin_theta_f + self.angles.sin_theta_i)
    }
}

impl CoordinateCalculator for KiKfCalculator {
    fn name(&self) -> &'static str {
        "KiKf"
    }

    fn dimension_names(&self) -> [&'static str; 2] {
        ["Ki", "Kf"]
    }

    fn angles(&self) -> &AngleState {
        &self.angles
    }

    fn angles_mut(&mut self) -> &mut AngleState {
        &mut self.angles
    }

    #[inline]
    fn calculate_dim0(&self, wavelength: f64) -> f64 {
        wavenumber_from_wavelength(wavelength) * self.angles.sin_theta_i
    }

    #[inline]
    fn calculate_dim1(&self, wavelength: f64) -> f64 {
        wavenumber_from_wavelength(wavelength) * self.angles.sin_theta_f
    }
}

impl CoordinateCalculator for PSumPDiffCalculator {
    fn name(&self) -> &'static str {
        "PSumPDiff"
    }

    fn dimension_names(&self) -> [&'static str; 2] {
        ["Pi+Pf", "Pi-Pf"]
    }

    fn angles(&self) -> &AngleState {
        &self.angles
    }

    fn angles_mut(&mut self) -> &mut AngleState {
        &mut self.angles
    }

    #[inline]
    fn calculate_dim0(&self, wavelength: f64) -> f64 {
        let k = wavenumber_from_wavelength(wavelength);
        k * (self.angles.sin_theta_i + self.angles.sin_theta_f)
    }

    #[inline]
    fn calculate_dim1(&self, wavelength: f64) -> f64 {
        let k = wavenumber_from_wavelength(wavelength);
        k * (self.angles.sin_theta_i - self.angles.sin_theta_f)
    }
}

/// Coordinate function of a [`GenericCalculator`]: `(angles, wavelength)`.
pub type CoordinateFn = fn(&AngleState, f64) -> f64;

/// Calculator assembled from two coordinate functions.
#[derive(Debug, Clone, Copy)]
pub struct GenericCalculator {
    angles: AngleState,
    dim0: CoordinateFn,
    dim1: CoordinateFn,
    names: [&'static str; 2],
}

impl GenericCalculator {
    /// Creates a calculator from coordinate functions and dimension names.
    pub fn new(
        convention: TwoThetaConvention,
        dim0: CoordinateFn,
        dim1: CoordinateFn,
        names: [&'static str; 2],
    ) -> Self {
        Self {
            angles: AngleState::new(convention),
            dim0,
            dim1,
            names,
        }
    }

    /// Wavelength against final angle: the untransformed input space.
    pub fn wavelength_theta(convention: TwoThetaConvention) -> Self {
        Self::new(
            convention,
            |_, wavelength| wavelength,
            |angles, _| angles.sin_theta_final().atan2(angles.cos_theta_final()) * 180.0 / PI,
            ["Wavelength", "ThetaFinal"],
        )
    }
}

impl CoordinateCalculator for GenericCalculator {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn dimension_names(&self) -> [&'static str; 2] {
        self.names
    }

    fn angles(&self) -> &AngleState {
        &self.angles
    }

    fn angles_mut(&mut self) -> &mut AngleState {
        &mut self.angles
    }

    #[inline]
    fn calculate_dim0(&self, wavelength: f64) -> f64 {
        (self.dim0)(&self.angles, wavelength)
    }

    #[inline]
    fn calculate_dim1(&self, wavelength: f64) -> f64 {
        (self.dim1)(&self.angles, wavelength)
    }
}

/// Calculator selection, turned into a fresh calculator per worker.
#[derive(Debug, Clone, Copy, Default)]
pub enum CalculatorKind {
    /// [`QxQzCalculator`].
    #[default]
    QxQz,
    /// [`KiKfCalculator`].
    KiKf,
    /// [`PSumPDiffCalculator`].
    PSumPDiff,
    /// [`GenericCalculator`] built from the given functions.
    Generic {
        /// First coordinate.
        dim0: CoordinateFn,
        /// Second coordinate.
        dim1: CoordinateFn,
        /// Dimension names.
        names: [&'static str; 2],
    },
}

impl CalculatorKind {
    /// Creates a calculator with the incident angle already set.
    pub fn create(
        &self,
        theta_incident: f64,
        convention: TwoThetaConvention,
    ) -> Box<dyn CoordinateCalculator> {
        let mut calculator: Box<dyn CoordinateCalculator> = match *self {
            CalculatorKind::QxQz => Box::new(QxQzCalculator::new(convention)),
            CalculatorKind::KiKf => Box::new(KiKfCalculator::new(convention)),
            CalculatorKind::PSumPDiff => Box::new(PSumPDiffCalculator::new(convention)),
            CalculatorKind::Generic { dim0, dim1, names } => {
                Box::new(GenericCalculator::new(convention, dim0, dim1, names))
            }
        };
        calculator.set_theta_incident(theta_incident);
        calculator
    }

    /// Units of the two output dimensions.
    pub fn dimension_units(&self) -> [Unit; 2] {
        let names = match self {
            CalculatorKind::QxQz => ["Qx", "Qz"],
            CalculatorKind::KiKf => ["Ki", "Kf"],
            CalculatorKind::PSumPDiff => ["Pi+Pf", "Pi-Pf"],
            CalculatorKind::Generic { names, .. } => *names,
        };
        names.map(|name| Unit::Label(name.to_string()))
    }
}
