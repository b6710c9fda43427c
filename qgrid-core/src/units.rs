//! Neutron unit conversions and energy-mode kinematics.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `E = C * k^2` with E in meV and k in inverse Angstrom (hbar^2 / 2 m_n).
pub const E_MEV_TO_NEUTRON_WAVENUMBER_SQ: f64 = 2.072_124_66;

/// Wavenumber `2π/λ` (inverse Angstrom) for a wavelength in Angstrom.
#[inline]
pub fn wavenumber_from_wavelength(wavelength: f64) -> f64 {
    2.0 * PI / wavelength
}

/// Wavenumber (inverse Angstrom) of a neutron with `energy` meV.
#[inline]
pub fn wavenumber_from_energy(energy: f64) -> f64 {
    (energy / E_MEV_TO_NEUTRON_WAVENUMBER_SQ).sqrt()
}

/// Scattering geometry of an inelastic instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EMode {
    /// No energy transfer; not valid for S(Q,w).
    Elastic,
    /// Fixed incident energy.
    #[default]
    Direct,
    /// Fixed final energy.
    Indirect,
}

impl fmt::Display for EMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EMode::Elastic => "Elastic",
            EMode::Direct => "Direct",
            EMode::Indirect => "Indirect",
        };
        f.write_str(name)
    }
}

impl FromStr for EMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elastic" => Ok(EMode::Elastic),
            "direct" => Ok(EMode::Direct),
            "indirect" => Ok(EMode::Indirect),
            other => Err(Error::ConfigError(format!("unknown energy mode '{other}'"))),
        }
    }
}

/// Incident and final wavenumbers for an energy transfer.
///
/// Fails when the derived initial or final energy is negative; the
/// `spectrum`/`bin` indices are carried into the error.
pub fn wavenumbers(
    emode: EMode,
    efixed: f64,
    delta_e: f64,
    spectrum: usize,
    bin: usize,
) -> Result<(f64, f64)> {
    let (ei, ef) = match emode {
        EMode::Direct => (efixed, efixed - delta_e),
        EMode::Indirect => (efixed + delta_e, efixed),
        EMode::Elastic => {
            return Err(Error::ConfigError(
                "energy transfer requires Direct or Indirect mode".to_string(),
            ))
        }
    };
    if ef < 0.0 {
        return Err(Error::NegativeEnergy {
            kind: "final",
            energy: ef,
            spectrum,
            bin,
        });
    }
    if ei < 0.0 {
        return Err(Error::NegativeEnergy {
            kind: "initial",
            energy: ei,
            spectrum,
            bin,
        });
    }
    Ok((wavenumber_from_energy(ei), wavenumber_from_energy(ef)))
}

/// Momentum transfer |Q| for energy transfer `delta_e` at scattering angle
/// `two_theta` (radians).
pub fn momentum_transfer(
    emode: EMode,
    efixed: f64,
    delta_e: f64,
    two_theta: f64,
    spectrum: usize,
    bin: usize,
) -> Result<f64> {
    let (ki, kf) = wavenumbers(emode, efixed, delta_e, spectrum, bin)?;
    let q_sq = ki * ki + kf * kf - 2.0 * ki * kf * two_theta.cos();
    // Rounding can push forward scattering a hair below zero.
    Ok(q_sq.max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wavenumber_conversions() {
        assert_relative_eq!(wavenumber_from_wavelength(2.0 * PI), 1.0);
        // 81.8 meV <-> 1 Angstrom
        let k = wavenumber_from_energy(81.804_2);
        assert_relative_eq!(k, 2.0 * PI, max_relative = 1e-5);
    }

    #[test]
    fn test_elastic_q_matches_bragg() {
        // Elastic scattering: Q = 2 k sin(theta)
        let efixed = 25.0;
        let two_theta = 60.0_f64.to_radians();
        let q = momentum_transfer(EMode::Direct, efixed, 0.0, two_theta, 0, 0).unwrap();
        let k = wavenumber_from_energy(efixed);
        assert_relative_eq!(q, 2.0 * k * (two_theta / 2.0).sin(), max_relative = 1e-12);
    }

    #[test]
    fn test_direct_mode_negative_final_energy() {
        let err = wavenumbers(EMode::Direct, 10.0, 12.0, 3, 7).unwrap_err();
        assert_eq!(
            err,
            Error::NegativeEnergy {
                kind: "final",
                energy: -2.0,
                spectrum: 3,
                bin: 7
            }
        );
    }

    #[test]
    fn test_indirect_mode_negative_initial_energy() {
        let err = wavenumbers(EMode::Indirect, 1.8, -3.0, 0, 1).unwrap_err();
        assert!(matches!(err, Error::NegativeEnergy { kind: "initial", .. }));
    }

    #[test]
    fn test_elastic_mode_rejected() {
        assert!(matches!(
            wavenumbers(EMode::Elastic, 10.0, 0.0, 0, 0),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_emode_parse() {
        assert_eq!("Direct".parse::<EMode>().unwrap(), EMode::Direct);
        assert_eq!("indirect".parse::<EMode>().unwrap(), EMode::Indirect);
        assert!("inverse".parse::<EMode>().is_err());
    }
}
