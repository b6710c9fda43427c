//! Element-wise arithmetic between workspaces.
//!
//! Operands are broadcast over their flattened signal arrays: the smaller
//! operand is repeated block-wise over the larger one, which requires the
//! larger size to be a whole multiple of the smaller.

use crate::error::{Error, Result};
use crate::histogram::Workspace;

/// Value written into freshly created outputs so untouched cells can be told
/// apart from computed zeros.
pub const OUTPUT_SENTINEL: f64 = f64::EPSILON;

/// True iff `min(a, b) != 0` and `max(a, b) % min(a, b) == 0`, where sizes
/// count signal values.
pub fn check_size_compatibility(lhs: &Workspace, rhs: &Workspace) -> bool {
    sizes_compatible(lhs.size(), rhs.size())
}

/// Size law behind [`check_size_compatibility`].
#[inline]
pub fn sizes_compatible(a: usize, b: usize) -> bool {
    let (small, large) = if a <= b { (a, b) } else { (b, a) };
    small != 0 && large % small == 0
}

/// A workspace shaped like the larger operand (the left one on ties), with
/// every signal and error value set to [`OUTPUT_SENTINEL`].
pub fn create_output_workspace(lhs: &Workspace, rhs: &Workspace) -> Workspace {
    let template = if rhs.size() > lhs.size() { rhs } else { lhs };
    let mut output = template.clone();
    for index in 0..output.num_spectra() {
        output.y_mut(index).fill(OUTPUT_SENTINEL);
        output.e_mut(index).fill(OUTPUT_SENTINEL);
    }
    output
}

/// Applies `op` to each broadcast `(y_a, y_b)` pair. Errors combine in
/// quadrature: `e = sqrt(e_a² + e_b²)`.
pub fn apply_binary<F>(lhs: &Workspace, rhs: &Workspace, op: F) -> Result<Workspace>
where
    F: Fn(f64, f64) -> f64,
{
    if !check_size_compatibility(lhs, rhs) {
        return Err(Error::IncompatibleSizes {
            lhs: lhs.size(),
            rhs: rhs.size(),
        });
    }

    let lhs_y = flatten(lhs, |ws, i| ws.y(i));
    let lhs_e = flatten(lhs, |ws, i| ws.e(i));
    let rhs_y = flatten(rhs, |ws, i| ws.y(i));
    let rhs_e = flatten(rhs, |ws, i| ws.e(i));

    let mut output = create_output_workspace(lhs, rhs);
    let mut k = 0;
    for index in 0..output.num_spectra() {
        let bins = output.spectrum(index).len();
        for bin in 0..bins {
            let (ia, ib) = (k % lhs_y.len(), k % rhs_y.len());
            output.y_mut(index)[bin] = op(lhs_y[ia], rhs_y[ib]);
            output.e_mut(index)[bin] = lhs_e[ia].hypot(rhs_e[ib]);
            k += 1;
        }
    }
    Ok(output)
}

fn flatten<'a>(ws: &'a Workspace, column: impl Fn(&'a Workspace, usize) -> &'a [f64]) -> Vec<f64> {
    (0..ws.num_spectra())
        .flat_map(|i| column(ws, i).iter().copied())
        .collect()
}

/// `lhs + rhs`.
pub fn plus(lhs: &Workspace, rhs: &Workspace) -> Result<Workspace> {
    apply_binary(lhs, rhs, |a, b| a + b)
}

/// `lhs - rhs`.
pub fn minus(lhs: &Workspace, rhs: &Workspace) -> Result<Workspace> {
    apply_binary(lhs, rhs, |a, b| a - b)
}

/// `lhs / rhs`; a zero divisor yields zero.
///
/// Errors use the same quadrature sum as [`plus`]. This ignores the
/// relative-error form of the ratio and is only a fair approximation for
/// small relative errors.
pub fn divide(lhs: &Workspace, rhs: &Workspace) -> Result<Workspace> {
    apply_binary(lhs, rhs, |a, b| if b == 0.0 { 0.0 } else { a / b })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::histogram::Spectrum;
    use approx::assert_abs_diff_eq;

    fn ws(rows: &[(&[f64], &[f64])]) -> Workspace {
        let spectra = rows
            .iter()
            .enumerate()
            .map(|(i, (y, e))| {
                let x: Vec<f64> = (0..=y.len()).map(|k| k as f64).collect();
                Spectrum::new(i as i32 + 1, x, y.to_vec(), e.to_vec())
            })
            .collect();
        Workspace::from_spectra(spectra).unwrap()
    }

    #[test]
    fn test_size_compatibility_law() {
        for a in 1..=12 {
            for b in 1..=12 {
                let divides = a % b == 0 || b % a == 0;
                assert_eq!(sizes_compatible(a, b), divides, "a={a} b={b}");
            }
        }
        assert!(!sizes_compatible(10, 0));
        assert!(!sizes_compatible(0, 10));
        assert!(!sizes_compatible(0, 0));
    }

    #[test]
    fn test_check_size_compatibility_workspaces() {
        let big = ws(&[(&[1.0, 2.0], &[0.0, 0.0]), (&[3.0, 4.0], &[0.0, 0.0])]);
        let small = ws(&[(&[1.0, 2.0], &[0.0, 0.0])]);
        let odd = ws(&[(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0])]);
        assert!(check_size_compatibility(&big, &small));
        assert!(!check_size_compatibility(&big, &odd));
    }

    #[test]
    fn test_create_output_workspace_sentinel() {
        let big = ws(&[(&[1.0, 2.0], &[1.0, 1.0]), (&[3.0, 4.0], &[1.0, 1.0])]);
        let small = ws(&[(&[1.0, 2.0], &[1.0, 1.0])]);
        let out = create_output_workspace(&small, &big);
        assert_eq!(out.num_spectra(), 2);
        assert!(out.y(1).iter().all(|&v| v == OUTPUT_SENTINEL));
        assert!(out.e(0).iter().all(|&v| v == OUTPUT_SENTINEL));
        assert_ne!(out.y(0)[0], 0.0);
    }

    #[test]
    fn test_plus_zero_is_identity() {
        let a = ws(&[(&[1.5, -2.0, 7.25], &[0.5, 1.0, 2.0])]);
        let zero = ws(&[(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0])]);
        let sum = plus(&a, &zero).unwrap();
        assert_eq!(sum.y(0), a.y(0));
        assert_eq!(sum.e(0), a.e(0));
        assert_eq!(sum.x(0), a.x(0));
    }

    #[test]
    fn test_minus_and_divide_errors_in_quadrature() {
        let a = ws(&[(&[10.0, 6.0], &[3.0, 0.0])]);
        let b = ws(&[(&[4.0, 0.0], &[4.0, 1.0])]);
        let diff = minus(&a, &b).unwrap();
        assert_eq!(diff.y(0), &[6.0, 6.0]);
        assert_abs_diff_eq!(diff.e(0)[0], 5.0);

        let ratio = divide(&a, &b).unwrap();
        assert_abs_diff_eq!(ratio.y(0)[0], 2.5);
        assert_eq!(ratio.y(0)[1], 0.0);
        assert_abs_diff_eq!(ratio.e(0)[0], 5.0);
        assert_abs_diff_eq!(ratio.e(0)[1], 1.0);
    }

    #[test]
    fn test_broadcast_repeats_smaller_operand() {
        let big = ws(&[(&[1.0, 2.0], &[0.0, 0.0]), (&[3.0, 4.0], &[0.0, 0.0])]);
        let small = ws(&[(&[10.0, 20.0], &[0.0, 0.0])]);
        let sum = plus(&big, &small).unwrap();
        assert_eq!(sum.y(0), &[11.0, 22.0]);
        assert_eq!(sum.y(1), &[13.0, 24.0]);
        let flipped = plus(&small, &big).unwrap();
        assert_eq!(flipped.y(1), &[13.0, 24.0]);
    }

    #[test]
    fn test_incompatible_sizes_rejected() {
        let a = ws(&[(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0])]);
        let b = ws(&[(&[1.0, 2.0], &[0.0, 0.0])]);
        assert!(matches!(
            plus(&a, &b),
            Err(Error::IncompatibleSizes { lhs: 3, rhs: 2 })
        ));
    }
}
