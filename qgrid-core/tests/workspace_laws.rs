use approx::assert_relative_eq;
use qgrid_core::polygon::{overlap_area, ClipBuffers};
use qgrid_core::{
    check_size_compatibility, divide, minus, plus, Quadrilateral, Rect, Spectrum, Workspace, V2,
};

fn counts(num_spectra: usize, bins: usize, offset: f64) -> Workspace {
    let spectra = (0..num_spectra)
        .map(|i| {
            let x: Vec<f64> = (0..=bins).map(|k| k as f64 * 0.5).collect();
            let y: Vec<f64> = (0..bins).map(|k| offset + (i * bins + k) as f64).collect();
            let e = y.iter().map(|v: &f64| v.sqrt()).collect();
            Spectrum::new(i as i32 + 1, x, y, e).with_detectors([i as i32 + 1])
        })
        .collect();
    Workspace::from_spectra(spectra).unwrap()
}

#[test]
fn test_plus_zeros_is_identity() {
    let a = counts(3, 4, 1.0);
    let zeros = Workspace::zeros(3, 5, 4).unwrap();
    assert_eq!(plus(&a, &zeros).unwrap(), a);
}

#[test]
fn test_minus_self_is_zero_with_grown_errors() {
    let a = counts(2, 3, 4.0);
    let diff = minus(&a, &a).unwrap();
    for index in 0..a.num_spectra() {
        assert_eq!(diff.x(index), a.x(index));
        for (bin, &value) in diff.y(index).iter().enumerate() {
            assert_relative_eq!(value, 0.0);
            assert_relative_eq!(
                diff.e(index)[bin],
                a.e(index)[bin] * 2f64.sqrt(),
                max_relative = 1e-12
            );
        }
    }
}

#[test]
fn test_broadcast_single_spectrum_over_many() {
    let monitor = counts(1, 4, 1.0);
    let data = counts(3, 4, 1.0);
    assert!(check_size_compatibility(&data, &monitor));

    let ratio = divide(&data, &monitor).unwrap();
    assert_eq!(ratio.num_spectra(), 3);
    // Row 0 divides by itself; later rows are shifted by a whole block.
    for bin in 0..4 {
        assert_relative_eq!(ratio.y(0)[bin], 1.0);
        let expected = (5.0 + bin as f64) / (1.0 + bin as f64);
        assert_relative_eq!(ratio.y(1)[bin], expected, max_relative = 1e-12);
    }
}

#[test]
fn test_incompatible_sizes_rejected() {
    let a = counts(1, 4, 1.0);
    let b = counts(1, 3, 1.0);
    assert!(!check_size_compatibility(&a, &b));
    assert!(plus(&a, &b).is_err());
}

#[test]
fn test_clipped_pieces_sum_to_polygon_area() {
    let diamond = Quadrilateral::new(
        V2::new(1.0, 0.0),
        V2::new(2.0, 1.0),
        V2::new(1.0, 2.0),
        V2::new(0.0, 1.0),
    );
    let mut buffers = ClipBuffers::default();
    let mut total = 0.0;
    for i in 0..4 {
        for j in 0..4 {
            let (x, y) = (f64::from(i) * 0.5, f64::from(j) * 0.5);
            let cell = Rect::new(x, x + 0.5, y, y + 0.5);
            total += overlap_area(&diamond, &cell, &mut buffers);
        }
    }
    assert_relative_eq!(total, 2.0, max_relative = 1e-12);
    assert_relative_eq!(diamond.area(), 2.0, max_relative = 1e-12);
}
