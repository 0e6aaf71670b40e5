//! Uniform grids and trapezoidal quadrature

use num_complex::Complex64;

/// `n` evenly spaced points over `[start, end]`, endpoints included
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|idx| if idx == n - 1 { end } else { start + step * idx as f64 })
                .collect()
        }
    }
}

/// Trapezoidal rule with constant spacing `dx`
pub fn trapz(values: &[f64], dx: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let inner: f64 = values[1..values.len() - 1].iter().sum();
    dx * (inner + 0.5 * (values[0] + values[values.len() - 1]))
}

pub fn trapz_complex(values: &[Complex64], dx: f64) -> Complex64 {
    if values.len() < 2 {
        return Complex64::new(0.0, 0.0);
    }
    let inner: Complex64 = values[1..values.len() - 1].iter().sum();
    (inner + (values[0] + values[values.len() - 1]) * 0.5) * dx
}
