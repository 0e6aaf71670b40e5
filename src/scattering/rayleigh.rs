//! Small-particle spheroid scattering
//!
//! Dipole approximation for a homogeneous spheroid: the particle is replaced
//! by its polarizability tensor, built from the depolarization factors of
//! the spheroid. Valid while the particle is much smaller than the
//! wavelength, which covers rain at S- and C-band.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::{phase_matrix, Geometry, ScatteringMatrices, ScatteringPayload, ScatteringProvider};
use crate::RadsimError;

type Vec3 = [f64; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayleighSpheroid {
    /// Azimuthal quadrature points, uniform over [0, 360)
    pub alpha_points: usize,
    /// Polar quadrature points, midpoints over [0, 180]
    pub beta_points: usize,
}

impl Default for RayleighSpheroid {
    fn default() -> Self {
        Self {
            alpha_points: 5,
            beta_points: 32,
        }
    }
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Polarization basis `(theta_hat, phi_hat)` of a propagation direction
fn basis(theta_deg: f64, phi_deg: f64) -> (Vec3, Vec3) {
    let (theta, phi) = (theta_deg.to_radians(), phi_deg.to_radians());
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    ([ct * cp, ct * sp, -st], [-sp, cp, 0.0])
}

/// Depolarization factors `(L_perp, L_par)` of a spheroid whose symmetry axis
/// has length `2c` and equatorial axes `2a`
fn depolarization(a: f64, c: f64) -> (f64, f64) {
    let l_par = if (a - c).abs() < 1e-12 * a.max(c) {
        1.0 / 3.0
    } else if a > c {
        // oblate
        let f = ((a / c).powi(2) - 1.0).sqrt();
        (1.0 + f * f) / (f * f) * (1.0 - f.atan() / f)
    } else {
        // prolate
        let e = (1.0 - (a / c).powi(2)).sqrt();
        (1.0 - e * e) / (e * e) * (-1.0 + ((1.0 + e) / (1.0 - e)).ln() / (2.0 * e))
    };
    ((1.0 - l_par) / 2.0, l_par)
}

/// Quadrature nodes `(alpha, beta, weight)` in degrees, weights summing to one
fn orientations(std: f64, alpha_points: usize, beta_points: usize, fixed: &Geometry) -> Vec<(f64, f64, f64)> {
    if std <= 0.0 {
        return vec![(fixed.alpha, fixed.beta, 1.0)];
    }
    let alpha_points = alpha_points.max(1);
    let beta_points = beta_points.max(1);
    let step = 180.0 / beta_points as f64;

    let betas: Vec<(f64, f64)> = (0..beta_points)
        .map(|i| {
            let beta = (i as f64 + 0.5) * step;
            let pdf = (-(beta * beta) / (2.0 * std * std)).exp() * beta.to_radians().sin();
            (beta, pdf)
        })
        .collect();
    let norm: f64 = betas.iter().map(|(_, pdf)| pdf).sum::<f64>() * alpha_points as f64;
    if norm <= 0.0 {
        return vec![(fixed.alpha, 0.0, 1.0)];
    }

    let mut nodes = Vec::with_capacity(alpha_points * beta_points);
    for i in 0..alpha_points {
        let alpha = 360.0 * i as f64 / alpha_points as f64;
        for &(beta, pdf) in &betas {
            nodes.push((alpha, beta, pdf / norm));
        }
    }
    nodes
}

impl RayleighSpheroid {
    fn amplitude(
        &self,
        k2: f64,
        alpha_perp: Complex64,
        alpha_par: Complex64,
        axis: Vec3,
        geometry: &Geometry,
    ) -> [Complex64; 4] {
        let (th_i, ph_i) = basis(geometry.theta0, geometry.phi0);
        let (th_s, ph_s) = basis(geometry.theta, geometry.phi);
        let incident = [th_i, ph_i];
        let scattered = [th_s, ph_s];

        let mut s = [Complex64::new(0.0, 0.0); 4];
        for (p, es) in scattered.iter().enumerate() {
            for (q, ei) in incident.iter().enumerate() {
                // e_s . (a_perp I + (a_par - a_perp) n n^T) . e_i
                let projected = alpha_perp * dot(*es, *ei)
                    + (alpha_par - alpha_perp) * (dot(*es, axis) * dot(axis, *ei));
                s[2 * p + q] = projected * k2;
            }
        }
        s
    }
}

impl ScatteringProvider for RayleighSpheroid {
    fn name(&self) -> &str {
        "rayleigh-spheroid"
    }

    fn scatter(&self, payload: &ScatteringPayload) -> Result<ScatteringMatrices, RadsimError> {
        if !(payload.radius >= 0.0 && payload.wavelength > 0.0 && payload.axis_ratio > 0.0) {
            return Err(RadsimError::Scattering(format!(
                "non-physical particle: radius {} mm, wavelength {} mm, axis ratio {}",
                payload.radius, payload.wavelength, payload.axis_ratio
            )));
        }

        let r = payload.radius;
        let ratio = payload.axis_ratio;
        let a = r * ratio.powf(1.0 / 3.0);
        let c = r / ratio.powf(2.0 / 3.0);
        let (l_perp, l_par) = depolarization(a, c);

        let eps = payload.refractive_index * payload.refractive_index;
        let volume = 4.0 / 3.0 * PI * r.powi(3);
        let polarizability = |l: f64| volume / (4.0 * PI) * (eps - 1.0) / (1.0 + l * (eps - 1.0));
        let (alpha_perp, alpha_par) = (polarizability(l_perp), polarizability(l_par));

        let k = 2.0 * PI / payload.wavelength;
        let k2 = k * k;

        let mut out = ScatteringMatrices::zero();
        let nodes = orientations(
            payload.orientation_std,
            self.alpha_points,
            self.beta_points,
            &payload.geometry,
        );
        for (alpha, beta, weight) in nodes {
            let (sb, cb) = beta.to_radians().sin_cos();
            let (sa, ca) = alpha.to_radians().sin_cos();
            let axis = [sb * ca, sb * sa, cb];
            let s = self.amplitude(k2, alpha_perp, alpha_par, axis, &payload.geometry);
            let z = phase_matrix(&s);
            out += ScatteringMatrices { s, z }.scaled(weight);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn payload(axis_ratio: f64, geometry: Geometry, std: f64) -> ScatteringPayload {
        ScatteringPayload {
            wavelength: 53.5,
            orientation_std: std,
            refractive_index: Complex64::new(8.59, 1.70),
            axis_ratio,
            radius: 1.0,
            geometry,
        }
    }

    #[test]
    fn test_depolarization_factors_sum_to_one() {
        for (a, c) in [(1.0, 1.0), (1.3, 0.8), (0.7, 1.5)] {
            let (perp, par) = depolarization(a, c);
            assert_relative_eq!(2.0 * perp + par, 1.0, epsilon = 1e-12);
        }
        let (_, par) = depolarization(1.3, 0.8);
        assert!(par > 1.0 / 3.0, "oblate spheroids depolarize most along the short axis");
    }

    #[test]
    fn test_sphere_backscatter_matches_dipole_cross_section() {
        let provider = RayleighSpheroid::default();
        let out = provider.scatter(&payload(1.0, Geometry::backward(0.0), 0.0)).unwrap();

        let eps = Complex64::new(8.59, 1.70).powi(2);
        let k = 2.0 * PI / 53.5;
        let expected = k * k * (eps - 1.0) / (eps + 2.0);
        assert_relative_eq!(out.s[0].re, expected.re, max_relative = 1e-10);
        assert_relative_eq!(out.s[3].re, -expected.re, max_relative = 1e-10);
        assert!(out.s[1].norm() < 1e-15 && out.s[2].norm() < 1e-15);
        // sigma_h == sigma_v for a sphere
        let z = out.z;
        assert_relative_eq!(z[0] - z[1] - z[4] + z[5], z[0] + z[1] + z[4] + z[5], max_relative = 1e-12);
    }

    #[test]
    fn test_oblate_drop_favours_horizontal_channel() {
        let provider = RayleighSpheroid::default();
        let forw = provider.scatter(&payload(1.3, Geometry::forward(0.0), 0.0)).unwrap();
        // S11 (horizontal) exceeds S00 (vertical) in forward direction
        assert!(forw.s[3].re > forw.s[0].re);

        let back = provider.scatter(&payload(1.3, Geometry::backward(0.0), 0.0)).unwrap();
        let z = back.z;
        let sigma_h = z[0] - z[1] - z[4] + z[5];
        let sigma_v = z[0] + z[1] + z[4] + z[5];
        assert!(sigma_h > sigma_v);
    }

    #[test]
    fn test_canting_reduces_anisotropy() {
        let provider = RayleighSpheroid::default();
        let zdr = |std: f64| {
            let z = provider.scatter(&payload(1.3, Geometry::backward(0.0), std)).unwrap().z;
            (z[0] - z[1] - z[4] + z[5]) / (z[0] + z[1] + z[4] + z[5])
        };
        let aligned = zdr(0.0);
        let canted = zdr(30.0);
        assert!(canted < aligned && canted > 1.0, "aligned {aligned}, canted {canted}");
    }

    #[test]
    fn test_orientation_weights_are_normalized() {
        let fixed = Geometry::backward(0.0);
        let nodes = orientations(10.0, 5, 32, &fixed);
        assert_eq!(nodes.len(), 160);
        let total: f64 = nodes.iter().map(|n| n.2).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_negative_radius() {
        let mut bad = payload(1.0, Geometry::forward(0.0), 0.0);
        bad.radius = -1.0;
        assert!(RayleighSpheroid::default().scatter(&bad).is_err());
    }
}
