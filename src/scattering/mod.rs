//! Per-bin scattering dispatch
//!
//! A [`ScatteringProvider`] turns one immutable [`ScatteringPayload`] into
//! the amplitude (S) and phase (Z) matrices of a single particle. The
//! [`ScatteringComputer`] fans a diameter grid out over a bounded rayon pool,
//! one task per bin and geometry, and reassembles the results in diameter
//! order.

mod rayleigh;

pub use rayleigh::RayleighSpheroid;

use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use num_complex::Complex64;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::RadsimError;

/// Incidence/scattering angles in degrees, in the order
/// `(theta0, theta, phi0, phi, alpha, beta)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub theta0: f64,
    pub theta: f64,
    pub phi0: f64,
    pub phi: f64,
    /// Particle Euler angles, used when no orientation averaging applies
    pub alpha: f64,
    pub beta: f64,
}

impl Geometry {
    /// Backscattering towards a radar looking at `elevation` degrees
    pub fn backward(elevation: f64) -> Self {
        let zenith = 90.0 - elevation;
        Self {
            theta0: zenith,
            theta: 180.0 - zenith,
            phi0: 0.0,
            phi: 180.0,
            alpha: 0.0,
            beta: 0.0,
        }
    }

    pub fn forward(elevation: f64) -> Self {
        let zenith = 90.0 - elevation;
        Self {
            theta0: zenith,
            theta: zenith,
            phi0: 0.0,
            phi: 0.0,
            alpha: 0.0,
            beta: 0.0,
        }
    }
}

/// Everything a provider needs for one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringPayload {
    /// [mm]
    pub wavelength: f64,
    /// Standard deviation of the Gaussian canting distribution [deg]
    pub orientation_std: f64,
    pub refractive_index: Complex64,
    /// Horizontal over vertical axis length
    pub axis_ratio: f64,
    /// Equal-volume sphere radius [mm]
    pub radius: f64,
    pub geometry: Geometry,
}

/// Amplitude matrix `S` (2x2 complex, row-major) and phase matrix `Z`
/// (4x4 real, row-major). Index 0 is the vertical channel, 1 horizontal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringMatrices {
    pub s: [Complex64; 4],
    pub z: [f64; 16],
}

impl ScatteringMatrices {
    pub fn zero() -> Self {
        Self {
            s: [Complex64::new(0.0, 0.0); 4],
            z: [0.0; 16],
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = *self;
        out.s.iter_mut().for_each(|v| *v *= factor);
        out.z.iter_mut().for_each(|v| *v *= factor);
        out
    }
}

impl Default for ScatteringMatrices {
    fn default() -> Self {
        Self::zero()
    }
}

impl AddAssign for ScatteringMatrices {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.s.iter_mut().zip(rhs.s) {
            *a += b;
        }
        for (a, b) in self.z.iter_mut().zip(rhs.z) {
            *a += b;
        }
    }
}

impl Add for ScatteringMatrices {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

/// Phase matrix of a single scatterer from its amplitude matrix
pub fn phase_matrix(s: &[Complex64; 4]) -> [f64; 16] {
    let [s00, s01, s10, s11] = *s;
    let (a00, a01, a10, a11) = (s00.norm_sqr(), s01.norm_sqr(), s10.norm_sqr(), s11.norm_sqr());
    [
        0.5 * (a00 + a01 + a10 + a11),
        0.5 * (a00 - a01 + a10 - a11),
        -(s00 * s01.conj() + s11 * s10.conj()).re,
        -(s00 * s01.conj() - s11 * s10.conj()).im,
        0.5 * (a00 + a01 - a10 - a11),
        0.5 * (a00 - a01 - a10 + a11),
        -(s00 * s01.conj() - s11 * s10.conj()).re,
        -(s00 * s01.conj() + s11 * s10.conj()).im,
        -(s00 * s10.conj() + s11 * s01.conj()).re,
        -(s00 * s10.conj() - s11 * s01.conj()).re,
        (s00 * s11.conj() + s01 * s10.conj()).re,
        (s00 * s11.conj() + s10 * s01.conj()).im,
        (s10 * s00.conj() + s11 * s01.conj()).im,
        (s10 * s00.conj() - s11 * s01.conj()).im,
        (s11 * s00.conj() - s01 * s10.conj()).im,
        (s11 * s00.conj() - s01 * s10.conj()).re,
    ]
}

/// Orientation-averaged single-particle scattering
pub trait ScatteringProvider: Send + Sync {
    fn name(&self) -> &str;

    fn scatter(&self, payload: &ScatteringPayload) -> Result<ScatteringMatrices, RadsimError>;
}

/// Particle description of one diameter bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinParticle {
    /// [mm]
    pub diameter: f64,
    pub axis_ratio: f64,
    pub refractive_index: Complex64,
}

/// Per-bin results in diameter-ascending order: `s` from the forward
/// geometry, `z` from the backward geometry
#[derive(Debug, Clone, Default)]
pub struct BinnedScattering {
    pub s: Vec<[Complex64; 4]>,
    pub z: Vec<[f64; 16]>,
}

impl BinnedScattering {
    pub fn len(&self) -> usize {
        self.s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }
}

#[derive(Clone)]
pub struct ScatteringComputer {
    provider: Arc<dyn ScatteringProvider>,
    pool: Arc<ThreadPool>,
}

impl ScatteringComputer {
    /// `workers = 0` sizes the pool to the available hardware threads
    pub fn new(provider: Arc<dyn ScatteringProvider>, workers: usize) -> Result<Self, RadsimError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("radsim-scatter-{idx}"))
            .build()
            .map_err(|err| RadsimError::Scattering(format!("cannot start worker pool: {err}")))?;
        Ok(Self {
            provider,
            pool: Arc::new(pool),
        })
    }

    pub fn rayleigh(workers: usize) -> Result<Self, RadsimError> {
        Self::new(Arc::new(RayleighSpheroid::default()), workers)
    }

    pub fn provider(&self) -> &dyn ScatteringProvider {
        self.provider.as_ref()
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Scatter every bin at both geometries
    pub fn compute(
        &self,
        wavelength: f64,
        orientation_std: f64,
        elevation: f64,
        bins: &[BinParticle],
    ) -> Result<BinnedScattering, RadsimError> {
        let backward = Geometry::backward(elevation);
        let forward = Geometry::forward(elevation);
        let provider = self.provider.as_ref();

        debug!(
            provider = provider.name(),
            bins = bins.len(),
            workers = self.workers(),
            "dispatching scattering tasks"
        );

        let results: Vec<([Complex64; 4], [f64; 16])> = self.pool.install(|| {
            bins.par_iter()
                .map(|bin| -> Result<_, RadsimError> {
                    let payload = |geometry: Geometry| ScatteringPayload {
                        wavelength,
                        orientation_std,
                        refractive_index: bin.refractive_index,
                        axis_ratio: bin.axis_ratio,
                        radius: bin.diameter / 2.0,
                        geometry,
                    };
                    let back = provider.scatter(&payload(backward))?;
                    let forw = provider.scatter(&payload(forward))?;
                    Ok((forw.s, back.z))
                })
                .collect::<Result<Vec<_>, RadsimError>>()
        })?;

        let (s, z) = results.into_iter().unzip();
        Ok(BinnedScattering { s, z })
    }
}

impl fmt::Debug for ScatteringComputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatteringComputer")
            .field("provider", &self.provider.name())
            .field("workers", &self.workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes the payload into the output so ordering can be checked
    struct EchoProvider;

    impl ScatteringProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn scatter(&self, payload: &ScatteringPayload) -> Result<ScatteringMatrices, RadsimError> {
            let mut out = ScatteringMatrices::zero();
            out.s[0] = Complex64::new(payload.radius, payload.geometry.phi);
            out.z[0] = payload.radius;
            out.z[1] = payload.geometry.phi;
            Ok(out)
        }
    }

    #[test]
    fn test_geometries_follow_elevation() {
        let back = Geometry::backward(10.0);
        assert_eq!((back.theta0, back.theta, back.phi0, back.phi), (80.0, 100.0, 0.0, 180.0));
        let forw = Geometry::forward(10.0);
        assert_eq!((forw.theta0, forw.theta, forw.phi0, forw.phi), (80.0, 80.0, 0.0, 0.0));
    }

    #[test]
    fn test_results_keep_diameter_order_and_geometry_roles() {
        let computer = ScatteringComputer::new(Arc::new(EchoProvider), 4).unwrap();
        let bins: Vec<BinParticle> = (1..=64)
            .map(|i| BinParticle {
                diameter: i as f64 * 0.1,
                axis_ratio: 1.0,
                refractive_index: Complex64::new(1.5, 0.0),
            })
            .collect();
        let out = computer.compute(53.5, 10.0, 0.0, &bins).unwrap();
        assert_eq!(out.len(), 64);
        for (i, bin) in bins.iter().enumerate() {
            assert_eq!(out.s[i][0].re, bin.diameter / 2.0);
            // S comes from the forward call, Z from the backward call
            assert_eq!(out.s[i][0].im, 0.0);
            assert_eq!(out.z[i][1], 180.0);
        }
    }

    #[test]
    fn test_phase_matrix_of_sphere_backscatter() {
        let a = Complex64::new(0.3, 0.1);
        let z = phase_matrix(&[a, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), -a]);
        let power = a.norm_sqr();
        assert!((z[0] - power).abs() < 1e-15);
        assert!((z[5] - power).abs() < 1e-15);
        assert!(z[1].abs() < 1e-15);
        assert!((z[10] + power).abs() < 1e-15);
        assert!((z[15] + power).abs() < 1e-15);
    }

    #[test]
    fn test_matrices_accumulate() {
        let mut acc = ScatteringMatrices::zero();
        let mut one = ScatteringMatrices::zero();
        one.s[3] = Complex64::new(1.0, 2.0);
        one.z[15] = 3.0;
        acc += one;
        let sum = acc + one.scaled(2.0);
        assert_eq!(sum.s[3], Complex64::new(3.0, 6.0));
        assert_eq!(sum.z[15], 9.0);
    }
}
