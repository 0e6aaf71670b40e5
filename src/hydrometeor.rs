//! Hydrometeor populations
//!
//! A [`Hydrometeor`] couples one PSD with the particle laws (aspect ratio,
//! refractive index, canting) and the physical context of its box. Per-bin
//! scattering and the PSD-integrated matrices are memoized under content
//! hashes, so repeated reads after an `update` that did not change the
//! physics never reach the scattering provider.

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constants::wavelength_mm;
use crate::grid::{trapz, trapz_complex};
use crate::model::FunctionalModel;
use crate::polarimetry::{derive, PolarimetricVariables};
use crate::psd::Psd;
use crate::scattering::{BinParticle, BinnedScattering, ScatteringComputer, ScatteringMatrices};
use crate::RadsimError;

/// Particle description of one hydrometeor class
#[derive(Debug, Clone)]
pub struct HydrometeorSpec {
    pub psd: Psd,
    pub aspect_ratio: FunctionalModel,
    /// [deg]
    pub canting_angle_std: f64,
    pub permittivity: FunctionalModel,
}

/// Box-level context a hydrometeor is simulated in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    /// [GHz]
    pub frequency: f64,
    /// [K]
    pub temperature: f64,
    /// [deg]
    pub elevation_angle: f64,
    pub nbins_d: usize,
}

/// Every input the per-bin scattering depends on
#[derive(Debug, Clone, PartialEq)]
pub struct ScatteringSignature {
    pub dmin: f64,
    pub dmax: f64,
    pub aspect_ratio: String,
    pub canting_angle_std: f64,
    pub permittivity: String,
    pub elevation_angle: f64,
    pub temperature: f64,
    pub frequency: f64,
    pub nbins_d: usize,
}

impl ScatteringSignature {
    /// Canonical, unambiguous rendering of the signature
    pub fn canonical(&self) -> String {
        format!(
            "dmin={:?}\u{1f}dmax={:?}\u{1f}ar={}\u{1f}cant={:?}\u{1f}m={}\u{1f}elev={:?}\u{1f}T={:?}\u{1f}F={:?}\u{1f}n={}",
            self.dmin,
            self.dmax,
            self.aspect_ratio,
            self.canting_angle_std,
            self.permittivity,
            self.elevation_angle,
            self.temperature,
            self.frequency,
            self.nbins_d
        )
    }

    /// SHA-256 of the canonical rendering, hex encoded
    pub fn key(&self) -> String {
        content_hash(&[self.canonical().as_bytes()])
    }
}

fn content_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
struct CachedScattering {
    key: String,
    diameters: Arc<Vec<f64>>,
    bins: Arc<BinnedScattering>,
}

#[derive(Debug, Clone)]
struct CachedIntegral {
    key: String,
    value: ScatteringMatrices,
}

#[derive(Debug, Clone)]
pub struct Hydrometeor {
    name: String,
    spec: HydrometeorSpec,
    env: Environment,
    computer: ScatteringComputer,
    scattering: Option<CachedScattering>,
    integrated: Option<CachedIntegral>,
    provider_runs: usize,
}

impl Hydrometeor {
    pub fn new(
        name: impl Into<String>,
        spec: HydrometeorSpec,
        env: Environment,
        computer: ScatteringComputer,
    ) -> Self {
        Self {
            name: name.into(),
            spec,
            env,
            computer,
            scattering: None,
            integrated: None,
            provider_runs: 0,
        }
    }

    /// Replace every physical input; caches are checked on the next read
    pub fn update(&mut self, spec: HydrometeorSpec, env: Environment) {
        self.spec = spec;
        self.env = env;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &HydrometeorSpec {
        &self.spec
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Number of times the per-bin scattering has been (re)computed
    pub fn provider_runs(&self) -> usize {
        self.provider_runs
    }

    pub fn signature(&self) -> ScatteringSignature {
        ScatteringSignature {
            dmin: self.spec.psd.dmin(),
            dmax: self.spec.psd.dmax(),
            aspect_ratio: self.spec.aspect_ratio.canonical(),
            canting_angle_std: self.spec.canting_angle_std,
            permittivity: self.spec.permittivity.canonical(),
            elevation_angle: self.env.elevation_angle,
            temperature: self.env.temperature,
            frequency: self.env.frequency,
            nbins_d: self.env.nbins_d,
        }
    }

    fn check_grid(&self) -> Result<(), RadsimError> {
        if self.env.nbins_d < 2 {
            return Err(RadsimError::InvalidConfig(format!(
                "hydrometeor '{}': nbins_d must be at least 2, got {}",
                self.name, self.env.nbins_d
            )));
        }
        Ok(())
    }

    /// Per-bin amplitude and phase matrices, recomputed only when the
    /// scattering signature changed
    pub fn compute_sz(&mut self) -> Result<Arc<BinnedScattering>, RadsimError> {
        Ok(self.scattering()?.bins)
    }

    /// Diameter grid [mm] of the current scattering result
    pub fn diameters(&mut self) -> Result<Arc<Vec<f64>>, RadsimError> {
        Ok(self.scattering()?.diameters)
    }

    fn scattering(&mut self) -> Result<CachedScattering, RadsimError> {
        self.check_grid()?;
        let key = self.signature().key();
        if let Some(cached) = &self.scattering {
            if cached.key == key {
                debug!(hydrometeor = %self.name, "scattering cache hit");
                return Ok(cached.clone());
            }
        }

        let diameters = self.spec.psd.diameter_grid(self.env.nbins_d);
        let (temperature, frequency) = (self.env.temperature, self.env.frequency);
        let axis_ratios = self.spec.aspect_ratio.evaluate_grid(&diameters, temperature, frequency);
        let indices = self.spec.permittivity.evaluate_grid(&diameters, temperature, frequency);

        let bins: Vec<BinParticle> = diameters
            .iter()
            .zip(axis_ratios.iter().zip(&indices))
            .map(|(&diameter, (axis_ratio, &refractive_index))| BinParticle {
                diameter,
                axis_ratio: axis_ratio.re,
                refractive_index,
            })
            .collect();

        debug!(
            hydrometeor = %self.name,
            bins = bins.len(),
            "scattering cache miss, recomputing"
        );
        let result = self.computer.compute(
            wavelength_mm(frequency),
            self.spec.canting_angle_std,
            self.env.elevation_angle,
            &bins,
        )?;
        self.provider_runs += 1;

        let cached = CachedScattering {
            key,
            diameters: Arc::new(diameters),
            bins: Arc::new(result),
        };
        self.scattering = Some(cached.clone());
        Ok(cached)
    }

    /// S and Z integrated over the PSD on the scattering grid
    pub fn integrate_sz(&mut self) -> Result<ScatteringMatrices, RadsimError> {
        let CachedScattering {
            key: scattering_key,
            diameters,
            bins,
        } = self.scattering()?;

        let psd_form = self.spec.psd.canonical();
        let key = content_hash(&[scattering_key.as_bytes(), psd_form.as_bytes()]);
        if let Some(cached) = &self.integrated {
            if cached.key == key {
                return Ok(cached.value);
            }
        }

        let n = self.spec.psd.evaluate_grid(&diameters, self.env.temperature);
        let step = diameters[1] - diameters[0];

        let mut value = ScatteringMatrices::zero();
        for (component, slot) in value.s.iter_mut().enumerate() {
            let weighted: Vec<Complex64> = bins
                .s
                .iter()
                .zip(&n)
                .map(|(s, &count)| s[component] * count)
                .collect();
            *slot = trapz_complex(&weighted, step);
        }
        for (component, slot) in value.z.iter_mut().enumerate() {
            let weighted: Vec<f64> = bins
                .z
                .iter()
                .zip(&n)
                .map(|(z, &count)| z[component] * count)
                .collect();
            *slot = trapz(&weighted, step);
        }

        self.integrated = Some(CachedIntegral { key, value });
        Ok(value)
    }

    /// Radar variables of this population alone
    pub fn pol_vars(&mut self) -> Result<PolarimetricVariables, RadsimError> {
        let integrated = self.integrate_sz()?;
        Ok(derive(&integrated.s, &integrated.z, self.env.frequency))
    }
}

impl fmt::Display for Hydrometeor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hydrometeor name: {}", self.name)?;
        writeln!(f, "PSD:")?;
        for line in self.spec.psd.to_string().lines() {
            writeln!(f, "   {line}")?;
        }
        writeln!(f, "Aspect ratio: {}", self.spec.aspect_ratio)?;
        writeln!(f, "Canting angle std: {}", self.spec.canting_angle_std)?;
        writeln!(f, "Permittivity: {}", self.spec.permittivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scattering::{ScatteringPayload, ScatteringProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and returns matrices proportional to the radius
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl ScatteringProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn scatter(&self, payload: &ScatteringPayload) -> Result<ScatteringMatrices, RadsimError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = ScatteringMatrices::zero();
            let r = payload.radius;
            out.s[0] = Complex64::new(r, 0.01 * r);
            out.s[3] = Complex64::new(1.1 * r, 0.02 * r);
            out.z[0] = r * r * payload.refractive_index.re;
            out.z[5] = r * r;
            out.z[10] = -0.9 * r * r;
            out.z[15] = -0.9 * r * r;
            Ok(out)
        }
    }

    fn spec() -> HydrometeorSpec {
        HydrometeorSpec {
            psd: Psd::exponential(1000.0, 2.0, 0.1, 5.0).unwrap(),
            aspect_ratio: FunctionalModel::real_constant(1.1),
            canting_angle_std: 10.0,
            permittivity: FunctionalModel::real_constant(2.0),
        }
    }

    fn env() -> Environment {
        Environment {
            frequency: 5.6,
            temperature: 283.0,
            elevation_angle: 0.0,
            nbins_d: 16,
        }
    }

    fn hydrometeor(provider: Arc<CountingProvider>) -> Hydrometeor {
        let computer = ScatteringComputer::new(provider, 2).unwrap();
        Hydrometeor::new("rain", spec(), env(), computer)
    }

    #[test]
    fn test_compute_sz_is_idempotent() {
        let provider = Arc::new(CountingProvider::default());
        let mut h = hydrometeor(Arc::clone(&provider));

        let first = h.compute_sz().unwrap();
        let calls = provider.calls.load(Ordering::SeqCst);
        // two geometries per bin
        assert_eq!(calls, 2 * 16);

        let second = h.compute_sz().unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
        assert_eq!(h.provider_runs(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_update_without_physical_change_hits_cache() {
        let provider = Arc::new(CountingProvider::default());
        let mut h = hydrometeor(Arc::clone(&provider));
        h.compute_sz().unwrap();

        // a different PSD amplitude changes the integral, not the scattering
        let mut next = spec();
        next.psd = &next.psd * 2.0;
        h.update(next, env());
        let before = h.integrate_sz().unwrap();
        assert_eq!(h.provider_runs(), 1);

        h.update(spec(), env());
        let after = h.integrate_sz().unwrap();
        assert_eq!(h.provider_runs(), 1);
        assert!((before.z[0] - 2.0 * after.z[0]).abs() < 1e-9 * before.z[0].abs());
    }

    #[test]
    fn test_signature_change_recomputes() {
        let provider = Arc::new(CountingProvider::default());
        let mut h = hydrometeor(Arc::clone(&provider));
        let cold = h.integrate_sz().unwrap();

        let mut warm_env = env();
        warm_env.temperature = 293.0;
        h.update(spec(), warm_env);
        h.compute_sz().unwrap();
        assert_eq!(h.provider_runs(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4 * 16);

        let mut wetter = spec();
        wetter.permittivity = FunctionalModel::real_constant(3.0);
        h.update(wetter, warm_env);
        let wet = h.integrate_sz().unwrap();
        assert_eq!(h.provider_runs(), 3);
        assert!(wet.z[0] > cold.z[0]);
    }

    #[test]
    fn test_signature_key_is_content_based() {
        let provider = Arc::new(CountingProvider::default());
        let with_law = |law: &str| {
            let mut h = hydrometeor(Arc::clone(&provider));
            let mut next = spec();
            next.aspect_ratio =
                FunctionalModel::from_expression(law, &[crate::expression::Var::D]).unwrap();
            h.update(next, env());
            h.signature().key()
        };
        assert_eq!(with_law("1 + 0.05*D").len(), 64);
        assert_eq!(with_law("1 + 0.05*D"), with_law("1+0.05 * D"));
        assert_ne!(with_law("1 + 0.05*D"), with_law("1 + 0.06*D"));
    }

    #[test]
    fn test_integration_matches_trapezoid() {
        let provider = Arc::new(CountingProvider::default());
        let mut h = hydrometeor(provider);
        let integrated = h.integrate_sz().unwrap();

        let grid = spec().psd.diameter_grid(16);
        let values: Vec<f64> = grid
            .iter()
            .map(|&d| (d / 2.0) * (d / 2.0) * spec().psd.evaluate(d, 283.0))
            .collect();
        let expected = trapz(&values, grid[1] - grid[0]);
        assert!((integrated.z[5] - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn test_too_few_bins_is_rejected() {
        let provider = Arc::new(CountingProvider::default());
        let mut h = hydrometeor(provider);
        let mut small = env();
        small.nbins_d = 1;
        h.update(spec(), small);
        assert!(h.compute_sz().is_err());
    }
}
