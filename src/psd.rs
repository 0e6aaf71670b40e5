//! Particle size distributions
//!
//! A [`Psd`] is a functional model of diameter (and temperature) restricted
//! to a diameter domain `[dmin, dmax]`. Number concentrations are in
//! mm^-1 m^-3 with diameters in mm.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde_yaml::Value;
use statrs::function::gamma::gamma;
use tracing::warn;

use crate::constants::{
    intercept_to_mm, mass_prefactor_to_mm, n0_rain_si, n0_snow, AM_G, AM_R, AM_S, BM_G, BM_R,
    BM_S, MU_G, MU_R, MU_S, N0_G_SI,
};
use crate::expression::Var;
use crate::grid::{linspace, trapz};
use crate::interp::{BinnedLaw, Interpolation};
use crate::model::{FunctionalModel, Law, ModelInput};
use crate::RadsimError;

/// Default diameter domain [mm] for closed-form families
pub const DEFAULT_DMIN: f64 = 0.0;
pub const DEFAULT_DMAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsdKind {
    Exponential,
    NormalizedGamma,
    UnnormalizedGamma,
    Binned,
    CosmoRain,
    CosmoSnow,
    CosmoGraupel,
    Custom,
}

impl PsdKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Exponential => "ExponentialPSD",
            Self::NormalizedGamma => "NormalizedGammaPSD",
            Self::UnnormalizedGamma => "UnnormalizedGammaPSD",
            Self::Binned => "BinnedPSD",
            Self::CosmoRain => "COSMO_1mom_rain",
            Self::CosmoSnow => "COSMO_1mom_snow",
            Self::CosmoGraupel => "COSMO_1mom_graupel",
            Self::Custom => "custom",
        }
    }
}

/// Closed-form PSD families
#[derive(Debug, Clone, PartialEq)]
pub enum PsdLaw {
    /// N0 exp(-lambda D)
    Exponential { n0: f64, lambda: f64 },
    /// Testud et al. (2001) normalised gamma
    NormalizedGamma { nw: f64, d0: f64, mu: f64 },
    /// N0 D^mu exp(-lambda D)
    UnnormalizedGamma { n0: f64, lambda: f64, mu: f64 },
    /// COSMO one-moment rain from a mass content [kg m^-3]
    CosmoRain { q: f64 },
    /// COSMO one-moment snow; the intercept depends on temperature, taken
    /// from the evaluation temperature unless fixed here
    CosmoSnow { q: f64, temperature: Option<f64> },
    /// COSMO one-moment graupel
    CosmoGraupel { q: f64 },
}

/// Slope of a one-moment gamma PSD holding mass content `q`, from
/// q = am N0 Gamma(bm + mu + 1) / lambda^(bm + mu + 1); each species uses its
/// own mass-diameter relation and shape
fn one_moment_slope(am: f64, bm: f64, mu: f64, n0: f64, q: f64) -> f64 {
    let exponent = bm + mu + 1.0;
    (am * n0 * gamma(exponent) / q).powf(1.0 / exponent)
}

fn gamma_shape(n0: f64, mu: f64, lambda: f64, d: f64) -> f64 {
    n0 * d.powf(mu) * (-lambda * d).exp()
}

impl PsdLaw {
    pub fn evaluate(&self, d: f64, temperature: f64) -> f64 {
        match *self {
            Self::Exponential { n0, lambda } => n0 * (-lambda * d).exp(),
            Self::NormalizedGamma { nw, d0, mu } => {
                let f = 6.0 / 3.67_f64.powi(4) * (3.67 + mu).powf(mu + 4.0) / gamma(mu + 4.0);
                let lambda = (3.67 + mu) / d0;
                nw * f * (d / d0).powf(mu) * (-lambda * d).exp()
            }
            Self::UnnormalizedGamma { n0, lambda, mu } => gamma_shape(n0, mu, lambda, d),
            Self::CosmoRain { q } => {
                let n0 = intercept_to_mm(n0_rain_si(), MU_R);
                let am = mass_prefactor_to_mm(AM_R, BM_R);
                let lambda = one_moment_slope(am, BM_R, MU_R, n0, q);
                gamma_shape(n0, MU_R, lambda, d)
            }
            Self::CosmoSnow { q, temperature: fixed } => {
                let n0 = n0_snow(fixed.unwrap_or(temperature));
                let am = mass_prefactor_to_mm(AM_S, BM_S);
                let lambda = one_moment_slope(am, BM_S, MU_S, n0, q);
                gamma_shape(n0, MU_S, lambda, d)
            }
            Self::CosmoGraupel { q } => {
                let n0 = intercept_to_mm(N0_G_SI, MU_G);
                let am = mass_prefactor_to_mm(AM_G, BM_G);
                let lambda = one_moment_slope(am, BM_G, MU_G, n0, q);
                gamma_shape(n0, MU_G, lambda, d)
            }
        }
    }

    pub fn kind(&self) -> PsdKind {
        match self {
            Self::Exponential { .. } => PsdKind::Exponential,
            Self::NormalizedGamma { .. } => PsdKind::NormalizedGamma,
            Self::UnnormalizedGamma { .. } => PsdKind::UnnormalizedGamma,
            Self::CosmoRain { .. } => PsdKind::CosmoRain,
            Self::CosmoSnow { .. } => PsdKind::CosmoSnow,
            Self::CosmoGraupel { .. } => PsdKind::CosmoGraupel,
        }
    }

    pub fn canonical(&self) -> String {
        format!("psd({self:?})")
    }

    fn expression(&self) -> String {
        match *self {
            Self::Exponential { n0, lambda } => format!("{n0} * exp(-{lambda}*D)"),
            Self::NormalizedGamma { nw, d0, mu } => {
                format!("{nw} * f({mu}) * (D/{d0})**{mu} * exp(-{}/{d0} * D)", 3.67 + mu)
            }
            Self::UnnormalizedGamma { n0, lambda, mu } => {
                format!("{n0} * D**{mu} * exp(-{lambda} * D)")
            }
            Self::CosmoRain { q } => format!("COSMO one-moment rain, Q = {q} kg m^-3"),
            Self::CosmoSnow { q, temperature } => match temperature {
                Some(t) => format!("COSMO one-moment snow, Q = {q} kg m^-3, T = {t} K"),
                None => format!("COSMO one-moment snow, Q = {q} kg m^-3"),
            },
            Self::CosmoGraupel { q } => format!("COSMO one-moment graupel, Q = {q} kg m^-3"),
        }
    }

    pub fn into_model(self) -> FunctionalModel {
        let expression = self.expression();
        FunctionalModel::new(Law::Psd(self), expression)
    }
}

#[derive(Debug, Clone)]
pub struct Psd {
    kind: PsdKind,
    model: FunctionalModel,
    dmin: f64,
    dmax: f64,
}

impl Psd {
    pub fn new(kind: PsdKind, model: FunctionalModel, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        check_range(dmin, dmax)?;
        Ok(Self {
            kind,
            model,
            dmin,
            dmax,
        })
    }

    pub fn from_law(law: PsdLaw, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        Self::new(law.kind(), law.into_model(), dmin, dmax)
    }

    pub fn exponential(n0: f64, lambda: f64, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        Self::from_law(PsdLaw::Exponential { n0, lambda }, dmin, dmax)
    }

    pub fn normalized_gamma(nw: f64, d0: f64, mu: f64, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        if d0 <= 0.0 {
            return Err(RadsimError::InvalidModel {
                kind: "PSD",
                reason: format!("median volume diameter must be positive, got {d0}"),
            });
        }
        Self::from_law(PsdLaw::NormalizedGamma { nw, d0, mu }, dmin, dmax)
    }

    pub fn unnormalized_gamma(n0: f64, lambda: f64, mu: f64, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        Self::from_law(PsdLaw::UnnormalizedGamma { n0, lambda, mu }, dmin, dmax)
    }

    /// Binned PSD; the domain is the span of the edges
    pub fn binned(edges: Vec<f64>, values: Vec<f64>, method: Interpolation) -> Result<Self, RadsimError> {
        let law = BinnedLaw::new(edges, values, method)?;
        let (dmin, dmax) = (law.dmin(), law.dmax());
        let model = FunctionalModel::new(Law::Binned(law), "Binned psd");
        Self::new(PsdKind::Binned, model, dmin, dmax)
    }

    /// User law of `D` and `T`
    pub fn custom(source: &str, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        let model = FunctionalModel::from_expression(source, &[Var::D, Var::T])?;
        Self::new(PsdKind::Custom, model, dmin, dmax)
    }

    pub fn kind(&self) -> PsdKind {
        self.kind
    }

    pub fn model(&self) -> &FunctionalModel {
        &self.model
    }

    pub fn dmin(&self) -> f64 {
        self.dmin
    }

    pub fn dmax(&self) -> f64 {
        self.dmax
    }

    /// Same distribution on another diameter domain
    pub fn with_range(&self, dmin: f64, dmax: f64) -> Result<Self, RadsimError> {
        Self::new(self.kind, self.model.clone(), dmin, dmax)
    }

    pub fn evaluate(&self, d: f64, temperature: f64) -> f64 {
        self.model
            .evaluate_real(&ModelInput::new(d, temperature, 0.0))
    }

    pub fn evaluate_grid(&self, diameters: &[f64], temperature: f64) -> Vec<f64> {
        diameters.iter().map(|&d| self.evaluate(d, temperature)).collect()
    }

    /// Uniform integration grid of `nbins` points over the domain
    pub fn diameter_grid(&self, nbins: usize) -> Vec<f64> {
        linspace(self.dmin, self.dmax, nbins)
    }

    /// Trapezoidal estimate of the moment of order `order`
    pub fn integrate_moment(&self, order: f64, nbins: usize, temperature: f64) -> f64 {
        let grid = self.diameter_grid(nbins.max(2));
        let dd = grid[1] - grid[0];
        let integrand: Vec<f64> = grid
            .iter()
            .map(|&d| d.powf(order) * self.evaluate(d, temperature))
            .collect();
        trapz(&integrand, dd)
    }

    /// Formatting-independent identity of the distribution and its domain
    pub fn canonical(&self) -> String {
        format!(
            "{}[{:?},{:?}]:{}",
            self.kind.name(),
            self.dmin,
            self.dmax,
            self.model.canonical()
        )
    }

    fn scaled(&self, model: FunctionalModel) -> Psd {
        Psd {
            kind: self.kind,
            model,
            dmin: self.dmin,
            dmax: self.dmax,
        }
    }
}

fn check_range(dmin: f64, dmax: f64) -> Result<(), RadsimError> {
    if !(dmin.is_finite() && dmax.is_finite()) || dmin >= dmax || dmin < 0.0 {
        return Err(RadsimError::InvalidModel {
            kind: "PSD",
            reason: format!("diameter range must satisfy 0 <= dmin < dmax, got [{dmin}, {dmax}]"),
        });
    }
    Ok(())
}

impl Mul<f64> for &Psd {
    type Output = Psd;
    fn mul(self, scalar: f64) -> Psd {
        self.scaled(&self.model * scalar)
    }
}

impl Div<f64> for &Psd {
    type Output = Psd;
    fn div(self, scalar: f64) -> Psd {
        self.scaled(&self.model / scalar)
    }
}

impl Add<f64> for &Psd {
    type Output = Psd;
    fn add(self, scalar: f64) -> Psd {
        self.scaled(&self.model + scalar)
    }
}

impl Sub<f64> for &Psd {
    type Output = Psd;
    fn sub(self, scalar: f64) -> Psd {
        self.scaled(&self.model - scalar)
    }
}

impl fmt::Display for Psd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PSD type: {}", self.kind.name())?;
        match self.model.law() {
            Law::Binned(law) => {
                writeln!(f, "Bin edges: {:?}", law.edges())?;
                writeln!(f, "Bin values: {:?}", law.values())?;
                writeln!(f, "Interpolation: {}", law.method())
            }
            _ => {
                writeln!(f, "Function: {}", self.model.expression())?;
                writeln!(f, "Dmin: {}", self.dmin)?;
                writeln!(f, "Dmax: {}", self.dmax)
            }
        }
    }
}

fn invalid(reason: String) -> RadsimError {
    RadsimError::InvalidModel { kind: "PSD", reason }
}

fn as_numbers(items: &[Value], context: &str) -> Result<Vec<f64>, RadsimError> {
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| invalid(format!("{context} must be numbers, got {v:?}")))
        })
        .collect()
}

/// Build a closed-form PSD from its factory name and positional arguments
pub fn create_psd(name: &str, args: &[f64]) -> Result<Psd, RadsimError> {
    let range = |rest: &[f64]| -> Result<(f64, f64), RadsimError> {
        match rest {
            [] => Ok((DEFAULT_DMIN, DEFAULT_DMAX)),
            [dmin, dmax] => Ok((*dmin, *dmax)),
            _ => Err(invalid(format!(
                "{name}: optional trailing arguments are [dmin, dmax], got {rest:?}"
            ))),
        }
    };
    let arity = |n: usize| {
        invalid(format!(
            "{name} expects at least {n} parameters, got {}",
            args.len()
        ))
    };

    match name {
        "ExponentialPSD" => {
            let [n0, lambda, rest @ ..] = args else {
                return Err(arity(2));
            };
            let (dmin, dmax) = range(rest)?;
            Psd::exponential(*n0, *lambda, dmin, dmax)
        }
        "NormalizedGammaPSD" => {
            let [nw, d0, mu, rest @ ..] = args else {
                return Err(arity(3));
            };
            let (dmin, dmax) = range(rest)?;
            Psd::normalized_gamma(*nw, *d0, *mu, dmin, dmax)
        }
        "UnnormalizedGammaPSD" => {
            let [n0, lambda, mu, rest @ ..] = args else {
                return Err(arity(3));
            };
            let (dmin, dmax) = range(rest)?;
            Psd::unnormalized_gamma(*n0, *lambda, *mu, dmin, dmax)
        }
        "COSMO_1mom_rain" | "COSMO_1mom_graupel" => {
            let [q, rest @ ..] = args else {
                return Err(arity(1));
            };
            check_mass(*q)?;
            let (dmin, dmax) = range(rest)?;
            let law = if name == "COSMO_1mom_rain" {
                PsdLaw::CosmoRain { q: *q }
            } else {
                PsdLaw::CosmoGraupel { q: *q }
            };
            Psd::from_law(law, dmin, dmax)
        }
        "COSMO_1mom_snow" => {
            let (q, temperature, rest) = match args {
                [q] => (*q, None, &args[1..]),
                [q, t] => (*q, Some(*t), &args[2..]),
                [q, t, rest @ ..] => (*q, Some(*t), rest),
                [] => return Err(arity(1)),
            };
            check_mass(q)?;
            let (dmin, dmax) = range(rest)?;
            Psd::from_law(PsdLaw::CosmoSnow { q, temperature }, dmin, dmax)
        }
        other => Err(invalid(format!("unknown PSD model '{other}'"))),
    }
}

fn check_mass(q: f64) -> Result<(), RadsimError> {
    if q > 0.0 && q.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("mass content must be positive, got {q}")))
    }
}

/// Parse a PSD entry from the box file
///
/// Accepted forms: a law of `D`/`T` (`"8000*exp(-2*D)"`), a factory call
/// (`[ExponentialPSD, 8000, 2]`) or a binned table
/// (`[[edges...], [values...], linear]`).
pub fn parse_psd(value: &Value) -> Result<Psd, RadsimError> {
    match value {
        Value::String(text) => Psd::custom(text, DEFAULT_DMIN, DEFAULT_DMAX).map_err(|err| {
            invalid(format!(
                "'{text}' is neither a valid PSD model nor a law of D and/or T, e.g. 0.8*D**1.08 ({err})"
            ))
        }),
        Value::Sequence(items) => match items.as_slice() {
            [Value::Sequence(edges), Value::Sequence(values), rest @ ..] => {
                let edges = as_numbers(edges, "bin edges")?;
                let values = as_numbers(values, "bin values")?;
                let method = match rest {
                    [] => Interpolation::Linear,
                    [Value::String(name)] => Interpolation::from_name(name).unwrap_or_else(|| {
                        warn!(method = %name, "invalid interpolation method, using linear");
                        Interpolation::Linear
                    }),
                    _ => return Err(invalid("binned PSD takes at most an interpolation method after its tables".to_string())),
                };
                Psd::binned(edges, values, method)
            }
            [Value::String(name), args @ ..] => {
                let args = as_numbers(args, "PSD parameters")?;
                create_psd(name, &args)
            }
            _ => Err(invalid(format!("unsupported PSD entry {value:?}"))),
        },
        other => Err(invalid(format!("unsupported PSD entry {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exponential_moment_converges() {
        let (n0, lambda, dmax) = (8000.0, 2.0, 8.0);
        let psd = Psd::exponential(n0, lambda, 0.0, dmax).unwrap();
        let numeric = psd.integrate_moment(0.0, 4096, 283.0);
        let analytic = n0 / lambda * (1.0 - (-lambda * dmax).exp());
        assert_relative_eq!(numeric, analytic, max_relative = 1e-5);
    }

    #[test]
    fn test_normalized_gamma_third_moment() {
        let (nw, d0, mu) = (8000.0, 1.5, 3.0);
        let psd = Psd::normalized_gamma(nw, d0, mu, 0.0, 20.0).unwrap();
        let numeric = psd.integrate_moment(3.0, 8192, 283.0);
        let lambda = (3.67 + mu) / d0;
        let f = 6.0 / 3.67_f64.powi(4) * (3.67 + mu).powf(mu + 4.0) / gamma(mu + 4.0);
        let analytic = nw * f / d0.powf(mu) * gamma(mu + 4.0) / lambda.powf(mu + 4.0);
        assert_relative_eq!(numeric, analytic, max_relative = 1e-5);
    }

    #[test]
    fn test_cosmo_rain_holds_mass() {
        let q = 1e-4;
        let psd = create_psd("COSMO_1mom_rain", &[q, 0.0, 20.0]).unwrap();
        let am = mass_prefactor_to_mm(AM_R, BM_R);
        let mass = am * psd.integrate_moment(BM_R, 8192, 283.0);
        assert_relative_eq!(mass, q, max_relative = 1e-3);
    }

    #[test]
    fn test_cosmo_snow_and_graupel_hold_mass() {
        let q = 1e-4;
        let snow = create_psd("COSMO_1mom_snow", &[q, 263.15, 0.0, 20.0]).unwrap();
        let am_s = mass_prefactor_to_mm(AM_S, BM_S);
        assert_relative_eq!(am_s * snow.integrate_moment(BM_S, 8192, 283.0), q, max_relative = 1e-3);

        let graupel = create_psd("COSMO_1mom_graupel", &[q, 0.0, 20.0]).unwrap();
        let am_g = mass_prefactor_to_mm(AM_G, BM_G);
        assert_relative_eq!(am_g * graupel.integrate_moment(BM_G, 8192, 283.0), q, max_relative = 1e-3);
    }

    #[test]
    fn test_cosmo_snow_follows_temperature() {
        let psd = create_psd("COSMO_1mom_snow", &[1e-4]).unwrap();
        assert!(psd.evaluate(0.1, 253.15) != psd.evaluate(0.1, 268.15));

        let fixed = create_psd("COSMO_1mom_snow", &[1e-4, 263.15]).unwrap();
        assert_eq!(fixed.evaluate(0.1, 253.15), fixed.evaluate(0.1, 268.15));
    }

    #[test]
    fn test_scalar_composition_keeps_domain() {
        let psd = Psd::exponential(1000.0, 2.0, 0.1, 6.0).unwrap();
        let doubled = &psd * 2.0;
        assert_eq!(doubled.dmin(), 0.1);
        assert_eq!(doubled.dmax(), 6.0);
        assert_relative_eq!(doubled.evaluate(1.0, 283.0), 2.0 * psd.evaluate(1.0, 283.0));
        assert_ne!(doubled.canonical(), psd.canonical());
    }

    #[test]
    fn test_parse_forms() {
        let factory: Value = serde_yaml::from_str("[ExponentialPSD, 8000, 2.0]").unwrap();
        assert_eq!(parse_psd(&factory).unwrap().kind(), PsdKind::Exponential);

        let binned: Value = serde_yaml::from_str("[[0.5, 1.0, 2.0], [10, 20, 5], pchip]").unwrap();
        let psd = parse_psd(&binned).unwrap();
        assert_eq!(psd.kind(), PsdKind::Binned);
        assert_eq!((psd.dmin(), psd.dmax()), (0.5, 2.0));

        let bad_method: Value = serde_yaml::from_str("[[0.5, 1.0], [10, 20], spline]").unwrap();
        assert!(parse_psd(&bad_method).is_ok());

        let custom = parse_psd(&Value::from("1000*exp(-2*D)")).unwrap();
        assert_eq!(custom.kind(), PsdKind::Custom);

        assert!(parse_psd(&Value::from("GammaPSD")).is_err());
        let unknown: Value = serde_yaml::from_str("[LognormalPSD, 1, 2]").unwrap();
        assert!(parse_psd(&unknown).is_err());
        let short: Value = serde_yaml::from_str("[ExponentialPSD, 8000]").unwrap();
        assert!(parse_psd(&short).is_err());
    }

    #[test]
    fn test_rejects_empty_domain() {
        assert!(Psd::exponential(1.0, 1.0, 2.0, 2.0).is_err());
        let psd = Psd::exponential(1.0, 1.0, 0.0, 2.0).unwrap();
        assert!(psd.with_range(3.0, 1.0).is_err());
    }
}
