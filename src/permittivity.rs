//! Dielectric laws
//!
//! Values are complex refractive indices `m = sqrt(eps)`, which is what the
//! scattering provider consumes. Liquid water and ice follow the Liebe (1991)
//! and Hufford (1991) models; mixtures use the Bohren & Battan (1980)
//! inclusion formula.

use num_complex::Complex64;
use serde_yaml::Value;

use crate::constants::T_FREEZE;
use crate::expression::Var;
use crate::model::{FunctionalModel, Law, ModelInput};
use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefractiveIndexPreset {
    Water,
    Ice,
}

impl RefractiveIndexPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "water" => Some(Self::Water),
            "ice" => Some(Self::Ice),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Ice => "ice",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Water => {
                "Dielectric model for liq. water taken from 'A model for the complex \
                 permittivity of water at frequencies below 1 THz' (Liebe, 1991)"
            }
            Self::Ice => {
                "Dielectric model for ice taken from 'A model for the complex \
                 permittivity of ice at frequencies below 1 THz' (Hufford, 1991)"
            }
        }
    }

    /// Refractive index at temperature [K] and frequency [GHz]
    pub fn evaluate(self, temperature: f64, frequency: f64) -> Complex64 {
        let eps = match self {
            Self::Water => water_permittivity(temperature, frequency),
            Self::Ice => ice_permittivity(temperature, frequency),
        };
        eps.sqrt()
    }

    pub fn model(self) -> FunctionalModel {
        FunctionalModel::new(Law::RefractiveIndex(self), self.description())
    }
}

/// Liebe et al. (1991) double-Debye model
pub fn water_permittivity(temperature: f64, frequency: f64) -> Complex64 {
    let theta = 300.0 / temperature - 1.0;
    let eps0 = 77.66 + 103.3 * theta;
    let eps1 = 0.0671 * eps0;
    let eps2 = 3.52;
    let gamma1 = 20.20 - 146.4 * theta + 316.0 * theta * theta;
    let gamma2 = 39.8 * gamma1;

    let f = Complex64::new(frequency, 0.0);
    let relax1 = (eps0 - eps1) / (f + Complex64::new(0.0, gamma1));
    let relax2 = (eps1 - eps2) / (f + Complex64::new(0.0, gamma2));
    Complex64::new(eps0, 0.0) - f * (relax1 + relax2)
}

/// Hufford (1991) model, real part after Matzler
pub fn ice_permittivity(temperature: f64, frequency: f64) -> Complex64 {
    let theta = 300.0 / temperature - 1.0;
    let alpha = (0.00504 + 0.0062 * theta) * (-22.1 * theta).exp();
    let beta = (0.502 - 0.131 * theta) / (1.0 + theta) * 1e-4
        + 0.542e-6 * ((1.0 + theta) / (theta + 0.0073)).powi(2);
    let real = 3.1884 + 9.1e-4 * (temperature - T_FREEZE);
    let imag = alpha / frequency + beta * frequency;
    Complex64::new(real, imag)
}

/// One constituent of a mixed-phase particle
#[derive(Debug, Clone)]
pub struct MixtureComponent {
    /// Volume fraction law of (D, T)
    pub volume_fraction: FunctionalModel,
    /// Refractive index law of (T, F, D)
    pub index: FunctionalModel,
}

/// Bohren & Battan (1980) effective permittivity of inclusions in a matrix
pub fn bohren_battan(eps_matrix: Complex64, eps_inclusion: Complex64, fraction: f64) -> Complex64 {
    let diff = eps_inclusion - eps_matrix;
    if diff.norm() < 1e-12 * eps_matrix.norm().max(1.0) {
        return eps_matrix;
    }
    let beta = 2.0 * eps_matrix / diff * (eps_inclusion / diff * (eps_inclusion / eps_matrix).ln() - 1.0);
    ((1.0 - fraction) * eps_matrix + fraction * beta * eps_inclusion)
        / ((1.0 - fraction) + fraction * beta)
}

/// Mix components pairwise in list order, the first acting as matrix
pub fn mix(components: &[MixtureComponent], input: &ModelInput) -> Complex64 {
    let Some(first) = components.first() else {
        return Complex64::new(1.0, 0.0);
    };

    let mut eps = first.index.evaluate(input).powi(2);
    let mut accumulated = first.volume_fraction.evaluate_real(input);

    for component in &components[1..] {
        let fraction = component.volume_fraction.evaluate_real(input);
        let total = accumulated + fraction;
        if total <= 0.0 {
            continue;
        }
        let eps_inclusion = component.index.evaluate(input).powi(2);
        eps = bohren_battan(eps, eps_inclusion, fraction / total);
        accumulated = total;
    }

    eps.sqrt()
}

fn invalid(kind: &'static str, reason: String) -> RadsimError {
    RadsimError::InvalidModel { kind, reason }
}

/// Parse a volume fraction: a constant or a law of `D` and `T`
pub fn parse_vol_fraction(value: &Value) -> Result<FunctionalModel, RadsimError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(FunctionalModel::real_constant)
            .ok_or_else(|| invalid("volume fraction", format!("'{n}' is not a number"))),
        Value::String(text) => FunctionalModel::from_expression(text, &[Var::D, Var::T])
            .map_err(|err| {
                invalid(
                    "volume fraction",
                    format!("'{text}' is not a law of D and/or T ({err})"),
                )
            }),
        other => Err(invalid(
            "volume fraction",
            format!("expected a constant or a law of D and/or T, got {other:?}"),
        )),
    }
}

/// Parse a refractive index entry
///
/// Accepts a real constant, a complex literal such as `8.58+1.69j`, the
/// presets `water` and `ice`, a law of `T`, `F` and `D`, or a mixture given
/// as `[[fractions...], [indices...]]`.
pub fn parse_permittivity(value: &Value) -> Result<FunctionalModel, RadsimError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(FunctionalModel::real_constant)
            .ok_or_else(|| invalid("permittivity", format!("'{n}' is not a number"))),
        Value::String(text) => {
            let trimmed = text.trim();
            if let Some(preset) = RefractiveIndexPreset::from_name(trimmed) {
                return Ok(preset.model());
            }
            let model = FunctionalModel::from_expression(trimmed, &[Var::T, Var::F, Var::D])
                .map_err(|err| {
                    invalid(
                        "permittivity",
                        format!("'{trimmed}' is not a constant or a law of D, T and/or F ({err})"),
                    )
                })?;
            if model.is_constant() {
                let value = model.evaluate(&ModelInput::new(0.0, 0.0, 0.0));
                return Ok(FunctionalModel::new(Law::Constant(value), trimmed));
            }
            Ok(model)
        }
        Value::Sequence(items) => parse_mixture(items),
        other => Err(invalid(
            "permittivity",
            format!("unsupported entry {other:?}"),
        )),
    }
}

fn parse_mixture(items: &[Value]) -> Result<FunctionalModel, RadsimError> {
    let (fractions, indices) = match items {
        [Value::Sequence(fractions), Value::Sequence(indices)] => (fractions, indices),
        _ => {
            return Err(invalid(
                "permittivity",
                "a mixture must be two lists: volume fractions and refractive indices".to_string(),
            ))
        }
    };
    if fractions.len() != indices.len() || fractions.is_empty() {
        return Err(invalid(
            "permittivity",
            format!(
                "mixture lists must be non-empty and of equal length ({} fractions, {} indices)",
                fractions.len(),
                indices.len()
            ),
        ));
    }

    let components = fractions
        .iter()
        .zip(indices)
        .map(|(fraction, index)| {
            Ok(MixtureComponent {
                volume_fraction: parse_vol_fraction(fraction)?,
                index: parse_permittivity(index)?,
            })
        })
        .collect::<Result<Vec<_>, RadsimError>>()?;

    let fraction_text: Vec<&str> = components.iter().map(|c| c.volume_fraction.expression()).collect();
    let index_text: Vec<&str> = components.iter().map(|c| c.index.expression()).collect();
    let expression = format!(
        "Mixture model taken from 'Radar Backscattering by Inhomogeneous Precipitation \
         Particles' (Bohren and Battan, 1980), with vol fractions = {} and refractive indices = {}",
        fraction_text.join(" / "),
        index_text.join(" / ")
    );

    Ok(FunctionalModel::new(Law::Mixture(components), expression))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_water_index_at_c_band() {
        // matches the refractive index shipped as the default box permittivity
        let m = RefractiveIndexPreset::Water.evaluate(283.0, 5.6);
        assert!((m.re - 8.59).abs() < 0.1, "re = {}", m.re);
        assert!((m.im - 1.70).abs() < 0.1, "im = {}", m.im);
    }

    #[test]
    fn test_ice_is_weakly_absorbing() {
        let m = RefractiveIndexPreset::Ice.evaluate(263.15, 5.6);
        assert!((m.re - 1.78).abs() < 0.01);
        assert!(m.im > 0.0 && m.im < 1e-2);
    }

    #[test]
    fn test_bohren_battan_limits() {
        let matrix = Complex64::new(3.17, 0.001);
        let inclusion = Complex64::new(72.0, 30.0);
        let none = bohren_battan(matrix, inclusion, 0.0);
        assert_relative_eq!(none.re, matrix.re, epsilon = 1e-12);
        let all = bohren_battan(matrix, inclusion, 1.0);
        assert_relative_eq!(all.re, inclusion.re, epsilon = 1e-9);
        assert_relative_eq!(all.im, inclusion.im, epsilon = 1e-9);
    }

    #[test]
    fn test_parse_complex_literal() {
        let model = parse_permittivity(&Value::from("8.5871375786139676+1.6977965395728176j")).unwrap();
        assert!(model.is_constant());
        let m = model.evaluate(&ModelInput::new(1.0, 283.0, 5.6));
        assert_relative_eq!(m.re, 8.5871375786139676, epsilon = 1e-12);
        assert_relative_eq!(m.im, 1.6977965395728176, epsilon = 1e-12);
    }

    #[test]
    fn test_parse_mixture() {
        let value: Value = serde_yaml::from_str("[[0.1, 0.9], [ice, water]]").unwrap();
        let model = parse_permittivity(&value).unwrap();
        let input = ModelInput::new(1.0, 273.15, 5.6);
        let m = model.evaluate(&input);
        let ice = RefractiveIndexPreset::Ice.evaluate(273.15, 5.6);
        let water = RefractiveIndexPreset::Water.evaluate(273.15, 5.6);
        assert!(m.re > ice.re && m.re < water.re);
        assert!(model.expression().contains("Bohren and Battan"));
    }

    #[test]
    fn test_parse_rejects_bad_mixture() {
        let value: Value = serde_yaml::from_str("[[0.1, 0.9], [water]]").unwrap();
        assert!(parse_permittivity(&value).is_err());
        assert!(parse_permittivity(&Value::from("granite")).is_err());
    }
}
