//! Aspect-ratio laws for raindrops
//!
//! Published fits give the vertical/horizontal axis ratio of a drop as a
//! function of its equivolume diameter. The scattering provider expects the
//! inverse (horizontal over vertical), so every preset returns `1 / ratio`.

use serde_yaml::Value;

use crate::expression::Var;
use crate::model::{FunctionalModel, Law};
use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatioPreset {
    Thurai2007,
    Andsager1999,
    Brandes2002,
}

impl AspectRatioPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Thurai_2007" => Some(Self::Thurai2007),
            "Andsager_1999" => Some(Self::Andsager1999),
            "Brandes_2002" => Some(Self::Brandes2002),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Thurai2007 => "Thurai_2007",
            Self::Andsager1999 => "Andsager_1999",
            Self::Brandes2002 => "Brandes_2002",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Thurai2007 => "Aspect-ratio model for rain (Thurai, 2007)",
            Self::Andsager1999 => "Aspect-ratio model for rain (Andsager, 1999)",
            Self::Brandes2002 => "Aspect-ratio model for rain (Brandes, 2002)",
        }
    }

    /// Largest diameter [mm] the fit was derived for
    pub fn max_diameter(self) -> f64 {
        match self {
            Self::Thurai2007 => 8.0,
            Self::Andsager1999 => 8.0,
            Self::Brandes2002 => 8.0,
        }
    }

    /// Beyond `max_diameter` the ratio is held at its value at the edge
    pub fn evaluate(self, d: f64) -> f64 {
        let d = d.min(self.max_diameter());
        match self {
            Self::Thurai2007 => 1.0 / thurai_2007(d),
            Self::Andsager1999 => 1.0 / andsager_1999(d),
            Self::Brandes2002 => 1.0 / brandes_2002(d),
        }
    }

    pub fn model(self) -> FunctionalModel {
        FunctionalModel::new(Law::AspectRatio(self), self.description())
    }
}

fn thurai_2007(d: f64) -> f64 {
    if d < 0.7 {
        1.0
    } else if d < 1.5 {
        1.173 - 0.5165 * d + 0.4698 * d.powi(2) - 0.1317 * d.powi(3) - 8.5e-3 * d.powi(4)
    } else {
        1.065 - 6.25e-2 * d - 3.99e-3 * d.powi(2) + 7.66e-4 * d.powi(3) - 4.095e-5 * d.powi(4)
    }
}

fn brandes_2002(d: f64) -> f64 {
    0.9951 + 0.02510 * d - 0.03644 * d.powi(2) + 0.005030 * d.powi(3) - 0.0002492 * d.powi(4)
}

fn andsager_1999(d: f64) -> f64 {
    // fit is in cm
    let d = d * 0.1;
    // empirical fit, valid from 1.1 to 4.4 mm
    if (0.11..=0.44).contains(&d) {
        1.012 - 0.144 * d - 1.03 * d.powi(2)
    } else {
        1.0048 + 0.0057 * d - 2.628 * d.powi(2) + 3.682 * d.powi(3) - 1.677 * d.powi(4)
    }
}

/// Parse an aspect-ratio entry: a preset name, a constant, or a law in `D`
pub fn parse_aspect_ratio(value: &Value) -> Result<FunctionalModel, RadsimError> {
    let invalid = |reason: String| RadsimError::InvalidModel {
        kind: "aspect ratio",
        reason,
    };

    match value {
        Value::Number(n) => {
            let ratio = n
                .as_f64()
                .ok_or_else(|| invalid(format!("'{n}' is not a number")))?;
            Ok(FunctionalModel::real_constant(ratio))
        }
        Value::String(text) => {
            if let Some(preset) = AspectRatioPreset::from_name(text.trim()) {
                return Ok(preset.model());
            }
            FunctionalModel::from_expression(text, &[Var::D]).map_err(|err| {
                invalid(format!(
                    "'{text}' is neither a known model nor a law of D ({err})"
                ))
            })
        }
        other => Err(invalid(format!(
            "expected a constant or a functional form of D, e.g. 0.8*D**1.08, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::linspace;
    use crate::model::ModelInput;

    #[test]
    fn test_small_drops_are_spherical() {
        assert_eq!(AspectRatioPreset::Thurai2007.evaluate(0.5), 1.0);
    }

    #[test]
    fn test_large_drops_are_oblate() {
        for preset in [
            AspectRatioPreset::Thurai2007,
            AspectRatioPreset::Andsager1999,
            AspectRatioPreset::Brandes2002,
        ] {
            let ratio = preset.evaluate(4.0);
            assert!(ratio > 1.1, "{} gave {ratio}", preset.name());
        }
    }

    #[test]
    fn test_ratio_is_physical_over_default_range() {
        for preset in [
            AspectRatioPreset::Thurai2007,
            AspectRatioPreset::Andsager1999,
            AspectRatioPreset::Brandes2002,
        ] {
            for d in linspace(0.1, 20.0, 400) {
                let ratio = preset.evaluate(d);
                assert!(ratio.is_finite() && ratio > 0.0, "{} gave {ratio} at D = {d}", preset.name());
            }
            let edge = preset.evaluate(preset.max_diameter());
            assert_eq!(preset.evaluate(20.0), edge);
        }
    }

    #[test]
    fn test_parse_variants() {
        let constant = parse_aspect_ratio(&Value::from(0.9)).unwrap();
        assert!(constant.is_constant());

        let preset = parse_aspect_ratio(&Value::from("Thurai_2007")).unwrap();
        let input = ModelInput::new(3.0, 283.0, 5.6);
        assert_eq!(
            preset.evaluate_real(&input),
            AspectRatioPreset::Thurai2007.evaluate(3.0)
        );

        let law = parse_aspect_ratio(&Value::from("1 + 0.05*D")).unwrap();
        assert!((law.evaluate_real(&input) - 1.15).abs() < 1e-12);

        assert!(parse_aspect_ratio(&Value::from("T*2")).is_err());
        assert!(parse_aspect_ratio(&Value::Bool(true)).is_err());
    }
}
