//! Functional models
//!
//! A [`FunctionalModel`] is a pure law of diameter, temperature and
//! frequency. PSDs, aspect ratios, refractive indices and volume fractions
//! are all expressed this way. Models are immutable: scalar composition
//! returns a new model wrapping the original, so one model can be shared by
//! any number of hydrometeors.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use num_complex::Complex64;

use crate::aspect_ratio::AspectRatioPreset;
use crate::expression::{Expr, Var};
use crate::interp::BinnedLaw;
use crate::permittivity::{MixtureComponent, RefractiveIndexPreset};
use crate::psd::PsdLaw;
use crate::RadsimError;

/// Arguments a model is evaluated at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInput {
    /// Particle diameter [mm]
    pub diameter: f64,
    /// Temperature [K]
    pub temperature: f64,
    /// Radar frequency [GHz]
    pub frequency: f64,
}

impl ModelInput {
    pub fn new(diameter: f64, temperature: f64, frequency: f64) -> Self {
        Self {
            diameter,
            temperature,
            frequency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ScalarOp {
    fn symbol(self) -> &'static str {
        match self {
            ScalarOp::Add => "+",
            ScalarOp::Sub => "-",
            ScalarOp::Mul => "*",
            ScalarOp::Div => "/",
        }
    }

    fn apply(self, value: Complex64, scalar: f64) -> Complex64 {
        match self {
            ScalarOp::Add => value + scalar,
            ScalarOp::Sub => value - scalar,
            ScalarOp::Mul => value * scalar,
            ScalarOp::Div => value / scalar,
        }
    }
}

/// The closed set of laws a model can be built from
#[derive(Debug, Clone)]
pub enum Law {
    Constant(Complex64),
    Expression(Expr),
    AspectRatio(AspectRatioPreset),
    RefractiveIndex(RefractiveIndexPreset),
    Mixture(Vec<MixtureComponent>),
    Psd(PsdLaw),
    Binned(BinnedLaw),
    Scaled {
        inner: FunctionalModel,
        op: ScalarOp,
        scalar: f64,
    },
}

#[derive(Debug, Clone)]
pub struct FunctionalModel {
    law: Arc<Law>,
    expression: String,
}

impl FunctionalModel {
    pub fn new(law: Law, expression: impl Into<String>) -> Self {
        Self {
            law: Arc::new(law),
            expression: expression.into(),
        }
    }

    pub fn constant(value: Complex64) -> Self {
        let expression = if value.im == 0.0 {
            format!("{}", value.re)
        } else {
            format!("{value}")
        };
        Self::new(Law::Constant(value), expression)
    }

    pub fn real_constant(value: f64) -> Self {
        Self::constant(Complex64::new(value, 0.0))
    }

    /// Parse a textual law, accepting only the listed variables
    pub fn from_expression(source: &str, allowed: &[Var]) -> Result<Self, RadsimError> {
        let expr = Expr::parse(source)?;
        expr.check_variables(allowed)?;
        Ok(Self::new(Law::Expression(expr), source.trim()))
    }

    pub fn law(&self) -> &Law {
        &self.law
    }

    /// Human-readable provenance of the model
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Formatting-independent identity used for cache keys
    pub fn canonical(&self) -> String {
        match self.law.as_ref() {
            Law::Constant(value) => format!("const({:?},{:?})", value.re, value.im),
            Law::Expression(expr) => format!("expr({expr})"),
            Law::AspectRatio(preset) => format!("ar({})", preset.name()),
            Law::RefractiveIndex(preset) => format!("m({})", preset.name()),
            Law::Mixture(components) => {
                let parts: Vec<String> = components
                    .iter()
                    .map(|c| format!("{}:{}", c.volume_fraction.canonical(), c.index.canonical()))
                    .collect();
                format!("mix[{}]", parts.join(";"))
            }
            Law::Psd(law) => law.canonical(),
            Law::Binned(law) => law.canonical(),
            Law::Scaled { inner, op, scalar } => {
                format!("({}){}{:?}", inner.canonical(), op.symbol(), scalar)
            }
        }
    }

    /// True when the value does not depend on any input
    pub fn is_constant(&self) -> bool {
        match self.law.as_ref() {
            Law::Constant(_) => true,
            Law::Expression(expr) => expr.variables().is_empty(),
            Law::Scaled { inner, .. } => inner.is_constant(),
            Law::Mixture(components) => components
                .iter()
                .all(|c| c.volume_fraction.is_constant() && c.index.is_constant()),
            _ => false,
        }
    }

    pub fn evaluate(&self, input: &ModelInput) -> Complex64 {
        match self.law.as_ref() {
            Law::Constant(value) => *value,
            Law::Expression(expr) => expr.eval(input),
            Law::AspectRatio(preset) => Complex64::new(preset.evaluate(input.diameter), 0.0),
            Law::RefractiveIndex(preset) => preset.evaluate(input.temperature, input.frequency),
            Law::Mixture(components) => crate::permittivity::mix(components, input),
            Law::Psd(law) => Complex64::new(law.evaluate(input.diameter, input.temperature), 0.0),
            Law::Binned(law) => Complex64::new(law.evaluate(input.diameter), 0.0),
            Law::Scaled { inner, op, scalar } => op.apply(inner.evaluate(input), *scalar),
        }
    }

    pub fn evaluate_real(&self, input: &ModelInput) -> f64 {
        self.evaluate(input).re
    }

    /// Evaluate over a diameter grid; constant laws are computed once and
    /// broadcast to the grid shape.
    pub fn evaluate_grid(
        &self,
        diameters: &[f64],
        temperature: f64,
        frequency: f64,
    ) -> Vec<Complex64> {
        if self.is_constant() {
            let value = self.evaluate(&ModelInput::new(0.0, temperature, frequency));
            return vec![value; diameters.len()];
        }
        diameters
            .iter()
            .map(|&d| self.evaluate(&ModelInput::new(d, temperature, frequency)))
            .collect()
    }

    fn compose(&self, op: ScalarOp, scalar: f64) -> Self {
        let expression = match op {
            ScalarOp::Mul => format!("{scalar}*{}", self.expression),
            ScalarOp::Div => format!("({})/{scalar}", self.expression),
            ScalarOp::Add => format!("{scalar}+{}", self.expression),
            ScalarOp::Sub => format!("({})-{scalar}", self.expression),
        };
        Self::new(
            Law::Scaled {
                inner: self.clone(),
                op,
                scalar,
            },
            expression,
        )
    }
}

impl fmt::Display for FunctionalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl Mul<f64> for &FunctionalModel {
    type Output = FunctionalModel;
    fn mul(self, scalar: f64) -> FunctionalModel {
        self.compose(ScalarOp::Mul, scalar)
    }
}

impl Div<f64> for &FunctionalModel {
    type Output = FunctionalModel;
    fn div(self, scalar: f64) -> FunctionalModel {
        self.compose(ScalarOp::Div, scalar)
    }
}

impl Add<f64> for &FunctionalModel {
    type Output = FunctionalModel;
    fn add(self, scalar: f64) -> FunctionalModel {
        self.compose(ScalarOp::Add, scalar)
    }
}

impl Sub<f64> for &FunctionalModel {
    type Output = FunctionalModel;
    fn sub(self, scalar: f64) -> FunctionalModel {
        self.compose(ScalarOp::Sub, scalar)
    }
}
