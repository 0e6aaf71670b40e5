//! radsim - polarimetric radar simulation for hydrometeor scenes
//!
//! Combines particle-size-distribution statistics with per-particle
//! scattering matrices to estimate polarimetric radar variables for a scene
//! of boxes, and re-runs that pipeline over sensitivity sweeps.

pub mod aspect_ratio;
pub mod config;
pub mod constants;
pub mod expression;
pub mod grid;
pub mod hydrometeor;
pub mod info_array;
pub mod interp;
pub mod model;
pub mod output;
pub mod permittivity;
pub mod polarimetry;
pub mod psd;
pub mod scattering;
pub mod scene;
pub mod simulator;
pub mod tags;

use thiserror::Error;

pub use config::{AnalysisMode, ConfigNode, SceneConfig, SimulationConfig};
pub use hydrometeor::{Hydrometeor, HydrometeorSpec, ScatteringSignature};
pub use info_array::InfoArray;
pub use model::{FunctionalModel, ModelInput};
pub use polarimetry::{derive, derive_grid, PolVar, PolarimetricVariables};
pub use psd::{Psd, PsdKind};
pub use scattering::{
    Geometry, RayleighSpheroid, ScatteringComputer, ScatteringMatrices, ScatteringPayload,
    ScatteringProvider,
};
pub use scene::SceneBox;
pub use simulator::{
    RunOptions, SensSimulator, SerialTrace, SimulationOutput, Simulator, SingleSimulator, Sweep,
};
pub use tags::SensitivityParameter;

#[derive(Debug, Error)]
pub enum RadsimError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid {kind} specification: {reason}")]
    InvalidModel { kind: &'static str, reason: String },
    #[error("expression error: {0}")]
    Expression(String),
    #[error("unknown parameter path '{0}'")]
    UnknownParameterPath(String),
    #[error("radar frequency differs between boxes ({frequencies:?} GHz); choose a single frequency")]
    FrequencyMismatch { frequencies: Vec<f64> },
    #[error("invalid info array: {0}")]
    InvalidInfoArray(String),
    #[error("scattering provider failed: {0}")]
    Scattering(String),
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
}
