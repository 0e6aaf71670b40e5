//! Simulation settings and the box-file configuration tree
//!
//! Box files are YAML mappings of box name to box body. After sweep tags are
//! stripped and defaults injected, each box becomes a [`ConfigNode`] tree
//! whose model leaves (`psd`, `aspect_ratio`, `permittivity`) are already
//! parsed. The sensitivity engine perturbs this tree by key path.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use serde_yaml::{Mapping, Value};
use tracing::{error, warn};

use crate::aspect_ratio::parse_aspect_ratio;
use crate::model::FunctionalModel;
use crate::permittivity::parse_permittivity;
use crate::psd::{parse_psd, Psd};
use crate::tags::{extract_sens_tags, SensitivityParameter};
use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    None,
    Serial,
    Parallel,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Diameter bins per hydrometeor
    #[serde_as(as = "DefaultOnNull")]
    pub nbins_d: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub sens_analysis: AnalysisMode,
    /// Scattering worker threads, 0 for one per hardware thread
    #[serde_as(as = "DefaultOnNull")]
    pub workers: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nbins_d: 64,
            sens_analysis: AnalysisMode::None,
            workers: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), RadsimError> {
        if self.nbins_d < 2 {
            return Err(RadsimError::InvalidConfig(format!(
                "nbins_d must be at least 2, got {}",
                self.nbins_d
            )));
        }
        Ok(())
    }

    /// Load from JSON (`.json`) or YAML (anything else)
    pub fn load(path: &Path) -> Result<Self, RadsimError> {
        let raw = fs::read_to_string(path)?;
        let config: SimulationConfig = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml::from_str(&raw)?
        };
        config.validate()?;
        Ok(config)
    }
}

/// Values filled into boxes that omit them
pub const DEFAULT_BOX: &str = "\
hydrometeors:
    permittivity: 8.5871375786139676+1.6977965395728176j
    canting_angle_std: 10
    psd: [COSMO_1mom_rain, 0.0001]
    psd_range: [0.1, 20]
    aspect_ratio: 0.9
geometry:
    elevation_angle: 0
    azimuth: 0
    position: [1, 1, 1]
    size: [1, 1, 1]
atmosphere:
    T: 283
    P: 1015
radar:
    frequency: 5.6
weight: 1
";

/// Node of the parsed box configuration
#[derive(Debug, Clone)]
pub enum ConfigNode {
    Number(f64),
    Numbers(Vec<f64>),
    Text(String),
    Psd(Psd),
    Model(FunctionalModel),
    Map(Vec<(String, ConfigNode)>),
}

impl ConfigNode {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigNode::Number(_) => "number",
            ConfigNode::Numbers(_) => "list of numbers",
            ConfigNode::Text(_) => "text",
            ConfigNode::Psd(_) => "PSD",
            ConfigNode::Model(_) => "model",
            ConfigNode::Map(_) => "mapping",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, ConfigNode::Number(_))
    }

    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        match self {
            ConfigNode::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut ConfigNode> {
        match self {
            ConfigNode::Map(entries) => entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&ConfigNode> {
        path.iter().try_fold(self, |node, key| node.get(key.as_ref()))
    }

    /// Replace the node at `path`, which must already exist
    pub fn set_path<S: AsRef<str>>(&mut self, path: &[S], value: ConfigNode) -> Result<(), RadsimError> {
        let unknown = || {
            RadsimError::UnknownParameterPath(
                path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/"),
            )
        };
        let mut node = self;
        for key in path {
            node = node.get_mut(key.as_ref()).ok_or_else(unknown)?;
        }
        *node = value;
        Ok(())
    }

    /// The node multiplied by a sweep factor
    pub fn scale(&self, factor: f64) -> Result<ConfigNode, RadsimError> {
        match self {
            ConfigNode::Number(v) => Ok(ConfigNode::Number(v * factor)),
            ConfigNode::Numbers(values) => Ok(ConfigNode::Numbers(values.iter().map(|v| v * factor).collect())),
            ConfigNode::Psd(psd) => Ok(ConfigNode::Psd(psd * factor)),
            ConfigNode::Model(model) => Ok(ConfigNode::Model(model * factor)),
            other => Err(RadsimError::InvalidConfig(format!(
                "a {} cannot be scaled by a sensitivity factor",
                other.kind()
            ))),
        }
    }

    pub fn entries(&self) -> &[(String, ConfigNode)] {
        match self {
            ConfigNode::Map(entries) => entries,
            _ => &[],
        }
    }

    fn field(&self, key: &str) -> Result<&ConfigNode, RadsimError> {
        self.get(key)
            .ok_or_else(|| RadsimError::InvalidConfig(format!("missing entry '{key}'")))
    }

    fn mismatch(key: &str, expected: &str, found: &ConfigNode) -> RadsimError {
        RadsimError::InvalidConfig(format!(
            "entry '{key}' must be a {expected}, found a {}",
            found.kind()
        ))
    }

    pub fn number(&self, key: &str) -> Result<f64, RadsimError> {
        match self.field(key)? {
            ConfigNode::Number(v) => Ok(*v),
            other => Err(Self::mismatch(key, "number", other)),
        }
    }

    pub fn numbers(&self, key: &str) -> Result<&[f64], RadsimError> {
        match self.field(key)? {
            ConfigNode::Numbers(values) => Ok(values),
            other => Err(Self::mismatch(key, "list of numbers", other)),
        }
    }

    pub fn psd(&self, key: &str) -> Result<&Psd, RadsimError> {
        match self.field(key)? {
            ConfigNode::Psd(psd) => Ok(psd),
            other => Err(Self::mismatch(key, "PSD", other)),
        }
    }

    pub fn model(&self, key: &str) -> Result<&FunctionalModel, RadsimError> {
        match self.field(key)? {
            ConfigNode::Model(model) => Ok(model),
            other => Err(Self::mismatch(key, "model", other)),
        }
    }

    pub fn map(&self, key: &str) -> Result<&ConfigNode, RadsimError> {
        match self.field(key)? {
            node @ ConfigNode::Map(_) => Ok(node),
            other => Err(Self::mismatch(key, "mapping", other)),
        }
    }
}

fn key_string(key: &Value) -> Result<String, RadsimError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(RadsimError::InvalidConfig(format!("unsupported key {other:?}"))),
    }
}

fn plain_node(path: &str, value: &Value) -> Result<ConfigNode, RadsimError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(ConfigNode::Number)
            .ok_or_else(|| RadsimError::InvalidConfig(format!("'{path}': '{n}' is not a number"))),
        Value::String(s) => Ok(ConfigNode::Text(s.clone())),
        Value::Bool(b) => Ok(ConfigNode::Text(b.to_string())),
        Value::Sequence(items) => items
            .iter()
            .map(Value::as_f64)
            .collect::<Option<Vec<f64>>>()
            .map(ConfigNode::Numbers)
            .ok_or_else(|| RadsimError::InvalidConfig(format!("'{path}' must be a list of numbers"))),
        Value::Mapping(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| {
                    let key = key_string(k)?;
                    let node = plain_node(&format!("{path}/{key}"), v)?;
                    Ok((key, node))
                })
                .collect::<Result<Vec<_>, RadsimError>>()?;
            Ok(ConfigNode::Map(entries))
        }
        Value::Null => Err(RadsimError::InvalidConfig(format!("'{path}' has no value"))),
        Value::Tagged(tagged) => plain_node(path, &tagged.value),
    }
}

fn model_node(path: &str, key: &str, value: &Value) -> Result<ConfigNode, RadsimError> {
    let parsed = match key {
        "psd" => parse_psd(value).map(ConfigNode::Psd),
        "aspect_ratio" => parse_aspect_ratio(value).map(ConfigNode::Model),
        "permittivity" => parse_permittivity(value).map(ConfigNode::Model),
        _ => plain_node(path, value),
    };
    parsed.map_err(|err| {
        error!(entry = %path, %err, "invalid model specification");
        err
    })
}

fn hydrometeor_node(path: &str, body: &Mapping) -> Result<ConfigNode, RadsimError> {
    let entries = body
        .iter()
        .map(|(k, v)| {
            let key = key_string(k)?;
            let node = model_node(&format!("{path}/{key}"), &key, v)?;
            Ok((key, node))
        })
        .collect::<Result<Vec<_>, RadsimError>>()?;
    Ok(ConfigNode::Map(entries))
}

fn is_missing(map: &Mapping, key: &str) -> bool {
    map.get(key).map_or(true, Value::is_null)
}

/// Binned tables are the only PSD entries whose first item is a list
fn is_binned_psd(value: Option<&Value>) -> bool {
    matches!(
        value.and_then(Value::as_sequence).and_then(|items| items.first()),
        Some(Value::Sequence(_))
    )
}

fn complete_box(name: &str, body: &mut Mapping, defaults: &Mapping) -> Result<(), RadsimError> {
    for (category, default) in defaults {
        let category = key_string(category)?;
        match category.as_str() {
            "weight" => {
                if is_missing(body, "weight") {
                    warn!(box_name = name, default = ?default, "no weight given, using default");
                    body.insert(Value::from("weight"), default.clone());
                }
            }
            "hydrometeors" => {
                let hydro_defaults = default.as_mapping().cloned().unwrap_or_default();
                let hydrometeors = body
                    .get_mut("hydrometeors")
                    .and_then(Value::as_mapping_mut)
                    .ok_or_else(|| {
                        RadsimError::InvalidConfig(format!("box '{name}' has no hydrometeors"))
                    })?;
                for (hydro_name, hydro) in hydrometeors.iter_mut() {
                    let hydro_name = key_string(hydro_name)?;
                    let hydro = hydro.as_mapping_mut().ok_or_else(|| {
                        RadsimError::InvalidConfig(format!(
                            "hydrometeor '{hydro_name}' in box '{name}' must be a mapping"
                        ))
                    })?;
                    let binned = is_binned_psd(hydro.get("psd"));
                    for (param, value) in &hydro_defaults {
                        let param = key_string(param)?;
                        // a binned PSD spans its own edges unless told otherwise
                        if param == "psd_range" && binned {
                            continue;
                        }
                        if is_missing(hydro, &param) {
                            warn!(
                                box_name = name,
                                hydrometeor = %hydro_name,
                                param = %param,
                                default = ?value,
                                "parameter not given, using default"
                            );
                            hydro.insert(Value::from(param), value.clone());
                        }
                    }
                }
            }
            _ => {
                if is_missing(body, &category) {
                    body.insert(Value::from(category.clone()), Value::Mapping(Mapping::new()));
                }
                let section = body
                    .get_mut(category.as_str())
                    .and_then(Value::as_mapping_mut)
                    .ok_or_else(|| {
                        RadsimError::InvalidConfig(format!(
                            "'{category}' in box '{name}' must be a mapping"
                        ))
                    })?;
                for (param, value) in default.as_mapping().into_iter().flatten() {
                    let param = key_string(param)?;
                    if is_missing(section, &param) {
                        warn!(
                            box_name = name,
                            param = %format!("{category}/{param}"),
                            default = ?value,
                            "parameter not given, using default"
                        );
                        section.insert(Value::from(param), value.clone());
                    }
                }
            }
        }
    }
    Ok(())
}

fn box_node(name: &str, body: &Mapping) -> Result<ConfigNode, RadsimError> {
    let mut entries = Vec::with_capacity(body.len());
    for (key, value) in body {
        let key = key_string(key)?;
        let path = format!("{name}/{key}");
        let node = if key == "hydrometeors" {
            let hydrometeors = value.as_mapping().ok_or_else(|| {
                RadsimError::InvalidConfig(format!("'{path}' must be a mapping"))
            })?;
            let mut children = Vec::with_capacity(hydrometeors.len());
            for (hydro_name, hydro) in hydrometeors {
                let hydro_name = key_string(hydro_name)?;
                let hydro_path = format!("{path}/{hydro_name}");
                let hydro = hydro.as_mapping().ok_or_else(|| {
                    RadsimError::InvalidConfig(format!("'{hydro_path}' must be a mapping"))
                })?;
                children.push((hydro_name, hydrometeor_node(&hydro_path, hydro)?));
            }
            ConfigNode::Map(children)
        } else {
            plain_node(&path, value)?
        };
        entries.push((key, node));
    }
    Ok(ConfigNode::Map(entries))
}

/// Parsed box file: one configuration tree rooted at the box names, plus
/// the sweep parameters found in it
#[derive(Debug, Clone)]
pub struct SceneConfig {
    pub root: ConfigNode,
    pub sens_params: Vec<SensitivityParameter>,
}

impl SceneConfig {
    /// Parse box-file text, filling gaps from `defaults` (a box body)
    pub fn parse(text: &str, defaults: &Value) -> Result<Self, RadsimError> {
        let (cleaned, sens_params) = extract_sens_tags(text)?;
        let document: Value = serde_yaml::from_str(&cleaned)?;
        let boxes = document.as_mapping().ok_or_else(|| {
            RadsimError::InvalidConfig("box file must map box names to box definitions".to_string())
        })?;
        let defaults = defaults.as_mapping().ok_or_else(|| {
            RadsimError::InvalidConfig("defaults must be a mapping".to_string())
        })?;

        let mut entries = Vec::with_capacity(boxes.len());
        for (name, body) in boxes {
            let name = key_string(name)?;
            let mut body = body.as_mapping().cloned().ok_or_else(|| {
                RadsimError::InvalidConfig(format!("box '{name}' must be a mapping"))
            })?;
            complete_box(&name, &mut body, defaults)?;
            entries.push((name.clone(), box_node(&name, &body)?));
        }
        if entries.is_empty() {
            return Err(RadsimError::InvalidConfig("box file defines no boxes".to_string()));
        }

        Ok(Self {
            root: ConfigNode::Map(entries),
            sens_params,
        })
    }

    pub fn parse_with_builtin_defaults(text: &str) -> Result<Self, RadsimError> {
        Self::parse(text, &builtin_defaults()?)
    }

    /// Read a box file; `defaults_path` replaces the built-in defaults
    pub fn load(path: &Path, defaults_path: Option<&Path>) -> Result<Self, RadsimError> {
        let defaults = match defaults_path {
            Some(defaults_path) => serde_yaml::from_str(&fs::read_to_string(defaults_path)?)?,
            None => builtin_defaults()?,
        };
        Self::parse(&fs::read_to_string(path)?, &defaults)
    }

    pub fn box_names(&self) -> impl Iterator<Item = &str> {
        self.root.entries().iter().map(|(name, _)| name.as_str())
    }
}

pub fn builtin_defaults() -> Result<Value, RadsimError> {
    Ok(serde_yaml::from_str(DEFAULT_BOX)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BOXES: &str = "\
box1:
    radar:
        frequency: 9.41
    atmosphere:
        T: 283 %sens(50,150,5)
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 8000, 2.0]
            aspect_ratio: Thurai_2007
box2:
    weight: 3
    geometry:
        elevation_angle: 5
    hydrometeors:
        hail:
            psd: [[1.0, 2.0, 4.0], [100, 50, 10]]
            permittivity: ice
";

    #[test]
    fn test_defaults_are_injected() {
        let scene = SceneConfig::parse_with_builtin_defaults(BOXES).unwrap();
        assert_eq!(scene.box_names().collect::<Vec<_>>(), vec!["box1", "box2"]);

        let box1 = scene.root.get("box1").unwrap();
        assert_eq!(box1.number("weight").unwrap(), 1.0);
        assert_eq!(box1.map("radar").unwrap().number("frequency").unwrap(), 9.41);
        assert_eq!(box1.map("geometry").unwrap().number("elevation_angle").unwrap(), 0.0);

        let rain = box1.get_path(&["hydrometeors", "rain"]).unwrap();
        assert_eq!(rain.number("canting_angle_std").unwrap(), 10.0);
        assert_eq!(rain.numbers("psd_range").unwrap(), &[0.1, 20.0]);
        assert!(rain.model("permittivity").unwrap().is_constant());

        let hail = scene.root.get_path(&["box2", "hydrometeors", "hail"]).unwrap();
        assert!(hail.get("psd_range").is_none());
        assert_eq!(hail.psd("psd").unwrap().dmax(), 4.0);
    }

    #[test]
    fn test_sweep_tags_are_collected() {
        let scene = SceneConfig::parse_with_builtin_defaults(BOXES).unwrap();
        assert_eq!(scene.sens_params.len(), 1);
        let path = &scene.sens_params[0].path;
        assert!(scene.root.get_path(path).unwrap().is_scalar());
    }

    #[test]
    fn test_invalid_model_is_fatal() {
        let text = "b:\n    hydrometeors:\n        rain:\n            psd: [NoSuchPSD, 1]\n";
        assert!(SceneConfig::parse_with_builtin_defaults(text).is_err());
        let text = "b:\n    hydrometeors:\n        rain:\n            aspect_ratio: T*2\n";
        assert!(SceneConfig::parse_with_builtin_defaults(text).is_err());
    }

    #[test]
    fn test_set_path_and_scale() {
        let mut scene = SceneConfig::parse_with_builtin_defaults(BOXES).unwrap();
        let path = ["box1", "atmosphere", "T"];
        let scaled = scene.root.get_path(&path).unwrap().scale(0.5).unwrap();
        scene.root.set_path(&path, scaled).unwrap();
        assert!(matches!(scene.root.get_path(&path), Some(ConfigNode::Number(v)) if *v == 141.5));

        assert!(matches!(
            scene.root.set_path(&["box1", "nope"], ConfigNode::Number(1.0)),
            Err(RadsimError::UnknownParameterPath(_))
        ));
        assert!(ConfigNode::Text("x".into()).scale(2.0).is_err());
    }

    #[test]
    fn test_simulation_config_null_mode() {
        let config: SimulationConfig = serde_yaml::from_str("nbins_d: 32\nsens_analysis: null\n").unwrap();
        assert_eq!(config.sens_analysis, AnalysisMode::None);
        assert_eq!(config.nbins_d, 32);
        let config: SimulationConfig = serde_yaml::from_str("sens_analysis: parallel\n").unwrap();
        assert_eq!(config.sens_analysis, AnalysisMode::Parallel);
        assert!(SimulationConfig { nbins_d: 1, ..SimulationConfig::default() }.validate().is_err());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"nbins_d": 16, "sens_analysis": "serial"}"#).unwrap();
        let config = SimulationConfig::load(&config_path).unwrap();
        assert_eq!(config.sens_analysis, AnalysisMode::Serial);

        let box_path = dir.path().join("boxes.yml");
        let mut file = std::fs::File::create(&box_path).unwrap();
        file.write_all(BOXES.as_bytes()).unwrap();
        let defaults_path = dir.path().join("defaults.yml");
        std::fs::write(&defaults_path, DEFAULT_BOX.replace("weight: 1", "weight: 2")).unwrap();

        let scene = SceneConfig::load(&box_path, Some(&defaults_path)).unwrap();
        assert_eq!(scene.root.get("box1").unwrap().number("weight").unwrap(), 2.0);
    }
}
