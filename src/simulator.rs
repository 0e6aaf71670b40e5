//! Scene simulation and sensitivity sweeps
//!
//! [`Simulator`] is selected by [`AnalysisMode`]: a single pass over the
//! boxes, a serial sweep (one parameter at a time, the others nominal) or a
//! parallel sweep over the Cartesian grid of every tagged parameter. Sweep
//! grid points are evaluated one after the other; only the per-bin
//! scattering inside each point runs on the worker pool.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Dimension, IxDyn};
use tracing::{info, warn};

use crate::config::{AnalysisMode, ConfigNode, SceneConfig, SimulationConfig};
use crate::info_array::InfoArray;
use crate::polarimetry::{derive, PolVar, PolarimetricVariables};
use crate::scattering::{ScatteringComputer, ScatteringMatrices};
use crate::scene::SceneBox;
use crate::tags::SensitivityParameter;
use crate::RadsimError;

/// Target name of the all-box result
pub const INTEGRATED: &str = "integrated";

/// One InfoArray per radar variable
pub type VarArrays = BTreeMap<PolVar, InfoArray>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunOptions {
    /// Also derive the variables of all boxes combined
    pub integrated: bool,
    /// Frequency [GHz] for the combined result when boxes disagree
    pub frequency: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SingleSimulator {
    config: SimulationConfig,
    boxes: Vec<SceneBox>,
}

impl SingleSimulator {
    pub fn new(
        config: SimulationConfig,
        root: &ConfigNode,
        computer: &ScatteringComputer,
    ) -> Result<Self, RadsimError> {
        config.validate()?;
        let boxes = root
            .entries()
            .iter()
            .map(|(name, node)| SceneBox::from_config(name, node, config.nbins_d, computer))
            .collect::<Result<Vec<_>, RadsimError>>()?;
        Ok(Self { config, boxes })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn boxes(&self) -> &[SceneBox] {
        &self.boxes
    }

    pub fn box_names(&self) -> Vec<String> {
        self.boxes.iter().map(|b| b.name().to_string()).collect()
    }

    /// Push a configuration tree into the boxes
    pub fn apply(&mut self, root: &ConfigNode) -> Result<(), RadsimError> {
        let nbins_d = self.config.nbins_d;
        for scene_box in &mut self.boxes {
            let node = root
                .get(scene_box.name())
                .ok_or_else(|| RadsimError::UnknownParameterPath(scene_box.name().to_string()))?;
            scene_box.update(node, nbins_d)?;
        }
        Ok(())
    }

    /// Variables of every box, in file order
    pub fn get_pol_vars(&mut self) -> Result<Vec<(String, PolarimetricVariables)>, RadsimError> {
        self.boxes
            .iter_mut()
            .map(|scene_box| {
                let vars = scene_box.get_pol_vars()?;
                info!(box_name = scene_box.name(), zh = vars.zh, "box simulated");
                Ok((scene_box.name().to_string(), vars))
            })
            .collect()
    }

    /// Variables of the summed ensembles of all boxes
    ///
    /// The boxes must share one radar frequency unless `frequency` is given.
    pub fn get_integrated_pol_vars(
        &mut self,
        frequency: Option<f64>,
    ) -> Result<PolarimetricVariables, RadsimError> {
        let mut frequencies: Vec<f64> = Vec::new();
        for scene_box in &self.boxes {
            let f = scene_box.radar.frequency;
            if !frequencies.contains(&f) {
                frequencies.push(f);
            }
        }
        let frequency = match (frequency, frequencies.as_slice()) {
            (Some(chosen), _) => chosen,
            (None, [common]) => *common,
            (None, _) => return Err(RadsimError::FrequencyMismatch { frequencies }),
        };

        let mut total = ScatteringMatrices::zero();
        for scene_box in &mut self.boxes {
            total += scene_box.get_ensemble_sz()?;
        }
        Ok(derive(&total.s, &total.z, frequency))
    }

    /// Box variables followed by the integrated result when requested
    fn evaluate(&mut self, options: RunOptions) -> Result<Vec<(String, PolarimetricVariables)>, RadsimError> {
        let mut results = self.get_pol_vars()?;
        if options.integrated {
            results.push((INTEGRATED.to_string(), self.get_integrated_pol_vars(options.frequency)?));
        }
        Ok(results)
    }

    fn targets(&self, options: RunOptions) -> Vec<String> {
        let mut names = self.box_names();
        if options.integrated {
            names.push(INTEGRATED.to_string());
        }
        names
    }
}

/// Swept values of one parameter: factors and the axis they are reported on
struct SweepAxis {
    name: String,
    factors: Vec<f64>,
    values: Vec<f64>,
    nominal: ConfigNode,
}

#[derive(Debug, Clone)]
pub struct SerialTrace {
    pub parameter: String,
    pub targets: Vec<(String, VarArrays)>,
}

#[derive(Debug, Clone)]
pub enum Sweep {
    Serial(Vec<SerialTrace>),
    Parallel(Vec<(String, VarArrays)>),
}

#[derive(Debug, Clone)]
pub struct Sensitivity {
    /// Unperturbed results, per target
    pub reference: Vec<(String, PolarimetricVariables)>,
    pub sweep: Sweep,
}

#[derive(Debug, Clone)]
pub struct SensSimulator {
    single: SingleSimulator,
    nominal: ConfigNode,
    params: Vec<SensitivityParameter>,
}

impl SensSimulator {
    /// Every parameter path must name an existing, scalable entry
    pub fn new(
        single: SingleSimulator,
        nominal: ConfigNode,
        params: Vec<SensitivityParameter>,
    ) -> Result<Self, RadsimError> {
        for (idx, param) in params.iter().enumerate() {
            let node = nominal
                .get_path(&param.path)
                .ok_or_else(|| RadsimError::UnknownParameterPath(param.key()))?;
            node.scale(1.0)?;
            if params[..idx].iter().any(|earlier| earlier.path == param.path) {
                return Err(RadsimError::InvalidConfig(format!(
                    "parameter '{}' is swept more than once",
                    param.key()
                )));
            }
        }
        Ok(Self {
            single,
            nominal,
            params,
        })
    }

    pub fn parameters(&self) -> &[SensitivityParameter] {
        &self.params
    }

    pub fn single(&self) -> &SingleSimulator {
        &self.single
    }

    fn axis(&self, param: &SensitivityParameter, name: String) -> Result<SweepAxis, RadsimError> {
        let nominal = self
            .nominal
            .get_path(&param.path)
            .cloned()
            .ok_or_else(|| RadsimError::UnknownParameterPath(param.key()))?;
        let factors = param.factors();
        let values = match nominal {
            ConfigNode::Number(value) => factors.iter().map(|f| f * value).collect(),
            _ => factors.clone(),
        };
        Ok(SweepAxis {
            name,
            factors,
            values,
            nominal,
        })
    }

    fn reference(&mut self, options: RunOptions) -> Result<Vec<(String, PolarimetricVariables)>, RadsimError> {
        self.single.apply(&self.nominal)?;
        let reference = self.single.evaluate(options)?;
        info!(targets = reference.len(), "reference computed");
        Ok(reference)
    }

    /// Sweep each parameter on its own, the others held at nominal
    pub fn run_serial(&mut self, options: RunOptions) -> Result<Sensitivity, RadsimError> {
        let reference = self.reference(options)?;
        let targets = self.single.targets(options);

        let mut traces = Vec::with_capacity(self.params.len());
        for param in self.params.clone() {
            let last = param.path.last().cloned().unwrap_or_default();
            let axis = self.axis(&param, last.clone())?;
            let name = if axis.nominal.is_scalar() {
                last
            } else {
                format!("{last} factor")
            };

            let mut columns: Vec<BTreeMap<PolVar, Vec<f64>>> = vec![BTreeMap::new(); targets.len()];
            for (step, factor) in axis.factors.iter().enumerate() {
                info!(
                    parameter = %param.key(),
                    step = step + 1,
                    total = axis.factors.len(),
                    factor,
                    "sensitivity step"
                );
                let mut tree = self.nominal.clone();
                tree.set_path(&param.path, axis.nominal.scale(*factor)?)?;
                self.single.apply(&tree)?;
                for (column, (_, vars)) in columns.iter_mut().zip(self.single.evaluate(options)?) {
                    for (var, value) in vars.iter() {
                        column.entry(var).or_default().push(value);
                    }
                }
            }

            let per_target = targets
                .iter()
                .zip(columns)
                .map(|(target, column)| {
                    let arrays = column
                        .into_iter()
                        .map(|(var, trace)| {
                            InfoArray::from_trace(name.clone(), axis.values.clone(), trace)
                                .map(|array| (var, array))
                        })
                        .collect::<Result<VarArrays, RadsimError>>()?;
                    Ok((target.clone(), arrays))
                })
                .collect::<Result<Vec<_>, RadsimError>>()?;
            traces.push(SerialTrace {
                parameter: param.key(),
                targets: per_target,
            });
        }

        self.single.apply(&self.nominal)?;
        Ok(Sensitivity {
            reference,
            sweep: Sweep::Serial(traces),
        })
    }

    /// Sweep the Cartesian grid of all parameters
    pub fn run_parallel(&mut self, options: RunOptions) -> Result<Sensitivity, RadsimError> {
        let reference = self.reference(options)?;
        let targets = self.single.targets(options);

        let axes = self
            .params
            .iter()
            .map(|param| self.axis(param, param.key()))
            .collect::<Result<Vec<_>, RadsimError>>()?;
        let names: Vec<String> = axes.iter().map(|axis| axis.name.clone()).collect();
        let values: Vec<Vec<f64>> = axes.iter().map(|axis| axis.values.clone()).collect();
        let shape: Vec<usize> = axes.iter().map(|axis| axis.factors.len()).collect();

        let mut grids = targets
            .iter()
            .map(|target| {
                let arrays = PolVar::ALL
                    .iter()
                    .map(|&var| Ok((var, InfoArray::nan(names.clone(), values.clone())?)))
                    .collect::<Result<VarArrays, RadsimError>>()?;
                Ok((target.clone(), arrays))
            })
            .collect::<Result<Vec<_>, RadsimError>>()?;

        let total: usize = shape.iter().product();
        for (step, index) in ndarray::indices(IxDyn(&shape)).into_iter().enumerate() {
            let index = index.slice();
            info!(step = step + 1, total, index = ?index, "sensitivity grid point");

            let mut tree = self.nominal.clone();
            for ((param, axis), &i) in self.params.iter().zip(&axes).zip(index) {
                tree.set_path(&param.path, axis.nominal.scale(axis.factors[i])?)?;
            }
            self.single.apply(&tree)?;
            for ((_, arrays), (_, vars)) in grids.iter_mut().zip(self.single.evaluate(options)?) {
                for (var, value) in vars.iter() {
                    if let Some(array) = arrays.get_mut(&var) {
                        array.set(index, value)?;
                    }
                }
            }
        }

        self.single.apply(&self.nominal)?;
        Ok(Sensitivity {
            reference,
            sweep: Sweep::Parallel(grids),
        })
    }
}

#[derive(Debug, Clone)]
pub enum SimulationOutput {
    Single {
        boxes: Vec<(String, PolarimetricVariables)>,
        integrated: Option<PolarimetricVariables>,
    },
    Sensitivity(Sensitivity),
}

#[derive(Debug, Clone)]
pub enum Simulator {
    Single(SingleSimulator),
    SerialSweep(SensSimulator),
    ParallelSweep(SensSimulator),
}

impl Simulator {
    pub fn build(
        config: SimulationConfig,
        scene: SceneConfig,
        computer: &ScatteringComputer,
    ) -> Result<Self, RadsimError> {
        let mode = config.sens_analysis;
        let single = SingleSimulator::new(config, &scene.root, computer)?;
        match mode {
            AnalysisMode::None => {
                if !scene.sens_params.is_empty() {
                    warn!(
                        tags = scene.sens_params.len(),
                        "sensitivity tags found but sens_analysis is none, ignoring them"
                    );
                }
                Ok(Simulator::Single(single))
            }
            AnalysisMode::Serial | AnalysisMode::Parallel => {
                if scene.sens_params.is_empty() {
                    warn!(
                        mode = ?mode,
                        "sensitivity analysis requested but no parameter is tagged, running a single simulation"
                    );
                    return Ok(Simulator::Single(single));
                }
                let sens = SensSimulator::new(single, scene.root, scene.sens_params)?;
                Ok(if mode == AnalysisMode::Serial {
                    Simulator::SerialSweep(sens)
                } else {
                    Simulator::ParallelSweep(sens)
                })
            }
        }
    }

    /// Load both files and simulate with the built-in Rayleigh provider
    pub fn from_files(
        config_path: Option<&Path>,
        boxes_path: &Path,
        defaults_path: Option<&Path>,
    ) -> Result<Self, RadsimError> {
        let config = match config_path {
            Some(path) => SimulationConfig::load(path)?,
            None => SimulationConfig::default(),
        };
        let scene = SceneConfig::load(boxes_path, defaults_path)?;
        let computer = ScatteringComputer::rayleigh(config.workers)?;
        Self::build(config, scene, &computer)
    }

    pub fn mode(&self) -> AnalysisMode {
        match self {
            Simulator::Single(_) => AnalysisMode::None,
            Simulator::SerialSweep(_) => AnalysisMode::Serial,
            Simulator::ParallelSweep(_) => AnalysisMode::Parallel,
        }
    }

    pub fn run(&mut self, options: RunOptions) -> Result<SimulationOutput, RadsimError> {
        match self {
            Simulator::Single(single) => {
                let boxes = single.get_pol_vars()?;
                let integrated = if options.integrated {
                    Some(single.get_integrated_pol_vars(options.frequency)?)
                } else {
                    None
                };
                Ok(SimulationOutput::Single { boxes, integrated })
            }
            Simulator::SerialSweep(sens) => sens.run_serial(options).map(SimulationOutput::Sensitivity),
            Simulator::ParallelSweep(sens) => sens.run_parallel(options).map(SimulationOutput::Sensitivity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SCENE: &str = "\
storm:
    atmosphere:
        T: 283 %sens(50,150,5)
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 8000, 2.0]
";

    fn config(mode: AnalysisMode) -> SimulationConfig {
        SimulationConfig {
            nbins_d: 16,
            sens_analysis: mode,
            workers: 2,
        }
    }

    fn simulator(text: &str, mode: AnalysisMode) -> Simulator {
        let scene = SceneConfig::parse_with_builtin_defaults(text).unwrap();
        let computer = ScatteringComputer::rayleigh(2).unwrap();
        Simulator::build(config(mode), scene, &computer).unwrap()
    }

    #[test]
    fn test_mode_selects_variant() {
        assert_eq!(simulator(SCENE, AnalysisMode::None).mode(), AnalysisMode::None);
        assert_eq!(simulator(SCENE, AnalysisMode::Serial).mode(), AnalysisMode::Serial);
        assert_eq!(simulator(SCENE, AnalysisMode::Parallel).mode(), AnalysisMode::Parallel);
    }

    #[test]
    fn test_untagged_scene_falls_back_to_single() {
        let untagged = SCENE.replace(" %sens(50,150,5)", "");
        for mode in [AnalysisMode::Serial, AnalysisMode::Parallel] {
            let mut sim = simulator(&untagged, mode);
            assert_eq!(sim.mode(), AnalysisMode::None);
            let SimulationOutput::Single { boxes, .. } = sim.run(RunOptions::default()).unwrap() else {
                panic!("expected single output");
            };
            assert_eq!(boxes.len(), 1);
            assert!(boxes[0].1.zh.is_finite());
        }
    }

    #[test]
    fn test_serial_sweep_shape() {
        let mut sim = simulator(SCENE, AnalysisMode::Serial);
        let SimulationOutput::Sensitivity(out) = sim.run(RunOptions::default()).unwrap() else {
            panic!("expected sensitivity output");
        };
        assert_eq!(out.reference.len(), 1);
        let Sweep::Serial(traces) = out.sweep else {
            panic!("expected serial sweep");
        };
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].parameter, "storm/atmosphere/T");

        let (target, arrays) = &traces[0].targets[0];
        assert_eq!(target, "storm");
        let zh = &arrays[&PolVar::Zh];
        assert_eq!(zh.shape(), &[5]);
        assert_eq!(zh.axis_names(), &["T".to_string()]);
        let expected = [0.5, 0.75, 1.0, 1.25, 1.5];
        for (value, factor) in zh.axis_values()[0].iter().zip(expected) {
            assert_relative_eq!(*value, factor * 283.0, max_relative = 1e-12);
        }
        // the middle point is the nominal state
        assert_relative_eq!(zh.get(&[2]).unwrap(), out.reference[0].1.zh, max_relative = 1e-12);
    }

    #[test]
    fn test_serial_axis_of_non_scalar_parameter() {
        let text = SCENE
            .replace(" %sens(50,150,5)", "")
            .replace("2.0]", "2.0] %sens(80,120,3)");
        let mut sim = simulator(&text, AnalysisMode::Serial);
        let SimulationOutput::Sensitivity(out) = sim.run(RunOptions::default()).unwrap() else {
            panic!("expected sensitivity output");
        };
        let Sweep::Serial(traces) = out.sweep else {
            panic!("expected serial sweep");
        };
        let zh = &traces[0].targets[0].1[&PolVar::Zh];
        assert_eq!(zh.axis_names(), &["psd factor".to_string()]);
        assert_eq!(zh.axis_values()[0], vec![0.8, 1.0, 1.2]);
        assert!(zh.get(&[2]).unwrap() > zh.get(&[0]).unwrap());
    }

    #[test]
    fn test_parallel_sweep_fills_grid() {
        let text = "\
storm:
    atmosphere:
        T: 283 %sens(90,110,3)
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 8000, 2.0] %sens(50,150,4)
";
        let mut sim = simulator(text, AnalysisMode::Parallel);
        let options = RunOptions {
            integrated: true,
            frequency: None,
        };
        let SimulationOutput::Sensitivity(out) = sim.run(options).unwrap() else {
            panic!("expected sensitivity output");
        };
        assert_eq!(out.reference.len(), 2);
        let Sweep::Parallel(grids) = out.sweep else {
            panic!("expected parallel sweep");
        };
        assert_eq!(grids.len(), 2);
        assert_eq!(grids[1].0, INTEGRATED);
        for (_, arrays) in &grids {
            assert_eq!(arrays.len(), PolVar::ALL.len());
            for array in arrays.values() {
                assert_eq!(array.shape(), &[3, 4]);
                assert_eq!(array.count_nan(), 0);
                assert_eq!(
                    array.axis_names(),
                    &["storm/atmosphere/T".to_string(), "storm/hydrometeors/rain/psd".to_string()]
                );
            }
        }
        let zh = &grids[0].1[&PolVar::Zh];
        assert!(zh.get(&[1, 3]).unwrap() > zh.get(&[1, 0]).unwrap());
    }

    #[test]
    fn test_unknown_parameter_path() {
        let scene = SceneConfig::parse_with_builtin_defaults(SCENE).unwrap();
        let computer = ScatteringComputer::rayleigh(1).unwrap();
        let single = SingleSimulator::new(config(AnalysisMode::Serial), &scene.root, &computer).unwrap();
        let bad = SensitivityParameter::new(
            vec!["storm".into(), "radar".into(), "power".into()],
            50.0,
            150.0,
            3,
        );
        assert!(matches!(
            SensSimulator::new(single.clone(), scene.root.clone(), vec![bad]),
            Err(RadsimError::UnknownParameterPath(path)) if path == "storm/radar/power"
        ));

        let not_scalable = SensitivityParameter::new(vec!["storm".into(), "hydrometeors".into()], 50.0, 150.0, 3);
        assert!(SensSimulator::new(single, scene.root, vec![not_scalable]).is_err());
    }

    #[test]
    fn test_frequency_mismatch_needs_override() {
        let text = "\
near:
    radar:
        frequency: 5.6
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 8000, 2.0]
far:
    radar:
        frequency: 9.41
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 4000, 2.0]
";
        let Simulator::Single(mut single) = simulator(text, AnalysisMode::None) else {
            panic!("expected single simulator");
        };
        assert!(matches!(
            single.get_integrated_pol_vars(None),
            Err(RadsimError::FrequencyMismatch { frequencies }) if frequencies == vec![5.6, 9.41]
        ));
        let combined = single.get_integrated_pol_vars(Some(5.6)).unwrap();
        let per_box = single.get_pol_vars().unwrap();
        assert!(combined.zh > per_box[0].1.zh);
    }
}
