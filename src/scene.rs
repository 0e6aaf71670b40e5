//! Boxes: the spatial units of a simulated scene
//!
//! A [`SceneBox`] owns its hydrometeors and the radar, atmosphere and
//! geometry context they are simulated in. Its ensemble scattering is the
//! plain sum of the hydrometeors' integrated matrices; the box weight is
//! carried along but not applied.

use std::fmt;

use tracing::debug;

use crate::config::ConfigNode;
use crate::hydrometeor::{Environment, Hydrometeor, HydrometeorSpec};
use crate::polarimetry::{derive, PolarimetricVariables};
use crate::scattering::{ScatteringComputer, ScatteringMatrices};
use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radar {
    /// [GHz]
    pub frequency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Atmosphere {
    /// [K]
    pub temperature: f64,
    /// [hPa]
    pub pressure: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxGeometry {
    /// [deg]
    pub elevation_angle: f64,
    /// [deg]
    pub azimuth: f64,
    pub position: Vec<f64>,
    pub size: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SceneBox {
    name: String,
    pub radar: Radar,
    pub atmosphere: Atmosphere,
    pub geometry: BoxGeometry,
    pub weight: f64,
    hydrometeors: Vec<Hydrometeor>,
}

struct BoxSettings {
    radar: Radar,
    atmosphere: Atmosphere,
    geometry: BoxGeometry,
    weight: f64,
}

fn box_settings(node: &ConfigNode) -> Result<BoxSettings, RadsimError> {
    let radar = node.map("radar")?;
    let atmosphere = node.map("atmosphere")?;
    let geometry = node.map("geometry")?;
    Ok(BoxSettings {
        radar: Radar {
            frequency: radar.number("frequency")?,
        },
        atmosphere: Atmosphere {
            temperature: atmosphere.number("T")?,
            pressure: atmosphere.number("P")?,
        },
        geometry: BoxGeometry {
            elevation_angle: geometry.number("elevation_angle")?,
            azimuth: geometry.number("azimuth")?,
            position: geometry.numbers("position")?.to_vec(),
            size: geometry.numbers("size")?.to_vec(),
        },
        weight: node.number("weight")?,
    })
}

/// Particle description of one hydrometeor entry, with `psd_range`
/// applied to the PSD domain
pub fn hydrometeor_spec(node: &ConfigNode) -> Result<HydrometeorSpec, RadsimError> {
    let mut psd = node.psd("psd")?.clone();
    if node.get("psd_range").is_some() {
        match node.numbers("psd_range")? {
            [dmin, dmax] => psd = psd.with_range(*dmin, *dmax)?,
            other => {
                return Err(RadsimError::LengthMismatch {
                    context: "psd_range",
                    expected: 2,
                    got: other.len(),
                })
            }
        }
    }
    Ok(HydrometeorSpec {
        psd,
        aspect_ratio: node.model("aspect_ratio")?.clone(),
        canting_angle_std: node.number("canting_angle_std")?,
        permittivity: node.model("permittivity")?.clone(),
    })
}

impl SceneBox {
    pub fn new(
        name: impl Into<String>,
        radar: Radar,
        atmosphere: Atmosphere,
        geometry: BoxGeometry,
        weight: f64,
        hydrometeors: Vec<Hydrometeor>,
    ) -> Self {
        Self {
            name: name.into(),
            radar,
            atmosphere,
            geometry,
            weight,
            hydrometeors,
        }
    }

    /// Build a box from its configuration subtree
    pub fn from_config(
        name: &str,
        node: &ConfigNode,
        nbins_d: usize,
        computer: &ScatteringComputer,
    ) -> Result<Self, RadsimError> {
        let settings = box_settings(node)?;
        let env = environment(&settings, nbins_d);
        let hydrometeors = node
            .map("hydrometeors")?
            .entries()
            .iter()
            .map(|(hydro_name, hydro)| {
                Ok(Hydrometeor::new(
                    hydro_name.clone(),
                    hydrometeor_spec(hydro)?,
                    env,
                    computer.clone(),
                ))
            })
            .collect::<Result<Vec<_>, RadsimError>>()?;

        Ok(Self::new(
            name,
            settings.radar,
            settings.atmosphere,
            settings.geometry,
            settings.weight,
            hydrometeors,
        ))
    }

    /// Push a (possibly perturbed) configuration into the existing box,
    /// keeping the hydrometeor caches
    pub fn update(&mut self, node: &ConfigNode, nbins_d: usize) -> Result<(), RadsimError> {
        let settings = box_settings(node)?;
        let env = environment(&settings, nbins_d);
        let entries = node.map("hydrometeors")?;
        for hydrometeor in &mut self.hydrometeors {
            let hydro = entries.map(hydrometeor.name())?;
            hydrometeor.update(hydrometeor_spec(hydro)?, env);
        }
        self.radar = settings.radar;
        self.atmosphere = settings.atmosphere;
        self.geometry = settings.geometry;
        self.weight = settings.weight;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hydrometeors(&self) -> &[Hydrometeor] {
        &self.hydrometeors
    }

    pub fn hydrometeors_mut(&mut self) -> &mut [Hydrometeor] {
        &mut self.hydrometeors
    }

    /// Unweighted sum of the hydrometeors' integrated S and Z
    pub fn get_ensemble_sz(&mut self) -> Result<ScatteringMatrices, RadsimError> {
        let mut ensemble = ScatteringMatrices::zero();
        for hydrometeor in &mut self.hydrometeors {
            ensemble += hydrometeor.integrate_sz()?;
        }
        debug!(
            box_name = %self.name,
            hydrometeors = self.hydrometeors.len(),
            "ensemble scattering ready"
        );
        Ok(ensemble)
    }

    pub fn get_pol_vars(&mut self) -> Result<PolarimetricVariables, RadsimError> {
        let ensemble = self.get_ensemble_sz()?;
        Ok(derive(&ensemble.s, &ensemble.z, self.radar.frequency))
    }
}

fn environment(settings: &BoxSettings, nbins_d: usize) -> Environment {
    Environment {
        frequency: settings.radar.frequency,
        temperature: settings.atmosphere.temperature,
        elevation_angle: settings.geometry.elevation_angle,
        nbins_d,
    }
}

impl fmt::Display for SceneBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Box name: {}", self.name)?;
        writeln!(f, "Radar frequency: {} GHz", self.radar.frequency)?;
        writeln!(
            f,
            "Atmosphere: T = {} K, P = {} hPa",
            self.atmosphere.temperature, self.atmosphere.pressure
        )?;
        writeln!(
            f,
            "Geometry: elevation {} deg, azimuth {} deg, position {:?}, size {:?}",
            self.geometry.elevation_angle,
            self.geometry.azimuth,
            self.geometry.position,
            self.geometry.size
        )?;
        writeln!(f, "Weight: {}", self.weight)?;
        writeln!(f, "Hydrometeors:")?;
        for hydrometeor in &self.hydrometeors {
            for line in hydrometeor.to_string().lines() {
                writeln!(f, "   {line}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use approx::assert_relative_eq;

    const SCENE: &str = "\
storm:
    weight: 4
    radar:
        frequency: 9.41
    hydrometeors:
        rain:
            psd: [ExponentialPSD, 8000, 2.0]
        small_rain:
            psd: [ExponentialPSD, 2000, 3.0]
            aspect_ratio: Thurai_2007
            permittivity: water
";

    fn build(text: &str) -> (SceneConfig, SceneBox) {
        let scene = SceneConfig::parse_with_builtin_defaults(text).unwrap();
        let computer = ScatteringComputer::rayleigh(2).unwrap();
        let node = scene.root.get("storm").unwrap();
        let scene_box = SceneBox::from_config("storm", node, 24, &computer).unwrap();
        (scene, scene_box)
    }

    #[test]
    fn test_box_reads_configuration() {
        let (_, scene_box) = build(SCENE);
        assert_eq!(scene_box.radar.frequency, 9.41);
        assert_eq!(scene_box.atmosphere.temperature, 283.0);
        assert_eq!(scene_box.weight, 4.0);
        assert_eq!(scene_box.hydrometeors().len(), 2);
        let rain = &scene_box.hydrometeors()[0];
        assert_eq!(rain.name(), "rain");
        // psd_range default replaces the ExponentialPSD domain
        assert_eq!((rain.spec().psd.dmin(), rain.spec().psd.dmax()), (0.1, 20.0));
    }

    #[test]
    fn test_ensemble_is_unweighted_sum() {
        let (_, mut scene_box) = build(SCENE);
        let h1 = scene_box.hydrometeors_mut()[0].integrate_sz().unwrap();
        let h2 = scene_box.hydrometeors_mut()[1].integrate_sz().unwrap();
        let ensemble = scene_box.get_ensemble_sz().unwrap();
        for i in 0..16 {
            assert_relative_eq!(ensemble.z[i], h1.z[i] + h2.z[i], max_relative = 1e-12);
        }
        for i in 0..4 {
            assert_relative_eq!(ensemble.s[i].re, h1.s[i].re + h2.s[i].re, max_relative = 1e-12);
        }

        let (_, mut light_box) = build(&SCENE.replace("weight: 4", "weight: 1"));
        let light = light_box.get_ensemble_sz().unwrap();
        assert_relative_eq!(light.z[0], ensemble.z[0], max_relative = 1e-12);
    }

    #[test]
    fn test_update_keeps_scattering_cache() {
        let (mut scene, mut scene_box) = build(SCENE);
        let before = scene_box.get_pol_vars().unwrap();

        let path = ["storm", "hydrometeors", "rain", "psd"];
        let doubled = scene.root.get_path(&path).unwrap().scale(2.0).unwrap();
        scene.root.set_path(&path, doubled).unwrap();
        scene_box
            .update(scene.root.get("storm").unwrap(), 24)
            .unwrap();
        let after = scene_box.get_pol_vars().unwrap();

        assert!(after.zh > before.zh);
        assert!(scene_box
            .hydrometeors()
            .iter()
            .all(|hydrometeor| hydrometeor.provider_runs() == 1));
    }

    #[test]
    fn test_presets_simulate_over_default_range() {
        for preset in ["Thurai_2007", "Andsager_1999", "Brandes_2002"] {
            let text = SCENE.replace("aspect_ratio: Thurai_2007", &format!("aspect_ratio: {preset}"));
            let (_, mut scene_box) = build(&text);
            assert_eq!(scene_box.hydrometeors()[1].spec().psd.dmax(), 20.0);
            let vars = scene_box.get_pol_vars().unwrap();
            assert!(vars.zh.is_finite() && vars.zdr.is_finite() && vars.zdr > 0.0, "{preset}: {vars:?}");
        }
    }

    #[test]
    fn test_bad_psd_range_is_rejected() {
        let text = SCENE.replace(
            "psd: [ExponentialPSD, 8000, 2.0]",
            "psd: [ExponentialPSD, 8000, 2.0]\n            psd_range: [1.0, 2.0, 3.0]",
        );
        let scene = SceneConfig::parse_with_builtin_defaults(&text).unwrap();
        let computer = ScatteringComputer::rayleigh(1).unwrap();
        let node = scene.root.get("storm").unwrap();
        assert!(SceneBox::from_config("storm", node, 24, &computer).is_err());
    }
}
