//! Polarimetric radar variables from integrated S and Z matrices

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use serde::Serialize;

use crate::constants::{wavelength_mm, KW};
use crate::RadsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PolVar {
    Zh,
    Zv,
    Zdr,
    Kdp,
    DeltaHv,
    Ah,
    Av,
    Rhohv,
}

impl PolVar {
    pub const ALL: [PolVar; 8] = [
        PolVar::Zh,
        PolVar::Zv,
        PolVar::Zdr,
        PolVar::Kdp,
        PolVar::DeltaHv,
        PolVar::Ah,
        PolVar::Av,
        PolVar::Rhohv,
    ];

    pub fn key(self) -> &'static str {
        match self {
            PolVar::Zh => "Zh",
            PolVar::Zv => "Zv",
            PolVar::Zdr => "Zdr",
            PolVar::Kdp => "Kdp",
            PolVar::DeltaHv => "Delta_hv",
            PolVar::Ah => "Ah",
            PolVar::Av => "Av",
            PolVar::Rhohv => "Rhohv",
        }
    }

    pub fn units(self) -> &'static str {
        match self {
            PolVar::Zh | PolVar::Zv => "mm^6*m^-3",
            PolVar::Zdr | PolVar::Rhohv => "-",
            PolVar::Kdp => "deg*km^-1",
            PolVar::DeltaHv => "rad",
            PolVar::Ah | PolVar::Av => "dB*km^-1",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PolVar::Zh => "Reflectivity factor at horizontal polarization",
            PolVar::Zv => "Reflectivity factor at vertical polarization",
            PolVar::Zdr => "Differential reflectivity",
            PolVar::Kdp => "Specific differential phase shift on propagation",
            PolVar::DeltaHv => "Phase shift on backscattering",
            PolVar::Ah => "Specific attenuation at horizontal polarization",
            PolVar::Av => "Specific attenuation at vertical polarization",
            PolVar::Rhohv => "Copolar correlation coefficient",
        }
    }
}

impl fmt::Display for PolVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolarimetricVariables {
    pub zh: f64,
    pub zv: f64,
    pub zdr: f64,
    pub kdp: f64,
    pub delta_hv: f64,
    pub ah: f64,
    pub av: f64,
    pub rhohv: f64,
}

impl PolarimetricVariables {
    pub fn get(&self, var: PolVar) -> f64 {
        match var {
            PolVar::Zh => self.zh,
            PolVar::Zv => self.zv,
            PolVar::Zdr => self.zdr,
            PolVar::Kdp => self.kdp,
            PolVar::DeltaHv => self.delta_hv,
            PolVar::Ah => self.ah,
            PolVar::Av => self.av,
            PolVar::Rhohv => self.rhohv,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PolVar, f64)> + '_ {
        PolVar::ALL.iter().map(move |&var| (var, self.get(var)))
    }
}

impl fmt::Display for PolarimetricVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, value) in self.iter() {
            writeln!(f, "{:<9} {:>14.6e} [{}]  {}", var.key(), value, var.units(), var.name())?;
        }
        Ok(())
    }
}

/// Radar variables from a flattened amplitude matrix `s` (2x2) and phase
/// matrix `z` (4x4) at `frequency` GHz
pub fn derive(s: &[Complex64; 4], z: &[f64; 16], frequency: f64) -> PolarimetricVariables {
    let wavelength = wavelength_mm(frequency);
    let zm = |i: usize, j: usize| z[4 * i + j];
    let (s00, s11) = (s[0], s[3]);

    let xsect_h = zm(0, 0) - zm(0, 1) - zm(1, 0) + zm(1, 1);
    let xsect_v = zm(0, 0) + zm(0, 1) + zm(1, 0) + zm(1, 1);
    let radar_factor = wavelength.powi(4) / (PI.powi(5) * KW);

    let zh = radar_factor * 2.0 * PI * xsect_h;
    let zv = radar_factor * 2.0 * PI * xsect_v;
    let zdr = xsect_h / xsect_v;

    let kdp = 1e-3 * (180.0 / PI) * wavelength * (s11 - s00).re;
    let delta_hv = (zm(2, 3) - zm(3, 2)).atan2(-zm(2, 2) - zm(3, 3));

    let ah = 4.343e-3 * 2.0 * wavelength * s11.im;
    let av = 4.343e-3 * 2.0 * wavelength * s00.im;

    let copolar = (zm(2, 2) + zm(3, 3)).powi(2) + (zm(3, 2) - zm(2, 3)).powi(2);
    let rhohv = (copolar / (xsect_h * xsect_v)).sqrt();

    PolarimetricVariables {
        zh,
        zv,
        zdr,
        kdp,
        delta_hv,
        ah,
        av,
        rhohv,
    }
}

/// Element-wise [`derive`] over arrays whose trailing axis holds the 4
/// components of S and the 16 components of Z; every output has the shape
/// of the leading axes
pub fn derive_grid(
    s: &ArrayD<Complex64>,
    z: &ArrayD<f64>,
    frequency: f64,
) -> Result<BTreeMap<PolVar, ArrayD<f64>>, RadsimError> {
    let (s_lead, s_last) = split_shape(s.shape())?;
    let (z_lead, z_last) = split_shape(z.shape())?;
    if s_last != 4 {
        return Err(RadsimError::LengthMismatch {
            context: "amplitude matrix components",
            expected: 4,
            got: s_last,
        });
    }
    if z_last != 16 {
        return Err(RadsimError::LengthMismatch {
            context: "phase matrix components",
            expected: 16,
            got: z_last,
        });
    }
    if s_lead != z_lead {
        return Err(RadsimError::InvalidInfoArray(format!(
            "S leading shape {s_lead:?} differs from Z leading shape {z_lead:?}"
        )));
    }

    let mut columns: BTreeMap<PolVar, Vec<f64>> =
        PolVar::ALL.iter().map(|&var| (var, Vec::new())).collect();
    for (s_row, z_row) in s.rows().into_iter().zip(z.rows()) {
        let s_cell: [Complex64; 4] = std::array::from_fn(|i| s_row[i]);
        let z_cell: [f64; 16] = std::array::from_fn(|i| z_row[i]);
        for (var, value) in derive(&s_cell, &z_cell, frequency).iter() {
            if let Some(column) = columns.get_mut(&var) {
                column.push(value);
            }
        }
    }

    columns
        .into_iter()
        .map(|(var, values)| {
            ArrayD::from_shape_vec(IxDyn(s_lead), values)
                .map(|array| (var, array))
                .map_err(|err| RadsimError::InvalidInfoArray(err.to_string()))
        })
        .collect()
}

fn split_shape(shape: &[usize]) -> Result<(&[usize], usize), RadsimError> {
    match shape.split_last() {
        Some((last, lead)) => Ok((lead, *last)),
        None => Err(RadsimError::InvalidInfoArray(
            "scattering arrays need at least one axis".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn literal_s() -> [Complex64; 4] {
        [
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(0.98, 0.01),
        ]
    }

    fn literal_z() -> [f64; 16] {
        [
            2.0, 0.1, 0.0, 0.0, //
            0.1, 1.8, 0.0, 0.0, //
            0.0, 0.0, -1.7, 0.05, //
            0.0, 0.0, -0.03, -1.6,
        ]
    }

    #[test]
    fn test_derive_matches_hand_computation() {
        let frequency = 5.6;
        let out = derive(&literal_s(), &literal_z(), frequency);

        let lambda = 299_792_458.0 / (frequency * 1e9) * 1000.0;
        let xsect_h = 2.0 - 0.1 - 0.1 + 1.8;
        let xsect_v = 2.0 + 0.1 + 0.1 + 1.8;
        let zh = lambda.powi(4) / (PI.powi(5) * 0.93) * 2.0 * PI * xsect_h;
        let kdp = 1e-3 * (180.0 / PI) * lambda * (0.98 - 1.0);
        let rhohv = (((-1.7_f64 - 1.6).powi(2) + (-0.03_f64 - 0.05).powi(2)) / (xsect_h * xsect_v)).sqrt();

        assert_relative_eq!(out.zh, zh, max_relative = 1e-9);
        assert_relative_eq!(out.zdr, xsect_h / xsect_v, max_relative = 1e-9);
        assert_relative_eq!(out.kdp, kdp, max_relative = 1e-9);
        assert_relative_eq!(out.rhohv, rhohv, max_relative = 1e-9);
        assert_relative_eq!(out.delta_hv, (0.05_f64 + 0.03).atan2(1.7 + 1.6), max_relative = 1e-9);
        assert_relative_eq!(out.ah, 4.343e-3 * 2.0 * lambda * 0.01, max_relative = 1e-9);
        assert_eq!(out.av, 0.0);
    }

    #[test]
    fn test_degenerate_denominator_propagates() {
        let out = derive(&literal_s(), &[0.0; 16], 5.6);
        assert!(out.zdr.is_nan());
        assert!(out.rhohv.is_nan());
    }

    #[test]
    fn test_derive_grid_is_elementwise() {
        let s_cell = literal_s();
        let z_cell = literal_z();
        let s = Array::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| s_cell[idx[2]] * (1.0 + idx[0] as f64 + idx[1] as f64));
        let z = Array::from_shape_fn(IxDyn(&[2, 3, 16]), |idx| z_cell[idx[2]] * (1.0 + idx[0] as f64 + idx[1] as f64));

        let grid = derive_grid(&s, &z, 5.6).unwrap();
        assert_eq!(grid.len(), PolVar::ALL.len());
        let kdp = &grid[&PolVar::Kdp];
        assert_eq!(kdp.shape(), &[2, 3]);

        let base = derive(&s_cell, &z_cell, 5.6);
        assert_relative_eq!(kdp[[1, 2]], 4.0 * base.kdp, max_relative = 1e-12);
        // ratios are scale free
        assert_relative_eq!(grid[&PolVar::Zdr][[1, 1]], base.zdr, max_relative = 1e-12);
    }

    #[test]
    fn test_derive_grid_rejects_wrong_components() {
        let s = ArrayD::<Complex64>::zeros(IxDyn(&[3, 2]));
        let z = ArrayD::<f64>::zeros(IxDyn(&[3, 16]));
        assert!(derive_grid(&s, &z, 5.6).is_err());
    }

    #[test]
    fn test_metadata() {
        assert_eq!(PolVar::DeltaHv.key(), "Delta_hv");
        assert_eq!(PolVar::Kdp.units(), "deg*km^-1");
        assert!(PolVar::ALL.iter().all(|v| !v.name().is_empty()));
    }
}
