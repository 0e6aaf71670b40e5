//! Physical and microphysical constants
//!
//! Lengths are in millimetres unless stated otherwise. Number concentrations
//! follow the radar convention of particles per mm of diameter per m^3.

/// Speed of light [m/s]
pub const C: f64 = 299_792_458.0;

/// Density of liquid water at 10 degC [kg/mm^3]
pub const RHO_W: f64 = 1000.0 / (1000.0 * 1000.0 * 1000.0);

/// Dielectric factor |K|^2 of water at weather radar frequencies
pub const KW: f64 = 0.93;

/// Freezing point [K]
pub const T_FREEZE: f64 = 273.15;

/// Radar wavelength [mm] for a frequency in GHz
pub fn wavelength_mm(frequency_ghz: f64) -> f64 {
    C / (frequency_ghz * 1e9) * 1000.0
}

// COSMO one-moment scheme (Doms et al., 2011), SI units as published.

/// Rain PSD shape parameter
pub const MU_R: f64 = 0.5;
/// Rain mass-diameter prefactor, m = a D^b [kg m^-b]
pub const AM_R: f64 = std::f64::consts::PI / 6.0 * 1000.0;
/// Rain mass-diameter exponent
pub const BM_R: f64 = 3.0;
/// Marshall-Palmer intercept [m^-4]
pub const N0_R_MP: f64 = 8.0e6;

/// Snow PSD shape parameter
pub const MU_S: f64 = 0.0;
/// Snow mass-diameter prefactor [kg m^-b]
pub const AM_S: f64 = 0.069;
/// Snow mass-diameter exponent
pub const BM_S: f64 = 2.0;

/// Graupel PSD shape parameter
pub const MU_G: f64 = 0.0;
/// Graupel mass-diameter prefactor [kg m^-b]
pub const AM_G: f64 = 169.6;
/// Graupel mass-diameter exponent
pub const BM_G: f64 = 3.1;
/// Graupel intercept [m^-4]
pub const N0_G_SI: f64 = 4.0e6;

/// Rain intercept in SI units [m^-(4+mu)], N0 = 8e6 exp(3.2 mu) 0.01^-mu
pub fn n0_rain_si() -> f64 {
    N0_R_MP * (3.2 * MU_R).exp() * 0.01_f64.powf(-MU_R)
}

/// Temperature dependent snow intercept [mm^-1 m^-3] (Field et al., 2005 fit used by COSMO)
pub fn n0_snow(temperature_k: f64) -> f64 {
    13.5 * (5.65 * 10f64.powi(5) * (-0.107 * (temperature_k - T_FREEZE)).exp()) / 1000.0
}

/// Converts an SI intercept [m^-(4+mu)] to [mm^-(1+mu) m^-3]
pub fn intercept_to_mm(n0_si: f64, mu: f64) -> f64 {
    n0_si * 1e-3_f64.powf(mu) * 1e-3
}

/// Converts a mass-diameter prefactor [kg m^-b] to [kg mm^-b]
pub fn mass_prefactor_to_mm(am_si: f64, bm: f64) -> f64 {
    am_si * 1e-3_f64.powf(bm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wavelength_c_band() {
        let wl = wavelength_mm(5.6);
        assert!((wl - 53.534_367_5).abs() < 1e-6);
    }

    #[test]
    fn test_rain_prefactor_matches_water_density() {
        let am_mm = mass_prefactor_to_mm(AM_R, BM_R);
        let expected = std::f64::consts::PI / 6.0 * RHO_W;
        assert!((am_mm - expected).abs() < 1e-20);
    }

    #[test]
    fn test_snow_intercept_decreases_with_temperature() {
        assert!(n0_snow(263.15) > n0_snow(273.15));
    }
}
