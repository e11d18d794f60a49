//! Physical constants used across the pipeline
//!
//! All values are SI.

/// Specific gas constant of water vapor (J kg⁻¹ K⁻¹)
pub const GAS_CONSTANT_VAPOR: f64 = 461.5;

/// Specific gas constant of dry air (J kg⁻¹ K⁻¹)
pub const GAS_CONSTANT_DRY_AIR: f64 = 287.05;

/// Universal gas constant (J mol⁻¹ K⁻¹)
pub const UNIVERSAL_GAS_CONSTANT: f64 = 8.314_462_618;

/// Molar mass of dry air (kg/mol)
pub const MOLAR_MASS_DRY_AIR: f64 = 0.028_964_5;

/// Molar mass of water vapor (kg/mol)
pub const MOLAR_MASS_VAPOR: f64 = 0.018_015;

/// Molar mass of carbon dioxide (kg/mol)
pub const MOLAR_MASS_CO2: f64 = 0.044_01;

/// Specific heat of dry air at constant pressure (J kg⁻¹ K⁻¹)
pub const SPECIFIC_HEAT_DRY_AIR: f64 = 1004.67;

/// von Kármán constant
pub const VON_KARMAN: f64 = 0.41;

/// Gravitational acceleration (m/s²)
pub const GRAVITY: f64 = 9.81;

/// Freezing point of water (K)
pub const FREEZING_POINT_K: f64 = 273.15;

/// Latent heat of vaporization (J/kg) at air temperature `t_kelvin`
pub fn latent_heat_vaporization(t_kelvin: f64) -> f64 {
    2.501e6 - 2370.0 * (t_kelvin - FREEZING_POINT_K)
}

/// Saturation vapor pressure (Pa) over water, Bolton's form of the Tetens equation
pub fn saturation_vapor_pressure(t_kelvin: f64) -> f64 {
    611.2 * (17.67 * (t_kelvin - FREEZING_POINT_K) / (t_kelvin - 29.65)).exp()
}
