//! Water use efficiency estimation
//!
//! WUE is either prescribed by the caller or computed from a leaf gas-exchange
//! model: ambient concentrations are extrapolated from the measurement height to
//! the canopy with a surface-layer profile, intercellular concentrations come from
//! leaf temperature (vapor) and a ci model (CO2).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{Param, WueSource};
use crate::constants::{
    saturation_vapor_pressure, GAS_CONSTANT_VAPOR, MOLAR_MASS_CO2, UNIVERSAL_GAS_CONSTANT,
    VON_KARMAN,
};
use crate::error::{ConfigError, RejectReason};
use crate::types::IntervalStatistics;

/// Default ratio of water vapor to CO2 molecular diffusivities
pub const DEFAULT_DIFF_RATIO: f64 = 1.6;

/// Photosynthetic pathway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pathway {
    C3,
    C4,
}

impl FromStr for Pathway {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C3" => Ok(Pathway::C3),
            "C4" => Ok(Pathway::C4),
            _ => Err(ConfigError::UnknownPathway(s.to_string())),
        }
    }
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pathway::C3 => f.write_str("C3"),
            Pathway::C4 => f.write_str("C4"),
        }
    }
}

/// Model for the intercellular CO2 concentration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum CiModel {
    /// ci/ca = ratio
    ConstRatio { ratio: f64 },
    /// ca - ci = delta (ppm)
    ConstPpm { delta_ppm: f64 },
    /// ci/ca = intercept - slope * vpd (vpd in Pa)
    Linear { intercept: f64, slope: f64 },
    /// ci/ca = 1 - sqrt(diff_ratio * lambda * vpd / ca)
    Sqrt { lambda: f64 },
}

impl CiModel {
    pub const NAMES: [&'static str; 4] = ["const_ratio", "const_ppm", "linear", "sqrt"];

    /// Build a ci model from its name and parameters; an empty parameter list
    /// selects the pathway default
    pub fn from_name(name: &str, params: &[f64], pathway: Pathway) -> Result<Self, ConfigError> {
        let name = name.trim().to_ascii_lowercase();
        let expected = match name.as_str() {
            "const_ratio" | "const_ppm" | "sqrt" => 1,
            "linear" => 2,
            _ => return Err(ConfigError::UnknownCiModel(name)),
        };

        if params.is_empty() {
            return Ok(Self::default_for(&name, pathway));
        }
        if params.len() != expected {
            return Err(ConfigError::MissingParameter {
                ci_mod: name,
                expected,
                got: params.len(),
            });
        }
        if let Some(&bad) = params.iter().find(|p| !p.is_finite()) {
            return Err(ConfigError::InvalidParameter {
                name: format!("ci_mod_param ({name})"),
                value: bad,
            });
        }

        let model = match name.as_str() {
            "const_ratio" => CiModel::ConstRatio { ratio: params[0] },
            "const_ppm" => CiModel::ConstPpm {
                delta_ppm: params[0],
            },
            "linear" => CiModel::Linear {
                intercept: params[0],
                slope: params[1],
            },
            _ => CiModel::Sqrt { lambda: params[0] },
        };
        model.validate()?;
        Ok(model)
    }

    fn default_for(name: &str, pathway: Pathway) -> Self {
        match (name, pathway) {
            ("const_ppm", Pathway::C3) => CiModel::ConstPpm { delta_ppm: 280.0 },
            ("const_ppm", Pathway::C4) => CiModel::ConstPpm { delta_ppm: 130.0 },
            ("linear", Pathway::C3) => CiModel::Linear {
                intercept: 1.0,
                slope: 1.6e-4,
            },
            ("linear", Pathway::C4) => CiModel::Linear {
                intercept: 1.0,
                slope: 2.7e-4,
            },
            ("sqrt", Pathway::C3) => CiModel::Sqrt { lambda: 22e-9 },
            ("sqrt", Pathway::C4) => CiModel::Sqrt { lambda: 4e-9 },
            (_, Pathway::C3) => CiModel::ConstRatio { ratio: 0.70 },
            (_, Pathway::C4) => CiModel::ConstRatio { ratio: 0.44 },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (name, value) = match *self {
            CiModel::ConstRatio { ratio } if ratio <= 0.0 => ("ratio", ratio),
            CiModel::Sqrt { lambda } if lambda < 0.0 => ("lambda", lambda),
            _ => return Ok(()),
        };
        Err(ConfigError::InvalidParameter {
            name: format!("ci_mod_param ({name})"),
            value,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CiModel::ConstRatio { .. } => "const_ratio",
            CiModel::ConstPpm { .. } => "const_ppm",
            CiModel::Linear { .. } => "linear",
            CiModel::Sqrt { .. } => "sqrt",
        }
    }

    pub fn params(&self) -> Vec<f64> {
        match *self {
            CiModel::ConstRatio { ratio } => vec![ratio],
            CiModel::ConstPpm { delta_ppm } => vec![delta_ppm],
            CiModel::Linear { intercept, slope } => vec![intercept, slope],
            CiModel::Sqrt { lambda } => vec![lambda],
        }
    }

    /// Intercellular CO2 density (kg/m³)
    fn intercellular(&self, ambient_co2: f64, vpd: f64, t: f64, p: f64, diff_ratio: f64) -> f64 {
        match *self {
            CiModel::ConstRatio { ratio } => ratio * ambient_co2,
            CiModel::ConstPpm { delta_ppm } => {
                let delta = delta_ppm * 1e-6 * p / (UNIVERSAL_GAS_CONSTANT * t) * MOLAR_MASS_CO2;
                ambient_co2 - delta
            }
            CiModel::Linear { intercept, slope } => ambient_co2 * (intercept - slope * vpd),
            CiModel::Sqrt { lambda } => {
                ambient_co2 * (1.0 - (diff_ratio * lambda * vpd / ambient_co2).sqrt())
            }
        }
    }
}

/// Leaf gas-exchange model settings, as written in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WueOptions {
    /// Canopy height (m)
    pub canopy_ht: Param<f64>,
    /// Measurement height (m)
    pub meas_ht: Param<f64>,
    /// Photosynthetic pathway, "C3" or "C4"
    pub ppath: String,
    #[serde(default = "default_ci_mod")]
    pub ci_mod: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ci_mod_param: Vec<f64>,
    /// Leaf temperature (K); mean air temperature when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_temper: Option<Param<f64>>,
    /// Added to the leaf temperature (K)
    #[serde(default)]
    pub leaf_temper_corr: f64,
    #[serde(default = "default_diff_ratio")]
    pub diff_ratio: f64,
}

fn default_ci_mod() -> String {
    "const_ratio".to_string()
}

fn default_diff_ratio() -> f64 {
    DEFAULT_DIFF_RATIO
}

/// Validated leaf gas-exchange model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "WueOptions", into = "WueOptions")]
pub struct WueModel {
    pub canopy_ht: Param<f64>,
    pub meas_ht: Param<f64>,
    pub pathway: Pathway,
    pub ci_mod: CiModel,
    pub leaf_temper: Option<Param<f64>>,
    pub leaf_temper_corr: f64,
    pub diff_ratio: f64,
}

impl WueModel {
    /// Model with the default ci model for `pathway`
    pub fn new(canopy_ht: Param<f64>, meas_ht: Param<f64>, pathway: Pathway) -> Self {
        Self {
            canopy_ht,
            meas_ht,
            pathway,
            ci_mod: CiModel::default_for("const_ratio", pathway),
            leaf_temper: None,
            leaf_temper_corr: 0.0,
            diff_ratio: DEFAULT_DIFF_RATIO,
        }
    }

    pub fn with_ci_mod(mut self, ci_mod: CiModel) -> Self {
        self.ci_mod = ci_mod;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.diff_ratio.is_finite() || self.diff_ratio <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "diff_ratio".to_string(),
                value: self.diff_ratio,
            });
        }
        if !self.leaf_temper_corr.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "leaf_temper_corr".to_string(),
                value: self.leaf_temper_corr,
            });
        }
        if let Some(&h) = self.canopy_ht.as_constant() {
            if !h.is_finite() || h <= 0.0 {
                return Err(ConfigError::InvalidParameter {
                    name: "canopy_ht".to_string(),
                    value: h,
                });
            }
            if let Some(&z) = self.meas_ht.as_constant() {
                if !z.is_finite() || z <= h {
                    return Err(ConfigError::InvalidParameter {
                        name: "meas_ht".to_string(),
                        value: z,
                    });
                }
            }
        }
        self.ci_mod.validate()
    }
}

impl TryFrom<WueOptions> for WueModel {
    type Error = ConfigError;

    fn try_from(opts: WueOptions) -> Result<Self, Self::Error> {
        let pathway: Pathway = opts.ppath.parse()?;
        let ci_mod = CiModel::from_name(&opts.ci_mod, &opts.ci_mod_param, pathway)?;
        let model = WueModel {
            canopy_ht: opts.canopy_ht,
            meas_ht: opts.meas_ht,
            pathway,
            ci_mod,
            leaf_temper: opts.leaf_temper,
            leaf_temper_corr: opts.leaf_temper_corr,
            diff_ratio: opts.diff_ratio,
        };
        model.validate()?;
        Ok(model)
    }
}

impl From<WueModel> for WueOptions {
    fn from(model: WueModel) -> Self {
        WueOptions {
            canopy_ht: model.canopy_ht,
            meas_ht: model.meas_ht,
            ppath: model.pathway.to_string(),
            ci_mod: model.ci_mod.name().to_string(),
            ci_mod_param: model.ci_mod.params(),
            leaf_temper: model.leaf_temper,
            leaf_temper_corr: model.leaf_temper_corr,
            diff_ratio: model.diff_ratio,
        }
    }
}

/// Errors from the WUE model for one interval
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WueError {
    #[error("canopy height {canopy_ht} m must be positive and below measurement height {meas_ht} m")]
    InvalidHeights { canopy_ht: f64, meas_ht: f64 },

    #[error("{quantity} is not finite ({value})")]
    NonFinite { quantity: String, value: f64 },

    #[error("water use efficiency must be negative, got {value}")]
    NonNegativeWue { value: f64 },
}

/// Intermediate quantities of a modeled WUE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WueDiagnostics {
    /// Ambient water vapor density at the canopy (kg/m³)
    pub ambient_h2o: f64,
    /// Ambient CO2 density at the canopy (kg/m³)
    pub ambient_co2: f64,
    /// Intercellular water vapor density (kg/m³)
    pub inter_h2o: f64,
    /// Intercellular CO2 density (kg/m³)
    pub inter_co2: f64,
    /// Vapor pressure deficit at the leaf (Pa)
    pub vpd: f64,
    /// Leaf temperature used (K)
    pub leaf_temper: f64,
    pub ci_mod: CiModel,
    pub pathway: Pathway,
    pub canopy_ht: f64,
    pub meas_ht: f64,
}

/// WUE used for an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WueEstimate {
    /// Water use efficiency (kg CO2 / kg H2O), negative
    pub wue: f64,
    /// Present when the value was modeled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<WueDiagnostics>,
}

fn finite(quantity: &str, value: f64) -> Result<f64, WueError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(WueError::NonFinite {
            quantity: quantity.to_string(),
            value,
        })
    }
}

/// Scalar stability correction of the log profile
fn psi_scalar(zeta: f64) -> f64 {
    if zeta < -0.04 {
        2.0 * ((1.0 + (1.0 - 16.0 * zeta).sqrt()) / 2.0).ln()
    } else if zeta <= 0.04 {
        0.0
    } else {
        -5.0 * zeta
    }
}

/// Leaf-level water use efficiency for one interval
pub fn water_use_efficiency(
    timestamp: NaiveDateTime,
    stats: &IntervalStatistics,
    model: &WueModel,
) -> Result<WueEstimate, WueError> {
    let canopy_ht = model.canopy_ht.resolve(timestamp);
    let meas_ht = model.meas_ht.resolve(timestamp);
    if !(canopy_ht > 0.0 && canopy_ht < meas_ht) || !meas_ht.is_finite() {
        return Err(WueError::InvalidHeights { canopy_ht, meas_ht });
    }

    let displacement = 2.0 / 3.0 * canopy_ht;
    let z0 = 0.1 * canopy_ht;
    let zv = 0.1 * z0;
    let zeta = stats
        .obukhov_length
        .map_or(0.0, |l| (meas_ht - displacement) / l);

    let arg = ((meas_ht - displacement) / zv).ln() - psi_scalar(zeta);
    let arg = finite("profile factor", arg / (VON_KARMAN * stats.ustar))?;
    let ambient_h2o = stats.mean_q + stats.cov_w_q * arg;
    let ambient_co2 = stats.mean_c + stats.cov_w_c * arg;

    let leaf_t = model
        .leaf_temper
        .as_ref()
        .map_or(stats.mean_t, |p| p.resolve(timestamp))
        + model.leaf_temper_corr;
    let esat = saturation_vapor_pressure(leaf_t);
    let inter_h2o = finite("intercellular vapor", esat / (GAS_CONSTANT_VAPOR * leaf_t))?;
    let vpd = finite(
        "vapor pressure deficit",
        esat - ambient_h2o * GAS_CONSTANT_VAPOR * stats.mean_t,
    )?;

    let inter_co2 = finite(
        "intercellular CO2",
        model.ci_mod.intercellular(
            ambient_co2,
            vpd,
            stats.mean_t,
            stats.mean_p,
            model.diff_ratio,
        ),
    )?;

    let wue = finite(
        "water use efficiency",
        (inter_co2 - ambient_co2) / (model.diff_ratio * (inter_h2o - ambient_h2o)),
    )?;
    if wue >= 0.0 {
        return Err(WueError::NonNegativeWue { value: wue });
    }

    Ok(WueEstimate {
        wue,
        model: Some(WueDiagnostics {
            ambient_h2o,
            ambient_co2,
            inter_h2o,
            inter_co2,
            vpd,
            leaf_temper: leaf_t,
            ci_mod: model.ci_mod,
            pathway: model.pathway,
            canopy_ht,
            meas_ht,
        }),
    })
}

/// WUE estimator over either source
pub struct WueEstimator;

impl WueEstimator {
    pub fn estimate(
        source: &WueSource,
        timestamp: NaiveDateTime,
        stats: &IntervalStatistics,
    ) -> Result<WueEstimate, RejectReason> {
        match source {
            WueSource::Prescribed(param) => {
                let wue = param.resolve(timestamp);
                if !wue.is_finite() || wue >= 0.0 {
                    return Err(RejectReason::InvalidWue { value: wue });
                }
                Ok(WueEstimate { wue, model: None })
            }
            WueSource::Modeled(model) => Ok(water_use_efficiency(timestamp, stats, model)?),
        }
    }
}
