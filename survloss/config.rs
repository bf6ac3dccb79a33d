//! TOML configuration for the label transform and the training loss, plus
//! persistence of fitted transforms.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::discretize::{CutSpec, OverflowPolicy};
use crate::labels::{CoxTimeLabelTransform, DiscreteLabelTransform, TransformError};
use crate::loss::{
    DEFAULT_EPSILON, DeepHitLoss, DeepHitSingleLoss, LossError, NllPmfLoss, Reduction,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid label transform configuration: {0}")]
    Transform(#[from] TransformError),
    #[error("Invalid loss configuration: {0}")]
    Loss(#[from] LossError),
}

/// How durations are discretized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscretizationConfig {
    pub cuts: CutSpec,
    /// Start of a learned grid.
    pub min: f64,
    pub overflow: OverflowPolicy,
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        Self {
            cuts: CutSpec::default(),
            min: 0.0,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl DiscretizationConfig {
    /// An unfitted transform (already fitted when the cuts are explicit).
    pub fn build(&self) -> Result<DiscreteLabelTransform, TransformError> {
        Ok(DiscreteLabelTransform::new(self.cuts.clone(), self.min)?
            .with_overflow_policy(self.overflow))
    }
}

/// Hyperparameters shared by the loss modules; `alpha` and `sigma` are only read
/// by the DeepHit losses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub alpha: f64,
    pub sigma: f64,
    pub reduction: Reduction,
    pub epsilon: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            sigma: 0.1,
            reduction: Reduction::Mean,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl LossConfig {
    pub fn nll_pmf(&self) -> Result<NllPmfLoss, LossError> {
        NllPmfLoss::new(self.reduction).with_epsilon(self.epsilon)
    }

    pub fn deephit_single(&self) -> Result<DeepHitSingleLoss, LossError> {
        DeepHitSingleLoss::new(self.alpha, self.sigma, self.reduction)?.with_epsilon(self.epsilon)
    }

    pub fn deephit(&self) -> Result<DeepHitLoss, LossError> {
        DeepHitLoss::new(self.alpha, self.sigma, self.reduction)?.with_epsilon(self.epsilon)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    pub discretization: DiscretizationConfig,
    pub loss: LossConfig,
}

impl SurvivalConfig {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_toml(self, path)
    }

    /// Loads and validates a configuration; invalid hyperparameters fail here rather
    /// than at the first training step.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discretization.build()?;
        self.loss.nll_pmf()?;
        self.loss.deephit()?;
        Ok(())
    }
}

/// Fitted label transforms saved next to a trained network so that predictions
/// can be mapped back to time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedLabelTransforms {
    pub discrete: Option<DiscreteLabelTransform>,
    pub cox_time: Option<CoxTimeLabelTransform>,
}

impl FittedLabelTransforms {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_toml(self, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

fn save_toml<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path.as_ref())?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    log::debug!("Wrote {}", path.as_ref().display());
    Ok(())
}

fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let toml_string = fs::read_to_string(path.as_ref())?;
    Ok(toml::from_str(&toml_string)?)
}
