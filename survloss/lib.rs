#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Training objectives and label encodings for discrete-time survival networks.
//!
//! The crate is organised leaf-to-root:
//! - [`discretize`]: cut points and the duration-to-bin index mapper.
//! - [`labels`]: stateful label transforms wrapping the discretizer (or a
//!   continuous-time scaler) with fit / transform / inverse semantics.
//! - [`loss`]: PMF negative log-likelihoods, DeepHit ranking losses and the
//!   loss modules binding their hyperparameters.
//! - [`config`] and [`series`]: TOML configuration and polars column ingestion.

pub mod config;
pub mod series;

#[path = "../discretize/mod.rs"]
pub mod discretize;

#[path = "../labels/mod.rs"]
pub mod labels;

#[path = "../loss/mod.rs"]
pub mod loss;

pub use discretize::{CutSpec, DiscretizationError, IndexDiscretizer, OverflowPolicy, make_cuts};
pub use labels::{CoxTimeLabelTransform, DiscreteLabelTransform, DiscreteLabels, TransformError};
pub use loss::{
    DeepHitLoss, DeepHitSingleLoss, LossError, LossGradient, LossOutput, NllPmfLoss, Reduction,
    SurvivalLoss,
};
