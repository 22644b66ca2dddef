#![doc = include_str!("../README.md")]

mod aggregate;
mod clone_pool;
mod error;
mod fdr;
mod feature_store;
mod network;
mod score_set;
mod training;

pub use aggregate::*;
pub use clone_pool::*;
pub use error::*;
pub use feature_store::*;
pub use network::*;
pub use score_set::*;
pub use training::*;

/// The types and traits needed to load a dataset and train a network, importing this is a good starting point for working with the crate
pub mod prelude {
    pub use crate::aggregate::{PeptideCount, ProteinScoring};
    pub use crate::error::{RerankError, RerankErrorKind};
    pub use crate::feature_store::{FeatureStore, FeatureStoreBuilder, InMemoryFeatureStore, Label};
    pub use crate::score_set::{Level, ScoreSet};
    pub use crate::training::{LossFunction, PepEstimator, RerankParameters, RerankReport, Trainer};
}
