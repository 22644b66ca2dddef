use serde::{Deserialize, Serialize};

use crate::{
    feature_store::Label,
    score_set::{Level, ScoreHolder, ScoreSet},
};

/// Estimate posterior error probabilities from scored targets and decoys. Implement this to plug
/// an external estimator into the final scoring of a [`Trainer`](crate::Trainer).
pub trait PepEstimator {
    /// Get the PEP for every entry, given `(score, is_target)` in descending score order. The
    /// result has to have the same length as the input.
    fn estimate(&self, scores: &[(f64, bool)], pi0: f64) -> Vec<f64>;
}

/// The counts of the best network for a single FDR threshold
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCounts {
    /// The FDR threshold
    pub threshold: f64,
    /// The accepted targets in the train set
    pub train: usize,
    /// The accepted targets in the test set
    pub test: usize,
    /// The distinct peptides of the accepted train targets, only for PSM level training
    pub train_unique_peptides: Option<usize>,
    /// The distinct peptides of the accepted test targets, only for PSM level training
    pub test_unique_peptides: Option<usize>,
}

/// The best train count at the selection FDR reached for one level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBest {
    /// The level
    pub level: Level,
    /// The number of accepted targets in the train set
    pub count: usize,
    /// The number of accepted targets in the full set of this level, scored with the best
    /// network of this level
    pub accepted: usize,
}

/// The outcome of a reranking run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerankReport {
    /// The level the network was optimised for
    pub level: Level,
    /// The FDR used for model selection
    pub selection_fdr: f64,
    /// The number of targets accepted at the selection FDR on the full set of the trained level
    pub accepted: usize,
    /// The index of the threshold whose network was selected, `None` for protein level training
    pub selected_threshold: Option<usize>,
    /// Per threshold counts of the final networks, empty for protein level training
    pub thresholds: Vec<ThresholdCounts>,
    /// Best train counts per level, only filled for protein level training
    pub level_bests: Vec<LevelBest>,
    /// The fully scored sets, the first one is of the trained level. For protein level training
    /// the peptide and PSM sets are scored with the best network of their own level.
    pub results: Vec<ScoreSet>,
}

impl RerankReport {
    /// The scored full set for the given level, if it was reported
    pub fn results_for(&self, level: Level) -> Option<&ScoreSet> {
        self.results.iter().find(|set| set.level() == level)
    }

    /// All targets of the trained level with a q-value at or below the selection FDR, best first
    pub fn accepted_targets(&self) -> impl Iterator<Item = &ScoreHolder> + '_ {
        self.results.first().into_iter().flat_map(|set| {
            set.holders()
                .iter()
                .filter(|h| h.label == Label::Target && h.q <= self.selection_fdr)
        })
    }
}
