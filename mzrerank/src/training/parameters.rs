use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{PeptideCount, ProteinScoring, ScoreAggregator},
    error::{RerankError, invalid_parameters},
    network::Topology,
    score_set::DEFAULT_PI0,
};

/// The loss used for the general training phase
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum LossFunction {
    /// `max(0, 1 - label * score)` on single examples
    #[default]
    Hinge,
    /// Hinge loss on the score difference of a target/decoy pair
    Ranking,
    /// `1 / (1 + e^(label * score))` on single examples
    Sigmoid,
}

/// All settings of a reranking run. Every field has a default, so a partial JSON document is
/// enough to configure a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankParameters {
    /// The number of hidden units, ignored for a linear network
    pub num_hidden_units: usize,
    /// Use a single linear layer instead of a hidden layer
    pub is_linear: bool,
    /// Use bias terms in the linear layers
    pub has_bias: bool,
    /// The SGD learning rate for the PSM and peptide rankers
    pub learning_rate: f64,
    /// L2 weight decay, zero disables it
    pub weight_decay: f64,
    /// Protein scores are divided by `peptide_count^alpha`, has to be in `[0, 1)`
    pub alpha: f64,
    /// The FDR at which the final network is selected and at which protein training checkpoints
    pub selection_fdr: f64,
    /// The number of epochs per learning rate try at the protein level
    pub nepochs: usize,
    /// The number of epochs of the general phase
    pub switch_iter: usize,
    /// The total number of epochs, the targeted phase runs `niter - switch_iter` epochs per threshold
    pub niter: usize,
    /// The ascending FDR thresholds to checkpoint networks for
    pub fdr_thresholds: Vec<f64>,
    /// The seed for the random generator
    pub seed: u64,
    /// The fraction of targets assumed to be drawn from the null distribution
    pub pi0: f64,
    /// The fraction of the data used for training, the rest is used as test set
    pub train_fraction: f64,
    /// The loss of the general phase
    pub loss: LossFunction,
    /// The step between thresholds trained in the targeted phase
    pub threshold_stride: usize,
    /// The number of tries to find a ranking partner with the opposite label in the window
    pub max_partner_draws: usize,
    /// The protein scoring variant used when counting proteins
    pub protein_scoring: ProteinScoring,
    /// The peptide count used to normalise protein scores
    pub peptide_count: PeptideCount,
    /// Interleave PSM hinge updates with the protein updates
    pub multi_task: bool,
    /// The learning rates tried one after another at the protein level, each from a freshly randomised network
    pub learning_rate_tries: Vec<f64>,
}

/// The default thresholds: `0` to `0.0075` in steps of `0.0025`, then `0.01` to `0.1` in steps of `0.01`
pub fn default_thresholds() -> Vec<f64> {
    (0..4)
        .map(|i| f64::from(i) * 0.0025)
        .chain((1..=10).map(|i| f64::from(i) * 0.01))
        .collect()
}

impl Default for RerankParameters {
    fn default() -> Self {
        Self {
            num_hidden_units: 3,
            is_linear: false,
            has_bias: false,
            learning_rate: 0.01,
            weight_decay: 0.0,
            alpha: 0.3,
            selection_fdr: 0.01,
            nepochs: 10,
            switch_iter: 30,
            niter: 40,
            fdr_thresholds: default_thresholds(),
            seed: 1,
            pi0: DEFAULT_PI0,
            train_fraction: 0.75,
            loss: LossFunction::Hinge,
            threshold_stride: 3,
            max_partner_draws: 1000,
            protein_scoring: ProteinScoring::Observed,
            peptide_count: PeptideCount::Theoretical,
            multi_task: false,
            learning_rate_tries: vec![0.01],
        }
    }
}

impl RerankParameters {
    /// Check that the parameters are internally consistent.
    /// # Errors
    /// If any of the parameters is outside its valid range, the error describes the first problem found.
    pub fn validate(&self) -> Result<(), RerankError> {
        if self.fdr_thresholds.is_empty() {
            return Err(invalid_parameters(
                "No FDR thresholds",
                "At least one FDR threshold is needed",
            ));
        }
        if let Some(threshold) = self
            .fdr_thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(invalid_parameters(
                "Invalid FDR threshold",
                format!("FDR thresholds have to be in [0, 1], found {threshold}"),
            ));
        }
        if let Some(pair) = self.fdr_thresholds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(invalid_parameters(
                "FDR thresholds not ascending",
                format!(
                    "FDR thresholds have to be strictly ascending, but {} is followed by {}",
                    pair[0], pair[1]
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.alpha) {
            return Err(invalid_parameters(
                "Invalid alpha",
                format!("Alpha has to be in [0, 1), found {}", self.alpha),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid_parameters(
                "Invalid learning rate",
                format!("The learning rate has to be positive, found {}", self.learning_rate),
            ));
        }
        if let Some(rate) = self
            .learning_rate_tries
            .iter()
            .find(|r| !(r.is_finite() && **r > 0.0))
        {
            return Err(invalid_parameters(
                "Invalid learning rate",
                format!("All learning rate tries have to be positive, found {rate}"),
            ));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(invalid_parameters(
                "Invalid weight decay",
                format!("The weight decay cannot be negative, found {}", self.weight_decay),
            ));
        }
        if self.switch_iter > self.niter {
            return Err(invalid_parameters(
                "Invalid number of iterations",
                format!(
                    "The general phase ({} epochs) cannot be longer than the total number of epochs ({})",
                    self.switch_iter, self.niter
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.selection_fdr) {
            return Err(invalid_parameters(
                "Invalid selection FDR",
                format!("The selection FDR has to be in [0, 1], found {}", self.selection_fdr),
            ));
        }
        if !(self.pi0 > 0.0 && self.pi0 <= 1.0) {
            return Err(invalid_parameters(
                "Invalid pi0",
                format!("Pi0 has to be in (0, 1], found {}", self.pi0),
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(invalid_parameters(
                "Invalid train fraction",
                format!(
                    "The train fraction has to be in (0, 1), found {}",
                    self.train_fraction
                ),
            ));
        }
        if self.threshold_stride == 0 {
            return Err(invalid_parameters(
                "Invalid threshold stride",
                "The threshold stride has to be at least 1",
            ));
        }
        if !self.is_linear && self.num_hidden_units == 0 {
            return Err(invalid_parameters(
                "No hidden units",
                "A network with a hidden layer needs at least one hidden unit",
            ));
        }
        Ok(())
    }

    /// The network topology described by these parameters
    pub const fn topology(&self) -> Topology {
        if self.is_linear {
            Topology::Linear
        } else {
            Topology::OneHidden
        }
    }

    /// The score aggregation rules described by these parameters
    pub const fn aggregator(&self) -> ScoreAggregator {
        ScoreAggregator {
            alpha: self.alpha,
            scoring: self.protein_scoring,
            peptide_count: self.peptide_count,
        }
    }
}
