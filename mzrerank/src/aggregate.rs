//! Turn PSM scores into peptide and protein scores

use serde::{Deserialize, Serialize};

use crate::{
    error::{RerankError, invalid_input},
    feature_store::FeatureStore,
    network::Network,
    score_set::{Level, ScoreSet},
};

/// How proteins are scored
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ProteinScoring {
    /// Every observed peptide of the protein contributes
    #[default]
    Observed,
    /// Peptides already claimed by a protein scored earlier in the same pass are skipped, the
    /// divisor always uses the theoretical peptide count
    Parsimonious,
}

/// The peptide count used to normalise protein scores
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum PeptideCount {
    /// The number of peptides observed in the dataset
    Observed,
    /// The number of peptides the protein could produce in theory
    #[default]
    Theoretical,
}

/// The rules to aggregate PSM scores into peptide and protein scores
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreAggregator {
    /// The protein score is divided by `peptide_count^alpha`
    pub alpha: f64,
    /// The scoring variant
    pub scoring: ProteinScoring,
    /// The peptide count used in the divisor for [`ProteinScoring::Observed`]
    pub peptide_count: PeptideCount,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            scoring: ProteinScoring::Observed,
            peptide_count: PeptideCount::Theoretical,
        }
    }
}

impl ScoreAggregator {
    /// The maximal score over all PSMs of a peptide and the PSM that produced it. On ties the
    /// first PSM wins.
    /// # Errors
    /// * If the peptide does not exist or has no PSMs.
    /// * If a feature vector does not fit the network.
    pub fn peptide_score(
        network: &mut Network,
        store: &impl FeatureStore,
        peptide: usize,
    ) -> Result<(f64, usize), RerankError> {
        let mut best: Option<(f64, usize)> = None;
        for psm in store.psms_of(peptide)? {
            let score = network.try_forward(store.features(*psm)?)?;
            if best.is_none_or(|(b, _)| score > b) {
                best = Some((score, *psm));
            }
        }
        best.ok_or_else(|| {
            invalid_input(
                "Peptide without PSMs",
                format!("Peptide {peptide} does not have any PSMs"),
            )
        })
    }

    /// The divisor `peptide_count^alpha` for a protein
    /// # Errors
    /// If the protein does not exist.
    pub fn divisor(&self, store: &impl FeatureStore, protein: usize) -> Result<f64, RerankError> {
        let count = match (self.scoring, self.peptide_count) {
            (ProteinScoring::Observed, PeptideCount::Observed) => {
                store.peptides_of(protein)?.len() as f64
            }
            _ => f64::from(store.theoretical_peptide_count(protein)?),
        };
        Ok(count.powf(self.alpha))
    }

    /// The sum of all peptide maxima of a protein divided by the [divisor](Self::divisor). This
    /// ignores the parsimonious setting, use [`Self::protein_scores_over`] to score a full pass.
    /// # Errors
    /// If the protein does not exist.
    pub fn protein_score(
        &self,
        network: &mut Network,
        store: &impl FeatureStore,
        protein: usize,
    ) -> Result<f64, RerankError> {
        let mut sum = 0.0;
        for peptide in store.peptides_of(protein)? {
            sum += Self::peptide_score(network, store, *peptide)?.0;
        }
        Ok(sum / self.divisor(store, protein)?)
    }

    /// Score a protein skipping all peptides already marked as used, and mark its own peptides.
    /// # Errors
    /// If the protein does not exist.
    pub fn parsimonious_protein_score(
        &self,
        network: &mut Network,
        store: &impl FeatureStore,
        protein: usize,
        used: &mut [bool],
    ) -> Result<f64, RerankError> {
        let mut sum = 0.0;
        for peptide in store.peptides_of(protein)? {
            if used.get(*peptide).copied().unwrap_or(true) {
                continue;
            }
            used[*peptide] = true;
            sum += Self::peptide_score(network, store, *peptide)?.0;
        }
        Ok(sum / f64::from(store.theoretical_peptide_count(protein)?).powf(self.alpha))
    }

    /// Rescore all PSMs in a set.
    /// # Errors
    /// If a PSM does not exist or its feature vector does not fit the network.
    pub fn psm_scores_over(
        network: &mut Network,
        store: &impl FeatureStore,
        set: &mut ScoreSet,
    ) -> Result<(), RerankError> {
        for holder in set.holders_mut() {
            holder.score = network.try_forward(store.features(holder.index)?)?;
        }
        Ok(())
    }

    /// Rescore all peptides in a set.
    /// # Errors
    /// If a peptide does not exist.
    pub fn peptide_scores_over(
        network: &mut Network,
        store: &impl FeatureStore,
        set: &mut ScoreSet,
    ) -> Result<(), RerankError> {
        for holder in set.holders_mut() {
            holder.score = Self::peptide_score(network, store, holder.index)?.0;
        }
        Ok(())
    }

    /// Rescore all proteins in a set. In parsimonious mode the used peptides are reset at the
    /// start of the pass and proteins claim peptides in the current order of the set.
    /// # Errors
    /// If a protein does not exist.
    pub fn protein_scores_over(
        &self,
        network: &mut Network,
        store: &impl FeatureStore,
        set: &mut ScoreSet,
    ) -> Result<(), RerankError> {
        match self.scoring {
            ProteinScoring::Observed => {
                for holder in set.holders_mut() {
                    holder.score = self.protein_score(network, store, holder.index)?;
                }
            }
            ProteinScoring::Parsimonious => {
                let mut used = vec![false; store.num_peptides()];
                for holder in set.holders_mut() {
                    holder.score =
                        self.parsimonious_protein_score(network, store, holder.index, &mut used)?;
                }
            }
        }
        Ok(())
    }

    /// Rescore all entities of a set according to its level.
    /// # Errors
    /// If an entity does not exist.
    pub fn scores_over(
        &self,
        network: &mut Network,
        store: &impl FeatureStore,
        set: &mut ScoreSet,
    ) -> Result<(), RerankError> {
        match set.level() {
            Level::Psm => Self::psm_scores_over(network, store, set),
            Level::Peptide => Self::peptide_scores_over(network, store, set),
            Level::Protein => self.protein_scores_over(network, store, set),
        }
    }
}
