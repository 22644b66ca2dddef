//! A fixed pool of networks sharing one weight store, so that all PSMs of a protein (or a pair of
//! peptides) can be scored before back propagating through the winning PSMs only.

use crate::{
    error::{RerankError, index_out_of_range, invalid_input},
    feature_store::FeatureStore,
    network::Network,
};

/// The best scoring PSM of a peptide as found by a forward pass through the pool
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeptideMax {
    /// The maximal PSM score
    pub score: f64,
    /// The PSM index in the feature store
    pub psm: usize,
    /// The clone slot that scored the PSM
    pub clone: usize,
}

/// The result of a forward pass of a protein through the pool
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProteinForward {
    /// The (normalised) protein score
    pub score: f64,
    /// The clone slots of the winning PSM of every peptide
    pub winners: Vec<usize>,
}

/// A pre-allocated set of clones of one network
#[derive(Clone, Debug)]
pub struct ClonePool {
    clones: Vec<Network>,
}

impl ClonePool {
    /// Create `size` clones of the given network. The pool has to be large enough for the largest
    /// unit scored at once, see [`FeatureStore::max_psms_in_protein`].
    pub fn new(network: &Network, size: usize) -> Self {
        Self {
            clones: (0..size).map(|_| network.clone()).collect(),
        }
    }

    /// The number of clones
    pub fn len(&self) -> usize {
        self.clones.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    /// Score all PSMs of a peptide on consecutive clones starting at `offset`. Returns the best
    /// PSM (the first one in case of ties) and the offset after the last used clone.
    /// # Errors
    /// * If the peptide does not exist.
    /// * If the peptide does not have any PSMs.
    /// * If the pool is too small.
    /// * If a feature vector does not fit the network.
    pub fn score_peptide(
        &mut self,
        store: &impl FeatureStore,
        peptide: usize,
        offset: usize,
    ) -> Result<(PeptideMax, usize), RerankError> {
        let psms = store.psms_of(peptide)?;
        if offset + psms.len() > self.clones.len() {
            return Err(invalid_input(
                "Clone pool too small",
                format!(
                    "Scoring peptide {peptide} needs {} clones starting at {offset} but the pool only has {} clones",
                    psms.len(),
                    self.clones.len()
                ),
            ));
        }
        let mut best: Option<PeptideMax> = None;
        for (slot, psm) in (offset..).zip(psms) {
            let score = self.clones[slot].try_forward(store.features(*psm)?)?;
            if best.is_none_or(|b| score > b.score) {
                best = Some(PeptideMax {
                    score,
                    psm: *psm,
                    clone: slot,
                });
            }
        }
        best.map(|best| (best, offset + psms.len())).ok_or_else(|| {
            invalid_input(
                "Peptide without PSMs",
                format!("Peptide {peptide} does not have any PSMs"),
            )
        })
    }

    /// Score a single PSM on the given clone.
    /// # Errors
    /// If the PSM or the clone does not exist, or the feature vector does not fit the network.
    pub fn score_psm(
        &mut self,
        store: &impl FeatureStore,
        psm: usize,
        clone: usize,
    ) -> Result<f64, RerankError> {
        let length = self.clones.len();
        let features = store.features(psm)?;
        self.clones
            .get_mut(clone)
            .ok_or_else(|| index_out_of_range("clone", clone, length))?
            .try_forward(features)
    }

    /// Score a protein as the sum of the peptide maxima divided by `divisor`, with the PSMs of
    /// the protein laid out on consecutive clones starting at `offset`. Returns the offset after
    /// the last used clone as well.
    /// # Errors
    /// If the protein does not exist or the pool is too small.
    pub fn score_protein(
        &mut self,
        store: &impl FeatureStore,
        protein: usize,
        divisor: f64,
        offset: usize,
    ) -> Result<(ProteinForward, usize), RerankError> {
        let mut offset = offset;
        let mut sum = 0.0;
        let mut winners = Vec::new();
        for peptide in store.peptides_of(protein)? {
            let (best, next) = self.score_peptide(store, *peptide, offset)?;
            sum += best.score;
            winners.push(best.clone);
            offset = next;
        }
        Ok((
            ProteinForward {
                score: sum / divisor,
                winners,
            },
            offset,
        ))
    }

    /// Back propagate the gradient through a single clone.
    /// # Errors
    /// If the clone does not exist.
    pub fn backward(&mut self, clone: usize, gradient: f64) -> Result<(), RerankError> {
        let length = self.clones.len();
        self.clones
            .get_mut(clone)
            .ok_or_else(|| index_out_of_range("clone", clone, length))?
            .backward(gradient);
        Ok(())
    }

    /// Back propagate the same gradient through all given clones.
    /// # Errors
    /// If any of the clones does not exist.
    pub fn backward_winners(&mut self, winners: &[usize], gradient: f64) -> Result<(), RerankError> {
        for clone in winners {
            self.backward(*clone, gradient)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::*;
    use crate::{FeatureStoreBuilder, InMemoryFeatureStore, Label, RerankErrorKind, Topology};

    /// A protein with one peptide scored [0.2, 0.9, 0.5] and one peptide scored [0.3]
    fn setup() -> (InMemoryFeatureStore, Network) {
        let mut builder = FeatureStoreBuilder::new(1);
        let protein = builder.add_protein(Label::Target, 4);
        let first = builder.add_peptide(&[protein]).unwrap();
        for value in [0.2, 0.9, 0.5] {
            builder.add_psm(first, &[value], Label::Target).unwrap();
        }
        let second = builder.add_peptide(&[protein]).unwrap();
        builder.add_psm(second, &[0.3], Label::Target).unwrap();
        let store = builder.build().unwrap();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let network = Network::new(1, 1, Topology::Linear, true, &mut rng);
        network.layer_mut(1).unwrap().weights_mut()[0] = 1.0;
        network.layer_mut(1).unwrap().bias_mut()[0] = 0.0;
        (store, network)
    }

    #[test]
    fn max_pool_routing() {
        let (store, network) = setup();
        let mut pool = ClonePool::new(&network, 4);
        assert_eq!(network.shared_handles(), 5);
        let (best, next) = pool.score_peptide(&store, 0, 0).unwrap();
        assert_eq!(best.score, 0.9);
        assert_eq!(best.psm, 1);
        assert_eq!(best.clone, 1);
        assert_eq!(next, 3);

        network.clear_gradients();
        pool.backward(best.clone, 1.0).unwrap();
        // Only clone 1 contributed, with its input of 0.9
        assert_eq!(network.layer(1).unwrap().weight_gradients(), &[0.9]);
        assert_eq!(network.layer(1).unwrap().bias_gradients(), &[1.0]);
    }

    #[test]
    fn protein_score_arithmetic() {
        let (store, network) = setup();
        let mut pool = ClonePool::new(&network, 4);
        let (forward, next) = pool.score_protein(&store, 0, 4.0_f64.sqrt(), 0).unwrap();
        assert!((forward.score - 0.6).abs() < 1e-12);
        assert_eq!(forward.winners, vec![1, 3]);
        assert_eq!(next, 4);

        network.clear_gradients();
        pool.backward_winners(&forward.winners, -0.5).unwrap();
        let gradients = network.layer(1).unwrap().weight_gradients()[0];
        assert!((gradients - -0.5 * (0.9 + 0.3)).abs() < 1e-12);
    }

    #[test]
    fn pool_too_small() {
        let (store, network) = setup();
        let mut pool = ClonePool::new(&network, 3);
        assert!(matches!(
            pool.score_protein(&store, 0, 1.0, 0).unwrap_err().get_kind(),
            RerankErrorKind::InvalidInput
        ));
        assert!(pool.backward(3, 1.0).is_err());
        assert!(pool.score_psm(&store, 3, 2).is_ok());
        assert!(pool.score_psm(&store, 3, 3).is_err());
        assert!(pool.score_psm(&store, 4, 0).is_err());
    }

    #[test]
    fn ties_pick_first() {
        let mut builder = FeatureStoreBuilder::new(1);
        let protein = builder.add_protein(Label::Decoy, 1);
        let peptide = builder.add_peptide(&[protein]).unwrap();
        builder.add_psm(peptide, &[0.4], Label::Decoy).unwrap();
        builder.add_psm(peptide, &[0.4], Label::Decoy).unwrap();
        let store = builder.build().unwrap();
        let (_, network) = setup();
        let mut pool = ClonePool::new(&network, 2);
        assert_eq!(pool.score_peptide(&store, 0, 0).unwrap().0.clone, 0);
    }
}
