//! Ordered sets of scored PSMs, peptides, or proteins

use itertools::Itertools;
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    error::{RerankError, index_out_of_range, invalid_input, invalid_parameters},
    feature_store::{FeatureStore, Label},
};

/// The level at which entities are scored
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub enum Level {
    /// Peptide spectrum matches
    #[default]
    Psm,
    /// Peptides, scored by the maximum of their PSMs
    Peptide,
    /// Proteins, scored by the normalised sum of their peptides
    Protein,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Psm => "PSM",
                Self::Peptide => "peptide",
                Self::Protein => "protein",
            }
        )
    }
}

/// The score of a single entity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreHolder {
    /// The index of the PSM, peptide, or protein in the feature store
    pub index: usize,
    /// The current score
    pub score: f64,
    /// The target/decoy label
    pub label: Label,
    /// The (smoothed) q-value as calculated by the last FDR calculation
    pub q: f64,
    /// The posterior error probability, if it was estimated
    pub pep: f64,
}

impl ScoreHolder {
    const fn new(index: usize, label: Label) -> Self {
        Self {
            index,
            score: 0.0,
            label,
            q: 0.0,
            pep: 0.0,
        }
    }
}

/// A set of scored entities of one level, for example the training set of proteins. Sets always
/// contain at least one target and one decoy, which is checked when the set is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    level: Level,
    holders: Vec<ScoreHolder>,
    targets: usize,
    decoys: usize,
    pi0: f64,
}

/// The default fraction of targets assumed to be drawn from the null distribution
pub const DEFAULT_PI0: f64 = 0.9;

impl ScoreSet {
    /// Create a set with all entities of the given level.
    /// # Errors
    /// If the store does not contain both targets and decoys at this level.
    pub fn full(store: &impl FeatureStore, level: Level) -> Result<Self, RerankError> {
        Self::from_indices(store, level, 0..entity_count(store, level))
    }

    /// Create a set with the given entities.
    /// # Errors
    /// * If any index does not exist.
    /// * If the entities are not a mix of targets and decoys.
    pub fn from_indices(
        store: &impl FeatureStore,
        level: Level,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<Self, RerankError> {
        let holders = indices
            .into_iter()
            .map(|index| Ok(ScoreHolder::new(index, entity_label(store, level, index)?)))
            .collect::<Result<Vec<_>, RerankError>>()?;
        let targets = holders.iter().filter(|h| h.label.is_target()).count();
        let decoys = holders.len() - targets;
        if targets == 0 || decoys == 0 {
            return Err(invalid_input(
                "Unusable set for FDR estimation",
                format!(
                    "A {level} set needs both targets and decoys to estimate the FDR, but it has {targets} targets and {decoys} decoys"
                ),
            ));
        }
        Ok(Self {
            level,
            holders,
            targets,
            decoys,
            pi0: DEFAULT_PI0,
        })
    }

    /// Split all entities of a level into a train and test set. The given fraction (in `(0, 1)`)
    /// ends up in the train set. PSMs are split per peptide, so all PSMs of a peptide land in the
    /// same set, and proteins are split per connected component of the protein/peptide graph.
    /// PSMs and peptides are shuffled before splitting, proteins are taken in index order.
    /// # Errors
    /// * If the fraction is not in `(0, 1)`.
    /// * If either resulting set is not a mix of targets and decoys.
    pub fn split(
        store: &impl FeatureStore,
        level: Level,
        train_fraction: f64,
        rng: &mut impl Rng,
    ) -> Result<(Self, Self), RerankError> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(invalid_parameters(
                "Invalid train fraction",
                format!("The train fraction has to be in (0, 1), found {train_fraction}"),
            ));
        }
        let mut groups: Vec<Vec<usize>> = match level {
            Level::Psm => (0..store.num_peptides())
                .map(|peptide| store.psms_of(peptide).map(<[usize]>::to_vec))
                .collect::<Result<_, _>>()?,
            Level::Peptide => (0..store.num_peptides()).map(|p| vec![p]).collect(),
            Level::Protein => protein_components(store)?,
        };
        if level != Level::Protein {
            groups.shuffle(rng);
        }
        let mut train = Vec::new();
        let mut test = Vec::new();
        for group in groups {
            if train.len() as f64 * (1.0 - train_fraction) <= test.len() as f64 * train_fraction {
                train.extend(group);
            } else {
                test.extend(group);
            }
        }
        train.sort_unstable();
        test.sort_unstable();
        Ok((
            Self::from_indices(store, level, train)?,
            Self::from_indices(store, level, test)?,
        ))
    }

    /// Use a different null fraction for the FDR calculations
    #[must_use]
    pub const fn with_pi0(mut self, pi0: f64) -> Self {
        self.pi0 = pi0;
        self
    }

    /// The fraction of targets assumed to be drawn from the null distribution
    pub const fn pi0(&self) -> f64 {
        self.pi0
    }

    /// The level of the entities in this set
    pub const fn level(&self) -> Level {
        self.level
    }

    /// All entities, in the order of the last sort
    pub fn holders(&self) -> &[ScoreHolder] {
        &self.holders
    }

    /// Mutable access to the entities, to rescore them in place
    pub fn holders_mut(&mut self) -> &mut [ScoreHolder] {
        &mut self.holders
    }

    /// Get a single entity by its position in the set.
    /// # Errors
    /// If the position is outside the set.
    pub fn get(&self, position: usize) -> Result<&ScoreHolder, RerankError> {
        self.holders
            .get(position)
            .ok_or_else(|| index_out_of_range("set position", position, self.holders.len()))
    }

    /// The number of entities
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Never true, sets always contain targets and decoys
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// The number of targets and decoys in this set
    pub const fn counts(&self) -> (usize, usize) {
        (self.targets, self.decoys)
    }

    /// The ratio of targets to decoys, used to scale the decoy counts in the FDR estimation
    pub fn factor(&self) -> f64 {
        self.targets as f64 / self.decoys as f64
    }

    /// The entity indices of all entities in the set
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.holders.iter().map(|h| h.index)
    }

    /// The entity indices of the first `count` targets in the current order. After an FDR
    /// calculation these are the targets accepted at that threshold.
    pub fn targets_within(&self, count: usize) -> impl Iterator<Item = usize> + '_ {
        self.holders
            .iter()
            .filter(|h| h.label.is_target())
            .take(count)
            .map(|h| h.index)
    }

    /// The number of distinct peptides among the first `count` targets of a PSM set.
    /// # Errors
    /// If a PSM does not exist in the store.
    pub fn unique_peptides_within(
        &self,
        store: &impl FeatureStore,
        count: usize,
    ) -> Result<usize, RerankError> {
        Ok(self
            .targets_within(count)
            .map(|psm| store.peptide_of(psm))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unique()
            .count())
    }
}

/// The number of entities at a level
pub(crate) fn entity_count(store: &impl FeatureStore, level: Level) -> usize {
    match level {
        Level::Psm => store.num_psms(),
        Level::Peptide => store.num_peptides(),
        Level::Protein => store.num_proteins(),
    }
}

fn entity_label(
    store: &impl FeatureStore,
    level: Level,
    index: usize,
) -> Result<Label, RerankError> {
    match level {
        Level::Psm => store.label(index),
        Level::Peptide => store.peptide_label(index),
        Level::Protein => store.protein_label(index),
    }
}

/// The connected components of the protein/peptide graph, as lists of protein indices, in order
/// of their lowest protein index.
fn protein_components(store: &impl FeatureStore) -> Result<Vec<Vec<usize>>, RerankError> {
    let mut assigned = vec![false; store.num_proteins()];
    let mut components = Vec::new();
    for start in 0..store.num_proteins() {
        if assigned[start] {
            continue;
        }
        assigned[start] = true;
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(protein) = stack.pop() {
            component.push(protein);
            for peptide in store.peptides_of(protein)? {
                for &neighbour in store.proteins_of(*peptide)? {
                    let seen = assigned.get_mut(neighbour).ok_or_else(|| {
                        index_out_of_range("protein", neighbour, store.num_proteins())
                    })?;
                    if !*seen {
                        *seen = true;
                        stack.push(neighbour);
                    }
                }
            }
        }
        components.push(component);
    }
    Ok(components)
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::*;
    use crate::{FeatureStoreBuilder, InMemoryFeatureStore, RerankErrorKind};

    /// Proteins 0 and 1 share a peptide, proteins 2, 3, and 4 are on their own
    fn store() -> InMemoryFeatureStore {
        let mut builder = FeatureStoreBuilder::new(1);
        let p0 = builder.add_protein(Label::Target, 5);
        let p1 = builder.add_protein(Label::Target, 5);
        let p2 = builder.add_protein(Label::Decoy, 5);
        let p3 = builder.add_protein(Label::Target, 5);
        let p4 = builder.add_protein(Label::Decoy, 5);
        for (proteins, label, psms) in [
            (vec![p0, p1], Label::Target, 2),
            (vec![p0], Label::Target, 1),
            (vec![p2], Label::Decoy, 3),
            (vec![p3], Label::Target, 1),
            (vec![p1], Label::Target, 1),
            (vec![p4], Label::Decoy, 1),
        ] {
            let peptide = builder.add_peptide(&proteins).unwrap();
            for _ in 0..psms {
                builder.add_psm(peptide, &[0.0], label).unwrap();
            }
        }
        builder.build().unwrap()
    }

    #[test]
    fn full_sets() {
        let store = store();
        let psms = ScoreSet::full(&store, Level::Psm).unwrap();
        assert_eq!(psms.len(), 9);
        assert_eq!(psms.counts(), (5, 4));
        let proteins = ScoreSet::full(&store, Level::Protein).unwrap();
        assert_eq!(proteins.counts(), (3, 2));
        assert!((proteins.factor() - 1.5).abs() < f64::EPSILON);
        assert_eq!(psms.get(9).unwrap_err().get_kind(), &RerankErrorKind::IndexOutOfRange);
    }

    #[test]
    fn reject_single_label_sets() {
        let store = store();
        let error = ScoreSet::from_indices(&store, Level::Protein, [0, 1]).unwrap_err();
        assert_eq!(error.get_kind(), &RerankErrorKind::InvalidInput);
        assert!(ScoreSet::from_indices(&store, Level::Protein, [0, 9]).is_err());
    }

    #[test]
    fn protein_split_keeps_components() {
        let store = store();
        assert_eq!(
            protein_components(&store).unwrap(),
            vec![vec![0, 1], vec![2], vec![3], vec![4]]
        );
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let (train, test) = ScoreSet::split(&store, Level::Protein, 0.5, &mut rng).unwrap();
        assert_eq!(train.indices().collect_vec(), vec![0, 1, 4]);
        assert_eq!(test.indices().collect_vec(), vec![2, 3]);
    }

    #[test]
    fn psm_split_keeps_peptides_together() {
        let store = store();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        match ScoreSet::split(&store, Level::Psm, 0.5, &mut rng) {
            Ok((train, test)) => {
                assert_eq!(train.len() + test.len(), 9);
                for peptide in 0..store.num_peptides() {
                    let psms = store.psms_of(peptide).unwrap();
                    let in_train = psms.iter().filter(|p| train.indices().contains(*p)).count();
                    assert!(in_train == 0 || in_train == psms.len());
                }
            }
            Err(error) => assert_eq!(error.get_kind(), &RerankErrorKind::InvalidInput),
        }
        assert!(ScoreSet::split(&store, Level::Psm, 1.0, &mut rng).is_err());
    }

    #[test]
    fn unique_peptides() {
        let store = store();
        let psms = ScoreSet::full(&store, Level::Psm).unwrap();
        // PSMs 0 and 1 share peptide 0, PSM 2 is peptide 1
        assert_eq!(psms.targets_within(3).collect_vec(), vec![0, 1, 2]);
        assert_eq!(psms.unique_peptides_within(&store, 3).unwrap(), 2);
    }
}
