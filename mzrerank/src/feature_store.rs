//! Index based access to the PSM features and the PSM → peptide → protein graph.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{RerankError, index_out_of_range, invalid_input};

/// Whether an entity comes from the target or the decoy database.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub enum Label {
    /// A target identification, either correct or a false positive drawn from the null (+1)
    #[default]
    Target,
    /// A known false identification used to model the null distribution (-1)
    Decoy,
}

impl Label {
    /// The numeric value of the label, +1 for targets and -1 for decoys.
    pub const fn value(self) -> i8 {
        match self {
            Self::Target => 1,
            Self::Decoy => -1,
        }
    }

    /// The label as a floating point sign, used directly in the loss functions.
    pub const fn sign(self) -> f64 {
        match self {
            Self::Target => 1.0,
            Self::Decoy => -1.0,
        }
    }

    /// Check if this is a target label
    pub const fn is_target(self) -> bool {
        matches!(self, Self::Target)
    }

    /// Get the opposite label
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Target => Self::Decoy,
            Self::Decoy => Self::Target,
        }
    }
}

impl TryFrom<i8> for Label {
    type Error = RerankError;
    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Target),
            -1 => Ok(Self::Decoy),
            other => Err(invalid_input(
                "Invalid label",
                format!("A label has to be +1 (target) or -1 (decoy), found {other}"),
            )),
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Access to a loaded dataset. All identifiers are dense zero based indices. Every accessor
/// checks its index and returns a [`RerankErrorKind::IndexOutOfRange`](crate::RerankErrorKind::IndexOutOfRange)
/// error for indices that do not exist.
pub trait FeatureStore {
    /// The length of every feature vector
    fn num_features(&self) -> usize;
    /// The number of PSMs
    fn num_psms(&self) -> usize;
    /// The number of peptides
    fn num_peptides(&self) -> usize;
    /// The number of proteins
    fn num_proteins(&self) -> usize;
    /// The feature vector of a PSM
    /// # Errors
    /// If the PSM does not exist.
    fn features(&self, psm: usize) -> Result<&[f64], RerankError>;
    /// The label of a PSM
    /// # Errors
    /// If the PSM does not exist.
    fn label(&self, psm: usize) -> Result<Label, RerankError>;
    /// The label of a peptide
    /// # Errors
    /// If the peptide does not exist.
    fn peptide_label(&self, peptide: usize) -> Result<Label, RerankError>;
    /// The label of a protein
    /// # Errors
    /// If the protein does not exist.
    fn protein_label(&self, protein: usize) -> Result<Label, RerankError>;
    /// The peptide a PSM belongs to
    /// # Errors
    /// If the PSM does not exist.
    fn peptide_of(&self, psm: usize) -> Result<usize, RerankError>;
    /// All PSMs of a peptide, never empty
    /// # Errors
    /// If the peptide does not exist.
    fn psms_of(&self, peptide: usize) -> Result<&[usize], RerankError>;
    /// All observed peptides of a protein
    /// # Errors
    /// If the protein does not exist.
    fn peptides_of(&self, protein: usize) -> Result<&[usize], RerankError>;
    /// All proteins a peptide maps to
    /// # Errors
    /// If the peptide does not exist.
    fn proteins_of(&self, peptide: usize) -> Result<&[usize], RerankError>;
    /// The number of peptides the protein could produce in theory (after digestion), this is at least the observed number
    /// # Errors
    /// If the protein does not exist.
    fn theoretical_peptide_count(&self, protein: usize) -> Result<u32, RerankError>;

    /// The total number of PSMs over all peptides of a single protein.
    /// # Errors
    /// If the protein does not exist.
    fn psms_in_protein(&self, protein: usize) -> Result<usize, RerankError> {
        self.peptides_of(protein)?
            .iter()
            .try_fold(0, |acc, peptide| Ok(acc + self.psms_of(*peptide)?.len()))
    }

    /// The maximal number of PSMs of any single protein, this is the needed size of the clone pool for protein level training.
    /// # Errors
    /// If the adjacency refers to non existing ids.
    fn max_psms_in_protein(&self) -> Result<usize, RerankError> {
        (0..self.num_proteins()).try_fold(0, |acc, protein| {
            Ok(acc.max(self.psms_in_protein(protein)?))
        })
    }

    /// The maximal number of PSMs of any single peptide.
    /// # Errors
    /// If the adjacency refers to non existing ids.
    fn max_psms_in_peptide(&self) -> Result<usize, RerankError> {
        (0..self.num_peptides()).try_fold(0, |acc, peptide| Ok(acc.max(self.psms_of(peptide)?.len())))
    }
}

/// A fully in memory dataset, create one with [`FeatureStoreBuilder`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryFeatureStore {
    num_features: usize,
    /// Row major, `num_features` values per PSM
    features: Vec<f64>,
    psm_labels: Vec<Label>,
    psm_peptide: Vec<usize>,
    peptide_psms: Vec<Vec<usize>>,
    peptide_proteins: Vec<Vec<usize>>,
    peptide_labels: Vec<Label>,
    protein_peptides: Vec<Vec<usize>>,
    protein_labels: Vec<Label>,
    protein_theoretical_peptides: Vec<u32>,
}

impl InMemoryFeatureStore {
    /// Normalise every feature to zero mean and unit (population) standard deviation over all
    /// PSMs. Features with a standard deviation of zero are only centred.
    pub fn normalise(&mut self) {
        let psms = self.psm_labels.len();
        if psms == 0 || self.num_features == 0 {
            return;
        }
        for feature in 0..self.num_features {
            let column = || (0..psms).map(|psm| psm * self.num_features + feature);
            let mean = column().map(|i| self.features[i]).sum::<f64>() / psms as f64;
            let mut variance = 0.0;
            for i in column() {
                self.features[i] -= mean;
                variance += self.features[i] * self.features[i];
            }
            let std = (variance / psms as f64).sqrt();
            if std > 0.0 {
                for i in column() {
                    self.features[i] /= std;
                }
            }
        }
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_psms(&self) -> usize {
        self.psm_labels.len()
    }

    fn num_peptides(&self) -> usize {
        self.peptide_psms.len()
    }

    fn num_proteins(&self) -> usize {
        self.protein_peptides.len()
    }

    fn features(&self, psm: usize) -> Result<&[f64], RerankError> {
        if psm >= self.num_psms() {
            return Err(index_out_of_range("PSM", psm, self.num_psms()));
        }
        let start = psm * self.num_features;
        Ok(&self.features[start..start + self.num_features])
    }

    fn label(&self, psm: usize) -> Result<Label, RerankError> {
        self.psm_labels
            .get(psm)
            .copied()
            .ok_or_else(|| index_out_of_range("PSM", psm, self.num_psms()))
    }

    fn peptide_label(&self, peptide: usize) -> Result<Label, RerankError> {
        self.peptide_labels
            .get(peptide)
            .copied()
            .ok_or_else(|| index_out_of_range("peptide", peptide, self.num_peptides()))
    }

    fn protein_label(&self, protein: usize) -> Result<Label, RerankError> {
        self.protein_labels
            .get(protein)
            .copied()
            .ok_or_else(|| index_out_of_range("protein", protein, self.num_proteins()))
    }

    fn peptide_of(&self, psm: usize) -> Result<usize, RerankError> {
        self.psm_peptide
            .get(psm)
            .copied()
            .ok_or_else(|| index_out_of_range("PSM", psm, self.num_psms()))
    }

    fn psms_of(&self, peptide: usize) -> Result<&[usize], RerankError> {
        self.peptide_psms
            .get(peptide)
            .map(Vec::as_slice)
            .ok_or_else(|| index_out_of_range("peptide", peptide, self.num_peptides()))
    }

    fn peptides_of(&self, protein: usize) -> Result<&[usize], RerankError> {
        self.protein_peptides
            .get(protein)
            .map(Vec::as_slice)
            .ok_or_else(|| index_out_of_range("protein", protein, self.num_proteins()))
    }

    fn proteins_of(&self, peptide: usize) -> Result<&[usize], RerankError> {
        self.peptide_proteins
            .get(peptide)
            .map(Vec::as_slice)
            .ok_or_else(|| index_out_of_range("peptide", peptide, self.num_peptides()))
    }

    fn theoretical_peptide_count(&self, protein: usize) -> Result<u32, RerankError> {
        self.protein_theoretical_peptides
            .get(protein)
            .copied()
            .ok_or_else(|| index_out_of_range("protein", protein, self.num_proteins()))
    }
}

/// Build an [`InMemoryFeatureStore`] protein by protein, peptide by peptide, and PSM by PSM.
/// ```rust
/// use mzrerank::{FeatureStore, FeatureStoreBuilder, Label};
/// let mut builder = FeatureStoreBuilder::new(2);
/// let protein = builder.add_protein(Label::Target, 3);
/// let peptide = builder.add_peptide(&[protein]).unwrap();
/// builder.add_psm(peptide, &[0.5, 1.0], Label::Target).unwrap();
/// let store = builder.build().unwrap();
/// assert_eq!(store.max_psms_in_protein().unwrap(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct FeatureStoreBuilder {
    store: InMemoryFeatureStore,
}

impl FeatureStoreBuilder {
    /// Start a new dataset with feature vectors of the given length
    pub fn new(num_features: usize) -> Self {
        Self {
            store: InMemoryFeatureStore {
                num_features,
                ..InMemoryFeatureStore::default()
            },
        }
    }

    /// Add a protein, returns its index
    pub fn add_protein(&mut self, label: Label, theoretical_peptides: u32) -> usize {
        self.store.protein_peptides.push(Vec::new());
        self.store.protein_labels.push(label);
        self.store
            .protein_theoretical_peptides
            .push(theoretical_peptides);
        self.store.protein_peptides.len() - 1
    }

    /// Add a peptide that maps to the given proteins, returns its index. The label of the peptide
    /// is set by its PSMs.
    /// # Errors
    /// If any of the proteins does not exist, the builder is left unchanged in that case.
    pub fn add_peptide(&mut self, proteins: &[usize]) -> Result<usize, RerankError> {
        let len = self.store.protein_peptides.len();
        if let Some(&protein) = proteins.iter().find(|protein| **protein >= len) {
            return Err(index_out_of_range("protein", protein, len));
        }
        let peptide = self.store.peptide_psms.len();
        let unique = proteins.iter().copied().unique().collect_vec();
        for &protein in &unique {
            self.store.protein_peptides[protein].push(peptide);
        }
        self.store.peptide_psms.push(Vec::new());
        self.store.peptide_proteins.push(unique);
        self.store.peptide_labels.push(Label::Target);
        Ok(peptide)
    }

    /// Add a PSM to a peptide, returns its index.
    /// # Errors
    /// If the peptide does not exist or the feature vector has the wrong length.
    pub fn add_psm(
        &mut self,
        peptide: usize,
        features: &[f64],
        label: Label,
    ) -> Result<usize, RerankError> {
        if features.len() != self.store.num_features {
            return Err(invalid_input(
                "Invalid feature vector",
                format!(
                    "A feature vector of length {} was given while the dataset has {} features",
                    features.len(),
                    self.store.num_features
                ),
            ));
        }
        let peptides = self.store.peptide_psms.len();
        let psms = self
            .store
            .peptide_psms
            .get_mut(peptide)
            .ok_or_else(|| index_out_of_range("peptide", peptide, peptides))?;
        let psm = self.store.psm_labels.len();
        psms.push(psm);
        self.store.features.extend_from_slice(features);
        self.store.psm_labels.push(label);
        self.store.psm_peptide.push(peptide);
        Ok(psm)
    }

    /// Validate the dataset and finish building it.
    /// # Errors
    /// * If a peptide has no PSMs.
    /// * If the PSMs of a peptide do not all share the same label.
    /// * If a protein has no peptides, or its theoretical peptide count is lower than its observed peptide count.
    pub fn build(mut self) -> Result<InMemoryFeatureStore, RerankError> {
        for (peptide, psms) in self.store.peptide_psms.iter().enumerate() {
            let Some(first) = psms.first() else {
                return Err(invalid_input(
                    "Peptide without PSMs",
                    format!("Peptide {peptide} does not have any PSMs"),
                ));
            };
            let label = self.store.psm_labels[*first];
            if psms.iter().any(|psm| self.store.psm_labels[*psm] != label) {
                return Err(invalid_input(
                    "Peptide with mixed labels",
                    format!("The PSMs of peptide {peptide} are not all targets or all decoys"),
                ));
            }
            self.store.peptide_labels[peptide] = label;
        }
        for (peptide, proteins) in self.store.peptide_proteins.iter().enumerate() {
            if let Some(protein) = proteins.iter().find(|protein| {
                self.store
                    .protein_peptides
                    .get(**protein)
                    .is_none_or(|peptides| !peptides.contains(&peptide))
            }) {
                return Err(invalid_input(
                    "Inconsistent protein mapping",
                    format!("Peptide {peptide} maps to protein {protein}, which does not list it"),
                ));
            }
        }
        for (protein, peptides) in self.store.protein_peptides.iter().enumerate() {
            if let Some(peptide) = peptides.iter().find(|peptide| {
                self.store
                    .peptide_proteins
                    .get(**peptide)
                    .is_none_or(|proteins| !proteins.contains(&protein))
            }) {
                return Err(invalid_input(
                    "Inconsistent protein mapping",
                    format!("Protein {protein} lists peptide {peptide}, which does not map to it"),
                ));
            }
            if peptides.is_empty() {
                return Err(invalid_input(
                    "Protein without peptides",
                    format!("Protein {protein} does not have any peptides"),
                ));
            }
            let theoretical = self.store.protein_theoretical_peptides[protein] as usize;
            if theoretical < peptides.len() {
                return Err(invalid_input(
                    "Invalid theoretical peptide count",
                    format!(
                        "Protein {protein} has {} observed peptides but only {theoretical} theoretical peptides",
                        peptides.len()
                    ),
                ));
            }
        }
        Ok(self.store)
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::*;

    use super::*;
    use crate::RerankErrorKind;

    fn small_store() -> InMemoryFeatureStore {
        let mut builder = FeatureStoreBuilder::new(2);
        let a = builder.add_protein(Label::Target, 4);
        let b = builder.add_protein(Label::Decoy, 2);
        let shared = builder.add_peptide(&[a, a]).unwrap();
        builder.add_psm(shared, &[1.0, 2.0], Label::Target).unwrap();
        builder.add_psm(shared, &[3.0, 2.0], Label::Target).unwrap();
        let decoy = builder.add_peptide(&[b]).unwrap();
        builder.add_psm(decoy, &[5.0, 2.0], Label::Decoy).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn adjacency() {
        let store = small_store();
        assert_eq!(store.num_psms(), 3);
        assert_eq!(store.peptides_of(0).unwrap(), &[0]);
        assert_eq!(store.proteins_of(0).unwrap(), &[0]);
        assert_eq!(store.psms_of(0).unwrap(), &[0, 1]);
        assert_eq!(store.peptide_of(2).unwrap(), 1);
        assert_eq!(store.peptide_label(1).unwrap(), Label::Decoy);
        assert_eq!(store.max_psms_in_protein().unwrap(), 2);
        assert_eq!(store.max_psms_in_peptide().unwrap(), 2);
    }

    #[test]
    fn out_of_range() {
        let store = small_store();
        for error in [
            store.features(3).unwrap_err(),
            store.psms_of(2).unwrap_err(),
            store.peptides_of(7).unwrap_err(),
            store.theoretical_peptide_count(2).unwrap_err(),
        ] {
            assert!(matches!(
                error.get_kind(),
                RerankErrorKind::IndexOutOfRange
            ));
        }
    }

    #[test]
    fn failed_peptide_leaves_builder_unchanged() {
        let mut builder = FeatureStoreBuilder::new(1);
        let a = builder.add_protein(Label::Target, 2);
        let b = builder.add_protein(Label::Decoy, 2);
        assert!(matches!(
            builder.add_peptide(&[a, 99]).unwrap_err().get_kind(),
            RerankErrorKind::IndexOutOfRange
        ));
        let decoy = builder.add_peptide(&[b]).unwrap();
        assert_eq!(decoy, 0);
        builder.add_psm(decoy, &[0.0], Label::Decoy).unwrap();
        let target = builder.add_peptide(&[a]).unwrap();
        builder.add_psm(target, &[1.0], Label::Target).unwrap();
        let store = builder.build().unwrap();
        assert_eq!(store.peptides_of(a).unwrap(), &[target]);
        assert_eq!(store.peptides_of(b).unwrap(), &[decoy]);
        assert_eq!(store.proteins_of(decoy).unwrap(), &[b]);
        assert_eq!(store.proteins_of(target).unwrap(), &[a]);
    }

    #[test]
    fn invalid_datasets() {
        let mut builder = FeatureStoreBuilder::new(1);
        let protein = builder.add_protein(Label::Target, 1);
        builder.add_peptide(&[protein]).unwrap();
        assert!(builder.build().is_err());

        let mut builder = FeatureStoreBuilder::new(1);
        let protein = builder.add_protein(Label::Target, 1);
        let peptide = builder.add_peptide(&[protein]).unwrap();
        builder.add_psm(peptide, &[0.0], Label::Target).unwrap();
        builder.add_psm(peptide, &[0.0], Label::Decoy).unwrap();
        assert!(builder.build().is_err());

        let mut builder = FeatureStoreBuilder::new(1);
        let protein = builder.add_protein(Label::Target, 1);
        let peptide = builder.add_peptide(&[protein]).unwrap();
        assert!(builder.add_psm(peptide, &[0.0, 1.0], Label::Target).is_err());
        assert!(builder.add_peptide(&[3]).is_err());
    }

    #[test]
    fn normalise() {
        let mut store = small_store();
        store.normalise();
        let first: Vec<f64> = (0..3).map(|psm| store.features(psm).unwrap()[0]).collect();
        let mean = first.iter().sum::<f64>() / 3.0;
        let variance = first.iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
        assert!((variance - 1.0).abs() < 1e-12);
        // A constant feature is only centred
        assert!((0..3).all(|psm| store.features(psm).unwrap()[1] == 0.0));
    }

    #[test]
    fn labels() {
        assert_eq!(Label::try_from(1).unwrap(), Label::Target);
        assert_eq!(Label::try_from(-1).unwrap(), Label::Decoy);
        assert!(Label::try_from(0).is_err());
        assert_eq!(Label::Decoy.sign(), -1.0);
        assert_eq!(Label::Target.opposite(), Label::Decoy);
    }
}
