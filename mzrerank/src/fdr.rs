//! Target/decoy FDR estimation on a [`ScoreSet`]
//!
//! Entities are sorted by descending score (ties broken by ascending entity index). Walking down
//! the list, the expected number of false positives at each position is `pi0 * decoys * factor`
//! with `factor` the target to decoy ratio of the whole set, and the q-value is that expectation
//! divided by the number of targets seen so far, capped at `pi0`. The count at a threshold is the
//! number of targets at the last position where the raw q-value did not exceed the threshold. The
//! q-values stored in the set are made monotone afterwards.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::score_set::ScoreSet;

impl ScoreSet {
    /// Sort by descending score, with ties broken by ascending entity index
    pub fn sort_by_score(&mut self) {
        self.holders_mut()
            .sort_unstable_by_key(|h| (Reverse(OrderedFloat(h.score)), h.index));
    }

    /// Sort the set and calculate the number of targets accepted at the given FDR threshold. The
    /// smoothed q-values are stored in the set.
    pub fn calc_over_fdr(&mut self, threshold: f64) -> usize {
        self.calc_multi_over_fdr(&[threshold])[0]
    }

    /// Sort the set and calculate the number of targets accepted at each of the given FDR
    /// thresholds in a single pass. The smoothed q-values are stored in the set.
    pub fn calc_multi_over_fdr(&mut self, thresholds: &[f64]) -> Vec<usize> {
        self.sort_by_score();
        let counts = self.walk(thresholds);
        self.smooth_q_values();
        counts
    }

    /// Sort the set and return the q-value at every position before smoothing, these are the
    /// values the counts of [`Self::calc_multi_over_fdr`] are based on. The smoothed q-values are
    /// stored in the set.
    pub fn raw_q_values(&mut self) -> Vec<f64> {
        self.sort_by_score();
        self.walk(&[]);
        let raw: Vec<f64> = self.holders().iter().map(|h| h.q).collect();
        self.smooth_q_values();
        raw
    }

    /// Store the raw q-values over the current order and count the targets at each threshold
    fn walk(&mut self, thresholds: &[f64]) -> Vec<usize> {
        let pi0 = self.pi0();
        let factor = self.factor();
        let mut counts = vec![0; thresholds.len()];
        let mut positives = 0_usize;
        let mut nulls = 0_usize;
        let mut expected_false = 0.0;
        for holder in self.holders_mut() {
            if holder.label.is_target() {
                positives += 1;
            } else {
                nulls += 1;
                expected_false = pi0 * nulls as f64 * factor;
            }
            let q = if positives > 0 {
                (expected_false / positives as f64).min(pi0)
            } else {
                pi0
            };
            holder.q = q;
            for (count, threshold) in counts.iter_mut().zip(thresholds) {
                if *threshold >= q {
                    *count = positives;
                }
            }
        }
        counts
    }

    /// Make the q-values monotone over the current order by taking the running minimum from the back
    fn smooth_q_values(&mut self) {
        let holders = self.holders_mut();
        for index in (1..holders.len()).rev() {
            if holders[index - 1].q > holders[index].q {
                holders[index - 1].q = holders[index].q;
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use itertools::Itertools;
    use proptest::prelude::*;

    use crate::{FeatureStoreBuilder, InMemoryFeatureStore, Label, Level, ScoreSet};

    fn store(labels: &[Label]) -> InMemoryFeatureStore {
        let mut builder = FeatureStoreBuilder::new(1);
        for label in labels {
            let protein = builder.add_protein(*label, 1);
            let peptide = builder.add_peptide(&[protein]).unwrap();
            builder.add_psm(peptide, &[0.0], *label).unwrap();
        }
        builder.build().unwrap()
    }

    fn scored_set(entries: &[(f64, Label)]) -> ScoreSet {
        let store = store(&entries.iter().map(|e| e.1).collect_vec());
        let mut set = ScoreSet::full(&store, Level::Psm).unwrap();
        for (holder, (score, _)) in set.holders_mut().iter_mut().zip(entries) {
            holder.score = *score;
        }
        set
    }

    #[test]
    fn worked_example() {
        let mut set = scored_set(&[
            (1.0, Label::Decoy),
            (3.0, Label::Target),
            (5.0, Label::Target),
            (4.0, Label::Decoy),
        ]);
        assert_eq!(set.calc_over_fdr(0.45), 2);
        assert_eq!(set.indices().collect_vec(), vec![2, 3, 1, 0]);
        let q = set.holders().iter().map(|h| h.q).collect_vec();
        assert_eq!(q, vec![0.0, 0.45, 0.45, 0.9]);
        assert_eq!(set.calc_multi_over_fdr(&[0.0, 0.45, 0.9]), vec![1, 2, 2]);
        assert_eq!(set.raw_q_values(), vec![0.0, 0.9, 0.45, 0.9]);
        assert_eq!(set.holders().iter().map(|h| h.q).collect_vec(), q);
    }

    #[test]
    fn raw_q_values_decide_counts() {
        let mut set = scored_set(&[
            (4.0, Label::Target),
            (3.0, Label::Decoy),
            (2.0, Label::Target),
            (1.0, Label::Target),
        ]);
        // factor 3, the decoy gives 2.7 which keeps every following q-value at the 0.9 cap
        assert_eq!(set.calc_over_fdr(0.5), 1);
        assert!(set.holders().iter().all(|h| h.q <= 0.9));
    }

    #[test]
    fn ties_by_index() {
        let mut set = scored_set(&[
            (1.0, Label::Target),
            (1.0, Label::Decoy),
            (1.0, Label::Target),
        ]);
        set.sort_by_score();
        assert_eq!(set.indices().collect_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn leading_decoys() {
        let mut set = scored_set(&[(2.0, Label::Decoy), (1.0, Label::Target)]);
        assert_eq!(set.calc_over_fdr(0.1), 0);
        assert_eq!(set.holders()[0].q, 0.9);
        assert_eq!(set.holders()[1].q, 0.9);
    }

    #[test]
    fn custom_pi0() {
        let mut set = scored_set(&[
            (3.0, Label::Target),
            (2.0, Label::Decoy),
            (1.0, Label::Target),
        ])
        .with_pi0(1.0);
        // factor 2, q after the decoy 2/1 capped at 1, then 2/2
        set.calc_over_fdr(1.0);
        assert_eq!(set.holders().iter().map(|h| h.q).collect_vec(), vec![0.0, 1.0, 1.0]);
    }

    proptest! {
        #[test]
        fn q_values_monotone(entries in prop::collection::vec((-5.0..5.0_f64, any::<bool>()), 2..40)) {
            let mut entries = entries
                .into_iter()
                .map(|(score, target)| (score, if target { Label::Target } else { Label::Decoy }))
                .collect_vec();
            // A set needs both labels
            entries[0].1 = Label::Target;
            entries[1].1 = Label::Decoy;
            let mut set = scored_set(&entries);
            let counts = set.calc_multi_over_fdr(&[0.01, 0.05, 0.1, 0.5]);
            prop_assert!(counts.windows(2).all(|w| w[0] <= w[1]));
            let q = set.holders().iter().map(|h| h.q).collect_vec();
            prop_assert!(q.windows(2).all(|w| w[0] <= w[1]));
            let raw = set.raw_q_values();
            prop_assert!(raw.iter().zip(&q).all(|(raw, q)| raw >= q));
            prop_assert!(q.iter().all(|q| (0.0..=0.9).contains(q)));
        }
    }
}
