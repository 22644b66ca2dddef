use itertools::Itertools;
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::{
    aggregate::ScoreAggregator,
    clone_pool::ClonePool,
    error::{RerankError, invalid_input},
    feature_store::FeatureStore,
    network::Network,
    score_set::{Level, ScoreHolder, ScoreSet},
    training::{
        parameters::{LossFunction, RerankParameters},
        report::{LevelBest, PepEstimator, RerankReport, ThresholdCounts},
    },
};

/// The FDR used to size the PSM window of the final multi-task protein run
const PSM_WINDOW_FDR: f64 = 0.01;
/// The smallest PSM window used in the final multi-task protein run
const MIN_PSM_WINDOW: usize = 50;

/// Trains a network on a feature store and selects the best network at the selection FDR.
///
/// PSM and peptide level training first runs a general phase with the configured loss, keeping
/// the best network for every FDR threshold. Then, starting from the highest threshold, those
/// networks are refined with pairwise ranking on the top of the training set. Protein level
/// training runs hinge epochs through a [`ClonePool`] for every learning rate try.
///
/// ```
/// use mzrerank::{FeatureStore, FeatureStoreBuilder, Label, Level, RerankParameters, Trainer};
///
/// let mut builder = FeatureStoreBuilder::new(2);
/// for index in 0..40 {
///     let label = if index % 2 == 0 { Label::Target } else { Label::Decoy };
///     let protein = builder.add_protein(label, 1);
///     let peptide = builder.add_peptide(&[protein]).unwrap();
///     let shift = if label.is_target() { 1.0 } else { -1.0 };
///     builder
///         .add_psm(peptide, &[shift + f64::from(index) / 100.0, shift], label)
///         .unwrap();
/// }
/// let store = builder.build().unwrap();
/// let parameters = RerankParameters {
///     switch_iter: 3,
///     niter: 5,
///     ..RerankParameters::default()
/// };
/// let mut trainer = Trainer::new(&store, parameters).unwrap();
/// let report = trainer.train(Level::Psm).unwrap();
/// assert_eq!(report.results[0].len(), store.num_psms());
/// ```
pub struct Trainer<'a, S: FeatureStore> {
    store: &'a S,
    parameters: RerankParameters,
    aggregator: ScoreAggregator,
    rng: Xoshiro256PlusPlus,
    network: Network,
    /// The best network per level of the last training run
    best_networks: Vec<(Level, Network)>,
    pep_estimator: Option<Box<dyn PepEstimator + 'a>>,
}

impl<S: FeatureStore> std::fmt::Debug for Trainer<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("parameters", &self.parameters)
            .field("network", &self.network)
            .field("pep_estimator", &self.pep_estimator.is_some())
            .finish_non_exhaustive()
    }
}

/// A forward pass of one training unit (PSM, peptide, or protein) through the clone pool
struct UnitForward {
    score: f64,
    /// The clones whose PSMs produced the score
    winners: Vec<usize>,
    /// The derivative of the unit score with respect to each winning PSM score
    scale: f64,
}

/// The best network seen for one level together with its train count
struct Checkpoint {
    count: usize,
    network: Network,
}

/// All sets used during protein level training
struct ProteinSets {
    train: ScoreSet,
    test: ScoreSet,
    psm_train: ScoreSet,
    peptide_train: ScoreSet,
}

/// The best networks for all levels during protein level training
struct ProteinBests {
    protein: Checkpoint,
    peptide: Checkpoint,
    psm: Checkpoint,
}

impl<'a, S: FeatureStore> Trainer<'a, S> {
    /// Set up a trainer with a freshly initialised network.
    /// # Errors
    /// * If the parameters are not valid, see [`RerankParameters::validate`].
    /// * If the store does not have any features.
    pub fn new(store: &'a S, parameters: RerankParameters) -> Result<Self, RerankError> {
        parameters.validate()?;
        if store.num_features() == 0 {
            return Err(invalid_input(
                "No features",
                "The feature store needs at least one feature per PSM to train a network",
            ));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(parameters.seed);
        let network = Network::new(
            store.num_features(),
            parameters.num_hidden_units,
            parameters.topology(),
            parameters.has_bias,
            &mut rng,
        );
        Ok(Self {
            store,
            aggregator: parameters.aggregator(),
            parameters,
            rng,
            network,
            best_networks: Vec::new(),
            pep_estimator: None,
        })
    }

    /// Estimate posterior error probabilities for the final scored sets with this estimator
    #[must_use]
    pub fn with_pep_estimator(mut self, estimator: impl PepEstimator + 'a) -> Self {
        self.pep_estimator = Some(Box::new(estimator));
        self
    }

    /// The current network, after training this is the selected network
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// The best network for the given level in the last training run. Protein level training
    /// keeps one for every level, PSM and peptide level training only the selected network.
    pub fn best_network(&self, level: Level) -> Option<&Network> {
        self.best_networks
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, network)| network)
    }

    /// The parameters of this trainer
    pub const fn parameters(&self) -> &RerankParameters {
        &self.parameters
    }

    /// Train a network for the given level and report the scored full sets.
    /// # Errors
    /// * If any set needed for training does not contain both targets and decoys, this is
    ///   checked before any training is done.
    /// * If the PEP estimator returns the wrong number of values.
    pub fn train(&mut self, level: Level) -> Result<RerankReport, RerankError> {
        match level {
            Level::Protein => self.train_proteins(),
            level => self.train_ranker(level),
        }
    }

    fn full_set(&self, level: Level) -> Result<ScoreSet, RerankError> {
        Ok(ScoreSet::full(self.store, level)?.with_pi0(self.parameters.pi0))
    }

    fn split_sets(&mut self, level: Level) -> Result<(ScoreSet, ScoreSet), RerankError> {
        let (train, test) = ScoreSet::split(
            self.store,
            level,
            self.parameters.train_fraction,
            &mut self.rng,
        )?;
        Ok((
            train.with_pi0(self.parameters.pi0),
            test.with_pi0(self.parameters.pi0),
        ))
    }

    /// The PSM or peptide ranker: a general phase followed by targeted ranking per threshold
    fn train_ranker(&mut self, level: Level) -> Result<RerankReport, RerankError> {
        let mut full = self.full_set(level)?;
        let (mut train, mut test) = self.split_sets(level)?;
        let mut threshold_set = train.clone();
        let thresholds = self.parameters.fdr_thresholds.clone();
        let learning_rate = self.parameters.learning_rate;
        let mut pool = ClonePool::new(&self.network, 2 * unit_size(self.store, level)?);

        info!(
            "Training the {level} ranker on {} {level}s, testing on {} {level}s",
            train.len(),
            test.len()
        );
        self.log_counts("Before iterating", &mut train, &mut test, &thresholds)?;

        let mut best_counts = vec![0; thresholds.len()];
        let mut general = thresholds
            .iter()
            .map(|_| self.network.deep_copy())
            .collect_vec();
        for epoch in 0..self.parameters.switch_iter {
            self.general_epoch(&mut pool, &train, learning_rate)?;
            let counts = evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                &mut threshold_set,
                &thresholds,
            )?;
            let improved = record_improvements(&mut best_counts, &mut general, &counts, &self.network);
            debug!("Epoch {epoch}: {improved} thresholds improved, counts {counts:?}");
            if epoch % 10 == 0 {
                self.log_counts(&format!("Iteration {epoch}"), &mut train, &mut test, &thresholds)?;
            }
        }

        let mut targeted = general.iter().map(Network::deep_copy).collect_vec();
        let stride = self.parameters.threshold_stride;
        let mut index = thresholds.len() - 1;
        while index > 0 {
            self.network.snapshot_copy(&general[index]);
            let interval = best_counts[index];
            info!(
                "Targeting FDR {} with the top {interval} {level}s as window",
                thresholds[index]
            );
            evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                &mut train,
                &thresholds,
            )?;
            for epoch in self.parameters.switch_iter..self.parameters.niter {
                self.ranking_epoch(&mut pool, &train, interval, learning_rate)?;
                let counts = evaluate(
                    &mut self.network,
                    self.store,
                    &self.aggregator,
                    &mut train,
                    &thresholds,
                )?;
                let improved =
                    record_improvements(&mut best_counts, &mut targeted, &counts, &self.network);
                debug!("Epoch {epoch}: {improved} thresholds improved, counts {counts:?}");
                if epoch % 3 == 0 {
                    self.log_counts(&format!("Iteration {epoch}"), &mut train, &mut test, &thresholds)?;
                }
            }
            if index < stride {
                break;
            }
            index -= stride;
        }

        let mut threshold_counts = Vec::with_capacity(thresholds.len());
        for (threshold, network) in thresholds.iter().zip(targeted.iter_mut()) {
            let train_count =
                evaluate(network, self.store, &self.aggregator, &mut train, &[*threshold])?[0];
            let test_count =
                evaluate(network, self.store, &self.aggregator, &mut test, &[*threshold])?[0];
            let (train_unique_peptides, test_unique_peptides) = if level == Level::Psm {
                (
                    Some(train.unique_peptides_within(self.store, train_count)?),
                    Some(test.unique_peptides_within(self.store, test_count)?),
                )
            } else {
                (None, None)
            };
            info!("FDR {threshold}: {train_count} train {level}s, {test_count} test {level}s");
            threshold_counts.push(ThresholdCounts {
                threshold: *threshold,
                train: train_count,
                test: test_count,
                train_unique_peptides,
                test_unique_peptides,
            });
        }

        let (selected, accepted) = self.select_model(&mut targeted, &mut full)?;
        self.best_networks = vec![(level, self.network.deep_copy())];
        info!(
            "Selected the network of FDR {} with {accepted} {level}s at FDR {}",
            thresholds[selected], self.parameters.selection_fdr
        );
        Ok(RerankReport {
            level,
            selection_fdr: self.parameters.selection_fdr,
            accepted,
            selected_threshold: Some(selected),
            thresholds: threshold_counts,
            level_bests: Vec::new(),
            results: vec![full],
        })
    }

    /// One epoch of the general phase with the configured loss
    fn general_epoch(
        &mut self,
        pool: &mut ClonePool,
        set: &ScoreSet,
        learning_rate: f64,
    ) -> Result<(), RerankError> {
        match self.parameters.loss {
            LossFunction::Ranking => self.ranking_epoch(pool, set, set.len(), learning_rate),
            loss => {
                for _ in 0..set.len() {
                    let holder = set.holders()[self.rng.random_range(0..set.len())];
                    self.example_step(pool, set.level(), holder, loss, learning_rate)?;
                }
                Ok(())
            }
        }
    }

    /// One SGD step on a single unit, the ranking loss is treated as hinge loss here
    fn example_step(
        &self,
        pool: &mut ClonePool,
        level: Level,
        holder: ScoreHolder,
        loss: LossFunction,
        learning_rate: f64,
    ) -> Result<(), RerankError> {
        let (unit, _) = forward_unit(pool, self.store, &self.aggregator, level, holder.index, 0)?;
        let y = holder.label.sign();
        let gradient = match loss {
            LossFunction::Sigmoid => Some(sigmoid_loss_gradient(y, unit.score)),
            LossFunction::Hinge | LossFunction::Ranking => (y * unit.score < 1.0).then_some(-y),
        };
        if let Some(gradient) = gradient {
            self.network.clear_gradients();
            pool.backward_winners(&unit.winners, gradient * unit.scale)?;
            self.network
                .update(learning_rate, self.parameters.weight_decay);
        }
        Ok(())
    }

    /// One epoch of pairwise ranking within the top `interval` entries of the (sorted) set
    fn ranking_epoch(
        &mut self,
        pool: &mut ClonePool,
        set: &ScoreSet,
        interval: usize,
        learning_rate: f64,
    ) -> Result<(), RerankError> {
        let holders = set.holders();
        let window = interval.clamp(1, holders.len());
        for _ in 0..holders.len() {
            let first = holders[self.rng.random_range(0..window)];
            let wanted = first.label.opposite();
            let mut partner = None;
            for _ in 0..self.parameters.max_partner_draws {
                let candidate = holders[self.rng.random_range(0..window)];
                if candidate.label == wanted {
                    partner = Some(candidate);
                    break;
                }
            }
            let second =
                partner.unwrap_or_else(|| holders[self.rng.random_range(0..holders.len())]);
            if first.label == second.label {
                continue;
            }
            // +1 when the target comes first
            let label = first.label.sign();
            let (a, next) =
                forward_unit(pool, self.store, &self.aggregator, set.level(), first.index, 0)?;
            let (b, _) = forward_unit(
                pool,
                self.store,
                &self.aggregator,
                set.level(),
                second.index,
                next,
            )?;
            if label * (a.score - b.score) < 1.0 {
                self.network.clear_gradients();
                pool.backward_winners(&a.winners, -label * a.scale)?;
                pool.backward_winners(&b.winners, label * b.scale)?;
                self.network
                    .update(learning_rate, self.parameters.weight_decay);
            }
        }
        Ok(())
    }

    /// Barista: protein hinge training for every learning rate try, optionally interleaved with
    /// PSM updates
    fn train_proteins(&mut self) -> Result<RerankReport, RerankError> {
        let mut full = self.full_set(Level::Protein)?;
        let mut peptides = self.full_set(Level::Peptide)?;
        let mut psms = self.full_set(Level::Psm)?;
        let (train, test) = self.split_sets(Level::Protein)?;
        let (psm_train, _) = self.split_sets(Level::Psm)?;
        let (peptide_train, _) = self.split_sets(Level::Peptide)?;
        let mut sets = ProteinSets {
            train,
            test,
            psm_train,
            peptide_train,
        };
        let mut pool = ClonePool::new(&self.network, self.store.max_psms_in_protein()?);
        let mut bests = ProteinBests {
            protein: Checkpoint::new(&self.network),
            peptide: Checkpoint::new(&self.network),
            psm: Checkpoint::new(&self.network),
        };
        info!(
            "Training on {} proteins, testing on {} proteins",
            sets.train.len(),
            sets.test.len()
        );

        let tries = if self.parameters.learning_rate_tries.is_empty() {
            vec![self.parameters.learning_rate]
        } else {
            self.parameters.learning_rate_tries.clone()
        };
        let mut last_rate = self.parameters.learning_rate;
        for rate in tries {
            info!("Learning rate {rate}");
            self.network.make_random(&mut self.rng);
            let window = sets.psm_train.len();
            self.protein_epochs(&mut pool, &mut sets, rate, window, &mut bests)?;
            last_rate = rate;
        }

        if self.parameters.multi_task {
            let best_psms = evaluate(
                &mut bests.psm.network,
                self.store,
                &self.aggregator,
                &mut sets.psm_train,
                &[PSM_WINDOW_FDR],
            )?[0];
            let mut window = 2 * best_psms;
            if window > sets.psm_train.len() || window < MIN_PSM_WINDOW {
                window = sets.psm_train.len() / 4;
            }
            info!("Final multi-task run on the top {window} PSMs");
            self.protein_epochs(&mut pool, &mut sets, last_rate, window, &mut bests)?;
        }

        // Every level is scored with its own best network, the protein network is loaded last
        self.network.snapshot_copy(&bests.peptide.network);
        let peptides_accepted = self.finalise(&mut peptides)?;
        self.network.snapshot_copy(&bests.psm.network);
        let psms_accepted = self.finalise(&mut psms)?;
        self.network.snapshot_copy(&bests.protein.network);
        let accepted = self.finalise(&mut full)?;
        info!(
            "Selected the network with {} train proteins, {accepted} proteins, {peptides_accepted} peptides and {psms_accepted} PSMs at FDR {}",
            bests.protein.count, self.parameters.selection_fdr
        );
        let level_bests = vec![
            LevelBest {
                level: Level::Protein,
                count: bests.protein.count,
                accepted,
            },
            LevelBest {
                level: Level::Peptide,
                count: bests.peptide.count,
                accepted: peptides_accepted,
            },
            LevelBest {
                level: Level::Psm,
                count: bests.psm.count,
                accepted: psms_accepted,
            },
        ];
        self.best_networks = vec![
            (Level::Protein, bests.protein.network),
            (Level::Peptide, bests.peptide.network),
            (Level::Psm, bests.psm.network),
        ];
        Ok(RerankReport {
            level: Level::Protein,
            selection_fdr: self.parameters.selection_fdr,
            accepted,
            selected_threshold: None,
            thresholds: Vec::new(),
            level_bests,
            results: vec![full, peptides, psms],
        })
    }

    /// Run `nepochs` protein epochs, checkpointing the best network per level at the selection FDR
    fn protein_epochs(
        &mut self,
        pool: &mut ClonePool,
        sets: &mut ProteinSets,
        learning_rate: f64,
        psm_window: usize,
        bests: &mut ProteinBests,
    ) -> Result<(), RerankError> {
        let selection = [self.parameters.selection_fdr];
        for epoch in 0..self.parameters.nepochs {
            for _ in 0..sets.train.len() {
                let holder = sets.train.holders()[self.rng.random_range(0..sets.train.len())];
                self.example_step(
                    pool,
                    Level::Protein,
                    holder,
                    LossFunction::Hinge,
                    learning_rate,
                )?;
                if self.parameters.multi_task {
                    let window = psm_window.clamp(1, sets.psm_train.len());
                    let psm = sets.psm_train.holders()[self.rng.random_range(0..window)];
                    self.psm_hinge_step(psm, learning_rate)?;
                }
            }

            let proteins = evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                &mut sets.train,
                &selection,
            )?[0];
            let peptides = evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                &mut sets.peptide_train,
                &selection,
            )?[0];
            let psms = evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                &mut sets.psm_train,
                &selection,
            )?[0];
            debug!("Epoch {epoch}: {proteins} proteins, {peptides} peptides, {psms} PSMs");
            if bests.protein.record(proteins, &self.network) {
                let test = evaluate(
                    &mut self.network,
                    self.store,
                    &self.aggregator,
                    &mut sets.test,
                    &selection,
                )?[0];
                info!(
                    "Epoch {epoch}: max proteins so far {proteins} ({test} in the test set) at FDR {}",
                    selection[0]
                );
            }
            if bests.peptide.record(peptides, &self.network) {
                debug!("Epoch {epoch}: max peptides so far {peptides}");
            }
            if bests.psm.record(psms, &self.network) {
                debug!("Epoch {epoch}: max PSMs so far {psms}");
            }
        }
        Ok(())
    }

    /// A hinge step on a single PSM with the canonical network
    fn psm_hinge_step(&mut self, holder: ScoreHolder, learning_rate: f64) -> Result<(), RerankError> {
        let score = self.network.try_forward(self.store.features(holder.index)?)?;
        let y = holder.label.sign();
        if y * score < 1.0 {
            self.network.clear_gradients();
            self.network.backward(-y);
            self.network
                .update(learning_rate, self.parameters.weight_decay);
        }
        Ok(())
    }

    /// Pick the candidate with the highest count at the selection FDR on the full set (the first
    /// one on ties), load it, and score the full set with it. Returns the selected index and the
    /// accepted count.
    fn select_model(
        &mut self,
        candidates: &mut [Network],
        full: &mut ScoreSet,
    ) -> Result<(usize, usize), RerankError> {
        let selection = [self.parameters.selection_fdr];
        let mut selected = 0;
        let mut max = 0;
        for (index, candidate) in candidates.iter_mut().enumerate() {
            let count = evaluate(candidate, self.store, &self.aggregator, full, &selection)?[0];
            if count > max {
                max = count;
                selected = index;
            }
        }
        if let Some(candidate) = candidates.get(selected) {
            self.network.snapshot_copy(candidate);
        }
        let accepted = self.finalise(full)?;
        Ok((selected, accepted))
    }

    /// Score a set with the current network, store its q-values and PEPs, and return the count
    /// at the selection FDR
    fn finalise(&mut self, set: &mut ScoreSet) -> Result<usize, RerankError> {
        let accepted = evaluate(
            &mut self.network,
            self.store,
            &self.aggregator,
            set,
            &[self.parameters.selection_fdr],
        )?[0];
        if let Some(estimator) = &self.pep_estimator {
            let scores = set
                .holders()
                .iter()
                .map(|h| (h.score, h.label.is_target()))
                .collect_vec();
            let peps = estimator.estimate(&scores, set.pi0());
            if peps.len() != scores.len() {
                return Err(invalid_input(
                    "Invalid PEP estimate",
                    format!(
                        "The PEP estimator returned {} values for {} {}s",
                        peps.len(),
                        scores.len(),
                        set.level()
                    ),
                ));
            }
            for (holder, pep) in set.holders_mut().iter_mut().zip(peps) {
                holder.pep = pep;
            }
        }
        Ok(accepted)
    }

    /// Log the train and test counts of the current network at all thresholds, this sorts both
    /// sets by the current scores
    fn log_counts(
        &mut self,
        label: &str,
        train: &mut ScoreSet,
        test: &mut ScoreSet,
        thresholds: &[f64],
    ) -> Result<(), RerankError> {
        for (name, set) in [("train", train), ("test", test)] {
            let counts = evaluate(
                &mut self.network,
                self.store,
                &self.aggregator,
                set,
                thresholds,
            )?;
            info!(
                "{label}: {name} {}",
                thresholds
                    .iter()
                    .zip(counts)
                    .map(|(threshold, count)| format!("{threshold}:{count}"))
                    .join(" ")
            );
        }
        Ok(())
    }
}

impl Checkpoint {
    fn new(network: &Network) -> Self {
        Self {
            count: 0,
            network: network.deep_copy(),
        }
    }

    /// Store the network if the count is a strict improvement
    fn record(&mut self, count: usize, network: &Network) -> bool {
        if count > self.count {
            self.count = count;
            self.network.snapshot_copy(network);
            true
        } else {
            false
        }
    }
}

/// Rescore the set and count the targets at each threshold
fn evaluate(
    network: &mut Network,
    store: &impl FeatureStore,
    aggregator: &ScoreAggregator,
    set: &mut ScoreSet,
    thresholds: &[f64],
) -> Result<Vec<usize>, RerankError> {
    aggregator.scores_over(network, store, set)?;
    Ok(set.calc_multi_over_fdr(thresholds))
}

/// Checkpoint the network for every threshold with a strictly higher count, returns the number
/// of improved thresholds
fn record_improvements(
    best_counts: &mut [usize],
    checkpoints: &mut [Network],
    counts: &[usize],
    network: &Network,
) -> usize {
    let mut improved = 0;
    for ((best, checkpoint), count) in best_counts
        .iter_mut()
        .zip(checkpoints.iter_mut())
        .zip(counts)
    {
        if *count > *best {
            *best = *count;
            checkpoint.snapshot_copy(network);
            improved += 1;
        }
    }
    improved
}

/// The number of clones needed to score one unit of the level
fn unit_size(store: &impl FeatureStore, level: Level) -> Result<usize, RerankError> {
    match level {
        Level::Psm => Ok(1),
        Level::Peptide => store.max_psms_in_peptide(),
        Level::Protein => store.max_psms_in_protein(),
    }
}

/// Score a unit on the clones starting at `offset`, returns the offset after the last used clone
fn forward_unit(
    pool: &mut ClonePool,
    store: &impl FeatureStore,
    aggregator: &ScoreAggregator,
    level: Level,
    index: usize,
    offset: usize,
) -> Result<(UnitForward, usize), RerankError> {
    match level {
        Level::Psm => Ok((
            UnitForward {
                score: pool.score_psm(store, index, offset)?,
                winners: vec![offset],
                scale: 1.0,
            },
            offset + 1,
        )),
        Level::Peptide => {
            let (best, next) = pool.score_peptide(store, index, offset)?;
            Ok((
                UnitForward {
                    score: best.score,
                    winners: vec![best.clone],
                    scale: 1.0,
                },
                next,
            ))
        }
        Level::Protein => {
            let divisor = aggregator.divisor(store, index)?;
            let (forward, next) = pool.score_protein(store, index, divisor, offset)?;
            Ok((
                UnitForward {
                    score: forward.score,
                    winners: forward.winners,
                    scale: 1.0 / divisor,
                },
                next,
            ))
        }
    }
}

/// The derivative of `1 / (1 + e^(y * r))` with respect to `r`
fn sigmoid_loss_gradient(y: f64, score: f64) -> f64 {
    let z = y * score;
    // s = 1 / (1 + e^-z), computed without overflowing for large |z|
    let s = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    -y * s * (1.0 - s)
}
