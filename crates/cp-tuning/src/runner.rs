//! The tune-evaluate-persist procedure.

use std::fmt;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use cp_models::{cross_val_score, Classifier, CvStrategy, Fold};
use cp_optimizer::{
    Configuration, GridSearch, ObjectiveDirection, OptimizationStatus, SearchStrategy, TpeSearch,
    Trial,
};
use cp_types::{check_split_pair, ConfusionMatrix, CpResult, Dataset, EvaluationRun};

use crate::artifact::{ArtifactPaths, ArtifactStore};
use crate::config::TuningConfig;
use crate::family::{Family, FamilyDescriptor, StrategyKind};

/// Lifecycle of one tune call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneState {
    NotStarted,
    Searching,
    Fitting,
    Evaluating,
    Persisted,
    Failed,
}

impl fmt::Display for TuneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TuneState::NotStarted => "not_started",
            TuneState::Searching => "searching",
            TuneState::Fitting => "fitting",
            TuneState::Evaluating => "evaluating",
            TuneState::Persisted => "persisted",
            TuneState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything one successful tune call produced.
#[derive(Debug)]
pub struct EvaluationResult {
    pub family: Family,
    /// The refitted model.
    pub model: Box<dyn Classifier>,
    /// Configuration the search settled on; empty for families without hyperparameters.
    pub configuration: Configuration,
    pub confusion: ConfusionMatrix,
    /// Correct test predictions over test size.
    pub accuracy: f64,
    /// Trial history; `None` when the search phase was skipped.
    pub search: Option<OptimizationStatus>,
    pub artifacts: ArtifactPaths,
}

/// Tunes a family on a train split, evaluates it on a test split and
/// persists the confusion matrix.
#[derive(Debug, Clone)]
pub struct TuningRunner {
    config: TuningConfig,
    store: ArtifactStore,
}

impl TuningRunner {
    pub fn new(config: TuningConfig) -> CpResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: ArtifactStore::new(),
        })
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// Cross-validation policy described by the configuration.
    pub fn default_cv(&self) -> Box<dyn CvStrategy> {
        self.config.cv.build(self.config.seed)
    }

    /// Run the full procedure and return the test accuracy.
    pub fn tune(
        &self,
        descriptor: &FamilyDescriptor,
        train: &Dataset,
        test: &Dataset,
        cv: &dyn CvStrategy,
        run: &EvaluationRun,
    ) -> CpResult<f64> {
        Ok(self.evaluate(descriptor, train, test, cv, run)?.accuracy)
    }

    /// [`tune`](Self::tune) with the family's default space and strategy.
    pub fn tune_family(
        &self,
        family: Family,
        train: &Dataset,
        test: &Dataset,
        cv: &dyn CvStrategy,
        run: &EvaluationRun,
    ) -> CpResult<f64> {
        self.tune(&FamilyDescriptor::new(family), train, test, cv, run)
    }

    /// Tune the linear and RBF margin classifiers; returns `(linear, rbf)`.
    pub fn tune_svm(
        &self,
        train: &Dataset,
        test: &Dataset,
        cv: &dyn CvStrategy,
        run: &EvaluationRun,
    ) -> CpResult<(f64, f64)> {
        let linear = self.tune_family(Family::LinearSvm, train, test, cv, run)?;
        let rbf = self.tune_family(Family::RbfSvm, train, test, cv, run)?;
        Ok((linear, rbf))
    }

    /// Run the full procedure and keep every intermediate product.
    pub fn evaluate(
        &self,
        descriptor: &FamilyDescriptor,
        train: &Dataset,
        test: &Dataset,
        cv: &dyn CvStrategy,
        run: &EvaluationRun,
    ) -> CpResult<EvaluationResult> {
        let tag = descriptor.tag();
        info!("[{}] {} -> tuning on {} train / {} test rows", tag, TuneState::NotStarted, train.len(), test.len());

        let mut state = TuneState::NotStarted;
        let result = self.run_stages(descriptor, train, test, cv, run, &mut state);
        match &result {
            Ok(res) => info!(
                "[{}] {} -> accuracy {:.4}, artifacts {}",
                tag,
                TuneState::Persisted,
                res.accuracy,
                res.artifacts.npy.display()
            ),
            Err(e) => warn!("[{}] {} while {}: {}", tag, TuneState::Failed, state, e),
        }
        result
    }

    fn run_stages(
        &self,
        descriptor: &FamilyDescriptor,
        train: &Dataset,
        test: &Dataset,
        cv: &dyn CvStrategy,
        run: &EvaluationRun,
        state: &mut TuneState,
    ) -> CpResult<EvaluationResult> {
        let tag = descriptor.tag();
        check_split_pair(train, test)?;

        let train_classes = train.classes();
        for label in test.classes() {
            if train_classes.binary_search(&label).is_err() {
                warn!("[{}] test label {} never appears in the training split", tag, label);
            }
        }

        let (configuration, search) = match descriptor.strategy {
            StrategyKind::Skip => (Configuration::new(), None),
            StrategyKind::Grid | StrategyKind::Sequential => {
                *state = TuneState::Searching;
                info!("[{}] {} with {} search", tag, state, strategy_label(descriptor.strategy));
                let folds = cv.split(train)?;
                let (best, status) = self.search(descriptor, train, &folds)?;
                (best, Some(status))
            }
        };

        *state = TuneState::Fitting;
        info!("[{}] {} with {}", tag, state, describe(&configuration));
        let mut model = descriptor.build(&configuration, self.config.seed)?;
        model.fit(train)?;

        *state = TuneState::Evaluating;
        let predicted = model.predict(test)?;
        let confusion = ConfusionMatrix::from_predictions(test.labels(), &predicted)?;
        let accuracy = confusion.accuracy();
        debug!("[{}] {}: {}/{} correct", tag, state, confusion.correct(), confusion.total());

        let artifacts = self.store.persist(run, tag, &confusion)?;
        *state = TuneState::Persisted;

        Ok(EvaluationResult {
            family: descriptor.family,
            model,
            configuration,
            confusion,
            accuracy,
            search,
            artifacts,
        })
    }

    fn strategy_for(&self, descriptor: &FamilyDescriptor) -> CpResult<Box<dyn SearchStrategy>> {
        let strategy: Box<dyn SearchStrategy> = match descriptor.strategy {
            StrategyKind::Grid => Box::new(GridSearch::new(&descriptor.space)?),
            StrategyKind::Sequential | StrategyKind::Skip => Box::new(
                TpeSearch::new(descriptor.space.clone(), self.config.seed)?
                    .with_max_evals(self.config.max_evals)
                    .with_startup(self.config.startup_trials)
                    .with_gamma(self.config.gamma)
                    .with_candidates(self.config.candidates),
            ),
        };
        Ok(strategy)
    }

    /// Score candidates by mean cross-validated accuracy until the strategy
    /// is exhausted, then return its chosen configuration.
    ///
    /// Candidates of a batch are scored in parallel unless the family opts
    /// out (see [`Family::scores_batch_in_parallel`]); folds always run in
    /// parallel. Results are reported back in suggestion order so
    /// tie-breaking stays deterministic.
    fn search(
        &self,
        descriptor: &FamilyDescriptor,
        train: &Dataset,
        folds: &[Fold],
    ) -> CpResult<(Configuration, OptimizationStatus)> {
        let mut strategy = self.strategy_for(descriptor)?;
        let mut status =
            OptimizationStatus::new(descriptor.tag(), strategy.name(), ObjectiveDirection::Maximize);
        status.mark_running();
        let seed = self.config.seed;
        let parallel = descriptor.family.scores_batch_in_parallel();

        loop {
            let size = strategy.batch_size();
            let batch = strategy.suggest(size);
            if batch.is_empty() {
                break;
            }

            let first = status.next_trial_number();
            let scored: Vec<(Trial, CpResult<Vec<f64>>)> =
                map_batch(batch, parallel, |offset, params| {
                    let mut trial = Trial::new(status.id, first + offset, params);
                    trial.mark_running();
                    let scores = cross_val_score(
                        || descriptor.build(&trial.parameters, seed),
                        train,
                        folds,
                    );
                    (trial, scores)
                });

            for (mut trial, scores) in scored {
                match scores {
                    Ok(scores) => {
                        let objective = cp_models::cv::mean(&scores);
                        debug!(
                            "[{}] trial {}: {:.4} with {}",
                            descriptor.tag(),
                            trial.trial_number,
                            objective,
                            describe(&trial.parameters)
                        );
                        strategy.report(&trial.parameters, -objective);
                        trial.mark_completed(objective, scores);
                        status.record(trial);
                    }
                    Err(e) => {
                        trial.mark_failed(e.to_string());
                        status.record(trial);
                        status.mark_failed(e.to_string());
                        return Err(e);
                    }
                }
            }
        }

        let best = strategy.conclude()?;
        descriptor.space.check_membership(&best)?;
        status.mark_completed();
        if let Some(observed) = &status.best_trial {
            info!(
                "[{}] {} trials done; best observed {:.4}, chosen {}",
                descriptor.tag(),
                status.trials_completed,
                observed.objective,
                describe(&best)
            );
        }
        Ok((best, status))
    }
}

/// Apply `score` to each item with its position, concurrently when
/// `parallel` is set. Output keeps the input order.
fn map_batch<T, R, F>(items: Vec<T>, parallel: bool, score: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> R + Sync + Send,
{
    if parallel {
        items
            .into_par_iter()
            .enumerate()
            .map(|(i, item)| score(i, item))
            .collect()
    } else {
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| score(i, item))
            .collect()
    }
}

fn strategy_label(kind: StrategyKind) -> &'static str {
    match kind {
        StrategyKind::Grid => "grid",
        StrategyKind::Sequential => "tpe",
        StrategyKind::Skip => "no",
    }
}

fn describe(config: &Configuration) -> String {
    if config.is_empty() {
        return "defaults".to_string();
    }
    config
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_models::{GaussianNaiveBayes, StratifiedKFold};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use cp_optimizer::SearchSpace;
    use cp_optimizer::TrialStatus;

    fn blobs(per_class: usize, offset: f64) -> Dataset {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..3i64 {
            for i in 0..per_class {
                let jitter = ((i * 7 + class as usize * 3) % 11) as f64 / 11.0 - 0.5 + offset;
                let mut row = vec![jitter; 2];
                row[class as usize % 2] += 4.0 * class as f64;
                rows.push(row);
                labels.push(class);
            }
        }
        Dataset::new(rows, labels).unwrap()
    }

    fn runner() -> TuningRunner {
        TuningRunner::new(
            TuningConfig::default()
                .with_max_evals(6)
                .with_startup_trials(3),
        )
        .unwrap()
    }

    #[test]
    fn grid_search_records_every_combination() {
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.1);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "0", dir.path());
        let descriptor = FamilyDescriptor::new(Family::KNearestNeighbors).with_space(
            SearchSpace::new()
                .add_choice("n_neighbors", [1i64, 3])
                .add_choice("weights", ["uniform"])
                .add_choice("algorithm", ["auto", "brute"]),
        );
        let cv = StratifiedKFold::new(3);
        let result = runner().evaluate(&descriptor, &train, &test, &cv, &run).unwrap();

        let search = result.search.unwrap();
        assert_eq!(search.strategy, "grid");
        assert_eq!(search.trials.len(), 4);
        assert!(search.trials.iter().all(|t| t.status == TrialStatus::Completed));
        let numbers: Vec<usize> = search.trials.iter().map(|t| t.trial_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
        assert_eq!(result.accuracy, 1.0);
    }

    #[test]
    fn sequential_search_uses_trial_budget() {
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.2);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "1", dir.path());
        let descriptor = FamilyDescriptor::new(Family::AdaBoost).with_space(
            SearchSpace::new()
                .add_choice("n_estimators", [5i64, 10, 20])
                .add_choice("learning_rate", [0.1, 0.5]),
        );
        let cv = StratifiedKFold::new(2);
        let result = runner().evaluate(&descriptor, &train, &test, &cv, &run).unwrap();

        let search = result.search.unwrap();
        assert_eq!(search.strategy, "tpe");
        assert_eq!(search.trials_completed, 6);
        descriptor.space.check_membership(&result.configuration).unwrap();
    }

    #[test]
    fn skip_family_has_no_search() {
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.1);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "2", dir.path());
        let cv = StratifiedKFold::new(3);
        let result = runner()
            .evaluate(&Family::NaiveBayes.into(), &train, &test, &cv, &run)
            .unwrap();
        assert!(result.search.is_none());
        assert!(result.configuration.is_empty());
    }

    #[test]
    fn skip_family_matches_a_direct_fit() {
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.3);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "5", dir.path());
        let cv = StratifiedKFold::new(3);
        let result = runner()
            .evaluate(&Family::NaiveBayes.into(), &train, &test, &cv, &run)
            .unwrap();

        let mut direct = GaussianNaiveBayes::new();
        direct.fit(&train).unwrap();
        let predicted = direct.predict(&test).unwrap();
        let expected = ConfusionMatrix::from_predictions(test.labels(), &predicted).unwrap();
        assert_eq!(result.confusion, expected);
        assert_eq!(result.accuracy, cp_models::accuracy(test.labels(), &predicted));
        assert_eq!(result.accuracy, expected.accuracy());
    }

    #[test]
    fn sequential_batches_score_one_candidate_at_a_time() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let score = |i: usize, x: usize| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
            (i, x * 10)
        };
        let expected: Vec<(usize, usize)> = (0..16).map(|x| (x, x * 10)).collect();

        assert_eq!(map_batch((0..16).collect(), false, score), expected);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(map_batch((0..16).collect(), true, score), expected);
    }

    #[test]
    fn failing_trial_aborts_the_call() {
        // k = 40 exceeds every training fold.
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.1);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "3", dir.path());
        let descriptor = FamilyDescriptor::new(Family::KNearestNeighbors).with_space(
            SearchSpace::new()
                .add_choice("n_neighbors", [40i64])
                .add_choice("weights", ["uniform"])
                .add_choice("algorithm", ["auto"]),
        );
        let cv = StratifiedKFold::new(3);
        let err = runner().tune(&descriptor, &train, &test, &cv, &run).unwrap_err();
        assert!(err.is_external());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn grid_rejects_continuous_space() {
        let train = blobs(10, 0.0);
        let test = blobs(4, 0.1);
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("d", "s", "4", dir.path());
        let descriptor = FamilyDescriptor::new(Family::LogisticRegression)
            .with_space(SearchSpace::new().add_float("C", 0.1, 10.0));
        let cv = StratifiedKFold::new(3);
        let err = runner().tune(&descriptor, &train, &test, &cv, &run).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn describe_lists_parameters() {
        let mut config = Configuration::new();
        assert_eq!(describe(&config), "defaults");
        config.insert("k".to_string(), 3i64.into());
        config.insert("w".to_string(), "uniform".into());
        assert_eq!(describe(&config), "k=3, w=uniform");
    }
}
