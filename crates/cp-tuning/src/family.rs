//! Classifier families: tags, default search spaces, and factories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cp_models::{
    AdaBoostClassifier, Classifier, Criterion, ExtraTreesClassifier, Gamma, GaussianNaiveBayes,
    GradientBoostedClassifier, KNearestNeighbors, LogisticRegression, MaxFeatures, MultiClass,
    NeighborAlgorithm, NeighborWeights, RandomForestClassifier, SupportVectorClassifier,
    TreeParams,
};
use cp_optimizer::{Configuration, ParameterValue, SearchSpace};
use cp_types::{ConfigError, CpError, CpResult};

/// The closed set of tunable classifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Family {
    LinearSvm,
    RbfSvm,
    LogisticRegression,
    RandomForest,
    ExtraTrees,
    AdaBoost,
    GradientBoosting,
    KNearestNeighbors,
    NaiveBayes,
}

/// How a family's search space is explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Exhaustive grid over discrete domains.
    Grid,
    /// Tree-structured Parzen Estimator with a fixed trial budget.
    Sequential,
    /// No hyperparameters: fit directly.
    Skip,
}

impl Family {
    pub const ALL: [Family; 9] = [
        Family::LinearSvm,
        Family::RbfSvm,
        Family::LogisticRegression,
        Family::RandomForest,
        Family::ExtraTrees,
        Family::AdaBoost,
        Family::GradientBoosting,
        Family::KNearestNeighbors,
        Family::NaiveBayes,
    ];

    /// Short code used in artifact names.
    pub fn tag(self) -> &'static str {
        match self {
            Family::LinearSvm => "lsvm",
            Family::RbfSvm => "rsvm",
            Family::LogisticRegression => "lr",
            Family::RandomForest => "rf",
            Family::ExtraTrees => "et",
            Family::AdaBoost => "adb",
            Family::GradientBoosting => "xg",
            Family::KNearestNeighbors => "knn",
            Family::NaiveBayes => "nb",
        }
    }

    pub fn from_tag(tag: &str) -> CpResult<Self> {
        Family::ALL
            .into_iter()
            .find(|f| f.tag() == tag)
            .ok_or_else(|| {
                ConfigError::UnknownFamily {
                    tag: tag.to_string(),
                }
                .into()
            })
    }

    /// Whether the candidates of one search batch may be fitted at the same
    /// time. Margin classifiers hold a dense `n x n` kernel matrix per fit,
    /// so their candidates are scored one after another.
    pub fn scores_batch_in_parallel(self) -> bool {
        !matches!(self, Family::LinearSvm | Family::RbfSvm)
    }

    pub fn default_strategy(self) -> StrategyKind {
        match self {
            Family::LinearSvm
            | Family::RbfSvm
            | Family::LogisticRegression
            | Family::KNearestNeighbors => StrategyKind::Grid,
            Family::RandomForest
            | Family::ExtraTrees
            | Family::AdaBoost
            | Family::GradientBoosting => StrategyKind::Sequential,
            Family::NaiveBayes => StrategyKind::Skip,
        }
    }

    pub fn default_space(self) -> SearchSpace {
        match self {
            Family::LinearSvm | Family::RbfSvm => SearchSpace::new()
                .add_choice("C", [0.01, 0.1, 1.0, 10.0])
                .add_choice(
                    "gamma",
                    [
                        ParameterValue::Float(0.01),
                        ParameterValue::Float(0.1),
                        ParameterValue::Float(1.0),
                        ParameterValue::Float(10.0),
                        ParameterValue::from("scale"),
                    ],
                ),
            Family::LogisticRegression => SearchSpace::new()
                .add_choice("C", [0.001, 0.01, 0.1, 1.0, 10.0, 100.0])
                .add_choice("multi_class", ["auto", "ovr", "multinomial"])
                .add_choice("max_iter", (100i64..=500).step_by(100)),
            Family::KNearestNeighbors => SearchSpace::new()
                .add_int("n_neighbors", 3, 8)
                .add_choice("weights", ["uniform", "distance"])
                .add_choice("algorithm", ["auto", "ball_tree", "kd_tree"]),
            Family::RandomForest | Family::ExtraTrees => SearchSpace::new()
                .add_choice("n_estimators", linspace_int(200, 2000, 10))
                .add_choice("max_features", ["auto", "sqrt", "log2"])
                .add_choice(
                    "max_depth",
                    (10i64..=110)
                        .step_by(10)
                        .map(Some)
                        .chain(std::iter::once(None)),
                )
                .add_choice("min_samples_split", [2i64, 5, 10])
                .add_choice("min_samples_leaf", [1i64, 2, 3, 4])
                .add_choice("bootstrap", [true, false])
                .add_choice("criterion", ["gini", "entropy"]),
            Family::AdaBoost => SearchSpace::new()
                .add_choice("n_estimators", linspace_int(50, 1000, 80))
                .add_choice("learning_rate", [0.001, 0.01, 0.05, 0.1]),
            Family::GradientBoosting => SearchSpace::new()
                .add_choice("max_depth", 2i64..10)
                .add_choice("n_estimators", (20i64..200).step_by(10))
                .add_choice("learning_rate", [0.1, 0.01, 0.05])
                .add_choice("min_child_weight", 1i64..10)
                .add_choice("gamma", [0.5, 1.0, 1.5, 2.0, 5.0])
                .add_choice("colsample_bytree", [0.1, 0.5, 0.8, 1.0]),
            Family::NaiveBayes => SearchSpace::new(),
        }
    }

    /// Instantiate an untrained classifier from a concrete configuration.
    pub fn build(self, config: &Configuration, seed: u64) -> CpResult<Box<dyn Classifier>> {
        let model: Box<dyn Classifier> = match self {
            Family::LinearSvm => Box::new(SupportVectorClassifier::linear(positive(config, "C")?)),
            Family::RbfSvm => Box::new(SupportVectorClassifier::rbf(positive(config, "C")?, gamma(config)?)),
            Family::LogisticRegression => Box::new(LogisticRegression::new(
                positive(config, "C")?,
                count(config, "max_iter")?,
                match text(config, "multi_class")? {
                    "auto" => MultiClass::Auto,
                    "ovr" => MultiClass::Ovr,
                    "multinomial" => MultiClass::Multinomial,
                    other => return Err(invalid("multi_class", format!("unknown mode {other:?}"))),
                },
            )),
            Family::KNearestNeighbors => Box::new(
                KNearestNeighbors::new(count(config, "n_neighbors")?)
                    .with_weights(match text(config, "weights")? {
                        "uniform" => NeighborWeights::Uniform,
                        "distance" => NeighborWeights::Distance,
                        other => return Err(invalid("weights", format!("unknown weighting {other:?}"))),
                    })
                    .with_algorithm(match text(config, "algorithm")? {
                        "auto" => NeighborAlgorithm::Auto,
                        "ball_tree" => NeighborAlgorithm::BallTree,
                        "kd_tree" => NeighborAlgorithm::KdTree,
                        "brute" => NeighborAlgorithm::Brute,
                        other => return Err(invalid("algorithm", format!("unknown algorithm {other:?}"))),
                    }),
            ),
            Family::RandomForest => Box::new(
                RandomForestClassifier::new(count(config, "n_estimators")?)
                    .with_params(tree_params(config)?)
                    .with_bootstrap(flag(config, "bootstrap")?)
                    .with_seed(seed),
            ),
            Family::ExtraTrees => Box::new(
                ExtraTreesClassifier::new(count(config, "n_estimators")?)
                    .with_params(tree_params(config)?)
                    .with_bootstrap(flag(config, "bootstrap")?)
                    .with_seed(seed),
            ),
            Family::AdaBoost => Box::new(AdaBoostClassifier::new(
                count(config, "n_estimators")?,
                positive(config, "learning_rate")?,
            )),
            Family::GradientBoosting => Box::new(
                GradientBoostedClassifier::new(
                    count(config, "n_estimators")?,
                    count(config, "max_depth")?,
                    positive(config, "learning_rate")?,
                )
                .with_min_child_weight(number(config, "min_child_weight")?)
                .with_gamma(number(config, "gamma")?)
                .with_colsample_bytree(positive(config, "colsample_bytree")?)
                .with_seed(seed),
            ),
            Family::NaiveBayes => Box::new(GaussianNaiveBayes::new()),
        };
        Ok(model)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Family {
    type Err = CpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Family::from_tag(s)
    }
}

impl TryFrom<String> for Family {
    type Error = CpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Family::from_tag(&value)
    }
}

impl From<Family> for String {
    fn from(family: Family) -> Self {
        family.tag().to_string()
    }
}

/// `numpy.linspace(start, stop, num)` truncated to integers.
fn linspace_int(start: i64, stop: i64, num: usize) -> Vec<i64> {
    if num < 2 {
        return vec![start];
    }
    let step = (stop - start) as f64 / (num - 1) as f64;
    (0..num)
        .map(|i| (start as f64 + step * i as f64) as i64)
        .collect()
}

/// A family, the space to search, and how to search it.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyDescriptor {
    pub family: Family,
    pub space: SearchSpace,
    pub strategy: StrategyKind,
}

impl FamilyDescriptor {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            space: family.default_space(),
            strategy: family.default_strategy(),
        }
    }

    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn tag(&self) -> &'static str {
        self.family.tag()
    }

    pub fn build(&self, config: &Configuration, seed: u64) -> CpResult<Box<dyn Classifier>> {
        self.family.build(config, seed)
    }
}

impl From<Family> for FamilyDescriptor {
    fn from(family: Family) -> Self {
        Self::new(family)
    }
}

// ---- parameter readers ----

fn invalid(parameter: &str, message: String) -> CpError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        message,
    }
    .into()
}

fn lookup<'a>(config: &'a Configuration, name: &str) -> CpResult<&'a ParameterValue> {
    config.get(name).ok_or_else(|| {
        ConfigError::MissingParameter {
            parameter: name.to_string(),
        }
        .into()
    })
}

fn number(config: &Configuration, name: &str) -> CpResult<f64> {
    let value = lookup(config, name)?;
    value
        .as_f64()
        .ok_or_else(|| invalid(name, format!("expected a number, got {value}")))
}

fn positive(config: &Configuration, name: &str) -> CpResult<f64> {
    let value = number(config, name)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(name, format!("must be positive, got {value}")))
    }
}

fn count(config: &Configuration, name: &str) -> CpResult<usize> {
    let value = lookup(config, name)?;
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| invalid(name, format!("expected a non-negative integer, got {value}")))
}

fn text<'a>(config: &'a Configuration, name: &str) -> CpResult<&'a str> {
    let value = lookup(config, name)?;
    value
        .as_str()
        .ok_or_else(|| invalid(name, format!("expected a string, got {value}")))
}

fn flag(config: &Configuration, name: &str) -> CpResult<bool> {
    let value = lookup(config, name)?;
    value
        .as_bool()
        .ok_or_else(|| invalid(name, format!("expected a boolean, got {value}")))
}

fn gamma(config: &Configuration) -> CpResult<Gamma> {
    match lookup(config, "gamma")? {
        ParameterValue::Text(s) if s == "scale" => Ok(Gamma::Scale),
        other => match other.as_f64() {
            Some(g) if g > 0.0 => Ok(Gamma::Value(g)),
            _ => Err(invalid("gamma", format!("expected \"scale\" or a positive number, got {other}"))),
        },
    }
}

fn tree_params(config: &Configuration) -> CpResult<TreeParams> {
    let max_depth = match lookup(config, "max_depth")? {
        ParameterValue::None => None,
        _ => Some(count(config, "max_depth")?),
    };
    let max_features = match text(config, "max_features")? {
        // "auto" means sqrt for classifiers.
        "auto" | "sqrt" => MaxFeatures::Sqrt,
        "log2" => MaxFeatures::Log2,
        "all" => MaxFeatures::All,
        other => return Err(invalid("max_features", format!("unknown policy {other:?}"))),
    };
    let criterion = match text(config, "criterion")? {
        "gini" => Criterion::Gini,
        "entropy" => Criterion::Entropy,
        other => return Err(invalid("criterion", format!("unknown criterion {other:?}"))),
    };
    Ok(TreeParams {
        criterion,
        max_depth,
        min_samples_split: count(config, "min_samples_split")?,
        min_samples_leaf: count(config, "min_samples_leaf")?,
        max_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_optimizer::GridSearch;

    fn config(pairs: &[(&str, ParameterValue)]) -> Configuration {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn kernel_families_score_candidates_sequentially() {
        let sequential: Vec<Family> = Family::ALL
            .into_iter()
            .filter(|f| !f.scores_batch_in_parallel())
            .collect();
        assert_eq!(sequential, vec![Family::LinearSvm, Family::RbfSvm]);
    }

    #[test]
    fn tags_round_trip() {
        for family in Family::ALL {
            assert_eq!(family.tag().parse::<Family>().unwrap(), family);
        }
        assert!(Family::from_tag("svm").unwrap_err().is_config());
    }

    #[test]
    fn default_spaces_are_valid() {
        for family in Family::ALL {
            let space = family.default_space();
            space.validate().unwrap();
            if family.default_strategy() == StrategyKind::Grid {
                assert!(GridSearch::new(&space).is_ok(), "{family}");
            }
        }
        assert!(Family::NaiveBayes.default_space().is_empty());
    }

    #[test]
    fn grid_sizes_match_declared_domains() {
        assert_eq!(Family::RbfSvm.default_space().grid_size(), Some(20));
        assert_eq!(Family::LogisticRegression.default_space().grid_size(), Some(90));
        assert_eq!(Family::KNearestNeighbors.default_space().grid_size(), Some(36));
    }

    #[test]
    fn linspace_truncates_like_numpy() {
        assert_eq!(
            linspace_int(200, 2000, 10),
            vec![200, 400, 600, 800, 1000, 1200, 1400, 1600, 1800, 2000]
        );
        let adb = linspace_int(50, 1000, 80);
        assert_eq!(adb.len(), 80);
        assert_eq!((adb[0], adb[1], adb[79]), (50, 62, 1000));
    }

    #[test]
    fn every_default_configuration_builds() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        for family in Family::ALL {
            let params = family.default_space().sample_random(&mut rng);
            let model = family.build(&params, 0).unwrap();
            assert!(!model.name().is_empty());
        }
    }

    #[test]
    fn missing_parameter_is_config_error() {
        let err = Family::KNearestNeighbors
            .build(&config(&[("n_neighbors", 3i64.into())]), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            CpError::Config(ConfigError::MissingParameter { ref parameter }) if parameter == "weights"
        ));
    }

    #[test]
    fn wrong_type_is_config_error() {
        let err = Family::LogisticRegression
            .build(
                &config(&[
                    ("C", 1.0.into()),
                    ("max_iter", "lots".into()),
                    ("multi_class", "auto".into()),
                ]),
                0,
            )
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn rbf_gamma_accepts_scale_and_numbers() {
        let scale = config(&[("gamma", "scale".into())]);
        assert_eq!(gamma(&scale).unwrap(), Gamma::Scale);
        let fixed = config(&[("gamma", 0.1.into())]);
        assert_eq!(gamma(&fixed).unwrap(), Gamma::Value(0.1));
        let bad = config(&[("gamma", "wide".into())]);
        assert!(gamma(&bad).is_err());
    }

    #[test]
    fn unbounded_depth_maps_to_none() {
        let params = tree_params(&config(&[
            ("max_depth", ParameterValue::None),
            ("max_features", "auto".into()),
            ("criterion", "entropy".into()),
            ("min_samples_split", 5i64.into()),
            ("min_samples_leaf", 2i64.into()),
        ]))
        .unwrap();
        assert_eq!(params.max_depth, None);
        assert_eq!(params.max_features, MaxFeatures::Sqrt);
        assert_eq!(params.criterion, Criterion::Entropy);
    }

    #[test]
    fn descriptor_overrides() {
        let small = SearchSpace::new().add_choice("C", [1.0]).add_choice("gamma", ["scale"]);
        let d = FamilyDescriptor::new(Family::RbfSvm)
            .with_space(small.clone())
            .with_strategy(StrategyKind::Sequential);
        assert_eq!(d.space, small);
        assert_eq!(d.strategy, StrategyKind::Sequential);
        assert_eq!(d.tag(), "rsvm");
    }
}
