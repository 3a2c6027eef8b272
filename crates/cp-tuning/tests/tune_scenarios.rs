use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cp_models::{Classifier, CvStrategy, KFold, StratifiedKFold};
use cp_optimizer::{ParameterValue, SearchSpace};
use cp_tuning::{Family, FamilyDescriptor, TuningConfig, TuningRunner};
use cp_types::{Dataset, EvaluationRun};

/// `n` rows of `d` features; class `c` is centred at 3 on feature `c`.
fn three_classes(n: usize, d: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = (i % 3) as i64;
        let row = (0..d)
            .map(|f| {
                let centre = if f == class as usize { 3.0 } else { 0.0 };
                centre + rng.gen_range(-1.2..1.2)
            })
            .collect();
        rows.push(row);
        labels.push(class);
    }
    Dataset::new(rows, labels).unwrap()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn runner() -> TuningRunner {
    TuningRunner::new(TuningConfig::default().with_max_evals(8).with_startup_trials(4)).unwrap()
}

#[test]
fn naive_bayes_on_reference_split() {
    let train = three_classes(100, 4, 1);
    let test = three_classes(30, 4, 2);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("dep1", "imu", "0", dir.path());

    let result = runner()
        .evaluate(&Family::NaiveBayes.into(), &train, &test, &KFold::new(5), &run)
        .unwrap();

    let cm = &result.confusion;
    assert_eq!(cm.size(), 3);
    assert_eq!(cm.total(), 30);
    assert_eq!(cm.row_sums(), vec![10, 10, 10]);
    assert!((0.0..=1.0).contains(&result.accuracy));

    let correct = result
        .model
        .predict(&test)
        .unwrap()
        .iter()
        .zip(test.labels())
        .filter(|(p, t)| p == t)
        .count();
    assert_eq!(result.accuracy, correct as f64 / 30.0);
    assert_eq!(result.accuracy, cm.correct() as f64 / cm.total() as f64);

    assert_eq!(files_in(dir.path()), vec!["dep1_imu_0_nb.npy", "dep1_imu_0_nb.txt"]);
    let text = fs::read_to_string(dir.path().join("dep1_imu_0_nb.txt")).unwrap();
    assert!(text.starts_with("[[") && text.ends_with("]]"));
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn empty_test_split_is_input_error_and_writes_nothing() {
    let train = three_classes(30, 4, 3);
    let test = Dataset::new(Vec::new(), Vec::new()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("dep1", "imu", "0", dir.path());

    let err = runner()
        .tune_family(Family::KNearestNeighbors, &train, &test, &KFold::new(3), &run)
        .unwrap_err();
    assert!(err.is_input(), "{err}");
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn dimension_mismatch_is_input_error() {
    let train = three_classes(30, 4, 4);
    let test = three_classes(9, 3, 5);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("d", "s", "0", dir.path());

    let err = runner()
        .tune_family(Family::NaiveBayes, &train, &test, &KFold::new(3), &run)
        .unwrap_err();
    assert!(err.is_input());
}

#[test]
fn missing_output_directory_is_config_error() {
    let train = three_classes(30, 4, 6);
    let test = three_classes(9, 4, 7);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-there");
    let run = EvaluationRun::new("d", "s", "0", &missing);

    let err = runner()
        .tune_family(Family::NaiveBayes, &train, &test, &KFold::new(3), &run)
        .unwrap_err();
    assert!(err.is_config(), "{err}");
    assert!(!missing.exists());
    assert!(files_in(dir.path()).is_empty());
}

#[cfg(unix)]
#[test]
fn read_only_output_directory_is_config_error() {
    use std::os::unix::fs::PermissionsExt;

    let train = three_classes(30, 4, 8);
    let test = three_classes(9, 4, 9);
    let dir = tempfile::tempdir().unwrap();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();
    let run = EvaluationRun::new("d", "s", "0", dir.path());

    let err = runner()
        .tune_family(Family::NaiveBayes, &train, &test, &KFold::new(3), &run)
        .unwrap_err();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

    assert!(err.is_config(), "{err}");
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn rerun_produces_identical_artifacts() {
    let train = three_classes(60, 4, 10);
    let test = three_classes(24, 4, 11);
    let descriptor = FamilyDescriptor::new(Family::RandomForest).with_space(
        SearchSpace::new()
            .add_choice("n_estimators", [5i64, 10])
            .add_choice("max_features", ["sqrt", "log2"])
            .add_choice("max_depth", [Some(3i64), None])
            .add_choice("min_samples_split", [2i64, 5])
            .add_choice("min_samples_leaf", [1i64, 2])
            .add_choice("bootstrap", [true, false])
            .add_choice("criterion", ["gini", "entropy"]),
    );
    let cv = StratifiedKFold::new(3).shuffled(7);

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let a = runner()
        .evaluate(&descriptor, &train, &test, &cv, &EvaluationRun::new("d", "s", "r", first.path()))
        .unwrap();
    let b = runner()
        .evaluate(&descriptor, &train, &test, &cv, &EvaluationRun::new("d", "s", "r", second.path()))
        .unwrap();

    assert_eq!(a.configuration, b.configuration);
    for name in ["d_s_r_rf.txt", "d_s_r_rf.npy"] {
        assert_eq!(
            fs::read(first.path().join(name)).unwrap(),
            fs::read(second.path().join(name)).unwrap(),
            "{name}"
        );
    }
}

#[test]
fn rerun_overwrites_in_place() {
    let train = three_classes(30, 4, 12);
    let test = three_classes(9, 4, 13);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("d", "s", "0", dir.path());
    let r = runner();
    r.tune_family(Family::NaiveBayes, &train, &test, &KFold::new(3), &run).unwrap();
    r.tune_family(Family::NaiveBayes, &train, &test, &KFold::new(3), &run).unwrap();
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[test]
fn grid_ties_go_to_the_first_combination() {
    // gamma has no effect on the linear kernel, so every gamma ties.
    let train = three_classes(45, 4, 14);
    let test = three_classes(15, 4, 15);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("d", "s", "0", dir.path());
    let descriptor = FamilyDescriptor::new(Family::LinearSvm).with_space(
        SearchSpace::new().add_choice("C", [1.0]).add_choice(
            "gamma",
            [
                ParameterValue::from("scale"),
                ParameterValue::Float(0.1),
                ParameterValue::Float(1.0),
            ],
        ),
    );

    let result = runner()
        .evaluate(&descriptor, &train, &test, &KFold::new(3), &run)
        .unwrap();
    assert_eq!(result.configuration["gamma"], ParameterValue::from("scale"));

    let search = result.search.unwrap();
    let objectives: Vec<f64> = search
        .trials
        .iter()
        .map(|t| t.result.as_ref().unwrap().objective)
        .collect();
    assert!(objectives.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn sequential_estimate_stays_in_domain() {
    let train = three_classes(45, 4, 16);
    let test = three_classes(15, 4, 17);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("d", "s", "0", dir.path());
    let descriptor = FamilyDescriptor::new(Family::GradientBoosting).with_space(
        SearchSpace::new()
            .add_choice("max_depth", 2i64..4)
            .add_choice("n_estimators", [5i64, 10])
            .add_choice("learning_rate", [0.1, 0.3])
            .add_choice("min_child_weight", [1i64, 2])
            .add_choice("gamma", [0.0, 0.5])
            .add_choice("colsample_bytree", [0.5, 1.0]),
    );

    let result = runner()
        .evaluate(&descriptor, &train, &test, &KFold::new(3).shuffled(1), &run)
        .unwrap();
    descriptor.space.check_membership(&result.configuration).unwrap();
    assert_eq!(result.search.unwrap().trials_completed, 8);
    assert!(dir.path().join("d_s_0_xg.npy").exists());
}

#[test]
fn svm_pair_writes_both_artifacts() {
    let train = three_classes(45, 4, 18);
    let test = three_classes(15, 4, 19);
    let dir = tempfile::tempdir().unwrap();
    let run = EvaluationRun::new("dep", "cam", "2", dir.path());
    let cv: Box<dyn CvStrategy> = Box::new(StratifiedKFold::new(3));

    let (linear, rbf) = runner().tune_svm(&train, &test, cv.as_ref(), &run).unwrap();
    assert!((0.0..=1.0).contains(&linear));
    assert!((0.0..=1.0).contains(&rbf));
    assert_eq!(
        files_in(dir.path()),
        vec![
            "dep_cam_2_lsvm.npy",
            "dep_cam_2_lsvm.txt",
            "dep_cam_2_rsvm.npy",
            "dep_cam_2_rsvm.txt"
        ]
    );
}
