use std::collections::BTreeMap;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use cp_tuning::{load_csv, Family, RunManifest, TuningRunner};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let manifest_path = std::env::args()
        .nth(1)
        .context("usage: caliper-tune <manifest.json>")?;
    let manifest = RunManifest::from_json_file(&manifest_path)
        .with_context(|| format!("loading manifest {manifest_path}"))?;

    let train = load_csv(&manifest.train_path, &manifest.label_column)
        .with_context(|| format!("loading train split {}", manifest.train_path.display()))?;
    let test = load_csv(&manifest.test_path, &manifest.label_column)
        .with_context(|| format!("loading test split {}", manifest.test_path.display()))?;

    let runner = TuningRunner::new(manifest.config.clone())?;
    let cv = runner.default_cv();
    let run = manifest.evaluation_run();

    let mut accuracies: BTreeMap<&str, f64> = BTreeMap::new();
    for family in &manifest.families {
        let accuracy = runner
            .tune_family(*family, &train, &test, cv.as_ref(), &run)
            .with_context(|| format!("tuning family {family}"))?;
        accuracies.insert(Family::tag(*family), accuracy);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "deployment": manifest.deployment,
            "sensor": manifest.sensor,
            "run_index": manifest.run_index,
            "accuracy": accuracies,
        }))?
    );
    Ok(())
}
