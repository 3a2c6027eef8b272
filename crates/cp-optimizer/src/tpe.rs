//! Sequential model-based search with Tree-structured Parzen Estimators.
//!
//! Completed trials are split by loss into a "good" quantile and the rest.
//! Each dimension gets two Parzen densities, `l(x)` over the good trials and
//! `g(x)` over the others; the next draw is the candidate (sampled from
//! `l`) with the highest `l(x) / g(x)`. After the budget is spent the search
//! reports its terminal estimate: the per-dimension maximiser of that ratio
//! over the full history. That estimate need not equal the best single
//! trial observed, see [`TpeSearch::best_observed`] for the latter.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;
use tracing::debug;

use cp_types::{CpResult, ExternalError};

use crate::search::{
    Configuration, ParameterDef, ParameterKind, ParameterValue, SearchSpace, SearchStrategy,
};

/// Integer ranges up to this size are enumerated exhaustively for the
/// terminal estimate.
const MAX_ENUMERATED_INTS: i64 = 1024;

/// Tree-structured Parzen Estimator search with a fixed trial budget.
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    max_evals: usize,
    n_startup: usize,
    gamma: f64,
    n_candidates: usize,
    rng: ChaCha8Rng,
    issued: usize,
    observations: Vec<(Configuration, f64)>,
}

impl TpeSearch {
    pub const DEFAULT_MAX_EVALS: usize = 60;
    pub const DEFAULT_STARTUP: usize = 20;
    pub const DEFAULT_GAMMA: f64 = 0.25;
    pub const DEFAULT_CANDIDATES: usize = 24;

    pub fn new(space: SearchSpace, seed: u64) -> CpResult<Self> {
        space.validate()?;
        Ok(Self {
            space,
            max_evals: Self::DEFAULT_MAX_EVALS,
            n_startup: Self::DEFAULT_STARTUP,
            gamma: Self::DEFAULT_GAMMA,
            n_candidates: Self::DEFAULT_CANDIDATES,
            rng: ChaCha8Rng::seed_from_u64(seed),
            issued: 0,
            observations: Vec::new(),
        })
    }

    pub fn with_max_evals(mut self, n: usize) -> Self {
        self.max_evals = n.max(1);
        self
    }

    /// Number of purely random draws before the density model takes over.
    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(1);
        self
    }

    /// Quantile of trials treated as "good".
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    /// Candidates drawn from `l(x)` per dimension per suggestion.
    pub fn with_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    pub fn max_evals(&self) -> usize {
        self.max_evals
    }

    pub fn observations(&self) -> &[(Configuration, f64)] {
        &self.observations
    }

    /// Lowest-loss trial seen so far (earliest on ties).
    pub fn best_observed(&self) -> Option<&(Configuration, f64)> {
        self.observations.iter().fold(None, |best, obs| match best {
            Some(b) if b.1 <= obs.1 => Some(b),
            _ => Some(obs),
        })
    }

    /// The configuration the density model converged to.
    pub fn terminal_estimate(&self) -> CpResult<Configuration> {
        if self.observations.len() < 2 {
            return self
                .best_observed()
                .map(|(config, _)| config.clone())
                .ok_or_else(|| {
                    ExternalError::SearchFailed {
                        message: "sequential search has no completed trials".to_string(),
                    }
                    .into()
                });
        }

        let (good, bad) = split_by_loss(&self.observations, self.gamma);
        let mut estimate = Configuration::new();
        for param in &self.space.parameters {
            let value = match &param.kind {
                ParameterKind::Choice { values } => {
                    let ratios = categorical_ratios(&param.name, values, &good, &bad);
                    values[argmax(&ratios)].clone()
                }
                kind => {
                    let axis = NumericAxis::new(kind);
                    let l_centers = axis.centers(&param.name, &good);
                    let g_centers = axis.centers(&param.name, &bad);
                    let candidates = axis.terminal_candidates(kind, &l_centers);
                    let scores: Vec<f64> = candidates
                        .iter()
                        .map(|&x| axis.ratio(x, &l_centers, &g_centers))
                        .collect();
                    axis.to_value(kind, candidates[argmax(&scores)])
                }
            };
            estimate.insert(param.name.clone(), value);
        }

        Ok(estimate)
    }

    fn propose(&mut self) -> Configuration {
        let (good, bad) = split_by_loss(&self.observations, self.gamma);
        let mut config = Configuration::new();
        for param in &self.space.parameters {
            let value = sample_dimension(param, &good, &bad, self.n_candidates, &mut self.rng);
            config.insert(param.name.clone(), value);
        }
        config
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        let remaining = self.max_evals.saturating_sub(self.issued);
        let mut batch = Vec::with_capacity(count.min(remaining));
        for _ in 0..count.min(remaining) {
            let config = if self.observations.len() < self.n_startup {
                self.space.sample_random(&mut self.rng)
            } else {
                self.propose()
            };
            self.issued += 1;
            batch.push(config);
        }
        batch
    }

    fn report(&mut self, params: &Configuration, loss: f64) {
        debug!("tpe observation {}: loss {:.4}", self.observations.len(), loss);
        self.observations.push((params.clone(), loss));
    }

    fn conclude(&self) -> CpResult<Configuration> {
        self.terminal_estimate()
    }

    fn batch_size(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

// ---------------------------------------------------------------------------
// Per-dimension density models
// ---------------------------------------------------------------------------

/// Partition observations into (good, bad) by the gamma quantile of loss.
fn split_by_loss(
    observations: &[(Configuration, f64)],
    gamma: f64,
) -> (Vec<&Configuration>, Vec<&Configuration>) {
    let mut order: Vec<usize> = (0..observations.len()).collect();
    order.sort_by(|&a, &b| {
        observations[a]
            .1
            .partial_cmp(&observations[b].1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let n = order.len();
    let n_good = ((n as f64) * gamma).ceil() as usize;
    let n_good = n_good.clamp(1, n.saturating_sub(1).max(1));

    let (good_idx, bad_idx) = order.split_at(n_good.min(n));
    let good = good_idx.iter().map(|&i| &observations[i].0).collect();
    let bad = bad_idx.iter().map(|&i| &observations[i].0).collect();
    (good, bad)
}

fn sample_dimension<R: Rng>(
    param: &ParameterDef,
    good: &[&Configuration],
    bad: &[&Configuration],
    n_candidates: usize,
    rng: &mut R,
) -> ParameterValue {
    match &param.kind {
        ParameterKind::Choice { values } => {
            let l = categorical_probs(&param.name, values, good);
            let ratios = categorical_ratios(&param.name, values, good, bad);
            let mut best: Option<(usize, f64)> = None;
            for _ in 0..n_candidates {
                let idx = weighted_index(&l, rng);
                if best.map(|(_, score)| ratios[idx] > score).unwrap_or(true) {
                    best = Some((idx, ratios[idx]));
                }
            }
            let idx = best.map(|(idx, _)| idx).unwrap_or(0);
            values[idx].clone()
        }
        kind => {
            let axis = NumericAxis::new(kind);
            let l_centers = axis.centers(&param.name, good);
            let g_centers = axis.centers(&param.name, bad);
            let mut best: Option<(f64, f64)> = None;
            for _ in 0..n_candidates {
                let x = axis.draw(&l_centers, rng);
                let score = axis.ratio(x, &l_centers, &g_centers);
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((x, score));
                }
            }
            let x = best.map(|(x, _)| x).unwrap_or(axis.lo);
            axis.to_value(kind, x)
        }
    }
}

fn choice_counts(name: &str, values: &[ParameterValue], trials: &[&Configuration]) -> Vec<f64> {
    let mut counts = vec![0.0; values.len()];
    for trial in trials {
        if let Some(pos) = trial.get(name).and_then(|v| values.iter().position(|c| c == v)) {
            counts[pos] += 1.0;
        }
    }
    counts
}

/// Laplace-smoothed categorical probabilities.
fn categorical_probs(name: &str, values: &[ParameterValue], trials: &[&Configuration]) -> Vec<f64> {
    let counts = choice_counts(name, values, trials);
    let denom = trials.len() as f64 + values.len() as f64;
    counts.into_iter().map(|c| (c + 1.0) / denom).collect()
}

fn categorical_ratios(
    name: &str,
    values: &[ParameterValue],
    good: &[&Configuration],
    bad: &[&Configuration],
) -> Vec<f64> {
    let l = categorical_probs(name, values, good);
    let g = categorical_probs(name, values, bad);
    l.iter().zip(&g).map(|(l, g)| l / g).collect()
}

fn weighted_index<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let mut r = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if r < *w {
            return i;
        }
        r -= w;
    }
    weights.len().saturating_sub(1)
}

/// First index of the maximum.
fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (i, s) in scores.iter().enumerate() {
        if *s > scores[best] {
            best = i;
        }
    }
    best
}

/// A numeric dimension mapped to a working coordinate (log space for
/// `LogUniform`).
struct NumericAxis {
    lo: f64,
    hi: f64,
    log: bool,
}

impl NumericAxis {
    fn new(kind: &ParameterKind) -> Self {
        match kind {
            ParameterKind::FloatRange { low, high } => Self {
                lo: *low,
                hi: *high,
                log: false,
            },
            ParameterKind::LogUniform { low, high } => Self {
                lo: low.ln(),
                hi: high.ln(),
                log: true,
            },
            ParameterKind::IntRange { low, high } => Self {
                lo: *low as f64,
                hi: *high as f64,
                log: false,
            },
            ParameterKind::Choice { .. } => Self {
                lo: 0.0,
                hi: 0.0,
                log: false,
            },
        }
    }

    fn width(&self) -> f64 {
        self.hi - self.lo
    }

    fn coordinate(&self, value: &ParameterValue) -> Option<f64> {
        let v = value.as_f64()?;
        if self.log {
            (v > 0.0).then(|| v.ln())
        } else {
            Some(v)
        }
    }

    fn centers(&self, name: &str, trials: &[&Configuration]) -> Vec<f64> {
        trials
            .iter()
            .filter_map(|t| t.get(name).and_then(|v| self.coordinate(v)))
            .collect()
    }

    fn bandwidth(&self, n_centers: usize) -> f64 {
        (self.width() / (n_centers as f64 + 1.0).sqrt() * 0.5).max(self.width() * 0.01)
    }

    /// Parzen density with one uniform prior component.
    fn density(&self, x: f64, centers: &[f64]) -> f64 {
        if self.width() <= 0.0 {
            return 1.0;
        }
        let bw = self.bandwidth(centers.len());
        let norm = 1.0 / (bw * (2.0 * PI).sqrt());
        let kernels: f64 = centers
            .iter()
            .map(|c| {
                let z = (x - c) / bw;
                norm * (-0.5 * z * z).exp()
            })
            .sum();
        (1.0 / self.width() + kernels) / (centers.len() as f64 + 1.0)
    }

    fn ratio(&self, x: f64, l_centers: &[f64], g_centers: &[f64]) -> f64 {
        self.density(x, l_centers) / self.density(x, g_centers).max(f64::MIN_POSITIVE)
    }

    /// Draw from `l(x)`: the prior with weight 1/(n+1), else a jittered center.
    fn draw<R: Rng>(&self, centers: &[f64], rng: &mut R) -> f64 {
        if self.width() <= 0.0 {
            return self.lo;
        }
        let pick = rng.gen_range(0..=centers.len());
        if pick == centers.len() {
            return rng.gen_range(self.lo..=self.hi);
        }
        // Box-Muller transform for Gaussian noise
        let u1: f64 = rng.gen::<f64>().max(1e-12);
        let u2: f64 = rng.gen::<f64>();
        let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos() * self.bandwidth(centers.len());
        (centers[pick] + noise).clamp(self.lo, self.hi)
    }

    fn terminal_candidates(&self, kind: &ParameterKind, l_centers: &[f64]) -> Vec<f64> {
        match kind {
            ParameterKind::IntRange { low, high } if high - low < MAX_ENUMERATED_INTS => {
                (*low..=*high).map(|v| v as f64).collect()
            }
            _ if l_centers.is_empty() => vec![self.lo],
            _ => l_centers.to_vec(),
        }
    }

    fn to_value(&self, kind: &ParameterKind, x: f64) -> ParameterValue {
        match kind {
            ParameterKind::IntRange { low, high } => {
                ParameterValue::Int((x.round() as i64).clamp(*low, *high))
            }
            ParameterKind::LogUniform { low, high } => {
                ParameterValue::Float(x.exp().clamp(*low, *high))
            }
            ParameterKind::FloatRange { low, high } => ParameterValue::Float(x.clamp(*low, *high)),
            ParameterKind::Choice { values } => values[0].clone(),
        }
    }
}
