//! Randomised classification trees, the base learner of extra trees.
//!
//! Each node draws one uniform threshold per candidate feature and keeps
//! the candidate with the lowest weighted child impurity.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use cp_types::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Gini,
    Entropy,
}

/// Number of candidate features: per split for extra trees, per tree for
/// random forests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let m = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
        };
        m.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
        }
    }
}

fn impurity(criterion: Criterion, counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    match criterion {
        Criterion::Gini => 1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
        Criterion::Entropy => counts
            .iter()
            .filter(|c| **c > 0.0)
            .map(|c| {
                let p = c / total;
                -p * p.log2()
            })
            .sum(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree; leaves hold normalised class weights.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RandomizedTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct Builder<'a> {
    params: &'a TreeParams,
    data: &'a Dataset,
    targets: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
    rng: &'a mut ChaCha8Rng,
    nodes: Vec<Node>,
}

impl RandomizedTree {
    /// Grow a tree on `rows` of `data` (duplicates allowed).
    ///
    /// `targets` holds encoded class indices for every row of `data`.
    pub fn fit(
        params: &TreeParams,
        data: &Dataset,
        targets: &[usize],
        weights: &[f64],
        n_classes: usize,
        rows: Vec<usize>,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut builder = Builder {
            params,
            data,
            targets,
            weights,
            n_classes,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(rows, 0);
        RandomizedTree {
            nodes: builder.nodes,
        }
    }

    pub fn distribution(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn class_weights(&self, rows: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &r in rows {
            counts[self.targets[r]] += self.weights[r];
        }
        counts
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_weights(&rows);
        let total: f64 = counts.iter().sum();
        let idx = self.nodes.len();
        self.nodes.push(leaf(&counts, total));

        let params = self.params;
        let pure = counts.iter().filter(|c| **c > 0.0).count() <= 1;
        if pure
            || params.max_depth.is_some_and(|max| depth >= max)
            || rows.len() < params.min_samples_split
            || rows.len() < 2 * params.min_samples_leaf
        {
            return idx;
        }

        // Zero-gain splits are taken too; XOR-like patterns need them.
        let Some(split) = self.find_split(&rows, &counts, total) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.data.row(r)[split.feature] <= split.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let d = self.data.n_features();
        let m = self.params.max_features.resolve(d);
        let mut features: Vec<usize> = (0..d).collect();
        if m >= d {
            return features;
        }
        let (chosen, _) = features.partial_shuffle(&mut *self.rng, m);
        let mut chosen = chosen.to_vec();
        chosen.sort_unstable();
        chosen
    }

    fn find_split(&mut self, rows: &[usize], counts: &[f64], total: f64) -> Option<Split> {
        let mut best: Option<Split> = None;
        for feature in self.candidate_features() {
            if let Some(c) = self.random_threshold(rows, feature, counts, total) {
                if best.as_ref().map_or(true, |b| c.score < b.score) {
                    best = Some(c);
                }
            }
        }
        best
    }

    fn score_children(&self, left: &[f64], left_w: f64, counts: &[f64], total: f64) -> f64 {
        let right: Vec<f64> = counts.iter().zip(left).map(|(c, l)| c - l).collect();
        let right_w = total - left_w;
        let criterion = self.params.criterion;
        left_w * impurity(criterion, left, left_w) + right_w * impurity(criterion, &right, right_w)
    }

    fn random_threshold(&mut self, rows: &[usize], feature: usize, counts: &[f64], total: f64) -> Option<Split> {
        let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            let v = self.data.row(r)[feature];
            (lo.min(v), hi.max(v))
        });
        if !(lo < hi) {
            return None;
        }
        let threshold = self.rng.gen_range(lo..hi);

        let mut left = vec![0.0; self.n_classes];
        let mut left_w = 0.0;
        let mut n_left = 0;
        for &r in rows {
            if self.data.row(r)[feature] <= threshold {
                left[self.targets[r]] += self.weights[r];
                left_w += self.weights[r];
                n_left += 1;
            }
        }
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n_left < min_leaf || rows.len() - n_left < min_leaf {
            return None;
        }
        Some(Split {
            feature,
            threshold,
            score: self.score_children(&left, left_w, counts, total),
        })
    }
}

fn leaf(counts: &[f64], total: f64) -> Node {
    let distribution = if total > 0.0 {
        counts.iter().map(|c| c / total).collect()
    } else {
        vec![1.0 / counts.len().max(1) as f64; counts.len()]
    };
    Node::Leaf { distribution }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argmax;
    use rand::SeedableRng;

    fn grow(params: TreeParams, data: &Dataset, targets: &[usize], weights: &[f64]) -> RandomizedTree {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        RandomizedTree::fit(&params, data, targets, weights, 2, (0..data.len()).collect(), &mut rng)
    }

    fn all_features() -> TreeParams {
        TreeParams {
            max_features: MaxFeatures::All,
            ..TreeParams::default()
        }
    }

    #[test]
    fn fits_xor_exactly() {
        let data = Dataset::new(
            vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            vec![0, 1, 1, 0],
        )
        .unwrap();
        let targets = [0, 1, 1, 0];
        let tree = grow(all_features(), &data, &targets, &[1.0; 4]);
        for (i, row) in data.rows().enumerate() {
            assert_eq!(argmax(tree.distribution(row)), targets[i]);
        }
    }

    #[test]
    fn max_depth_is_respected() {
        let data = Dataset::new((0..16).map(|i| vec![i as f64]).collect(), (0..16).map(|i| i % 2).collect()).unwrap();
        let targets: Vec<usize> = (0..16).map(|i| i % 2).collect();
        let params = TreeParams {
            max_depth: Some(2),
            ..all_features()
        };
        assert!(grow(params, &data, &targets, &[1.0; 16]).depth() <= 2);
    }

    #[test]
    fn weights_decide_leaf_majority() {
        let data = Dataset::new(vec![vec![0.0]; 3], vec![0, 1, 1]).unwrap();
        let tree = grow(all_features(), &data, &[0, 1, 1], &[5.0, 1.0, 1.0]);
        let dist = tree.distribution(&[0.0]);
        assert_eq!(argmax(dist), 0);
        assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn min_samples_leaf_blocks_small_children() {
        let data = Dataset::new(vec![vec![0.0], vec![1.0], vec![2.0]], vec![0, 0, 1]).unwrap();
        let params = TreeParams {
            min_samples_leaf: 2,
            ..all_features()
        };
        let tree = grow(params, &data, &[0, 0, 1], &[1.0; 3]);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn separates_a_threshold() {
        let data = Dataset::new(
            (0..20).map(|i| vec![i as f64]).collect(),
            (0..20).map(|i| i64::from(i >= 10)).collect(),
        )
        .unwrap();
        let targets: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let tree = grow(all_features(), &data, &targets, &[1.0; 20]);
        for (i, row) in data.rows().enumerate() {
            assert_eq!(argmax(tree.distribution(row)), targets[i]);
        }
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
    }
}
