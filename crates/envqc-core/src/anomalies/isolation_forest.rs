//! Isolation trees over complete feature rows.
//!
//! Outliers are separated from the rest of the sample by fewer random axis-aligned splits, so
//! their expected path length through the trees is short.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful search in a binary search tree of `n` points, c(n).
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature_idx: usize,
        split_value: f64,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn path_length(&self, sample: &[f64], depth: usize) -> f64 {
        match self {
            IsolationNode::Leaf { size } => depth as f64 + average_path_length(*size),
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let next = if sample[*feature_idx] < *split_value {
                    left
                } else {
                    right
                };
                match next {
                    Some(node) => node.path_length(sample, depth + 1),
                    None => depth as f64 + 1.0,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build(rows: &[Vec<f64>], sample: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let n_features = rows.first().map_or(0, Vec::len);
        let root = build_node(rows, sample, n_features, 0, max_depth, rng)
            .unwrap_or(IsolationNode::Leaf { size: 0 });
        Self { root }
    }
}

fn build_node(
    rows: &[Vec<f64>],
    sample: Vec<usize>,
    n_features: usize,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Option<IsolationNode> {
    if sample.is_empty() {
        return None;
    }
    if depth >= max_depth || sample.len() <= 1 {
        return Some(IsolationNode::Leaf { size: sample.len() });
    }

    // Only features that still vary inside this node can split it.
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|feature| {
            let (min, max) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, &row| {
                let value = rows[row][feature];
                (acc.0.min(value), acc.1.max(value))
            });
            (max > min).then_some((feature, min, max))
        })
        .collect();

    if splittable.is_empty() {
        return Some(IsolationNode::Leaf { size: sample.len() });
    }

    let (feature_idx, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let split_value = split_between(min, max, rng.gen());

    let (left, right): (Vec<usize>, Vec<usize>) = sample
        .into_iter()
        .partition(|&row| rows[row][feature_idx] < split_value);

    Some(IsolationNode::Internal {
        feature_idx,
        split_value,
        left: build_node(rows, left, n_features, depth + 1, max_depth, rng).map(Box::new),
        right: build_node(rows, right, n_features, depth + 1, max_depth, rng).map(Box::new),
    })
}

/// Point at fraction `u` of `[min, max]`. The width of two finite extremes can overflow to
/// infinity, so those ranges are interpolated without it.
fn split_between(min: f64, max: f64, u: f64) -> f64 {
    let width = max - min;
    if width.is_finite() {
        min + u * width
    } else {
        min * (1.0 - u) + max * u
    }
}

/// A fitted forest. Every row passed to [`IsolationForest::fit`] and
/// [`IsolationForest::score_sample`] must be complete and finite.
#[derive(Debug, Clone)]
pub(crate) struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    pub(crate) fn fit(rows: &[Vec<f64>], n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = max_samples.min(rows.len());
        let max_depth = (sample_size.max(1) as f64).log2().ceil() as usize;

        let trees = (0..n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::build(rows, sample, max_depth, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    pub(crate) fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// `-(2^(-E[h(x)] / c(ψ)))`: close to -1 for outliers, above -0.5 for inliers.
    pub(crate) fn score_sample(&self, sample: &[f64]) -> f64 {
        let normalizer = average_path_length(self.sample_size);
        if self.trees.is_empty() || normalizer == 0.0 {
            return -0.5;
        }

        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.root.path_length(sample, 0))
            .sum::<f64>()
            / self.trees.len() as f64;

        -(2.0_f64.powf(-mean_path / normalizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_path_length_small_cases() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn isolated_point_scores_lower() {
        let mut rows: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![20.0 + (i % 10) as f64 * 0.1, 55.0 + (i % 7) as f64 * 0.2])
            .collect();
        rows.push(vec![90.0, 5.0]);

        let forest = IsolationForest::fit(&rows, 100, 128, 42);
        assert_eq!(forest.n_trees(), 100);

        let inlier = forest.score_sample(&[20.5, 55.6]);
        let outlier = forest.score_sample(&[90.0, 5.0]);
        assert!(outlier < inlier, "outlier {outlier} vs inlier {inlier}");
    }

    #[test]
    fn same_seed_same_forest_scores() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i * i) as f64]).collect();
        let a = IsolationForest::fit(&rows, 20, 32, 7);
        let b = IsolationForest::fit(&rows, 20, 32, 7);
        assert_eq!(a.score_sample(&[3.0, 9.0]), b.score_sample(&[3.0, 9.0]));
    }

    #[test]
    fn split_stays_inside_overflowing_range() {
        let split = split_between(-1e308, 1e308, 0.75);
        assert!(split.is_finite());
        assert!(split > 0.0 && split < 1e308);
        assert_eq!(split_between(0.0, 10.0, 0.25), 2.5);
    }

    #[test]
    fn extreme_finite_rows_build_a_forest() {
        let rows = vec![vec![-1e308], vec![0.0], vec![1e308], vec![5.0]];
        let forest = IsolationForest::fit(&rows, 50, 256, 42);
        assert_eq!(forest.n_trees(), 50);
        for row in &rows {
            assert!(forest.score_sample(row).is_finite());
        }
    }

    #[test]
    fn single_row_forest_is_neutral() {
        let forest = IsolationForest::fit(&[vec![1.0]], 10, 256, 1);
        assert_eq!(forest.score_sample(&[1.0]), -0.5);
    }
}
