//! Gradient-boosted decision trees.
//!
//! [`Trainer`] is the seam between the training orchestrator and whatever
//! learns the model. [`GbdtTrainer`] is the built-in implementation: binary
//! logistic boosting with exact greedy split search over sparse columns.
//! Implicit zeros are treated as an ordinary value, so a split threshold may
//! fall on either side of zero.
//!
//! [`Booster`] is the trained artifact. It serializes to JSON for the model
//! store and scores rows as two-class probabilities `[1 - p, p]`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EnvOverrides;
use crate::errors::{PredictError, TrainError};
use crate::matrix::{CsrMatrix, LabeledDataset};

/// Hyper-parameters for one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub max_depth: usize,
    pub eta: f64,
    pub num_rounds: usize,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Minimum hessian sum on each side of a split.
    pub min_child_weight: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            eta: 0.3,
            num_rounds: 10,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }
}

pub trait Trainer: Send + Sync {
    fn train(&self, data: &LabeledDataset, params: &TrainParams) -> Result<Booster, TrainError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GbdtTrainer;

impl Trainer for GbdtTrainer {
    fn train(&self, data: &LabeledDataset, params: &TrainParams) -> Result<Booster, TrainError> {
        if data.is_empty() {
            return Err(TrainError::Training("dataset has no rows".to_string()));
        }
        if params.num_rounds == 0 || params.max_depth == 0 {
            return Err(TrainError::Training(
                "num_rounds and max_depth must be at least 1".to_string(),
            ));
        }
        if !params.eta.is_finite() || params.eta <= 0.0 {
            return Err(TrainError::Training("eta must be finite and positive".to_string()));
        }

        let features = &data.features;
        let columns = features.columns();
        let n = data.len();
        let mut margins = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.num_rounds);

        tracing::info!(
            rows = n,
            features = features.n_cols(),
            rounds = params.num_rounds,
            max_depth = params.max_depth,
            eta = params.eta,
            "Training gradient-boosted trees"
        );

        for round in 0..params.num_rounds {
            let (grad, hess): (Vec<f64>, Vec<f64>) = margins
                .iter()
                .zip(&data.labels)
                .map(|(&m, &y)| {
                    let p = sigmoid(m);
                    (p - y, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            let tree = TreeBuilder {
                columns: &columns,
                grad: &grad,
                hess: &hess,
                params,
            }
            .build((0..n).collect());

            for (i, margin) in margins.iter_mut().enumerate() {
                *margin += tree.score(|j| features.get(i, j));
            }
            tracing::debug!(round, leaves = tree.leaf_count(), "Finished boosting round");
            trees.push(tree);
        }

        let booster = Booster {
            n_features: features.n_cols(),
            base_margin: 0.0,
            trees,
        };
        booster.validate().map_err(TrainError::Training)?;
        Ok(booster)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        /// Rows with `x < threshold` go left.
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf value reached by a row whose feature `j` is `feature_value(j)`.
    pub fn score<F: Fn(usize) -> f64>(&self, feature_value: F) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature_value(*feature) < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

struct Candidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

struct TreeBuilder<'a> {
    columns: &'a [Vec<(usize, f64)>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a TrainParams,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>) -> Tree {
        let mut tree = Tree { nodes: Vec::new() };
        self.grow(&mut tree, rows, 0);
        tree
    }

    fn grow(&self, tree: &mut Tree, rows: Vec<usize>, depth: usize) -> usize {
        let idx = tree.nodes.len();
        let (g, h) = self.sums(&rows);
        tree.nodes.push(Node::Leaf {
            value: -g / (h + self.params.lambda) * self.params.eta,
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(best) = self.best_split(&rows, g, h) else {
            return idx;
        };

        let mut in_node = vec![false; self.grad.len()];
        for &r in &rows {
            in_node[r] = true;
        }
        let mut value_of = vec![0.0; self.grad.len()];
        for &(r, v) in &self.columns[best.feature] {
            if in_node[r] {
                value_of[r] = v;
            }
        }
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| value_of[r] < best.threshold);

        let left = self.grow(tree, left_rows, depth + 1);
        let right = self.grow(tree, right_rows, depth + 1);
        tree.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn objective(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    /// Best split over all features; ties keep the lower feature index and
    /// the lower threshold.
    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<Candidate> {
        let mut in_node = vec![false; self.grad.len()];
        for &r in rows {
            in_node[r] = true;
        }

        let parent = self.objective(g_total, h_total);
        let mut best: Option<Candidate> = None;

        for (feature, column) in self.columns.iter().enumerate() {
            // (value, grad, hess) for stored entries in this node, plus one
            // bucket holding every implicit zero.
            let mut entries: Vec<(f64, f64, f64)> = column
                .iter()
                .filter(|(r, _)| in_node[*r])
                .map(|&(r, v)| (v, self.grad[r], self.hess[r]))
                .collect();
            if entries.is_empty() {
                continue;
            }
            let stored = entries.len();
            let (g_nz, h_nz) = entries
                .iter()
                .fold((0.0, 0.0), |(g, h), e| (g + e.1, h + e.2));
            if stored < rows.len() {
                entries.push((0.0, g_total - g_nz, h_total - h_nz));
            }
            entries.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut gl, mut hl) = (0.0, 0.0);
            for pair in entries.windows(2) {
                let (v, g, h) = pair[0];
                gl += g;
                hl += h;
                let next = pair[1].0;
                if next <= v {
                    continue;
                }
                let (gr, hr) = (g_total - gl, h_total - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain = self.objective(gl, hl) + self.objective(gr, hr) - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate {
                        gain,
                        feature,
                        threshold: v + (next - v) / 2.0,
                    });
                }
            }
        }
        best
    }
}

/// Trained model: a sum of trees over a logistic link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    pub n_features: usize,
    pub base_margin: f64,
    pub trees: Vec<Tree>,
}

impl Booster {
    /// Check that every tree can be walked from its root to a leaf: child
    /// indices point forward and stay in range, split features fit the
    /// model width and all numbers are finite.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_margin.is_finite() {
            return Err("base margin is not finite".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} has no nodes", t));
            }
            for (idx, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Leaf { value } if !value.is_finite() => {
                        return Err(format!("tree {} node {}: leaf value is not finite", t, idx));
                    }
                    Node::Leaf { .. } => {}
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= self.n_features {
                            return Err(format!(
                                "tree {} node {}: feature {} out of range for {} features",
                                t, idx, feature, self.n_features
                            ));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("tree {} node {}: threshold is not finite", t, idx));
                        }
                        for child in [*left, *right] {
                            if child <= idx || child >= tree.nodes.len() {
                                return Err(format!(
                                    "tree {} node {}: child {} out of range",
                                    t, idx, child
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn margin<F: Fn(usize) -> f64 + Copy>(&self, value: F) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.score(value)).sum::<f64>()
    }

    /// Class probabilities `[1 - p, p]` for each dense row. Rows shorter than
    /// the trained width are padded with zeros; wider rows are rejected.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, PredictError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() > self.n_features {
                return Err(PredictError::FeatureCount {
                    row: i,
                    expected: self.n_features,
                    actual: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PredictError::NonFinite { row: i });
            }
        }

        Ok(rows
            .par_iter()
            .map(|row| {
                let p = sigmoid(self.margin(|j| row.get(j).copied().unwrap_or(0.0)));
                [1.0 - p, p]
            })
            .collect())
    }

    /// Probabilities for the rows of a sparse matrix.
    pub fn predict_sparse(&self, matrix: &CsrMatrix) -> Result<Vec<[f64; 2]>, PredictError> {
        if matrix.n_cols() > self.n_features {
            return Err(PredictError::FeatureCount {
                row: 0,
                expected: self.n_features,
                actual: matrix.n_cols(),
            });
        }
        Ok((0..matrix.n_rows())
            .map(|i| {
                let p = sigmoid(self.margin(|j| {
                    if j < matrix.n_cols() {
                        matrix.get(i, j)
                    } else {
                        0.0
                    }
                }));
                [1.0 - p, p]
            })
            .collect())
    }
}

/// How prediction work is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictorConfig {
    pub threads: usize,
    /// A GPU was requested through the environment. Only CPU prediction is
    /// implemented, so this is reported and otherwise ignored.
    pub gpu_requested: bool,
}

impl PredictorConfig {
    pub fn from_env(env: &EnvOverrides) -> Self {
        let gpu_requested = matches!(
            env.gpu_devices.as_deref().map(str::trim),
            Some(devices) if !devices.is_empty() && devices != "-1"
        );
        let threads = env
            .threads
            .as_deref()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .map(|t| t.max(1) as usize)
            .unwrap_or(1);
        Self {
            threads,
            gpu_requested,
        }
    }

    pub fn build_pool(&self) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
        if self.gpu_requested {
            tracing::warn!("GPU prediction requested but not supported; using CPU");
        }
        tracing::info!("Using CPU for prediction with {} threads", self.threads);
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("boost-predict-{}", i))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> LabeledDataset {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64])
            .collect();
        let labels = (0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect();
        LabeledDataset::new(CsrMatrix::from_dense(&rows).unwrap(), labels).unwrap()
    }

    #[test]
    fn learns_a_separable_dataset() {
        let data = separable(40);
        let booster = GbdtTrainer.train(&data, &TrainParams::default()).unwrap();
        assert_eq!(booster.trees.len(), 10);
        assert_eq!(booster.n_features, 2);

        let probs = booster.predict_sparse(&data.features).unwrap();
        for (i, (p, &y)) in probs.iter().zip(&data.labels).enumerate() {
            assert!((p[0] + p[1] - 1.0).abs() < 1e-12);
            let predicted = if p[1] > 0.5 { 1.0 } else { 0.0 };
            assert_eq!(predicted, y, "row {}", i);
        }
        // The first split uses the informative column.
        match &booster.trees[0].nodes[0] {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert!((threshold - 19.5).abs() < 1e-12);
            }
            other => panic!("expected a split, got {:?}", other),
        }
    }

    #[test]
    fn respects_max_depth() {
        let data = separable(64);
        let params = TrainParams {
            max_depth: 1,
            num_rounds: 3,
            ..Default::default()
        };
        let booster = GbdtTrainer.train(&data, &params).unwrap();
        for tree in &booster.trees {
            assert!(tree.nodes.len() <= 3);
        }
    }

    #[test]
    fn constant_labels_give_single_leaves() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let data = LabeledDataset::new(CsrMatrix::from_dense(&rows).unwrap(), vec![1.0; 4]).unwrap();
        let booster = GbdtTrainer.train(&data, &TrainParams::default()).unwrap();
        assert!(booster.trees.iter().all(|t| t.nodes.len() == 1));
        let p = booster.predict(&[vec![2.5]]).unwrap();
        assert!(p[0][1] > 0.5);
    }

    #[test]
    fn rejects_empty_dataset() {
        let data = LabeledDataset::new(CsrMatrix::new(3), Vec::new()).unwrap();
        assert!(matches!(
            GbdtTrainer.train(&data, &TrainParams::default()),
            Err(TrainError::Training(_))
        ));
    }

    #[test]
    fn predict_validates_width_and_pads_short_rows() {
        let booster = GbdtTrainer
            .train(&separable(20), &TrainParams::default())
            .unwrap();
        assert_eq!(
            booster.predict(&[vec![1.0, 2.0, 3.0]]).unwrap_err(),
            PredictError::FeatureCount {
                row: 0,
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(
            booster.predict(&[vec![f64::NAN]]).unwrap_err(),
            PredictError::NonFinite { row: 0 }
        );
        let short = booster.predict(&[vec![18.0]]).unwrap();
        let full = booster.predict(&[vec![18.0, 0.0]]).unwrap();
        assert_eq!(short, full);
    }

    #[test]
    fn booster_round_trips_through_json() {
        let booster = GbdtTrainer
            .train(&separable(20), &TrainParams::default())
            .unwrap();
        let json = serde_json::to_string(&booster).unwrap();
        assert!(json.contains("\"kind\":\"split\""));
        let back: Booster = serde_json::from_str(&json).unwrap();
        assert_eq!(back, booster);
    }

    #[test]
    fn huge_learning_rate_fails_instead_of_saving_infinite_leaves() {
        // 100 positive rows: the first leaf is 50 / 26 * eta, past f64::MAX.
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let data =
            LabeledDataset::new(CsrMatrix::from_dense(&rows).unwrap(), vec![1.0; 100]).unwrap();
        let params = TrainParams {
            eta: 1e308,
            num_rounds: 1,
            ..Default::default()
        };
        assert!(matches!(
            GbdtTrainer.train(&data, &params),
            Err(TrainError::Training(_))
        ));
        let params = TrainParams {
            eta: f64::INFINITY,
            ..Default::default()
        };
        assert!(GbdtTrainer.train(&separable(20), &params).is_err());
    }

    #[test]
    fn validate_rejects_malformed_trees() {
        let trained = GbdtTrainer
            .train(&separable(20), &TrainParams::default())
            .unwrap();
        assert_eq!(trained.validate(), Ok(()));

        let split = |feature, left, right| Node::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = Node::Leaf { value: 0.1 };
        let malformed = [
            vec![split(0, 7, 8)],
            vec![],
            vec![split(0, 0, 1), leaf.clone()],
            vec![leaf.clone(), split(0, 0, 0)],
            vec![split(5, 1, 2), leaf.clone(), leaf.clone()],
            vec![Node::Leaf { value: f64::INFINITY }],
        ];
        for nodes in malformed {
            let booster = Booster {
                n_features: 2,
                base_margin: 0.0,
                trees: vec![Tree { nodes: nodes.clone() }],
            };
            assert!(booster.validate().is_err(), "{:?}", nodes);
        }

        let booster = Booster {
            n_features: 2,
            base_margin: f64::NAN,
            trees: Vec::new(),
        };
        assert!(booster.validate().is_err());
    }

    #[test]
    fn predictor_config_from_env() {
        let env = EnvOverrides {
            threads: Some("4".to_string()),
            gpu_devices: Some("-1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            PredictorConfig::from_env(&env),
            PredictorConfig {
                threads: 4,
                gpu_requested: false
            }
        );

        let env = EnvOverrides {
            threads: Some("0".to_string()),
            gpu_devices: Some("0".to_string()),
            ..Default::default()
        };
        let cfg = PredictorConfig::from_env(&env);
        assert_eq!(cfg.threads, 1);
        assert!(cfg.gpu_requested);
        assert_eq!(PredictorConfig::from_env(&EnvOverrides::default()).threads, 1);
    }
}
