use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::tree::{RegressionTree, TreeParams};
use super::{ModelConfig, Regressor};

/// Bagged regression trees, predictions averaged.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: ArrayView2<f64>, y: &[f64], config: &ModelConfig) -> Self {
        let n = x.nrows();
        let params = TreeParams {
            max_depth: config.forest_max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: 1,
        };
        let mut rng = StdRng::seed_from_u64(config.seed);
        let trees = (0..config.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, bootstrap, params)
            })
            .collect();
        Self { trees }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForest {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        sum / self.trees.len() as f64
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        let width = self.trees.first()?.importances().len();
        let mut total = vec![0.0; width];
        for tree in &self.trees {
            let per_tree: f64 = tree.importances().iter().sum();
            if per_tree <= 0.0 {
                continue;
            }
            for (acc, v) in total.iter_mut().zip(tree.importances()) {
                *acc += v / per_tree;
            }
        }
        Some(normalize(total))
    }
}

/// Least-squares gradient boosting with shrinkage.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(x: ArrayView2<f64>, y: &[f64], config: &ModelConfig) -> Self {
        let n = x.nrows();
        let params = TreeParams {
            max_depth: config.boost_max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: 1,
        };
        let init = y.iter().sum::<f64>() / n as f64;
        let mut fitted = vec![init; n];
        let mut trees = Vec::with_capacity(config.n_estimators);

        for _ in 0..config.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            let tree = RegressionTree::fit(x, &residuals, (0..n).collect(), params);
            for (i, f) in fitted.iter_mut().enumerate() {
                *f += config.learning_rate * tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }

        Self {
            init,
            learning_rate: config.learning_rate,
            trees,
        }
    }
}

impl Regressor for GradientBoosting {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|t| t.predict_row(row))
                    .sum::<f64>()
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        let width = self.trees.first()?.importances().len();
        let mut total = vec![0.0; width];
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.importances()) {
                *acc += v;
            }
        }
        Some(normalize(total))
    }
}

fn normalize(mut values: Vec<f64>) -> Vec<f64> {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
    values
}
