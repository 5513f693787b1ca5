//! CART regression trees with variance-reduction splits.

use ndarray::{ArrayView1, ArrayView2};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction credited to each feature.
    importances: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'x, 'y> {
    x: ArrayView2<'x, f64>,
    y: &'y [f64],
    params: TreeParams,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl RegressionTree {
    /// Grow a tree on the given sample rows of `x`/`y`. Rows may repeat
    /// (bootstrap samples).
    pub fn fit(x: ArrayView2<f64>, y: &[f64], samples: Vec<usize>, params: TreeParams) -> Self {
        let mut builder = Builder {
            x,
            y,
            params,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        };
        builder.build(samples, 0);
        Self {
            nodes: builder.nodes,
            importances: builder.importances,
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_, '_> {
    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let sum_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let value = sum / n;
        let sse = sum_sq - sum * sum / n;

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || sse <= MIN_GAIN
        {
            return idx;
        }
        let Some(split) = self.best_split(&samples, sse) else {
            return idx;
        };

        let x = self.x;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);
        if left.is_empty() || right.is_empty() {
            return idx;
        }

        self.importances[split.feature] += split.gain;
        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, samples: &[usize], parent_sse: f64) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;
        let mut order = samples.to_vec();

        for feature in 0..self.x.ncols() {
            let column = self.x.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

            let total: f64 = order.iter().map(|&i| self.y[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| self.y[i] * self.y[i]).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for k in 1..n {
                let prev = order[k - 1];
                left_sum += self.y[prev];
                left_sq += self.y[prev] * self.y[prev];

                let (lo, hi) = (column[prev], column[order[k]]);
                if lo >= hi || k < min_leaf || n - k < min_leaf {
                    continue;
                }

                let (nl, nr) = (k as f64, (n - k) as f64);
                let right_sum = total - left_sum;
                let sse_left = left_sq - left_sum * left_sum / nl;
                let sse_right = (total_sq - left_sq) - right_sum * right_sum / nr;
                let gain = parent_sse - sse_left - sse_right;

                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}
