use nalgebra::{DMatrix, DVector};
use ndarray::{ArrayView1, ArrayView2};

use super::Regressor;
use crate::error::{PredictorError, Result};

/// Fitted linear model `y = intercept + coefficients · x`.
#[derive(Debug, Clone)]
pub struct LinearFit {
    intercept: f64,
    coefficients: Vec<f64>,
}

struct Centered {
    x: DMatrix<f64>,
    y: DVector<f64>,
    x_means: Vec<f64>,
    y_mean: f64,
}

fn center(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Centered {
    let (n, p) = x.dim();
    let x_means: Vec<f64> = (0..p).map(|j| x.column(j).sum() / n as f64).collect();
    let y_mean = y.sum() / n as f64;
    Centered {
        x: DMatrix::from_fn(n, p, |i, j| x[[i, j]] - x_means[j]),
        y: DVector::from_fn(n, |i, _| y[i] - y_mean),
        x_means,
        y_mean,
    }
}

impl LinearFit {
    /// Ordinary least squares.
    ///
    /// Solved through an SVD so rank-deficient designs (constant columns,
    /// fewer rows than features) yield the minimum-norm solution.
    pub fn ordinary(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self> {
        let c = center(x, y);
        let svd = c.x.clone().svd(true, true);
        let eps = svd.singular_values.max() * 1e-10;
        let beta = svd
            .solve(&c.y, eps)
            .map_err(|e| PredictorError::Training(format!("least squares solve failed: {}", e)))?;
        Self::from_centered(&c, beta)
    }

    /// L2-regularised least squares; the intercept is not penalised.
    pub fn ridge(x: ArrayView2<f64>, y: ArrayView1<f64>, alpha: f64) -> Result<Self> {
        let c = center(x, y);
        let p = c.x.ncols();
        let xt = c.x.transpose();
        let gram = &xt * &c.x + DMatrix::<f64>::identity(p, p) * alpha;
        let rhs = &xt * &c.y;
        let chol = gram.cholesky().ok_or_else(|| {
            PredictorError::Training("ridge normal equations are not positive definite".into())
        })?;
        Self::from_centered(&c, chol.solve(&rhs))
    }

    fn from_centered(c: &Centered, beta: DVector<f64>) -> Result<Self> {
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(PredictorError::Training(
                "solver produced non-finite coefficients".into(),
            ));
        }
        let coefficients: Vec<f64> = beta.iter().copied().collect();
        let intercept = c.y_mean
            - coefficients
                .iter()
                .zip(&c.x_means)
                .map(|(b, m)| b * m)
                .sum::<f64>();
        Ok(Self {
            intercept,
            coefficients,
        })
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl Regressor for LinearFit {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row.iter())
                .map(|(b, x)| b * x)
                .sum::<f64>()
    }
}
