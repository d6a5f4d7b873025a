//! Small dense linear models fitted by batch gradient descent.
//!
//! Everything here is deterministic: zero-initialized weights, fixed
//! learning rate and epoch count, no randomness.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const LEARNING_RATE: f64 = 0.1;
const EPOCHS: usize = 800;

/// Column-wise z-score scaling. Constant columns scale by 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        // ---
        let width = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;

        let means: Vec<f64> = (0..width)
            .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let stds = (0..width)
            .map(|j| {
                let var = rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

/// A linear model over standardized inputs.
pub trait LinearModel: Sized + Send + Sync {
    fn fit(x: &[Vec<f64>], y: &[f64]) -> Self;
    fn predict(&self, row: &[f64]) -> f64;
    fn weights(&self) -> &[f64];
}

fn dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(row).map(|(w, x)| w * x).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Shared batch gradient descent loop. `link` maps the linear score to the
/// prediction; for both squared loss with identity and log loss with the
/// logistic link the gradient is `(prediction - y) * x`.
fn gradient_descent(x: &[Vec<f64>], y: &[f64], link: fn(f64) -> f64) -> (Vec<f64>, f64) {
    // ---
    let width = x.first().map_or(0, Vec::len);
    let mut weights = vec![0.0; width];
    let mut bias = 0.0;
    if x.is_empty() {
        return (weights, bias);
    }
    let n = x.len() as f64;

    for _ in 0..EPOCHS {
        let mut grad_w = vec![0.0; width];
        let mut grad_b = 0.0;
        for (row, target) in x.iter().zip(y) {
            let err = link(dot(&weights, row) + bias) - target;
            for (g, xi) in grad_w.iter_mut().zip(row) {
                *g += err * xi;
            }
            grad_b += err;
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= LEARNING_RATE * g / n;
        }
        bias -= LEARNING_RATE * grad_b / n;
    }

    (weights, bias)
}

/// Binary classifier; `predict` is the probability of the positive class.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearModel for LogisticRegression {
    fn fit(x: &[Vec<f64>], y: &[f64]) -> Self {
        let (weights, bias) = gradient_descent(x, y, sigmoid);
        Self { weights, bias }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, row) + self.bias)
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Ordinary least squares regressor.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegression {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearModel for LinearRegression {
    fn fit(x: &[Vec<f64>], y: &[f64]) -> Self {
        let (weights, bias) = gradient_descent(x, y, |z| z);
        Self { weights, bias }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.bias
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Seeded shuffle into `(train, test)` index sets; test is `ceil(n / 5)`.
pub fn train_test_split(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    // ---
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = n.div_ceil(5);
    let train = indices.split_off(test_len);
    (train, indices)
}

/// Share of thresholded predictions (`> 0.5`) that match the labels.
pub fn accuracy(probabilities: &[f64], labels: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let hits = probabilities
        .iter()
        .zip(labels)
        .filter(|(p, y)| (**p > 0.5) == (**y > 0.5))
        .count();
    hits as f64 / labels.len() as f64
}

pub fn rmse(predictions: &[f64], targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sq: f64 = predictions.iter().zip(targets).map(|(p, t)| (p - t).powi(2)).sum();
    (sq / targets.len() as f64).sqrt()
}

/// `|w|` normalized to sum to one; uniform when every weight is zero.
pub fn normalized_importance(weights: &[f64]) -> Vec<f64> {
    // ---
    let total: f64 = weights.iter().map(|w| w.abs()).sum();
    if total <= f64::EPSILON {
        let share = 1.0 / weights.len().max(1) as f64;
        return vec![share; weights.len()];
    }
    weights.iter().map(|w| w.abs() / total).collect()
}
