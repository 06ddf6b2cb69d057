//! Kernel-regression surrogate and acquisition function for Bayesian search.
//!
//! The surrogate is a Nadaraya-Watson regressor with an RBF kernel over the
//! normalized axis space: cheap to fit, no linear algebra dependencies, and
//! well-behaved on the small observation counts a tuning run produces. The
//! acquisition criterion is expected improvement over the best observed score.

use cr_types::SearchError;

/// Fitted surrogate over normalized `[0, 1]^d` points.
#[derive(Debug, Clone)]
pub struct KernelSurrogate {
    points: Vec<Vec<f64>>,
    scores: Vec<f64>,
    bandwidth: f64,
    score_mean: f64,
    score_std: f64,
}

impl KernelSurrogate {
    /// Fit the surrogate to `(point, score)` observations.
    ///
    /// Fails when there are fewer than two observations or the points are all
    /// identical (no usable length scale) — callers fall back to a random
    /// proposal for that iteration.
    pub fn fit(points: &[Vec<f64>], scores: &[f64]) -> Result<Self, SearchError> {
        if points.len() < 2 || points.len() != scores.len() {
            return Err(SearchError::SurrogateFit {
                message: format!("need at least 2 observations, got {}", points.len()),
            });
        }

        // Median pairwise distance as the kernel bandwidth.
        let mut distances = Vec::new();
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                distances.push(euclidean(&points[i], &points[j]));
            }
        }
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let bandwidth = distances[distances.len() / 2];
        if bandwidth <= 0.0 {
            return Err(SearchError::SurrogateFit {
                message: "all observed points are identical".into(),
            });
        }

        let score_mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance = scores
            .iter()
            .map(|s| (s - score_mean).powi(2))
            .sum::<f64>()
            / scores.len() as f64;
        // Floor keeps the acquisition from collapsing when all scores tie.
        let score_std = variance.sqrt().max(1e-3);

        Ok(Self {
            points: points.to_vec(),
            scores: scores.to_vec(),
            bandwidth,
            score_mean,
            score_std,
        })
    }

    /// Predict `(mean, std)` at a normalized point.
    ///
    /// The mean is the kernel-weighted average of observed scores; the
    /// uncertainty shrinks with total kernel mass, so unexplored regions keep
    /// a std near the observed score spread.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let mut weight_sum = 0.0;
        let mut weighted_score = 0.0;
        for (point, score) in self.points.iter().zip(&self.scores) {
            let d = euclidean(point, x);
            let w = (-0.5 * (d / self.bandwidth).powi(2)).exp();
            weight_sum += w;
            weighted_score += w * score;
        }

        let mean = if weight_sum > 1e-12 {
            weighted_score / weight_sum
        } else {
            self.score_mean
        };
        let std = self.score_std / (1.0 + weight_sum).sqrt();
        (mean, std)
    }
}

/// Expected improvement of a candidate with predicted `(mean, std)` over the
/// incumbent `best` score.
pub fn expected_improvement(mean: f64, std: f64, best: f64) -> f64 {
    if std <= 1e-12 {
        return (mean - best).max(0.0);
    }
    let z = (mean - best) / std;
    (mean - best) * normal_cdf(z) + std * normal_pdf(z)
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation.
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}
